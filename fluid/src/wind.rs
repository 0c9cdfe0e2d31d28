//! Wind source component.

use bevy::prelude::*;

/// Attached to a sensor collider, turns its trigger region into a wind
/// source: a constant acceleration injected into any fluid volume the
/// region overlaps, without blocking flow.
#[derive(Component, Clone, Copy, Debug, Default, Reflect)]
pub struct WindSource {
    /// Acceleration transmitted to the stream, in meters per second
    /// squared, in the source's local frame.
    pub force: Vec3,
}

impl WindSource {
    pub fn new(force: Vec3) -> Self {
        Self { force }
    }

    /// The force rotated into world space.
    pub fn world_force(&self, transform: &GlobalTransform) -> Vec3 {
        transform.rotation() * self.force
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_force_follows_rotation() {
        let source = WindSource::new(Vec3::X);
        let transform = GlobalTransform::from(
            Transform::from_rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2)),
        );
        let force = source.world_force(&transform);
        assert!((force - Vec3::NEG_Z).length() < 1e-5);
    }
}
