//! Per-tick collision classification for a fluid volume.
//!
//! Overlapping host colliders are split into wind sources (sensors
//! carrying a [`crate::WindSource`]) and obstacles (solids carrying
//! rigid-body kinematics). Records are ephemeral: rebuilt every tick,
//! discarded before the next classification, no identity across ticks.

use bevy::prelude::*;
use bevy_rapier3d::prelude::{Collider, Velocity};

use crate::colliders::ColliderShape;
use crate::coords::VolumeTransform;

/// A trigger region pushing a constant force into the field.
pub struct WindRecord {
    pub shape: ColliderShape,
    /// Force in volume-local space, divided by volume scale.
    pub force: Vec3,
}

/// A solid region overwriting the field with a rigid-body velocity
/// profile (no-slip boundary).
pub struct ObstacleRecord {
    pub shape: ColliderShape,
    /// Linear velocity in volume-local space, divided by volume scale.
    pub velocity: Vec3,
    /// Angular velocity rotated into volume-local space. Not divided by
    /// scale: an angular rate in rad/s is scale-invariant.
    pub angular_velocity: Vec3,
}

/// Snapshot of one overlapping collider, gathered from the host scene
/// before classification.
pub struct ColliderSnapshot {
    pub collider: Collider,
    pub transform: GlobalTransform,
    /// Whether the collider is a trigger (rapier sensor).
    pub is_sensor: bool,
    /// World-space wind force, if a wind source is attached.
    pub wind_force: Option<Vec3>,
    /// Attached rigid body kinematics, if any (world space).
    pub velocity: Option<Velocity>,
}

/// Wind and obstacle records for one tick.
///
/// The backing vectors are reused across ticks: cleared and repopulated,
/// grown but never shrunk.
#[derive(Default)]
pub struct Collisions {
    pub winds: Vec<WindRecord>,
    pub obstacles: Vec<ObstacleRecord>,
}

impl Collisions {
    pub fn clear(&mut self) {
        self.winds.clear();
        self.obstacles.clear();
    }

    /// Rebuilds both record lists from this tick's collider snapshots.
    ///
    /// Triggers without a wind source are skipped silently; solids
    /// without a rigid body become static obstacles with zero velocity.
    /// Unsupported shapes were already reported by the adapter and are
    /// dropped here.
    pub fn rebuild(
        &mut self,
        volume: &VolumeTransform,
        snapshots: impl IntoIterator<Item = ColliderSnapshot>,
    ) {
        self.clear();
        let inverse_rotation = volume.rotation.inverse();

        for snapshot in snapshots {
            if snapshot.is_sensor && snapshot.wind_force.is_none() {
                continue;
            }

            let shape =
                ColliderShape::from_collider(&snapshot.collider, &snapshot.transform, volume);
            if shape.is_unsupported() {
                continue;
            }

            if let Some(world_force) = snapshot.wind_force.filter(|_| snapshot.is_sensor) {
                self.winds.push(WindRecord {
                    shape,
                    force: inverse_rotation * world_force / volume.scale,
                });
            } else {
                let (velocity, angular_velocity) = match snapshot.velocity {
                    Some(body) => (
                        inverse_rotation * body.linvel / volume.scale,
                        inverse_rotation * body.angvel,
                    ),
                    None => (Vec3::ZERO, Vec3::ZERO),
                };
                self.obstacles.push(ObstacleRecord {
                    shape,
                    velocity,
                    angular_velocity,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> VolumeTransform {
        VolumeTransform {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: 2.0,
        }
    }

    fn ball_snapshot(position: Vec3) -> ColliderSnapshot {
        ColliderSnapshot {
            collider: Collider::ball(0.5),
            transform: GlobalTransform::from(Transform::from_translation(position)),
            is_sensor: false,
            wind_force: None,
            velocity: None,
        }
    }

    #[test]
    fn solid_without_body_is_a_static_obstacle() {
        let mut collisions = Collisions::default();
        collisions.rebuild(&volume(), [ball_snapshot(Vec3::ONE)]);
        assert_eq!(collisions.obstacles.len(), 1);
        assert!(collisions.winds.is_empty());
        let obstacle = &collisions.obstacles[0];
        assert_eq!(obstacle.velocity, Vec3::ZERO);
        assert_eq!(obstacle.angular_velocity, Vec3::ZERO);
    }

    #[test]
    fn sensor_without_wind_source_is_skipped() {
        let mut collisions = Collisions::default();
        let mut snapshot = ball_snapshot(Vec3::ONE);
        snapshot.is_sensor = true;
        collisions.rebuild(&volume(), [snapshot]);
        assert!(collisions.winds.is_empty());
        assert!(collisions.obstacles.is_empty());
    }

    #[test]
    fn sensor_with_wind_source_becomes_wind() {
        let mut collisions = Collisions::default();
        let mut snapshot = ball_snapshot(Vec3::ONE);
        snapshot.is_sensor = true;
        snapshot.wind_force = Some(Vec3::new(4.0, 0.0, 0.0));
        collisions.rebuild(&volume(), [snapshot]);
        assert_eq!(collisions.winds.len(), 1);
        // world force divided by volume scale
        assert!((collisions.winds[0].force - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn body_velocity_is_scaled_but_angular_is_not() {
        let mut collisions = Collisions::default();
        let mut snapshot = ball_snapshot(Vec3::ONE);
        snapshot.velocity = Some(Velocity {
            linvel: Vec3::new(2.0, 0.0, 0.0),
            angvel: Vec3::new(0.0, 3.0, 0.0),
        });
        collisions.rebuild(&volume(), [snapshot]);
        let obstacle = &collisions.obstacles[0];
        assert!((obstacle.velocity - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-5);
        assert!((obstacle.angular_velocity - Vec3::new(0.0, 3.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn no_snapshot_is_dropped_regardless_of_count() {
        // more colliders than any plausible initial buffer capacity
        let mut collisions = Collisions::default();
        let count = 64;
        let snapshots = (0..count).map(|i| ball_snapshot(Vec3::splat(i as f32 * 0.1)));
        collisions.rebuild(&volume(), snapshots);
        assert_eq!(collisions.obstacles.len(), count);
    }

    #[test]
    fn unsupported_shapes_are_excluded() {
        let mut collisions = Collisions::default();
        let snapshot = ColliderSnapshot {
            collider: Collider::cylinder(1.0, 0.5),
            transform: GlobalTransform::IDENTITY,
            is_sensor: false,
            wind_force: None,
            velocity: None,
        };
        collisions.rebuild(&volume(), [snapshot]);
        assert!(collisions.obstacles.is_empty());
    }
}
