//! World / local / grid coordinate conversions for a fluid volume.
//!
//! Local space spans `[0, blocks]` per axis; grid space is local space
//! scaled by [`BLOCK_SIZE`] so that one unit is one cell.

use bevy::prelude::*;

use crate::config::BLOCK_SIZE;

/// Snapshot of a volume's placement in the world, taken once per tick.
///
/// The volume is intentionally uniform-scale: `scale` is the maximum of
/// the transform's three axis scale factors, which keeps the grid cubic
/// under non-uniform host scaling.
#[derive(Clone, Copy, Debug)]
pub struct VolumeTransform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: f32,
}

impl VolumeTransform {
    pub fn from_transform(transform: &GlobalTransform) -> Self {
        let (scale, rotation, position) = transform.to_scale_rotation_translation();
        Self {
            position,
            rotation,
            scale: scale.x.max(scale.y).max(scale.z),
        }
    }

    pub fn local_to_world(&self, point: Vec3) -> Vec3 {
        self.position + self.rotation * (point * self.scale)
    }

    pub fn world_to_local_point(&self, point: Vec3) -> Vec3 {
        self.rotation.inverse() * (point - self.position) / self.scale
    }

    pub fn world_to_local_distance(&self, distance: f32) -> f32 {
        distance / self.scale
    }
}

/// Converts a local-space point to grid cells.
pub fn local_to_grid_point(point: Vec3) -> Vec3 {
    point * BLOCK_SIZE as f32
}

/// Converts a local-space distance to grid cells.
pub fn local_to_grid_distance(distance: f32) -> f32 {
    distance * BLOCK_SIZE as f32
}

/// Converts a matrix producing local-space points into one producing
/// grid-space points, by pre-multiplying a uniform [`BLOCK_SIZE`] scale.
/// Used to bring mesh vertices into grid units in one transform.
pub fn local_to_grid_matrix(matrix: Mat4) -> Mat4 {
    Mat4::from_scale(Vec3::splat(BLOCK_SIZE as f32)) * matrix
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;

    fn volume() -> VolumeTransform {
        VolumeTransform {
            position: Vec3::new(3.0, -2.0, 7.5),
            rotation: Quat::from_euler(EulerRot::XYZ, 0.4, -1.2, 2.0),
            scale: 2.5,
        }
    }

    #[test]
    fn world_local_round_trip() {
        let volume = volume();
        for point in [Vec3::ZERO, Vec3::new(1.5, 0.25, 4.0), Vec3::NEG_ONE] {
            let there = volume.local_to_world(point);
            let back = volume.world_to_local_point(there);
            assert!((back - point).length() < EPSILON, "{back} != {point}");
        }
    }

    #[test]
    fn grid_is_local_times_block_size() {
        let volume = volume();
        let world = Vec3::new(4.0, 1.0, -2.0);
        let local = volume.world_to_local_point(world);
        let grid = local_to_grid_point(local);
        assert!((grid / BLOCK_SIZE as f32 - local).length() < EPSILON);
    }

    #[test]
    fn scale_is_max_axis() {
        let transform = GlobalTransform::from(
            Transform::from_xyz(1.0, 2.0, 3.0).with_scale(Vec3::new(1.0, 3.0, 2.0)),
        );
        let volume = VolumeTransform::from_transform(&transform);
        assert!((volume.scale - 3.0).abs() < EPSILON);
    }

    #[test]
    fn grid_matrix_scales_points() {
        let matrix = local_to_grid_matrix(Mat4::from_translation(Vec3::ONE));
        let point = matrix.transform_point3(Vec3::ZERO);
        assert!((point - Vec3::splat(BLOCK_SIZE as f32)).length() < EPSILON);
    }
}
