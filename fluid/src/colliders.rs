//! Collider adapters: host collider shapes to local-space descriptors.
//!
//! Each adapter takes a rapier collider plus the owning volume's transform
//! snapshot and produces a [`ColliderShape`] in the volume's local space,
//! ready for the simulation engine to convert to grid units.
//!
//! Raw shapes arrive world-scaled: the physics sync bakes the entity's
//! scale into the parry shape (non-uniformly scaled balls and capsules
//! arrive as convex approximations). Adapters therefore only rotate,
//! translate and divide by the volume scale; re-applying the transform
//! scale here would apply it twice.

use std::sync::Arc;

use bevy::log::warn;
use bevy::prelude::*;
use bevy_rapier3d::prelude::Collider;
use bevy_rapier3d::rapier::parry::shape::{Capsule, ConvexPolyhedron, TypedShape};

use crate::coords::VolumeTransform;

/// A collider shape expressed in the fluid volume's local space.
///
/// Immutable once constructed from a host collider snapshot. Unsupported
/// host shapes become [`ColliderShape::Unsupported`] rather than a runtime
/// failure; they are reported once and skipped for the tick.
#[derive(Clone, Debug)]
pub enum ColliderShape {
    Sphere {
        center: Vec3,
        radius: f32,
    },
    Capsule {
        point1: Vec3,
        point2: Vec3,
        radius: f32,
    },
    Box {
        center: Vec3,
        half_size: Vec3,
        /// Maps volume-local directions into the box's local frame.
        rotation: Mat3,
    },
    ConvexMesh {
        /// Maps mesh-local vertices into the volume's local space.
        matrix: Mat4,
        vertices: Arc<[Vec3]>,
        indices: Arc<[u32]>,
        /// Shape origin in volume-local space, used as rotation center.
        center: Vec3,
    },
    Unsupported {
        kind: &'static str,
    },
}

impl ColliderShape {
    /// Normalizes an overlapping host collider into the volume's local
    /// space, dispatching on the collider's shape kind.
    pub fn from_collider(
        collider: &Collider,
        transform: &GlobalTransform,
        volume: &VolumeTransform,
    ) -> Self {
        match collider.raw.as_typed_shape() {
            TypedShape::Ball(ball) => Self::sphere(ball.radius, transform, volume),
            TypedShape::Capsule(capsule) => Self::capsule(capsule, transform, volume),
            TypedShape::Cuboid(cuboid) => {
                let half = Vec3::new(
                    cuboid.half_extents.x,
                    cuboid.half_extents.y,
                    cuboid.half_extents.z,
                );
                Self::cuboid(half, transform, volume)
            }
            TypedShape::ConvexPolyhedron(polyhedron) => {
                Self::convex_mesh(polyhedron, transform, volume)
            }
            TypedShape::TriMesh(_) => {
                warn!("non-convex mesh colliders are not supported, skipping");
                Self::Unsupported { kind: "trimesh" }
            }
            TypedShape::HeightField(_) => {
                warn!("heightfield colliders are not supported, skipping");
                Self::Unsupported {
                    kind: "heightfield",
                }
            }
            _ => {
                warn!(
                    "unsupported collider shape {:?}, skipping",
                    collider.raw.shape_type()
                );
                Self::Unsupported { kind: "other" }
            }
        }
    }

    /// Sphere: the raw radius already carries the entity's scale.
    fn sphere(radius: f32, transform: &GlobalTransform, volume: &VolumeTransform) -> Self {
        Self::Sphere {
            center: volume.world_to_local_point(transform.translation()),
            radius: volume.world_to_local_distance(radius),
        }
    }

    /// Capsule: segment endpoints and radius are taken as-is from the
    /// synced shape. A capsule whose height collapsed under scaling
    /// arrives with coincident endpoints and degenerates to a sphere in
    /// place, never a negative height.
    fn capsule(capsule: &Capsule, transform: &GlobalTransform, volume: &VolumeTransform) -> Self {
        let (_, rotation, translation) = transform.to_scale_rotation_translation();
        let a = Vec3::new(capsule.segment.a.x, capsule.segment.a.y, capsule.segment.a.z);
        let b = Vec3::new(capsule.segment.b.x, capsule.segment.b.y, capsule.segment.b.z);
        Self::Capsule {
            point1: volume.world_to_local_point(rotation * a + translation),
            point2: volume.world_to_local_point(rotation * b + translation),
            radius: volume.world_to_local_distance(capsule.radius),
        }
    }

    /// Box: half extents come pre-scaled per axis; the stored rotation
    /// maps volume-local directions into the box frame.
    fn cuboid(half_extents: Vec3, transform: &GlobalTransform, volume: &VolumeTransform) -> Self {
        let (_, rotation, translation) = transform.to_scale_rotation_translation();
        Self::Box {
            center: volume.world_to_local_point(translation),
            half_size: half_extents / volume.scale,
            rotation: Mat3::from_quat(rotation.inverse() * volume.rotation),
        }
    }

    /// Convex mesh: one combined matrix carries mesh-local vertices
    /// straight into the volume's local space. Only the rotation and
    /// translation of the entity transform participate; the scale is
    /// already baked into the vertices.
    fn convex_mesh(
        polyhedron: &ConvexPolyhedron,
        transform: &GlobalTransform,
        volume: &VolumeTransform,
    ) -> Self {
        let (_, rotation, translation) = transform.to_scale_rotation_translation();
        let matrix = Mat4::from_quat(volume.rotation.inverse())
            * Mat4::from_scale(Vec3::splat(1.0 / volume.scale))
            * Mat4::from_translation(-volume.position)
            * Mat4::from_rotation_translation(rotation, translation);

        let (points, triangles) = polyhedron.to_trimesh();
        let vertices: Arc<[Vec3]> = points
            .iter()
            .map(|p| Vec3::new(p.x, p.y, p.z))
            .collect::<Vec<_>>()
            .into();
        let indices: Arc<[u32]> = triangles
            .iter()
            .flat_map(|t| t.iter().copied())
            .collect::<Vec<_>>()
            .into();

        Self::ConvexMesh {
            matrix,
            vertices,
            indices,
            center: volume.world_to_local_point(transform.translation()),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;

    fn volume() -> VolumeTransform {
        VolumeTransform {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: 2.0,
        }
    }

    /// Mimics the physics sync: the entity scale is baked into the raw
    /// shape before the adapter ever sees it.
    fn synced(mut collider: Collider, scale: Vec3) -> Collider {
        collider.set_scale(scale, 8);
        collider
    }

    #[test]
    fn sphere_radius_is_not_scaled_twice() {
        // entity scale 2 is already baked into the synced shape; the
        // adapter must not multiply by the transform scale again
        let collider = synced(Collider::ball(0.5), Vec3::splat(2.0));
        let transform = GlobalTransform::from(
            Transform::from_xyz(4.0, 0.0, 0.0).with_scale(Vec3::splat(2.0)),
        );
        let shape = ColliderShape::from_collider(&collider, &transform, &volume());
        let ColliderShape::Sphere { center, radius } = shape else {
            panic!("expected sphere, got {shape:?}");
        };
        // world radius 1.0, divided by volume scale 2
        assert!((radius - 0.5).abs() < EPSILON);
        assert!((center - Vec3::new(2.0, 0.0, 0.0)).length() < EPSILON);
    }

    #[test]
    fn box_half_size_follows_synced_extents() {
        let collider = synced(Collider::cuboid(0.5, 1.0, 1.5), Vec3::new(2.0, 1.0, 4.0));
        let transform =
            GlobalTransform::from(Transform::IDENTITY.with_scale(Vec3::new(2.0, 1.0, 4.0)));
        let shape = ColliderShape::from_collider(&collider, &transform, &volume());
        let ColliderShape::Box { half_size, .. } = shape else {
            panic!("expected box, got {shape:?}");
        };
        // synced half extents (1, 1, 6), divided by volume scale 2
        assert!((half_size - Vec3::new(0.5, 0.5, 3.0)).length() < EPSILON);
    }

    #[test]
    fn degenerate_capsule_has_coincident_endpoints() {
        let collider = Collider::capsule_y(0.0, 0.5);
        let shape =
            ColliderShape::from_collider(&collider, &GlobalTransform::IDENTITY, &volume());
        let ColliderShape::Capsule { point1, point2, radius } = shape else {
            panic!("expected capsule, got {shape:?}");
        };
        assert!((point1 - point2).length() < EPSILON);
        assert!((radius - 0.25).abs() < EPSILON);
    }

    #[test]
    fn capsule_keeps_synced_segment_and_radius() {
        let collider = synced(Collider::capsule_y(1.0, 0.25), Vec3::splat(2.0));
        let transform =
            GlobalTransform::from(Transform::IDENTITY.with_scale(Vec3::splat(2.0)));
        let shape = ColliderShape::from_collider(&collider, &transform, &volume());
        let ColliderShape::Capsule { point1, point2, radius } = shape else {
            panic!("expected capsule, got {shape:?}");
        };
        // synced segment spans 4 world units, divided by volume scale 2
        assert!(((point2 - point1).length() - 2.0).abs() < EPSILON);
        assert!((radius - 0.25).abs() < EPSILON);
    }

    #[test]
    fn convex_hull_becomes_convex_mesh() {
        let points = [
            Vec3::ZERO,
            Vec3::X,
            Vec3::Y,
            Vec3::Z,
            Vec3::ONE,
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(0.0, 1.0, 1.0),
        ];
        let collider = Collider::convex_hull(&points).expect("hull");
        let shape =
            ColliderShape::from_collider(&collider, &GlobalTransform::IDENTITY, &volume());
        let ColliderShape::ConvexMesh { vertices, indices, .. } = shape else {
            panic!("expected convex mesh, got {shape:?}");
        };
        assert!(!vertices.is_empty());
        assert_eq!(indices.len() % 3, 0);
    }

    #[test]
    fn cylinder_is_reported_unsupported() {
        let collider = Collider::cylinder(1.0, 0.5);
        let shape =
            ColliderShape::from_collider(&collider, &GlobalTransform::IDENTITY, &volume());
        assert!(shape.is_unsupported());
    }
}
