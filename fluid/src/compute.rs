//! Simulation engine: parameter binding and ordered kernel dispatch.
//!
//! [`FluidComputer`] converts local-space shapes to grid units, applies
//! the block-count normalization that keeps "one unit across the whole
//! volume" independent of block count, and submits [`KernelOp`]s to its
//! backend in program order.

use bevy::log::debug;
use bevy::prelude::*;

use crate::colliders::ColliderShape;
use crate::config::BLOCK_SIZE;
use crate::coords::{local_to_grid_distance, local_to_grid_matrix, local_to_grid_point};
use crate::kernels::{ConvexMeshData, FluidKernels, KernelOp};

/// Issues the ordered sequence of numerical passes for one volume.
///
/// Owns its kernel backend; the backend's buffers never outlive the
/// computer and are released when it is dropped.
pub struct FluidComputer<K> {
    blocks: UVec3,
    kernels: K,
}

impl<K: FluidKernels> FluidComputer<K> {
    pub fn new(blocks: UVec3, kernels: K) -> Self {
        Self { blocks, kernels }
    }

    pub fn blocks(&self) -> UVec3 {
        self.blocks
    }

    pub fn grid_dims(&self) -> UVec3 {
        self.blocks * BLOCK_SIZE
    }

    pub fn kernels(&self) -> &K {
        &self.kernels
    }

    pub fn kernels_mut(&mut self) -> &mut K {
        &mut self.kernels
    }

    /// Per-axis block-count normalization: a unit velocity spans the
    /// whole volume regardless of how many blocks tile it.
    fn normalize(&self, velocity: Vec3) -> Vec3 {
        velocity / self.blocks.as_vec3()
    }

    /// Sets every cell's velocity to a constant.
    pub fn fill(&mut self, value: Vec3) {
        let value = self.normalize(value);
        self.kernels.submit(KernelOp::Fill { value });
    }

    /// Semi-Lagrangian advection over one time step.
    pub fn advection(&mut self, dt: f32) {
        self.kernels.submit(KernelOp::Advection { dt });
    }

    /// Three-phase pressure projection: one init pass, `iterations`
    /// Jacobi passes, one bake pass. All three phases are mandatory;
    /// skipping init or bake leaves the field inconsistent.
    pub fn projection(&mut self, iterations: u32) {
        self.kernels.submit(KernelOp::ProjectInit);
        for _ in 0..iterations {
            self.kernels.submit(KernelOp::ProjectIteration);
        }
        self.kernels.submit(KernelOp::ProjectBake);
    }

    pub fn sphere_force(&mut self, center: Vec3, radius: f32, force: Vec3) {
        let force = self.normalize(force);
        self.kernels.submit(KernelOp::SphereForce {
            center: local_to_grid_point(center),
            radius: local_to_grid_distance(radius),
            force,
        });
    }

    pub fn capsule_force(&mut self, point1: Vec3, point2: Vec3, radius: f32, force: Vec3) {
        let force = self.normalize(force);
        self.kernels.submit(KernelOp::CapsuleForce {
            point1: local_to_grid_point(point1),
            point2: local_to_grid_point(point2),
            radius: local_to_grid_distance(radius),
            force,
        });
    }

    pub fn box_force(&mut self, center: Vec3, half_size: Vec3, rotation: Mat3, force: Vec3) {
        let force = self.normalize(force);
        self.kernels.submit(KernelOp::BoxForce {
            center: local_to_grid_point(center),
            half_size: local_to_grid_point(half_size),
            rotation,
            force,
        });
    }

    pub fn sphere_obstacle(
        &mut self,
        center: Vec3,
        radius: f32,
        velocity: Vec3,
        angular_velocity: Vec3,
    ) {
        let velocity = self.normalize(velocity);
        self.kernels.submit(KernelOp::SphereObstacle {
            center: local_to_grid_point(center),
            radius: local_to_grid_distance(radius),
            velocity,
            angular_velocity,
        });
    }

    pub fn capsule_obstacle(
        &mut self,
        point1: Vec3,
        point2: Vec3,
        radius: f32,
        velocity: Vec3,
        angular_velocity: Vec3,
    ) {
        let velocity = self.normalize(velocity);
        let point1 = local_to_grid_point(point1);
        let point2 = local_to_grid_point(point2);
        self.kernels.submit(KernelOp::CapsuleObstacle {
            point1,
            point2,
            radius: local_to_grid_distance(radius),
            velocity,
            angular_velocity,
            center: (point1 + point2) / 2.0,
        });
    }

    pub fn box_obstacle(
        &mut self,
        center: Vec3,
        half_size: Vec3,
        rotation: Mat3,
        velocity: Vec3,
        angular_velocity: Vec3,
    ) {
        let velocity = self.normalize(velocity);
        self.kernels.submit(KernelOp::BoxObstacle {
            center: local_to_grid_point(center),
            half_size: local_to_grid_point(half_size),
            rotation,
            velocity,
            angular_velocity,
        });
    }

    pub fn convex_mesh_obstacle(
        &mut self,
        mesh: ConvexMeshData,
        center: Vec3,
        velocity: Vec3,
        angular_velocity: Vec3,
    ) {
        let velocity = self.normalize(velocity);
        self.kernels.submit(KernelOp::ConvexMeshObstacle {
            mesh,
            velocity,
            angular_velocity,
            center: local_to_grid_point(center),
        });
    }

    /// Dispatches a wind force to the kernel matching the shape.
    pub fn apply_force(&mut self, shape: &ColliderShape, force: Vec3) {
        match shape {
            ColliderShape::Sphere { center, radius } => {
                self.sphere_force(*center, *radius, force);
            }
            ColliderShape::Capsule {
                point1,
                point2,
                radius,
            } => self.capsule_force(*point1, *point2, *radius, force),
            ColliderShape::Box {
                center,
                half_size,
                rotation,
            } => self.box_force(*center, *half_size, *rotation, force),
            // wind through a mesh is not meaningful; meshes only block
            ColliderShape::ConvexMesh { .. } => {
                debug!("mesh wind sources are not supported, skipping");
            }
            ColliderShape::Unsupported { .. } => {}
        }
    }

    /// Dispatches an obstacle to the kernel matching the shape.
    pub fn apply_obstacle(
        &mut self,
        shape: &ColliderShape,
        velocity: Vec3,
        angular_velocity: Vec3,
    ) {
        match shape {
            ColliderShape::Sphere { center, radius } => {
                self.sphere_obstacle(*center, *radius, velocity, angular_velocity);
            }
            ColliderShape::Capsule {
                point1,
                point2,
                radius,
            } => self.capsule_obstacle(*point1, *point2, *radius, velocity, angular_velocity),
            ColliderShape::Box {
                center,
                half_size,
                rotation,
            } => self.box_obstacle(*center, *half_size, *rotation, velocity, angular_velocity),
            ColliderShape::ConvexMesh {
                matrix,
                vertices,
                indices,
                center,
            } => {
                let mesh = ConvexMeshData {
                    local_to_grid: local_to_grid_matrix(*matrix),
                    vertices: vertices.clone(),
                    indices: indices.clone(),
                };
                self.convex_mesh_obstacle(mesh, *center, velocity, angular_velocity);
            }
            ColliderShape::Unsupported { .. } => {}
        }
    }
}
