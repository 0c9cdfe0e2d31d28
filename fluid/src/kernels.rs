//! Kernel dispatch interface between the simulation engine and its
//! execution backends.
//!
//! The engine emits [`KernelOp`]s in program order; a backend executes
//! them so that a kernel reading a buffer observes every write from ops
//! submitted earlier in the same tick. Ordering is the only
//! synchronization: a later obstacle op overwrites an earlier force's
//! contribution inside the same region, and that is part of the contract.

use std::sync::Arc;

use bevy::prelude::*;

/// Geometry of one convex mesh obstacle.
///
/// `local_to_grid` carries mesh-local vertices directly into grid units;
/// vertex and index arrays are shared with the host mesh, unmodified.
#[derive(Clone, Debug)]
pub struct ConvexMeshData {
    pub local_to_grid: Mat4,
    pub vertices: Arc<[Vec3]>,
    pub indices: Arc<[u32]>,
}

/// One numerical kernel dispatch covering the full grid.
///
/// Parameters are final: shape geometry is in grid units, velocities are
/// already normalized per-axis by block count where the engine contract
/// says so (angular velocities are angular rates and stay unnormalized).
/// Shape membership tests happen inside the kernel; cells outside a
/// force/obstacle shape are unaffected by that op.
#[derive(Clone, Debug)]
pub enum KernelOp {
    /// Set every cell's velocity to a constant.
    Fill { value: Vec3 },
    /// Semi-Lagrangian backtrace of the velocity field over `dt`. Writes
    /// the scratch buffer; after the op the current buffer reflects the
    /// post-advection field.
    Advection { dt: f32 },
    /// Compute the initial divergence of the current velocity field and
    /// reset the pressure estimate.
    ProjectInit,
    /// One Jacobi relaxation step refining the pressure estimate.
    ProjectIteration,
    /// Subtract the pressure gradient from the velocity field.
    ProjectBake,
    SphereForce {
        center: Vec3,
        radius: f32,
        force: Vec3,
    },
    CapsuleForce {
        point1: Vec3,
        point2: Vec3,
        radius: f32,
        force: Vec3,
    },
    BoxForce {
        center: Vec3,
        half_size: Vec3,
        rotation: Mat3,
        force: Vec3,
    },
    /// Overwrite velocity inside the sphere with the rigid-body field
    /// `v + w x (p - center)` (no-slip boundary).
    SphereObstacle {
        center: Vec3,
        radius: f32,
        velocity: Vec3,
        angular_velocity: Vec3,
    },
    CapsuleObstacle {
        point1: Vec3,
        point2: Vec3,
        radius: f32,
        velocity: Vec3,
        angular_velocity: Vec3,
        /// Rotation center: the capsule's centroid in grid units.
        center: Vec3,
    },
    BoxObstacle {
        center: Vec3,
        half_size: Vec3,
        rotation: Mat3,
        velocity: Vec3,
        angular_velocity: Vec3,
    },
    ConvexMeshObstacle {
        mesh: ConvexMeshData,
        velocity: Vec3,
        angular_velocity: Vec3,
        /// Rotation center: the shape origin in grid units.
        center: Vec3,
    },
}

/// Execution environment for the numerical kernels.
///
/// Implementations: [`crate::cpu::CpuKernels`] (reference stencils, used
/// by tests and headless runs) and [`crate::gpu::GpuKernels`] (compute
/// dispatches recorded for the render graph).
pub trait FluidKernels: Send + Sync {
    fn submit(&mut self, op: KernelOp);
}
