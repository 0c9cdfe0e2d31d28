//! Air volume simulation: a GPU-driven velocity field for Bevy.
//!
//! A [`FluidVolume`] component owns a dense 3D velocity grid (blocks of
//! 16³ cells) that is updated once per physics tick:
//! - rapier colliders overlapping the volume are classified into wind
//!   sources (sensors carrying a [`WindSource`]) and obstacles (solids
//!   carrying rigid-body kinematics),
//! - the field is advected, wind forces are injected, obstacles overwrite
//!   the field with their no-slip velocity profile,
//! - a Jacobi pressure projection drives the field back toward
//!   incompressibility.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ FluidPlugin (FixedUpdate tick)                           │
//! │   overlap query → Collisions → FluidComputer (KernelOp)  │
//! └───────────────────────────┬──────────────────────────────┘
//!                             │ ordered kernel ops
//!             ┌───────────────┴───────────────┐
//!             ▼                               ▼
//!     ┌───────────────┐               ┌───────────────┐
//!     │  CpuKernels   │               │  GpuKernels   │
//!     │ (tests,       │               │ (render graph │
//!     │  headless)    │               │  + fluid.wgsl)│
//!     └───────────────┘               └───────────────┘
//! ```
//!
//! The post-projection field is exposed as a 3D texture handle for
//! volumetric consumers; consumers must never write to it.

pub mod colliders;
pub mod collision;
pub mod compute;
pub mod config;
pub mod coords;
pub mod cpu;
pub mod field;
pub mod gpu;
pub mod kernels;
pub mod plugin;
pub mod wind;

pub use colliders::ColliderShape;
pub use collision::{ColliderSnapshot, Collisions, ObstacleRecord, WindRecord};
pub use compute::FluidComputer;
pub use config::{FluidVolumeConfig, BLOCK_SIZE};
pub use coords::VolumeTransform;
pub use cpu::CpuKernels;
pub use kernels::{FluidKernels, KernelOp};
pub use plugin::{FluidPlugin, FluidVolume};
pub use wind::WindSource;
