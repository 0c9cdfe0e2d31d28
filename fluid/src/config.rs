//! Fluid volume configuration.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Cells per block along each axis. Every block is a 16 x 16 x 16
/// simulation field; this constant is fixed for the lifetime of a volume
/// and baked into the dispatch granularity of the kernels.
pub const BLOCK_SIZE: u32 = 16;

/// Default number of Jacobi iterations for the projection stage.
pub const DEFAULT_ITERATIONS: u32 = 10;

/// Bytes of video memory per grid cell: two rgba16float velocity textures
/// (ping-pong) plus two rg32float divergence/pressure textures (ping-pong).
pub const BYTES_PER_CELL: u64 = 2 * 8 + 2 * 8;

/// Configuration for one fluid volume.
///
/// Grid dimensions are `blocks * BLOCK_SIZE` per axis; block counts are
/// clamped to at least 1 at the point of edit, never at simulation time.
#[derive(Clone, Copy, Debug, Reflect, Serialize, Deserialize)]
pub struct FluidVolumeConfig {
    /// Number of 16³ blocks tiling each axis.
    pub blocks: UVec3,

    /// Constant velocity at which the flow blows from the outer walls.
    pub idle_velocity: Vec3,

    /// Number of iterations of the projection stage. Higher values trade
    /// cost for accuracy; the residual divergence decreases geometrically
    /// with the iteration count.
    pub iterations: u32,
}

impl Default for FluidVolumeConfig {
    fn default() -> Self {
        Self {
            blocks: UVec3::new(8, 8, 8),
            idle_velocity: Vec3::ZERO,
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl FluidVolumeConfig {
    /// Returns the configuration with non-positive block counts raised
    /// to 1 and a non-zero iteration count.
    pub fn clamped(self) -> Self {
        Self {
            blocks: self.blocks.max(UVec3::ONE),
            idle_velocity: self.idle_velocity,
            iterations: self.iterations.max(1),
        }
    }

    /// Grid dimensions in cells: `blocks * BLOCK_SIZE` per axis.
    pub fn grid_dims(&self) -> UVec3 {
        self.blocks * BLOCK_SIZE
    }

    /// Total number of grid cells.
    pub fn cell_count(&self) -> u64 {
        let dims = self.grid_dims();
        dims.x as u64 * dims.y as u64 * dims.z as u64
    }

    /// Estimated video memory consumption of the field textures, in bytes.
    pub fn video_memory_bytes(&self) -> u64 {
        self.cell_count() * BYTES_PER_CELL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_dims_are_blocks_times_block_size() {
        for blocks in [UVec3::ONE, UVec3::new(2, 1, 1), UVec3::new(3, 5, 7)] {
            let config = FluidVolumeConfig {
                blocks,
                ..Default::default()
            };
            assert_eq!(config.grid_dims(), blocks * BLOCK_SIZE);
        }
    }

    #[test]
    fn clamping_raises_zero_block_counts() {
        let config = FluidVolumeConfig {
            blocks: UVec3::new(0, 4, 0),
            ..Default::default()
        }
        .clamped();
        assert_eq!(config.blocks, UVec3::new(1, 4, 1));
        assert!(config.iterations >= 1);
    }

    #[test]
    fn memory_estimate_default_volume() {
        let config = FluidVolumeConfig::default();
        // 8³ blocks * 16³ cells * 32 bytes = 64 MiB
        assert_eq!(config.video_memory_bytes(), 512 * 4096 * 32);
    }
}
