//! Dense CPU-side storage for the velocity field.
//!
//! Mirrors the GPU layout: two vector buffers supporting ping-pong
//! updates plus a scalar divergence/pressure pair for the projection
//! stage. At any stable tick boundary exactly one vector buffer is
//! current; the other is scratch and undefined between ops.

use bevy::prelude::*;

/// CPU velocity field sized `dims` cells per axis.
pub struct VelocityField {
    dims: UVec3,
    main: Vec<Vec3>,
    temp: Vec<Vec3>,
    divergence: Vec<f32>,
    pressure: Vec<f32>,
    pressure_temp: Vec<f32>,
}

impl VelocityField {
    pub fn new(dims: UVec3) -> Self {
        let len = (dims.x * dims.y * dims.z) as usize;
        Self {
            dims,
            main: vec![Vec3::ZERO; len],
            temp: vec![Vec3::ZERO; len],
            divergence: vec![0.0; len],
            pressure: vec![0.0; len],
            pressure_temp: vec![0.0; len],
        }
    }

    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    /// Flat index of a cell, with coordinates clamped to the grid. The
    /// clamp doubles as the boundary condition of the stencil kernels.
    pub fn index(&self, x: i32, y: i32, z: i32) -> usize {
        let x = x.clamp(0, self.dims.x as i32 - 1) as u32;
        let y = y.clamp(0, self.dims.y as i32 - 1) as u32;
        let z = z.clamp(0, self.dims.z as i32 - 1) as u32;
        ((z * self.dims.y + y) * self.dims.x + x) as usize
    }

    pub fn velocity(&self, x: i32, y: i32, z: i32) -> Vec3 {
        self.main[self.index(x, y, z)]
    }

    pub fn main(&self) -> &[Vec3] {
        &self.main
    }

    pub fn main_mut(&mut self) -> &mut [Vec3] {
        &mut self.main
    }

    pub fn temp_mut(&mut self) -> &mut [Vec3] {
        &mut self.temp
    }

    /// The scratch buffer becomes current after a ping-pong pass.
    pub fn swap_velocity(&mut self) {
        std::mem::swap(&mut self.main, &mut self.temp);
    }

    pub fn divergence(&self) -> &[f32] {
        &self.divergence
    }

    pub fn divergence_mut(&mut self) -> &mut [f32] {
        &mut self.divergence
    }

    pub fn pressure(&self) -> &[f32] {
        &self.pressure
    }

    pub fn pressure_mut(&mut self) -> &mut [f32] {
        &mut self.pressure
    }

    pub fn pressure_temp_mut(&mut self) -> &mut [f32] {
        &mut self.pressure_temp
    }

    pub fn swap_pressure(&mut self) {
        std::mem::swap(&mut self.pressure, &mut self.pressure_temp);
    }

    /// Trilinear sample of the current velocity buffer at a grid-space
    /// position (cell centers sit at integer + 0.5), clamped to edges.
    pub fn sample(&self, position: Vec3) -> Vec3 {
        let p = position - 0.5;
        let base = p.floor();
        let frac = p - base;
        let (x, y, z) = (base.x as i32, base.y as i32, base.z as i32);

        let mut result = Vec3::ZERO;
        for (dz, wz) in [(0, 1.0 - frac.z), (1, frac.z)] {
            for (dy, wy) in [(0, 1.0 - frac.y), (1, frac.y)] {
                for (dx, wx) in [(0, 1.0 - frac.x), (1, frac.x)] {
                    let weight = wx * wy * wz;
                    if weight > 0.0 {
                        result += self.main[self.index(x + dx, y + dy, z + dz)] * weight;
                    }
                }
            }
        }
        result
    }
}
