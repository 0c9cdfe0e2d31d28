//! CPU reference backend for the numerical kernels.
//!
//! Executes the same stencils as `shaders/fluid.wgsl` on dense CPU
//! buffers. This backend drives the unit tests and headless runs; the
//! GPU backend is the runtime path.

use bevy::prelude::*;

use crate::config::BLOCK_SIZE;
use crate::field::VelocityField;
use crate::kernels::{ConvexMeshData, FluidKernels, KernelOp};

/// Reference kernel executor over a CPU [`VelocityField`].
pub struct CpuKernels {
    field: VelocityField,
    blocks: UVec3,
}

impl CpuKernels {
    pub fn new(blocks: UVec3) -> Self {
        Self {
            field: VelocityField::new(blocks * BLOCK_SIZE),
            blocks,
        }
    }

    pub fn field(&self) -> &VelocityField {
        &self.field
    }

    /// Total absolute divergence of the current velocity field, measured
    /// with the same central-difference stencil the projection uses.
    pub fn total_divergence(&self) -> f32 {
        let dims = self.field.dims();
        let mut total = 0.0;
        for z in 0..dims.z as i32 {
            for y in 0..dims.y as i32 {
                for x in 0..dims.x as i32 {
                    total += self.cell_divergence(x, y, z).abs();
                }
            }
        }
        total
    }

    fn cell_divergence(&self, x: i32, y: i32, z: i32) -> f32 {
        let f = &self.field;
        0.5 * ((f.velocity(x + 1, y, z).x - f.velocity(x - 1, y, z).x)
            + (f.velocity(x, y + 1, z).y - f.velocity(x, y - 1, z).y)
            + (f.velocity(x, y, z + 1).z - f.velocity(x, y, z - 1).z))
    }

    fn pressure_at(&self, x: i32, y: i32, z: i32) -> f32 {
        self.field.pressure()[self.field.index(x, y, z)]
    }

    fn fill(&mut self, value: Vec3) {
        self.field.main_mut().fill(value);
    }

    fn advection(&mut self, dt: f32) {
        let dims = self.field.dims();
        let dims_f = dims.as_vec3();
        for z in 0..dims.z as i32 {
            for y in 0..dims.y as i32 {
                for x in 0..dims.x as i32 {
                    let i = self.field.index(x, y, z);
                    let center = Vec3::new(x as f32 + 0.5, y as f32 + 0.5, z as f32 + 0.5);
                    // stored velocities are volume fractions per second;
                    // dims converts them to cells per second
                    let source = center - self.field.main()[i] * dims_f * dt;
                    let sampled = self.field.sample(source);
                    self.field.temp_mut()[i] = sampled;
                }
            }
        }
        self.field.swap_velocity();
    }

    fn project_init(&mut self) {
        let dims = self.field.dims();
        for z in 0..dims.z as i32 {
            for y in 0..dims.y as i32 {
                for x in 0..dims.x as i32 {
                    let div = self.cell_divergence(x, y, z);
                    let i = self.field.index(x, y, z);
                    self.field.divergence_mut()[i] = div;
                    self.field.pressure_mut()[i] = 0.0;
                }
            }
        }
    }

    fn project_iteration(&mut self) {
        let dims = self.field.dims();
        for z in 0..dims.z as i32 {
            for y in 0..dims.y as i32 {
                for x in 0..dims.x as i32 {
                    let neighbors = self.pressure_at(x - 1, y, z)
                        + self.pressure_at(x + 1, y, z)
                        + self.pressure_at(x, y - 1, z)
                        + self.pressure_at(x, y + 1, z)
                        + self.pressure_at(x, y, z - 1)
                        + self.pressure_at(x, y, z + 1);
                    let i = self.field.index(x, y, z);
                    let refined = (neighbors - self.field.divergence()[i]) / 6.0;
                    self.field.pressure_temp_mut()[i] = refined;
                }
            }
        }
        self.field.swap_pressure();
    }

    fn project_bake(&mut self) {
        let dims = self.field.dims();
        for z in 0..dims.z as i32 {
            for y in 0..dims.y as i32 {
                for x in 0..dims.x as i32 {
                    let gradient = Vec3::new(
                        self.pressure_at(x + 1, y, z) - self.pressure_at(x - 1, y, z),
                        self.pressure_at(x, y + 1, z) - self.pressure_at(x, y - 1, z),
                        self.pressure_at(x, y, z + 1) - self.pressure_at(x, y, z - 1),
                    );
                    let i = self.field.index(x, y, z);
                    self.field.main_mut()[i] -= 0.5 * gradient;
                }
            }
        }
    }

    /// Applies `apply` to every cell whose center passes `inside`.
    fn for_cells_inside(
        &mut self,
        inside: impl Fn(Vec3) -> bool,
        apply: impl Fn(Vec3, Vec3) -> Vec3,
    ) {
        let dims = self.field.dims();
        for z in 0..dims.z as i32 {
            for y in 0..dims.y as i32 {
                for x in 0..dims.x as i32 {
                    let center = Vec3::new(x as f32 + 0.5, y as f32 + 0.5, z as f32 + 0.5);
                    if inside(center) {
                        let i = self.field.index(x, y, z);
                        let old = self.field.main()[i];
                        self.field.main_mut()[i] = apply(center, old);
                    }
                }
            }
        }
    }

    /// Rigid-body velocity field at a grid position, in stored units.
    fn obstacle_velocity(
        blocks: UVec3,
        velocity: Vec3,
        angular_velocity: Vec3,
        position: Vec3,
        center: Vec3,
    ) -> Vec3 {
        // angular rate is in rad/s over local-space lever arms; the
        // result is normalized per axis by block count like any velocity
        let lever = (position - center) / BLOCK_SIZE as f32;
        velocity + angular_velocity.cross(lever) / blocks.as_vec3()
    }
}

impl FluidKernels for CpuKernels {
    fn submit(&mut self, op: KernelOp) {
        let blocks = self.blocks;
        match op {
            KernelOp::Fill { value } => self.fill(value),
            KernelOp::Advection { dt } => self.advection(dt),
            KernelOp::ProjectInit => self.project_init(),
            KernelOp::ProjectIteration => self.project_iteration(),
            KernelOp::ProjectBake => self.project_bake(),
            KernelOp::SphereForce {
                center,
                radius,
                force,
            } => self.for_cells_inside(
                |p| (p - center).length() <= radius,
                |_, v| v + force,
            ),
            KernelOp::CapsuleForce {
                point1,
                point2,
                radius,
                force,
            } => self.for_cells_inside(
                |p| segment_distance(p, point1, point2) <= radius,
                |_, v| v + force,
            ),
            KernelOp::BoxForce {
                center,
                half_size,
                rotation,
                force,
            } => self.for_cells_inside(
                |p| inside_box(p, center, half_size, &rotation),
                |_, v| v + force,
            ),
            KernelOp::SphereObstacle {
                center,
                radius,
                velocity,
                angular_velocity,
            } => self.for_cells_inside(
                |p| (p - center).length() <= radius,
                |p, _| Self::obstacle_velocity(blocks, velocity, angular_velocity, p, center),
            ),
            KernelOp::CapsuleObstacle {
                point1,
                point2,
                radius,
                velocity,
                angular_velocity,
                center,
            } => self.for_cells_inside(
                |p| segment_distance(p, point1, point2) <= radius,
                |p, _| Self::obstacle_velocity(blocks, velocity, angular_velocity, p, center),
            ),
            KernelOp::BoxObstacle {
                center,
                half_size,
                rotation,
                velocity,
                angular_velocity,
            } => self.for_cells_inside(
                |p| inside_box(p, center, half_size, &rotation),
                |p, _| Self::obstacle_velocity(blocks, velocity, angular_velocity, p, center),
            ),
            KernelOp::ConvexMeshObstacle {
                mesh,
                velocity,
                angular_velocity,
                center,
            } => {
                let hull = GridHull::new(&mesh);
                self.for_cells_inside(
                    |p| hull.contains(p),
                    |p, _| Self::obstacle_velocity(blocks, velocity, angular_velocity, p, center),
                );
            }
        }
    }
}

fn segment_distance(point: Vec3, a: Vec3, b: Vec3) -> f32 {
    let ab = b - a;
    let length_squared = ab.length_squared();
    let t = if length_squared > 0.0 {
        ((point - a).dot(ab) / length_squared).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (point - (a + ab * t)).length()
}

fn inside_box(point: Vec3, center: Vec3, half_size: Vec3, rotation: &Mat3) -> bool {
    let local = (*rotation * (point - center)).abs();
    local.x <= half_size.x && local.y <= half_size.y && local.z <= half_size.z
}

/// A convex mesh with vertices pre-transformed into grid units.
struct GridHull {
    vertices: Vec<Vec3>,
    indices: Vec<u32>,
    centroid: Vec3,
}

impl GridHull {
    fn new(mesh: &ConvexMeshData) -> Self {
        let vertices: Vec<Vec3> = mesh
            .vertices
            .iter()
            .map(|v| mesh.local_to_grid.transform_point3(*v))
            .collect();
        let centroid = vertices.iter().copied().sum::<Vec3>() / vertices.len().max(1) as f32;
        Self {
            vertices,
            indices: mesh.indices.to_vec(),
            centroid,
        }
    }

    /// Half-space test against every face plane, each oriented away from
    /// the centroid so the winding of the source mesh does not matter.
    fn contains(&self, point: Vec3) -> bool {
        for tri in self.indices.chunks_exact(3) {
            let a = self.vertices[tri[0] as usize];
            let b = self.vertices[tri[1] as usize];
            let c = self.vertices[tri[2] as usize];
            let mut normal = (b - a).cross(c - a);
            if normal.length_squared() < 1e-12 {
                continue;
            }
            if normal.dot(self.centroid - a) > 0.0 {
                normal = -normal;
            }
            if normal.dot(point - a) > 0.0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advection_preserves_uniform_field() {
        let mut kernels = CpuKernels::new(UVec3::ONE);
        kernels.submit(KernelOp::Fill {
            value: Vec3::new(0.25, 0.0, 0.0),
        });
        kernels.submit(KernelOp::Advection { dt: 0.02 });
        for v in kernels.field().main() {
            assert!((*v - Vec3::new(0.25, 0.0, 0.0)).length() < 1e-5);
        }
    }

    #[test]
    fn sphere_force_is_additive_and_local() {
        let mut kernels = CpuKernels::new(UVec3::ONE);
        let center = Vec3::splat(8.0);
        kernels.submit(KernelOp::SphereForce {
            center,
            radius: 3.0,
            force: Vec3::Y,
        });
        kernels.submit(KernelOp::SphereForce {
            center,
            radius: 3.0,
            force: Vec3::Y,
        });
        let field = kernels.field();
        let dims = field.dims();
        for z in 0..dims.z as i32 {
            for y in 0..dims.y as i32 {
                for x in 0..dims.x as i32 {
                    let p = Vec3::new(x as f32 + 0.5, y as f32 + 0.5, z as f32 + 0.5);
                    let v = field.velocity(x, y, z);
                    if (p - center).length() <= 3.0 {
                        assert!((v.y - 2.0).abs() < 1e-5);
                    } else {
                        assert_eq!(v, Vec3::ZERO);
                    }
                }
            }
        }
    }

    #[test]
    fn rotating_obstacle_matches_rigid_body_field() {
        let mut kernels = CpuKernels::new(UVec3::ONE);
        let center = Vec3::splat(8.0);
        kernels.submit(KernelOp::SphereObstacle {
            center,
            radius: 4.0,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::new(0.0, 2.0, 0.0),
        });
        let field = kernels.field();
        // a cell offset along +x from the center moves toward -z
        let v = field.velocity(11, 8, 8);
        assert!(v.z < 0.0, "expected -z swirl, got {v}");
        assert!(v.y.abs() < 1e-5);
    }

    #[test]
    fn convex_hull_contains_interior_points() {
        let mesh = ConvexMeshData {
            local_to_grid: Mat4::from_scale(Vec3::splat(4.0)),
            vertices: vec![
                Vec3::ZERO,
                Vec3::new(2.0, 0.0, 0.0),
                Vec3::new(0.0, 2.0, 0.0),
                Vec3::new(0.0, 0.0, 2.0),
            ]
            .into(),
            indices: vec![0, 1, 2, 0, 1, 3, 0, 2, 3, 1, 2, 3].into(),
        };
        let hull = GridHull::new(&mesh);
        assert!(hull.contains(Vec3::splat(1.0)));
        assert!(!hull.contains(Vec3::splat(8.0)));
    }
}
