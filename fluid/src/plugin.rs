//! Volume component and frame orchestration.
//!
//! Each [`FluidVolume`] runs one simulation tick per `FixedUpdate`:
//! overlap query against the physics world, collision classification,
//! then the kernel sequence advection, wind forces, obstacles,
//! projection. The recorded ops are consumed by the GPU backend at
//! render time.

use bevy::prelude::*;
use bevy_rapier3d::prelude::{
    Collider, CollisionGroups, QueryFilter, RapierContextColliders, RapierQueryPipeline,
    RapierRigidBodySet, Sensor, Velocity,
};

use crate::collision::{ColliderSnapshot, Collisions};
use crate::compute::FluidComputer;
use crate::config::FluidVolumeConfig;
use crate::coords::VolumeTransform;
use crate::gpu::{create_field_textures, FluidGpuPlugin, FluidTextures, GpuKernels};
use crate::wind::WindSource;

/// One simulated air volume.
///
/// The volume's transform places its grid in the world: the entity's
/// translation is the grid's corner, the grid extends `blocks` units
/// along the local positive axes, scaled uniformly by the largest axis
/// scale factor.
#[derive(Component)]
#[require(Transform)]
pub struct FluidVolume {
    config: FluidVolumeConfig,
    computer: FluidComputer<GpuKernels>,
    collisions: Collisions,
    textures: FluidTextures,
    /// Restricts the overlap query to matching collision groups.
    pub filter_groups: Option<CollisionGroups>,
    /// Overlap hit buffer, reused across ticks (grown, never shrunk).
    hits: Vec<Entity>,
    primed: bool,
}

impl FluidVolume {
    /// Creates a volume and allocates its field textures. The
    /// configuration is clamped once here and immutable afterwards.
    pub fn new(config: FluidVolumeConfig, images: &mut Assets<Image>) -> Self {
        let config = config.clamped();
        Self {
            computer: FluidComputer::new(config.blocks, GpuKernels::default()),
            collisions: Collisions::default(),
            textures: create_field_textures(config.grid_dims(), images),
            filter_groups: None,
            hits: Vec::new(),
            primed: false,
            config,
        }
    }

    pub fn config(&self) -> &FluidVolumeConfig {
        &self.config
    }

    /// The volumetric velocity texture, updated every tick. Read-only
    /// for consumers; sampled values are volume fractions per second.
    pub fn field_texture(&self) -> &Handle<Image> {
        &self.textures.velocity
    }

    /// This tick's classified overlaps, for debug drawing.
    pub fn collisions(&self) -> &Collisions {
        &self.collisions
    }

    pub(crate) fn blocks(&self) -> UVec3 {
        self.computer.blocks()
    }

    pub(crate) fn textures(&self) -> &FluidTextures {
        &self.textures
    }

    pub(crate) fn take_ops(&mut self) -> Vec<crate::kernels::KernelOp> {
        self.computer.kernels_mut().take_ops()
    }

    /// Runs one simulation tick from the gathered snapshots.
    fn step(
        &mut self,
        volume_transform: &VolumeTransform,
        snapshots: Vec<ColliderSnapshot>,
        dt: f32,
    ) {
        self.collisions.rebuild(volume_transform, snapshots);

        if !self.primed {
            // the idle flow is a world-space speed; local cells are
            // larger by the volume scale
            self.computer
                .fill(self.config.idle_velocity / volume_transform.scale);
            self.primed = true;
        }

        self.computer.advection(dt);
        for wind in &self.collisions.winds {
            self.computer.apply_force(&wind.shape, wind.force * dt);
        }
        for obstacle in &self.collisions.obstacles {
            self.computer
                .apply_obstacle(&obstacle.shape, obstacle.velocity, obstacle.angular_velocity);
        }
        self.computer.projection(self.config.iterations);
    }
}

/// Walks up the hierarchy to the first ancestor carrying a rigid-body
/// velocity. Colliders are often children of the body entity.
fn inherited_velocity(
    entity: Entity,
    parents: &Query<&ChildOf>,
    velocities: &Query<&Velocity>,
) -> Option<Velocity> {
    let mut current = entity;
    while let Ok(child_of) = parents.get(current) {
        current = child_of.parent();
        if let Ok(velocity) = velocities.get(current) {
            return Some(*velocity);
        }
    }
    None
}

/// Advances every volume by one fixed time step.
fn step_fluid_volumes(
    time: Res<Time<Fixed>>,
    mut volumes: Query<(&GlobalTransform, &mut FluidVolume)>,
    rapier_context: Query<(
        &RapierContextColliders,
        &RapierRigidBodySet,
        &RapierQueryPipeline,
    )>,
    colliders: Query<(
        &Collider,
        &GlobalTransform,
        Has<Sensor>,
        Option<&WindSource>,
        Option<&Velocity>,
    )>,
    parents: Query<&ChildOf>,
    velocities: Query<&Velocity>,
) {
    let dt = time.delta_secs();
    if dt <= 0.0 {
        return;
    }
    let Ok((context_colliders, rigidbody_set, query_pipeline)) = rapier_context.single() else {
        return;
    };

    for (transform, mut volume) in volumes.iter_mut() {
        let volume_transform = VolumeTransform::from_transform(transform);
        let half_extent =
            volume.config().blocks.as_vec3() * volume_transform.scale / 2.0;

        let mut hits = std::mem::take(&mut volume.hits);
        hits.clear();
        query_pipeline.intersections_with_shape(
            context_colliders,
            rigidbody_set,
            volume_transform.position + volume_transform.rotation * half_extent,
            volume_transform.rotation,
            &Collider::cuboid(half_extent.x, half_extent.y, half_extent.z),
            volume
                .filter_groups
                .map_or_else(QueryFilter::default, |groups| {
                    QueryFilter::default().groups(groups)
                }),
            |entity| {
                hits.push(entity);
                true
            },
        );

        let mut snapshots = Vec::with_capacity(hits.len());
        for &entity in &hits {
            let Ok((collider, collider_transform, is_sensor, wind, velocity)) =
                colliders.get(entity)
            else {
                continue;
            };
            snapshots.push(ColliderSnapshot {
                collider: collider.clone(),
                transform: *collider_transform,
                is_sensor,
                wind_force: wind.map(|w| w.world_force(collider_transform)),
                velocity: velocity
                    .copied()
                    .or_else(|| inherited_velocity(entity, &parents, &velocities)),
            });
        }

        volume.hits = hits;
        volume.step(&volume_transform, snapshots, dt);
    }
}

/// Logs the video memory footprint of newly added volumes.
fn report_volume_memory(volumes: Query<&FluidVolume, Added<FluidVolume>>) {
    for volume in &volumes {
        let bytes = volume.config().video_memory_bytes();
        let mib = bytes as f64 / (1024.0 * 1024.0);
        if bytes >= 1 << 30 {
            warn!(
                "fluid volume with {} blocks allocates {mib:.0} MiB of video memory",
                volume.config().blocks
            );
        } else {
            info!(
                "fluid volume with {} blocks allocates {mib:.0} MiB of video memory",
                volume.config().blocks
            );
        }
    }
}

/// Simulation plugin: add alongside the rapier physics plugin, then
/// spawn entities with a [`FluidVolume`] component.
pub struct FluidPlugin;

impl Plugin for FluidPlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<FluidVolumeConfig>()
            .register_type::<WindSource>()
            .add_plugins(FluidGpuPlugin)
            .add_systems(FixedUpdate, step_fluid_volumes)
            .add_systems(Update, report_volume_memory);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bevy::time::TimeUpdateStrategy;
    use bevy_rapier3d::prelude::{NoUserData, RapierPhysicsPlugin, RigidBody};

    use super::*;
    use crate::colliders::ColliderShape;
    use crate::kernels::KernelOp;

    fn test_volume(iterations: u32) -> FluidVolume {
        let mut images = Assets::<Image>::default();
        FluidVolume::new(
            FluidVolumeConfig {
                blocks: UVec3::ONE,
                idle_velocity: Vec3::X,
                iterations,
            },
            &mut images,
        )
    }

    fn identity_transform() -> VolumeTransform {
        VolumeTransform {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: 1.0,
        }
    }

    #[test]
    fn first_tick_fills_then_advects_then_projects() {
        let mut volume = test_volume(2);
        volume.step(&identity_transform(), Vec::new(), 0.02);
        let ops = volume.take_ops();
        assert!(matches!(ops[0], KernelOp::Fill { .. }));
        assert!(matches!(ops[1], KernelOp::Advection { .. }));
        // init, two iterations, bake
        assert_eq!(ops.len(), 6);
        assert!(matches!(ops[2], KernelOp::ProjectInit));
        assert!(matches!(ops.last(), Some(KernelOp::ProjectBake)));
    }

    #[test]
    fn later_ticks_do_not_fill_again() {
        let mut volume = test_volume(1);
        volume.step(&identity_transform(), Vec::new(), 0.02);
        volume.take_ops();
        volume.step(&identity_transform(), Vec::new(), 0.02);
        let ops = volume.take_ops();
        assert!(matches!(ops[0], KernelOp::Advection { .. }));
    }

    #[test]
    fn wind_force_is_integrated_over_the_time_step() {
        let mut volume = test_volume(1);
        let snapshot = ColliderSnapshot {
            collider: Collider::ball(0.25),
            transform: GlobalTransform::from(Transform::from_translation(Vec3::splat(0.5))),
            is_sensor: true,
            wind_force: Some(Vec3::new(10.0, 0.0, 0.0)),
            velocity: None,
        };
        volume.step(&identity_transform(), vec![snapshot], 0.5);
        let ops = volume.take_ops();
        let force = ops.iter().find_map(|op| match op {
            KernelOp::SphereForce { force, .. } => Some(*force),
            _ => None,
        });
        // 10 m/s^2 over half a second, one block per axis
        assert_eq!(force, Some(Vec3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn overlap_query_classifies_every_overlapping_collider() {
        let mut app = App::new();
        app.add_plugins((MinimalPlugins, TransformPlugin))
            .add_plugins(RapierPhysicsPlugin::<NoUserData>::default())
            .add_systems(FixedUpdate, step_fluid_volumes)
            .insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_millis(
                20,
            )));

        let mut images = Assets::<Image>::default();
        let volume_entity = app
            .world_mut()
            .spawn((
                FluidVolume::new(
                    FluidVolumeConfig {
                        blocks: UVec3::ONE,
                        ..default()
                    },
                    &mut images,
                ),
                Transform::default(),
            ))
            .id();

        // more solids than any plausible initial hit-buffer capacity
        for i in 0..40 {
            app.world_mut().spawn((
                Collider::ball(0.02),
                Transform::from_xyz(0.1 + i as f32 * 0.02, 0.5, 0.5),
            ));
        }
        // scaled ball: the sync bakes the entity scale into the shape,
        // so the adapter must report world radius 1.0, not 2.0
        app.world_mut().spawn((
            Collider::ball(0.5),
            Transform::from_xyz(0.5, 0.5, 0.5).with_scale(Vec3::splat(2.0)),
        ));
        // collider childed to a moving body inherits its velocity
        app.world_mut()
            .spawn((
                Transform::from_xyz(0.3, 0.5, 0.5),
                RigidBody::KinematicVelocityBased,
                Velocity::linear(Vec3::new(2.0, 0.0, 0.0)),
            ))
            .with_children(|body| {
                body.spawn((Collider::ball(0.05), Transform::default()));
            });
        // sensor without a wind source must land in neither list
        app.world_mut().spawn((
            Collider::ball(0.05),
            Sensor,
            Transform::from_xyz(0.5, 0.2, 0.5),
        ));

        // first update initializes, later ones step physics and the tick
        for _ in 0..3 {
            app.update();
        }

        let volume = app.world().get::<FluidVolume>(volume_entity).unwrap();
        let collisions = volume.collisions();
        assert!(collisions.winds.is_empty());
        assert_eq!(collisions.obstacles.len(), 42);
        assert!(collisions
            .obstacles
            .iter()
            .all(|o| o.angular_velocity == Vec3::ZERO));
        // bodyless solids are static obstacles with zero velocity
        let static_count = collisions
            .obstacles
            .iter()
            .filter(|o| o.velocity == Vec3::ZERO)
            .count();
        assert_eq!(static_count, 41);
        assert!(
            collisions.obstacles.iter().any(|o| matches!(
                o.shape,
                ColliderShape::Sphere { radius, .. } if (radius - 1.0).abs() < 1e-3
            )),
            "scaled ball radius was not taken from the synced shape"
        );
        assert!(
            collisions
                .obstacles
                .iter()
                .any(|o| (o.velocity - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-3),
            "childed collider did not inherit its body's velocity"
        );
    }

    #[test]
    fn obstacles_are_submitted_after_winds() {
        let mut volume = test_volume(1);
        let solid = ColliderSnapshot {
            collider: Collider::ball(0.25),
            transform: GlobalTransform::from(Transform::from_translation(Vec3::splat(0.5))),
            is_sensor: false,
            wind_force: None,
            velocity: None,
        };
        let wind = ColliderSnapshot {
            collider: Collider::ball(0.25),
            transform: GlobalTransform::from(Transform::from_translation(Vec3::splat(0.5))),
            is_sensor: true,
            wind_force: Some(Vec3::X),
            velocity: None,
        };
        // obstacles come last even when the solid was gathered first
        volume.step(&identity_transform(), vec![solid, wind], 0.02);
        let ops = volume.take_ops();
        let force_index = ops
            .iter()
            .position(|op| matches!(op, KernelOp::SphereForce { .. }))
            .unwrap();
        let obstacle_index = ops
            .iter()
            .position(|op| matches!(op, KernelOp::SphereObstacle { .. }))
            .unwrap();
        assert!(force_index < obstacle_index);
    }
}
