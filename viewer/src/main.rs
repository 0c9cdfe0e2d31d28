//! Demo scene: an air volume stirred by a spinning sphere, a patrolling
//! box and an updraft wind source, with gizmo overlays for the block
//! lattice and the active wind sources.

use bevy::color::palettes::css::{GOLD, GRAY, ORANGE_RED};
use bevy::prelude::*;
use bevy_rapier3d::prelude::{
    Collider, NoUserData, RapierPhysicsPlugin, RigidBody, Sensor, Velocity,
};
use fluid::{FluidPlugin, FluidVolume, FluidVolumeConfig, VolumeTransform, WindSource};

fn main() {
    App::new()
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "air volume viewer".to_string(),
                ..default()
            }),
            ..default()
        }))
        .add_plugins(RapierPhysicsPlugin::<NoUserData>::default())
        .add_plugins(FluidPlugin)
        .add_systems(Startup, setup)
        .add_systems(Update, (patrol, draw_volume_lattice, draw_wind_sources))
        .run();
}

/// Reverses a kinematic body's drift when it leaves its patrol range.
#[derive(Component)]
struct Patrol {
    origin: f32,
    half_range: f32,
    speed: f32,
}

fn setup(
    mut commands: Commands,
    mut images: ResMut<Assets<Image>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    commands.spawn((
        Camera3d::default(),
        Transform::from_xyz(5.5, 4.5, 7.0).looking_at(Vec3::new(0.0, 1.0, 0.0), Vec3::Y),
    ));
    commands.spawn((
        DirectionalLight {
            illuminance: 8_000.0,
            shadows_enabled: true,
            ..default()
        },
        Transform::from_rotation(Quat::from_euler(EulerRot::XYZ, -0.9, 0.4, 0.0)),
    ));

    // 4x2x4 blocks of air with a gentle idle wind along +x
    commands.spawn((
        Name::new("air volume"),
        FluidVolume::new(
            FluidVolumeConfig {
                blocks: UVec3::new(4, 2, 4),
                idle_velocity: Vec3::new(0.5, 0.0, 0.0),
                ..default()
            },
            &mut images,
        ),
        Transform::from_xyz(-2.0, 0.0, -2.0),
    ));

    commands.spawn((
        Name::new("spinner"),
        RigidBody::KinematicVelocityBased,
        Collider::ball(0.4),
        Velocity {
            linvel: Vec3::ZERO,
            angvel: Vec3::new(0.0, 3.0, 0.0),
        },
        Mesh3d(meshes.add(Sphere::new(0.4))),
        MeshMaterial3d(materials.add(Color::srgb(0.8, 0.3, 0.2))),
        Transform::from_xyz(0.0, 1.0, 0.0),
    ));

    commands.spawn((
        Name::new("drifter"),
        RigidBody::KinematicVelocityBased,
        Collider::cuboid(0.3, 0.3, 0.3),
        Velocity::linear(Vec3::new(0.8, 0.0, 0.0)),
        Patrol {
            origin: -0.5,
            half_range: 1.2,
            speed: 0.8,
        },
        Mesh3d(meshes.add(Cuboid::new(0.6, 0.6, 0.6))),
        MeshMaterial3d(materials.add(Color::srgb(0.2, 0.4, 0.8))),
        Transform::from_xyz(-0.5, 0.6, 0.9),
    ));

    commands.spawn((
        Name::new("updraft"),
        Collider::ball(0.5),
        Sensor,
        WindSource::new(Vec3::new(0.0, 4.0, 0.0)),
        Transform::from_xyz(0.8, 0.4, -0.8),
    ));
}

fn patrol(mut bodies: Query<(&Transform, &mut Velocity, &Patrol)>) {
    for (transform, mut velocity, patrol) in &mut bodies {
        let offset = transform.translation.x - patrol.origin;
        if offset.abs() > patrol.half_range {
            velocity.linvel.x = -patrol.speed * offset.signum();
        }
    }
}

fn draw_volume_lattice(volumes: Query<(&GlobalTransform, &FluidVolume)>, mut gizmos: Gizmos) {
    for (transform, volume) in &volumes {
        let placement = VolumeTransform::from_transform(transform);
        let blocks = volume.config().blocks;
        let extent = blocks.as_vec3();
        let mut line = |a: Vec3, b: Vec3| {
            gizmos.line(
                placement.local_to_world(a),
                placement.local_to_world(b),
                GRAY,
            );
        };
        for y in 0..=blocks.y {
            for z in 0..=blocks.z {
                let (y, z) = (y as f32, z as f32);
                line(Vec3::new(0.0, y, z), Vec3::new(extent.x, y, z));
            }
        }
        for x in 0..=blocks.x {
            for z in 0..=blocks.z {
                let (x, z) = (x as f32, z as f32);
                line(Vec3::new(x, 0.0, z), Vec3::new(x, extent.y, z));
            }
        }
        for x in 0..=blocks.x {
            for y in 0..=blocks.y {
                let (x, y) = (x as f32, y as f32);
                line(Vec3::new(x, y, 0.0), Vec3::new(x, y, extent.z));
            }
        }
    }
}

fn draw_wind_sources(sources: Query<(&GlobalTransform, &WindSource)>, mut gizmos: Gizmos) {
    for (transform, source) in &sources {
        let origin = transform.translation();
        gizmos.sphere(Isometry3d::from_translation(origin), 0.1, GOLD);
        gizmos.arrow(origin, origin + source.world_force(transform) * 0.2, ORANGE_RED);
    }
}
