//! GPU kernel backend: the recorded ops of a tick become compute
//! dispatches in a render-graph node.
//!
//! Main world side, [`GpuKernels`] only records [`KernelOp`]s. Each
//! render frame the pending ops are extracted together with the volume's
//! texture handles; the [`FluidComputeNode`] then encodes one dispatch
//! per op, ping-ponging between the two velocity textures and the two
//! divergence/pressure textures, and finishes by copying the final state
//! back into the primary textures so the presentation handle is stable.

use std::sync::Mutex;

use bevy::asset::weak_handle;
use bevy::prelude::*;
use bevy::render::render_asset::{RenderAssetUsages, RenderAssets};
use bevy::render::render_graph::{self, RenderGraph, RenderLabel};
use bevy::render::render_resource::*;
use bevy::render::renderer::{RenderContext, RenderDevice, RenderQueue};
use bevy::render::texture::GpuImage;
use bevy::render::{ExtractSchedule, MainWorld, Render, RenderApp, RenderSet};

use crate::config::BLOCK_SIZE;
use crate::kernels::{FluidKernels, KernelOp};
use crate::plugin::FluidVolume;

const FLUID_SHADER_HANDLE: Handle<Shader> = weak_handle!("6f1a7c52-8d3e-44b0-9c6a-2e5b91d0f3a4");

/// Main-world kernel backend: records ops for the render graph.
#[derive(Default)]
pub struct GpuKernels {
    ops: Vec<KernelOp>,
}

impl GpuKernels {
    pub(crate) fn take_ops(&mut self) -> Vec<KernelOp> {
        std::mem::take(&mut self.ops)
    }
}

impl FluidKernels for GpuKernels {
    fn submit(&mut self, op: KernelOp) {
        self.ops.push(op);
    }
}

/// Texture handles backing one volume's field on the GPU.
///
/// `velocity` is the presentation handle: after each tick it holds the
/// post-projection field. Consumers must never write to it.
#[derive(Clone)]
pub struct FluidTextures {
    pub velocity: Handle<Image>,
    pub velocity_scratch: Handle<Image>,
    pub scalar: Handle<Image>,
    pub scalar_scratch: Handle<Image>,
}

/// Allocates the two velocity and two divergence/pressure textures for a
/// grid of `dims` cells.
pub fn create_field_textures(dims: UVec3, images: &mut Assets<Image>) -> FluidTextures {
    FluidTextures {
        velocity: images.add(field_image(dims, TextureFormat::Rgba16Float)),
        velocity_scratch: images.add(field_image(dims, TextureFormat::Rgba16Float)),
        scalar: images.add(field_image(dims, TextureFormat::Rg32Float)),
        scalar_scratch: images.add(field_image(dims, TextureFormat::Rg32Float)),
    }
}

fn field_image(dims: UVec3, format: TextureFormat) -> Image {
    let mut image = Image::new_fill(
        Extent3d {
            width: dims.x,
            height: dims.y,
            depth_or_array_layers: dims.z,
        },
        TextureDimension::D3,
        &[0; 8],
        format,
        RenderAssetUsages::RENDER_WORLD,
    );
    image.texture_descriptor.usage = TextureUsages::STORAGE_BINDING
        | TextureUsages::TEXTURE_BINDING
        | TextureUsages::COPY_SRC
        | TextureUsages::COPY_DST;
    image.sampler = bevy::image::ImageSampler::Descriptor(bevy::image::ImageSamplerDescriptor {
        address_mode_u: bevy::image::ImageAddressMode::ClampToEdge,
        address_mode_v: bevy::image::ImageAddressMode::ClampToEdge,
        address_mode_w: bevy::image::ImageAddressMode::ClampToEdge,
        mag_filter: bevy::image::ImageFilterMode::Linear,
        min_filter: bevy::image::ImageFilterMode::Linear,
        ..default()
    });
    image
}

/// One volume's pending work for the current render frame.
struct ExtractedVolume {
    blocks: UVec3,
    textures: FluidTextures,
    ops: Vec<KernelOp>,
}

/// Volumes waiting for the compute node. Kept behind a mutex so the node
/// (which only sees `&World`) can drain it once the pipelines are ready;
/// undrained work survives to the next frame instead of being dropped.
#[derive(Resource, Default)]
struct FluidDispatchQueue {
    volumes: Mutex<Vec<ExtractedVolume>>,
}

fn extract_fluid_ops(mut main_world: ResMut<MainWorld>, queue: Res<FluidDispatchQueue>) {
    let mut query = main_world.query::<&mut FluidVolume>();
    let mut extracted = Vec::new();
    for mut volume in query.iter_mut(&mut main_world) {
        let ops = volume.take_ops();
        if ops.is_empty() {
            continue;
        }
        extracted.push(ExtractedVolume {
            blocks: volume.blocks(),
            textures: volume.textures().clone(),
            ops,
        });
    }
    if !extracted.is_empty() {
        queue.volumes.lock().unwrap().append(&mut extracted);
    }
}

/// Uniform parameters shared by all kernel entry points. Each dispatch
/// writes its own copy; unused fields are left at their defaults.
#[derive(ShaderType, Clone, Copy)]
struct KernelParams {
    /// Box rotation (volume frame -> box frame) or mesh local-to-grid.
    transform: Mat4,
    /// Fill value or force delta, normalized per axis by block count.
    value: Vec4,
    /// Shape center / first endpoint (xyz) and radius (w), grid units.
    point1: Vec4,
    /// Second endpoint or half size (xyz), grid units.
    point2: Vec4,
    /// Obstacle linear velocity, normalized per axis by block count.
    velocity: Vec4,
    /// Obstacle angular velocity (rad/s, unnormalized).
    angular: Vec4,
    /// Rotation center in grid units.
    center: Vec4,
    /// Grid dimensions (xyz) and time step (w).
    dims: Vec4,
    /// Block count per axis.
    blocks: Vec4,
    /// Number of mesh indices bound, for the convex mesh kernel.
    index_count: u32,
}

impl KernelParams {
    fn new(blocks: UVec3) -> Self {
        Self {
            transform: Mat4::IDENTITY,
            value: Vec4::ZERO,
            point1: Vec4::ZERO,
            point2: Vec4::ZERO,
            velocity: Vec4::ZERO,
            angular: Vec4::ZERO,
            center: Vec4::ZERO,
            dims: ((blocks * BLOCK_SIZE).as_vec3(), 0.0).into(),
            blocks: (blocks.as_vec3(), 0.0).into(),
            index_count: 0,
        }
    }
}

/// Which ping-pong pair a kernel writes.
enum Writes {
    Velocity,
    Scalar,
}

#[derive(Resource)]
struct FluidPipelines {
    layout: BindGroupLayout,
    fill: CachedComputePipelineId,
    advection: CachedComputePipelineId,
    project_init: CachedComputePipelineId,
    project_iteration: CachedComputePipelineId,
    project_bake: CachedComputePipelineId,
    sphere_force: CachedComputePipelineId,
    capsule_force: CachedComputePipelineId,
    box_force: CachedComputePipelineId,
    sphere_obstacle: CachedComputePipelineId,
    capsule_obstacle: CachedComputePipelineId,
    box_obstacle: CachedComputePipelineId,
    convex_mesh_obstacle: CachedComputePipelineId,
}

fn prepare_pipelines(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    existing: Option<Res<FluidPipelines>>,
) {
    if existing.is_some() {
        return;
    }

    let texture_3d = |filterable| BindGroupLayoutEntry {
        binding: u32::MAX,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable },
            view_dimension: TextureViewDimension::D3,
            multisampled: false,
        },
        count: None,
    };
    let storage_3d = |format| BindGroupLayoutEntry {
        binding: u32::MAX,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::StorageTexture {
            access: StorageTextureAccess::WriteOnly,
            format,
            view_dimension: TextureViewDimension::D3,
        },
        count: None,
    };
    let storage_buffer = || BindGroupLayoutEntry {
        binding: u32::MAX,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };

    let layout = render_device.create_bind_group_layout(
        "fluid_kernel_bind_group_layout",
        &BindGroupLayoutEntries::sequential(
            ShaderStages::COMPUTE,
            (
                // velocity in (sampled for advection)
                texture_3d(true),
                BindGroupLayoutEntry {
                    binding: u32::MAX,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
                // velocity out
                storage_3d(TextureFormat::Rgba16Float),
                // divergence/pressure in
                texture_3d(false),
                // divergence/pressure out
                storage_3d(TextureFormat::Rg32Float),
                // params
                BindGroupLayoutEntry {
                    binding: u32::MAX,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: Some(KernelParams::min_size()),
                    },
                    count: None,
                },
                // mesh vertices
                storage_buffer(),
                // mesh indices
                storage_buffer(),
            ),
        ),
    );

    let pipeline = |entry_point: &'static str| {
        pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
            label: Some(format!("fluid_{entry_point}_pipeline").into()),
            layout: vec![layout.clone()],
            push_constant_ranges: vec![],
            shader: FLUID_SHADER_HANDLE,
            shader_defs: vec![],
            entry_point: entry_point.into(),
            zero_initialize_workgroup_memory: false,
        })
    };

    commands.insert_resource(FluidPipelines {
        fill: pipeline("fill"),
        advection: pipeline("advection"),
        project_init: pipeline("project_init"),
        project_iteration: pipeline("project_iteration"),
        project_bake: pipeline("project_bake"),
        sphere_force: pipeline("sphere_force"),
        capsule_force: pipeline("capsule_force"),
        box_force: pipeline("box_force"),
        sphere_obstacle: pipeline("sphere_obstacle"),
        capsule_obstacle: pipeline("capsule_obstacle"),
        box_obstacle: pipeline("box_obstacle"),
        convex_mesh_obstacle: pipeline("convex_mesh_obstacle"),
        layout,
    });
}

/// Pool of mesh vertex/index buffer pairs.
///
/// One pair per mesh obstacle within a frame (each dispatch needs its
/// own data resident when the command buffer executes); every pair grows
/// monotonically and the pool itself is never shrunk, so steady-state
/// frames reallocate nothing.
#[derive(Resource, Default)]
struct FluidMeshBuffers {
    pool: Mutex<MeshBufferPool>,
}

#[derive(Default)]
struct MeshBufferPool {
    pairs: Vec<MeshBufferPair>,
    cursor: usize,
}

struct MeshBufferPair {
    vertices: StorageBuffer<Vec<Vec4>>,
    indices: StorageBuffer<Vec<u32>>,
}

impl Default for MeshBufferPair {
    fn default() -> Self {
        let mut vertices = StorageBuffer::default();
        vertices.set_label(Some("fluid_mesh_vertices"));
        let mut indices = StorageBuffer::default();
        indices.set_label(Some("fluid_mesh_indices"));
        Self { vertices, indices }
    }
}

impl MeshBufferPool {
    fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Uploads one mesh and returns the buffer pair holding it.
    fn upload(
        &mut self,
        device: &RenderDevice,
        queue: &RenderQueue,
        vertices: Vec<Vec4>,
        indices: Vec<u32>,
    ) -> &MeshBufferPair {
        if self.cursor == self.pairs.len() {
            self.pairs.push(MeshBufferPair::default());
        }
        let pair = &mut self.pairs[self.cursor];
        self.cursor += 1;
        pair.vertices.set(vertices);
        pair.vertices.write_buffer(device, queue);
        pair.indices.set(indices);
        pair.indices.write_buffer(device, queue);
        &self.pairs[self.cursor - 1]
    }

    /// A minimal resident pair for kernels that do not read mesh data.
    fn placeholder(&mut self, device: &RenderDevice, queue: &RenderQueue) -> &MeshBufferPair {
        if self.pairs.is_empty() {
            let pair = MeshBufferPair::default();
            self.pairs.push(pair);
            let pair = &mut self.pairs[0];
            pair.vertices.set(vec![Vec4::ZERO]);
            pair.vertices.write_buffer(device, queue);
            pair.indices.set(vec![0u32; 3]);
            pair.indices.write_buffer(device, queue);
        }
        &self.pairs[0]
    }
}

#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
struct FluidComputeLabel;

struct FluidComputeNode;

impl render_graph::Node for FluidComputeNode {
    fn run(
        &self,
        _graph: &mut render_graph::RenderGraphContext,
        render_context: &mut RenderContext,
        world: &World,
    ) -> Result<(), render_graph::NodeRunError> {
        let Some(pipelines) = world.get_resource::<FluidPipelines>() else {
            return Ok(());
        };
        let pipeline_cache = world.resource::<PipelineCache>();
        let ids = [
            pipelines.fill,
            pipelines.advection,
            pipelines.project_init,
            pipelines.project_iteration,
            pipelines.project_bake,
            pipelines.sphere_force,
            pipelines.capsule_force,
            pipelines.box_force,
            pipelines.sphere_obstacle,
            pipelines.capsule_obstacle,
            pipelines.box_obstacle,
            pipelines.convex_mesh_obstacle,
        ];
        // wait until every kernel is compiled; pending work stays queued
        if ids
            .iter()
            .any(|id| pipeline_cache.get_compute_pipeline(*id).is_none())
        {
            return Ok(());
        }

        let gpu_images = world.resource::<RenderAssets<GpuImage>>();
        let render_device = world.resource::<RenderDevice>();
        let render_queue = world.resource::<RenderQueue>();
        let queue = world.resource::<FluidDispatchQueue>();
        let mesh_buffers = world.resource::<FluidMeshBuffers>();

        let mut pool = mesh_buffers.pool.lock().unwrap();
        pool.reset();

        let mut volumes = queue.volumes.lock().unwrap();
        let mut remaining = Vec::new();
        for volume in volumes.drain(..) {
            let textures = [
                gpu_images.get(&volume.textures.velocity),
                gpu_images.get(&volume.textures.velocity_scratch),
                gpu_images.get(&volume.textures.scalar),
                gpu_images.get(&volume.textures.scalar_scratch),
            ];
            let [Some(velocity), Some(velocity_scratch), Some(scalar), Some(scalar_scratch)] =
                textures
            else {
                // textures not uploaded yet; retry next frame
                remaining.push(volume);
                continue;
            };
            encode_volume(
                render_context,
                render_device,
                render_queue,
                pipeline_cache,
                pipelines,
                &mut pool,
                &volume,
                [velocity, velocity_scratch],
                [scalar, scalar_scratch],
            );
        }
        *volumes = remaining;

        Ok(())
    }
}

fn encode_volume(
    render_context: &mut RenderContext,
    render_device: &RenderDevice,
    render_queue: &RenderQueue,
    pipeline_cache: &PipelineCache,
    pipelines: &FluidPipelines,
    pool: &mut MeshBufferPool,
    volume: &ExtractedVolume,
    velocity: [&GpuImage; 2],
    scalar: [&GpuImage; 2],
) {
    let blocks = volume.blocks;
    let dims = blocks * BLOCK_SIZE;

    // velocity[velocity_side] and scalar[scalar_side] are current
    let mut velocity_side = 0;
    let mut scalar_side = 0;

    let mut dispatches = Vec::with_capacity(volume.ops.len());
    for op in &volume.ops {
        let mut params = KernelParams::new(blocks);
        let (id, writes) = bind_op(op, pipelines, &mut params, pool, render_device, render_queue);

        let mesh = match op {
            KernelOp::ConvexMeshObstacle { .. } => {
                // uploaded by bind_op just above: the freshest pair
                &pool.pairs[pool.cursor - 1]
            }
            _ => pool.placeholder(render_device, render_queue),
        };

        let mut uniform = UniformBuffer::from(params);
        uniform.write_buffer(render_device, render_queue);
        let Some(uniform_binding) = uniform.binding() else {
            continue;
        };
        let (Some(vertex_binding), Some(index_binding)) =
            (mesh.vertices.binding(), mesh.indices.binding())
        else {
            continue;
        };

        let bind_group = render_device.create_bind_group(
            "fluid_kernel_bind_group",
            &pipelines.layout,
            &BindGroupEntries::sequential((
                &velocity[velocity_side].texture_view,
                &velocity[velocity_side].sampler,
                &velocity[1 - velocity_side].texture_view,
                &scalar[scalar_side].texture_view,
                &scalar[1 - scalar_side].texture_view,
                uniform_binding,
                vertex_binding,
                index_binding,
            )),
        );

        match writes {
            Writes::Velocity => velocity_side = 1 - velocity_side,
            Writes::Scalar => scalar_side = 1 - scalar_side,
        }
        dispatches.push((id, bind_group));
    }

    {
        let mut pass =
            render_context
                .command_encoder()
                .begin_compute_pass(&ComputePassDescriptor {
                    label: Some("fluid_simulation_pass"),
                    timestamp_writes: None,
                });
        for (id, bind_group) in &dispatches {
            let Some(pipeline) = pipeline_cache.get_compute_pipeline(*id) else {
                continue;
            };
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            // z granularity is split between the dispatch extent and the
            // 16x16x2 workgroup, covering every cell exactly once
            pass.dispatch_workgroups(blocks.x, blocks.y, blocks.z * BLOCK_SIZE / 2);
        }
    }

    // the primary textures stay authoritative between frames
    let extent = Extent3d {
        width: dims.x,
        height: dims.y,
        depth_or_array_layers: dims.z,
    };
    let encoder = render_context.command_encoder();
    if velocity_side == 1 {
        encoder.copy_texture_to_texture(
            velocity[1].texture.as_image_copy(),
            velocity[0].texture.as_image_copy(),
            extent,
        );
    }
    if scalar_side == 1 {
        encoder.copy_texture_to_texture(
            scalar[1].texture.as_image_copy(),
            scalar[0].texture.as_image_copy(),
            extent,
        );
    }
}

/// Fills the uniform parameters for one op and returns the pipeline to
/// run plus which ping-pong pair the kernel writes.
fn bind_op(
    op: &KernelOp,
    pipelines: &FluidPipelines,
    params: &mut KernelParams,
    pool: &mut MeshBufferPool,
    render_device: &RenderDevice,
    render_queue: &RenderQueue,
) -> (CachedComputePipelineId, Writes) {
    match op {
        KernelOp::Fill { value } => {
            params.value = value.extend(0.0);
            (pipelines.fill, Writes::Velocity)
        }
        KernelOp::Advection { dt } => {
            params.dims.w = *dt;
            (pipelines.advection, Writes::Velocity)
        }
        KernelOp::ProjectInit => (pipelines.project_init, Writes::Scalar),
        KernelOp::ProjectIteration => (pipelines.project_iteration, Writes::Scalar),
        KernelOp::ProjectBake => (pipelines.project_bake, Writes::Velocity),
        KernelOp::SphereForce {
            center,
            radius,
            force,
        } => {
            params.point1 = center.extend(*radius);
            params.value = force.extend(0.0);
            (pipelines.sphere_force, Writes::Velocity)
        }
        KernelOp::CapsuleForce {
            point1,
            point2,
            radius,
            force,
        } => {
            params.point1 = point1.extend(*radius);
            params.point2 = point2.extend(0.0);
            params.value = force.extend(0.0);
            (pipelines.capsule_force, Writes::Velocity)
        }
        KernelOp::BoxForce {
            center,
            half_size,
            rotation,
            force,
        } => {
            params.point1 = center.extend(0.0);
            params.point2 = half_size.extend(0.0);
            params.transform = Mat4::from_mat3(*rotation);
            params.value = force.extend(0.0);
            (pipelines.box_force, Writes::Velocity)
        }
        KernelOp::SphereObstacle {
            center,
            radius,
            velocity,
            angular_velocity,
        } => {
            params.point1 = center.extend(*radius);
            params.center = center.extend(0.0);
            params.velocity = velocity.extend(0.0);
            params.angular = angular_velocity.extend(0.0);
            (pipelines.sphere_obstacle, Writes::Velocity)
        }
        KernelOp::CapsuleObstacle {
            point1,
            point2,
            radius,
            velocity,
            angular_velocity,
            center,
        } => {
            params.point1 = point1.extend(*radius);
            params.point2 = point2.extend(0.0);
            params.center = center.extend(0.0);
            params.velocity = velocity.extend(0.0);
            params.angular = angular_velocity.extend(0.0);
            (pipelines.capsule_obstacle, Writes::Velocity)
        }
        KernelOp::BoxObstacle {
            center,
            half_size,
            rotation,
            velocity,
            angular_velocity,
        } => {
            params.point1 = center.extend(0.0);
            params.point2 = half_size.extend(0.0);
            params.transform = Mat4::from_mat3(*rotation);
            params.center = center.extend(0.0);
            params.velocity = velocity.extend(0.0);
            params.angular = angular_velocity.extend(0.0);
            (pipelines.box_obstacle, Writes::Velocity)
        }
        KernelOp::ConvexMeshObstacle {
            mesh,
            velocity,
            angular_velocity,
            center,
        } => {
            params.transform = mesh.local_to_grid;
            params.center = center.extend(0.0);
            params.velocity = velocity.extend(0.0);
            params.angular = angular_velocity.extend(0.0);
            params.index_count = mesh.indices.len() as u32;
            let vertices: Vec<Vec4> = mesh.vertices.iter().map(|v| v.extend(1.0)).collect();
            pool.upload(render_device, render_queue, vertices, mesh.indices.to_vec());
            (pipelines.convex_mesh_obstacle, Writes::Velocity)
        }
    }
}

/// Plugin wiring the GPU backend into the render app.
pub struct FluidGpuPlugin;

impl Plugin for FluidGpuPlugin {
    fn build(&self, app: &mut App) {
        let mut shaders = app.world_mut().resource_mut::<Assets<Shader>>();
        shaders.insert(
            &FLUID_SHADER_HANDLE,
            Shader::from_wgsl(include_str!("shaders/fluid.wgsl"), "fluid.wgsl"),
        );

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };
        render_app
            .init_resource::<FluidDispatchQueue>()
            .init_resource::<FluidMeshBuffers>()
            .add_systems(ExtractSchedule, extract_fluid_ops)
            .add_systems(Render, prepare_pipelines.in_set(RenderSet::Prepare));

        let mut render_graph = render_app.world_mut().resource_mut::<RenderGraph>();
        render_graph.add_node(FluidComputeLabel, FluidComputeNode);
        // simulate before anything renders the field
        render_graph.add_node_edge(FluidComputeLabel, bevy::render::graph::CameraDriverLabel);
    }
}
