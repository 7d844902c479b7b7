use crate::config::RendererConfig;
use crate::error::{Result, SplatError};
use crate::gpu::camera_buffer::CameraBuffer;
use crate::gpu::resources::FrameResources;
use crate::gpu::shader_loader::load_with_constants;
use crate::point_cloud::PointCloudBuffers;
use bytemuck::{Pod, Zeroable};
use tracing::debug;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayoutEntry, BindingType, Buffer,
    BufferBindingType, BufferUsages, ComputePass, ComputePipeline, ComputePipelineDescriptor,
    Device, Queue, ShaderStages,
};

pub const PREPROCESS_WG_SIZE: u32 = 256;

/// Uniform block read by preprocessing (16 bytes).
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct RenderSettings {
    pub gaussian_multiplier: f32,
    pub sh_degree: u32,
    pub cull_margin: f32,
    pub num_points: u32,
}

/// Spreads `workgroups_needed` over up to three dimensions.
pub fn split_dispatch_3d(workgroups_needed: u32, max_dim: u32) -> Result<[u32; 3]> {
    if workgroups_needed == 0 {
        return Ok([0, 1, 1]);
    }
    let x = workgroups_needed.min(max_dim).max(1);
    let remaining_after_x = workgroups_needed.div_ceil(x);
    let y = remaining_after_x.min(max_dim);

    let xy = (x as u64) * (y as u64);
    let z = (workgroups_needed as u64).div_ceil(xy);
    if z > max_dim as u64 {
        return Err(SplatError::CapacityExceeded {
            label: "preprocess workgroups",
            requested: workgroups_needed as u64,
            limit: (max_dim as u64).pow(3),
        });
    }
    Ok([x, y, z as u32])
}

/// Projection, culling and keying of every Gaussian, followed by the
/// single-thread pass that turns the visible count into indirect arguments.
pub(crate) struct Preprocess {
    pipeline: ComputePipeline,
    indirect_pipeline: ComputePipeline,
    bind_group: BindGroup,
    indirect_bind_group: BindGroup,
    settings_buffer: Buffer,
    settings: RenderSettings,
    dispatch: [u32; 3],
}

impl Preprocess {
    pub fn new(
        device: &Device,
        cloud: &PointCloudBuffers,
        camera: &CameraBuffer,
        resources: &FrameResources,
        config: &RendererConfig,
    ) -> Result<Self> {
        let max_dim = device.limits().max_compute_workgroups_per_dimension;
        let dispatch = split_dispatch_3d(cloud.num_points.div_ceil(PREPROCESS_WG_SIZE), max_dim)?;

        let settings = RenderSettings {
            gaussian_multiplier: config.gaussian_multiplier,
            sh_degree: cloud.sh_degree,
            cull_margin: config.cull_margin,
            num_points: cloud.num_points,
        };
        let settings_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("render settings buffer"),
            contents: bytemuck::bytes_of(&settings),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });

        let shader = load_with_constants(
            device,
            "preprocess shader",
            &[("WG", PREPROCESS_WG_SIZE)],
            include_str!("preprocess.wgsl"),
        );
        let indirect_shader = load_with_constants(
            device,
            "prepare indirect shader",
            &[("BLOCK_SIZE", config.sort.block_size())],
            include_str!("indirect.wgsl"),
        );

        let bgl_entry = |binding: u32, ty: BufferBindingType| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let uniform = BufferBindingType::Uniform;
        let read = BufferBindingType::Storage { read_only: true };
        let write = BufferBindingType::Storage { read_only: false };

        let preprocess_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("preprocess bind group layout"),
            entries: &[
                bgl_entry(0, uniform),
                bgl_entry(1, uniform),
                bgl_entry(2, read),
                bgl_entry(3, read),
                bgl_entry(4, write),
                bgl_entry(5, write),
                bgl_entry(6, write),
                bgl_entry(7, write),
            ],
        });
        let indirect_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("prepare indirect bind group layout"),
            entries: &[bgl_entry(0, read), bgl_entry(1, write), bgl_entry(2, write)],
        });

        let pipeline_for = |label: &str, bgl: &wgpu::BindGroupLayout, module: &wgpu::ShaderModule, entry: &str| {
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[bgl],
                immediate_size: 0,
            });
            device.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: Default::default(),
            })
        };
        let pipeline = pipeline_for("preprocess pipeline", &preprocess_bgl, &shader, "preprocess");
        let indirect_pipeline = pipeline_for(
            "prepare indirect pipeline",
            &indirect_bgl,
            &indirect_shader,
            "prepare_indirect",
        );

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("preprocess bind group"),
            layout: &preprocess_bgl,
            entries: &[
                bg_entry(0, camera.buffer()),
                bg_entry(1, &settings_buffer),
                bg_entry(2, &cloud.gaussian_buffer),
                bg_entry(3, &cloud.sh_buffer),
                bg_entry(4, &resources.splat_buffer),
                bg_entry(5, &resources.sort_info_buffer),
                bg_entry(6, &resources.keys[0]),
                bg_entry(7, &resources.vals[0]),
            ],
        });
        let indirect_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("prepare indirect bind group"),
            layout: &indirect_bgl,
            entries: &[
                bg_entry(0, &resources.sort_info_buffer),
                bg_entry(1, &resources.dispatch_args_buffer),
                bg_entry(2, &resources.draw_args_buffer),
            ],
        });

        Ok(Self {
            pipeline,
            indirect_pipeline,
            bind_group,
            indirect_bind_group,
            settings_buffer,
            settings,
            dispatch,
        })
    }

    pub fn settings(&self) -> RenderSettings {
        self.settings
    }

    pub fn set_gaussian_multiplier(&mut self, queue: &Queue, multiplier: f32) {
        self.settings.gaussian_multiplier = multiplier;
        queue.write_buffer(&self.settings_buffer, 0, bytemuck::bytes_of(&self.settings));
        debug!(multiplier, "gaussian multiplier updated");
    }

    pub fn record(&self, pass: &mut ComputePass<'_>) {
        if self.settings.num_points > 0 {
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            let [x, y, z] = self.dispatch;
            pass.dispatch_workgroups(x, y, z);
        }
        // Runs even for empty clouds so the draw args read zero.
        pass.set_pipeline(&self.indirect_pipeline);
        pass.set_bind_group(0, &self.indirect_bind_group, &[]);
        pass.dispatch_workgroups(1, 1, 1);
    }
}

pub(crate) fn bg_entry(binding: u32, buffer: &Buffer) -> BindGroupEntry<'_> {
    BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}
