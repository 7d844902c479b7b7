use crate::config::OverlayConfig;
use crate::gpu::camera_buffer::CameraBuffer;
use crate::gpu::preprocess::bg_entry;
use crate::gpu::shader_loader::load_with_common;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use tracing::debug;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupLayoutEntry, BindingType, BlendComponent,
    BlendFactor, BlendOperation, BlendState, Buffer, BufferBindingType, BufferUsages,
    ColorTargetState, ColorWrites, CommandEncoder, Device, FragmentState, LoadOp,
    MultisampleState, Operations, PrimitiveState, PrimitiveTopology, Queue,
    RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor,
    ShaderStages, StoreOp, TextureFormat, TextureView, VertexState,
};

const BBOX_VERTICES: u32 = 24;
/// Largest query-grid resolution per axis. Mirrored in `vs_query`.
pub const MAX_QUERY_RESOLUTION: u32 = 256;

const ADDITIVE: BlendComponent = BlendComponent {
    src_factor: BlendFactor::One,
    dst_factor: BlendFactor::One,
    operation: BlendOperation::Add,
};

/// Overlay uniform block (80 bytes).
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct OverlayUniform {
    pub bb_min: [f32; 4],
    pub bb_max: [f32; 4],
    pub resolution: u32,
    pub show_bbox: u32,
    pub show_query: u32,
    _pad: u32,
    pub query_color: [f32; 4],
    pub bbox_color: [f32; 4],
}

impl OverlayUniform {
    pub fn new(config: &OverlayConfig, bb_min: Vec3, bb_max: Vec3) -> Self {
        Self {
            bb_min: bb_min.extend(0.0).to_array(),
            bb_max: bb_max.extend(0.0).to_array(),
            resolution: config.resolution.clamp(1, MAX_QUERY_RESOLUTION),
            show_bbox: config.show_bbox as u32,
            show_query: config.show_query as u32,
            _pad: 0,
            query_color: config.query_color,
            bbox_color: config.bbox_color,
        }
    }

    pub fn query_vertices(&self) -> u32 {
        self.resolution.pow(3)
    }
}

/// Bounding-box wireframe and query-grid points drawn additively over the
/// splats with the same camera.
pub struct BoundingBoxOverlay {
    queue: Queue,
    bbox_pipeline: RenderPipeline,
    query_pipeline: RenderPipeline,
    bind_group: BindGroup,
    uniform_buffer: Buffer,
    config: OverlayConfig,
    uniform: OverlayUniform,
}

impl BoundingBoxOverlay {
    pub fn new(
        device: &Device,
        queue: &Queue,
        camera: &CameraBuffer,
        color_format: TextureFormat,
        config: OverlayConfig,
        bounds: (Vec3, Vec3),
    ) -> Self {
        let uniform = OverlayUniform::new(&config, bounds.0, bounds.1);
        let config = OverlayConfig {
            resolution: uniform.resolution,
            ..config
        };
        let uniform_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("overlay uniform buffer"),
            contents: bytemuck::bytes_of(&uniform),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });

        let shader = load_with_common(device, "bounding box overlay shader", include_str!("bb_overlay.wgsl"));
        let uniform_entry = |binding: u32| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::VERTEX,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("overlay bind group layout"),
            entries: &[uniform_entry(0), uniform_entry(1)],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("overlay pl"),
            bind_group_layouts: &[&bgl],
            immediate_size: 0,
        });

        let pipeline = |label: &str, entry: &str, topology: PrimitiveTopology| {
            device.create_render_pipeline(&RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                vertex: VertexState {
                    module: &shader,
                    entry_point: Some(entry),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                primitive: PrimitiveState {
                    topology,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: MultisampleState::default(),
                fragment: Some(FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(ColorTargetState {
                        format: color_format,
                        blend: Some(BlendState {
                            color: ADDITIVE,
                            alpha: ADDITIVE,
                        }),
                        write_mask: ColorWrites::ALL,
                    })],
                }),
                multiview_mask: None,
                cache: None,
            })
        };
        let bbox_pipeline = pipeline("overlay bbox pipeline", "vs_bbox", PrimitiveTopology::LineList);
        let query_pipeline = pipeline("overlay query pipeline", "vs_query", PrimitiveTopology::PointList);

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("overlay bind group"),
            layout: &bgl,
            entries: &[bg_entry(0, camera.buffer()), bg_entry(1, &uniform_buffer)],
        });

        Self {
            queue: queue.clone(),
            bbox_pipeline,
            query_pipeline,
            bind_group,
            uniform_buffer,
            config,
            uniform,
        }
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn uniform(&self) -> &OverlayUniform {
        &self.uniform
    }

    pub fn set_resolution(&mut self, resolution: u32) {
        self.config.resolution = resolution.clamp(1, MAX_QUERY_RESOLUTION);
        self.write_uniform();
    }

    pub fn set_show_bbox(&mut self, show: bool) {
        self.config.show_bbox = show;
        self.write_uniform();
    }

    pub fn set_show_query(&mut self, show: bool) {
        self.config.show_query = show;
        self.write_uniform();
    }

    pub fn set_bounds(&mut self, bb_min: Vec3, bb_max: Vec3) {
        self.uniform.bb_min = bb_min.extend(0.0).to_array();
        self.uniform.bb_max = bb_max.extend(0.0).to_array();
        self.write_uniform();
    }

    pub fn is_visible(&self) -> bool {
        self.config.show_bbox || self.config.show_query
    }

    fn write_uniform(&mut self) {
        let bounds = (Vec3::from_slice(&self.uniform.bb_min), Vec3::from_slice(&self.uniform.bb_max));
        self.uniform = OverlayUniform::new(&self.config, bounds.0, bounds.1);
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&self.uniform));
        debug!(
            resolution = self.uniform.resolution,
            show_bbox = self.config.show_bbox,
            show_query = self.config.show_query,
            "overlay uniform rewritten"
        );
    }

    /// Draws on top of `target` without clearing it. Records nothing when
    /// both layers are hidden.
    pub fn record(&self, encoder: &mut CommandEncoder, target: &TextureView) {
        if !self.is_visible() {
            return;
        }
        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("overlay pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Load,
                    store: StoreOp::Store,
                },
            })],
            ..Default::default()
        });
        pass.set_bind_group(0, &self.bind_group, &[]);
        if self.config.show_bbox {
            pass.set_pipeline(&self.bbox_pipeline);
            pass.draw(0..BBOX_VERTICES, 0..1);
        }
        if self.config.show_query {
            pass.set_pipeline(&self.query_pipeline);
            pass.draw(0..self.uniform.query_vertices(), 0..1);
        }
    }
}
