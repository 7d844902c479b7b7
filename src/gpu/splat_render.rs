use crate::gpu::camera_buffer::CameraBuffer;
use crate::gpu::preprocess::bg_entry;
use crate::gpu::resources::FrameResources;
use crate::gpu::shader_loader::load_with_common;
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupLayoutEntry, BindingType, BlendComponent,
    BlendFactor, BlendOperation, BlendState, Buffer, BufferBindingType, Color, ColorTargetState,
    ColorWrites, CommandEncoder, Device, FragmentState, LoadOp, MultisampleState, Operations,
    PrimitiveState, PrimitiveTopology, RenderPassColorAttachment, RenderPassDescriptor,
    RenderPipeline, RenderPipelineDescriptor, ShaderStages, StoreOp, TextureFormat, TextureView,
    VertexState,
};

/// Premultiplied "over" for both color and alpha.
const PREMULTIPLIED_OVER: BlendComponent = BlendComponent {
    src_factor: BlendFactor::One,
    dst_factor: BlendFactor::OneMinusSrcAlpha,
    operation: BlendOperation::Add,
};

/// Indirect instanced draw of the sorted splats, one quad each.
pub(crate) struct SplatRender {
    pipeline: RenderPipeline,
    bind_group: BindGroup,
}

impl SplatRender {
    /// `sorted_side` is the ping-pong side that holds the sorted slots.
    pub fn new(
        device: &Device,
        camera: &CameraBuffer,
        resources: &FrameResources,
        sorted_side: usize,
        color_format: TextureFormat,
    ) -> Self {
        let shader = load_with_common(device, "gaussian splat shader", include_str!("gaussian.wgsl"));

        let bgl_entry = |binding: u32, visibility: ShaderStages, ty: BufferBindingType| BindGroupLayoutEntry {
            binding,
            visibility,
            ty: BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let read = BufferBindingType::Storage { read_only: true };
        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("splat render bind group layout"),
            entries: &[
                bgl_entry(0, ShaderStages::VERTEX, BufferBindingType::Uniform),
                bgl_entry(1, ShaderStages::VERTEX, read),
                bgl_entry(2, ShaderStages::VERTEX, read),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("splat render pl"),
            bind_group_layouts: &[&bgl],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("splat render pipeline"),
            layout: Some(&layout),
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleStrip,
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
                        color: PREMULTIPLIED_OVER,
                        alpha: PREMULTIPLIED_OVER,
                    }),
                    write_mask: ColorWrites::ALL,
                })],
            }),
            multiview_mask: None,
            cache: None,
        });

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("splat render bind group"),
            layout: &bgl,
            entries: &[
                bg_entry(0, camera.buffer()),
                bg_entry(1, &resources.splat_buffer),
                bg_entry(2, &resources.vals[sorted_side]),
            ],
        });

        Self {
            pipeline,
            bind_group,
        }
    }

    /// Clears `target` and draws `draw_args.instance_count` splats.
    pub fn record(&self, encoder: &mut CommandEncoder, target: &TextureView, clear: Color, draw_args: &Buffer) {
        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("splat render pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(clear),
                    store: StoreOp::Store,
                },
            })],
            ..Default::default()
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.draw_indirect(draw_args, 0);
    }
}
