use crate::config::SortConfig;
use crate::error::{Result, SplatError};
use crate::gpu::preprocess::bg_entry;
use crate::gpu::resources::FrameResources;
use crate::gpu::shader_loader::load_with_constants;
use crate::point_cloud::check_storage_size;
use bytemuck::{Pod, Zeroable};
use tracing::info;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupLayoutEntry, BindingType, Buffer, BufferBindingType,
    BufferDescriptor, BufferUsages, ComputePass, ComputePipeline, ComputePipelineDescriptor, Device,
    ShaderStages,
};

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct PassParams {
    shift: u32,
    _pad: [u32; 3],
}

struct Pipelines {
    count: ComputePipeline,
    scan: ComputePipeline,
    scatter: ComputePipeline,
}

impl Pipelines {
    fn new(device: &Device, config: &SortConfig) -> (Self, wgpu::BindGroupLayout) {
        let shader = load_with_constants(
            device,
            "radix sort shader",
            &[
                ("WG", config.workgroup_size),
                ("ROWS", config.rows_per_thread),
                ("BLOCK_SIZE", config.block_size()),
                ("BIN_COUNT", config.bin_count()),
                ("DIGIT_MASK", config.digit_mask()),
            ],
            include_str!("sort.wgsl"),
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
        let read = BufferBindingType::Storage { read_only: true };
        let write = BufferBindingType::Storage { read_only: false };
        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("radix sort bind group layout"),
            entries: &[
                bgl_entry(0, BufferBindingType::Uniform),
                bgl_entry(1, read),
                bgl_entry(2, read),
                bgl_entry(3, read),
                bgl_entry(4, write),
                bgl_entry(5, write),
                bgl_entry(6, write),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("radix sort pl"),
            bind_group_layouts: &[&bgl],
            immediate_size: 0,
        });

        let pipeline = |label: &str, entry: &str| {
            device.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: Default::default(),
            })
        };
        let pipelines = Self {
            count: pipeline("radix count pipeline", "count_digits"),
            scan: pipeline("radix scan pipeline", "scan_counts"),
            scatter: pipeline("radix scatter pipeline", "scatter"),
        };
        (pipelines, bgl)
    }
}

/// Device radix sort of the visible (key, slot) pairs. All per-pass state is
/// created up front; recording a frame allocates nothing.
pub(crate) struct RadixSort {
    config: SortConfig,
    pipelines: Pipelines,
    /// One per pass; pass `p` reads side `p % 2`.
    pass_bind_groups: Vec<BindGroup>,
    // Kept alive for the bind groups.
    _counts_buffer: Buffer,
    _params_buffers: Vec<Buffer>,
}

impl RadixSort {
    pub fn new(device: &Device, resources: &FrameResources, config: SortConfig) -> Result<Self> {
        let limits = device.limits();
        config.validate_for(&limits)?;

        let max_blocks = config.block_count(resources.capacity).max(1);
        if max_blocks > limits.max_compute_workgroups_per_dimension {
            return Err(SplatError::CapacityExceeded {
                label: "sort workgroups",
                requested: max_blocks as u64,
                limit: limits.max_compute_workgroups_per_dimension as u64,
            });
        }
        let counts_bytes = check_storage_size(
            &limits,
            "sort counts buffer",
            (config.bin_count() as u64) * (max_blocks as u64) * size_of::<u32>() as u64,
        )?;
        let counts_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("sort counts buffer"),
            size: counts_bytes,
            usage: BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let (pipelines, bgl) = Pipelines::new(device, &config);

        let params_buffers: Vec<Buffer> = (0..config.pass_count())
            .map(|pass| {
                device.create_buffer_init(&BufferInitDescriptor {
                    label: Some(&format!("sort pass {pass} params")),
                    contents: bytemuck::bytes_of(&PassParams {
                        shift: pass * config.bits_per_pass,
                        _pad: [0; 3],
                    }),
                    usage: BufferUsages::UNIFORM,
                })
            })
            .collect();

        let pass_bind_groups = params_buffers
            .iter()
            .enumerate()
            .map(|(pass, params)| {
                let src = pass % 2;
                let dst = 1 - src;
                device.create_bind_group(&BindGroupDescriptor {
                    label: Some(&format!("sort pass {pass} bind group")),
                    layout: &bgl,
                    entries: &[
                        bg_entry(0, params),
                        bg_entry(1, &resources.sort_info_buffer),
                        bg_entry(2, &resources.keys[src]),
                        bg_entry(3, &resources.vals[src]),
                        bg_entry(4, &resources.keys[dst]),
                        bg_entry(5, &resources.vals[dst]),
                        bg_entry(6, &counts_buffer),
                    ],
                })
            })
            .collect();

        info!(
            passes = config.pass_count(),
            bits_per_pass = config.bits_per_pass,
            block_size = config.block_size(),
            max_blocks,
            result_in_secondary = config.result_in_secondary(),
            "radix sort ready"
        );

        Ok(Self {
            config,
            pipelines,
            pass_bind_groups,
            _counts_buffer: counts_buffer,
            _params_buffers: params_buffers,
        })
    }

    /// Ping-pong side the render stage must read.
    pub fn result_side(&self) -> usize {
        FrameResources::result_side(self.config.pass_count())
    }

    pub fn record(&self, pass: &mut ComputePass<'_>, dispatch_args: &Buffer) {
        for bind_group in &self.pass_bind_groups {
            pass.set_bind_group(0, bind_group, &[]);

            pass.set_pipeline(&self.pipelines.count);
            pass.dispatch_workgroups_indirect(dispatch_args, 0);

            pass.set_pipeline(&self.pipelines.scan);
            pass.dispatch_workgroups(1, 1, 1);

            pass.set_pipeline(&self.pipelines.scatter);
            pass.dispatch_workgroups_indirect(dispatch_args, 0);
        }
    }
}
