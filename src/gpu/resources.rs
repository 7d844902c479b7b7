use crate::error::Result;
use crate::point_cloud::check_storage_size;
use bytemuck::{Pod, Zeroable};
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{Buffer, BufferDescriptor, BufferUsages, Device};

/// Screen-space descriptor written by preprocessing (64 bytes).
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Splat {
    pub center: [f32; 2],
    pub extent: [f32; 2],
    pub conic_opacity: [f32; 4],
    pub color: [f32; 4],
    pub gaussian_index: u32,
    pub depth: f32,
    _pad: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct SortInfo {
    /// Visible count; reset every frame.
    pub keys_size: u32,
    pub capacity: u32,
    _pad: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchIndirect {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndirect {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

/// Vertices per splat quad (triangle strip).
pub const QUAD_VERTICES: u32 = 4;

/// Buffers shared between the passes of one frame, all sized to the cloud.
pub(crate) struct FrameResources {
    pub capacity: u32,
    pub splat_buffer: Buffer,
    pub sort_info_buffer: Buffer,
    /// Ping-pong key/value pairs; preprocessing writes side 0.
    pub keys: [Buffer; 2],
    pub vals: [Buffer; 2],
    pub dispatch_args_buffer: Buffer,
    pub draw_args_buffer: Buffer,
}

impl FrameResources {
    pub fn new(device: &Device, capacity: u32) -> Result<Self> {
        let limits = device.limits();
        let slots = capacity.max(1) as u64;
        let splat_bytes = check_storage_size(&limits, "splat buffer", slots * size_of::<Splat>() as u64)?;
        let key_bytes = check_storage_size(&limits, "sort key buffer", slots * size_of::<u32>() as u64)?;

        let splat_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("splat buffer"),
            size: splat_bytes,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let sort_info_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("sort info buffer"),
            contents: bytemuck::bytes_of(&SortInfo {
                keys_size: 0,
                capacity,
                _pad: [0; 2],
            }),
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
        });
        let pair_buffer = |label: &str| {
            device.create_buffer(&BufferDescriptor {
                label: Some(label),
                size: key_bytes,
                usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        let keys = [pair_buffer("sort keys a"), pair_buffer("sort keys b")];
        let vals = [pair_buffer("sort values a"), pair_buffer("sort values b")];

        let indirect_usage = BufferUsages::STORAGE | BufferUsages::INDIRECT | BufferUsages::COPY_SRC;
        let dispatch_args_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("sort dispatch args buffer"),
            contents: bytemuck::bytes_of(&DispatchIndirect { x: 0, y: 1, z: 1 }),
            usage: indirect_usage,
        });
        let draw_args_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("draw args buffer"),
            contents: bytemuck::bytes_of(&DrawIndirect {
                vertex_count: QUAD_VERTICES,
                instance_count: 0,
                first_vertex: 0,
                first_instance: 0,
            }),
            usage: indirect_usage,
        });

        Ok(Self {
            capacity,
            splat_buffer,
            sort_info_buffer,
            keys,
            vals,
            dispatch_args_buffer,
            draw_args_buffer,
        })
    }

    /// Side holding the sorted pairs after `pass_count` passes.
    pub fn result_side(pass_count: u32) -> usize {
        (pass_count % 2) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_match_shader_layouts() {
        assert_eq!(size_of::<Splat>(), 64);
        assert_eq!(size_of::<SortInfo>(), 16);
        assert_eq!(size_of::<DispatchIndirect>(), 12);
        assert_eq!(size_of::<DrawIndirect>(), 16);
    }

    #[test]
    fn result_side_follows_pass_parity() {
        assert_eq!(FrameResources::result_side(8), 0);
        assert_eq!(FrameResources::result_side(11), 1);
        assert_eq!(FrameResources::result_side(4), 0);
    }
}
