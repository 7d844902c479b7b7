use crate::camera::CameraUniform;
use bytemuck::Zeroable;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{Buffer, BufferUsages, Device, Queue};

/// Device copy of the camera block. Owned by the caller, which rewrites it
/// once per frame before recording; the pipeline stages only read it.
#[derive(Debug)]
pub struct CameraBuffer {
    buffer: Buffer,
}

impl CameraBuffer {
    pub fn new(device: &Device) -> Self {
        let buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("camera buffer"),
            contents: bytemuck::bytes_of(&CameraUniform::zeroed()),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });
        Self { buffer }
    }

    pub fn update(&self, queue: &Queue, uniform: &CameraUniform) {
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(uniform));
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }
}
