use crate::error::Result;
use crate::gpu::readback::map_and_copy;
use wgpu::{
    BufferDescriptor, BufferUsages, Device, Extent3d, Queue, Texture, TextureDescriptor,
    TextureDimension, TextureFormat, TextureUsages, TextureView, TextureViewDescriptor,
};

const BYTES_PER_PIXEL: u32 = 4;

/// Color target for headless frames, readable as tightly packed RGBA8.
pub struct OffscreenTarget {
    texture: Texture,
    view: TextureView,
    width: u32,
    height: u32,
}

impl OffscreenTarget {
    pub fn new(device: &Device, width: u32, height: u32, format: TextureFormat) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let texture = device.create_texture(&TextureDescriptor {
            label: Some("offscreen color target"),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
        }
    }

    pub fn view(&self) -> &TextureView {
        &self.view
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Blocks until the copy lands; rows are returned without padding.
    pub fn read_rgba(&self, device: &Device, queue: &Queue) -> Result<Vec<u8>> {
        let unpadded_bytes_per_row = self.width * BYTES_PER_PIXEL;
        let padded_bytes_per_row =
            unpadded_bytes_per_row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("offscreen readback buffer"),
            size: (padded_bytes_per_row * self.height) as u64,
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&Default::default());
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit([encoder.finish()]);

        let data = map_and_copy(device, &readback_buffer)?;
        let row = unpadded_bytes_per_row as usize;
        let mut rgba = Vec::with_capacity(row * self.height as usize);
        for padded in data.chunks(padded_bytes_per_row as usize) {
            rgba.extend_from_slice(&padded[..row]);
        }
        Ok(rgba)
    }
}
