use crate::error::{Result, SplatError};
use bytemuck::Pod;
use tracing::debug;
use wgpu::{Buffer, BufferDescriptor, BufferUsages, Device, MapMode, PollType, Queue};

/// Copies `size` bytes of `source` into a fresh staging buffer and maps it.
/// Blocks until the device is idle; never call from the frame loop.
pub fn read_buffer<T: Pod>(
    device: &Device,
    queue: &Queue,
    source: &Buffer,
    size: u64,
) -> Result<Vec<T>> {
    if size == 0 {
        return Ok(Vec::new());
    }
    let staging = device.create_buffer(&BufferDescriptor {
        label: Some("readback staging buffer"),
        size,
        usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&Default::default());
    encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
    queue.submit([encoder.finish()]);

    let data = map_and_copy(device, &staging)?;
    debug!(label = ?source, bytes = size, "read back buffer");
    Ok(bytemuck::pod_collect_to_vec(&data))
}

/// Maps an already-filled `MAP_READ` buffer and returns its contents.
pub fn map_and_copy(device: &Device, staging: &Buffer) -> Result<Vec<u8>> {
    let slice = staging.slice(..);
    let (tx, rx) = flume::bounded(1);
    slice.map_async(MapMode::Read, move |result| {
        // The receiver only disappears if the caller already returned.
        let _ = tx.send(result);
    });
    device.poll(PollType::wait_indefinitely())?;
    rx.recv().map_err(|_| SplatError::ReadbackChannelClosed)??;

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}
