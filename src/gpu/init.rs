use crate::error::Result;
use tracing::info;
use wgpu::{
    Adapter, Device, DeviceDescriptor, Features, Instance, PowerPreference, Queue,
    RequestAdapterOptions, Surface,
};

pub async fn request_adapter(instance: &Instance, surface: Option<&Surface<'_>>) -> Result<Adapter> {
    let adapter = instance
        .request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        })
        .await?;
    let adapter_info = adapter.get_info();
    info!(
        name = %adapter_info.name,
        backend = ?adapter_info.backend,
        "selected adapter"
    );
    Ok(adapter)
}

/// Requests a device with the adapter's full limits, since storage buffers are sized to the cloud.
pub async fn request_device(adapter: &Adapter) -> Result<(Device, Queue)> {
    let limits = adapter.limits();
    let (device, queue) = adapter
        .request_device(&DeviceDescriptor {
            label: Some("splat pipeline device"),
            required_features: Features::empty(),
            required_limits: limits,
            experimental_features: Default::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
        })
        .await?;
    Ok((device, queue))
}

/// Headless device for offscreen rendering and tests.
pub async fn init_wgpu() -> Result<(Device, Queue)> {
    let instance = Instance::default();
    let adapter = request_adapter(&instance, None).await?;
    request_device(&adapter).await
}
