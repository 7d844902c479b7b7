use thiserror::Error;

pub type Result<T> = std::result::Result<T, SplatError>;

#[derive(Debug, Error)]
pub enum SplatError {
    #[error("no compatible GPU adapter found: {0}")]
    AdapterUnavailable(#[from] wgpu::RequestAdapterError),

    #[error("failed to create device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("failed to create surface: {0}")]
    SurfaceCreation(#[from] wgpu::CreateSurfaceError),

    #[error("surface out of memory")]
    SurfaceOutOfMemory,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{label} needs {requested}, device limit is {limit}")]
    CapacityExceeded {
        label: &'static str,
        requested: u64,
        limit: u64,
    },

    #[error("invalid point cloud: {0}")]
    InvalidPointCloud(String),

    #[error("buffer map failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),

    #[error("readback channel closed before the buffer was mapped")]
    ReadbackChannelClosed,

    #[error("failed to write image: {0}")]
    ImageEncoding(#[from] png::EncodingError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}
