//! Gaussian splat rendering on the GPU: per-point projection and culling,
//! a device radix sort by depth, and an indirect back-to-front draw whose
//! sizes never round-trip through the host.

pub mod camera;
pub mod config;
pub mod error;
pub mod gpu;
pub mod png_writer;
pub mod point_cloud;
pub mod reference;

pub use camera::{Camera, CameraUniform, OrbitCamera};
pub use config::{OverlayConfig, RendererConfig, SortConfig};
pub use error::{Result, SplatError};
pub use gpu::{BoundingBoxOverlay, CameraBuffer, OffscreenTarget, SplatPipeline};
pub use point_cloud::{Gaussian, PointCloud, PointCloudBuffers};
