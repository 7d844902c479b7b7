pub mod camera_buffer;
pub mod frame;
pub mod init;
pub mod offscreen;
pub mod overlay;
mod preprocess;
pub mod readback;
pub mod resources;
pub mod shader_loader;
mod sort;
mod splat_render;

pub use camera_buffer::CameraBuffer;
pub use frame::SplatPipeline;
pub use offscreen::OffscreenTarget;
pub use overlay::{BoundingBoxOverlay, OverlayUniform};
pub use preprocess::{RenderSettings, split_dispatch_3d};
pub use resources::{DispatchIndirect, DrawIndirect, SortInfo, Splat};
