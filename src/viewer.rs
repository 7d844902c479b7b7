use anyhow::Context;
use splat_pipeline::gpu::init::{request_adapter, request_device};
use splat_pipeline::{
    BoundingBoxOverlay, CameraBuffer, OrbitCamera, OverlayConfig, PointCloud, RendererConfig,
    SplatError, SplatPipeline,
};
use std::sync::Arc;
use tracing::{info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};
use wgpu::{
    Device, Queue, Surface, SurfaceConfiguration, SurfaceError, TextureFormat, TextureUsages,
    TextureViewDescriptor,
};

pub struct ViewerOptions {
    pub cloud: PointCloud,
    pub renderer: RendererConfig,
    pub overlay: OverlayConfig,
    pub width: u32,
    pub height: u32,
    pub distance: f32,
}

struct Gpu {
    surface: Surface<'static>,
    device: Device,
    queue: Queue,
    config: SurfaceConfiguration,
    camera: CameraBuffer,
    pipeline: SplatPipeline,
    overlay: BoundingBoxOverlay,
}

impl Gpu {
    async fn new(window: Arc<Window>, options: &ViewerOptions) -> anyhow::Result<Self> {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(Arc::clone(&window))
            .map_err(SplatError::from)?;
        let adapter = request_adapter(&instance, Some(&surface)).await?;
        let (device, queue) = request_device(&adapter).await?;

        let size = window.inner_size();
        let caps = surface.get_capabilities(&adapter);
        let surface_format = caps
            .formats
            .iter()
            .copied()
            .find(TextureFormat::is_srgb)
            .or_else(|| caps.formats.first().copied())
            .context("surface reports no formats")?;
        // Fifo is always supported.
        let present_mode = wgpu::PresentMode::Fifo;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            desired_maximum_frame_latency: 2,
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        let buffers = options.cloud.upload(&device)?;
        let camera = CameraBuffer::new(&device);
        let renderer = RendererConfig {
            color_format: surface_format,
            ..options.renderer
        };
        let pipeline = SplatPipeline::new(&device, &queue, &buffers, &camera, renderer)
            .context("failed to build splat pipeline")?;
        let overlay = BoundingBoxOverlay::new(
            &device,
            &queue,
            &camera,
            surface_format,
            options.overlay,
            options.cloud.bbox(),
        );

        Ok(Self {
            surface,
            device,
            queue,
            config,
            camera,
            pipeline,
            overlay,
        })
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        self.config.width = size.width.max(1);
        self.config.height = size.height.max(1);
        self.surface.configure(&self.device, &self.config);
    }

    fn render(&mut self, orbit: &OrbitCamera) -> Result<(), SplatError> {
        let uniform = orbit.camera().uniform(self.config.width, self.config.height);
        self.camera.update(&self.queue, &uniform);

        match self.surface.get_current_texture() {
            Ok(frame) => {
                let view = frame.texture.create_view(&TextureViewDescriptor::default());
                self.pipeline.submit_frame(&view, Some(&self.overlay));
                frame.present();
            }
            Err(SurfaceError::Lost | SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.config);
                warn!("surface lost or outdated, frame skipped");
            }
            Err(SurfaceError::Timeout) => warn!("surface timeout, frame skipped"),
            Err(SurfaceError::OutOfMemory) => return Err(SplatError::SurfaceOutOfMemory),
            Err(SurfaceError::Other) => warn!("surface error, frame skipped"),
        }
        Ok(())
    }
}

#[derive(Default)]
struct Pointer {
    rotating: bool,
    panning: bool,
    last: Option<(f64, f64)>,
}

pub struct Viewer {
    options: ViewerOptions,
    window: Option<Arc<Window>>,
    gpu: Option<Gpu>,
    orbit: OrbitCamera,
    pointer: Pointer,
    error: Option<anyhow::Error>,
}

impl Viewer {
    pub fn new(options: ViewerOptions) -> Self {
        let (min, max) = options.cloud.bbox();
        let orbit = OrbitCamera::new((min + max) * 0.5, options.distance);
        Self {
            options,
            window: None,
            gpu: None,
            orbit,
            pointer: Pointer::default(),
            error: None,
        }
    }

    /// Error that stopped the event loop, if any.
    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.error = Some(err);
        event_loop.exit();
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        let Some(gpu) = &mut self.gpu else { return };
        match key {
            KeyCode::Escape => event_loop.exit(),
            KeyCode::KeyB => {
                let show = !gpu.overlay.config().show_bbox;
                gpu.overlay.set_show_bbox(show);
            }
            KeyCode::KeyQ => {
                let show = !gpu.overlay.config().show_query;
                gpu.overlay.set_show_query(show);
            }
            KeyCode::Equal => {
                let resolution = gpu.overlay.config().resolution + 1;
                gpu.overlay.set_resolution(resolution);
            }
            KeyCode::Minus => {
                let resolution = gpu.overlay.config().resolution.saturating_sub(1);
                gpu.overlay.set_resolution(resolution);
            }
            KeyCode::BracketRight => {
                let multiplier = gpu.pipeline.gaussian_multiplier() * 1.25;
                gpu.pipeline.set_gaussian_multiplier(multiplier);
            }
            KeyCode::BracketLeft => {
                let multiplier = gpu.pipeline.gaussian_multiplier() * 0.8;
                gpu.pipeline.set_gaussian_multiplier(multiplier);
            }
            KeyCode::KeyR => self.orbit.reset(),
            _ => {}
        }
    }
}

impl ApplicationHandler for Viewer {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title("splat viewer")
            .with_inner_size(PhysicalSize::new(self.options.width, self.options.height));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(err) => return self.fail(event_loop, err.into()),
        };
        match pollster::block_on(Gpu::new(Arc::clone(&window), &self.options)) {
            Ok(gpu) => {
                info!(
                    points = self.options.cloud.len(),
                    format = ?gpu.config.format,
                    "viewer ready: drag to orbit, right-drag to pan, B/Q overlay, +/- grid, [/] scale, R reset"
                );
                self.gpu = Some(gpu);
            }
            Err(err) => return self.fail(event_loop, err),
        }
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(gpu) = &mut self.gpu {
                    gpu.resize(size);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let (PhysicalKey::Code(key), ElementState::Pressed) = (event.physical_key, event.state) {
                    self.handle_key(event_loop, key);
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let pressed = state == ElementState::Pressed;
                match button {
                    MouseButton::Left => self.pointer.rotating = pressed,
                    MouseButton::Right => self.pointer.panning = pressed,
                    _ => {}
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if let Some((x, y)) = self.pointer.last {
                    let (dx, dy) = ((position.x - x) as f32, (position.y - y) as f32);
                    if self.pointer.rotating {
                        self.orbit.rotate(dx, dy);
                    } else if self.pointer.panning {
                        self.orbit.pan(dx, dy);
                    }
                }
                self.pointer.last = Some((position.x, position.y));
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let steps = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32 / 50.0,
                };
                self.orbit.zoom(steps);
            }
            WindowEvent::RedrawRequested => {
                if let Some(gpu) = &mut self.gpu {
                    if let Err(err) = gpu.render(&self.orbit) {
                        return self.fail(event_loop, err.into());
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

/// Default orbit distance that frames the whole cloud.
pub fn framing_distance(cloud: &PointCloud) -> f32 {
    let (min, max) = cloud.bbox();
    let radius = (max - min).length() * 0.5;
    (radius * 2.5).max(1.0)
}
