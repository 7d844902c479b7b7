mod viewer;

use anyhow::Context;
use clap::Parser;
use glam::Vec3;
use splat_pipeline::gpu::init::init_wgpu;
use splat_pipeline::png_writer::save_png_rgba8;
use splat_pipeline::{
    BoundingBoxOverlay, Camera, CameraBuffer, OffscreenTarget, OverlayConfig, PointCloud,
    RendererConfig, SortConfig, SplatPipeline,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use viewer::{Viewer, ViewerOptions, framing_distance};
use winit::event_loop::EventLoop;

#[derive(Parser, Debug)]
#[command(name = "splat-viewer", about = "Render a synthetic Gaussian splat cloud")]
struct Args {
    /// Number of Gaussians in the synthetic cloud.
    #[arg(long, default_value_t = 50_000)]
    points: usize,
    #[arg(long, default_value_t = 2.0)]
    radius: f32,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
    /// Scale applied to every Gaussian's extent.
    #[arg(long, default_value_t = 1.0)]
    multiplier: f32,
    #[arg(long, default_value_t = 4)]
    bits_per_pass: u32,
    /// Query grid points per axis.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..=256))]
    overlay_resolution: u32,
    #[arg(long)]
    hide_bbox: bool,
    #[arg(long)]
    hide_query: bool,
    /// Render one frame offscreen and write it to `--output`.
    #[arg(long)]
    headless: bool,
    #[arg(long, default_value = "frame.png")]
    output: PathBuf,
}

impl Args {
    fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            gaussian_multiplier: self.multiplier,
            sort: SortConfig {
                bits_per_pass: self.bits_per_pass,
                ..SortConfig::default()
            },
            ..RendererConfig::default()
        }
    }

    fn overlay_config(&self) -> OverlayConfig {
        OverlayConfig {
            resolution: self.overlay_resolution,
            show_bbox: !self.hide_bbox,
            show_query: !self.hide_query,
            ..OverlayConfig::default()
        }
    }
}

fn render_headless(args: &Args, cloud: &PointCloud) -> anyhow::Result<()> {
    let (device, queue) = pollster::block_on(init_wgpu()).context("no headless GPU device")?;
    let config = args.renderer_config();

    let buffers = cloud.upload(&device)?;
    let camera = CameraBuffer::new(&device);
    let (min, max) = cloud.bbox();
    let center = (min + max) * 0.5;
    let eye = center + Vec3::Z * framing_distance(cloud);
    camera.update(&queue, &Camera::look_at(eye, center).uniform(args.width, args.height));

    let pipeline = SplatPipeline::new(&device, &queue, &buffers, &camera, config)?;
    let overlay = BoundingBoxOverlay::new(
        &device,
        &queue,
        &camera,
        config.color_format,
        args.overlay_config(),
        (min, max),
    );
    let target = OffscreenTarget::new(&device, args.width, args.height, config.color_format);

    pipeline.submit_frame(target.view(), Some(&overlay));
    let rgba = target.read_rgba(&device, &queue)?;
    let visible = pipeline.read_visible_count()?;
    let (width, height) = target.size();
    save_png_rgba8(&args.output, width, height, &rgba)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!(visible, total = cloud.len(), output = %args.output.display(), "frame written");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let cloud = PointCloud::synthetic(args.points, args.radius, args.seed)?;
    info!(points = cloud.len(), seed = args.seed, "generated point cloud");

    if args.headless {
        return render_headless(&args, &cloud);
    }

    let distance = framing_distance(&cloud);
    let mut viewer = Viewer::new(ViewerOptions {
        renderer: args.renderer_config(),
        overlay: args.overlay_config(),
        width: args.width,
        height: args.height,
        distance,
        cloud,
    });
    let event_loop = EventLoop::new()?;
    event_loop.run_app(&mut viewer)?;
    match viewer.take_error() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
