use crate::config::RendererConfig;
use crate::error::{Result, SplatError};
use crate::gpu::camera_buffer::CameraBuffer;
use crate::gpu::overlay::BoundingBoxOverlay;
use crate::gpu::preprocess::Preprocess;
use crate::gpu::readback::read_buffer;
use crate::gpu::resources::{DispatchIndirect, DrawIndirect, FrameResources, SortInfo, Splat};
use crate::gpu::sort::RadixSort;
use crate::gpu::splat_render::SplatRender;
use crate::point_cloud::PointCloudBuffers;
use tracing::{debug, info};
use wgpu::{CommandEncoder, ComputePassDescriptor, Device, Queue, SubmissionIndex, TextureView};

/// Per-frame orchestration of preprocess, sort and indirect draw over one
/// uploaded point cloud. Every buffer is sized to the cloud at construction.
pub struct SplatPipeline {
    device: Device,
    queue: Queue,
    config: RendererConfig,
    resources: FrameResources,
    preprocess: Preprocess,
    sort: RadixSort,
    render: SplatRender,
}

impl SplatPipeline {
    /// `camera` stays owned by the caller, who rewrites it before each frame.
    pub fn new(
        device: &Device,
        queue: &Queue,
        cloud: &PointCloudBuffers,
        camera: &CameraBuffer,
        config: RendererConfig,
    ) -> Result<Self> {
        config.sort.validate()?;
        if !(config.gaussian_multiplier >= 0.0) {
            return Err(SplatError::InvalidConfig(format!(
                "gaussian multiplier must be non-negative, got {}",
                config.gaussian_multiplier
            )));
        }

        let resources = FrameResources::new(device, cloud.num_points)?;
        let preprocess = Preprocess::new(device, cloud, camera, &resources, &config)?;
        let sort = RadixSort::new(device, &resources, config.sort)?;
        let render = SplatRender::new(device, camera, &resources, sort.result_side(), config.color_format);

        info!(
            points = cloud.num_points,
            sh_degree = cloud.sh_degree,
            sort_passes = config.sort.pass_count(),
            splat_bytes = resources.splat_buffer.size(),
            "splat pipeline ready"
        );

        Ok(Self {
            device: device.clone(),
            queue: queue.clone(),
            config,
            resources,
            preprocess,
            sort,
            render,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.resources.capacity
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn gaussian_multiplier(&self) -> f32 {
        self.preprocess.settings().gaussian_multiplier
    }

    /// Takes effect for every frame recorded after this call.
    pub fn set_gaussian_multiplier(&mut self, multiplier: f32) {
        let multiplier = multiplier.max(0.0);
        self.config.gaussian_multiplier = multiplier;
        self.preprocess.set_gaussian_multiplier(&self.queue, multiplier);
    }

    /// Records one full frame into `encoder`: counter reset, preprocessing,
    /// indirect argument preparation, every sort pass, the indirect draw
    /// (clearing `target`), then the overlay if one is given.
    pub fn frame(&self, encoder: &mut CommandEncoder, target: &TextureView, overlay: Option<&BoundingBoxOverlay>) {
        // Only the visible count; capacity stays.
        encoder.clear_buffer(&self.resources.sort_info_buffer, 0, Some(size_of::<u32>() as u64));
        {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("preprocess and sort pass"),
                ..Default::default()
            });
            self.preprocess.record(&mut pass);
            self.sort.record(&mut pass, &self.resources.dispatch_args_buffer);
        }
        self.render.record(
            encoder,
            target,
            self.config.clear_color,
            &self.resources.draw_args_buffer,
        );
        if let Some(overlay) = overlay {
            overlay.record(encoder, target);
        }
    }

    /// Records and submits one frame without waiting for the device.
    pub fn submit_frame(&self, target: &TextureView, overlay: Option<&BoundingBoxOverlay>) -> SubmissionIndex {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("splat frame encoder"),
        });
        self.frame(&mut encoder, target, overlay);
        self.queue.submit([encoder.finish()])
    }

    fn read<T: bytemuck::Pod>(&self, buffer: &wgpu::Buffer, count: u32) -> Result<Vec<T>> {
        read_buffer(&self.device, &self.queue, buffer, count as u64 * size_of::<T>() as u64)
    }

    /// Visible count of the last submitted frame. A count above capacity is
    /// a sizing bug and reported as an invariant violation.
    pub fn read_visible_count(&self) -> Result<u32> {
        let info = self
            .read::<SortInfo>(&self.resources.sort_info_buffer, 1)?
            .into_iter()
            .next()
            .ok_or(SplatError::ReadbackChannelClosed)?;
        let visible = within_capacity("visible count", info.keys_size, self.capacity())?;
        debug!(visible, "read visible count");
        Ok(visible)
    }

    pub fn read_draw_args(&self) -> Result<DrawIndirect> {
        let args = self
            .read::<DrawIndirect>(&self.resources.draw_args_buffer, 1)?
            .into_iter()
            .next()
            .ok_or(SplatError::ReadbackChannelClosed)?;
        within_capacity("instance count", args.instance_count, self.capacity())?;
        Ok(args)
    }

    pub fn read_dispatch_args(&self) -> Result<DispatchIndirect> {
        self.read::<DispatchIndirect>(&self.resources.dispatch_args_buffer, 1)?
            .into_iter()
            .next()
            .ok_or(SplatError::ReadbackChannelClosed)
    }

    /// Slots in draw order, from the ping-pong side the last sort pass wrote.
    pub fn read_sorted_slots(&self) -> Result<Vec<u32>> {
        let visible = self.read_visible_count()?;
        self.read(&self.resources.vals[self.sort.result_side()], visible)
    }

    pub fn read_sorted_keys(&self) -> Result<Vec<u32>> {
        let visible = self.read_visible_count()?;
        self.read(&self.resources.keys[self.sort.result_side()], visible)
    }

    /// Descriptors in slot order.
    pub fn read_splats(&self) -> Result<Vec<Splat>> {
        let visible = self.read_visible_count()?;
        self.read(&self.resources.splat_buffer, visible)
    }

    /// Original Gaussian indices in draw order (farthest first).
    pub fn read_draw_order(&self) -> Result<Vec<u32>> {
        let splats = self.read_splats()?;
        let slots = self.read_sorted_slots()?;
        slots
            .iter()
            .map(|&slot| {
                splats.get(slot as usize).map(|s| s.gaussian_index).ok_or_else(|| {
                    SplatError::InvariantViolation(format!("sorted slot {slot} out of range"))
                })
            })
            .collect()
    }
}

/// A device-written count above the buffer capacity is a sizing bug.
fn within_capacity(what: &str, count: u32, capacity: u32) -> Result<u32> {
    if count > capacity {
        return Err(SplatError::InvariantViolation(format!(
            "{what} {count} exceeds capacity {capacity}"
        )));
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::config::{OverlayConfig, SortConfig};
    use crate::gpu::init::init_wgpu;
    use crate::gpu::offscreen::OffscreenTarget;
    use crate::point_cloud::{Gaussian, PointCloud};
    use crate::reference::{self, ProjectionSettings};
    use bytemuck::Zeroable;
    use glam::Vec3;

    const WIDTH: u32 = 64;
    const HEIGHT: u32 = 48;

    fn gpu() -> Option<(Device, Queue)> {
        match pollster::block_on(init_wgpu()) {
            Ok(pair) => Some(pair),
            Err(err) => {
                eprintln!("skipping GPU test: {err}");
                None
            }
        }
    }

    struct Scene {
        device: Device,
        queue: Queue,
        camera: CameraBuffer,
        pipeline: SplatPipeline,
        target: OffscreenTarget,
    }

    impl Scene {
        fn new(device: Device, queue: Queue, cloud: &PointCloud, eye: Vec3, config: RendererConfig) -> Self {
            let buffers = cloud.upload(&device).unwrap();
            let camera = CameraBuffer::new(&device);
            camera.update(&queue, &Camera::look_at(eye, Vec3::ZERO).uniform(WIDTH, HEIGHT));
            let pipeline = SplatPipeline::new(&device, &queue, &buffers, &camera, config).unwrap();
            let target = OffscreenTarget::new(&device, WIDTH, HEIGHT, config.color_format);
            Self {
                device,
                queue,
                camera,
                pipeline,
                target,
            }
        }

        fn run(&self) {
            self.pipeline.submit_frame(self.target.view(), None);
        }
    }

    fn cloud_at_depths(depths: &[f32]) -> PointCloud {
        let gaussians = depths
            .iter()
            .map(|&d| Gaussian::isotropic(Vec3::new(0.0, 0.0, 5.0 - d), 0.05, 0.8))
            .collect::<Vec<_>>();
        PointCloud::from_colored(gaussians, &vec![[0.8, 0.8, 0.8]; depths.len()]).unwrap()
    }

    fn assert_args_match(pipeline: &SplatPipeline, visible: u32) {
        let draw = pipeline.read_draw_args().unwrap();
        assert_eq!(draw.instance_count, visible);
        assert_eq!(draw.vertex_count, 4);
        let dispatch = pipeline.read_dispatch_args().unwrap();
        assert_eq!(dispatch.x, pipeline.config().sort.block_count(visible));
    }

    #[test]
    fn counts_above_capacity_are_invariant_violations() {
        let mut info = SortInfo::zeroed();
        info.capacity = 8;
        info.keys_size = 9;
        let err = within_capacity("visible count", info.keys_size, info.capacity).unwrap_err();
        assert!(matches!(err, SplatError::InvariantViolation(msg) if msg.contains("9 exceeds capacity 8")));

        info.keys_size = 8;
        assert_eq!(within_capacity("visible count", info.keys_size, info.capacity).unwrap(), 8);

        let draw = DrawIndirect {
            vertex_count: 4,
            instance_count: 3,
            first_vertex: 0,
            first_instance: 0,
        };
        assert!(within_capacity("instance count", draw.instance_count, 2).is_err());
        assert_eq!(within_capacity("instance count", draw.instance_count, 3).unwrap(), 3);
    }

    #[test]
    fn three_points_draw_far_to_near() {
        let Some((device, queue)) = gpu() else { return };
        let scene = Scene::new(
            device,
            queue,
            &cloud_at_depths(&[1.0, 5.0, 3.0]),
            Vec3::new(0.0, 0.0, 5.0),
            RendererConfig::default(),
        );
        scene.run();
        assert_eq!(scene.pipeline.read_visible_count().unwrap(), 3);
        assert_args_match(&scene.pipeline, 3);
        assert_eq!(scene.pipeline.read_draw_order().unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn empty_cloud_draws_nothing() {
        let Some((device, queue)) = gpu() else { return };
        let cloud = PointCloud::from_colored(vec![], &[]).unwrap();
        let scene = Scene::new(device, queue, &cloud, Vec3::new(0.0, 0.0, 5.0), RendererConfig::default());
        scene.run();
        assert_eq!(scene.pipeline.read_visible_count().unwrap(), 0);
        assert_args_match(&scene.pipeline, 0);
        assert!(scene.pipeline.read_sorted_slots().unwrap().is_empty());
    }

    #[test]
    fn single_point_is_trivially_sorted() {
        let Some((device, queue)) = gpu() else { return };
        let scene = Scene::new(
            device,
            queue,
            &cloud_at_depths(&[2.0]),
            Vec3::new(0.0, 0.0, 5.0),
            RendererConfig::default(),
        );
        scene.run();
        assert_eq!(scene.pipeline.read_visible_count().unwrap(), 1);
        assert_args_match(&scene.pipeline, 1);
        assert_eq!(scene.pipeline.read_draw_order().unwrap(), vec![0]);
    }

    #[test]
    fn points_behind_camera_are_culled() {
        let Some((device, queue)) = gpu() else { return };
        let scene = Scene::new(
            device,
            queue,
            &cloud_at_depths(&[1.0, 5.0, 3.0]),
            Vec3::new(0.0, 0.0, 5.0),
            RendererConfig::default(),
        );
        scene.run();
        assert_eq!(scene.pipeline.read_visible_count().unwrap(), 3);

        // Look away from the cloud.
        let away = Camera::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::new(0.0, 0.0, 10.0));
        scene.camera.update(&scene.queue, &away.uniform(WIDTH, HEIGHT));
        scene.run();
        assert_eq!(scene.pipeline.read_visible_count().unwrap(), 0);
        assert_args_match(&scene.pipeline, 0);
    }

    #[test]
    fn zero_multiplier_culls_every_point() {
        let Some((device, queue)) = gpu() else { return };
        let mut scene = Scene::new(
            device,
            queue,
            &cloud_at_depths(&[1.0, 5.0, 3.0]),
            Vec3::new(0.0, 0.0, 5.0),
            RendererConfig::default(),
        );
        scene.pipeline.set_gaussian_multiplier(0.0);
        scene.run();
        assert_eq!(scene.pipeline.read_visible_count().unwrap(), 0);
        assert_args_match(&scene.pipeline, 0);

        scene.pipeline.set_gaussian_multiplier(1.0);
        scene.run();
        assert_eq!(scene.pipeline.read_visible_count().unwrap(), 3);
    }

    fn keyed_order(pipeline: &SplatPipeline) -> Vec<(u32, u32)> {
        let keys = pipeline.read_sorted_keys().unwrap();
        let order = pipeline.read_draw_order().unwrap();
        assert_eq!(keys.len(), order.len());
        // Equal keys may come out in any slot order.
        let mut pairs: Vec<(u32, u32)> = keys.into_iter().zip(order).collect();
        pairs.sort_unstable();
        pairs
    }

    #[test]
    fn repeated_frames_are_identical() {
        let Some((device, queue)) = gpu() else { return };
        let cloud = PointCloud::synthetic(3000, 2.0, 5).unwrap();
        let scene = Scene::new(device, queue, &cloud, Vec3::new(1.0, 2.0, 6.0), RendererConfig::default());

        scene.run();
        let first_count = scene.pipeline.read_visible_count().unwrap();
        let first_keys = scene.pipeline.read_sorted_keys().unwrap();
        let first = keyed_order(&scene.pipeline);

        scene.run();
        assert_eq!(scene.pipeline.read_visible_count().unwrap(), first_count);
        assert_eq!(scene.pipeline.read_sorted_keys().unwrap(), first_keys);
        assert_eq!(keyed_order(&scene.pipeline), first);
    }

    #[test]
    fn sorted_output_agrees_with_reference() {
        let Some((device, queue)) = gpu() else { return };
        for bits_per_pass in [4, 3] {
            let config = RendererConfig {
                sort: SortConfig {
                    bits_per_pass,
                    ..SortConfig::default()
                },
                ..RendererConfig::default()
            };
            let cloud = PointCloud::synthetic(6000, 3.0, 9).unwrap();
            let eye = Vec3::new(-2.0, 1.5, 5.0);
            let scene = Scene::new(device.clone(), queue.clone(), &cloud, eye, config);
            scene.run();

            let visible = scene.pipeline.read_visible_count().unwrap();
            assert!(visible as usize <= cloud.len());
            assert_args_match(&scene.pipeline, visible);

            let keys = scene.pipeline.read_sorted_keys().unwrap();
            assert!(keys.windows(2).all(|w| w[0] <= w[1]), "keys not ascending");

            let splats = scene.pipeline.read_splats().unwrap();
            let slots = scene.pipeline.read_sorted_slots().unwrap();
            for pair in slots.windows(2) {
                assert!(splats[pair[0] as usize].depth >= splats[pair[1] as usize].depth);
            }

            let camera = Camera::look_at(eye, Vec3::ZERO);
            let expected = reference::project(&cloud, &camera.uniform(WIDTH, HEIGHT), &ProjectionSettings::default());
            let slack = cloud.len() / 100;
            assert!(
                (visible as usize).abs_diff(expected.len()) <= slack,
                "gpu {visible} vs reference {}",
                expected.len()
            );

            let widened = Camera {
                fovy: camera.fovy * 1.001,
                znear: camera.znear * 0.999,
                ..camera
            };
            for splat in &splats {
                let p = cloud.gaussians()[splat.gaussian_index as usize].position();
                assert!(reference::frustum_contains(&widened, WIDTH, HEIGHT, p));
            }
        }
    }

    #[test]
    fn rendered_splat_covers_center_only() {
        let Some((device, queue)) = gpu() else { return };
        let cloud = PointCloud::from_colored(
            vec![Gaussian::isotropic(Vec3::ZERO, 0.2, 0.9)],
            &[[1.0, 1.0, 1.0]],
        )
        .unwrap();
        let scene = Scene::new(device, queue, &cloud, Vec3::new(0.0, 0.0, 5.0), RendererConfig::default());
        scene.run();
        let rgba = scene.target.read_rgba(&scene.device, &scene.queue).unwrap();
        assert_eq!(rgba.len(), (WIDTH * HEIGHT * 4) as usize);

        let pixel = |x: u32, y: u32| {
            let i = ((y * WIDTH + x) * 4) as usize;
            [rgba[i], rgba[i + 1], rgba[i + 2], rgba[i + 3]]
        };
        assert!(pixel(WIDTH / 2, HEIGHT / 2)[0] > 128);
        // Opaque black clear.
        assert_eq!(pixel(0, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn overlay_draws_over_empty_frame() {
        let Some((device, queue)) = gpu() else { return };
        let cloud = PointCloud::from_colored(vec![], &[]).unwrap();
        let scene = Scene::new(device, queue, &cloud, Vec3::new(0.0, 0.0, 5.0), RendererConfig::default());
        let mut overlay = BoundingBoxOverlay::new(
            &scene.device,
            &scene.queue,
            &scene.camera,
            scene.pipeline.config().color_format,
            OverlayConfig {
                show_bbox: false,
                ..OverlayConfig::default()
            },
            (Vec3::splat(-0.5), Vec3::splat(0.5)),
        );

        scene.pipeline.submit_frame(scene.target.view(), Some(&overlay));
        let lit = scene.target.read_rgba(&scene.device, &scene.queue).unwrap();
        let rgb_lit = |rgba: &[u8]| rgba.chunks(4).any(|px| px[..3].iter().any(|&c| c > 0));
        assert!(rgb_lit(&lit));

        overlay.set_show_query(false);
        assert!(!overlay.is_visible());
        scene.pipeline.submit_frame(scene.target.view(), Some(&overlay));
        let dark = scene.target.read_rgba(&scene.device, &scene.queue).unwrap();
        assert!(!rgb_lit(&dark));
    }
}
