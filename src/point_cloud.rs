use crate::error::{Result, SplatError};
use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{Buffer, BufferUsages, Device};

pub const SH_C0: f32 = 0.282_094_8;
pub const MAX_SH_DEGREE: u32 = 3;

/// Per-Gaussian record as laid out in the device buffer (48 bytes).
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Gaussian {
    pub position: [f32; 3],
    /// Activated opacity in `[0, 1]`.
    pub opacity: f32,
    /// Unit quaternion stored as `(w, x, y, z)`.
    pub rotation: [f32; 4],
    pub log_scale: [f32; 3],
    _pad: f32,
}

impl Gaussian {
    pub fn new(position: Vec3, scale: Vec3, rotation: Quat, opacity: f32) -> Self {
        let scale = scale.max(Vec3::splat(f32::MIN_POSITIVE));
        Self {
            position: position.to_array(),
            opacity,
            rotation: [rotation.w, rotation.x, rotation.y, rotation.z],
            log_scale: [scale.x.ln(), scale.y.ln(), scale.z.ln()],
            _pad: 0.0,
        }
    }

    /// Isotropic Gaussian with identity rotation.
    pub fn isotropic(position: Vec3, scale: f32, opacity: f32) -> Self {
        Self::new(position, Vec3::splat(scale), Quat::IDENTITY, opacity)
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn scale(&self) -> Vec3 {
        Vec3::from_array(self.log_scale.map(f32::exp))
    }

    pub fn rotation(&self) -> Quat {
        let [w, x, y, z] = self.rotation;
        Quat::from_xyzw(x, y, z, w)
    }
}

pub fn sh_coefficient_count(degree: u32) -> usize {
    ((degree + 1) * (degree + 1)) as usize
}

/// Converts an RGB color in `[0, 1]` to the zeroth-order SH coefficient.
pub fn rgb_to_sh_dc(rgb: [f32; 3]) -> [f32; 3] {
    rgb.map(|c| (c - 0.5) / SH_C0)
}

/// Immutable Gaussian set with its spherical-harmonics coefficients.
#[derive(Debug, Clone)]
pub struct PointCloud {
    gaussians: Vec<Gaussian>,
    sh_coefficients: Vec<f32>,
    sh_degree: u32,
    bbox_min: Vec3,
    bbox_max: Vec3,
}

impl PointCloud {
    /// `sh_coefficients` holds `(sh_degree + 1)^2` RGB triplets per Gaussian.
    pub fn new(gaussians: Vec<Gaussian>, sh_coefficients: Vec<f32>, sh_degree: u32) -> Result<Self> {
        if sh_degree > MAX_SH_DEGREE {
            return Err(SplatError::InvalidPointCloud(format!(
                "sh degree {sh_degree} exceeds {MAX_SH_DEGREE}"
            )));
        }
        let expected = gaussians.len() * sh_coefficient_count(sh_degree) * 3;
        if sh_coefficients.len() != expected {
            return Err(SplatError::InvalidPointCloud(format!(
                "expected {expected} sh floats for {} gaussians, got {}",
                gaussians.len(),
                sh_coefficients.len()
            )));
        }
        if u32::try_from(gaussians.len()).is_err() {
            return Err(SplatError::InvalidPointCloud(format!(
                "{} gaussians do not fit a u32 index",
                gaussians.len()
            )));
        }

        let (bbox_min, bbox_max) = bounds(&gaussians);
        Ok(Self {
            gaussians,
            sh_coefficients,
            sh_degree,
            bbox_min,
            bbox_max,
        })
    }

    /// Degree-0 cloud where each Gaussian gets one flat color.
    pub fn from_colored(gaussians: Vec<Gaussian>, colors: &[[f32; 3]]) -> Result<Self> {
        if colors.len() != gaussians.len() {
            return Err(SplatError::InvalidPointCloud(format!(
                "{} colors for {} gaussians",
                colors.len(),
                gaussians.len()
            )));
        }
        let sh = colors.iter().flat_map(|c| rgb_to_sh_dc(*c)).collect();
        Self::new(gaussians, sh, 0)
    }

    /// Deterministic random cloud inside a sphere of `radius`.
    pub fn synthetic(count: usize, radius: f32, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut gaussians = Vec::with_capacity(count);
        let mut colors = Vec::with_capacity(count);
        while gaussians.len() < count {
            let p = Vec3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            );
            if p.length_squared() > 1.0 {
                continue;
            }
            let scale = Vec3::new(
                rng.random_range(0.005..0.04),
                rng.random_range(0.005..0.04),
                rng.random_range(0.005..0.04),
            ) * radius;
            let rotation = Quat::from_xyzw(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            )
            .normalize();
            let opacity = rng.random_range(0.3..1.0);
            gaussians.push(Gaussian::new(p * radius, scale, rotation, opacity));
            // Color by direction so structure is visible when orbiting.
            let dir = p.normalize_or_zero() * 0.5 + Vec3::splat(0.5);
            colors.push(dir.to_array());
        }
        Self::from_colored(gaussians, &colors)
    }

    pub fn len(&self) -> usize {
        self.gaussians.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaussians.is_empty()
    }

    pub fn gaussians(&self) -> &[Gaussian] {
        &self.gaussians
    }

    pub fn sh_coefficients(&self) -> &[f32] {
        &self.sh_coefficients
    }

    pub fn sh_degree(&self) -> u32 {
        self.sh_degree
    }

    pub fn bbox(&self) -> (Vec3, Vec3) {
        (self.bbox_min, self.bbox_max)
    }

    /// Coefficients of Gaussian `index` as RGB triplets, or `None` past the end.
    pub fn sh_of(&self, index: usize) -> Option<&[f32]> {
        let stride = sh_coefficient_count(self.sh_degree) * 3;
        self.sh_coefficients.get(index * stride..(index + 1) * stride)
    }

    pub fn upload(&self, device: &Device) -> Result<PointCloudBuffers> {
        let limits = device.limits();
        let gaussian_bytes = std::mem::size_of_val(self.gaussians.as_slice()) as u64;
        let sh_bytes = std::mem::size_of_val(self.sh_coefficients.as_slice()) as u64;
        for (label, bytes) in [("gaussian buffer", gaussian_bytes), ("sh buffer", sh_bytes)] {
            check_storage_size(&limits, label, bytes)?;
        }

        // Empty clouds still bind a valid buffer.
        let zero = Gaussian::zeroed();
        let gaussian_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("gaussian buffer"),
            contents: if self.gaussians.is_empty() {
                bytemuck::bytes_of(&zero)
            } else {
                bytemuck::cast_slice(&self.gaussians)
            },
            usage: BufferUsages::STORAGE,
        });
        let sh_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("sh buffer"),
            contents: if self.sh_coefficients.is_empty() {
                bytemuck::bytes_of(&[0f32; 4])
            } else {
                bytemuck::cast_slice(&self.sh_coefficients)
            },
            usage: BufferUsages::STORAGE,
        });
        info!(
            points = self.len(),
            sh_degree = self.sh_degree,
            gaussian_bytes,
            sh_bytes,
            "uploaded point cloud"
        );

        Ok(PointCloudBuffers {
            gaussian_buffer,
            sh_buffer,
            num_points: self.len() as u32,
            sh_degree: self.sh_degree,
            bbox_min: self.bbox_min,
            bbox_max: self.bbox_max,
        })
    }
}

/// Device copy of a [`PointCloud`]; read-only for the lifetime of the pipeline.
#[derive(Debug)]
pub struct PointCloudBuffers {
    pub gaussian_buffer: Buffer,
    pub sh_buffer: Buffer,
    pub num_points: u32,
    pub sh_degree: u32,
    pub bbox_min: Vec3,
    pub bbox_max: Vec3,
}

pub(crate) fn check_storage_size(limits: &wgpu::Limits, label: &'static str, bytes: u64) -> Result<u64> {
    let limit = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
    if bytes > limit {
        return Err(SplatError::CapacityExceeded {
            label,
            requested: bytes,
            limit,
        });
    }
    Ok(bytes)
}

fn bounds(gaussians: &[Gaussian]) -> (Vec3, Vec3) {
    if gaussians.is_empty() {
        return (Vec3::ZERO, Vec3::ZERO);
    }
    gaussians.iter().fold(
        (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
        |(min, max), g| (min.min(g.position()), max.max(g.position())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_record_is_48_bytes() {
        assert_eq!(size_of::<Gaussian>(), 48);
    }

    #[test]
    fn scale_round_trips_through_log() {
        let g = Gaussian::new(Vec3::ZERO, Vec3::new(0.5, 2.0, 1.0), Quat::IDENTITY, 1.0);
        assert!((g.scale() - Vec3::new(0.5, 2.0, 1.0)).length() < 1e-5);
        assert_eq!(g.rotation, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn rejects_mismatched_sh_length() {
        let gaussians = vec![Gaussian::isotropic(Vec3::ZERO, 0.1, 1.0)];
        let err = PointCloud::new(gaussians, vec![0.0; 5], 0).unwrap_err();
        assert!(matches!(err, SplatError::InvalidPointCloud(_)));
    }

    #[test]
    fn rejects_high_sh_degree() {
        assert!(PointCloud::new(vec![], vec![], 4).is_err());
    }

    #[test]
    fn bounds_cover_all_positions() {
        let cloud = PointCloud::from_colored(
            vec![
                Gaussian::isotropic(Vec3::new(-1.0, 2.0, 0.0), 0.1, 1.0),
                Gaussian::isotropic(Vec3::new(3.0, -4.0, 5.0), 0.1, 1.0),
            ],
            &[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        )
        .unwrap();
        let (min, max) = cloud.bbox();
        assert_eq!(min, Vec3::new(-1.0, -4.0, 0.0));
        assert_eq!(max, Vec3::new(3.0, 2.0, 5.0));
    }

    #[test]
    fn synthetic_is_deterministic() {
        let a = PointCloud::synthetic(64, 2.0, 7).unwrap();
        let b = PointCloud::synthetic(64, 2.0, 7).unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a.gaussians(), b.gaussians());
        assert!(a.gaussians().iter().all(|g| g.position().length() <= 2.0 + 1e-4));
        assert_eq!(a.sh_of(3).map(<[f32]>::len), Some(3));
        assert_eq!(a.sh_of(64), None);
    }

    #[test]
    fn empty_cloud_uploads_placeholder_buffers() {
        let Ok((device, _queue)) = pollster::block_on(crate::gpu::init::init_wgpu()) else {
            eprintln!("skipping GPU test: no adapter");
            return;
        };
        let cloud = PointCloud::from_colored(vec![], &[]).unwrap();
        let buffers = cloud.upload(&device).unwrap();
        assert_eq!(buffers.num_points, 0);
        assert_eq!(buffers.gaussian_buffer.size(), size_of::<Gaussian>() as u64);
        assert_eq!(buffers.sh_buffer.size(), 16);
    }

    #[test]
    fn dc_coefficient_recovers_color() {
        let sh = rgb_to_sh_dc([0.2, 0.5, 0.9]);
        let rgb = sh.map(|c| c * SH_C0 + 0.5);
        assert!((rgb[0] - 0.2).abs() < 1e-5);
        assert!((rgb[2] - 0.9).abs() < 1e-5);
    }
}
