//! Host-side model of the device passes: projection and culling, depth keys, and the
//! per-block radix sort. GPU tests compare read-back buffers against it.

use crate::camera::{Camera, CameraUniform};
use crate::config::SortConfig;
use crate::point_cloud::{Gaussian, PointCloud, SH_C0};
use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec3Swizzles, Vec4Swizzles};
use std::mem::swap;

/// Screen-space dilation added to the projected covariance diagonal, in px².
pub const LOW_PASS: f32 = 0.3;
/// Raw projected covariance trace at or below which a footprint is degenerate.
pub const MIN_FOOTPRINT: f32 = 1e-8;
pub const MIN_OPACITY: f32 = 1.0 / 255.0;

const SH_C1: f32 = 0.488_602_5;
const SH_C2: [f32; 5] = [1.092_548_4, -1.092_548_4, 0.315_391_57, -1.092_548_4, 0.546_274_2];
const SH_C3: [f32; 7] = [
    -0.590_043_6,
    2.890_611_4,
    -0.457_045_8,
    0.373_176_33,
    -0.457_045_8,
    1.445_305_7,
    -0.590_043_6,
];

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ProjectionSettings {
    pub gaussian_multiplier: f32,
    pub cull_margin: f32,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            gaussian_multiplier: 1.0,
            cull_margin: 1.0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ProjectedSplat {
    pub gaussian_index: u32,
    pub center_ndc: Vec2,
    pub extent: Vec2,
    pub conic: Vec3,
    pub opacity: f32,
    pub color: Vec3,
    pub depth: f32,
    pub key: u32,
}

/// Maps view depth to a key whose ascending order is descending depth.
pub fn depth_sort_key(depth: f32) -> u32 {
    let bits = depth.to_bits();
    let ordered = if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    };
    !ordered
}

pub fn eval_sh(degree: u32, sh: &[f32], dir: Vec3) -> Vec3 {
    let coef = |k: usize| Vec3::new(sh[k * 3], sh[k * 3 + 1], sh[k * 3 + 2]);
    let mut result = SH_C0 * coef(0);
    if degree > 0 {
        let Vec3 { x, y, z } = dir;
        result += -SH_C1 * y * coef(1) + SH_C1 * z * coef(2) - SH_C1 * x * coef(3);
        if degree > 1 {
            let (xx, yy, zz) = (x * x, y * y, z * z);
            let (xy, yz, xz) = (x * y, y * z, x * z);
            result += SH_C2[0] * xy * coef(4)
                + SH_C2[1] * yz * coef(5)
                + SH_C2[2] * (2.0 * zz - xx - yy) * coef(6)
                + SH_C2[3] * xz * coef(7)
                + SH_C2[4] * (xx - yy) * coef(8);
            if degree > 2 {
                result += SH_C3[0] * y * (3.0 * xx - yy) * coef(9)
                    + SH_C3[1] * xy * z * coef(10)
                    + SH_C3[2] * y * (4.0 * zz - xx - yy) * coef(11)
                    + SH_C3[3] * z * (2.0 * zz - 3.0 * xx - 3.0 * yy) * coef(12)
                    + SH_C3[4] * x * (4.0 * zz - xx - yy) * coef(13)
                    + SH_C3[5] * z * (xx - yy) * coef(14)
                    + SH_C3[6] * x * (xx - 3.0 * yy) * coef(15);
            }
        }
    }
    (result + Vec3::splat(0.5)).max(Vec3::ZERO)
}

pub fn project_gaussian(
    index: u32,
    gaussian: &Gaussian,
    sh: &[f32],
    sh_degree: u32,
    camera: &CameraUniform,
    settings: &ProjectionSettings,
) -> Option<ProjectedSplat> {
    let view = Mat4::from_cols_array_2d(&camera.view);
    let proj = Mat4::from_cols_array_2d(&camera.proj);
    let position = gaussian.position();

    let p_view = view * position.extend(1.0);
    let clip = proj * p_view;
    if !(clip.w > 0.0) {
        return None;
    }
    let ndc = clip.xyz() / clip.w;
    let margin = settings.cull_margin;
    if !(ndc.x.abs() <= margin && ndc.y.abs() <= margin && ndc.z >= 0.0 && ndc.z <= 1.0) {
        return None;
    }
    let depth = -p_view.z;

    let [w, x, y, z] = gaussian.rotation;
    let q = Quat::from_xyzw(x, y, z, w);
    if !(q.length_squared() > 1e-8) {
        return None;
    }
    let scale = Vec3::from_array(gaussian.log_scale.map(f32::exp)) * settings.gaussian_multiplier;
    let m = Mat3::from_quat(q.normalize()) * Mat3::from_diagonal(scale);
    let sigma = m * m.transpose();

    // View rotation with z flipped so depth is positive.
    let flip = Vec3::new(1.0, 1.0, -1.0);
    let w = Mat3::from_cols(
        view.x_axis.xyz() * flip,
        view.y_axis.xyz() * flip,
        view.z_axis.xyz() * flip,
    );
    let [fx, fy] = camera.focal;
    let lim = Vec2::new(camera.viewport[0] / fx, camera.viewport[1] / fy) * 0.5 * 1.3;
    let tx = (p_view.x / depth).clamp(-lim.x, lim.x) * depth;
    let ty = (p_view.y / depth).clamp(-lim.y, lim.y) * depth;
    let j = Mat3::from_cols(
        Vec3::new(fx / depth, 0.0, 0.0),
        Vec3::new(0.0, fy / depth, 0.0),
        Vec3::new(-fx * tx / (depth * depth), -fy * ty / (depth * depth), 0.0),
    );
    let t = j * w;
    let cov = t * sigma * t.transpose();

    let (mut a, b, mut c) = (cov.x_axis.x, cov.y_axis.x, cov.y_axis.y);
    if !(a + c > MIN_FOOTPRINT) {
        return None;
    }
    a += LOW_PASS;
    c += LOW_PASS;
    let det = a * c - b * b;
    if !(det > 0.0) {
        return None;
    }
    let mid = 0.5 * (a + c);
    let lambda = mid + (mid * mid - det).max(0.1).sqrt();
    let radius = (3.0 * lambda.sqrt()).ceil();
    if !(radius > 0.0) {
        return None;
    }

    let opacity = gaussian.opacity.clamp(0.0, 1.0);
    if !(opacity >= MIN_OPACITY) {
        return None;
    }

    let eye = Vec3::new(camera.position[0], camera.position[1], camera.position[2]);
    let color = eval_sh(sh_degree, sh, (position - eye).normalize_or_zero());

    Some(ProjectedSplat {
        gaussian_index: index,
        center_ndc: ndc.xy(),
        extent: Vec2::splat(radius),
        conic: Vec3::new(c / det, -b / det, a / det),
        opacity,
        color,
        depth,
        key: depth_sort_key(depth),
    })
}

/// Visible splats in Gaussian order.
pub fn project(
    cloud: &PointCloud,
    camera: &CameraUniform,
    settings: &ProjectionSettings,
) -> Vec<ProjectedSplat> {
    cloud
        .gaussians()
        .iter()
        .enumerate()
        .filter_map(|(i, g)| {
            let sh = cloud.sh_of(i)?;
            project_gaussian(i as u32, g, sh, cloud.sh_degree(), camera, settings)
        })
        .collect()
}

/// LSD radix sort with the same block/digit layout as the device kernels.
pub fn radix_sort_pairs(pairs: &[(u32, u32)], config: &SortConfig) -> Vec<(u32, u32)> {
    let n = pairs.len();
    let block_size = config.block_size() as usize;
    let num_blocks = n.div_ceil(block_size);
    let mask = config.digit_mask();

    let (mut src_keys, mut src_vals): (Vec<u32>, Vec<u32>) = pairs.iter().copied().unzip();
    let mut dst_keys = vec![0u32; n];
    let mut dst_vals = vec![0u32; n];

    for pass in 0..config.pass_count() {
        let shift = pass * config.bits_per_pass;
        let digit = |k: u32| ((k >> shift) & mask) as usize;

        let mut counts = vec![0u32; config.bin_count() as usize * num_blocks];
        for (i, &k) in src_keys.iter().enumerate() {
            counts[digit(k) * num_blocks + i / block_size] += 1;
        }

        let mut running = 0;
        for c in counts.iter_mut() {
            let v = *c;
            *c = running;
            running += v;
        }

        for (i, (&k, &v)) in src_keys.iter().zip(src_vals.iter()).enumerate() {
            let slot = &mut counts[digit(k) * num_blocks + i / block_size];
            dst_keys[*slot as usize] = k;
            dst_vals[*slot as usize] = v;
            *slot += 1;
        }

        swap(&mut src_keys, &mut dst_keys);
        swap(&mut src_vals, &mut dst_vals);
    }
    src_keys.into_iter().zip(src_vals).collect()
}

/// Gaussian indices in draw order (farthest first).
pub fn back_to_front(
    cloud: &PointCloud,
    camera: &CameraUniform,
    settings: &ProjectionSettings,
    sort: &SortConfig,
) -> Vec<u32> {
    let splats = project(cloud, camera, settings);
    let pairs: Vec<(u32, u32)> = splats.iter().zip(0..).map(|(s, slot)| (s.key, slot)).collect();
    radix_sort_pairs(&pairs, sort)
        .into_iter()
        .map(|(_, slot)| splats[slot as usize].gaussian_index)
        .collect()
}

/// Frustum test from the camera basis and field of view, without the projection matrix.
pub fn frustum_contains(camera: &Camera, width: u32, height: u32, point: Vec3) -> bool {
    let forward = (camera.target - camera.eye).normalize();
    let right = forward.cross(camera.up).normalize();
    let up = right.cross(forward);
    let d = point - camera.eye;
    let z = d.dot(forward);
    if !(z >= camera.znear && z <= camera.zfar) {
        return false;
    }
    let tan_y = (camera.fovy * 0.5).tan();
    let tan_x = tan_y * width.max(1) as f32 / height.max(1) as f32;
    d.dot(right).abs() <= z * tan_x && d.dot(up).abs() <= z * tan_y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point_cloud::PointCloud;
    use rand::Rng;

    const WIDTH: u32 = 640;
    const HEIGHT: u32 = 480;

    fn cloud_at_depths(depths: &[f32]) -> PointCloud {
        let gaussians = depths
            .iter()
            .map(|&d| Gaussian::isotropic(Vec3::new(0.0, 0.0, 5.0 - d), 0.05, 0.8))
            .collect::<Vec<_>>();
        let colors = vec![[0.5, 0.5, 0.5]; depths.len()];
        PointCloud::from_colored(gaussians, &colors).unwrap()
    }

    #[test]
    fn key_order_is_reverse_depth_order() {
        let depths = [-1e30, -3.5, -1.0, -0.0, 0.0, 1e-20, 0.5, 1.0, 3.0, 5.0, 1e30];
        for pair in depths.windows(2) {
            assert!(
                depth_sort_key(pair[0]) > depth_sort_key(pair[1]),
                "{} vs {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn radix_sort_matches_std_sort() {
        let mut rng = rand::rng();
        for bits in [1, 3, 4, 8] {
            let config = SortConfig {
                bits_per_pass: bits,
                workgroup_size: 256,
                rows_per_thread: 2,
            };
            let pairs: Vec<(u32, u32)> = (0..3000).map(|i| (rng.random(), i)).collect();
            let sorted = radix_sort_pairs(&pairs, &config);

            // Stable: equal keys keep their input order.
            let mut expected = pairs.clone();
            expected.sort_by_key(|&(k, _)| k);
            assert_eq!(sorted, expected);
        }
    }

    #[test]
    fn radix_sort_handles_empty_and_single() {
        let config = SortConfig::default();
        assert!(radix_sort_pairs(&[], &config).is_empty());
        assert_eq!(radix_sort_pairs(&[(42, 7)], &config), vec![(42, 7)]);
    }

    #[test]
    fn three_points_are_drawn_far_to_near() {
        let cloud = cloud_at_depths(&[1.0, 5.0, 3.0]);
        let camera = Camera::default().uniform(WIDTH, HEIGHT);
        let settings = ProjectionSettings::default();

        let splats = project(&cloud, &camera, &settings);
        assert_eq!(splats.len(), 3);

        let order = back_to_front(&cloud, &camera, &settings, &SortConfig::default());
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn points_behind_camera_are_culled() {
        let cloud = cloud_at_depths(&[-1.0, -2.0, -10.0]);
        let camera = Camera::default().uniform(WIDTH, HEIGHT);
        assert!(project(&cloud, &camera, &ProjectionSettings::default()).is_empty());
    }

    #[test]
    fn zero_multiplier_culls_everything() {
        let cloud = cloud_at_depths(&[1.0, 5.0, 3.0]);
        let camera = Camera::default().uniform(WIDTH, HEIGHT);
        let settings = ProjectionSettings {
            gaussian_multiplier: 0.0,
            ..ProjectionSettings::default()
        };
        assert!(project(&cloud, &camera, &settings).is_empty());
    }

    #[test]
    fn nan_and_degenerate_records_are_skipped() {
        let mut bad_rotation = Gaussian::isotropic(Vec3::new(0.0, 0.0, 2.0), 0.1, 1.0);
        bad_rotation.rotation = [0.0; 4];
        let gaussians = vec![
            Gaussian::isotropic(Vec3::new(f32::NAN, 0.0, 0.0), 0.1, 1.0),
            bad_rotation,
            Gaussian::isotropic(Vec3::new(0.0, 0.0, 2.0), 0.1, 0.0),
            Gaussian::isotropic(Vec3::new(0.0, 0.0, 2.0), 0.1, 1.0),
        ];
        let cloud = PointCloud::from_colored(gaussians, &[[1.0; 3]; 4]).unwrap();
        let camera = Camera::default().uniform(WIDTH, HEIGHT);
        let splats = project(&cloud, &camera, &ProjectionSettings::default());
        assert_eq!(splats.len(), 1);
        assert_eq!(splats[0].gaussian_index, 3);
    }

    #[test]
    fn culled_points_agree_with_geometric_frustum() {
        let cloud = PointCloud::synthetic(2000, 6.0, 11).unwrap();
        let mut rng = rand::rng();
        for _ in 0..8 {
            let eye = Vec3::new(
                rng.random_range(-8.0..8.0),
                rng.random_range(-8.0..8.0),
                rng.random_range(-8.0..8.0),
            );
            if eye.length() < 0.5 {
                continue;
            }
            let camera = Camera::look_at(eye, Vec3::ZERO);
            let uniform = camera.uniform(WIDTH, HEIGHT);
            let splats = project(&cloud, &uniform, &ProjectionSettings::default());
            assert!(splats.len() <= cloud.len());
            for s in &splats {
                let p = cloud.gaussians()[s.gaussian_index as usize].position();
                // Small slack for float disagreement exactly on a plane.
                let shrunk = Camera {
                    fovy: camera.fovy * 1.0001,
                    ..camera
                };
                assert!(frustum_contains(&shrunk, WIDTH, HEIGHT, p), "{p} outside frustum");
            }
        }
    }

    #[test]
    fn sorted_depths_are_non_increasing() {
        let cloud = PointCloud::synthetic(5000, 3.0, 3).unwrap();
        let camera = Camera::look_at(Vec3::new(2.0, 1.0, 6.0), Vec3::ZERO).uniform(WIDTH, HEIGHT);
        let settings = ProjectionSettings::default();
        let splats = project(&cloud, &camera, &settings);
        let by_index: std::collections::HashMap<u32, f32> =
            splats.iter().map(|s| (s.gaussian_index, s.depth)).collect();
        let order = back_to_front(&cloud, &camera, &settings, &SortConfig::default());
        assert_eq!(order.len(), splats.len());
        for pair in order.windows(2) {
            assert!(by_index[&pair[0]] >= by_index[&pair[1]]);
        }
    }

    #[test]
    fn degree_zero_sh_is_flat_color() {
        let sh = crate::point_cloud::rgb_to_sh_dc([0.25, 0.5, 0.75]);
        let c = eval_sh(0, &sh, Vec3::X);
        assert!((c - Vec3::new(0.25, 0.5, 0.75)).length() < 1e-5);
    }
}
