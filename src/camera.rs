use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Camera block shared by every pass. Matrices are column-major, matching WGSL `mat4x4<f32>`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct CameraUniform {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    pub position: [f32; 4],
    pub viewport: [f32; 2],
    pub focal: [f32; 2],
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fovy: f32,
    pub znear: f32,
    pub zfar: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fovy: 45f32.to_radians(),
            znear: 0.1,
            zfar: 1000.0,
        }
    }
}

impl Camera {
    pub fn look_at(eye: Vec3, target: Vec3) -> Self {
        Self {
            eye,
            target,
            ..Self::default()
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    pub fn projection_matrix(&self, width: u32, height: u32) -> Mat4 {
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        Mat4::perspective_rh(self.fovy, aspect, self.znear, self.zfar)
    }

    pub fn uniform(&self, width: u32, height: u32) -> CameraUniform {
        let view = self.view_matrix();
        let proj = self.projection_matrix(width, height);
        let viewport = [width.max(1) as f32, height.max(1) as f32];
        CameraUniform {
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            view_proj: (proj * view).to_cols_array_2d(),
            position: self.eye.extend(1.0).to_array(),
            viewport,
            // Pixels per unit of (view-space x / depth).
            focal: [
                proj.x_axis.x * viewport[0] * 0.5,
                proj.y_axis.y * viewport[1] * 0.5,
            ],
        }
    }
}

/// Spherical-coordinate camera state driven by the viewer's pointer input.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub distance: f32,
    initial_target: Vec3,
    initial_distance: f32,
}

impl OrbitCamera {
    const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

    pub fn new(target: Vec3, distance: f32) -> Self {
        Self {
            target,
            yaw: 0.0,
            pitch: 0.0,
            distance,
            initial_target: target,
            initial_distance: distance,
        }
    }

    pub fn eye(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        self.target + self.distance * Vec3::new(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw)
    }

    pub fn rotate(&mut self, dx: f32, dy: f32) {
        self.yaw -= dx * 0.005;
        self.pitch = (self.pitch + dy * 0.005).clamp(-Self::PITCH_LIMIT, Self::PITCH_LIMIT);
    }

    pub fn zoom(&mut self, delta: f32) {
        self.distance = (self.distance * (1.0 - delta * 0.1)).max(0.05);
    }

    pub fn pan(&mut self, dx: f32, dy: f32) {
        let forward = (self.target - self.eye()).normalize_or_zero();
        let right = forward.cross(Vec3::Y).normalize_or_zero();
        let up = right.cross(forward);
        let scale = self.distance * 0.001;
        self.target += (-right * dx + up * dy) * scale;
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.initial_target, self.initial_distance);
    }

    pub fn camera(&self) -> Camera {
        Camera::look_at(self.eye(), self.target)
    }
}
