//! Anisotropic splat primitive

use glam::{Mat3, Quat, Vec3};

/// Number of spherical-harmonics coefficients per color channel at the
/// maximum supported degree.
pub const SH_COEFF_COUNT: usize = 16;

/// Highest spherical-harmonics degree the splat layout can hold.
pub const MAX_SH_DEGREE: u32 = 3;

/// Number of SH coefficients active at a given degree.
pub fn sh_coeffs_for_degree(degree: u32) -> usize {
    ((degree + 1) * (degree + 1)) as usize
}

/// Numerically stable logistic function.
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Inverse of [`sigmoid`]. Input is clamped away from 0 and 1 so the
/// result stays finite.
pub fn inverse_sigmoid(x: f32) -> f32 {
    let x = x.clamp(1e-6, 1.0 - 1e-6);
    (x / (1.0 - x)).ln()
}

/// A single anisotropic scene primitive
///
/// Scale is stored in log-space and opacity as a logit so unconstrained
/// gradient updates keep both in their valid ranges. The SH array is sized
/// for degree 3; the active degree decides how many entries a renderer
/// actually reads, with slot 0 holding the DC color term.
#[derive(Debug, Clone, PartialEq)]
pub struct Splat {
    /// World-space center
    pub position: Vec3,
    /// Orientation of the anisotropic footprint
    pub rotation: Quat,
    /// Per-axis scale, log-space
    pub log_scale: Vec3,
    /// Opacity, logit-space
    pub opacity_logit: f32,
    /// Spherical-harmonics color coefficients, RGB per coefficient
    pub sh: [[f32; 3]; SH_COEFF_COUNT],
}

impl Splat {
    /// Create a splat at `position` with an isotropic real-space scale,
    /// a DC color, and a real-space opacity.
    pub fn new(position: Vec3, scale: f32, color: [f32; 3], opacity: f32) -> Self {
        let mut sh = [[0.0; 3]; SH_COEFF_COUNT];
        sh[0] = color;
        Self {
            position,
            rotation: Quat::IDENTITY,
            log_scale: Vec3::splat(scale.max(1e-7).ln()),
            opacity_logit: inverse_sigmoid(opacity),
            sh,
        }
    }

    /// Real-space per-axis scale.
    pub fn scale(&self) -> Vec3 {
        Vec3::new(
            self.log_scale.x.exp(),
            self.log_scale.y.exp(),
            self.log_scale.z.exp(),
        )
    }

    /// Largest real-space scale axis.
    pub fn max_scale(&self) -> f32 {
        self.scale().max_element()
    }

    /// Real-space opacity in `[0, 1]`.
    pub fn opacity(&self) -> f32 {
        sigmoid(self.opacity_logit)
    }

    /// Set the real-space opacity, storing its logit.
    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity_logit = inverse_sigmoid(opacity);
    }

    /// DC (view-independent) color term.
    pub fn dc_color(&self) -> [f32; 3] {
        self.sh[0]
    }

    /// Rotation as a 3x3 matrix, for covariance construction.
    pub fn rotation_matrix(&self) -> Mat3 {
        Mat3::from_quat(self.rotation.normalize())
    }
}
