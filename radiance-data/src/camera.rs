//! Calibrated camera views

use glam::{Quat, Vec3};
use image::RgbImage;

/// Pinhole intrinsics in pixel units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    /// Focal length along x, pixels
    pub fx: f32,
    /// Focal length along y, pixels
    pub fy: f32,
    /// Principal point x, pixels
    pub cx: f32,
    /// Principal point y, pixels
    pub cy: f32,
    /// Image width, pixels
    pub width: u32,
    /// Image height, pixels
    pub height: u32,
}

impl Intrinsics {
    /// Horizontal field of view in radians.
    pub fn fov_x(&self) -> f32 {
        2.0 * (self.width as f32 / (2.0 * self.fx)).atan()
    }

    /// Vertical field of view in radians.
    pub fn fov_y(&self) -> f32 {
        2.0 * (self.height as f32 / (2.0 * self.fy)).atan()
    }

    /// Intrinsics for an image downscaled by `divisor`.
    pub fn downscaled(&self, divisor: u32) -> Self {
        let divisor = divisor.max(1);
        let d = divisor as f32;
        Self {
            fx: self.fx / d,
            fy: self.fy / d,
            cx: self.cx / d,
            cy: self.cy / d,
            width: (self.width / divisor).max(1),
            height: (self.height / divisor).max(1),
        }
    }
}

/// One calibrated view: world-to-camera pose, intrinsics, and the target
/// photograph the run optimizes against
#[derive(Debug, Clone)]
pub struct CameraView {
    /// Name of the source image, used in logs and manifests
    pub name: String,
    /// Pinhole intrinsics
    pub intrinsics: Intrinsics,
    /// World-to-camera rotation
    pub rotation: Quat,
    /// World-to-camera translation
    pub translation: Vec3,
    /// Target RGB image
    pub image: RgbImage,
}

impl CameraView {
    /// Camera center in world space.
    pub fn camera_center(&self) -> Vec3 {
        self.rotation.inverse() * -self.translation
    }

    /// Image dimensions (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_at(center: Vec3) -> CameraView {
        // identity rotation, so translation is just -center
        CameraView {
            name: "test".to_string(),
            intrinsics: Intrinsics {
                fx: 100.0,
                fy: 100.0,
                cx: 50.0,
                cy: 50.0,
                width: 100,
                height: 100,
            },
            rotation: Quat::IDENTITY,
            translation: -center,
            image: RgbImage::new(4, 4),
        }
    }

    #[test]
    fn test_camera_center_inverts_pose() {
        let v = view_at(Vec3::new(1.0, 2.0, 3.0));
        let c = v.camera_center();
        assert!((c - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-5);
    }

    #[test]
    fn test_fov_from_focal_length() {
        let i = Intrinsics {
            fx: 50.0,
            fy: 50.0,
            cx: 50.0,
            cy: 50.0,
            width: 100,
            height: 100,
        };
        // width / (2 fx) = 1.0 -> fov_x = 2 * atan(1) = pi/2
        assert!((i.fov_x() - std::f32::consts::FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn test_downscaled_halves_everything() {
        let i = Intrinsics {
            fx: 100.0,
            fy: 80.0,
            cx: 50.0,
            cy: 40.0,
            width: 100,
            height: 80,
        };
        let half = i.downscaled(2);
        assert_eq!(half.width, 50);
        assert_eq!(half.height, 40);
        assert!((half.fx - 50.0).abs() < 1e-6);
        assert!((half.cy - 20.0).abs() < 1e-6);
    }
}
