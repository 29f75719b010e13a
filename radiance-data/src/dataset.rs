//! Dataset source contract and train/test split

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::camera::CameraView;

/// Every Nth view is held out for testing when evaluation is enabled.
pub const HOLDOUT_STRIDE: usize = 8;

/// Margin applied to the camera bounding radius when estimating scene
/// extent.
const EXTENT_MARGIN: f32 = 1.1;

/// Errors raised while loading a dataset
#[derive(Debug, Error)]
pub enum DataError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image decoding error: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error("malformed dataset: {0}")]
    Malformed(String),
    #[error("missing calibration data: {0}")]
    MissingCalibration(String),
}

/// Device the renderer should keep per-view tensors on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataDevice {
    #[default]
    Cuda,
    Cpu,
}

/// Options applied while loading a dataset
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Resolution selector: -1 keeps native resolution, a positive value
    /// divides both image dimensions by it
    pub resolution: i32,
    /// Where the renderer should place view data
    pub device: DataDevice,
    /// Composite targets over white instead of black
    pub white_background: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            resolution: -1,
            device: DataDevice::Cuda,
            white_background: false,
        }
    }
}

impl LoadOptions {
    /// Downscale divisor implied by the resolution selector.
    pub fn resolution_divisor(&self) -> u32 {
        if self.resolution > 0 {
            self.resolution as u32
        } else {
            1
        }
    }
}

/// Sparse reconstruction points used to seed the scene
#[derive(Debug, Clone, Default)]
pub struct ScenePoints {
    pub positions: Vec<Vec3>,
    /// RGB in `[0, 1]`, keyed 1:1 with `positions`
    pub colors: Vec<[f32; 3]>,
}

impl ScenePoints {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn push(&mut self, position: Vec3, color: [f32; 3]) {
        self.positions.push(position);
        self.colors.push(color);
    }
}

/// Everything a training run needs from a dataset
#[derive(Debug, Clone)]
pub struct SceneInputs {
    pub views: ViewSet,
    pub points: ScenePoints,
}

/// Loads calibrated views and seed points from a dataset directory
///
/// Implementations own the on-disk format (COLMAP and friends). Malformed
/// or missing calibration surfaces as [`DataError`] and is fatal at run
/// startup.
pub trait SceneSource {
    fn load(&self, source_path: &Path, options: &LoadOptions) -> Result<SceneInputs, DataError>;
}

/// An ordered set of calibrated views with a deterministic train/test
/// split
#[derive(Debug, Clone, Default)]
pub struct ViewSet {
    views: Vec<CameraView>,
}

impl ViewSet {
    pub fn new(views: Vec<CameraView>) -> Self {
        Self { views }
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn views(&self) -> &[CameraView] {
        &self.views
    }

    pub fn get(&self, index: usize) -> Option<&CameraView> {
        self.views.get(index)
    }

    /// Indices of training views. With `eval` enabled every
    /// [`HOLDOUT_STRIDE`]th view is held out; otherwise every view trains.
    pub fn train_indices(&self, eval: bool) -> Vec<usize> {
        (0..self.views.len())
            .filter(|i| !eval || i % HOLDOUT_STRIDE != 0)
            .collect()
    }

    /// Indices of held-out test views; empty when `eval` is disabled.
    pub fn test_indices(&self, eval: bool) -> Vec<usize> {
        if !eval {
            return Vec::new();
        }
        (0..self.views.len())
            .filter(|i| i % HOLDOUT_STRIDE == 0)
            .collect()
    }

    /// Scene extent estimated from camera placement: the maximum distance
    /// of any camera center from their mean, with a small margin. Zero for
    /// an empty set.
    pub fn camera_extent(&self) -> f32 {
        if self.views.is_empty() {
            return 0.0;
        }
        let centers: Vec<Vec3> = self.views.iter().map(|v| v.camera_center()).collect();
        let mean = centers.iter().copied().sum::<Vec3>() / centers.len() as f32;
        let radius = centers
            .iter()
            .map(|c| (*c - mean).length())
            .fold(0.0_f32, f32::max);
        let extent = radius * EXTENT_MARGIN;
        debug!(views = self.views.len(), extent, "estimated camera extent");
        extent
    }
}
