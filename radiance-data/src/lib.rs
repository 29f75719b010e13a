//! Radiance Data Crate
//!
//! Calibrated view and dataset types for training runs: camera intrinsics
//! and poses with their target images, the dataset-source contract, the
//! deterministic train/test holdout split, and sparse point-cloud loading
//! for scene seeding. GPU-agnostic; rendering lives behind the training
//! crate's collaborator traits.

pub mod camera;
pub mod dataset;
pub mod ply;

pub use camera::{CameraView, Intrinsics};
pub use dataset::{
    DataDevice, DataError, HOLDOUT_STRIDE, LoadOptions, SceneInputs, ScenePoints, SceneSource,
    ViewSet,
};
pub use ply::load_scene_points;
