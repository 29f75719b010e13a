//! Collaborator contracts
//!
//! The renderer/optimizer, the metrics pipeline, and the dataset loader are
//! external to this crate. These traits pin down exactly what the run
//! orchestrator needs from them; everything behind them (rasterization,
//! projection, perceptual metrics) is the collaborator's business.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use radiance_data::CameraView;
use radiance_scene::{GradSample, SceneSnapshot, SplatCollection};

use crate::schedule::LearningRates;

/// Errors from the gradient-step collaborator. Both variants are fatal to
/// the run; the last written checkpoint stays valid for inspection.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("numerical instability: {0}")]
    NumericalInstability(String),
    #[error("render backend failure: {0}")]
    Backend(String),
}

/// Errors from evaluation and export. Never fatal: they are logged and the
/// run continues.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("metrics pipeline failure: {0}")]
    Metrics(String),
    #[error("io error during evaluation: {0}")]
    Io(#[from] std::io::Error),
}

/// Weighting of the photometric objective: `lambda_dssim` on the structural
/// term, the remainder on L1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossWeights {
    pub lambda_dssim: f32,
}

/// Everything the gradient step needs for one iteration
#[derive(Debug)]
pub struct StepInputs<'a> {
    pub iteration: u64,
    /// Training view to render and compare against
    pub view: &'a CameraView,
    pub rates: LearningRates,
    /// Spherical-harmonics degree currently active
    pub active_sh_degree: u32,
    pub loss: LossWeights,
    /// Composite over white instead of black
    pub white_background: bool,
}

/// Result of one gradient step
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub loss: f32,
    /// Per-splat samples, keyed 1:1 with the collection
    pub samples: Vec<GradSample>,
}

/// Opaque serialized optimizer internals, persisted inside checkpoints
///
/// The orchestrator never interprets these bytes; it only guarantees they
/// are saved and restored atomically together with the scene.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizerState(Vec<u8>);

impl OptimizerState {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Differentiable renderer plus optimizer step
///
/// `step` renders the view, compares it with the target image, runs the
/// backward pass, and applies parameter updates at the given rates. It must
/// fully synchronize before returning: the orchestrator reads the returned
/// samples into densification statistics immediately after. The splat count
/// must not change inside a step; structural changes belong to the densify
/// pass and are announced through [`on_scene_rebuilt`](Self::on_scene_rebuilt).
pub trait GradientStep {
    fn step(
        &mut self,
        scene: &mut SplatCollection,
        inputs: &StepInputs<'_>,
    ) -> Result<StepOutput, StepError>;

    /// Snapshot internal optimizer state for checkpointing.
    fn optimizer_state(&self) -> OptimizerState;

    /// Restore internal state from a checkpoint payload.
    fn restore_optimizer(&mut self, state: &OptimizerState) -> Result<(), StepError>;

    /// The scene was structurally rebuilt (clone/split/prune). Per-splat
    /// moments must be rebuilt for `splat_count` splats; global step
    /// counters keep their values.
    fn on_scene_rebuilt(&mut self, splat_count: usize);

    /// All opacities were reset to the floor; opacity moments should
    /// restart so stale momentum does not immediately undo the reset.
    fn on_opacity_reset(&mut self);
}

/// Rendered-quality metrics over held-out views
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub psnr: f32,
    pub ssim: f32,
    pub lpips: f32,
}

/// External metrics pipeline, invoked on scene snapshots at scheduled
/// iterations
pub trait MetricsPipeline {
    fn evaluate(
        &mut self,
        snapshot: &SceneSnapshot,
        views: &[&CameraView],
    ) -> Result<MetricsReport, EvalError>;
}
