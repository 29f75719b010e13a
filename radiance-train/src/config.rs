//! Declarative run configuration
//!
//! A run is described by a JSON document with four sections (`run`,
//! `training`, `schedule`, `densify`). Every field has a documented default
//! so sparse configs stay valid; unknown keys are ignored. The record is
//! validated once before the iteration loop and never mutated afterwards.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use radiance_data::{DataDevice, LoadOptions};

use crate::checkpoint::ResumeTarget;

/// Errors raised while loading or validating a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Optimizer implementation the gradient-step collaborator should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerVariant {
    #[default]
    Default,
    SparseAdam,
}

/// Run identity and filesystem layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSection {
    /// Human-readable run name, required
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Dataset directory handed to the scene source
    #[serde(default)]
    pub source_path: PathBuf,
    /// Run directory: checkpoints, exports, and summaries land here
    #[serde(default)]
    pub model_path: PathBuf,
}

/// Loop-level training options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSection {
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    /// Hold out every 8th view for evaluation
    #[serde(default = "default_true")]
    pub eval: bool,
    /// Resolution selector: -1 native, positive values divide dimensions
    #[serde(default = "default_resolution")]
    pub resolution: i32,
    #[serde(default)]
    pub data_device: DataDevice,
    /// Maximum spherical-harmonics degree to activate
    #[serde(default = "default_sh_degree")]
    pub sh_degree: u32,
    #[serde(default)]
    pub white_background: bool,
    /// Multiplier on the camera-derived scene extent
    #[serde(default = "default_camera_extent_scale")]
    pub camera_extent_scale: f32,
    /// Weight of the structural-similarity loss term
    #[serde(default = "default_lambda_dssim")]
    pub lambda_dssim: f32,
    #[serde(default)]
    pub optimizer_type: OptimizerVariant,
    #[serde(default)]
    pub seed: u64,
    /// Iterations at which the metrics pipeline runs on held-out views
    #[serde(default = "default_eval_iterations")]
    pub test_iterations: Vec<u64>,
    /// Iterations at which the scene is exported as a point cloud
    #[serde(default = "default_eval_iterations")]
    pub save_iterations: Vec<u64>,
    /// Iterations at which a checkpoint is written
    #[serde(default)]
    pub checkpoint_iterations: Vec<u64>,
    #[serde(default)]
    pub resume_training: bool,
    /// Checkpoint to resume from; -1 selects the most recent
    #[serde(default = "default_resume_from")]
    pub resume_from_iteration: i64,
}

/// Learning-rate schedule parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSection {
    #[serde(default = "default_position_lr_init")]
    pub position_lr_init: f32,
    #[serde(default = "default_position_lr_final")]
    pub position_lr_final: f32,
    #[serde(default)]
    pub position_lr_delay_steps: u64,
    #[serde(default = "default_position_lr_delay_mult")]
    pub position_lr_delay_mult: f32,
    #[serde(default = "default_position_lr_max_steps")]
    pub position_lr_max_steps: u64,
    #[serde(default = "default_scaling_lr")]
    pub scaling_lr: f32,
    #[serde(default = "default_rotation_lr")]
    pub rotation_lr: f32,
    #[serde(default = "default_opacity_lr")]
    pub opacity_lr: f32,
    #[serde(default = "default_feature_lr")]
    pub feature_lr: f32,
}

/// Densification and pruning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensifySection {
    /// Average positional gradient above which a splat densifies
    #[serde(default = "default_densify_grad_threshold")]
    pub densify_grad_threshold: f32,
    #[serde(default = "default_densification_interval")]
    pub densification_interval: u64,
    #[serde(default)]
    pub densify_from_iter: u64,
    #[serde(default = "default_densify_until_iter")]
    pub densify_until_iter: u64,
    #[serde(default = "default_opacity_reset_interval")]
    pub opacity_reset_interval: u64,
    /// Size cutoff between clone and split, as a fraction of scene extent
    #[serde(default = "default_percent_dense")]
    pub percent_dense: f32,
    /// Splats below this real-space opacity are pruned
    #[serde(default = "default_min_opacity")]
    pub min_opacity: f32,
    /// Opacity every splat is reset to at reset boundaries
    #[serde(default = "default_opacity_reset_floor")]
    pub opacity_reset_floor: f32,
    /// Screen-radius cap in pixels for footprint pruning
    #[serde(default = "default_max_screen_size")]
    pub max_screen_size: f32,
    /// Growth cap on the collection; 0 means unlimited
    #[serde(default)]
    pub max_splats: usize,
}

fn default_iterations() -> u64 {
    30_000
}
fn default_true() -> bool {
    true
}
fn default_resolution() -> i32 {
    -1
}
fn default_sh_degree() -> u32 {
    3
}
fn default_camera_extent_scale() -> f32 {
    1.0
}
fn default_lambda_dssim() -> f32 {
    0.2
}
fn default_eval_iterations() -> Vec<u64> {
    vec![7_000, 30_000]
}
fn default_resume_from() -> i64 {
    -1
}
fn default_position_lr_init() -> f32 {
    0.000_16
}
fn default_position_lr_final() -> f32 {
    0.000_001_6
}
fn default_position_lr_delay_mult() -> f32 {
    0.01
}
fn default_position_lr_max_steps() -> u64 {
    30_000
}
fn default_scaling_lr() -> f32 {
    0.005
}
fn default_rotation_lr() -> f32 {
    0.001
}
fn default_opacity_lr() -> f32 {
    0.05
}
fn default_feature_lr() -> f32 {
    0.002_5
}
fn default_densify_grad_threshold() -> f32 {
    0.000_2
}
fn default_densification_interval() -> u64 {
    100
}
fn default_densify_until_iter() -> u64 {
    15_000
}
fn default_opacity_reset_interval() -> u64 {
    3_000
}
fn default_percent_dense() -> f32 {
    0.01
}
fn default_min_opacity() -> f32 {
    0.005
}
fn default_opacity_reset_floor() -> f32 {
    0.01
}
fn default_max_screen_size() -> f32 {
    20.0
}

impl Default for TrainingSection {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            eval: true,
            resolution: default_resolution(),
            data_device: DataDevice::default(),
            sh_degree: default_sh_degree(),
            white_background: false,
            camera_extent_scale: default_camera_extent_scale(),
            lambda_dssim: default_lambda_dssim(),
            optimizer_type: OptimizerVariant::default(),
            seed: 0,
            test_iterations: default_eval_iterations(),
            save_iterations: default_eval_iterations(),
            checkpoint_iterations: Vec::new(),
            resume_training: false,
            resume_from_iteration: default_resume_from(),
        }
    }
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            position_lr_init: default_position_lr_init(),
            position_lr_final: default_position_lr_final(),
            position_lr_delay_steps: 0,
            position_lr_delay_mult: default_position_lr_delay_mult(),
            position_lr_max_steps: default_position_lr_max_steps(),
            scaling_lr: default_scaling_lr(),
            rotation_lr: default_rotation_lr(),
            opacity_lr: default_opacity_lr(),
            feature_lr: default_feature_lr(),
        }
    }
}

impl Default for DensifySection {
    fn default() -> Self {
        Self {
            densify_grad_threshold: default_densify_grad_threshold(),
            densification_interval: default_densification_interval(),
            densify_from_iter: 0,
            densify_until_iter: default_densify_until_iter(),
            opacity_reset_interval: default_opacity_reset_interval(),
            percent_dense: default_percent_dense(),
            min_opacity: default_min_opacity(),
            opacity_reset_floor: default_opacity_reset_floor(),
            max_screen_size: default_max_screen_size(),
            max_splats: 0,
        }
    }
}

/// Complete, validated run configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub training: TrainingSection,
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub densify: DensifySection,
}

impl RunConfig {
    /// Parse a config from a JSON file, validate it, and normalize its
    /// iteration lists.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config.normalized())
    }

    /// Reject invalid combinations before any iteration runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.run.name.trim().is_empty() {
            return invalid("run.name must not be empty".into());
        }
        if self.run.source_path.as_os_str().is_empty() {
            return invalid("run.source_path must be set".into());
        }
        if self.run.model_path.as_os_str().is_empty() {
            return invalid("run.model_path must be set".into());
        }
        if self.training.iterations == 0 {
            return invalid("training.iterations must be positive".into());
        }
        if self.training.resolution == 0 || self.training.resolution < -1 {
            return invalid(format!(
                "training.resolution must be -1 or positive, got {}",
                self.training.resolution
            ));
        }
        if self.training.sh_degree > radiance_scene::MAX_SH_DEGREE {
            return invalid(format!(
                "training.sh_degree must be at most {}, got {}",
                radiance_scene::MAX_SH_DEGREE,
                self.training.sh_degree
            ));
        }
        if !(0.0..=1.0).contains(&self.training.lambda_dssim) {
            return invalid(format!(
                "training.lambda_dssim must be in [0, 1], got {}",
                self.training.lambda_dssim
            ));
        }
        if self.training.camera_extent_scale <= 0.0 {
            return invalid("training.camera_extent_scale must be positive".into());
        }
        if self.training.resume_from_iteration < -1 {
            return invalid(format!(
                "training.resume_from_iteration must be -1 or a checkpoint iteration, got {}",
                self.training.resume_from_iteration
            ));
        }
        if self.schedule.position_lr_final <= 0.0 {
            return invalid("schedule.position_lr_final must be positive".into());
        }
        if self.schedule.position_lr_init < self.schedule.position_lr_final {
            return invalid(format!(
                "schedule.position_lr_init ({}) must be at least position_lr_final ({})",
                self.schedule.position_lr_init, self.schedule.position_lr_final
            ));
        }
        if self.schedule.position_lr_max_steps == 0 {
            return invalid("schedule.position_lr_max_steps must be positive".into());
        }
        if self.densify.densification_interval == 0 {
            return invalid("densify.densification_interval must be positive".into());
        }
        if self.densify.opacity_reset_interval == 0 {
            return invalid("densify.opacity_reset_interval must be positive".into());
        }
        if !(0.0..1.0).contains(&self.densify.percent_dense) || self.densify.percent_dense == 0.0 {
            return invalid(format!(
                "densify.percent_dense must be in (0, 1), got {}",
                self.densify.percent_dense
            ));
        }
        if !(0.0..1.0).contains(&self.densify.min_opacity) {
            return invalid(format!(
                "densify.min_opacity must be in [0, 1), got {}",
                self.densify.min_opacity
            ));
        }
        if self.densify.opacity_reset_floor <= 0.0 || self.densify.opacity_reset_floor >= 1.0 {
            return invalid(format!(
                "densify.opacity_reset_floor must be in (0, 1), got {}",
                self.densify.opacity_reset_floor
            ));
        }
        Ok(())
    }

    /// Sort and deduplicate the iteration lists, dropping entries past the
    /// end of the run.
    pub fn normalized(mut self) -> Self {
        let total = self.training.iterations;
        for (list, what) in [
            (&mut self.training.test_iterations, "test_iterations"),
            (&mut self.training.save_iterations, "save_iterations"),
            (
                &mut self.training.checkpoint_iterations,
                "checkpoint_iterations",
            ),
        ] {
            list.sort_unstable();
            list.dedup();
            let before = list.len();
            list.retain(|&i| i > 0 && i <= total);
            if list.len() != before {
                warn!(
                    dropped = before - list.len(),
                    list = what,
                    total,
                    "dropped out-of-range schedule entries"
                );
            }
        }
        self
    }

    /// Resume policy implied by the training section, if resume is enabled.
    pub fn resume_target(&self) -> Option<ResumeTarget> {
        if !self.training.resume_training {
            return None;
        }
        if self.training.resume_from_iteration < 0 {
            Some(ResumeTarget::Latest)
        } else {
            Some(ResumeTarget::Iteration(
                self.training.resume_from_iteration as u64,
            ))
        }
    }

    /// Loader options implied by the training section.
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            resolution: self.training.resolution,
            device: self.training.data_device,
            white_background: self.training.white_background,
        }
    }

    /// Write the effective configuration into the run directory so the run
    /// is reproducible from its artifacts alone.
    pub fn write_manifest(&self, run_dir: &Path) -> Result<PathBuf, ConfigError> {
        let path = run_dir.join("config.json");
        let text = serde_json::to_string_pretty(self)?;
        fs::write(&path, text)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> RunConfig {
        RunConfig {
            run: RunSection {
                name: "test-run".into(),
                description: String::new(),
                source_path: "data/scene".into(),
                model_path: "runs/test".into(),
            },
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let c = RunConfig::default();
        assert_eq!(c.training.iterations, 30_000);
        assert!(c.training.eval);
        assert_eq!(c.training.resolution, -1);
        assert_eq!(c.training.sh_degree, 3);
        assert_eq!(c.training.test_iterations, vec![7_000, 30_000]);
        assert_eq!(c.training.save_iterations, vec![7_000, 30_000]);
        assert!(c.training.checkpoint_iterations.is_empty());
        assert_eq!(c.training.resume_from_iteration, -1);
        assert!((c.schedule.position_lr_init - 1.6e-4).abs() < 1e-9);
        assert!((c.schedule.position_lr_final - 1.6e-6).abs() < 1e-11);
        assert_eq!(c.schedule.position_lr_max_steps, 30_000);
        assert!((c.densify.densify_grad_threshold - 2e-4).abs() < 1e-9);
        assert_eq!(c.densify.densification_interval, 100);
        assert_eq!(c.densify.densify_until_iter, 15_000);
        assert_eq!(c.densify.opacity_reset_interval, 3_000);
        assert!((c.densify.opacity_reset_floor - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_sparse_json_uses_defaults() {
        let json = r#"{
            "run": {"name": "r", "source_path": "s", "model_path": "m"},
            "training": {"iterations": 1000}
        }"#;
        let c: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(c.training.iterations, 1000);
        assert!((c.schedule.scaling_lr - 0.005).abs() < 1e-9);
        assert_eq!(c.densify.densification_interval, 100);
        c.validate().unwrap();
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let json = r#"{
            "run": {"name": "r", "source_path": "s", "model_path": "m"},
            "training": {"iterations": 10, "mystery_knob": 42}
        }"#;
        let c: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(c.training.iterations, 10);
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let mut c = valid_config();
        c.run.name = "  ".into();
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_lr_inversion() {
        let mut c = valid_config();
        c.schedule.position_lr_init = 1e-7;
        c.schedule.position_lr_final = 1e-4;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let mut c = valid_config();
        c.densify.densification_interval = 0;
        assert!(c.validate().is_err());

        let mut c = valid_config();
        c.densify.opacity_reset_interval = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_normalized_sorts_and_filters_lists() {
        let mut c = valid_config();
        c.training.iterations = 1_000;
        c.training.test_iterations = vec![900, 100, 900, 5_000];
        c.training.checkpoint_iterations = vec![2_000, 500];
        let c = c.normalized();
        assert_eq!(c.training.test_iterations, vec![100, 900]);
        assert_eq!(c.training.checkpoint_iterations, vec![500]);
    }

    #[test]
    fn test_resume_target_mapping() {
        let mut c = valid_config();
        assert_eq!(c.resume_target(), None);
        c.training.resume_training = true;
        assert_eq!(c.resume_target(), Some(ResumeTarget::Latest));
        c.training.resume_from_iteration = 500;
        assert_eq!(c.resume_target(), Some(ResumeTarget::Iteration(500)));
    }

    #[test]
    fn test_optimizer_variant_wire_names() {
        let c: TrainingSection =
            serde_json::from_str(r#"{"optimizer_type": "sparse_adam"}"#).unwrap();
        assert_eq!(c.optimizer_type, OptimizerVariant::SparseAdam);
        let text = serde_json::to_string(&OptimizerVariant::Default).unwrap();
        assert_eq!(text, "\"default\"");
    }
}
