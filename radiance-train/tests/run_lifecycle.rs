//! End-to-end orchestrator tests against fake collaborators
//!
//! The gradient step and metrics pipeline are scripted fakes, so these
//! tests pin down the control logic: scheduling, interruption, resume
//! alignment, and failure propagation.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use glam::{Quat, Vec3};
use image::RgbImage;

use radiance_data::{CameraView, Intrinsics, SceneInputs, ScenePoints, ViewSet};
use radiance_scene::{GradSample, SceneSnapshot, SplatCollection};
use radiance_train::{
    CancelToken, CheckpointError, CheckpointManager, EvalError, GradientStep, MetricsPipeline,
    MetricsReport, OptimizerState, RunConfig, RunOutcome, RunPhase, StepError, StepInputs,
    StepOutput, TrainError, Trainer,
};

#[derive(Default)]
struct StepLog {
    iterations: Vec<u64>,
    views: Vec<String>,
    rebuilds: Vec<usize>,
    opacity_at_entry: Vec<(u64, f32)>,
    reset_notices: usize,
}

/// Scripted gradient-step collaborator. Returns a constant loss and a
/// constant gradient for every splat, and can be told to cancel, fail, or
/// push opacities up at specific iterations.
struct FakeStep {
    log: Rc<RefCell<StepLog>>,
    grad_norm: f32,
    loss: f32,
    cancel_at: Option<(u64, CancelToken)>,
    fail_at: Option<u64>,
    nan_at: Option<u64>,
    raise_opacity: bool,
    timestep: u64,
}

impl FakeStep {
    /// Gradients far below the densify threshold: structurally inert.
    fn quiet(log: Rc<RefCell<StepLog>>) -> Self {
        Self {
            log,
            grad_norm: 0.0,
            loss: 0.5,
            cancel_at: None,
            fail_at: None,
            nan_at: None,
            raise_opacity: false,
            timestep: 0,
        }
    }

    /// Gradients far above the densify threshold: every pass densifies.
    fn dense(log: Rc<RefCell<StepLog>>) -> Self {
        Self {
            grad_norm: 0.01,
            ..Self::quiet(log)
        }
    }
}

impl GradientStep for FakeStep {
    fn step(
        &mut self,
        scene: &mut SplatCollection,
        inputs: &StepInputs<'_>,
    ) -> Result<StepOutput, StepError> {
        if Some(inputs.iteration) == self.fail_at {
            return Err(StepError::Backend("scripted failure".into()));
        }
        self.timestep += 1;
        {
            let mut log = self.log.borrow_mut();
            log.iterations.push(inputs.iteration);
            log.views.push(inputs.view.name.clone());
            if let Some(first) = scene.as_slice().first() {
                log.opacity_at_entry.push((inputs.iteration, first.opacity()));
            }
        }
        if let Some((at, token)) = &self.cancel_at {
            if inputs.iteration == *at {
                token.cancel();
            }
        }
        if self.raise_opacity {
            for splat in scene.iter_mut() {
                splat.set_opacity(0.7);
            }
        }
        let loss = if Some(inputs.iteration) == self.nan_at {
            f32::NAN
        } else {
            self.loss
        };
        let samples = scene
            .iter()
            .map(|_| GradSample {
                grad_norm: self.grad_norm,
                radius: 2.0,
                visible: true,
            })
            .collect();
        Ok(StepOutput { loss, samples })
    }

    fn optimizer_state(&self) -> OptimizerState {
        OptimizerState::from_bytes(self.timestep.to_le_bytes().to_vec())
    }

    fn restore_optimizer(&mut self, state: &OptimizerState) -> Result<(), StepError> {
        let bytes: [u8; 8] = state
            .as_bytes()
            .try_into()
            .map_err(|_| StepError::Backend("bad optimizer payload".into()))?;
        self.timestep = u64::from_le_bytes(bytes);
        Ok(())
    }

    fn on_scene_rebuilt(&mut self, splat_count: usize) {
        self.log.borrow_mut().rebuilds.push(splat_count);
    }

    fn on_opacity_reset(&mut self) {
        self.log.borrow_mut().reset_notices += 1;
    }
}

struct FakeMetrics {
    fail: bool,
}

impl MetricsPipeline for FakeMetrics {
    fn evaluate(
        &mut self,
        _snapshot: &SceneSnapshot,
        _views: &[&CameraView],
    ) -> Result<MetricsReport, EvalError> {
        if self.fail {
            return Err(EvalError::Metrics("scripted metrics failure".into()));
        }
        Ok(MetricsReport {
            psnr: 30.0,
            ssim: 0.95,
            lpips: 0.05,
        })
    }
}

fn metrics_ok() -> FakeMetrics {
    FakeMetrics { fail: false }
}

/// A ring of cameras around the origin plus a small seed point cloud.
fn synthetic_inputs(n_views: usize, n_points: usize) -> SceneInputs {
    let views = (0..n_views)
        .map(|i| {
            let angle = i as f32 / n_views as f32 * std::f32::consts::TAU;
            let position = Vec3::new(3.0 * angle.cos(), 0.5, 3.0 * angle.sin());
            CameraView {
                name: format!("view_{i:03}"),
                intrinsics: Intrinsics {
                    fx: 100.0,
                    fy: 100.0,
                    cx: 4.0,
                    cy: 4.0,
                    width: 8,
                    height: 8,
                },
                rotation: Quat::IDENTITY,
                translation: -position,
                image: RgbImage::new(8, 8),
            }
        })
        .collect();
    let mut points = ScenePoints::default();
    for i in 0..n_points {
        let f = i as f32 / n_points as f32;
        points.push(
            Vec3::new(f - 0.5, (f * 7.0).sin() * 0.3, 0.2 * f),
            [f, 0.5, 1.0 - f],
        );
    }
    SceneInputs {
        views: ViewSet::new(views),
        points,
    }
}

fn base_config(run_dir: &Path, iterations: u64) -> RunConfig {
    let mut config = RunConfig::default();
    config.run.name = "lifecycle".into();
    config.run.source_path = "synthetic://ring".into();
    config.run.model_path = run_dir.to_path_buf();
    config.training.iterations = iterations;
    config.training.seed = 7;
    config.training.test_iterations = Vec::new();
    config.training.save_iterations = Vec::new();
    config.training.checkpoint_iterations = Vec::new();
    config
}

#[test]
fn test_densification_fires_five_times() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 1_000);
    config.densify.densification_interval = 200;
    config.densify.densify_until_iter = 2_000;

    let log = Rc::new(RefCell::new(StepLog::default()));
    let mut trainer = Trainer::new(
        config,
        synthetic_inputs(12, 24),
        FakeStep::dense(log.clone()),
        metrics_ok(),
    )
    .unwrap();
    let initial_splats = trainer.scene().len();

    let summary = trainer.run(&CancelToken::new()).unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.densify_passes, 5);
    assert!(
        summary.splat_count > initial_splats,
        "high gradients must grow the scene: {initial_splats} -> {}",
        summary.splat_count
    );
    // every structural change was announced to the optimizer
    assert_eq!(log.borrow().rebuilds.len(), 6, "initial build plus five passes");
    assert_eq!(trainer.phase(), RunPhase::Completed);
}

#[test]
fn test_sh_degree_ramps_to_configured_max() {
    let dir = tempfile::tempdir().unwrap();
    // five raise boundaries, but the default maximum degree is 3
    let config = base_config(dir.path(), 5_000);

    let log = Rc::new(RefCell::new(StepLog::default()));
    let mut trainer = Trainer::new(
        config,
        synthetic_inputs(12, 24),
        FakeStep::quiet(log),
        metrics_ok(),
    )
    .unwrap();
    assert_eq!(trainer.run_state().active_sh_degree, 0);

    trainer.run(&CancelToken::new()).unwrap();
    assert_eq!(trainer.run_state().active_sh_degree, 3);
}

#[test]
fn test_interrupt_resume_matches_uninterrupted_run() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_c = tempfile::tempdir().unwrap();

    // uninterrupted reference run
    let log_c = Rc::new(RefCell::new(StepLog::default()));
    let mut config_c = base_config(dir_c.path(), 1_000);
    config_c.training.checkpoint_iterations = vec![500];
    let mut trainer_c = Trainer::new(
        config_c,
        synthetic_inputs(12, 24),
        FakeStep::quiet(log_c.clone()),
        metrics_ok(),
    )
    .unwrap();
    trainer_c.run(&CancelToken::new()).unwrap();

    // run A: same schedule, cancelled after iteration 700
    let log_a = Rc::new(RefCell::new(StepLog::default()));
    let cancel = CancelToken::new();
    let mut config_a = base_config(dir_a.path(), 1_000);
    config_a.training.checkpoint_iterations = vec![500];
    let mut step_a = FakeStep::quiet(log_a.clone());
    step_a.cancel_at = Some((700, cancel.clone()));
    let mut trainer_a = Trainer::new(
        config_a,
        synthetic_inputs(12, 24),
        step_a,
        metrics_ok(),
    )
    .unwrap();
    let summary_a = trainer_a.run(&cancel).unwrap();
    assert_eq!(summary_a.outcome, RunOutcome::Interrupted { iteration: 700 });
    assert_eq!(summary_a.final_iteration, 700);
    assert_eq!(
        log_a.borrow().iterations,
        (1..=700).collect::<Vec<u64>>()
    );
    // the scheduled checkpoint plus the best-effort one at the interrupt
    assert!(dir_a.path().join("chkpnt500.ckpt").is_file());
    assert!(dir_a.path().join("chkpnt700.ckpt").is_file());

    // run B: resume A's directory from iteration 500
    let log_b = Rc::new(RefCell::new(StepLog::default()));
    let mut config_b = base_config(dir_a.path(), 1_000);
    config_b.training.checkpoint_iterations = vec![500];
    config_b.training.resume_training = true;
    config_b.training.resume_from_iteration = 500;
    let trainer_b = Trainer::new(
        config_b,
        synthetic_inputs(12, 24),
        FakeStep::quiet(log_b.clone()),
        metrics_ok(),
    )
    .unwrap();

    // restored scene is exactly what was saved at 500
    let saved = CheckpointManager::new(dir_a.path()).load(500).unwrap();
    assert_eq!(trainer_b.run_state().iteration, 500);
    assert_eq!(trainer_b.scene().len(), saved.splats.len());
    for (a, b) in saved
        .splats
        .as_slice()
        .iter()
        .zip(trainer_b.scene().as_slice())
    {
        assert_eq!(a.position, b.position);
        assert_eq!(a.rotation, b.rotation);
        assert_eq!(a.log_scale, b.log_scale);
        assert_eq!(a.opacity_logit, b.opacity_logit);
        assert_eq!(a.sh, b.sh);
    }

    let mut trainer_b = trainer_b;
    let summary_b = trainer_b.run(&CancelToken::new()).unwrap();
    assert_eq!(summary_b.outcome, RunOutcome::Completed);
    assert_eq!(summary_b.final_iteration, 1_000);

    // first executed iteration after resume is 501
    assert_eq!(log_b.borrow().iterations.first(), Some(&501));

    // view sequencing is identical to the uninterrupted run throughout
    let views_a = log_a.borrow().views.clone();
    let views_b = log_b.borrow().views.clone();
    let views_c = log_c.borrow().views.clone();
    assert_eq!(&views_a[..], &views_c[..700]);
    assert_eq!(&views_b[..], &views_c[500..]);

    // optimizer state continued from the restored counter: 500 restored
    // steps plus 500 more
    let final_ckpt = CheckpointManager::new(dir_a.path()).load(1_000).unwrap();
    assert_eq!(
        final_ckpt.optimizer.as_bytes(),
        1_000u64.to_le_bytes().as_slice()
    );
}

#[test]
fn test_resume_from_missing_checkpoint_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 1_000);
    config.training.resume_training = true;
    config.training.resume_from_iteration = 999;

    let log = Rc::new(RefCell::new(StepLog::default()));
    let result = Trainer::new(
        config,
        synthetic_inputs(12, 24),
        FakeStep::quiet(log),
        metrics_ok(),
    );
    match result {
        Err(TrainError::Checkpoint(CheckpointError::NotFound(_))) => {}
        other => panic!("expected NotFound, got {:?}", other.err()),
    }
    // no silent fresh start: nothing ran, no checkpoints appeared
    assert!(!dir.path().join("chkpnt999.ckpt").exists());
}

#[test]
fn test_non_finite_loss_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let log = Rc::new(RefCell::new(StepLog::default()));
    let mut step = FakeStep::quiet(log);
    step.nan_at = Some(5);
    let mut trainer = Trainer::new(
        base_config(dir.path(), 100),
        synthetic_inputs(12, 24),
        step,
        metrics_ok(),
    )
    .unwrap();

    match trainer.run(&CancelToken::new()) {
        Err(TrainError::Step {
            iteration: 5,
            source: StepError::NumericalInstability(_),
        }) => {}
        other => panic!("expected instability at 5, got {:?}", other.err()),
    }
    assert_eq!(trainer.phase(), RunPhase::Failed);
}

#[test]
fn test_step_error_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let log = Rc::new(RefCell::new(StepLog::default()));
    let mut step = FakeStep::quiet(log.clone());
    step.fail_at = Some(3);
    let mut trainer = Trainer::new(
        base_config(dir.path(), 100),
        synthetic_inputs(12, 24),
        step,
        metrics_ok(),
    )
    .unwrap();

    assert!(matches!(
        trainer.run(&CancelToken::new()),
        Err(TrainError::Step { iteration: 3, .. })
    ));
    assert_eq!(trainer.phase(), RunPhase::Failed);
    assert_eq!(log.borrow().iterations.len(), 2);
}

#[test]
fn test_metrics_failures_are_non_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 30);
    config.training.test_iterations = vec![10, 20];

    let log = Rc::new(RefCell::new(StepLog::default()));
    let mut trainer = Trainer::new(
        config,
        synthetic_inputs(12, 24),
        FakeStep::quiet(log),
        FakeMetrics { fail: true },
    )
    .unwrap();

    let summary = trainer.run(&CancelToken::new()).unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert!(summary.metrics.is_empty());

    // the summary file still appears, just with nothing recorded
    let results = std::fs::read_to_string(dir.path().join("results.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&results).unwrap();
    assert_eq!(parsed, serde_json::json!({}));
}

#[test]
fn test_final_iteration_mandatory_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    // nothing scheduled at all
    let config = base_config(dir.path(), 50);

    let log = Rc::new(RefCell::new(StepLog::default()));
    let mut trainer = Trainer::new(
        config,
        synthetic_inputs(12, 24),
        FakeStep::quiet(log),
        metrics_ok(),
    )
    .unwrap();
    let summary = trainer.run(&CancelToken::new()).unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert!(dir.path().join("chkpnt50.ckpt").is_file());
    assert!(
        dir.path()
            .join("point_cloud/iteration_50/point_cloud.ply")
            .is_file()
    );
    assert_eq!(summary.metrics.len(), 1);
    assert_eq!(summary.metrics[0].0, 50);
    let results = std::fs::read_to_string(dir.path().join("results.json")).unwrap();
    assert!(results.contains("iteration_50"));
}

#[test]
fn test_cancel_takes_best_effort_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let log = Rc::new(RefCell::new(StepLog::default()));
    let cancel = CancelToken::new();
    let mut step = FakeStep::quiet(log);
    step.cancel_at = Some((30, cancel.clone()));
    let mut trainer = Trainer::new(
        base_config(dir.path(), 100),
        synthetic_inputs(12, 24),
        step,
        metrics_ok(),
    )
    .unwrap();

    let summary = trainer.run(&cancel).unwrap();
    assert_eq!(summary.outcome, RunOutcome::Interrupted { iteration: 30 });
    // iteration 30 was not on the checkpoint schedule
    assert!(dir.path().join("chkpnt30.ckpt").is_file());
}

#[test]
fn test_opacity_reset_observed_at_each_interval() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 35);
    config.densify.opacity_reset_interval = 10;

    let log = Rc::new(RefCell::new(StepLog::default()));
    let mut step = FakeStep::quiet(log.clone());
    // every step drives opacities back up, so any floor seen at entry
    // must come from a reset at the end of the previous iteration
    step.raise_opacity = true;
    let mut trainer = Trainer::new(config, synthetic_inputs(12, 24), step, metrics_ok()).unwrap();
    trainer.run(&CancelToken::new()).unwrap();

    let floor = trainer.config().densify.opacity_reset_floor;
    let log = log.borrow();
    assert_eq!(log.reset_notices, 3);
    for probe in [11, 21, 31] {
        let (_, opacity) = log
            .opacity_at_entry
            .iter()
            .find(|(i, _)| *i == probe)
            .copied()
            .unwrap();
        assert!(
            (opacity - floor).abs() < 1e-4,
            "iteration {probe} saw opacity {opacity}, expected floor {floor}"
        );
    }
    // an iteration not following a reset sees the raised value
    let (_, opacity) = log
        .opacity_at_entry
        .iter()
        .find(|(i, _)| *i == 15)
        .copied()
        .unwrap();
    assert!((opacity - 0.7).abs() < 1e-4);
}

#[test]
fn test_empty_point_cloud_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut inputs = synthetic_inputs(12, 24);
    inputs.points = ScenePoints::default();
    let log = Rc::new(RefCell::new(StepLog::default()));
    let result = Trainer::new(
        base_config(dir.path(), 100),
        inputs,
        FakeStep::quiet(log),
        metrics_ok(),
    );
    assert!(matches!(result, Err(TrainError::Data(_))));
}

#[test]
fn test_holdout_consumes_all_views_fails() {
    let dir = tempfile::tempdir().unwrap();
    // a single view is held out entirely when eval is on
    let inputs = synthetic_inputs(1, 24);
    let log = Rc::new(RefCell::new(StepLog::default()));
    let result = Trainer::new(
        base_config(dir.path(), 100),
        inputs,
        FakeStep::quiet(log),
        metrics_ok(),
    );
    assert!(matches!(result, Err(TrainError::Data(_))));
}
