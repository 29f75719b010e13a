//! Run orchestrator
//!
//! Owns the iteration loop and every piece of long-lived run state. Each
//! iteration follows a fixed order: schedule evaluation, the external
//! gradient step, statistics accumulation, then the scheduled side effects
//! (densify/prune, opacity reset, checkpoint, evaluation, export).
//! Densification must see the statistics of the step that just ran, and
//! checkpoints must capture the collection after densification so the saved
//! size is final for that iteration.
//!
//! All schedule decisions key off the absolute iteration counter, so a
//! resumed run makes the same decisions at the same iterations as an
//! uninterrupted one.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use radiance_data::{CameraView, DataError, SceneInputs, ViewSet};
use radiance_scene::{DensifyStats, SceneSnapshot, SplatCollection};

use crate::checkpoint::{CheckpointManager, LoadedCheckpoint};
use crate::config::RunConfig;
use crate::density::DensifyEngine;
use crate::error::TrainError;
use crate::eval::EvaluationTrigger;
use crate::export::export_point_cloud;
use crate::external::{
    GradientStep, LossWeights, MetricsPipeline, MetricsReport, StepError, StepInputs,
};
use crate::init::SplatInitializer;
use crate::schedule::{ExponentialLr, Schedules};

/// The active SH degree rises one level at this cadence until the
/// configured maximum.
const SH_RAISE_INTERVAL: u64 = 1_000;

/// Smoothing factor for the reported loss average.
const LOSS_EMA_FACTOR: f32 = 0.4;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Initializing,
    Running,
    Checkpointing,
    Evaluating,
    Completed,
    Failed,
}

/// Cooperative cancellation flag, honored between iterations and never mid
/// gradient-step
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters and schedule state persisted with every checkpoint
///
/// Restoring this exactly is what keeps schedule evaluations and
/// densification alignment identical to an uninterrupted run.
#[derive(Debug, Clone)]
pub struct RunState {
    /// Last completed iteration; 0 before the first step
    pub iteration: u64,
    pub seed: u64,
    /// Scene extent the densify thresholds are relative to
    pub camera_extent: f32,
    pub active_sh_degree: u32,
    /// Position LR curve parameters in effect for this run
    pub position_lr: ExponentialLr,
}

/// Side effects scheduled for one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationPlan {
    pub densify: bool,
    pub reset_opacity: bool,
    pub checkpoint: bool,
    pub raise_sh_degree: bool,
    pub is_final: bool,
}

impl IterationPlan {
    /// Pure schedule lookup for `iteration`. Expects the config's iteration
    /// lists to be normalized (sorted, deduplicated). The final iteration
    /// always checkpoints regardless of schedule membership.
    pub fn at(iteration: u64, config: &RunConfig) -> Self {
        let is_final = iteration == config.training.iterations;
        let densify = &config.densify;
        Self {
            densify: iteration > densify.densify_from_iter
                && iteration < densify.densify_until_iter
                && iteration % densify.densification_interval == 0,
            reset_opacity: iteration < densify.densify_until_iter
                && iteration % densify.opacity_reset_interval == 0,
            checkpoint: is_final
                || config
                    .training
                    .checkpoint_iterations
                    .binary_search(&iteration)
                    .is_ok(),
            raise_sh_degree: iteration % SH_RAISE_INTERVAL == 0,
            is_final,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Cancelled between iterations after finishing `iteration`
    Interrupted { iteration: u64 },
}

/// Final report an orchestrated run hands back
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub final_iteration: u64,
    pub splat_count: usize,
    pub densify_passes: u64,
    pub final_loss_ema: f32,
    pub metrics: Vec<(u64, MetricsReport)>,
}

/// Training-run orchestrator, generic over the external collaborators
pub struct Trainer<S, M> {
    config: RunConfig,
    views: ViewSet,
    train_views: Vec<usize>,
    test_views: Vec<usize>,
    scene: SplatCollection,
    stats: DensifyStats,
    run_state: RunState,
    schedules: Schedules,
    engine: DensifyEngine,
    checkpoints: CheckpointManager,
    trigger: EvaluationTrigger,
    step: S,
    metrics: M,
    phase: RunPhase,
    loss_ema: f32,
    densify_passes: u64,
    last_checkpoint: Option<u64>,
    epoch: Option<u64>,
    epoch_order: Vec<usize>,
}

impl<S: GradientStep, M: MetricsPipeline> Trainer<S, M> {
    /// Validate the configuration, set up the run directory, and either
    /// initialize a fresh scene from the dataset's point cloud or restore
    /// the checkpoint the config's resume policy selects.
    pub fn new(
        config: RunConfig,
        inputs: SceneInputs,
        mut step: S,
        metrics: M,
    ) -> Result<Self, TrainError> {
        config.validate()?;
        let config = config.normalized();

        let run_dir = config.run.model_path.clone();
        std::fs::create_dir_all(&run_dir).map_err(TrainError::RunDir)?;
        config.write_manifest(&run_dir)?;

        let views = inputs.views;
        let train_views = views.train_indices(config.training.eval);
        let test_views = views.test_indices(config.training.eval);
        if train_views.is_empty() {
            return Err(DataError::Malformed("dataset contains no training views".into()).into());
        }
        let mut camera_extent = views.camera_extent() * config.training.camera_extent_scale;
        if camera_extent <= 0.0 {
            warn!("degenerate camera extent, falling back to 1.0");
            camera_extent = 1.0;
        }

        let checkpoints = CheckpointManager::new(run_dir);
        let trigger = EvaluationTrigger::new(
            &config.training.test_iterations,
            &config.training.save_iterations,
        );

        let (scene, stats, run_state, last_checkpoint) = match config.resume_target() {
            Some(target) => {
                let iteration = checkpoints.resolve(target)?;
                let LoadedCheckpoint {
                    run_state,
                    splats,
                    stats,
                    optimizer,
                } = checkpoints.load(iteration)?;
                let configured = ExponentialLr::from_config(&config.schedule);
                if run_state.position_lr != configured {
                    // the checkpointed curve wins so the resumed schedule
                    // matches the run that produced the checkpoint
                    warn!(
                        "config learning-rate schedule differs from checkpoint, keeping checkpointed parameters"
                    );
                }
                step.restore_optimizer(&optimizer)
                    .map_err(|source| TrainError::Step { iteration, source })?;
                info!(iteration, splats = splats.len(), "resumed from checkpoint");
                (splats, stats, run_state, Some(iteration))
            }
            None => {
                if inputs.points.is_empty() {
                    return Err(
                        DataError::Malformed("initial point cloud is empty".into()).into(),
                    );
                }
                let scene = SplatInitializer::default().initialize(&inputs.points);
                let stats = DensifyStats::new(scene.len());
                let run_state = RunState {
                    iteration: 0,
                    seed: config.training.seed,
                    camera_extent,
                    active_sh_degree: 0,
                    position_lr: ExponentialLr::from_config(&config.schedule),
                };
                step.on_scene_rebuilt(scene.len());
                info!(
                    splats = scene.len(),
                    views = views.len(),
                    extent = camera_extent,
                    "initialized fresh run"
                );
                (scene, stats, run_state, None)
            }
        };

        let schedules = Schedules::new(run_state.position_lr, &config.schedule);
        let engine = DensifyEngine::new(config.densify.clone(), run_state.camera_extent);

        Ok(Self {
            config,
            views,
            train_views,
            test_views,
            scene,
            stats,
            run_state,
            schedules,
            engine,
            checkpoints,
            trigger,
            step,
            metrics,
            phase: RunPhase::Initializing,
            loss_ema: 0.0,
            densify_passes: 0,
            last_checkpoint,
            epoch: None,
            epoch_order: Vec::new(),
        })
    }

    /// Drive the loop from the current iteration to the configured total.
    ///
    /// Gradient-step and checkpoint-save failures abort the run and move it
    /// to [`RunPhase::Failed`]; evaluation and export failures are logged
    /// and skipped. Cancellation is honored between iterations and triggers
    /// a best-effort checkpoint when the current iteration is not already
    /// checkpointed.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<RunSummary, TrainError> {
        let total = self.config.training.iterations;
        let run_dir = self.config.run.model_path.clone();
        self.phase = RunPhase::Running;
        info!(
            run = %self.config.run.name,
            from = self.run_state.iteration,
            total,
            splats = self.scene.len(),
            "starting training loop"
        );

        for iteration in (self.run_state.iteration + 1)..=total {
            if cancel.is_cancelled() {
                return Ok(self.interrupt(&run_dir));
            }

            let plan = IterationPlan::at(iteration, &self.config);

            if plan.raise_sh_degree && self.run_state.active_sh_degree < self.config.training.sh_degree
            {
                self.run_state.active_sh_degree += 1;
                debug!(
                    iteration,
                    degree = self.run_state.active_sh_degree,
                    "raised active SH degree"
                );
            }

            let rates = self.schedules.at(iteration);
            let view_index = self.pick_view(iteration);
            let inputs = StepInputs {
                iteration,
                view: &self.views.views()[view_index],
                rates,
                active_sh_degree: self.run_state.active_sh_degree,
                loss: LossWeights {
                    lambda_dssim: self.config.training.lambda_dssim,
                },
                white_background: self.config.training.white_background,
            };
            let output = match self.step.step(&mut self.scene, &inputs) {
                Ok(output) => output,
                Err(source) => {
                    self.phase = RunPhase::Failed;
                    return Err(TrainError::Step { iteration, source });
                }
            };
            if !output.loss.is_finite() {
                self.phase = RunPhase::Failed;
                return Err(TrainError::Step {
                    iteration,
                    source: StepError::NumericalInstability(format!(
                        "non-finite loss {}",
                        output.loss
                    )),
                });
            }
            if output.samples.len() != self.scene.len() {
                self.phase = RunPhase::Failed;
                return Err(TrainError::Step {
                    iteration,
                    source: StepError::Backend(format!(
                        "{} gradient samples for {} splats",
                        output.samples.len(),
                        self.scene.len()
                    )),
                });
            }

            self.loss_ema = LOSS_EMA_FACTOR * output.loss + (1.0 - LOSS_EMA_FACTOR) * self.loss_ema;
            self.stats.accumulate(&output.samples);
            self.run_state.iteration = iteration;

            if plan.densify {
                let mut rng = StdRng::seed_from_u64(self.run_state.seed.wrapping_add(iteration));
                let report = self
                    .engine
                    .pass(&mut self.scene, &mut self.stats, iteration, &mut rng);
                if report.changed() {
                    self.step.on_scene_rebuilt(self.scene.len());
                    info!(
                        iteration,
                        before = report.before,
                        cloned = report.cloned,
                        split = report.split,
                        pruned = report.pruned,
                        after = report.after,
                        "densified scene"
                    );
                }
                self.densify_passes += 1;
            }

            if plan.reset_opacity {
                self.engine.reset_opacity(&mut self.scene);
                self.step.on_opacity_reset();
                info!(iteration, "opacity reset applied");
            }

            if plan.checkpoint {
                self.phase = RunPhase::Checkpointing;
                if let Err(e) = self.checkpoints.save(
                    &self.run_state,
                    &self.scene,
                    &self.stats,
                    &self.step.optimizer_state(),
                ) {
                    self.phase = RunPhase::Failed;
                    return Err(e.into());
                }
                self.last_checkpoint = Some(iteration);
                self.phase = RunPhase::Running;
            }

            let evaluate = plan.is_final || self.trigger.should_evaluate(iteration);
            let export = plan.is_final || self.trigger.should_export(iteration);
            if evaluate || export {
                self.phase = RunPhase::Evaluating;
                let snapshot = SceneSnapshot::of(&self.scene);
                if evaluate {
                    self.evaluate(iteration, &snapshot);
                }
                if export {
                    if let Err(e) = export_point_cloud(&snapshot, &run_dir, iteration) {
                        warn!(iteration, error = %e, "point cloud export failed");
                    }
                }
                self.phase = RunPhase::Running;
            }

            if iteration % 1_000 == 0 {
                info!(
                    iteration,
                    loss_ema = self.loss_ema,
                    splats = self.scene.len(),
                    "training progress"
                );
            } else if iteration % 100 == 0 {
                debug!(
                    iteration,
                    loss_ema = self.loss_ema,
                    splats = self.scene.len(),
                    "training progress"
                );
            }
        }

        if let Err(e) = self.trigger.write_summary(&run_dir) {
            warn!(error = %e, "failed to write results summary");
        }
        self.phase = RunPhase::Completed;
        info!(
            iterations = total,
            splats = self.scene.len(),
            loss_ema = self.loss_ema,
            "training complete"
        );
        Ok(self.summary(RunOutcome::Completed))
    }

    /// Stop between iterations: checkpoint the current state unless this
    /// iteration already has one, flush the metrics summary, and report how
    /// far the run got. Checkpoint failure here is logged, not fatal; the
    /// run is ending either way.
    fn interrupt(&mut self, run_dir: &Path) -> RunSummary {
        let iteration = self.run_state.iteration;
        info!(iteration, "cancellation requested, stopping between iterations");
        if iteration > 0 && self.last_checkpoint != Some(iteration) {
            self.phase = RunPhase::Checkpointing;
            match self.checkpoints.save(
                &self.run_state,
                &self.scene,
                &self.stats,
                &self.step.optimizer_state(),
            ) {
                Ok(_) => self.last_checkpoint = Some(iteration),
                Err(e) => warn!(error = %e, "best-effort checkpoint on cancel failed"),
            }
        }
        if let Err(e) = self.trigger.write_summary(run_dir) {
            warn!(error = %e, "failed to write results summary");
        }
        self.phase = RunPhase::Completed;
        self.summary(RunOutcome::Interrupted { iteration })
    }

    fn evaluate(&mut self, iteration: u64, snapshot: &SceneSnapshot) {
        // held-out views when a split exists, training views otherwise
        let indices = if self.test_views.is_empty() {
            &self.train_views
        } else {
            &self.test_views
        };
        let views: Vec<&CameraView> = indices.iter().filter_map(|&i| self.views.get(i)).collect();
        match self.metrics.evaluate(snapshot, &views) {
            Ok(report) => {
                info!(
                    iteration,
                    psnr = report.psnr,
                    ssim = report.ssim,
                    lpips = report.lpips,
                    views = views.len(),
                    "evaluated held-out views"
                );
                self.trigger.record(iteration, report);
            }
            Err(e) => warn!(iteration, error = %e, "evaluation failed, continuing"),
        }
    }

    /// Training view for `iteration`. Each epoch visits every training view
    /// once in an order shuffled from the seed and epoch index, so view
    /// sequencing is reproducible across resumes.
    fn pick_view(&mut self, iteration: u64) -> usize {
        let n = self.train_views.len() as u64;
        let epoch = (iteration - 1) / n;
        let slot = ((iteration - 1) % n) as usize;
        if self.epoch != Some(epoch) {
            let mut order = self.train_views.clone();
            let mut rng = StdRng::seed_from_u64(self.run_state.seed.wrapping_add(epoch));
            order.shuffle(&mut rng);
            self.epoch_order = order;
            self.epoch = Some(epoch);
        }
        self.epoch_order[slot]
    }

    fn summary(&self, outcome: RunOutcome) -> RunSummary {
        RunSummary {
            outcome,
            final_iteration: self.run_state.iteration,
            splat_count: self.scene.len(),
            densify_passes: self.densify_passes,
            final_loss_ema: self.loss_ema,
            metrics: self.trigger.history().map(|(i, r)| (i, *r)).collect(),
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn run_state(&self) -> &RunState {
        &self.run_state
    }

    pub fn scene(&self) -> &SplatCollection {
        &self.scene
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }
}
