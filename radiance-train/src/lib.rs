//! Radiance Train Crate
//!
//! The training-run orchestrator. Drives the optimize/densify/prune cycle
//! over tens of thousands of iterations: evaluates learning-rate schedules,
//! requests gradient steps from the external renderer/optimizer, runs the
//! densification engine, writes and restores checkpoints, and triggers
//! evaluation and export on held-out views. The renderer, dataset loader,
//! and metrics pipeline plug in through the traits in [`external`].

pub mod checkpoint;
pub mod config;
pub mod density;
pub mod error;
pub mod eval;
pub mod export;
pub mod external;
pub mod init;
pub mod schedule;
pub mod trainer;

pub use checkpoint::{CheckpointError, CheckpointManager, LoadedCheckpoint, ResumeTarget};
pub use config::{
    ConfigError, DensifySection, OptimizerVariant, RunConfig, RunSection, ScheduleSection,
    TrainingSection,
};
pub use density::{DensifyEngine, DensifyReport};
pub use error::TrainError;
pub use eval::EvaluationTrigger;
pub use export::export_point_cloud;
pub use external::{
    EvalError, GradientStep, LossWeights, MetricsPipeline, MetricsReport, OptimizerState,
    StepError, StepInputs, StepOutput,
};
pub use init::{ScaleStrategy, SplatInitializer};
pub use schedule::{ExponentialLr, LearningRates, Schedules};
pub use trainer::{
    CancelToken, IterationPlan, RunOutcome, RunPhase, RunState, RunSummary, Trainer,
};
