//! Run-level error taxonomy
//!
//! Propagation policy: configuration, dataset, and run-directory errors
//! surface before the iteration loop starts; once the loop is running only
//! the gradient-step and checkpoint paths can abort the run. Evaluation and
//! export failures are logged where they happen and never reach this type.

use thiserror::Error;

use radiance_data::DataError;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::external::StepError;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("dataset error: {0}")]
    Data(#[from] DataError),
    #[error("gradient step failed at iteration {iteration}: {source}")]
    Step {
        iteration: u64,
        #[source]
        source: StepError,
    },
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("run directory error: {0}")]
    RunDir(std::io::Error),
}
