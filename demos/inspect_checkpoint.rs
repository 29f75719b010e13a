//! Checkpoint inspector
//!
//! Lists the checkpoints in a run directory and prints the restored run
//! state and scene shape for one of them, without starting a training run.
//!
//! Usage:
//!   cargo run --example inspect_checkpoint -- --dir runs/synthetic
//!   cargo run --example inspect_checkpoint -- --dir runs/synthetic --iteration 1000

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use radiance::train::{CheckpointManager, ResumeTarget};

/// Radiance - checkpoint inspector
#[derive(Parser, Debug)]
#[command(name = "inspect_checkpoint")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run directory containing chkpnt{N}.ckpt files
    #[arg(short, long)]
    dir: PathBuf,

    /// Checkpoint iteration to inspect; defaults to the most recent
    #[arg(short, long)]
    iteration: Option<u64>,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let manager = CheckpointManager::new(&args.dir);

    let available = manager.list()?;
    info!(checkpoints = ?available, "run directory {:?}", args.dir);

    let target = match args.iteration {
        Some(i) => ResumeTarget::Iteration(i),
        None => ResumeTarget::Latest,
    };
    let iteration = manager.resolve(target)?;
    let loaded = manager.load(iteration)?;

    let state = &loaded.run_state;
    info!(
        iteration = state.iteration,
        seed = state.seed,
        camera_extent = state.camera_extent,
        active_sh_degree = state.active_sh_degree,
        "run state"
    );
    info!(
        lr_init = state.position_lr.lr_init,
        lr_final = state.position_lr.lr_final,
        delay_steps = state.position_lr.delay_steps,
        max_steps = state.position_lr.max_steps,
        "position learning-rate curve"
    );

    let opacities: Vec<f32> = loaded
        .splats
        .iter()
        .map(|s| s.opacity_logit)
        .collect();
    let lo = opacities.iter().copied().fold(f32::INFINITY, f32::min);
    let hi = opacities.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    info!(
        splats = loaded.splats.len(),
        stats_rows = loaded.stats.len(),
        opacity_logit_min = lo,
        opacity_logit_max = hi,
        optimizer_bytes = loaded.optimizer.as_bytes().len(),
        "scene payload"
    );
    Ok(())
}
