//! Evaluation and export scheduling
//!
//! Decides at which iterations the metrics pipeline runs against held-out
//! views and when the scene is exported, and collects the metric reports
//! into the run's summary file. Failures on either path are the caller's
//! problem to log; this module only tracks the schedule and the history.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::external::MetricsReport;

/// Sparse evaluation/export schedule plus the recorded metric history
#[derive(Debug, Clone, Default)]
pub struct EvaluationTrigger {
    test_iterations: BTreeSet<u64>,
    save_iterations: BTreeSet<u64>,
    history: BTreeMap<u64, MetricsReport>,
}

impl EvaluationTrigger {
    pub fn new(test_iterations: &[u64], save_iterations: &[u64]) -> Self {
        Self {
            test_iterations: test_iterations.iter().copied().collect(),
            save_iterations: save_iterations.iter().copied().collect(),
            history: BTreeMap::new(),
        }
    }

    /// Whether `iteration` is on the metrics schedule.
    pub fn should_evaluate(&self, iteration: u64) -> bool {
        self.test_iterations.contains(&iteration)
    }

    /// Whether `iteration` is on the point cloud export schedule.
    pub fn should_export(&self, iteration: u64) -> bool {
        self.save_iterations.contains(&iteration)
    }

    /// Record the metrics computed at `iteration`. Re-recording the same
    /// iteration overwrites, which only happens when a run is resumed past
    /// an already evaluated point.
    pub fn record(&mut self, iteration: u64, report: MetricsReport) {
        debug!(
            iteration,
            psnr = report.psnr,
            ssim = report.ssim,
            lpips = report.lpips,
            "recorded evaluation"
        );
        self.history.insert(iteration, report);
    }

    pub fn history(&self) -> impl Iterator<Item = (u64, &MetricsReport)> {
        self.history.iter().map(|(&i, r)| (i, r))
    }

    /// Write the collected metrics to `run_dir/results.json`, keyed by
    /// iteration. Writes an empty object when nothing was evaluated.
    pub fn write_summary(&self, run_dir: &Path) -> io::Result<PathBuf> {
        let entries: BTreeMap<String, &MetricsReport> = self
            .history
            .iter()
            .map(|(i, report)| (format!("iteration_{i}"), report))
            .collect();
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let path = run_dir.join("results.json");
        fs::write(&path, json)?;
        Ok(path)
    }
}
