//! Densification and pruning engine
//!
//! Mutates the splat collection at scheduled iterations: clones small
//! high-gradient splats, splits large ones, prunes invisible or degenerate
//! ones, and periodically resets opacities. Structural changes go through
//! collection compaction so handle generations and the stats arrays stay in
//! lockstep.

use glam::Vec3;
use ordered_float::OrderedFloat;
use rand::Rng;
use rand::rngs::StdRng;
use tracing::{debug, warn};

use radiance_scene::{DensifyStats, Splat, SplatCollection, inverse_sigmoid};

use crate::config::DensifySection;

/// Fraction of a splat's own scale used as clone jitter.
const CLONE_JITTER_FRACTION: f32 = 0.1;

/// Children replacing a split splat.
const SPLIT_CHILDREN: usize = 2;

/// Real-space scale shrink for split children (0.8 x 2 children).
const SPLIT_SCALE_SHRINK: f32 = 1.6;

/// World-space size prune threshold as a fraction of scene extent.
const WORLD_SIZE_PRUNE_FRACTION: f32 = 0.1;

/// Summary of one densify/prune pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DensifyReport {
    pub before: usize,
    pub cloned: usize,
    pub split: usize,
    pub pruned: usize,
    pub after: usize,
}

impl DensifyReport {
    /// Whether the pass changed the collection structurally.
    pub fn changed(&self) -> bool {
        self.cloned > 0 || self.split > 0 || self.pruned > 0
    }
}

/// Clone/split/prune state machine for one run
#[derive(Debug, Clone)]
pub struct DensifyEngine {
    config: DensifySection,
    scene_extent: f32,
}

impl DensifyEngine {
    pub fn new(config: DensifySection, scene_extent: f32) -> Self {
        Self {
            config,
            scene_extent,
        }
    }

    pub fn scene_extent(&self) -> f32 {
        self.scene_extent
    }

    /// One scheduled pass over the collection.
    ///
    /// Candidate selection reads the averaged gradient statistics gathered
    /// since the previous pass. Clones duplicate with a small jitter;
    /// splits replace the parent with [`SPLIT_CHILDREN`] samples of its
    /// footprint; pruning removes low-opacity splats and, once past the
    /// first opacity-reset interval, degenerate oversized ones. Afterwards
    /// the stats arrays are rebuilt at the new length with fresh
    /// accumulators. A pass where nothing qualifies leaves the collection
    /// untouched.
    pub fn pass(
        &self,
        scene: &mut SplatCollection,
        stats: &mut DensifyStats,
        iteration: u64,
        rng: &mut StdRng,
    ) -> DensifyReport {
        debug_assert_eq!(scene.len(), stats.len());
        let before = scene.len();
        let avg_grads = stats.average_gradients();
        let threshold = self.config.densify_grad_threshold;
        let size_cutoff = self.config.percent_dense * self.scene_extent;

        let mut clone_set = Vec::new();
        let mut split_set = Vec::new();
        for (i, splat) in scene.iter().enumerate() {
            if avg_grads[i] < threshold {
                continue;
            }
            if splat.max_scale() <= size_cutoff {
                clone_set.push(i);
            } else {
                split_set.push(i);
            }
        }

        if self.config.max_splats > 0 {
            let budget = self.config.max_splats.saturating_sub(before);
            apply_growth_budget(&mut clone_set, &mut split_set, &avg_grads, budget);
        }

        let mut appended =
            Vec::with_capacity(clone_set.len() + split_set.len() * SPLIT_CHILDREN);
        for &i in &clone_set {
            appended.push(clone_with_jitter(&scene.as_slice()[i], rng));
        }
        for &i in &split_set {
            let parent = scene.as_slice()[i].clone();
            for _ in 0..SPLIT_CHILDREN {
                appended.push(split_child(&parent, rng));
            }
        }
        let cloned = clone_set.len();
        let split = split_set.len();

        scene.extend(appended);
        let grown = scene.len();

        // split parents are replaced by their children
        let mut keep = vec![true; grown];
        for &i in &split_set {
            keep[i] = false;
        }

        // footprint pruning only arms after the first opacity reset window;
        // screen-radius evidence exists only for pre-pass splats
        let prune_by_size = iteration > self.config.opacity_reset_interval;
        let mut pruned = 0;
        for (i, splat) in scene.iter().enumerate() {
            if !keep[i] {
                continue;
            }
            let mut drop = splat.opacity() < self.config.min_opacity;
            if !drop && prune_by_size {
                drop = splat.max_scale() > WORLD_SIZE_PRUNE_FRACTION * self.scene_extent
                    || (i < before && stats.max_radius(i) > self.config.max_screen_size);
            }
            if drop {
                keep[i] = false;
                pruned += 1;
            }
        }

        if cloned == 0 && split == 0 && pruned == 0 {
            // nothing qualified; the collection is untouched
            stats.clear_accumulators();
            debug!(iteration, splats = before, "densify pass found no candidates");
            return DensifyReport {
                before,
                after: before,
                ..DensifyReport::default()
            };
        }

        let remap = scene.compact(&keep);
        stats.rebuild(&remap, scene.len());

        let report = DensifyReport {
            before,
            cloned,
            split,
            pruned,
            after: scene.len(),
        };
        debug!(
            iteration,
            before = report.before,
            cloned = report.cloned,
            split = report.split,
            pruned = report.pruned,
            after = report.after,
            "densify pass applied"
        );
        report
    }

    /// Set every opacity to the configured floor. Parameter-only: no
    /// structural change, handles stay valid.
    pub fn reset_opacity(&self, scene: &mut SplatCollection) {
        let floor_logit = inverse_sigmoid(self.config.opacity_reset_floor);
        for splat in scene.iter_mut() {
            splat.opacity_logit = floor_logit;
        }
        debug!(
            floor = self.config.opacity_reset_floor,
            splats = scene.len(),
            "reset opacities to floor"
        );
    }
}

/// Keep the strongest candidates when the collection is near its cap. Each
/// clone and each split nets one extra splat.
fn apply_growth_budget(
    clone_set: &mut Vec<usize>,
    split_set: &mut Vec<usize>,
    avg_grads: &[f32],
    budget: usize,
) {
    let need = clone_set.len() + split_set.len();
    if need <= budget {
        return;
    }
    warn!(need, budget, "splat cap reached, keeping strongest candidates");
    let mut candidates: Vec<(OrderedFloat<f32>, bool, usize)> = clone_set
        .iter()
        .map(|&i| (OrderedFloat(avg_grads[i]), false, i))
        .chain(
            split_set
                .iter()
                .map(|&i| (OrderedFloat(avg_grads[i]), true, i)),
        )
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    candidates.truncate(budget);

    clone_set.clear();
    split_set.clear();
    for (_, is_split, i) in candidates {
        if is_split {
            split_set.push(i);
        } else {
            clone_set.push(i);
        }
    }
    clone_set.sort_unstable();
    split_set.sort_unstable();
}

/// Standard normal sample via the Box-Muller transform.
fn sample_normal(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.gen_range(f32::MIN_POSITIVE..1.0);
    let u2: f32 = rng.r#gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

/// Duplicate with a small position jitter proportional to the parent's own
/// scale, so the copy lands inside the region the parent covers.
fn clone_with_jitter(parent: &Splat, rng: &mut StdRng) -> Splat {
    let scale = parent.scale();
    let jitter = Vec3::new(
        sample_normal(rng) * scale.x,
        sample_normal(rng) * scale.y,
        sample_normal(rng) * scale.z,
    ) * CLONE_JITTER_FRACTION;
    let mut child = parent.clone();
    child.position += jitter;
    child
}

/// One split child: position sampled from the parent's anisotropic
/// footprint, scale shrunk by [`SPLIT_SCALE_SHRINK`].
fn split_child(parent: &Splat, rng: &mut StdRng) -> Splat {
    let scale = parent.scale();
    let local = Vec3::new(
        sample_normal(rng) * scale.x,
        sample_normal(rng) * scale.y,
        sample_normal(rng) * scale.z,
    );
    let mut child = parent.clone();
    child.position += parent.rotation_matrix() * local;
    child.log_scale = parent.log_scale - Vec3::splat(SPLIT_SCALE_SHRINK.ln());
    child
}
