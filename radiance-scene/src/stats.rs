//! Per-splat densification statistics

/// One splat's contribution to an iteration, reported by the gradient step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GradSample {
    /// Magnitude of the positional gradient for this splat
    pub grad_norm: f32,
    /// Projected screen-space radius in pixels
    pub radius: f32,
    /// Whether the splat contributed to the rendered view
    pub visible: bool,
}

/// Parallel per-splat statistic arrays, kept in lockstep with the
/// collection
///
/// Accumulators (gradient sum, observation count, max radius) feed the
/// densify/prune decisions and are cleared after every scheduled pass.
/// Age counts iterations since a splat was created and survives pruning
/// via the compaction remap; fresh splats always start at zero, never
/// inheriting from a parent.
#[derive(Debug, Clone, Default)]
pub struct DensifyStats {
    grad_accum: Vec<f32>,
    obs_count: Vec<u32>,
    max_radius: Vec<f32>,
    age: Vec<u32>,
}

impl DensifyStats {
    pub fn new(len: usize) -> Self {
        Self {
            grad_accum: vec![0.0; len],
            obs_count: vec![0; len],
            max_radius: vec![0.0; len],
            age: vec![0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.grad_accum.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grad_accum.is_empty()
    }

    /// Grow to `len` slots, zero-filling new entries. Shrinking is only
    /// done through [`rebuild`](Self::rebuild).
    pub fn ensure_len(&mut self, len: usize) {
        if len > self.grad_accum.len() {
            self.grad_accum.resize(len, 0.0);
            self.obs_count.resize(len, 0);
            self.max_radius.resize(len, 0.0);
            self.age.resize(len, 0);
        }
    }

    /// Fold one iteration's samples in. `samples` must be keyed 1:1 with
    /// the collection. Only visible splats accumulate gradient evidence;
    /// every splat ages.
    pub fn accumulate(&mut self, samples: &[GradSample]) {
        debug_assert_eq!(samples.len(), self.grad_accum.len());
        for (i, sample) in samples.iter().enumerate().take(self.grad_accum.len()) {
            if sample.visible {
                self.grad_accum[i] += sample.grad_norm;
                self.obs_count[i] += 1;
                if sample.radius > self.max_radius[i] {
                    self.max_radius[i] = sample.radius;
                }
            }
            self.age[i] = self.age[i].saturating_add(1);
        }
    }

    /// Average accumulated gradient per splat; zero where a splat was never
    /// observed.
    pub fn average_gradients(&self) -> Vec<f32> {
        self.grad_accum
            .iter()
            .zip(&self.obs_count)
            .map(|(&g, &n)| if n > 0 { g / n as f32 } else { 0.0 })
            .collect()
    }

    /// Maximum observed screen radius for splat `i`.
    pub fn max_radius(&self, i: usize) -> f32 {
        self.max_radius.get(i).copied().unwrap_or(0.0)
    }

    /// Age in iterations of splat `i`.
    pub fn age(&self, i: usize) -> u32 {
        self.age.get(i).copied().unwrap_or(0)
    }

    /// Zero the gradient/observation/radius accumulators, keeping ages.
    /// Called at the end of every scheduled densify pass.
    pub fn clear_accumulators(&mut self) {
        self.grad_accum.fill(0.0);
        self.obs_count.fill(0);
        self.max_radius.fill(0.0);
    }

    /// Rebuild after a structural change: `remap` maps old indices to new
    /// ones (as returned by collection compaction) and `new_len` is the
    /// final collection size. Ages follow their splats; every accumulator
    /// restarts at zero and slots beyond the remap (newly created splats)
    /// start fresh.
    pub fn rebuild(&mut self, remap: &[Option<usize>], new_len: usize) {
        let mut age = vec![0; new_len];
        for (old, target) in remap.iter().enumerate() {
            if let Some(new) = *target {
                if new < new_len {
                    age[new] = self.age.get(old).copied().unwrap_or(0);
                }
            }
        }
        self.age = age;
        self.grad_accum = vec![0.0; new_len];
        self.obs_count = vec![0; new_len];
        self.max_radius = vec![0.0; new_len];
    }

    /// Raw accessors used by checkpointing.
    pub fn raw(&self) -> (&[f32], &[u32], &[f32], &[u32]) {
        (&self.grad_accum, &self.obs_count, &self.max_radius, &self.age)
    }

    /// Restore from checkpointed arrays. All four must share one length.
    pub fn from_raw(
        grad_accum: Vec<f32>,
        obs_count: Vec<u32>,
        max_radius: Vec<f32>,
        age: Vec<u32>,
    ) -> Self {
        debug_assert_eq!(grad_accum.len(), obs_count.len());
        debug_assert_eq!(grad_accum.len(), max_radius.len());
        debug_assert_eq!(grad_accum.len(), age.len());
        Self {
            grad_accum,
            obs_count,
            max_radius,
            age,
        }
    }
}
