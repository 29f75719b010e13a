//! Arena-style splat storage with generation tracking

use tracing::debug;

use crate::splat::Splat;

/// Stable handle into a [`SplatCollection`]
///
/// A handle is only valid for the generation it was issued in. Every
/// structural change (densification growth, prune compaction) bumps the
/// collection's generation, after which stale handles stop resolving and
/// consumers must re-fetch by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SplatRef {
    index: usize,
    generation: u64,
}

impl SplatRef {
    /// Slot index this handle points at.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Generation the handle was issued in.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Ordered collection of splats, exclusively owned by the training run
///
/// The collection only changes size through densification (grow) and
/// pruning (shrink); both bump the generation counter so any cached
/// [`SplatRef`] from before the change is invalidated.
#[derive(Debug, Clone, Default)]
pub struct SplatCollection {
    splats: Vec<Splat>,
    generation: u64,
}

impl SplatCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_splats(splats: Vec<Splat>) -> Self {
        Self {
            splats,
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.splats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splats.is_empty()
    }

    /// Current structural generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Issue a handle for `index`, valid until the next structural change.
    pub fn handle(&self, index: usize) -> Option<SplatRef> {
        if index < self.splats.len() {
            Some(SplatRef {
                index,
                generation: self.generation,
            })
        } else {
            None
        }
    }

    /// Resolve a handle. Returns `None` if the handle is stale or out of
    /// bounds.
    pub fn get(&self, handle: SplatRef) -> Option<&Splat> {
        if handle.generation != self.generation {
            return None;
        }
        self.splats.get(handle.index)
    }

    /// Mutable variant of [`get`](Self::get); same staleness rules.
    pub fn get_mut(&mut self, handle: SplatRef) -> Option<&mut Splat> {
        if handle.generation != self.generation {
            return None;
        }
        self.splats.get_mut(handle.index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Splat> {
        self.splats.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Splat> {
        self.splats.iter_mut()
    }

    pub fn as_slice(&self) -> &[Splat] {
        &self.splats
    }

    pub fn as_mut_slice(&mut self) -> &mut [Splat] {
        &mut self.splats
    }

    /// Append new splats. Structural: bumps the generation once for the
    /// whole batch.
    pub fn extend(&mut self, new_splats: impl IntoIterator<Item = Splat>) {
        let before = self.splats.len();
        self.splats.extend(new_splats);
        if self.splats.len() != before {
            self.generation += 1;
        }
    }

    /// Drop every splat whose `keep` entry is false, compacting in place.
    ///
    /// Returns the old-index to new-index mapping (`None` for removed
    /// slots). Bumps the generation even when nothing was removed, since
    /// callers use compaction as the structural commit point of a
    /// densify/prune pass.
    pub fn compact(&mut self, keep: &[bool]) -> Vec<Option<usize>> {
        debug_assert_eq!(keep.len(), self.splats.len());
        let mut remap = vec![None; self.splats.len()];
        let mut write = 0;
        for read in 0..self.splats.len() {
            if keep.get(read).copied().unwrap_or(false) {
                if read != write {
                    self.splats.swap(read, write);
                }
                remap[read] = Some(write);
                write += 1;
            }
        }
        let removed = self.splats.len() - write;
        self.splats.truncate(write);
        self.generation += 1;
        if removed > 0 {
            debug!(removed, remaining = write, "compacted splat collection");
        }
        remap
    }
}
