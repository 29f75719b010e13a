//! Immutable scene snapshots for evaluation and export

use crate::collection::SplatCollection;
use crate::splat::Splat;

/// A frozen copy of the collection at a point in the run
///
/// Evaluation and export run against snapshots, never the live collection,
/// so a structural mutation can never race a reader. The generation records
/// which structural revision the snapshot was taken from.
#[derive(Debug, Clone)]
pub struct SceneSnapshot {
    splats: Vec<Splat>,
    generation: u64,
}

impl SceneSnapshot {
    pub fn of(collection: &SplatCollection) -> Self {
        Self {
            splats: collection.as_slice().to_vec(),
            generation: collection.generation(),
        }
    }

    pub fn len(&self) -> usize {
        self.splats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splats.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn splats(&self) -> &[Splat] {
        &self.splats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_snapshot_is_detached_from_collection() {
        let mut c = SplatCollection::from_splats(vec![Splat::new(
            Vec3::ZERO,
            0.1,
            [1.0, 0.0, 0.0],
            0.5,
        )]);
        let snap = SceneSnapshot::of(&c);
        c.compact(&[false]);
        assert_eq!(c.len(), 0);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.generation() + 1, c.generation());
    }
}
