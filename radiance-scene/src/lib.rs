//! Radiance Scene Crate
//!
//! Splat primitives and the mutable scene state a training run owns: the
//! arena-style collection with generation-tracked handles, the per-splat
//! densification statistics kept in lockstep with it, and immutable
//! snapshots for readers outside the iteration loop.

pub mod collection;
pub mod snapshot;
pub mod splat;
pub mod stats;

pub use collection::{SplatCollection, SplatRef};
pub use snapshot::SceneSnapshot;
pub use splat::{
    MAX_SH_DEGREE, SH_COEFF_COUNT, Splat, inverse_sigmoid, sh_coeffs_for_degree, sigmoid,
};
pub use stats::{DensifyStats, GradSample};
