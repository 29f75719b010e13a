//! Radiance
//!
//! Training-run orchestration for splat-based scene reconstruction.
//! This facade re-exports the workspace crates; see the `demos/` examples
//! for end-to-end usage with a toy gradient-step backend.

pub use radiance_data as data;
pub use radiance_scene as scene;
pub use radiance_train as train;
