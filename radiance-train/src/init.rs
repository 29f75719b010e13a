//! Scene seeding from sparse reconstruction points

use glam::{Quat, Vec3};
use tracing::info;

use radiance_data::ScenePoints;
use radiance_scene::{SH_COEFF_COUNT, Splat, SplatCollection, inverse_sigmoid};

/// DC basis constant of the zeroth spherical harmonic.
const SH_C0: f32 = 0.282_094_79;

/// Reference points considered when estimating per-point spacing. Larger
/// clouds are strided down to this many references to keep seeding cheap.
const SPACING_REFERENCE_CAP: usize = 4_096;

/// How each seed splat picks its starting scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleStrategy {
    /// Distance to the nearest other point, so dense regions start with
    /// small splats and sparse regions with large ones
    NeighborSpacing,
    /// One fixed real-space scale for every splat
    Fixed(f32),
}

impl Default for ScaleStrategy {
    fn default() -> Self {
        Self::NeighborSpacing
    }
}

/// Builds the initial splat collection from a sparse point cloud
#[derive(Debug, Clone)]
pub struct SplatInitializer {
    pub scale_strategy: ScaleStrategy,
    /// Real-space starting opacity
    pub initial_opacity: f32,
}

impl Default for SplatInitializer {
    fn default() -> Self {
        Self {
            scale_strategy: ScaleStrategy::default(),
            initial_opacity: 0.1,
        }
    }
}

impl SplatInitializer {
    /// One splat per point: position from the point, DC color from its RGB,
    /// identity rotation, low starting opacity.
    pub fn initialize(&self, points: &ScenePoints) -> SplatCollection {
        let scales = match self.scale_strategy {
            ScaleStrategy::NeighborSpacing => neighbor_spacing(&points.positions),
            ScaleStrategy::Fixed(s) => vec![s.max(1e-7); points.len()],
        };

        let opacity_logit = inverse_sigmoid(self.initial_opacity);
        let splats: Vec<Splat> = points
            .positions
            .iter()
            .zip(&points.colors)
            .zip(&scales)
            .map(|((&position, &color), &scale)| {
                let mut sh = [[0.0; 3]; SH_COEFF_COUNT];
                sh[0] = [
                    (color[0] - 0.5) / SH_C0,
                    (color[1] - 0.5) / SH_C0,
                    (color[2] - 0.5) / SH_C0,
                ];
                Splat {
                    position,
                    rotation: Quat::IDENTITY,
                    log_scale: Vec3::splat(scale.max(1e-7).ln()),
                    opacity_logit,
                    sh,
                }
            })
            .collect();

        info!(splats = splats.len(), "seeded scene from sparse points");
        SplatCollection::from_splats(splats)
    }
}

/// Per-point spacing estimate: distance to the nearest reference point.
/// References are a strided subset capped at [`SPACING_REFERENCE_CAP`] so
/// large clouds stay cheap to seed.
fn neighbor_spacing(positions: &[Vec3]) -> Vec<f32> {
    if positions.len() < 2 {
        return vec![0.01; positions.len()];
    }
    let stride = positions.len().div_ceil(SPACING_REFERENCE_CAP).max(1);
    let references: Vec<(usize, Vec3)> = positions
        .iter()
        .copied()
        .enumerate()
        .step_by(stride)
        .collect();

    positions
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let nearest = references
                .iter()
                .filter(|(j, _)| *j != i)
                .map(|(_, r)| (*r - p).length_squared())
                .fold(f32::INFINITY, f32::min);
            if nearest.is_finite() {
                nearest.sqrt().max(1e-7)
            } else {
                0.01
            }
        })
        .collect()
}
