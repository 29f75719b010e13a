//! Checkpoint persistence for training runs
//!
//! A checkpoint captures everything needed to resume mid-run with identical
//! behavior: the run state (iteration counter, seed, extent, SH degree,
//! position LR curve), the full splat collection, the densification stats,
//! and the opaque optimizer blob. Files are rkyv-serialized, LZ4-compressed
//! behind a magic/version header, and written atomically via a temp file
//! rename so a crash never leaves a partial checkpoint behind.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rkyv::{Archive, Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use radiance_scene::{DensifyStats, SH_COEFF_COUNT, Splat, SplatCollection};

use crate::external::OptimizerState;
use crate::schedule::ExponentialLr;
use crate::trainer::RunState;

const MAGIC: &[u8; 8] = b"RADCKPT\0";
const VERSION: u32 = 1;
const HEADER_LEN: usize = MAGIC.len() + 4;

/// Which checkpoint a resume should start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeTarget {
    /// Highest-numbered checkpoint in the run directory.
    Latest,
    /// Exact iteration; missing is an error, never a silent fresh start.
    Iteration(u64),
}

impl fmt::Display for ResumeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResumeTarget::Latest => write!(f, "latest"),
            ResumeTarget::Iteration(n) => write!(f, "iteration {n}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no checkpoint found for {0}")]
    NotFound(ResumeTarget),
    #[error("corrupt checkpoint {}: {detail}", .path.display())]
    Corrupt { path: PathBuf, detail: String },
    #[error("checkpoint io: {0}")]
    Io(#[from] io::Error),
}

fn corrupt(path: &Path, detail: impl Into<String>) -> CheckpointError {
    CheckpointError::Corrupt {
        path: path.to_path_buf(),
        detail: detail.into(),
    }
}

/// Serialized position LR curve parameters.
#[derive(Archive, Deserialize, Serialize)]
struct LrCurveData {
    lr_init: f32,
    lr_final: f32,
    delay_steps: u64,
    delay_mult: f32,
    max_steps: u64,
}

/// Serialized run counters and schedule state.
#[derive(Archive, Deserialize, Serialize)]
struct RunStateData {
    iteration: u64,
    seed: u64,
    camera_extent: f32,
    active_sh_degree: u32,
    position_lr: LrCurveData,
}

/// Splat attributes in parallel column arrays.
#[derive(Archive, Deserialize, Serialize)]
struct SplatArrays {
    positions: Vec<[f32; 3]>,
    /// Quaternions as (x, y, z, w)
    rotations: Vec<[f32; 4]>,
    log_scales: Vec<[f32; 3]>,
    opacity_logits: Vec<f32>,
    /// SH coefficients flattened coefficient-major, RGB per coefficient
    sh: Vec<[f32; 3 * SH_COEFF_COUNT]>,
}

/// Densification stat arrays, one entry per splat.
#[derive(Archive, Deserialize, Serialize)]
struct StatsArrays {
    grad_accum: Vec<f32>,
    obs_count: Vec<u32>,
    max_radius: Vec<f32>,
    age: Vec<u32>,
}

#[derive(Archive, Deserialize, Serialize)]
struct CheckpointData {
    run: RunStateData,
    splats: SplatArrays,
    stats: StatsArrays,
    optimizer: Vec<u8>,
}

/// Everything restored from a checkpoint file.
pub struct LoadedCheckpoint {
    pub run_state: RunState,
    pub splats: SplatCollection,
    pub stats: DensifyStats,
    pub optimizer: OptimizerState,
}

/// Saves and restores checkpoints under one run directory
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File path for a checkpoint at `iteration`.
    pub fn path_for(&self, iteration: u64) -> PathBuf {
        self.dir.join(format!("chkpnt{iteration}.ckpt"))
    }

    /// Write a checkpoint for the current run state. The file appears
    /// atomically: data goes to a temp file first and is renamed into
    /// place.
    pub fn save(
        &self,
        run_state: &RunState,
        scene: &SplatCollection,
        stats: &DensifyStats,
        optimizer: &OptimizerState,
    ) -> Result<PathBuf, CheckpointError> {
        let data = CheckpointData {
            run: encode_run_state(run_state),
            splats: encode_splats(scene),
            stats: encode_stats(stats),
            optimizer: optimizer.as_bytes().to_vec(),
        };
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let compressed = lz4_flex::compress_prepend_size(&bytes);

        let mut file = Vec::with_capacity(HEADER_LEN + compressed.len());
        file.extend_from_slice(MAGIC);
        file.extend_from_slice(&VERSION.to_le_bytes());
        file.extend_from_slice(&compressed);

        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(run_state.iteration);
        let tmp = path.with_extension("ckpt.tmp");
        fs::write(&tmp, &file)?;
        fs::rename(&tmp, &path)?;
        info!(
            iteration = run_state.iteration,
            splats = scene.len(),
            bytes = file.len(),
            path = %path.display(),
            "saved checkpoint"
        );
        Ok(path)
    }

    /// Load the checkpoint written at `iteration`. A missing file maps to
    /// [`CheckpointError::NotFound`]; anything unreadable past that maps to
    /// [`CheckpointError::Corrupt`].
    pub fn load(&self, iteration: u64) -> Result<LoadedCheckpoint, CheckpointError> {
        let path = self.path_for(iteration);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                CheckpointError::NotFound(ResumeTarget::Iteration(iteration))
            } else {
                CheckpointError::Io(e)
            }
        })?;

        if bytes.len() < HEADER_LEN {
            return Err(corrupt(&path, "truncated header"));
        }
        let (header, payload) = bytes.split_at(HEADER_LEN);
        if &header[..MAGIC.len()] != MAGIC {
            return Err(corrupt(&path, "bad magic"));
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&header[MAGIC.len()..]);
        let version = u32::from_le_bytes(version);
        if version != VERSION {
            return Err(corrupt(&path, format!("unsupported version {version}")));
        }

        let decompressed = lz4_flex::decompress_size_prepended(payload)
            .map_err(|e| corrupt(&path, format!("decompression failed: {e}")))?;
        let archived = rkyv::access::<ArchivedCheckpointData, rkyv::rancor::Error>(&decompressed)
            .map_err(|e| corrupt(&path, e.to_string()))?;
        let data: CheckpointData = rkyv::deserialize::<CheckpointData, rkyv::rancor::Error>(archived)
            .map_err(|e| corrupt(&path, e.to_string()))?;

        let splats = decode_splats(data.splats).map_err(|detail| corrupt(&path, detail))?;
        let stats = decode_stats(data.stats, splats.len()).map_err(|detail| corrupt(&path, detail))?;
        info!(
            iteration,
            splats = splats.len(),
            path = %path.display(),
            "loaded checkpoint"
        );
        Ok(LoadedCheckpoint {
            run_state: decode_run_state(data.run),
            splats,
            stats,
            optimizer: OptimizerState::from_bytes(data.optimizer),
        })
    }

    /// Iterations with a checkpoint on disk, sorted ascending. Temp files
    /// and unrelated names are skipped. A missing run directory reads as
    /// empty.
    pub fn list(&self) -> Result<Vec<u64>, CheckpointError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::Io(e)),
        };
        let mut iterations = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(n) = name
                .strip_prefix("chkpnt")
                .and_then(|rest| rest.strip_suffix(".ckpt"))
                .and_then(|digits| digits.parse::<u64>().ok())
            {
                iterations.push(n);
            }
        }
        iterations.sort_unstable();
        Ok(iterations)
    }

    /// Highest-numbered checkpoint, if any.
    pub fn latest(&self) -> Result<Option<u64>, CheckpointError> {
        Ok(self.list()?.into_iter().next_back())
    }

    /// Map a resume target to a concrete checkpoint iteration.
    pub fn resolve(&self, target: ResumeTarget) -> Result<u64, CheckpointError> {
        match target {
            ResumeTarget::Latest => self
                .latest()?
                .ok_or(CheckpointError::NotFound(ResumeTarget::Latest)),
            ResumeTarget::Iteration(n) => {
                if self.path_for(n).is_file() {
                    Ok(n)
                } else {
                    Err(CheckpointError::NotFound(ResumeTarget::Iteration(n)))
                }
            }
        }
    }
}

fn encode_run_state(run_state: &RunState) -> RunStateData {
    RunStateData {
        iteration: run_state.iteration,
        seed: run_state.seed,
        camera_extent: run_state.camera_extent,
        active_sh_degree: run_state.active_sh_degree,
        position_lr: LrCurveData {
            lr_init: run_state.position_lr.lr_init,
            lr_final: run_state.position_lr.lr_final,
            delay_steps: run_state.position_lr.delay_steps,
            delay_mult: run_state.position_lr.delay_mult,
            max_steps: run_state.position_lr.max_steps,
        },
    }
}

fn decode_run_state(data: RunStateData) -> RunState {
    RunState {
        iteration: data.iteration,
        seed: data.seed,
        camera_extent: data.camera_extent,
        active_sh_degree: data.active_sh_degree,
        position_lr: ExponentialLr {
            lr_init: data.position_lr.lr_init,
            lr_final: data.position_lr.lr_final,
            delay_steps: data.position_lr.delay_steps,
            delay_mult: data.position_lr.delay_mult,
            max_steps: data.position_lr.max_steps,
        },
    }
}

fn encode_splats(scene: &SplatCollection) -> SplatArrays {
    let mut arrays = SplatArrays {
        positions: Vec::with_capacity(scene.len()),
        rotations: Vec::with_capacity(scene.len()),
        log_scales: Vec::with_capacity(scene.len()),
        opacity_logits: Vec::with_capacity(scene.len()),
        sh: Vec::with_capacity(scene.len()),
    };
    for splat in scene.iter() {
        arrays.positions.push(splat.position.to_array());
        arrays.rotations.push(splat.rotation.to_array());
        arrays.log_scales.push(splat.log_scale.to_array());
        arrays.opacity_logits.push(splat.opacity_logit);
        let mut flat = [0.0f32; 3 * SH_COEFF_COUNT];
        for (c, rgb) in splat.sh.iter().enumerate() {
            flat[c * 3..c * 3 + 3].copy_from_slice(rgb);
        }
        arrays.sh.push(flat);
    }
    arrays
}

fn decode_splats(arrays: SplatArrays) -> Result<SplatCollection, String> {
    let n = arrays.positions.len();
    if arrays.rotations.len() != n
        || arrays.log_scales.len() != n
        || arrays.opacity_logits.len() != n
        || arrays.sh.len() != n
    {
        return Err("splat array lengths disagree".to_string());
    }
    let mut splats = Vec::with_capacity(n);
    for i in 0..n {
        let [x, y, z, w] = arrays.rotations[i];
        let mut sh = [[0.0f32; 3]; SH_COEFF_COUNT];
        for (c, rgb) in sh.iter_mut().enumerate() {
            rgb.copy_from_slice(&arrays.sh[i][c * 3..c * 3 + 3]);
        }
        splats.push(Splat {
            position: glam::Vec3::from_array(arrays.positions[i]),
            rotation: glam::Quat::from_xyzw(x, y, z, w),
            log_scale: glam::Vec3::from_array(arrays.log_scales[i]),
            opacity_logit: arrays.opacity_logits[i],
            sh,
        });
    }
    Ok(SplatCollection::from_splats(splats))
}

fn encode_stats(stats: &DensifyStats) -> StatsArrays {
    let (grad_accum, obs_count, max_radius, age) = stats.raw();
    StatsArrays {
        grad_accum: grad_accum.to_vec(),
        obs_count: obs_count.to_vec(),
        max_radius: max_radius.to_vec(),
        age: age.to_vec(),
    }
}

fn decode_stats(arrays: StatsArrays, splat_count: usize) -> Result<DensifyStats, String> {
    let n = arrays.grad_accum.len();
    if arrays.obs_count.len() != n || arrays.max_radius.len() != n || arrays.age.len() != n {
        return Err("stat array lengths disagree".to_string());
    }
    if n != splat_count {
        return Err(format!("{n} stat entries for {splat_count} splats"));
    }
    Ok(DensifyStats::from_raw(
        arrays.grad_accum,
        arrays.obs_count,
        arrays.max_radius,
        arrays.age,
    ))
}
