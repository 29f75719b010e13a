//! Point cloud export
//!
//! Writes the scene as an ASCII PLY in the layout downstream splat viewers
//! expect: positions, zeroed normals, DC spherical harmonics first and the
//! higher-order coefficients channel-major, then raw opacity logits, log
//! scales and the rotation quaternion with the real part first.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use radiance_scene::{SH_COEFF_COUNT, SceneSnapshot};

/// Non-DC spherical harmonic coefficients per color channel.
const REST_COEFFS: usize = SH_COEFF_COUNT - 1;

/// Write `snapshot` to `run_dir/point_cloud/iteration_{N}/point_cloud.ply`,
/// creating the directories as needed. Returns the file path.
pub fn export_point_cloud(
    snapshot: &SceneSnapshot,
    run_dir: &Path,
    iteration: u64,
) -> io::Result<PathBuf> {
    let dir = run_dir
        .join("point_cloud")
        .join(format!("iteration_{iteration}"));
    fs::create_dir_all(&dir)?;
    let path = dir.join("point_cloud.ply");
    let mut file = BufWriter::new(File::create(&path)?);

    writeln!(file, "ply")?;
    writeln!(file, "format ascii 1.0")?;
    writeln!(file, "element vertex {}", snapshot.len())?;
    for axis in ["x", "y", "z", "nx", "ny", "nz"] {
        writeln!(file, "property float {axis}")?;
    }
    for ch in 0..3 {
        writeln!(file, "property float f_dc_{ch}")?;
    }
    for i in 0..3 * REST_COEFFS {
        writeln!(file, "property float f_rest_{i}")?;
    }
    writeln!(file, "property float opacity")?;
    for i in 0..3 {
        writeln!(file, "property float scale_{i}")?;
    }
    for i in 0..4 {
        writeln!(file, "property float rot_{i}")?;
    }
    writeln!(file, "end_header")?;

    for splat in snapshot.splats() {
        write!(
            file,
            "{} {} {} 0 0 0",
            splat.position.x, splat.position.y, splat.position.z
        )?;
        for ch in 0..3 {
            write!(file, " {}", splat.sh[0][ch])?;
        }
        for ch in 0..3 {
            for c in 1..SH_COEFF_COUNT {
                write!(file, " {}", splat.sh[c][ch])?;
            }
        }
        write!(file, " {}", splat.opacity_logit)?;
        write!(
            file,
            " {} {} {}",
            splat.log_scale.x, splat.log_scale.y, splat.log_scale.z
        )?;
        writeln!(
            file,
            " {} {} {} {}",
            splat.rotation.w, splat.rotation.x, splat.rotation.y, splat.rotation.z
        )?;
    }
    file.flush()?;
    info!(
        iteration,
        splats = snapshot.len(),
        path = %path.display(),
        "exported point cloud"
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use radiance_scene::{Splat, SplatCollection};

    /// 3 position + 3 normal + 3 dc + 45 rest + 1 opacity + 3 scale + 4 rot
    const FIELDS_PER_ROW: usize = 62;

    fn snapshot() -> SceneSnapshot {
        let mut a = Splat::new(Vec3::new(1.5, -2.0, 0.25), 0.02, [0.8, 0.2, 0.1], 0.6);
        a.sh[1] = [0.5, 0.25, 0.125];
        let b = Splat::new(Vec3::new(0.0, 3.0, -1.0), 0.05, [0.1, 0.9, 0.4], 0.3);
        SceneSnapshot::of(&SplatCollection::from_splats(vec![a, b]))
    }

    #[test]
    fn test_export_layout() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = snapshot();
        let path = export_point_cloud(&snapshot, dir.path(), 7000).unwrap();
        assert!(path.ends_with("point_cloud/iteration_7000/point_cloud.ply"));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "ply");
        assert_eq!(lines[1], "format ascii 1.0");
        assert_eq!(lines[2], "element vertex 2");

        let header_end = lines.iter().position(|l| *l == "end_header").unwrap();
        let properties = lines[3..header_end]
            .iter()
            .filter(|l| l.starts_with("property float"))
            .count();
        assert_eq!(properties, FIELDS_PER_ROW);

        let rows = &lines[header_end + 1..];
        assert_eq!(rows.len(), 2);
        for row in rows {
            assert_eq!(row.split_whitespace().count(), FIELDS_PER_ROW);
        }
    }

    #[test]
    fn test_export_writes_raw_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = snapshot();
        let path = export_point_cloud(&snapshot, dir.path(), 1).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let row = contents
            .lines()
            .skip_while(|l| *l != "end_header")
            .nth(1)
            .unwrap();
        let fields: Vec<f32> = row
            .split_whitespace()
            .map(|v| v.parse().unwrap())
            .collect();

        let splat = &snapshot.splats()[0];
        assert_eq!(fields[0], splat.position.x);
        assert_eq!(fields[1], splat.position.y);
        assert_eq!(fields[2], splat.position.z);
        // normals are placeholders
        assert_eq!(&fields[3..6], &[0.0, 0.0, 0.0]);
        assert_eq!(fields[6], splat.sh[0][0]);
        // first rest coefficient of the red channel
        assert_eq!(fields[9], splat.sh[1][0]);
        // opacity and scale are stored raw, not activated
        assert_eq!(fields[54], splat.opacity_logit);
        assert_eq!(fields[55], splat.log_scale.x);
        assert_eq!(fields[58], splat.rotation.w);
    }
}
