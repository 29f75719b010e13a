//! Sparse point-cloud loading from PLY files

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use glam::Vec3;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::dataset::{DataError, ScenePoints};

// Generic vertex element: property names differ between exporters, so
// each vertex is read as a property map and resolved by name.
#[derive(Deserialize, Debug)]
struct PlyPointFile {
    #[serde(rename = "vertex")]
    vertex: Vec<HashMap<String, JsonValue>>,
}

fn get_f32(prop: Option<&JsonValue>) -> Option<f32> {
    prop.and_then(|v| match v {
        JsonValue::Number(n) => n.as_f64().map(|f| f as f32),
        _ => None,
    })
}

fn get_u8(prop: Option<&JsonValue>) -> Option<u8> {
    prop.and_then(|v| match v {
        JsonValue::Number(n) => n
            .as_u64()
            .map(|u| u as u8)
            .or_else(|| n.as_i64().map(|i| i as u8)),
        _ => None,
    })
}

/// Load a sparse point cloud from a PLY file.
///
/// Accepts `red`/`green`/`blue` or `r`/`g`/`b` color properties; points
/// without color fall back to mid-gray. A file with no vertex positions is
/// malformed.
pub fn load_scene_points(path: &Path) -> Result<ScenePoints, DataError> {
    debug!(path = %path.display(), "loading PLY point cloud");
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let ply: PlyPointFile = serde_ply::from_reader(reader)
        .map_err(|e| DataError::Malformed(format!("PLY parse error: {e}")))?;

    if ply.vertex.is_empty() {
        return Err(DataError::Malformed(format!(
            "no vertices in {}",
            path.display()
        )));
    }

    let mut points = ScenePoints::default();
    for (i, vertex) in ply.vertex.iter().enumerate() {
        let x = get_f32(vertex.get("x"))
            .ok_or_else(|| DataError::Malformed(format!("missing 'x' at vertex {i}")))?;
        let y = get_f32(vertex.get("y"))
            .ok_or_else(|| DataError::Malformed(format!("missing 'y' at vertex {i}")))?;
        let z = get_f32(vertex.get("z"))
            .ok_or_else(|| DataError::Malformed(format!("missing 'z' at vertex {i}")))?;

        let color = if let (Some(r), Some(g), Some(b)) = (
            get_u8(vertex.get("red")),
            get_u8(vertex.get("green")),
            get_u8(vertex.get("blue")),
        ) {
            [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0]
        } else if let (Some(r), Some(g), Some(b)) = (
            get_u8(vertex.get("r")),
            get_u8(vertex.get("g")),
            get_u8(vertex.get("b")),
        ) {
            [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0]
        } else {
            [0.5, 0.5, 0.5]
        };

        points.push(Vec3::new(x, y, z), color);
    }

    info!(
        points = points.len(),
        path = %path.display(),
        "loaded sparse point cloud"
    );
    Ok(points)
}
