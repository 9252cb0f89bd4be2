//! Loading raw point exports.
//!
//! Two formats are accepted, chosen by file extension:
//! - `.csv` with a header row: `point[,device_id][,device_type]`
//! - anything else: a JSON array of raw points

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use pointmap_core::RawPoint;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "name")]
    point: String,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    device_type: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl From<CsvRow> for RawPoint {
    fn from(row: CsvRow) -> Self {
        RawPoint {
            name: row.point,
            device_id: non_empty(row.device_id),
            device_type: non_empty(row.device_type),
        }
    }
}

/// Read raw points from `path`.
pub fn load_points(path: &Path) -> Result<Vec<RawPoint>> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    if is_csv {
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        read_csv(file).with_context(|| format!("Failed to read CSV {}", path.display()))
    } else {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON points in {}", path.display()))
    }
}

fn read_csv<R: std::io::Read>(reader: R) -> Result<Vec<RawPoint>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut points = Vec::new();
    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        // Header is line 1.
        let row = result.with_context(|| format!("Invalid row at line {}", line + 2))?;
        points.push(row.into());
    }
    Ok(points)
}
