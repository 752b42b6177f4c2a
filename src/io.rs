//! CSV export of analysis products for downstream plotting tools.
//!
//! The core produces plain numeric arrays; these writers flatten them into
//! simple column files. Output paths are always supplied by the caller.

use crate::cluster::ClusterSegments;
use crate::cpd_extractor::CpdResult;
use crate::error::Result;
use csv::WriterBuilder;
use std::path::Path;

/// Writes a CPD trace as `window, time/s, CPD/V, degenerate` rows.
pub fn save_cpd_csv(result: &CpdResult, file_path: &Path) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_path(file_path)?;

    wtr.write_record(["Window", " Time/s", " CPD/V", " Degenerate"])?;
    let times = result.window_times();
    for (w, (&cpd, &time)) in result.cpd.iter().zip(times.iter()).enumerate() {
        wtr.write_record(&[
            w.to_string(),
            time.to_string(),
            cpd.to_string(),
            result.degenerate_windows.contains(&w).to_string(),
        ])?;
    }
    wtr.flush()?;

    Ok(())
}

/// Writes clustered segments as `cluster, row, col, y/m, x/m, value` rows,
/// one line per interior pixel.
pub fn save_segments_csv(segments: &ClusterSegments, file_path: &Path) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_path(file_path)?;

    wtr.write_record(["Cluster", " Row", " Col", " Y/m", " X/m", " Value"])?;
    for cluster in 0..segments.indices.len() {
        let indices = &segments.indices[cluster];
        let positions = &segments.positions[cluster];
        let averages = &segments.averages[cluster];
        for (i, &(row, col)) in indices.iter().enumerate() {
            wtr.write_record(&[
                cluster.to_string(),
                row.to_string(),
                col.to_string(),
                positions[[i, 0]].to_string(),
                positions[[i, 1]].to_string(),
                averages[i].to_string(),
            ])?;
        }
    }
    wtr.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpd_extractor::{CpdResult, WindowLayout};
    use ndarray::{array, Array2};

    #[test]
    fn test_save_cpd_csv_writes_one_row_per_window() {
        let result = CpdResult {
            layout: WindowLayout {
                decimation: 100,
                windows: 3,
                remainder: 0,
            },
            coefficients: Array2::zeros((3, 3)),
            cpd: array![0.1f32, f32::NAN, 0.3],
            degenerate_windows: vec![1],
            window_time: 1e-4,
        };

        let dir = std::env::temp_dir();
        let path = dir.join("gmode_cpd_trace_test.csv");
        save_cpd_csv(&result, &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].contains("true"));
        std::fs::remove_file(&path).ok();
    }
}
