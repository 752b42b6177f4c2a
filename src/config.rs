//! Validated acquisition parameters for a G-Mode scan.
//!
//! The acquisition software hands the analysis a flat bundle of named
//! scalars. Instead of absorbing arbitrary keys, the bundle is parsed into
//! an explicit [`ScanParams`] struct: missing or unknown keys are rejected
//! at construction, before any analysis runs.

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Key names as written by the acquisition software.
const KEY_SAMPLING_RATE: &str = "sampling_rate";
const KEY_DRIVE_FREQ: &str = "drive_freq";
const KEY_TOTAL_TIME: &str = "total_time";
const KEY_NUM_ROWS: &str = "num_rows";
const KEY_NUM_COLS: &str = "num_cols";
const KEY_FAST_SCAN_SIZE: &str = "FastScanSize";
const KEY_SLOW_SCAN_SIZE: &str = "SlowScanSize";

const REQUIRED_KEYS: [&str; 7] = [
    KEY_SAMPLING_RATE,
    KEY_DRIVE_FREQ,
    KEY_TOTAL_TIME,
    KEY_NUM_ROWS,
    KEY_NUM_COLS,
    KEY_FAST_SCAN_SIZE,
    KEY_SLOW_SCAN_SIZE,
];

/// Scan geometry and timing of one G-Mode acquisition.
///
/// # Fields
/// - `sampling_rate`: ADC rate in Hz.
/// - `drive_freq`: frequency of the single-tone excitation in Hz.
/// - `total_time`: acquisition time per pixel in seconds.
/// - `num_rows`, `num_cols`: pixel grid dimensions.
/// - `fast_scan_size`, `slow_scan_size`: physical scan extent in meters
///   along the fast (column) and slow (row) axes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanParams {
    pub sampling_rate: f64,
    pub drive_freq: f64,
    pub total_time: f64,
    pub num_rows: usize,
    pub num_cols: usize,
    pub fast_scan_size: f64,
    pub slow_scan_size: f64,
}

impl ScanParams {
    /// Parses the acquisition parameter bundle.
    ///
    /// Every required key must be present and every present key must be
    /// recognized; anything else is a fatal precondition violation.
    pub fn from_map(bundle: &HashMap<String, f64>) -> Result<Self> {
        for key in bundle.keys() {
            if !REQUIRED_KEYS.contains(&key.as_str()) {
                return Err(AnalysisError::UnknownParameter(key.clone()));
            }
        }

        let get = |key: &str| -> Result<f64> {
            bundle
                .get(key)
                .copied()
                .ok_or_else(|| AnalysisError::MissingParameter(key.to_string()))
        };

        let params = ScanParams {
            sampling_rate: get(KEY_SAMPLING_RATE)?,
            drive_freq: get(KEY_DRIVE_FREQ)?,
            total_time: get(KEY_TOTAL_TIME)?,
            num_rows: as_grid_dim(get(KEY_NUM_ROWS)?, "num_rows")?,
            num_cols: as_grid_dim(get(KEY_NUM_COLS)?, "num_cols")?,
            fast_scan_size: get(KEY_FAST_SCAN_SIZE)?,
            slow_scan_size: get(KEY_SLOW_SCAN_SIZE)?,
        };
        params.validate()?;
        Ok(params)
    }

    /// Checks that rates, durations and physical sizes are strictly positive.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("sampling_rate", self.sampling_rate),
            ("drive_freq", self.drive_freq),
            ("total_time", self.total_time),
            ("FastScanSize", self.fast_scan_size),
            ("SlowScanSize", self.slow_scan_size),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(AnalysisError::InvalidParameter {
                    name,
                    reason: format!("must be a positive finite number, got {value}"),
                });
            }
        }
        if self.drive_freq >= self.sampling_rate {
            return Err(AnalysisError::InvalidParameter {
                name: "drive_freq",
                reason: format!(
                    "drive frequency {} Hz is not resolvable at {} Hz sampling",
                    self.drive_freq, self.sampling_rate
                ),
            });
        }
        Ok(())
    }

    /// Expected samples per pixel, `sampling_rate * total_time`.
    pub fn points_per_pixel(&self) -> usize {
        (self.sampling_rate * self.total_time).round() as usize
    }

    /// Samples covering one drive period (fractional).
    pub fn points_per_period(&self) -> f64 {
        self.sampling_rate / self.drive_freq
    }

    /// Whole drive periods inside one pixel.
    pub fn periods_per_pixel(&self) -> usize {
        (self.total_time * self.drive_freq).floor() as usize
    }

    /// Pixel pitch along the fast (column) axis, in meters.
    pub fn col_pitch(&self) -> f64 {
        self.fast_scan_size / self.num_cols as f64
    }

    /// Pixel pitch along the slow (row) axis, in meters.
    pub fn row_pitch(&self) -> f64 {
        self.slow_scan_size / self.num_rows as f64
    }
}

fn as_grid_dim(value: f64, name: &'static str) -> Result<usize> {
    if value.is_finite() && value >= 1.0 && value.fract() == 0.0 {
        Ok(value as usize)
    } else {
        Err(AnalysisError::InvalidParameter {
            name,
            reason: format!("must be a positive integer, got {value}"),
        })
    }
}
