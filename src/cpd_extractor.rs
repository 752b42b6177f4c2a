//! Per-pixel CPD extraction from raw G-Mode oscillation waveforms.
//!
//! A pixel's waveform is cut into windows spanning a whole number of drive
//! periods. In every window the demeaned response is fit with a degree-2
//! polynomial against the drive reference, and the contact potential
//! difference follows from the coefficient ratio `-0.5 * a1 / a2`. The
//! result is a time-resolved CPD trace, one value per window.

use crate::config::ScanParams;
use crate::error::{AnalysisError, Result};
use crate::math_tools::{convolve_full, polyfit_quadratic};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// How a pixel's waveform is cut into fitting windows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowPolicy {
    /// Window length is the requested number of whole drive periods; the
    /// last window absorbs the leftover samples so every sample is fit
    /// exactly once.
    #[default]
    Remainder,
    /// Window length snapped to the nearest power of two below the
    /// period-based length. All windows are equal-sized; trailing samples
    /// that do not fill a window are dropped.
    PowerOfTwo,
}

/// Window geometry derived from the scan parameters and policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLayout {
    /// Samples per regular window.
    pub decimation: usize,
    /// Number of windows (and of CPD values).
    pub windows: usize,
    /// Extra samples absorbed by the last window (remainder policy only).
    pub remainder: usize,
}

/// Immutable product of one `analyze` call.
///
/// Degenerate windows (quadratic coefficient of zero, or a singular fit)
/// carry NaN in `cpd` *and* are listed in `degenerate_windows`, so
/// downstream code can tell "no data" apart from a computed value without
/// probing for NaN.
#[derive(Clone, Debug)]
pub struct CpdResult {
    pub layout: WindowLayout,
    /// Per-window polynomial coefficients `(a0, a1, a2)`, shape (windows, 3).
    pub coefficients: Array2<f32>,
    /// CPD value per window; NaN where the fit was degenerate.
    pub cpd: Array1<f32>,
    /// Indices of windows whose fit was degenerate.
    pub degenerate_windows: Vec<usize>,
    /// Time covered by one regular window, in seconds.
    pub window_time: f64,
}

impl CpdResult {
    /// Convolves the CPD trace with a caller-supplied kernel (full mode,
    /// output length `windows + kernel - 1`). The unfiltered trace is left
    /// untouched.
    pub fn smooth(&self, kernel: ArrayView1<f32>) -> Array1<f32> {
        convolve_full(self.cpd.view(), kernel)
    }

    /// Center time of every window, for plotting CPD against time.
    pub fn window_times(&self) -> Array1<f32> {
        Array1::from_iter(
            (0..self.layout.windows).map(|w| ((w as f64 + 0.5) * self.window_time) as f32),
        )
    }
}

/// Stateless CPD extraction service bound to one set of scan parameters.
///
/// `analyze` is a pure function of its inputs; rerunning it never mutates a
/// previously returned [`CpdResult`].
pub struct CpdExtractor {
    params: ScanParams,
}

impl CpdExtractor {
    pub fn new(params: &ScanParams) -> Self {
        CpdExtractor {
            params: params.clone(),
        }
    }

    /// Drive reference the response is fit against: a sine at the drive
    /// frequency sampled like the waveform.
    pub fn drive_reference(&self, len: usize) -> Array1<f32> {
        let dt = 1.0 / self.params.sampling_rate;
        Array1::from_iter((0..len).map(|i| ((i as f64 * dt) * self.params.drive_freq).sin() as f32))
    }

    /// Computes the window layout for the given policy without running any
    /// fits.
    pub fn window_layout(
        &self,
        signal_len: usize,
        periods_per_window: usize,
        policy: WindowPolicy,
    ) -> Result<WindowLayout> {
        if periods_per_window == 0 {
            return Err(AnalysisError::InvalidParameter {
                name: "periods_per_window",
                reason: "must be at least 1".to_string(),
            });
        }
        let period_based = (self.params.points_per_period() * periods_per_window as f64).floor();
        let decimation = match policy {
            WindowPolicy::Remainder => period_based as usize,
            WindowPolicy::PowerOfTwo => 1usize << (period_based.log2().floor() as u32),
        };
        // A quadratic fit needs three points; anything shorter is a
        // misconfiguration rather than a degenerate window.
        if decimation < 3 {
            return Err(AnalysisError::InvalidParameter {
                name: "periods_per_window",
                reason: format!("window of {decimation} samples is too short for a quadratic fit"),
            });
        }
        let windows = signal_len / decimation;
        if windows == 0 {
            return Err(AnalysisError::TooShort {
                name: "signal",
                len: signal_len,
                min: decimation,
            });
        }
        let remainder = match policy {
            WindowPolicy::Remainder => signal_len - windows * decimation,
            WindowPolicy::PowerOfTwo => 0,
        };
        Ok(WindowLayout {
            decimation,
            windows,
            remainder,
        })
    }

    /// Segments the waveform and extracts one CPD value per window.
    ///
    /// # Arguments
    /// - `signal`: raw single-pixel waveform.
    /// - `periods_per_window`: whole drive periods per analysis window.
    /// - `policy`: windowing policy, see [`WindowPolicy`].
    pub fn analyze(
        &self,
        signal: ArrayView1<f32>,
        periods_per_window: usize,
        policy: WindowPolicy,
    ) -> Result<CpdResult> {
        let n = signal.len();
        let expected = self.params.points_per_pixel();
        if n != expected {
            log::warn!(
                "waveform has {n} samples, parameters promise {expected}; using the actual length"
            );
        }

        let layout = self.window_layout(n, periods_per_window, policy)?;
        let drive = self.drive_reference(n);

        let mut coefficients = Array2::<f32>::zeros((layout.windows, 3));
        let mut cpd = Array1::<f32>::zeros(layout.windows);
        let mut degenerate_windows = Vec::new();

        for w in 0..layout.windows {
            let start = w * layout.decimation;
            // The last window stretches to the end of the signal under the
            // remainder policy.
            let end = if w + 1 == layout.windows && layout.remainder > 0 {
                n
            } else {
                start + layout.decimation
            };

            let response = signal.slice(s![start..end]);
            let reference = drive.slice(s![start..end]);
            let mean = response.mean().unwrap_or(0.0);
            let demeaned = response.mapv(|v| v - mean);

            match polyfit_quadratic(reference.view(), demeaned.view()) {
                Some([a0, a1, a2]) if a2 != 0.0 => {
                    coefficients[[w, 0]] = a0 as f32;
                    coefficients[[w, 1]] = a1 as f32;
                    coefficients[[w, 2]] = a2 as f32;
                    cpd[w] = (-0.5 * a1 / a2) as f32;
                }
                Some([a0, a1, _]) => {
                    coefficients[[w, 0]] = a0 as f32;
                    coefficients[[w, 1]] = a1 as f32;
                    coefficients[[w, 2]] = 0.0;
                    cpd[w] = f32::NAN;
                    degenerate_windows.push(w);
                }
                None => {
                    coefficients.row_mut(w).fill(f32::NAN);
                    cpd[w] = f32::NAN;
                    degenerate_windows.push(w);
                }
            }
        }

        if !degenerate_windows.is_empty() {
            log::warn!(
                "{} of {} windows had a degenerate quadratic fit",
                degenerate_windows.len(),
                layout.windows
            );
        }

        Ok(CpdResult {
            layout,
            coefficients,
            cpd,
            degenerate_windows,
            window_time: layout.decimation as f64 / self.params.sampling_rate,
        })
    }

    /// Collapses repeated acquisitions of the same pixel by row-mean, then
    /// analyzes the averaged waveform.
    pub fn analyze_averaged(
        &self,
        signals: ArrayView2<f32>,
        periods_per_window: usize,
        policy: WindowPolicy,
    ) -> Result<CpdResult> {
        let averaged = signals.mean_axis(Axis(0)).ok_or(AnalysisError::TooShort {
            name: "signals",
            len: 0,
            min: 1,
        })?;
        self.analyze(averaged.view(), periods_per_window, policy)
    }
}
