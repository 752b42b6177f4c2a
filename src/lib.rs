//! Analysis core for G-Mode scanning-probe measurements: extracts
//! per-pixel contact-potential-difference (CPD) traces from raw
//! oscillation waveforms, fits biexponential relaxation dynamics to
//! instantaneous-frequency or phase transients, and clusters the
//! extracted fields by their distance to masked sample boundaries.
//!
//! The crate deliberately stops at plain numeric arrays on both ends:
//! dataset access, mask-file parsing and plotting live in separate tools
//! that exchange `ndarray` arrays and a flat parameter bundle with this
//! core.
//!
//! Typical flow:
//!
//! ```no_run
//! use gmode_cpd::{ClusterEngine, CpdExtractor, Mask, ScanParams, WindowPolicy};
//! use ndarray::{Array1, Array2};
//! use std::collections::HashMap;
//!
//! # fn load_bundle() -> HashMap<String, f64> { HashMap::new() }
//! # fn load_waveform() -> Array1<f32> { Array1::zeros(0) }
//! # fn load_fields() -> (Array2<f32>, Array2<f32>) { (Array2::zeros((0, 0)), Array2::zeros((0, 0))) }
//! let params = ScanParams::from_map(&load_bundle())?;
//! let extractor = CpdExtractor::new(&params);
//! let cpd = extractor.analyze(load_waveform().view(), 4, WindowPolicy::Remainder)?;
//!
//! let (traces, averaged) = load_fields();
//! let engine = ClusterEngine::new(&params, traces, averaged, None)?;
//! let analysis = engine.analyze();
//! let labels = analysis.kmeans(3, 0)?;
//! let segments = analysis.segment_maps(&labels);
//! # Ok::<(), gmode_cpd::AnalysisError>(())
//! ```

pub mod cluster;
pub mod config;
pub mod cpd_extractor;
pub mod error;
pub mod io;
pub mod mask;
pub mod math_tools;
pub mod relaxation;

pub use cluster::{ClusterAnalysis, ClusterEngine, ClusterLabels, ClusterSegments};
pub use config::ScanParams;
pub use cpd_extractor::{CpdExtractor, CpdResult, WindowLayout, WindowPolicy};
pub use error::{AnalysisError, Result};
pub use mask::Mask;
pub use relaxation::{fit_relaxation, RelaxationFit, RelaxationModel};
