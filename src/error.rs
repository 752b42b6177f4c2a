//! Error taxonomy for the analysis pipeline.
//!
//! Precondition violations (bad shapes, missing parameters) are reported as
//! hard errors and never produce partial results. Numerical degeneracies
//! inside batch loops are deliberately *not* represented here: they stay in
//! the output as NaN plus an explicit marker so a single bad pixel cannot
//! abort a whole image (see `CpdResult::degenerate_windows`).

use thiserror::Error;

/// Errors raised on precondition violations and malformed inputs.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// A required entry is absent from the acquisition parameter bundle.
    #[error("missing required parameter `{0}`")]
    MissingParameter(String),

    /// The parameter bundle carries an entry this pipeline does not know.
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    /// A parameter is present but its value is unusable.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Parabolic refinement needs both neighbors of the peak sample.
    #[error("peak index {index} has no interior neighborhood in a sequence of length {len}")]
    PeakIndexAtBoundary { index: usize, len: usize },

    /// The three samples around the peak are colinear, the parabola has no vertex.
    #[error("degenerate parabolic fit: samples around the peak are colinear")]
    DegenerateParabola,

    /// Paired sequences disagree in length.
    #[error("length mismatch: {left} time points vs {right} observations")]
    LengthMismatch { left: usize, right: usize },

    /// A 2-D input does not match the scan grid or its companion arrays.
    #[error("shape mismatch for {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// An input sequence is empty or too short for the requested operation.
    #[error("input `{name}` is too short: {len} samples, need at least {min}")]
    TooShort {
        name: &'static str,
        len: usize,
        min: usize,
    },

    /// The partitional clustering backend rejected the feature table.
    #[error("clustering failed: {0}")]
    Clustering(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
