//! Error taxonomy for the analysis engine
//!
//! Component-level failures degrade to partial results with explicit status;
//! only configuration errors abort a run, and they do so before any analysis
//! starts.

use thiserror::Error;

/// Errors surfaced by analysis components
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Fewer valid points than the analysis requires
    #[error("insufficient data: need at least {required} valid points, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// An expected column or device is absent from the sample schema
    #[error("missing field: {0}")]
    FieldMissing(String),

    /// Zero-variance or zero-division input that would poison downstream math
    #[error("degenerate input: {0}")]
    NumericDegenerate(String),

    /// An out-of-range or inconsistent threshold; names the offending key
    #[error("invalid configuration `{key}`: {reason}")]
    ConfigurationInvalid { key: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
