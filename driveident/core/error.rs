use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the pipeline.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by loading, extraction, fitting and orchestration.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A recording file could not be read or parsed.
    #[error("recording {}: {reason}", .path.display())]
    Recording {
        /// Offending file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
    /// A label list could not be read or lacks the required columns.
    #[error("label file {}: {reason}", .path.display())]
    LabelFile {
        /// Offending file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
    /// Nothing left to train or predict on.
    #[error("no usable data: {0}")]
    NoUsableData(String),
    /// Rejected before any computation started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Model family name outside the supported set.
    #[error("unknown model family `{0}`")]
    UnknownModelFamily(String),
    /// Parameter name or value not accepted by a model family.
    #[error("invalid parameter `{name}` for {family}: {reason}")]
    InvalidParameter {
        /// Model family.
        family: String,
        /// Parameter name.
        name: String,
        /// What went wrong.
        reason: String,
    },
    /// A persisted model artifact does not exist.
    #[error("model artifact not found: {}", .0.display())]
    ArtifactMissing(PathBuf),
    /// Persisted models used together were built on different feature schemas.
    #[error("model `{model}` was trained on {found}, expected {expected}")]
    FeatureSetMismatch {
        /// Model whose artifact disagrees.
        model: String,
        /// Schema of the first configured model.
        expected: String,
        /// Schema found in the artifact.
        found: String,
    },
    /// Fitting a classifier failed; aborts the enclosing evaluation.
    #[error("fit failed: {0}")]
    Fit(String),
    /// I/O error (filesystem).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV reading or writing failure.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// JSON parsing or encoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub(crate) fn recording(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Recording {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn label_file(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::LabelFile {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
