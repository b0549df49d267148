//! Training and prediction runs, CSV/JSON exports and multi-split evaluation.

/// Export writers for evaluation and prediction results.
pub mod export;
/// Error-free run summaries for calling layers.
pub mod outcome;
/// Prediction with persisted models.
pub mod predict;
/// Independent train/test split runs.
pub mod splits;
/// Training with grouped evaluation and artifact persistence.
pub mod train;
