#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::module_name_repetitions,
    clippy::similar_names
)]

//! DriveIdent core: identifies which known driver produced a telemetry recording.
//!
//! Recordings are cut into overlapping windows, every window becomes a feature row,
//! classifiers are evaluated with recording-grouped cross-validation, and per-window
//! probabilities are averaged back into one decision per recording.

/// Error taxonomy shared by every stage.
#[path = "../error.rs"]
pub mod error;

/// Immutable run configuration.
#[path = "../config.rs"]
pub mod config;

/// Structured logging and event emission.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Progress status records and publishers.
#[path = "../progress.rs"]
pub mod progress;

/// Recording parsing, label lists, windowing and resampling.
#[path = "../data/main.rs"]
pub mod data;

/// Window feature extraction strategies.
#[path = "../features/main.rs"]
pub mod features;

/// Classifier families, preprocessing pipeline and model store.
#[path = "../models/main.rs"]
pub mod models;

/// Grouped cross-validation, recording aggregation and grid search.
#[path = "../evaluation/main.rs"]
pub mod evaluation;

/// Training and prediction orchestration.
#[path = "../orchestration/main.rs"]
pub mod orchestration;

pub use config::{ConfigOverrides, PipelineConfig};
pub use data::{
    labels::{DriverTag, InMemoryLabels, LabelEntry, LabelFile, LabelMode, LabelRow, LabelSource},
    loader::{load_recording, validate_recording, RecordingSeries},
    segment::{find_windows, Window, WindowParams},
};
pub use error::{PipelineError, Result};
pub use evaluation::{
    aggregate::{aggregate_by_recording, ConfusionMatrix, RecordingVerdict},
    grid::{GridSearchOptimizer, GridSearchOutcome},
    CrossValidation, GroupedEvaluator, TrainingSet,
};
pub use features::{table::FeatureTable, FeatureExtractor, FeatureSet};
pub use models::{
    params::{ParamGrid, ParamSet, ParamValue},
    pipeline::ClassifierPipeline,
    store::{DirectoryModelStore, ModelStore, TrainedModel},
    ClassifierSpec, ModelFamily,
};
pub use orchestration::{
    outcome::RunOutcome,
    predict::{PredictionOrchestrator, PredictionReport},
    splits::{discover_splits, run_split, SplitJob, SplitResult},
    train::{ModelTrainingSummary, TrainingOrchestrator, TrainingReport},
};
pub use progress::{CallbackPublisher, ProgressPhase, ProgressReporter, ProgressStatus};
pub use telemetry::{PipelineTelemetry, PipelineTelemetryBuilder};
