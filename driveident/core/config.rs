use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    data::segment::WindowParams,
    error::{PipelineError, Result},
    features::FeatureSet,
    models::ModelFamily,
};

/// Settings for one training or prediction run.
///
/// The value is never mutated by the pipeline: overrides produce a new value, so
/// concurrent runs in one process cannot interfere with each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory that relative recording paths are resolved against.
    pub data_dir: PathBuf,
    /// Label list used for training.
    pub labels_file: PathBuf,
    /// Label list used for prediction.
    pub test_labels_file: PathBuf,
    /// Output directory for models, exports and the status file.
    pub artifacts_dir: PathBuf,
    /// Model families to train or score, in order.
    pub models: Vec<ModelFamily>,
    /// Run the grid search before the final fit.
    pub use_grid_search: bool,
    /// Extraction strategy.
    pub feature_set: FeatureSet,
    /// Window length in seconds.
    pub window_sec: f64,
    /// Offset between consecutive window starts in seconds.
    pub step_sec: f64,
    /// Minimum raw samples a window needs to be kept.
    pub min_points: usize,
    /// Ceiling on resampled observations per window.
    pub max_points: usize,
    /// Cross-validation fold count.
    pub cv_splits: usize,
    /// Seed for fold shuffling and every classifier.
    pub random_state: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            labels_file: PathBuf::from("labels.lbl"),
            test_labels_file: PathBuf::from("test_labels.lbl"),
            artifacts_dir: PathBuf::from("artifacts"),
            models: ModelFamily::ALL.to_vec(),
            use_grid_search: false,
            feature_set: FeatureSet::Both,
            window_sec: 25.0,
            step_sec: 12.0,
            min_points: 300,
            max_points: 500,
            cv_splits: 5,
            random_state: 42,
        }
    }
}

/// Call-time overrides; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    /// Replaces `data_dir`.
    pub data_dir: Option<PathBuf>,
    /// Replaces `labels_file`.
    pub labels_file: Option<PathBuf>,
    /// Replaces `test_labels_file`.
    pub test_labels_file: Option<PathBuf>,
    /// Replaces `artifacts_dir`.
    pub artifacts_dir: Option<PathBuf>,
    /// Replaces `models`.
    pub models: Option<Vec<ModelFamily>>,
    /// Replaces `use_grid_search`.
    pub use_grid_search: Option<bool>,
    /// Replaces `feature_set`.
    pub feature_set: Option<FeatureSet>,
    /// Replaces `window_sec`.
    pub window_sec: Option<f64>,
    /// Replaces `step_sec`.
    pub step_sec: Option<f64>,
    /// Replaces `min_points`.
    pub min_points: Option<usize>,
    /// Replaces `max_points`.
    pub max_points: Option<usize>,
    /// Replaces `cv_splits`.
    pub cv_splits: Option<usize>,
    /// Replaces `random_state`.
    pub random_state: Option<u64>,
}

impl PipelineConfig {
    /// Loads a JSON config file. Keys absent from the file keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            PipelineError::InvalidConfig(format!("reading {}: {err}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            PipelineError::InvalidConfig(format!("parsing {}: {err}", path.display()))
        })
    }

    /// Loads `path` when it exists, otherwise returns the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Writes the configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Returns a new configuration with every `Some` override applied.
    #[must_use]
    pub fn with_overrides(&self, overrides: &ConfigOverrides) -> Self {
        let mut next = self.clone();
        let o = overrides.clone();
        if let Some(v) = o.data_dir {
            next.data_dir = v;
        }
        if let Some(v) = o.labels_file {
            next.labels_file = v;
        }
        if let Some(v) = o.test_labels_file {
            next.test_labels_file = v;
        }
        if let Some(v) = o.artifacts_dir {
            next.artifacts_dir = v;
        }
        if let Some(v) = o.models {
            next.models = v;
        }
        if let Some(v) = o.use_grid_search {
            next.use_grid_search = v;
        }
        if let Some(v) = o.feature_set {
            next.feature_set = v;
        }
        if let Some(v) = o.window_sec {
            next.window_sec = v;
        }
        if let Some(v) = o.step_sec {
            next.step_sec = v;
        }
        if let Some(v) = o.min_points {
            next.min_points = v;
        }
        if let Some(v) = o.max_points {
            next.max_points = v;
        }
        if let Some(v) = o.cv_splits {
            next.cv_splits = v;
        }
        if let Some(v) = o.random_state {
            next.random_state = v;
        }
        next
    }

    /// Rejects parameter combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Err(PipelineError::InvalidConfig(reason));
        if !(self.window_sec.is_finite() && self.window_sec > 0.0) {
            return fail(format!(
                "window_sec must be a positive number, got {}",
                self.window_sec
            ));
        }
        if !(self.step_sec.is_finite() && self.step_sec > 0.0) {
            return fail(format!(
                "step_sec must be a positive number, got {}",
                self.step_sec
            ));
        }
        if self.min_points == 0 {
            return fail("min_points must be at least 1".into());
        }
        if self.max_points == 0 {
            return fail("max_points must be at least 1".into());
        }
        if self.cv_splits < 2 {
            return fail(format!(
                "cv_splits must be at least 2, got {}",
                self.cv_splits
            ));
        }
        if self.models.is_empty() {
            return fail("at least one model family must be configured".into());
        }
        Ok(())
    }

    /// Windowing parameters derived from this configuration.
    #[must_use]
    pub const fn window_params(&self) -> WindowParams {
        WindowParams {
            window_sec: self.window_sec,
            step_sec: self.step_sec,
            min_points: self.min_points,
            max_points: self.max_points,
        }
    }
}
