use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use super::{
    export::{self, TEST_RESULTS_PREFIX},
    outcome::RunOutcome,
};
use crate::{
    config::PipelineConfig,
    data::labels::{resolve_labels, LabelFile, LabelMode, LabelSource},
    error::{PipelineError, Result},
    evaluation::aggregate::{aggregate_by_recording, RecordingVerdict},
    features::{FeatureExtractor, FeatureSet},
    models::{
        store::{DirectoryModelStore, ModelStore, TrainedModel},
        ModelFamily,
    },
    progress::{step_lists, ProgressPhase, ProgressReporter},
    telemetry::{trace, PipelineTelemetry},
};

/// Recording decisions of every scored model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Strategy the stored columns came from.
    pub feature_set: FeatureSet,
    /// Recordings requested.
    pub recordings: usize,
    /// Feature rows scored.
    pub windows: usize,
    /// Verdicts per family, in configuration order.
    pub verdicts: IndexMap<ModelFamily, Vec<RecordingVerdict>>,
}

impl PredictionReport {
    /// Accuracy of `family` over recordings with a known truth, if there are any.
    #[must_use]
    pub fn accuracy(&self, family: ModelFamily) -> Option<f64> {
        let verdicts = self.verdicts.get(&family)?;
        let known = verdicts.iter().filter(|v| v.truth.is_some()).count();
        if known == 0 {
            return None;
        }
        Some(verdicts.iter().filter(|v| v.correct).count() as f64 / known as f64)
    }
}

/// Scores recordings with persisted models.
pub struct PredictionOrchestrator {
    config: PipelineConfig,
    telemetry: Option<PipelineTelemetry>,
    store: Arc<dyn ModelStore>,
}

impl PredictionOrchestrator {
    /// Orchestrator loading from the configured artifacts directory.
    #[must_use]
    pub fn new(config: PipelineConfig, telemetry: Option<PipelineTelemetry>) -> Self {
        let store = Arc::new(DirectoryModelStore::new(&config.artifacts_dir));
        Self {
            config,
            telemetry,
            store,
        }
    }

    /// Replaces the model store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ModelStore>) -> Self {
        self.store = store;
        self
    }

    /// Loads every configured artifact; all must share the first one's schema.
    fn load_models(&self) -> Result<Vec<TrainedModel>> {
        let mut models: Vec<TrainedModel> = Vec::with_capacity(self.config.models.len());
        for family in &self.config.models {
            let model = self.store.load(*family)?;
            if let Some(first) = models.first() {
                if model.feature_set != first.feature_set {
                    return Err(PipelineError::FeatureSetMismatch {
                        model: family.to_string(),
                        expected: first.feature_set.to_string(),
                        found: model.feature_set.to_string(),
                    });
                }
                if model.feature_columns != first.feature_columns {
                    return Err(PipelineError::FeatureSetMismatch {
                        model: family.to_string(),
                        expected: format!("{} columns", first.feature_columns.len()),
                        found: format!("{} different columns", model.feature_columns.len()),
                    });
                }
            }
            models.push(model);
        }
        Ok(models)
    }

    /// Scores the recordings of `labels` with every configured model.
    ///
    /// # Errors
    ///
    /// Missing or disagreeing artifacts, unreadable inputs, or no usable rows.
    pub fn run(&self, labels: &dyn LabelSource) -> Result<PredictionReport> {
        self.config.validate()?;
        let telemetry = self.telemetry.as_ref();
        let progress = ProgressReporter::new(telemetry);
        let run_id = Uuid::new_v4();
        progress.transition(ProgressPhase::Starting, "loading models");

        let models = self.load_models()?;
        let Some(reference) = models.first() else {
            return Err(PipelineError::InvalidConfig(
                "no model family configured".into(),
            ));
        };
        let feature_set = reference.feature_set;
        let columns = reference.feature_columns.clone();

        let entries = resolve_labels(labels, LabelMode::Prediction, &self.config.data_dir)?;
        if entries.is_empty() {
            return Err(PipelineError::NoUsableData(
                "no recordings in the prediction list".into(),
            ));
        }
        let recordings: Vec<String> = entries.iter().map(|e| e.recording.clone()).collect();
        progress.report(
            ProgressPhase::Extraction,
            recordings.len(),
            Vec::new(),
            recordings,
            format!("extracting {feature_set} features"),
        );
        let extractor = FeatureExtractor::new(feature_set, self.config.max_points);
        let table = extractor
            .extract_from_entries(&entries, &self.config.window_params(), telemetry)?
            .reindex(&columns);
        if table.is_empty() {
            return Err(PipelineError::NoUsableData(format!(
                "no windows of {}s with at least {} points in {} recordings",
                self.config.window_sec,
                self.config.min_points,
                entries.len()
            )));
        }

        let total = models.len();
        let families: Vec<ModelFamily> = models.iter().map(|m| m.family).collect();
        let mut verdicts = IndexMap::with_capacity(total);
        for (index, model) in models.iter().enumerate() {
            let name = model.family.as_str();
            let (completed, in_progress) = step_lists(&families, index);
            progress.report(
                ProgressPhase::Prediction,
                total,
                completed,
                in_progress,
                format!("scoring with {name}"),
            );
            let proba = model.pipeline.predict_proba(table.values.view());
            let decided = aggregate_by_recording(
                proba.view(),
                model.classes(),
                &table.recordings,
                &table.drivers,
            );
            export::write_predictions(
                &self
                    .config
                    .artifacts_dir
                    .join(format!("{TEST_RESULTS_PREFIX}{name}.csv")),
                &decided,
            )?;
            trace(
                telemetry,
                LogLevel::Info,
                "predict.model",
                json!({
                    "family": name,
                    "recordings": decided.len(),
                    "correct": decided.iter().filter(|v| v.correct).count(),
                }),
            );
            verdicts.insert(model.family, decided);
        }

        let (finished, _) = step_lists(&families, total);
        progress.report(
            ProgressPhase::Done,
            total,
            finished,
            Vec::new(),
            "prediction complete",
        );
        Ok(PredictionReport {
            run_id,
            feature_set,
            recordings: entries.len(),
            windows: table.n_rows(),
            verdicts,
        })
    }

    /// Scores the configured test label file, folding any error into the outcome.
    pub fn execute(&self) -> RunOutcome<PredictionReport> {
        let labels = LabelFile::new(&self.config.test_labels_file);
        let result = self.run(&labels);
        if let Err(err) = &result {
            ProgressReporter::new(self.telemetry.as_ref())
                .transition(ProgressPhase::Done, format!("prediction failed: {err}"));
            trace(
                self.telemetry.as_ref(),
                LogLevel::Error,
                "predict.failed",
                json!({ "error": err.to_string() }),
            );
        }
        RunOutcome::from_result(result, |report| {
            format!(
                "scored {} recordings with {} model(s)",
                report.recordings,
                report.verdicts.len()
            )
        })
    }
}
