use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use super::{
    export::{self, ACCURACY_FILE, GRID_RESULTS_FILE},
    outcome::RunOutcome,
};
use crate::{
    config::PipelineConfig,
    data::labels::{resolve_labels, LabelFile, LabelMode, LabelSource},
    error::{PipelineError, Result},
    evaluation::{
        grid::{GridSearchOptimizer, GridSearchOutcome},
        GroupedEvaluator, TrainingSet,
    },
    features::{FeatureExtractor, FeatureSet},
    models::{
        params::ParamSet,
        pipeline::ClassifierPipeline,
        store::{DirectoryModelStore, ModelStore, TrainedModel},
        ModelFamily,
    },
    progress::{step_lists, ProgressPhase, ProgressReporter, ProgressStatus},
    telemetry::{trace, PipelineTelemetry},
};

/// What training produced for one family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTrainingSummary {
    /// Trained family.
    pub family: ModelFamily,
    /// Parameters of the final fit.
    pub params: ParamSet,
    /// Pooled recording-level cross-validation accuracy.
    pub cv_accuracy: f64,
    /// Mean of the per-fold accuracies.
    pub mean_fold_accuracy: f64,
    /// Folds that had held-out recordings.
    pub folds_evaluated: usize,
    /// Where the artifact was written.
    pub artifact: PathBuf,
}

/// Summary of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Strategy the columns came from.
    pub feature_set: FeatureSet,
    /// Feature columns of every artifact.
    pub feature_columns: usize,
    /// Labelled recordings requested.
    pub recordings: usize,
    /// Feature rows used.
    pub windows: usize,
    /// Sorted driver classes.
    pub classes: Vec<String>,
    /// Grid search winners, when the search ran.
    pub grid_search: Vec<GridSearchOutcome>,
    /// One entry per configured family, in configuration order.
    pub models: Vec<ModelTrainingSummary>,
}

/// Runs label loading, extraction, evaluation, final fits and exports.
pub struct TrainingOrchestrator {
    config: PipelineConfig,
    telemetry: Option<PipelineTelemetry>,
    store: Arc<dyn ModelStore>,
}

impl TrainingOrchestrator {
    /// Orchestrator persisting into the configured artifacts directory.
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

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn artifacts(&self) -> &Path {
        &self.config.artifacts_dir
    }

    /// Trains every configured family on the rows of `labels`.
    ///
    /// # Errors
    ///
    /// Invalid configuration, unreadable inputs, no usable rows, or a fit failure.
    pub fn run(&self, labels: &dyn LabelSource) -> Result<TrainingReport> {
        self.config.validate()?;
        let telemetry = self.telemetry.as_ref();
        let progress = ProgressReporter::new(telemetry);
        let run_id = Uuid::new_v4();
        progress.transition(ProgressPhase::Starting, "loading training labels");
        trace(
            telemetry,
            LogLevel::Info,
            "train.start",
            json!({
                "run_id": run_id,
                "models": self.config.models,
                "feature_set": self.config.feature_set,
            }),
        );

        let entries = resolve_labels(labels, LabelMode::Training, &self.config.data_dir)?;
        if entries.is_empty() {
            return Err(PipelineError::NoUsableData(
                "no labelled recordings in the training list".into(),
            ));
        }

        let recordings: Vec<String> = entries.iter().map(|e| e.recording.clone()).collect();
        progress.report(
            ProgressPhase::Extraction,
            recordings.len(),
            Vec::new(),
            recordings.clone(),
            format!("extracting {} features", self.config.feature_set),
        );
        let extractor = FeatureExtractor::new(self.config.feature_set, self.config.max_points);
        let table =
            extractor.extract_from_entries(&entries, &self.config.window_params(), telemetry)?;
        if table.is_empty() {
            return Err(PipelineError::NoUsableData(format!(
                "no windows of {}s with at least {} points in {} recordings",
                self.config.window_sec,
                self.config.min_points,
                entries.len()
            )));
        }
        let set = TrainingSet::from_table(&table)?;
        let classes = set.classes();
        progress.report(
            ProgressPhase::Extraction,
            recordings.len(),
            recordings,
            Vec::new(),
            format!("{} windows, {} columns", set.n_rows(), set.columns.len()),
        );
        fs::create_dir_all(self.artifacts())?;

        let evaluator = GroupedEvaluator::new(self.config.cv_splits, self.config.random_state);
        let grid_search = if self.config.use_grid_search {
            self.search_all(&set, evaluator, &progress)?
        } else {
            Vec::new()
        };

        let total = self.config.models.len();
        let mut models = Vec::with_capacity(total);
        let mut accuracy_rows = Vec::with_capacity(total);
        for (index, family) in self.config.models.iter().copied().enumerate() {
            progress.emit(&self.training_status(index, family, "cross-validating"));
            let params = grid_search
                .iter()
                .find(|o| o.family == family)
                .map_or_else(
                    || family.default_params(self.config.random_state),
                    |o| o.best_params.clone(),
                );
            let spec = family.build(&params)?;
            let cv = evaluator.evaluate(&set, &spec, telemetry)?;

            progress.emit(&self.training_status(index, family, "fitting final model"));
            let pipeline = ClassifierPipeline::fit(&spec, set.x.view(), &set.labels)?;
            let importances = pipeline.feature_importances();
            let model = TrainedModel::new(
                family,
                pipeline,
                set.columns.clone(),
                self.config.feature_set,
                params.clone(),
            );
            let artifact = self.store.save(&model)?;

            let name = family.as_str();
            let dir = self.artifacts();
            export::write_cv_results(&dir.join(format!("cv_results_{name}.csv")), &cv)?;
            export::write_confusion(&dir.join(format!("confusion_{name}.csv")), &cv.confusion)?;
            export::write_importances(
                &dir.join(format!("importance_{name}.csv")),
                &set.columns,
                &importances,
            )?;
            trace(
                telemetry,
                LogLevel::Info,
                "train.model",
                json!({
                    "family": name,
                    "cv_accuracy": cv.accuracy,
                    "mean_fold_accuracy": cv.mean_fold_accuracy,
                    "folds": cv.folds.len(),
                    "artifact": artifact,
                }),
            );
            accuracy_rows.push((family, cv.accuracy));
            models.push(ModelTrainingSummary {
                family,
                params,
                cv_accuracy: cv.accuracy,
                mean_fold_accuracy: cv.mean_fold_accuracy,
                folds_evaluated: cv.folds.len(),
                artifact,
            });
        }
        export::write_accuracy(&self.artifacts().join(ACCURACY_FILE), &accuracy_rows)?;

        let (finished, _) = step_lists(&self.config.models, total);
        progress.report(
            ProgressPhase::Done,
            total,
            finished,
            Vec::new(),
            "training complete",
        );
        Ok(TrainingReport {
            run_id,
            feature_set: self.config.feature_set,
            feature_columns: set.columns.len(),
            recordings: entries.len(),
            windows: set.n_rows(),
            classes,
            grid_search,
            models,
        })
    }

    fn training_status(
        &self,
        index: usize,
        family: ModelFamily,
        step: &str,
    ) -> ProgressStatus {
        let (completed, in_progress) = step_lists(&self.config.models, index);
        ProgressStatus::new(
            ProgressPhase::Training,
            self.config.models.len(),
            completed,
            in_progress,
            format!("{family}: {step}"),
        )
    }

    fn search_all(
        &self,
        set: &TrainingSet,
        evaluator: GroupedEvaluator,
        progress: &ProgressReporter,
    ) -> Result<Vec<GridSearchOutcome>> {
        let optimizer = GridSearchOptimizer::new(evaluator);
        let total = self.config.models.len();
        let mut outcomes = Vec::with_capacity(total);
        for (index, family) in self.config.models.iter().copied().enumerate() {
            let (completed, in_progress) = step_lists(&self.config.models, index);
            progress.report(
                ProgressPhase::Training,
                total,
                completed,
                in_progress,
                format!("grid search: {family}"),
            );
            let outcome = optimizer.search(
                family,
                &family.grid(),
                &family.base_params(self.config.random_state),
                set,
                self.telemetry.as_ref(),
            )?;
            outcomes.push(outcome);
        }
        export::write_grid_results(&self.artifacts().join(GRID_RESULTS_FILE), &outcomes)?;
        Ok(outcomes)
    }

    /// Trains from the configured label file, folding any error into the outcome.
    pub fn execute(&self) -> RunOutcome<TrainingReport> {
        let labels = LabelFile::new(&self.config.labels_file);
        let result = self.run(&labels);
        if let Err(err) = &result {
            ProgressReporter::new(self.telemetry.as_ref())
                .transition(ProgressPhase::Done, format!("training failed: {err}"));
            trace(
                self.telemetry.as_ref(),
                LogLevel::Error,
                "train.failed",
                json!({ "error": err.to_string() }),
            );
        }
        RunOutcome::from_result(result, |report| {
            format!(
                "trained {} model(s) on {} windows from {} recordings",
                report.models.len(),
                report.windows,
                report.recordings
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::labels::{InMemoryLabels, LabelRow};
    use tempfile::tempdir;

    #[test]
    fn empty_label_list_is_no_usable_data() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig {
            artifacts_dir: dir.path().join("artifacts"),
            ..PipelineConfig::default()
        };
        let orchestrator = TrainingOrchestrator::new(config, None);
        let labels = InMemoryLabels::new(vec![LabelRow::new("a.csv", None)]);
        assert!(matches!(
            orchestrator.run(&labels),
            Err(PipelineError::NoUsableData(_))
        ));
    }

    #[test]
    fn invalid_configuration_is_rejected_before_loading() {
        let config = PipelineConfig {
            cv_splits: 1,
            ..PipelineConfig::default()
        };
        let orchestrator = TrainingOrchestrator::new(config, None);
        assert!(matches!(
            orchestrator.run(&InMemoryLabels::default()),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn execute_reports_missing_label_file() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig {
            labels_file: dir.path().join("missing.lbl"),
            artifacts_dir: dir.path().join("artifacts"),
            ..PipelineConfig::default()
        };
        let outcome = TrainingOrchestrator::new(config, None).execute();
        assert!(!outcome.success);
        assert!(outcome.message.contains("missing.lbl"));
    }
}
