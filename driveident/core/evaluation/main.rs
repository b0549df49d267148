//! Recording-grouped cross-validation, recording-level aggregation and grid search.

/// Per-recording decisions and confusion counts.
pub mod aggregate;
/// Stratified, grouped fold assignment.
pub mod folds;
/// Exhaustive hyper-parameter search.
pub mod grid;

use std::collections::BTreeSet;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    data::labels::DriverTag,
    error::{PipelineError, Result},
    features::table::FeatureTable,
    models::{pipeline::ClassifierPipeline, ClassifierSpec},
    telemetry::{trace, PipelineTelemetry},
};
use aggregate::{accuracy, aggregate_by_recording, ConfusionMatrix, RecordingVerdict};
use folds::stratified_group_folds;

/// Labelled feature rows ready for fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSet {
    /// Feature columns, in matrix order.
    pub columns: Vec<String>,
    /// `rows x columns` features; `NaN` marks missing cells.
    pub x: Array2<f64>,
    /// Driver label per row.
    pub labels: Vec<String>,
    /// Recording per row, the grouping key.
    pub recordings: Vec<String>,
}

impl TrainingSet {
    /// Takes the rows of a feature table whose drivers are all known.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NoUsableData`] when the table is empty or a row lacks a label.
    pub fn from_table(table: &FeatureTable) -> Result<Self> {
        if table.is_empty() {
            return Err(PipelineError::NoUsableData(
                "feature table has no rows".into(),
            ));
        }
        let labels = table
            .drivers
            .iter()
            .map(|driver| match driver {
                DriverTag::Known(label) => Ok(label.clone()),
                DriverTag::Placeholder(row) => Err(PipelineError::NoUsableData(format!(
                    "label row {row} has no driver label"
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            columns: table.columns.clone(),
            x: table.values.clone(),
            labels,
            recordings: table.recordings.clone(),
        })
    }

    /// Number of rows.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.labels.len()
    }

    /// Sorted distinct labels.
    #[must_use]
    pub fn classes(&self) -> Vec<String> {
        self.labels
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn known_drivers(&self, rows: &[usize]) -> Vec<DriverTag> {
        rows.iter()
            .map(|&r| DriverTag::Known(self.labels[r].clone()))
            .collect()
    }

    fn rows_of(&self, rows: &[usize]) -> Array2<f64> {
        self.x.select(ndarray::Axis(0), rows)
    }
}

/// Outcome of one fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    /// Fold index.
    pub fold: usize,
    /// Training windows.
    pub train_rows: usize,
    /// Held-out windows.
    pub test_rows: usize,
    /// Held-out recording decisions.
    pub verdicts: Vec<RecordingVerdict>,
    /// Share of correct held-out recordings.
    pub accuracy: f64,
}

/// Recording-level cross-validation summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidation {
    /// Global sorted class list.
    pub classes: Vec<String>,
    /// Evaluated folds; folds with no held-out rows are absent.
    pub folds: Vec<FoldResult>,
    /// Verdicts of every fold, in fold order.
    pub verdicts: Vec<RecordingVerdict>,
    /// Accuracy over the pooled verdicts.
    pub accuracy: f64,
    /// Mean of the per-fold accuracies.
    pub mean_fold_accuracy: f64,
    /// Pooled confusion counts over `classes`.
    pub confusion: ConfusionMatrix,
}

/// Re-orders probability columns from `local` classes to `global` ones; classes the
/// model never saw get `0`.
fn align_columns(proba: ArrayView2<'_, f64>, local: &[String], global: &[String]) -> Array2<f64> {
    let mut aligned = Array2::zeros((proba.nrows(), global.len()));
    for (source, class) in local.iter().enumerate() {
        if let Some(target) = global.iter().position(|c| c == class) {
            aligned.column_mut(target).assign(&proba.column(source));
        }
    }
    aligned
}

/// Stratified k-fold cross-validation grouped by recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupedEvaluator {
    k: usize,
    seed: u64,
}

impl GroupedEvaluator {
    /// Evaluator with `k` folds shuffled by `seed`.
    #[must_use]
    pub const fn new(k: usize, seed: u64) -> Self {
        Self { k, seed }
    }

    /// Fold per row of `set`.
    #[must_use]
    pub fn assign_folds(&self, set: &TrainingSet) -> Vec<usize> {
        stratified_group_folds(&set.labels, &set.recordings, self.k, self.seed)
    }

    /// Fits `spec` once per fold and scores held-out recordings.
    ///
    /// # Errors
    ///
    /// The first fit failure aborts the whole evaluation.
    pub fn evaluate(
        &self,
        set: &TrainingSet,
        spec: &ClassifierSpec,
        telemetry: Option<&PipelineTelemetry>,
    ) -> Result<CrossValidation> {
        let classes = set.classes();
        let assignment = self.assign_folds(set);
        let mut folds = Vec::new();
        for fold in 0..self.k.max(1) {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..set.n_rows()).partition(|&row| assignment[row] == fold);
            if test.is_empty() || train.is_empty() {
                trace(
                    telemetry,
                    LogLevel::Debug,
                    "cv.fold_skipped",
                    json!({ "fold": fold, "test_rows": test.len(), "train_rows": train.len() }),
                );
                continue;
            }
            let train_labels: Vec<String> = train.iter().map(|&r| set.labels[r].clone()).collect();
            let pipeline =
                ClassifierPipeline::fit(spec, set.rows_of(&train).view(), &train_labels)?;
            let proba = pipeline.predict_proba(set.rows_of(&test).view());
            let aligned = align_columns(proba.view(), pipeline.classes(), &classes);
            let recordings: Vec<String> = test.iter().map(|&r| set.recordings[r].clone()).collect();
            let verdicts = aggregate_by_recording(
                aligned.view(),
                &classes,
                &recordings,
                &set.known_drivers(&test),
            );
            let fold_accuracy = accuracy(&verdicts);
            trace(
                telemetry,
                LogLevel::Debug,
                "cv.fold",
                json!({
                    "family": spec.family().as_str(),
                    "fold": fold,
                    "train_rows": train.len(),
                    "test_rows": test.len(),
                    "accuracy": fold_accuracy,
                }),
            );
            folds.push(FoldResult {
                fold,
                train_rows: train.len(),
                test_rows: test.len(),
                verdicts,
                accuracy: fold_accuracy,
            });
        }

        let verdicts: Vec<RecordingVerdict> =
            folds.iter().flat_map(|f| f.verdicts.iter().cloned()).collect();
        let mean_fold_accuracy = if folds.is_empty() {
            0.0
        } else {
            folds.iter().map(|f| f.accuracy).sum::<f64>() / folds.len() as f64
        };
        let confusion = ConfusionMatrix::from_verdicts(&classes, &verdicts);
        Ok(CrossValidation {
            accuracy: accuracy(&verdicts),
            classes,
            folds,
            verdicts,
            mean_fold_accuracy,
            confusion,
        })
    }
}
