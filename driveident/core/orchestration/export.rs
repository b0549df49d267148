use std::{fs, path::Path};

use csv::Writer;
use indexmap::IndexMap;
use serde::Serialize;

use super::splits::SplitResult;
use crate::{
    error::Result,
    evaluation::{
        aggregate::{ConfusionMatrix, RecordingVerdict},
        grid::GridSearchOutcome,
        CrossValidation,
    },
    models::{params::ParamSet, ModelFamily},
};

/// Per-recording prediction export.
pub const TEST_RESULTS_PREFIX: &str = "test_results_";
/// Grid search summary file.
pub const GRID_RESULTS_FILE: &str = "grid_search_results.json";
/// Per-model accuracy table.
pub const ACCURACY_FILE: &str = "accuracy.csv";

#[derive(Serialize)]
struct VerdictRow<'a> {
    recording: &'a str,
    true_label: &'a str,
    predicted_label: &'a str,
    correct: bool,
}

impl<'a> From<&'a RecordingVerdict> for VerdictRow<'a> {
    fn from(v: &'a RecordingVerdict) -> Self {
        Self {
            recording: &v.recording,
            true_label: v.truth.as_deref().unwrap_or_default(),
            predicted_label: &v.predicted,
            correct: v.correct,
        }
    }
}

fn writer(path: &Path) -> Result<Writer<fs::File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(Writer::from_path(path)?)
}

/// `recording,true_label,predicted_label,correct`, one row per recording.
pub fn write_predictions(path: &Path, verdicts: &[RecordingVerdict]) -> Result<()> {
    let mut out = writer(path)?;
    for verdict in verdicts {
        out.serialize(VerdictRow::from(verdict))?;
    }
    out.flush()?;
    Ok(())
}

/// Held-out verdicts of every fold, prefixed with the fold index.
pub fn write_cv_results(path: &Path, cv: &CrossValidation) -> Result<()> {
    let mut out = writer(path)?;
    out.write_record(["fold", "recording", "true_label", "predicted_label", "correct"])?;
    for fold in &cv.folds {
        for verdict in &fold.verdicts {
            out.write_record([
                fold.fold.to_string(),
                verdict.recording.clone(),
                verdict.truth.clone().unwrap_or_default(),
                verdict.predicted.clone(),
                verdict.correct.to_string(),
            ])?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Square count table with true classes down and predictions across.
pub fn write_confusion(path: &Path, confusion: &ConfusionMatrix) -> Result<()> {
    let mut out = writer(path)?;
    let mut header = vec!["true\\predicted".to_owned()];
    header.extend(confusion.classes().iter().cloned());
    out.write_record(&header)?;
    for (class, counts) in confusion.classes().iter().zip(confusion.rows()) {
        let mut record = vec![class.clone()];
        record.extend(counts.iter().map(ToString::to_string));
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(())
}

/// `feature,importance`, most important first.
pub fn write_importances(path: &Path, columns: &[String], importances: &[f64]) -> Result<()> {
    let mut ranked: Vec<(&String, f64)> = columns.iter().zip(importances.iter().copied()).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut out = writer(path)?;
    out.write_record(["feature", "importance"])?;
    for (feature, importance) in ranked {
        out.write_record([feature.clone(), importance.to_string()])?;
    }
    out.flush()?;
    Ok(())
}

/// `model,accuracy`, one row per trained family.
pub fn write_accuracy(path: &Path, rows: &[(ModelFamily, f64)]) -> Result<()> {
    let mut out = writer(path)?;
    out.write_record(["model", "accuracy"])?;
    for (family, accuracy) in rows {
        out.write_record([family.as_str().to_owned(), accuracy.to_string()])?;
    }
    out.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct GridSummary<'a> {
    best_params: &'a ParamSet,
    best_score: f64,
}

/// `{model: {best_params, best_score}}` as pretty JSON.
pub fn write_grid_results(path: &Path, outcomes: &[GridSearchOutcome]) -> Result<()> {
    let summary: IndexMap<&str, GridSummary<'_>> = outcomes
        .iter()
        .map(|o| {
            (
                o.family.as_str(),
                GridSummary {
                    best_params: &o.best_params,
                    best_score: o.best_score,
                },
            )
        })
        .collect();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(&summary)?)?;
    Ok(())
}

/// `split,model,n_correct,n_test_samples,accuracy` across every split.
pub fn write_split_summary(path: &Path, results: &[SplitResult]) -> Result<()> {
    let mut out = writer(path)?;
    out.write_record(["split", "model", "n_correct", "n_test_samples", "accuracy"])?;
    for result in results {
        out.write_record([
            result.split.clone(),
            result.model.clone(),
            result.n_correct.to_string(),
            result.n_test_samples.to_string(),
            result.accuracy.to_string(),
        ])?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn verdict(recording: &str, truth: Option<&str>, predicted: &str) -> RecordingVerdict {
        RecordingVerdict {
            recording: recording.into(),
            predicted: predicted.into(),
            truth: truth.map(str::to_owned),
            correct: truth == Some(predicted),
        }
    }

    #[test]
    fn predictions_use_blank_truth_for_unknown_labels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("test_results_logreg.csv");
        write_predictions(
            &path,
            &[verdict("a.csv", Some("x"), "x"), verdict("b.csv", None, "y")],
        )
        .unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "recording,true_label,predicted_label,correct");
        assert_eq!(lines[1], "a.csv,x,x,true");
        assert_eq!(lines[2], "b.csv,,y,false");
    }

    #[test]
    fn importances_are_ranked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("importance.csv");
        write_importances(&path, &["a".into(), "b".into()], &[0.25, 0.75]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "feature,importance\nb,0.75\na,0.25\n");
    }

    #[test]
    fn confusion_has_labelled_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("confusion.csv");
        let classes = vec!["x".to_owned(), "y".to_owned()];
        let matrix = ConfusionMatrix::from_verdicts(
            &classes,
            &[verdict("1", Some("x"), "y"), verdict("2", Some("y"), "y")],
        );
        write_confusion(&path, &matrix).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "true\\predicted,x,y\nx,0,1\ny,0,1\n");
    }

    #[test]
    fn split_summary_keeps_its_header_without_results() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("split_summary.csv");
        write_split_summary(&path, &[]).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "split,model,n_correct,n_test_samples,accuracy\n"
        );

        let result = SplitResult {
            split: "a".into(),
            model: "logreg".into(),
            n_correct: 3,
            n_test_samples: 4,
            accuracy: 0.75,
        };
        write_split_summary(&path, &[result]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().nth(1), Some("a,logreg,3,4,0.75"));
    }

    #[test]
    fn grid_summary_is_keyed_by_family() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(GRID_RESULTS_FILE);
        let outcome = GridSearchOutcome {
            family: ModelFamily::LogReg,
            best_params: crate::models::params::param_set([("C", 10.0_f64.into())]),
            best_score: 0.5,
            results: Vec::new(),
        };
        write_grid_results(&path, &[outcome]).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["logreg"]["best_score"], 0.5);
        assert_eq!(value["logreg"]["best_params"]["C"], 10.0);
    }
}
