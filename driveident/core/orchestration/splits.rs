use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use super::{predict::PredictionOrchestrator, train::TrainingOrchestrator};
use crate::{
    config::{ConfigOverrides, PipelineConfig},
    data::labels::LabelFile,
    error::Result,
    telemetry::{trace, PipelineTelemetry},
};

const TRAIN_SUFFIX: &str = "_train.lbl";
const TEST_SUFFIX: &str = "_test.lbl";
const SPLIT_PREFIX: &str = "split_";

/// One train/test pair of label files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitJob {
    /// Split name, also the artifact sub-directory.
    pub name: String,
    /// Training label list.
    pub train_labels: PathBuf,
    /// Test label list.
    pub test_labels: PathBuf,
}

/// Score of one model on one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitResult {
    /// Split name.
    pub split: String,
    /// Model family identifier.
    pub model: String,
    /// Correct test recordings.
    pub n_correct: usize,
    /// Test recordings with a known truth.
    pub n_test_samples: usize,
    /// `n_correct / n_test_samples`, `0` without samples.
    pub accuracy: f64,
}

/// Pairs `split_<name>_train.lbl` with `split_<name>_test.lbl` inside `dir`, sorted by
/// name. Train lists without a test partner are ignored.
pub fn discover_splits(dir: impl AsRef<Path>) -> Result<Vec<SplitJob>> {
    let dir = dir.as_ref();
    let mut jobs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(name) = file_name
            .strip_prefix(SPLIT_PREFIX)
            .and_then(|rest| rest.strip_suffix(TRAIN_SUFFIX))
        else {
            continue;
        };
        let test_labels = dir.join(format!("{SPLIT_PREFIX}{name}{TEST_SUFFIX}"));
        if !test_labels.is_file() {
            continue;
        }
        jobs.push(SplitJob {
            name: name.to_owned(),
            train_labels: path.clone(),
            test_labels,
        });
    }
    jobs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(jobs)
}

/// Trains and scores one split in its own artifact directory with its own config value.
///
/// The split directory is removed afterwards, on failure as well, unless
/// `keep_artifacts` is set.
pub fn run_split(
    base: &PipelineConfig,
    job: &SplitJob,
    artifacts_root: &Path,
    keep_artifacts: bool,
) -> Result<Vec<SplitResult>> {
    let artifacts_dir = artifacts_root.join(&job.name);
    let config = base.with_overrides(&ConfigOverrides {
        labels_file: Some(job.train_labels.clone()),
        test_labels_file: Some(job.test_labels.clone()),
        artifacts_dir: Some(artifacts_dir.clone()),
        ..ConfigOverrides::default()
    });
    let telemetry =
        PipelineTelemetry::for_artifacts(format!("split-{}", job.name), &artifacts_dir, Vec::new())
            .ok();

    let outcome = score_split(config, job, telemetry.as_ref());
    if let Err(err) = &outcome {
        trace(
            telemetry.as_ref(),
            LogLevel::Error,
            "split.failed",
            json!({ "split": job.name, "error": err.to_string() }),
        );
    }
    drop(telemetry);
    let cleanup = if !keep_artifacts && artifacts_dir.exists() {
        fs::remove_dir_all(&artifacts_dir)
    } else {
        Ok(())
    };
    let results = outcome?;
    cleanup?;
    Ok(results)
}

fn score_split(
    config: PipelineConfig,
    job: &SplitJob,
    telemetry: Option<&PipelineTelemetry>,
) -> Result<Vec<SplitResult>> {
    TrainingOrchestrator::new(config.clone(), telemetry.cloned())
        .run(&LabelFile::new(&job.train_labels))?;
    let report = PredictionOrchestrator::new(config, telemetry.cloned())
        .run(&LabelFile::new(&job.test_labels))?;

    let results: Vec<SplitResult> = report
        .verdicts
        .iter()
        .map(|(family, verdicts)| {
            let n_test_samples = verdicts.iter().filter(|v| v.truth.is_some()).count();
            let n_correct = verdicts.iter().filter(|v| v.correct).count();
            SplitResult {
                split: job.name.clone(),
                model: family.as_str().to_owned(),
                n_correct,
                n_test_samples,
                accuracy: if n_test_samples == 0 {
                    0.0
                } else {
                    n_correct as f64 / n_test_samples as f64
                },
            }
        })
        .collect();
    trace(
        telemetry,
        LogLevel::Info,
        "split.done",
        json!({ "split": job.name, "results": results }),
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pairs_train_and_test_lists() {
        let dir = tempdir().unwrap();
        for name in [
            "split_b_train.lbl",
            "split_b_test.lbl",
            "split_a_train.lbl",
            "split_a_test.lbl",
            "split_c_train.lbl",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), "File,Label\n").unwrap();
        }
        let jobs = discover_splits(dir.path()).unwrap();
        let names: Vec<&str> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(jobs[0].test_labels, dir.path().join("split_a_test.lbl"));
    }

    fn empty_split(root: &Path) -> SplitJob {
        let train_labels = root.join("split_x_train.lbl");
        let test_labels = root.join("split_x_test.lbl");
        fs::write(&train_labels, "File,Label\n").unwrap();
        fs::write(&test_labels, "File,Label\n").unwrap();
        SplitJob {
            name: "x".into(),
            train_labels,
            test_labels,
        }
    }

    #[test]
    fn failed_split_removes_its_directory() {
        let dir = tempdir().unwrap();
        let job = empty_split(dir.path());
        let base = PipelineConfig {
            data_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let root = dir.path().join("splits");
        assert!(run_split(&base, &job, &root, false).is_err());
        assert!(!root.join("x").exists());
    }

    #[test]
    fn failed_split_keeps_its_directory_on_request() {
        let dir = tempdir().unwrap();
        let job = empty_split(dir.path());
        let base = PipelineConfig {
            data_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let root = dir.path().join("splits");
        assert!(run_split(&base, &job, &root, true).is_err());
        assert!(root.join("x").join("logs").is_dir());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(discover_splits(dir.path().join("absent")).is_err());
    }
}
