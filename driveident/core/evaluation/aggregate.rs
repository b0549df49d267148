use indexmap::IndexMap;
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::data::labels::DriverTag;

/// Decision for one recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingVerdict {
    /// Recording identifier.
    pub recording: String,
    /// Arg-max class of the averaged probabilities.
    pub predicted: String,
    /// Known driver of the recording, if any.
    pub truth: Option<String>,
    /// Whether `predicted` equals a known `truth`.
    pub correct: bool,
}

/// Averages probability rows per recording and takes the arg-max.
///
/// Recordings appear in first-seen order. Ties go to the earliest class in `classes`.
/// The truth is the driver of the recording's first row.
#[must_use]
pub fn aggregate_by_recording(
    proba: ArrayView2<'_, f64>,
    classes: &[String],
    recordings: &[String],
    drivers: &[DriverTag],
) -> Vec<RecordingVerdict> {
    let mut sums: IndexMap<&str, (Array1<f64>, usize, Option<&str>)> = IndexMap::new();
    for (row, recording) in recordings.iter().enumerate() {
        let entry = sums.entry(recording.as_str()).or_insert_with(|| {
            (
                Array1::zeros(classes.len()),
                0,
                drivers.get(row).and_then(DriverTag::known),
            )
        });
        entry.0 += &proba.row(row);
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(recording, (total, rows, truth))| {
            let mean = total / rows.max(1) as f64;
            let mut best = 0;
            for (idx, p) in mean.iter().enumerate() {
                if *p > mean[best] {
                    best = idx;
                }
            }
            let predicted = classes.get(best).cloned().unwrap_or_default();
            let correct = truth.is_some_and(|t| t == predicted);
            RecordingVerdict {
                recording: recording.to_owned(),
                predicted,
                truth: truth.map(str::to_owned),
                correct,
            }
        })
        .collect()
}

/// Share of correct verdicts; `0` when there are none.
#[must_use]
pub fn accuracy(verdicts: &[RecordingVerdict]) -> f64 {
    if verdicts.is_empty() {
        return 0.0;
    }
    verdicts.iter().filter(|v| v.correct).count() as f64 / verdicts.len() as f64
}

/// Recording-level confusion counts, rows are true classes and columns predictions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    classes: Vec<String>,
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    /// Counts `verdicts` over `classes`. Verdicts without a truth, or naming a class
    /// outside the list, are not counted.
    #[must_use]
    pub fn from_verdicts(classes: &[String], verdicts: &[RecordingVerdict]) -> Self {
        let mut counts = vec![vec![0; classes.len()]; classes.len()];
        for verdict in verdicts {
            let Some(truth) = verdict.truth.as_deref() else {
                continue;
            };
            let row = classes.iter().position(|c| c == truth);
            let col = classes.iter().position(|c| *c == verdict.predicted);
            if let (Some(row), Some(col)) = (row, col) {
                counts[row][col] += 1;
            }
        }
        Self {
            classes: classes.to_vec(),
            counts,
        }
    }

    /// Class order of rows and columns.
    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Count rows, one per true class.
    #[must_use]
    pub fn rows(&self) -> &[Vec<usize>] {
        &self.counts
    }

    /// Recordings of class `truth` predicted as `predicted`.
    #[must_use]
    pub fn count(&self, truth: &str, predicted: &str) -> usize {
        let row = self.classes.iter().position(|c| c == truth);
        let col = self.classes.iter().position(|c| c == predicted);
        match (row, col) {
            (Some(r), Some(c)) => self.counts[r][c],
            _ => 0,
        }
    }

    /// Total counted recordings.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }
}
