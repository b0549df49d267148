use std::{
    collections::HashSet,
    fmt, fs,
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Driver associated with a recording: a known label, or the label-list row index when
/// the truth is not available.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DriverTag {
    /// Lower-cased, trimmed driver label.
    Known(String),
    /// Row index of a label-less prediction entry.
    Placeholder(usize),
}

impl DriverTag {
    /// The label, when known.
    #[must_use]
    pub fn known(&self) -> Option<&str> {
        match self {
            Self::Known(label) => Some(label),
            Self::Placeholder(_) => None,
        }
    }
}

impl fmt::Display for DriverTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(label) => f.write_str(label),
            Self::Placeholder(row) => write!(f, "{row}"),
        }
    }
}

/// How label-list rows are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelMode {
    /// Every kept row needs a non-blank label.
    Training,
    /// Labels are optional; blanks become row-index placeholders.
    Prediction,
}

/// One raw row of a label list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRow {
    /// Recording path as written, absolute or relative to the data directory.
    pub file: String,
    /// Driver label as written.
    #[serde(default)]
    pub label: Option<String>,
}

impl LabelRow {
    /// Convenience constructor.
    #[must_use]
    pub fn new(file: impl Into<String>, label: Option<&str>) -> Self {
        Self {
            file: file.into(),
            label: label.map(str::to_owned),
        }
    }
}

/// Resolved label entry ready for loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelEntry {
    /// Recording identifier used for grouping and reporting.
    pub recording: String,
    /// Resolved file path.
    pub path: PathBuf,
    /// Driver tag.
    pub driver: DriverTag,
}

/// Anything that can produce label rows: a file on disk or an in-memory table.
pub trait LabelSource {
    /// Returns the rows in source order.
    fn rows(&self) -> Result<Vec<LabelRow>>;
}

/// Delimited label list on disk with `File` and `Label` columns.
#[derive(Debug, Clone)]
pub struct LabelFile {
    path: PathBuf,
}

impl LabelFile {
    /// Wraps a path; nothing is read until [`LabelSource::rows`].
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the list.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn sniff_delimiter(content: &str) -> u8 {
    let first = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    [b',', b';', b'\t']
        .into_iter()
        .map(|d| (d, first.bytes().filter(|b| *b == d).count()))
        .fold((b',', 0), |best, cand| if cand.1 > best.1 { cand } else { best })
        .0
}

impl LabelSource for LabelFile {
    fn rows(&self) -> Result<Vec<LabelRow>> {
        let content = fs::read_to_string(&self.path)
            .map_err(|err| PipelineError::label_file(&self.path, err.to_string()))?;
        let mut reader = ReaderBuilder::new()
            .delimiter(sniff_delimiter(&content))
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(content.as_bytes());
        let headers = reader
            .headers()
            .map_err(|err| PipelineError::label_file(&self.path, err.to_string()))?
            .clone();
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let file_idx = find("file")
            .ok_or_else(|| PipelineError::label_file(&self.path, "missing `File` column"))?;
        let label_idx = find("label");

        let mut rows = Vec::new();
        for record in reader.records() {
            let record =
                record.map_err(|err| PipelineError::label_file(&self.path, err.to_string()))?;
            rows.push(LabelRow {
                file: record.get(file_idx).unwrap_or_default().to_owned(),
                label: label_idx.and_then(|idx| record.get(idx)).map(str::to_owned),
            });
        }
        Ok(rows)
    }
}

/// Label rows supplied directly by the caller.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLabels {
    rows: Vec<LabelRow>,
}

impl InMemoryLabels {
    /// Wraps the rows.
    #[must_use]
    pub fn new(rows: Vec<LabelRow>) -> Self {
        Self { rows }
    }
}

impl LabelSource for InMemoryLabels {
    fn rows(&self) -> Result<Vec<LabelRow>> {
        Ok(self.rows.clone())
    }
}

/// Applies the label rules of `mode` and resolves relative paths against `data_dir`.
///
/// Blank and repeated `File` values are skipped in both modes.
pub fn resolve_labels(
    source: &dyn LabelSource,
    mode: LabelMode,
    data_dir: &Path,
) -> Result<Vec<LabelEntry>> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for (row_index, row) in source.rows()?.into_iter().enumerate() {
        let file = row.file.trim();
        if file.is_empty() || !seen.insert(file.to_owned()) {
            continue;
        }
        let label = row
            .label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty());
        let driver = match (mode, label) {
            (_, Some(label)) => DriverTag::Known(label.to_lowercase()),
            (LabelMode::Training, None) => continue,
            (LabelMode::Prediction, None) => DriverTag::Placeholder(row_index),
        };
        let candidate = PathBuf::from(file);
        let path = if candidate.is_absolute() {
            candidate
        } else {
            data_dir.join(candidate)
        };
        entries.push(LabelEntry {
            recording: file.to_owned(),
            path,
            driver,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sniffs_semicolon_and_matches_headers_case_insensitively() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels.lbl");
        fs::write(&path, " file ; LABEL \na.csv; Alice \nb.csv;BOB\n").unwrap();
        let entries =
            resolve_labels(&LabelFile::new(&path), LabelMode::Training, Path::new("data")).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].driver, DriverTag::Known("alice".into()));
        assert_eq!(entries[0].path, Path::new("data").join("a.csv"));
        assert_eq!(entries[1].driver.known(), Some("bob"));
    }

    #[test]
    fn training_skips_blank_and_duplicate_rows() {
        let source = InMemoryLabels::new(vec![
            LabelRow::new("a.csv", Some("x")),
            LabelRow::new("  ", Some("y")),
            LabelRow::new("b.csv", Some("  ")),
            LabelRow::new("a.csv", Some("z")),
            LabelRow::new("c.csv", None),
        ]);
        let entries = resolve_labels(&source, LabelMode::Training, Path::new("d")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].recording, "a.csv");
    }

    #[test]
    fn prediction_uses_row_index_placeholders() {
        let source = InMemoryLabels::new(vec![
            LabelRow::new("a.csv", Some("Carol")),
            LabelRow::new("b.csv", None),
            LabelRow::new("c.csv", Some("")),
        ]);
        let entries = resolve_labels(&source, LabelMode::Prediction, Path::new("d")).unwrap();
        assert_eq!(entries[0].driver, DriverTag::Known("carol".into()));
        assert_eq!(entries[1].driver, DriverTag::Placeholder(1));
        assert_eq!(entries[2].driver, DriverTag::Placeholder(2));
        assert_eq!(entries[2].driver.to_string(), "2");
    }

    #[test]
    fn absolute_paths_are_kept() {
        let dir = tempdir().unwrap();
        let absolute = dir.path().join("x.csv");
        let source = InMemoryLabels::new(vec![LabelRow::new(
            absolute.to_string_lossy(),
            Some("a"),
        )]);
        let entries = resolve_labels(&source, LabelMode::Training, Path::new("data")).unwrap();
        assert_eq!(entries[0].path, absolute);
    }

    #[test]
    fn tab_separated_without_label_column_predicts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.lbl");
        fs::write(&path, "File\tNote\nq.csv\tfoo\n").unwrap();
        let source = LabelFile::new(&path);
        let entries = resolve_labels(&source, LabelMode::Prediction, dir.path()).unwrap();
        assert_eq!(entries[0].driver, DriverTag::Placeholder(0));
        assert!(resolve_labels(&source, LabelMode::Training, dir.path())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn missing_file_column_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.lbl");
        fs::write(&path, "Path,Label\na.csv,x\n").unwrap();
        assert!(matches!(
            LabelFile::new(&path).rows(),
            Err(PipelineError::LabelFile { .. })
        ));
        assert!(matches!(
            LabelFile::new(dir.path().join("absent.lbl")).rows(),
            Err(PipelineError::LabelFile { .. })
        ));
    }

    #[test]
    fn driver_tag_serializes_untagged() {
        assert_eq!(
            serde_json::to_string(&DriverTag::Known("a".into())).unwrap(),
            "\"a\""
        );
        assert_eq!(serde_json::to_string(&DriverTag::Placeholder(3)).unwrap(), "3");
    }
}
