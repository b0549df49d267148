//! Window feature extraction strategies.

/// Aggregation strategy over resampled observations.
pub mod aggregate;
/// Time-series-native statistic battery over raw samples.
pub mod series;
/// Descriptive statistics helpers.
pub mod stats;
/// Feature table and schema operations.
pub mod table;

use std::{fmt, str::FromStr};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    data::{labels::LabelEntry, segment::WindowParams, segment_recordings, WindowSlice},
    error::{PipelineError, Result},
    telemetry::{trace, PipelineTelemetry},
};
use table::FeatureTable;

/// Prefix for time-series columns whose name the aggregation strategy already uses.
pub const SERIES_NAMESPACE: &str = "ts__";

/// Which strategies produce the feature columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureSet {
    /// Aggregations over resampled observations.
    #[serde(rename = "aggregation", alias = "featuretools")]
    Aggregation,
    /// Statistic battery over raw window samples.
    #[serde(rename = "time-series-native", alias = "tsfresh")]
    TimeSeries,
    /// Both strategies joined on window id.
    #[serde(rename = "both")]
    Both,
}

impl FeatureSet {
    /// Canonical identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Aggregation => "aggregation",
            Self::TimeSeries => "time-series-native",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureSet {
    type Err = PipelineError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "aggregation" | "featuretools" => Ok(Self::Aggregation),
            "time-series-native" | "tsfresh" => Ok(Self::TimeSeries),
            "both" => Ok(Self::Both),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown feature set `{other}`"
            ))),
        }
    }
}

pub(crate) fn identity_table(
    slices: &[WindowSlice],
    columns: Vec<String>,
    values: Array2<f64>,
) -> FeatureTable {
    FeatureTable {
        window_ids: slices.iter().map(|s| s.window_id).collect(),
        drivers: slices.iter().map(|s| s.driver.clone()).collect(),
        recordings: slices.iter().map(|s| s.recording.clone()).collect(),
        columns,
        values,
    }
}

/// Turns windows into one feature row each.
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor {
    feature_set: FeatureSet,
    max_points: usize,
}

impl FeatureExtractor {
    /// Extractor for `feature_set`, resampling aggregation input to `max_points`.
    #[must_use]
    pub const fn new(feature_set: FeatureSet, max_points: usize) -> Self {
        Self {
            feature_set,
            max_points,
        }
    }

    /// Strategy in use.
    #[must_use]
    pub const fn feature_set(&self) -> FeatureSet {
        self.feature_set
    }

    /// Feature rows for the given windows, in window order. Zero windows give an empty
    /// table.
    #[must_use]
    pub fn extract(&self, slices: &[WindowSlice]) -> FeatureTable {
        match self.feature_set {
            FeatureSet::Aggregation => aggregate::extract(slices, self.max_points),
            FeatureSet::TimeSeries => series::extract(slices),
            FeatureSet::Both => aggregate::extract(slices, self.max_points)
                .join(&series::extract(slices), SERIES_NAMESPACE),
        }
    }

    /// Loads, segments and extracts every labelled recording.
    pub fn extract_from_entries(
        &self,
        entries: &[LabelEntry],
        params: &WindowParams,
        telemetry: Option<&PipelineTelemetry>,
    ) -> Result<FeatureTable> {
        let slices = segment_recordings(entries, params, telemetry)?;
        let table = self.extract(&slices);
        trace(
            telemetry,
            LogLevel::Info,
            "features.extracted",
            json!({
                "feature_set": self.feature_set.as_str(),
                "recordings": entries.len(),
                "windows": table.n_rows(),
                "columns": table.columns.len(),
            }),
        );
        Ok(table)
    }
}
