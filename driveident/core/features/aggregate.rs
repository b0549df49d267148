//! Per-window aggregation of resampled observations.

use ndarray::Array2;

use super::{stats, table::FeatureTable};
use crate::data::{WindowSlice, CHANNELS};

/// Child table name used in generated column names.
const OBSERVATIONS: &str = "observations";

#[derive(Debug, Clone, Copy)]
enum Aggregation {
    Mean,
    Std,
    Min,
    Max,
    Sum,
    Skew,
    Kurtosis,
}

const AGGREGATIONS: [Aggregation; 7] = [
    Aggregation::Mean,
    Aggregation::Std,
    Aggregation::Min,
    Aggregation::Max,
    Aggregation::Sum,
    Aggregation::Skew,
    Aggregation::Kurtosis,
];

impl Aggregation {
    const fn label(self) -> &'static str {
        match self {
            Self::Mean => "MEAN",
            Self::Std => "STD",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Sum => "SUM",
            Self::Skew => "SKEW",
            Self::Kurtosis => "KURTOSIS",
        }
    }

    fn apply(self, values: &[f64]) -> f64 {
        match self {
            Self::Mean => stats::mean(values),
            Self::Std => stats::std_dev(values, 1),
            Self::Min => stats::min(values),
            Self::Max => stats::max(values),
            Self::Sum => stats::sum(values),
            Self::Skew => stats::skewness(values),
            Self::Kurtosis => stats::kurtosis(values),
        }
    }
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `_`.
#[must_use]
pub fn sanitize_column(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Column names in output order.
#[must_use]
pub fn column_names() -> Vec<String> {
    AGGREGATIONS
        .iter()
        .flat_map(|agg| {
            CHANNELS.iter().map(move |channel| {
                sanitize_column(&format!("{}({OBSERVATIONS}.{})", agg.label(), channel.name()))
            })
        })
        .collect()
}

/// Aggregates the resampled observations of every window.
#[must_use]
pub fn extract(slices: &[WindowSlice], max_points: usize) -> FeatureTable {
    let columns = column_names();
    let mut values = Array2::from_elem((slices.len(), columns.len()), f64::NAN);
    for (row, slice) in slices.iter().enumerate() {
        let observations = slice.resampled(max_points);
        let per_channel: Vec<Vec<f64>> = (0..CHANNELS.len())
            .map(|c| observations.iter().map(|o| o.values[c]).collect())
            .collect();
        let mut col = 0;
        for agg in AGGREGATIONS {
            for samples in &per_channel {
                let value = agg.apply(samples);
                values[[row, col]] = if value.is_finite() { value } else { f64::NAN };
                col += 1;
            }
        }
    }
    super::identity_table(slices, columns, values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_sanitized() {
        assert_eq!(
            sanitize_column("MEAN(observations.yaw_rate)"),
            "MEAN_observations_yaw_rate_"
        );
        let names = column_names();
        assert_eq!(names.len(), 35);
        assert_eq!(names[0], "MEAN_observations_steer_");
        assert!(names.contains(&"KURTOSIS_observations_speed_".to_owned()));
    }
}
