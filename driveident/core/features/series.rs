//! Minimal statistic battery over the raw samples of each window.

use ndarray::Array2;

use super::{stats, table::FeatureTable};
use crate::data::{WindowSlice, CHANNELS};

#[derive(Debug, Clone, Copy)]
enum Statistic {
    SumValues,
    Median,
    Mean,
    Length,
    StandardDeviation,
    Variance,
    RootMeanSquare,
    Maximum,
    AbsoluteMaximum,
    Minimum,
}

const STATISTICS: [Statistic; 10] = [
    Statistic::SumValues,
    Statistic::Median,
    Statistic::Mean,
    Statistic::Length,
    Statistic::StandardDeviation,
    Statistic::Variance,
    Statistic::RootMeanSquare,
    Statistic::Maximum,
    Statistic::AbsoluteMaximum,
    Statistic::Minimum,
];

impl Statistic {
    const fn name(self) -> &'static str {
        match self {
            Self::SumValues => "sum_values",
            Self::Median => "median",
            Self::Mean => "mean",
            Self::Length => "length",
            Self::StandardDeviation => "standard_deviation",
            Self::Variance => "variance",
            Self::RootMeanSquare => "root_mean_square",
            Self::Maximum => "maximum",
            Self::AbsoluteMaximum => "absolute_maximum",
            Self::Minimum => "minimum",
        }
    }

    /// Population spread (`ddof = 0`); `length` counts non-missing samples.
    fn compute(self, samples: &[f64]) -> f64 {
        match self {
            Self::SumValues => stats::sum(samples),
            Self::Median => stats::median(samples),
            Self::Mean => stats::mean(samples),
            Self::Length => stats::count(samples) as f64,
            Self::StandardDeviation => stats::std_dev(samples, 0),
            Self::Variance => stats::variance(samples, 0),
            Self::RootMeanSquare => stats::root_mean_square(samples),
            Self::Maximum => stats::max(samples),
            Self::AbsoluteMaximum => stats::abs_max(samples),
            Self::Minimum => stats::min(samples),
        }
    }
}

/// Column names in output order: `channel__statistic`.
#[must_use]
pub fn column_names() -> Vec<String> {
    CHANNELS
        .iter()
        .flat_map(|channel| {
            STATISTICS
                .iter()
                .map(move |stat| format!("{}__{}", channel.name(), stat.name()))
        })
        .collect()
}

/// Computes the battery for every window. Non-finite results become `0`.
#[must_use]
pub fn extract(slices: &[WindowSlice]) -> FeatureTable {
    let columns = column_names();
    let mut values = Array2::zeros((slices.len(), columns.len()));
    for (row, slice) in slices.iter().enumerate() {
        let mut col = 0;
        for channel in CHANNELS {
            let samples = slice.raw(channel);
            for stat in STATISTICS {
                let value = stat.compute(samples);
                values[[row, col]] = if value.is_finite() { value } else { 0.0 };
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
    fn battery_names_follow_channel_order() {
        let names = column_names();
        assert_eq!(names.len(), 50);
        assert_eq!(names[0], "steer__sum_values");
        assert_eq!(names[49], "yaw_rate__minimum");
    }

    #[test]
    fn population_spread_and_length() {
        let samples = [1.0, 2.0, 3.0, f64::NAN];
        assert!((Statistic::Variance.compute(&samples) - 2.0 / 3.0).abs() < 1e-12);
        assert!((Statistic::AbsoluteMaximum.compute(&[-3.0, 1.0]) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn length_skips_missing_samples() {
        let samples = [1.0, 2.0, 3.0, f64::NAN];
        assert!((Statistic::Length.compute(&samples) - 3.0).abs() < f64::EPSILON);
        assert!(Statistic::Length.compute(&[f64::NAN]).abs() < f64::EPSILON);
    }
}
