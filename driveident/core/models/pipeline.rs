use std::collections::BTreeSet;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::{Classifier, ClassifierSpec, FittedClassifier};
use crate::{
    error::{PipelineError, Result},
    features::stats,
};

/// Replaces missing values with the per-column median of the fitting data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedianImputer {
    medians: Vec<f64>,
}

impl MedianImputer {
    /// Learns column medians. Columns with no observed value impute `0`.
    #[must_use]
    pub fn fit(x: ArrayView2<'_, f64>) -> Self {
        let medians = x
            .axis_iter(Axis(1))
            .map(|col| {
                let median = stats::median(&col.to_vec());
                if median.is_finite() {
                    median
                } else {
                    0.0
                }
            })
            .collect();
        Self { medians }
    }

    /// Copy of `x` with every non-finite cell replaced.
    #[must_use]
    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = x.to_owned();
        for (mut col, median) in out.axis_iter_mut(Axis(1)).zip(&self.medians) {
            col.mapv_inplace(|v| if v.is_finite() { v } else { *median });
        }
        out
    }
}

/// Centers columns to zero mean and scales them to unit variance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// Learns column means and population standard deviations; constant columns keep
    /// a scale of `1`.
    #[must_use]
    pub fn fit(x: ArrayView2<'_, f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let mean = x.sum_axis(Axis(0)) / n;
        let scale = x
            .axis_iter(Axis(1))
            .zip(mean.iter())
            .map(|(col, m)| {
                let var = col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                if std > 1e-12 && std.is_finite() {
                    std
                } else {
                    1.0
                }
            })
            .collect();
        Self { mean, scale }
    }

    /// Scaled copy of `x`.
    #[must_use]
    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        (&x - &self.mean) / &self.scale
    }
}

/// Imputer, scaler and classifier fitted together, plus the class order of the output
/// probabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierPipeline {
    imputer: MedianImputer,
    scaler: StandardScaler,
    classifier: FittedClassifier,
    classes: Vec<String>,
}

impl ClassifierPipeline {
    /// Fits all stages on `x` with string labels. Classes are sorted.
    pub fn fit(spec: &ClassifierSpec, x: ArrayView2<'_, f64>, labels: &[String]) -> Result<Self> {
        if x.nrows() == 0 || x.nrows() != labels.len() {
            return Err(PipelineError::Fit(format!(
                "{} rows with {} labels",
                x.nrows(),
                labels.len()
            )));
        }
        if x.ncols() == 0 {
            return Err(PipelineError::Fit("feature matrix has no columns".into()));
        }
        let classes: Vec<String> = labels
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let targets: Vec<usize> = labels
            .iter()
            .map(|l| classes.binary_search(l).unwrap_or_default())
            .collect();
        let imputer = MedianImputer::fit(x);
        let imputed = imputer.transform(x);
        let scaler = StandardScaler::fit(imputed.view());
        let scaled = scaler.transform(imputed.view());
        let classifier = spec.fit(scaled.view(), &targets, classes.len())?;
        Ok(Self {
            imputer,
            scaler,
            classifier,
            classes,
        })
    }

    /// Probabilities per row, columns in [`Self::classes`] order.
    #[must_use]
    pub fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let imputed = self.imputer.transform(x);
        let scaled = self.scaler.transform(imputed.view());
        self.classifier.predict_proba(scaled.view())
    }

    /// Sorted class labels.
    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Per-feature importance of the fitted classifier.
    #[must_use]
    pub fn feature_importances(&self) -> Vec<f64> {
        self.classifier.feature_importances()
    }

    /// Fitted classifier.
    #[must_use]
    pub const fn classifier(&self) -> &FittedClassifier {
        &self.classifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelFamily;
    use ndarray::array;

    #[test]
    fn imputer_uses_medians_and_zero_for_empty_columns() {
        let x = array![[1.0, f64::NAN], [f64::NAN, f64::NAN], [5.0, f64::NAN], [3.0, f64::NAN]];
        let imputer = MedianImputer::fit(x.view());
        let out = imputer.transform(x.view());
        assert_eq!(out[[1, 0]], 3.0);
        assert_eq!(out[[0, 1]], 0.0);
    }

    #[test]
    fn scaler_keeps_constant_columns_finite() {
        let x = array![[1.0, 7.0], [3.0, 7.0]];
        let scaler = StandardScaler::fit(x.view());
        let out = scaler.transform(x.view());
        assert_eq!(out.column(0).to_vec(), vec![-1.0, 1.0]);
        assert_eq!(out.column(1).to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn pipeline_orders_classes_and_survives_missing_cells() {
        let x = array![
            [0.0, 1.0],
            [0.2, f64::NAN],
            [0.1, 1.1],
            [5.0, 3.0],
            [5.2, 3.1],
            [f64::NAN, 2.9]
        ];
        let labels: Vec<String> = ["zed", "zed", "zed", "amy", "amy", "amy"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        let spec = ModelFamily::LogReg
            .build(&ModelFamily::LogReg.default_params(7))
            .unwrap();
        let pipeline = ClassifierPipeline::fit(&spec, x.view(), &labels).unwrap();
        assert_eq!(pipeline.classes(), ["amy".to_owned(), "zed".to_owned()]);
        let proba = pipeline.predict_proba(array![[5.1, f64::NAN], [0.05, 1.0]].view());
        assert!(proba[[0, 0]] > 0.5);
        assert!(proba[[1, 1]] > 0.5);
    }

    #[test]
    fn mismatched_labels_fail() {
        let x = array![[1.0], [2.0]];
        let spec = ModelFamily::RandomForest
            .build(&ModelFamily::RandomForest.default_params(1))
            .unwrap();
        assert!(ClassifierPipeline::fit(&spec, x.view(), &["a".to_owned()]).is_err());
    }
}
