use std::collections::HashMap;

use ndarray::{Array1, Array2, ArrayView2};
use rand::{seq::index::sample, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, SquaredError, TreeConfig};
use crate::error::{PipelineError, Result};

/// Gradient boosting hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    /// Boosting stages.
    pub n_estimators: usize,
    /// Shrinkage applied to every stage.
    pub learning_rate: f64,
    /// Depth of each regression tree.
    pub max_depth: usize,
    /// Fraction of rows drawn (without replacement) per stage.
    pub subsample: f64,
    /// Minimum samples to split a node.
    pub min_samples_split: usize,
    /// Minimum samples per leaf.
    pub min_samples_leaf: usize,
    /// RNG seed.
    pub random_state: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 250,
            learning_rate: 0.05,
            max_depth: 3,
            subsample: 0.8,
            min_samples_split: 2,
            min_samples_leaf: 1,
            random_state: 42,
        }
    }
}

/// Multiclass gradient boosting on the softmax log-loss, one regression tree per class
/// per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    prior: Array1<f64>,
    stages: Vec<Vec<DecisionTree>>,
    learning_rate: f64,
    n_features: usize,
}

fn softmax_rows(scores: &Array2<f64>) -> Array2<f64> {
    let mut proba = scores.clone();
    for mut row in proba.rows_mut() {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        if total > 0.0 {
            row /= total;
        }
    }
    proba
}

impl GradientBoosting {
    /// Fits `params.n_estimators` stages on class indices `targets`.
    pub fn fit(
        params: &BoostingParams,
        x: ArrayView2<'_, f64>,
        targets: &[usize],
        n_classes: usize,
    ) -> Result<Self> {
        let (n, d) = x.dim();
        if n == 0 || d == 0 || targets.len() != n || n_classes == 0 {
            return Err(PipelineError::Fit(format!(
                "gradient boosting needs a non-empty matrix with one target per row (rows {n}, targets {})",
                targets.len()
            )));
        }
        if !(params.subsample > 0.0 && params.subsample <= 1.0) {
            return Err(PipelineError::Fit(format!(
                "subsample must lie in (0, 1], got {}",
                params.subsample
            )));
        }
        let mut counts = vec![0.0_f64; n_classes];
        for &t in targets {
            counts[t] += 1.0;
        }
        let prior = Array1::from_iter(
            counts
                .iter()
                .map(|c| (c / n as f64).max(f64::MIN_POSITIVE).ln()),
        );
        let mut scores = Array2::from_shape_fn((n, n_classes), |(_, k)| prior[k]);
        let config = TreeConfig {
            max_depth: Some(params.max_depth),
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features: None,
        };
        let draw = ((params.subsample * n as f64).round() as usize).clamp(1, n);
        let mut rng = ChaCha8Rng::seed_from_u64(params.random_state);
        let k_factor = (n_classes as f64 - 1.0) / n_classes as f64;
        let mut stages = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            let proba = softmax_rows(&scores);
            let mut rows = if draw < n {
                sample(&mut rng, n, draw).into_vec()
            } else {
                (0..n).collect()
            };
            rows.sort_unstable();
            let mut stage = Vec::with_capacity(n_classes);
            for k in 0..n_classes {
                let residual: Vec<f64> = (0..n)
                    .map(|i| f64::from(u8::from(targets[i] == k)) - proba[[i, k]])
                    .collect();
                let mut tree = DecisionTree::fit(
                    x,
                    &rows,
                    &SquaredError {
                        targets: &residual,
                    },
                    &config,
                    &mut rng,
                );
                let mut sums: HashMap<usize, (f64, f64)> = HashMap::new();
                for &i in &rows {
                    let leaf = tree.apply(x.row(i));
                    let r = residual[i];
                    let entry = sums.entry(leaf).or_insert((0.0, 0.0));
                    entry.0 += r;
                    entry.1 += r.abs() * (1.0 - r.abs());
                }
                for (leaf, (num, den)) in sums {
                    let gamma = if den.abs() < 1e-150 {
                        0.0
                    } else {
                        k_factor * num / den
                    };
                    tree.set_leaf_value(leaf, vec![gamma]);
                }
                for i in 0..n {
                    scores[[i, k]] += params.learning_rate * tree.predict_row(x.row(i))[0];
                }
                stage.push(tree);
            }
            stages.push(stage);
        }

        Ok(Self {
            prior,
            stages,
            learning_rate: params.learning_rate,
            n_features: d,
        })
    }

    fn decision(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut scores =
            Array2::from_shape_fn((x.nrows(), self.prior.len()), |(_, k)| self.prior[k]);
        for stage in &self.stages {
            for (k, tree) in stage.iter().enumerate() {
                for (i, row) in x.rows().into_iter().enumerate() {
                    scores[[i, k]] += self.learning_rate * tree.predict_row(row)[0];
                }
            }
        }
        scores
    }

    /// Class probabilities per row.
    #[must_use]
    pub fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        softmax_rows(&self.decision(x))
    }

    /// Mean of the per-tree normalized impurity decreases.
    #[must_use]
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut total = vec![0.0; self.n_features];
        let mut trees = 0_usize;
        for tree in self.stages.iter().flatten() {
            let importances = tree.feature_importances();
            if importances.iter().all(|v| *v == 0.0) {
                continue;
            }
            trees += 1;
            for (acc, v) in total.iter_mut().zip(importances) {
                *acc += v;
            }
        }
        if trees == 0 {
            return total;
        }
        total.iter().map(|v| v / trees as f64).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn boosting_fits_threshold_rule() {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| if j == 0 { i as f64 } else { 1.0 });
        let y: Vec<usize> = (0..40).map(|i| usize::from(i >= 20)).collect();
        let params = BoostingParams {
            n_estimators: 30,
            learning_rate: 0.1,
            ..BoostingParams::default()
        };
        let model = GradientBoosting::fit(&params, x.view(), &y, 2).unwrap();
        let proba = model.predict_proba(array![[3.0, 1.0], [35.0, 1.0]].view());
        assert!(proba[[0, 0]] > 0.8);
        assert!(proba[[1, 1]] > 0.8);
        assert!((proba.row(0).sum() - 1.0).abs() < 1e-9);
        let importances = model.feature_importances();
        assert!((importances[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn prior_matches_class_frequencies_with_no_stages() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let params = BoostingParams {
            n_estimators: 0,
            ..BoostingParams::default()
        };
        let model = GradientBoosting::fit(&params, x.view(), &[0, 0, 0, 1], 2).unwrap();
        let proba = model.predict_proba(array![[9.0]].view());
        assert!((proba[[0, 0]] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn invalid_subsample_is_rejected() {
        let x = array![[0.0], [1.0]];
        let params = BoostingParams {
            subsample: 1.5,
            ..BoostingParams::default()
        };
        assert!(GradientBoosting::fit(&params, x.view(), &[0, 1], 2).is_err());
    }
}
