use ndarray::{Array2, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, Gini, TreeConfig};
use crate::error::{PipelineError, Result};

/// Number of features examined per split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MaxFeatures {
    /// `floor(log2(n))`.
    Log2,
    /// `floor(sqrt(n))`.
    Sqrt,
    /// Every feature.
    All,
    /// Fixed count.
    Count(usize),
    /// Fraction of the feature count.
    Fraction(f64),
}

impl MaxFeatures {
    /// Resolved count for `n_features`, at least one.
    #[must_use]
    pub fn resolve(self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            Self::Log2 => n.log2().floor() as usize,
            Self::Sqrt => n.sqrt().floor() as usize,
            Self::All => n_features,
            Self::Count(k) => k,
            Self::Fraction(f) => (f * n).floor() as usize,
        };
        k.clamp(1, n_features.max(1))
    }
}

/// Random forest hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    /// Number of trees.
    pub n_estimators: usize,
    /// Maximum tree depth.
    pub max_depth: Option<usize>,
    /// Minimum samples to split a node.
    pub min_samples_split: usize,
    /// Minimum samples per leaf.
    pub min_samples_leaf: usize,
    /// Features examined per split.
    pub max_features: MaxFeatures,
    /// Weight classes inversely to their frequency.
    pub balanced: bool,
    /// Draw a bootstrap sample per tree.
    pub bootstrap: bool,
    /// RNG seed.
    pub random_state: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 300,
            max_depth: Some(5),
            min_samples_split: 10,
            min_samples_leaf: 4,
            max_features: MaxFeatures::Log2,
            balanced: true,
            bootstrap: true,
            random_state: 42,
        }
    }
}

/// `n / (k * count_c)` per sample; classes absent from `targets` never occur.
pub(crate) fn balanced_weights(targets: &[usize], n_classes: usize) -> Vec<f64> {
    let mut counts = vec![0_usize; n_classes];
    for &t in targets {
        counts[t] += 1;
    }
    let present = counts.iter().filter(|c| **c > 0).count().max(1) as f64;
    let n = targets.len() as f64;
    targets
        .iter()
        .map(|&t| n / (present * counts[t] as f64))
        .collect()
}

/// Fitted forest of Gini trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_classes: usize,
    n_features: usize,
}

impl RandomForest {
    /// Fits `params.n_estimators` trees on class indices `targets`.
    pub fn fit(
        params: &ForestParams,
        x: ArrayView2<'_, f64>,
        targets: &[usize],
        n_classes: usize,
    ) -> Result<Self> {
        let n = x.nrows();
        if n == 0 || x.ncols() == 0 || targets.len() != n {
            return Err(PipelineError::Fit(format!(
                "random forest needs a non-empty matrix with one target per row (rows {n}, targets {})",
                targets.len()
            )));
        }
        let weights = if params.balanced {
            balanced_weights(targets, n_classes)
        } else {
            vec![1.0; n]
        };
        let gini = Gini {
            targets,
            weights: &weights,
            n_classes,
        };
        let config = TreeConfig {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features: Some(params.max_features.resolve(x.ncols())),
        };
        let mut master = ChaCha8Rng::seed_from_u64(params.random_state);
        let mut trees = Vec::with_capacity(params.n_estimators);
        for _ in 0..params.n_estimators.max(1) {
            let mut rng = ChaCha8Rng::seed_from_u64(master.gen());
            let samples: Vec<usize> = if params.bootstrap {
                (0..n).map(|_| rng.gen_range(0..n)).collect()
            } else {
                (0..n).collect()
            };
            trees.push(DecisionTree::fit(x, &samples, &gini, &config, &mut rng));
        }
        Ok(Self {
            trees,
            n_classes,
            n_features: x.ncols(),
        })
    }

    /// Mean of the trees' leaf distributions.
    #[must_use]
    pub fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut proba = Array2::zeros((x.nrows(), self.n_classes));
        for (row, sample) in x.rows().into_iter().enumerate() {
            for tree in &self.trees {
                for (k, p) in tree.predict_row(sample).iter().enumerate() {
                    proba[[row, k]] += p;
                }
            }
        }
        proba /= self.trees.len().max(1) as f64;
        proba
    }

    /// Mean of the per-tree normalized impurity decreases.
    #[must_use]
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut total = vec![0.0; self.n_features];
        for tree in &self.trees {
            for (acc, v) in total.iter_mut().zip(tree.feature_importances()) {
                *acc += v;
            }
        }
        let count = self.trees.len().max(1) as f64;
        total.iter().map(|v| v / count).collect()
    }

    /// Number of fitted trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn blobs() -> (Array2<f64>, Vec<usize>) {
        let mut rows = Vec::new();
        let mut targets = Vec::new();
        for i in 0..30 {
            let jitter = f64::from(i % 5) * 0.1;
            rows.extend([jitter, 1.0 - jitter, 0.5]);
            targets.push(0);
            rows.extend([3.0 + jitter, 4.0 - jitter, 0.5]);
            targets.push(1);
        }
        (Array2::from_shape_vec((60, 3), rows).unwrap(), targets)
    }

    #[test]
    fn max_features_resolution() {
        assert_eq!(MaxFeatures::Log2.resolve(85), 6);
        assert_eq!(MaxFeatures::Sqrt.resolve(85), 9);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
        assert_eq!(MaxFeatures::Count(500).resolve(10), 10);
        assert_eq!(MaxFeatures::Fraction(0.5).resolve(10), 5);
    }

    #[test]
    fn balanced_weights_equalize_class_mass() {
        let w = balanced_weights(&[0, 0, 0, 1], 3);
        assert!((w[0] - 4.0 / 6.0).abs() < 1e-12);
        assert!((w[3] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn forest_learns_separable_blobs_deterministically() {
        let (x, y) = blobs();
        let params = ForestParams {
            n_estimators: 15,
            min_samples_split: 2,
            min_samples_leaf: 1,
            ..ForestParams::default()
        };
        let forest = RandomForest::fit(&params, x.view(), &y, 2).unwrap();
        let proba = forest.predict_proba(array![[0.1, 0.9, 0.5], [3.2, 3.8, 0.5]].view());
        assert!(proba[[0, 0]] > 0.9);
        assert!(proba[[1, 1]] > 0.9);
        assert!((proba.row(0).sum() - 1.0).abs() < 1e-9);
        let again = RandomForest::fit(&params, x.view(), &y, 2).unwrap();
        assert_eq!(forest, again);
        let importances = forest.feature_importances();
        assert!(importances[2].abs() < f64::EPSILON);
    }

    #[test]
    fn empty_input_is_a_fit_error() {
        let x = Array2::<f64>::zeros((0, 3));
        assert!(matches!(
            RandomForest::fit(&ForestParams::default(), x.view(), &[], 2),
            Err(PipelineError::Fit(_))
        ));
    }
}
