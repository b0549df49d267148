use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::forest::balanced_weights;
use crate::error::{PipelineError, Result};

/// Optimizer for the penalized multinomial log-loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Solver {
    /// Stochastic average gradient with unbiased updates.
    Saga,
    /// Full-batch gradient descent.
    Gd,
}

/// Logistic regression hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    /// Inverse regularization strength.
    pub c: f64,
    /// Optimizer.
    pub solver: Solver,
    /// Maximum passes over the data.
    pub max_iter: usize,
    /// Stop when the relative weight change of a pass drops below this.
    pub tol: f64,
    /// Weight classes inversely to their frequency.
    pub balanced: bool,
    /// RNG seed for sample order.
    pub random_state: u64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            c: 100.0,
            solver: Solver::Saga,
            max_iter: 5000,
            tol: 1e-4,
            balanced: true,
            random_state: 42,
        }
    }
}

/// Fitted multinomial logistic regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// `features x classes` coefficients.
    coef: Array2<f64>,
    /// Per-class intercepts.
    intercept: Array1<f64>,
    /// Passes run before stopping.
    n_iter: usize,
}

fn softmax_in_place(mut logits: ndarray::ArrayViewMut1<'_, f64>) {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    logits.mapv_inplace(|v| (v - max).exp());
    let total = logits.sum();
    if total > 0.0 {
        logits /= total;
    }
}

impl LogisticRegression {
    /// Minimizes `mean(w_i * loss_i) + ||W||^2 / (2 * C * n)` over the rows of `x`.
    pub fn fit(
        params: &LogisticParams,
        x: ArrayView2<'_, f64>,
        targets: &[usize],
        n_classes: usize,
    ) -> Result<Self> {
        let (n, d) = x.dim();
        if n == 0 || targets.len() != n || n_classes == 0 {
            return Err(PipelineError::Fit(format!(
                "logistic regression needs rows with one target each (rows {n}, targets {})",
                targets.len()
            )));
        }
        if !(params.c.is_finite() && params.c > 0.0) {
            return Err(PipelineError::Fit(format!("C must be positive, got {}", params.c)));
        }
        let weights = if params.balanced {
            balanced_weights(targets, n_classes)
        } else {
            vec![1.0; n]
        };
        let alpha = 1.0 / (params.c * n as f64);
        let mut model = Self {
            coef: Array2::zeros((d, n_classes)),
            intercept: Array1::zeros(n_classes),
            n_iter: 0,
        };
        match params.solver {
            Solver::Saga => model.run_saga(params, x, targets, &weights, alpha),
            Solver::Gd => model.run_gd(params, x, targets, &weights, alpha),
        }
        Ok(model)
    }

    fn residual(&self, row: ArrayView1<'_, f64>, target: usize, weight: f64) -> Array1<f64> {
        let mut p = row.dot(&self.coef) + &self.intercept;
        softmax_in_place(p.view_mut());
        p[target] -= 1.0;
        p * weight
    }

    fn converged(&self, previous: &Array2<f64>, tol: f64) -> bool {
        let change = (&self.coef - previous)
            .iter()
            .fold(0.0_f64, |m, v| m.max(v.abs()));
        let scale = self.coef.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        scale == 0.0 || change / scale <= tol
    }

    fn run_saga(
        &mut self,
        params: &LogisticParams,
        x: ArrayView2<'_, f64>,
        targets: &[usize],
        weights: &[f64],
        alpha: f64,
    ) {
        let (n, _) = x.dim();
        let k = self.intercept.len();
        let max_sq = x
            .rows()
            .into_iter()
            .map(|r| r.dot(&r))
            .fold(0.0_f64, f64::max);
        let max_w = weights.iter().copied().fold(0.0_f64, f64::max);
        let lipschitz = 0.5 * max_w * (max_sq + 1.0) + alpha;
        let step = 1.0 / (3.0 * lipschitz);

        let mut memory = Array2::<f64>::zeros((n, k));
        let mut avg_coef = Array2::<f64>::zeros(self.coef.dim());
        let mut avg_intercept = Array1::<f64>::zeros(k);
        let mut rng = ChaCha8Rng::seed_from_u64(params.random_state);
        let inv_n = 1.0 / n as f64;

        for epoch in 0..params.max_iter.max(1) {
            let previous = self.coef.clone();
            for _ in 0..n {
                let j = rng.gen_range(0..n);
                let row = x.row(j);
                let fresh = self.residual(row, targets[j], weights[j]);
                let delta = &fresh - &memory.row(j);
                let outer = row
                    .insert_axis(Axis(1))
                    .dot(&delta.view().insert_axis(Axis(0)));
                let grad_coef = &outer + &avg_coef + &self.coef * alpha;
                let grad_intercept = &delta + &avg_intercept;
                self.coef.scaled_add(-step, &grad_coef);
                self.intercept.scaled_add(-step, &grad_intercept);
                avg_coef.scaled_add(inv_n, &outer);
                avg_intercept.scaled_add(inv_n, &delta);
                memory.row_mut(j).assign(&fresh);
            }
            self.n_iter = epoch + 1;
            if self.converged(&previous, params.tol) {
                break;
            }
        }
    }

    fn run_gd(
        &mut self,
        params: &LogisticParams,
        x: ArrayView2<'_, f64>,
        targets: &[usize],
        weights: &[f64],
        alpha: f64,
    ) {
        let (n, _) = x.dim();
        let max_sq = x
            .rows()
            .into_iter()
            .map(|r| r.dot(&r))
            .fold(0.0_f64, f64::max);
        let max_w = weights.iter().copied().fold(0.0_f64, f64::max);
        let step = 1.0 / (0.5 * max_w * (max_sq + 1.0) + alpha);
        let inv_n = 1.0 / n as f64;
        for epoch in 0..params.max_iter.max(1) {
            let previous = self.coef.clone();
            let mut residuals = Array2::<f64>::zeros((n, self.intercept.len()));
            for j in 0..n {
                let r = self.residual(x.row(j), targets[j], weights[j]);
                residuals.row_mut(j).assign(&r);
            }
            let grad_coef = x.t().dot(&residuals) * inv_n + &self.coef * alpha;
            let grad_intercept = residuals.sum_axis(Axis(0)) * inv_n;
            self.coef.scaled_add(-step, &grad_coef);
            self.intercept.scaled_add(-step, &grad_intercept);
            self.n_iter = epoch + 1;
            if self.converged(&previous, params.tol) {
                break;
            }
        }
    }

    /// Class probabilities per row.
    #[must_use]
    pub fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut logits = x.dot(&self.coef) + &self.intercept;
        for row in logits.rows_mut() {
            softmax_in_place(row);
        }
        logits
    }

    /// Mean absolute coefficient per feature across classes.
    #[must_use]
    pub fn feature_importances(&self) -> Vec<f64> {
        self.coef
            .rows()
            .into_iter()
            .map(|r| r.iter().map(|v| v.abs()).sum::<f64>() / r.len().max(1) as f64)
            .collect()
    }

    /// Passes run before convergence or the iteration cap.
    #[must_use]
    pub const fn n_iter(&self) -> usize {
        self.n_iter
    }

    /// Coefficients of one class.
    #[must_use]
    pub fn class_coef(&self, class: usize) -> ArrayView1<'_, f64> {
        self.coef.slice(s![.., class])
    }
}
