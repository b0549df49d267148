use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use super::{GroupedEvaluator, TrainingSet};
use crate::{
    error::{PipelineError, Result},
    models::{
        params::{cartesian, overlay, ParamGrid, ParamSet},
        ModelFamily,
    },
    telemetry::{trace, PipelineTelemetry},
};

/// Score of one grid combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridResult {
    /// Combination as evaluated, base parameters included.
    pub params: ParamSet,
    /// Mean per-fold recording accuracy.
    pub score: f64,
}

/// Winner of a grid search plus every evaluated combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSearchOutcome {
    /// Searched family.
    pub family: ModelFamily,
    /// Best combination, base parameters included.
    pub best_params: ParamSet,
    /// Score of `best_params`.
    pub best_score: f64,
    /// All combinations in evaluation order.
    pub results: Vec<GridResult>,
}

/// Exhaustive search scored by recording-level grouped cross-validation.
#[derive(Debug, Clone, Copy)]
pub struct GridSearchOptimizer {
    evaluator: GroupedEvaluator,
}

impl GridSearchOptimizer {
    /// Optimizer scoring with `evaluator`.
    #[must_use]
    pub const fn new(evaluator: GroupedEvaluator) -> Self {
        Self { evaluator }
    }

    /// Evaluates every combination of `grid` overlaid on `base`.
    ///
    /// A strictly higher score replaces the incumbent, so the first of equal scores wins.
    ///
    /// # Errors
    ///
    /// Invalid parameters, an empty grid, or any fit failure.
    pub fn search(
        &self,
        family: ModelFamily,
        grid: &ParamGrid,
        base: &ParamSet,
        set: &TrainingSet,
        telemetry: Option<&PipelineTelemetry>,
    ) -> Result<GridSearchOutcome> {
        let mut results: Vec<GridResult> = Vec::new();
        let mut best: Option<usize> = None;
        for combo in cartesian(grid) {
            let params = overlay(base, &combo);
            let spec = family.build(&params)?;
            let score = self.evaluator.evaluate(set, &spec, telemetry)?.mean_fold_accuracy;
            trace(
                telemetry,
                LogLevel::Info,
                "grid.combination",
                json!({ "family": family.as_str(), "params": params, "score": score }),
            );
            if best.map_or(true, |idx| score > results[idx].score) {
                best = Some(results.len());
            }
            results.push(GridResult { params, score });
        }
        let Some(best) = best else {
            return Err(PipelineError::InvalidConfig(format!(
                "parameter grid for {family} has no combinations"
            )));
        };
        Ok(GridSearchOutcome {
            family,
            best_params: results[best].params.clone(),
            best_score: results[best].score,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{evaluation::tests::separable_set, models::params::ParamValue};

    #[test]
    fn equal_scores_keep_the_first_combination() {
        let set = separable_set();
        let mut grid = ParamGrid::new();
        grid.insert("C".into(), vec![10.0_f64.into(), 100.0_f64.into()]);
        grid.insert("max_iter".into(), vec![100_i64.into()]);
        let optimizer = GridSearchOptimizer::new(GroupedEvaluator::new(4, 42));
        let outcome = optimizer
            .search(
                ModelFamily::LogReg,
                &grid,
                &ModelFamily::LogReg.base_params(42),
                &set,
                None,
            )
            .unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert!((outcome.best_score - 1.0).abs() < f64::EPSILON);
        assert_eq!(outcome.best_params["C"], ParamValue::Float(10.0));
        assert_eq!(outcome.best_params["class_weight"], ParamValue::from("balanced"));
    }

    #[test]
    fn invalid_grid_values_fail() {
        let set = separable_set();
        let mut grid = ParamGrid::new();
        grid.insert("depth".into(), vec![3_i64.into()]);
        let optimizer = GridSearchOptimizer::new(GroupedEvaluator::new(3, 0));
        assert!(matches!(
            optimizer.search(ModelFamily::RandomForest, &grid, &ParamSet::new(), &set, None),
            Err(PipelineError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn grid_without_combinations_is_rejected() {
        let set = separable_set();
        let mut grid = ParamGrid::new();
        grid.insert("C".into(), Vec::new());
        let optimizer = GridSearchOptimizer::new(GroupedEvaluator::new(3, 0));
        assert!(matches!(
            optimizer.search(ModelFamily::LogReg, &grid, &ParamSet::new(), &set, None),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}
