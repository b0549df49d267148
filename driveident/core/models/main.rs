//! Classifier families, hyper-parameter handling, the preprocessing pipeline and the
//! model store.

/// Multiclass gradient boosting.
pub mod boosting;
/// Random forest of Gini trees.
pub mod forest;
/// Multinomial logistic regression.
pub mod logistic;
/// Ordered hyper-parameter sets and grids.
pub mod params;
/// Imputer, scaler and classifier fitted as one unit.
pub mod pipeline;
/// Persisted model artifacts.
pub mod store;
/// CART decision trees shared by the ensembles.
pub mod tree;

use std::{fmt, str::FromStr};

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use boosting::{BoostingParams, GradientBoosting};
use forest::{ForestParams, MaxFeatures, RandomForest};
use logistic::{LogisticParams, LogisticRegression, Solver};
use params::{param_set, ParamGrid, ParamSet, ParamValue};

/// Anything that maps scaled feature rows to class probabilities.
pub trait Classifier {
    /// One probability row per input row, columns in class-index order.
    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64>;

    /// One non-negative importance per feature column.
    fn feature_importances(&self) -> Vec<f64>;
}

impl Classifier for RandomForest {
    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        Self::predict_proba(self, x)
    }

    fn feature_importances(&self) -> Vec<f64> {
        Self::feature_importances(self)
    }
}

impl Classifier for LogisticRegression {
    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        Self::predict_proba(self, x)
    }

    fn feature_importances(&self) -> Vec<f64> {
        Self::feature_importances(self)
    }
}

impl Classifier for GradientBoosting {
    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        Self::predict_proba(self, x)
    }

    fn feature_importances(&self) -> Vec<f64> {
        Self::feature_importances(self)
    }
}

/// Supported classifier families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// Bagged Gini trees with class balancing.
    RandomForest,
    /// Penalized multinomial logistic regression.
    LogReg,
    /// Softmax gradient boosting over regression trees.
    GradientBoosting,
}

fn seed_value(seed: u64) -> ParamValue {
    ParamValue::Int(i64::try_from(seed).unwrap_or(i64::MAX))
}

fn ints(values: &[i64]) -> Vec<ParamValue> {
    values.iter().copied().map(ParamValue::from).collect()
}

fn floats(values: &[f64]) -> Vec<ParamValue> {
    values.iter().copied().map(ParamValue::from).collect()
}

impl ModelFamily {
    /// Every family, in default configuration order.
    pub const ALL: [Self; 3] = [Self::RandomForest, Self::LogReg, Self::GradientBoosting];

    /// Identifier used in configuration and artifact names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RandomForest => "randomforest",
            Self::LogReg => "logreg",
            Self::GradientBoosting => "gradientboosting",
        }
    }

    /// Parameters applied under every grid combination.
    #[must_use]
    pub fn base_params(self, seed: u64) -> ParamSet {
        match self {
            Self::RandomForest | Self::LogReg => param_set([
                ("class_weight", "balanced".into()),
                ("random_state", seed_value(seed)),
            ]),
            Self::GradientBoosting => param_set([("random_state", seed_value(seed))]),
        }
    }

    /// Parameters used when grid search is off.
    #[must_use]
    pub fn default_params(self, seed: u64) -> ParamSet {
        let explicit = match self {
            Self::RandomForest => param_set([
                ("n_estimators", 300_i64.into()),
                ("max_depth", 5_i64.into()),
                ("min_samples_split", 10_i64.into()),
                ("min_samples_leaf", 4_i64.into()),
                ("max_features", "log2".into()),
            ]),
            Self::LogReg => param_set([
                ("C", 100.0_f64.into()),
                ("solver", "saga".into()),
                ("max_iter", 5000_i64.into()),
            ]),
            Self::GradientBoosting => param_set([
                ("n_estimators", 250_i64.into()),
                ("learning_rate", 0.05_f64.into()),
                ("max_depth", 3_i64.into()),
                ("subsample", 0.8_f64.into()),
            ]),
        };
        params::overlay(&explicit, &self.base_params(seed))
    }

    /// Default search grid.
    #[must_use]
    pub fn grid(self) -> ParamGrid {
        let mut grid = ParamGrid::new();
        match self {
            Self::RandomForest => {
                grid.insert("n_estimators".into(), ints(&[150, 300]));
                grid.insert("max_depth".into(), ints(&[4, 5]));
                grid.insert("min_samples_split".into(), ints(&[10]));
                grid.insert("min_samples_leaf".into(), ints(&[4, 8]));
                grid.insert("max_features".into(), vec!["log2".into()]);
            }
            Self::LogReg => {
                grid.insert("C".into(), floats(&[10.0, 100.0]));
                grid.insert("solver".into(), vec!["saga".into()]);
                grid.insert("max_iter".into(), ints(&[5000]));
            }
            Self::GradientBoosting => {
                grid.insert("n_estimators".into(), ints(&[150, 250, 300]));
                grid.insert("learning_rate".into(), floats(&[0.05, 0.1]));
                grid.insert("max_depth".into(), ints(&[3, 4, 5]));
                grid.insert("subsample".into(), floats(&[0.8, 1.0]));
            }
        }
        grid
    }

    /// Applies `params` over the family's built-in defaults.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidParameter`] for unknown names or wrongly typed values.
    pub fn build(self, params: &ParamSet) -> Result<ClassifierSpec> {
        let reader = ParamReader { family: self };
        match self {
            Self::RandomForest => {
                let mut p = ForestParams::default();
                for (name, value) in params {
                    match name.as_str() {
                        "n_estimators" => p.n_estimators = reader.count(name, value)?,
                        "max_depth" => p.max_depth = reader.optional_count(name, value)?,
                        "min_samples_split" => p.min_samples_split = reader.count(name, value)?,
                        "min_samples_leaf" => p.min_samples_leaf = reader.count(name, value)?,
                        "max_features" => p.max_features = reader.max_features(name, value)?,
                        "class_weight" => p.balanced = reader.class_weight(name, value)?,
                        "bootstrap" => p.bootstrap = reader.flag(name, value)?,
                        "random_state" => p.random_state = reader.seed(name, value)?,
                        _ => return Err(reader.unknown(name)),
                    }
                }
                Ok(ClassifierSpec::RandomForest(p))
            }
            Self::LogReg => {
                let mut p = LogisticParams::default();
                for (name, value) in params {
                    match name.as_str() {
                        "C" => p.c = reader.positive(name, value)?,
                        "solver" => p.solver = reader.solver(name, value)?,
                        "max_iter" => p.max_iter = reader.count(name, value)?,
                        "tol" => p.tol = reader.positive(name, value)?,
                        "class_weight" => p.balanced = reader.class_weight(name, value)?,
                        "random_state" => p.random_state = reader.seed(name, value)?,
                        _ => return Err(reader.unknown(name)),
                    }
                }
                Ok(ClassifierSpec::LogReg(p))
            }
            Self::GradientBoosting => {
                let mut p = BoostingParams::default();
                for (name, value) in params {
                    match name.as_str() {
                        "n_estimators" => p.n_estimators = reader.count(name, value)?,
                        "learning_rate" => p.learning_rate = reader.positive(name, value)?,
                        "max_depth" => p.max_depth = reader.count(name, value)?,
                        "subsample" => p.subsample = reader.positive(name, value)?,
                        "min_samples_split" => p.min_samples_split = reader.count(name, value)?,
                        "min_samples_leaf" => p.min_samples_leaf = reader.count(name, value)?,
                        "random_state" => p.random_state = reader.seed(name, value)?,
                        _ => return Err(reader.unknown(name)),
                    }
                }
                Ok(ClassifierSpec::GradientBoosting(p))
            }
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = PipelineError;

    fn from_str(raw: &str) -> Result<Self> {
        let wanted = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|family| family.as_str() == wanted)
            .ok_or_else(|| PipelineError::UnknownModelFamily(raw.trim().to_owned()))
    }
}

struct ParamReader {
    family: ModelFamily,
}

impl ParamReader {
    fn invalid(&self, name: &str, reason: impl Into<String>) -> PipelineError {
        PipelineError::InvalidParameter {
            family: self.family.as_str().to_owned(),
            name: name.to_owned(),
            reason: reason.into(),
        }
    }

    fn unknown(&self, name: &str) -> PipelineError {
        self.invalid(name, "unknown parameter")
    }

    fn count(&self, name: &str, value: &ParamValue) -> Result<usize> {
        match value.as_usize() {
            Some(v) if v > 0 => Ok(v),
            _ => Err(self.invalid(name, format!("expected a positive integer, got {value}"))),
        }
    }

    fn optional_count(&self, name: &str, value: &ParamValue) -> Result<Option<usize>> {
        match value.as_str() {
            Some(text) if text.eq_ignore_ascii_case("none") => Ok(None),
            _ => self.count(name, value).map(Some),
        }
    }

    fn positive(&self, name: &str, value: &ParamValue) -> Result<f64> {
        match value.as_f64() {
            Some(v) if v.is_finite() && v > 0.0 => Ok(v),
            _ => Err(self.invalid(name, format!("expected a positive number, got {value}"))),
        }
    }

    fn seed(&self, name: &str, value: &ParamValue) -> Result<u64> {
        match value {
            ParamValue::Int(v) => u64::try_from(*v)
                .map_err(|_| self.invalid(name, format!("seed must be non-negative, got {v}"))),
            other => Err(self.invalid(name, format!("expected an integer seed, got {other}"))),
        }
    }

    fn class_weight(&self, name: &str, value: &ParamValue) -> Result<bool> {
        match value.as_str().map(str::to_ascii_lowercase).as_deref() {
            Some("balanced") => Ok(true),
            Some("none") => Ok(false),
            _ => Err(self.invalid(name, format!("expected `balanced` or `none`, got {value}"))),
        }
    }

    fn flag(&self, name: &str, value: &ParamValue) -> Result<bool> {
        match (value, value.as_str().map(str::to_ascii_lowercase).as_deref()) {
            (ParamValue::Int(1), _) | (_, Some("true")) => Ok(true),
            (ParamValue::Int(0), _) | (_, Some("false")) => Ok(false),
            _ => Err(self.invalid(name, format!("expected a boolean, got {value}"))),
        }
    }

    fn solver(&self, name: &str, value: &ParamValue) -> Result<Solver> {
        match value.as_str().map(str::to_ascii_lowercase).as_deref() {
            Some("saga") => Ok(Solver::Saga),
            Some("gd") => Ok(Solver::Gd),
            _ => Err(self.invalid(name, format!("unsupported solver {value}"))),
        }
    }

    fn max_features(&self, name: &str, value: &ParamValue) -> Result<MaxFeatures> {
        match value {
            ParamValue::Text(text) => match text.to_ascii_lowercase().as_str() {
                "log2" => Ok(MaxFeatures::Log2),
                "sqrt" => Ok(MaxFeatures::Sqrt),
                "all" | "none" => Ok(MaxFeatures::All),
                _ => Err(self.invalid(name, format!("unsupported value {value}"))),
            },
            ParamValue::Int(_) => self.count(name, value).map(MaxFeatures::Count),
            ParamValue::Float(f) if *f > 0.0 && *f <= 1.0 => Ok(MaxFeatures::Fraction(*f)),
            ParamValue::Float(_) => Err(self.invalid(name, "fraction must lie in (0, 1]")),
        }
    }
}

/// Fully resolved hyper-parameters of one family, ready to fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "params", rename_all = "lowercase")]
pub enum ClassifierSpec {
    /// Random forest settings.
    RandomForest(ForestParams),
    /// Logistic regression settings.
    LogReg(LogisticParams),
    /// Gradient boosting settings.
    GradientBoosting(BoostingParams),
}

impl ClassifierSpec {
    /// Family of these settings.
    #[must_use]
    pub const fn family(&self) -> ModelFamily {
        match self {
            Self::RandomForest(_) => ModelFamily::RandomForest,
            Self::LogReg(_) => ModelFamily::LogReg,
            Self::GradientBoosting(_) => ModelFamily::GradientBoosting,
        }
    }

    /// Fits the classifier on scaled rows with class indices `targets`.
    pub fn fit(
        &self,
        x: ArrayView2<'_, f64>,
        targets: &[usize],
        n_classes: usize,
    ) -> Result<FittedClassifier> {
        Ok(match self {
            Self::RandomForest(p) => {
                FittedClassifier::RandomForest(RandomForest::fit(p, x, targets, n_classes)?)
            }
            Self::LogReg(p) => {
                FittedClassifier::LogReg(LogisticRegression::fit(p, x, targets, n_classes)?)
            }
            Self::GradientBoosting(p) => {
                FittedClassifier::GradientBoosting(GradientBoosting::fit(p, x, targets, n_classes)?)
            }
        })
    }
}

/// A fitted classifier of any family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "model", rename_all = "lowercase")]
pub enum FittedClassifier {
    /// Fitted forest.
    RandomForest(RandomForest),
    /// Fitted logistic regression.
    LogReg(LogisticRegression),
    /// Fitted boosting ensemble.
    GradientBoosting(GradientBoosting),
}

impl FittedClassifier {
    fn inner(&self) -> &dyn Classifier {
        match self {
            Self::RandomForest(m) => m,
            Self::LogReg(m) => m,
            Self::GradientBoosting(m) => m,
        }
    }

    /// Family of the fitted model.
    #[must_use]
    pub const fn family(&self) -> ModelFamily {
        match self {
            Self::RandomForest(_) => ModelFamily::RandomForest,
            Self::LogReg(_) => ModelFamily::LogReg,
            Self::GradientBoosting(_) => ModelFamily::GradientBoosting,
        }
    }
}

impl Classifier for FittedClassifier {
    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        self.inner().predict_proba(x)
    }

    fn feature_importances(&self) -> Vec<f64> {
        self.inner().feature_importances()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_names_parse_and_serialize() {
        assert_eq!("LogReg".parse::<ModelFamily>().unwrap(), ModelFamily::LogReg);
        assert_eq!(
            serde_json::to_string(&ModelFamily::GradientBoosting).unwrap(),
            r#""gradientboosting""#
        );
        assert!(matches!(
            "svm".parse::<ModelFamily>(),
            Err(PipelineError::UnknownModelFamily(name)) if name == "svm"
        ));
    }

    #[test]
    fn default_params_build_documented_settings() {
        let spec = ModelFamily::RandomForest
            .build(&ModelFamily::RandomForest.default_params(7))
            .unwrap();
        let ClassifierSpec::RandomForest(p) = spec else {
            panic!("wrong family");
        };
        assert_eq!(p.n_estimators, 300);
        assert_eq!(p.max_depth, Some(5));
        assert_eq!(p.max_features, MaxFeatures::Log2);
        assert!(p.balanced);
        assert_eq!(p.random_state, 7);

        let ClassifierSpec::LogReg(p) = ModelFamily::LogReg
            .build(&ModelFamily::LogReg.default_params(1))
            .unwrap()
        else {
            panic!("wrong family");
        };
        assert!((p.c - 100.0).abs() < f64::EPSILON);
        assert_eq!(p.max_iter, 5000);

        let ClassifierSpec::GradientBoosting(p) = ModelFamily::GradientBoosting
            .build(&ModelFamily::GradientBoosting.default_params(1))
            .unwrap()
        else {
            panic!("wrong family");
        };
        assert_eq!(p.n_estimators, 250);
        assert!((p.subsample - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn grid_sizes_match_documented_grids() {
        let sizes: Vec<usize> = ModelFamily::ALL
            .iter()
            .map(|f| params::cartesian(&f.grid()).len())
            .collect();
        assert_eq!(sizes, vec![8, 2, 36]);
        for family in ModelFamily::ALL {
            for combo in params::cartesian(&family.grid()) {
                let merged = params::overlay(&family.base_params(3), &combo);
                assert!(family.build(&merged).is_ok());
            }
        }
    }

    #[test]
    fn unknown_or_mistyped_parameters_are_rejected() {
        let unknown = param_set([("gamma", 1_i64.into())]);
        assert!(matches!(
            ModelFamily::LogReg.build(&unknown),
            Err(PipelineError::InvalidParameter { name, .. }) if name == "gamma"
        ));
        let mistyped = param_set([("n_estimators", "many".into())]);
        assert!(ModelFamily::RandomForest.build(&mistyped).is_err());
        let negative_c = param_set([("C", (-1.0_f64).into())]);
        assert!(ModelFamily::LogReg.build(&negative_c).is_err());
    }

    #[test]
    fn fitted_classifier_reports_family() {
        let x = ndarray::array![[0.0], [0.1], [1.0], [1.1]];
        let spec = ModelFamily::LogReg
            .build(&param_set([("max_iter", 50_i64.into())]))
            .unwrap();
        let fitted = spec.fit(x.view(), &[0, 0, 1, 1], 2).unwrap();
        assert_eq!(fitted.family(), ModelFamily::LogReg);
        assert_eq!(fitted.predict_proba(x.view()).dim(), (4, 2));
        assert_eq!(fitted.feature_importances().len(), 1);
    }
}
