use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Scalar hyper-parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Symbolic value such as `"log2"` or `"balanced"`.
    Text(String),
}

impl ParamValue {
    /// Non-negative integer view.
    #[must_use]
    pub fn as_usize(&self) -> Option<usize> {
        match self {
            Self::Int(v) => usize::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Numeric view; integers widen.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// Text view.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// Named parameter values, in insertion order.
pub type ParamSet = IndexMap<String, ParamValue>;

/// Candidate values per parameter name, in insertion order.
pub type ParamGrid = IndexMap<String, Vec<ParamValue>>;

/// Builds a [`ParamSet`] from name/value pairs.
#[must_use]
pub fn param_set<const N: usize>(pairs: [(&str, ParamValue); N]) -> ParamSet {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value))
        .collect()
}

/// Every combination of `grid`, the last key varying fastest.
///
/// An empty grid yields one empty combination; a key with no values yields none.
#[must_use]
pub fn cartesian(grid: &ParamGrid) -> Vec<ParamSet> {
    let mut combos = vec![ParamSet::new()];
    for (name, values) in grid {
        combos = combos
            .into_iter()
            .flat_map(|combo| {
                values.iter().map(move |value| {
                    let mut next = combo.clone();
                    next.insert(name.clone(), value.clone());
                    next
                })
            })
            .collect();
    }
    combos
}

/// `base` overlaid with `overrides`; keys keep their first position.
#[must_use]
pub fn overlay(base: &ParamSet, overrides: &ParamSet) -> ParamSet {
    let mut merged = base.clone();
    for (name, value) in overrides {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cartesian_varies_last_key_fastest() {
        let mut grid = ParamGrid::new();
        grid.insert("a".into(), vec![1_i64.into(), 2_i64.into()]);
        grid.insert("b".into(), vec!["x".into(), "y".into(), "z".into()]);
        let combos = cartesian(&grid);
        assert_eq!(combos.len(), 6);
        assert_eq!(combos[0]["a"], ParamValue::Int(1));
        assert_eq!(combos[0]["b"], ParamValue::from("x"));
        assert_eq!(combos[1]["b"], ParamValue::from("y"));
        assert_eq!(combos[3]["a"], ParamValue::Int(2));
    }

    #[test]
    fn empty_grid_has_one_combination() {
        assert_eq!(cartesian(&ParamGrid::new()), vec![ParamSet::new()]);
    }

    #[test]
    fn untagged_values_roundtrip_through_json() {
        let set = param_set([
            ("n_estimators", 300_i64.into()),
            ("learning_rate", 0.05_f64.into()),
            ("max_features", "log2".into()),
        ]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(
            json,
            r#"{"n_estimators":300,"learning_rate":0.05,"max_features":"log2"}"#
        );
        let back: ParamSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
        assert_eq!(back["n_estimators"].as_f64(), Some(300.0));
    }

    #[test]
    fn overlay_replaces_values_in_place() {
        let base = param_set([("a", 1_i64.into()), ("b", 2_i64.into())]);
        let merged = overlay(&base, &param_set([("b", 3_i64.into()), ("c", 4_i64.into())]));
        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(merged["b"], ParamValue::Int(3));
    }
}
