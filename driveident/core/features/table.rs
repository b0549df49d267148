use std::collections::{HashMap, HashSet};

use ndarray::{s, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::data::labels::DriverTag;

/// One row per window: identity columns plus numeric feature columns.
///
/// Missing values are `NaN`. Column order is part of the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    /// Window id per row.
    pub window_ids: Vec<usize>,
    /// Driver tag per row.
    pub drivers: Vec<DriverTag>,
    /// Recording identifier per row.
    pub recordings: Vec<String>,
    /// Feature column names.
    pub columns: Vec<String>,
    /// `rows x columns` matrix.
    pub values: Array2<f64>,
}

impl FeatureTable {
    /// Table with no rows and the given columns.
    #[must_use]
    pub fn empty(columns: Vec<String>) -> Self {
        let width = columns.len();
        Self {
            window_ids: Vec::new(),
            drivers: Vec::new(),
            recordings: Vec::new(),
            columns,
            values: Array2::zeros((0, width)),
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.window_ids.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window_ids.is_empty()
    }

    /// Index of a column by name.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(name).map(|idx| self.values.column(idx))
    }

    /// Returns a table with exactly `columns`, in that order.
    ///
    /// Columns this table lacks are filled with `NaN`; extra columns are dropped. Rows are
    /// never removed.
    #[must_use]
    pub fn reindex(&self, columns: &[String]) -> Self {
        let lookup: HashMap<&str, usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();
        let mut values = Array2::from_elem((self.n_rows(), columns.len()), f64::NAN);
        for (target, name) in columns.iter().enumerate() {
            if let Some(&source) = lookup.get(name.as_str()) {
                values.column_mut(target).assign(&self.values.column(source));
            }
        }
        Self {
            window_ids: self.window_ids.clone(),
            drivers: self.drivers.clone(),
            recordings: self.recordings.clone(),
            columns: columns.to_vec(),
            values,
        }
    }

    /// Appends the columns of `other`, matched row by row on window id.
    ///
    /// Column names already present here get `namespace` as prefix. Rows of `other`
    /// missing from this table are ignored; rows of this table missing from `other` get
    /// `NaN`.
    #[must_use]
    pub fn join(&self, other: &Self, namespace: &str) -> Self {
        let taken: HashSet<&str> = self.columns.iter().map(String::as_str).collect();
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().map(|name| {
            if taken.contains(name.as_str()) {
                format!("{namespace}{name}")
            } else {
                name.clone()
            }
        }));
        let other_rows: HashMap<usize, usize> = other
            .window_ids
            .iter()
            .enumerate()
            .map(|(row, id)| (*id, row))
            .collect();
        let left = self.columns.len();
        let mut values = Array2::from_elem((self.n_rows(), columns.len()), f64::NAN);
        values.slice_mut(s![.., ..left]).assign(&self.values);
        for (row, id) in self.window_ids.iter().enumerate() {
            if let Some(&source) = other_rows.get(id) {
                values
                    .slice_mut(s![row, left..])
                    .assign(&other.values.row(source));
            }
        }
        Self {
            window_ids: self.window_ids.clone(),
            drivers: self.drivers.clone(),
            recordings: self.recordings.clone(),
            columns,
            values,
        }
    }

    /// Rows at `indices`, in that order.
    #[must_use]
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            window_ids: indices.iter().map(|&i| self.window_ids[i]).collect(),
            drivers: indices.iter().map(|&i| self.drivers[i].clone()).collect(),
            recordings: indices.iter().map(|&i| self.recordings[i].clone()).collect(),
            columns: self.columns.clone(),
            values: self.values.select(Axis(0), indices),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn table(ids: &[usize], columns: &[&str], values: Array2<f64>) -> FeatureTable {
        FeatureTable {
            window_ids: ids.to_vec(),
            drivers: ids.iter().map(|_| DriverTag::Known("a".into())).collect(),
            recordings: ids.iter().map(|i| format!("r{i}")).collect(),
            columns: columns.iter().map(|c| (*c).to_owned()).collect(),
            values,
        }
    }

    #[test]
    fn reindex_fills_missing_columns_and_keeps_rows() {
        let t = table(&[0, 1], &["a", "b"], array![[1.0, 2.0], [3.0, 4.0]]);
        let cols = vec!["b".to_owned(), "z".to_owned()];
        let r = t.reindex(&cols);
        assert_eq!(r.n_rows(), 2);
        assert_eq!(r.columns, cols);
        assert_eq!(r.values[[1, 0]], 4.0);
        assert!(r.values[[0, 1]].is_nan());
    }

    #[test]
    fn join_namespaces_colliding_columns() {
        let left = table(&[0, 1], &["x", "y"], array![[1.0, 2.0], [3.0, 4.0]]);
        let right = table(&[1, 0], &["y", "w"], array![[40.0, 41.0], [20.0, 21.0]]);
        let joined = left.join(&right, "ts__");
        assert_eq!(joined.columns, vec!["x", "y", "ts__y", "w"]);
        assert_eq!(joined.values.row(0).to_vec(), vec![1.0, 2.0, 20.0, 21.0]);
        assert_eq!(joined.values.row(1).to_vec(), vec![3.0, 4.0, 40.0, 41.0]);
        assert_eq!(joined.recordings, left.recordings);
    }

    #[test]
    fn select_rows_keeps_identity_aligned() {
        let t = table(&[5, 6, 7], &["a"], array![[1.0], [2.0], [3.0]]);
        let s = t.select_rows(&[2, 0]);
        assert_eq!(s.window_ids, vec![7, 5]);
        assert_eq!(s.recordings, vec!["r7", "r5"]);
        assert_eq!(s.column("a").unwrap().to_vec(), vec![3.0, 1.0]);
    }
}
