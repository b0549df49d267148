use ndarray::{ArrayView1, ArrayView2};
use rand::{seq::index::sample, Rng};
use serde::{Deserialize, Serialize};

/// Growth limits for one tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeConfig {
    /// Maximum depth; `None` grows until leaves are pure or too small.
    pub max_depth: Option<usize>,
    /// Minimum samples a node needs to be split.
    pub min_samples_split: usize,
    /// Minimum samples on each side of a split.
    pub min_samples_leaf: usize,
    /// Features examined per split; `None` examines all.
    pub max_features: Option<usize>,
}

/// Tree node. Children are indices into the node vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Terminal node holding a class distribution or a regression value.
    Leaf {
        /// Leaf output.
        value: Vec<f64>,
    },
    /// Internal node: rows with `x[feature] <= threshold` go left.
    Split {
        /// Feature column.
        feature: usize,
        /// Split threshold.
        threshold: f64,
        /// Left child index.
        left: usize,
        /// Right child index.
        right: usize,
    },
}

/// Binary decision tree grown by exhaustive threshold search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

/// Node statistics accumulated while sweeping split positions.
pub trait Criterion {
    /// Running accumulator.
    type Acc: Clone;
    /// Accumulator with no samples.
    fn empty(&self) -> Self::Acc;
    /// Adds one sample.
    fn add(&self, acc: &mut Self::Acc, sample: usize);
    /// Removes one previously added sample.
    fn remove(&self, acc: &mut Self::Acc, sample: usize);
    /// Total sample weight.
    fn weight(&self, acc: &Self::Acc) -> f64;
    /// Impurity per unit weight.
    fn impurity(&self, acc: &Self::Acc) -> f64;
    /// Leaf output for the accumulated samples.
    fn leaf(&self, acc: &Self::Acc) -> Vec<f64>;
}

/// Weighted Gini impurity over class indices; leaves hold class probabilities.
#[derive(Debug, Clone, Copy)]
pub struct Gini<'a> {
    /// Class index per sample.
    pub targets: &'a [usize],
    /// Weight per sample.
    pub weights: &'a [f64],
    /// Number of classes.
    pub n_classes: usize,
}

impl Criterion for Gini<'_> {
    type Acc = Vec<f64>;

    fn empty(&self) -> Self::Acc {
        vec![0.0; self.n_classes]
    }

    fn add(&self, acc: &mut Self::Acc, sample: usize) {
        acc[self.targets[sample]] += self.weights[sample];
    }

    fn remove(&self, acc: &mut Self::Acc, sample: usize) {
        acc[self.targets[sample]] -= self.weights[sample];
    }

    fn weight(&self, acc: &Self::Acc) -> f64 {
        acc.iter().sum()
    }

    fn impurity(&self, acc: &Self::Acc) -> f64 {
        let total = self.weight(acc);
        if total <= 0.0 {
            return 0.0;
        }
        1.0 - acc.iter().map(|c| (c / total).powi(2)).sum::<f64>()
    }

    fn leaf(&self, acc: &Self::Acc) -> Vec<f64> {
        let total = self.weight(acc);
        if total <= 0.0 {
            return vec![1.0 / self.n_classes.max(1) as f64; self.n_classes];
        }
        acc.iter().map(|c| c / total).collect()
    }
}

/// Squared error over real targets; leaves hold the mean.
#[derive(Debug, Clone, Copy)]
pub struct SquaredError<'a> {
    /// Target per sample.
    pub targets: &'a [f64],
}

impl Criterion for SquaredError<'_> {
    /// (count, sum, sum of squares)
    type Acc = (f64, f64, f64);

    fn empty(&self) -> Self::Acc {
        (0.0, 0.0, 0.0)
    }

    fn add(&self, acc: &mut Self::Acc, sample: usize) {
        let y = self.targets[sample];
        acc.0 += 1.0;
        acc.1 += y;
        acc.2 += y * y;
    }

    fn remove(&self, acc: &mut Self::Acc, sample: usize) {
        let y = self.targets[sample];
        acc.0 -= 1.0;
        acc.1 -= y;
        acc.2 -= y * y;
    }

    fn weight(&self, acc: &Self::Acc) -> f64 {
        acc.0
    }

    fn impurity(&self, acc: &Self::Acc) -> f64 {
        if acc.0 <= 0.0 {
            return 0.0;
        }
        let mean = acc.1 / acc.0;
        (acc.2 / acc.0 - mean * mean).max(0.0)
    }

    fn leaf(&self, acc: &Self::Acc) -> Vec<f64> {
        vec![if acc.0 > 0.0 { acc.1 / acc.0 } else { 0.0 }]
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    position: usize,
    children_impurity: f64,
}

impl DecisionTree {
    /// Grows a tree on the rows listed in `samples` (repeats allowed).
    pub fn fit<C: Criterion, R: Rng>(
        x: ArrayView2<'_, f64>,
        samples: &[usize],
        criterion: &C,
        config: &TreeConfig,
        rng: &mut R,
    ) -> Self {
        let n_features = x.ncols();
        let mut tree = Self {
            nodes: Vec::new(),
            importances: vec![0.0; n_features],
        };
        let mut root = criterion.empty();
        for &s in samples {
            criterion.add(&mut root, s);
        }
        let total_weight = criterion.weight(&root).max(f64::MIN_POSITIVE);
        tree.nodes.push(Node::Leaf {
            value: criterion.leaf(&root),
        });

        let mut stack = vec![(0_usize, samples.to_vec(), 0_usize)];
        while let Some((node_id, mut rows, depth)) = stack.pop() {
            let mut acc = criterion.empty();
            for &s in &rows {
                criterion.add(&mut acc, s);
            }
            let impurity = criterion.impurity(&acc);
            let splittable = config.max_depth.map_or(true, |d| depth < d)
                && rows.len() >= config.min_samples_split.max(2)
                && rows.len() >= 2 * config.min_samples_leaf.max(1)
                && impurity > 1e-12;
            tree.nodes[node_id] = Node::Leaf {
                value: criterion.leaf(&acc),
            };
            if !splittable {
                continue;
            }
            let Some(best) = best_split(x, &mut rows, criterion, &acc, config, rng) else {
                continue;
            };
            let parent = criterion.weight(&acc) * impurity;
            tree.importances[best.feature] += (parent - best.children_impurity) / total_weight;

            let right_rows = rows.split_off(best.position);
            let left_id = tree.nodes.len();
            let right_id = left_id + 1;
            tree.nodes.push(Node::Leaf { value: Vec::new() });
            tree.nodes.push(Node::Leaf { value: Vec::new() });
            tree.nodes[node_id] = Node::Split {
                feature: best.feature,
                threshold: best.threshold,
                left: left_id,
                right: right_id,
            };
            stack.push((right_id, right_rows, depth + 1));
            stack.push((left_id, rows, depth + 1));
        }
        tree
    }

    /// Index of the leaf `row` falls into.
    #[must_use]
    pub fn apply(&self, row: ArrayView1<'_, f64>) -> usize {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { .. } => return id,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Output of the leaf `row` falls into.
    #[must_use]
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> &[f64] {
        match &self.nodes[self.apply(row)] {
            Node::Leaf { value } => value,
            Node::Split { .. } => &[],
        }
    }

    /// Replaces the output of a leaf.
    pub fn set_leaf_value(&mut self, leaf: usize, value: Vec<f64>) {
        if let Some(node) = self.nodes.get_mut(leaf) {
            if matches!(node, Node::Leaf { .. }) {
                *node = Node::Leaf { value };
            }
        }
    }

    /// Total impurity decrease per feature, normalized to sum to one (all zero for a
    /// single-leaf tree).
    #[must_use]
    pub fn feature_importances(&self) -> Vec<f64> {
        let total: f64 = self.importances.iter().sum();
        if total <= 0.0 {
            return vec![0.0; self.importances.len()];
        }
        self.importances.iter().map(|v| v / total).collect()
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

fn best_split<C: Criterion, R: Rng>(
    x: ArrayView2<'_, f64>,
    rows: &mut [usize],
    criterion: &C,
    parent: &C::Acc,
    config: &TreeConfig,
    rng: &mut R,
) -> Option<BestSplit> {
    let n_features = x.ncols();
    // Features are visited in random order; constant ones do not count toward the limit.
    let (features, limit) = match config.max_features {
        Some(k) if k < n_features => (sample(rng, n_features, n_features).into_vec(), k.max(1)),
        _ => ((0..n_features).collect(), n_features),
    };
    let min_leaf = config.min_samples_leaf.max(1);
    let n = rows.len();
    let mut best: Option<BestSplit> = None;
    let mut order = rows.to_vec();

    let mut visited = 0;
    for feature in features {
        if visited >= limit {
            break;
        }
        order.sort_by(|a, b| x[[*a, feature]].total_cmp(&x[[*b, feature]]));
        if x[[order[0], feature]] >= x[[order[n - 1], feature]] {
            continue;
        }
        visited += 1;
        let mut left = criterion.empty();
        let mut right = parent.clone();
        for pos in 0..n - 1 {
            let sample = order[pos];
            criterion.add(&mut left, sample);
            criterion.remove(&mut right, sample);
            let count = pos + 1;
            if count < min_leaf || n - count < min_leaf {
                continue;
            }
            let here = x[[sample, feature]];
            let next = x[[order[pos + 1], feature]];
            if here >= next {
                continue;
            }
            let children = criterion.weight(&left) * criterion.impurity(&left)
                + criterion.weight(&right) * criterion.impurity(&right);
            if best
                .as_ref()
                .map_or(true, |b| children < b.children_impurity - 1e-12)
            {
                let mut threshold = here + (next - here) / 2.0;
                if threshold >= next {
                    threshold = here;
                }
                best = Some(BestSplit {
                    feature,
                    threshold,
                    position: count,
                    children_impurity: children,
                });
            }
        }
    }

    let best = best?;
    let parent_total = criterion.weight(parent) * criterion.impurity(parent);
    if best.children_impurity >= parent_total - 1e-12 {
        return None;
    }
    rows.sort_by(|a, b| x[[*a, best.feature]].total_cmp(&x[[*b, best.feature]]));
    Some(best)
}
