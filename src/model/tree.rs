//! CART trees shared by the forest and boosting backends
//!
//! Classification trees split on gini impurity and keep a class
//! distribution per leaf; regression trees split on variance and keep
//! a mean per leaf. Split search is exhaustive over midpoints between
//! distinct sorted values, so growth is fully deterministic given the
//! candidate feature order.

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Node {
    Leaf {
        value: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Walk the tree and return the leaf value for a sample
    pub fn leaf_value<'a>(&'a self, x: &[f64]) -> &'a [f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeParams {
    pub max_depth: usize,
    pub min_leaf: usize,
}

/// Grow a classification tree over the given rows. `mtry` candidate
/// features are drawn per split when an rng is supplied (forest);
/// otherwise every feature is a candidate (deterministic).
pub(crate) fn grow_classification(
    xs: &[Vec<f64>],
    ys: &[usize],
    rows: Vec<usize>,
    n_classes: usize,
    params: &TreeParams,
    mtry: usize,
    rng: Option<&mut StdRng>,
    importance: &mut [f64],
) -> Tree {
    let total = rows.len() as f64;
    let mut builder = ClassificationBuilder {
        xs,
        ys,
        n_classes,
        params: *params,
        mtry,
        rng,
        importance,
        total,
        nodes: Vec::new(),
    };
    builder.grow(rows, params.max_depth);
    Tree {
        nodes: builder.nodes,
    }
}

/// Grow a regression tree over the given rows using every feature as a
/// split candidate
pub(crate) fn grow_regression(
    xs: &[Vec<f64>],
    ys: &[f64],
    rows: Vec<usize>,
    params: &TreeParams,
    importance: &mut [f64],
) -> Tree {
    let total = rows.len() as f64;
    let mut builder = RegressionBuilder {
        xs,
        ys,
        params: *params,
        importance,
        total,
        nodes: Vec::new(),
    };
    builder.grow(rows, params.max_depth);
    Tree {
        nodes: builder.nodes,
    }
}

struct ClassificationBuilder<'a> {
    xs: &'a [Vec<f64>],
    ys: &'a [usize],
    n_classes: usize,
    params: TreeParams,
    mtry: usize,
    rng: Option<&'a mut StdRng>,
    importance: &'a mut [f64],
    total: f64,
    nodes: Vec<Node>,
}

impl ClassificationBuilder<'_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let counts = self.class_counts(&rows);
        let n = rows.len() as f64;
        let parent_gini = gini(&counts, n);

        if depth == 0 || rows.len() < 2 * self.params.min_leaf || parent_gini == 0.0 {
            return self.push_leaf(&counts, n);
        }

        let n_features = self.xs[rows[0]].len();
        let pool = self.candidate_features(n_features);

        let Some(split) = self.best_split(&rows, &pool, &counts, parent_gini) else {
            return self.push_leaf(&counts, n);
        };

        self.importance[split.feature] += (n / self.total) * split.decrease;

        // Reserve the split slot before growing children so child
        // indices are known
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value: Vec::new() });
        let left = self.grow(split.left, depth - 1);
        let right = self.grow(split.right, depth - 1);
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        idx
    }

    fn candidate_features(&mut self, n_features: usize) -> Vec<usize> {
        match self.rng.as_deref_mut() {
            Some(rng) if self.mtry < n_features => {
                let mut pool =
                    rand::seq::index::sample(rng, n_features, self.mtry).into_vec();
                pool.sort_unstable();
                pool
            }
            _ => (0..n_features).collect(),
        }
    }

    fn class_counts(&self, rows: &[usize]) -> Vec<f64> {
        let mut counts = vec![0.0; self.n_classes];
        for &row in rows {
            counts[self.ys[row]] += 1.0;
        }
        counts
    }

    fn push_leaf(&mut self, counts: &[f64], n: f64) -> usize {
        let value = counts.iter().map(|c| c / n.max(1.0)).collect();
        self.nodes.push(Node::Leaf { value });
        self.nodes.len() - 1
    }

    fn best_split(
        &self,
        rows: &[usize],
        pool: &[usize],
        parent_counts: &[f64],
        parent_gini: f64,
    ) -> Option<FoundSplit> {
        let n = rows.len() as f64;
        let mut best: Option<FoundSplit> = None;

        for &feature in pool {
            let mut sorted: Vec<usize> = rows.to_vec();
            sorted.sort_by(|&a, &b| {
                self.xs[a][feature]
                    .partial_cmp(&self.xs[b][feature])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut left_counts = vec![0.0; self.n_classes];
            for i in 1..sorted.len() {
                left_counts[self.ys[sorted[i - 1]]] += 1.0;
                let prev = self.xs[sorted[i - 1]][feature];
                let curr = self.xs[sorted[i]][feature];
                if curr <= prev {
                    continue;
                }
                let nl = i as f64;
                let nr = n - nl;
                if (i < self.params.min_leaf) || (sorted.len() - i < self.params.min_leaf) {
                    continue;
                }
                let right_counts: Vec<f64> = parent_counts
                    .iter()
                    .zip(left_counts.iter())
                    .map(|(p, l)| p - l)
                    .collect();
                let weighted =
                    (nl / n) * gini(&left_counts, nl) + (nr / n) * gini(&right_counts, nr);
                let decrease = parent_gini - weighted;
                if decrease > best.as_ref().map(|b| b.decrease).unwrap_or(1e-12) {
                    best = Some(FoundSplit {
                        feature,
                        threshold: (prev + curr) / 2.0,
                        decrease,
                        left: sorted[..i].to_vec(),
                        right: sorted[i..].to_vec(),
                    });
                }
            }
        }
        best
    }
}

struct RegressionBuilder<'a> {
    xs: &'a [Vec<f64>],
    ys: &'a [f64],
    params: TreeParams,
    importance: &'a mut [f64],
    total: f64,
    nodes: Vec<Node>,
}

impl RegressionBuilder<'_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let n = rows.len() as f64;
        let (sum, sum_sq) = self.sums(&rows);
        let parent_var = variance(sum, sum_sq, n);

        if depth == 0 || rows.len() < 2 * self.params.min_leaf || parent_var <= 1e-12 {
            return self.push_leaf(sum, n);
        }

        let Some(split) = self.best_split(&rows, sum, parent_var) else {
            return self.push_leaf(sum, n);
        };

        self.importance[split.feature] += (n / self.total) * split.decrease;

        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value: Vec::new() });
        let left = self.grow(split.left, depth - 1);
        let right = self.grow(split.right, depth - 1);
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        idx
    }

    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for &row in rows {
            sum += self.ys[row];
            sum_sq += self.ys[row] * self.ys[row];
        }
        (sum, sum_sq)
    }

    fn push_leaf(&mut self, sum: f64, n: f64) -> usize {
        self.nodes.push(Node::Leaf {
            value: vec![sum / n.max(1.0)],
        });
        self.nodes.len() - 1
    }

    fn best_split(&self, rows: &[usize], total_sum: f64, parent_var: f64) -> Option<FoundSplit> {
        let n = rows.len() as f64;
        let n_features = self.xs[rows[0]].len();
        let (_, total_sq) = self.sums(rows);
        let mut best: Option<FoundSplit> = None;

        for feature in 0..n_features {
            let mut sorted: Vec<usize> = rows.to_vec();
            sorted.sort_by(|&a, &b| {
                self.xs[a][feature]
                    .partial_cmp(&self.xs[b][feature])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut left_sum = 0.0;
            let mut left_sum_sq = 0.0;
            for i in 1..sorted.len() {
                let y = self.ys[sorted[i - 1]];
                left_sum += y;
                left_sum_sq += y * y;
                let prev = self.xs[sorted[i - 1]][feature];
                let curr = self.xs[sorted[i]][feature];
                if curr <= prev {
                    continue;
                }
                if (i < self.params.min_leaf) || (sorted.len() - i < self.params.min_leaf) {
                    continue;
                }
                let nl = i as f64;
                let nr = n - nl;
                let right_sum = total_sum - left_sum;
                let left_var = variance(left_sum, left_sum_sq, nl);
                let right_var = variance(right_sum, total_sq - left_sum_sq, nr);
                let weighted = (nl / n) * left_var + (nr / n) * right_var;
                let decrease = parent_var - weighted;
                if decrease > best.as_ref().map(|b| b.decrease).unwrap_or(1e-12) {
                    best = Some(FoundSplit {
                        feature,
                        threshold: (prev + curr) / 2.0,
                        decrease,
                        left: sorted[..i].to_vec(),
                        right: sorted[i..].to_vec(),
                    });
                }
            }
        }
        best
    }
}

struct FoundSplit {
    feature: usize,
    threshold: f64,
    decrease: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

fn gini(counts: &[f64], n: f64) -> f64 {
    if n <= 0.0 {
        return 0.0;
    }
    1.0 - counts.iter().map(|c| (c / n) * (c / n)).sum::<f64>()
}

fn variance(sum: f64, sum_sq: f64, n: f64) -> f64 {
    if n <= 0.0 {
        return 0.0;
    }
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_tree_separates_classes() {
        // Class 0 below zero, class 1 above
        let xs: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64 - 10.0]).collect();
        let ys: Vec<usize> = (0..20).map(|i| usize::from(i >= 10)).collect();
        let mut importance = vec![0.0];
        let tree = grow_classification(
            &xs,
            &ys,
            (0..20).collect(),
            2,
            &TreeParams {
                max_depth: 3,
                min_leaf: 1,
            },
            1,
            None,
            &mut importance,
        );

        assert_eq!(tree.leaf_value(&[-5.0]), &[1.0, 0.0]);
        assert_eq!(tree.leaf_value(&[5.0]), &[0.0, 1.0]);
        assert!(importance[0] > 0.0);
    }

    #[test]
    fn test_regression_tree_fits_step() {
        let xs: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let ys: Vec<f64> = (0..20).map(|i| if i < 10 { -1.0 } else { 1.0 }).collect();
        let mut importance = vec![0.0];
        let tree = grow_regression(
            &xs,
            &ys,
            (0..20).collect(),
            &TreeParams {
                max_depth: 2,
                min_leaf: 1,
            },
            &mut importance,
        );

        assert!((tree.leaf_value(&[3.0])[0] - (-1.0)).abs() < 1e-9);
        assert!((tree.leaf_value(&[15.0])[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pure_node_becomes_leaf() {
        let xs: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64]).collect();
        let ys = vec![1usize; 5];
        let mut importance = vec![0.0];
        let tree = grow_classification(
            &xs,
            &ys,
            (0..5).collect(),
            3,
            &TreeParams {
                max_depth: 4,
                min_leaf: 1,
            },
            1,
            None,
            &mut importance,
        );
        assert_eq!(tree.leaf_value(&[2.0]), &[0.0, 1.0, 0.0]);
        assert_eq!(importance[0], 0.0);
    }
}
