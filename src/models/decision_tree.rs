//! CART decision tree shared by the forest and the booster
//!
//! Nodes live in a flat arena so the booster can rewrite leaf values after a
//! tree is grown. Leaves always hold the mean label of their samples, which for
//! 0/1 targets is the positive-class probability.

use ndarray::{Array1, Array2, ArrayView1};
use rand::seq::index::sample;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

const MIN_GAIN: f64 = 1e-12;

/// Impurity criterion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Criterion {
    /// Gini impurity for binary 0/1 labels
    Gini,
    /// Variance reduction
    Mse,
}

impl Criterion {
    fn impurity(self, count: usize, sum: f64, sq_sum: f64) -> f64 {
        if count == 0 {
            return 0.0;
        }
        let n = count as f64;
        let mean = sum / n;
        match self {
            Criterion::Gini => 2.0 * mean * (1.0 - mean),
            Criterion::Mse => (sq_sum / n - mean * mean).max(0.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
        n_samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A leaf that may still be split
struct Pending {
    node_idx: usize,
    indices: Vec<usize>,
    depth: usize,
    impurity: f64,
}

#[derive(Debug, Clone, Copy)]
struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Decision tree model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; all when `None`
    pub max_features: Option<usize>,
    pub criterion: Criterion,
    n_features: usize,
}

impl DecisionTree {
    pub fn new(criterion: Criterion) -> Self {
        Self {
            nodes: Vec::new(),
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            criterion,
            n_features: 0,
        }
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples.max(2);
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    pub fn with_max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn is_fitted(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// Fit with a fixed-seed RNG. Only matters when `max_features` is set.
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        self.fit_with_rng(x, y, &mut rng)
    }

    pub fn fit_with_rng<R: Rng>(&mut self, x: &Array2<f64>, y: &Array1<f64>, rng: &mut R) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(PipelineError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        if x.nrows() == 0 {
            return Err(PipelineError::TrainingError("cannot fit a tree on zero rows".to_string()));
        }

        self.n_features = x.ncols();
        self.nodes.clear();

        // Degenerate data grows one level per row, so no recursion here.
        // Children are always pushed after their parent.
        let root = self.push_leaf(y, (0..x.nrows()).collect());
        let mut pending = vec![root];
        while let Some(node) = pending.pop() {
            let Some((left, right)) = self.split_node(x, y, node, rng) else {
                continue;
            };
            pending.push(right);
            pending.push(left);
        }
        Ok(())
    }

    fn push_leaf(&mut self, y: &Array1<f64>, indices: Vec<usize>) -> Pending {
        let n = indices.len();
        let (sum, sq_sum) = indices
            .iter()
            .fold((0.0, 0.0), |(s, sq), &i| (s + y[i], sq + y[i] * y[i]));
        let node_idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: sum / n as f64,
            n_samples: n,
        });
        Pending {
            node_idx,
            indices,
            depth: 0,
            impurity: self.criterion.impurity(n, sum, sq_sum),
        }
    }

    /// Turn a pending leaf into a split, returning its two children
    fn split_node<R: Rng>(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        node: Pending,
        rng: &mut R,
    ) -> Option<(Pending, Pending)> {
        let n = node.indices.len();
        let stop = n < self.min_samples_split
            || n < 2 * self.min_samples_leaf
            || self.max_depth.map_or(false, |d| node.depth >= d)
            || node.impurity <= MIN_GAIN;
        if stop {
            return None;
        }

        let best = self.find_best_split(x, y, &node.indices, node.impurity, rng)?;

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = node
            .indices
            .into_iter()
            .partition(|&i| x[[i, best.feature]] <= best.threshold);

        let mut left = self.push_leaf(y, left_idx);
        let mut right = self.push_leaf(y, right_idx);
        left.depth = node.depth + 1;
        right.depth = node.depth + 1;
        self.nodes[node.node_idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: left.node_idx,
            right: right.node_idx,
        };
        Some((left, right))
    }

    fn find_best_split<R: Rng>(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        parent_impurity: f64,
        rng: &mut R,
    ) -> Option<BestSplit> {
        let n_features = x.ncols();
        let candidates: Vec<usize> = match self.max_features {
            Some(k) if k < n_features => sample(rng, n_features, k.max(1)).into_vec(),
            _ => (0..n_features).collect(),
        };

        let n = indices.len();
        let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
        let mut best: Option<BestSplit> = None;

        for feature in candidates {
            let mut sorted = indices.to_vec();
            sorted.sort_by(|&a, &b| {
                x[[a, feature]]
                    .partial_cmp(&x[[b, feature]])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for pos in 1..n {
                let prev = sorted[pos - 1];
                left_sum += y[prev];
                left_sq += y[prev] * y[prev];

                let lo = x[[prev, feature]];
                let hi = x[[sorted[pos], feature]];
                if hi <= lo {
                    continue;
                }
                let left_n = pos;
                let right_n = n - pos;
                if left_n < self.min_samples_leaf || right_n < self.min_samples_leaf {
                    continue;
                }

                let weighted = (left_n as f64 * self.criterion.impurity(left_n, left_sum, left_sq)
                    + right_n as f64
                        * self.criterion.impurity(right_n, total_sum - left_sum, total_sq - left_sq))
                    / n as f64;
                let gain = parent_impurity - weighted;

                if gain > MIN_GAIN && best.map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit {
                        feature,
                        threshold: (lo + hi) / 2.0,
                        gain,
                    });
                }
            }
        }

        best
    }

    /// Arena index of the leaf a row falls into
    pub fn leaf_index(&self, row: ArrayView1<f64>) -> usize {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { .. } => return idx,
                Node::Split { feature, threshold, left, right } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Overwrite the value of a leaf. Non-leaf indices are ignored.
    pub fn set_leaf_value(&mut self, idx: usize, new_value: f64) {
        if let Some(Node::Leaf { value, .. }) = self.nodes.get_mut(idx) {
            *value = new_value;
        }
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        match &self.nodes[self.leaf_index(row)] {
            Node::Leaf { value, .. } => *value,
            Node::Split { .. } => unreachable!("leaf_index always ends on a leaf"),
        }
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if !self.is_fitted() {
            return Err(PipelineError::ModelNotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(PipelineError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(x.rows().into_iter().map(|row| self.predict_row(row)).collect())
    }

    /// Number of split levels; a single leaf has depth 0
    pub fn depth(&self) -> usize {
        // Children always sit after their parent in the arena.
        let mut depths = vec![0usize; self.nodes.len()];
        let mut max_depth = 0;
        for (idx, node) in self.nodes.iter().enumerate() {
            max_depth = max_depth.max(depths[idx]);
            if let Node::Split { left, right, .. } = node {
                depths[*left] = depths[idx] + 1;
                depths[*right] = depths[idx] + 1;
            }
        }
        max_depth
    }

    /// Check the arena of a deserialized tree.
    ///
    /// Every child must come after its parent and inside the arena, and every
    /// split must read an existing feature, so `leaf_index` always terminates.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(PipelineError::Serialization("tree has no nodes".to_string()));
        }
        let n_nodes = self.nodes.len();
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Node::Split { feature, left, right, .. } = node {
                for child in [*left, *right] {
                    if child <= idx || child >= n_nodes {
                        return Err(PipelineError::Serialization(format!(
                            "node {} points to child {} in a tree of {} nodes",
                            idx, child, n_nodes
                        )));
                    }
                }
                if *feature >= self.n_features {
                    return Err(PipelineError::Serialization(format!(
                        "node {} splits on feature {} but the tree has {} features",
                        idx, feature, self.n_features
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }
}
