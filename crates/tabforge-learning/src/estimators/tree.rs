//! CART decision trees for classification (Gini) and regression (variance).

use super::{
    Estimator, EstimatorError, ModelDetails, Result, argmax, check_fit_input,
    check_predict_input, encode_classes, normalize, sorted_classes,
};
use ndarray::{Array1, Array2, ArrayView1};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tabforge_processing::ProblemType;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        value: f64,
        n_samples: usize,
    },
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
    },
}

impl TreeNode {
    fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { value, .. } => return *value,
                TreeNode::Split {
                    feature_idx,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    node = if row[*feature_idx] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }
}

/// A single decision tree.
///
/// Classification leaves predict the majority label; regression leaves
/// predict the mean target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub task: ProblemType,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features drawn at random for each split; `None` considers all.
    pub max_features: Option<usize>,
    pub random_state: u64,
    root: Option<TreeNode>,
    n_features: usize,
    classes: Vec<f64>,
    feature_importances: Vec<f64>,
}

impl DecisionTree {
    pub fn new(task: ProblemType) -> Self {
        Self {
            task,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            random_state: 42,
            root: None,
            n_features: 0,
            classes: Vec::new(),
            feature_importances: Vec::new(),
        }
    }

    pub fn classifier() -> Self {
        Self::new(ProblemType::Classification)
    }

    pub fn regressor() -> Self {
        Self::new(ProblemType::Regression)
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples;
        self
    }

    pub fn with_max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Normalized importances; empty before fit.
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    pub fn depth(&self) -> usize {
        fn depth_of(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + depth_of(left).max(depth_of(right)),
            }
        }
        self.root.as_ref().map_or(0, depth_of)
    }
}

impl Estimator for DecisionTree {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_fit_input(x, y)?;
        if self.min_samples_split < 2 {
            return Err(EstimatorError::parameter("min_samples_split", "must be at least 2"));
        }
        if self.min_samples_leaf == 0 {
            return Err(EstimatorError::parameter("min_samples_leaf", "must be at least 1"));
        }
        if self.max_depth == Some(0) {
            return Err(EstimatorError::parameter("max_depth", "must be at least 1"));
        }

        self.n_features = x.ncols();
        let (targets, n_classes) = match self.task {
            ProblemType::Classification => {
                self.classes = sorted_classes(y);
                let codes = encode_classes(&self.classes, y);
                (codes.into_iter().map(|c| c as f64).collect(), self.classes.len())
            }
            ProblemType::Regression => (y.to_vec(), 0),
        };

        let mut builder = TreeBuilder {
            x,
            targets: &targets,
            n_classes,
            classes: &self.classes,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            max_features: self.max_features.filter(|&k| k > 0 && k < x.ncols()),
            rng: StdRng::seed_from_u64(self.random_state),
            importances: vec![0.0; x.ncols()],
        };
        let indices: Vec<usize> = (0..x.nrows()).collect();
        let root = builder.build(&indices, 0);

        let mut importances = builder.importances;
        normalize(&mut importances);
        self.feature_importances = importances;
        self.root = Some(root);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let root = self.root.as_ref().ok_or(EstimatorError::NotFitted)?;
        check_predict_input(x, self.n_features)?;
        Ok(x.rows().into_iter().map(|row| root.predict_row(row)).collect())
    }

    fn details(&self) -> ModelDetails {
        if self.root.is_none() {
            return ModelDetails::Unsupported;
        }
        ModelDetails::Importances {
            values: self.feature_importances.clone(),
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Running sums for one side of a candidate split.
#[derive(Clone)]
struct NodeStats {
    count: usize,
    sum: f64,
    sum_sq: f64,
    class_counts: Vec<usize>,
}

impl NodeStats {
    fn empty(n_classes: usize) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            class_counts: vec![0; n_classes],
        }
    }

    fn add(&mut self, target: f64) {
        self.count += 1;
        self.sum += target;
        self.sum_sq += target * target;
        if !self.class_counts.is_empty() {
            self.class_counts[target as usize] += 1;
        }
    }

    fn remove(&mut self, target: f64) {
        self.count -= 1;
        self.sum -= target;
        self.sum_sq -= target * target;
        if !self.class_counts.is_empty() {
            self.class_counts[target as usize] -= 1;
        }
    }

    /// Gini impurity for classification, variance for regression.
    fn impurity(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        if self.class_counts.is_empty() {
            let mean = self.sum / n;
            (self.sum_sq / n - mean * mean).max(0.0)
        } else {
            1.0 - self
                .class_counts
                .iter()
                .map(|&c| (c as f64 / n).powi(2))
                .sum::<f64>()
        }
    }
}

struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    targets: &'a [f64],
    n_classes: usize,
    classes: &'a [f64],
    max_depth: Option<usize>,
    min_samples_split: usize,
    min_samples_leaf: usize,
    max_features: Option<usize>,
    rng: StdRng,
    importances: Vec<f64>,
}

impl TreeBuilder<'_> {
    fn stats(&self, indices: &[usize]) -> NodeStats {
        let mut stats = NodeStats::empty(self.n_classes);
        for &i in indices {
            stats.add(self.targets[i]);
        }
        stats
    }

    fn leaf_value(&self, stats: &NodeStats) -> f64 {
        if self.n_classes == 0 {
            stats.sum / stats.count.max(1) as f64
        } else {
            let best = argmax(stats.class_counts.iter().map(|&c| c as f64));
            self.classes[best]
        }
    }

    fn build(&mut self, indices: &[usize], depth: usize) -> TreeNode {
        let stats = self.stats(indices);
        let n_samples = indices.len();
        let impurity = stats.impurity();

        let should_stop = n_samples < self.min_samples_split
            || n_samples < 2 * self.min_samples_leaf
            || self.max_depth.is_some_and(|d| depth >= d)
            || impurity <= 1e-12;
        if should_stop {
            return TreeNode::Leaf {
                value: self.leaf_value(&stats),
                n_samples,
            };
        }

        let Some(split) = self.best_split(indices, &stats, impurity) else {
            return TreeNode::Leaf {
                value: self.leaf_value(&stats),
                n_samples,
            };
        };

        self.importances[split.feature_idx] += n_samples as f64 * split.gain;

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| self.x[[i, split.feature_idx]] <= split.threshold);
        let left = Box::new(self.build(&left, depth + 1));
        let right = Box::new(self.build(&right, depth + 1));

        TreeNode::Split {
            feature_idx: split.feature_idx,
            threshold: split.threshold,
            left,
            right,
            n_samples,
        }
    }

    fn candidate_features(&mut self) -> Vec<usize> {
        let n_features = self.x.ncols();
        match self.max_features {
            Some(k) => rand::seq::index::sample(&mut self.rng, n_features, k).into_vec(),
            None => (0..n_features).collect(),
        }
    }

    /// Sweep each candidate feature in sorted order, moving one sample at a
    /// time from the right side to the left side.
    fn best_split(
        &mut self,
        indices: &[usize],
        parent: &NodeStats,
        parent_impurity: f64,
    ) -> Option<SplitCandidate> {
        let n = indices.len();
        let mut best: Option<SplitCandidate> = None;

        for feature_idx in self.candidate_features() {
            let mut order = indices.to_vec();
            order.sort_by(|&a, &b| self.x[[a, feature_idx]].total_cmp(&self.x[[b, feature_idx]]));

            let mut left = NodeStats::empty(self.n_classes);
            let mut right = parent.clone();
            for pos in 0..n - 1 {
                let i = order[pos];
                left.add(self.targets[i]);
                right.remove(self.targets[i]);

                let value = self.x[[i, feature_idx]];
                let next = self.x[[order[pos + 1], feature_idx]];
                if value == next {
                    continue;
                }
                if left.count < self.min_samples_leaf || right.count < self.min_samples_leaf {
                    continue;
                }

                let weighted = (left.count as f64 * left.impurity()
                    + right.count as f64 * right.impurity())
                    / n as f64;
                let gain = parent_impurity - weighted;
                if gain > 1e-12 && best.as_ref().is_none_or(|b| gain > b.gain) {
                    let mut threshold = (value + next) / 2.0;
                    if threshold >= next {
                        threshold = value;
                    }
                    best = Some(SplitCandidate {
                        feature_idx,
                        threshold,
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::test_data;
    use ndarray::array;

    #[test]
    fn test_classifier_fits_separable_data() {
        let (x, y) = test_data::two_blobs();
        let mut tree = DecisionTree::classifier();
        tree.fit(&x, &y).unwrap();
        assert_eq!(tree.predict(&x).unwrap(), y);
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_regressor_respects_max_depth() {
        let (x, y) = test_data::linear_regression();
        let mut tree = DecisionTree::regressor().with_max_depth(3);
        tree.fit(&x, &y).unwrap();
        assert!(tree.depth() <= 3);

        let predictions = tree.predict(&x).unwrap();
        let distinct = sorted_classes(&predictions);
        assert!(distinct.len() <= 8);
    }

    #[test]
    fn test_unlimited_tree_memorizes_training_set() {
        let (x, y) = test_data::linear_regression();
        let mut tree = DecisionTree::regressor();
        tree.fit(&x, &y).unwrap();
        let predictions = tree.predict(&x).unwrap();
        for (p, t) in predictions.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-9);
        }
    }

    #[test]
    fn test_importances_favor_informative_feature() {
        let n = 30;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 { i as f64 } else { ((i * 5) % 3) as f64 }
        });
        let y = Array1::from_shape_fn(n, |i| if i < 15 { 0.0 } else { 1.0 });
        let mut tree = DecisionTree::classifier();
        tree.fit(&x, &y).unwrap();

        let importances = tree.feature_importances();
        assert_eq!(importances, &[1.0, 0.0]);
    }

    #[test]
    fn test_constant_features_give_single_leaf() {
        let x = array![[1.0], [1.0], [1.0], [1.0]];
        let y = array![0.0, 1.0, 1.0, 1.0];
        let mut tree = DecisionTree::classifier();
        tree.fit(&x, &y).unwrap();
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.predict(&array![[5.0]]).unwrap(), array![1.0]);
    }

    #[test]
    fn test_invalid_parameters() {
        let (x, y) = test_data::two_blobs();
        let mut tree = DecisionTree::classifier().with_min_samples_leaf(0);
        assert!(matches!(
            tree.fit(&x, &y),
            Err(EstimatorError::InvalidParameter { .. })
        ));
    }
}
