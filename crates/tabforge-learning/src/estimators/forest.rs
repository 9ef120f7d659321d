//! Random forests of bootstrapped decision trees.

use super::tree::DecisionTree;
use super::{
    Estimator, EstimatorError, ModelDetails, Result, argmax, check_fit_input,
    check_predict_input, class_index, normalize, sorted_classes,
};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tabforge_processing::ProblemType;

/// Number of features each split may consider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    All,
    Fixed(usize),
    Fraction(f64),
}

impl MaxFeatures {
    /// Resolve against the number of input features, never below one.
    pub fn resolve(self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            MaxFeatures::Sqrt => n.sqrt() as usize,
            MaxFeatures::Log2 => n.log2() as usize,
            MaxFeatures::All => n_features,
            MaxFeatures::Fixed(k) => k,
            MaxFeatures::Fraction(f) => (n * f) as usize,
        };
        k.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub task: ProblemType,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub random_state: u64,
    /// `1` fits trees sequentially; any other value uses the rayon pool.
    pub n_jobs: i32,
    trees: Vec<DecisionTree>,
    classes: Vec<f64>,
    n_features: usize,
}

impl RandomForest {
    pub fn new(task: ProblemType) -> Self {
        let max_features = match task {
            ProblemType::Classification => MaxFeatures::Sqrt,
            ProblemType::Regression => MaxFeatures::All,
        };
        Self {
            task,
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features,
            bootstrap: true,
            random_state: 42,
            n_jobs: -1,
            trees: Vec::new(),
            classes: Vec::new(),
            n_features: 0,
        }
    }

    pub fn classifier() -> Self {
        Self::new(ProblemType::Classification)
    }

    pub fn regressor() -> Self {
        Self::new(ProblemType::Regression)
    }

    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn fit_tree(&self, x: &Array2<f64>, y: &Array1<f64>, seed: u64, k: usize) -> Result<DecisionTree> {
        let mut tree = DecisionTree::new(self.task)
            .with_max_features(Some(k))
            .with_min_samples_leaf(self.min_samples_leaf)
            .with_random_state(seed);
        tree.max_depth = self.max_depth;
        tree.min_samples_split = self.min_samples_split;

        if self.bootstrap {
            let mut rng = StdRng::seed_from_u64(seed);
            let n = x.nrows();
            let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let xs = x.select(Axis(0), &rows);
            let ys = y.select(Axis(0), &rows);
            tree.fit(&xs, &ys)?;
        } else {
            tree.fit(x, y)?;
        }
        Ok(tree)
    }
}

impl Estimator for RandomForest {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_fit_input(x, y)?;
        if self.n_estimators == 0 {
            return Err(EstimatorError::parameter("n_estimators", "must be at least 1"));
        }
        if matches!(self.max_features, MaxFeatures::Fraction(f) if !(f > 0.0 && f <= 1.0)) {
            return Err(EstimatorError::parameter("max_features", "fraction must be in (0, 1]"));
        }

        self.n_features = x.ncols();
        self.classes = match self.task {
            ProblemType::Classification => sorted_classes(y),
            ProblemType::Regression => Vec::new(),
        };
        let k = self.max_features.resolve(x.ncols());
        let seeds: Vec<u64> = (0..self.n_estimators)
            .map(|i| self.random_state.wrapping_add(i as u64))
            .collect();

        let trees: Result<Vec<DecisionTree>> = if self.n_jobs == 1 {
            seeds.iter().map(|&s| self.fit_tree(x, y, s, k)).collect()
        } else {
            seeds.par_iter().map(|&s| self.fit_tree(x, y, s, k)).collect()
        };
        self.trees = trees?;

        tracing::debug!(
            trees = self.trees.len(),
            max_features = k,
            "Random forest fitted"
        );
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(EstimatorError::NotFitted);
        }
        check_predict_input(x, self.n_features)?;

        let per_tree = self
            .trees
            .par_iter()
            .map(|tree| tree.predict(x))
            .collect::<Result<Vec<_>>>()?;

        let n = x.nrows();
        let predictions = match self.task {
            ProblemType::Regression => {
                let mut sum = Array1::<f64>::zeros(n);
                for p in &per_tree {
                    sum += p;
                }
                sum / per_tree.len() as f64
            }
            ProblemType::Classification => {
                let k = self.classes.len();
                Array1::from_shape_fn(n, |row| {
                    let mut votes = vec![0.0; k];
                    for p in &per_tree {
                        if let Some(c) = class_index(&self.classes, p[row]) {
                            votes[c] += 1.0;
                        }
                    }
                    self.classes[argmax(votes)]
                })
            }
        };
        Ok(predictions)
    }

    fn details(&self) -> ModelDetails {
        if self.trees.is_empty() {
            return ModelDetails::Unsupported;
        }
        let mut values = vec![0.0; self.n_features];
        for tree in &self.trees {
            for (total, v) in values.iter_mut().zip(tree.feature_importances()) {
                *total += v;
            }
        }
        normalize(&mut values);
        ModelDetails::Importances { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::test_data;

    #[test]
    fn test_max_features_resolve() {
        assert_eq!(MaxFeatures::Sqrt.resolve(16), 4);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
        assert_eq!(MaxFeatures::All.resolve(7), 7);
        assert_eq!(MaxFeatures::Fixed(20).resolve(7), 7);
        assert_eq!(MaxFeatures::Fraction(0.5).resolve(10), 5);
    }

    #[test]
    fn test_classifier_accuracy_on_blobs() {
        let (x, y) = test_data::three_blobs();
        let mut forest = RandomForest::classifier().with_n_estimators(15);
        forest.fit(&x, &y).unwrap();
        assert_eq!(forest.n_trees(), 15);

        let predictions = forest.predict(&x).unwrap();
        let correct = predictions.iter().zip(y.iter()).filter(|(p, t)| p == t).count();
        assert!(correct as f64 / y.len() as f64 > 0.9);
    }

    #[test]
    fn test_seeded_fit_is_deterministic() {
        let (x, y) = test_data::linear_regression();
        let mut a = RandomForest::regressor().with_n_estimators(8);
        let mut b = RandomForest::regressor().with_n_estimators(8);
        b.n_jobs = 1;
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_importances_sum_to_one() {
        let (x, y) = test_data::linear_regression();
        let mut forest = RandomForest::regressor().with_n_estimators(5);
        forest.fit(&x, &y).unwrap();
        let ModelDetails::Importances { values } = forest.details() else {
            panic!("expected importances");
        };
        assert_eq!(values.len(), 2);
        assert!((values.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_estimators_rejected() {
        let (x, y) = test_data::two_blobs();
        let mut forest = RandomForest::classifier().with_n_estimators(0);
        assert!(matches!(
            forest.fit(&x, &y),
            Err(EstimatorError::InvalidParameter { .. })
        ));
    }
}
