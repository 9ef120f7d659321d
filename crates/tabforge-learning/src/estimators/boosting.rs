//! Gradient boosted regression trees.
//!
//! Regression boosts on squared-error residuals. Binary classification boosts
//! a single log-odds score; multiclass fits one tree per class and stage on
//! softmax residuals.

use super::tree::DecisionTree;
use super::{
    Estimator, EstimatorError, ModelDetails, Result, argmax, check_fit_input,
    check_predict_input, encode_classes, normalize, sorted_classes,
};
use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tabforge_processing::ProblemType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    pub task: ProblemType,
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Fraction of rows drawn without replacement for each stage.
    pub subsample: f64,
    pub random_state: u64,
    /// Initial score per output (one for regression and binary tasks).
    init: Vec<f64>,
    stages: Vec<Vec<DecisionTree>>,
    classes: Vec<f64>,
    n_features: usize,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn softmax_row(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exp.iter().sum();
    exp.into_iter().map(|e| e / total).collect()
}

impl GradientBoosting {
    pub fn new(task: ProblemType) -> Self {
        Self {
            task,
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            subsample: 1.0,
            random_state: 42,
            init: Vec::new(),
            stages: Vec::new(),
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

    pub fn with_learning_rate(mut self, rate: f64) -> Self {
        self.learning_rate = rate;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(EstimatorError::parameter("n_estimators", "must be at least 1"));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(EstimatorError::parameter("learning_rate", "must be positive"));
        }
        if self.max_depth == 0 {
            return Err(EstimatorError::parameter("max_depth", "must be at least 1"));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(EstimatorError::parameter("subsample", "must be in (0, 1]"));
        }
        Ok(())
    }

    /// Number of score columns the model keeps per row.
    fn n_outputs(&self) -> usize {
        match self.task {
            ProblemType::Classification if self.classes.len() > 2 => self.classes.len(),
            _ => 1,
        }
    }

    /// Raw scores, one column per output.
    fn raw_scores(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let n_outputs = self.n_outputs();
        let mut scores = Array2::from_shape_fn((x.nrows(), n_outputs), |(_, k)| self.init[k]);
        for stage in &self.stages {
            for (k, tree) in stage.iter().enumerate() {
                let update = tree.predict(x)?;
                scores
                    .column_mut(k)
                    .scaled_add(self.learning_rate, &update);
            }
        }
        Ok(scores)
    }

    fn fit_stage_tree(
        &self,
        x: &Array2<f64>,
        residuals: &Array1<f64>,
        rows: Option<&[usize]>,
        seed: u64,
    ) -> Result<DecisionTree> {
        let mut tree = DecisionTree::regressor()
            .with_max_depth(self.max_depth)
            .with_random_state(seed);
        match rows {
            Some(rows) => tree.fit(&x.select(Axis(0), rows), &residuals.select(Axis(0), rows))?,
            None => tree.fit(x, residuals)?,
        }
        Ok(tree)
    }
}

impl Estimator for GradientBoosting {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_fit_input(x, y)?;
        self.validate()?;

        self.n_features = x.ncols();
        self.stages.clear();
        let n = x.nrows();

        // One-hot targets per output; regression keeps the raw values.
        let targets: Array2<f64> = match self.task {
            ProblemType::Regression => {
                self.classes.clear();
                self.init = vec![y.mean().unwrap_or(0.0)];
                y.clone().insert_axis(Axis(1))
            }
            ProblemType::Classification => {
                self.classes = sorted_classes(y);
                let codes = encode_classes(&self.classes, y);
                if self.classes.len() < 2 {
                    self.init = vec![0.0];
                    return Ok(());
                }
                if self.classes.len() == 2 {
                    let positive = codes.iter().filter(|&&c| c == 1).count() as f64 / n as f64;
                    let p = positive.clamp(1e-6, 1.0 - 1e-6);
                    self.init = vec![(p / (1.0 - p)).ln()];
                    Array2::from_shape_fn((n, 1), |(i, _)| codes[i] as f64)
                } else {
                    let k = self.classes.len();
                    let mut counts = vec![0.0; k];
                    for &c in &codes {
                        counts[c] += 1.0;
                    }
                    self.init = counts.iter().map(|c| (c / n as f64).ln()).collect();
                    Array2::from_shape_fn((n, k), |(i, j)| if codes[i] == j { 1.0 } else { 0.0 })
                }
            }
        };

        let sample_size = ((self.subsample * n as f64).round() as usize).clamp(1, n);
        let mut rng = StdRng::seed_from_u64(self.random_state);
        let mut scores = Array2::from_shape_fn((n, self.n_outputs()), |(_, k)| self.init[k]);

        for stage_idx in 0..self.n_estimators {
            let rows = (sample_size < n).then(|| {
                let mut rows = rand::seq::index::sample(&mut rng, n, sample_size).into_vec();
                rows.sort_unstable();
                rows
            });

            let residuals = self.residuals(&targets, &scores);
            let mut stage = Vec::with_capacity(residuals.ncols());
            for (k, column) in residuals.columns().into_iter().enumerate() {
                let seed = self
                    .random_state
                    .wrapping_add((stage_idx * residuals.ncols() + k) as u64);
                let tree = self.fit_stage_tree(x, &column.to_owned(), rows.as_deref(), seed)?;
                let update = tree.predict(x)?;
                scores.column_mut(k).scaled_add(self.learning_rate, &update);
                stage.push(tree);
            }
            self.stages.push(stage);
        }

        tracing::debug!(
            stages = self.stages.len(),
            outputs = self.n_outputs(),
            "Gradient boosting fitted"
        );
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.init.is_empty() {
            return Err(EstimatorError::NotFitted);
        }
        check_predict_input(x, self.n_features)?;

        if self.task == ProblemType::Classification && self.classes.len() < 2 {
            return Ok(Array1::from_elem(x.nrows(), self.classes[0]));
        }

        let scores = self.raw_scores(x)?;
        let predictions = match self.task {
            ProblemType::Regression => scores.column(0).to_owned(),
            ProblemType::Classification if self.classes.len() == 2 => scores
                .column(0)
                .mapv(|s| if sigmoid(s) > 0.5 { self.classes[1] } else { self.classes[0] }),
            ProblemType::Classification => scores
                .rows()
                .into_iter()
                .map(|row| self.classes[argmax(row.iter().copied())])
                .collect(),
        };
        Ok(predictions)
    }

    fn details(&self) -> ModelDetails {
        if self.stages.is_empty() {
            return ModelDetails::Unsupported;
        }
        let mut values = vec![0.0; self.n_features];
        for tree in self.stages.iter().flatten() {
            for (total, v) in values.iter_mut().zip(tree.feature_importances()) {
                *total += v;
            }
        }
        normalize(&mut values);
        ModelDetails::Importances { values }
    }
}

impl GradientBoosting {
    /// Negative gradient of the loss at the current scores.
    fn residuals(&self, targets: &Array2<f64>, scores: &Array2<f64>) -> Array2<f64> {
        match self.task {
            ProblemType::Regression => targets - scores,
            ProblemType::Classification if targets.ncols() == 1 => {
                targets - &scores.mapv(sigmoid)
            }
            ProblemType::Classification => {
                let mut residuals = targets.clone();
                for (mut out, row) in residuals.rows_mut().into_iter().zip(scores.rows()) {
                    let probs = softmax_row(&row.to_vec());
                    for (r, p) in out.iter_mut().zip(probs) {
                        *r -= p;
                    }
                }
                residuals
            }
        }
    }
}
