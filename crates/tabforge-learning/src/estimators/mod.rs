//! Native estimators.
//!
//! Every estimator implements [`Estimator`] and is wrapped by the serializable
//! [`Model`] enum so a fitted model can be stored inside a bundle.
//!
//! Classification estimators are fitted on label indices (as produced by the
//! safe label encoder) stored as `f64`, and predict one of the label values
//! seen during fit.
//!
//! Detail extraction is explicit: [`Estimator::details`] returns a
//! [`ModelDetails`] variant naming what the estimator exposes, and the trainer
//! skips [`ModelDetails::Unsupported`] without treating it as an error.

mod boosting;
mod forest;
mod linear;
mod naive_bayes;
mod neighbors;
mod polynomial;
mod tree;

pub use boosting::GradientBoosting;
pub use forest::{MaxFeatures, RandomForest};
pub use linear::{Lasso, LinearRegression, LogisticRegression};
pub use naive_bayes::GaussianNaiveBayes;
pub use neighbors::{KNearestNeighbors, WeightScheme};
pub use polynomial::PolynomialModel;
pub use tree::DecisionTree;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure inside an estimator.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EstimatorError {
    #[error("Estimator must be fitted before predict")]
    NotFitted,

    #[error("Cannot fit on an empty feature matrix")]
    EmptyInput,

    #[error("Feature matrix has {rows} rows but {labels} labels were given")]
    LengthMismatch { rows: usize, labels: usize },

    #[error("Expected {expected} features, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Input contains NaN or infinite values")]
    NonFinite,

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Linear system could not be solved")]
    Singular,
}

impl EstimatorError {
    pub(crate) fn parameter(name: &str, reason: impl Into<String>) -> Self {
        EstimatorError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EstimatorError>;

/// Coefficients or importances an estimator exposes after fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ModelDetails {
    /// Linear weights. Multiclass weights are flattened class by class.
    Linear {
        coefficients: Vec<f64>,
        intercept: f64,
    },
    /// Normalized impurity-based importances, one per feature.
    Importances { values: Vec<f64> },
    /// The estimator has no per-feature details.
    Unsupported,
}

/// A trainable model over a dense feature matrix.
pub trait Estimator: Send + Sync {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Details exposed by the fitted estimator.
    fn details(&self) -> ModelDetails {
        ModelDetails::Unsupported
    }
}

/// Any estimator this crate can train and persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "estimator", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Model {
    /// Ordinary least squares, or ridge when `alpha > 0`.
    Linear(LinearRegression),
    Lasso(Lasso),
    Logistic(LogisticRegression),
    Tree(DecisionTree),
    Forest(RandomForest),
    Boosting(GradientBoosting),
    Knn(KNearestNeighbors),
    NaiveBayes(GaussianNaiveBayes),
    /// Polynomial feature expansion in front of another model.
    Polynomial(PolynomialModel),
}

macro_rules! dispatch {
    ($model:expr, $inner:ident => $body:expr) => {
        match $model {
            Model::Linear($inner) => $body,
            Model::Lasso($inner) => $body,
            Model::Logistic($inner) => $body,
            Model::Tree($inner) => $body,
            Model::Forest($inner) => $body,
            Model::Boosting($inner) => $body,
            Model::Knn($inner) => $body,
            Model::NaiveBayes($inner) => $body,
            Model::Polynomial($inner) => $body,
        }
    };
}

impl Estimator for Model {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        dispatch!(self, m => m.fit(x, y))
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        dispatch!(self, m => m.predict(x))
    }

    fn details(&self) -> ModelDetails {
        dispatch!(self, m => m.details())
    }
}

static_assertions::assert_impl_all!(Model: Send, Sync);

// ============================================================================
// Shared Helpers
// ============================================================================

pub(crate) fn check_fit_input(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(EstimatorError::EmptyInput);
    }
    if x.nrows() != y.len() {
        return Err(EstimatorError::LengthMismatch {
            rows: x.nrows(),
            labels: y.len(),
        });
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(EstimatorError::NonFinite);
    }
    Ok(())
}

pub(crate) fn check_predict_input(x: &Array2<f64>, n_features: usize) -> Result<()> {
    if x.ncols() != n_features {
        return Err(EstimatorError::ShapeMismatch {
            expected: n_features,
            actual: x.ncols(),
        });
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(EstimatorError::NonFinite);
    }
    Ok(())
}

/// Sorted distinct label values.
pub(crate) fn sorted_classes(y: &Array1<f64>) -> Vec<f64> {
    let mut classes: Vec<f64> = y.to_vec();
    classes.sort_by(f64::total_cmp);
    classes.dedup();
    classes
}

/// Position of `label` in `classes`; labels come from the fitted vector so
/// the lookup only misses for foreign values.
pub(crate) fn class_index(classes: &[f64], label: f64) -> Option<usize> {
    classes.binary_search_by(|c| c.total_cmp(&label)).ok()
}

/// Map each label to its class position.
pub(crate) fn encode_classes(classes: &[f64], y: &Array1<f64>) -> Vec<usize> {
    y.iter()
        .map(|&v| class_index(classes, v).unwrap_or(0))
        .collect()
}

/// Index of the largest value; the first one wins ties.
pub(crate) fn argmax(values: impl IntoIterator<Item = f64>) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, v) in values.into_iter().enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

pub(crate) fn normalize(values: &mut [f64]) {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        for v in values.iter_mut() {
            *v /= total;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_check_fit_input() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        assert!(check_fit_input(&x, &array![0.0, 1.0]).is_ok());
        assert_eq!(
            check_fit_input(&x, &array![0.0]),
            Err(EstimatorError::LengthMismatch { rows: 2, labels: 1 })
        );
        assert_eq!(
            check_fit_input(&array![[f64::NAN, 1.0]], &array![0.0]),
            Err(EstimatorError::NonFinite)
        );
    }

    #[test]
    fn test_class_helpers() {
        let classes = sorted_classes(&array![2.0, 0.0, 2.0, 1.0]);
        assert_eq!(classes, vec![0.0, 1.0, 2.0]);
        assert_eq!(class_index(&classes, 2.0), Some(2));
        assert_eq!(class_index(&classes, 7.0), None);
        assert_eq!(argmax([0.1, 0.7, 0.7]), 1);
    }

    #[test]
    fn test_model_serde_roundtrip_predicts_identically() {
        let (x, y) = test_data::linear_regression();
        let mut model = Model::Tree(DecisionTree::regressor().with_max_depth(4));
        model.fit(&x, &y).unwrap();

        let json = serde_json::to_string(&model).unwrap();
        let restored: Model = serde_json::from_str(&json).unwrap();
        assert_eq!(model.predict(&x).unwrap(), restored.predict(&x).unwrap());
    }
}
