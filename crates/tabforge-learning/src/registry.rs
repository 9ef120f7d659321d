//! Explicit registry of trainable model types.
//!
//! The trainer never hard-codes estimator construction. It looks up a factory
//! for `(ProblemType, model_type)` in a [`ModelRegistry`] handed to it at
//! construction time, so callers can register additional model types or build
//! a reduced registry for tests.
//!
//! ```
//! use tabforge_learning::ModelRegistry;
//! use tabforge_processing::ProblemType;
//!
//! let registry = ModelRegistry::with_defaults();
//! assert!(registry.contains(ProblemType::Regression, "ridge"));
//! assert!(!registry.contains(ProblemType::Regression, "naive_bayes"));
//! ```

use std::collections::HashMap;

use serde_json::{Value, json};
use tabforge_processing::ProblemType;

use crate::config::ModelParams;
use crate::error::ModelTrainingError;
use crate::estimators::{
    DecisionTree, GaussianNaiveBayes, GradientBoosting, KNearestNeighbors, Lasso,
    LinearRegression, LogisticRegression, MaxFeatures, Model, RandomForest, WeightScheme,
};

/// Builds an unfitted model from merged parameters and the parallelism hint.
pub type ModelFactory = fn(&ModelParams, i32) -> Result<Model, ModelTrainingError>;

/// Mapping from `(problem type, model type)` to a model factory.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    factories: HashMap<(ProblemType, String), ModelFactory>,
    defaults: HashMap<String, ModelParams>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("regression", &self.available(ProblemType::Regression))
            .field("classification", &self.available(ProblemType::Classification))
            .finish()
    }
}

impl ModelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in estimator and its default parameters.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register(ProblemType::Regression, "linear_regression", |_, _| {
            Ok(Model::Linear(LinearRegression::new()))
        });
        registry.register(ProblemType::Regression, "ridge", build_ridge);
        registry.register(ProblemType::Regression, "lasso", build_lasso);
        registry.register(ProblemType::Classification, "logistic_regression", build_logistic);
        registry.register(ProblemType::Classification, "naive_bayes", build_naive_bayes);
        registry.register(ProblemType::Regression, "decision_tree", |p, j| {
            build_tree(ProblemType::Regression, p, j)
        });
        registry.register(ProblemType::Classification, "decision_tree", |p, j| {
            build_tree(ProblemType::Classification, p, j)
        });
        registry.register(ProblemType::Regression, "random_forest", |p, j| {
            build_forest(ProblemType::Regression, p, j)
        });
        registry.register(ProblemType::Classification, "random_forest", |p, j| {
            build_forest(ProblemType::Classification, p, j)
        });
        registry.register(ProblemType::Regression, "gradient_boosting", |p, j| {
            build_boosting(ProblemType::Regression, p, j)
        });
        registry.register(ProblemType::Classification, "gradient_boosting", |p, j| {
            build_boosting(ProblemType::Classification, p, j)
        });
        registry.register(ProblemType::Regression, "knn", |p, j| {
            build_knn(ProblemType::Regression, p, j)
        });
        registry.register(ProblemType::Classification, "knn", |p, j| {
            build_knn(ProblemType::Classification, p, j)
        });

        registry.set_defaults(
            "random_forest",
            params(json!({"n_estimators": 100, "max_depth": 10, "random_state": 42, "n_jobs": -1})),
        );
        registry.set_defaults("ridge", params(json!({"alpha": 1.0})));
        registry.set_defaults("lasso", params(json!({"alpha": 1.0})));
        registry.set_defaults("logistic_regression", params(json!({"max_iter": 1000})));
        registry.set_defaults(
            "gradient_boosting",
            params(json!({"n_estimators": 100, "random_state": 42})),
        );
        registry.set_defaults(
            "decision_tree",
            params(json!({"max_depth": 10, "random_state": 42})),
        );
        registry.set_defaults("knn", params(json!({"n_neighbors": 5})));
        registry
    }

    pub fn register(&mut self, problem_type: ProblemType, model_type: &str, factory: ModelFactory) {
        self.factories
            .insert((problem_type, model_type.to_string()), factory);
    }

    pub fn set_defaults(&mut self, model_type: &str, defaults: ModelParams) {
        self.defaults.insert(model_type.to_string(), defaults);
    }

    /// Default parameters for a model type; empty when none are registered.
    #[must_use]
    pub fn default_params(&self, model_type: &str) -> ModelParams {
        self.defaults.get(model_type).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, problem_type: ProblemType, model_type: &str) -> bool {
        self.factories
            .contains_key(&(problem_type, model_type.to_string()))
    }

    /// Registered model types for a problem type, sorted.
    #[must_use]
    pub fn available(&self, problem_type: ProblemType) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .keys()
            .filter(|(task, _)| *task == problem_type)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Build an unfitted model. User parameters override the registered
    /// defaults key by key.
    pub fn create(
        &self,
        problem_type: ProblemType,
        model_type: &str,
        user_params: &ModelParams,
        n_jobs: i32,
    ) -> Result<Model, ModelTrainingError> {
        let factory = self
            .factories
            .get(&(problem_type, model_type.to_string()))
            .ok_or_else(|| ModelTrainingError::UnknownModel {
                problem_type: problem_type.to_string(),
                model_type: model_type.to_string(),
                available: self.available(problem_type),
            })?;

        let mut merged = self.default_params(model_type);
        merged.extend(user_params.iter().map(|(k, v)| (k.clone(), v.clone())));
        tracing::debug!(model_type, ?merged, "Creating model");
        factory(&merged, n_jobs)
    }
}

fn params(value: Value) -> ModelParams {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => ModelParams::new(),
    }
}

// ============================================================================
// Parameter Readers
// ============================================================================

fn invalid(name: &str, reason: impl Into<String>) -> ModelTrainingError {
    ModelTrainingError::InvalidParameter {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn read_f64(params: &ModelParams, name: &str, default: f64) -> Result<f64, ModelTrainingError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| invalid(name, format!("expected a number, got {v}"))),
    }
}

fn read_usize(params: &ModelParams, name: &str, default: usize) -> Result<usize, ModelTrainingError> {
    Ok(read_optional_usize(params, name)?.unwrap_or(default))
}

/// `null` and absent both mean "no limit".
fn read_optional_usize(params: &ModelParams, name: &str) -> Result<Option<usize>, ModelTrainingError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| invalid(name, format!("expected a non-negative integer, got {v}"))),
    }
}

fn read_seed(params: &ModelParams, default: u64) -> Result<u64, ModelTrainingError> {
    match params.get("random_state") {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .ok_or_else(|| invalid("random_state", format!("expected a non-negative integer, got {v}"))),
    }
}

fn read_jobs(params: &ModelParams, hint: i32) -> Result<i32, ModelTrainingError> {
    match params.get("n_jobs") {
        None | Some(Value::Null) => Ok(hint),
        Some(v) => v
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| invalid("n_jobs", format!("expected an integer, got {v}"))),
    }
}

fn read_max_features(params: &ModelParams, default: MaxFeatures) -> Result<MaxFeatures, ModelTrainingError> {
    match params.get("max_features") {
        None | Some(Value::Null) => Ok(default),
        Some(Value::String(s)) => match s.as_str() {
            "sqrt" => Ok(MaxFeatures::Sqrt),
            "log2" => Ok(MaxFeatures::Log2),
            "all" => Ok(MaxFeatures::All),
            other => Err(invalid("max_features", format!("unknown option '{other}'"))),
        },
        Some(v) if v.is_u64() => Ok(MaxFeatures::Fixed(v.as_u64().unwrap_or(1) as usize)),
        Some(v) => v
            .as_f64()
            .map(MaxFeatures::Fraction)
            .ok_or_else(|| invalid("max_features", format!("unsupported value {v}"))),
    }
}

// ============================================================================
// Factories
// ============================================================================

fn build_ridge(params: &ModelParams, _: i32) -> Result<Model, ModelTrainingError> {
    let alpha = read_f64(params, "alpha", 1.0)?;
    if alpha < 0.0 {
        return Err(invalid("alpha", "must be non-negative"));
    }
    Ok(Model::Linear(LinearRegression::ridge(alpha)))
}

fn build_lasso(params: &ModelParams, _: i32) -> Result<Model, ModelTrainingError> {
    let mut lasso = Lasso::new(read_f64(params, "alpha", 1.0)?);
    lasso.max_iter = read_usize(params, "max_iter", lasso.max_iter)?;
    lasso.tol = read_f64(params, "tol", lasso.tol)?;
    Ok(Model::Lasso(lasso))
}

fn build_logistic(params: &ModelParams, _: i32) -> Result<Model, ModelTrainingError> {
    let mut model = LogisticRegression::new();
    model.c = read_f64(params, "C", model.c)?;
    model.max_iter = read_usize(params, "max_iter", model.max_iter)?;
    model.tol = read_f64(params, "tol", model.tol)?;
    Ok(Model::Logistic(model))
}

fn build_naive_bayes(params: &ModelParams, _: i32) -> Result<Model, ModelTrainingError> {
    let mut model = GaussianNaiveBayes::new();
    model.var_smoothing = read_f64(params, "var_smoothing", model.var_smoothing)?;
    Ok(Model::NaiveBayes(model))
}

fn build_tree(task: ProblemType, params: &ModelParams, _: i32) -> Result<Model, ModelTrainingError> {
    let mut tree = DecisionTree::new(task).with_random_state(read_seed(params, 42)?);
    tree.max_depth = read_optional_usize(params, "max_depth")?;
    tree.min_samples_split = read_usize(params, "min_samples_split", tree.min_samples_split)?;
    tree.min_samples_leaf = read_usize(params, "min_samples_leaf", tree.min_samples_leaf)?;
    Ok(Model::Tree(tree))
}

fn build_forest(task: ProblemType, params: &ModelParams, hint: i32) -> Result<Model, ModelTrainingError> {
    let mut forest = RandomForest::new(task);
    forest.n_estimators = read_usize(params, "n_estimators", forest.n_estimators)?;
    forest.max_depth = read_optional_usize(params, "max_depth")?;
    forest.min_samples_split = read_usize(params, "min_samples_split", forest.min_samples_split)?;
    forest.min_samples_leaf = read_usize(params, "min_samples_leaf", forest.min_samples_leaf)?;
    forest.max_features = read_max_features(params, forest.max_features)?;
    forest.random_state = read_seed(params, forest.random_state)?;
    forest.n_jobs = read_jobs(params, hint)?;
    if let Some(v) = params.get("bootstrap") {
        forest.bootstrap = v
            .as_bool()
            .ok_or_else(|| invalid("bootstrap", format!("expected a boolean, got {v}")))?;
    }
    Ok(Model::Forest(forest))
}

fn build_boosting(task: ProblemType, params: &ModelParams, _: i32) -> Result<Model, ModelTrainingError> {
    let mut model = GradientBoosting::new(task);
    model.n_estimators = read_usize(params, "n_estimators", model.n_estimators)?;
    model.learning_rate = read_f64(params, "learning_rate", model.learning_rate)?;
    model.max_depth = read_usize(params, "max_depth", model.max_depth)?;
    model.subsample = read_f64(params, "subsample", model.subsample)?;
    model.random_state = read_seed(params, model.random_state)?;
    Ok(Model::Boosting(model))
}

fn build_knn(task: ProblemType, params: &ModelParams, _: i32) -> Result<Model, ModelTrainingError> {
    let weights = match params.get("weights").and_then(Value::as_str) {
        None | Some("uniform") => WeightScheme::Uniform,
        Some("distance") => WeightScheme::Distance,
        Some(other) => return Err(invalid("weights", format!("unknown scheme '{other}'"))),
    };
    let model = KNearestNeighbors::new(task)
        .with_n_neighbors(read_usize(params, "n_neighbors", 5)?)
        .with_weights(weights);
    Ok(Model::Knn(model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_registered_model_types() {
        let registry = ModelRegistry::with_defaults();
        assert_eq!(
            registry.available(ProblemType::Regression),
            vec![
                "decision_tree",
                "gradient_boosting",
                "knn",
                "lasso",
                "linear_regression",
                "random_forest",
                "ridge",
            ]
        );
        assert_eq!(
            registry.available(ProblemType::Classification),
            vec![
                "decision_tree",
                "gradient_boosting",
                "knn",
                "logistic_regression",
                "naive_bayes",
                "random_forest",
            ]
        );
    }

    #[test]
    fn test_unknown_model_lists_available() {
        let registry = ModelRegistry::with_defaults();
        let err = registry
            .create(ProblemType::Classification, "ridge", &ModelParams::new(), -1)
            .unwrap_err();
        match err {
            ModelTrainingError::UnknownModel { available, .. } => {
                assert!(available.contains(&"logistic_regression".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_defaults_are_applied_and_overridden() {
        let registry = ModelRegistry::with_defaults();
        let model = registry
            .create(ProblemType::Regression, "random_forest", &ModelParams::new(), 1)
            .unwrap();
        let Model::Forest(forest) = model else {
            panic!("expected a forest");
        };
        assert_eq!(forest.n_estimators, 100);
        assert_eq!(forest.max_depth, Some(10));
        assert_eq!(forest.n_jobs, -1);

        let user = params(json!({"n_estimators": 7, "max_depth": null}));
        let Model::Forest(forest) = registry
            .create(ProblemType::Regression, "random_forest", &user, 1)
            .unwrap()
        else {
            panic!("expected a forest");
        };
        assert_eq!(forest.n_estimators, 7);
        assert_eq!(forest.max_depth, None);
    }

    #[test]
    fn test_wrong_parameter_type() {
        let registry = ModelRegistry::with_defaults();
        let user = params(json!({"alpha": "strong"}));
        let err = registry
            .create(ProblemType::Regression, "ridge", &user, -1)
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PARAMETER");
    }

    #[test]
    fn test_unregistered_type_has_no_defaults() {
        let registry = ModelRegistry::with_defaults();
        assert!(registry.default_params("linear_regression").is_empty());
        assert_eq!(registry.default_params("knn")["n_neighbors"], json!(5));
    }
}
