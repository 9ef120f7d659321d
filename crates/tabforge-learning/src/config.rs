//! Configuration types for a training job.
//!
//! This module provides [`TrainingConfig`] and its builder, plus the
//! [`ModelChoice`], [`ProblemTypeChoice`] and [`AutoSelectConfig`] types.
//!
//! # Example
//!
//! ```
//! use tabforge_learning::{ModelChoice, TrainingConfig};
//!
//! let config = TrainingConfig::builder()
//!     .target_column("price")
//!     .model(ModelChoice::named("ridge"))
//!     .use_polynomial(true)
//!     .polynomial_degree(3)
//!     .build()
//!     .expect("valid config");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tabforge_processing::{ProblemType, ProcessingConfig};

/// Hyperparameters for one estimator, keyed by parameter name.
pub type ModelParams = BTreeMap<String, serde_json::Value>;

/// Which estimator to train.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ModelChoice {
    /// Delegate to the automated selector.
    #[default]
    Auto,
    /// A registered model type such as `"random_forest"`.
    Named(String),
}

impl ModelChoice {
    #[must_use]
    pub fn named(model_type: impl Into<String>) -> Self {
        ModelChoice::Named(model_type.into())
    }

    /// Parse a CLI-style value: `"auto"` or a model type name.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("auto") {
            ModelChoice::Auto
        } else {
            ModelChoice::Named(value.to_string())
        }
    }
}

/// Problem type requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ProblemTypeChoice {
    /// Detect from the training labels.
    #[default]
    Auto,
    /// Use this problem type; a disagreeing detection is only logged.
    Fixed(ProblemType),
}

/// Settings for the automated multi-candidate search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoSelectConfig {
    /// Wall-clock budget for the search in seconds (default: 60).
    pub time_budget_secs: u64,

    /// Candidate families (default: `["lgbm", "xgboost", "rf"]`).
    pub candidates: Vec<String>,

    /// Optimization metric. `None` picks `r2` for regression and `accuracy`
    /// for classification.
    pub metric: Option<String>,
}

impl Default for AutoSelectConfig {
    fn default() -> Self {
        Self {
            time_budget_secs: 60,
            candidates: vec!["lgbm".to_string(), "xgboost".to_string(), "rf".to_string()],
            metric: None,
        }
    }
}

impl AutoSelectConfig {
    /// The metric to optimize for `problem_type`.
    #[must_use]
    pub fn metric_for(&self, problem_type: ProblemType) -> &str {
        match (&self.metric, problem_type) {
            (Some(metric), _) => metric,
            (None, ProblemType::Regression) => "r2",
            (None, ProblemType::Classification) => "accuracy",
        }
    }
}

/// Configuration for one training job.
///
/// Use [`TrainingConfig::builder()`] to construct a configuration with the
/// builder pattern.
///
/// # Validation
///
/// [`build()`](TrainingConfigBuilder::build) checks that:
/// - `target_column` is not empty
/// - `polynomial_degree` is in `2..=5`
/// - an explicit `model_name` is not blank
/// - the automated search has a positive time budget and at least one candidate
/// - the embedded [`ProcessingConfig`] is valid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Name of the target column in the dataset.
    pub target_column: String,

    /// Manual model type or automated selection (default: auto).
    pub model: ModelChoice,

    /// Requested problem type (default: auto).
    pub problem_type: ProblemTypeChoice,

    /// Expand features polynomially before fitting (regression only).
    pub use_polynomial: bool,

    /// Degree of the polynomial expansion (default: 2).
    pub polynomial_degree: usize,

    /// Estimator parameters. Empty means the registry defaults.
    pub model_params: ModelParams,

    /// Requested model name.
    pub model_name: Option<String>,

    /// Generate a unique name even when `model_name` is set; it is then
    /// used as the base name.
    pub auto_generate_name: bool,

    /// Parallelism hint passed to estimators (default: -1 for all cores).
    ///
    /// - `-1`: Use all available CPU cores
    /// - `1`: Single-threaded
    /// - `n > 1`: Use exactly `n` cores
    pub n_jobs: i32,

    /// Automated-selection settings, used when `model` is [`ModelChoice::Auto`].
    pub auto_select: AutoSelectConfig,

    /// Validation, encoding and split settings.
    pub processing: ProcessingConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            target_column: String::new(),
            model: ModelChoice::default(),
            problem_type: ProblemTypeChoice::default(),
            use_polynomial: false,
            polynomial_degree: 2,
            model_params: ModelParams::new(),
            model_name: None,
            auto_generate_name: false,
            n_jobs: -1,
            auto_select: AutoSelectConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Create a new builder for `TrainingConfig`.
    #[must_use]
    pub fn builder() -> TrainingConfigBuilder {
        TrainingConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.target_column.trim().is_empty() {
            return Err(ConfigValidationError::MissingTarget);
        }
        if !(2..=5).contains(&self.polynomial_degree) {
            return Err(ConfigValidationError::InvalidPolynomialDegree(
                self.polynomial_degree,
            ));
        }
        if let Some(name) = &self.model_name {
            if name.trim().is_empty() {
                return Err(ConfigValidationError::EmptyModelName);
            }
        }
        if let ModelChoice::Named(model_type) = &self.model {
            if model_type.trim().is_empty() {
                return Err(ConfigValidationError::EmptyModelType);
            }
        }
        if self.model == ModelChoice::Auto {
            if self.auto_select.time_budget_secs == 0 {
                return Err(ConfigValidationError::InvalidTimeBudget);
            }
            if self.auto_select.candidates.is_empty() {
                return Err(ConfigValidationError::NoCandidates);
            }
        }
        if self.n_jobs == 0 || self.n_jobs < -1 {
            return Err(ConfigValidationError::InvalidJobs(self.n_jobs));
        }
        self.processing.validate()?;
        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigValidationError {
    #[error("target_column must be set")]
    MissingTarget,

    #[error("polynomial_degree must be between 2 and 5, got {0}")]
    InvalidPolynomialDegree(usize),

    #[error("model_name must not be blank")]
    EmptyModelName,

    #[error("model type must not be blank")]
    EmptyModelType,

    #[error("auto-selection time budget must be at least 1 second")]
    InvalidTimeBudget,

    #[error("auto-selection needs at least one candidate")]
    NoCandidates,

    #[error("n_jobs must be -1 or a positive number, got {0}")]
    InvalidJobs(i32),

    #[error(transparent)]
    Processing(#[from] tabforge_processing::ConfigValidationError),
}

/// Builder for [`TrainingConfig`].
///
/// Created via [`TrainingConfig::builder()`]. All setters return `self` to
/// allow method chaining.
#[derive(Debug, Clone, Default)]
pub struct TrainingConfigBuilder {
    config: TrainingConfig,
}

impl TrainingConfigBuilder {
    /// Set the target column name.
    #[must_use]
    pub fn target_column(mut self, column: impl Into<String>) -> Self {
        self.config.target_column = column.into();
        self
    }

    #[must_use]
    pub fn model(mut self, model: ModelChoice) -> Self {
        self.config.model = model;
        self
    }

    #[must_use]
    pub fn problem_type(mut self, problem_type: ProblemTypeChoice) -> Self {
        self.config.problem_type = problem_type;
        self
    }

    /// Enable polynomial features for regression models.
    #[must_use]
    pub fn use_polynomial(mut self, enable: bool) -> Self {
        self.config.use_polynomial = enable;
        self
    }

    /// Set the polynomial degree (default: 2).
    ///
    /// [`build()`](Self::build) returns an error outside `2..=5`.
    #[must_use]
    pub fn polynomial_degree(mut self, degree: usize) -> Self {
        self.config.polynomial_degree = degree;
        self
    }

    /// Replace the estimator parameters.
    #[must_use]
    pub fn model_params(mut self, params: ModelParams) -> Self {
        self.config.model_params = params;
        self
    }

    /// Set a single estimator parameter.
    #[must_use]
    pub fn model_param(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.model_params.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.config.model_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn auto_generate_name(mut self, enable: bool) -> Self {
        self.config.auto_generate_name = enable;
        self
    }

    /// Set the number of parallel jobs (default: -1 for all cores).
    #[must_use]
    pub fn n_jobs(mut self, jobs: i32) -> Self {
        self.config.n_jobs = jobs;
        self
    }

    #[must_use]
    pub fn auto_select(mut self, auto_select: AutoSelectConfig) -> Self {
        self.config.auto_select = auto_select;
        self
    }

    /// Replace the validation, encoding and split settings.
    #[must_use]
    pub fn processing(mut self, processing: ProcessingConfig) -> Self {
        self.config.processing = processing;
        self
    }

    /// Build the configuration, validating all settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValidationError`] if any setting is out of range. See
    /// [`TrainingConfig`] for the checked constraints.
    pub fn build(self) -> Result<TrainingConfig, ConfigValidationError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
