//! Error types for the tabforge-learning crate.
//!
//! [`ModelTrainingError`] covers everything that can go wrong once a dataset
//! has been prepared: estimator construction, fitting, prediction, metrics and
//! model naming. [`TabforgeError`] is the boundary type returned by the
//! orchestrator; it wraps every layer's error unchanged so callers can tell
//! bad input apart from internal failures with [`TabforgeError::is_bad_input`].
//!
//! # Example
//!
//! ```rust,ignore
//! use tabforge_learning::{TabforgeError, TrainingConfig};
//!
//! fn configure() -> Result<TrainingConfig, TabforgeError> {
//!     // Configuration errors convert with ?
//!     let config = TrainingConfig::builder()
//!         .target_column("price")
//!         .build()?;
//!     Ok(config)
//! }
//! ```

use serde::Serialize;
use serde::ser::SerializeStruct;
use tabforge_processing::{LabelEncodingError, PreprocessingError, ValidationError};
use thiserror::Error;

use crate::estimators::EstimatorError;

/// Model construction, fitting, evaluation or naming failed.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ModelTrainingError {
    /// `train` was called before a model was initialized.
    #[error("Model not initialized")]
    NotInitialized,

    /// No estimator is registered for this problem type and model type.
    #[error("Unknown {problem_type} model type '{model_type}'. Available: {available:?}")]
    UnknownModel {
        problem_type: String,
        model_type: String,
        available: Vec<String>,
    },

    /// A classification model was requested for labels that look continuous.
    #[error(
        "Classification model selected but target appears to be continuous. \
         Found {unique} unique values. Please use regression models or verify your target column."
    )]
    ProblemTypeMismatch { unique: usize },

    /// A model parameter has the wrong type or an out-of-range value.
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The estimator failed while fitting.
    #[error("Model fitting failed: {0}")]
    FitFailed(String),

    /// The estimator failed while predicting.
    #[error("Prediction failed: {0}")]
    PredictFailed(String),

    /// Metrics could not be computed from the predictions.
    #[error("Metric calculation failed: {0}")]
    MetricFailed(String),

    /// Classification labels could not be encoded.
    #[error(transparent)]
    LabelEncoding(#[from] LabelEncodingError),

    /// An explicitly requested model name is already used by this user.
    #[error("Model name '{0}' already exists")]
    NameTaken(String),

    /// No free model name was found.
    #[error("Unable to generate unique model name for '{base}' after {attempts} attempts")]
    NameExhausted { base: String, attempts: usize },

    /// The feature matrix does not have the width the model was fitted on.
    #[error("Feature mismatch: expected {expected} features, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },

    /// The automated selector could not produce a model.
    #[error("Automated model selection failed: {0}")]
    SelectionFailed(String),
}

impl ModelTrainingError {
    /// Get error code for boundary handling.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "MODEL_NOT_INITIALIZED",
            Self::UnknownModel { .. } => "UNKNOWN_MODEL",
            Self::ProblemTypeMismatch { .. } => "PROBLEM_TYPE_MISMATCH",
            Self::InvalidParameter { .. } => "INVALID_PARAMETER",
            Self::FitFailed(_) => "FIT_FAILED",
            Self::PredictFailed(_) => "PREDICT_FAILED",
            Self::MetricFailed(_) => "METRIC_FAILED",
            Self::LabelEncoding(e) => e.error_code(),
            Self::NameTaken(_) => "NAME_TAKEN",
            Self::NameExhausted { .. } => "NAME_EXHAUSTED",
            Self::FeatureMismatch { .. } => "FEATURE_MISMATCH",
            Self::SelectionFailed(_) => "SELECTION_FAILED",
        }
    }

    pub(crate) fn fit(err: EstimatorError) -> Self {
        match err {
            EstimatorError::InvalidParameter { name, reason } => {
                Self::InvalidParameter { name, reason }
            }
            other => Self::FitFailed(other.to_string()),
        }
    }

    pub(crate) fn predict(err: EstimatorError) -> Self {
        match err {
            EstimatorError::ShapeMismatch { expected, actual } => Self::FeatureMismatch {
                expected,
                actual,
            },
            other => Self::PredictFailed(other.to_string()),
        }
    }
}

/// Failure reported by an external storage collaborator.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StorageError {
    /// Nothing is stored under this path or key.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backing store rejected or failed the operation.
    #[error("Storage backend error at '{path}': {message}")]
    Backend { path: String, message: String },

    #[error("I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.into())
        } else {
            Self::Io {
                path: path.into(),
                source,
            }
        }
    }
}

/// Boundary error for a full training job.
///
/// Typed errors from each layer pass through unchanged; use
/// [`is_bad_input`](Self::is_bad_input) to decide between a client error and
/// an internal failure.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TabforgeError {
    /// The raw dataset or target could not be validated.
    #[error(transparent)]
    Validation(ValidationError),

    /// Feature preprocessing failed.
    #[error(transparent)]
    Preprocessing(PreprocessingError),

    /// Model training, evaluation or naming failed.
    #[error(transparent)]
    ModelTraining(#[from] ModelTrainingError),

    /// Label encoding failed outside the trainer.
    #[error(transparent)]
    LabelEncoding(#[from] LabelEncodingError),

    /// Dataset, artifact or metadata storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A bundle, snapshot or record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TabforgeError {
    /// Whether the failure was caused by the caller's data or configuration.
    #[must_use]
    pub fn is_bad_input(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Preprocessing(_) | Self::InvalidConfig(_)
        )
    }

    /// Get error code for boundary handling.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.error_code(),
            Self::Preprocessing(e) => e.error_code(),
            Self::ModelTraining(e) => e.error_code(),
            Self::LabelEncoding(e) => e.error_code(),
            Self::Storage(StorageError::NotFound(_)) => "NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

impl From<ValidationError> for TabforgeError {
    fn from(err: ValidationError) -> Self {
        TabforgeError::Validation(err)
    }
}

impl From<PreprocessingError> for TabforgeError {
    fn from(err: PreprocessingError) -> Self {
        match err {
            PreprocessingError::Validation(inner) => TabforgeError::Validation(inner),
            other => TabforgeError::Preprocessing(other),
        }
    }
}

impl From<polars::error::PolarsError> for TabforgeError {
    fn from(err: polars::error::PolarsError) -> Self {
        TabforgeError::Preprocessing(PreprocessingError::Polars(err))
    }
}

impl From<crate::config::ConfigValidationError> for TabforgeError {
    fn from(err: crate::config::ConfigValidationError) -> Self {
        TabforgeError::InvalidConfig(err.to_string())
    }
}

impl From<tabforge_processing::ConfigValidationError> for TabforgeError {
    fn from(err: tabforge_processing::ConfigValidationError) -> Self {
        TabforgeError::InvalidConfig(err.to_string())
    }
}

macro_rules! serialize_with_code {
    ($($ty:ident),*) => {
        $(
            impl Serialize for $ty {
                fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
                where
                    S: serde::Serializer,
                {
                    let mut state = serializer.serialize_struct(stringify!($ty), 2)?;
                    state.serialize_field("code", &self.error_code())?;
                    state.serialize_field("message", &self.to_string())?;
                    state.end()
                }
            }
        )*
    };
}

serialize_with_code!(ModelTrainingError, TabforgeError);

/// Result type alias for boundary operations.
pub type Result<T> = std::result::Result<T, TabforgeError>;

static_assertions::assert_impl_all!(TabforgeError: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_inside_preprocessing_is_unwrapped() {
        let err: TabforgeError =
            PreprocessingError::Validation(ValidationError::EmptyDataset).into();
        assert!(matches!(err, TabforgeError::Validation(ValidationError::EmptyDataset)));
        assert!(err.is_bad_input());
        assert_eq!(err.error_code(), "EMPTY_DATASET");
    }

    #[test]
    fn test_training_errors_are_internal() {
        let err: TabforgeError = ModelTrainingError::FitFailed("singular".to_string()).into();
        assert!(!err.is_bad_input());
        assert_eq!(err.error_code(), "FIT_FAILED");
    }

    #[test]
    fn test_estimator_errors_map_to_training_errors() {
        let err = ModelTrainingError::predict(EstimatorError::ShapeMismatch {
            expected: 4,
            actual: 3,
        });
        assert!(matches!(
            err,
            ModelTrainingError::FeatureMismatch { expected: 4, actual: 3 }
        ));

        let err = ModelTrainingError::fit(EstimatorError::NotFitted);
        assert_eq!(err.error_code(), "FIT_FAILED");
    }

    #[test]
    fn test_error_serialization() {
        let err = TabforgeError::from(ModelTrainingError::NameTaken("churn_rf".to_string()));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "NAME_TAKEN");
        assert_eq!(json["message"], "Model name 'churn_rf' already exists");
    }

    #[test]
    fn test_storage_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = TabforgeError::from(StorageError::io("u1/models/a.json", io));
        assert_eq!(err.error_code(), "NOT_FOUND");
    }
}
