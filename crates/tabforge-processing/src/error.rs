//! Error types for dataset validation, preprocessing and label encoding.
//!
//! Each layer owns one `thiserror` enum:
//!
//! - [`ValidationError`]: the raw table or the requested target cannot be salvaged.
//! - [`PreprocessingError`]: feature routing, fitting or transforming failed.
//! - [`LabelEncodingError`]: classification labels could not be encoded.
//!
//! Errors serialize as `{ code, message }` so a boundary layer can hand them
//! to clients unchanged.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The raw dataset (or its target column) is malformed, empty or unsalvageable.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The input table has no rows or no columns.
    #[error("Dataset is empty")]
    EmptyDataset,

    /// The requested target column does not exist.
    #[error("Target column '{0}' not found in dataset")]
    TargetNotFound(String),

    /// Every feature column was dropped during cleaning.
    #[error("No valid feature columns remain after cleaning (dropped: {dropped:?})")]
    NoFeatureColumns { dropped: Vec<String> },

    /// Too few rows survived cleaning to train anything.
    #[error(
        "Only {remaining} valid rows remain - insufficient for training (minimum: {minimum}, dropped columns: {dropped_columns:?})"
    )]
    InsufficientRows {
        remaining: usize,
        minimum: usize,
        dropped_columns: Vec<String>,
    },

    /// Polars error raised while cleaning.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),
}

impl ValidationError {
    /// Get error code for boundary handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyDataset => "EMPTY_DATASET",
            Self::TargetNotFound(_) => "TARGET_NOT_FOUND",
            Self::NoFeatureColumns { .. } => "NO_FEATURE_COLUMNS",
            Self::InsufficientRows { .. } => "INSUFFICIENT_ROWS",
            Self::Polars(_) => "POLARS_ERROR",
        }
    }
}

/// Feature preprocessing failed.
#[derive(Error, Debug)]
pub enum PreprocessingError {
    /// Validation of the raw table failed before preprocessing started.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Column routing left nothing to transform.
    #[error("No valid features found for preprocessing. Removed features: {removed:?}")]
    NoUsableFeatures { removed: Vec<String> },

    /// `transform` was called before `fit`.
    #[error("Feature pipeline must be fitted before transform")]
    NotFitted,

    /// Target encoding was requested without training targets.
    #[error("Target encoding requires the training target")]
    TargetRequired,

    /// Column was not found in the dataset.
    #[error("Column '{0}' not found in dataset")]
    ColumnNotFound(String),

    /// Fitting on the training partition failed.
    #[error("Preprocessing fit failed: {0}")]
    FitFailed(String),

    /// Transforming a partition failed.
    #[error("Transform failed: {0}")]
    TransformFailed(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PreprocessingError>,
    },
}

impl PreprocessingError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PreprocessingError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Get error code for boundary handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.error_code(),
            Self::NoUsableFeatures { .. } => "NO_USABLE_FEATURES",
            Self::NotFitted => "NOT_FITTED",
            Self::TargetRequired => "TARGET_REQUIRED",
            Self::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            Self::FitFailed(_) => "FIT_FAILED",
            Self::TransformFailed(_) => "TRANSFORM_FAILED",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Polars(_) => "POLARS_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }
}

/// Classification labels could not be encoded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LabelEncodingError {
    /// Fit received no non-null labels.
    #[error("Cannot fit SafeLabelEncoder with all null values")]
    EmptyFit,

    /// `transform` was called before `fit`.
    #[error("SafeLabelEncoder must be fitted before transform")]
    NotFitted,

    /// A label absent from the training vocabulary under the `Error` strategy.
    #[error("Label '{label}' not seen during training. Known labels: {known:?}")]
    UnseenLabel { label: String, known: Vec<String> },

    /// A null label under the `Error` strategy.
    #[error("Null value encountered at index {index}")]
    NullLabel { index: usize },
}

impl LabelEncodingError {
    /// Get error code for boundary handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyFit => "EMPTY_LABELS",
            Self::NotFitted => "NOT_FITTED",
            Self::UnseenLabel { .. } => "UNSEEN_LABEL",
            Self::NullLabel { .. } => "NULL_LABEL",
        }
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

serialize_with_code!(ValidationError, PreprocessingError, LabelEncodingError);

/// Result type alias for preprocessing operations.
pub type Result<T> = std::result::Result<T, PreprocessingError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PreprocessingError::Polars(e).with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ValidationError::EmptyDataset.error_code(), "EMPTY_DATASET");
        assert_eq!(PreprocessingError::NotFitted.error_code(), "NOT_FITTED");
        assert_eq!(
            LabelEncodingError::NullLabel { index: 3 }.error_code(),
            "NULL_LABEL"
        );
    }

    #[test]
    fn test_insufficient_rows_surfaces_report_facts() {
        let error = ValidationError::InsufficientRows {
            remaining: 4,
            minimum: 10,
            dropped_columns: vec!["empty".to_string()],
        };
        let message = error.to_string();
        assert!(message.contains("Only 4 valid rows"));
        assert!(message.contains("empty"));
    }

    #[test]
    fn test_error_serialization() {
        let error = ValidationError::TargetNotFound("price".to_string());
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("TARGET_NOT_FOUND"));
        assert!(json.contains("price"));
    }

    #[test]
    fn test_with_context() {
        let error = PreprocessingError::ColumnNotFound("age".to_string())
            .with_context("During numeric imputation");
        assert!(error.to_string().contains("During numeric imputation"));
        assert_eq!(error.error_code(), "COLUMN_NOT_FOUND");
    }
}
