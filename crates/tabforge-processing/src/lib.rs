//! Defensive dataset validation and feature preprocessing.
//!
//! Turns a raw, untrusted table into a numeric feature matrix that a model can
//! be fit on, without crashing on mixed types, all-null columns,
//! high-cardinality categoricals or tiny datasets.
//!
//! # Overview
//!
//! - **Column health**: per-column type inference and keep/drop/coerce
//!   recommendations ([`ColumnHealthAnalyzer`])
//! - **Validation**: whole-table cleaning with a structured health report
//!   ([`DatasetValidator`])
//! - **Problem type**: one shared classification-vs-regression heuristic
//!   ([`ProblemTypeClassifier`])
//! - **Feature encoding**: cardinality-aware routing into numeric, one-hot and
//!   target-encoded groups, fit on training rows only ([`FeaturePipeline`])
//! - **Label encoding**: class indices that tolerate labels unseen during fit
//!   ([`SafeLabelEncoder`])
//! - **Splitting**: seeded, optionally stratified train/test splits that grow
//!   the test partition for small datasets
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tabforge_processing::{ProcessingConfig, preprocess_data, read_csv_bytes};
//!
//! let df = read_csv_bytes(&std::fs::read("houses.csv")?)?;
//!
//! let config = ProcessingConfig::builder()
//!     .test_size(0.25)
//!     .use_target_encoder(true)
//!     .build()?;
//!
//! let prepared = preprocess_data(&df, "price", &config)?;
//! println!("Problem type: {}", prepared.metadata.problem_type);
//! println!("Features: {:?}", prepared.feature_names);
//! ```
//!
//! # Validation only
//!
//! ```rust,ignore
//! use tabforge_processing::{DatasetValidator, ProcessingConfig};
//!
//! let validator = DatasetValidator::new(&ProcessingConfig::default());
//! let (cleaned, report) = validator.validate_and_clean(&df, Some("label"))?;
//!
//! for column in &report.dropped_columns {
//!     println!("dropped {column}: {:?}", report.column_reports[column].issues);
//! }
//! ```

pub mod analyzer;
pub mod config;
pub mod encoding;
pub mod error;
pub mod label_encoder;
pub mod preprocess;
pub mod problem_type;
pub mod split;
pub mod types;
pub mod utils;
pub mod validator;

// Re-exports for convenient access
pub use analyzer::ColumnHealthAnalyzer;
pub use config::{
    AnalyzerThresholds, ConfigValidationError, EncodingConfig, ProblemTypePolicy,
    ProcessingConfig, ProcessingConfigBuilder, SplitConfig, TargetSmoothing, ValidatorConfig,
};
pub use encoding::{ColumnRouting, FeaturePipeline, RemovalReason, RemovedFeature};
pub use error::{
    LabelEncodingError, PreprocessingError, Result as PreprocessingResult, ResultExt,
    ValidationError,
};
pub use label_encoder::{
    EncoderStats, EncodingStats, IssueSeverity, LabelDistributionReport, LabelIssue,
    LabelIssueKind, SafeLabelEncoder, TransformStats, UNKNOWN_VALUE, UnknownLabelStrategy,
    safe_encode_labels, validate_label_distribution,
};
pub use preprocess::{PreparedData, PreprocessingMetadata, preprocess_data};
pub use problem_type::{
    DecisionReason, ProblemTypeClassifier, ProblemTypeDecision, TargetAnalysis, TargetWarning,
    WarningLevel, analyze_target_column,
};
pub use split::{DataSplit, train_test_split};
pub use types::{
    ColumnHealth, DatasetHealthReport, InferredType, ProblemType, RecommendedAction, StorageType,
    ValidationSummary,
};
pub use utils::{TextEncoding, decode_text, read_csv_bytes, string_values, to_numeric};
pub use validator::DatasetValidator;
