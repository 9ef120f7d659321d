//! Configuration types for validation, problem-type detection, feature
//! encoding and train/test splitting.
//!
//! The hand-tuned thresholds of the heuristics live here as policy
//! parameters rather than constants. Use [`ProcessingConfig::builder()`] for
//! a validated configuration.

use serde::{Deserialize, Serialize};

/// Thresholds used by the column health analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerThresholds {
    /// Columns whose null ratio meets or exceeds this are invalid.
    /// Default: 0.95
    pub max_null_ratio: f64,

    /// Categorical columns above this unique/non-null ratio are flagged.
    /// Default: 0.95
    pub max_cardinality_ratio: f64,

    /// A column is numeric when more than this share of non-null values
    /// converts to a number.
    /// Default: 0.8
    pub numeric_rate: f64,

    /// Non-numeric columns below this unique ratio are categorical.
    /// Default: 0.5
    pub categorical_unique_ratio: f64,

    /// Non-numeric columns with fewer unique values than this are categorical.
    /// Default: 50
    pub categorical_max_unique: usize,
}

impl Default for AnalyzerThresholds {
    fn default() -> Self {
        Self {
            max_null_ratio: 0.95,
            max_cardinality_ratio: 0.95,
            numeric_rate: 0.8,
            categorical_unique_ratio: 0.5,
            categorical_max_unique: 50,
        }
    }
}

/// Policy for deciding classification vs. regression from a label vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProblemTypePolicy {
    /// Integral targets with fewer unique values than this are classes.
    /// Default: 20
    pub max_discrete_classes: usize,

    /// Targets whose unique/sample ratio is below this are classes.
    /// Default: 0.05
    pub low_cardinality_ratio: f64,

    /// Share of values that must parse as numbers for a raw target to count
    /// as numeric.
    /// Default: 0.8
    pub numeric_rate: f64,
}

impl Default for ProblemTypePolicy {
    fn default() -> Self {
        Self {
            max_discrete_classes: 20,
            low_cardinality_ratio: 0.05,
            numeric_rate: 0.8,
        }
    }
}

/// How the target encoder shrinks category means toward the global mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum TargetSmoothing {
    /// Empirical Bayes: shrink by the ratio of within-category variance to
    /// target variance.
    #[default]
    Auto,
    /// Fixed m-estimate weight.
    Fixed(f64),
}

/// Routing and encoder settings for the feature pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingConfig {
    /// Encode high-cardinality categoricals with the target encoder instead
    /// of a capped one-hot encoder.
    /// Default: false
    pub use_target_encoder: bool,

    /// Numeric columns with variance at or below this are removed.
    /// `0.0` disables the check.
    /// Default: 0.0
    pub variance_threshold: f64,

    /// Low-cardinality categoricals have at most this many unique values.
    /// Default: 50
    pub low_cardinality_max_unique: usize,

    /// Low-cardinality categoricals have at most this unique ratio.
    /// Default: 0.5
    pub low_cardinality_max_ratio: f64,

    /// Categoricals above this unique count are treated as identifiers.
    /// Default: 1000
    pub identifier_max_unique: usize,

    /// One-hot width cap for low-cardinality categoricals.
    /// Default: 100
    pub low_cardinality_max_categories: usize,

    /// One-hot width cap for high-cardinality categoricals.
    /// Default: 50
    pub high_cardinality_max_categories: usize,

    /// Constant used to impute missing categorical values.
    /// Default: "missing"
    pub categorical_fill_value: String,

    /// Target encoder smoothing.
    /// Default: Auto
    pub target_smoothing: TargetSmoothing,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            use_target_encoder: false,
            variance_threshold: 0.0,
            low_cardinality_max_unique: 50,
            low_cardinality_max_ratio: 0.5,
            identifier_max_unique: 1000,
            low_cardinality_max_categories: 100,
            high_cardinality_max_categories: 50,
            categorical_fill_value: "missing".to_string(),
            target_smoothing: TargetSmoothing::Auto,
        }
    }
}

/// Train/test split policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Requested test proportion, 0.1 to 0.5.
    /// Default: 0.2
    pub test_size: f64,

    /// The test partition is enlarged until it holds at least this many rows.
    /// Default: 5
    pub min_test_samples: usize,

    /// Lower bound for an enlarged test proportion.
    /// Default: 0.1
    pub min_test_fraction: f64,

    /// Stratify classification splits with fewer classes than this.
    /// Default: 20
    pub stratify_max_classes: usize,

    /// Seed for the shuffling RNG.
    /// Default: 42
    pub random_seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            min_test_samples: 5,
            min_test_fraction: 0.1,
            stratify_max_classes: 20,
            random_seed: 42,
        }
    }
}

/// Configuration for the whole validate → split → encode flow.
///
/// # Example
///
/// ```rust,ignore
/// use tabforge_processing::config::ProcessingConfig;
///
/// let config = ProcessingConfig::builder()
///     .test_size(0.25)
///     .use_target_encoder(true)
///     .build()?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProcessingConfig {
    pub analyzer: AnalyzerThresholds,
    pub problem_type: ProblemTypePolicy,
    pub validator: ValidatorConfig,
    pub encoding: EncodingConfig,
    pub split: SplitConfig,
}

/// Dataset-level validator settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Minimum rows that must survive cleaning.
    /// Default: 10
    pub min_rows: usize,

    /// Numeric classification targets with fewer unique values than this are
    /// stringified.
    /// Default: 20
    pub target_discrete_max_unique: usize,

    /// Share of dropped columns (or removed rows) above which a dataset-level
    /// warning is recorded.
    /// Default: 0.5
    pub loss_warning_ratio: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_rows: 10,
            target_discrete_max_unique: 20,
            loss_warning_ratio: 0.5,
        }
    }
}

impl ProcessingConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProcessingConfigBuilder {
        ProcessingConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let ratios = [
            ("max_null_ratio", self.analyzer.max_null_ratio),
            ("max_cardinality_ratio", self.analyzer.max_cardinality_ratio),
            ("numeric_rate", self.analyzer.numeric_rate),
            ("categorical_unique_ratio", self.analyzer.categorical_unique_ratio),
            ("low_cardinality_ratio", self.problem_type.low_cardinality_ratio),
            ("low_cardinality_max_ratio", self.encoding.low_cardinality_max_ratio),
            ("loss_warning_ratio", self.validator.loss_warning_ratio),
            ("min_test_fraction", self.split.min_test_fraction),
        ];
        for (field, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigValidationError::InvalidThreshold {
                    field: field.to_string(),
                    value,
                });
            }
        }

        if !(0.1..=0.5).contains(&self.split.test_size) {
            return Err(ConfigValidationError::InvalidTestSize(self.split.test_size));
        }

        if self.encoding.variance_threshold < 0.0 {
            return Err(ConfigValidationError::InvalidThreshold {
                field: "variance_threshold".to_string(),
                value: self.encoding.variance_threshold,
            });
        }

        if self.encoding.low_cardinality_max_categories < 2
            || self.encoding.high_cardinality_max_categories < 2
        {
            return Err(ConfigValidationError::InvalidCategoryCap);
        }

        if let TargetSmoothing::Fixed(m) = self.encoding.target_smoothing {
            if m < 0.0 {
                return Err(ConfigValidationError::InvalidThreshold {
                    field: "target_smoothing".to_string(),
                    value: m,
                });
            }
        }

        if self.validator.min_rows == 0 {
            return Err(ConfigValidationError::InvalidMinRows);
        }

        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid threshold for '{field}': {value} (must be between 0.0 and 1.0)")]
    InvalidThreshold { field: String, value: f64 },

    #[error("Invalid test size: {0} (must be between 0.1 and 0.5)")]
    InvalidTestSize(f64),

    #[error("One-hot category caps must be at least 2")]
    InvalidCategoryCap,

    #[error("Minimum row count must be at least 1")]
    InvalidMinRows,
}

/// Builder for [`ProcessingConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct ProcessingConfigBuilder {
    analyzer: Option<AnalyzerThresholds>,
    problem_type: Option<ProblemTypePolicy>,
    min_rows: Option<usize>,
    use_target_encoder: Option<bool>,
    variance_threshold: Option<f64>,
    target_smoothing: Option<TargetSmoothing>,
    test_size: Option<f64>,
    random_seed: Option<u64>,
}

impl ProcessingConfigBuilder {
    /// Replace the analyzer thresholds.
    pub fn analyzer(mut self, thresholds: AnalyzerThresholds) -> Self {
        self.analyzer = Some(thresholds);
        self
    }

    /// Replace the problem-type policy.
    pub fn problem_type_policy(mut self, policy: ProblemTypePolicy) -> Self {
        self.problem_type = Some(policy);
        self
    }

    /// Minimum rows that must survive validation.
    pub fn min_rows(mut self, rows: usize) -> Self {
        self.min_rows = Some(rows);
        self
    }

    /// Use the target encoder for high-cardinality categoricals.
    pub fn use_target_encoder(mut self, enable: bool) -> Self {
        self.use_target_encoder = Some(enable);
        self
    }

    /// Drop numeric features with variance at or below `threshold`.
    pub fn variance_threshold(mut self, threshold: f64) -> Self {
        self.variance_threshold = Some(threshold);
        self
    }

    pub fn target_smoothing(mut self, smoothing: TargetSmoothing) -> Self {
        self.target_smoothing = Some(smoothing);
        self
    }

    /// Requested test proportion (0.1 to 0.5).
    pub fn test_size(mut self, size: f64) -> Self {
        self.test_size = Some(size);
        self
    }

    pub fn random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `ProcessingConfig` or an error if validation fails.
    pub fn build(self) -> Result<ProcessingConfig, ConfigValidationError> {
        let mut config = ProcessingConfig::default();
        if let Some(analyzer) = self.analyzer {
            config.analyzer = analyzer;
        }
        if let Some(policy) = self.problem_type {
            config.problem_type = policy;
        }
        if let Some(rows) = self.min_rows {
            config.validator.min_rows = rows;
        }
        config.encoding.use_target_encoder = self.use_target_encoder.unwrap_or(false);
        config.encoding.variance_threshold = self.variance_threshold.unwrap_or(0.0);
        config.encoding.target_smoothing = self.target_smoothing.unwrap_or_default();
        config.split.test_size = self.test_size.unwrap_or(0.2);
        config.split.random_seed = self.random_seed.unwrap_or(42);

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProcessingConfig::default();
        assert_eq!(config.analyzer.max_null_ratio, 0.95);
        assert_eq!(config.analyzer.numeric_rate, 0.8);
        assert_eq!(config.problem_type.max_discrete_classes, 20);
        assert_eq!(config.problem_type.low_cardinality_ratio, 0.05);
        assert_eq!(config.validator.min_rows, 10);
        assert_eq!(config.encoding.categorical_fill_value, "missing");
        assert_eq!(config.split.random_seed, 42);
        assert!(!config.encoding.use_target_encoder);
    }

    #[test]
    fn test_builder_custom_values() {
        let config = ProcessingConfig::builder()
            .test_size(0.3)
            .use_target_encoder(true)
            .variance_threshold(0.01)
            .min_rows(20)
            .build()
            .unwrap();

        assert_eq!(config.split.test_size, 0.3);
        assert!(config.encoding.use_target_encoder);
        assert_eq!(config.encoding.variance_threshold, 0.01);
        assert_eq!(config.validator.min_rows, 20);
    }

    #[test]
    fn test_validation_invalid_test_size() {
        let result = ProcessingConfig::builder().test_size(0.7).build();
        assert!(matches!(
            result.unwrap_err(),
            ConfigValidationError::InvalidTestSize(_)
        ));
    }

    #[test]
    fn test_validation_invalid_threshold() {
        let thresholds = AnalyzerThresholds {
            max_null_ratio: 1.5,
            ..AnalyzerThresholds::default()
        };
        let result = ProcessingConfig::builder().analyzer(thresholds).build();
        assert!(matches!(
            result.unwrap_err(),
            ConfigValidationError::InvalidThreshold { .. }
        ));
    }

    #[test]
    fn test_config_deserialization() {
        let json = serde_json::to_string(&ProcessingConfig::default()).unwrap();
        let parsed: ProcessingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ProcessingConfig::default());
    }
}
