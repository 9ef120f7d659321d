//! Shared data model: column health records, the dataset health report and
//! the problem type.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Problem Type
// ============================================================================

/// The kind of learning problem a target column implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemType {
    /// Predicting discrete classes.
    #[default]
    Classification,
    /// Predicting a continuous value.
    Regression,
}

impl ProblemType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemType::Classification => "classification",
            ProblemType::Regression => "regression",
        }
    }
}

impl fmt::Display for ProblemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProblemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "classification" => Ok(ProblemType::Classification),
            "regression" => Ok(ProblemType::Regression),
            other => Err(format!(
                "invalid problem type '{other}' (expected 'classification' or 'regression')"
            )),
        }
    }
}

// ============================================================================
// Column Health
// ============================================================================

/// Semantic type inferred from a column's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferredType {
    Numeric,
    Categorical,
    Datetime,
    Text,
    /// Too many nulls (or nothing at all) to infer anything.
    Invalid,
}

impl InferredType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            InferredType::Numeric => "numeric",
            InferredType::Categorical => "categorical",
            InferredType::Datetime => "datetime",
            InferredType::Text => "text",
            InferredType::Invalid => "invalid",
        }
    }

    /// Categorical and free text columns can only feed a classification target.
    #[must_use]
    pub fn is_discrete(&self) -> bool {
        matches!(self, InferredType::Categorical | InferredType::Text)
    }
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage type a column should be coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Int64,
    Float64,
    Datetime,
    String,
}

impl StorageType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Int64 => "int64",
            StorageType::Float64 => "float64",
            StorageType::Datetime => "datetime",
            StorageType::String => "string",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the validator should do with a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    Keep,
    Drop,
    Coerce,
}

/// Structured diagnosis of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnHealth {
    pub name: String,
    /// Declared polars dtype, e.g. `"str"` or `"i64"`.
    pub original_dtype: String,
    pub inferred_type: InferredType,
    pub null_count: usize,
    /// Null percentage in the 0-100 range.
    pub null_percentage: f64,
    pub unique_count: usize,
    /// Unique values divided by non-null values.
    pub cardinality_ratio: f64,
    pub has_mixed_types: bool,
    /// Up to five non-null values, rendered as strings.
    pub sample_values: Vec<String>,
    pub issues: Vec<String>,
    pub recommended_action: RecommendedAction,
    pub coerce_to: Option<StorageType>,
}

// ============================================================================
// Dataset Health Report
// ============================================================================

/// Outcome of validating a whole table.
///
/// Informational only: it is surfaced in logs, errors and preprocessing
/// metadata but never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetHealthReport {
    pub total_rows: usize,
    pub total_columns: usize,
    pub valid_columns: Vec<String>,
    pub dropped_columns: Vec<String>,
    pub coerced_columns: Vec<String>,
    pub column_reports: BTreeMap<String, ColumnHealth>,
    pub target_column_health: Option<ColumnHealth>,
    pub overall_issues: Vec<String>,
    pub is_valid: bool,
    pub recommended_problem_type: Option<ProblemType>,
}

impl DatasetHealthReport {
    /// Subset of the report that travels with preprocessing metadata.
    #[must_use]
    pub fn summary(&self) -> ValidationSummary {
        ValidationSummary {
            dropped_columns: self.dropped_columns.clone(),
            coerced_columns: self.coerced_columns.clone(),
            overall_issues: self.overall_issues.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub dropped_columns: Vec<String>,
    pub coerced_columns: Vec<String>,
    pub overall_issues: Vec<String>,
}
