//! Column health analysis.
//!
//! [`ColumnHealthAnalyzer`] inspects a single column, infers its semantic
//! type and recommends whether the validator should keep, drop or coerce it.
//!
//! Inference runs as a decision table over explicit conversion results:
//!
//! | step | condition                                  | inferred      |
//! |------|--------------------------------------------|---------------|
//! | 1    | null ratio >= `max_null_ratio`             | `invalid`     |
//! | 2    | declared datetime dtype                    | `datetime`    |
//! | 3    | numeric conversion rate > `numeric_rate`   | `numeric`     |
//! | 4    | every value parses as a date               | `datetime`    |
//! | 5    | unique ratio < 0.5 or unique count < 50    | `categorical` |
//! | 6    | otherwise                                  | `text`        |

use crate::config::AnalyzerThresholds;
use crate::types::{ColumnHealth, InferredType, RecommendedAction, StorageType};
use crate::utils::{
    all_datetimes, collect_sample_values, count_unique, is_datetime_dtype, string_values,
    to_numeric,
};
use polars::prelude::*;
use tracing::debug;

const SAMPLE_SIZE: usize = 5;

/// Type decision for the non-null part of a column.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TypeDecision {
    inferred: InferredType,
    has_mixed_types: bool,
    coerce_to: Option<StorageType>,
}

/// Analyzes columns against a fixed set of thresholds.
#[derive(Debug, Clone, Default)]
pub struct ColumnHealthAnalyzer {
    thresholds: AnalyzerThresholds,
}

impl ColumnHealthAnalyzer {
    pub fn new(thresholds: AnalyzerThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &AnalyzerThresholds {
        &self.thresholds
    }

    /// Produce the health record for one column.
    pub fn analyze(&self, series: &Series) -> PolarsResult<ColumnHealth> {
        let name = series.name().to_string();
        let original_dtype = series.dtype().to_string();
        let values = string_values(series)?;

        let n_total = values.len();
        let non_null = values.iter().flatten().count();
        let null_count = n_total - non_null;
        let null_ratio = if n_total > 0 {
            null_count as f64 / n_total as f64
        } else {
            1.0
        };
        let null_percentage = null_ratio * 100.0;
        let unique_count = count_unique(&values);
        let cardinality_ratio = if non_null > 0 {
            unique_count as f64 / non_null as f64
        } else {
            0.0
        };
        let sample_values = collect_sample_values(&values, SAMPLE_SIZE);

        let mut issues = Vec::new();

        if null_ratio >= self.thresholds.max_null_ratio {
            issues.push(format!("{null_percentage:.1}% null values"));
            debug!("Column '{}' is {:.1}% null, marking invalid", name, null_percentage);
            return Ok(ColumnHealth {
                name,
                original_dtype,
                inferred_type: InferredType::Invalid,
                null_count,
                null_percentage,
                unique_count,
                cardinality_ratio,
                has_mixed_types: false,
                sample_values,
                issues,
                recommended_action: RecommendedAction::Drop,
                coerce_to: None,
            });
        }

        let decision = self.infer_type(series, &values, unique_count, non_null)?;

        if unique_count <= 1 && non_null > 0 {
            issues.push(format!("Only {unique_count} unique value (zero variance)"));
        }
        if decision.inferred == InferredType::Categorical
            && cardinality_ratio > self.thresholds.max_cardinality_ratio
        {
            issues.push(format!("Very high cardinality ({unique_count} unique values)"));
        }
        if decision.has_mixed_types {
            issues.push("Contains mixed types".to_string());
        }

        let recommended_action = if unique_count <= 1 {
            RecommendedAction::Drop
        } else if decision
            .coerce_to
            .is_some_and(|target| storage_of(series.dtype()) != Some(target))
        {
            RecommendedAction::Coerce
        } else {
            RecommendedAction::Keep
        };

        Ok(ColumnHealth {
            name,
            original_dtype,
            inferred_type: decision.inferred,
            null_count,
            null_percentage,
            unique_count,
            cardinality_ratio,
            has_mixed_types: decision.has_mixed_types,
            sample_values,
            issues,
            recommended_action,
            coerce_to: decision.coerce_to,
        })
    }

    fn infer_type(
        &self,
        series: &Series,
        values: &[Option<String>],
        unique_count: usize,
        non_null: usize,
    ) -> PolarsResult<TypeDecision> {
        if non_null == 0 {
            return Ok(TypeDecision {
                inferred: InferredType::Invalid,
                has_mixed_types: false,
                coerce_to: None,
            });
        }

        if is_datetime_dtype(series.dtype()) {
            return Ok(TypeDecision {
                inferred: InferredType::Datetime,
                has_mixed_types: false,
                coerce_to: Some(StorageType::Datetime),
            });
        }

        let numeric = to_numeric(series)?;
        let rate = numeric.rate();
        if rate > self.thresholds.numeric_rate {
            let coerce_to = if numeric.is_integral() {
                StorageType::Int64
            } else {
                StorageType::Float64
            };
            return Ok(TypeDecision {
                inferred: InferredType::Numeric,
                has_mixed_types: rate < 1.0,
                coerce_to: Some(coerce_to),
            });
        }

        if all_datetimes(values) {
            return Ok(TypeDecision {
                inferred: InferredType::Datetime,
                has_mixed_types: false,
                coerce_to: Some(StorageType::Datetime),
            });
        }

        let unique_ratio = unique_count as f64 / non_null as f64;
        let inferred = if unique_ratio < self.thresholds.categorical_unique_ratio
            || unique_count < self.thresholds.categorical_max_unique
        {
            InferredType::Categorical
        } else {
            InferredType::Text
        };
        Ok(TypeDecision {
            inferred,
            has_mixed_types: false,
            coerce_to: Some(StorageType::String),
        })
    }
}

/// Storage type a polars dtype already satisfies, if any.
fn storage_of(dtype: &DataType) -> Option<StorageType> {
    match dtype {
        DataType::Int64 => Some(StorageType::Int64),
        DataType::Float64 => Some(StorageType::Float64),
        DataType::Datetime(_, _) => Some(StorageType::Datetime),
        DataType::String => Some(StorageType::String),
        _ => None,
    }
}
