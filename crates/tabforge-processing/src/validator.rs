//! Dataset validation and cleaning.
//!
//! [`DatasetValidator::validate_and_clean`] runs the column health analyzer
//! over every column, drops and coerces feature columns as recommended,
//! normalizes the target for the detected problem type and removes rows with
//! a missing target.

use crate::analyzer::ColumnHealthAnalyzer;
use crate::config::{ProcessingConfig, ValidatorConfig};
use crate::error::ValidationError;
use crate::problem_type::ProblemTypeClassifier;
use crate::types::{
    ColumnHealth, DatasetHealthReport, InferredType, ProblemType, RecommendedAction, StorageType,
};
use crate::utils::{is_datetime_dtype, is_numeric_dtype, parse_datetime, string_values, to_numeric};
use polars::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Validates raw tables before preprocessing.
#[derive(Debug, Clone, Default)]
pub struct DatasetValidator {
    analyzer: ColumnHealthAnalyzer,
    classifier: ProblemTypeClassifier,
    config: ValidatorConfig,
}

impl DatasetValidator {
    pub fn new(config: &ProcessingConfig) -> Self {
        Self {
            analyzer: ColumnHealthAnalyzer::new(config.analyzer),
            classifier: ProblemTypeClassifier::new(config.problem_type),
            config: config.validator,
        }
    }

    /// Validate `df`, returning the cleaned table and its health report.
    pub fn validate_and_clean(
        &self,
        df: &DataFrame,
        target: Option<&str>,
    ) -> Result<(DataFrame, DatasetHealthReport), ValidationError> {
        if df.height() == 0 || df.width() == 0 {
            return Err(ValidationError::EmptyDataset);
        }
        let (original_rows, original_columns) = df.shape();
        info!(
            "Validating dataset: {} rows x {} columns",
            original_rows, original_columns
        );

        // 1. Column health
        let mut column_reports = BTreeMap::new();
        let mut order = Vec::with_capacity(original_columns);
        for column in df.get_columns() {
            let health = self.analyzer.analyze(column.as_materialized_series())?;
            order.push(health.name.clone());
            column_reports.insert(health.name.clone(), health);
        }

        // 2. Target problem type
        let mut recommended_problem_type = None;
        if let Some(target) = target {
            let health = column_reports
                .get(target)
                .ok_or_else(|| ValidationError::TargetNotFound(target.to_string()))?;
            let series = df.column(target)?.as_materialized_series();
            let decision = self.classifier.classify(series, Some(health.inferred_type))?;
            if decision.reason.is_fallback() {
                warn!(
                    "Could not infer problem type for target '{}' ({:?}), defaulting to {}",
                    target, decision.reason, decision.problem_type
                );
            } else {
                debug!(
                    "Target '{}' looks like {} ({:?})",
                    target, decision.problem_type, decision.reason
                );
            }
            recommended_problem_type = Some(decision.problem_type);
        }

        // 3. Drop and coerce feature columns
        let mut cleaned = df.clone();
        let mut dropped_columns = Vec::new();
        let mut coerced_columns = Vec::new();
        for name in &order {
            if Some(name.as_str()) == target {
                continue;
            }
            let health = &column_reports[name];
            match health.recommended_action {
                RecommendedAction::Drop => {
                    debug!("Dropping '{}': {}", name, health.issues.join(", "));
                    cleaned = cleaned.drop(name)?;
                    dropped_columns.push(name.clone());
                }
                RecommendedAction::Coerce => {
                    let Some(storage) = health.coerce_to else {
                        continue;
                    };
                    let original = cleaned.column(name)?.as_materialized_series().clone();
                    match coerce_column(&original, storage) {
                        Ok(coerced) => {
                            let lost = coerced.null_count().saturating_sub(original.null_count());
                            debug!(
                                "Coerced '{}' to {} ({} values became null)",
                                name, storage, lost
                            );
                            cleaned.replace(name, coerced)?;
                            coerced_columns.push(name.clone());
                        }
                        Err(e) => {
                            warn!("Coercing '{}' to {} failed, keeping original: {}", name, storage, e);
                        }
                    }
                }
                RecommendedAction::Keep => {}
            }
        }

        // 4. Target normalization and null-target rows
        let mut target_column_health = None;
        if let (Some(target), Some(problem_type)) = (target, recommended_problem_type) {
            let mut health = column_reports[target].clone();
            self.clean_target(&mut cleaned, target, &mut health, problem_type)?;
            cleaned = drop_null_targets(cleaned, target)?;
            column_reports.insert(target.to_string(), health.clone());
            target_column_health = Some(health);
        }

        // 5. Final checks
        let valid_columns: Vec<String> = cleaned
            .get_column_names()
            .into_iter()
            .filter(|c| Some(c.as_str()) != target)
            .map(|c| c.to_string())
            .collect();

        if valid_columns.is_empty() {
            return Err(ValidationError::NoFeatureColumns {
                dropped: dropped_columns,
            });
        }
        if cleaned.height() < self.config.min_rows {
            return Err(ValidationError::InsufficientRows {
                remaining: cleaned.height(),
                minimum: self.config.min_rows,
                dropped_columns,
            });
        }

        let mut overall_issues = Vec::new();
        let loss = self.config.loss_warning_ratio;
        if dropped_columns.len() as f64 > original_columns as f64 * loss {
            overall_issues.push(format!(
                "Warning: {} columns dropped (>{:.0}% of original)",
                dropped_columns.len(),
                loss * 100.0
            ));
        }
        if (cleaned.height() as f64) < original_rows as f64 * loss {
            overall_issues.push(format!(
                "Warning: {} rows removed (>{:.0}% of original)",
                original_rows - cleaned.height(),
                loss * 100.0
            ));
        }
        for issue in &overall_issues {
            warn!("{}", issue);
        }

        info!(
            "Validation complete: {} rows x {} columns ({} valid features, {} dropped, {} coerced)",
            cleaned.height(),
            cleaned.width(),
            valid_columns.len(),
            dropped_columns.len(),
            coerced_columns.len()
        );

        let report = DatasetHealthReport {
            total_rows: cleaned.height(),
            total_columns: cleaned.width(),
            valid_columns,
            dropped_columns,
            coerced_columns,
            column_reports,
            target_column_health,
            overall_issues,
            is_valid: true,
            recommended_problem_type,
        };
        Ok((cleaned, report))
    }

    /// Make the target's storage match the problem type, updating its record.
    fn clean_target(
        &self,
        df: &mut DataFrame,
        target: &str,
        health: &mut ColumnHealth,
        problem_type: ProblemType,
    ) -> PolarsResult<()> {
        let series = df.column(target)?.as_materialized_series().clone();
        match problem_type {
            ProblemType::Regression => {
                if health.inferred_type != InferredType::Numeric
                    || !is_numeric_dtype(series.dtype())
                {
                    debug!("Coercing target '{}' to numeric for regression", target);
                    let values = to_numeric(&series)?.values;
                    df.replace(target, Series::new(target.into(), values))?;
                    health.inferred_type = InferredType::Numeric;
                    health.coerce_to = Some(StorageType::Float64);
                }
            }
            ProblemType::Classification => {
                if health.inferred_type == InferredType::Numeric
                    && health.unique_count < self.config.target_discrete_max_unique
                {
                    info!(
                        "Target '{}' is numeric with {} unique values, treating as categorical",
                        target, health.unique_count
                    );
                    df.replace(target, series.cast(&DataType::String)?)?;
                    health.inferred_type = InferredType::Categorical;
                    health.coerce_to = Some(StorageType::String);
                }
            }
        }
        Ok(())
    }
}

static_assertions::assert_impl_all!(DatasetValidator: Send, Sync);

fn drop_null_targets(df: DataFrame, target: &str) -> PolarsResult<DataFrame> {
    let present: Vec<bool> = string_values(df.column(target)?.as_materialized_series())?
        .iter()
        .map(Option::is_some)
        .collect();
    let missing = present.iter().filter(|keep| !**keep).count();
    if missing == 0 {
        return Ok(df);
    }
    info!("Removing {} rows with null target values", missing);
    let mask = BooleanChunked::from_slice("mask".into(), &present);
    df.filter(&mask)
}

/// Convert a column to `storage`, turning values that fail to convert into
/// nulls.
pub fn coerce_column(series: &Series, storage: StorageType) -> PolarsResult<Series> {
    let name = series.name().clone();
    match storage {
        StorageType::Int64 => {
            let conversion = to_numeric(series)?;
            if conversion.is_integral() {
                let values: Vec<Option<i64>> = conversion
                    .values
                    .iter()
                    .map(|v| v.map(|x| x.round() as i64))
                    .collect();
                Ok(Series::new(name, values))
            } else {
                Ok(Series::new(name, conversion.values))
            }
        }
        StorageType::Float64 => Ok(Series::new(name, to_numeric(series)?.values)),
        StorageType::Datetime => {
            let datetime = DataType::Datetime(TimeUnit::Milliseconds, None);
            if is_datetime_dtype(series.dtype()) {
                return series.cast(&datetime);
            }
            let millis: Vec<Option<i64>> = string_values(series)?
                .iter()
                .map(|v| {
                    v.as_deref()
                        .and_then(parse_datetime)
                        .map(|dt| dt.and_utc().timestamp_millis())
                })
                .collect();
            Series::new(name, millis).cast(&datetime)
        }
        StorageType::String => series.cast(&DataType::String),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> DatasetValidator {
        DatasetValidator::default()
    }

    fn labels(n: usize, classes: &[&str]) -> Vec<String> {
        (0..n).map(|i| classes[i % classes.len()].to_string()).collect()
    }

    #[test]
    fn test_empty_dataset_is_rejected() {
        let df = DataFrame::empty();
        let err = validator().validate_and_clean(&df, None).unwrap_err();
        assert!(matches!(err, ValidationError::EmptyDataset));
    }

    #[test]
    fn test_missing_target_is_rejected() {
        let df = df! { "a" => (0..20).collect::<Vec<i64>>() }.unwrap();
        let err = validator().validate_and_clean(&df, Some("y")).unwrap_err();
        assert!(matches!(err, ValidationError::TargetNotFound(ref t) if t == "y"));
        assert_eq!(err.error_code(), "TARGET_NOT_FOUND");
    }

    #[test]
    fn test_null_column_is_dropped_and_target_classified() {
        let df = df! {
            "feature" => (0..100).map(|i| i as f64 * 0.5).collect::<Vec<f64>>(),
            "empty" => vec![None::<f64>; 100],
            "y" => labels(100, &["a", "b", "c"]),
        }
        .unwrap();

        let (cleaned, report) = validator().validate_and_clean(&df, Some("y")).unwrap();
        assert_eq!(report.dropped_columns, vec!["empty"]);
        assert_eq!(report.recommended_problem_type, Some(ProblemType::Classification));
        assert_eq!(report.valid_columns, vec!["feature"]);
        assert_eq!(cleaned.height(), 100);
        assert_eq!(report.total_rows, 100);
        assert_eq!(report.total_columns, 2);
        assert!(report.is_valid);
    }

    #[test]
    fn test_numeric_strings_are_coerced() {
        let df = df! {
            "amount" => (0..20).map(|i| format!("{}.5", i)).collect::<Vec<String>>(),
            "y" => (0..20).map(|i| i as f64 * 1.7).collect::<Vec<f64>>(),
        }
        .unwrap();

        let (cleaned, report) = validator().validate_and_clean(&df, Some("y")).unwrap();
        assert_eq!(report.coerced_columns, vec!["amount"]);
        assert_eq!(cleaned.column("amount").unwrap().dtype(), &DataType::Float64);
        assert_eq!(report.recommended_problem_type, Some(ProblemType::Regression));
    }

    #[test]
    fn test_discrete_numeric_target_is_stringified() {
        let df = df! {
            "x" => (0..30).map(|i| i as f64).collect::<Vec<f64>>(),
            "y" => (0..30).map(|i| (i % 3) as i64).collect::<Vec<i64>>(),
        }
        .unwrap();

        let (cleaned, report) = validator().validate_and_clean(&df, Some("y")).unwrap();
        assert_eq!(cleaned.column("y").unwrap().dtype(), &DataType::String);
        let target = report.target_column_health.unwrap();
        assert_eq!(target.inferred_type, InferredType::Categorical);
        assert_eq!(report.column_reports["y"].inferred_type, InferredType::Categorical);
    }

    #[test]
    fn test_null_target_rows_are_removed() {
        let mut y: Vec<Option<f64>> = (0..30).map(|i| Some(i as f64 * 2.3)).collect();
        y[3] = None;
        y[7] = None;
        let df = df! {
            "x" => (0..30).map(|i| i as f64).collect::<Vec<f64>>(),
            "y" => y,
        }
        .unwrap();

        let (cleaned, report) = validator().validate_and_clean(&df, Some("y")).unwrap();
        assert_eq!(cleaned.height(), 28);
        assert_eq!(cleaned.column("y").unwrap().null_count(), 0);
        assert!(report.overall_issues.is_empty());
    }

    #[test]
    fn test_no_feature_columns() {
        let df = df! {
            "constant" => vec!["same"; 20],
            "y" => labels(20, &["a", "b"]),
        }
        .unwrap();

        let err = validator().validate_and_clean(&df, Some("y")).unwrap_err();
        match err {
            ValidationError::NoFeatureColumns { dropped } => assert_eq!(dropped, vec!["constant"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_insufficient_rows() {
        let df = df! {
            "x" => [1.0, 2.0, 3.0, 4.0, 5.0],
            "y" => ["a", "b", "a", "b", "a"],
        }
        .unwrap();

        let err = validator().validate_and_clean(&df, Some("y")).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InsufficientRows { remaining: 5, minimum: 10, .. }
        ));
    }

    #[test]
    fn test_heavy_row_loss_is_reported() {
        let y: Vec<Option<&str>> = (0..40)
            .map(|i| if i < 12 { Some(["a", "b"][i % 2]) } else { None })
            .collect();
        let df = df! {
            "x" => (0..40).map(|i| i as f64).collect::<Vec<f64>>(),
            "y" => y,
        }
        .unwrap();

        let (_, report) = validator().validate_and_clean(&df, Some("y")).unwrap();
        assert_eq!(report.total_rows, 12);
        assert!(report.overall_issues.iter().any(|i| i.contains("28 rows removed")));
    }

    #[test]
    fn test_coerce_column_to_datetime() {
        let series = Series::new("when".into(), &[Some("2024-01-02"), Some("garbage"), None]);
        let coerced = coerce_column(&series, StorageType::Datetime).unwrap();
        assert_eq!(
            coerced.dtype(),
            &DataType::Datetime(TimeUnit::Milliseconds, None)
        );
        assert_eq!(coerced.null_count(), 2);
    }

    #[test]
    fn test_coerce_column_to_int_tolerates_failures() {
        let series = Series::new("n".into(), &["1", "2", "x", "4"]);
        let coerced = coerce_column(&series, StorageType::Int64).unwrap();
        assert_eq!(coerced.dtype(), &DataType::Int64);
        assert_eq!(coerced.null_count(), 1);
    }
}
