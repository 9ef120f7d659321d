//! End-to-end preparation of a raw table for training:
//! validate → split → fit the feature pipeline on train → transform both.

use crate::config::ProcessingConfig;
use crate::encoding::FeaturePipeline;
use crate::error::{PreprocessingError, Result, ResultExt};
use crate::problem_type::ProblemTypeClassifier;
use crate::split::{DataSplit, train_test_split};
use crate::types::{DatasetHealthReport, ProblemType, ValidationSummary};
use crate::utils::string_values;
use crate::validator::DatasetValidator;
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

/// Summary of a preprocessing run, stored with the trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingMetadata {
    pub original_features: Vec<String>,
    pub n_original_features: usize,
    pub n_processed_features: usize,
    pub removed_features: Vec<String>,
    pub train_samples: usize,
    pub test_samples: usize,
    pub problem_type: ProblemType,
    pub target_column: String,
    /// Effective test proportion after small-dataset adjustment.
    pub test_size: f64,
    pub validation_report: ValidationSummary,
}

/// Everything the trainer needs from preprocessing.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Series,
    pub y_test: Series,
    /// Fitted on the training partition only.
    pub pipeline: FeaturePipeline,
    pub feature_names: Vec<String>,
    /// Feature columns of the cleaned table, in order.
    pub feature_columns: Vec<String>,
    pub split: DataSplit,
    pub health_report: DatasetHealthReport,
    pub metadata: PreprocessingMetadata,
}

/// Validate, split and encode `df` for predicting `target`.
pub fn preprocess_data(
    df: &DataFrame,
    target: &str,
    config: &ProcessingConfig,
) -> Result<PreparedData> {
    info!("Preprocessing {} rows for target '{}'", df.height(), target);

    // 1. Validation
    let validator = DatasetValidator::new(config);
    let (cleaned, health_report) = validator.validate_and_clean(df, Some(target))?;
    if cleaned.column(target).is_err() {
        let issues = health_report
            .target_column_health
            .as_ref()
            .map(|h| h.issues.join(", "))
            .unwrap_or_else(|| "unknown".to_string());
        return Err(PreprocessingError::ColumnNotFound(target.to_string())
            .with_context(format!("target was dropped during validation ({issues})")));
    }

    // 2. Problem type
    let y = cleaned.column(target)?.as_materialized_series().clone();
    let problem_type = match health_report.recommended_problem_type {
        Some(problem_type) => problem_type,
        None => {
            let decision = ProblemTypeClassifier::new(config.problem_type).classify(&y, None)?;
            if decision.reason.is_fallback() {
                warn!("Problem type fallback for '{}': {:?}", target, decision.reason);
            }
            decision.problem_type
        }
    };
    info!("Problem type: {}", problem_type);

    // 3. Split
    let stratify_labels = match problem_type {
        ProblemType::Classification => {
            let labels: Vec<String> = string_values(&y)?.into_iter().flatten().collect();
            let n_classes = labels.iter().collect::<HashSet<_>>().len();
            if labels.len() == y.len() && n_classes < config.split.stratify_max_classes {
                info!("Using stratification ({} classes)", n_classes);
                Some(labels)
            } else {
                None
            }
        }
        ProblemType::Regression => None,
    };
    let split = train_test_split(cleaned.height(), stratify_labels.as_deref(), &config.split)?;
    let (train_df, test_df) = split.take(&cleaned).context("splitting rows")?;

    let x_train = train_df.drop(target)?;
    let x_test = test_df.drop(target)?;
    let y_train = train_df.column(target)?.as_materialized_series().clone();
    let y_test = test_df.column(target)?.as_materialized_series().clone();
    let feature_columns: Vec<String> = x_train
        .get_column_names()
        .into_iter()
        .map(|c| c.to_string())
        .collect();

    // 4. Feature pipeline
    let mut pipeline = FeaturePipeline::from_config(config);
    let x_train_processed = pipeline
        .fit_transform(&x_train, Some(&y_train))
        .map_err(|e| match e {
            PreprocessingError::NoUsableFeatures { .. } => e,
            other => other.with_context("Preprocessing fit failed"),
        })?;
    let x_test_processed = pipeline
        .transform(&x_test)
        .context("Test data transform failed")?;
    let feature_names = pipeline.feature_names().to_vec();

    let removed_features = pipeline
        .routing()
        .map(|r| r.removed_names())
        .unwrap_or_default();
    let original_features: Vec<String> = df
        .get_column_names()
        .into_iter()
        .filter(|c| c.as_str() != target)
        .map(|c| c.to_string())
        .collect();

    let metadata = PreprocessingMetadata {
        n_original_features: original_features.len(),
        original_features,
        n_processed_features: x_train_processed.ncols(),
        removed_features,
        train_samples: x_train_processed.nrows(),
        test_samples: x_test_processed.nrows(),
        problem_type,
        target_column: target.to_string(),
        test_size: split.test_size,
        validation_report: health_report.summary(),
    };

    info!(
        "Preprocessing complete: {} train + {} test rows, {} features (from {} columns), {} removed",
        metadata.train_samples,
        metadata.test_samples,
        metadata.n_processed_features,
        feature_columns.len(),
        metadata.removed_features.len()
    );

    Ok(PreparedData {
        x_train: x_train_processed,
        x_test: x_test_processed,
        y_train,
        y_test,
        pipeline,
        feature_names,
        feature_columns,
        split,
        health_report,
        metadata,
    })
}
