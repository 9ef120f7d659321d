//! Feature encoding: turns cleaned feature columns into a numeric matrix.
//!
//! [`FeaturePipeline`] routes every column into one of three groups and fits
//! one transformer per group on the training partition:
//!
//! - numeric → median imputation + standard scaling ([`NumericTransformer`])
//! - low-cardinality categorical → `"missing"` imputation + one-hot capped at
//!   100 categories ([`OneHotEncoder`])
//! - high-cardinality categorical → `"missing"` imputation + either target
//!   encoding ([`TargetEncoder`]) or one-hot capped at 50 categories
//!
//! All-null columns, low-variance numeric columns (when a threshold is set)
//! and apparent identifier columns are removed before fitting.
//!
//! The fitted pipeline is serializable and is reused unmodified for the
//! held-out split and for prediction inputs. Columns absent at transform time
//! are treated as entirely missing.

mod numeric;
mod one_hot;
mod target;

pub use numeric::{NumericColumnStats, NumericTransformer};
pub use one_hot::{OneHotColumn, OneHotEncoder};
pub use target::{TargetColumn, TargetEncoder, TargetKind};

use crate::config::{EncodingConfig, ProcessingConfig};
use crate::error::{PreprocessingError, Result, ResultExt};
use crate::types::StorageType;
use crate::utils::{count_unique, is_datetime_dtype, is_numeric_dtype, string_values, to_numeric};
use crate::validator::coerce_column;
use ndarray::{Array2, s};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

// ============================================================================
// Column Routing
// ============================================================================

/// Why a feature column was left out of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    AllNull,
    NoFiniteValues,
    LowVariance,
    Identifier,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RemovalReason::AllNull => "all values are null",
            RemovalReason::NoFiniteValues => "no finite numeric values",
            RemovalReason::LowVariance => "variance at or below threshold",
            RemovalReason::Identifier => "too many unique values",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedFeature {
    pub column: String,
    pub reason: RemovalReason,
}

/// Which group each input column was routed to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnRouting {
    pub numeric: Vec<String>,
    pub low_cardinality: Vec<String>,
    pub high_cardinality: Vec<String>,
    pub removed: Vec<RemovedFeature>,
    /// Numeric columns fitted on datetime values (epoch milliseconds). Inputs
    /// for these are parsed as datetimes before conversion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datetime: Vec<String>,
}

impl ColumnRouting {
    pub fn is_empty(&self) -> bool {
        self.numeric.is_empty() && self.low_cardinality.is_empty() && self.high_cardinality.is_empty()
    }

    pub fn removed_names(&self) -> Vec<String> {
        self.removed.iter().map(|r| r.column.clone()).collect()
    }
}

/// Encoder used for the high-cardinality group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "encoder")]
pub enum HighCardinalityEncoder {
    Target(TargetEncoder),
    OneHot(OneHotEncoder),
}

impl HighCardinalityEncoder {
    fn width(&self) -> usize {
        match self {
            Self::Target(e) => e.width(),
            Self::OneHot(e) => e.width(),
        }
    }

    fn feature_names(&self) -> Vec<String> {
        match self {
            Self::Target(e) => e.feature_names(),
            Self::OneHot(e) => e.feature_names(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedGroups {
    routing: ColumnRouting,
    numeric: Option<NumericTransformer>,
    low_cardinality: Option<OneHotEncoder>,
    high_cardinality: Option<HighCardinalityEncoder>,
    feature_names: Vec<String>,
}

// ============================================================================
// Feature Pipeline
// ============================================================================

/// Cardinality-aware preprocessing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePipeline {
    config: EncodingConfig,
    numeric_rate: f64,
    fitted: Option<FittedGroups>,
}

impl Default for FeaturePipeline {
    fn default() -> Self {
        Self::from_config(&ProcessingConfig::default())
    }
}

impl FeaturePipeline {
    /// `numeric_rate` is the share of values that must parse as numbers for
    /// a column to be treated as numeric.
    pub fn new(config: EncodingConfig, numeric_rate: f64) -> Self {
        Self {
            config,
            numeric_rate,
            fitted: None,
        }
    }

    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self::new(config.encoding.clone(), config.analyzer.numeric_rate)
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Output column names, empty until fitted.
    pub fn feature_names(&self) -> &[String] {
        self.fitted
            .as_ref()
            .map(|f| f.feature_names.as_slice())
            .unwrap_or(&[])
    }

    pub fn routing(&self) -> Option<&ColumnRouting> {
        self.fitted.as_ref().map(|f| &f.routing)
    }

    /// Fit on the training features. `target` is required only when the
    /// target encoder is enabled and high-cardinality columns exist.
    pub fn fit(&mut self, df: &DataFrame, target: Option<&Series>) -> Result<()> {
        info!(
            "Building feature pipeline for {} columns x {} rows",
            df.width(),
            df.height()
        );
        let routing = self.route_columns(df)?;
        if routing.is_empty() {
            return Err(PreprocessingError::NoUsableFeatures {
                removed: routing.removed_names(),
            });
        }
        info!(
            "Routed columns: {} numeric, {} low-cardinality, {} high-cardinality, {} removed",
            routing.numeric.len(),
            routing.low_cardinality.len(),
            routing.high_cardinality.len(),
            routing.removed.len()
        );

        let numeric = if routing.numeric.is_empty() {
            None
        } else {
            let columns = numeric_columns(df, &routing.numeric, &routing.datetime)?;
            Some(NumericTransformer::fit(&routing.numeric, &columns).context("numeric group")?)
        };

        let low_cardinality = if routing.low_cardinality.is_empty() {
            None
        } else {
            let columns = categorical_columns(df, &routing.low_cardinality)?;
            Some(OneHotEncoder::fit(
                &routing.low_cardinality,
                &columns,
                self.config.low_cardinality_max_categories,
                &self.config.categorical_fill_value,
            ))
        };

        let high_cardinality = if routing.high_cardinality.is_empty() {
            None
        } else {
            let columns = categorical_columns(df, &routing.high_cardinality)?;
            if self.config.use_target_encoder {
                let target = target.ok_or(PreprocessingError::TargetRequired)?;
                let encoder = TargetEncoder::fit(
                    &routing.high_cardinality,
                    &columns,
                    target,
                    self.config.target_smoothing,
                    &self.config.categorical_fill_value,
                )
                .context("high-cardinality group")?;
                Some(HighCardinalityEncoder::Target(encoder))
            } else {
                Some(HighCardinalityEncoder::OneHot(OneHotEncoder::fit(
                    &routing.high_cardinality,
                    &columns,
                    self.config.high_cardinality_max_categories,
                    &self.config.categorical_fill_value,
                )))
            }
        };

        let mut feature_names = Vec::new();
        if let Some(t) = &numeric {
            feature_names.extend(t.feature_names());
        }
        if let Some(e) = &low_cardinality {
            feature_names.extend(e.feature_names());
        }
        if let Some(e) = &high_cardinality {
            feature_names.extend(e.feature_names());
        }
        debug!("Feature pipeline produces {} features", feature_names.len());

        self.fitted = Some(FittedGroups {
            routing,
            numeric,
            low_cardinality,
            high_cardinality,
            feature_names,
        });
        Ok(())
    }

    /// Transform a table with the fitted groups.
    pub fn transform(&self, df: &DataFrame) -> Result<Array2<f64>> {
        let fitted = self.fitted.as_ref().ok_or(PreprocessingError::NotFitted)?;
        let n_rows = df.height();
        let mut out = Array2::zeros((n_rows, fitted.feature_names.len()));
        let mut offset = 0;

        if let Some(transformer) = &fitted.numeric {
            let columns = numeric_columns(df, &fitted.routing.numeric, &fitted.routing.datetime)?;
            let width = transformer.width();
            transformer.transform_into(&columns, out.slice_mut(s![.., offset..offset + width]));
            offset += width;
        }
        if let Some(encoder) = &fitted.low_cardinality {
            let columns = categorical_columns(df, &fitted.routing.low_cardinality)?;
            let width = encoder.width();
            encoder.transform_into(&columns, out.slice_mut(s![.., offset..offset + width]));
            offset += width;
        }
        if let Some(encoder) = &fitted.high_cardinality {
            let columns = categorical_columns(df, &fitted.routing.high_cardinality)?;
            let width = encoder.width();
            let view = out.slice_mut(s![.., offset..offset + width]);
            match encoder {
                HighCardinalityEncoder::Target(e) => e.transform_into(&columns, view),
                HighCardinalityEncoder::OneHot(e) => e.transform_into(&columns, view),
            }
            offset += width;
        }

        if offset != fitted.feature_names.len() {
            return Err(PreprocessingError::TransformFailed(format!(
                "produced {} columns, expected {}",
                offset,
                fitted.feature_names.len()
            )));
        }
        Ok(out)
    }

    pub fn fit_transform(&mut self, df: &DataFrame, target: Option<&Series>) -> Result<Array2<f64>> {
        self.fit(df, target)?;
        self.transform(df)
    }

    fn route_columns(&self, df: &DataFrame) -> Result<ColumnRouting> {
        let mut routing = ColumnRouting::default();
        let mut categorical = Vec::new();

        for column in df.get_columns() {
            let series = column.as_materialized_series();
            let name = series.name().to_string();
            let values = string_values(series)?;
            let non_null = values.iter().flatten().count();
            if non_null == 0 {
                debug!("Column '{}' is all null, skipping", name);
                routing.removed.push(RemovedFeature {
                    column: name,
                    reason: RemovalReason::AllNull,
                });
                continue;
            }

            let conversion = to_numeric(series)?;
            if is_numeric_dtype(series.dtype()) || conversion.rate() > self.numeric_rate {
                if conversion.converted == 0 {
                    debug!("Column '{}' has no finite values, skipping", name);
                    routing.removed.push(RemovedFeature {
                        column: name,
                        reason: RemovalReason::NoFiniteValues,
                    });
                    continue;
                }
                if self.config.variance_threshold > 0.0 {
                    let variance = sample_variance(conversion.present());
                    if variance.is_some_and(|v| v <= self.config.variance_threshold) {
                        debug!("Removing low-variance column '{}'", name);
                        routing.removed.push(RemovedFeature {
                            column: name,
                            reason: RemovalReason::LowVariance,
                        });
                        continue;
                    }
                }
                if is_datetime_dtype(series.dtype()) {
                    routing.datetime.push(name.clone());
                }
                routing.numeric.push(name);
            } else {
                categorical.push((name, count_unique(&values), non_null));
            }
        }

        for (name, n_unique, n_samples) in categorical {
            if n_unique > self.config.identifier_max_unique || n_unique == n_samples {
                debug!("Dropping '{}': too many unique values ({})", name, n_unique);
                routing.removed.push(RemovedFeature {
                    column: name,
                    reason: RemovalReason::Identifier,
                });
            } else if n_unique <= self.config.low_cardinality_max_unique
                && (n_unique as f64 / n_samples as f64) <= self.config.low_cardinality_max_ratio
            {
                routing.low_cardinality.push(name);
            } else {
                routing.high_cardinality.push(name);
            }
        }

        Ok(routing)
    }
}

static_assertions::assert_impl_all!(FeaturePipeline: Send, Sync);

/// Sample variance (n - 1 denominator); `None` for fewer than two values.
fn sample_variance(values: impl Iterator<Item = f64>) -> Option<f64> {
    let values: Vec<f64> = values.collect();
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    Some(values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0))
}

fn numeric_columns(
    df: &DataFrame,
    names: &[String],
    datetime: &[String],
) -> Result<Vec<Vec<Option<f64>>>> {
    names
        .iter()
        .map(|name| -> Result<Vec<Option<f64>>> {
            let Ok(column) = df.column(name) else {
                return Ok(vec![None; df.height()]);
            };
            let series = column.as_materialized_series();
            let conversion = if datetime.contains(name) {
                let parsed = datetime_column(series).context(format!("parsing '{name}'"))?;
                to_numeric(&parsed)
            } else {
                to_numeric(series)
            };
            Ok(conversion.context(format!("converting '{name}'"))?.values)
        })
        .collect()
}

/// Bring a column to millisecond datetimes, parsing strings the same way
/// the validator does.
fn datetime_column(series: &Series) -> PolarsResult<Series> {
    let parsed = coerce_column(series, StorageType::Datetime)?;
    if !is_datetime_dtype(series.dtype()) {
        let present = string_values(series)?.iter().flatten().count();
        let lost = present.saturating_sub(parsed.len() - parsed.null_count());
        if lost > 0 {
            warn!(
                "{} values of datetime column '{}' could not be parsed and will be imputed",
                lost,
                series.name()
            );
        }
    }
    Ok(parsed)
}

fn categorical_columns(df: &DataFrame, names: &[String]) -> Result<Vec<Vec<Option<String>>>> {
    names
        .iter()
        .map(|name| match df.column(name) {
            Ok(column) => string_values(column.as_materialized_series())
                .context(format!("reading '{name}'")),
            Err(_) => Ok(vec![None; df.height()]),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetSmoothing;

    fn training_frame() -> DataFrame {
        let n = 40;
        df! {
            "age" => (0..n).map(|i| 20.0 + i as f64).collect::<Vec<f64>>(),
            "color" => (0..n).map(|i| ["red", "green", "blue"][i % 3]).collect::<Vec<&str>>(),
            "empty" => vec![None::<&str>; n],
            "id" => (0..n).map(|i| format!("row-{i}")).collect::<Vec<String>>(),
        }
        .unwrap()
    }

    #[test]
    fn test_routing() {
        let mut pipeline = FeaturePipeline::default();
        pipeline.fit(&training_frame(), None).unwrap();
        let routing = pipeline.routing().unwrap();

        assert_eq!(routing.numeric, vec!["age"]);
        assert_eq!(routing.low_cardinality, vec!["color"]);
        assert!(routing.high_cardinality.is_empty());
        assert_eq!(routing.removed_names(), vec!["empty", "id"]);
        assert_eq!(
            pipeline.feature_names(),
            &["age", "color_blue", "color_green", "color_red"]
        );
    }

    #[test]
    fn test_transform_shape_and_scaling() {
        let df = training_frame();
        let mut pipeline = FeaturePipeline::default();
        let matrix = pipeline.fit_transform(&df, None).unwrap();
        assert_eq!(matrix.dim(), (40, 4));

        let mean: f64 = matrix.column(0).sum() / 40.0;
        assert!(mean.abs() < 1e-9);
        assert_eq!(matrix.row(0).slice(s![1..]).to_vec(), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_transform_before_fit() {
        let pipeline = FeaturePipeline::default();
        let err = pipeline.transform(&training_frame()).unwrap_err();
        assert!(matches!(err, PreprocessingError::NotFitted));
    }

    #[test]
    fn test_missing_column_at_transform_is_all_missing() {
        let mut pipeline = FeaturePipeline::default();
        pipeline.fit(&training_frame(), None).unwrap();

        let new = df! { "age" => [30.0, 45.0] }.unwrap();
        let matrix = pipeline.transform(&new).unwrap();
        assert_eq!(matrix.dim(), (2, 4));
        // "missing" was never a training category, so the one-hot block is empty.
        assert!(matrix.row(0).slice(s![1..]).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_no_usable_features() {
        let df = df! {
            "empty" => vec![None::<f64>; 5],
            "id" => ["a", "b", "c", "d", "e"],
        }
        .unwrap();
        let err = FeaturePipeline::default().fit(&df, None).unwrap_err();
        match err {
            PreprocessingError::NoUsableFeatures { removed } => {
                assert_eq!(removed, vec!["empty", "id"])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_finite_numeric_column_is_removed() {
        let df = df! {
            "x" => [1.0, 2.0, 3.0, 4.0],
            "overflow" => [f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NAN],
        }
        .unwrap();
        let mut pipeline = FeaturePipeline::default();
        let matrix = pipeline.fit_transform(&df, None).unwrap();
        let routing = pipeline.routing().unwrap();

        assert_eq!(routing.numeric, vec!["x"]);
        assert_eq!(
            routing.removed,
            vec![RemovedFeature {
                column: "overflow".to_string(),
                reason: RemovalReason::NoFiniteValues,
            }]
        );
        assert_eq!(matrix.dim(), (4, 1));
    }

    #[test]
    fn test_datetime_column_accepts_strings_at_transform() {
        let stamps = ["2024-01-01", "2024-02-15", "2024-06-30", "2024-12-31"];
        let train = df! {
            "seen" => stamps.iter().map(|s| s.to_string()).collect::<Vec<String>>(),
        }
        .unwrap();
        let train = DataFrame::new(vec![
            crate::validator::coerce_column(
                train.column("seen").unwrap().as_materialized_series(),
                StorageType::Datetime,
            )
            .unwrap()
            .into(),
        ])
        .unwrap();

        let mut pipeline = FeaturePipeline::default();
        let expected = pipeline.fit_transform(&train, None).unwrap();
        assert_eq!(pipeline.routing().unwrap().datetime, vec!["seen"]);

        let raw = df! { "seen" => stamps }.unwrap();
        assert_eq!(pipeline.transform(&raw).unwrap(), expected);
    }

    #[test]
    fn test_variance_threshold_drops_flat_columns() {
        let config = EncodingConfig {
            variance_threshold: 0.5,
            ..EncodingConfig::default()
        };
        let df = df! {
            "flat" => [1.0, 1.0, 1.0, 1.1],
            "wide" => [1.0, 5.0, 9.0, 13.0],
        }
        .unwrap();
        let mut pipeline = FeaturePipeline::new(config, 0.8);
        pipeline.fit(&df, None).unwrap();
        let routing = pipeline.routing().unwrap();
        assert_eq!(routing.numeric, vec!["wide"]);
        assert_eq!(routing.removed[0].reason, RemovalReason::LowVariance);
    }

    #[test]
    fn test_high_cardinality_uses_target_encoder() {
        let n = 120;
        let df = df! {
            "zip" => (0..n).map(|i| format!("z{}", i % 60)).collect::<Vec<String>>(),
        }
        .unwrap();
        let target = Series::new("y".into(), (0..n).map(|i| (i % 60) as f64 * 1.5).collect::<Vec<f64>>());

        let config = EncodingConfig {
            use_target_encoder: true,
            target_smoothing: TargetSmoothing::Auto,
            ..EncodingConfig::default()
        };
        let mut pipeline = FeaturePipeline::new(config.clone(), 0.8);
        let matrix = pipeline.fit_transform(&df, Some(&target)).unwrap();
        assert_eq!(pipeline.routing().unwrap().high_cardinality, vec!["zip"]);
        assert_eq!(matrix.dim(), (120, 1));

        let mut without_target = FeaturePipeline::new(config, 0.8);
        assert!(matches!(
            without_target.fit(&df, None),
            Err(PreprocessingError::TargetRequired)
        ));
    }

    #[test]
    fn test_high_cardinality_one_hot_is_capped() {
        let n = 120;
        let df = df! {
            "zip" => (0..n).map(|i| format!("z{}", i % 60)).collect::<Vec<String>>(),
        }
        .unwrap();
        let mut pipeline = FeaturePipeline::default();
        let matrix = pipeline.fit_transform(&df, None).unwrap();
        assert_eq!(matrix.ncols(), 50);
        assert_eq!(pipeline.feature_names().last().unwrap(), "zip_infrequent");
    }

    #[test]
    fn test_pipeline_serde_roundtrip_preserves_output() {
        let df = training_frame();
        let mut pipeline = FeaturePipeline::default();
        let expected = pipeline.fit_transform(&df, None).unwrap();

        let json = serde_json::to_string(&pipeline).unwrap();
        let restored: FeaturePipeline = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.transform(&df).unwrap(), expected);
    }
}
