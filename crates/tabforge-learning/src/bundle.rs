//! Persisted artifacts of a training run.
//!
//! A [`ModelBundle`] holds everything needed to score new rows: the fitted
//! estimator, the fitted feature pipeline, the label encoder for
//! classification, and the names and metadata recorded at training time. It
//! is stored as JSON through the artifact store, next to a
//! [`PredictionSnapshot`] of the evaluation split.

use chrono::{DateTime, Utc};
use ndarray::Array1;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tabforge_processing::{
    EncodingStats, FeaturePipeline, PreprocessingMetadata, ProblemType, SafeLabelEncoder,
};
use tracing::debug;

use crate::error::{ModelTrainingError, Result};
use crate::estimators::{Estimator, Model};
use crate::trainer::Predictions;

/// Fitted estimator plus the preprocessing it depends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub model: Model,
    pub pipeline: FeaturePipeline,
    /// Present for classification models.
    pub label_encoder: Option<SafeLabelEncoder>,
    pub model_type: String,
    pub problem_type: ProblemType,
    /// One name per matrix column.
    pub feature_names: Vec<String>,
    /// Raw table columns the pipeline reads.
    pub feature_columns: Vec<String>,
    pub target_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_encoding_stats: Option<EncodingStats>,
    pub metadata: PreprocessingMetadata,
    pub created_at: DateTime<Utc>,
}

/// Output of [`ModelBundle::predict`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BundlePredictions {
    Values(Vec<f64>),
    Labels(Vec<String>),
}

impl BundlePredictions {
    pub fn len(&self) -> usize {
        match self {
            Self::Values(v) => v.len(),
            Self::Labels(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ModelBundle {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Score raw rows shaped like the training table.
    ///
    /// Missing feature columns are treated as entirely missing; extra columns,
    /// including the target, are ignored. Class predictions are decoded back
    /// to their original labels.
    pub fn predict(&self, df: &DataFrame) -> Result<BundlePredictions> {
        let x = self.pipeline.transform(df)?;
        debug!("Scoring {} rows with {}", x.nrows(), self.model_type);
        let predicted: Array1<f64> = self.model.predict(&x).map_err(ModelTrainingError::predict)?;

        match (&self.problem_type, &self.label_encoder) {
            (ProblemType::Classification, Some(encoder)) => {
                let codes: Vec<i64> = predicted.iter().map(|v| v.round() as i64).collect();
                Ok(BundlePredictions::Labels(encoder.inverse_transform(&codes)))
            }
            _ => Ok(BundlePredictions::Values(predicted.to_vec())),
        }
    }
}

/// Actual, predicted and residual values on the evaluation split.
///
/// Classification values are label indices, so residuals there count
/// index differences rather than errors in the target unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionSnapshot {
    pub actual: Vec<f64>,
    pub predicted: Vec<f64>,
    pub residuals: Vec<f64>,
}

impl From<&Predictions> for PredictionSnapshot {
    fn from(predictions: &Predictions) -> Self {
        let residuals = predictions
            .actual
            .iter()
            .zip(&predictions.predicted)
            .map(|(a, p)| a - p)
            .collect();
        Self {
            actual: predictions.actual.clone(),
            predicted: predictions.predicted.clone(),
            residuals,
        }
    }
}

impl PredictionSnapshot {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tabforge_processing::{ProcessingConfig, preprocess_data};

    use crate::config::ModelParams;
    use crate::registry::ModelRegistry;

    fn houses(n: usize) -> DataFrame {
        df! {
            "size" => (0..n).map(|i| 40.0 + i as f64 * 2.5).collect::<Vec<f64>>(),
            "rooms" => (0..n).map(|i| (1 + i % 4) as f64).collect::<Vec<f64>>(),
            "price" => (0..n).map(|i| 100.0 + 2.5 * i as f64 * 3.0 + (i % 4) as f64 * 10.0).collect::<Vec<f64>>(),
        }
        .unwrap()
    }

    fn regression_bundle() -> (ModelBundle, DataFrame) {
        let df = houses(50);
        let prepared = preprocess_data(&df, "price", &ProcessingConfig::default()).unwrap();
        let mut model = ModelRegistry::with_defaults()
            .create(ProblemType::Regression, "linear_regression", &ModelParams::new(), 1)
            .unwrap();
        let y = Array1::from(
            prepared
                .y_train
                .f64()
                .unwrap()
                .into_no_null_iter()
                .collect::<Vec<f64>>(),
        );
        model.fit(&prepared.x_train, &y).unwrap();

        let bundle = ModelBundle {
            model,
            pipeline: prepared.pipeline,
            label_encoder: None,
            model_type: "linear_regression".to_string(),
            problem_type: ProblemType::Regression,
            feature_names: prepared.feature_names,
            feature_columns: prepared.feature_columns,
            target_column: "price".to_string(),
            label_encoding_stats: None,
            metadata: prepared.metadata,
            created_at: Utc::now(),
        };
        (bundle, df)
    }

    #[test]
    fn test_json_roundtrip_predicts_the_same() {
        let (bundle, df) = regression_bundle();
        let restored = ModelBundle::from_json(&bundle.to_json().unwrap()).unwrap();

        let before = bundle.predict(&df).unwrap();
        let after = restored.predict(&df).unwrap();
        assert_eq!(before, after);
        assert_eq!(restored.feature_columns, vec!["size", "rooms"]);
    }

    #[test]
    fn test_predict_tolerates_missing_columns() {
        let (bundle, df) = regression_bundle();
        let partial = df.select(["size"]).unwrap();
        let predictions = bundle.predict(&partial).unwrap();
        assert_eq!(predictions.len(), 50);
    }

    #[test]
    fn test_snapshot_residuals() {
        let snapshot = PredictionSnapshot::from(&Predictions {
            actual: vec![3.0, 5.0],
            predicted: vec![2.5, 6.0],
        });
        assert_eq!(snapshot.residuals, vec![0.5, -1.0]);

        let json: serde_json::Value = serde_json::from_slice(&snapshot.to_json().unwrap()).unwrap();
        assert!(json.get("residuals").is_some());
    }
}
