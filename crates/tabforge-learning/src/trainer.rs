//! Model fitting, evaluation and detail extraction.
//!
//! A [`ModelTrainer`] is initialized either with a registry model type or with
//! an [`AutomatedSelector`], then trained once. Both paths share the same label
//! handling and metric policy, so their [`TrainingOutcome`]s have the same
//! shape.
//!
//! Classification labels are re-checked with the shared problem-type
//! classifier and encoded with the safe label encoder using the `UseMode`
//! strategy, so labels that only occur in the evaluation split never reach the
//! metrics as unknown indices.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tabforge_processing::{
    EncodingStats, IssueSeverity, ProblemType, ProblemTypeClassifier, ProblemTypePolicy,
    SafeLabelEncoder, UnknownLabelStrategy, safe_encode_labels, string_values, to_numeric,
    validate_label_distribution,
};
use tracing::{debug, info, warn};

use crate::config::{AutoSelectConfig, ModelParams};
use crate::error::ModelTrainingError;
use crate::estimators::{Estimator, Model, ModelDetails, PolynomialModel};
use crate::metrics::{Metrics, classification_metrics, regression_metrics};
use crate::registry::ModelRegistry;
use crate::selector::{AutomatedSelector, SelectionInfo};

/// Maximum number of coefficients or importances reported.
pub const MAX_REPORTED_DETAILS: usize = 100;

// ============================================================================
// Inputs and Outputs
// ============================================================================

/// Train/test matrices and raw labels for one training run.
#[derive(Debug, Clone, Copy)]
pub struct TrainingInput<'a> {
    pub x_train: &'a Array2<f64>,
    pub x_test: &'a Array2<f64>,
    pub y_train: &'a Series,
    pub y_test: &'a Series,
    /// Names supplied by the caller; used when one is given per column.
    pub feature_names: Option<&'a [String]>,
    /// Names of the matrix columns, e.g. from the feature pipeline.
    pub column_names: Option<&'a [String]>,
}

/// Actual and predicted values on the evaluation split.
///
/// Classification values are label indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub actual: Vec<f64>,
    pub predicted: Vec<f64>,
}

/// Coefficients or importances, already truncated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coefficients: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intercept: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_importances: Option<Vec<f64>>,
}

impl ExtractedDetails {
    fn from_model(details: ModelDetails) -> Self {
        match details {
            ModelDetails::Linear {
                mut coefficients,
                intercept,
            } => {
                coefficients.truncate(MAX_REPORTED_DETAILS);
                Self {
                    coefficients: Some(coefficients),
                    intercept: Some(intercept),
                    feature_importances: None,
                }
            }
            ModelDetails::Importances { mut values } => {
                values.truncate(MAX_REPORTED_DETAILS);
                Self {
                    feature_importances: Some(values),
                    ..Self::default()
                }
            }
            ModelDetails::Unsupported => Self::default(),
        }
    }
}

/// Result of [`ModelTrainer::train`].
#[derive(Debug, Clone, Serialize)]
pub struct TrainingOutcome {
    pub model_type: String,
    pub problem_type: ProblemType,
    pub metrics: Metrics,
    /// Seconds spent fitting (or selecting) the model.
    pub training_time: f64,
    pub feature_names: Vec<String>,
    pub predictions: Predictions,
    #[serde(flatten)]
    pub details: ExtractedDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_mapping: Option<BTreeMap<String, i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_encoding_stats: Option<EncodingStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionInfo>,
    #[serde(skip)]
    pub label_encoder: Option<SafeLabelEncoder>,
}

/// Encoded targets for both partitions.
struct EncodedTargets {
    train: Array1<f64>,
    test: Array1<f64>,
    encoder: Option<SafeLabelEncoder>,
    stats: Option<EncodingStats>,
}

enum ModelSource {
    Manual(Model),
    Automated {
        selector: Arc<dyn AutomatedSelector>,
        config: AutoSelectConfig,
    },
}

// ============================================================================
// Trainer
// ============================================================================

/// Fits one model and evaluates it on the held-out split.
pub struct ModelTrainer {
    registry: Arc<ModelRegistry>,
    classifier: ProblemTypeClassifier,
    problem_type: ProblemType,
    model_type: Option<String>,
    source: Option<ModelSource>,
    fitted: Option<Model>,
}

impl std::fmt::Debug for ModelTrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelTrainer")
            .field("problem_type", &self.problem_type)
            .field("model_type", &self.model_type)
            .field("fitted", &self.fitted.is_some())
            .finish()
    }
}

impl ModelTrainer {
    pub fn new(registry: Arc<ModelRegistry>, policy: ProblemTypePolicy) -> Self {
        Self {
            registry,
            classifier: ProblemTypeClassifier::new(policy),
            problem_type: ProblemType::default(),
            model_type: None,
            source: None,
            fitted: None,
        }
    }

    /// Build a registry model. `polynomial_degree` wraps regression models in a
    /// polynomial expansion and is ignored for classification.
    pub fn initialize_model(
        &mut self,
        problem_type: ProblemType,
        model_type: &str,
        params: &ModelParams,
        n_jobs: i32,
        polynomial_degree: Option<usize>,
    ) -> Result<(), ModelTrainingError> {
        let mut model = self.registry.create(problem_type, model_type, params, n_jobs)?;
        match (problem_type, polynomial_degree) {
            (ProblemType::Regression, Some(degree)) => {
                info!("Adding degree-{} polynomial features to {}", degree, model_type);
                model = Model::Polynomial(PolynomialModel::new(degree, model));
            }
            (ProblemType::Classification, Some(_)) => {
                debug!("Polynomial features apply to regression only; ignored for {}", model_type);
            }
            _ => {}
        }

        self.problem_type = problem_type;
        self.model_type = Some(model_type.to_string());
        self.source = Some(ModelSource::Manual(model));
        self.fitted = None;
        Ok(())
    }

    /// Delegate model choice to an automated selector.
    pub fn initialize_automated(
        &mut self,
        problem_type: ProblemType,
        selector: Arc<dyn AutomatedSelector>,
        config: AutoSelectConfig,
    ) {
        self.problem_type = problem_type;
        self.model_type = None;
        self.source = Some(ModelSource::Automated { selector, config });
        self.fitted = None;
    }

    pub fn problem_type(&self) -> ProblemType {
        self.problem_type
    }

    /// Model type of the initialized or selected model.
    pub fn model_type(&self) -> Option<&str> {
        self.model_type.as_deref()
    }

    /// The fitted model, once [`train`](Self::train) succeeded.
    pub fn model(&self) -> Option<&Model> {
        self.fitted.as_ref()
    }

    pub fn into_model(self) -> Option<Model> {
        self.fitted
    }

    /// Fit, predict on the test split, score and extract details.
    pub fn train(&mut self, input: TrainingInput<'_>) -> Result<TrainingOutcome, ModelTrainingError> {
        let source = self.source.take().ok_or(ModelTrainingError::NotInitialized)?;
        let feature_names = resolve_feature_names(
            input.feature_names,
            input.column_names,
            input.x_train.ncols(),
        );

        let targets = self.encode_targets(input.y_train, input.y_test)?;

        let started = Instant::now();
        let (model, selection) = match source {
            ModelSource::Manual(mut model) => {
                info!(
                    "Training {} on {} rows x {} features",
                    self.model_type.as_deref().unwrap_or("model"),
                    input.x_train.nrows(),
                    input.x_train.ncols()
                );
                model
                    .fit(input.x_train, &targets.train)
                    .map_err(ModelTrainingError::fit)?;
                (model, None)
            }
            ModelSource::Automated { selector, config } => {
                let metric = config.metric_for(self.problem_type).to_string();
                info!(
                    "Running automated selection over {:?} ({}s budget, metric {})",
                    config.candidates, config.time_budget_secs, metric
                );
                let (model, info) = selector.select_best_model(
                    input.x_train,
                    &targets.train,
                    self.problem_type,
                    Duration::from_secs(config.time_budget_secs),
                    &config.candidates,
                    &metric,
                )?;
                self.model_type = Some(info.best_model.clone());
                (model, Some(info))
            }
        };
        let training_time = started.elapsed().as_secs_f64();

        let predicted = model
            .predict(input.x_test)
            .map_err(ModelTrainingError::predict)?;
        let metrics = self.compute_metrics(&targets.test, &predicted)?;

        let details = ExtractedDetails::from_model(model.details());
        if details == ExtractedDetails::default() {
            debug!("Model exposes no coefficients or importances");
        }

        let model_type = self.model_type.clone().unwrap_or_default();
        info!("Trained {} in {:.2}s: {:?}", model_type, training_time, metrics);

        let label_mapping = targets.encoder.as_ref().map(SafeLabelEncoder::label_mapping);
        self.fitted = Some(model);
        Ok(TrainingOutcome {
            model_type,
            problem_type: self.problem_type,
            metrics,
            training_time,
            feature_names,
            predictions: Predictions {
                actual: targets.test.to_vec(),
                predicted: predicted.to_vec(),
            },
            details,
            label_mapping,
            label_encoding_stats: targets.stats,
            selection,
            label_encoder: targets.encoder,
        })
    }

    fn encode_targets(&self, y_train: &Series, y_test: &Series) -> Result<EncodedTargets, ModelTrainingError> {
        let polars_failure = |e: PolarsError| ModelTrainingError::FitFailed(e.to_string());

        match self.problem_type {
            ProblemType::Classification => {
                let decision = self
                    .classifier
                    .classify(y_train, None)
                    .map_err(polars_failure)?;
                if decision.reason.is_fallback() {
                    warn!("Label type check fell back to classification: {:?}", decision.reason);
                }
                if decision.problem_type == ProblemType::Regression {
                    return Err(ModelTrainingError::ProblemTypeMismatch {
                        unique: decision.unique_count,
                    });
                }

                let train = string_values(y_train).map_err(polars_failure)?;
                let test = string_values(y_test).map_err(polars_failure)?;

                let report = validate_label_distribution(&train, &test, 1, UnknownLabelStrategy::UseMode);
                for issue in &report.issues {
                    match issue.severity {
                        IssueSeverity::Error => warn!("Label issue: {}", issue.message),
                        IssueSeverity::Warning => debug!("Label issue: {}", issue.message),
                    }
                }

                let (train_codes, test_codes, encoder, stats) =
                    safe_encode_labels(&train, &test, UnknownLabelStrategy::UseMode)?;
                debug!("Label mapping: {:?}", encoder.label_mapping());
                Ok(EncodedTargets {
                    train: train_codes.iter().map(|&c| c as f64).collect(),
                    test: test_codes.iter().map(|&c| c as f64).collect(),
                    encoder: Some(encoder),
                    stats: Some(stats),
                })
            }
            ProblemType::Regression => {
                let to_floats = |series: &Series| -> Result<Array1<f64>, ModelTrainingError> {
                    let conversion = to_numeric(series).map_err(polars_failure)?;
                    conversion
                        .values
                        .iter()
                        .map(|v| {
                            v.ok_or_else(|| {
                                ModelTrainingError::FitFailed(format!(
                                    "target '{}' has missing or non-numeric values",
                                    series.name()
                                ))
                            })
                        })
                        .collect()
                };
                Ok(EncodedTargets {
                    train: to_floats(y_train)?,
                    test: to_floats(y_test)?,
                    encoder: None,
                    stats: None,
                })
            }
        }
    }

    fn compute_metrics(&self, actual: &Array1<f64>, predicted: &Array1<f64>) -> Result<Metrics, ModelTrainingError> {
        match self.problem_type {
            ProblemType::Regression => regression_metrics(&actual.to_vec(), &predicted.to_vec()),
            ProblemType::Classification => {
                let codes = |v: &Array1<f64>| v.iter().map(|x| x.round() as i64).collect::<Vec<_>>();
                classification_metrics(&codes(actual), &codes(predicted))
            }
        }
    }
}

/// Caller names when one is given per column, then the matrix column names,
/// then `feature_{i}` placeholders.
pub fn resolve_feature_names(
    explicit: Option<&[String]>,
    columns: Option<&[String]>,
    n_features: usize,
) -> Vec<String> {
    if let Some(names) = explicit.filter(|n| n.len() == n_features) {
        debug!("Using supplied feature names: {:?}", &names[..names.len().min(5)]);
        return names.to_vec();
    }
    if let Some(names) = columns.filter(|n| n.len() == n_features) {
        debug!("Using matrix column names: {:?}", &names[..names.len().min(5)]);
        return names.to_vec();
    }
    debug!("Generating {} placeholder feature names", n_features);
    (0..n_features).map(|i| format!("feature_{i}")).collect()
}
