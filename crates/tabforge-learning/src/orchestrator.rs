//! End-to-end training jobs.
//!
//! [`TrainingOrchestrator`] ties the pieces together for one
//! `(dataset, user, config)` request:
//!
//! 1. fetch and decode the raw table from the [`DatasetSource`]
//! 2. validate, split and encode it with `preprocess_data`
//! 3. resolve the problem type and initialize a manual or automated trainer
//! 4. fit and evaluate
//! 5. name the model, upload the bundle and prediction snapshot to the
//!    [`ArtifactStore`] and insert a record into the [`MetadataStore`]
//!
//! Each job is independent. The orchestrator only holds shared handles to
//! the collaborators and the registry, so one instance can serve concurrent
//! jobs.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tabforge_learning::{
//!     InMemoryMetadataStore, LocalArtifactStore, LocalDatasetSource, ModelChoice,
//!     TrainingConfig, TrainingOrchestrator,
//! };
//!
//! let orchestrator = TrainingOrchestrator::new(
//!     Arc::new(LocalDatasetSource::new("data")),
//!     Arc::new(LocalArtifactStore::new("data")),
//!     Arc::new(InMemoryMetadataStore::new()),
//! );
//! let config = TrainingConfig::builder()
//!     .target_column("price")
//!     .model(ModelChoice::named("random_forest"))
//!     .build()?;
//! let result = orchestrator.train_model("houses", "user-1", &config)?;
//! println!("{} -> {:?}", result.model_name, result.metrics);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::Serialize;
use tabforge_processing::{
    EncodingStats, PreparedData, PreprocessingMetadata, ProblemType, ProblemTypeClassifier,
    ProblemTypePolicy, TargetAnalysis, ValidationError, preprocess_data, read_csv_bytes,
};
use tracing::{info, warn};

use crate::bundle::{ModelBundle, PredictionSnapshot};
use crate::collaborators::{ArtifactStore, DatasetSource, MetadataStore, ModelRecord};
use crate::config::{ModelChoice, ProblemTypeChoice, TrainingConfig};
use crate::error::{ModelTrainingError, Result};
use crate::metrics::Metrics;
use crate::naming::generate_unique_model_name;
use crate::progress::{ProgressCallback, ProgressReporter, TrainingStage};
use crate::registry::ModelRegistry;
use crate::selector::{AutomatedSelector, HoldoutSelector, SelectionInfo};
use crate::trainer::{ExtractedDetails, ModelTrainer, Predictions, TrainingInput};

/// Message returned with every successful job.
pub const SUCCESS_MESSAGE: &str = "Model trained successfully";

// ============================================================================
// Result
// ============================================================================

/// Everything a caller gets back from a finished job.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingResult {
    /// Id assigned by the metadata store.
    pub id: String,
    pub model_name: String,
    pub model_type: String,
    pub problem_type: ProblemType,
    pub metrics: Metrics,
    pub training_time: f64,
    pub feature_names: Vec<String>,
    pub feature_columns: Vec<String>,
    pub predictions: Predictions,
    #[serde(flatten)]
    pub details: ExtractedDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_mapping: Option<BTreeMap<String, i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_encoding_stats: Option<EncodingStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionInfo>,
    pub preprocessing: PreprocessingMetadata,
    /// Artifact store paths of the bundle and snapshot.
    pub model_path: String,
    pub predictions_path: String,
    pub model_url: String,
    pub predictions_url: String,
    pub message: String,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs training jobs against the storage collaborators.
pub struct TrainingOrchestrator {
    datasets: Arc<dyn DatasetSource>,
    artifacts: Arc<dyn ArtifactStore>,
    metadata: Arc<dyn MetadataStore>,
    registry: Arc<ModelRegistry>,
    selector: Option<Arc<dyn AutomatedSelector>>,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for TrainingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingOrchestrator")
            .field("registry", &self.registry)
            .field("custom_selector", &self.selector.is_some())
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

impl TrainingOrchestrator {
    /// Orchestrator over the default registry and the built-in holdout selector.
    pub fn new(
        datasets: Arc<dyn DatasetSource>,
        artifacts: Arc<dyn ArtifactStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            datasets,
            artifacts,
            metadata,
            registry: Arc::new(ModelRegistry::with_defaults()),
            selector: None,
            progress: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<ModelRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the built-in selector used for [`ModelChoice::Auto`].
    pub fn with_selector(mut self, selector: Arc<dyn AutomatedSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Train, persist and record one model.
    ///
    /// Typed errors from every layer are returned unchanged; a
    /// [`TrainingStage::Failed`] update is reported first.
    pub fn train_model(
        &self,
        dataset_id: &str,
        user_id: &str,
        config: &TrainingConfig,
    ) -> Result<TrainingResult> {
        let mut reporter = ProgressReporter::new(self.progress.clone());
        match self.run(dataset_id, user_id, config, &mut reporter) {
            Ok(result) => {
                reporter.report(TrainingStage::Complete, SUCCESS_MESSAGE);
                Ok(result)
            }
            Err(err) => {
                warn!("Training failed for dataset '{}': {}", dataset_id, err);
                reporter.report(TrainingStage::Failed, err.to_string());
                Err(err)
            }
        }
    }

    /// Report which problem type suits `target` before training.
    pub fn analyze_target_column(
        &self,
        dataset_id: &str,
        user_id: &str,
        target: &str,
    ) -> Result<TargetAnalysis> {
        let df = self.load_dataset(dataset_id, user_id)?;
        let labels = df
            .column(target)
            .map_err(|_| ValidationError::TargetNotFound(target.to_string()))?
            .as_materialized_series()
            .clone();
        let classifier = ProblemTypeClassifier::new(ProblemTypePolicy::default());
        Ok(tabforge_processing::analyze_target_column(&classifier, &labels)?)
    }

    /// Fetch a stored bundle by its artifact path.
    pub fn load_bundle(&self, model_path: &str) -> Result<ModelBundle> {
        let bytes = self.artifacts.download(model_path)?;
        ModelBundle::from_json(&bytes)
    }

    fn load_dataset(&self, dataset_id: &str, user_id: &str) -> Result<DataFrame> {
        let bytes = self.datasets.fetch_raw_table(dataset_id, user_id)?;
        let df = read_csv_bytes(&bytes)?;
        info!("Loaded dataset '{}': {} rows x {} columns", dataset_id, df.height(), df.width());
        Ok(df)
    }

    fn run(
        &self,
        dataset_id: &str,
        user_id: &str,
        config: &TrainingConfig,
        reporter: &mut ProgressReporter,
    ) -> Result<TrainingResult> {
        config.validate()?;
        let target = config.target_column.as_str();

        reporter.report(TrainingStage::Fetching, format!("Fetching dataset {dataset_id}"));
        let df = self.load_dataset(dataset_id, user_id)?;

        reporter.report(TrainingStage::Preprocessing, "Validating and encoding features");
        let prepared = preprocess_data(&df, target, &config.processing)?;

        reporter.report(TrainingStage::Initializing, "Initializing model");
        let problem_type = self.resolve_problem_type(config, &prepared)?;
        self.check_explicit_name(user_id, config)?;

        let mut trainer = ModelTrainer::new(Arc::clone(&self.registry), config.processing.problem_type);
        match &config.model {
            ModelChoice::Named(model_type) => {
                let degree = config.use_polynomial.then_some(config.polynomial_degree);
                trainer.initialize_model(problem_type, model_type, &config.model_params, config.n_jobs, degree)?;
                reporter.set_model_type(model_type);
            }
            ModelChoice::Auto => {
                let selector: Arc<dyn AutomatedSelector> = match &self.selector {
                    Some(selector) => Arc::clone(selector),
                    None => Arc::new(HoldoutSelector::new(Arc::clone(&self.registry)).with_n_jobs(config.n_jobs)),
                };
                trainer.initialize_automated(problem_type, selector, config.auto_select.clone());
                reporter.set_model_type("auto");
            }
        }

        reporter.report(TrainingStage::Training, format!("Training {problem_type} model"));
        let outcome = trainer.train(TrainingInput {
            x_train: &prepared.x_train,
            x_test: &prepared.x_test,
            y_train: &prepared.y_train,
            y_test: &prepared.y_test,
            feature_names: Some(&prepared.feature_columns),
            column_names: Some(&prepared.feature_names),
        })?;
        reporter.set_model_type(&outcome.model_type);
        let model = trainer.into_model().ok_or(ModelTrainingError::NotInitialized)?;

        reporter.report(TrainingStage::Persisting, "Saving model and predictions");
        let now = Utc::now();
        let model_name = match &config.model_name {
            Some(name) if !config.auto_generate_name => name.clone(),
            base => generate_unique_model_name(
                self.metadata.as_ref(),
                user_id,
                base.as_deref(),
                &outcome.model_type,
                target,
                now,
            )?,
        };

        let bundle = ModelBundle {
            model,
            pipeline: prepared.pipeline,
            label_encoder: outcome.label_encoder.clone(),
            model_type: outcome.model_type.clone(),
            problem_type,
            feature_names: outcome.feature_names.clone(),
            feature_columns: prepared.feature_columns.clone(),
            target_column: target.to_string(),
            label_encoding_stats: outcome.label_encoding_stats.clone(),
            metadata: prepared.metadata.clone(),
            created_at: now,
        };
        let (model_path, predictions_path) = artifact_paths(user_id, dataset_id, now);
        self.artifacts.upload(&model_path, &bundle.to_json()?, true)?;
        let snapshot = PredictionSnapshot::from(&outcome.predictions);
        self.artifacts.upload(&predictions_path, &snapshot.to_json()?, true)?;
        let model_url = self.artifacts.public_url(&model_path);
        let predictions_url = self.artifacts.public_url(&predictions_path);

        let registry_type = outcome
            .selection
            .as_ref()
            .map_or(outcome.model_type.as_str(), |s| s.model_type.as_str());
        let parameters = if config.model_params.is_empty() {
            self.registry.default_params(registry_type)
        } else {
            config.model_params.clone()
        };

        let record = self.metadata.insert_model(ModelRecord {
            id: String::new(),
            user_id: user_id.to_string(),
            dataset_id: dataset_id.to_string(),
            model_name: model_name.clone(),
            model_type: outcome.model_type.clone(),
            problem_type,
            model_url: model_url.clone(),
            predictions_url: predictions_url.clone(),
            target_column: target.to_string(),
            metrics: outcome.metrics.clone(),
            training_time: outcome.training_time,
            feature_columns: prepared.feature_columns.clone(),
            parameters,
            status: "completed".to_string(),
            description: format!("Trained {} model on {}", outcome.model_type, target),
            created_at: now.to_rfc3339(),
        })?;
        info!("Recorded model '{}' as {}", model_name, record.id);

        Ok(TrainingResult {
            id: record.id,
            model_name,
            model_type: outcome.model_type,
            problem_type,
            metrics: outcome.metrics,
            training_time: outcome.training_time,
            feature_names: outcome.feature_names,
            feature_columns: prepared.feature_columns,
            predictions: outcome.predictions,
            details: outcome.details,
            label_mapping: outcome.label_mapping,
            label_encoding_stats: outcome.label_encoding_stats,
            selection: outcome.selection,
            preprocessing: prepared.metadata,
            model_path,
            predictions_path,
            model_url,
            predictions_url,
            message: SUCCESS_MESSAGE.to_string(),
        })
    }

    /// Detected problem type on the training labels, unless the caller fixed one.
    fn resolve_problem_type(&self, config: &TrainingConfig, prepared: &PreparedData) -> Result<ProblemType> {
        let decision = ProblemTypeClassifier::new(config.processing.problem_type)
            .classify(&prepared.y_train, None)?;
        if decision.reason.is_fallback() {
            warn!("Problem type fallback for '{}': {:?}", config.target_column, decision.reason);
        }
        match config.problem_type {
            ProblemTypeChoice::Fixed(requested) => {
                if requested != decision.problem_type {
                    warn!(
                        "Requested {} but target '{}' looks like {}",
                        requested, config.target_column, decision.problem_type
                    );
                }
                Ok(requested)
            }
            ProblemTypeChoice::Auto => {
                info!("Detected problem type: {}", decision.problem_type);
                Ok(decision.problem_type)
            }
        }
    }

    /// A caller-chosen name must be free unless a generated name was requested.
    fn check_explicit_name(&self, user_id: &str, config: &TrainingConfig) -> Result<()> {
        if let Some(name) = config.model_name.as_deref().filter(|_| !config.auto_generate_name) {
            if self.metadata.model_name_exists(user_id, name)? {
                return Err(ModelTrainingError::NameTaken(name.to_string()).into());
            }
        }
        Ok(())
    }
}

static_assertions::assert_impl_all!(TrainingOrchestrator: Send, Sync);

fn artifact_paths(user_id: &str, dataset_id: &str, now: DateTime<Utc>) -> (String, String) {
    let ts = now.timestamp();
    (
        format!("{user_id}/models/model_{dataset_id}_{ts}.json"),
        format!("{user_id}/predictions/pred_{dataset_id}_{ts}.json"),
    )
}
