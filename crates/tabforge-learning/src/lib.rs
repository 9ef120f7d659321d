//! tabforge-learning: label-safe model training on prepared tabular data.
//!
//! This crate takes the output of `tabforge-processing` and turns it into a
//! fitted, evaluated and persisted model. Estimators are implemented natively
//! on `ndarray`, so no external runtime is needed.
//!
//! # Features
//!
//! - **Model registry**: explicit `(problem type, model type)` factories with
//!   default parameters ([`ModelRegistry`])
//! - **Safe labels**: classification labels are re-checked and encoded so
//!   labels unseen during training never break evaluation ([`ModelTrainer`])
//! - **Automated selection**: a pluggable multi-candidate search with a time
//!   budget ([`AutomatedSelector`], [`HoldoutSelector`])
//! - **Persistence**: model bundles and prediction snapshots through narrow
//!   storage traits ([`ArtifactStore`], [`MetadataStore`])
//! - **Progress reporting**: stage updates for long-running jobs
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tabforge_learning::{
//!     JsonFileMetadataStore, LocalArtifactStore, LocalDatasetSource, ModelChoice,
//!     TrainingConfig, TrainingOrchestrator,
//! };
//!
//! let orchestrator = TrainingOrchestrator::new(
//!     Arc::new(LocalDatasetSource::new("store")),
//!     Arc::new(LocalArtifactStore::new("store")),
//!     Arc::new(JsonFileMetadataStore::new("store/models.json")),
//! )
//! .with_progress(Arc::new(|u| println!("{:.0}% - {}", u.progress * 100.0, u.message)));
//!
//! let config = TrainingConfig::builder()
//!     .target_column("Survived")
//!     .model(ModelChoice::named("random_forest"))
//!     .build()?;
//!
//! let result = orchestrator.train_model("titanic", "user-1", &config)?;
//! println!("{} {:?}", result.model_name, result.metrics);
//!
//! // Score new rows with the stored bundle
//! let bundle = orchestrator.load_bundle(&result.model_path)?;
//! let predictions = bundle.predict(&new_rows)?;
//! ```
//!
//! # Architecture
//!
//! ```text
//! DatasetSource ──► preprocess_data ──► ModelTrainer ──► ModelBundle ──► ArtifactStore
//!                   (processing crate)   │        ▲                        MetadataStore
//!                                        ▼        │
//!                                 ModelRegistry / AutomatedSelector
//! ```
//!
//! # Error Handling
//!
//! The orchestrator returns [`TabforgeError`], which passes each layer's
//! typed error through unchanged:
//!
//! - [`TabforgeError::Validation`] / [`TabforgeError::Preprocessing`] - bad input
//! - [`TabforgeError::ModelTraining`] - fitting, evaluation or naming failed
//! - [`TabforgeError::Storage`] - a collaborator failed
//!
//! [`TabforgeError::is_bad_input`] separates client errors from internal ones.

mod bundle;
mod collaborators;
mod config;
mod error;
pub mod estimators;
pub mod metrics;
pub mod naming;
mod orchestrator;
mod progress;
mod registry;
mod selector;
mod trainer;

// Re-export public API
//
// Configuration types
pub use config::{
    AutoSelectConfig, ConfigValidationError, ModelChoice, ModelParams, ProblemTypeChoice,
    TrainingConfig, TrainingConfigBuilder,
};
pub use tabforge_processing::ProblemType;
// Error types
pub use error::{ModelTrainingError, Result, StorageError, TabforgeError};
// Estimators and training
pub use estimators::{Estimator, Model};
pub use metrics::Metrics;
pub use registry::{ModelFactory, ModelRegistry};
pub use selector::{AutomatedSelector, CandidateScore, HoldoutSelector, SelectionInfo, resolve_candidate};
pub use trainer::{
    ExtractedDetails, MAX_REPORTED_DETAILS, ModelTrainer, Predictions, TrainingInput, TrainingOutcome,
    resolve_feature_names,
};
// Storage collaborators
pub use collaborators::{
    ArtifactStore, DatasetSource, InMemoryMetadataStore, JsonFileMetadataStore, LocalArtifactStore,
    LocalDatasetSource, MetadataStore, ModelRecord, StorageResult,
};
// Persistence
pub use bundle::{BundlePredictions, ModelBundle, PredictionSnapshot};
// Orchestration
pub use orchestrator::{SUCCESS_MESSAGE, TrainingOrchestrator, TrainingResult};
// Progress reporting types
pub use progress::{ParseTrainingStageError, ProgressCallback, ProgressUpdate, TrainingStage};
