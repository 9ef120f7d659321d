//! Progress reporting for training jobs.
//!
//! The orchestrator reports a [`ProgressUpdate`] each time a job enters a new
//! [`TrainingStage`]. Callers subscribe with a [`ProgressCallback`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tabforge_learning::{ProgressCallback, ProgressUpdate, TrainingStage};
//!
//! let callback: ProgressCallback = Arc::new(|update: ProgressUpdate| {
//!     println!("[{}] {:.0}% {}", update.stage, update.progress * 100.0, update.message);
//!     if update.stage == TrainingStage::Training {
//!         println!("  model: {:?}", update.model_type);
//!     }
//! });
//! # callback(ProgressUpdate::default());
//! ```

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

/// Stage of a training job.
///
/// Jobs move through the stages in declaration order. [`Complete`](Self::Complete)
/// and [`Failed`](Self::Failed) are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TrainingStage {
    /// Downloading and decoding the raw dataset.
    #[default]
    Fetching,

    /// Validating, splitting and encoding the table.
    Preprocessing,

    /// Resolving the model type and building the estimator.
    Initializing,

    /// Fitting and evaluating the model.
    Training,

    /// Uploading the bundle and prediction snapshot, recording the model.
    Persisting,

    Complete,

    Failed,
}

impl TrainingStage {
    /// Every stage, in order.
    pub const ALL: [TrainingStage; 7] = [
        TrainingStage::Fetching,
        TrainingStage::Preprocessing,
        TrainingStage::Initializing,
        TrainingStage::Training,
        TrainingStage::Persisting,
        TrainingStage::Complete,
        TrainingStage::Failed,
    ];

    /// ```
    /// use tabforge_learning::TrainingStage;
    ///
    /// assert_eq!(TrainingStage::Persisting.as_str(), "persisting");
    /// ```
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStage::Fetching => "fetching",
            TrainingStage::Preprocessing => "preprocessing",
            TrainingStage::Initializing => "initializing",
            TrainingStage::Training => "training",
            TrainingStage::Persisting => "persisting",
            TrainingStage::Complete => "complete",
            TrainingStage::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrainingStage::Complete | TrainingStage::Failed)
    }

    /// Overall progress once this stage has started.
    #[must_use]
    pub fn progress(&self) -> f64 {
        match self {
            TrainingStage::Fetching => 0.0,
            TrainingStage::Preprocessing => 0.1,
            TrainingStage::Initializing => 0.3,
            TrainingStage::Training => 0.4,
            TrainingStage::Persisting => 0.85,
            TrainingStage::Complete | TrainingStage::Failed => 1.0,
        }
    }
}

impl std::fmt::Display for TrainingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no [`TrainingStage`].
///
/// ```
/// use tabforge_learning::TrainingStage;
///
/// let err = "cancelled".parse::<TrainingStage>().unwrap_err();
/// assert_eq!(err.invalid_value(), "cancelled");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTrainingStageError {
    invalid_value: String,
}

impl ParseTrainingStageError {
    #[must_use]
    pub fn invalid_value(&self) -> &str {
        &self.invalid_value
    }
}

impl std::fmt::Display for ParseTrainingStageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let valid: Vec<&str> = TrainingStage::ALL.iter().map(TrainingStage::as_str).collect();
        write!(
            f,
            "invalid training stage: '{}'. Valid values are: {}",
            self.invalid_value,
            valid.join(", ")
        )
    }
}

impl std::error::Error for ParseTrainingStageError {}

impl FromStr for TrainingStage {
    type Err = ParseTrainingStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrainingStage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| ParseTrainingStageError {
                invalid_value: s.to_string(),
            })
    }
}

/// One progress report.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ProgressUpdate {
    pub stage: TrainingStage,

    /// Overall progress from 0.0 to 1.0, non-decreasing within a job.
    pub progress: f64,

    pub message: String,

    /// Model type being trained, once it is known.
    pub model_type: Option<String>,
}

/// Receives progress updates; must be cheap and thread-safe.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Sends updates to an optional callback and mirrors them to the log.
#[derive(Clone, Default)]
pub(crate) struct ProgressReporter {
    callback: Option<ProgressCallback>,
    model_type: Option<String>,
}

impl ProgressReporter {
    pub(crate) fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            model_type: None,
        }
    }

    pub(crate) fn set_model_type(&mut self, model_type: &str) {
        self.model_type = Some(model_type.to_string());
    }

    pub(crate) fn report(&self, stage: TrainingStage, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("[{}] {}", stage, message);
        if let Some(callback) = &self.callback {
            callback(ProgressUpdate {
                stage,
                progress: stage.progress(),
                message,
                model_type: self.model_type.clone(),
            });
        }
    }
}
