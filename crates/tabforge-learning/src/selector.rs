//! Automated model selection.
//!
//! [`AutomatedSelector`] is the seam for an external multi-candidate search.
//! [`HoldoutSelector`] is the built-in implementation: it scores each
//! candidate from the [`ModelRegistry`] on a seeded holdout slice of the
//! training rows, stops starting new candidates once the time budget is spent,
//! and refits the winner on every training row.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tabforge_processing::ProblemType;
use tracing::{info, warn};

use crate::config::ModelParams;
use crate::error::ModelTrainingError;
use crate::estimators::{Estimator, Model};
use crate::metrics::{Metrics, classification_metrics, regression_metrics};
use crate::registry::ModelRegistry;

/// Score of one evaluated candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub candidate: String,
    pub model_type: String,
    /// Holdout value of the optimization metric; `None` when the candidate failed.
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What the selector reports alongside the fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionInfo {
    /// Candidate name of the winner, as it was requested.
    pub best_model: String,
    /// Registered model type the winner was built from.
    pub model_type: String,
    pub metric: String,
    pub best_score: f64,
    pub candidates: Vec<CandidateScore>,
    pub elapsed_secs: f64,
}

/// External multi-candidate search returning one fitted model.
pub trait AutomatedSelector: Send + Sync {
    fn select_best_model(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        task: ProblemType,
        time_budget: Duration,
        candidates: &[String],
        metric: &str,
    ) -> Result<(Model, SelectionInfo), ModelTrainingError>;
}

/// Registry model type behind a candidate name.
///
/// Boosting library names map to the native gradient boosting model.
pub fn resolve_candidate(candidate: &str) -> &str {
    match candidate {
        "lgbm" | "lightgbm" | "xgboost" | "xgb" | "catboost" => "gradient_boosting",
        "rf" | "extra_tree" => "random_forest",
        "lrl1" | "lrl2" => "logistic_regression",
        "kneighbor" => "knn",
        other => other,
    }
}

/// Whether larger values of `metric` are better.
fn higher_is_better(metric: &str) -> Option<bool> {
    match metric {
        "r2" | "accuracy" | "precision" | "recall" | "f1" => Some(true),
        "mse" | "mae" | "rmse" => Some(false),
        _ => None,
    }
}

fn evaluate(task: ProblemType, actual: &Array1<f64>, predicted: &Array1<f64>) -> Result<Metrics, ModelTrainingError> {
    match task {
        ProblemType::Regression => regression_metrics(&actual.to_vec(), &predicted.to_vec()),
        ProblemType::Classification => {
            let to_codes = |v: &Array1<f64>| v.iter().map(|x| x.round() as i64).collect::<Vec<_>>();
            classification_metrics(&to_codes(actual), &to_codes(predicted))
        }
    }
}

/// Holdout-validated search over registry models.
#[derive(Debug, Clone)]
pub struct HoldoutSelector {
    registry: Arc<ModelRegistry>,
    /// Share of training rows held out for scoring.
    pub validation_fraction: f64,
    pub random_state: u64,
    pub n_jobs: i32,
}

impl HoldoutSelector {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            validation_fraction: 0.2,
            random_state: 42,
            n_jobs: -1,
        }
    }

    pub fn with_n_jobs(mut self, n_jobs: i32) -> Self {
        self.n_jobs = n_jobs;
        self
    }

    /// Seeded shuffle of row indices into (fit, score) slices. Tiny inputs
    /// score on the fit rows.
    fn holdout(&self, n: usize) -> (Vec<usize>, Vec<usize>) {
        let mut rows: Vec<usize> = (0..n).collect();
        rows.shuffle(&mut StdRng::seed_from_u64(self.random_state));
        let n_valid = ((n as f64 * self.validation_fraction).round() as usize).max(1);
        if n_valid >= n {
            return (rows.clone(), rows);
        }
        let valid = rows.split_off(n - n_valid);
        (rows, valid)
    }

    /// Registry defaults only; the search does not tune parameters.
    fn build(&self, task: ProblemType, model_type: &str) -> Result<Model, ModelTrainingError> {
        self.registry
            .create(task, model_type, &ModelParams::new(), self.n_jobs)
    }
}

impl AutomatedSelector for HoldoutSelector {
    fn select_best_model(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        task: ProblemType,
        time_budget: Duration,
        candidates: &[String],
        metric: &str,
    ) -> Result<(Model, SelectionInfo), ModelTrainingError> {
        let Some(maximize) = higher_is_better(metric) else {
            return Err(ModelTrainingError::InvalidParameter {
                name: "metric".to_string(),
                reason: format!("unsupported optimization metric '{metric}'"),
            });
        };
        if candidates.is_empty() {
            return Err(ModelTrainingError::SelectionFailed(
                "no candidate models given".to_string(),
            ));
        }

        let started = Instant::now();
        let (fit_rows, valid_rows) = self.holdout(x.nrows());
        let (x_fit, y_fit) = (x.select(Axis(0), &fit_rows), y.select(Axis(0), &fit_rows));
        let (x_valid, y_valid) = (x.select(Axis(0), &valid_rows), y.select(Axis(0), &valid_rows));

        let mut scores: Vec<CandidateScore> = Vec::with_capacity(candidates.len());
        let mut best: Option<(usize, f64)> = None;

        for candidate in candidates {
            if !scores.is_empty() && started.elapsed() >= time_budget {
                warn!(
                    "Time budget of {:?} spent, skipping remaining candidates after '{}'",
                    time_budget,
                    scores.last().map_or("", |s| s.candidate.as_str())
                );
                break;
            }

            let model_type = resolve_candidate(candidate).to_string();
            let outcome = self.build(task, &model_type).and_then(|mut model| {
                model.fit(&x_fit, &y_fit).map_err(ModelTrainingError::fit)?;
                let predicted = model.predict(&x_valid).map_err(ModelTrainingError::predict)?;
                let metrics = evaluate(task, &y_valid, &predicted)?;
                metrics.get(metric).ok_or_else(|| {
                    ModelTrainingError::MetricFailed(format!("{metric} is not defined for {task}"))
                })
            });

            match outcome {
                Ok(score) => {
                    info!("Candidate '{}' ({}) scored {} = {:.4}", candidate, model_type, metric, score);
                    let better = best.is_none_or(|(_, b)| if maximize { score > b } else { score < b });
                    if better {
                        best = Some((scores.len(), score));
                    }
                    scores.push(CandidateScore {
                        candidate: candidate.clone(),
                        model_type,
                        score: Some(score),
                        error: None,
                    });
                }
                Err(err) => {
                    warn!("Candidate '{}' failed: {}", candidate, err);
                    scores.push(CandidateScore {
                        candidate: candidate.clone(),
                        model_type,
                        score: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        let Some((best_idx, best_score)) = best else {
            return Err(ModelTrainingError::SelectionFailed(format!(
                "all {} candidates failed",
                scores.len()
            )));
        };
        let winner = scores[best_idx].clone();

        let mut model = self.build(task, &winner.model_type)?;
        model.fit(x, y).map_err(ModelTrainingError::fit)?;

        let info = SelectionInfo {
            best_model: winner.candidate,
            model_type: winner.model_type,
            metric: metric.to_string(),
            best_score,
            candidates: scores,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        info!(
            "Selected '{}' with {} = {:.4} in {:.2}s",
            info.best_model, info.metric, info.best_score, info.elapsed_secs
        );
        Ok((model, info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::test_data;

    fn selector() -> HoldoutSelector {
        HoldoutSelector::new(Arc::new(ModelRegistry::with_defaults())).with_n_jobs(1)
    }

    #[test]
    fn test_candidate_aliases() {
        assert_eq!(resolve_candidate("lgbm"), "gradient_boosting");
        assert_eq!(resolve_candidate("xgboost"), "gradient_boosting");
        assert_eq!(resolve_candidate("rf"), "random_forest");
        assert_eq!(resolve_candidate("ridge"), "ridge");
    }

    #[test]
    fn test_selects_linear_model_for_linear_data() {
        let (x, y) = test_data::linear_regression();
        let candidates = vec!["linear_regression".to_string(), "knn".to_string()];
        let (model, info) = selector()
            .select_best_model(&x, &y, ProblemType::Regression, Duration::from_secs(60), &candidates, "r2")
            .unwrap();

        assert_eq!(info.best_model, "linear_regression");
        assert_eq!(info.candidates.len(), 2);
        assert!(info.best_score > 0.999);
        assert!(matches!(model, Model::Linear(_)));
    }

    #[test]
    fn test_unknown_candidate_is_skipped() {
        let (x, y) = test_data::two_blobs();
        let candidates = vec!["svm".to_string(), "rf".to_string()];
        let (_, info) = selector()
            .select_best_model(&x, &y, ProblemType::Classification, Duration::from_secs(60), &candidates, "accuracy")
            .unwrap();
        assert_eq!(info.best_model, "rf");
        assert!(info.candidates[0].error.is_some());
    }

    #[test]
    fn test_exhausted_budget_still_evaluates_one_candidate() {
        let (x, y) = test_data::two_blobs();
        let candidates = vec!["naive_bayes".to_string(), "knn".to_string()];
        let (_, info) = selector()
            .select_best_model(&x, &y, ProblemType::Classification, Duration::ZERO, &candidates, "accuracy")
            .unwrap();
        assert_eq!(info.candidates.len(), 1);
        assert_eq!(info.best_model, "naive_bayes");
    }

    #[test]
    fn test_unsupported_metric() {
        let (x, y) = test_data::two_blobs();
        let err = selector()
            .select_best_model(&x, &y, ProblemType::Classification, Duration::from_secs(1), &["knn".to_string()], "auc")
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PARAMETER");
    }

    #[test]
    fn test_holdout_is_disjoint() {
        let (fit, valid) = selector().holdout(10);
        assert_eq!(fit.len(), 8);
        assert_eq!(valid.len(), 2);
        assert!(valid.iter().all(|v| !fit.contains(v)));
    }
}
