//! Evaluation metrics computed on the held-out split.
//!
//! Classification averaging follows a fixed policy: binary precision, recall
//! and F1 (positive label `1`) when the evaluation labels have exactly two
//! classes, support-weighted averages otherwise, and all three set to `1.0`
//! when the evaluation split holds a single class. Binary scoring falls back
//! to accuracy when the predictions leave the two classes or label `1` is
//! absent. Divisions by zero yield `0`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ModelTrainingError;

/// Metric set for one training run. Only the fields of the run's problem
/// type are populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r2_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mae: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rmse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recall: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f1_score: Option<f64>,
}

impl Metrics {
    /// Look a metric up by its serialized name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "r2" | "r2_score" => self.r2_score,
            "mse" => self.mse,
            "mae" => self.mae,
            "rmse" => self.rmse,
            "accuracy" => self.accuracy,
            "precision" => self.precision,
            "recall" => self.recall,
            "f1" | "f1_score" => self.f1_score,
            _ => None,
        }
    }
}

fn check_lengths(actual: usize, predicted: usize) -> Result<(), ModelTrainingError> {
    if actual == 0 {
        return Err(ModelTrainingError::MetricFailed(
            "evaluation split is empty".to_string(),
        ));
    }
    if actual != predicted {
        return Err(ModelTrainingError::MetricFailed(format!(
            "{actual} actual values but {predicted} predictions"
        )));
    }
    Ok(())
}

fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 { 0.0 } else { numerator / denominator }
}

/// R², MSE, MAE and RMSE.
pub fn regression_metrics(actual: &[f64], predicted: &[f64]) -> Result<Metrics, ModelTrainingError> {
    check_lengths(actual.len(), predicted.len())?;
    if actual.iter().chain(predicted).any(|v| !v.is_finite()) {
        return Err(ModelTrainingError::MetricFailed(
            "non-finite values in regression output".to_string(),
        ));
    }

    let n = actual.len() as f64;
    let mean = actual.iter().sum::<f64>() / n;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    let mut abs_err = 0.0;
    for (a, p) in actual.iter().zip(predicted) {
        ss_res += (a - p).powi(2);
        ss_tot += (a - mean).powi(2);
        abs_err += (a - p).abs();
    }

    // A constant target scores 1 only when predicted exactly.
    let r2 = if ss_tot == 0.0 {
        if ss_res == 0.0 { 1.0 } else { 0.0 }
    } else {
        1.0 - ss_res / ss_tot
    };
    let mse = ss_res / n;

    Ok(Metrics {
        r2_score: Some(r2),
        mse: Some(mse),
        mae: Some(abs_err / n),
        rmse: Some(mse.sqrt()),
        ..Metrics::default()
    })
}

#[derive(Default, Clone, Copy)]
struct LabelCounts {
    true_positive: usize,
    predicted: usize,
    support: usize,
}

impl LabelCounts {
    fn precision(&self) -> f64 {
        safe_div(self.true_positive as f64, self.predicted as f64)
    }

    fn recall(&self) -> f64 {
        safe_div(self.true_positive as f64, self.support as f64)
    }

    fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        safe_div(2.0 * p * r, p + r)
    }
}

/// Accuracy plus precision, recall and F1 under the averaging policy above.
pub fn classification_metrics(actual: &[i64], predicted: &[i64]) -> Result<Metrics, ModelTrainingError> {
    check_lengths(actual.len(), predicted.len())?;

    let n = actual.len();
    let correct = actual.iter().zip(predicted).filter(|(a, p)| a == p).count();
    let accuracy = correct as f64 / n as f64;

    let mut counts: BTreeMap<i64, LabelCounts> = BTreeMap::new();
    for (&a, &p) in actual.iter().zip(predicted) {
        counts.entry(a).or_default().support += 1;
        counts.entry(p).or_default().predicted += 1;
        if a == p {
            counts.entry(a).or_default().true_positive += 1;
        }
    }
    let true_classes: BTreeSet<i64> = actual.iter().copied().collect();
    let predicted_classes: BTreeSet<i64> = predicted.iter().copied().collect();
    let binary_scorable =
        predicted_classes.is_subset(&true_classes) && true_classes.contains(&1);

    let (precision, recall, f1) = match true_classes.len() {
        1 => (1.0, 1.0, 1.0),
        2 => match counts.get(&1) {
            Some(positive) if binary_scorable => {
                (positive.precision(), positive.recall(), positive.f1())
            }
            _ => {
                tracing::warn!(
                    classes = ?true_classes,
                    predicted = ?predicted_classes,
                    "Binary metrics need exactly two labels including 1; reporting accuracy instead"
                );
                (accuracy, accuracy, accuracy)
            }
        },
        _ => {
            let mut totals = (0.0, 0.0, 0.0);
            for c in counts.values() {
                let weight = c.support as f64 / n as f64;
                totals.0 += weight * c.precision();
                totals.1 += weight * c.recall();
                totals.2 += weight * c.f1();
            }
            totals
        }
    };

    Ok(Metrics {
        accuracy: Some(accuracy),
        precision: Some(precision),
        recall: Some(recall),
        f1_score: Some(f1),
        ..Metrics::default()
    })
}
