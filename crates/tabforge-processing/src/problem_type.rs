//! Classification vs. regression detection.
//!
//! [`ProblemTypeClassifier`] is the single decision shared by the dataset
//! validator (on the raw target) and the model trainer (on post-split
//! labels). The policy, applied in order:
//!
//! 1. categorical or text labels → classification
//! 2. numeric, integral and fewer than `max_discrete_classes` unique → classification
//! 3. unique/sample ratio below `low_cardinality_ratio` → classification
//! 4. otherwise → regression
//!
//! When labels cannot be read as numbers the decision falls back to
//! classification and says so through [`DecisionReason::is_fallback`]; callers
//! are expected to log that case.

use crate::config::ProblemTypePolicy;
use crate::types::{InferredType, ProblemType};
use crate::utils::{
    count_unique, is_datetime_dtype, is_numeric_dtype, sort_natural, string_values, to_numeric,
};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Why a problem type was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum DecisionReason {
    /// Labels are categorical or free text.
    DiscreteType { inferred: InferredType },
    /// Few unique, integral values.
    FewIntegralValues { unique: usize },
    /// Very low unique/sample ratio.
    LowCardinality { ratio: f64 },
    /// Enough distinct values to be continuous.
    Continuous { unique: usize },
    /// No non-null labels.
    NoValues,
    /// Labels could not be converted to numbers.
    ConversionFailed { rate: f64 },
    /// Label type carries no class/continuous signal (dates, invalid columns).
    UnsupportedType { inferred: InferredType },
}

impl DecisionReason {
    /// Whether the decision is the documented default rather than a rule match.
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            DecisionReason::NoValues
                | DecisionReason::ConversionFailed { .. }
                | DecisionReason::UnsupportedType { .. }
        )
    }
}

/// Outcome of [`ProblemTypeClassifier::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProblemTypeDecision {
    pub problem_type: ProblemType,
    pub reason: DecisionReason,
    pub unique_count: usize,
    pub n_samples: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProblemTypeClassifier {
    policy: ProblemTypePolicy,
}

impl ProblemTypeClassifier {
    pub fn new(policy: ProblemTypePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ProblemTypePolicy {
        &self.policy
    }

    /// Decide the problem type of a label series.
    ///
    /// `declared` is the analyzer's inferred type when one is known. Otherwise
    /// numeric dtypes are numeric and other labels are numeric only when at
    /// least `numeric_rate` of them parse as numbers.
    pub fn classify(
        &self,
        labels: &Series,
        declared: Option<InferredType>,
    ) -> PolarsResult<ProblemTypeDecision> {
        let raw = string_values(labels)?;
        let n_samples = raw.iter().flatten().count();
        let unique_count = count_unique(&raw);

        let decide = |problem_type, reason| ProblemTypeDecision {
            problem_type,
            reason,
            unique_count,
            n_samples,
        };

        if n_samples == 0 {
            return Ok(decide(ProblemType::Classification, DecisionReason::NoValues));
        }

        let conversion = to_numeric(labels)?;
        let inferred = declared.unwrap_or_else(|| {
            if is_numeric_dtype(labels.dtype()) {
                InferredType::Numeric
            } else if is_datetime_dtype(labels.dtype()) {
                InferredType::Datetime
            } else if conversion.rate() >= self.policy.numeric_rate {
                InferredType::Numeric
            } else {
                InferredType::Categorical
            }
        });
        match inferred {
            InferredType::Categorical | InferredType::Text => {
                return Ok(decide(
                    ProblemType::Classification,
                    DecisionReason::DiscreteType { inferred },
                ));
            }
            InferredType::Datetime | InferredType::Invalid => {
                return Ok(decide(
                    ProblemType::Classification,
                    DecisionReason::UnsupportedType { inferred },
                ));
            }
            InferredType::Numeric => {}
        }

        let rate = conversion.rate();
        if conversion.converted == 0 || rate < self.policy.numeric_rate {
            return Ok(decide(
                ProblemType::Classification,
                DecisionReason::ConversionFailed { rate },
            ));
        }

        let unique = conversion.unique_count();
        if unique < self.policy.max_discrete_classes && conversion.is_integral() {
            return Ok(decide(
                ProblemType::Classification,
                DecisionReason::FewIntegralValues { unique },
            ));
        }

        let ratio = unique as f64 / conversion.converted as f64;
        if ratio < self.policy.low_cardinality_ratio {
            return Ok(decide(
                ProblemType::Classification,
                DecisionReason::LowCardinality { ratio },
            ));
        }

        Ok(decide(
            ProblemType::Regression,
            DecisionReason::Continuous { unique },
        ))
    }
}

// ============================================================================
// Target Analysis
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetWarning {
    #[serde(rename = "type")]
    pub level: WarningLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStatistics {
    pub n_samples: usize,
    pub n_unique: usize,
    pub unique_ratio: f64,
    pub is_numeric: bool,
    pub has_floats: bool,
    pub dtype: String,
    /// First ten distinct values in sorted order.
    pub sample_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRecommendation {
    pub regression: bool,
    pub classification: bool,
    pub message: String,
}

/// Pre-training report on a candidate target column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetAnalysis {
    pub target_column: String,
    pub recommended_problem_type: ProblemType,
    pub statistics: TargetStatistics,
    pub warnings: Vec<TargetWarning>,
    pub recommendations: TargetRecommendation,
}

/// Inspect a target column and explain which problem type fits it.
pub fn analyze_target_column(
    classifier: &ProblemTypeClassifier,
    labels: &Series,
) -> PolarsResult<TargetAnalysis> {
    let decision = classifier.classify(labels, None)?;
    let raw = string_values(labels)?;
    let conversion = to_numeric(labels)?;

    let n_samples = decision.n_samples;
    let n_unique = decision.unique_count;
    let unique_ratio = if n_samples > 0 {
        n_unique as f64 / n_samples as f64
    } else {
        0.0
    };
    let is_numeric = is_numeric_dtype(labels.dtype()) || conversion.converted > 0;
    let has_floats = !conversion.is_integral();

    let mut distinct: Vec<String> = raw.into_iter().flatten().collect();
    sort_natural(&mut distinct);
    distinct.dedup();
    distinct.truncate(10);

    let detected = decision.problem_type;
    let mut warnings = Vec::new();
    if detected == ProblemType::Regression && n_unique < 10 {
        warnings.push(TargetWarning {
            level: WarningLevel::Info,
            message: format!(
                "Only {n_unique} unique values. Consider classification for discrete categories."
            ),
        });
    }
    if detected == ProblemType::Classification && n_unique > 50 {
        warnings.push(TargetWarning {
            level: WarningLevel::Warning,
            message: format!(
                "High number of classes ({n_unique}). Classification may be challenging."
            ),
        });
    }
    if detected == ProblemType::Regression && !is_numeric {
        warnings.push(TargetWarning {
            level: WarningLevel::Error,
            message: "Target contains non-numeric values. Use classification or clean data."
                .to_string(),
        });
    }

    Ok(TargetAnalysis {
        target_column: labels.name().to_string(),
        recommended_problem_type: detected,
        statistics: TargetStatistics {
            n_samples,
            n_unique,
            unique_ratio,
            is_numeric,
            has_floats,
            dtype: labels.dtype().to_string(),
            sample_values: distinct,
        },
        warnings,
        recommendations: TargetRecommendation {
            regression: detected == ProblemType::Regression,
            classification: detected == ProblemType::Classification,
            message: format!(
                "Based on {n_unique} unique values in {n_samples} samples, {detected} is recommended."
            ),
        },
    })
}
