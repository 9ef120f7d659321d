//! Label encoding that tolerates labels unseen during fit.
//!
//! [`SafeLabelEncoder`] learns a class vocabulary from training labels and
//! maps evaluation labels that fall outside it according to an
//! [`UnknownLabelStrategy`]. Every transform returns [`TransformStats`] so
//! callers can surface how many labels were affected.

use crate::error::LabelEncodingError;
use crate::utils::sort_natural;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Default sentinel for unknown and missing labels.
pub const UNKNOWN_VALUE: i64 = -1;

/// What to do with a label that was not seen during fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownLabelStrategy {
    /// Fail on the first unseen (or null) label.
    Error,
    /// Map to the unknown sentinel.
    UseEncodedValue,
    /// Map to the index of the most frequent training class.
    #[default]
    UseMode,
}

impl UnknownLabelStrategy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::UseEncodedValue => "use_encoded_value",
            Self::UseMode => "use_mode",
        }
    }
}

impl fmt::Display for UnknownLabelStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnknownLabelStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(Self::Error),
            "use_encoded_value" => Ok(Self::UseEncodedValue),
            "use_mode" => Ok(Self::UseMode),
            other => Err(format!("unknown label strategy '{other}'")),
        }
    }
}

/// Statistics for one transform call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformStats {
    pub total_samples: usize,
    /// Unseen and null labels.
    pub unseen_count: usize,
    /// Distinct unseen labels, sorted.
    pub unseen_labels: Vec<String>,
    pub unseen_percentage: f64,
    pub strategy_used: UnknownLabelStrategy,
}

/// Snapshot of the fitted vocabulary and unseen labels seen so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderStats {
    pub n_classes: usize,
    pub classes: Vec<String>,
    pub mode_class: Option<String>,
    pub unseen_encountered: bool,
    pub total_unseen_labels: usize,
    pub all_unseen_labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeLabelEncoder {
    strategy: UnknownLabelStrategy,
    unknown_value: i64,
    classes: Vec<String>,
    mode_class: Option<String>,
    unseen_labels: Vec<String>,
}

impl Default for SafeLabelEncoder {
    fn default() -> Self {
        Self::new(UnknownLabelStrategy::default())
    }
}

impl SafeLabelEncoder {
    pub fn new(strategy: UnknownLabelStrategy) -> Self {
        Self {
            strategy,
            unknown_value: UNKNOWN_VALUE,
            classes: Vec::new(),
            mode_class: None,
            unseen_labels: Vec::new(),
        }
    }

    /// Use a sentinel other than `-1` for unknown labels.
    pub fn with_unknown_value(mut self, value: i64) -> Self {
        self.unknown_value = value;
        self
    }

    pub fn strategy(&self) -> UnknownLabelStrategy {
        self.strategy
    }

    pub fn unknown_value(&self) -> i64 {
        self.unknown_value
    }

    /// Class vocabulary in natural order; a label's index is its code.
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn mode_class(&self) -> Option<&str> {
        self.mode_class.as_deref()
    }

    pub fn is_fitted(&self) -> bool {
        !self.classes.is_empty()
    }

    /// `{label: code}` for every known class.
    pub fn label_mapping(&self) -> BTreeMap<String, i64> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i as i64))
            .collect()
    }

    /// Learn the vocabulary and mode from training labels, ignoring nulls.
    pub fn fit(&mut self, labels: &[Option<String>]) -> Result<(), LabelEncodingError> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for label in labels.iter().flatten() {
            *counts.entry(label.as_str()).or_default() += 1;
        }
        if counts.is_empty() {
            return Err(LabelEncodingError::EmptyFit);
        }

        let mut classes: Vec<String> = counts.keys().map(|c| c.to_string()).collect();
        sort_natural(&mut classes);

        // Ties go to the first class in vocabulary order.
        let mut mode = &classes[0];
        for class in &classes {
            if counts[class.as_str()] > counts[mode.as_str()] {
                mode = class;
            }
        }

        self.mode_class = Some(mode.clone());
        self.classes = classes;
        self.unseen_labels.clear();
        Ok(())
    }

    /// Encode labels, recording any that were not seen during fit.
    pub fn transform(
        &mut self,
        labels: &[Option<String>],
    ) -> Result<(Vec<i64>, TransformStats), LabelEncodingError> {
        if !self.is_fitted() {
            return Err(LabelEncodingError::NotFitted);
        }
        let index: HashMap<&str, i64> = self
            .classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i as i64))
            .collect();
        let mode_code = self
            .mode_class
            .as_deref()
            .and_then(|m| index.get(m).copied())
            .unwrap_or(self.unknown_value);

        let mut encoded = Vec::with_capacity(labels.len());
        let mut unseen_count = 0;
        let mut unseen = BTreeSet::new();

        for (i, label) in labels.iter().enumerate() {
            let Some(label) = label else {
                if self.strategy == UnknownLabelStrategy::Error {
                    return Err(LabelEncodingError::NullLabel { index: i });
                }
                encoded.push(self.unknown_value);
                unseen_count += 1;
                continue;
            };

            if let Some(code) = index.get(label.as_str()) {
                encoded.push(*code);
                continue;
            }

            unseen_count += 1;
            unseen.insert(label.clone());
            match self.strategy {
                UnknownLabelStrategy::Error => {
                    return Err(LabelEncodingError::UnseenLabel {
                        label: label.clone(),
                        known: self.classes.clone(),
                    });
                }
                UnknownLabelStrategy::UseMode => encoded.push(mode_code),
                UnknownLabelStrategy::UseEncodedValue => encoded.push(self.unknown_value),
            }
        }

        let unseen_labels: Vec<String> = unseen.into_iter().collect();
        if unseen_count > 0 {
            warn!(
                "{} unseen labels encountered during transform. Unique unseen labels: {:?} (strategy: {})",
                unseen_count,
                unseen_labels.iter().take(10).collect::<Vec<_>>(),
                self.strategy
            );
            self.unseen_labels.extend(unseen_labels.iter().cloned());
        }

        let total_samples = labels.len();
        let stats = TransformStats {
            total_samples,
            unseen_count,
            unseen_labels,
            unseen_percentage: if total_samples > 0 {
                unseen_count as f64 / total_samples as f64 * 100.0
            } else {
                0.0
            },
            strategy_used: self.strategy,
        };
        Ok((encoded, stats))
    }

    pub fn fit_transform(
        &mut self,
        labels: &[Option<String>],
    ) -> Result<(Vec<i64>, TransformStats), LabelEncodingError> {
        self.fit(labels)?;
        self.transform(labels)
    }

    /// Decode codes back to labels. The sentinel renders as
    /// `<UNKNOWN_{sentinel}>` and out-of-range codes as `<INVALID_{code}>`.
    pub fn inverse_transform(&self, codes: &[i64]) -> Vec<String> {
        codes
            .iter()
            .map(|&code| {
                if code == self.unknown_value {
                    format!("<UNKNOWN_{}>", self.unknown_value)
                } else {
                    usize::try_from(code)
                        .ok()
                        .and_then(|i| self.classes.get(i))
                        .cloned()
                        .unwrap_or_else(|| format!("<INVALID_{code}>"))
                }
            })
            .collect()
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            n_classes: self.classes.len(),
            classes: self.classes.clone(),
            mode_class: self.mode_class.clone(),
            unseen_encountered: !self.unseen_labels.is_empty(),
            total_unseen_labels: self.unseen_labels.len(),
            all_unseen_labels: self.unseen_labels.clone(),
        }
    }
}

static_assertions::assert_impl_all!(SafeLabelEncoder: Send, Sync);

// ============================================================================
// Train/Test Helpers
// ============================================================================

/// Statistics for a train/test encoding pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingStats {
    pub train: TransformStats,
    pub test: TransformStats,
    #[serde(rename = "encoder_info")]
    pub encoder: EncoderStats,
}

/// Fit on `train` only, then encode both partitions.
pub fn safe_encode_labels(
    train: &[Option<String>],
    test: &[Option<String>],
    strategy: UnknownLabelStrategy,
) -> Result<(Vec<i64>, Vec<i64>, SafeLabelEncoder, EncodingStats), LabelEncodingError> {
    let mut encoder = SafeLabelEncoder::new(strategy);
    let (train_codes, train_stats) = encoder.fit_transform(train)?;
    let (test_codes, test_stats) = encoder.transform(test)?;

    if test_stats.unseen_count > 0 {
        warn!(
            "Test set contains {} unseen labels ({:.2}%)",
            test_stats.unseen_count, test_stats.unseen_percentage
        );
    }

    let stats = EncodingStats {
        train: train_stats,
        test: test_stats,
        encoder: encoder.stats(),
    };
    Ok((train_codes, test_codes, encoder, stats))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelIssueKind {
    SparseClasses,
    UnseenTestLabels,
    ClassImbalance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelIssue {
    #[serde(rename = "type")]
    pub kind: LabelIssueKind,
    pub severity: IssueSeverity,
    pub message: String,
    pub details: serde_json::Value,
}

/// Suitability of a train/test label split for training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDistributionReport {
    /// False iff an error-severity issue was found.
    pub valid: bool,
    pub issues: Vec<LabelIssue>,
    pub train_distribution: BTreeMap<String, usize>,
    pub test_distribution: BTreeMap<String, usize>,
    pub n_train_classes: usize,
    pub n_test_classes: usize,
}

const IMBALANCE_RATIO: f64 = 50.0;

fn distribution(labels: &[Option<String>]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for label in labels.iter().flatten() {
        *counts.entry(label.clone()).or_default() += 1;
    }
    counts
}

/// Check class sizes, unseen test labels and imbalance before encoding.
///
/// Unseen test labels are an error only under [`UnknownLabelStrategy::Error`];
/// the other strategies handle them, so they are reported as warnings.
pub fn validate_label_distribution(
    train: &[Option<String>],
    test: &[Option<String>],
    min_samples_per_class: usize,
    strategy: UnknownLabelStrategy,
) -> LabelDistributionReport {
    let train_distribution = distribution(train);
    let test_distribution = distribution(test);
    let mut issues = Vec::new();

    let sparse: BTreeMap<&String, &usize> = train_distribution
        .iter()
        .filter(|(_, count)| **count < min_samples_per_class)
        .collect();
    if !sparse.is_empty() {
        issues.push(LabelIssue {
            kind: LabelIssueKind::SparseClasses,
            severity: IssueSeverity::Warning,
            message: format!(
                "{} classes have fewer than {} samples",
                sparse.len(),
                min_samples_per_class
            ),
            details: serde_json::json!(sparse),
        });
    }

    let unseen: Vec<&String> = test_distribution
        .keys()
        .filter(|label| !train_distribution.contains_key(*label))
        .collect();
    if !unseen.is_empty() {
        let severity = if strategy == UnknownLabelStrategy::Error {
            IssueSeverity::Error
        } else {
            IssueSeverity::Warning
        };
        issues.push(LabelIssue {
            kind: LabelIssueKind::UnseenTestLabels,
            severity,
            message: format!(
                "Test set contains {} labels not in training set",
                unseen.len()
            ),
            details: serde_json::json!(unseen.iter().take(10).collect::<Vec<_>>()),
        });
    }

    if train_distribution.len() > 1 {
        let max = train_distribution.iter().max_by_key(|(_, c)| **c);
        let min = train_distribution.iter().min_by_key(|(_, c)| **c);
        if let (Some((max_class, &max_count)), Some((min_class, &min_count))) = (max, min) {
            let ratio = max_count as f64 / min_count as f64;
            if ratio > IMBALANCE_RATIO {
                issues.push(LabelIssue {
                    kind: LabelIssueKind::ClassImbalance,
                    severity: IssueSeverity::Warning,
                    message: format!("Severe class imbalance detected (ratio: {ratio:.1}:1)"),
                    details: serde_json::json!({
                        "max_class": max_class,
                        "max_count": max_count,
                        "min_class": min_class,
                        "min_count": min_count,
                    }),
                });
            }
        }
    }

    LabelDistributionReport {
        valid: !issues.iter().any(|i| i.severity == IssueSeverity::Error),
        issues,
        n_train_classes: train_distribution.len(),
        n_test_classes: test_distribution.len(),
        train_distribution,
        test_distribution,
    }
}
