//! Smoothed target encoding for high-cardinality categoricals.
//!
//! Each category is replaced by a blend of its mean target and the global
//! target mean. With [`TargetSmoothing::Auto`] the blend weight is
//! `n·var_y / (n·var_y + var_c)`, so small or noisy categories lean toward the
//! global mean. Categories unseen during fit encode as the global mean.
//!
//! Binary targets produce one column (indicator of the second class in
//! natural order), multiclass targets one column per class and continuous
//! targets one column.

use crate::config::TargetSmoothing;
use crate::error::{PreprocessingError, Result};
use crate::utils::{is_numeric_dtype, sort_natural, string_values, to_numeric};
use ndarray::ArrayViewMut2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Continuous,
    Binary,
    Multiclass,
}

/// Target reshaped into one numeric vector per output dimension.
#[derive(Debug, Clone)]
struct EncodedTarget {
    kind: TargetKind,
    /// Class labels for binary and multiclass targets.
    classes: Vec<String>,
    /// `dims[k][i]`: value of dimension `k` for row `i`, `None` when the
    /// target itself is missing.
    dims: Vec<Vec<Option<f64>>>,
}

impl EncodedTarget {
    fn from_series(target: &Series) -> Result<Self> {
        let raw = string_values(target)?;
        let conversion = to_numeric(target)?;
        let all_numeric = is_numeric_dtype(target.dtype())
            || (conversion.non_null > 0 && conversion.converted == conversion.non_null);

        let mut classes: Vec<String> = raw.iter().flatten().cloned().collect();
        sort_natural(&mut classes);
        classes.dedup();

        if classes.is_empty() {
            return Err(PreprocessingError::FitFailed(
                "target encoding needs at least one non-null target".to_string(),
            ));
        }

        if all_numeric && classes.len() != 2 {
            return Ok(Self {
                kind: TargetKind::Continuous,
                classes: Vec::new(),
                dims: vec![conversion.values],
            });
        }

        let indicator = |class: &str| -> Vec<Option<f64>> {
            raw.iter()
                .map(|v| v.as_deref().map(|v| if v == class { 1.0 } else { 0.0 }))
                .collect()
        };

        if classes.len() <= 2 {
            let positive = classes[classes.len() - 1].clone();
            Ok(Self {
                kind: TargetKind::Binary,
                dims: vec![indicator(&positive)],
                classes,
            })
        } else {
            Ok(Self {
                kind: TargetKind::Multiclass,
                dims: classes.iter().map(|c| indicator(c)).collect(),
                classes,
            })
        }
    }
}

/// Per-category encodings for one column, one value per output dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetColumn {
    pub column: String,
    pub encodings: HashMap<String, Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEncoder {
    kind: TargetKind,
    classes: Vec<String>,
    smoothing: TargetSmoothing,
    fill_value: String,
    target_means: Vec<f64>,
    columns: Vec<TargetColumn>,
}

impl TargetEncoder {
    pub fn fit(
        names: &[String],
        columns: &[Vec<Option<String>>],
        target: &Series,
        smoothing: TargetSmoothing,
        fill_value: &str,
    ) -> Result<Self> {
        let encoded = EncodedTarget::from_series(target)?;
        if let Some(values) = columns.iter().find(|c| c.len() != target.len()) {
            return Err(PreprocessingError::FitFailed(format!(
                "target has {} rows but feature has {}",
                target.len(),
                values.len()
            )));
        }

        let target_means: Vec<f64> = encoded
            .dims
            .iter()
            .map(|dim| {
                let (sum, n) = dim.iter().flatten().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                sum / n.max(1) as f64
            })
            .collect();
        let target_vars: Vec<f64> = encoded
            .dims
            .iter()
            .zip(&target_means)
            .map(|(dim, mean)| {
                let (sq, n) = dim
                    .iter()
                    .flatten()
                    .fold((0.0, 0usize), |(s, n), v| (s + (v - mean).powi(2), n + 1));
                sq / n.max(1) as f64
            })
            .collect();

        let fitted = names
            .iter()
            .zip(columns)
            .map(|(name, values)| {
                let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
                for (i, value) in values.iter().enumerate() {
                    groups.entry(value.as_deref().unwrap_or(fill_value)).or_default().push(i);
                }
                let encodings = groups
                    .into_iter()
                    .map(|(category, rows)| {
                        let per_dim = encoded
                            .dims
                            .iter()
                            .enumerate()
                            .map(|(k, dim)| {
                                let observed: Vec<f64> = rows.iter().filter_map(|&i| dim[i]).collect();
                                smoothed_mean(&observed, target_means[k], target_vars[k], smoothing)
                            })
                            .collect();
                        (category.to_string(), per_dim)
                    })
                    .collect();
                TargetColumn {
                    column: name.clone(),
                    encodings,
                }
            })
            .collect();

        Ok(Self {
            kind: encoded.kind,
            classes: encoded.classes,
            smoothing,
            fill_value: fill_value.to_string(),
            target_means,
            columns: fitted,
        })
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    fn dims(&self) -> usize {
        self.target_means.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len() * self.dims()
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.width());
        for column in &self.columns {
            match self.kind {
                TargetKind::Multiclass => {
                    for class in &self.classes {
                        names.push(format!("{}_{}", column.column, class));
                    }
                }
                TargetKind::Continuous | TargetKind::Binary => names.push(column.column.clone()),
            }
        }
        names
    }

    pub fn transform_into(&self, columns: &[Vec<Option<String>>], mut out: ArrayViewMut2<'_, f64>) {
        let dims = self.dims();
        for (j, (column, values)) in self.columns.iter().zip(columns).enumerate() {
            for (i, value) in values.iter().enumerate() {
                let value = value.as_deref().unwrap_or(&self.fill_value);
                let encoding = column.encodings.get(value).unwrap_or(&self.target_means);
                for (k, v) in encoding.iter().enumerate() {
                    out[[i, j * dims + k]] = *v;
                }
            }
        }
    }
}

fn smoothed_mean(observed: &[f64], global_mean: f64, global_var: f64, smoothing: TargetSmoothing) -> f64 {
    if observed.is_empty() {
        return global_mean;
    }
    let n = observed.len() as f64;
    let sum: f64 = observed.iter().sum();
    let mean = sum / n;
    match smoothing {
        TargetSmoothing::Fixed(m) => (sum + m * global_mean) / (n + m),
        TargetSmoothing::Auto => {
            let var = (observed.iter().map(|v| v * v).sum::<f64>() / n - mean * mean).max(0.0);
            let denominator = n * global_var + var;
            if denominator > 0.0 {
                let weight = n * global_var / denominator;
                weight * mean + (1.0 - weight) * global_mean
            } else {
                mean
            }
        }
    }
}
