//! Median imputation followed by standard scaling.

use crate::error::{PreprocessingError, Result};
use ndarray::ArrayViewMut2;
use serde::{Deserialize, Serialize};

/// Fitted statistics for one numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericColumnStats {
    pub column: String,
    /// Fill value for missing entries.
    pub median: f64,
    /// Mean of the imputed training values.
    pub mean: f64,
    /// Population standard deviation of the imputed training values, or 1.0
    /// for constant columns.
    pub scale: f64,
}

/// Imputes missing values with the training median and standardizes to
/// zero mean and unit variance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericTransformer {
    columns: Vec<NumericColumnStats>,
}

impl NumericTransformer {
    /// Fit one set of statistics per column.
    pub fn fit(names: &[String], columns: &[Vec<Option<f64>>]) -> Result<Self> {
        let stats = names
            .iter()
            .zip(columns)
            .map(|(name, values)| fit_column(name, values))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { columns: stats })
    }

    pub fn columns(&self) -> &[NumericColumnStats] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.column.clone()).collect()
    }

    /// Write the scaled values into `out`, one output column per input column.
    pub fn transform_into(&self, columns: &[Vec<Option<f64>>], mut out: ArrayViewMut2<'_, f64>) {
        for (j, (stats, values)) in self.columns.iter().zip(columns).enumerate() {
            for (i, value) in values.iter().enumerate() {
                let filled = value.filter(|v| v.is_finite()).unwrap_or(stats.median);
                out[[i, j]] = (filled - stats.mean) / stats.scale;
            }
        }
    }
}

fn fit_column(name: &str, values: &[Option<f64>]) -> Result<NumericColumnStats> {
    let mut present: Vec<f64> = values.iter().flatten().copied().filter(|v| v.is_finite()).collect();
    if present.is_empty() {
        return Err(PreprocessingError::FitFailed(format!(
            "numeric column '{name}' has no values to fit"
        )));
    }
    let median = median(&mut present);

    let n = values.len() as f64;
    let imputed = || values.iter().map(|v| v.filter(|x| x.is_finite()).unwrap_or(median));
    let mean = imputed().sum::<f64>() / n;
    let variance = imputed().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    let scale = if std > 0.0 && std.is_finite() { std } else { 1.0 };

    Ok(NumericColumnStats {
        column: name.to_string(),
        median,
        mean,
        scale,
    })
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_fit_uses_median_and_population_std() {
        let columns = vec![vec![Some(1.0), Some(2.0), None, Some(10.0)]];
        let transformer = NumericTransformer::fit(&["x".to_string()], &columns).unwrap();
        let stats = &transformer.columns()[0];
        assert_eq!(stats.median, 2.0);
        // imputed: 1, 2, 2, 10
        assert!((stats.mean - 3.75).abs() < 1e-12);
        let expected_std = ((2.75f64.powi(2) + 1.75f64.powi(2) * 2.0 + 6.25f64.powi(2)) / 4.0).sqrt();
        assert!((stats.scale - expected_std).abs() < 1e-12);
    }

    #[test]
    fn test_constant_column_scale_is_one() {
        let columns = vec![vec![Some(4.0); 5]];
        let transformer = NumericTransformer::fit(&["c".to_string()], &columns).unwrap();
        assert_eq!(transformer.columns()[0].scale, 1.0);

        let mut out = Array2::zeros((5, 1));
        transformer.transform_into(&columns, out.view_mut());
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_missing_values_map_to_scaled_median() {
        let train = vec![vec![Some(0.0), Some(2.0), Some(4.0)]];
        let transformer = NumericTransformer::fit(&["x".to_string()], &train).unwrap();
        let mut out = Array2::zeros((1, 1));
        transformer.transform_into(&[vec![None]], out.view_mut());
        assert_eq!(out[[0, 0]], 0.0);
    }

    #[test]
    fn test_all_missing_column_fails() {
        let result = NumericTransformer::fit(&["x".to_string()], &[vec![None, None]]);
        assert!(matches!(result, Err(PreprocessingError::FitFailed(_))));
    }
}
