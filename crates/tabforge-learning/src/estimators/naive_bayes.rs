use super::{
    Estimator, EstimatorError, Result, argmax, check_fit_input, check_predict_input,
    encode_classes, sorted_classes,
};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Gaussian naive Bayes classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianNaiveBayes {
    /// Share of the largest feature variance added to every variance.
    pub var_smoothing: f64,
    classes: Vec<f64>,
    log_priors: Vec<f64>,
    /// Per class means, shape (classes, features).
    means: Option<Array2<f64>>,
    variances: Option<Array2<f64>>,
}

impl Default for GaussianNaiveBayes {
    fn default() -> Self {
        Self {
            var_smoothing: 1e-9,
            classes: Vec::new(),
            log_priors: Vec::new(),
            means: None,
            variances: None,
        }
    }
}

impl GaussianNaiveBayes {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Estimator for GaussianNaiveBayes {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_fit_input(x, y)?;
        if !(self.var_smoothing >= 0.0 && self.var_smoothing.is_finite()) {
            return Err(EstimatorError::parameter("var_smoothing", "must be non-negative"));
        }

        let classes = sorted_classes(y);
        let codes = encode_classes(&classes, y);
        let (n, p) = x.dim();
        let k = classes.len();

        let max_variance = x
            .var_axis(Axis(0), 0.0)
            .iter()
            .copied()
            .fold(0.0_f64, f64::max);
        let epsilon = (self.var_smoothing * max_variance).max(1e-12);

        let mut means = Array2::zeros((k, p));
        let mut variances = Array2::zeros((k, p));
        let mut log_priors = Vec::with_capacity(k);
        for class in 0..k {
            let rows: Vec<usize> = (0..n).filter(|&i| codes[i] == class).collect();
            let members = x.select(Axis(0), &rows);
            let mean = members.mean_axis(Axis(0)).ok_or(EstimatorError::EmptyInput)?;
            let variance = members.var_axis(Axis(0), 0.0);
            means.row_mut(class).assign(&mean);
            variances.row_mut(class).assign(&variance.mapv(|v| v + epsilon));
            log_priors.push((rows.len() as f64 / n as f64).ln());
        }

        self.classes = classes;
        self.log_priors = log_priors;
        self.means = Some(means);
        self.variances = Some(variances);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let (Some(means), Some(variances)) = (&self.means, &self.variances) else {
            return Err(EstimatorError::NotFitted);
        };
        check_predict_input(x, means.ncols())?;

        let two_pi = 2.0 * std::f64::consts::PI;
        Ok(x
            .rows()
            .into_iter()
            .map(|row| {
                let scores = (0..self.classes.len()).map(|c| {
                    let log_likelihood: f64 = row
                        .iter()
                        .zip(means.row(c))
                        .zip(variances.row(c))
                        .map(|((v, m), var)| -0.5 * ((two_pi * var).ln() + (v - m).powi(2) / var))
                        .sum();
                    self.log_priors[c] + log_likelihood
                });
                self.classes[argmax(scores)]
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::test_data;
    use ndarray::array;

    #[test]
    fn test_separates_blobs() {
        let (x, y) = test_data::three_blobs();
        let mut model = GaussianNaiveBayes::new();
        model.fit(&x, &y).unwrap();
        assert_eq!(model.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_constant_feature_is_smoothed() {
        let x = array![[1.0, 0.0], [1.0, 0.1], [1.0, 5.0], [1.0, 5.1]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let mut model = GaussianNaiveBayes::new();
        model.fit(&x, &y).unwrap();
        let predictions = model.predict(&array![[1.0, 0.05], [1.0, 4.9]]).unwrap();
        assert_eq!(predictions, array![0.0, 1.0]);
    }

    #[test]
    fn test_negative_smoothing_rejected() {
        let (x, y) = test_data::two_blobs();
        let mut model = GaussianNaiveBayes {
            var_smoothing: -1.0,
            ..GaussianNaiveBayes::default()
        };
        assert!(matches!(
            model.fit(&x, &y),
            Err(EstimatorError::InvalidParameter { .. })
        ));
    }
}
