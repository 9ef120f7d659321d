//! Linear models: least squares (with optional ridge penalty), lasso and
//! multinomial logistic regression.

use super::{
    Estimator, EstimatorError, ModelDetails, Result, argmax, check_fit_input,
    check_predict_input, encode_classes, sorted_classes,
};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

// ============================================================================
// Solvers
// ============================================================================

/// Solve `a · x = b` for a symmetric positive definite `a`.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= a[[i, i]].abs() * 1e-12 || !diag.is_finite() {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[[i, j]] * z[j]).sum();
        z[i] = (b[i] - sum) / l[[i, i]];
    }
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (z[i] - sum) / l[[i, i]];
    }
    Some(x)
}

/// Solve the (possibly penalized) normal equations `(G + alpha·I) w = r`.
///
/// Rank-deficient systems (one-hot groups, duplicated columns) get a small
/// growing diagonal jitter, which lands close to the minimum-norm solution.
fn solve_normal_equations(gram: &Array2<f64>, rhs: &Array1<f64>, alpha: f64) -> Result<Array1<f64>> {
    let n = gram.nrows();
    let scale = (gram.diag().iter().map(|v| v.abs()).sum::<f64>() / n as f64).max(1.0);
    let mut jitter = 0.0;
    for attempt in 0..8 {
        let mut a = gram.clone();
        for k in 0..n {
            a[[k, k]] += alpha + jitter;
        }
        if let Some(w) = cholesky_solve(&a, rhs) {
            return Ok(w);
        }
        jitter = scale * 1e-10 * 100f64.powi(attempt);
    }
    Err(EstimatorError::Singular)
}

fn column_means(x: &Array2<f64>) -> Array1<f64> {
    x.mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()))
}

// ============================================================================
// Least Squares / Ridge
// ============================================================================

/// Least squares regression; `alpha > 0` adds an L2 penalty (ridge).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    pub alpha: f64,
    pub fit_intercept: bool,
    coefficients: Option<Array1<f64>>,
    intercept: f64,
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearRegression {
    pub fn new() -> Self {
        Self {
            alpha: 0.0,
            fit_intercept: true,
            coefficients: None,
            intercept: 0.0,
        }
    }

    pub fn ridge(alpha: f64) -> Self {
        Self {
            alpha,
            ..Self::new()
        }
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.coefficients.as_ref()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl Estimator for LinearRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_fit_input(x, y)?;
        if self.alpha < 0.0 || !self.alpha.is_finite() {
            return Err(EstimatorError::parameter("alpha", "must be a non-negative number"));
        }

        let (x_mean, y_mean) = if self.fit_intercept {
            (column_means(x), y.mean().unwrap_or(0.0))
        } else {
            (Array1::zeros(x.ncols()), 0.0)
        };
        let xc = x - &x_mean.view().insert_axis(Axis(0));
        let yc = y - y_mean;

        let gram = xc.t().dot(&xc);
        let rhs = xc.t().dot(&yc);
        let w = solve_normal_equations(&gram, &rhs, self.alpha)?;

        self.intercept = y_mean - w.dot(&x_mean);
        self.coefficients = Some(w);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let w = self.coefficients.as_ref().ok_or(EstimatorError::NotFitted)?;
        check_predict_input(x, w.len())?;
        Ok(x.dot(w) + self.intercept)
    }

    fn details(&self) -> ModelDetails {
        match &self.coefficients {
            Some(w) => ModelDetails::Linear {
                coefficients: w.to_vec(),
                intercept: self.intercept,
            },
            None => ModelDetails::Unsupported,
        }
    }
}

// ============================================================================
// Lasso
// ============================================================================

/// L1-penalized least squares fitted by coordinate descent.
///
/// Minimizes `(1 / 2n)·‖y − Xw‖² + alpha·‖w‖₁`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lasso {
    pub alpha: f64,
    pub max_iter: usize,
    pub tol: f64,
    coefficients: Option<Array1<f64>>,
    intercept: f64,
}

impl Default for Lasso {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Lasso {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            max_iter: 1000,
            tol: 1e-4,
            coefficients: None,
            intercept: 0.0,
        }
    }

    fn soft_threshold(value: f64, threshold: f64) -> f64 {
        if value > threshold {
            value - threshold
        } else if value < -threshold {
            value + threshold
        } else {
            0.0
        }
    }
}

impl Estimator for Lasso {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_fit_input(x, y)?;
        if self.alpha < 0.0 || !self.alpha.is_finite() {
            return Err(EstimatorError::parameter("alpha", "must be a non-negative number"));
        }
        if self.max_iter == 0 {
            return Err(EstimatorError::parameter("max_iter", "must be at least 1"));
        }

        let n_features = x.ncols();
        let x_mean = column_means(x);
        let y_mean = y.mean().unwrap_or(0.0);
        let xc = x - &x_mean.view().insert_axis(Axis(0));
        let yc = y - y_mean;

        let col_norms: Vec<f64> = (0..n_features)
            .map(|j| xc.column(j).mapv(|v| v * v).sum())
            .collect();
        let threshold = self.alpha * x.nrows() as f64;

        let mut w = Array1::<f64>::zeros(n_features);
        let mut residual = yc.clone();
        for _ in 0..self.max_iter {
            let mut max_update = 0.0f64;
            for j in 0..n_features {
                if col_norms[j] < 1e-15 {
                    continue;
                }
                let column = xc.column(j);
                let rho = column.dot(&residual) + col_norms[j] * w[j];
                let updated = Self::soft_threshold(rho, threshold) / col_norms[j];
                let delta = w[j] - updated;
                if delta != 0.0 {
                    residual.scaled_add(delta, &column);
                    w[j] = updated;
                    max_update = max_update.max(delta.abs());
                }
            }
            if max_update < self.tol {
                break;
            }
        }

        self.intercept = y_mean - w.dot(&x_mean);
        self.coefficients = Some(w);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let w = self.coefficients.as_ref().ok_or(EstimatorError::NotFitted)?;
        check_predict_input(x, w.len())?;
        Ok(x.dot(w) + self.intercept)
    }

    fn details(&self) -> ModelDetails {
        match &self.coefficients {
            Some(w) => ModelDetails::Linear {
                coefficients: w.to_vec(),
                intercept: self.intercept,
            },
            None => ModelDetails::Unsupported,
        }
    }
}

// ============================================================================
// Logistic Regression
// ============================================================================

/// Multinomial logistic regression with an L2 penalty, fitted by gradient
/// descent with a step size derived from the data's curvature.
///
/// Only the weights are penalized, not the intercepts.
///
/// `c` is the inverse regularization strength, as in the usual
/// `0.5·‖W‖² + C·Σ log-loss` objective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub c: f64,
    pub max_iter: usize,
    pub tol: f64,
    classes: Vec<f64>,
    /// `(n_features, n_classes)`
    weights: Option<Array2<f64>>,
    bias: Array1<f64>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticRegression {
    pub fn new() -> Self {
        Self {
            c: 1.0,
            max_iter: 1000,
            tol: 1e-4,
            classes: Vec::new(),
            weights: None,
            bias: Array1::zeros(0),
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn classes(&self) -> &[f64] {
        &self.classes
    }

    /// Largest eigenvalue of `XᵀX / n` by power iteration.
    fn curvature(x: &Array2<f64>) -> f64 {
        let n = x.nrows() as f64;
        let mut v = Array1::from_elem(x.ncols(), 1.0 / (x.ncols() as f64).sqrt());
        let mut eigen = 1.0;
        for _ in 0..30 {
            let next = x.t().dot(&x.dot(&v)) / n;
            let norm = next.dot(&next).sqrt();
            if norm < 1e-12 {
                return 1.0;
            }
            eigen = norm;
            v = next / norm;
        }
        eigen
    }

    fn softmax_rows(scores: &mut Array2<f64>) {
        for mut row in scores.rows_mut() {
            let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
    }

    fn scores(&self, x: &Array2<f64>, weights: &Array2<f64>) -> Array2<f64> {
        x.dot(weights) + &self.bias.view().insert_axis(Axis(0))
    }
}

impl Estimator for LogisticRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_fit_input(x, y)?;
        if self.c <= 0.0 || !self.c.is_finite() {
            return Err(EstimatorError::parameter("C", "must be a positive number"));
        }
        if self.max_iter == 0 {
            return Err(EstimatorError::parameter("max_iter", "must be at least 1"));
        }

        self.classes = sorted_classes(y);
        let n_classes = self.classes.len();
        let (n_samples, n_features) = x.dim();
        if n_classes < 2 {
            // Single class: constant prediction.
            self.weights = Some(Array2::zeros((n_features, 1)));
            self.bias = Array1::zeros(1);
            return Ok(());
        }

        let mut one_hot = Array2::<f64>::zeros((n_samples, n_classes));
        for (i, class) in encode_classes(&self.classes, y).into_iter().enumerate() {
            one_hot[[i, class]] = 1.0;
        }

        // Fit on centered features; the bias absorbs the mean shift below.
        let x_mean = column_means(x);
        let xc = x - &x_mean.view().insert_axis(Axis(0));

        let penalty = 1.0 / (self.c * n_samples as f64);
        let step = 1.0 / (0.5 * Self::curvature(&xc) + 0.5 + penalty);
        let mut weights = Array2::<f64>::zeros((n_features, n_classes));
        self.bias = Array1::zeros(n_classes);

        for _ in 0..self.max_iter {
            let mut probs = self.scores(&xc, &weights);
            Self::softmax_rows(&mut probs);
            let diff = probs - &one_hot;

            let grad_w = xc.t().dot(&diff) / n_samples as f64 + &weights * penalty;
            let grad_b = diff.sum_axis(Axis(0)) / n_samples as f64;

            weights.scaled_add(-step, &grad_w);
            self.bias.scaled_add(-step, &grad_b);

            let max_grad = grad_w
                .iter()
                .chain(grad_b.iter())
                .fold(0.0f64, |m, g| m.max(g.abs()));
            if max_grad < self.tol {
                break;
            }
        }

        self.bias = &self.bias - &x_mean.dot(&weights);
        self.weights = Some(weights);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let weights = self.weights.as_ref().ok_or(EstimatorError::NotFitted)?;
        check_predict_input(x, weights.nrows())?;
        if self.classes.len() < 2 {
            let only = self.classes.first().copied().unwrap_or(0.0);
            return Ok(Array1::from_elem(x.nrows(), only));
        }
        let scores = self.scores(x, weights);
        Ok(scores
            .rows()
            .into_iter()
            .map(|row| self.classes[argmax(row.iter().copied())])
            .collect())
    }

    /// Binary models report one weight vector (class 1 against class 0);
    /// multiclass models report every class's weights in class order.
    fn details(&self) -> ModelDetails {
        let Some(weights) = &self.weights else {
            return ModelDetails::Unsupported;
        };
        if self.classes.len() == 2 {
            let coefficients = (&weights.column(1) - &weights.column(0)).to_vec();
            ModelDetails::Linear {
                coefficients,
                intercept: self.bias[1] - self.bias[0],
            }
        } else {
            ModelDetails::Linear {
                coefficients: weights.t().iter().copied().collect(),
                intercept: self.bias.first().copied().unwrap_or(0.0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::test_data;
    use ndarray::array;

    #[test]
    fn test_least_squares_recovers_plane() {
        let (x, y) = test_data::linear_regression();
        let mut model = LinearRegression::new();
        model.fit(&x, &y).unwrap();

        let w = model.coefficients().unwrap();
        assert!((w[0] - 3.0).abs() < 1e-6);
        assert!((w[1] + 2.0).abs() < 1e-6);
        assert!((model.intercept() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_collinear_columns_still_fit() {
        // Second column duplicates the first.
        let x = Array2::from_shape_fn((20, 2), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(20, |i| 2.0 * i as f64 + 1.0);
        let mut model = LinearRegression::new();
        model.fit(&x, &y).unwrap();
        let predictions = model.predict(&x).unwrap();
        for (p, t) in predictions.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-3);
        }
    }

    #[test]
    fn test_ridge_shrinks_coefficients() {
        let (x, y) = test_data::linear_regression();
        let mut ols = LinearRegression::new();
        let mut ridge = LinearRegression::ridge(100.0);
        ols.fit(&x, &y).unwrap();
        ridge.fit(&x, &y).unwrap();

        let norm = |m: &LinearRegression| m.coefficients().unwrap().mapv(f64::abs).sum();
        assert!(norm(&ridge) < norm(&ols));
    }

    #[test]
    fn test_lasso_zeroes_irrelevant_feature() {
        let n = 50;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 { i as f64 } else { ((i * 7) % 5) as f64 * 0.01 }
        });
        let y = Array1::from_shape_fn(n, |i| 4.0 * i as f64);
        let mut model = Lasso::new(1.0);
        model.fit(&x, &y).unwrap();

        let ModelDetails::Linear { coefficients, .. } = model.details() else {
            panic!("lasso exposes coefficients");
        };
        assert!((coefficients[0] - 4.0).abs() < 0.1);
        assert_eq!(coefficients[1], 0.0);
    }

    #[test]
    fn test_logistic_separates_blobs() {
        let (x, y) = test_data::two_blobs();
        let mut model = LogisticRegression::new();
        model.fit(&x, &y).unwrap();
        assert_eq!(model.predict(&x).unwrap(), y);

        let ModelDetails::Linear { coefficients, .. } = model.details() else {
            panic!("logistic regression exposes coefficients");
        };
        assert_eq!(coefficients.len(), 2);
        assert!(coefficients[0] > 0.0);
    }

    #[test]
    fn test_logistic_multiclass() {
        let (x, y) = test_data::three_blobs();
        let mut model = LogisticRegression::new();
        model.fit(&x, &y).unwrap();
        let predictions = model.predict(&x).unwrap();
        let correct = predictions.iter().zip(y.iter()).filter(|(p, t)| p == t).count();
        assert!(correct as f64 / y.len() as f64 > 0.9);

        let ModelDetails::Linear { coefficients, .. } = model.details() else {
            panic!("logistic regression exposes coefficients");
        };
        assert_eq!(coefficients.len(), 6);
    }

    #[test]
    fn test_predict_checks_width() {
        let (x, y) = test_data::linear_regression();
        let mut model = LinearRegression::new();
        model.fit(&x, &y).unwrap();
        assert_eq!(
            model.predict(&array![[1.0, 2.0, 3.0]]),
            Err(EstimatorError::ShapeMismatch {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn test_unfitted_predict_fails() {
        let model = LogisticRegression::new();
        assert_eq!(model.predict(&array![[1.0]]), Err(EstimatorError::NotFitted));
    }
}
