use super::{
    Estimator, EstimatorError, Model, ModelDetails, Result, check_fit_input, check_predict_input,
};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

const MAX_TERMS: usize = 10_000;

/// Polynomial feature expansion followed by another model.
///
/// The expansion contains every monomial of degree `1..=degree` without a
/// bias column, ordered by degree and then lexicographically by feature index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolynomialModel {
    pub degree: usize,
    terms: Vec<Vec<usize>>,
    n_input_features: usize,
    inner: Box<Model>,
}

impl PolynomialModel {
    pub fn new(degree: usize, inner: Model) -> Self {
        Self {
            degree,
            terms: Vec::new(),
            n_input_features: 0,
            inner: Box::new(inner),
        }
    }

    pub fn inner(&self) -> &Model {
        &self.inner
    }

    /// Number of expanded columns; zero before fit.
    pub fn n_output_features(&self) -> usize {
        self.terms.len()
    }

    fn expand(&self, x: &Array2<f64>) -> Array2<f64> {
        Array2::from_shape_fn((x.nrows(), self.terms.len()), |(i, t)| {
            self.terms[t].iter().map(|&j| x[[i, j]]).product()
        })
    }
}

/// Combinations with replacement of `n_features` indices, for every length
/// from 1 to `degree`.
fn monomials(n_features: usize, degree: usize) -> Result<Vec<Vec<usize>>> {
    let mut terms: Vec<Vec<usize>> = Vec::new();
    let mut previous: Vec<Vec<usize>> = vec![Vec::new()];
    for _ in 0..degree {
        let mut current = Vec::new();
        for term in &previous {
            let start = term.last().copied().unwrap_or(0);
            for j in start..n_features {
                let mut next = term.clone();
                next.push(j);
                current.push(next);
            }
        }
        if terms.len() + current.len() > MAX_TERMS {
            return Err(EstimatorError::parameter(
                "polynomial_degree",
                format!("expansion exceeds {MAX_TERMS} features"),
            ));
        }
        terms.extend(current.iter().cloned());
        previous = current;
    }
    Ok(terms)
}

impl Estimator for PolynomialModel {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_fit_input(x, y)?;
        if self.degree == 0 {
            return Err(EstimatorError::parameter("polynomial_degree", "must be at least 1"));
        }
        self.terms = monomials(x.ncols(), self.degree)?;
        self.n_input_features = x.ncols();
        let expanded = self.expand(x);
        self.inner.fit(&expanded, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.terms.is_empty() {
            return Err(EstimatorError::NotFitted);
        }
        check_predict_input(x, self.n_input_features)?;
        self.inner.predict(&self.expand(x))
    }

    fn details(&self) -> ModelDetails {
        self.inner.details()
    }
}
