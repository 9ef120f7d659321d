use super::{
    Estimator, EstimatorError, Result, argmax, check_fit_input, check_predict_input,
    class_index, sorted_classes,
};
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tabforge_processing::ProblemType;

/// How neighbors contribute to a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightScheme {
    #[default]
    Uniform,
    /// Inverse distance; an exact match takes the whole vote.
    Distance,
}

/// Brute-force k-nearest neighbors over Euclidean distance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNearestNeighbors {
    pub task: ProblemType,
    pub n_neighbors: usize,
    pub weights: WeightScheme,
    x_train: Option<Array2<f64>>,
    y_train: Array1<f64>,
    classes: Vec<f64>,
}

impl KNearestNeighbors {
    pub fn new(task: ProblemType) -> Self {
        Self {
            task,
            n_neighbors: 5,
            weights: WeightScheme::Uniform,
            x_train: None,
            y_train: Array1::zeros(0),
            classes: Vec::new(),
        }
    }

    pub fn with_n_neighbors(mut self, k: usize) -> Self {
        self.n_neighbors = k;
        self
    }

    pub fn with_weights(mut self, weights: WeightScheme) -> Self {
        self.weights = weights;
        self
    }

    fn predict_row(&self, train: &Array2<f64>, row: ArrayView1<'_, f64>) -> f64 {
        let mut distances: Vec<(f64, usize)> = train
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, t)| {
                let d: f64 = t.iter().zip(row.iter()).map(|(a, b)| (a - b).powi(2)).sum();
                (d.sqrt(), i)
            })
            .collect();
        let k = self.n_neighbors.min(distances.len());
        distances.select_nth_unstable_by(k - 1, |a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let neighbors = &distances[..k];

        let weights: Vec<f64> = match self.weights {
            WeightScheme::Uniform => vec![1.0; k],
            WeightScheme::Distance => {
                if neighbors.iter().any(|(d, _)| *d == 0.0) {
                    neighbors
                        .iter()
                        .map(|(d, _)| if *d == 0.0 { 1.0 } else { 0.0 })
                        .collect()
                } else {
                    neighbors.iter().map(|(d, _)| 1.0 / d).collect()
                }
            }
        };

        match self.task {
            ProblemType::Regression => {
                let total: f64 = weights.iter().sum();
                neighbors
                    .iter()
                    .zip(&weights)
                    .map(|((_, i), w)| self.y_train[*i] * w)
                    .sum::<f64>()
                    / total
            }
            ProblemType::Classification => {
                let mut votes = vec![0.0; self.classes.len()];
                for ((_, i), w) in neighbors.iter().zip(&weights) {
                    if let Some(c) = class_index(&self.classes, self.y_train[*i]) {
                        votes[c] += w;
                    }
                }
                self.classes[argmax(votes)]
            }
        }
    }
}

impl Estimator for KNearestNeighbors {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_fit_input(x, y)?;
        if self.n_neighbors == 0 {
            return Err(EstimatorError::parameter("n_neighbors", "must be at least 1"));
        }
        self.classes = match self.task {
            ProblemType::Classification => sorted_classes(y),
            ProblemType::Regression => Vec::new(),
        };
        self.x_train = Some(x.clone());
        self.y_train = y.clone();
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let train = self.x_train.as_ref().ok_or(EstimatorError::NotFitted)?;
        check_predict_input(x, train.ncols())?;

        let rows: Vec<ArrayView1<'_, f64>> = x.rows().into_iter().collect();
        let predictions: Vec<f64> = rows
            .into_par_iter()
            .map(|row| self.predict_row(train, row))
            .collect();
        Ok(Array1::from(predictions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::test_data;
    use ndarray::array;

    #[test]
    fn test_classifier_votes() {
        let (x, y) = test_data::three_blobs();
        let mut knn = KNearestNeighbors::new(ProblemType::Classification);
        knn.fit(&x, &y).unwrap();
        assert_eq!(knn.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_regressor_averages_neighbors() {
        let x = array![[0.0], [1.0], [2.0], [10.0]];
        let y = array![1.0, 2.0, 3.0, 100.0];
        let mut knn = KNearestNeighbors::new(ProblemType::Regression).with_n_neighbors(3);
        knn.fit(&x, &y).unwrap();
        assert_eq!(knn.predict(&array![[1.0]]).unwrap(), array![2.0]);
    }

    #[test]
    fn test_k_larger_than_training_set() {
        let x = array![[0.0], [4.0]];
        let y = array![2.0, 4.0];
        let mut knn = KNearestNeighbors::new(ProblemType::Regression);
        knn.fit(&x, &y).unwrap();
        assert_eq!(knn.predict(&array![[100.0]]).unwrap(), array![3.0]);
    }

    #[test]
    fn test_distance_weights_prefer_exact_match() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = array![5.0, 7.0, 9.0];
        let mut knn = KNearestNeighbors::new(ProblemType::Regression)
            .with_n_neighbors(3)
            .with_weights(WeightScheme::Distance);
        knn.fit(&x, &y).unwrap();
        assert_eq!(knn.predict(&array![[2.0]]).unwrap(), array![9.0]);
    }

    #[test]
    fn test_predict_before_fit() {
        let knn = KNearestNeighbors::new(ProblemType::Classification);
        assert_eq!(knn.predict(&array![[1.0]]), Err(EstimatorError::NotFitted));
    }
}
