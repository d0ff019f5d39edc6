//! K-nearest-neighbors regression (Euclidean distance).

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::ports::{check_training, check_width, EstimatorError, Regressor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Weighting {
    Uniform,
    /// Inverse distance. Exact matches take all the weight.
    Distance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnRegressor {
    k: usize,
    weighting: Weighting,
    /// Row-major training matrix.
    train_x: Vec<f64>,
    train_y: Vec<f64>,
    n_features: Option<usize>,
}

impl KnnRegressor {
    #[must_use]
    pub fn new(k: usize, weighting: Weighting) -> Self {
        Self {
            k: k.max(1),
            weighting,
            train_x: Vec::new(),
            train_y: Vec::new(),
            n_features: None,
        }
    }

    fn predict_row(&self, row: ArrayView1<'_, f64>, d: usize) -> f64 {
        let mut neighbors: Vec<(f64, f64)> = self
            .train_x
            .chunks_exact(d)
            .zip(&self.train_y)
            .map(|(p, y)| {
                let dist = p
                    .iter()
                    .zip(row.iter())
                    .map(|(a, b)| (a - b).powi(2))
                    .sum::<f64>()
                    .sqrt();
                (dist, *y)
            })
            .collect();
        let k = self.k.min(neighbors.len());
        if k < neighbors.len() {
            neighbors.select_nth_unstable_by(k - 1, |a, b| a.0.total_cmp(&b.0));
            neighbors.truncate(k);
        }

        match self.weighting {
            Weighting::Uniform => neighbors.iter().map(|n| n.1).sum::<f64>() / k as f64,
            Weighting::Distance => {
                let exact: Vec<f64> =
                    neighbors.iter().filter(|n| n.0 == 0.0).map(|n| n.1).collect();
                if !exact.is_empty() {
                    return exact.iter().sum::<f64>() / exact.len() as f64;
                }
                let (num, den) = neighbors
                    .iter()
                    .fold((0.0, 0.0), |(num, den), (dist, y)| (num + y / dist, den + 1.0 / dist));
                num / den
            }
        }
    }
}

impl Regressor for KnnRegressor {
    fn name(&self) -> &str {
        "K-Nearest Neighbors"
    }

    fn fit(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
    ) -> Result<(), EstimatorError> {
        check_training(x, y)?;
        self.train_x = x.iter().copied().collect();
        self.train_y = y.to_vec();
        self.n_features = Some(x.ncols());
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, EstimatorError> {
        let d = check_width(self.n_features, x)?;
        Ok(x.rows().into_iter().map(|row| self.predict_row(row, d)).collect())
    }

    fn n_features(&self) -> Option<usize> {
        self.n_features
    }

    fn params(&self) -> String {
        format!("n_neighbors={}, weights={:?}", self.k, self.weighting)
    }

    fn to_bytes(&self) -> Result<Vec<u8>, EstimatorError> {
        bincode::serialize(self).map_err(|e| EstimatorError::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, EstimatorError> {
        bincode::deserialize(bytes).map_err(|e| EstimatorError::Serialization(e.to_string()))
    }

    fn tuning_grid(&self) -> Vec<Self> {
        let mut grid = Vec::new();
        for k in [3, 5, 7, 11] {
            for weighting in [Weighting::Uniform, Weighting::Distance] {
                grid.push(Self::new(k, weighting));
            }
        }
        grid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_uniform_average() {
        let x = array![[0.0], [1.0], [2.0], [10.0]];
        let y = array![1.0, 2.0, 3.0, 100.0];
        let mut knn = KnnRegressor::new(3, Weighting::Uniform);
        knn.fit(x.view(), y.view()).expect("fit");
        let pred = knn.predict(array![[1.1]].view()).expect("predict");
        assert_relative_eq!(pred[0], 2.0);
    }

    #[test]
    fn test_distance_weights_and_exact_match() {
        let x = array![[0.0], [1.0], [3.0]];
        let y = array![0.0, 10.0, 30.0];
        let mut knn = KnnRegressor::new(2, Weighting::Distance);
        knn.fit(x.view(), y.view()).expect("fit");

        let exact = knn.predict(array![[1.0]].view()).expect("predict");
        assert_relative_eq!(exact[0], 10.0);

        // Neighbors 0 (d=0.25, y=0) and 1 (d=0.75, y=10): weights 4 and 4/3.
        let between = knn.predict(array![[0.25]].view()).expect("predict");
        assert_relative_eq!(between[0], (10.0 * 4.0 / 3.0) / (4.0 + 4.0 / 3.0), epsilon = 1e-12);
    }

    #[test]
    fn test_k_larger_than_training_set() {
        let x = array![[0.0], [2.0]];
        let y = array![1.0, 3.0];
        let mut knn = KnnRegressor::new(7, Weighting::Uniform);
        knn.fit(x.view(), y.view()).expect("fit");
        let pred = knn.predict(array![[5.0]].view()).expect("predict");
        assert_relative_eq!(pred[0], 2.0);
    }
}
