//! Boosted tree ensembles: least-squares gradient boosting and AdaBoost.R2.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, Splitter, TreeParams};
use crate::ports::{check_training, check_width, EstimatorError, Regressor};

/// Gradient boosting with squared loss, shrinkage and row subsampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    n_estimators: usize,
    learning_rate: f64,
    subsample: f64,
    params: TreeParams,
    seed: u64,
    init: f64,
    trees: Vec<DecisionTree>,
    n_features: Option<usize>,
}

impl GradientBoosting {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            n_estimators: 200,
            learning_rate: 0.1,
            subsample: 0.8,
            params: TreeParams {
                max_depth: Some(7),
                min_samples_split: 5,
                min_samples_leaf: 3,
                max_features: None,
                splitter: Splitter::Best,
            },
            seed,
            init: 0.0,
            trees: Vec::new(),
            n_features: None,
        }
    }

    #[must_use]
    pub fn with_stages(mut self, n_estimators: usize, learning_rate: f64) -> Self {
        self.n_estimators = n_estimators.max(1);
        self.learning_rate = learning_rate;
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.params.max_depth = Some(max_depth);
        self
    }

    fn unfitted(&self) -> Self {
        Self {
            init: 0.0,
            trees: Vec::new(),
            n_features: None,
            ..self.clone()
        }
    }
}

impl Regressor for GradientBoosting {
    fn name(&self) -> &str {
        "Gradient Boosting"
    }

    fn fit(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
    ) -> Result<(), EstimatorError> {
        check_training(x, y)?;
        self.trees.clear();
        self.n_features = None;

        let n = x.nrows();
        let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
        let n_sub = ((n as f64 * self.subsample).ceil() as usize).clamp(1, n);

        self.init = y.mean().unwrap_or(0.0);
        let mut current = Array1::from_elem(n, self.init);
        let mut all: Vec<usize> = (0..n).collect();

        for _ in 0..self.n_estimators {
            let residual = &y - &current;
            all.shuffle(&mut rng);
            let tree =
                DecisionTree::fit(x, residual.view(), &all[..n_sub], &self.params, &mut rng)?;
            for (i, row) in x.rows().into_iter().enumerate() {
                current[i] += self.learning_rate * tree.predict_row(row);
            }
            self.trees.push(tree);
        }

        self.n_features = Some(x.ncols());
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, EstimatorError> {
        check_width(self.n_features, x)?;
        Ok(x
            .rows()
            .into_iter()
            .map(|row| {
                let boost: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
                self.init + self.learning_rate * boost
            })
            .collect())
    }

    fn n_features(&self) -> Option<usize> {
        self.n_features
    }

    fn params(&self) -> String {
        format!(
            "n_estimators={}, learning_rate={}, max_depth={:?}, subsample={}",
            self.n_estimators, self.learning_rate, self.params.max_depth, self.subsample
        )
    }

    fn to_bytes(&self) -> Result<Vec<u8>, EstimatorError> {
        bincode::serialize(self).map_err(|e| EstimatorError::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, EstimatorError> {
        bincode::deserialize(bytes).map_err(|e| EstimatorError::Serialization(e.to_string()))
    }

    fn tuning_grid(&self) -> Vec<Self> {
        let mut grid = Vec::new();
        for (n_estimators, learning_rate) in [(100, 0.1), (200, 0.05), (300, 0.05)] {
            for max_depth in [3, 5, 7] {
                grid.push(
                    self.unfitted()
                        .with_stages(n_estimators, learning_rate)
                        .with_max_depth(max_depth),
                );
            }
        }
        grid
    }
}

/// AdaBoost.R2 with linear loss over shallow trees.
///
/// Each stage fits a tree on a weighted resample of the training set; the
/// ensemble predicts the weighted median of the stage predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaBoost {
    n_estimators: usize,
    learning_rate: f64,
    params: TreeParams,
    seed: u64,
    stages: Vec<(DecisionTree, f64)>,
    n_features: Option<usize>,
}

impl AdaBoost {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            n_estimators: 50,
            learning_rate: 1.0,
            params: TreeParams {
                max_depth: Some(3),
                ..TreeParams::default()
            },
            seed,
            stages: Vec::new(),
            n_features: None,
        }
    }

    #[must_use]
    pub fn with_stages(mut self, n_estimators: usize, learning_rate: f64) -> Self {
        self.n_estimators = n_estimators.max(1);
        self.learning_rate = learning_rate;
        self
    }

    fn weighted_resample(weights: &[f64], rng: &mut ChaCha20Rng) -> Vec<usize> {
        let mut cumulative = Vec::with_capacity(weights.len());
        let mut acc = 0.0;
        for w in weights {
            acc += w;
            cumulative.push(acc);
        }
        (0..weights.len())
            .map(|_| {
                let u = rng.gen::<f64>() * acc;
                cumulative
                    .partition_point(|&c| c <= u)
                    .min(weights.len() - 1)
            })
            .collect()
    }

    fn weighted_median(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut preds: Vec<(f64, f64)> = self
            .stages
            .iter()
            .map(|(tree, weight)| (tree.predict_row(row), *weight))
            .collect();
        preds.sort_by(|a, b| a.0.total_cmp(&b.0));
        let total: f64 = preds.iter().map(|p| p.1).sum();
        let mut acc = 0.0;
        for (value, weight) in &preds {
            acc += weight;
            if acc >= 0.5 * total {
                return *value;
            }
        }
        preds.last().map_or(0.0, |p| p.0)
    }
}

impl Regressor for AdaBoost {
    fn name(&self) -> &str {
        "AdaBoost"
    }

    fn fit(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
    ) -> Result<(), EstimatorError> {
        check_training(x, y)?;
        self.stages.clear();
        self.n_features = None;

        let n = x.nrows();
        let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
        let mut weights = vec![1.0 / n as f64; n];

        for stage in 0..self.n_estimators {
            let sample = Self::weighted_resample(&weights, &mut rng);
            let tree = DecisionTree::fit(x, y, &sample, &self.params, &mut rng)?;

            let errors: Vec<f64> = x
                .rows()
                .into_iter()
                .zip(y.iter())
                .map(|(row, t)| (tree.predict_row(row) - t).abs())
                .collect();
            let max_error = errors.iter().copied().fold(0.0, f64::max);
            if max_error <= 0.0 {
                self.stages.push((tree, 1.0));
                break;
            }

            let loss: f64 = errors
                .iter()
                .zip(&weights)
                .map(|(e, w)| w * e / max_error)
                .sum();
            if loss <= 0.0 {
                self.stages.push((tree, 1.0));
                break;
            }
            if loss >= 0.5 {
                if self.stages.is_empty() {
                    self.stages.push((tree, 1.0));
                }
                tracing::debug!("AdaBoost stopped at stage {stage}: average loss {loss:.3}");
                break;
            }

            let beta = loss / (1.0 - loss);
            let stage_weight = self.learning_rate * (1.0 / beta).ln();
            for (w, e) in weights.iter_mut().zip(&errors) {
                *w *= beta.powf((1.0 - e / max_error) * self.learning_rate);
            }
            let total: f64 = weights.iter().sum();
            if total <= 0.0 || !total.is_finite() {
                self.stages.push((tree, stage_weight));
                break;
            }
            weights.iter_mut().for_each(|w| *w /= total);
            self.stages.push((tree, stage_weight));
        }

        self.n_features = Some(x.ncols());
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, EstimatorError> {
        check_width(self.n_features, x)?;
        Ok(x.rows().into_iter().map(|row| self.weighted_median(row)).collect())
    }

    fn n_features(&self) -> Option<usize> {
        self.n_features
    }

    fn params(&self) -> String {
        format!(
            "n_estimators={}, learning_rate={}, loss=linear, max_depth={:?}",
            self.n_estimators, self.learning_rate, self.params.max_depth
        )
    }

    fn to_bytes(&self) -> Result<Vec<u8>, EstimatorError> {
        bincode::serialize(self).map_err(|e| EstimatorError::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, EstimatorError> {
        bincode::deserialize(bytes).map_err(|e| EstimatorError::Serialization(e.to_string()))
    }

    fn tuning_grid(&self) -> Vec<Self> {
        let mut grid = Vec::new();
        for n_estimators in [50, 100] {
            for learning_rate in [0.5, 1.0] {
                let mut variant = Self::new(self.seed).with_stages(n_estimators, learning_rate);
                variant.params = self.params;
                grid.push(variant);
            }
        }
        grid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metrics::r2_score;
    use ndarray::Array2;

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((120, 3), |(i, j)| ((i * (2 * j + 5)) % 31) as f64 / 3.0);
        let y = x
            .rows()
            .into_iter()
            .map(|r| 10.0 + 2.0 * r[0] - r[1] + 0.5 * r[2] * r[2])
            .collect();
        (x, y)
    }

    #[test]
    fn test_gradient_boosting_fits_training_data() {
        let (x, y) = data();
        let mut gb = GradientBoosting::new(42).with_stages(50, 0.1);
        gb.fit(x.view(), y.view()).expect("fit");
        let pred = gb.predict(x.view()).expect("predict");
        assert!(r2_score(y.view(), pred.view()) > 0.95);
    }

    #[test]
    fn test_gradient_boosting_deterministic() {
        let (x, y) = data();
        let fit = || {
            let mut gb = GradientBoosting::new(7).with_stages(20, 0.1);
            gb.fit(x.view(), y.view()).expect("fit");
            gb
        };
        assert_eq!(fit(), fit());
    }

    #[test]
    fn test_adaboost_fits_training_data() {
        let (x, y) = data();
        let mut ada = AdaBoost::new(42).with_stages(30, 1.0);
        ada.fit(x.view(), y.view()).expect("fit");
        let pred = ada.predict(x.view()).expect("predict");
        assert!(r2_score(y.view(), pred.view()) > 0.6);
    }

    #[test]
    fn test_weighted_resample_follows_weights() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let sample = AdaBoost::weighted_resample(&[0.0, 0.0, 1.0, 0.0], &mut rng);
        assert!(sample.iter().all(|&i| i == 2));
    }
}
