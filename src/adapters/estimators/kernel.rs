//! Kernel ridge regression with an RBF kernel.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use super::linalg::solve_spd;
use crate::ports::{check_training, check_width, EstimatorError, Regressor};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Gamma {
    /// `1 / (n_features * var(X))`.
    Scale,
    Fixed(f64),
}

/// Kernel ridge on a (possibly subsampled) support set.
///
/// The target is centered before solving so predictions far from the
/// support revert to the training mean instead of zero. Training sets larger
/// than `max_support` are subsampled with the estimator seed to bound the
/// `O(n^3)` solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelRidge {
    alpha: f64,
    gamma: Gamma,
    max_support: usize,
    seed: u64,
    fitted: Option<FittedKernel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedKernel {
    /// Row-major `n_support x n_features`.
    support: Vec<f64>,
    dual: Vec<f64>,
    gamma: f64,
    y_mean: f64,
    n_features: usize,
}

impl KernelRidge {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            alpha: 1.0,
            gamma: Gamma::Scale,
            max_support: 1500,
            seed,
            fitted: None,
        }
    }

    #[must_use]
    pub fn with_params(mut self, alpha: f64, gamma: Gamma) -> Self {
        self.alpha = alpha;
        self.gamma = gamma;
        self
    }

    fn resolve_gamma(&self, x: &Array2<f64>) -> f64 {
        match self.gamma {
            Gamma::Fixed(g) => g,
            Gamma::Scale => {
                let mean = x.mean().unwrap_or(0.0);
                let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / x.len().max(1) as f64;
                let denom = x.ncols() as f64 * var;
                if denom > 0.0 {
                    1.0 / denom
                } else {
                    1.0
                }
            }
        }
    }
}

fn rbf(a: ArrayView1<'_, f64>, b: &[f64], gamma: f64) -> f64 {
    let d2: f64 = a.iter().zip(b).map(|(p, q)| (p - q).powi(2)).sum();
    (-gamma * d2).exp()
}

impl Regressor for KernelRidge {
    fn name(&self) -> &str {
        "Kernel Ridge"
    }

    fn fit(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
    ) -> Result<(), EstimatorError> {
        check_training(x, y)?;
        self.fitted = None;

        let mut rows: Vec<usize> = (0..x.nrows()).collect();
        if rows.len() > self.max_support {
            let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
            rows.shuffle(&mut rng);
            rows.truncate(self.max_support);
            rows.sort_unstable();
            tracing::debug!("Kernel Ridge: subsampled {} support rows", rows.len());
        }

        let support = x.select(ndarray::Axis(0), &rows);
        let targets: Array1<f64> = rows.iter().map(|&i| y[i]).collect();
        let y_mean = targets.mean().unwrap_or(0.0);
        let gamma = self.resolve_gamma(&support);

        let n = support.nrows();
        let mut gram = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..=i {
                let k = if i == j {
                    1.0
                } else {
                    let d2: f64 = support
                        .row(i)
                        .iter()
                        .zip(support.row(j).iter())
                        .map(|(p, q)| (p - q).powi(2))
                        .sum();
                    (-gamma * d2).exp()
                };
                gram[[i, j]] = k;
                gram[[j, i]] = k;
            }
            gram[[i, i]] += self.alpha;
        }

        let centered = targets.mapv(|v| v - y_mean);
        let dual = solve_spd(&gram, &centered)?;

        self.fitted = Some(FittedKernel {
            support: support.iter().copied().collect(),
            dual: dual.to_vec(),
            gamma,
            y_mean,
            n_features: x.ncols(),
        });
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, EstimatorError> {
        check_width(self.n_features(), x)?;
        let fitted = self.fitted.as_ref().ok_or(EstimatorError::NotFitted)?;
        let d = fitted.n_features;
        Ok(x
            .rows()
            .into_iter()
            .map(|row| {
                fitted.y_mean
                    + fitted
                        .support
                        .chunks_exact(d)
                        .zip(&fitted.dual)
                        .map(|(s, a)| a * rbf(row, s, fitted.gamma))
                        .sum::<f64>()
            })
            .collect())
    }

    fn n_features(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.n_features)
    }

    fn params(&self) -> String {
        format!("alpha={}, kernel=rbf, gamma={:?}", self.alpha, self.gamma)
    }

    fn to_bytes(&self) -> Result<Vec<u8>, EstimatorError> {
        bincode::serialize(self).map_err(|e| EstimatorError::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, EstimatorError> {
        bincode::deserialize(bytes).map_err(|e| EstimatorError::Serialization(e.to_string()))
    }

    fn tuning_grid(&self) -> Vec<Self> {
        let mut grid = Vec::new();
        for alpha in [0.1, 1.0, 10.0] {
            for gamma in [Gamma::Scale, Gamma::Fixed(0.01), Gamma::Fixed(0.1)] {
                grid.push(Self::new(self.seed).with_params(alpha, gamma));
            }
        }
        grid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metrics::r2_score;

    #[test]
    fn test_fits_smooth_function() {
        let x = Array2::from_shape_fn((60, 1), |(i, _)| i as f64 / 10.0);
        let y = x.column(0).mapv(|v| 100.0 + 10.0 * v.sin());
        let mut kr = KernelRidge::new(0).with_params(0.01, Gamma::Fixed(1.0));
        kr.fit(x.view(), y.view()).expect("fit");
        let pred = kr.predict(x.view()).expect("predict");
        assert!(r2_score(y.view(), pred.view()) > 0.95);
    }

    #[test]
    fn test_far_points_revert_to_mean() {
        let x = Array2::from_shape_fn((10, 1), |(i, _)| i as f64);
        let y = Array1::from_elem(10, 120.0) + &x.column(0);
        let mut kr = KernelRidge::new(0).with_params(1.0, Gamma::Fixed(1.0));
        kr.fit(x.view(), y.view()).expect("fit");
        let far = kr.predict(ndarray::array![[1e6]].view()).expect("predict");
        assert!((far[0] - 124.5).abs() < 1e-6);
    }

    #[test]
    fn test_support_is_capped() {
        let x = Array2::from_shape_fn((30, 2), |(i, j)| (i + j) as f64);
        let y = x.column(0).to_owned();
        let mut kr = KernelRidge::new(3);
        kr.max_support = 10;
        kr.fit(x.view(), y.view()).expect("fit");
        let fitted = kr.fitted.as_ref().expect("fitted");
        assert_eq!(fitted.dual.len(), 10);
        assert_eq!(fitted.support.len(), 20);
    }
}
