//! Linear models: ordinary least squares, ridge, lasso and elastic net.
//!
//! All four fit on centered data and recover the intercept afterwards. Least
//! squares and ridge use the normal equations; lasso and elastic net use cyclic
//! coordinate descent on
//! `1/(2n) ||y - Xw||^2 + alpha * l1_ratio * ||w||_1 + alpha * (1 - l1_ratio) / 2 * ||w||^2`.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::linalg::solve_spd;
use crate::ports::{check_training, check_width, EstimatorError, Regressor};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Penalty {
    None,
    L2 { alpha: f64 },
    L1 { alpha: f64 },
    ElasticNet { alpha: f64, l1_ratio: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    name: String,
    penalty: Penalty,
    max_iter: usize,
    tol: f64,
    coef: Option<Vec<f64>>,
    intercept: f64,
}

impl LinearModel {
    #[must_use]
    pub fn new(name: impl Into<String>, penalty: Penalty) -> Self {
        Self {
            name: name.into(),
            penalty,
            max_iter: 1000,
            tol: 1e-4,
            coef: None,
            intercept: 0.0,
        }
    }

    #[must_use]
    pub fn ordinary() -> Self {
        Self::new("Linear Regression", Penalty::None)
    }

    #[must_use]
    pub fn ridge(alpha: f64) -> Self {
        Self::new("Ridge Regression", Penalty::L2 { alpha })
    }

    #[must_use]
    pub fn lasso(alpha: f64) -> Self {
        Self::new("Lasso Regression", Penalty::L1 { alpha })
    }

    #[must_use]
    pub fn elastic_net(alpha: f64, l1_ratio: f64) -> Self {
        Self::new("Elastic Net", Penalty::ElasticNet { alpha, l1_ratio })
    }

    #[must_use]
    pub fn coefficients(&self) -> Option<&[f64]> {
        self.coef.as_deref()
    }

    #[must_use]
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    fn with_penalty(&self, penalty: Penalty) -> Self {
        Self::new(self.name.clone(), penalty)
    }

    fn solve_normal(
        xc: &Array2<f64>,
        yc: &Array1<f64>,
        alpha: f64,
    ) -> Result<Vec<f64>, EstimatorError> {
        let mut gram = xc.t().dot(xc);
        for i in 0..gram.nrows() {
            gram[[i, i]] += alpha;
        }
        let rhs = xc.t().dot(yc);
        Ok(solve_spd(&gram, &rhs)?.to_vec())
    }

    fn coordinate_descent(
        &self,
        xc: &Array2<f64>,
        yc: &Array1<f64>,
        alpha: f64,
        l1_ratio: f64,
    ) -> Vec<f64> {
        let (n, d) = xc.dim();
        let n_f = n as f64;
        let l1 = n_f * alpha * l1_ratio;
        let l2 = n_f * alpha * (1.0 - l1_ratio);

        let col_sq: Vec<f64> = xc.axis_iter(Axis(1)).map(|c| c.dot(&c)).collect();
        let mut w = vec![0.0; d];
        let mut residual = yc.clone();

        for iter in 0..self.max_iter {
            let mut max_delta = 0.0f64;
            let mut max_w = 0.0f64;
            for j in 0..d {
                if col_sq[j] == 0.0 {
                    continue;
                }
                let column = xc.column(j);
                let old = w[j];
                let rho = column.dot(&residual) + col_sq[j] * old;
                let new = soft_threshold(rho, l1) / (col_sq[j] + l2);
                if new != old {
                    residual.scaled_add(old - new, &column);
                    w[j] = new;
                }
                max_delta = max_delta.max((new - old).abs());
                max_w = max_w.max(new.abs());
            }
            if max_w == 0.0 || max_delta / max_w < self.tol {
                tracing::debug!("{} converged after {} sweeps", self.name, iter + 1);
                return w;
            }
        }
        tracing::debug!("{} reached max_iter without converging", self.name);
        w
    }
}

fn soft_threshold(x: f64, lambda: f64) -> f64 {
    if x > lambda {
        x - lambda
    } else if x < -lambda {
        x + lambda
    } else {
        0.0
    }
}

impl Regressor for LinearModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
    ) -> Result<(), EstimatorError> {
        check_training(x, y)?;
        self.coef = None;

        let x_mean = x.mean_axis(Axis(0)).ok_or(EstimatorError::InvalidInput("empty".into()))?;
        let y_mean = y.mean().unwrap_or(0.0);
        let xc = &x - &x_mean;
        let yc = y.mapv(|v| v - y_mean);

        let coef = match self.penalty {
            Penalty::None => Self::solve_normal(&xc, &yc, 0.0)?,
            Penalty::L2 { alpha } => Self::solve_normal(&xc, &yc, alpha)?,
            Penalty::L1 { alpha } => self.coordinate_descent(&xc, &yc, alpha, 1.0),
            Penalty::ElasticNet { alpha, l1_ratio } => {
                self.coordinate_descent(&xc, &yc, alpha, l1_ratio)
            }
        };

        if coef.iter().any(|c| !c.is_finite()) {
            return Err(EstimatorError::Numerical("non-finite coefficients".to_string()));
        }
        self.intercept = y_mean - x_mean.iter().zip(&coef).map(|(m, c)| m * c).sum::<f64>();
        self.coef = Some(coef);
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, EstimatorError> {
        check_width(self.n_features(), x)?;
        let coef = self.coef.as_ref().ok_or(EstimatorError::NotFitted)?;
        let w = ArrayView1::from(coef.as_slice());
        Ok(x.dot(&w) + self.intercept)
    }

    fn n_features(&self) -> Option<usize> {
        self.coef.as_ref().map(Vec::len)
    }

    fn params(&self) -> String {
        match self.penalty {
            Penalty::None => "fit_intercept=true".to_string(),
            Penalty::L2 { alpha } | Penalty::L1 { alpha } => format!("alpha={alpha}"),
            Penalty::ElasticNet { alpha, l1_ratio } => {
                format!("alpha={alpha}, l1_ratio={l1_ratio}")
            }
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>, EstimatorError> {
        bincode::serialize(self).map_err(|e| EstimatorError::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, EstimatorError> {
        bincode::deserialize(bytes).map_err(|e| EstimatorError::Serialization(e.to_string()))
    }

    fn tuning_grid(&self) -> Vec<Self> {
        match self.penalty {
            Penalty::None => Vec::new(),
            Penalty::L2 { .. } => [0.1, 1.0, 10.0, 100.0]
                .into_iter()
                .map(|alpha| self.with_penalty(Penalty::L2 { alpha }))
                .collect(),
            Penalty::L1 { .. } => [0.01, 0.1, 1.0]
                .into_iter()
                .map(|alpha| self.with_penalty(Penalty::L1 { alpha }))
                .collect(),
            Penalty::ElasticNet { .. } => {
                let mut grid = Vec::new();
                for alpha in [0.01, 0.1, 1.0] {
                    for l1_ratio in [0.2, 0.5, 0.8] {
                        grid.push(self.with_penalty(Penalty::ElasticNet { alpha, l1_ratio }));
                    }
                }
                grid
            }
        }
    }
}
