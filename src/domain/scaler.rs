//! Standard (zero-mean, unit-variance) feature scaler.

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScalerError {
    #[error("cannot fit a scaler on an empty matrix")]
    Empty,

    #[error("scaler was fitted on {expected} features, got {got}")]
    Dimension { expected: usize, got: usize },
}

/// Column-wise standardization fitted on the training partition only.
///
/// Parameters are fixed at construction; `transform` borrows `&self` and can
/// never refit. Population variance (ddof = 0); zero-variance columns get a
/// unit scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit column means and standard deviations.
    ///
    /// # Errors
    /// Returns [`ScalerError::Empty`] for a matrix with no rows or columns.
    pub fn fit(x: ArrayView2<'_, f64>) -> Result<Self, ScalerError> {
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(ScalerError::Empty);
        }
        let n = x.nrows() as f64;
        let mut mean = Vec::with_capacity(x.ncols());
        let mut scale = Vec::with_capacity(x.ncols());
        for column in x.axis_iter(Axis(1)) {
            let mu = column.sum() / n;
            let var = column.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / n;
            let sd = var.sqrt();
            mean.push(mu);
            scale.push(if sd > f64::EPSILON { sd } else { 1.0 });
        }
        Ok(Self { mean, scale })
    }

    /// Scale a matrix with the fitted parameters.
    ///
    /// # Errors
    /// Returns [`ScalerError::Dimension`] on a column-count mismatch.
    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, ScalerError> {
        if x.ncols() != self.mean.len() {
            return Err(ScalerError::Dimension {
                expected: self.mean.len(),
                got: x.ncols(),
            });
        }
        let mut out = x.to_owned();
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (mu, sd) = (self.mean[j], self.scale[j]);
            column.mapv_inplace(|v| (v - mu) / sd);
        }
        Ok(out)
    }

    #[must_use]
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    #[must_use]
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    #[must_use]
    pub fn scale(&self) -> &[f64] {
        &self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_fit_transform() {
        let x = array![[1.0, 10.0], [3.0, 10.0], [5.0, 10.0]];
        let scaler = StandardScaler::fit(x.view()).expect("fit");
        assert_relative_eq!(scaler.mean()[0], 3.0);
        assert_relative_eq!(scaler.scale()[0], (8.0f64 / 3.0).sqrt());
        // Constant column keeps unit scale.
        assert_relative_eq!(scaler.scale()[1], 1.0);

        let z = scaler.transform(x.view()).expect("transform");
        assert_relative_eq!(z.column(0).sum(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(z[[0, 1]], 0.0);
    }

    #[test]
    fn test_transform_never_alters_parameters() {
        let train = array![[1.0, 2.0], [2.0, 4.0], [3.0, 9.0]];
        let test = array![[100.0, -5.0], [250.0, 7.0]];
        let scaler = StandardScaler::fit(train.view()).expect("fit");
        let before = scaler.clone();
        let _ = scaler.transform(test.view()).expect("transform");
        assert_eq!(scaler, before);
    }

    #[test]
    fn test_dimension_mismatch() {
        let scaler = StandardScaler::fit(array![[1.0, 2.0]].view()).expect("fit");
        let err = scaler.transform(array![[1.0, 2.0, 3.0]].view());
        assert_eq!(err, Err(ScalerError::Dimension { expected: 2, got: 3 }));
    }

    #[test]
    fn test_empty() {
        let x = Array2::<f64>::zeros((0, 3));
        assert_eq!(StandardScaler::fit(x.view()), Err(ScalerError::Empty));
    }
}
