//! K-fold cross-validation.
//!
//! Folds are contiguous (no shuffling) and fitted in parallel on the rayon
//! pool. Each fold works on its own clone of the estimator and its own copy
//! of the training rows.

use ndarray::{ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::metrics::r2_score;
use crate::ports::{EstimatorError, Regressor};

/// Per-fold R² and their summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvScores {
    pub folds: Vec<f64>,
    pub mean: f64,
    /// Population standard deviation across folds.
    pub std: f64,
}

impl CvScores {
    fn from_folds(folds: Vec<f64>) -> Self {
        let n = folds.len().max(1) as f64;
        let mean = folds.iter().sum::<f64>() / n;
        let std = (folds.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt();
        Self { folds, mean, std }
    }
}

/// `[start, end)` validation ranges. The first `n % k` folds get one extra row.
#[must_use]
pub fn fold_ranges(n: usize, k: usize) -> Vec<(usize, usize)> {
    let base = n / k;
    let extra = n % k;
    let mut start = 0;
    (0..k)
        .map(|i| {
            let len = base + usize::from(i < extra);
            let range = (start, start + len);
            start += len;
            range
        })
        .collect()
}

/// Cross-validated R² of an unfitted estimator.
///
/// # Errors
/// Returns [`EstimatorError::InvalidInput`] when there are fewer rows than
/// folds, or the first fold error.
pub fn cross_validate<M: Regressor>(
    model: &M,
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    k: usize,
) -> Result<CvScores, EstimatorError> {
    let n = x.nrows();
    if k < 2 || n < k {
        return Err(EstimatorError::InvalidInput(format!(
            "cannot run {k}-fold cross-validation on {n} rows"
        )));
    }

    let folds = fold_ranges(n, k)
        .into_par_iter()
        .map(|(start, end)| -> Result<f64, EstimatorError> {
            let train_rows: Vec<usize> = (0..start).chain(end..n).collect();
            let x_train = x.select(Axis(0), &train_rows);
            let y_train = y.select(Axis(0), &train_rows);

            let mut fold_model = model.clone();
            fold_model.fit(x_train.view(), y_train.view())?;
            let pred = fold_model.predict(x.slice(ndarray::s![start..end, ..]))?;
            Ok(r2_score(y.slice(ndarray::s![start..end]), pred.view()))
        })
        .collect::<Result<Vec<f64>, EstimatorError>>()?;

    Ok(CvScores::from_folds(folds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::estimators::LinearModel;
    use approx::assert_relative_eq;
    use ndarray::{Array1, Array2};

    #[test]
    fn test_fold_ranges_cover_rows() {
        assert_eq!(fold_ranges(11, 3), vec![(0, 4), (4, 8), (8, 11)]);
        assert_eq!(fold_ranges(6, 3), vec![(0, 2), (2, 4), (4, 6)]);
    }

    #[test]
    fn test_linear_target_scores_near_one() {
        let x = Array2::from_shape_fn((50, 2), |(i, j)| ((i * (j + 2)) % 17) as f64);
        let y: Array1<f64> = x.rows().into_iter().map(|r| 5.0 + 2.0 * r[0] - r[1]).collect();
        let cv = cross_validate(&LinearModel::ordinary(), x.view(), y.view(), 5).expect("cv");
        assert_eq!(cv.folds.len(), 5);
        assert_relative_eq!(cv.mean, 1.0, epsilon = 1e-8);
        assert!(cv.std < 1e-8);
    }

    #[test]
    fn test_too_few_rows() {
        let x = Array2::<f64>::zeros((3, 1));
        let y = Array1::<f64>::zeros(3);
        assert!(cross_validate(&LinearModel::ordinary(), x.view(), y.view(), 5).is_err());
    }
}
