//! Small dense linear-algebra helpers for the closed-form estimators.

use ndarray::{Array1, Array2};

use crate::ports::EstimatorError;

const MAX_JITTER_ATTEMPTS: usize = 6;

/// Solve `a x = b` for symmetric positive (semi-)definite `a`.
///
/// Cholesky factorization; when a pivot is not positive a diagonal jitter
/// proportional to the mean diagonal is added and the factorization retried.
pub(crate) fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, EstimatorError> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return Err(EstimatorError::Numerical(format!(
            "system shape mismatch: {}x{} with rhs {}",
            a.nrows(),
            a.ncols(),
            b.len()
        )));
    }

    let mean_diag = (0..n).map(|i| a[[i, i]].abs()).sum::<f64>() / n.max(1) as f64;
    let base = if mean_diag > 0.0 { mean_diag } else { 1.0 };

    let mut jitter = 0.0;
    for attempt in 0..=MAX_JITTER_ATTEMPTS {
        if let Some(l) = cholesky(a, jitter) {
            return Ok(substitute(&l, b));
        }
        jitter = base * 1e-10 * 10f64.powi(attempt as i32);
        tracing::debug!("Cholesky failed, retrying with jitter {jitter:e}");
    }
    Err(EstimatorError::Numerical(
        "matrix is not positive definite".to_string(),
    ))
}

fn cholesky(a: &Array2<f64>, jitter: f64) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            if i == j {
                sum += jitter;
            }
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

fn substitute(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    // Forward: L z = b
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * z[k];
        }
        z[i] = sum / l[[i, i]];
    }
    // Backward: L^T x = z
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_solve_spd() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let b = array![2.0, 1.0];
        let x = solve_spd(&a, &b).expect("solve");
        assert_relative_eq!(x[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(x[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_matrix_is_regularized() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        let b = array![2.0, 2.0];
        let x = solve_spd(&a, &b).expect("jittered solve");
        assert_relative_eq!(x[0] + x[1], 2.0, epsilon = 1e-3);
    }
}
