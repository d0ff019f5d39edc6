//! Estimator port: uniform fit/predict/serialize capability.
//!
//! Every candidate regressor implements this trait. The orchestrator and the
//! inference engine dispatch through it and never inspect concrete types.

use ndarray::{Array1, ArrayView1, ArrayView2};

/// Errors raised by estimator implementations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EstimatorError {
    #[error("estimator is not fitted")]
    NotFitted,

    #[error("expected {expected} features, got {got}")]
    Dimension { expected: usize, got: usize },

    #[error("invalid training data: {0}")]
    InvalidInput(String),

    #[error("numerical failure: {0}")]
    Numerical(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// A regression estimator.
pub trait Regressor: Clone + Send + Sync {
    /// Human-readable name, unique within a catalog.
    fn name(&self) -> &str;

    /// Fit on a scaled feature matrix.
    ///
    /// # Errors
    /// Returns error on shape mismatch or numerical failure. The estimator is
    /// left unfitted on error.
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), EstimatorError>;

    /// Predict one value per row.
    ///
    /// # Errors
    /// Returns [`EstimatorError::NotFitted`] or [`EstimatorError::Dimension`].
    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, EstimatorError>;

    /// Feature count seen during `fit`, `None` before fitting.
    fn n_features(&self) -> Option<usize>;

    /// Short description of the hyperparameters.
    fn params(&self) -> String;

    /// Serialize the fitted state.
    ///
    /// # Errors
    /// Returns [`EstimatorError::Serialization`] on encoder failure.
    fn to_bytes(&self) -> Result<Vec<u8>, EstimatorError>;

    /// Restore from [`Regressor::to_bytes`] output.
    ///
    /// # Errors
    /// Returns [`EstimatorError::Serialization`] for corrupt input.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EstimatorError>;

    /// Unfitted hyperparameter variants for refinement. Empty by default.
    fn tuning_grid(&self) -> Vec<Self> {
        Vec::new()
    }
}

/// Check a prediction matrix against the fitted width.
///
/// # Errors
/// Returns [`EstimatorError::NotFitted`] or [`EstimatorError::Dimension`].
pub fn check_width(fitted: Option<usize>, x: ArrayView2<'_, f64>) -> Result<usize, EstimatorError> {
    let expected = fitted.ok_or(EstimatorError::NotFitted)?;
    if x.ncols() != expected {
        return Err(EstimatorError::Dimension {
            expected,
            got: x.ncols(),
        });
    }
    Ok(expected)
}

/// Validate a training pair before fitting.
///
/// # Errors
/// Returns [`EstimatorError::InvalidInput`] for empty, ragged or non-finite data.
pub fn check_training(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
) -> Result<(), EstimatorError> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(EstimatorError::InvalidInput("empty feature matrix".to_string()));
    }
    if x.nrows() != y.len() {
        return Err(EstimatorError::InvalidInput(format!(
            "{} rows but {} targets",
            x.nrows(),
            y.len()
        )));
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(EstimatorError::InvalidInput("non-finite value".to_string()));
    }
    Ok(())
}
