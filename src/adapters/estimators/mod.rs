//! Estimator adapters: the concrete regressors behind the [`Regressor`] port.
//!
//! [`Estimator`] is the closed catalog type the orchestrator trains and the
//! store persists. It dispatches by variant; nothing downstream looks at
//! estimator names to decide how to fit, predict or serialize.

mod boosting;
mod forest;
mod kernel;
mod knn;
mod linalg;
mod linear;
mod mlp;
mod tree;

pub use boosting::{AdaBoost, GradientBoosting};
pub use forest::{ForestKind, ForestRegressor};
pub use kernel::{Gamma, KernelRidge};
pub use knn::{KnnRegressor, Weighting};
pub use linear::{LinearModel, Penalty};
pub use mlp::MlpRegressor;
pub use tree::{DecisionTree, Splitter, TreeParams};

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::ports::{EstimatorError, Regressor};

/// Any estimator of the standard catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Estimator {
    Linear(LinearModel),
    Forest(ForestRegressor),
    GradientBoosting(GradientBoosting),
    AdaBoost(AdaBoost),
    KernelRidge(KernelRidge),
    Knn(KnnRegressor),
    Mlp(MlpRegressor),
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            Estimator::Linear($inner) => $body,
            Estimator::Forest($inner) => $body,
            Estimator::GradientBoosting($inner) => $body,
            Estimator::AdaBoost($inner) => $body,
            Estimator::KernelRidge($inner) => $body,
            Estimator::Knn($inner) => $body,
            Estimator::Mlp($inner) => $body,
        }
    };
}

impl Regressor for Estimator {
    fn name(&self) -> &str {
        dispatch!(self, m => m.name())
    }

    fn fit(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
    ) -> Result<(), EstimatorError> {
        dispatch!(self, m => m.fit(x, y))
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, EstimatorError> {
        dispatch!(self, m => m.predict(x))
    }

    fn n_features(&self) -> Option<usize> {
        dispatch!(self, m => m.n_features())
    }

    fn params(&self) -> String {
        dispatch!(self, m => m.params())
    }

    fn to_bytes(&self) -> Result<Vec<u8>, EstimatorError> {
        bincode::serialize(self).map_err(|e| EstimatorError::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, EstimatorError> {
        bincode::deserialize(bytes).map_err(|e| EstimatorError::Serialization(e.to_string()))
    }

    fn tuning_grid(&self) -> Vec<Self> {
        match self {
            Self::Linear(m) => m.tuning_grid().into_iter().map(Self::Linear).collect(),
            Self::Forest(m) => m.tuning_grid().into_iter().map(Self::Forest).collect(),
            Self::GradientBoosting(m) => {
                m.tuning_grid().into_iter().map(Self::GradientBoosting).collect()
            }
            Self::AdaBoost(m) => m.tuning_grid().into_iter().map(Self::AdaBoost).collect(),
            Self::KernelRidge(m) => m.tuning_grid().into_iter().map(Self::KernelRidge).collect(),
            Self::Knn(m) => m.tuning_grid().into_iter().map(Self::Knn).collect(),
            Self::Mlp(m) => m.tuning_grid().into_iter().map(Self::Mlp).collect(),
        }
    }
}

/// The eleven candidates trained by default, in catalog (tie-break) order.
#[must_use]
pub fn standard_catalog(seed: u64) -> Vec<Estimator> {
    vec![
        Estimator::Linear(LinearModel::ordinary()),
        Estimator::Linear(LinearModel::ridge(1.0)),
        Estimator::Linear(LinearModel::lasso(0.1)),
        Estimator::Linear(LinearModel::elastic_net(0.1, 0.5)),
        Estimator::Forest(ForestRegressor::random_forest(seed)),
        Estimator::Forest(ForestRegressor::extra_trees(seed)),
        Estimator::GradientBoosting(GradientBoosting::new(seed)),
        Estimator::AdaBoost(AdaBoost::new(seed)),
        Estimator::KernelRidge(KernelRidge::new(seed)),
        Estimator::Knn(KnnRegressor::new(7, Weighting::Distance)),
        Estimator::Mlp(MlpRegressor::new(seed)),
    ]
}

/// A reduced catalog with small ensembles, for quick runs.
#[must_use]
pub fn quick_catalog(seed: u64) -> Vec<Estimator> {
    vec![
        Estimator::Linear(LinearModel::ordinary()),
        Estimator::Linear(LinearModel::ridge(1.0)),
        Estimator::Forest(ForestRegressor::random_forest(seed).with_trees(10)),
        Estimator::GradientBoosting(
            GradientBoosting::new(seed).with_stages(30, 0.1).with_max_depth(3),
        ),
        Estimator::Knn(KnnRegressor::new(7, Weighting::Distance)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::slug;
    use std::collections::BTreeSet;

    #[test]
    fn test_standard_catalog_names_are_unique() {
        let catalog = standard_catalog(42);
        assert_eq!(catalog.len(), 11);
        let slugs: BTreeSet<String> = catalog.iter().map(|m| slug(m.name())).collect();
        assert_eq!(slugs.len(), catalog.len());
        assert!(catalog.iter().all(|m| m.n_features().is_none()));
    }

    #[test]
    fn test_enum_round_trip_keeps_variant() {
        let x = ndarray::array![[0.0, 1.0], [1.0, 0.0], [2.0, 2.0], [3.0, 1.0]];
        let y = ndarray::array![1.0, 2.0, 5.0, 6.0];
        let mut model = Estimator::Linear(LinearModel::ridge(0.5));
        model.fit(x.view(), y.view()).expect("fit");

        let restored = Estimator::from_bytes(&model.to_bytes().expect("bytes")).expect("restore");
        assert_eq!(restored, model);
        assert_eq!(
            restored.predict(x.view()).expect("predict"),
            model.predict(x.view()).expect("predict")
        );
    }

    #[test]
    fn test_tuning_grid_preserves_variant() {
        let grid = Estimator::Knn(KnnRegressor::new(7, Weighting::Distance)).tuning_grid();
        assert!(!grid.is_empty());
        assert!(grid.iter().all(|m| matches!(m, Estimator::Knn(_))));
    }
}
