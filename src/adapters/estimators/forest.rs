//! Tree ensembles: random forest (bootstrap + best splits) and extra trees
//! (full sample + random thresholds).
//!
//! Trees are independent, so they are grown on the rayon pool. Tree `i` draws
//! from its own stream seeded with `seed + i`, which keeps the fit
//! deterministic regardless of scheduling.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, Splitter, TreeParams};
use crate::ports::{check_training, check_width, EstimatorError, Regressor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForestKind {
    RandomForest,
    ExtraTrees,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestRegressor {
    kind: ForestKind,
    n_trees: usize,
    params: TreeParams,
    bootstrap: bool,
    seed: u64,
    trees: Vec<DecisionTree>,
    n_features: Option<usize>,
}

impl ForestRegressor {
    #[must_use]
    pub fn random_forest(seed: u64) -> Self {
        Self {
            kind: ForestKind::RandomForest,
            n_trees: 100,
            params: TreeParams {
                max_depth: Some(10),
                min_samples_split: 5,
                min_samples_leaf: 2,
                max_features: None,
                splitter: Splitter::Best,
            },
            bootstrap: true,
            seed,
            trees: Vec::new(),
            n_features: None,
        }
    }

    #[must_use]
    pub fn extra_trees(seed: u64) -> Self {
        Self {
            kind: ForestKind::ExtraTrees,
            n_trees: 100,
            params: TreeParams {
                max_depth: Some(10),
                splitter: Splitter::Random,
                ..TreeParams::default()
            },
            bootstrap: false,
            seed,
            trees: Vec::new(),
            n_features: None,
        }
    }

    #[must_use]
    pub fn with_trees(mut self, n_trees: usize) -> Self {
        self.n_trees = n_trees.max(1);
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.params.max_depth = max_depth;
        self
    }

    fn unfitted(&self) -> Self {
        Self {
            trees: Vec::new(),
            n_features: None,
            ..self.clone()
        }
    }
}

impl Regressor for ForestRegressor {
    fn name(&self) -> &str {
        match self.kind {
            ForestKind::RandomForest => "Random Forest",
            ForestKind::ExtraTrees => "Extra Trees",
        }
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
        let trees = (0..self.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha20Rng::seed_from_u64(self.seed.wrapping_add(i as u64));
                let indices: Vec<usize> = if self.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                DecisionTree::fit(x, y, &indices, &self.params, &mut rng)
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!("{}: grew {} trees", self.name(), trees.len());
        self.trees = trees;
        self.n_features = Some(x.ncols());
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, EstimatorError> {
        check_width(self.n_features, x)?;
        let n_trees = self.trees.len() as f64;
        Ok(x
            .rows()
            .into_iter()
            .map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / n_trees)
            .collect())
    }

    fn n_features(&self) -> Option<usize> {
        self.n_features
    }

    fn params(&self) -> String {
        format!(
            "n_estimators={}, max_depth={:?}, min_samples_split={}, min_samples_leaf={}, bootstrap={}",
            self.n_trees,
            self.params.max_depth,
            self.params.min_samples_split,
            self.params.min_samples_leaf,
            self.bootstrap
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
        for n_trees in [100, 200] {
            for max_depth in [Some(10), Some(20), None] {
                grid.push(self.unfitted().with_trees(n_trees).with_max_depth(max_depth));
            }
        }
        grid
    }
}
