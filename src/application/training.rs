//! Training orchestration: split, scale, evaluate the catalog, rank, persist.
//!
//! The scaler is fitted on the training partition only and then applied to
//! both partitions. Candidates are evaluated one after another; each
//! candidate's folds fan out on the rayon pool. A candidate that fails is
//! logged and left out of the ranking. Training fails only when no candidate
//! survives.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::split::stratified_split;
use super::validation::cross_validate;
use crate::adapters::StoreError;
use crate::config::PipelineConfig;
use crate::domain::{
    build_training_matrix, CandidateSummary, CohortGenerator, LabeledRecord, ModelArtifact,
    RegressionScores, StandardScaler, TrainingMatrix, TrainingMetadata,
};
use crate::domain::metrics::r2_score;
use crate::ports::{ArtifactPaths, ArtifactStore, EstimatorError, Regressor};
use crate::{GlycoError, Result};

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct TrainingOutcome<M> {
    pub artifact: ModelArtifact<M>,
    pub paths: ArtifactPaths,
    /// Rank order, best first.
    pub leaderboard: Vec<CandidateSummary>,
}

/// A candidate refitted on the full training partition, with its scores.
struct Evaluated<M> {
    model: M,
    summary: CandidateSummary,
}

/// Scaled partitions shared by every candidate.
struct Partitions {
    x_train: Array2<f64>,
    y_train: Array1<f64>,
    x_test: Array2<f64>,
    y_test: Array1<f64>,
}

/// NaN sorts last.
fn score_key(v: f64) -> f64 {
    if v.is_nan() {
        f64::NEG_INFINITY
    } else {
        v
    }
}

/// NaN sorts last.
fn error_key(v: f64) -> f64 {
    if v.is_nan() {
        f64::INFINITY
    } else {
        v
    }
}

/// Held-out R² descending, then CV mean R² descending, then test RMSE
/// ascending, then catalog position.
fn rank_order(a: &CandidateSummary, b: &CandidateSummary) -> Ordering {
    score_key(b.test.r2)
        .total_cmp(&score_key(a.test.r2))
        .then_with(|| score_key(b.cv_mean_r2).total_cmp(&score_key(a.cv_mean_r2)))
        .then_with(|| error_key(a.test.rmse).total_cmp(&error_key(b.test.rmse)))
        .then_with(|| a.catalog_index.cmp(&b.catalog_index))
}

fn predict_checked<M: Regressor>(
    model: &M,
    x: ArrayView2<'_, f64>,
) -> std::result::Result<Array1<f64>, EstimatorError> {
    let pred = model.predict(x)?;
    if pred.iter().any(|v| !v.is_finite()) {
        return Err(EstimatorError::Numerical(format!(
            "{} produced non-finite predictions",
            model.name()
        )));
    }
    Ok(pred)
}

/// Trains a catalog of estimators and persists the winner.
pub struct ModelTrainingOrchestrator<M, S>
where
    M: Regressor,
    S: ArtifactStore,
{
    config: PipelineConfig,
    catalog: Vec<M>,
    store: Arc<S>,
}

impl<M, S> ModelTrainingOrchestrator<M, S>
where
    M: Regressor,
    S: ArtifactStore,
    S::Error: Into<StoreError>,
{
    /// Create an orchestrator over an ordered catalog of unfitted estimators.
    pub fn new(config: PipelineConfig, catalog: Vec<M>, store: Arc<S>) -> Self {
        Self {
            config,
            catalog,
            store,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Generate a synthetic cohort of `n` records and train on it.
    ///
    /// # Errors
    /// See [`ModelTrainingOrchestrator::train`].
    pub fn train_cohort(&self, n: usize, seed: u64) -> Result<TrainingOutcome<M>> {
        tracing::info!("Generating synthetic cohort: n={n}, seed={seed}");
        let cohort = CohortGenerator::new(self.config.cohort.clone()).generate(n, seed);
        self.train(&cohort)
    }

    /// Engineer a labeled cohort, freeze its schema and train on it.
    ///
    /// # Errors
    /// Returns error if the cohort is too small to split, the schema cannot
    /// be frozen, every candidate fails, or the artifact cannot be written.
    pub fn train(&self, cohort: &[LabeledRecord]) -> Result<TrainingOutcome<M>> {
        if cohort.is_empty() {
            return Err(GlycoError::Validation("empty training cohort".to_string()));
        }
        let matrix = build_training_matrix(cohort)?;
        self.train_matrix(matrix)
    }

    /// Train on an already engineered matrix whose columns follow `matrix.schema`.
    ///
    /// # Errors
    /// See [`ModelTrainingOrchestrator::train`].
    pub fn train_matrix(&self, matrix: TrainingMatrix) -> Result<TrainingOutcome<M>> {
        let TrainingMatrix {
            features,
            targets,
            schema,
        } = matrix;
        if features.ncols() != schema.len() {
            return Err(GlycoError::SchemaMismatch {
                expected: schema.len(),
                got: features.ncols(),
            });
        }

        let split = stratified_split(
            targets.view(),
            self.config.test_size,
            self.config.random_seed,
        )?;
        let raw_train = features.select(Axis(0), &split.train);
        let raw_test = features.select(Axis(0), &split.test);

        let scaler = StandardScaler::fit(raw_train.view())?;
        let parts = Partitions {
            x_train: scaler.transform(raw_train.view())?,
            y_train: targets.select(Axis(0), &split.train),
            x_test: scaler.transform(raw_test.view())?,
            y_test: targets.select(Axis(0), &split.test),
        };
        tracing::info!(
            "Training {} candidates on {} rows ({} features), testing on {}",
            self.catalog.len(),
            parts.x_train.nrows(),
            schema.len(),
            parts.x_test.nrows()
        );

        let mut evaluated = Vec::with_capacity(self.catalog.len());
        for (index, candidate) in self.catalog.iter().enumerate() {
            match self.evaluate(index, candidate, &parts) {
                Ok(e) => evaluated.push(e),
                Err(e) => {
                    tracing::warn!("Candidate {} failed and is excluded: {e}", candidate.name());
                }
            }
        }
        if evaluated.is_empty() {
            return Err(GlycoError::AllCandidatesFailed {
                attempted: self.catalog.len(),
            });
        }

        evaluated.sort_by(|a, b| rank_order(&a.summary, &b.summary));

        let mut tuned_params = None;
        if self.config.tune_best_model {
            if let Some(tuned) = self.refine(&evaluated[0], &parts) {
                tuned_params = Some(tuned.model.params());
                evaluated[0] = tuned;
            }
        }

        let leaderboard: Vec<CandidateSummary> =
            evaluated.iter().map(|e| e.summary.clone()).collect();
        let winner = &evaluated[0];
        tracing::info!(
            "Best model: {} (test R2 {:.4}, RMSE {:.2})",
            winner.summary.name,
            winner.summary.test.r2,
            winner.summary.test.rmse
        );

        let metadata = TrainingMetadata {
            best_model: winner.summary.name.clone(),
            best_r2_score: winner.summary.test.r2,
            feature_columns: schema.feature_names().to_vec(),
            n_features: schema.len(),
            training_date: Utc::now(),
            n_samples: targets.len(),
            n_train: split.train.len(),
            n_test: split.test.len(),
            random_seed: self.config.random_seed,
            tuned_params,
            model_results: leaderboard.clone(),
            schema,
        };
        let artifact = ModelArtifact {
            estimator: winner.model.clone(),
            scaler,
            metadata,
        };

        let fitted: Vec<M> = evaluated.into_iter().map(|e| e.model).collect();
        let paths = self
            .store
            .save(&artifact, &fitted)
            .map_err(|e| GlycoError::Storage(e.into()))?;

        Ok(TrainingOutcome {
            artifact,
            paths,
            leaderboard,
        })
    }

    fn evaluate(&self, index: usize, candidate: &M, parts: &Partitions) -> Result<Evaluated<M>> {
        let name = candidate.name().to_string();
        tracing::debug!("Evaluating {name}: {}", candidate.params());

        let cv = cross_validate(
            candidate,
            parts.x_train.view(),
            parts.y_train.view(),
            self.config.cv_folds,
        )?;

        let mut model = candidate.clone();
        model.fit(parts.x_train.view(), parts.y_train.view())?;
        let train_pred = predict_checked(&model, parts.x_train.view())?;
        let test_pred = predict_checked(&model, parts.x_test.view())?;

        let train_r2 = r2_score(parts.y_train.view(), train_pred.view());
        let test = RegressionScores::compute(parts.y_test.view(), test_pred.view());

        tracing::info!(
            "{name}: test R2={:.4} RMSE={:.2} MAE={:.2} | CV R2={:.4} (+/- {:.4})",
            test.r2,
            test.rmse,
            test.mae,
            cv.mean,
            cv.std
        );

        Ok(Evaluated {
            model,
            summary: CandidateSummary {
                name,
                catalog_index: index,
                train_r2,
                test,
                cv_mean_r2: cv.mean,
                cv_std_r2: cv.std,
                overfitting_gap: train_r2 - test.r2,
            },
        })
    }

    /// Search the winner's tuning grid by CV mean R².
    ///
    /// Returns the refitted variant only if its held-out R² is not worse than
    /// the current winner's.
    fn refine(&self, winner: &Evaluated<M>, parts: &Partitions) -> Option<Evaluated<M>> {
        let grid = winner.model.tuning_grid();
        if grid.is_empty() {
            tracing::info!("{} has no tuning grid; keeping defaults", winner.summary.name);
            return None;
        }
        tracing::info!("Refining {} over {} variants", winner.summary.name, grid.len());

        let mut best: Option<(f64, &M)> = None;
        for variant in &grid {
            match cross_validate(
                variant,
                parts.x_train.view(),
                parts.y_train.view(),
                self.config.cv_folds,
            ) {
                Ok(cv) => {
                    tracing::debug!("  {} -> CV R2 {:.4}", variant.params(), cv.mean);
                    if best.map_or(true, |(score, _)| score_key(cv.mean) > score_key(score)) {
                        best = Some((cv.mean, variant));
                    }
                }
                Err(e) => tracing::debug!("  {} failed: {e}", variant.params()),
            }
        }

        let (_, variant) = best?;
        let refined = match self.evaluate(winner.summary.catalog_index, variant, parts) {
            Ok(refined) => refined,
            Err(e) => {
                tracing::warn!("Refined {} failed to refit: {e}", winner.summary.name);
                return None;
            }
        };
        if score_key(refined.summary.test.r2) >= score_key(winner.summary.test.r2) {
            tracing::info!(
                "Refined {}: test R2 {:.4} -> {:.4} ({})",
                winner.summary.name,
                winner.summary.test.r2,
                refined.summary.test.r2,
                refined.model.params()
            );
            Some(refined)
        } else {
            tracing::info!("Refinement did not improve held-out R2; keeping defaults");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayView1;
    use crate::adapters::estimators::{Estimator, KnnRegressor, LinearModel, Weighting};
    use crate::adapters::FsArtifactStore;

    fn summary(name: &str, index: usize, r2: f64, cv: f64, rmse: f64) -> CandidateSummary {
        CandidateSummary {
            name: name.to_string(),
            catalog_index: index,
            train_r2: r2,
            test: RegressionScores { r2, rmse, mae: rmse },
            cv_mean_r2: cv,
            cv_std_r2: 0.0,
            overfitting_gap: 0.0,
        }
    }

    #[test]
    fn test_rank_order_tie_breaks() {
        let mut rows = vec![
            summary("d", 3, 0.8, 0.7, 10.0),
            summary("c", 2, 0.8, 0.7, 10.0),
            summary("b", 1, 0.8, 0.7, 9.0),
            summary("a", 0, 0.8, 0.75, 12.0),
            summary("e", 4, 0.9, 0.1, 20.0),
            summary("nan", 5, f64::NAN, 0.9, 1.0),
        ];
        rows.sort_by(rank_order);
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["e", "a", "b", "c", "d", "nan"]);
    }

    /// Fails every fit.
    #[derive(Debug, Clone)]
    struct Broken;

    impl Regressor for Broken {
        fn name(&self) -> &str {
            "Broken"
        }
        fn fit(
            &mut self,
            _: ArrayView2<'_, f64>,
            _: ArrayView1<'_, f64>,
        ) -> std::result::Result<(), EstimatorError> {
            Err(EstimatorError::Numerical("always fails".to_string()))
        }
        fn predict(
            &self,
            _: ArrayView2<'_, f64>,
        ) -> std::result::Result<Array1<f64>, EstimatorError> {
            Err(EstimatorError::NotFitted)
        }
        fn n_features(&self) -> Option<usize> {
            None
        }
        fn params(&self) -> String {
            String::new()
        }
        fn to_bytes(&self) -> std::result::Result<Vec<u8>, EstimatorError> {
            Ok(Vec::new())
        }
        fn from_bytes(_: &[u8]) -> std::result::Result<Self, EstimatorError> {
            Ok(Self)
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            cv_folds: 3,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_all_candidates_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FsArtifactStore::new(dir.path()));
        let orchestrator = ModelTrainingOrchestrator::new(config(), vec![Broken, Broken], store);
        let err = orchestrator.train_cohort(60, 1).expect_err("must fail");
        assert!(matches!(err, GlycoError::AllCandidatesFailed { attempted: 2 }));
        assert!(!dir.path().join("best_model.bin").exists());
    }

    #[test]
    fn test_train_ranks_and_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FsArtifactStore::new(dir.path()));
        let catalog = vec![
            Estimator::Knn(KnnRegressor::new(5, Weighting::Uniform)),
            Estimator::Linear(LinearModel::ridge(1.0)),
        ];
        let orchestrator = ModelTrainingOrchestrator::new(config(), catalog, Arc::clone(&store));
        let outcome = orchestrator.train_cohort(150, 42).expect("train");

        assert_eq!(outcome.leaderboard.len(), 2);
        assert!(outcome.leaderboard[0].test.r2 >= outcome.leaderboard[1].test.r2);
        let meta = &outcome.artifact.metadata;
        assert_eq!(meta.best_model, outcome.leaderboard[0].name);
        assert_eq!(meta.n_train + meta.n_test, 150);
        assert_eq!(meta.n_test, 30);
        assert_eq!(meta.feature_columns, outcome.artifact.schema().feature_names());
        assert_eq!(outcome.artifact.scaler.n_features(), meta.n_features);
        assert_eq!(outcome.paths.candidates.len(), 2);

        let stored = store.load_metadata().expect("load").expect("present");
        assert_eq!(stored.schema.fingerprint(), outcome.artifact.schema().fingerprint());
    }

    #[test]
    fn test_failing_candidate_is_excluded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FsArtifactStore::new(dir.path()));

        #[derive(Debug, Clone)]
        enum Mixed {
            Good(LinearModel),
            Bad(Broken),
        }
        impl Regressor for Mixed {
            fn name(&self) -> &str {
                match self {
                    Self::Good(m) => m.name(),
                    Self::Bad(m) => m.name(),
                }
            }
            fn fit(
                &mut self,
                x: ArrayView2<'_, f64>,
                y: ArrayView1<'_, f64>,
            ) -> std::result::Result<(), EstimatorError> {
                match self {
                    Self::Good(m) => m.fit(x, y),
                    Self::Bad(m) => m.fit(x, y),
                }
            }
            fn predict(
                &self,
                x: ArrayView2<'_, f64>,
            ) -> std::result::Result<Array1<f64>, EstimatorError> {
                match self {
                    Self::Good(m) => m.predict(x),
                    Self::Bad(m) => m.predict(x),
                }
            }
            fn n_features(&self) -> Option<usize> {
                match self {
                    Self::Good(m) => m.n_features(),
                    Self::Bad(m) => m.n_features(),
                }
            }
            fn params(&self) -> String {
                String::new()
            }
            fn to_bytes(&self) -> std::result::Result<Vec<u8>, EstimatorError> {
                match self {
                    Self::Good(m) => m.to_bytes(),
                    Self::Bad(m) => m.to_bytes(),
                }
            }
            fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, EstimatorError> {
                LinearModel::from_bytes(bytes).map(Self::Good)
            }
        }

        let catalog = vec![Mixed::Bad(Broken), Mixed::Good(LinearModel::ordinary())];
        let orchestrator = ModelTrainingOrchestrator::new(config(), catalog, store);
        let outcome = orchestrator.train_cohort(90, 3).expect("train");
        assert_eq!(outcome.leaderboard.len(), 1);
        assert_eq!(outcome.leaderboard[0].name, "Linear Regression");
        assert_eq!(outcome.leaderboard[0].catalog_index, 1);
    }

    #[test]
    fn test_scaler_is_fitted_on_train_partition_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FsArtifactStore::new(dir.path()));
        let cohort = CohortGenerator::new(config().cohort).generate(120, 9);
        let matrix = build_training_matrix(&cohort).expect("matrix");
        let split = stratified_split(matrix.targets.view(), 0.2, 42).expect("split");
        let train_rows = matrix.features.select(Axis(0), &split.train);
        let expected = StandardScaler::fit(train_rows.view()).expect("fit");

        let orchestrator = ModelTrainingOrchestrator::new(
            config(),
            vec![Estimator::Linear(LinearModel::ridge(1.0))],
            store,
        );
        let outcome = orchestrator.train_matrix(matrix).expect("train");
        assert_eq!(outcome.artifact.scaler, expected);
    }
}
