//! Inference engine: reproduces the training feature vector and classifies.
//!
//! State machine per instance:
//!
//! ```text
//! Unloaded -> Loading -> Ready      estimator, scaler and schema loaded and consistent
//!                     -> Degraded   scaler or metadata absent, allow_degraded set
//!                     -> Failed     anything else
//! ```
//!
//! Loading happens once. After it, the engine is read-only: `predict` takes
//! `&self` and the engine can be shared across threads without locking.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::adapters::StoreError;
use crate::config::PipelineConfig;
use crate::domain::{
    FeatureEngineer, FeatureSchema, PatientRecord, PredictionFailure, PredictionResult,
    StandardScaler, TrainingMetadata,
};
use crate::ports::{ArtifactStore, Regressor};
use crate::GlycoError;

/// Error payload returned while no model is loaded.
pub const MODEL_NOT_LOADED: &str = "Modelo no cargado";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Unloaded,
    Loading,
    Ready,
    Degraded,
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Summary of the loaded model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub state: EngineState,
    pub best_model: String,
    pub r2_score: Option<f64>,
    pub training_date: Option<DateTime<Utc>>,
    pub n_features: usize,
    pub feature_columns: Vec<String>,
    pub schema_fingerprint: String,
}

struct LoadedModel<M> {
    estimator: M,
    scaler: Option<StandardScaler>,
    schema: FeatureSchema,
    metadata: Option<TrainingMetadata>,
}

/// Loads a model artifact once and serves predictions from it.
pub struct InferenceEngine<M, S>
where
    M: Regressor,
    S: ArtifactStore,
{
    config: PipelineConfig,
    store: Arc<S>,
    state: EngineState,
    model: Option<LoadedModel<M>>,
    failure: Option<String>,
}

impl<M, S> InferenceEngine<M, S>
where
    M: Regressor,
    S: ArtifactStore,
    S::Error: Into<StoreError>,
{
    /// Create an engine in the `Unloaded` state.
    pub fn new(config: PipelineConfig, store: Arc<S>) -> Self {
        Self {
            config,
            store,
            state: EngineState::Unloaded,
            model: None,
            failure: None,
        }
    }

    /// Create an engine and load it immediately.
    pub fn loaded(config: PipelineConfig, store: Arc<S>) -> Self {
        let mut engine = Self::new(config, store);
        engine.load();
        engine
    }

    #[must_use]
    pub fn status(&self) -> EngineState {
        self.state
    }

    /// Why loading failed, if it did.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Load the artifact. Only the first call does any work; later calls
    /// return the state already reached.
    pub fn load(&mut self) -> EngineState {
        if self.state != EngineState::Unloaded {
            tracing::debug!("Model already loaded (state {}); not reloading", self.state);
            return self.state;
        }

        self.state = EngineState::Loading;
        tracing::info!("Loading model artifact...");

        match self.try_load() {
            Ok((model, state)) => {
                tracing::info!(
                    "Model {} loaded ({} features, state {state})",
                    model.estimator.name(),
                    model.schema.len()
                );
                self.model = Some(model);
                self.state = state;
            }
            Err(e) => {
                tracing::error!("Failed to load model: {e}");
                self.failure = Some(e.to_string());
                self.state = EngineState::Failed;
            }
        }
        self.state
    }

    fn storage_err(e: S::Error) -> GlycoError {
        match e.into() {
            StoreError::Corrupt { file, reason } => {
                GlycoError::ArtifactLoad(format!("{file} is corrupt: {reason}"))
            }
            other => GlycoError::Storage(other),
        }
    }

    fn try_load(&self) -> Result<(LoadedModel<M>, EngineState), GlycoError> {
        let estimator: M = self
            .store
            .load_best()
            .map_err(Self::storage_err)?
            .ok_or_else(|| GlycoError::ArtifactLoad("best model file not found".to_string()))?;
        let scaler = self.store.load_scaler().map_err(Self::storage_err)?;
        let metadata = self.store.load_metadata().map_err(Self::storage_err)?;

        let complete = scaler.is_some() && metadata.is_some();
        if !complete && !self.config.allow_degraded {
            let missing: Vec<&str> = [
                scaler.is_none().then_some("scaler"),
                metadata.is_none().then_some("metadata"),
            ]
            .into_iter()
            .flatten()
            .collect();
            return Err(GlycoError::ArtifactLoad(format!(
                "missing {} (set GLYCO_ALLOW_DEGRADED=1 to load anyway)",
                missing.join(" and ")
            )));
        }

        let Some(width) = estimator.n_features() else {
            return Err(GlycoError::ArtifactLoad("stored estimator is not fitted".to_string()));
        };
        let scaler_width = scaler.as_ref().map(StandardScaler::n_features);

        let schema = match &metadata {
            Some(meta) => {
                meta.schema.verify()?;
                meta.schema.clone()
            }
            None => Self::fallback_schema(width, scaler_width)?,
        };

        let expected = schema.len();
        for got in [Some(width), scaler_width].into_iter().flatten() {
            if got != expected {
                return Err(GlycoError::SchemaMismatch { expected, got });
            }
        }

        let state = if complete {
            EngineState::Ready
        } else {
            tracing::warn!("Model loaded in degraded mode");
            EngineState::Degraded
        };
        Ok((
            LoadedModel {
                estimator,
                scaler,
                schema,
                metadata,
            },
            state,
        ))
    }

    /// Schema for an artifact without metadata: the catalog order when the
    /// estimator was trained on every catalog feature, else the legacy order.
    fn fallback_schema(
        width: usize,
        scaler_width: Option<usize>,
    ) -> Result<FeatureSchema, GlycoError> {
        if let Some(got) = scaler_width.filter(|&w| w != width) {
            return Err(GlycoError::SchemaMismatch { expected: width, got });
        }
        let schema = [FeatureSchema::standard(), FeatureSchema::fallback()]
            .into_iter()
            .find(|s| s.len() == width)
            .ok_or_else(|| {
                GlycoError::ArtifactLoad(format!(
                    "no training metadata and no known feature order has {width} features"
                ))
            })?;
        tracing::warn!(
            "No training metadata; using a {width}-feature default order and heuristic defaults"
        );
        Ok(schema)
    }

    /// The schema predictions are assembled against, once loaded.
    #[must_use]
    pub fn schema(&self) -> Option<&FeatureSchema> {
        self.model.as_ref().map(|m| &m.schema)
    }

    /// Predict glucose for one record.
    ///
    /// Never panics into the caller: every failure is a [`PredictionFailure`].
    /// Unknown categorical values are resolved by the schema default and
    /// reported in `warnings`.
    pub fn predict(&self, record: &PatientRecord) -> Result<PredictionResult, PredictionFailure> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| PredictionFailure::new(MODEL_NOT_LOADED))?;
        self.predict_with(model, record)
            .map_err(|e| PredictionFailure::new(e.to_string()))
    }

    fn predict_with(
        &self,
        model: &LoadedModel<M>,
        record: &PatientRecord,
    ) -> Result<PredictionResult, GlycoError> {
        let derivation = FeatureEngineer::derive(record, &model.schema);
        let raw = derivation.vector.to_row();
        let row = match &model.scaler {
            Some(scaler) => scaler.transform(raw.view())?,
            None => raw,
        };

        if let Some(expected) = model.estimator.n_features() {
            if row.ncols() != expected {
                return Err(GlycoError::SchemaMismatch {
                    expected,
                    got: row.ncols(),
                });
            }
        }

        let prediction = model.estimator.predict(row.view())?;
        let glucose = prediction
            .first()
            .copied()
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                GlycoError::Validation("estimator returned no finite value".to_string())
            })?;

        let warnings = derivation.warnings.iter().map(ToString::to_string).collect();
        Ok(PredictionResult::from_glucose(glucose, &self.config.thresholds).with_warnings(warnings))
    }

    /// Predict every record independently, in input order.
    ///
    /// A failing record yields its own error; the rest of the batch is unaffected.
    pub fn predict_batch(
        &self,
        records: &[PatientRecord],
    ) -> Vec<Result<PredictionResult, PredictionFailure>> {
        records.par_iter().map(|r| self.predict(r)).collect()
    }

    /// Model summary, `None` before a successful load.
    #[must_use]
    pub fn model_info(&self) -> Option<ModelInfo> {
        let model = self.model.as_ref()?;
        Some(ModelInfo {
            state: self.state,
            best_model: model
                .metadata
                .as_ref()
                .map_or_else(|| model.estimator.name().to_string(), |m| m.best_model.clone()),
            r2_score: model.metadata.as_ref().map(|m| m.best_r2_score),
            training_date: model.metadata.as_ref().map(|m| m.training_date),
            n_features: model.schema.len(),
            feature_columns: model.schema.feature_names().to_vec(),
            schema_fingerprint: model.schema.fingerprint().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::estimators::{Estimator, LinearModel};
    use crate::adapters::fs_store::{FsArtifactStore, BEST_MODEL_FILE, METADATA_FILE, SCALER_FILE};
    use crate::application::ModelTrainingOrchestrator;
    use crate::domain::{fields, vocab, GlucoseCategory};
    use std::path::Path;

    fn train_into(dir: &Path) {
        let config = PipelineConfig {
            cv_folds: 3,
            ..PipelineConfig::default()
        };
        let store = Arc::new(FsArtifactStore::new(dir));
        let catalog = vec![Estimator::Linear(LinearModel::ridge(1.0))];
        ModelTrainingOrchestrator::new(config, catalog, store)
            .train_cohort(120, 5)
            .expect("train");
    }

    fn engine(dir: &Path, allow_degraded: bool) -> InferenceEngine<Estimator, FsArtifactStore> {
        let config = PipelineConfig {
            allow_degraded,
            ..PipelineConfig::default()
        };
        InferenceEngine::loaded(config, Arc::new(FsArtifactStore::new(dir)))
    }

    fn record() -> PatientRecord {
        PatientRecord::new()
            .with(fields::EDAD, 55)
            .with(fields::SEXO, vocab::MALE)
            .with(fields::IMC, 28.5)
            .with(fields::TAS, 135)
            .with(fields::TAD, 85)
            .with(fields::PERIMETRO_ABDOMINAL, 95)
            .with(fields::REALIZA_EJERCICIO, vocab::NO)
            .with(fields::FUMA, vocab::NO)
            .with(fields::HISTORIA_FAMILIAR_DM, vocab::YES)
            .with(fields::PUNTAJE_FINDRISC, 12)
            .with(fields::RIESGO_CARDIOVASCULAR, 0.4)
    }

    #[test]
    fn test_unloaded_engine_returns_error_payload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FsArtifactStore::new(dir.path()));
        let engine: InferenceEngine<Estimator, FsArtifactStore> =
            InferenceEngine::new(PipelineConfig::default(), store);
        assert_eq!(engine.status(), EngineState::Unloaded);
        let err = engine.predict(&record()).expect_err("not loaded");
        assert_eq!(err.error, MODEL_NOT_LOADED);
        assert!(engine.model_info().is_none());
    }

    #[test]
    fn test_missing_model_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(dir.path(), true);
        assert_eq!(engine.status(), EngineState::Failed);
        assert!(engine.failure_reason().is_some());
        assert_eq!(engine.predict(&record()).expect_err("failed").error, MODEL_NOT_LOADED);
    }

    #[test]
    fn test_ready_prediction_is_consistent() {
        let dir = tempfile::tempdir().expect("tempdir");
        train_into(dir.path());
        let engine = engine(dir.path(), false);
        assert_eq!(engine.status(), EngineState::Ready);

        let result = engine.predict(&record()).expect("predict");
        let expected = PipelineConfig::default().thresholds.categorize(result.glucose_mg_dl);
        assert_eq!(result.category, expected);
        assert_eq!(result.risk_level, expected.risk_level());
        let cents = result.glucose_mg_dl * 100.0;
        assert!((cents - cents.round()).abs() < 1e-6);

        let info = engine.model_info().expect("info");
        assert_eq!(info.best_model, "Ridge Regression");
        assert_eq!(info.n_features, info.feature_columns.len());
    }

    #[test]
    fn test_load_runs_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        train_into(dir.path());
        let mut engine = engine(dir.path(), false);
        std::fs::remove_file(dir.path().join("best_model.bin")).expect("remove");
        assert_eq!(engine.load(), EngineState::Ready);
        assert!(engine.predict(&record()).is_ok());
    }

    #[test]
    fn test_missing_scaler_fails_fast_by_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        train_into(dir.path());
        std::fs::remove_file(dir.path().join(SCALER_FILE)).expect("remove");
        let engine = engine(dir.path(), false);
        assert_eq!(engine.status(), EngineState::Failed);
    }

    #[test]
    fn test_missing_scaler_degrades_when_allowed() {
        let dir = tempfile::tempdir().expect("tempdir");
        train_into(dir.path());
        std::fs::remove_file(dir.path().join(SCALER_FILE)).expect("remove");
        let engine = engine(dir.path(), true);
        assert_eq!(engine.status(), EngineState::Degraded);
        assert!(engine.predict(&record()).is_ok());
    }

    #[test]
    fn test_missing_metadata_uses_fallback_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        train_into(dir.path());
        std::fs::remove_file(dir.path().join(METADATA_FILE)).expect("remove");
        let engine = engine(dir.path(), true);
        assert_eq!(engine.status(), EngineState::Degraded);
        assert_eq!(
            engine.schema().map(FeatureSchema::feature_names),
            Some(FeatureSchema::standard().feature_names())
        );
        let result = engine.predict(&record()).expect("degraded engine still predicts");
        assert!(result.glucose_mg_dl.is_finite());
        assert!(engine.model_info().is_some_and(|info| info.r2_score.is_none()));
    }

    #[test]
    fn test_fallback_schema_matches_estimator_width() {
        type Engine = InferenceEngine<Estimator, FsArtifactStore>;
        let standard = FeatureSchema::standard().len();
        let legacy = FeatureSchema::fallback().len();
        assert_eq!(
            Engine::fallback_schema(standard, Some(standard)).map(|s| s.len()).ok(),
            Some(standard)
        );
        assert_eq!(Engine::fallback_schema(legacy, None).map(|s| s.len()).ok(), Some(legacy));
        assert!(Engine::fallback_schema(7, None).is_err());
        assert!(Engine::fallback_schema(standard, Some(legacy)).is_err());
    }

    #[test]
    fn test_missing_metadata_with_unknown_width_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let x = ndarray::Array2::from_shape_fn((12, 4), |(i, j)| (i * (j + 1)) as f64);
        let y = ndarray::Array1::from_shape_fn(12, |i| 90.0 + i as f64);
        let mut model = Estimator::Linear(LinearModel::ridge(1.0));
        model.fit(x.view(), y.view()).expect("fit");
        let bytes = model.to_bytes().expect("bytes");
        std::fs::write(dir.path().join(BEST_MODEL_FILE), bytes).expect("write");

        let engine = engine(dir.path(), true);
        assert_eq!(engine.status(), EngineState::Failed);
        assert!(engine.failure_reason().is_some_and(|r| r.contains("4 features")));
    }

    #[test]
    fn test_batch_isolates_unknown_categorical() {
        let dir = tempfile::tempdir().expect("tempdir");
        train_into(dir.path());
        let engine = engine(dir.path(), false);

        let odd = record().with(fields::FUMA, "A veces");
        let results = engine.predict_batch(&[record(), odd, record()]);
        assert_eq!(results.len(), 3);
        let second = results[1].as_ref().expect("resolved by default");
        assert_eq!(second.warnings.len(), 1);
        assert!(second.warnings[0].contains(fields::FUMA));
        assert!(results[0].as_ref().expect("ok").warnings.is_empty());
        assert_eq!(results[0], results[2]);
        assert!(GlucoseCategory::ALL.contains(&second.category));
    }
}
