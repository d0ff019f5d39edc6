//! End-to-end: train into a temporary model directory, then serve predictions
//! from it.

use std::path::Path;
use std::sync::Arc;

use glycopredict::adapters::fs_store::{BEST_MODEL_FILE, MANIFEST_FILE, METADATA_FILE, SCALER_FILE};
use glycopredict::adapters::{quick_catalog, Estimator, FsArtifactStore};
use glycopredict::application::MODEL_NOT_LOADED;
use glycopredict::domain::{fields, vocab, PatientRecord};
use glycopredict::{
    EngineState, InferenceEngine, ModelTrainingOrchestrator, PipelineConfig, TrainingOutcome,
};
use tempfile::TempDir;

fn config(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        cv_folds: 3,
        ..PipelineConfig::default()
    }
    .with_models_dir(dir)
}

fn train(dir: &Path) -> TrainingOutcome<Estimator> {
    let config = config(dir);
    let catalog = quick_catalog(config.random_seed);
    let store = Arc::new(FsArtifactStore::new(dir));
    ModelTrainingOrchestrator::new(config, catalog, store)
        .train_cohort(160, 11)
        .expect("training succeeds")
}

fn engine(dir: &Path, allow_degraded: bool) -> InferenceEngine<Estimator, FsArtifactStore> {
    let config = PipelineConfig {
        allow_degraded,
        ..config(dir)
    };
    InferenceEngine::loaded(config, Arc::new(FsArtifactStore::new(dir)))
}

fn scenario() -> PatientRecord {
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
fn training_writes_a_complete_artifact() {
    let dir = TempDir::new().expect("tempdir");
    let outcome = train(dir.path());

    for file in [BEST_MODEL_FILE, SCALER_FILE, METADATA_FILE, MANIFEST_FILE] {
        assert!(dir.path().join(file).is_file(), "{file} missing");
    }
    assert_eq!(outcome.paths.candidates.len(), outcome.leaderboard.len());

    let r2: Vec<f64> = outcome.leaderboard.iter().map(|c| c.test.r2).collect();
    assert!(r2.windows(2).all(|w| w[0] >= w[1]), "leaderboard not ranked: {r2:?}");

    let metadata = &outcome.artifact.metadata;
    assert_eq!(metadata.best_model, outcome.leaderboard[0].name);
    assert_eq!(metadata.n_samples, 160);
    assert_eq!(metadata.n_train + metadata.n_test, 160);
    assert_eq!(metadata.n_features, metadata.schema.len());
    assert_eq!(outcome.artifact.scaler.n_features(), metadata.n_features);
}

#[test]
fn scenario_prediction_is_categorized_by_thresholds() {
    let dir = TempDir::new().expect("tempdir");
    train(dir.path());
    let engine = engine(dir.path(), false);
    assert_eq!(engine.status(), EngineState::Ready);

    let thresholds = config(dir.path()).thresholds;
    let result = engine.predict(&scenario()).expect("prediction");
    assert!(result.glucose_mg_dl.is_finite());
    assert_eq!(result.category, thresholds.categorize(result.glucose_mg_dl));
    assert_eq!(result.risk_level, result.category.risk_level());
    assert!(result.warnings.is_empty());
}

#[test]
fn batch_keeps_order_and_isolates_bad_values() {
    let dir = TempDir::new().expect("tempdir");
    train(dir.path());
    let engine = engine(dir.path(), false);

    let odd = scenario().with(fields::SEXO, "X");
    let older = scenario().with(fields::EDAD, 78);
    let records = vec![scenario(), odd, older];
    let batch = engine.predict_batch(&records);

    assert_eq!(batch.len(), 3);
    for (record, result) in records.iter().zip(&batch) {
        assert_eq!(result, &engine.predict(record));
    }
    let flagged = batch[1].as_ref().expect("unknown categorical still predicts");
    assert_eq!(flagged.warnings.len(), 1);
    assert!(batch[0].as_ref().expect("ok").warnings.is_empty());
}

#[test]
fn model_info_reflects_metadata() {
    let dir = TempDir::new().expect("tempdir");
    let outcome = train(dir.path());
    let engine = engine(dir.path(), false);

    let info = engine.model_info().expect("info once loaded");
    let metadata = &outcome.artifact.metadata;
    assert_eq!(info.state, EngineState::Ready);
    assert_eq!(info.best_model, metadata.best_model);
    assert_eq!(info.r2_score, Some(metadata.best_r2_score));
    assert_eq!(info.feature_columns, metadata.feature_columns);
    assert_eq!(info.n_features, metadata.n_features);
    assert_eq!(info.schema_fingerprint, metadata.schema.fingerprint());
}

#[test]
fn missing_scaler_fails_fast_unless_degraded_is_allowed() {
    let dir = TempDir::new().expect("tempdir");
    train(dir.path());
    std::fs::remove_file(dir.path().join(SCALER_FILE)).expect("remove scaler");

    let strict = engine(dir.path(), false);
    assert_eq!(strict.status(), EngineState::Failed);
    assert!(strict.failure_reason().is_some());
    assert_eq!(
        strict.predict(&scenario()).expect_err("no model").error,
        MODEL_NOT_LOADED
    );

    let lenient = engine(dir.path(), true);
    assert_eq!(lenient.status(), EngineState::Degraded);
    assert!(lenient.predict(&scenario()).is_ok());
}

#[test]
fn tampered_model_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    train(dir.path());
    let path = dir.path().join(BEST_MODEL_FILE);
    let mut bytes = std::fs::read(&path).expect("read model");
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, bytes).expect("write model");

    let engine = engine(dir.path(), true);
    assert_eq!(engine.status(), EngineState::Failed);
    assert!(engine.model_info().is_none());
}

#[test]
fn empty_directory_leaves_engine_failed() {
    let dir = TempDir::new().expect("tempdir");
    let engine = engine(dir.path(), true);
    assert_eq!(engine.status(), EngineState::Failed);
    assert!(engine.predict(&scenario()).is_err());
}
