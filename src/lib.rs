//! # glycopredict
//!
//! Glucose prediction pipeline with a frozen feature contract.
//!
//! This crate provides:
//! - A seeded synthetic cohort generator with band-correlated clinical fields
//! - One feature-engineering path shared by training and inference, driven by
//!   a write-once [`domain::FeatureSchema`]
//! - Training and ranking of a catalog of regressors, persisted as a model
//!   artifact (estimator, scaler, schema, leaderboard)
//! - An inference engine that reproduces the training-time feature vector and
//!   classifies the predicted glucose
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Records, schema, feature engineering, scaler, prediction types
//! - `ports`: Trait definitions for estimators and artifact storage
//! - `adapters`: Estimator catalog, filesystem store, log sanitization
//! - `application`: Training orchestration and inference
//! - `config`: The explicit pipeline configuration value

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use application::{EngineState, InferenceEngine, ModelTrainingOrchestrator, TrainingOutcome};
pub use config::PipelineConfig;
pub use domain::{FeatureSchema, GlucoseCategory, PatientRecord, PredictionResult, RiskLevel};

/// Result type for glycopredict operations
pub type Result<T> = std::result::Result<T, GlycoError>;

/// Main error type for glycopredict
#[derive(Debug, thiserror::Error)]
pub enum GlycoError {
    #[error("Feature schema error: {0}")]
    Schema(#[from] domain::SchemaError),

    #[error("Schema mismatch: expected {expected} features, got {got}")]
    SchemaMismatch { expected: usize, got: usize },

    #[error("Artifact load failed: {0}")]
    ArtifactLoad(String),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] adapters::StoreError),

    #[error("Estimator error: {0}")]
    Estimator(#[from] ports::EstimatorError),

    #[error("All {attempted} candidate models failed to train")]
    AllCandidatesFailed { attempted: usize },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<domain::ScalerError> for GlycoError {
    fn from(err: domain::ScalerError) -> Self {
        match err {
            domain::ScalerError::Dimension { expected, got } => {
                Self::SchemaMismatch { expected, got }
            }
            domain::ScalerError::Empty => Self::Validation(err.to_string()),
        }
    }
}
