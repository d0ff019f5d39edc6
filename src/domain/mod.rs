//! Domain layer: Core types and pure transforms.
//!
//! Nothing here touches the filesystem. Records, the feature schema, the
//! feature engineer, the cohort generator and prediction types are all plain
//! serializable values.

pub mod artifact;
pub mod cohort;
pub mod features;
pub mod metrics;
pub mod patient;
pub mod prediction;
pub mod scaler;
pub mod schema;

pub use artifact::{slug, CandidateSummary, ModelArtifact, TrainingMetadata};
pub use cohort::{CohortGenerator, CohortSummary, LabeledRecord};
pub use features::{
    build_training_matrix, Derivation, FeatureEngineer, FeatureVector, TrainingMatrix,
};
pub use metrics::RegressionScores;
pub use patient::{fields, vocab, FieldValue, PatientRecord};
pub use prediction::{
    GlucoseCategory, GlucoseThresholds, PredictionFailure, PredictionOutcome, PredictionResult,
    RiskLevel,
};
pub use scaler::{ScalerError, StandardScaler};
pub use schema::{
    AlcoholEncoding, CategoricalEncodings, EncodingWarning, FeatureSchema, SchemaBuilder,
    SchemaError,
};
