//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement
//! the two entry points: training a model artifact and predicting from one.

mod inference;
mod split;
mod training;
mod validation;

pub use inference::{EngineState, InferenceEngine, ModelInfo, MODEL_NOT_LOADED};
pub use split::{stratified_split, tertile_strata, TrainTestSplit};
pub use training::{ModelTrainingOrchestrator, TrainingOutcome};
pub use validation::{cross_validate, fold_ranges, CvScores};
