//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the application and its collaborators (estimators, artifact storage).

mod artifact_store;
mod estimator;

pub use artifact_store::{ArtifactPaths, ArtifactStore};
pub use estimator::{check_training, check_width, EstimatorError, Regressor};
