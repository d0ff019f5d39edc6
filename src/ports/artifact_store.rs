//! Artifact store port: durable storage for trained models.
//!
//! This trait abstracts the storage backend (a model directory) from the
//! training and inference services.

use std::path::PathBuf;

use crate::domain::{ModelArtifact, StandardScaler, TrainingMetadata};
use crate::ports::Regressor;

/// Locations written by one save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub best_model: PathBuf,
    pub scaler: PathBuf,
    pub metadata: PathBuf,
    pub manifest: PathBuf,
    /// One serialized estimator per ranked candidate.
    pub candidates: Vec<PathBuf>,
}

/// Trait for model artifact persistence.
pub trait ArtifactStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persist the winning artifact and every candidate's estimator.
    ///
    /// # Errors
    /// Returns error if any file cannot be written.
    fn save<M: Regressor>(
        &self,
        artifact: &ModelArtifact<M>,
        candidates: &[M],
    ) -> Result<ArtifactPaths, Self::Error>;

    /// Load the best estimator.
    ///
    /// # Returns
    /// `None` if no best model is stored.
    ///
    /// # Errors
    /// Returns error if the file exists but is corrupt or unreadable.
    fn load_best<M: Regressor>(&self) -> Result<Option<M>, Self::Error>;

    /// Load the fitted scaler, `None` if absent.
    ///
    /// # Errors
    /// Returns error if the file exists but is corrupt or unreadable.
    fn load_scaler(&self) -> Result<Option<StandardScaler>, Self::Error>;

    /// Load training metadata (including the frozen schema), `None` if absent.
    ///
    /// # Errors
    /// Returns error if the file exists but is corrupt or unreadable.
    fn load_metadata(&self) -> Result<Option<TrainingMetadata>, Self::Error>;
}
