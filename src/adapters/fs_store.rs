//! Filesystem artifact store: one model directory per training run.
//!
//! Layout:
//! - `<slug>.bin` per ranked candidate (bincode)
//! - `best_model.bin` (bincode)
//! - `scaler.json`, `model_metadata.json` (pretty JSON)
//! - `manifest.json`: SHA-256 of every file above, written last
//!
//! A save is written into a sibling staging directory and swapped into place
//! only once every file is on disk, so a directory never mixes two runs and a
//! failed save leaves the previous run untouched. The store owns the whole
//! directory.
//!
//! Loads verify the file against the manifest. A directory without a manifest
//! still loads, with a warning.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{slug, ModelArtifact, StandardScaler, TrainingMetadata};
use crate::ports::{ArtifactPaths, ArtifactStore, EstimatorError, Regressor};

pub const BEST_MODEL_FILE: &str = "best_model.bin";
pub const SCALER_FILE: &str = "scaler.json";
pub const METADATA_FILE: &str = "model_metadata.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Error type for artifact store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error in {file}: {reason}")]
    Serialization { file: String, reason: String },

    #[error("Integrity check failed for {file}: {reason}")]
    Corrupt { file: String, reason: String },

    #[error("Estimator error: {0}")]
    Estimator(#[from] EstimatorError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    created_at: DateTime<Utc>,
    files: BTreeMap<String, String>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes).iter().map(|b| format!("{b:02x}")).collect()
}

/// Artifact store rooted at a model directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn write_file(
        dir: &Path,
        name: &str,
        bytes: &[u8],
        files: &mut BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let path = dir.join(name);
        fs::write(&path, bytes).map_err(Self::io_err(&path))?;
        files.insert(name.to_string(), sha256_hex(bytes));
        Ok(())
    }

    /// Sibling path `.<dir name>.<suffix>` next to the model directory.
    fn sibling(&self, suffix: &str) -> Result<PathBuf, StoreError> {
        let name = self.dir.file_name().ok_or_else(|| StoreError::Io {
            path: self.dir.clone(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "model directory has no name"),
        })?;
        Ok(self
            .dir
            .with_file_name(format!(".{}.{suffix}", name.to_string_lossy())))
    }

    fn remove_dir_if_present(path: &Path) -> Result<(), StoreError> {
        match fs::remove_dir_all(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(Self::io_err(path)(e)),
            _ => Ok(()),
        }
    }

    /// Write every file of a run into `staging`, manifest last.
    fn write_run<M: Regressor>(
        staging: &Path,
        artifact: &ModelArtifact<M>,
        candidates: &[M],
    ) -> Result<Vec<String>, StoreError> {
        let mut files = BTreeMap::new();
        let mut candidate_files = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let name = format!("{}.bin", slug(candidate.name()));
            Self::write_file(staging, &name, &candidate.to_bytes()?, &mut files)?;
            candidate_files.push(name);
        }

        Self::write_file(staging, BEST_MODEL_FILE, &artifact.estimator.to_bytes()?, &mut files)?;
        let scaler = Self::to_json(SCALER_FILE, &artifact.scaler)?;
        Self::write_file(staging, SCALER_FILE, &scaler, &mut files)?;
        let metadata = Self::to_json(METADATA_FILE, &artifact.metadata)?;
        Self::write_file(staging, METADATA_FILE, &metadata, &mut files)?;

        let manifest = Manifest {
            created_at: Utc::now(),
            files,
        };
        let path = staging.join(MANIFEST_FILE);
        fs::write(&path, Self::to_json(MANIFEST_FILE, &manifest)?).map_err(Self::io_err(&path))?;
        Ok(candidate_files)
    }

    /// Replace the model directory with `staging`.
    fn swap_in(&self, staging: &Path) -> Result<(), StoreError> {
        let previous = self.sibling("previous")?;
        Self::remove_dir_if_present(&previous)?;

        let had_previous = self.dir.exists();
        if had_previous {
            fs::rename(&self.dir, &previous).map_err(Self::io_err(&self.dir))?;
        }
        if let Err(e) = fs::rename(staging, &self.dir) {
            if had_previous {
                if let Err(restore) = fs::rename(&previous, &self.dir) {
                    tracing::error!(
                        "Could not restore previous models in {:?}: {restore}",
                        self.dir
                    );
                }
            }
            return Err(Self::io_err(&self.dir)(e));
        }
        if had_previous {
            if let Err(e) = fs::remove_dir_all(&previous) {
                tracing::warn!("Could not remove previous models at {previous:?}: {e}");
            }
        }
        Ok(())
    }

    fn to_json<T: Serialize>(file: &str, value: &T) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialization {
            file: file.to_string(),
            reason: e.to_string(),
        })
    }

    fn from_json<T: DeserializeOwned>(file: &str, bytes: &[u8]) -> Result<T, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization {
            file: file.to_string(),
            reason: e.to_string(),
        })
    }

    fn manifest(&self) -> Result<Option<Manifest>, StoreError> {
        let path = self.dir.join(MANIFEST_FILE);
        match fs::read(&path) {
            Ok(bytes) => Self::from_json(MANIFEST_FILE, &bytes).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(&path)(e)),
        }
    }

    /// Read `name`, checking its hash against the manifest. `None` if absent.
    fn read_verified(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.dir.join(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_err(&path)(e)),
        };

        match self.manifest()? {
            Some(manifest) => {
                let expected = manifest.files.get(name).ok_or_else(|| StoreError::Corrupt {
                    file: name.to_string(),
                    reason: "not listed in manifest".to_string(),
                })?;
                if sha256_hex(&bytes) != *expected {
                    return Err(StoreError::Corrupt {
                        file: name.to_string(),
                        reason: "hash mismatch".to_string(),
                    });
                }
            }
            None => {
                tracing::warn!("No {MANIFEST_FILE} in {:?}; loading {name} unverified", self.dir);
            }
        }
        Ok(Some(bytes))
    }

    /// Load a candidate estimator by its display name.
    ///
    /// # Errors
    /// Returns error if the file exists but is corrupt or unreadable.
    pub fn load_candidate<M: Regressor>(&self, name: &str) -> Result<Option<M>, StoreError> {
        let file = format!("{}.bin", slug(name));
        self.read_verified(&file)?
            .map(|bytes| M::from_bytes(&bytes).map_err(StoreError::from))
            .transpose()
    }
}

impl ArtifactStore for FsArtifactStore {
    type Error = StoreError;

    fn save<M: Regressor>(
        &self,
        artifact: &ModelArtifact<M>,
        candidates: &[M],
    ) -> Result<ArtifactPaths, StoreError> {
        let staging = self.sibling("staging")?;
        Self::remove_dir_if_present(&staging)?;
        fs::create_dir_all(&staging).map_err(Self::io_err(&staging))?;

        let written = Self::write_run(&staging, artifact, candidates).and_then(|files| {
            self.swap_in(&staging)?;
            Ok(files)
        });
        let candidate_files = match written {
            Ok(files) => files,
            Err(e) => {
                // Best-effort cleanup; the previous run is still in place.
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        tracing::info!(
            "Saved {} candidate models and best model ({}) to {:?}",
            candidate_files.len(),
            artifact.metadata.best_model,
            self.dir
        );

        Ok(ArtifactPaths {
            dir: self.dir.clone(),
            best_model: self.dir.join(BEST_MODEL_FILE),
            scaler: self.dir.join(SCALER_FILE),
            metadata: self.dir.join(METADATA_FILE),
            manifest: self.dir.join(MANIFEST_FILE),
            candidates: candidate_files.iter().map(|f| self.dir.join(f)).collect(),
        })
    }

    fn load_best<M: Regressor>(&self) -> Result<Option<M>, StoreError> {
        self.read_verified(BEST_MODEL_FILE)?
            .map(|bytes| M::from_bytes(&bytes).map_err(StoreError::from))
            .transpose()
    }

    fn load_scaler(&self) -> Result<Option<StandardScaler>, StoreError> {
        self.read_verified(SCALER_FILE)?
            .map(|bytes| Self::from_json(SCALER_FILE, &bytes))
            .transpose()
    }

    fn load_metadata(&self) -> Result<Option<TrainingMetadata>, StoreError> {
        self.read_verified(METADATA_FILE)?
            .map(|bytes| Self::from_json(METADATA_FILE, &bytes))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::estimators::{Estimator, KnnRegressor, LinearModel, Weighting};
    use crate::domain::{FeatureSchema, RegressionScores};
    use ndarray::array;

    fn artifact() -> (ModelArtifact<Estimator>, Vec<Estimator>) {
        let x = array![[0.0, 1.0], [1.0, 3.0], [2.0, 2.0], [3.0, 5.0]];
        let y = array![90.0, 101.0, 115.0, 130.0];
        let scaler = StandardScaler::fit(x.view()).expect("scaler");
        let xs = scaler.transform(x.view()).expect("transform");

        let mut ridge = Estimator::Linear(LinearModel::ridge(1.0));
        ridge.fit(xs.view(), y.view()).expect("fit");
        let mut knn = Estimator::Knn(KnnRegressor::new(2, Weighting::Uniform));
        knn.fit(xs.view(), y.view()).expect("fit");

        let metadata = TrainingMetadata {
            best_model: ridge.name().to_string(),
            best_r2_score: 0.9,
            feature_columns: vec!["edad".into(), "imc".into()],
            n_features: 2,
            training_date: Utc::now(),
            n_samples: 4,
            n_train: 4,
            n_test: 0,
            random_seed: 42,
            tuned_params: None,
            model_results: vec![crate::domain::CandidateSummary {
                name: ridge.name().to_string(),
                catalog_index: 0,
                train_r2: 0.95,
                test: RegressionScores {
                    r2: 0.9,
                    rmse: 3.0,
                    mae: 2.5,
                },
                cv_mean_r2: 0.88,
                cv_std_r2: 0.02,
                overfitting_gap: 0.05,
            }],
            schema: FeatureSchema::standard(),
        };
        let artifact = ModelArtifact {
            estimator: ridge.clone(),
            scaler,
            metadata,
        };
        (artifact, vec![ridge, knn])
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path().join("models"));
        let (artifact, candidates) = artifact();

        let paths = store.save(&artifact, &candidates).expect("save");
        assert_eq!(paths.candidates.len(), 2);
        assert!(paths.candidates[0].ends_with("ridge_regression.bin"));
        assert!(paths.manifest.exists());

        let best: Estimator = store.load_best().expect("load").expect("present");
        assert_eq!(best, artifact.estimator);
        assert_eq!(store.load_scaler().expect("load"), Some(artifact.scaler.clone()));
        let metadata = store.load_metadata().expect("load").expect("present");
        assert_eq!(metadata, artifact.metadata);
        assert_eq!(metadata.schema.fingerprint(), artifact.schema().fingerprint());

        let knn: Option<Estimator> = store.load_candidate("K-Nearest Neighbors").expect("load");
        assert_eq!(knn.as_ref(), candidates.get(1));
    }

    #[test]
    fn test_empty_directory_loads_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path());
        assert!(store.load_best::<Estimator>().expect("load").is_none());
        assert!(store.load_scaler().expect("load").is_none());
        assert!(store.load_metadata().expect("load").is_none());
    }

    #[test]
    fn test_tampered_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path());
        let (artifact, candidates) = artifact();
        let paths = store.save(&artifact, &candidates).expect("save");

        let mut scaler_json = fs::read_to_string(&paths.scaler).expect("read");
        scaler_json.push(' ');
        fs::write(&paths.scaler, scaler_json).expect("write");

        assert!(matches!(store.load_scaler(), Err(StoreError::Corrupt { .. })));
        assert!(store.load_best::<Estimator>().is_ok());
    }

    #[test]
    fn test_missing_manifest_is_tolerated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path());
        let (artifact, candidates) = artifact();
        let paths = store.save(&artifact, &candidates).expect("save");
        fs::remove_file(paths.manifest).expect("remove");

        assert!(store.load_best::<Estimator>().expect("load").is_some());
    }

    #[test]
    fn test_resave_replaces_previous_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path().join("models"));
        let (artifact, candidates) = artifact();
        store.save(&artifact, &candidates).expect("first save");
        fs::write(store.dir().join("extra_trees.bin"), b"old run").expect("write");

        store.save(&artifact, &candidates[..1]).expect("second save");
        assert!(!store.dir().join("extra_trees.bin").exists());
        assert!(!store.dir().join("k_nearest_neighbors.bin").exists());
        assert!(store.load_candidate::<Estimator>("K-Nearest Neighbors").expect("load").is_none());
        assert!(store.load_best::<Estimator>().expect("load").is_some());

        let siblings: Vec<_> = fs::read_dir(dir.path())
            .expect("list")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(siblings, vec![std::ffi::OsString::from("models")]);
    }

    #[test]
    fn test_failed_save_keeps_previous_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path().join("models"));
        let (artifact, candidates) = artifact();
        store.save(&artifact, &candidates).expect("first save");

        // A plain file where the staging directory goes makes the next save fail.
        let staging = store.sibling("staging").expect("path");
        fs::write(&staging, b"in the way").expect("write");
        let retrained = ModelArtifact {
            estimator: candidates[1].clone(),
            scaler: artifact.scaler.clone(),
            metadata: artifact.metadata.clone(),
        };
        assert!(matches!(store.save(&retrained, &candidates[1..]), Err(StoreError::Io { .. })));

        let best: Estimator = store.load_best().expect("verified load").expect("present");
        assert_eq!(best, artifact.estimator);
        assert!(store.dir().join(MANIFEST_FILE).exists());
        assert!(store.load_candidate::<Estimator>("K-Nearest Neighbors").expect("load").is_some());
    }

    #[test]
    fn test_garbage_model_is_an_estimator_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path());
        fs::write(dir.path().join(BEST_MODEL_FILE), b"not a model").expect("write");
        assert!(matches!(
            store.load_best::<Estimator>(),
            Err(StoreError::Estimator(EstimatorError::Serialization(_)))
        ));
    }
}
