//! Model artifact: winning estimator, fitted scaler and frozen schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::RegressionScores;
use super::scaler::StandardScaler;
use super::schema::FeatureSchema;

/// Per-candidate leaderboard entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub name: String,
    /// Catalog position, the final ranking tie-break.
    pub catalog_index: usize,
    pub train_r2: f64,
    pub test: RegressionScores,
    pub cv_mean_r2: f64,
    pub cv_std_r2: f64,
    /// `train_r2 - test.r2`.
    pub overfitting_gap: f64,
}

/// Training metadata, the authoritative record inference loads the schema from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetadata {
    pub best_model: String,
    pub best_r2_score: f64,
    pub feature_columns: Vec<String>,
    pub n_features: usize,
    pub training_date: DateTime<Utc>,
    pub n_samples: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub random_seed: u64,
    /// Hyperparameters of the refined winner, if refinement replaced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuned_params: Option<String>,
    /// Leaderboard in rank order.
    pub model_results: Vec<CandidateSummary>,
    pub schema: FeatureSchema,
}

/// Persisted bundle produced by one training run. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct ModelArtifact<M> {
    pub estimator: M,
    pub scaler: StandardScaler,
    pub metadata: TrainingMetadata,
}

impl<M> ModelArtifact<M> {
    #[must_use]
    pub fn schema(&self) -> &FeatureSchema {
        &self.metadata.schema
    }
}

/// File-name stem for an estimator name: `"Random Forest"` becomes `"random_forest"`.
#[must_use]
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}
