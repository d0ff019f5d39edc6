//! Pipeline configuration.
//!
//! A single explicit value threaded into the cohort generator, the training
//! orchestrator and the inference engine. There is no process-wide instance.

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::GlucoseThresholds;

/// Synthetic cohort parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortConfig {
    pub min_age: f64,
    pub max_age: f64,
    /// Registration date stamped on every generated record.
    ///
    /// Fixed so that generation stays a pure function of `(n, seed)`.
    pub reference_date: NaiveDate,
    /// Prior probability of the Normal / Prediabetes / Diabetes bands.
    pub band_priors: [f64; 3],
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            min_age: 18.0,
            max_age: 90.0,
            reference_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or(NaiveDate::MIN),
            band_priors: [0.40, 0.35, 0.25],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub models_dir: PathBuf,
    pub random_seed: u64,
    /// Fraction of the cohort held out for the test partition.
    pub test_size: f64,
    pub cv_folds: usize,
    pub default_samples: usize,
    pub cohort: CohortConfig,
    pub thresholds: GlucoseThresholds,
    /// Permit the Degraded inference state when the scaler or metadata is missing.
    pub allow_degraded: bool,
    /// Run hyperparameter refinement on the winning candidate.
    pub tune_best_model: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            random_seed: 42,
            test_size: 0.2,
            cv_folds: 5,
            default_samples: 1000,
            cohort: CohortConfig::default(),
            thresholds: GlucoseThresholds::default(),
            allow_degraded: false,
            tune_best_model: false,
        }
    }
}

impl PipelineConfig {
    /// Defaults with best-effort `GLYCO_*` environment overrides.
    ///
    /// Unparseable or out-of-range values are ignored with a warning.
    #[must_use]
    pub fn from_env_or_default() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("GLYCO_MODELS_DIR") {
            if !v.trim().is_empty() {
                cfg.models_dir = PathBuf::from(v.trim());
            }
        }

        if let Some(x) = parse_env::<u64>("GLYCO_RANDOM_SEED") {
            cfg.random_seed = x;
        }

        if let Some(x) = parse_env::<f64>("GLYCO_TEST_SIZE") {
            if x.is_finite() && x > 0.0 && x < 1.0 {
                cfg.test_size = x;
            } else {
                tracing::warn!("Ignoring GLYCO_TEST_SIZE={x}: must be in (0, 1)");
            }
        }

        if let Some(x) = parse_env::<usize>("GLYCO_CV_FOLDS") {
            if x >= 2 {
                cfg.cv_folds = x;
            } else {
                tracing::warn!("Ignoring GLYCO_CV_FOLDS={x}: need at least 2 folds");
            }
        }

        if let Some(x) = parse_env::<usize>("GLYCO_DEFAULT_SAMPLES") {
            if x > 0 {
                cfg.default_samples = x;
            }
        }

        if let Some(x) = parse_flag("GLYCO_ALLOW_DEGRADED") {
            cfg.allow_degraded = x;
        }

        if let Some(x) = parse_flag("GLYCO_TUNE_BEST_MODEL") {
            cfg.tune_best_model = x;
        }

        cfg
    }

    /// Builder-style override of the models directory.
    #[must_use]
    pub fn with_models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = dir.into();
        self
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring {key}: unparseable value");
            None
        }
    }
}

fn parse_flag(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => {
            tracing::warn!("Ignoring {key}: expected a boolean");
            None
        }
    }
}
