//! Prediction result types.
//!
//! Maps a numeric glucose estimate (mg/dL) onto the clinical categories used by
//! callers. Labels are the fixed Spanish strings consumed by existing clients.

use serde::{Deserialize, Serialize};

/// Category boundaries in mg/dL.
///
/// `glucose < normal_upper` is Normal, `glucose <= prediabetes_upper` is
/// Prediabetes, anything above is Diabetes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseThresholds {
    pub normal_upper: f64,
    pub prediabetes_upper: f64,
}

impl Default for GlucoseThresholds {
    fn default() -> Self {
        Self {
            normal_upper: 100.0,
            prediabetes_upper: 126.0,
        }
    }
}

impl GlucoseThresholds {
    #[must_use]
    pub fn categorize(&self, glucose: f64) -> GlucoseCategory {
        if glucose < self.normal_upper {
            GlucoseCategory::Normal
        } else if glucose <= self.prediabetes_upper {
            GlucoseCategory::Prediabetes
        } else {
            GlucoseCategory::Diabetes
        }
    }
}

/// Clinical glucose category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GlucoseCategory {
    Normal,
    Prediabetes,
    Diabetes,
}

impl GlucoseCategory {
    pub const ALL: [Self; 3] = [Self::Normal, Self::Prediabetes, Self::Diabetes];

    /// Ordinal band index (0, 1, 2) used by the cohort generator.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Normal => 0,
            Self::Prediabetes => 1,
            Self::Diabetes => 2,
        }
    }

    #[must_use]
    pub fn risk_level(self) -> RiskLevel {
        match self {
            Self::Normal => RiskLevel::Low,
            Self::Prediabetes => RiskLevel::Moderate,
            Self::Diabetes => RiskLevel::High,
        }
    }

    /// Fixed per-category confidence label (not a statistical confidence).
    #[must_use]
    pub fn confidence(self) -> &'static str {
        match self {
            Self::Normal | Self::Diabetes => "Alto",
            Self::Prediabetes => "Moderado",
        }
    }

    #[must_use]
    pub fn interpretation(self) -> &'static str {
        match self {
            Self::Normal => "Los niveles de glucosa están dentro del rango normal. Se recomienda mantener un estilo de vida saludable.",
            Self::Prediabetes => "Los niveles de glucosa indican prediabetes. Se recomienda consultar con un médico y mejorar los hábitos de vida.",
            Self::Diabetes => "Los niveles de glucosa sugieren diabetes. Es importante consultar inmediatamente con un médico para evaluación y tratamiento.",
        }
    }
}

impl std::fmt::Display for GlucoseCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Prediabetes => write!(f, "Prediabetes"),
            Self::Diabetes => write!(f, "Diabetes"),
        }
    }
}

/// Risk level attached to a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "Bajo")]
    Low,
    #[serde(rename = "Moderado")]
    Moderate,
    #[serde(rename = "Alto")]
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "Bajo"),
            Self::Moderate => write!(f, "Moderado"),
            Self::High => write!(f, "Alto"),
        }
    }
}

/// Outcome of a single successful prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Estimated fasting glucose, rounded to two decimals.
    pub glucose_mg_dl: f64,
    pub category: GlucoseCategory,
    pub risk_level: RiskLevel,
    pub confidence: String,
    pub interpretation: String,
    /// Non-fatal input problems resolved by default encoding.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PredictionResult {
    /// Build a result from a raw estimator output.
    #[must_use]
    pub fn from_glucose(raw: f64, thresholds: &GlucoseThresholds) -> Self {
        let glucose_mg_dl = round2(raw);
        let category = thresholds.categorize(glucose_mg_dl);
        Self {
            glucose_mg_dl,
            category,
            risk_level: category.risk_level(),
            confidence: category.confidence().to_string(),
            interpretation: category.interpretation().to_string(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// Explicit error payload returned instead of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{error}")]
pub struct PredictionFailure {
    pub error: String,
}

impl PredictionFailure {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Wire shape of a prediction: either the result fields or `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionOutcome {
    Success(PredictionResult),
    Failure(PredictionFailure),
}

impl From<Result<PredictionResult, PredictionFailure>> for PredictionOutcome {
    fn from(result: Result<PredictionResult, PredictionFailure>) -> Self {
        match result {
            Ok(r) => Self::Success(r),
            Err(e) => Self::Failure(e),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundaries() {
        let t = GlucoseThresholds::default();
        assert_eq!(t.categorize(99.99), GlucoseCategory::Normal);
        assert_eq!(t.categorize(100.00), GlucoseCategory::Prediabetes);
        assert_eq!(t.categorize(126.00), GlucoseCategory::Prediabetes);
        assert_eq!(t.categorize(126.01), GlucoseCategory::Diabetes);
    }

    #[test]
    fn test_rounding_happens_before_categorizing() {
        let t = GlucoseThresholds::default();
        // 99.996 rounds to 100.00, which is Prediabetes.
        let result = PredictionResult::from_glucose(99.996, &t);
        assert!((result.glucose_mg_dl - 100.0).abs() < 1e-9);
        assert_eq!(result.category, GlucoseCategory::Prediabetes);
    }

    #[test]
    fn test_labels() {
        let t = GlucoseThresholds::default();
        let normal = PredictionResult::from_glucose(85.0, &t);
        assert_eq!(normal.risk_level, RiskLevel::Low);
        assert_eq!(normal.confidence, "Alto");

        let pre = PredictionResult::from_glucose(110.0, &t);
        assert_eq!(pre.risk_level, RiskLevel::Moderate);
        assert_eq!(pre.confidence, "Moderado");

        let dm = PredictionResult::from_glucose(180.0, &t);
        assert_eq!(dm.risk_level, RiskLevel::High);
        assert!(dm.interpretation.contains("diabetes"));
    }

    #[test]
    fn test_risk_level_display_matches_wire_label() {
        for level in [RiskLevel::Low, RiskLevel::Moderate, RiskLevel::High] {
            let wire = serde_json::to_value(level).expect("serialize");
            assert_eq!(wire.as_str(), Some(level.to_string().as_str()));
        }
    }

    #[test]
    fn test_wire_shape() {
        let t = GlucoseThresholds::default();
        let ok: PredictionOutcome = Ok(PredictionResult::from_glucose(110.123, &t)).into();
        let json = serde_json::to_value(&ok).expect("serialize");
        assert_eq!(json["glucose_mg_dl"], 110.12);
        assert_eq!(json["category"], "Prediabetes");
        assert_eq!(json["risk_level"], "Moderado");
        assert!(json.get("warnings").is_none());

        let err: PredictionOutcome = Err(PredictionFailure::new("Modelo no cargado")).into();
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json["error"], "Modelo no cargado");
    }
}
