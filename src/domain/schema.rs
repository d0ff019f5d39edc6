//! Feature schema: the frozen contract between training and inference.
//!
//! The schema owns the ordered feature names, the categorical encoding table and
//! the single defaults table. It is produced once by [`SchemaBuilder::freeze`] at
//! the end of a training pass and shipped inside the model artifact; inference
//! consumes it verbatim and never rebuilds it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::patient::{fields, vocab, FieldValue};

/// Current on-disk schema format.
pub const SCHEMA_FORMAT_VERSION: u32 = 1;

pub const PRESION_ARTERIAL_MEDIA: &str = "presion_arterial_media";
pub const PRESION_PULSO: &str = "presion_pulso";
pub const RATIO_CINTURA_ALTURA: &str = "ratio_cintura_altura";
pub const IMC_CATEGORIA: &str = "imc_categoria";
pub const EDAD_CATEGORIA: &str = "edad_categoria";
pub const EDAD_SQUARED: &str = "edad_squared";
pub const SCORE_CV: &str = "score_cv";
pub const INDICE_SALUD: &str = "indice_salud";

pub const ALCOHOL_NUNCA: &str = "consume_alcohol_Nunca";
pub const ALCOHOL_OCASIONAL: &str = "consume_alcohol_Ocasional";
pub const ALCOHOL_FRECUENTE: &str = "consume_alcohol_Frecuente";

/// How a feature column is produced, which decides how its default is frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    /// Raw numeric measurement. Default: training median.
    Measured,
    /// Clinical composite computed from other fields. Default: training median.
    Derived,
    /// Two-valued categorical encoded to {0, 1}. Default: fixed heuristic.
    Binary,
    /// Multi-valued categorical encoded to an ordinal code. Default: fixed heuristic.
    Ordinal,
    /// One-hot dummy of a multi-valued categorical. Default: fixed heuristic.
    Indicator,
}

impl FeatureKind {
    #[must_use]
    pub fn uses_training_median(self) -> bool {
        matches!(self, Self::Measured | Self::Derived)
    }
}

/// Catalog entry for one engineered feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureSpec {
    pub name: &'static str,
    pub kind: FeatureKind,
    /// Heuristic default used when no training statistic applies.
    pub fallback: f64,
}

const fn spec(name: &'static str, kind: FeatureKind, fallback: f64) -> FeatureSpec {
    FeatureSpec {
        name,
        kind,
        fallback,
    }
}

/// Every feature the engineer can produce, in canonical column order.
///
/// Raw fields first (categoricals encoded in place), then derived composites,
/// then alcohol dummies. Any schema's feature order is a subsequence of this.
pub const FEATURE_CATALOG: &[FeatureSpec] = &[
    spec(fields::EDAD, FeatureKind::Measured, 50.0),
    spec(fields::SEXO, FeatureKind::Binary, 0.0),
    spec(fields::ZONA_RESIDENCIA, FeatureKind::Binary, 1.0),
    spec(fields::ESTRATO, FeatureKind::Measured, 3.0),
    spec(fields::TALLA, FeatureKind::Measured, 165.0),
    spec(fields::PESO, FeatureKind::Measured, 70.0),
    spec(fields::IMC, FeatureKind::Measured, 25.0),
    spec(fields::PERIMETRO_ABDOMINAL, FeatureKind::Measured, 90.0),
    spec(fields::TAS, FeatureKind::Measured, 120.0),
    spec(fields::TAD, FeatureKind::Measured, 80.0),
    spec(fields::FRECUENCIA_CARDIACA, FeatureKind::Measured, 70.0),
    spec(fields::REALIZA_EJERCICIO, FeatureKind::Binary, 0.0),
    spec(fields::CONSUME_ALCOHOL, FeatureKind::Ordinal, 0.0),
    spec(fields::FUMA, FeatureKind::Binary, 0.0),
    spec(fields::MEDICAMENTOS_HTA, FeatureKind::Binary, 0.0),
    spec(fields::HISTORIA_FAMILIAR_DM, FeatureKind::Binary, 0.0),
    spec(fields::DIABETES_GESTACIONAL, FeatureKind::Binary, 0.0),
    spec(fields::PUNTAJE_FINDRISC, FeatureKind::Measured, 5.0),
    spec(fields::RIESGO_CARDIOVASCULAR, FeatureKind::Measured, 0.2),
    spec(PRESION_ARTERIAL_MEDIA, FeatureKind::Derived, 93.33),
    spec(PRESION_PULSO, FeatureKind::Derived, 40.0),
    spec(RATIO_CINTURA_ALTURA, FeatureKind::Derived, 0.55),
    spec(IMC_CATEGORIA, FeatureKind::Derived, 1.0),
    spec(EDAD_CATEGORIA, FeatureKind::Derived, 2.0),
    spec(EDAD_SQUARED, FeatureKind::Derived, 2500.0),
    spec(SCORE_CV, FeatureKind::Derived, 0.0),
    spec(INDICE_SALUD, FeatureKind::Derived, 1.0),
    spec(ALCOHOL_NUNCA, FeatureKind::Indicator, 1.0),
    spec(ALCOHOL_OCASIONAL, FeatureKind::Indicator, 0.0),
    spec(ALCOHOL_FRECUENTE, FeatureKind::Indicator, 0.0),
];

/// Legacy column order used when an artifact ships without a schema.
const FALLBACK_ORDER: [&str; 25] = [
    fields::EDAD,
    fields::IMC,
    fields::TAS,
    fields::TAD,
    fields::PERIMETRO_ABDOMINAL,
    fields::FRECUENCIA_CARDIACA,
    fields::PUNTAJE_FINDRISC,
    fields::RIESGO_CARDIOVASCULAR,
    PRESION_ARTERIAL_MEDIA,
    PRESION_PULSO,
    RATIO_CINTURA_ALTURA,
    IMC_CATEGORIA,
    EDAD_CATEGORIA,
    EDAD_SQUARED,
    SCORE_CV,
    INDICE_SALUD,
    fields::SEXO,
    fields::ZONA_RESIDENCIA,
    fields::ESTRATO,
    fields::REALIZA_EJERCICIO,
    fields::CONSUME_ALCOHOL,
    fields::FUMA,
    fields::MEDICAMENTOS_HTA,
    fields::HISTORIA_FAMILIAR_DM,
    fields::DIABETES_GESTACIONAL,
];

/// Look up a catalog entry by feature name.
#[must_use]
pub fn catalog_entry(name: &str) -> Option<&'static FeatureSpec> {
    FEATURE_CATALOG.iter().find(|s| s.name == name)
}

/// Fields removed by the Clean step. They never reach the numeric vector.
pub const DROPPED_FIELDS: [&str; 3] = [
    fields::IDENTIFICACION,
    fields::FECHA_REGISTRO,
    fields::RESULTADO,
];

/// A categorical value that was not in the encoding table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingWarning {
    pub field: String,
    pub value: String,
}

impl std::fmt::Display for EncodingWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown value {:?} for {}; default encoding applied",
            self.value, self.field
        )
    }
}

/// Categorical-to-numeric encoding table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoricalEncodings {
    table: BTreeMap<String, BTreeMap<String, f64>>,
}

impl CategoricalEncodings {
    /// The fixed vocabulary shared with existing artifacts and callers.
    #[must_use]
    pub fn standard() -> Self {
        let yes_no = || {
            BTreeMap::from([(vocab::NO.to_string(), 0.0), (vocab::YES.to_string(), 1.0)])
        };

        let mut table = BTreeMap::new();
        table.insert(
            fields::SEXO.to_string(),
            BTreeMap::from([(vocab::MALE.to_string(), 0.0), (vocab::FEMALE.to_string(), 1.0)]),
        );
        table.insert(
            fields::ZONA_RESIDENCIA.to_string(),
            BTreeMap::from([(vocab::RURAL.to_string(), 0.0), (vocab::URBAN.to_string(), 1.0)]),
        );
        for name in [
            fields::REALIZA_EJERCICIO,
            fields::FUMA,
            fields::MEDICAMENTOS_HTA,
            fields::HISTORIA_FAMILIAR_DM,
            fields::DIABETES_GESTACIONAL,
        ] {
            table.insert(name.to_string(), yes_no());
        }
        table.insert(
            fields::CONSUME_ALCOHOL.to_string(),
            BTreeMap::from([
                (vocab::NEVER.to_string(), 0.0),
                (vocab::OCCASIONAL.to_string(), 1.0),
                (vocab::FREQUENT.to_string(), 2.0),
            ]),
        );
        Self { table }
    }

    #[must_use]
    pub fn is_categorical(&self, field: &str) -> bool {
        self.table.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    /// Encode a categorical value.
    ///
    /// Text must match the vocabulary exactly. A number is accepted when it is
    /// already one of the field's codes.
    ///
    /// # Errors
    /// Returns an [`EncodingWarning`] for values outside the table; callers
    /// substitute the schema default.
    pub fn encode(&self, field: &str, value: &FieldValue) -> Result<f64, EncodingWarning> {
        let warning = || EncodingWarning {
            field: field.to_string(),
            value: value.to_string(),
        };
        let codes = self.table.get(field).ok_or_else(warning)?;
        match value {
            FieldValue::Text(s) => codes.get(s.as_str()).copied().ok_or_else(warning),
            FieldValue::Number(v) => codes
                .values()
                .copied()
                .find(|c| c == v)
                .ok_or_else(warning),
        }
    }

    /// Ordered levels of a field (by code).
    #[must_use]
    pub fn levels(&self, field: &str) -> Vec<(&str, f64)> {
        let mut levels: Vec<(&str, f64)> = self
            .table
            .get(field)
            .map(|codes| codes.iter().map(|(k, v)| (k.as_str(), *v)).collect())
            .unwrap_or_default();
        levels.sort_by(|a, b| a.1.total_cmp(&b.1));
        levels
    }
}

impl Default for CategoricalEncodings {
    fn default() -> Self {
        Self::standard()
    }
}

/// Which representation of the alcohol field a schema expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlcoholEncoding {
    Ordinal,
    OneHot,
    Both,
    Absent,
}

impl AlcoholEncoding {
    fn detect(names: &[String]) -> Self {
        let has = |n: &str| names.iter().any(|x| x == n);
        let ordinal = has(fields::CONSUME_ALCOHOL);
        let dummies = has(ALCOHOL_NUNCA) || has(ALCOHOL_OCASIONAL) || has(ALCOHOL_FRECUENTE);
        match (ordinal, dummies) {
            (true, true) => Self::Both,
            (true, false) => Self::Ordinal,
            (false, true) => Self::OneHot,
            (false, false) => Self::Absent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("schema has no features")]
    Empty,

    #[error("duplicate feature name: {0}")]
    DuplicateFeature(String),

    #[error("feature {0} is not produced by the feature engineer")]
    UnknownFeature(String),

    #[error("defaults table has {defaults} entries for {names} features")]
    DefaultsLength { names: usize, defaults: usize },

    #[error("default for {0} is not finite")]
    NonFiniteDefault(String),

    #[error("unsupported schema format version {0}")]
    UnsupportedVersion(u32),

    #[error("schema fingerprint mismatch (stored {stored}, computed {computed})")]
    FingerprintMismatch { stored: String, computed: String },
}

/// Frozen feature schema.
///
/// Write-once: there are no mutators. A schema is either frozen by
/// [`SchemaBuilder`], rebuilt from the static catalog, or deserialized from an
/// artifact and checked with [`FeatureSchema::verify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    format_version: u32,
    feature_names: Vec<String>,
    defaults: Vec<f64>,
    encodings: CategoricalEncodings,
    alcohol_encoding: AlcoholEncoding,
    fingerprint: String,
    frozen_at: DateTime<Utc>,
}

impl FeatureSchema {
    fn from_parts(
        feature_names: Vec<String>,
        defaults: Vec<f64>,
        encodings: CategoricalEncodings,
    ) -> Result<Self, SchemaError> {
        let alcohol_encoding = AlcoholEncoding::detect(&feature_names);
        let mut schema = Self {
            format_version: SCHEMA_FORMAT_VERSION,
            feature_names,
            defaults,
            encodings,
            alcohol_encoding,
            fingerprint: String::new(),
            frozen_at: Utc::now(),
        };
        schema.check_structure()?;
        schema.fingerprint = schema.compute_fingerprint();
        Ok(schema)
    }

    /// Every catalog feature with its heuristic default.
    #[must_use]
    pub fn standard() -> Self {
        let names = FEATURE_CATALOG.iter().map(|s| s.name.to_string()).collect();
        let defaults = FEATURE_CATALOG.iter().map(|s| s.fallback).collect();
        Self::trusted(names, defaults)
    }

    /// Legacy 25-column order with hardcoded defaults, for artifacts that lack
    /// a persisted schema.
    #[must_use]
    pub fn fallback() -> Self {
        let names = FALLBACK_ORDER.iter().map(|s| (*s).to_string()).collect();
        let defaults = FALLBACK_ORDER
            .iter()
            .map(|n| catalog_entry(n).map_or(0.0, |s| s.fallback))
            .collect();
        Self::trusted(names, defaults)
    }

    fn trusted(names: Vec<String>, defaults: Vec<f64>) -> Self {
        let alcohol_encoding = AlcoholEncoding::detect(&names);
        let mut schema = Self {
            format_version: SCHEMA_FORMAT_VERSION,
            feature_names: names,
            defaults,
            encodings: CategoricalEncodings::standard(),
            alcohol_encoding,
            fingerprint: String::new(),
            frozen_at: DateTime::<Utc>::default(),
        };
        schema.fingerprint = schema.compute_fingerprint();
        schema
    }

    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    #[must_use]
    pub fn defaults(&self) -> &[f64] {
        &self.defaults
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.feature_names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.feature_names.is_empty()
    }

    #[must_use]
    pub fn encodings(&self) -> &CategoricalEncodings {
        &self.encodings
    }

    #[must_use]
    pub fn alcohol_encoding(&self) -> AlcoholEncoding {
        self.alcohol_encoding
    }

    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    #[must_use]
    pub fn frozen_at(&self) -> DateTime<Utc> {
        self.frozen_at
    }

    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|n| n == name)
    }

    /// The literal default for a feature, if the schema has it.
    #[must_use]
    pub fn default_for(&self, name: &str) -> Option<f64> {
        self.position(name).map(|i| self.defaults[i])
    }

    /// Check a deserialized schema before use.
    ///
    /// # Errors
    /// Returns the first structural problem or a fingerprint mismatch.
    pub fn verify(&self) -> Result<(), SchemaError> {
        if self.format_version != SCHEMA_FORMAT_VERSION {
            return Err(SchemaError::UnsupportedVersion(self.format_version));
        }
        self.check_structure()?;
        let computed = self.compute_fingerprint();
        if computed != self.fingerprint {
            return Err(SchemaError::FingerprintMismatch {
                stored: self.fingerprint.clone(),
                computed,
            });
        }
        Ok(())
    }

    fn check_structure(&self) -> Result<(), SchemaError> {
        if self.feature_names.is_empty() {
            return Err(SchemaError::Empty);
        }
        if self.defaults.len() != self.feature_names.len() {
            return Err(SchemaError::DefaultsLength {
                names: self.feature_names.len(),
                defaults: self.defaults.len(),
            });
        }
        let mut seen = BTreeSet::new();
        for (name, default) in self.feature_names.iter().zip(&self.defaults) {
            if !seen.insert(name.as_str()) {
                return Err(SchemaError::DuplicateFeature(name.clone()));
            }
            if catalog_entry(name).is_none() {
                return Err(SchemaError::UnknownFeature(name.clone()));
            }
            if !default.is_finite() {
                return Err(SchemaError::NonFiniteDefault(name.clone()));
            }
        }
        Ok(())
    }

    /// SHA-256 over everything that affects the numeric vector.
    fn compute_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.format_version.to_le_bytes());
        for (name, default) in self.feature_names.iter().zip(&self.defaults) {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(default.to_bits().to_le_bytes());
        }
        for field in self.encodings.fields() {
            hasher.update(field.as_bytes());
            for (level, code) in self.encodings.levels(field) {
                hasher.update(level.as_bytes());
                hasher.update(code.to_bits().to_le_bytes());
            }
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// Accumulates engineered training rows and freezes a schema from them.
///
/// Feature names are the catalog columns actually produced during the pass, in
/// catalog order; the order never depends on map iteration.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    observed: BTreeMap<&'static str, Vec<f64>>,
    rows: usize,
}

impl SchemaBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one engineered row.
    pub fn observe<'a, I>(&mut self, values: I)
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        self.rows += 1;
        for (name, value) in values {
            if let Some(spec) = catalog_entry(name) {
                let column = self.observed.entry(spec.name).or_default();
                if value.is_finite() {
                    column.push(value);
                }
            }
        }
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Freeze the schema.
    ///
    /// Measured and derived columns default to their training median; encoded
    /// columns keep their heuristic default.
    ///
    /// # Errors
    /// Fails if no catalog column was observed.
    pub fn freeze(self) -> Result<FeatureSchema, SchemaError> {
        let mut names = Vec::new();
        let mut defaults = Vec::new();
        for spec in FEATURE_CATALOG {
            let Some(values) = self.observed.get(spec.name) else {
                continue;
            };
            let default = if spec.kind.uses_training_median() {
                median(values).unwrap_or(spec.fallback)
            } else {
                spec.fallback
            };
            names.push(spec.name.to_string());
            defaults.push(default);
        }
        let schema = FeatureSchema::from_parts(names, defaults, CategoricalEncodings::standard())?;
        tracing::debug!(
            "Froze feature schema: {} features from {} rows ({:?} alcohol encoding)",
            schema.len(),
            self.rows,
            schema.alcohol_encoding()
        );
        Ok(schema)
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_encodings() {
        let enc = CategoricalEncodings::standard();
        assert_eq!(enc.encode(fields::SEXO, &"F".into()), Ok(1.0));
        assert_eq!(enc.encode(fields::FUMA, &"Si".into()), Ok(1.0));
        assert_eq!(enc.encode(fields::CONSUME_ALCOHOL, &"Frecuente".into()), Ok(2.0));
        assert_eq!(enc.encode(fields::CONSUME_ALCOHOL, &FieldValue::Number(1.0)), Ok(1.0));

        let warning = enc
            .encode(fields::FUMA, &"A veces".into())
            .expect_err("unknown value");
        assert_eq!(warning.field, fields::FUMA);
        assert_eq!(warning.value, "A veces");
    }

    #[test]
    fn test_standard_schema_is_whole_catalog() {
        let schema = FeatureSchema::standard();
        assert_eq!(schema.len(), FEATURE_CATALOG.len());
        assert_eq!(schema.alcohol_encoding(), AlcoholEncoding::Both);
        assert!(schema.verify().is_ok());
    }

    #[test]
    fn test_fallback_schema_order() {
        let schema = FeatureSchema::fallback();
        assert_eq!(schema.len(), 25);
        assert_eq!(schema.feature_names()[0], fields::EDAD);
        assert_eq!(schema.feature_names()[16], fields::SEXO);
        assert_eq!(schema.default_for(fields::ESTRATO), Some(3.0));
        assert_eq!(schema.alcohol_encoding(), AlcoholEncoding::Ordinal);
    }

    #[test]
    fn test_builder_uses_catalog_order_and_medians() {
        let mut builder = SchemaBuilder::new();
        // Insertion order differs from catalog order on purpose.
        builder.observe([(fields::FUMA, 1.0), (fields::EDAD, 40.0)]);
        builder.observe([(fields::EDAD, 60.0), (fields::FUMA, 0.0)]);
        builder.observe([(fields::EDAD, 50.0), (fields::FUMA, 1.0), ("unknown", 3.0)]);

        let schema = builder.freeze().expect("freeze");
        assert_eq!(schema.feature_names(), &[fields::EDAD, fields::FUMA]);
        assert_eq!(schema.default_for(fields::EDAD), Some(50.0));
        // Binary columns keep the heuristic, not the median.
        assert_eq!(schema.default_for(fields::FUMA), Some(0.0));
    }

    #[test]
    fn test_empty_builder_fails() {
        assert_eq!(SchemaBuilder::new().freeze(), Err(SchemaError::Empty));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let schema = FeatureSchema::standard();
        let mut json = serde_json::to_value(&schema).expect("serialize");
        json["defaults"][0] = serde_json::json!(99.0);
        let tampered: FeatureSchema = serde_json::from_value(json).expect("deserialize");
        assert!(matches!(
            tampered.verify(),
            Err(SchemaError::FingerprintMismatch { .. })
        ));
    }

    #[test]
    fn test_json_round_trip_preserves_fingerprint() {
        let mut builder = SchemaBuilder::new();
        builder.observe([(fields::IMC, 27.123_456_789), (PRESION_ARTERIAL_MEDIA, 93.333_333_333)]);
        let schema = builder.freeze().expect("freeze");
        let json = serde_json::to_string(&schema).expect("serialize");
        let back: FeatureSchema = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, schema);
        assert!(back.verify().is_ok());
    }
}
