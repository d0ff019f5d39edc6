//! Patient record types for glucose prediction.
//!
//! A record is a mapping from clinical field name to value. Field names and
//! categorical vocabularies are fixed strings shared with existing artifacts and
//! callers, so they are kept verbatim (`"Si"/"No"`, `"Nunca"/"Ocasional"/"Frecuente"`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Clinical field names as they appear at the prediction boundary.
pub mod fields {
    pub const IDENTIFICACION: &str = "identificacion";
    pub const FECHA_REGISTRO: &str = "fecha_registro";

    pub const EDAD: &str = "edad";
    pub const SEXO: &str = "sexo";
    pub const ZONA_RESIDENCIA: &str = "zona_residencia";
    pub const ESTRATO: &str = "estrato";

    pub const TALLA: &str = "talla";
    pub const PESO: &str = "peso";
    pub const IMC: &str = "imc";
    pub const PERIMETRO_ABDOMINAL: &str = "perimetro_abdominal";

    pub const TAS: &str = "tas";
    pub const TAD: &str = "tad";
    pub const FRECUENCIA_CARDIACA: &str = "frecuencia_cardiaca";

    pub const REALIZA_EJERCICIO: &str = "realiza_ejercicio";
    pub const CONSUME_ALCOHOL: &str = "consume_alcohol";
    pub const FUMA: &str = "fuma";
    pub const MEDICAMENTOS_HTA: &str = "medicamentos_hta";

    pub const HISTORIA_FAMILIAR_DM: &str = "historia_familiar_dm";
    pub const DIABETES_GESTACIONAL: &str = "diabetes_gestacional";

    pub const PUNTAJE_FINDRISC: &str = "puntaje_findrisc";
    pub const RIESGO_CARDIOVASCULAR: &str = "riesgo_cardiovascular";

    /// Training target (fasting glucose, mg/dL). Never a feature.
    pub const RESULTADO: &str = "Resultado";
}

/// Categorical vocabulary.
pub mod vocab {
    pub const YES: &str = "Si";
    pub const NO: &str = "No";

    pub const MALE: &str = "M";
    pub const FEMALE: &str = "F";

    pub const URBAN: &str = "Urbana";
    pub const RURAL: &str = "Rural";

    pub const NEVER: &str = "Nunca";
    pub const OCCASIONAL: &str = "Ocasional";
    pub const FREQUENT: &str = "Frecuente";
}

/// A single field value: numeric or textual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Numeric view. Text that parses as a finite number is accepted.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) if v.is_finite() => Some(*v),
            Self::Number(_) => None,
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            Self::Number(_) => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Raw patient record.
///
/// Built once by a caller (cohort generator or inference request) and treated as
/// immutable by the feature pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl PatientRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FieldValue::as_number)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Boundary validation for callers that accept external input.
    ///
    /// The feature pipeline never calls this: it tolerates anything and falls back
    /// to schema defaults. Request layers use it to reject implausible input.
    ///
    /// # Errors
    /// Returns every violation found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let ranges: [(&str, f64, f64); 8] = [
            (fields::EDAD, 0.0, 120.0),
            (fields::IMC, 10.0, 80.0),
            (fields::TAS, 50.0, 260.0),
            (fields::TAD, 30.0, 160.0),
            (fields::PERIMETRO_ABDOMINAL, 30.0, 250.0),
            (fields::FRECUENCIA_CARDIACA, 20.0, 250.0),
            (fields::PUNTAJE_FINDRISC, 0.0, 26.0),
            (fields::RIESGO_CARDIOVASCULAR, 0.0, 1.0),
        ];
        for (name, lo, hi) in ranges {
            if let Some(value) = self.get(name) {
                match value.as_number() {
                    Some(v) if (lo..=hi).contains(&v) => {}
                    Some(v) => errors.push(format!("{name} {v} out of range [{lo}, {hi}]")),
                    None => errors.push(format!("{name} must be numeric, got {value}")),
                }
            }
        }

        if let (Some(FieldValue::Text(sexo)), Some(FieldValue::Text(gest))) = (
            self.get(fields::SEXO),
            self.get(fields::DIABETES_GESTACIONAL),
        ) {
            if sexo == vocab::MALE && gest == vocab::YES {
                errors.push("diabetes_gestacional must be \"No\" when sexo is \"M\"".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl FromIterator<(String, FieldValue)> for PatientRecord {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
