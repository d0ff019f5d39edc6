//! Feature engineering: raw record to ordered numeric vector.
//!
//! One code path serves both training and inference. The pipeline runs in a
//! fixed order:
//!
//! 1. Clean: identifier, timestamp and target fields are dropped.
//! 2. Derive: clinical composites are computed when all inputs are present.
//! 3. Encode: categoricals go through the schema's encoding table; alcohol is
//!    emitted as an ordinal code and as three dummies.
//! 4. Impute: schema features still missing get the schema's literal default.
//! 5. Order: values are laid out strictly in `schema.feature_names()` order.
//!
//! Steps 1-3 live in [`FeatureEngineer::engineer`]; steps 4-5 in
//! [`FeatureEngineer::assemble`].

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::cohort::LabeledRecord;
use super::patient::{fields, PatientRecord};
use super::schema::{
    catalog_entry, CategoricalEncodings, EncodingWarning, FeatureSchema, SchemaBuilder, SchemaError,
    DROPPED_FIELDS, EDAD_CATEGORIA, EDAD_SQUARED, IMC_CATEGORIA, INDICE_SALUD,
    PRESION_ARTERIAL_MEDIA, PRESION_PULSO, RATIO_CINTURA_ALTURA, SCORE_CV,
};

const IMC_BINS: [f64; 6] = [0.0, 18.5, 25.0, 30.0, 35.0, 100.0];
const EDAD_BINS: [f64; 6] = [0.0, 30.0, 45.0, 60.0, 75.0, 100.0];

/// Ordered numeric features for one record.
///
/// Length and positional meaning are fixed by the schema it was assembled
/// against. Every entry is finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A `1 x n` matrix for estimators that predict on rows.
    #[must_use]
    pub fn to_row(&self) -> Array2<f64> {
        Array2::from_shape_fn((1, self.0.len()), |(_, j)| self.0[j])
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

/// Output of steps 1-3: the features this record naturally produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineeredRecord {
    values: BTreeMap<&'static str, f64>,
    warnings: Vec<EncodingWarning>,
}

impl EngineeredRecord {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }

    #[must_use]
    pub fn warnings(&self) -> &[EncodingWarning] {
        &self.warnings
    }

    fn set(&mut self, name: &str, value: f64) {
        if !value.is_finite() {
            return;
        }
        if let Some(spec) = catalog_entry(name) {
            self.values.insert(spec.name, value);
        }
    }
}

/// Result of a full derivation.
#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    pub vector: FeatureVector,
    pub warnings: Vec<EncodingWarning>,
    /// Schema features that took their default value.
    pub imputed: Vec<String>,
}

/// Stateless record-to-vector transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureEngineer;

impl FeatureEngineer {
    /// Clean, derive and encode a record.
    ///
    /// Unknown categorical values are left out (so they impute to the schema
    /// default) and reported as warnings. Non-numeric text in numeric fields is
    /// treated as missing.
    #[must_use]
    pub fn engineer(record: &PatientRecord, encodings: &CategoricalEncodings) -> EngineeredRecord {
        let mut out = EngineeredRecord::default();

        // Clean + encode raw fields.
        for (name, value) in record.iter() {
            if DROPPED_FIELDS.contains(&name) {
                continue;
            }
            if encodings.is_categorical(name) {
                match encodings.encode(name, value) {
                    Ok(code) => out.set(name, code),
                    Err(warning) => {
                        tracing::warn!("{warning}");
                        out.warnings.push(warning);
                    }
                }
            } else if let Some(v) = value.as_number() {
                out.set(name, v);
            } else if catalog_entry(name).is_some() {
                tracing::debug!("Non-numeric value in {name}; treating as missing");
            }
        }

        Self::derive_composites(&mut out);
        Self::expand_alcohol(&mut out, encodings);
        out
    }

    fn derive_composites(out: &mut EngineeredRecord) {
        let tas = out.get(fields::TAS);
        let tad = out.get(fields::TAD);
        let imc = out.get(fields::IMC);
        let edad = out.get(fields::EDAD);
        let fuma = out.get(fields::FUMA);
        let ejercicio = out.get(fields::REALIZA_EJERCICIO);

        if let (Some(tas), Some(tad)) = (tas, tad) {
            out.set(PRESION_ARTERIAL_MEDIA, (tas + 2.0 * tad) / 3.0);
            out.set(PRESION_PULSO, tas - tad);
        }

        if let (Some(waist), Some(height)) =
            (out.get(fields::PERIMETRO_ABDOMINAL), out.get(fields::TALLA))
        {
            // Zero height yields a non-finite ratio, which `set` drops.
            out.set(RATIO_CINTURA_ALTURA, waist / height);
        }

        if let Some(bin) = imc.and_then(|v| right_closed_bin(v, &IMC_BINS)) {
            out.set(IMC_CATEGORIA, bin);
        }

        if let Some(edad) = edad {
            if let Some(bin) = right_closed_bin(edad, &EDAD_BINS) {
                out.set(EDAD_CATEGORIA, bin);
            }
            out.set(EDAD_SQUARED, edad * edad);
        }

        if let (Some(tas), Some(imc), Some(edad), Some(fuma)) = (tas, imc, edad, fuma) {
            let score = (tas - 120.0) / 20.0 + (imc - 25.0) / 5.0 + (edad - 40.0) / 20.0 + fuma;
            out.set(SCORE_CV, score);
        }

        if let (Some(ejercicio), Some(fuma)) = (ejercicio, fuma) {
            out.set(INDICE_SALUD, 2.0 * ejercicio - fuma);
        }
    }

    fn expand_alcohol(out: &mut EngineeredRecord, encodings: &CategoricalEncodings) {
        let Some(code) = out.get(fields::CONSUME_ALCOHOL) else {
            return;
        };
        for (level, level_code) in encodings.levels(fields::CONSUME_ALCOHOL) {
            let name = format!("{}_{level}", fields::CONSUME_ALCOHOL);
            let indicator = if (level_code - code).abs() < f64::EPSILON {
                1.0
            } else {
                0.0
            };
            out.set(&name, indicator);
        }
    }

    /// Impute and order against a frozen schema.
    ///
    /// Returns the vector and the names of features that took their default.
    #[must_use]
    pub fn assemble(
        engineered: &EngineeredRecord,
        schema: &FeatureSchema) -> (FeatureVector, Vec<String>,
    ) {
        let mut imputed = Vec::new();
        let values = schema
            .feature_names()
            .iter()
            .zip(schema.defaults())
            .map(|(name, default)| {
                engineered.get(name).unwrap_or_else(|| {
                    imputed.push(name.clone());
                    *default
                })
            })
            .collect();
        (FeatureVector(values), imputed)
    }

    /// Full pipeline against a frozen schema.
    #[must_use]
    pub fn derive(record: &PatientRecord, schema: &FeatureSchema) -> Derivation {
        let engineered = Self::engineer(record, schema.encodings());
        let (vector, imputed) = Self::assemble(&engineered, schema);
        if !imputed.is_empty() {
            tracing::debug!("Imputed {} features from schema defaults", imputed.len());
        }
        Derivation {
            vector,
            warnings: engineered.warnings,
            imputed,
        }
    }
}

/// Bin index for right-closed bins `(edges[i], edges[i+1]]`.
fn right_closed_bin(value: f64, edges: &[f64]) -> Option<f64> {
    edges
        .windows(2)
        .position(|w| value > w[0] && value <= w[1])
        .map(|i| i as f64)
}

/// Engineered training data plus the schema frozen from it.
#[derive(Debug, Clone)]
pub struct TrainingMatrix {
    pub features: Array2<f64>,
    pub targets: Array1<f64>,
    pub schema: FeatureSchema,
}

impl TrainingMatrix {
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.features.nrows()
    }
}

/// Training-mode pass: engineer every record, freeze the schema from the
/// columns produced, then assemble every row against that schema.
///
/// # Errors
/// Fails if the cohort yields no usable feature columns.
pub fn build_training_matrix(cohort: &[LabeledRecord]) -> Result<TrainingMatrix, SchemaError> {
    let encodings = CategoricalEncodings::standard();
    let engineered: Vec<EngineeredRecord> = cohort
        .iter()
        .map(|r| FeatureEngineer::engineer(&r.record, &encodings))
        .collect();

    let warnings: usize = engineered.iter().map(|e| e.warnings.len()).sum();
    if warnings > 0 {
        tracing::warn!("{warnings} unknown categorical values in training cohort");
    }

    let mut builder = SchemaBuilder::new();
    for row in &engineered {
        builder.observe(row.iter());
    }
    let schema = builder.freeze()?;

    let mut features = Array2::zeros((cohort.len(), schema.len()));
    for (i, row) in engineered.iter().enumerate() {
        let (vector, _) = FeatureEngineer::assemble(row, &schema);
        for (j, v) in vector.as_slice().iter().enumerate() {
            features[[i, j]] = *v;
        }
    }
    let targets = cohort.iter().map(|r| r.glucose).collect();

    tracing::info!(
        "Engineered training matrix: {} rows x {} features",
        features.nrows(),
        features.ncols()
    );

    Ok(TrainingMatrix {
        features,
        targets,
        schema,
    })
}
