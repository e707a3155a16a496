//! Schema-robust feature preprocessing
//!
//! Fits a frozen feature schema, categorical vocabularies and scaling
//! statistics from a reference dataset, then maps any later dataset onto the
//! same numeric layout:
//!
//! - the label column (if any) is detected by name and carried separately
//! - missing columns are synthesized as zeros, unexpected columns are dropped
//! - categorical values never seen at fit time get fresh ids instead of failing
//! - NaN, infinity and non-numeric residue become 0; finite values beyond the
//!   `f32` range saturate after scaling

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::dataset::{Column, Dataset, Value};
use super::matrix::FeatureMatrix;
use super::scaling::ScalingStatistics;
use crate::config::DataConfig;
use crate::error::{DetectorError, Result};

/// Label column names, checked in order
pub const LABEL_CANDIDATES: &[&str] = &[
    "label",
    "Label",
    "LABEL",
    "class",
    "Class",
    "attack",
    "Attack",
    "attack_type",
    "Attack_type",
    "category",
    "Category",
];

/// Placeholder category for missing cells
pub const MISSING_CATEGORY: &str = "__missing__";

/// Label values that mark a record as benign
const BENIGN_LABELS: &[&str] = &["normal", "benign", "0", "false", "no"];

/// Ordered feature columns frozen at fit time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    columns: Vec<String>,
}

impl FeatureSchema {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }
}

/// Append-only vocabulary for one categorical column
///
/// Ids are assigned in first-seen order and never change. `version` counts
/// how many values were appended after the encoder was fitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEncoder {
    ids: HashMap<String, u32>,
    values: Vec<String>,
    version: u64,
}

impl CategoricalEncoder {
    /// Fit a vocabulary from observed values
    pub fn fit(values: &[Value]) -> Self {
        let mut encoder = Self::default();
        for value in values {
            encoder.insert(Self::normalize(value));
        }
        encoder
    }

    /// Normalize a cell into its category key
    pub fn normalize(value: &Value) -> String {
        match value {
            Value::Missing => MISSING_CATEGORY.to_string(),
            Value::Number(n) if n.is_nan() => MISSING_CATEGORY.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    MISSING_CATEGORY.to_string()
                } else {
                    trimmed.to_string()
                }
            }
        }
    }

    /// Look up the id of a known value
    pub fn get(&self, key: &str) -> Option<u32> {
        self.ids.get(key).copied()
    }

    /// Encode a value, appending it to the vocabulary if unseen
    pub fn encode_or_insert(&mut self, value: &Value) -> u32 {
        let key = Self::normalize(value);
        if let Some(id) = self.get(&key) {
            return id;
        }
        self.version += 1;
        self.insert(key)
    }

    fn insert(&mut self, key: String) -> u32 {
        if let Some(id) = self.get(&key) {
            return id;
        }
        let id = self.values.len() as u32;
        self.ids.insert(key.clone(), id);
        self.values.push(key);
        id
    }

    /// Known values, ordered by id
    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Options for [`SchemaPreprocessor::fit`]
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    pub label_candidates: Vec<String>,
    pub test_size: f64,
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            label_candidates: LABEL_CANDIDATES.iter().map(|s| s.to_string()).collect(),
            test_size: 0.2,
            seed: 42,
        }
    }
}

impl From<&DataConfig> for FitOptions {
    fn from(config: &DataConfig) -> Self {
        Self {
            label_candidates: config.label_candidates.clone(),
            test_size: config.test_size,
            seed: config.random_state,
        }
    }
}

/// Output of [`SchemaPreprocessor::fit`]
#[derive(Debug, Clone)]
pub struct SplitData {
    pub train: FeatureMatrix,
    pub test: FeatureMatrix,
    pub train_labels: Option<Vec<bool>>,
    pub test_labels: Option<Vec<bool>>,
}

/// State frozen by a successful fit
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FittedState {
    schema: FeatureSchema,
    label_column: Option<String>,
    encoders: BTreeMap<String, CategoricalEncoder>,
    scaling: ScalingStatistics,
}

/// Schema-robust preprocessor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaPreprocessor {
    fitted: Option<FittedState>,
}

impl SchemaPreprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn schema(&self) -> Option<&FeatureSchema> {
        self.fitted.as_ref().map(|f| &f.schema)
    }

    pub fn label_column(&self) -> Option<&str> {
        self.fitted.as_ref().and_then(|f| f.label_column.as_deref())
    }

    pub fn encoder(&self, column: &str) -> Option<&CategoricalEncoder> {
        self.fitted.as_ref().and_then(|f| f.encoders.get(column))
    }

    pub fn scaling(&self) -> Option<&ScalingStatistics> {
        self.fitted.as_ref().map(|f| &f.scaling)
    }

    /// Total vocabulary growth since fit, across all categorical columns
    pub fn vocabulary_version(&self) -> u64 {
        self.fitted
            .as_ref()
            .map(|f| f.encoders.values().map(|e| e.version()).sum())
            .unwrap_or(0)
    }

    /// Fit schema, encoders and scaling, returning the scaled train/test split
    ///
    /// Refitting replaces all previously frozen state.
    pub fn fit(&mut self, data: &Dataset, options: &FitOptions) -> Result<SplitData> {
        if data.is_empty() {
            return Err(DetectorError::EmptyDataset(
                "cannot fit preprocessor on zero rows".to_string(),
            ));
        }

        let label_column = options
            .label_candidates
            .iter()
            .find(|name| data.has_column(name))
            .cloned();
        let labels = label_column
            .as_deref()
            .and_then(|name| data.column(name))
            .map(labels_from_column);

        let features: Vec<&Column> = data
            .columns()
            .iter()
            .filter(|c| Some(c.name.as_str()) != label_column.as_deref())
            .collect();
        if features.is_empty() {
            return Err(DetectorError::EmptyDataset(
                "dataset has no feature columns".to_string(),
            ));
        }

        let mut encoders = BTreeMap::new();
        let mut encoded: Vec<Vec<f64>> = Vec::with_capacity(features.len());
        for column in &features {
            if column.is_numeric() {
                encoded.push(column.values.iter().map(coerce).collect());
            } else {
                let encoder = CategoricalEncoder::fit(&column.values);
                encoded.push(
                    column
                        .values
                        .iter()
                        .map(|v| {
                            encoder
                                .get(&CategoricalEncoder::normalize(v))
                                .map(f64::from)
                                .unwrap_or(0.0)
                        })
                        .collect(),
                );
                debug!(
                    "Encoded categorical column '{}' ({} categories)",
                    column.name,
                    encoder.len()
                );
                encoders.insert(column.name.clone(), encoder);
            }
        }

        let schema = FeatureSchema::new(features.iter().map(|c| c.name.clone()).collect());
        let rows = to_row_major(&encoded, data.n_rows());

        let (train_idx, test_idx) = split_indices(data.n_rows(), options.test_size, options.seed)?;
        let train_rows: Vec<Vec<f64>> = train_idx.iter().map(|&i| rows[i].clone()).collect();
        let test_rows: Vec<Vec<f64>> = test_idx.iter().map(|&i| rows[i].clone()).collect();

        let scaling = ScalingStatistics::fit(&train_rows)?;
        let train = scaling.apply(&train_rows)?;
        let test = scaling.apply(&test_rows)?;

        let (train_labels, test_labels) = match labels {
            Some(labels) => (
                Some(train_idx.iter().map(|&i| labels[i]).collect()),
                Some(test_idx.iter().map(|&i| labels[i]).collect()),
            ),
            None => (None, None),
        };

        info!(
            "Preprocessor fitted: {} features ({} categorical), label column: {}, train={} test={}",
            schema.len(),
            encoders.len(),
            label_column.as_deref().unwrap_or("none"),
            train.n_rows(),
            test.n_rows()
        );

        self.fitted = Some(FittedState {
            schema,
            label_column,
            encoders,
            scaling,
        });

        Ok(SplitData {
            train,
            test,
            train_labels,
            test_labels,
        })
    }

    /// Map a dataset onto the fitted schema and scale it
    ///
    /// Unseen categories extend the vocabularies; scaling is never refit.
    pub fn transform(&mut self, data: &Dataset) -> Result<(FeatureMatrix, Option<Vec<bool>>)> {
        let fitted = self.fitted.as_mut().ok_or(DetectorError::NotFitted)?;

        if data.is_empty() {
            return Err(DetectorError::EmptyDataset(
                "cannot transform zero rows".to_string(),
            ));
        }

        let labels = fitted
            .label_column
            .as_deref()
            .and_then(|name| data.column(name))
            .map(labels_from_column);

        let n_rows = data.n_rows();
        let mut encoded: Vec<Vec<f64>> = Vec::with_capacity(fitted.schema.len());
        for name in fitted.schema.columns() {
            let Some(column) = data.column(name) else {
                warn!("Column '{}' missing from input, filling with zeros", name);
                encoded.push(vec![0.0; n_rows]);
                continue;
            };

            match fitted.encoders.get_mut(name) {
                Some(encoder) => {
                    let before = encoder.len();
                    encoded.push(
                        column
                            .values
                            .iter()
                            .map(|v| f64::from(encoder.encode_or_insert(v)))
                            .collect(),
                    );
                    if encoder.len() > before {
                        debug!(
                            "Column '{}': {} unseen categories appended to vocabulary",
                            name,
                            encoder.len() - before
                        );
                    }
                }
                None => encoded.push(column.values.iter().map(coerce).collect()),
            }
        }

        let dropped: Vec<&str> = data
            .column_names()
            .into_iter()
            .filter(|name| {
                !fitted.schema.contains(name) && Some(*name) != fitted.label_column.as_deref()
            })
            .collect();
        if !dropped.is_empty() {
            debug!("Dropping columns not in schema: {:?}", dropped);
        }

        let matrix = fitted.scaling.apply(&to_row_major(&encoded, n_rows))?;

        debug!("Transformed {} rows onto {} features", n_rows, matrix.n_features());
        Ok((matrix, labels))
    }
}

/// Coerce a cell to a finite number, anything else becomes 0
fn coerce(value: &Value) -> f64 {
    match value {
        Value::Number(n) if n.is_finite() => *n,
        _ => 0.0,
    }
}

/// Interpret a label cell as an anomaly flag
fn label_to_bool(value: &Value) -> bool {
    match value {
        Value::Missing => false,
        Value::Number(n) => n.is_finite() && *n != 0.0,
        Value::Text(s) => {
            let s = s.trim().to_ascii_lowercase();
            !s.is_empty() && !BENIGN_LABELS.contains(&s.as_str())
        }
    }
}

fn labels_from_column(column: &Column) -> Vec<bool> {
    column.values.iter().map(label_to_bool).collect()
}

/// Transpose column-major encoded features into unscaled rows
fn to_row_major(columns: &[Vec<f64>], n_rows: usize) -> Vec<Vec<f64>> {
    (0..n_rows)
        .map(|row| columns.iter().map(|c| c[row]).collect())
        .collect()
}

/// Seeded shuffle split; the test partition takes ceil(n * test_size) rows
fn split_indices(n: usize, test_size: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    let n_test = ((n as f64) * test_size).ceil() as usize;
    let n_test = n_test.min(n);
    if n_test >= n {
        return Err(DetectorError::EmptyDataset(format!(
            "{} rows leave no training rows at test size {}",
            n, test_size
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let train = indices.split_off(n_test);
    Ok((train, indices))
}
