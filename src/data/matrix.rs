//! Dense numeric feature matrix (row-major)

use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, Result};

/// Row-major matrix of scaled feature values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    n_features: usize,
    rows: Vec<Vec<f32>>,
}

impl FeatureMatrix {
    /// Create an empty matrix with a fixed width
    pub fn new(n_features: usize) -> Self {
        Self {
            n_features,
            rows: Vec::new(),
        }
    }

    /// Build from rows; every row must have the same width
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let n_features = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut matrix = Self::new(n_features);
        for row in rows {
            matrix.push_row(row)?;
        }
        Ok(matrix)
    }

    pub fn push_row(&mut self, row: Vec<f32>) -> Result<()> {
        if row.len() != self.n_features {
            return Err(DetectorError::InvalidDimension {
                expected: self.n_features,
                got: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        self.rows.get(index).map(|r| r.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.rows.iter().map(|r| r.as_slice())
    }

    /// True when no cell is NaN or infinite
    pub fn is_finite(&self) -> bool {
        self.rows.iter().flatten().all(|v| v.is_finite())
    }

    /// Copy the given rows, in order, into a new matrix
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            n_features: self.n_features,
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [Vec<f32>] {
        &mut self.rows
    }
}
