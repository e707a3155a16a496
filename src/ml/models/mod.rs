//! ML Models for anomaly detection
//!
//! Both detectors sit behind [`AnomalyDetector`]; the pipeline never touches
//! model-specific fields.

pub mod autoencoder;
pub mod isolation_forest;

pub use autoencoder::{AutoencoderConfig, AutoencoderDetector};
pub use isolation_forest::{IsolationForestConfig, IsolationForestDetector};

use serde::{Deserialize, Serialize};

use crate::data::FeatureMatrix;
use crate::error::Result;

/// Trait for anomaly detection models
pub trait AnomalyDetector {
    /// Get model name
    fn name(&self) -> &str;

    /// Train the model; any previous training is discarded
    fn train(&mut self, data: &FeatureMatrix) -> Result<()>;

    /// Score and flag every row
    ///
    /// Fails with `NotTrained` before [`AnomalyDetector::train`].
    fn predict(&self, data: &FeatureMatrix) -> Result<DetectionResult>;

    /// Check if model is trained
    fn is_trained(&self) -> bool;
}

/// Per-row output of one detector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Native score per row
    pub scores: Vec<f32>,
    /// Anomaly flag per row
    pub anomalies: Vec<bool>,
    /// Decision threshold frozen at train time, if the model has one
    pub threshold: Option<f32>,
}

impl DetectionResult {
    pub fn len(&self) -> usize {
        self.anomalies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anomalies.is_empty()
    }

    pub fn anomaly_count(&self) -> usize {
        self.anomalies.iter().filter(|&&a| a).count()
    }
}

/// Percentile with linear interpolation between closest ranks
///
/// `pct` is in [0, 100]. Returns 0 for an empty slice.
pub fn percentile(values: &[f32], pct: f32) -> f32 {
    let mut sorted: Vec<f32> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (pct.clamp(0.0, 100.0) as f64 / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = (rank - lower as f64) as f32;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_uniform() {
        let values: Vec<f32> = (1..=100).map(|v| v as f32).collect();
        let p95 = percentile(&values, 95.0);
        assert!((p95 - 95.05).abs() < 1e-3, "p95 = {}", p95);
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 100.0), 100.0);
        assert_eq!(percentile(&values, 50.0), 50.5);
    }

    #[test]
    fn test_percentile_unsorted_and_empty() {
        assert_eq!(percentile(&[3.0, 1.0, 2.0], 50.0), 2.0);
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn test_anomaly_count() {
        let result = DetectionResult {
            scores: vec![0.1, 0.9, 0.8],
            anomalies: vec![false, true, true],
            threshold: Some(0.5),
        };
        assert_eq!(result.anomaly_count(), 2);
        assert_eq!(result.len(), 3);
    }
}
