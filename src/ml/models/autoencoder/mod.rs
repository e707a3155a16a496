//! Autoencoder-based Anomaly Detection
//!
//! Uses reconstruction error to detect anomalies. Normal samples should
//! have low reconstruction error while anomalies should have high error.
//!
//! The decision threshold is a percentile of the training-set errors. It is
//! computed once in `train` and never recomputed by `predict`, so later
//! detect-only runs share the same boundary.
//!
//! # Usage
//! ```ignore
//! use flowguard::ml::models::{AnomalyDetector, AutoencoderConfig, AutoencoderDetector};
//!
//! let mut detector = AutoencoderDetector::new(AutoencoderConfig::default());
//! detector.train(&train_matrix)?;
//! let result = detector.predict(&test_matrix)?;
//! ```

pub mod network;
pub mod trainer;

pub use network::{Autoencoder, AutoencoderConfig, InferenceBackend, TrainingBackend};
pub use trainer::{AutoencoderTrainer, TrainedAutoencoder};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{percentile, AnomalyDetector, DetectionResult};
use crate::data::FeatureMatrix;
use crate::error::{DetectorError, Result};

/// Autoencoder-based anomaly detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoencoderDetector {
    /// Configuration
    config: AutoencoderConfig,
    /// Trained model (if available)
    trained: Option<TrainedAutoencoder>,
    /// Reconstruction error threshold, frozen at train time
    threshold: f32,
    /// Training error statistics
    stats: ReconstructionStats,
}

/// Statistics of the training reconstruction errors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconstructionStats {
    /// Number of samples seen
    pub count: u64,
    /// Mean reconstruction error
    pub mean: f32,
    /// M2 for Welford's variance algorithm
    m2: f64,
    /// Minimum error seen
    pub min: f32,
    /// Maximum error seen
    pub max: f32,
}

impl ReconstructionStats {
    fn update(&mut self, error: f32) {
        self.count += 1;

        if self.count == 1 {
            self.min = error;
            self.max = error;
        } else {
            self.min = self.min.min(error);
            self.max = self.max.max(error);
        }

        // Welford's online algorithm
        let delta = error as f64 - self.mean as f64;
        self.mean += (delta / self.count as f64) as f32;
        let delta2 = error as f64 - self.mean as f64;
        self.m2 += delta * delta2;
    }

    pub fn std(&self) -> f32 {
        if self.count < 2 {
            return 0.0;
        }
        ((self.m2 / (self.count - 1) as f64) as f32).sqrt()
    }
}

impl AutoencoderDetector {
    /// Create a new autoencoder detector
    pub fn new(config: AutoencoderConfig) -> Self {
        Self {
            config,
            trained: None,
            threshold: 0.0,
            stats: ReconstructionStats::default(),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &AutoencoderConfig {
        &self.config
    }

    /// Decision threshold, if trained
    pub fn threshold(&self) -> Option<f32> {
        self.trained.as_ref().map(|_| self.threshold)
    }

    /// Get reconstruction statistics of the training set
    pub fn stats(&self) -> &ReconstructionStats {
        &self.stats
    }

    pub fn model(&self) -> Option<&TrainedAutoencoder> {
        self.trained.as_ref()
    }

    /// Reconstruction error per row
    pub fn reconstruction_errors(&self, data: &FeatureMatrix) -> Result<Vec<f32>> {
        let model = self
            .trained
            .as_ref()
            .ok_or_else(|| DetectorError::NotTrained(self.name().to_string()))?;

        model.score(data)
    }
}

impl Default for AutoencoderDetector {
    fn default() -> Self {
        Self::new(AutoencoderConfig::default())
    }
}

impl AnomalyDetector for AutoencoderDetector {
    fn name(&self) -> &str {
        "autoencoder"
    }

    fn train(&mut self, data: &FeatureMatrix) -> Result<()> {
        let mut trainer = AutoencoderTrainer::new(self.config.clone());
        let model = trainer.train(data)?;

        let errors = model.score(data)?;
        let mut stats = ReconstructionStats::default();
        for &error in &errors {
            stats.update(error);
        }

        self.threshold = percentile(&errors, self.config.threshold_percentile);
        self.stats = stats;
        self.trained = Some(model);

        debug!(
            "Autoencoder threshold {:.6} (p{}), training error mean {:.6} std {:.6}",
            self.threshold,
            self.config.threshold_percentile,
            self.stats.mean,
            self.stats.std()
        );
        Ok(())
    }

    fn predict(&self, data: &FeatureMatrix) -> Result<DetectionResult> {
        let scores = self.reconstruction_errors(data)?;
        let anomalies = scores.iter().map(|&e| e > self.threshold).collect();

        Ok(DetectionResult {
            scores,
            anomalies,
            threshold: Some(self.threshold),
        })
    }

    fn is_trained(&self) -> bool {
        self.trained.is_some()
    }
}
