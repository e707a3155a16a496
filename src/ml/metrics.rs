//! Detection performance metrics
//!
//! Supervised metrics compare flags with ground truth. Without labels, only
//! detection rates and the agreement between the two detectors are reported.

use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, Result};

/// Confusion matrix counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(predicted: &[bool], actual: &[bool]) -> Result<Self> {
        if predicted.len() != actual.len() {
            return Err(DetectorError::LabelMismatch {
                expected: predicted.len(),
                got: actual.len(),
            });
        }

        let mut cm = Self::default();
        for (&p, &a) in predicted.iter().zip(actual) {
            match (p, a) {
                (true, true) => cm.true_positives += 1,
                (true, false) => cm.false_positives += 1,
                (false, false) => cm.true_negatives += 1,
                (false, true) => cm.false_negatives += 1,
            }
        }
        Ok(cm)
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }
}

/// Binary classification metrics
///
/// Undefined ratios (zero denominators) are reported as 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub accuracy: f64,
}

impl ClassificationMetrics {
    pub fn from_confusion(cm: &ConfusionMatrix) -> Self {
        let tp = cm.true_positives as f64;
        let precision = ratio(tp, (cm.true_positives + cm.false_positives) as f64);
        let recall = ratio(tp, (cm.true_positives + cm.false_negatives) as f64);
        let f1_score = ratio(2.0 * precision * recall, precision + recall);
        let accuracy = ratio(
            (cm.true_positives + cm.true_negatives) as f64,
            cm.total() as f64,
        );

        Self {
            precision,
            recall,
            f1_score,
            accuracy,
        }
    }

    pub fn compute(predicted: &[bool], actual: &[bool]) -> Result<Self> {
        Ok(Self::from_confusion(&ConfusionMatrix::from_predictions(predicted, actual)?))
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Metrics against ground truth, per method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisedMetrics {
    pub isolation_forest: ClassificationMetrics,
    pub autoencoder: ClassificationMetrics,
    pub ensemble: ClassificationMetrics,
}

/// Fraction of rows flagged, per method
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionRates {
    pub isolation_forest: f64,
    pub autoencoder: f64,
    pub ensemble: f64,
}

/// Metrics available without labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsupervisedMetrics {
    pub detection_rates: DetectionRates,
    pub method_agreement: f64,
    pub total_samples: usize,
}

/// Evaluation output, shaped by label availability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerformanceMetrics {
    Supervised(SupervisedMetrics),
    Unsupervised(UnsupervisedMetrics),
}

impl PerformanceMetrics {
    pub fn is_supervised(&self) -> bool {
        matches!(self, PerformanceMetrics::Supervised(_))
    }
}

/// Anomaly count divided by total rows, 0 when empty
pub fn detection_rate(flags: &[bool]) -> f64 {
    if flags.is_empty() {
        return 0.0;
    }
    flags.iter().filter(|&&f| f).count() as f64 / flags.len() as f64
}

/// Fraction of rows where both flag vectors agree, 0 when empty
pub fn agreement(a: &[bool], b: &[bool]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    a.iter().zip(b).filter(|(x, y)| x == y).count() as f64 / n as f64
}

/// Supervised metrics for both detectors and the ensemble
pub fn supervised(
    isolation_forest: &[bool],
    autoencoder: &[bool],
    ensemble: &[bool],
    labels: &[bool],
) -> Result<SupervisedMetrics> {
    Ok(SupervisedMetrics {
        isolation_forest: ClassificationMetrics::compute(isolation_forest, labels)?,
        autoencoder: ClassificationMetrics::compute(autoencoder, labels)?,
        ensemble: ClassificationMetrics::compute(ensemble, labels)?,
    })
}

/// Detection rates and pairwise agreement
pub fn unsupervised(isolation_forest: &[bool], autoencoder: &[bool], ensemble: &[bool]) -> UnsupervisedMetrics {
    UnsupervisedMetrics {
        detection_rates: DetectionRates {
            isolation_forest: detection_rate(isolation_forest),
            autoencoder: detection_rate(autoencoder),
            ensemble: detection_rate(ensemble),
        },
        method_agreement: agreement(isolation_forest, autoencoder),
        total_samples: ensemble.len(),
    }
}
