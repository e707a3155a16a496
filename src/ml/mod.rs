//! Anomaly detection models
//!
//! Two detectors run over the same scaled feature matrix:
//!
//! - **Isolation forest**: random partitioning, short paths mean outliers
//! - **Autoencoder**: reconstruction error above a train-time percentile
//!
//! Their boolean verdicts are merged by an [`ensemble::EnsemblePolicy`] and
//! scored by [`metrics`]. [`storage::ArtifactStore`] persists trained state
//! for detect-only runs.

pub mod ensemble;
pub mod metrics;
pub mod models;
pub mod storage;

pub use ensemble::{combine, EnsemblePolicy};
pub use metrics::{
    agreement, detection_rate, ClassificationMetrics, ConfusionMatrix, DetectionRates,
    PerformanceMetrics, SupervisedMetrics, UnsupervisedMetrics,
};
pub use models::{
    percentile, AnomalyDetector, AutoencoderConfig, AutoencoderDetector, DetectionResult,
    IsolationForestConfig, IsolationForestDetector,
};
pub use storage::{ArtifactMetadata, ArtifactStore};
