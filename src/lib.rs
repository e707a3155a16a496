//! flowguard: network traffic anomaly detection
//!
//! Tabular traffic records are mapped onto a frozen feature schema, scored by
//! an isolation forest and an autoencoder, and the two verdicts are combined
//! into one ensemble flag per record.
//!
//! ```ignore
//! use flowguard::{Config, DetectionPipeline};
//!
//! let mut pipeline = DetectionPipeline::new(Config::default());
//! let report = pipeline.run_full(Some(Path::new("traffic.csv")))?;
//! println!("{} anomalies", report.summary.anomalies_detected.ensemble);
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod ml;
pub mod pipeline;

pub use config::Config;
pub use data::{Dataset, FeatureMatrix, SchemaPreprocessor};
pub use error::{DetectorError, Result};
pub use ml::{AnomalyDetector, DetectionResult, EnsemblePolicy};
pub use pipeline::{DetectionBundle, DetectionPipeline, PipelineState, Report};
