//! Detection pipeline
//!
//! Sequences preprocessing, training, detection, evaluation and reporting.
//! Every stage checks the state reached so far; a failing stage returns the
//! error and leaves the state where it was.
//!
//! ```text
//! Uninitialized -> PreprocessorFitted -> ModelsTrained -> Detected -> Evaluated -> Reported
//! ```
//!
//! Two composed modes exist: [`DetectionPipeline::run_full`] fits and trains
//! from scratch, [`DetectionPipeline::run_detect_only`] reuses state loaded
//! with [`DetectionPipeline::from_artifacts`]. Categories first seen in a
//! detect-only run are written back to the artifact directory, so a value
//! keeps the same id across runs.

use std::fmt;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::data::{generate_sample_data, load_from_file, Dataset, FeatureMatrix, FitOptions, SchemaPreprocessor};
use crate::error::{DetectorError, Result};
use crate::ml::ensemble::{combine, EnsemblePolicy};
use crate::ml::metrics::{self, DetectionRates, PerformanceMetrics};
use crate::ml::models::{AnomalyDetector, AutoencoderDetector, DetectionResult, IsolationForestDetector};
use crate::ml::storage::{ArtifactMetadata, ArtifactStore};

/// Artifact name of the isolation-style detector
pub const ISOLATION_FOREST_ARTIFACT: &str = "isolation_forest";
/// Artifact name of the reconstruction-error detector
pub const AUTOENCODER_ARTIFACT: &str = "autoencoder";
/// Raw results written by detect-only runs
pub const DETECTION_RESULTS_FILE: &str = "detection_results.json";

/// Pipeline progress, ordered by stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PipelineState {
    Uninitialized,
    PreprocessorFitted,
    ModelsTrained,
    Detected,
    Evaluated,
    Reported,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Uninitialized => "uninitialized",
            PipelineState::PreprocessorFitted => "preprocessor_fitted",
            PipelineState::ModelsTrained => "models_trained",
            PipelineState::Detected => "detected",
            PipelineState::Evaluated => "evaluated",
            PipelineState::Reported => "reported",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Matrices produced by [`DetectionPipeline::preprocess`]
///
/// With `fit = false` there is no train partition and `test` holds the whole
/// transformed dataset.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub train: Option<FeatureMatrix>,
    pub test: FeatureMatrix,
    pub train_labels: Option<Vec<bool>>,
    pub test_labels: Option<Vec<bool>>,
}

/// Wall-clock seconds per detector
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodTimings {
    pub isolation_forest_sec: f64,
    pub autoencoder_sec: f64,
}

/// Training and inference timings of the last runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub train: Option<MethodTimings>,
    pub inference: Option<MethodTimings>,
}

/// Flagged row counts per method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyCounts {
    pub isolation_forest: usize,
    pub autoencoder: usize,
    pub ensemble: usize,
}

/// Bookkeeping attached to a detection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub timestamp: DateTime<Utc>,
    pub total_samples: usize,
    pub anomalies_detected: AnomalyCounts,
    pub ensemble_method: EnsemblePolicy,
    pub timings: StageTimings,
}

/// Everything one `detect` call produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBundle {
    pub isolation_forest: DetectionResult,
    pub autoencoder: DetectionResult,
    pub ensemble: Vec<bool>,
    pub metadata: BundleMetadata,
}

impl DetectionBundle {
    pub fn total_samples(&self) -> usize {
        self.metadata.total_samples
    }

    pub fn detection_rates(&self) -> DetectionRates {
        DetectionRates {
            isolation_forest: metrics::detection_rate(&self.isolation_forest.anomalies),
            autoencoder: metrics::detection_rate(&self.autoencoder.anomalies),
            ensemble: metrics::detection_rate(&self.ensemble),
        }
    }
}

/// Report summary block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub timestamp: DateTime<Utc>,
    pub total_samples: usize,
    pub anomalies_detected: AnomalyCounts,
    pub detection_rates: DetectionRates,
}

/// Serialized run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub summary: ReportSummary,
    pub performance_metrics: PerformanceMetrics,
    pub timings_sec: StageTimings,
    pub configuration: Config,
}

/// Stateful detection pipeline over two detectors
pub struct DetectionPipeline<I = IsolationForestDetector, A = AutoencoderDetector> {
    config: Config,
    state: PipelineState,
    preprocessor: SchemaPreprocessor,
    isolation_forest: I,
    autoencoder: A,
    timings: StageTimings,
    results: Option<DetectionBundle>,
    metrics: Option<PerformanceMetrics>,
    report: Option<Report>,
    /// Directory the trained state was loaded from
    artifact_dir: Option<PathBuf>,
}

impl DetectionPipeline {
    /// Create a pipeline with the built-in detectors configured from `config`
    pub fn new(config: Config) -> Self {
        let isolation_forest = IsolationForestDetector::new(config.models.isolation_forest.clone());
        let autoencoder = AutoencoderDetector::new(config.autoencoder());
        Self::with_detectors(config, isolation_forest, autoencoder)
    }
}

impl<I: AnomalyDetector, A: AnomalyDetector> DetectionPipeline<I, A> {
    /// Create a pipeline around caller-supplied detectors
    pub fn with_detectors(config: Config, isolation_forest: I, autoencoder: A) -> Self {
        Self {
            config,
            state: PipelineState::Uninitialized,
            preprocessor: SchemaPreprocessor::new(),
            isolation_forest,
            autoencoder,
            timings: StageTimings::default(),
            results: None,
            metrics: None,
            report: None,
            artifact_dir: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn preprocessor(&self) -> &SchemaPreprocessor {
        &self.preprocessor
    }

    pub fn timings(&self) -> &StageTimings {
        &self.timings
    }

    pub fn results(&self) -> Option<&DetectionBundle> {
        self.results.as_ref()
    }

    pub fn metrics(&self) -> Option<&PerformanceMetrics> {
        self.metrics.as_ref()
    }

    pub fn last_report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    fn require(&self, operation: &'static str, required: PipelineState) -> Result<()> {
        if self.state < required {
            return Err(DetectorError::InvalidState {
                operation,
                required: required.as_str(),
                current: self.state.as_str(),
            });
        }
        Ok(())
    }

    /// Load a CSV or JSON dataset
    pub fn load(&self, path: &Path) -> Result<Dataset> {
        load_from_file(path)
    }

    /// Generate the configured synthetic sample
    pub fn load_sample(&self) -> Result<Dataset> {
        info!(
            "Generating {} synthetic traffic records",
            self.config.data.sample_size
        );
        generate_sample_data(self.config.data.sample_size, self.config.data.random_state)
    }

    pub fn artifact_dir(&self) -> Option<&Path> {
        self.artifact_dir.as_deref()
    }

    /// Fit (`fit = true`) or apply (`fit = false`) the preprocessor
    ///
    /// Fitting splits the data into train/test partitions and moves the
    /// pipeline back to `PreprocessorFitted`; previously trained models must be
    /// retrained against the new schema. Applying requires a fitted
    /// preprocessor and leaves the state unchanged.
    pub fn preprocess(&mut self, data: &Dataset, fit: bool) -> Result<PreparedData> {
        if fit {
            let split = self.preprocessor.fit(data, &FitOptions::from(&self.config.data))?;
            self.state = PipelineState::PreprocessorFitted;
            self.results = None;
            self.metrics = None;
            self.report = None;

            Ok(PreparedData {
                train: Some(split.train),
                test: split.test,
                train_labels: split.train_labels,
                test_labels: split.test_labels,
            })
        } else {
            let (matrix, labels) = self.preprocessor.transform(data)?;
            Ok(PreparedData {
                train: None,
                test: matrix,
                train_labels: None,
                test_labels: labels,
            })
        }
    }

    /// Train both detectors; retraining is allowed
    pub fn train(&mut self, data: &FeatureMatrix) -> Result<()> {
        self.require("train", PipelineState::PreprocessorFitted)?;
        info!("Training detectors on {} rows", data.n_rows());

        let start = Instant::now();
        self.isolation_forest.train(data)?;
        let isolation_forest_sec = start.elapsed().as_secs_f64();
        info!(
            "{} trained in {:.2}s",
            self.isolation_forest.name(),
            isolation_forest_sec
        );

        let start = Instant::now();
        self.autoencoder.train(data)?;
        let autoencoder_sec = start.elapsed().as_secs_f64();
        info!("{} trained in {:.2}s", self.autoencoder.name(), autoencoder_sec);

        self.timings.train = Some(MethodTimings {
            isolation_forest_sec,
            autoencoder_sec,
        });
        self.state = PipelineState::ModelsTrained;
        self.results = None;
        self.metrics = None;
        self.report = None;
        Ok(())
    }

    /// Run both detectors and combine their verdicts
    pub fn detect(&mut self, data: &FeatureMatrix) -> Result<&DetectionBundle> {
        self.require("detect", PipelineState::ModelsTrained)?;
        info!("Detecting anomalies in {} rows", data.n_rows());

        let start = Instant::now();
        let isolation_forest = self.isolation_forest.predict(data)?;
        let isolation_forest_sec = start.elapsed().as_secs_f64();

        let start = Instant::now();
        let autoencoder = self.autoencoder.predict(data)?;
        let autoencoder_sec = start.elapsed().as_secs_f64();

        let policy = self.config.detection.ensemble_method;
        let ensemble = combine(&isolation_forest.anomalies, &autoencoder.anomalies, policy);

        self.timings.inference = Some(MethodTimings {
            isolation_forest_sec,
            autoencoder_sec,
        });

        let counts = AnomalyCounts {
            isolation_forest: isolation_forest.anomaly_count(),
            autoencoder: autoencoder.anomaly_count(),
            ensemble: ensemble.iter().filter(|&&a| a).count(),
        };
        info!(
            "Anomalies: {}={} {}={} ensemble({})={}",
            self.isolation_forest.name(),
            counts.isolation_forest,
            self.autoencoder.name(),
            counts.autoencoder,
            policy,
            counts.ensemble
        );

        let bundle = DetectionBundle {
            isolation_forest,
            autoencoder,
            ensemble,
            metadata: BundleMetadata {
                timestamp: Utc::now(),
                total_samples: data.n_rows(),
                anomalies_detected: counts,
                ensemble_method: policy,
                timings: self.timings,
            },
        };

        self.state = PipelineState::Detected;
        self.metrics = None;
        self.report = None;
        Ok(self.results.insert(bundle))
    }

    /// Compute metrics for the last detection
    ///
    /// Supervised when labels are given, otherwise detection rates and
    /// agreement between the two detectors.
    pub fn evaluate(&mut self, labels: Option<&[bool]>) -> Result<&PerformanceMetrics> {
        self.require("evaluate", PipelineState::Detected)?;
        let results = self
            .results
            .as_ref()
            .ok_or_else(|| DetectorError::InvalidState {
                operation: "evaluate",
                required: PipelineState::Detected.as_str(),
                current: self.state.as_str(),
            })?;

        let performance = match labels {
            Some(labels) => {
                if labels.len() != results.total_samples() {
                    return Err(DetectorError::LabelMismatch {
                        expected: results.total_samples(),
                        got: labels.len(),
                    });
                }
                PerformanceMetrics::Supervised(metrics::supervised(
                    &results.isolation_forest.anomalies,
                    &results.autoencoder.anomalies,
                    &results.ensemble,
                    labels,
                )?)
            }
            None => PerformanceMetrics::Unsupervised(metrics::unsupervised(
                &results.isolation_forest.anomalies,
                &results.autoencoder.anomalies,
                &results.ensemble,
            )),
        };

        info!(
            "Evaluation complete ({})",
            if performance.is_supervised() { "supervised" } else { "unsupervised" }
        );
        debug!("{:?}", performance);

        self.state = PipelineState::Evaluated;
        self.report = None;
        Ok(self.metrics.insert(performance))
    }

    /// Assemble the report and write it as JSON when `path` is given
    pub fn report(&mut self, path: Option<&Path>) -> Result<&Report> {
        self.require("report", PipelineState::Evaluated)?;
        let (Some(results), Some(metrics)) = (self.results.as_ref(), self.metrics.as_ref()) else {
            return Err(DetectorError::InvalidState {
                operation: "report",
                required: PipelineState::Evaluated.as_str(),
                current: self.state.as_str(),
            });
        };

        let report = Report {
            summary: ReportSummary {
                timestamp: Utc::now(),
                total_samples: results.total_samples(),
                anomalies_detected: results.metadata.anomalies_detected,
                detection_rates: results.detection_rates(),
            },
            performance_metrics: metrics.clone(),
            timings_sec: self.timings,
            configuration: self.config.clone(),
        };

        if let Some(path) = path {
            write_json(path, &report)?;
            info!("Report written to {:?}", path);
        }

        self.state = PipelineState::Reported;
        Ok(self.report.insert(report))
    }

    /// Write the last detection bundle as JSON
    pub fn save_detection_results(&self, path: &Path) -> Result<()> {
        self.require("save detection results", PipelineState::Detected)?;
        let results = self.results.as_ref().ok_or_else(|| DetectorError::InvalidState {
            operation: "save detection results",
            required: PipelineState::Detected.as_str(),
            current: self.state.as_str(),
        })?;

        write_json(path, results)?;
        info!("Detection results written to {:?}", path);
        Ok(())
    }

    /// Fit, train, detect on the held-out split, evaluate and report
    ///
    /// Uses the synthetic sample when `input` is `None`.
    pub fn run_full(&mut self, input: Option<&Path>) -> Result<Report>
    where
        I: Serialize,
        A: Serialize,
    {
        let dataset = match input {
            Some(path) => self.load(path)?,
            None => self.load_sample()?,
        };

        let prepared = self.preprocess(&dataset, true)?;
        let train = prepared.train.as_ref().ok_or(DetectorError::NotFitted)?;
        self.train(train)?;

        let model_dir = self.config.output.model_dir.clone();
        self.save_artifacts(&model_dir)?;

        self.detect(&prepared.test)?;
        self.evaluate(prepared.test_labels.as_deref())?;

        let report_path = self.config.report_path();
        let report = self.report(Some(&report_path))?.clone();
        Ok(report)
    }

    /// Transform and score a new dataset with already-trained state
    ///
    /// Raw results are written to the results directory. When the dataset
    /// carries labels, the run is also evaluated and reported.
    pub fn run_detect_only(&mut self, input: &Path) -> Result<DetectionBundle> {
        self.require("detect", PipelineState::ModelsTrained)?;

        let dataset = self.load(input)?;
        let vocabulary = self.preprocessor.vocabulary_version();
        let prepared = self.preprocess(&dataset, false)?;
        let bundle = self.detect(&prepared.test)?.clone();

        if self.preprocessor.vocabulary_version() > vocabulary {
            if let Some(dir) = self.artifact_dir.as_deref() {
                ArtifactStore::new(dir).save_preprocessor(&self.preprocessor)?;
                info!("Saved extended category vocabularies to {:?}", dir);
            }
        }

        let results_path = self.config.output.results_dir.join(DETECTION_RESULTS_FILE);
        self.save_detection_results(&results_path)?;

        if let Some(labels) = prepared.test_labels.as_deref() {
            self.evaluate(Some(labels))?;
            let report_path = self.config.report_path();
            self.report(Some(&report_path))?;
        }

        Ok(bundle)
    }
}

impl<I, A> DetectionPipeline<I, A>
where
    I: AnomalyDetector + Serialize,
    A: AnomalyDetector + Serialize,
{
    /// Persist the preprocessor and both trained detectors
    pub fn save_artifacts(&self, dir: &Path) -> Result<()> {
        self.require("save artifacts", PipelineState::ModelsTrained)?;

        let store = ArtifactStore::new(dir);
        store.init()?;
        store.save_preprocessor(&self.preprocessor)?;
        store.save_model(ISOLATION_FOREST_ARTIFACT, &self.isolation_forest)?;
        store.save_model(AUTOENCODER_ARTIFACT, &self.autoencoder)?;
        store.save_metadata(&ArtifactMetadata::describe(
            &self.preprocessor,
            &[ISOLATION_FOREST_ARTIFACT, AUTOENCODER_ARTIFACT],
        ))?;

        info!("Saved pipeline artifacts to {:?}", dir);
        Ok(())
    }
}

impl<I, A> DetectionPipeline<I, A>
where
    I: AnomalyDetector + DeserializeOwned,
    A: AnomalyDetector + DeserializeOwned,
{
    /// Rebuild a trained pipeline from an artifact directory
    pub fn from_artifacts(config: Config, dir: &Path) -> Result<Self> {
        let store = ArtifactStore::new(dir);
        let preprocessor = store.load_preprocessor()?;
        let isolation_forest: I = store.load_model(ISOLATION_FOREST_ARTIFACT)?;
        let autoencoder: A = store.load_model(AUTOENCODER_ARTIFACT)?;

        for (name, trained) in [
            (isolation_forest.name(), isolation_forest.is_trained()),
            (autoencoder.name(), autoencoder.is_trained()),
        ] {
            if !trained {
                return Err(DetectorError::NotTrained(name.to_string()));
            }
        }

        if let Ok(metadata) = store.load_metadata() {
            debug!(
                "Artifacts saved {} on {} ({} features)",
                metadata.saved_at, metadata.host_id, metadata.feature_count
            );
        }

        let mut pipeline = Self::with_detectors(config, isolation_forest, autoencoder);
        pipeline.preprocessor = preprocessor;
        pipeline.state = PipelineState::ModelsTrained;
        pipeline.artifact_dir = Some(dir.to_path_buf());
        info!("Loaded pipeline artifacts from {:?}", dir);
        Ok(pipeline)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}
