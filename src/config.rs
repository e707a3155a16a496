use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::data::LABEL_CANDIDATES;
use crate::error::DetectorError;
use crate::ml::ensemble::EnsemblePolicy;
use crate::ml::models::{AutoencoderConfig, IsolationForestConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/flowguard/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("flowguard/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.is_file() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> std::result::Result<(), DetectorError> {
        let invalid =
            |msg: String| -> std::result::Result<(), DetectorError> { Err(DetectorError::Config(msg)) };

        if !(self.data.test_size > 0.0 && self.data.test_size < 1.0) {
            return invalid(format!("data.test_size must be in (0, 1), got {}", self.data.test_size));
        }
        if self.data.label_candidates.is_empty() {
            return invalid("data.label_candidates must not be empty".to_string());
        }

        let forest = &self.models.isolation_forest;
        if !(forest.contamination > 0.0 && forest.contamination <= 0.5) {
            return invalid(format!(
                "models.isolation_forest.contamination must be in (0, 0.5], got {}",
                forest.contamination
            ));
        }
        if forest.n_estimators == 0 || forest.max_samples == 0 {
            return invalid("models.isolation_forest needs at least one estimator and sample".to_string());
        }

        let ae = &self.models.autoencoder;
        if ae.epochs == 0 || ae.batch_size == 0 || ae.encoding_dim == 0 {
            return invalid("models.autoencoder epochs, batch_size and encoding_dim must be > 0".to_string());
        }
        if !(ae.validation_split >= 0.0 && ae.validation_split < 1.0) {
            return invalid(format!(
                "models.autoencoder.validation_split must be in [0, 1), got {}",
                ae.validation_split
            ));
        }
        if !(ae.learning_rate > 0.0) {
            return invalid("models.autoencoder.learning_rate must be > 0".to_string());
        }

        let pct = self.detection.threshold_percentile;
        if !(0.0..=100.0).contains(&pct) {
            return invalid(format!("detection.threshold_percentile must be in [0, 100], got {}", pct));
        }

        Ok(())
    }

    /// Autoencoder settings with the detection threshold percentile applied
    pub fn autoencoder(&self) -> AutoencoderConfig {
        AutoencoderConfig {
            threshold_percentile: self.detection.threshold_percentile,
            ..self.models.autoencoder.clone()
        }
    }

    /// Path of the JSON report
    pub fn report_path(&self) -> PathBuf {
        self.output.results_dir.join(&self.output.report_file)
    }
}

/// Dataset handling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Fraction of rows held out for detection
    pub test_size: f64,
    /// Seed for the train/test split and sample generation
    pub random_state: u64,
    /// Rows generated when no input file is given
    pub sample_size: usize,
    /// Label column names, checked in order
    pub label_candidates: Vec<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            random_state: 42,
            sample_size: 10_000,
            label_candidates: LABEL_CANDIDATES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Per-model configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub isolation_forest: IsolationForestConfig,

    #[serde(default)]
    pub autoencoder: AutoencoderConfig,
}

/// Detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// How the two detectors' flags are combined
    pub ensemble_method: EnsemblePolicy,
    /// Percentile of training reconstruction error used as autoencoder threshold
    pub threshold_percentile: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            ensemble_method: EnsemblePolicy::Union,
            threshold_percentile: 95.0,
        }
    }
}

/// Output locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for reports and raw results
    pub results_dir: PathBuf,
    /// Directory for persisted preprocessor and models
    pub model_dir: PathBuf,
    /// Report file name inside `results_dir`
    pub report_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            model_dir: PathBuf::from("models/saved_models"),
            report_file: "detection_report.json".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.data.test_size, 0.2);
        assert_eq!(config.data.random_state, 42);
        assert_eq!(config.models.isolation_forest.contamination, 0.1);
        assert_eq!(config.models.isolation_forest.n_estimators, 100);
        assert_eq!(config.models.autoencoder.encoding_dim, 10);
        assert_eq!(config.models.autoencoder.epochs, 50);
        assert_eq!(config.models.autoencoder.batch_size, 32);
        assert_eq!(config.detection.ensemble_method, EnsemblePolicy::Union);
        assert_eq!(config.detection.threshold_percentile, 95.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [detection]
            ensemble_method = "intersection"

            [models.isolation_forest]
            contamination = 0.05
            "#,
        )
        .unwrap();

        assert_eq!(config.detection.ensemble_method, EnsemblePolicy::Intersection);
        assert_eq!(config.models.isolation_forest.contamination, 0.05);
        assert_eq!(config.models.isolation_forest.n_estimators, 100);
        assert_eq!(config.data.test_size, 0.2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.data.test_size = 1.0;
        assert!(matches!(config.validate(), Err(DetectorError::Config(_))));

        let mut config = Config::default();
        config.models.isolation_forest.contamination = 0.9;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detection.threshold_percentile = 120.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = Config::default();
        config.models.autoencoder.epochs = 7;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_autoencoder_uses_detection_percentile() {
        let mut config = Config::default();
        config.detection.threshold_percentile = 99.0;
        assert_eq!(config.autoencoder().threshold_percentile, 99.0);
    }
}
