//! Model Storage and Persistence
//!
//! Saves the fitted preprocessor and trained detectors so a later process can
//! run detection without refitting. Layout of an artifact directory:
//!
//! ```text
//! preprocessor.bin
//! isolation_forest.bin
//! autoencoder.bin
//! metadata.json
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::data::SchemaPreprocessor;
use crate::error::{DetectorError, Result};

/// Version of the artifact layout
pub const STORAGE_VERSION: u32 = 1;

pub const PREPROCESSOR_FILE: &str = "preprocessor.bin";
pub const METADATA_FILE: &str = "metadata.json";

/// Metadata about stored artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Version of the storage format
    pub version: u32,
    /// When the artifacts were saved
    pub saved_at: DateTime<Utc>,
    /// Width of the feature schema
    pub feature_count: usize,
    /// Feature schema, in order
    pub feature_names: Vec<String>,
    /// Label column seen at fit time
    pub label_column: Option<String>,
    /// Saved model names
    pub models: Vec<String>,
    /// Host identifier
    pub host_id: String,
}

impl ArtifactMetadata {
    /// Describe a fitted preprocessor and the given models
    pub fn describe(preprocessor: &SchemaPreprocessor, models: &[&str]) -> Self {
        let feature_names = preprocessor
            .schema()
            .map(|s| s.columns().to_vec())
            .unwrap_or_default();

        Self {
            version: STORAGE_VERSION,
            saved_at: Utc::now(),
            feature_count: feature_names.len(),
            feature_names,
            label_column: preprocessor.label_column().map(str::to_string),
            models: models.iter().map(|m| m.to_string()).collect(),
            host_id: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
        }
    }
}

/// Artifact directory manager
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Get the base directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if needed
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        debug!("Initialized artifact store at {:?}", self.dir);
        Ok(())
    }

    fn model_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", name))
    }

    /// True if the preprocessor and every named model are present
    pub fn has_artifacts(&self, models: &[&str]) -> bool {
        self.dir.join(PREPROCESSOR_FILE).is_file()
            && models.iter().all(|name| self.model_path(name).is_file())
    }

    // === Preprocessor ===

    pub fn save_preprocessor(&self, preprocessor: &SchemaPreprocessor) -> Result<()> {
        let path = self.dir.join(PREPROCESSOR_FILE);
        write_bincode(&path, preprocessor)?;
        info!("Saved preprocessor to {:?}", path);
        Ok(())
    }

    pub fn load_preprocessor(&self) -> Result<SchemaPreprocessor> {
        let preprocessor: SchemaPreprocessor = read_bincode(&self.dir.join(PREPROCESSOR_FILE))?;
        if !preprocessor.is_fitted() {
            return Err(DetectorError::NotFitted);
        }
        Ok(preprocessor)
    }

    // === Models ===

    /// Save a trained model under `name`
    pub fn save_model<T: Serialize>(&self, name: &str, model: &T) -> Result<()> {
        let path = self.model_path(name);
        write_bincode(&path, model)?;
        info!("Saved model '{}' to {:?}", name, path);
        Ok(())
    }

    /// Load the model saved under `name`
    pub fn load_model<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.model_path(name);
        let model = read_bincode(&path)?;
        info!("Loaded model '{}' from {:?}", name, path);
        Ok(model)
    }

    /// List available models
    pub fn list_models(&self) -> Result<Vec<String>> {
        let mut models = Vec::new();
        if !self.dir.exists() {
            return Ok(models);
        }

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "bin").unwrap_or(false) {
                if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                    if name != "preprocessor" {
                        models.push(name.to_string());
                    }
                }
            }
        }
        models.sort();

        Ok(models)
    }

    // === Metadata ===

    pub fn save_metadata(&self, metadata: &ArtifactMetadata) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(metadata)?;
        fs::write(self.dir.join(METADATA_FILE), content)?;
        Ok(())
    }

    pub fn load_metadata(&self) -> Result<ArtifactMetadata> {
        let path = self.dir.join(METADATA_FILE);
        if !path.is_file() {
            return Err(DetectorError::MissingArtifact(path));
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

fn write_bincode<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, value)?;
    Ok(())
}

fn read_bincode<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.is_file() {
        return Err(DetectorError::MissingArtifact(path.to_path_buf()));
    }
    let reader = BufReader::new(File::open(path)?);
    Ok(bincode::deserialize_from(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{generate_sample_data, FitOptions};
    use crate::ml::models::{AnomalyDetector, IsolationForestConfig, IsolationForestDetector};
    use tempfile::TempDir;

    fn fitted_preprocessor() -> (SchemaPreprocessor, crate::data::SplitData) {
        let mut preprocessor = SchemaPreprocessor::new();
        let split = preprocessor
            .fit(&generate_sample_data(200, 1).unwrap(), &FitOptions::default())
            .unwrap();
        (preprocessor, split)
    }

    #[test]
    fn test_store_init() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path().join("saved"));
        store.init().unwrap();
        assert!(store.dir().is_dir());
        assert!(store.list_models().unwrap().is_empty());
    }

    #[test]
    fn test_missing_artifact() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());

        let err = store.load_preprocessor().unwrap_err();
        assert!(matches!(err, DetectorError::MissingArtifact(_)));

        let err = store.load_model::<IsolationForestDetector>("isolation_forest").unwrap_err();
        assert!(matches!(err, DetectorError::MissingArtifact(_)));
        assert!(!store.has_artifacts(&["isolation_forest"]));
    }

    #[test]
    fn test_preprocessor_save_load() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());
        let (preprocessor, _) = fitted_preprocessor();

        store.save_preprocessor(&preprocessor).unwrap();
        let loaded = store.load_preprocessor().unwrap();

        assert_eq!(loaded.schema(), preprocessor.schema());
        assert_eq!(loaded.label_column(), Some("label"));
        assert_eq!(loaded.encoder("protocol"), preprocessor.encoder("protocol"));
    }

    #[test]
    fn test_model_save_load_predicts_identically() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());
        let (_, split) = fitted_preprocessor();

        let mut forest = IsolationForestDetector::new(IsolationForestConfig {
            n_estimators: 10,
            ..Default::default()
        });
        forest.train(&split.train).unwrap();
        store.save_model(forest.name(), &forest).unwrap();

        let loaded: IsolationForestDetector = store.load_model("isolation_forest").unwrap();
        assert!(loaded.is_trained());
        assert_eq!(loaded.predict(&split.test).unwrap(), forest.predict(&split.test).unwrap());
        assert_eq!(store.list_models().unwrap(), vec!["isolation_forest".to_string()]);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());
        let (preprocessor, _) = fitted_preprocessor();

        let metadata = ArtifactMetadata::describe(&preprocessor, &["isolation_forest", "autoencoder"]);
        store.save_metadata(&metadata).unwrap();

        let loaded = store.load_metadata().unwrap();
        assert_eq!(loaded.version, STORAGE_VERSION);
        assert_eq!(loaded.feature_count, 8);
        assert_eq!(loaded.models.len(), 2);
    }
}
