use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("preprocessor not fitted: call fit before transform")]
    NotFitted,

    #[error("model not trained: {0}")]
    NotTrained(String),

    #[error("unsupported file format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("empty dataset: {0}")]
    EmptyDataset(String),

    #[error("cannot {operation}: requires state {required}, pipeline is {current}")]
    InvalidState {
        operation: &'static str,
        required: &'static str,
        current: &'static str,
    },

    #[error("label count mismatch: expected {expected}, got {got}")]
    LabelMismatch { expected: usize, got: usize },

    #[error("invalid dimension: expected {expected}, got {got}")]
    InvalidDimension { expected: usize, got: usize },

    #[error("config error: {0}")]
    Config(String),

    #[error("model backend error: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for DetectorError {
    fn from(err: bincode::Error) -> Self {
        DetectorError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DetectorError>;
