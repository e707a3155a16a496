//! Traffic data handling
//!
//! Loading, the tabular [`Dataset`] model, and the schema-robust
//! preprocessing that turns datasets into scaled feature matrices.

pub mod dataset;
pub mod loader;
pub mod matrix;
pub mod preprocessor;
pub mod scaling;

pub use dataset::{Column, Dataset, Value};
pub use loader::{generate_sample_data, load_from_file};
pub use matrix::FeatureMatrix;
pub use preprocessor::{
    CategoricalEncoder, FeatureSchema, FitOptions, SchemaPreprocessor, SplitData,
    LABEL_CANDIDATES, MISSING_CATEGORY,
};
pub use scaling::{FeatureStats, ScalingStatistics};
