//! Isolation Forest implementation
//!
//! Anomaly detection using isolation trees. Anomalies are easier to isolate
//! and thus have shorter path lengths in the trees.
//!
//! The decision function is centred on an offset learnt from the training
//! data: the `contamination` quantile of training scores sits at zero, and
//! rows below zero are outliers.

use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{percentile, AnomalyDetector, DetectionResult};
use crate::data::FeatureMatrix;
use crate::error::{DetectorError, Result};

/// Isolation Forest settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationForestConfig {
    /// Expected fraction of outliers in the training data
    pub contamination: f64,
    /// Number of trees
    pub n_estimators: usize,
    /// Rows drawn (without replacement) per tree
    pub max_samples: usize,
    /// Seed for row sampling and split selection
    pub random_state: u64,
}

impl Default for IsolationForestConfig {
    fn default() -> Self {
        Self {
            contamination: 0.1,
            n_estimators: 100,
            max_samples: 256,
            random_state: 42,
        }
    }
}

/// Isolation Forest detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForestDetector {
    config: IsolationForestConfig,
    /// Individual isolation trees
    trees: Vec<IsolationTree>,
    /// Feature width seen at fit time
    n_features: usize,
    /// Rows used per tree at fit time
    sample_size: usize,
    /// Average path length normalization factor, c(sample_size)
    avg_path_length: f32,
    /// Training score at the contamination quantile
    offset: f32,
    /// Whether the model is trained
    trained: bool,
}

impl Default for IsolationForestDetector {
    fn default() -> Self {
        Self::new(IsolationForestConfig::default())
    }
}

impl IsolationForestDetector {
    pub fn new(config: IsolationForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            n_features: 0,
            sample_size: 0,
            avg_path_length: 0.0,
            offset: 0.0,
            trained: false,
        }
    }

    pub fn config(&self) -> &IsolationForestConfig {
        &self.config
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Learnt decision offset
    pub fn offset(&self) -> f32 {
        self.offset
    }

    /// Calculate average path length for normalization (c(n) function)
    fn average_path_length(n: usize) -> f32 {
        if n <= 1 {
            return 0.0;
        }
        let n = n as f32;
        2.0 * (n.ln() + 0.5772156649) - 2.0 * (n - 1.0) / n
    }

    /// Raw anomaly score 2^(-E[h(x)] / c(n)), in (0, 1]
    fn anomaly_score(&self, sample: &[f32]) -> f32 {
        if self.trees.is_empty() || self.avg_path_length == 0.0 {
            return 0.5;
        }

        let total_path_length: f32 = self.trees.iter().map(|tree| tree.path_length(sample)).sum();
        let avg_path = total_path_length / self.trees.len() as f32;

        2.0_f32.powf(-avg_path / self.avg_path_length)
    }

    /// Decision value: negative for outliers, lower is more anomalous
    fn decision(&self, sample: &[f32]) -> f32 {
        -self.anomaly_score(sample) - self.offset
    }
}

impl AnomalyDetector for IsolationForestDetector {
    fn name(&self) -> &str {
        "isolation_forest"
    }

    fn train(&mut self, data: &FeatureMatrix) -> Result<()> {
        if data.is_empty() {
            return Err(DetectorError::EmptyDataset(
                "isolation forest training data".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.config.random_state);
        let n_features = data.n_features();
        let rows = data.rows();

        self.trees.clear();
        self.trained = false;
        self.n_features = n_features;
        self.sample_size = self.config.max_samples.min(rows.len()).max(1);
        self.avg_path_length = Self::average_path_length(self.sample_size);
        let max_depth = (self.sample_size as f32).log2().ceil().max(1.0) as usize;

        let mut indices: Vec<usize> = (0..rows.len()).collect();
        for _ in 0..self.config.n_estimators {
            // Sample without replacement
            indices.shuffle(&mut rng);
            let sample = &indices[..self.sample_size];
            let tree = IsolationTree::build(rows, sample, n_features, max_depth, &mut rng);
            self.trees.push(tree);
        }

        let training_scores: Vec<f32> = data.iter().map(|row| -self.anomaly_score(row)).collect();
        self.offset = percentile(&training_scores, (self.config.contamination * 100.0) as f32);
        self.trained = true;

        debug!(
            "Isolation forest trained: {} trees, {} rows per tree, offset {:.4}",
            self.trees.len(),
            self.sample_size,
            self.offset
        );
        Ok(())
    }

    fn predict(&self, data: &FeatureMatrix) -> Result<DetectionResult> {
        if !self.trained {
            return Err(DetectorError::NotTrained(self.name().to_string()));
        }
        if data.n_features() != self.n_features {
            return Err(DetectorError::InvalidDimension {
                expected: self.n_features,
                got: data.n_features(),
            });
        }

        let scores: Vec<f32> = data.iter().map(|row| self.decision(row)).collect();
        let anomalies = scores.iter().map(|&s| s < 0.0).collect();

        Ok(DetectionResult {
            scores,
            anomalies,
            threshold: None,
        })
    }

    fn is_trained(&self) -> bool {
        self.trained
    }
}

/// A single isolation tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationTree {
    root: Option<Box<IsolationNode>>,
}

impl IsolationTree {
    /// Build an isolation tree from the sampled row indices
    fn build<R: Rng>(
        rows: &[Vec<f32>],
        sample: &[usize],
        n_features: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> Self {
        let root = Self::build_node(rows, sample.to_vec(), n_features, 0, max_depth, rng);
        Self { root }
    }

    /// Recursively build tree nodes
    fn build_node<R: Rng>(
        rows: &[Vec<f32>],
        sample: Vec<usize>,
        n_features: usize,
        depth: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> Option<Box<IsolationNode>> {
        if sample.is_empty() {
            return None;
        }

        // Terminal conditions
        if depth >= max_depth || sample.len() <= 1 || n_features == 0 {
            return Some(Box::new(IsolationNode::Leaf { size: sample.len() }));
        }

        // Randomly select feature
        let feature_idx = rng.random_range(0..n_features);

        // Find min/max for selected feature
        let mut min_val = f32::MAX;
        let mut max_val = f32::MIN;
        for &idx in &sample {
            let val = rows[idx][feature_idx];
            min_val = min_val.min(val);
            max_val = max_val.max(val);
        }

        // If all values are the same, make a leaf
        if max_val - min_val <= f32::EPSILON * max_val.abs().max(1.0) {
            return Some(Box::new(IsolationNode::Leaf { size: sample.len() }));
        }

        // Random split point
        let split_value = rng.random_range(min_val..max_val);

        let (left_sample, right_sample): (Vec<usize>, Vec<usize>) = sample
            .into_iter()
            .partition(|&idx| rows[idx][feature_idx] < split_value);

        let left = Self::build_node(rows, left_sample, n_features, depth + 1, max_depth, rng);
        let right = Self::build_node(rows, right_sample, n_features, depth + 1, max_depth, rng);

        Some(Box::new(IsolationNode::Internal {
            feature_idx,
            split_value,
            left,
            right,
        }))
    }

    /// Calculate path length for a sample
    fn path_length(&self, sample: &[f32]) -> f32 {
        match &self.root {
            None => 0.0,
            Some(node) => Self::node_path_length(node, sample, 0),
        }
    }

    fn node_path_length(node: &IsolationNode, sample: &[f32], depth: usize) -> f32 {
        match node {
            IsolationNode::Leaf { size } => {
                // Add expected path length adjustment for leaves with multiple samples
                depth as f32 + IsolationForestDetector::average_path_length(*size)
            }
            IsolationNode::Internal {
                feature_idx,
                split_value,
                left,
                right,
            } => {
                let val = sample.get(*feature_idx).copied().unwrap_or(0.0);
                let next_node = if val < *split_value { left } else { right };

                match next_node {
                    Some(n) => Self::node_path_length(n, sample, depth + 1),
                    None => depth as f32 + 1.0,
                }
            }
        }
    }
}

/// Node in an isolation tree
#[derive(Debug, Clone, Serialize, Deserialize)]
enum IsolationNode {
    /// Internal node with split
    Internal {
        feature_idx: usize,
        split_value: f32,
        left: Option<Box<IsolationNode>>,
        right: Option<Box<IsolationNode>>,
    },
    /// Leaf node
    Leaf { size: usize },
}
