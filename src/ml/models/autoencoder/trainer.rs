//! Autoencoder Training
//!
//! Mini-batch Adam on mean squared reconstruction error, with a trailing
//! validation split and loss history for monitoring.

use std::collections::VecDeque;

use burn::{
    module::AutodiffModule,
    nn::loss::{MseLoss, Reduction},
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::Backend, ElementConversion},
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use super::network::{
    rows_to_tensor, tensor_to_vec, Autoencoder, AutoencoderConfig, InferenceBackend, TrainingBackend,
};
use crate::data::FeatureMatrix;
use crate::error::{DetectorError, Result};

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPSILON: f32 = 1e-7;

/// Rows scored per forward pass at inference
const SCORE_CHUNK: usize = 4096;

/// Autoencoder trainer
#[derive(Debug)]
pub struct AutoencoderTrainer {
    config: AutoencoderConfig,
    /// Loss history for monitoring
    loss_history: VecDeque<f32>,
    /// Maximum history length
    max_history: usize,
}

impl AutoencoderTrainer {
    /// Create a new trainer with configuration
    pub fn new(config: AutoencoderConfig) -> Self {
        Self {
            config,
            loss_history: VecDeque::with_capacity(1000),
            max_history: 1000,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &AutoencoderConfig {
        &self.config
    }

    /// Record a loss value
    pub fn record_loss(&mut self, loss: f32) {
        if self.loss_history.len() >= self.max_history {
            self.loss_history.pop_front();
        }
        self.loss_history.push_back(loss);
    }

    /// Get average recent loss
    pub fn average_loss(&self) -> f32 {
        if self.loss_history.is_empty() {
            return 0.0;
        }
        self.loss_history.iter().sum::<f32>() / self.loss_history.len() as f32
    }

    /// Check for early stopping: no improvement over the best loss in the
    /// last `patience` epochs
    pub fn should_stop_early(&self, patience: usize) -> bool {
        if patience == 0 || self.loss_history.len() <= patience {
            return false;
        }

        let split = self.loss_history.len() - patience;
        let best_before = self.loss_history.iter().take(split).copied().fold(f32::MAX, f32::min);
        let best_recent = self.loss_history.iter().skip(split).copied().fold(f32::MAX, f32::min);

        best_recent >= best_before
    }

    /// Train a fresh network on `data`
    pub fn train(&mut self, data: &FeatureMatrix) -> Result<TrainedAutoencoder> {
        if data.is_empty() {
            return Err(DetectorError::EmptyDataset("autoencoder training data".to_string()));
        }

        let device: <TrainingBackend as Backend>::Device = Default::default();
        TrainingBackend::seed(self.config.random_state);

        let input_dim = data.n_features();
        let mut model = Autoencoder::<TrainingBackend>::new(&self.config, input_dim, &device);
        let mut optim = AdamConfig::new()
            .with_beta_1(BETA1)
            .with_beta_2(BETA2)
            .with_epsilon(EPSILON)
            .init::<TrainingBackend, Autoencoder<TrainingBackend>>();
        let loss_fn = MseLoss::new();
        let mut rng = StdRng::seed_from_u64(self.config.random_state);

        // Trailing rows are held out, as Keras does
        let n = data.n_rows();
        let n_val = (n as f64 * self.config.validation_split) as usize;
        let n_train = if n_val >= n { n } else { n - n_val };
        let validation = data.select(&(n_train..n).collect::<Vec<_>>());

        let batch_size = self.config.batch_size.max(1);
        let mut indices: Vec<usize> = (0..n_train).collect();
        let mut final_loss = 0.0;
        let mut val_loss = None;
        let mut epochs_trained = 0;

        self.loss_history.clear();

        for epoch in 0..self.config.epochs {
            indices.shuffle(&mut rng);

            let mut epoch_loss = 0.0;
            for batch in indices.chunks(batch_size) {
                let x = rows_to_tensor::<TrainingBackend>(
                    batch.iter().map(|&i| data.rows()[i].as_slice()),
                    input_dim,
                    &device,
                );
                let output = model.forward(x.clone());
                let loss = loss_fn.forward(output, x, Reduction::Mean);
                epoch_loss += loss.clone().into_scalar().elem::<f32>() * batch.len() as f32;

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optim.step(self.config.learning_rate, model, grads);
            }
            final_loss = epoch_loss / n_train as f32;
            epochs_trained = epoch + 1;

            val_loss = if validation.is_empty() {
                None
            } else {
                let errors = score_rows(&model.valid(), &validation)?;
                Some(errors.iter().sum::<f32>() / errors.len() as f32)
            };
            self.record_loss(val_loss.unwrap_or(final_loss));

            debug!(
                "Autoencoder epoch {}/{}: loss {:.6}, val_loss {:?}",
                epochs_trained, self.config.epochs, final_loss, val_loss
            );

            if self.should_stop_early(self.config.early_stopping_patience) {
                debug!("Early stopping after {} epochs", epochs_trained);
                break;
            }
        }

        Ok(TrainedAutoencoder {
            network: model.valid(),
            config: self.config.clone(),
            input_dim,
            final_loss,
            val_loss,
            epochs_trained,
        })
    }
}

/// Reconstruction error per row; overflowed errors saturate at `f32::MAX`
fn score_rows(network: &Autoencoder<InferenceBackend>, data: &FeatureMatrix) -> Result<Vec<f32>> {
    let device: <InferenceBackend as Backend>::Device = Default::default();
    let mut errors = Vec::with_capacity(data.n_rows());

    for chunk in data.rows().chunks(SCORE_CHUNK) {
        let x = rows_to_tensor::<InferenceBackend>(
            chunk.iter().map(|r| r.as_slice()),
            data.n_features(),
            &device,
        );
        let chunk_errors = tensor_to_vec(network.reconstruction_error(x))?;
        errors.extend(
            chunk_errors
                .into_iter()
                .map(|e| if e.is_finite() { e } else { f32::MAX }),
        );
    }
    Ok(errors)
}

/// Trained autoencoder result
#[derive(Debug, Clone)]
pub struct TrainedAutoencoder {
    /// Trained network
    pub network: Autoencoder<InferenceBackend>,
    /// Configuration the network was built from
    config: AutoencoderConfig,
    input_dim: usize,
    /// Mean training loss of the last epoch
    pub final_loss: f32,
    /// Validation loss of the last epoch, if a split was held out
    pub val_loss: Option<f32>,
    /// Number of epochs trained
    pub epochs_trained: usize,
}

impl TrainedAutoencoder {
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Score feature rows (reconstruction error)
    pub fn score(&self, data: &FeatureMatrix) -> Result<Vec<f32>> {
        if data.n_features() != self.input_dim {
            return Err(DetectorError::InvalidDimension {
                expected: self.input_dim,
                got: data.n_features(),
            });
        }
        if data.is_empty() {
            return Ok(Vec::new());
        }
        score_rows(&self.network, data)
    }
}

/// On-disk form: config and shape plus the recorded weights
#[derive(Serialize, Deserialize)]
struct StoredAutoencoder {
    config: AutoencoderConfig,
    input_dim: usize,
    weights: Vec<u8>,
    final_loss: f32,
    val_loss: Option<f32>,
    epochs_trained: usize,
}

impl Serialize for TrainedAutoencoder {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let weights = self.network.to_bytes().map_err(serde::ser::Error::custom)?;
        StoredAutoencoder {
            config: self.config.clone(),
            input_dim: self.input_dim,
            weights,
            final_loss: self.final_loss,
            val_loss: self.val_loss,
            epochs_trained: self.epochs_trained,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TrainedAutoencoder {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let stored = StoredAutoencoder::deserialize(deserializer)?;
        let network = Autoencoder::from_bytes(
            &stored.config,
            stored.input_dim,
            stored.weights,
            &Default::default(),
        )
        .map_err(serde::de::Error::custom)?;

        Ok(Self {
            network,
            config: stored.config,
            input_dim: stored.input_dim,
            final_loss: stored.final_loss,
            val_loss: stored.val_loss,
            epochs_trained: stored.epochs_trained,
        })
    }
}
