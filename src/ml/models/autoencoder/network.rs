//! Autoencoder Network Architecture
//!
//! Symmetric fully connected autoencoder scoring rows by reconstruction error.
//! Architecture: input -> 32 -> 16 -> encoding -> 16 -> 32 -> input, ReLU on
//! every hidden layer and a linear output.

use burn::{
    backend::{Autodiff, NdArray},
    module::Module,
    nn::{Initializer, Linear, LinearConfig, Relu},
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor, TensorData},
};
use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, Result};

/// Backend used for scoring and persisted weights
pub type InferenceBackend = NdArray<f32>;

/// Backend used while training
pub type TrainingBackend = Autodiff<InferenceBackend>;

/// Autoencoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoencoderConfig {
    /// Latent space dimension
    pub encoding_dim: usize,
    /// Hidden layer dimensions (encoder path, mirrored by the decoder)
    pub hidden_dims: Vec<usize>,
    /// Number of training epochs
    pub epochs: usize,
    /// Batch size for training
    pub batch_size: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Trailing fraction of the training rows held out for validation loss
    pub validation_split: f64,
    /// Seed for weight init and batch shuffling
    pub random_state: u64,
    /// Stop after this many epochs without improvement (0 disables)
    pub early_stopping_patience: usize,
    /// Percentile of training reconstruction error used as the threshold
    #[serde(skip, default = "default_threshold_percentile")]
    pub threshold_percentile: f32,
}

fn default_threshold_percentile() -> f32 {
    95.0
}

impl Default for AutoencoderConfig {
    fn default() -> Self {
        Self {
            encoding_dim: 10,
            hidden_dims: vec![32, 16],
            epochs: 50,
            batch_size: 32,
            learning_rate: 0.001,
            validation_split: 0.1,
            random_state: 42,
            early_stopping_patience: 0,
            threshold_percentile: default_threshold_percentile(),
        }
    }
}

impl AutoencoderConfig {
    /// Layer widths from input to output
    pub fn layer_dims(&self, input_dim: usize) -> Vec<usize> {
        let mut dims = Vec::with_capacity(self.hidden_dims.len() * 2 + 3);
        dims.push(input_dim);
        dims.extend(self.hidden_dims.iter().copied());
        dims.push(self.encoding_dim);
        dims.extend(self.hidden_dims.iter().rev().copied());
        dims.push(input_dim);
        dims
    }
}

/// Autoencoder network
#[derive(Module, Debug)]
pub struct Autoencoder<B: Backend> {
    /// input -> ... -> encoding
    encoder: Vec<Linear<B>>,
    /// encoding -> ... -> input
    decoder: Vec<Linear<B>>,
    activation: Relu,
}

impl<B: Backend> Autoencoder<B> {
    /// Create a new autoencoder with Glorot-uniform weights
    pub fn new(config: &AutoencoderConfig, input_dim: usize, device: &B::Device) -> Self {
        let dims = config.layer_dims(input_dim);
        let mut encoder: Vec<Linear<B>> = dims
            .windows(2)
            .map(|pair| {
                LinearConfig::new(pair[0], pair[1])
                    .with_initializer(Initializer::XavierUniform { gain: 1.0 })
                    .init(device)
            })
            .collect();
        let decoder = encoder.split_off(encoder.len() / 2);

        Self {
            encoder,
            decoder,
            activation: Relu::new(),
        }
    }

    /// Number of dense layers
    pub fn depth(&self) -> usize {
        self.encoder.len() + self.decoder.len()
    }

    /// Encode input to latent representation
    pub fn encode(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.encoder
            .iter()
            .fold(x, |x, layer| self.activation.forward(layer.forward(x)))
    }

    /// Decode latent representation to reconstruction; the output layer is linear
    pub fn decode(&self, z: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.decoder.len().saturating_sub(1);
        self.decoder.iter().enumerate().fold(z, |x, (i, layer)| {
            let x = layer.forward(x);
            if i < last {
                self.activation.forward(x)
            } else {
                x
            }
        })
    }

    /// Forward pass: encode then decode
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let z = self.encode(x);
        self.decode(z)
    }

    /// Mean squared reconstruction error per row
    pub fn reconstruction_error(&self, x: Tensor<B, 2>) -> Tensor<B, 1> {
        let reconstructed = self.forward(x.clone());
        let diff = x - reconstructed;
        let squared = diff.clone() * diff;
        squared.mean_dim(1).squeeze(1)
    }

    /// Weights as a self-contained byte record
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        Recorder::<B>::record(&recorder, self.clone().into_record(), ())
            .map_err(|e| DetectorError::Serialization(e.to_string()))
    }

    /// Rebuild a network from [`Autoencoder::to_bytes`] output
    pub fn from_bytes(
        config: &AutoencoderConfig,
        input_dim: usize,
        bytes: Vec<u8>,
        device: &B::Device,
    ) -> Result<Self> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = Recorder::<B>::load(&recorder, bytes, device)
            .map_err(|e| DetectorError::Serialization(e.to_string()))?;
        Ok(Self::new(config, input_dim, device).load_record(record))
    }
}

/// Stack rows into a `[n, n_features]` tensor
pub fn rows_to_tensor<'a, B: Backend>(
    rows: impl Iterator<Item = &'a [f32]>,
    n_features: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let mut values = Vec::new();
    let mut n_rows = 0;
    for row in rows {
        values.extend_from_slice(row);
        n_rows += 1;
    }
    Tensor::from_data(TensorData::new(values, [n_rows, n_features]), device)
}

/// Copy a 1-D tensor back to host memory
pub fn tensor_to_vec<B: Backend>(tensor: Tensor<B, 1>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| DetectorError::Backend(format!("{:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> <InferenceBackend as Backend>::Device {
        Default::default()
    }

    #[test]
    fn test_autoencoder_config_default() {
        let config = AutoencoderConfig::default();
        assert_eq!(config.encoding_dim, 10);
        assert_eq!(config.hidden_dims, vec![32, 16]);
        assert_eq!(config.layer_dims(8), vec![8, 32, 16, 10, 16, 32, 8]);
    }

    #[test]
    fn test_forward_shapes() {
        let net = Autoencoder::<InferenceBackend>::new(&AutoencoderConfig::default(), 5, &device());
        let rows = vec![vec![0.1f32; 5]; 3];
        let x = rows_to_tensor::<InferenceBackend>(rows.iter().map(|r| r.as_slice()), 5, &device());

        assert_eq!(net.depth(), 6);
        assert_eq!(net.forward(x.clone()).dims(), [3, 5]);
        assert_eq!(net.encode(x.clone()).dims(), [3, 10]);
        assert_eq!(net.reconstruction_error(x).dims(), [3]);
    }

    #[test]
    fn test_reconstruction_error_is_row_mse() {
        let config = AutoencoderConfig {
            encoding_dim: 2,
            hidden_dims: vec![3],
            ..Default::default()
        };
        let net = Autoencoder::<InferenceBackend>::new(&config, 3, &device());
        let rows = vec![vec![0.5f32, -0.3, 0.8], vec![0.0, 0.0, 0.0]];
        let x = rows_to_tensor::<InferenceBackend>(rows.iter().map(|r| r.as_slice()), 3, &device());

        let output = net.forward(x.clone()).into_data().to_vec::<f32>().unwrap();
        let errors = tensor_to_vec(net.reconstruction_error(x)).unwrap();

        for (r, row) in rows.iter().enumerate() {
            let expected: f32 = row
                .iter()
                .zip(&output[r * 3..(r + 1) * 3])
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
                / 3.0;
            assert!((errors[r] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_bytes_roundtrip() {
        let config = AutoencoderConfig {
            encoding_dim: 2,
            hidden_dims: vec![4],
            ..Default::default()
        };
        let net = Autoencoder::<InferenceBackend>::new(&config, 3, &device());
        let bytes = net.to_bytes().unwrap();
        let restored = Autoencoder::<InferenceBackend>::from_bytes(&config, 3, bytes, &device()).unwrap();

        let rows = vec![vec![0.2f32, 0.4, -0.1]];
        let x = || rows_to_tensor::<InferenceBackend>(rows.iter().map(|r| r.as_slice()), 3, &device());
        assert_eq!(
            tensor_to_vec(net.reconstruction_error(x())).unwrap(),
            tensor_to_vec(restored.reconstruction_error(x())).unwrap()
        );
    }
}
