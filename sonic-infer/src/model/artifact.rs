//! On-disk model artifact format (JSON)
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "name": "speech-events-v3",
//!   "task": "classification",
//!   "input_shape": [80, 3001],
//!   "sample_rate": 16000,
//!   "pooling": "mean_std",
//!   "labels": ["speech", "music", "noise"],
//!   "layers": [
//!     { "weights": [[...], ...], "bias": [...], "activation": "relu" },
//!     { "weights": [[...], ...], "bias": [...], "activation": "linear" }
//!   ]
//! }
//! ```
//!
//! `weights` is row-major `[outputs][inputs]`.

use serde::{Deserialize, Serialize};

/// Newest artifact layout this build understands
pub const SUPPORTED_FORMAT_VERSION: u32 = 1;

/// How label scores are derived from the final layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Mutually exclusive labels, softmax over the logits
    Classification,
    /// Independent labels, per-label sigmoid
    MultiLabel,
}

/// Reduction of the `[n_mels, n_frames]` matrix before the dense layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pooling {
    /// Per-band mean over time → `n_mels` inputs
    Mean,
    /// Per-band mean then standard deviation → `2 * n_mels` inputs
    MeanStd,
    /// Whole matrix, row-major → `n_mels * n_frames` inputs
    Flatten,
}

impl Pooling {
    /// Length of the pooled vector for a given feature shape
    pub fn output_len(self, input_shape: [usize; 2]) -> usize {
        match self {
            Pooling::Mean => input_shape[0],
            Pooling::MeanStd => input_shape[0] * 2,
            Pooling::Flatten => input_shape[0] * input_shape[1],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Tanh,
    Sigmoid,
    Linear,
}

impl Activation {
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => sigmoid(x),
            Activation::Linear => x,
        }
    }
}

/// One fully connected layer as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerSpec {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    #[serde(default = "default_activation")]
    pub activation: Activation,
}

fn default_activation() -> Activation {
    Activation::Linear
}

/// Deserialized artifact, before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub task: Task,
    /// Feature matrix shape the network was trained on, `[n_mels, n_frames]`
    pub input_shape: [usize; 2],
    /// Sample rate the features were computed at, if recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    pub pooling: Pooling,
    pub labels: Vec<String>,
    pub layers: Vec<LayerSpec>,
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
