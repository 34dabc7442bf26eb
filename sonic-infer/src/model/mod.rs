//! Model host: loads the artifact once and scores feature matrices
//!
//! The host is immutable after [`ModelHost::load`]. `predict` takes `&self`,
//! so a single `Arc<ModelHost>` serves every request concurrently without locks.

pub mod artifact;

pub use artifact::{Activation, ModelArtifact, Pooling, Task, SUPPORTED_FORMAT_VERSION};

use ndarray::{Array1, Array2, Axis};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use crate::features::FeatureVector;

/// Startup-time failures; any of these means the service never becomes ready
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("Model artifact not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read model artifact {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed model artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unsupported artifact format version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Invalid model artifact: {0}")]
    Invalid(String),
}

/// Per-request scoring failures
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("Feature shape {actual:?} does not match model input {expected:?}")]
    ShapeMismatch {
        expected: [usize; 2],
        actual: [usize; 2],
    },

    #[error("Model produced a non-finite score")]
    NonFinite,
}

/// One label with its score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

/// Scores for every label, highest first
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    scores: Vec<LabelScore>,
}

impl Prediction {
    /// Highest-scoring label
    pub fn top(&self) -> &LabelScore {
        // Hosts always carry at least one label
        &self.scores[0]
    }

    /// The first `k` scores (all of them if `k` exceeds the label count)
    pub fn top_k(&self, k: usize) -> &[LabelScore] {
        &self.scores[..k.min(self.scores.len())]
    }

    pub fn scores(&self) -> &[LabelScore] {
        &self.scores
    }
}

struct DenseLayer {
    /// `[outputs, inputs]`
    weights: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

/// Resident model
pub struct ModelHost {
    name: String,
    description: Option<String>,
    task: Task,
    input_shape: [usize; 2],
    sample_rate: Option<u32>,
    pooling: Pooling,
    labels: Vec<String>,
    layers: Vec<DenseLayer>,
}

impl std::fmt::Debug for ModelHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHost")
            .field("name", &self.name)
            .field("task", &self.task)
            .field("input_shape", &self.input_shape)
            .field("labels", &self.labels.len())
            .field("layers", &self.layers.len())
            .finish()
    }
}

impl ModelHost {
    /// Read, parse and validate an artifact file
    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let started = Instant::now();

        let content = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ModelLoadError::NotFound(path.to_path_buf())
            } else {
                ModelLoadError::Read {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;

        let artifact: ModelArtifact = serde_json::from_slice(&content)?;
        let host = Self::from_artifact(artifact)?;

        info!(
            path = %path.display(),
            model = %host.name,
            task = ?host.task,
            input_shape = ?host.input_shape,
            labels = host.labels.len(),
            parameters = host.parameter_count(),
            bytes = content.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model loaded"
        );

        Ok(host)
    }

    /// Validate an in-memory artifact and build the host
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ModelLoadError> {
        if artifact.format_version != SUPPORTED_FORMAT_VERSION {
            return Err(ModelLoadError::UnsupportedVersion {
                found: artifact.format_version,
                supported: SUPPORTED_FORMAT_VERSION,
            });
        }
        if artifact.name.trim().is_empty() {
            return Err(ModelLoadError::Invalid("name is empty".to_string()));
        }
        if artifact.input_shape.contains(&0) {
            return Err(ModelLoadError::Invalid(format!(
                "input_shape {:?} has a zero dimension",
                artifact.input_shape
            )));
        }
        if artifact.labels.is_empty() {
            return Err(ModelLoadError::Invalid("no labels".to_string()));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = artifact.labels.iter().find(|l| !seen.insert(l.as_str())) {
            return Err(ModelLoadError::Invalid(format!(
                "duplicate label '{}'",
                duplicate
            )));
        }
        if artifact.layers.is_empty() {
            return Err(ModelLoadError::Invalid("no layers".to_string()));
        }

        let mut expected_inputs = artifact.pooling.output_len(artifact.input_shape);
        let mut layers = Vec::with_capacity(artifact.layers.len());

        for (index, spec) in artifact.layers.into_iter().enumerate() {
            let outputs = spec.weights.len();
            if outputs == 0 {
                return Err(ModelLoadError::Invalid(format!("layer {} has no outputs", index)));
            }
            if let Some(row) = spec.weights.iter().position(|r| r.len() != expected_inputs) {
                return Err(ModelLoadError::Invalid(format!(
                    "layer {} row {} has {} inputs, expected {}",
                    index,
                    row,
                    spec.weights[row].len(),
                    expected_inputs
                )));
            }
            if spec.bias.len() != outputs {
                return Err(ModelLoadError::Invalid(format!(
                    "layer {} has {} biases for {} outputs",
                    index,
                    spec.bias.len(),
                    outputs
                )));
            }
            let all_finite = spec.weights.iter().flatten().all(|w| w.is_finite())
                && spec.bias.iter().all(|b| b.is_finite());
            if !all_finite {
                return Err(ModelLoadError::Invalid(format!(
                    "layer {} contains non-finite parameters",
                    index
                )));
            }

            let flat: Vec<f32> = spec.weights.into_iter().flatten().collect();
            let weights = Array2::from_shape_vec((outputs, expected_inputs), flat)
                .map_err(|e| ModelLoadError::Invalid(format!("layer {}: {}", index, e)))?;

            layers.push(DenseLayer {
                weights,
                bias: Array1::from(spec.bias),
                activation: spec.activation,
            });
            expected_inputs = outputs;
        }

        if expected_inputs != artifact.labels.len() {
            return Err(ModelLoadError::Invalid(format!(
                "final layer has {} outputs for {} labels",
                expected_inputs,
                artifact.labels.len()
            )));
        }

        Ok(Self {
            name: artifact.name,
            description: artifact.description,
            task: artifact.task,
            input_shape: artifact.input_shape,
            sample_rate: artifact.sample_rate,
            pooling: artifact.pooling,
            labels: artifact.labels,
            layers,
        })
    }

    /// Assert the extractor and the model agree on the feature layout
    pub fn check_compatible(
        &self,
        feature_shape: [usize; 2],
        sample_rate: u32,
    ) -> Result<(), ModelLoadError> {
        if feature_shape != self.input_shape {
            return Err(ModelLoadError::Invalid(format!(
                "model '{}' expects features of shape {:?}, extractor produces {:?}",
                self.name, self.input_shape, feature_shape
            )));
        }
        if let Some(expected) = self.sample_rate {
            if expected != sample_rate {
                return Err(ModelLoadError::Invalid(format!(
                    "model '{}' was trained at {} Hz, service decodes to {} Hz",
                    self.name, expected, sample_rate
                )));
            }
        }
        Ok(())
    }

    /// Score one feature matrix
    pub fn predict(&self, features: &FeatureVector) -> Result<Prediction, PredictError> {
        let actual = features.shape();
        if actual != self.input_shape {
            return Err(PredictError::ShapeMismatch {
                expected: self.input_shape,
                actual,
            });
        }

        let mut activations = self.pool(features.values());
        for layer in &self.layers {
            let mut z = layer.weights.dot(&activations) + &layer.bias;
            z.mapv_inplace(|v| layer.activation.apply(v));
            activations = z;
        }

        let probabilities = match self.task {
            Task::Classification => softmax(&activations),
            Task::MultiLabel => activations.mapv(artifact::sigmoid),
        };
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(PredictError::NonFinite);
        }

        let mut scores: Vec<LabelScore> = self
            .labels
            .iter()
            .zip(probabilities.iter())
            .map(|(label, &score)| LabelScore {
                label: label.clone(),
                score: score.clamp(0.0, 1.0),
            })
            .collect();
        // Stable: ties keep artifact label order
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));

        debug!(
            model = %self.name,
            label = %scores[0].label,
            score = scores[0].score,
            "Prediction"
        );

        Ok(Prediction { scores })
    }

    fn pool(&self, features: &Array2<f32>) -> Array1<f32> {
        match self.pooling {
            Pooling::Mean => mean_over_time(features),
            Pooling::MeanStd => {
                let mean = mean_over_time(features);
                let frames = features.ncols() as f32;
                let std: Array1<f32> = features
                    .axis_iter(Axis(0))
                    .zip(mean.iter())
                    .map(|(band, &m)| {
                        let var = band.iter().map(|&v| (v - m) * (v - m)).sum::<f32>() / frames;
                        var.sqrt()
                    })
                    .collect();
                let mut pooled = mean.to_vec();
                pooled.extend(std.iter());
                Array1::from(pooled)
            }
            Pooling::Flatten => features.iter().copied().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn input_shape(&self) -> [usize; 2] {
        self.input_shape
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Total weights and biases
    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.weights.len() + l.bias.len())
            .sum()
    }
}

fn mean_over_time(features: &Array2<f32>) -> Array1<f32> {
    features
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::zeros(features.nrows()))
}

/// Numerically stable softmax
fn softmax(logits: &Array1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
    let exp = logits.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}
