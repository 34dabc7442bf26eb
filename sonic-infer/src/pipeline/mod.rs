//! Inference orchestration: bytes → waveform → features → prediction
//!
//! [`InferencePipeline`] owns the three resident components and runs one
//! request through them in order. It holds no per-request state; everything a
//! request allocates (payload, waveform, scratch files, subprocesses) is owned
//! by that request's future and released when it finishes or is dropped.

pub mod state;

use serde::Serialize;
use sonic_common::config::ServiceConfig;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::decoder::{build_decoder, decode_limit, MediaDecoder, RawAudioPayload, SourceInfo};
use crate::error::{ErrorKind, InferenceError};
use crate::features::FeatureExtractor;
use crate::model::{LabelScore, ModelHost};
use self::state::{InferenceRequest, RequestStage, StageTimings};

/// Scores returned when the caller does not ask for a specific count
pub const DEFAULT_TOP_K: usize = 5;

/// Output-format hints supplied with a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PredictOptions {
    /// Number of scores to return; clamped to `1..=label_count`
    pub top_k: Option<usize>,
}

/// What was decoded, for the response
#[derive(Debug, Clone, Serialize)]
pub struct AudioSummary {
    #[serde(flatten)]
    pub source: SourceInfo,
    pub duration_seconds: f64,
}

/// Successful inference
#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    pub request_id: Uuid,
    pub model: String,
    pub label: String,
    /// Score of `label`, in `[0, 1]`
    pub confidence: f32,
    /// Highest scores first
    pub scores: Vec<LabelScore>,
    pub audio: AudioSummary,
    pub timings_ms: StageTimings,
}

/// Decoder, extractor and model wired together
pub struct InferencePipeline {
    decoder: Arc<dyn MediaDecoder>,
    extractor: Arc<FeatureExtractor>,
    model: Arc<ModelHost>,
}

impl InferencePipeline {
    /// Assemble a pipeline, asserting the extractor output fits the model input
    pub fn new(
        decoder: Arc<dyn MediaDecoder>,
        extractor: Arc<FeatureExtractor>,
        model: Arc<ModelHost>,
    ) -> Result<Self, InferenceError> {
        model.check_compatible(extractor.output_shape(), extractor.sample_rate())?;

        Ok(Self {
            decoder,
            extractor,
            model,
        })
    }

    /// Load the model and build every component from validated configuration
    pub fn from_config(config: &ServiceConfig) -> Result<Self, InferenceError> {
        let model = ModelHost::load(&config.model.path)?;
        let extractor = FeatureExtractor::new(&config.audio, &config.features)?;
        let decoder = build_decoder(
            &config.audio,
            &config.decoder,
            decode_limit(config.features.chunk_seconds),
        );

        Self::new(decoder, Arc::new(extractor), Arc::new(model))
    }

    pub fn model(&self) -> &ModelHost {
        &self.model
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn decoder(&self) -> &dyn MediaDecoder {
        self.decoder.as_ref()
    }

    /// Run one request end to end
    pub async fn infer(
        &self,
        payload: RawAudioPayload,
        options: PredictOptions,
    ) -> Result<PredictionResult, InferenceError> {
        let mut request = InferenceRequest::new();
        let span = info_span!(
            "inference",
            request_id = %request.request_id(),
            bytes = payload.len()
        );

        async move {
            match self.run(&mut request, payload, options).await {
                Ok(result) => {
                    info!(
                        label = %result.label,
                        confidence = result.confidence,
                        total_ms = result.timings_ms.total,
                        "Inference completed"
                    );
                    Ok(result)
                }
                Err(err) => {
                    let kind = err.kind();
                    let failed_in = request.stage();
                    if let Err(transition) = request.transition_to(RequestStage::Failed(kind)) {
                        warn!("{}", transition);
                    }
                    match kind {
                        ErrorKind::InternalError | ErrorKind::ShapeMismatch => {
                            error!(stage = ?failed_in, kind = ?kind, "Inference failed: {}", err);
                        }
                        _ => {
                            info!(stage = ?failed_in, kind = ?kind, "Inference rejected: {}", err);
                        }
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request: &mut InferenceRequest,
        payload: RawAudioPayload,
        options: PredictOptions,
    ) -> Result<PredictionResult, InferenceError> {
        request.transition_to(RequestStage::Decoding)?;
        let decoded = self.decoder.decode(&payload).await?;
        drop(payload);
        request.transition_to(RequestStage::Decoded)?;

        let duration_seconds = decoded.waveform.duration_seconds();
        let source = decoded.source;
        let waveform = decoded.waveform;

        request.transition_to(RequestStage::ExtractingFeatures)?;
        let extractor = Arc::clone(&self.extractor);
        let features = tokio::task::spawn_blocking(move || extractor.extract(&waveform))
            .await
            .map_err(|e| InferenceError::Internal(format!("feature task failed: {}", e)))??;
        request.transition_to(RequestStage::Featurized)?;

        request.transition_to(RequestStage::Predicting)?;
        let model = Arc::clone(&self.model);
        let prediction = tokio::task::spawn_blocking(move || model.predict(&features))
            .await
            .map_err(|e| InferenceError::Internal(format!("prediction task failed: {}", e)))??;
        request.transition_to(RequestStage::Completed)?;

        let top_k = options
            .top_k
            .unwrap_or(DEFAULT_TOP_K)
            .clamp(1, self.model.labels().len());
        let top = prediction.top();

        Ok(PredictionResult {
            request_id: request.request_id(),
            model: self.model.name().to_string(),
            label: top.label.clone(),
            confidence: top.score,
            scores: prediction.top_k(top_k).to_vec(),
            audio: AudioSummary {
                source,
                duration_seconds,
            },
            timings_ms: request.timings(),
        })
    }
}
