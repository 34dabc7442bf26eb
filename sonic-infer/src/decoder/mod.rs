//! Media decoding: arbitrary consumer audio bytes → canonical waveform
//!
//! Decoding is a capability behind the [`MediaDecoder`] trait so the
//! orchestrator never knows whether samples came from the in-process
//! symphonia backend or from an external ffmpeg subprocess.
//!
//! # Backends
//! - [`NativeDecoder`]: pure Rust (WAV, FLAC, MP3, AAC/M4A, Vorbis, ALAC, ...)
//! - [`FfmpegDecoder`]: subprocess for codecs symphonia lacks (Opus, AMR, WMA, ...)
//! - [`FallbackDecoder`]: native first, ffmpeg on `UnsupportedFormat`
//!
//! # Output bound
//! Both backends stop after a configured duration (see [`decode_limit`]).
//! Highly compressed input can otherwise expand to gigabytes of samples.

mod fallback;
mod ffmpeg;
mod native;
pub mod resample;
pub mod sniff;

pub use fallback::FallbackDecoder;
pub use ffmpeg::FfmpegDecoder;
pub use native::NativeDecoder;
pub use sniff::{ContainerHint, ResolvedHint};

use async_trait::async_trait;
use serde::Serialize;
use sonic_common::config::{AudioConfig, DecoderConfig};
use sonic_common::Waveform;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Audio decoded past the end of the feature window
pub const DECODE_MARGIN: Duration = Duration::from_secs(1);

/// Longest waveform worth decoding when features cover `chunk_seconds`
pub fn decode_limit(chunk_seconds: f32) -> Duration {
    Duration::try_from_secs_f64(chunk_seconds as f64)
        .unwrap_or(Duration::ZERO)
        .saturating_add(DECODE_MARGIN)
}

/// Whole frames covering `limit` at `sample_rate`
pub(crate) fn frame_cap(limit: Duration, sample_rate: u32) -> usize {
    (limit.as_secs_f64() * sample_rate as f64).ceil() as usize
}

/// Decoder errors
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Container or codec not recognized or not decodable
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Recognized container with an invalid or truncated stream
    #[error("Corrupt audio stream: {0}")]
    CorruptInput(String),

    /// External decoder exceeded its time budget
    #[error("Audio decoding timed out after {0:?}")]
    Timeout(Duration),

    /// Backend cannot run at all (e.g. binary not installed)
    #[error("Decoder backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Unexpected failure inside the decoder
    #[error("Decoder failure: {0}")]
    Internal(String),
}

/// Audio bytes as received, plus whatever the caller told us about them
///
/// Cheap to clone; the bytes are shared, never copied per backend attempt.
#[derive(Debug, Clone)]
pub struct RawAudioPayload {
    bytes: Arc<[u8]>,
    hint: ContainerHint,
}

impl RawAudioPayload {
    pub fn new(bytes: impl Into<Arc<[u8]>>, hint: ContainerHint) -> Self {
        Self {
            bytes: bytes.into(),
            hint,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Shared handle to the bytes, for moving into blocking tasks
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn hint(&self) -> &ContainerHint {
        &self.hint
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Declared hints first, magic-byte sniffing as a fallback
    pub fn resolve_hint(&self) -> ResolvedHint {
        self.hint.resolve(&self.bytes)
    }
}

/// Where a decoded waveform came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceInfo {
    /// Backend that produced the waveform ("symphonia" or "ffmpeg")
    pub backend: &'static str,
    /// Container extension, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Codec short name, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    /// Sample rate before resampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_sample_rate: Option<u32>,
    /// Channel count before layout normalization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_channels: Option<usize>,
    /// Decoding stopped at the duration limit
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// Canonical waveform plus provenance
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub waveform: Waveform,
    pub source: SourceInfo,
}

/// Decode capability used by the inference pipeline
///
/// Implementations must be deterministic: the same payload always yields the
/// same samples. Output is always at the canonical rate and layout.
#[async_trait]
pub trait MediaDecoder: Send + Sync {
    /// Backend name for logs and provenance
    fn name(&self) -> &'static str;

    /// Decode the payload into a canonical waveform
    async fn decode(&self, payload: &RawAudioPayload) -> Result<DecodedAudio, DecodeError>;
}

/// Build the decoder chain described by the configuration
///
/// Every backend stops once it has produced `max_duration` of audio.
pub fn build_decoder(
    audio: &AudioConfig,
    decoder: &DecoderConfig,
    max_duration: Duration,
) -> Arc<dyn MediaDecoder> {
    let native =
        NativeDecoder::new(audio.sample_rate, audio.channels).with_max_duration(max_duration);

    match &decoder.ffmpeg_path {
        Some(program) => {
            info!(
                program = %program.display(),
                timeout_ms = decoder.timeout_ms,
                max_duration_s = max_duration.as_secs_f64(),
                "External decoder fallback enabled"
            );
            let ffmpeg = FfmpegDecoder::new(
                program.clone(),
                audio.sample_rate,
                audio.channels,
                decoder.timeout(),
            )
            .with_max_duration(max_duration);
            Arc::new(FallbackDecoder::new(Box::new(native), Box::new(ffmpeg)))
        }
        None => {
            info!("External decoder fallback disabled");
            Arc::new(native)
        }
    }
}
