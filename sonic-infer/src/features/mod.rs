//! Feature extraction: canonical waveform → fixed-shape log-mel matrix
//!
//! # Pipeline
//! 1. Downmix to mono
//! 2. Reject clips shorter than `min_duration_ms`
//! 3. Truncate or zero-pad to exactly `chunk_seconds`
//! 4. Centred STFT (periodic Hann, reflect padding) → power spectrum
//! 5. Slaney mel filterbank
//! 6. `log10`, floor at `max - dynamic_range`, rescale with `(x + 4) / 4`
//!
//! The output shape depends only on configuration, never on the input, and the
//! same waveform always yields bit-identical features.

pub mod mel;
pub mod stft;

use ndarray::Array2;
use sonic_common::config::{AudioConfig, FeatureConfig};
use sonic_common::Waveform;
use thiserror::Error;
use tracing::debug;

use self::stft::Stft;

/// Power floor before taking the logarithm
const LOG_FLOOR: f32 = 1e-10;

/// Feature extraction errors
#[derive(Debug, Error)]
pub enum FeatureError {
    /// Clip is shorter than the configured minimum
    #[error("Audio too short: {actual_ms} ms, need at least {min_ms} ms")]
    InsufficientAudio { actual_ms: u64, min_ms: u32 },

    /// Waveform did not come out of the decoder at the canonical rate
    #[error("Waveform sample rate {actual} Hz does not match feature rate {expected} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    /// Extractor parameters cannot produce features
    #[error("Invalid feature configuration: {0}")]
    Config(String),

    #[error("Feature extraction failure: {0}")]
    Internal(String),
}

/// Log-mel matrix with shape `[n_mels, n_frames]`
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Array2<f32>);

impl FeatureVector {
    pub fn new(values: Array2<f32>) -> Self {
        Self(values)
    }

    /// `[n_mels, n_frames]`
    pub fn shape(&self) -> [usize; 2] {
        let (rows, cols) = self.0.dim();
        [rows, cols]
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.0
    }

    pub fn into_inner(self) -> Array2<f32> {
        self.0
    }
}

/// Log-mel spectrogram extractor
///
/// Window, FFT plan and filterbank are built once; `extract` takes `&self` and
/// is safe to call from many threads at once.
pub struct FeatureExtractor {
    sample_rate: u32,
    chunk_samples: usize,
    min_samples: usize,
    min_duration_ms: u32,
    dynamic_range: f32,
    output_shape: [usize; 2],
    stft: Stft,
    /// `[n_mels, n_fft / 2 + 1]`
    filterbank: Array2<f32>,
}

impl FeatureExtractor {
    pub fn new(audio: &AudioConfig, features: &FeatureConfig) -> Result<Self, FeatureError> {
        let sample_rate = audio.sample_rate;
        let chunk_samples = features.chunk_samples(sample_rate);

        if sample_rate == 0 || features.hop_length == 0 || features.n_mels == 0 {
            return Err(FeatureError::Config(
                "sample rate, hop length and mel count must be non-zero".to_string(),
            ));
        }
        if features.n_fft < 2 || features.n_fft % 2 != 0 {
            return Err(FeatureError::Config(format!(
                "n_fft must be even, got {}",
                features.n_fft
            )));
        }
        if features.win_length == 0 || features.win_length > features.n_fft {
            return Err(FeatureError::Config(format!(
                "win_length {} must be in 1..={}",
                features.win_length, features.n_fft
            )));
        }
        if chunk_samples <= features.n_fft / 2 {
            return Err(FeatureError::Config(format!(
                "chunk of {} samples is too short for n_fft {}",
                chunk_samples, features.n_fft
            )));
        }

        let stft = Stft::new(features.n_fft, features.win_length, features.hop_length);
        let filterbank = mel::filterbank(
            sample_rate,
            features.n_fft,
            features.n_mels,
            features.f_min as f64,
            features.effective_f_max(sample_rate) as f64,
        );

        let output_shape = features.output_shape(sample_rate);
        debug!(
            sample_rate,
            n_fft = features.n_fft,
            hop_length = features.hop_length,
            n_mels = features.n_mels,
            ?output_shape,
            "Feature extractor ready"
        );

        Ok(Self {
            sample_rate,
            chunk_samples,
            min_samples: features.min_samples(sample_rate),
            min_duration_ms: features.min_duration_ms,
            dynamic_range: features.dynamic_range,
            output_shape,
            stft,
            filterbank,
        })
    }

    /// Shape of every feature matrix this extractor produces
    pub fn output_shape(&self) -> [usize; 2] {
        self.output_shape
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Compute the log-mel matrix for one waveform
    pub fn extract(&self, waveform: &Waveform) -> Result<FeatureVector, FeatureError> {
        if waveform.sample_rate() != self.sample_rate {
            return Err(FeatureError::SampleRateMismatch {
                expected: self.sample_rate,
                actual: waveform.sample_rate(),
            });
        }

        let mut mono = waveform.to_mono();
        if mono.len() < self.min_samples {
            return Err(FeatureError::InsufficientAudio {
                actual_ms: mono.len() as u64 * 1000 / self.sample_rate as u64,
                min_ms: self.min_duration_ms,
            });
        }
        mono.resize(self.chunk_samples, 0.0);

        let power = self.stft.power_spectrogram(&mono)?;
        let mut log_mel = self.filterbank.dot(&power);

        log_mel.mapv_inplace(|v| v.max(LOG_FLOOR).log10());
        let peak = log_mel.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        let floor = peak - self.dynamic_range;
        log_mel.mapv_inplace(|v| (v.max(floor) + 4.0) / 4.0);

        Ok(FeatureVector(log_mel))
    }
}
