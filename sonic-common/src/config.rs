//! Service configuration loading and validation
//!
//! Configuration is fixed at startup and never supplied per request.
//! The file location is resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config directory (`<config_dir>/sonic/sonic-infer.toml`)
//! 4. Compiled defaults (fallback)

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::audio::ChannelLayout;
use crate::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SONIC_CONFIG";

/// Complete service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub features: FeatureConfig,
    pub decoder: DecoderConfig,
    pub model: ModelConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address
    pub bind: SocketAddr,
    /// Largest accepted request body in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5780)),
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }
}

/// Canonical waveform shape produced by every decoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AudioConfig {
    /// Target sample rate in Hz
    pub sample_rate: u32,
    /// Target channel layout
    pub channels: ChannelLayout,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: ChannelLayout::Mono,
        }
    }
}

/// Log-mel spectrogram parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureConfig {
    /// FFT size in samples
    pub n_fft: usize,
    /// Analysis window length in samples (<= n_fft)
    pub win_length: usize,
    /// Hop between frames in samples
    pub hop_length: usize,
    /// Number of mel bands
    pub n_mels: usize,
    /// Lowest filterbank frequency in Hz
    pub f_min: f32,
    /// Highest filterbank frequency in Hz (defaults to Nyquist)
    pub f_max: Option<f32>,
    /// Audio is truncated or zero-padded to exactly this many seconds
    pub chunk_seconds: f32,
    /// Shorter waveforms are rejected
    pub min_duration_ms: u32,
    /// Log-mel floor below the peak, in decades (8.0 = 80 dB)
    pub dynamic_range: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            n_fft: 400,
            win_length: 400,
            hop_length: 160,
            n_mels: 80,
            f_min: 0.0,
            f_max: None,
            chunk_seconds: 30.0,
            min_duration_ms: 500,
            dynamic_range: 8.0,
        }
    }
}

impl FeatureConfig {
    /// Fixed number of samples fed to the STFT
    pub fn chunk_samples(&self, sample_rate: u32) -> usize {
        (self.chunk_seconds as f64 * sample_rate as f64).round() as usize
    }

    /// Minimum number of frames accepted before padding
    pub fn min_samples(&self, sample_rate: u32) -> usize {
        (self.min_duration_ms as u64 * sample_rate as u64).div_ceil(1000) as usize
    }

    /// Number of STFT frames produced for one chunk
    pub fn n_frames(&self, sample_rate: u32) -> usize {
        self.chunk_samples(sample_rate) / self.hop_length + 1
    }

    /// Upper filterbank edge after applying the Nyquist default
    pub fn effective_f_max(&self, sample_rate: u32) -> f32 {
        self.f_max.unwrap_or(sample_rate as f32 / 2.0)
    }

    /// Feature matrix shape `[n_mels, n_frames]`
    pub fn output_shape(&self, sample_rate: u32) -> [usize; 2] {
        [self.n_mels, self.n_frames(sample_rate)]
    }
}

/// Decoder backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecoderConfig {
    /// External decoder binary; `None` disables the subprocess fallback
    pub ffmpeg_path: Option<PathBuf>,
    /// Upper bound on one external decode, in milliseconds
    pub timeout_ms: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: Some(PathBuf::from("ffmpeg")),
            timeout_ms: 15_000,
        }
    }
}

impl DecoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Model artifact location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Path to the JSON model artifact
    pub path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/model.json"),
        }
    }
}

impl ServiceConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Read configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read config {} failed: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Resolve and load the configuration file
    ///
    /// An explicitly named file (CLI or environment) must exist. The platform
    /// default location is optional; when it is absent compiled defaults are used.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            ConfigSource::Explicit(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)
            }
            ConfigSource::Platform(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)
            }
            ConfigSource::Platform(path) => {
                warn!(
                    "No configuration at {}, using compiled defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            ConfigSource::Defaults => {
                warn!("No configuration directory available, using compiled defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check every startup invariant that does not depend on the model artifact
    pub fn validate(&self) -> Result<()> {
        let sr = self.audio.sample_rate;
        let f = &self.features;

        if sr == 0 {
            return Err(Error::Config("audio.sample_rate must be non-zero".to_string()));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(Error::Config(
                "server.max_upload_bytes must be non-zero".to_string(),
            ));
        }
        if f.n_fft < 2 || f.n_fft % 2 != 0 {
            return Err(Error::Config(format!(
                "features.n_fft must be an even number of at least 2, got {}",
                f.n_fft
            )));
        }
        if f.win_length == 0 || f.win_length > f.n_fft {
            return Err(Error::Config(format!(
                "features.win_length must be in 1..={} (n_fft), got {}",
                f.n_fft, f.win_length
            )));
        }
        if f.hop_length == 0 {
            return Err(Error::Config("features.hop_length must be non-zero".to_string()));
        }
        if f.n_mels == 0 || f.n_mels > f.n_fft / 2 + 1 {
            return Err(Error::Config(format!(
                "features.n_mels must be in 1..={} (n_fft / 2 + 1), got {}",
                f.n_fft / 2 + 1,
                f.n_mels
            )));
        }
        let f_max = f.effective_f_max(sr);
        if !(f.f_min >= 0.0 && f.f_min < f_max) {
            return Err(Error::Config(format!(
                "features.f_min ({}) must be non-negative and below f_max ({})",
                f.f_min, f_max
            )));
        }
        if f_max > sr as f32 / 2.0 {
            return Err(Error::Config(format!(
                "features.f_max ({}) exceeds Nyquist ({})",
                f_max,
                sr as f32 / 2.0
            )));
        }
        if !(f.dynamic_range > 0.0 && f.dynamic_range.is_finite()) {
            return Err(Error::Config(
                "features.dynamic_range must be positive".to_string(),
            ));
        }
        if !(f.chunk_seconds > 0.0 && f.chunk_seconds.is_finite()) {
            return Err(Error::Config("features.chunk_seconds must be positive".to_string()));
        }
        let chunk = f.chunk_samples(sr);
        if chunk <= f.n_fft / 2 {
            return Err(Error::Config(format!(
                "features.chunk_seconds yields {} samples, need more than {}",
                chunk,
                f.n_fft / 2
            )));
        }
        let min = f.min_samples(sr);
        if min < f.win_length {
            return Err(Error::Config(format!(
                "features.min_duration_ms yields {} samples, shorter than one window ({})",
                min, f.win_length
            )));
        }
        if min > chunk {
            return Err(Error::Config(
                "features.min_duration_ms exceeds features.chunk_seconds".to_string(),
            ));
        }
        if self.decoder.timeout_ms == 0 {
            return Err(Error::Config("decoder.timeout_ms must be non-zero".to_string()));
        }
        if self.model.path.as_os_str().is_empty() {
            return Err(Error::Config("model.path must be set".to_string()));
        }

        Ok(())
    }
}

/// Where the configuration file was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Named on the command line or in the environment
    Explicit(PathBuf),
    /// Platform default location (may not exist)
    Platform(PathBuf),
    /// No location could be determined
    Defaults,
}

/// Resolve the configuration file location by priority
pub fn resolve_config_path(cli_path: Option<&Path>) -> ConfigSource {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        return ConfigSource::Explicit(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return ConfigSource::Explicit(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    match dirs::config_dir() {
        Some(dir) => ConfigSource::Platform(dir.join("sonic").join("sonic-infer.toml")),
        None => ConfigSource::Defaults,
    }
}
