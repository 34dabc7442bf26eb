//! Canonical audio representation shared between pipeline stages
//!
//! Every decoder backend produces a [`Waveform`] at the configured canonical
//! sample rate and channel layout, so downstream stages never have to handle
//! arbitrary rates or channel counts.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Canonical channel layout of a decoded waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    /// Single channel (multi-channel sources are averaged)
    #[default]
    Mono,
    /// Two interleaved channels (L, R)
    Stereo,
}

impl ChannelLayout {
    /// Number of interleaved channels
    pub fn count(self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelLayout::Mono => write!(f, "mono"),
            ChannelLayout::Stereo => write!(f, "stereo"),
        }
    }
}

/// Decoded PCM audio in canonical form
///
/// Samples are interleaved `f32`, nominally in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    samples: Vec<f32>,
    sample_rate: u32,
    layout: ChannelLayout,
}

impl Waveform {
    /// Create a waveform, checking that the sample count is a whole number of frames
    pub fn new(samples: Vec<f32>, sample_rate: u32, layout: ChannelLayout) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::InvalidInput("sample rate must be non-zero".to_string()));
        }
        if samples.len() % layout.count() != 0 {
            return Err(Error::InvalidInput(format!(
                "{} samples is not a whole number of {} frames",
                samples.len(),
                layout
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
            layout,
        })
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.layout.count()
    }

    /// Duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Mono view of the samples (channel average for stereo)
    pub fn to_mono(&self) -> Vec<f32> {
        match self.layout {
            ChannelLayout::Mono => self.samples.clone(),
            ChannelLayout::Stereo => self
                .samples
                .chunks_exact(2)
                .map(|frame| (frame[0] + frame[1]) * 0.5)
                .collect(),
        }
    }

    /// Consume the waveform, returning the interleaved samples
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_partial_frames() {
        let result = Waveform::new(vec![0.0; 3], 16000, ChannelLayout::Stereo);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_rejects_zero_rate() {
        assert!(Waveform::new(vec![0.0; 4], 0, ChannelLayout::Mono).is_err());
    }

    #[test]
    fn test_duration_and_frames() {
        let wave = Waveform::new(vec![0.0; 32000], 16000, ChannelLayout::Stereo).unwrap();
        assert_eq!(wave.frames(), 16000);
        assert!((wave.duration_seconds() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_stereo_downmix_averages_channels() {
        let wave =
            Waveform::new(vec![1.0, 0.0, 0.5, -0.5], 8000, ChannelLayout::Stereo).unwrap();
        assert_eq!(wave.to_mono(), vec![0.5, 0.0]);
    }

    #[test]
    fn test_layout_serde_names() {
        assert_eq!(ChannelLayout::Mono.to_string(), "mono");
        assert_eq!(ChannelLayout::Stereo.count(), 2);
    }
}
