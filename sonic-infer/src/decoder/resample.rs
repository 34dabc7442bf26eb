//! Channel layout normalization and sample-rate conversion
//!
//! Both steps are pure functions of their input, so a given byte stream
//! always decodes to bit-identical canonical samples.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use sonic_common::ChannelLayout;
use tracing::debug;

use super::DecodeError;

/// Convert interleaved samples with `channels` channels to the target layout
///
/// Mono targets average all source channels. Stereo targets keep the first two
/// channels and duplicate mono sources.
pub fn to_layout(interleaved: &[f32], channels: usize, target: ChannelLayout) -> Vec<f32> {
    if channels == 0 {
        return Vec::new();
    }
    let frames = interleaved.chunks_exact(channels);

    match target {
        ChannelLayout::Mono if channels == 1 => interleaved.to_vec(),
        ChannelLayout::Mono => {
            let scale = 1.0 / channels as f32;
            frames.map(|frame| frame.iter().sum::<f32>() * scale).collect()
        }
        ChannelLayout::Stereo => {
            let mut output = Vec::with_capacity(interleaved.len() / channels * 2);
            for frame in frames {
                let left = frame[0];
                let right = if channels > 1 { frame[1] } else { frame[0] };
                output.push(left);
                output.push(right);
            }
            output
        }
    }
}

/// Resample interleaved PCM from `source_rate` to `target_rate`
///
/// High-quality sinc interpolation with fixed parameters (256 taps,
/// BlackmanHarris2 window, 0.95 cutoff), processed as a single chunk.
pub fn resample(
    interleaved: Vec<f32>,
    channels: usize,
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>, DecodeError> {
    if source_rate == target_rate || interleaved.is_empty() || channels == 0 {
        return Ok(interleaved);
    }

    let num_frames = interleaved.len() / channels;

    // De-interleave into per-channel buffers
    let mut planar: Vec<Vec<f32>> = (0..channels)
        .map(|_| Vec::with_capacity(num_frames))
        .collect();
    for frame in interleaved.chunks_exact(channels) {
        for (channel, &sample) in planar.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = target_rate as f64 / source_rate as f64;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, num_frames, channels)
        .map_err(|e| DecodeError::Internal(format!("Failed to create resampler: {}", e)))?;

    let output = resampler
        .process(&planar, None)
        .map_err(|e| DecodeError::Internal(format!("Resampling failed: {}", e)))?;

    let output_frames = output.first().map(Vec::len).unwrap_or(0);
    let mut interleaved = Vec::with_capacity(output_frames * channels);
    for i in 0..output_frames {
        for channel in &output {
            interleaved.push(channel[i]);
        }
    }

    debug!(
        "Resampled {} frames ({} Hz) → {} frames ({} Hz)",
        num_frames, source_rate, output_frames, target_rate
    );

    Ok(interleaved)
}
