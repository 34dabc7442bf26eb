//! Short-time Fourier transform producing a power spectrogram

use ndarray::Array2;
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::f64::consts::PI;
use std::sync::Arc;

use super::FeatureError;

/// Centred STFT with a fixed plan and window
///
/// Immutable after construction; `power_spectrogram` allocates its own
/// scratch buffers so one instance can serve concurrent requests.
pub struct Stft {
    n_fft: usize,
    hop_length: usize,
    /// Periodic Hann of `win_length`, zero-padded to `n_fft` and centred
    window: Vec<f32>,
    fft: Arc<dyn RealToComplex<f32>>,
}

impl Stft {
    pub fn new(n_fft: usize, win_length: usize, hop_length: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);

        Self {
            n_fft,
            hop_length,
            window: padded_hann(win_length, n_fft),
            fft,
        }
    }

    /// Number of frequency bins (`n_fft / 2 + 1`)
    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Number of frames for a signal of `n_samples`
    pub fn n_frames(&self, n_samples: usize) -> usize {
        n_samples / self.hop_length + 1
    }

    /// `|X|²` with shape `[n_bins, n_frames]`
    ///
    /// The signal is reflect-padded by `n_fft / 2` on both sides, so frame `t`
    /// is centred on sample `t * hop_length`. Requires `signal.len() > n_fft / 2`.
    pub fn power_spectrogram(&self, signal: &[f32]) -> Result<Array2<f32>, FeatureError> {
        let padded = reflect_pad(signal, self.n_fft / 2);
        let n_frames = self.n_frames(signal.len());
        let mut power = Array2::<f32>::zeros((self.n_bins(), n_frames));

        let mut frame = self.fft.make_input_vec();
        let mut spectrum: Vec<Complex<f32>> = self.fft.make_output_vec();
        let mut scratch = self.fft.make_scratch_vec();

        for t in 0..n_frames {
            let start = t * self.hop_length;
            for ((dst, &src), &w) in frame
                .iter_mut()
                .zip(&padded[start..start + self.n_fft])
                .zip(&self.window)
            {
                *dst = src * w;
            }

            self.fft
                .process_with_scratch(&mut frame, &mut spectrum, &mut scratch)
                .map_err(|e| FeatureError::Internal(format!("FFT failed: {}", e)))?;

            for (k, bin) in spectrum.iter().enumerate() {
                power[[k, t]] = bin.norm_sqr();
            }
        }

        Ok(power)
    }
}

/// Periodic Hann window of `win_length`, centred in a zero buffer of `n_fft`
fn padded_hann(win_length: usize, n_fft: usize) -> Vec<f32> {
    let offset = (n_fft - win_length) / 2;
    let mut window = vec![0.0f32; n_fft];
    for i in 0..win_length {
        let phase = 2.0 * PI * i as f64 / win_length as f64;
        window[offset + i] = (0.5 * (1.0 - phase.cos())) as f32;
    }
    window
}

/// Mirror `pad` samples on each side, excluding the edge sample itself
fn reflect_pad(signal: &[f32], pad: usize) -> Vec<f32> {
    let n = signal.len();
    let mut padded = Vec::with_capacity(n + 2 * pad);
    padded.extend((1..=pad).rev().map(|i| signal[i]));
    padded.extend_from_slice(signal);
    padded.extend((0..pad).map(|i| signal[n - 2 - i]));
    padded
}
