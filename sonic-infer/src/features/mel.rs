//! Slaney-style mel filterbank

use ndarray::Array2;

/// Linear region slope: 200/3 Hz per mel
const F_SP: f64 = 200.0 / 3.0;
/// Start of the logarithmic region
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

/// Hz → mel (linear below 1 kHz, logarithmic above)
pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

/// Mel → Hz
pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Triangular filters with area normalization, shape `[n_mels, n_fft / 2 + 1]`
///
/// Band edges are spaced evenly on the mel scale between `f_min` and `f_max`;
/// each filter is scaled by `2 / (upper_edge - lower_edge)` so all bands
/// carry roughly constant energy per Hz.
pub fn filterbank(
    sample_rate: u32,
    n_fft: usize,
    n_mels: usize,
    f_min: f64,
    f_max: f64,
) -> Array2<f32> {
    let n_bins = n_fft / 2 + 1;
    let bin_hz: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let mel_lo = hz_to_mel(f_min);
    let mel_hi = hz_to_mel(f_max);
    let edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_lo + (mel_hi - mel_lo) * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut weights = Array2::<f32>::zeros((n_mels, n_bins));
    for band in 0..n_mels {
        let (left, centre, right) = (edges[band], edges[band + 1], edges[band + 2]);
        let enorm = 2.0 / (right - left);

        for (k, &hz) in bin_hz.iter().enumerate() {
            let rising = (hz - left) / (centre - left);
            let falling = (right - hz) / (right - centre);
            let w = rising.min(falling).max(0.0);
            weights[[band, k]] = (w * enorm) as f32;
        }
    }

    weights
}
