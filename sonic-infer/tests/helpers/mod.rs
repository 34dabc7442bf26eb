//! Test Helper Utilities
//!
//! Shared fixtures for sonic-infer integration tests: generated WAV payloads,
//! a small model artifact, and a matching feature configuration.

#![allow(dead_code)]

use serde_json::{json, Value};
use sonic_common::config::{FeatureConfig, ServiceConfig};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sonic_infer::decoder::{MediaDecoder, NativeDecoder};
use sonic_infer::features::FeatureExtractor;
use sonic_infer::model::ModelHost;
use sonic_infer::InferencePipeline;

pub const SAMPLE_RATE: u32 = 16000;

/// Labels of the fixture model
pub const LABELS: [&str; 3] = ["silence", "speech", "music"];

/// Feature shape for [`test_config`]: 8 mel bands × (3 s / 10 ms + 1) frames
pub const INPUT_SHAPE: [usize; 2] = [8, 301];

/// Small configuration so tests stay fast: 8 mels over 3-second chunks,
/// external decoder disabled
pub fn test_config(model_path: &Path) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.features = FeatureConfig {
        n_mels: 8,
        chunk_seconds: 3.0,
        ..FeatureConfig::default()
    };
    config.decoder.ffmpeg_path = None;
    config.model.path = model_path.to_path_buf();
    config
}

/// Deterministic pseudo-weights
fn weights(rows: usize, cols: usize, seed: usize) -> Vec<Vec<f32>> {
    (0..rows)
        .map(|r| {
            (0..cols)
                .map(|c| ((r * cols + c + seed) % 7) as f32 * 0.1 - 0.3)
                .collect()
        })
        .collect()
}

/// Two-layer classifier over `mean_std` pooled features
pub fn fixture_artifact(input_shape: [usize; 2]) -> Value {
    let pooled = input_shape[0] * 2;
    json!({
        "format_version": 1,
        "name": "fixture-events",
        "description": "Integration test model",
        "task": "classification",
        "input_shape": input_shape,
        "sample_rate": SAMPLE_RATE,
        "pooling": "mean_std",
        "labels": LABELS,
        "layers": [
            {
                "weights": weights(4, pooled, 1),
                "bias": [0.1, -0.1, 0.05, 0.0],
                "activation": "relu"
            },
            {
                "weights": weights(LABELS.len(), 4, 3),
                "bias": [0.2, 0.0, -0.2],
                "activation": "linear"
            }
        ]
    })
}

/// Write an artifact to `dir/model.json`
pub fn write_artifact(dir: &Path, artifact: &Value) -> PathBuf {
    let path = dir.join("model.json");
    std::fs::write(&path, serde_json::to_vec_pretty(artifact).unwrap()).unwrap();
    path
}

/// Pipeline built from [`test_config`] with the fixture model on disk
pub fn build_pipeline(dir: &Path) -> InferencePipeline {
    let path = write_artifact(dir, &fixture_artifact(INPUT_SHAPE));
    InferencePipeline::from_config(&test_config(&path)).unwrap()
}

/// Pipeline with a caller-supplied decoder and the fixture model
pub fn pipeline_with_decoder(dir: &Path, decoder: Arc<dyn MediaDecoder>) -> InferencePipeline {
    let path = write_artifact(dir, &fixture_artifact(INPUT_SHAPE));
    let config = test_config(&path);
    let extractor = FeatureExtractor::new(&config.audio, &config.features).unwrap();
    let model = ModelHost::load(&path).unwrap();
    InferencePipeline::new(decoder, Arc::new(extractor), Arc::new(model)).unwrap()
}

pub fn native_decoder() -> Arc<dyn MediaDecoder> {
    Arc::new(NativeDecoder::new(
        SAMPLE_RATE,
        sonic_common::ChannelLayout::Mono,
    ))
}

/// 16-bit PCM WAV file contents
pub fn wav_bytes(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer
                .write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Mono silence
pub fn silence_wav(seconds: f32, sample_rate: u32) -> Vec<u8> {
    let n = (seconds * sample_rate as f32) as usize;
    wav_bytes(&vec![0.0; n], sample_rate, 1)
}

/// Mono sine tone at half scale
pub fn tone_wav(hz: f32, seconds: f32, sample_rate: u32) -> Vec<u8> {
    let n = (seconds * sample_rate as f32) as usize;
    let samples: Vec<f32> = (0..n)
        .map(|i| 0.5 * (2.0 * std::f32::consts::PI * hz * i as f32 / sample_rate as f32).sin())
        .collect();
    wav_bytes(&samples, sample_rate, 1)
}

/// Executable shell script standing in for ffmpeg
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
