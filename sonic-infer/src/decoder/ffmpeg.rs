//! External decoding through an ffmpeg subprocess
//!
//! Used for codecs the native backend cannot handle (Opus, AMR, WMA, ...).
//! The payload is written to a scratch file rather than piped, because MP4
//! files from phone recorders often carry their index at the end and cannot
//! be demuxed from a non-seekable pipe.
//!
//! # Resource handling
//! - The scratch file is a `NamedTempFile`, removed when it goes out of scope.
//! - The child is spawned with `kill_on_drop`, so a timeout or a dropped
//!   request future kills the subprocess instead of leaking it.
//! - Output is read up to the duration limit; at the limit the child is
//!   killed rather than drained.

use async_trait::async_trait;
use sonic_common::{ChannelLayout, Waveform};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::{frame_cap, DecodeError, DecodedAudio, MediaDecoder, RawAudioPayload, SourceInfo};

/// Scratch file suffix when nothing is known about the payload
const DEFAULT_EXTENSION: &str = "m4a";

/// Stderr fragments meaning "ffmpeg could not identify or open this input"
const UNSUPPORTED_MARKERS: &[&str] = &[
    "Invalid data found when processing input",
    "could not find codec parameters",
    "Unknown input format",
    "does not contain any stream",
    "Decoder not found",
    "unsupported codec",
];

/// Longest stderr excerpt carried into an error message
const STDERR_EXCERPT_LEN: usize = 400;

/// Subprocess decoder
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    /// ffmpeg executable (name on PATH or absolute path)
    program: PathBuf,
    /// Canonical output sample rate
    target_sample_rate: u32,
    /// Canonical output channel layout
    target_layout: ChannelLayout,
    /// Upper bound on one decode
    timeout: Duration,
    /// Audio past this point is not read
    max_duration: Option<Duration>,
}

/// What one subprocess run left behind
struct RunOutput {
    status: ExitStatus,
    pcm: Vec<u8>,
    stderr: Vec<u8>,
    /// Output reached the byte cap and the child was killed
    capped: bool,
}

impl FfmpegDecoder {
    pub fn new(
        program: PathBuf,
        target_sample_rate: u32,
        target_layout: ChannelLayout,
        timeout: Duration,
    ) -> Self {
        Self {
            program,
            target_sample_rate,
            target_layout,
            timeout,
            max_duration: None,
        }
    }

    /// Stop decoding once `limit` of audio has been produced
    pub fn with_max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    /// Byte budget for raw f32 output, in whole frames
    fn output_cap(&self) -> Option<u64> {
        self.max_duration.map(|limit| {
            let frames = frame_cap(limit, self.target_sample_rate);
            (frames * self.target_layout.count() * std::mem::size_of::<f32>()) as u64
        })
    }

    fn command(&self, input: &std::path::Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("-nostdin")
            .arg("-hide_banner")
            .args(["-loglevel", "error"])
            .arg("-i")
            .arg(input);
        if let Some(limit) = self.max_duration {
            command.arg("-t").arg(format!("{:.3}", limit.as_secs_f64()));
        }
        command
            .arg("-vn")
            .args(["-f", "f32le", "-acodec", "pcm_f32le"])
            .arg("-ac")
            .arg(self.target_layout.count().to_string())
            .arg("-ar")
            .arg(self.target_sample_rate.to_string())
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl MediaDecoder for FfmpegDecoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn decode(&self, payload: &RawAudioPayload) -> Result<DecodedAudio, DecodeError> {
        let hint = payload.resolve_hint();
        let extension = hint.extension.as_deref().unwrap_or(DEFAULT_EXTENSION);

        let scratch = tempfile::Builder::new()
            .prefix("sonic-decode-")
            .suffix(&format!(".{}", extension))
            .tempfile()
            .map_err(|e| DecodeError::Internal(format!("Failed to create scratch file: {}", e)))?;

        tokio::fs::write(scratch.path(), payload.bytes())
            .await
            .map_err(|e| DecodeError::Internal(format!("Failed to write scratch file: {}", e)))?;

        debug!(
            program = %self.program.display(),
            scratch = %scratch.path().display(),
            bytes = payload.len(),
            "Running external decoder"
        );

        let started = Instant::now();
        let child = self.command(scratch.path()).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DecodeError::BackendUnavailable(format!(
                    "{} not found",
                    self.program.display()
                ))
            } else {
                DecodeError::Internal(format!("Failed to spawn decoder: {}", e))
            }
        })?;

        // Dropping the read future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, run_capped(child, self.output_cap()))
            .await
        {
            Ok(result) => {
                result.map_err(|e| DecodeError::Internal(format!("Decoder I/O failed: {}", e)))?
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "External decoder timed out, subprocess killed"
                );
                return Err(DecodeError::Timeout(self.timeout));
            }
        };

        drop(scratch);

        if output.capped {
            debug!(
                limit = ?self.max_duration,
                "External decode stopped at the duration limit"
            );
        } else if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT_LEN).collect();
            debug!(status = %output.status, stderr = %excerpt, "External decoder failed");
            return Err(classify_failure(&excerpt));
        }

        let samples = parse_f32le(&output.pcm, self.target_layout.count())?;
        if samples.is_empty() {
            return Err(DecodeError::CorruptInput(
                "decoder produced no audio".to_string(),
            ));
        }

        let waveform = Waveform::new(samples, self.target_sample_rate, self.target_layout)
            .map_err(|e| DecodeError::Internal(e.to_string()))?;

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            duration_s = waveform.duration_seconds(),
            "Decoded with ffmpeg"
        );

        Ok(DecodedAudio {
            waveform,
            source: SourceInfo {
                backend: "ffmpeg",
                container: hint.extension.clone(),
                codec: None,
                native_sample_rate: None,
                native_channels: None,
                truncated: output.capped,
            },
        })
    }
}

/// Collect stdout up to `max_pcm` bytes alongside stderr, then reap the child
async fn run_capped(mut child: Child, max_pcm: Option<u64>) -> std::io::Result<RunOutput> {
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr not captured"))?;
    let limit = max_pcm.unwrap_or(u64::MAX);

    let mut pcm = Vec::new();
    let mut diagnostics = Vec::new();
    let (read_pcm, read_stderr) = tokio::join!(
        async {
            (&mut stdout).take(limit).read_to_end(&mut pcm).await?;
            let capped = pcm.len() as u64 >= limit;
            if capped {
                // The child may block on a full pipe; stderr only closes once it exits
                if let Err(e) = child.start_kill() {
                    debug!("Decoder already exited at the output limit: {}", e);
                }
            }
            Ok::<bool, std::io::Error>(capped)
        },
        stderr.read_to_end(&mut diagnostics),
    );
    read_stderr?;
    let capped = read_pcm?;
    let status = child.wait().await?;

    Ok(RunOutput {
        status,
        pcm,
        stderr: diagnostics,
        capped,
    })
}

/// Map a failed run to an error kind using ffmpeg's diagnostics
fn classify_failure(stderr: &str) -> DecodeError {
    if UNSUPPORTED_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        DecodeError::UnsupportedFormat(stderr.to_string())
    } else if stderr.is_empty() {
        DecodeError::CorruptInput("external decoder exited with an error".to_string())
    } else {
        DecodeError::CorruptInput(stderr.to_string())
    }
}

/// Interpret raw little-endian f32 output, dropping any trailing partial frame
fn parse_f32le(raw: &[u8], channels: usize) -> Result<Vec<f32>, DecodeError> {
    if raw.len() % 4 != 0 {
        return Err(DecodeError::CorruptInput(format!(
            "decoder output of {} bytes is not whole f32 samples",
            raw.len()
        )));
    }
    let mut samples: Vec<f32> = raw
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let whole = samples.len() - samples.len() % channels;
    samples.truncate(whole);
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_f32le() {
        let raw: Vec<u8> = [0.5f32, -0.25, 1.0]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        assert_eq!(parse_f32le(&raw, 1).unwrap(), vec![0.5, -0.25, 1.0]);
        // Trailing half frame dropped for stereo
        assert_eq!(parse_f32le(&raw, 2).unwrap(), vec![0.5, -0.25]);
    }

    #[test]
    fn test_parse_rejects_partial_sample() {
        assert!(matches!(
            parse_f32le(&[0, 0, 0], 1),
            Err(DecodeError::CorruptInput(_))
        ));
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("pipe:0: Invalid data found when processing input"),
            DecodeError::UnsupportedFormat(_)
        ));
        assert!(matches!(
            classify_failure("[aac @ 0x5555] channel element 0.0 is not allocated"),
            DecodeError::CorruptInput(_)
        ));
    }

    #[test]
    fn test_output_cap_in_whole_frames() {
        let decoder = FfmpegDecoder::new(
            PathBuf::from("ffmpeg"),
            16000,
            ChannelLayout::Stereo,
            Duration::from_secs(1),
        );
        assert_eq!(decoder.output_cap(), None);

        let capped = decoder.with_max_duration(Duration::from_secs(2));
        assert_eq!(capped.output_cap(), Some(32000 * 2 * 4));
    }

    #[test]
    fn test_duration_limit_passed_to_ffmpeg() {
        let decoder = FfmpegDecoder::new(
            PathBuf::from("ffmpeg"),
            16000,
            ChannelLayout::Mono,
            Duration::from_secs(1),
        )
        .with_max_duration(Duration::from_millis(31_000));

        let command = decoder.command(std::path::Path::new("/tmp/in.m4a"));
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "31.000");
        // Input stays the sixth argument
        assert_eq!(args[5], "/tmp/in.m4a");
    }

    #[tokio::test]
    async fn test_missing_binary_reports_unavailable() {
        let decoder = FfmpegDecoder::new(
            PathBuf::from("/nonexistent/sonic-test-ffmpeg"),
            16000,
            ChannelLayout::Mono,
            Duration::from_secs(1),
        );
        let payload = RawAudioPayload::new(vec![1u8, 2, 3], Default::default());

        let result = decoder.decode(&payload).await;
        assert!(matches!(result, Err(DecodeError::BackendUnavailable(_))));
    }
}
