//! In-process decoding with symphonia
//!
//! Reads straight from the request bytes through an in-memory cursor, so no
//! temporary files are involved. Codecs symphonia cannot decode surface as
//! `UnsupportedFormat`, which lets [`super::FallbackDecoder`] hand the payload
//! to the external decoder.

use async_trait::async_trait;
use sonic_common::{ChannelLayout, Waveform};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::IntoSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use tracing::{debug, warn};

use super::resample::{resample, to_layout};
use super::{
    frame_cap, DecodeError, DecodedAudio, MediaDecoder, RawAudioPayload, ResolvedHint, SourceInfo,
};

/// Pure Rust decoder backed by symphonia
#[derive(Debug, Clone)]
pub struct NativeDecoder {
    /// Canonical output sample rate
    target_sample_rate: u32,
    /// Canonical output channel layout
    target_layout: ChannelLayout,
    /// Packets past this much audio are never decoded
    max_duration: Option<Duration>,
}

impl NativeDecoder {
    pub fn new(target_sample_rate: u32, target_layout: ChannelLayout) -> Self {
        Self {
            target_sample_rate,
            target_layout,
            max_duration: None,
        }
    }

    /// Stop decoding once `limit` of audio has been produced
    pub fn with_max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    /// Decode synchronously (callers on the async runtime should use [`MediaDecoder::decode`])
    pub fn decode_bytes(
        &self,
        bytes: Arc<[u8]>,
        hint: &ResolvedHint,
    ) -> Result<DecodedAudio, DecodeError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut probe_hint = Hint::new();
        if let Some(ext) = &hint.extension {
            probe_hint.with_extension(ext);
        }
        if let Some(mime) = &hint.mime_type {
            probe_hint.mime_type(mime);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &probe_hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| match e {
                SymphoniaError::DecodeError(msg) => {
                    DecodeError::CorruptInput(format!("malformed container: {}", msg))
                }
                other => DecodeError::UnsupportedFormat(format!(
                    "container not recognized: {}",
                    other
                )),
            })?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::UnsupportedFormat("no audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let codec_name = symphonia::default::get_codecs()
            .get_codec(codec_params.codec)
            .map(|descriptor| descriptor.short_name.to_string());

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(what) => {
                    DecodeError::UnsupportedFormat(format!("codec not supported: {}", what))
                }
                other => DecodeError::CorruptInput(format!("invalid codec parameters: {}", other)),
            })?;

        let mut samples: Vec<f32> = Vec::new();
        let mut native_rate = codec_params.sample_rate;
        let mut native_channels = codec_params.channels.map(|c| c.count());
        let mut good_packets = 0usize;
        let mut bad_packets = 0usize;
        let mut truncated = false;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    return Err(DecodeError::CorruptInput(format!(
                        "failed to read packet: {}",
                        e
                    )))
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let channels = spec.channels.count();

                    // A stream that changes shape mid-way cannot be laid out consistently
                    if native_channels.is_some_and(|c| c != channels && good_packets > 0)
                        || native_rate.is_some_and(|r| r != spec.rate && good_packets > 0)
                    {
                        return Err(DecodeError::CorruptInput(
                            "stream parameters changed mid-stream".to_string(),
                        ));
                    }
                    native_channels = Some(channels);
                    native_rate = Some(spec.rate);

                    samples.extend(interleave_ref(&decoded));
                    good_packets += 1;

                    if let Some(limit) = self.max_duration.filter(|_| spec.rate > 0) {
                        let cap = frame_cap(limit, spec.rate) * channels;
                        if samples.len() >= cap {
                            samples.truncate(cap);
                            truncated = true;
                            debug!(
                                limit_s = limit.as_secs_f64(),
                                "Decode stopped at the duration limit"
                            );
                            break;
                        }
                    }
                }
                Err(SymphoniaError::DecodeError(msg)) => {
                    // Recoverable per packet; the stream may still be usable
                    bad_packets += 1;
                    debug!("Skipping undecodable packet: {}", msg);
                }
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    return Err(DecodeError::CorruptInput(format!(
                        "failed to decode packet: {}",
                        e
                    )))
                }
            }
        }

        if bad_packets > 0 {
            if good_packets == 0 {
                return Err(DecodeError::CorruptInput(format!(
                    "none of {} packets could be decoded",
                    bad_packets
                )));
            }
            warn!(
                good_packets,
                bad_packets, "Decoded stream with undecodable packets skipped"
            );
        }

        let channels = native_channels.unwrap_or(1);
        let source_rate = match native_rate {
            Some(rate) if rate > 0 => rate,
            _ if samples.is_empty() => self.target_sample_rate,
            _ => {
                return Err(DecodeError::CorruptInput(
                    "sample rate not specified in stream".to_string(),
                ))
            }
        };

        let laid_out = to_layout(&samples, channels, self.target_layout);
        drop(samples);
        let canonical = resample(
            laid_out,
            self.target_layout.count(),
            source_rate,
            self.target_sample_rate,
        )?;

        let waveform = Waveform::new(canonical, self.target_sample_rate, self.target_layout)
            .map_err(|e| DecodeError::Internal(e.to_string()))?;

        debug!(
            codec = codec_name.as_deref().unwrap_or("unknown"),
            native_rate = source_rate,
            native_channels = channels,
            duration_s = waveform.duration_seconds(),
            "Decoded with symphonia"
        );

        Ok(DecodedAudio {
            waveform,
            source: SourceInfo {
                backend: "symphonia",
                container: hint.extension.clone(),
                codec: codec_name,
                native_sample_rate: native_rate,
                native_channels: Some(channels),
                truncated,
            },
        })
    }
}

#[async_trait]
impl MediaDecoder for NativeDecoder {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    async fn decode(&self, payload: &RawAudioPayload) -> Result<DecodedAudio, DecodeError> {
        let decoder = self.clone();
        let bytes = payload.shared_bytes();
        let hint = payload.resolve_hint();

        tokio::task::spawn_blocking(move || decoder.decode_bytes(bytes, &hint))
            .await
            .map_err(|e| DecodeError::Internal(format!("decode task failed: {}", e)))?
    }
}

// ============================================================================
// Sample Format Conversion
// ============================================================================

fn interleave_ref(decoded: &AudioBufferRef<'_>) -> Vec<f32> {
    match decoded {
        AudioBufferRef::U8(buf) => interleave(buf),
        AudioBufferRef::U16(buf) => interleave(buf),
        AudioBufferRef::U24(buf) => interleave(buf),
        AudioBufferRef::U32(buf) => interleave(buf),
        AudioBufferRef::S8(buf) => interleave(buf),
        AudioBufferRef::S16(buf) => interleave(buf),
        AudioBufferRef::S24(buf) => interleave(buf),
        AudioBufferRef::S32(buf) => interleave(buf),
        AudioBufferRef::F32(buf) => interleave(buf),
        AudioBufferRef::F64(buf) => interleave(buf),
    }
}

/// Interleave a planar buffer, converting every sample to normalized f32
fn interleave<S>(buf: &AudioBuffer<S>) -> Vec<f32>
where
    S: Sample + IntoSample<f32>,
{
    let channels = buf.spec().channels.count();
    let frames = buf.frames();
    let mut output = Vec::with_capacity(frames * channels);

    for i in 0..frames {
        for c in 0..channels {
            output.push(buf.chan(c)[i].into_sample());
        }
    }
    output
}
