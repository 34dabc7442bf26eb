//! Two-stage decoder: in-process first, external only when needed

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{DecodeError, DecodedAudio, MediaDecoder, RawAudioPayload};

/// Tries `primary`, then `secondary` when the primary reports `UnsupportedFormat`
///
/// Any other primary failure (corrupt stream, internal error) is final: a
/// recognized-but-broken file will not get better in another decoder.
pub struct FallbackDecoder {
    primary: Box<dyn MediaDecoder>,
    secondary: Box<dyn MediaDecoder>,
}

impl FallbackDecoder {
    pub fn new(primary: Box<dyn MediaDecoder>, secondary: Box<dyn MediaDecoder>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl MediaDecoder for FallbackDecoder {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn decode(&self, payload: &RawAudioPayload) -> Result<DecodedAudio, DecodeError> {
        let primary_error = match self.primary.decode(payload).await {
            Ok(decoded) => return Ok(decoded),
            Err(DecodeError::UnsupportedFormat(reason)) => reason,
            Err(other) => return Err(other),
        };

        debug!(
            primary = self.primary.name(),
            secondary = self.secondary.name(),
            reason = %primary_error,
            "Primary decoder cannot handle payload, falling back"
        );

        match self.secondary.decode(payload).await {
            Ok(decoded) => Ok(decoded),
            Err(DecodeError::BackendUnavailable(reason)) => {
                warn!(
                    secondary = self.secondary.name(),
                    "Fallback decoder unavailable: {}", reason
                );
                Err(DecodeError::UnsupportedFormat(primary_error))
            }
            Err(other) => Err(other),
        }
    }
}
