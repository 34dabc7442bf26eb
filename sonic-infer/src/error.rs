//! Error taxonomy for sonic-infer
//!
//! Component errors (`DecodeError`, `FeatureError`, `PredictError`,
//! `ModelLoadError`) converge into [`InferenceError`], which classifies every
//! failure as exactly one [`ErrorKind`]. [`ApiError`] turns that into an HTTP
//! response.

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{BytesRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::decoder::DecodeError;
use crate::features::FeatureError;
use crate::model::{ModelLoadError, PredictError};
use crate::pipeline::state::IllegalTransition;

/// Caller-visible failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    UnsupportedFormat,
    CorruptInput,
    DecodeTimeout,
    InsufficientAudio,
    ShapeMismatch,
    ModelLoadFailure,
    InternalError,
}

impl ErrorKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::CorruptInput | ErrorKind::InsufficientAudio => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ErrorKind::DecodeTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::ShapeMismatch
            | ErrorKind::ModelLoadFailure
            | ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the failure message may be shown to the caller verbatim
    pub fn is_client_facing(self) -> bool {
        !matches!(
            self,
            ErrorKind::ShapeMismatch | ErrorKind::ModelLoadFailure | ErrorKind::InternalError
        )
    }
}

/// Message returned instead of internal details
pub const GENERIC_INTERNAL_MESSAGE: &str = "Internal error while processing audio";

/// Any failure of one inference request
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Features(#[from] FeatureError),

    #[error(transparent)]
    Predict(#[from] PredictError),

    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl InferenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InferenceError::Decode(e) => match e {
                // No backend could even try; to the caller the format is unsupported
                DecodeError::UnsupportedFormat(_) | DecodeError::BackendUnavailable(_) => {
                    ErrorKind::UnsupportedFormat
                }
                DecodeError::CorruptInput(_) => ErrorKind::CorruptInput,
                DecodeError::Timeout(_) => ErrorKind::DecodeTimeout,
                DecodeError::Internal(_) => ErrorKind::InternalError,
            },
            InferenceError::Features(e) => match e {
                FeatureError::InsufficientAudio { .. } => ErrorKind::InsufficientAudio,
                FeatureError::SampleRateMismatch { .. }
                | FeatureError::Config(_)
                | FeatureError::Internal(_) => ErrorKind::InternalError,
            },
            InferenceError::Predict(e) => match e {
                PredictError::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
                PredictError::NonFinite => ErrorKind::InternalError,
            },
            InferenceError::ModelLoad(_) => ErrorKind::ModelLoadFailure,
            InferenceError::Transition(_) | InferenceError::Internal(_) => {
                ErrorKind::InternalError
            }
        }
    }

    /// Text safe to return to the caller
    pub fn public_message(&self) -> String {
        if self.kind().is_client_facing() {
            self.to_string()
        } else {
            GENERIC_INTERNAL_MESSAGE.to_string()
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Body over the configured upload limit (413)
    #[error("Request body too large: {0}")]
    PayloadTooLarge(String),

    /// Pipeline failure, status derived from its kind
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl ApiError {
    /// Classify an extractor rejection by the status axum gave it
    pub fn from_rejection(status: StatusCode, detail: String) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(detail)
        } else {
            ApiError::BadRequest(detail)
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::from_rejection(rejection.status(), rejection.body_text())
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        Self::from_rejection(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::from_rejection(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, json!("BadRequest"), msg.clone())
            }
            ApiError::PayloadTooLarge(msg) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                json!("PayloadTooLarge"),
                msg.clone(),
            ),
            ApiError::Inference(err) => {
                let kind = err.kind();
                (kind.status_code(), json!(kind), err.public_message())
            }
        };

        let body = Json(json!({
            "kind": kind,
            "message": message,
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ErrorKind::UnsupportedFormat, 415),
            (ErrorKind::CorruptInput, 422),
            (ErrorKind::DecodeTimeout, 504),
            (ErrorKind::InsufficientAudio, 422),
            (ErrorKind::ShapeMismatch, 500),
            (ErrorKind::ModelLoadFailure, 500),
            (ErrorKind::InternalError, 500),
        ];
        for (kind, status) in cases {
            assert_eq!(kind.status_code().as_u16(), status, "{:?}", kind);
        }
    }

    #[test]
    fn test_kind_serializes_as_name() {
        assert_eq!(
            serde_json::to_value(ErrorKind::DecodeTimeout).unwrap(),
            json!("DecodeTimeout")
        );
    }

    #[test]
    fn test_missing_backend_reported_as_unsupported() {
        let err = InferenceError::from(DecodeError::BackendUnavailable("ffmpeg".to_string()));
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn test_timeout_kind() {
        let err = InferenceError::from(DecodeError::Timeout(Duration::from_secs(15)));
        assert_eq!(err.kind(), ErrorKind::DecodeTimeout);
        assert!(err.public_message().contains("timed out"));
    }

    #[test]
    fn test_internal_details_hidden() {
        let err = InferenceError::from(DecodeError::Internal(
            "resampler exploded at /srv/secret/path".to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert_eq!(err.public_message(), GENERIC_INTERNAL_MESSAGE);

        let err = InferenceError::from(PredictError::ShapeMismatch {
            expected: [80, 3001],
            actual: [64, 3001],
        });
        assert_eq!(err.public_message(), GENERIC_INTERNAL_MESSAGE);
    }

    #[test]
    fn test_rejection_status_picks_kind() {
        let too_large =
            ApiError::from_rejection(StatusCode::PAYLOAD_TOO_LARGE, "length limit".to_string());
        assert!(matches!(too_large, ApiError::PayloadTooLarge(_)));
        assert_eq!(too_large.into_response().status(), StatusCode::PAYLOAD_TOO_LARGE);

        let unsupported = ApiError::from_rejection(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "expected multipart".to_string(),
        );
        assert_eq!(unsupported.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_client_facing_message_kept() {
        let err = InferenceError::from(FeatureError::InsufficientAudio {
            actual_ms: 100,
            min_ms: 500,
        });
        assert_eq!(err.kind(), ErrorKind::InsufficientAudio);
        assert!(err.public_message().contains("100 ms"));
    }
}
