//! Prediction endpoints
//!
//! - `POST /predict`: raw audio body, `Content-Type` names the container,
//!   `?top_k=N&filename=clip.m4a` optional
//! - `POST /predict/upload`: `multipart/form-data` with an `audio_file` field
//!   and an optional `top_k` field

use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{BytesRejection, QueryRejection},
        Multipart, Query, State,
    },
    http::{header, HeaderMap},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::decoder::{ContainerHint, RawAudioPayload};
use crate::error::{ApiError, ApiResult};
use crate::pipeline::{PredictOptions, PredictionResult};
use crate::AppState;

/// Multipart field carrying the audio
pub const AUDIO_FIELD: &str = "audio_file";

#[derive(Debug, Default, Deserialize)]
pub struct PredictQuery {
    pub top_k: Option<usize>,
    /// Original filename, used only as a container hint
    pub filename: Option<String>,
}

/// POST /predict
pub async fn predict_raw(
    State(state): State<AppState>,
    query: Result<Query<PredictQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Json<PredictionResult>> {
    let Query(query) = query?;
    let body = body?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("Request body is empty".to_string()));
    }

    let hint = ContainerHint {
        mime_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        filename: query.filename,
    };
    debug!(bytes = body.len(), ?hint, "Raw prediction request");

    let payload = RawAudioPayload::new(Arc::<[u8]>::from(body.as_ref()), hint);
    run(&state, payload, PredictOptions { top_k: query.top_k }).await
}

/// POST /predict/upload
pub async fn predict_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<PredictionResult>> {
    let mut multipart = multipart?;
    let mut audio: Option<(Bytes, ContainerHint)> = None;
    let mut top_k = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Invalid multipart body", e))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(AUDIO_FIELD) => {
                let hint = ContainerHint {
                    mime_type: field.content_type().map(str::to_string),
                    filename: field.file_name().map(str::to_string),
                };
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error("Failed to read audio_file", e))?;
                audio = Some((bytes, hint));
            }
            Some("top_k") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| multipart_error("Failed to read top_k", e))?;
                let value = text.trim().parse::<usize>().map_err(|_| {
                    ApiError::BadRequest(format!("top_k must be a positive integer, got '{}'", text))
                })?;
                top_k = Some(value);
            }
            other => {
                debug!(field = ?other, "Ignoring unknown multipart field");
            }
        }
    }

    let (bytes, hint) = audio.ok_or_else(|| {
        ApiError::BadRequest(format!("Missing multipart field '{}'", AUDIO_FIELD))
    })?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest(format!("Field '{}' is empty", AUDIO_FIELD)));
    }
    debug!(bytes = bytes.len(), ?hint, "Upload prediction request");

    let payload = RawAudioPayload::new(Arc::<[u8]>::from(bytes.as_ref()), hint);
    run(&state, payload, PredictOptions { top_k }).await
}

/// Stream errors keep their status, so an oversized upload is still a 413
fn multipart_error(context: &str, err: MultipartError) -> ApiError {
    ApiError::from_rejection(err.status(), format!("{}: {}", context, err.body_text()))
}

async fn run(
    state: &AppState,
    payload: RawAudioPayload,
    options: PredictOptions,
) -> ApiResult<Json<PredictionResult>> {
    match state.pipeline.infer(payload, options).await {
        Ok(result) => Ok(Json(result)),
        Err(err) => {
            if !err.kind().is_client_facing() {
                state.record_failure(err.kind()).await;
            }
            Err(ApiError::from(err))
        }
    }
}

/// Build prediction routes
pub fn predict_routes() -> Router<AppState> {
    Router::new()
        .route("/predict", post(predict_raw))
        .route("/predict/upload", post(predict_upload))
}
