//! HTTP Server & Routing Integration Tests

mod helpers;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use helpers::*;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use sonic_infer::decoder::{DecodeError, DecodedAudio, MediaDecoder, RawAudioPayload};
use sonic_infer::{build_router, AppState};

const MAX_UPLOAD: usize = 4 * 1024 * 1024;
const BOUNDARY: &str = "sonic-test-boundary";

fn test_app(dir: &std::path::Path) -> Router {
    let state = AppState::new(Arc::new(build_pipeline(dir)));
    build_router(state, MAX_UPLOAD)
}

/// Detail that must only ever reach the server log
const INTERNAL_DETAIL: &str = "resampler panic at /srv/secret/models/x.bin";

/// Decoder that fails with an internal error on every payload
struct BrokenDecoder;

#[async_trait]
impl MediaDecoder for BrokenDecoder {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn decode(&self, _payload: &RawAudioPayload) -> Result<DecodedAudio, DecodeError> {
        Err(DecodeError::Internal(INTERNAL_DETAIL.to_string()))
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_raw(uri: &str, content_type: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap()
}

/// multipart/form-data with one file part and optional text parts
fn multipart_body(file_field: &str, filename: &str, data: &[u8], extra: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in extra {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{file_field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn post_multipart(body: Vec<u8>) -> Request<Body> {
    post_raw(
        "/predict/upload",
        &format!("multipart/form-data; boundary={BOUNDARY}"),
        body,
    )
}

#[tokio::test]
async fn test_root_route_welcomes() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["message"].as_str().unwrap().contains("Welcome"));
}

#[tokio::test]
async fn test_health_reports_model() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "sonic-infer");
    assert_eq!(body["model"]["name"], "fixture-events");
    assert_eq!(body["model"]["input_shape"], serde_json::json!(INPUT_SHAPE));
    assert_eq!(body["model"]["labels"], 3);
    assert_eq!(body["model"]["sample_rate"], 16000);
    assert!(body.get("last_error").is_none());
}

#[tokio::test]
async fn test_predict_raw_wav() {
    // Given: 3 s of silence posted as the request body
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let request = post_raw("/predict", "audio/wav", silence_wav(3.0, SAMPLE_RATE));

    // When
    let response = app.oneshot(request).await.unwrap();

    // Then: label, confidence, scores, timings
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(LABELS.contains(&body["label"].as_str().unwrap()));
    let confidence = body["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    assert_eq!(body["scores"].as_array().unwrap().len(), 3);
    assert_eq!(body["model"], "fixture-events");
    assert!(body["request_id"].as_str().is_some());
    assert!(body["timings_ms"]["total"].as_f64().is_some());
    assert_eq!(body["audio"]["backend"], "symphonia");
}

#[tokio::test]
async fn test_predict_raw_top_k_and_filename_hint() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let request = post_raw(
        "/predict?top_k=2&filename=recording.wav",
        "application/octet-stream",
        tone_wav(440.0, 1.0, SAMPLE_RATE),
    );

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["scores"].as_array().unwrap().len(), 2);
    assert_eq!(body["audio"]["container"], "wav");
}

#[tokio::test]
async fn test_predict_short_clip_is_422() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let request = post_raw("/predict", "audio/wav", silence_wav(0.1, SAMPLE_RATE));

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "InsufficientAudio");
    assert!(body["message"].as_str().unwrap().contains("500 ms"));
}

#[tokio::test]
async fn test_predict_text_is_415() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let request = post_raw(
        "/predict",
        "text/plain",
        b"definitely not an audio file".to_vec(),
    );

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "UnsupportedFormat");
}

#[tokio::test]
async fn test_predict_empty_body_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let response = app
        .oneshot(post_raw("/predict", "audio/wav", Vec::new()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "BadRequest");
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(Arc::new(build_pipeline(dir.path())));
    let app = build_router(state, 1024);

    let response = app
        .oneshot(post_raw("/predict", "audio/wav", silence_wav(1.0, SAMPLE_RATE)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "PayloadTooLarge");
    assert!(body["message"].as_str().is_some());
}

#[tokio::test]
async fn test_oversized_upload_is_413() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(Arc::new(build_pipeline(dir.path())));
    let app = build_router(state, 1024);
    let body = multipart_body("audio_file", "clip.wav", &silence_wav(1.0, SAMPLE_RATE), &[]);

    let response = app.oneshot(post_multipart(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "PayloadTooLarge");
}

#[tokio::test]
async fn test_predict_raw_bad_top_k_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let request = post_raw(
        "/predict?top_k=abc",
        "audio/wav",
        silence_wav(1.0, SAMPLE_RATE),
    );

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "BadRequest");
    assert!(!body["message"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_health_reports_failure_kind_without_detail() {
    // Given: a service whose decoder fails internally
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with_decoder(dir.path(), Arc::new(BrokenDecoder));
    let app = build_router(AppState::new(Arc::new(pipeline)), MAX_UPLOAD);

    // When: a request fails, then /health is read
    let response = app
        .clone()
        .oneshot(post_raw("/predict", "audio/wav", silence_wav(1.0, SAMPLE_RATE)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let failure = json_body(response).await;
    assert_eq!(failure["kind"], "InternalError");

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&bytes);

    // Then: the kind and time are visible, the detail is not
    assert!(!text.contains("/srv/secret"), "{}", text);
    assert!(!text.contains("resampler"), "{}", text);
    let health: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(health["last_error"]["kind"], "InternalError");
    assert!(health["last_error"]["at"].as_str().is_some());
    assert!(!failure.to_string().contains("/srv/secret"));
}

#[tokio::test]
async fn test_upload_uses_filename_hint() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let body = multipart_body(
        "audio_file",
        "Voice Memo 12.WAV",
        &silence_wav(2.0, SAMPLE_RATE),
        &[("top_k", "1")],
    );

    let response = app.oneshot(post_multipart(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["scores"].as_array().unwrap().len(), 1);
    assert_eq!(body["audio"]["container"], "wav");
}

#[tokio::test]
async fn test_upload_without_audio_field_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let body = multipart_body("attachment", "clip.wav", &silence_wav(1.0, SAMPLE_RATE), &[]);

    let response = app.oneshot(post_multipart(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_bad_top_k_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let body = multipart_body(
        "audio_file",
        "clip.wav",
        &silence_wav(1.0, SAMPLE_RATE),
        &[("top_k", "lots")],
    );

    let response = app.oneshot(post_multipart(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "https://example.org")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );
}
