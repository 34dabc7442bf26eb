//! Health check and root endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::model::Task;
use crate::{AppState, LastError};

/// Loaded model, as reported by /health
#[derive(Debug, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub task: Task,
    pub input_shape: [usize; 2],
    pub labels: usize,
    pub sample_rate: u32,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok" once serving)
    pub status: String,
    /// Module name ("sonic-infer")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    pub model: ModelSummary,
    /// Kind and time of the last server-side failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let last_error = state.last_error.read().await.clone();
    let model = state.pipeline.model();

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "sonic-infer".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        model: ModelSummary {
            name: model.name().to_string(),
            task: model.task(),
            input_shape: model.input_shape(),
            labels: model.labels().len(),
            sample_rate: state.pipeline.extractor().sample_rate(),
        },
        last_error,
    })
}

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Welcome to the sonic-infer audio inference API" }))
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
}
