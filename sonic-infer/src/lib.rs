//! sonic-infer library interface
//!
//! Audio inference service: arbitrary consumer audio in, label scores out.
//! Exposes the pipeline components and the router for integration testing.

pub mod api;
pub mod decoder;
pub mod error;
pub mod features;
pub mod model;
pub mod pipeline;

pub use crate::error::{ApiError, ApiResult, ErrorKind, InferenceError};
pub use crate::pipeline::{InferencePipeline, PredictOptions, PredictionResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Resident decoder, extractor and model
    pub pipeline: Arc<InferencePipeline>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last server-side failure for diagnostic purposes
    pub last_error: Arc<RwLock<Option<LastError>>>,
}

/// Most recent server-side failure as reported by /health
///
/// Carries no message text; the details are only in the `error!` log line,
/// which shares the timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub at: DateTime<Utc>,
}

impl AppState {
    pub fn new(pipeline: Arc<InferencePipeline>) -> Self {
        Self {
            pipeline,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Remember a server-side failure for /health
    pub async fn record_failure(&self, kind: ErrorKind) {
        *self.last_error.write().await = Some(LastError {
            kind,
            at: Utc::now(),
        });
    }
}

/// Build application router
///
/// Request bodies larger than `max_upload_bytes` are rejected with 413 before
/// reaching a handler.
pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .merge(api::predict_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
