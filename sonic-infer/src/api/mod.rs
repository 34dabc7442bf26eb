//! HTTP API handlers for sonic-infer

pub mod health;
pub mod predict;

pub use health::health_routes;
pub use predict::predict_routes;
