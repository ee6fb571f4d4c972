//! API route handlers
//!
//! - `health`: liveness, readiness and metrics
//! - `chat`: chat completion
//! - `face`: probe staging and face verification
//! - `ocr`: document OCR

pub mod chat;
pub mod face;
pub mod health;
pub mod ocr;

use crate::error::ServerError;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// Service name, version and the routes it answers.
pub async fn api_info() -> impl IntoResponse {
    Json(json!({
        "name": "AI Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/api/llama/chat",
            "/api/llama/status",
            "/face/stage/{emp_id}",
            "/face/verify/{emp_id}",
            "/ocr/process",
            "/health",
            "/ready",
            "/metrics"
        ]
    }))
}

pub async fn not_found() -> ServerError {
    ServerError::NotFound
}
