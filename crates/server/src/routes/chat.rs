use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use completion::{ChatRequest, CompletionError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub status: String,
}

pub async fn chat(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ServerResult<Json<ChatResponse>> {
    let Json(request) = payload.map_err(|e| ServerError::BadRequest(e.body_text()))?;

    match state.orchestrator.complete(&request).await {
        Ok(response) => Ok(Json(ChatResponse {
            response,
            status: "success".to_string(),
        })),
        Err(err) => {
            if err == CompletionError::RateLimited {
                metrics::counter!("gateway_admission_rejected_total").increment(1);
            }
            Err(err.into())
        }
    }
}

/// Configured model plus admission and gate counters.
pub async fn status(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let config = state.orchestrator.config();
    Json(json!({
        "status": "running",
        "model": config.model,
        "backend": config.base_url,
        "rate_limit": state.orchestrator.limiter_stats(),
        "gate": state.orchestrator.gate_stats(),
    }))
}
