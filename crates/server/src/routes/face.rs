use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use pipeline::{VerificationError, VerificationResult};
use serde_json::json;
use std::sync::Arc;

/// Store the request body as the probe image for `emp_id`.
pub async fn stage(
    State(state): State<Arc<ServerState>>,
    Path(emp_id): Path<String>,
    body: Bytes,
) -> ServerResult<impl IntoResponse> {
    if emp_id.trim().is_empty() || body.is_empty() {
        return Err(ServerError::BadRequest(
            "employee id and image body are required".to_string(),
        ));
    }

    let ttl = state.config.cache_ttl();
    if !state.verifier.stage(&emp_id, &body, Some(ttl)).await {
        return Err(ServerError::Internal("failed to stage image".to_string()));
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "staged",
            "emp_id": emp_id,
            "key": state.verifier.staging_key(&emp_id),
            "ttl_seconds": ttl.as_secs(),
        })),
    ))
}

pub async fn verify(
    State(state): State<Arc<ServerState>>,
    Path(emp_id): Path<String>,
) -> ServerResult<Json<VerificationResult>> {
    match state.verifier.verify(&emp_id).await {
        Ok(result) => Ok(Json(result)),
        Err(err) => {
            if matches!(err, VerificationError::Busy { .. }) {
                metrics::counter!("gateway_lock_busy_total", "component" => "face").increment(1);
            }
            Err(err.into())
        }
    }
}
