use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use pipeline::{DocumentError, DocumentOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ProcessQuery {
    pub filename: String,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub outcome: DocumentOutcome,
}

/// OCR the stored file named by `?filename=`.
pub async fn process(
    State(state): State<Arc<ServerState>>,
    query: Result<Query<ProcessQuery>, QueryRejection>,
) -> ServerResult<Json<ProcessResponse>> {
    let Query(query) = query.map_err(|e| ServerError::BadRequest(e.body_text()))?;

    match state.documents.process(&query.filename).await {
        Ok(outcome) => Ok(Json(ProcessResponse {
            status: "success",
            outcome,
        })),
        Err(err) => {
            if matches!(err, DocumentError::Busy { .. }) {
                metrics::counter!("gateway_lock_busy_total", "component" => "ocr").increment(1);
            }
            Err(err.into())
        }
    }
}
