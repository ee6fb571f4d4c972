use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cache::StoreError;
use completion::CompletionError;
use pipeline::{DocumentError, VerificationError};
use resilience::ErrorKind;
use serde::{Deserialize, Serialize};

pub type ServerResult<T> = Result<T, ServerError>;

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found")]
    NotFound,

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// API error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// One status per failure kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::ResourceBusy => StatusCode::CONFLICT,
        ErrorKind::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::ProcessingFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn code_for(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::RateLimited => "RATE_LIMITED",
        ErrorKind::ResourceBusy => "RESOURCE_BUSY",
        ErrorKind::UpstreamTimeout => "UPSTREAM_TIMEOUT",
        ErrorKind::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
        ErrorKind::NotFound => "NOT_FOUND",
        ErrorKind::InvalidInput => "INVALID_INPUT",
        ErrorKind::ProcessingFailure => "PROCESSING_FAILURE",
        ErrorKind::Internal => "INTERNAL_ERROR",
    }
}

impl ServerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::Completion(e) => e.kind(),
            ServerError::Verification(e) => e.kind(),
            ServerError::Document(e) => e.kind(),
            ServerError::Store(e) => e.kind(),
            ServerError::BadRequest(_) => ErrorKind::InvalidInput,
            ServerError::NotFound => ErrorKind::NotFound,
            ServerError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Completion(CompletionError::ModelNotFound { .. }) => StatusCode::NOT_FOUND,
            ServerError::Completion(CompletionError::PayloadTooLarge) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            other => status_for(other.kind()),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::Completion(CompletionError::ModelNotFound { .. }) => "MODEL_NOT_FOUND",
            ServerError::Completion(CompletionError::PayloadTooLarge) => "PAYLOAD_TOO_LARGE",
            other => code_for(other.kind()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();
        metrics::counter!("gateway_errors_total", "kind" => kind.as_str()).increment(1);
        if status.is_server_error() {
            tracing::error!(error = %self, kind = %kind, "request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
