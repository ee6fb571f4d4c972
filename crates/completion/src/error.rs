use resilience::{ErrorKind, Retryable};
use thiserror::Error;

/// Errors surfaced by the completion path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    /// Admission denied before any upstream call.
    #[error("too many requests, try again later")]
    RateLimited,
    #[error("invalid chat request: {0}")]
    InvalidRequest(String),
    /// Backend answered 404 for the configured model.
    #[error("model not found: {model}")]
    ModelNotFound { model: String },
    /// Backend answered 413.
    #[error("request payload too large for the completion backend")]
    PayloadTooLarge,
    /// Backend answered 503.
    #[error("completion backend unavailable")]
    ServiceUnavailable,
    /// One attempt ran past its deadline.
    #[error("completion request timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("completion backend returned {status}: {body}")]
    Status { status: u16, body: String },
    /// Body was not the expected shape or carried no text.
    #[error("malformed completion response: {0}")]
    MalformedResponse(String),
    /// Retries exhausted on timeouts.
    #[error("completion backend unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },
    /// Retries exhausted on other failures.
    #[error("completion failed after {attempts} attempts: {last_error}")]
    Failed { attempts: u32, last_error: String },
    #[error("internal completion error: {0}")]
    Internal(String),
}

impl CompletionError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CompletionError::Timeout(err.to_string())
        } else {
            CompletionError::Transport(err.to_string())
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CompletionError::RateLimited => ErrorKind::RateLimited,
            CompletionError::InvalidRequest(_) | CompletionError::PayloadTooLarge => {
                ErrorKind::InvalidInput
            }
            CompletionError::ModelNotFound { .. } => ErrorKind::NotFound,
            CompletionError::ServiceUnavailable | CompletionError::Unavailable { .. } => {
                ErrorKind::UpstreamUnavailable
            }
            CompletionError::Timeout(_) => ErrorKind::UpstreamTimeout,
            CompletionError::Transport(_)
            | CompletionError::Status { .. }
            | CompletionError::MalformedResponse(_)
            | CompletionError::Failed { .. } => ErrorKind::ProcessingFailure,
            CompletionError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Turn the last per-attempt error into the give-up error.
    pub(crate) fn exhausted(self, attempts: u32) -> Self {
        match self {
            CompletionError::Timeout(_) => CompletionError::Unavailable {
                attempts,
                last_error: self.to_string(),
            },
            err if err.is_retryable() => CompletionError::Failed {
                attempts,
                last_error: err.to_string(),
            },
            err => err,
        }
    }
}

impl Retryable for CompletionError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            CompletionError::Timeout(_)
                | CompletionError::Transport(_)
                | CompletionError::Status { .. }
                | CompletionError::MalformedResponse(_)
        )
    }
}
