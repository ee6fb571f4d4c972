//! Failure taxonomy shared by every coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of a failed request.
///
/// Library errors map onto one of these so the HTTP surface can translate
/// each kind into a single stable status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Admission denied by the rate limiter. No upstream was contacted.
    RateLimited,
    /// A distributed lock is held by someone else.
    ResourceBusy,
    /// An external call ran past its deadline.
    UpstreamTimeout,
    /// A backend reported overload or could not be reached.
    UpstreamUnavailable,
    /// Staged or referenced input is missing.
    NotFound,
    /// Malformed or unsupported payload.
    InvalidInput,
    /// Preprocessing, merge or upstream processing failed.
    ProcessingFailure,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ResourceBusy => "resource_busy",
            ErrorKind::UpstreamTimeout => "upstream_timeout",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::ProcessingFailure => "processing_failure",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::ResourceBusy
                | ErrorKind::UpstreamTimeout
                | ErrorKind::UpstreamUnavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
