use resilience::ErrorKind;
use thiserror::Error;

/// Errors surfaced by key-value store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store connection failed: {0}")]
    Connection(String),
    /// The store answered with an error.
    #[error("store command failed: {0}")]
    Command(String),
    /// A stored value could not be decoded back into bytes.
    #[error("stored value for '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
    /// The requested backend was compiled out.
    #[error("{0}")]
    Disabled(&'static str),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Connection(_) | StoreError::Command(_) => ErrorKind::UpstreamUnavailable,
            StoreError::Corrupt { .. } | StoreError::Disabled(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(feature = "backend-redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_detail() {
        let err = StoreError::Connection("refused".into());
        assert!(err.to_string().contains("store connection failed"));
        assert!(err.to_string().contains("refused"));

        let err = StoreError::Corrupt {
            key: "face:verify:A1".into(),
            reason: "bad padding".into(),
        };
        assert!(err.to_string().contains("face:verify:A1"));
    }

    #[test]
    fn kinds() {
        assert_eq!(
            StoreError::Command("x".into()).kind(),
            ErrorKind::UpstreamUnavailable
        );
        assert_eq!(StoreError::Disabled("off").kind(), ErrorKind::Internal);
    }
}
