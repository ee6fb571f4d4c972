//! Document OCR backend.

use async_trait::async_trait;
use bytes::Bytes;
use completion::SharedHttpClient;
use reqwest::multipart::{Form, Part};
use resilience::ErrorKind;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("ocr api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("ocr transport error: {0}")]
    Transport(String),
    #[error("ocr request timed out")]
    Timeout,
    #[error("ocr response was not json: {0}")]
    Malformed(String),
}

impl OcrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OcrError::Api { status, .. } if *status >= 500 || *status == 429 => {
                ErrorKind::UpstreamUnavailable
            }
            OcrError::Api { .. } | OcrError::Malformed(_) => ErrorKind::ProcessingFailure,
            OcrError::Transport(_) => ErrorKind::UpstreamUnavailable,
            OcrError::Timeout => ErrorKind::UpstreamTimeout,
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OcrError::Timeout
        } else {
            OcrError::Transport(err.to_string())
        }
    }
}

/// Turns one image into the backend's structured recognition result.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    async fn recognize(&self, name: &str, document: Bytes) -> Result<Value, OcrError>;
}

/// Upstage document OCR over multipart upload.
#[derive(Debug, Clone)]
pub struct UpstageOcr {
    endpoint: String,
    api_key: String,
    http: Arc<SharedHttpClient>,
    timeout: Duration,
}

impl UpstageOcr {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        http: Arc<SharedHttpClient>,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            http,
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl OcrBackend for UpstageOcr {
    async fn recognize(&self, name: &str, document: Bytes) -> Result<Value, OcrError> {
        let client = self.http.get().await.map_err(OcrError::from_reqwest)?;
        let length = document.len() as u64;
        let form = Form::new().part(
            "document",
            Part::stream_with_length(document, length).file_name(name.to_string()),
        );

        let response = client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(OcrError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), name, "ocr request rejected");
            return Err(OcrError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| OcrError::Malformed(e.to_string()))
    }
}
