//! Retrying client for `POST <base>/api/chat`.

use crate::types::{ChatPayload, ChatResponseBody};
use crate::{ChatMessage, CompletionError, SharedHttpClient};
use reqwest::StatusCode;
use resilience::{execute_with_retry_async, RetryConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Backend base URL, e.g. `http://localhost:11434`.
    pub base_url: String,
    pub model: String,
    /// Deadline for a single attempt.
    #[serde(with = "resilience::serde_millis")]
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "hf.co/QuantFactory/llama-3.2-Korean-Bllossom-3B-GGUF".to_string(),
            request_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

impl CompletionConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn chat_endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

pub struct CompletionClient {
    config: CompletionConfig,
    http: Arc<SharedHttpClient>,
}

impl CompletionClient {
    pub fn new(config: CompletionConfig, http: Arc<SharedHttpClient>) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    pub fn http(&self) -> &Arc<SharedHttpClient> {
        &self.http
    }

    /// Send `messages` and return the completion text.
    ///
    /// 404, 413 and 503 fail at once. Timeouts, transport errors, other
    /// statuses and bodies without text are retried with linear backoff.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let client = self
            .http
            .get()
            .await
            .map_err(|e| CompletionError::Internal(e.to_string()))?;
        let payload = ChatPayload {
            model: &self.config.model,
            messages,
            stream: false,
        };
        let endpoint = self.config.chat_endpoint();

        let outcome = execute_with_retry_async(&self.config.retry, |attempt| {
            tracing::info!(attempt, model = %self.config.model, "sending completion request");
            self.attempt(&client, &endpoint, &payload)
        })
        .await;

        let attempts = outcome.attempts;
        match outcome.into_result() {
            Ok(text) => {
                tracing::info!(attempts, chars = text.chars().count(), "completion received");
                Ok(text)
            }
            Err(err) => Err(err.exhausted(attempts)),
        }
    }

    async fn attempt(
        &self,
        client: &reqwest::Client,
        endpoint: &str,
        payload: &ChatPayload<'_>,
    ) -> Result<String, CompletionError> {
        let response = client
            .post(endpoint)
            .timeout(self.config.request_timeout)
            .json(payload)
            .send()
            .await
            .map_err(CompletionError::from_reqwest)?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(CompletionError::ModelNotFound {
                    model: self.config.model.clone(),
                })
            }
            StatusCode::PAYLOAD_TOO_LARGE => return Err(CompletionError::PayloadTooLarge),
            StatusCode::SERVICE_UNAVAILABLE => return Err(CompletionError::ServiceUnavailable),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(CompletionError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            _ => {}
        }

        let body: ChatResponseBody = response.json().await.map_err(|e| {
            if e.is_timeout() {
                CompletionError::Timeout(e.to_string())
            } else {
                CompletionError::MalformedResponse(e.to_string())
            }
        })?;

        body.message
            .and_then(|m| m.content)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| CompletionError::MalformedResponse("response has no message content".into()))
    }

    pub async fn shutdown(&self) {
        self.http.shutdown().await;
    }
}
