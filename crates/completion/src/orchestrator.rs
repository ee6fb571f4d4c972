use crate::probe::{probe_backend, BackendStatus};
use crate::{ChatRequest, CompletionClient, CompletionConfig, CompletionError, SharedHttpClient};
use resilience::{ConcurrencyGate, GateStats, RateLimitConfig, RateLimitStats, RateLimiter};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub rate_limit: RateLimitConfig,
    pub max_concurrent_requests: usize,
    pub completion: CompletionConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new(CompletionConfig::default())
    }
}

impl OrchestratorConfig {
    pub fn new(completion: CompletionConfig) -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            max_concurrent_requests: 100,
            completion,
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }
}

/// Serves one completion request end to end: admission, gate, retrying call.
pub struct CompletionOrchestrator {
    limiter: RateLimiter,
    gate: ConcurrencyGate,
    client: CompletionClient,
}

impl CompletionOrchestrator {
    pub fn new(config: OrchestratorConfig, http: Arc<SharedHttpClient>) -> Self {
        Self {
            limiter: RateLimiter::new(config.rate_limit),
            gate: ConcurrencyGate::new(config.max_concurrent_requests),
            client: CompletionClient::new(config.completion, http),
        }
    }

    pub async fn complete(&self, request: &ChatRequest) -> Result<String, CompletionError> {
        if request.prompt.trim().is_empty() {
            return Err(CompletionError::InvalidRequest("prompt must not be empty".into()));
        }

        if !self.limiter.try_acquire() {
            tracing::warn!("completion request rejected by rate limiter");
            return Err(CompletionError::RateLimited);
        }

        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| CompletionError::Internal(e.to_string()))?;

        self.client.complete(&request.messages()).await
    }

    pub async fn probe(&self) -> BackendStatus {
        match self.client.http().get().await {
            Ok(client) => {
                probe_backend(&client, &self.client.config().base_url, Duration::from_secs(5)).await
            }
            Err(err) => BackendStatus {
                state: crate::ProbeState::Error,
                detail: format!("http client unavailable: {err}"),
                model: None,
            },
        }
    }

    pub fn config(&self) -> &CompletionConfig {
        self.client.config()
    }

    pub fn limiter_stats(&self) -> RateLimitStats {
        self.limiter.stats()
    }

    pub fn gate_stats(&self) -> GateStats {
        self.gate.stats()
    }

    /// Close the shared transport. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.client.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{fast_config, flaky_backend};
    use futures::future::join_all;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn third_call_in_window_is_rate_limited_without_upstream_call() {
        let (url, calls) = flaky_backend(0).await;
        let orchestrator = CompletionOrchestrator::new(
            OrchestratorConfig::new(fast_config(&url, 0)).with_rate_limit(RateLimitConfig::per_minute(2)),
            Arc::new(SharedHttpClient::default()),
        );
        let request = ChatRequest::new("ping");

        assert!(orchestrator.complete(&request).await.is_ok());
        assert!(orchestrator.complete(&request).await.is_ok());
        assert_eq!(
            orchestrator.complete(&request).await.unwrap_err(),
            CompletionError::RateLimited
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_calls_stay_under_gate() {
        let (url, _calls) = flaky_backend(0).await;
        let orchestrator = Arc::new(CompletionOrchestrator::new(
            OrchestratorConfig::new(fast_config(&url, 0).with_request_timeout(Duration::from_secs(5)))
                .with_max_concurrent_requests(3),
            Arc::new(SharedHttpClient::default()),
        ));

        let tasks = (0..20).map(|i| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.complete(&ChatRequest::new(format!("q{i}"))).await })
        });
        for result in join_all(tasks).await {
            assert!(result.unwrap().is_ok());
        }

        let stats = orchestrator.gate_stats();
        assert!(stats.peak_in_flight <= 3);
        assert_eq!(stats.total_acquired, 20);
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_before_admission() {
        let orchestrator = CompletionOrchestrator::new(
            OrchestratorConfig::default().with_rate_limit(RateLimitConfig::per_minute(1)),
            Arc::new(SharedHttpClient::default()),
        );
        let err = orchestrator.complete(&ChatRequest::new("  ")).await.unwrap_err();
        assert!(matches!(err, CompletionError::InvalidRequest(_)));
        assert_eq!(orchestrator.limiter_stats().total_requests, 0);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let http = Arc::new(SharedHttpClient::default());
        let orchestrator = CompletionOrchestrator::new(OrchestratorConfig::default(), http.clone());
        orchestrator.shutdown().await;
        orchestrator.shutdown().await;
        assert!(!http.is_initialized().await);
    }
}
