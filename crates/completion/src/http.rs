//! Lazily built, shared HTTP transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// One `reqwest::Client` per owner, built on first use.
///
/// Concurrent first callers build it once (double-checked under the write
/// lock). [`shutdown`](Self::shutdown) drops the pooled connections; a later
/// call builds a fresh client.
#[derive(Debug)]
pub struct SharedHttpClient {
    inner: RwLock<Option<reqwest::Client>>,
    connect_timeout: Duration,
    builds: AtomicU64,
}

impl Default for SharedHttpClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl SharedHttpClient {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(None),
            connect_timeout,
            builds: AtomicU64::new(0),
        }
    }

    pub async fn get(&self) -> Result<reqwest::Client, reqwest::Error> {
        if let Some(client) = self.inner.read().await.as_ref() {
            return Ok(client.clone());
        }

        let mut slot = self.inner.write().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(32)
            .build()?;
        self.builds.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("http client initialized");
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Close the client. Safe to call when it was never built.
    pub async fn shutdown(&self) {
        if self.inner.write().await.take().is_some() {
            tracing::info!("http client closed");
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.inner.read().await.is_some()
    }

    /// How many times a client has been constructed.
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_use_builds_once() {
        let shared = Arc::new(SharedHttpClient::default());

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move { shared.get().await.is_ok() })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }

        assert_eq!(shared.builds(), 1);
        assert!(shared.is_initialized().await);
    }

    #[tokio::test]
    async fn shutdown_before_init_is_harmless() {
        let shared = SharedHttpClient::default();
        shared.shutdown().await;
        shared.shutdown().await;
        assert!(!shared.is_initialized().await);
        assert_eq!(shared.builds(), 0);
    }

    #[tokio::test]
    async fn rebuilds_after_shutdown() {
        let shared = SharedHttpClient::default();
        shared.get().await.unwrap();
        shared.shutdown().await;
        assert!(!shared.is_initialized().await);
        shared.get().await.unwrap();
        assert_eq!(shared.builds(), 2);
    }
}
