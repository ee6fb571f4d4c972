//! Cross-process mutual exclusion on top of `SET NX EX`.
//!
//! A lock is the key `lock:<resource>`. Whoever creates it holds it until
//! it is deleted or its TTL runs out. There is no renewal: a holder whose
//! critical section outlives the TTL can see a second holder appear, so
//! every critical section guarded here must finish well within `ttl`.
//! Callers bound their sections with explicit timeouts and the server
//! refuses to start with a TTL that does not exceed them.

use crate::{KeyValueStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const LOCK_SENTINEL: &[u8] = b"1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Expiry of a held lock; the only recovery path for crashed holders.
    #[serde(with = "resilience::serde_millis")]
    pub ttl: Duration,
    /// Pause between acquisition attempts.
    #[serde(with = "resilience::serde_millis")]
    pub retry_delay: Duration,
    /// Attempts made by [`DistributedLock::acquire`].
    pub attempts: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120),
            retry_delay: Duration::from_millis(100),
            attempts: 3,
        }
    }
}

impl LockConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KeyValueStore>,
    config: LockConfig,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KeyValueStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn lock_key(resource: &str) -> String {
        format!("lock:{resource}")
    }

    /// Acquire with the configured attempt budget.
    pub async fn acquire(&self, resource: &str) -> Result<bool, StoreError> {
        self.acquire_with(resource, self.config.attempts, self.config.retry_delay)
            .await
    }

    /// Try up to `attempts` times, sleeping `delay` between tries.
    ///
    /// `Ok(false)` means someone else holds the lock; callers report that
    /// as a busy resource, not as a failure.
    pub async fn acquire_with(
        &self,
        resource: &str,
        attempts: u32,
        delay: Duration,
    ) -> Result<bool, StoreError> {
        let key = Self::lock_key(resource);
        let attempts = attempts.max(1);

        for attempt in 1..=attempts {
            if self
                .store
                .set_nx_ex(&key, LOCK_SENTINEL, self.config.ttl)
                .await?
            {
                tracing::debug!(lock = %key, attempt, "lock acquired");
                return Ok(true);
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }

        tracing::info!(lock = %key, attempts, "lock busy");
        Ok(false)
    }

    /// Delete the lock key. Releasing a lock that is not held is a no-op.
    pub async fn release(&self, resource: &str) -> Result<(), StoreError> {
        let key = Self::lock_key(resource);
        let removed = self.store.del(&key).await?;
        tracing::debug!(lock = %key, removed, "lock released");
        Ok(())
    }

    /// Acquire and wrap the held lock in a [`LockGuard`].
    ///
    /// `Ok(None)` means the resource stayed busy for the whole budget.
    pub async fn lock(
        &self,
        resource: &str,
        attempts: u32,
        delay: Duration,
    ) -> Result<Option<LockGuard>, StoreError> {
        if self.acquire_with(resource, attempts, delay).await? {
            Ok(Some(LockGuard {
                lock: self.clone(),
                resource: resource.to_string(),
                released: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// Release, logging instead of returning failures.
    ///
    /// Used from finalizers where the primary outcome must win.
    pub async fn release_logged(&self, resource: &str) {
        if let Err(err) = self.release(resource).await {
            tracing::error!(lock = %Self::lock_key(resource), error = %err, "lock release failed");
        }
    }
}

/// A held lock.
///
/// [`release`](Self::release) should end every normal path. A guard dropped
/// without it (its future was cancelled) spawns the release onto the current
/// runtime; outside a runtime the key is left to expire.
pub struct LockGuard {
    lock: DistributedLock,
    resource: String,
    released: bool,
}

impl LockGuard {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Release now. Failures are logged, never returned.
    ///
    /// If this future is dropped before the delete finishes, the guard's
    /// `Drop` still schedules one.
    pub async fn release(mut self) {
        self.lock.release_logged(&self.resource).await;
        self.released = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let lock = self.lock.clone();
        let resource = std::mem::take(&mut self.resource);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(resource = %resource, "lock guard dropped, releasing in background");
                handle.spawn(async move { lock.release_logged(&resource).await });
            }
            Err(_) => {
                tracing::warn!(resource = %resource, "lock guard dropped outside a runtime, waiting for ttl");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn lock_with(config: LockConfig) -> DistributedLock {
        DistributedLock::new(Arc::new(MemoryStore::new()), config)
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let lock = lock_with(LockConfig::default().with_attempts(1));
        assert!(lock.acquire("file:a").await.unwrap());
        assert!(!lock.acquire("file:a").await.unwrap());
        lock.release("file:a").await.unwrap();
        assert!(lock.acquire("file:a").await.unwrap());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let lock = lock_with(LockConfig::default());
        lock.release("never-held").await.unwrap();
        assert!(lock.acquire("x").await.unwrap());
        lock.release("x").await.unwrap();
        lock.release("x").await.unwrap();
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let lock = lock_with(LockConfig::default().with_attempts(1));
        assert!(lock.acquire("a").await.unwrap());
        assert!(lock.acquire("b").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquire_exactly_one_wins() {
        let lock = lock_with(LockConfig::default().with_attempts(1));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let lock = lock.clone();
                tokio::spawn(async move { lock.acquire("face:verify:E1").await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_gets_lock_after_holder_releases() {
        let lock = lock_with(
            LockConfig::default()
                .with_attempts(5)
                .with_retry_delay(Duration::from_millis(100)),
        );
        assert!(lock.acquire("doc").await.unwrap());

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire("doc").await.unwrap() })
        };

        tokio::time::sleep(Duration::from_millis(150)).await;
        lock.release("doc").await.unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_frees_abandoned_lock() {
        let ttl = Duration::from_secs(30);
        let lock = lock_with(LockConfig::default().with_ttl(ttl).with_attempts(1));
        assert!(lock.acquire("crashed").await.unwrap());

        tokio::time::advance(ttl - Duration::from_millis(1)).await;
        assert!(!lock.acquire("crashed").await.unwrap());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(lock.acquire("crashed").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_after_attempt_budget() {
        let lock = lock_with(
            LockConfig::default()
                .with_attempts(3)
                .with_retry_delay(Duration::from_millis(100)),
        );
        assert!(lock.acquire("r").await.unwrap());

        let start = tokio::time::Instant::now();
        assert!(!lock.acquire("r").await.unwrap());
        // Two pauses between three attempts.
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[test]
    fn lock_key_format() {
        assert_eq!(DistributedLock::lock_key("file:abc"), "lock:file:abc");
    }

    #[tokio::test]
    async fn guard_release_frees_the_resource() {
        let lock = lock_with(LockConfig::default());
        let guard = lock.lock("emp:7", 1, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(guard.resource(), "emp:7");
        assert!(lock.lock("emp:7", 1, Duration::ZERO).await.unwrap().is_none());

        guard.release().await;
        assert!(lock.acquire_with("emp:7", 1, Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn dropped_guard_releases_in_background() {
        let lock = lock_with(LockConfig::default());
        let guard = lock.lock("emp:8", 1, Duration::ZERO).await.unwrap().unwrap();
        drop(guard);

        for _ in 0..10 {
            tokio::task::yield_now().await;
            if lock.acquire_with("emp:8", 1, Duration::ZERO).await.unwrap() {
                return;
            }
        }
        panic!("lock was not released after the guard was dropped");
    }

    /// First `DEL` hangs; later ones go straight through.
    #[derive(Default)]
    struct StallFirstDel {
        inner: MemoryStore,
        stalled: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl KeyValueStore for StallFirstDel {
        async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, StoreError> {
            self.inner.set_nx_ex(key, value, ttl).await
        }

        async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
            self.inner.set_ex(key, value, ttl).await
        }

        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key).await
        }

        async fn del(&self, key: &str) -> Result<bool, StoreError> {
            if !self.stalled.swap(true, std::sync::atomic::Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.inner.del(key).await
        }

        fn name(&self) -> &'static str {
            "stall-first-del"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_release_still_frees_the_resource() {
        let lock = DistributedLock::new(Arc::new(StallFirstDel::default()), LockConfig::default());
        let guard = lock.lock("emp:9", 1, Duration::ZERO).await.unwrap().unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(10), guard.release()).await;
        assert!(cancelled.is_err());

        for _ in 0..10 {
            tokio::task::yield_now().await;
            if lock.acquire_with("emp:9", 1, Duration::ZERO).await.unwrap() {
                return;
            }
        }
        panic!("lock was not released after the release future was cancelled");
    }
}
