use crate::StoreError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Minimal key-value surface the lock and cache are built on.
///
/// `set_nx_ex` must be atomic: exactly one of several concurrent callers
/// creates a missing key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// `SET key value NX EX ttl`. Returns whether the key was created.
    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, StoreError>;
    /// `SET key value EX ttl`.
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;
    /// `GET key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// `DEL key`. Returns whether a live key was removed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;
    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// Configuration for selecting and building a store.
///
/// ```
/// use cache::StoreConfig;
///
/// let config = StoreConfig::in_memory();
/// let config = StoreConfig::redis("redis://127.0.0.1:6379/0");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local map. Locks only exclude callers inside this process.
    #[default]
    InMemory,
    /// Shared Redis instance. Requires the `backend-redis` feature.
    Redis { url: String },
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        StoreConfig::InMemory
    }

    pub fn redis<U: Into<String>>(url: U) -> Self {
        StoreConfig::Redis { url: url.into() }
    }

    /// Build the configured backend.
    pub async fn build(&self) -> Result<Arc<dyn KeyValueStore>, StoreError> {
        match self {
            StoreConfig::InMemory => Ok(Arc::new(MemoryStore::new())),
            StoreConfig::Redis { url } => {
                #[cfg(feature = "backend-redis")]
                {
                    Ok(Arc::new(crate::RedisStore::connect(url).await?))
                }
                #[cfg(not(feature = "backend-redis"))]
                {
                    let _ = url;
                    Err(StoreError::Disabled(
                        "redis backend disabled at compile time",
                    ))
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Writes between full sweeps of expired entries.
const SWEEP_EVERY: u64 = 64;

/// In-memory store with per-key expiry.
///
/// Expired keys read as absent immediately. Their memory is reclaimed when
/// the key is touched again and by a sweep every [`SWEEP_EVERY`] writes, so
/// keys that are written once and never read do not accumulate.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live keys right now.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.value().live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, value| value.live(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            tracing::debug!(purged, "purged expired entries");
        }
        purged
    }

    /// Must run with no shard guard held.
    fn note_write(&self) {
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.purge_expired();
        }
    }

    fn expiring(bytes: &[u8], ttl: Duration) -> StoredValue {
        StoredValue {
            bytes: bytes.to_vec(),
            expires_at: Some(Instant::now() + ttl),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let created = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().live(now) {
                    false
                } else {
                    occupied.insert(Self::expiring(value, ttl));
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Self::expiring(value, ttl));
                true
            }
        };
        if created {
            self.note_write();
        }
        Ok(created)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_string(), Self::expiring(value, ttl));
        self.note_write();
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        // Copy out before removing; a held shard guard would deadlock remove.
        let found = self
            .entries
            .get(key)
            .map(|entry| (entry.live(now), entry.bytes.clone()));

        match found {
            Some((true, bytes)) => Ok(Some(bytes)),
            Some((false, _)) => {
                self.entries.remove_if(key, |_, v| !v.live(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map(|(_, value)| value.live(now))
            .unwrap_or(false))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
