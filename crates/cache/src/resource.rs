//! TTL blob cache used as a hand-off buffer between producers and the
//! coordinators that consume staged inputs.

use crate::{KeyValueStore, StoreError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// How a logical resource key maps onto a store key.
///
/// Writer and reader of the same resource must use the same strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Use the key as given.
    #[default]
    Verbatim,
    /// `<prefix><sha256 hex of key>`, fixed width regardless of input.
    Hashed { prefix: String },
}

impl KeyStrategy {
    pub fn hashed<P: Into<String>>(prefix: P) -> Self {
        KeyStrategy::Hashed {
            prefix: prefix.into(),
        }
    }

    pub fn derive(&self, key: &str) -> String {
        match self {
            KeyStrategy::Verbatim => key.to_string(),
            KeyStrategy::Hashed { prefix } => {
                let digest = Sha256::digest(key.as_bytes());
                format!("{prefix}{}", hex::encode(digest))
            }
        }
    }
}

/// Byte layer between the cache and the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueEncoding {
    /// Bytes go to the store untouched. Needs a binary-safe store.
    #[default]
    Raw,
    /// Standard base64 text, for stores that coerce values into strings.
    /// Reads tolerate quoting the store adds around the text.
    Base64,
}

impl ValueEncoding {
    pub fn encode(&self, bytes: &[u8]) -> Vec<u8> {
        match self {
            ValueEncoding::Raw => bytes.to_vec(),
            ValueEncoding::Base64 => STANDARD.encode(bytes).into_bytes(),
        }
    }

    pub fn decode(&self, key: &str, stored: Vec<u8>) -> Result<Vec<u8>, StoreError> {
        match self {
            ValueEncoding::Raw => Ok(stored),
            ValueEncoding::Base64 => {
                let text = std::str::from_utf8(&stored).map_err(|e| StoreError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                })?;
                STANDARD
                    .decode(strip_quotes(text))
                    .map_err(|e| StoreError::Corrupt {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })
            }
        }
    }
}

fn strip_quotes(text: &str) -> &str {
    let mut text = text.trim();
    loop {
        let stripped = text
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .or_else(|| text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')));
        match stripped {
            Some(inner) => text = inner.trim(),
            None => return text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(with = "resilience::serde_millis")]
    pub default_ttl: Duration,
    #[serde(default)]
    pub key_strategy: KeyStrategy,
    #[serde(default)]
    pub encoding: ValueEncoding,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            key_strategy: KeyStrategy::Verbatim,
            encoding: ValueEncoding::Raw,
        }
    }
}

impl CacheConfig {
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }

    pub fn with_encoding(mut self, encoding: ValueEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}

#[derive(Clone)]
pub struct ResourceCache {
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
}

impl ResourceCache {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store_key(&self, key: &str) -> String {
        self.config.key_strategy.derive(key)
    }

    /// Store `bytes` under `key`. `None` uses the default TTL.
    ///
    /// Store failures are logged and reported as `false`.
    pub async fn save(&self, key: &str, bytes: &[u8], ttl: Option<Duration>) -> bool {
        let store_key = self.store_key(key);
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let encoded = self.config.encoding.encode(bytes);

        match self.store.set_ex(&store_key, &encoded, ttl).await {
            Ok(()) => {
                tracing::debug!(key, size = bytes.len(), ttl_ms = ttl.as_millis() as u64, "cached resource");
                true
            }
            Err(err) => {
                tracing::error!(key, error = %err, "cache save failed");
                false
            }
        }
    }

    /// Fetch the bytes stored under `key`, reversing the value encoding.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let store_key = self.store_key(key);
        match self.store.get(&store_key).await? {
            Some(stored) => {
                tracing::debug!(key, "cache hit");
                self.config.encoding.decode(key, stored).map(Some)
            }
            None => {
                tracing::debug!(key, "cache miss");
                Ok(None)
            }
        }
    }

    /// Remove `key`, reporting store failures.
    pub async fn try_delete(&self, key: &str) -> Result<bool, StoreError> {
        self.store.del(&self.store_key(key)).await
    }

    /// Remove `key`. Absent keys and store failures both yield `false`.
    pub async fn delete(&self, key: &str) -> bool {
        match self.try_delete(key).await {
            Ok(removed) => removed,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache delete failed");
                false
            }
        }
    }
}
