//! Shared-store coordination: a TTL key-value surface, a distributed lock
//! built on its atomic `SET NX EX`, and a blob cache for staged inputs.
//!
//! ```no_run
//! use cache::{CacheConfig, DistributedLock, LockConfig, ResourceCache, StoreConfig};
//!
//! # async fn demo() -> Result<(), cache::StoreError> {
//! let store = StoreConfig::redis("redis://127.0.0.1/").build().await?;
//! let lock = DistributedLock::new(store.clone(), LockConfig::default());
//! let cache = ResourceCache::new(store, CacheConfig::default());
//!
//! if lock.acquire("face:verify:E1").await? {
//!     let _staged = cache.get("face:verify:E1").await?;
//!     lock.release_logged("face:verify:E1").await;
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod lock;
#[cfg(feature = "backend-redis")]
mod redis_store;
mod resource;
mod store;

pub use error::StoreError;
pub use lock::{DistributedLock, LockConfig, LockGuard};
#[cfg(feature = "backend-redis")]
pub use redis_store::RedisStore;
pub use resource::{CacheConfig, KeyStrategy, ResourceCache, ValueEncoding};
pub use store::{KeyValueStore, MemoryStore, StoreConfig};
