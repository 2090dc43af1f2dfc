//! Storage backends.
//!
//! A backend is an opaque key/value store with TTL. The distributed tier
//! (shared by every process) and the local buffer tiers (one per process)
//! both sit on this trait; named caches compose prefixes and versions into
//! the key before it reaches the backend.

use crate::error::Result;
use std::time::Duration;

pub mod inmemory;
#[cfg(feature = "redis")]
pub mod redis;

pub use inmemory::{BackendStats, InMemoryBackend};
#[cfg(feature = "redis")]
pub use redis::{PoolStats, RedisBackend, RedisConfig};

/// Trait for cache backend implementations.
///
/// All methods take `&self`; implementations use interior mutability or
/// external storage so one backend can serve concurrent callers. Backends
/// are expected to apply their own network timeouts and report them as
/// `Error::BackendError`.
#[allow(async_fn_in_trait)]
pub trait CacheBackend: Send + Sync + Clone {
    /// Retrieve raw bytes stored under `key`.
    ///
    /// # Errors
    /// Returns `Err` if the backend cannot be reached.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store bytes under `key`. `ttl` of `None` stores without expiry.
    ///
    /// # Errors
    /// Returns `Err` if the backend cannot be reached.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    /// Returns `Err` if the backend cannot be reached.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if key exists in cache.
    ///
    /// # Errors
    /// Returns `Err` if the backend cannot be reached.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Remove several keys.
    ///
    /// # Errors
    /// Returns `Err` if the backend cannot be reached.
    async fn mdelete(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    /// Verify the backend is reachable.
    ///
    /// # Errors
    /// Returns `Err` if the backend cannot be reached.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Remove every key whose name starts with `prefix`.
    ///
    /// Named caches sharing one backend are separated by prefix, so this is
    /// how a single named cache is flushed.
    ///
    /// # Errors
    /// Returns `Err` if not supported or the backend cannot be reached.
    async fn clear_prefix(&self, prefix: &str) -> Result<()> {
        Err(crate::error::Error::NotImplemented(format!(
            "clear_prefix({}) not implemented for this backend",
            prefix
        )))
    }

    /// Remove everything in the backend (use with caution).
    ///
    /// # Errors
    /// Returns `Err` if not supported or the backend cannot be reached.
    async fn clear_all(&self) -> Result<()> {
        Err(crate::error::Error::NotImplemented(
            "clear_all not implemented for this backend".to_string(),
        ))
    }
}
