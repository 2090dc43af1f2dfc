//! Key and group invalidation.
//!
//! Invalidation is best-effort. Outside strict mode only programming errors
//! (empty keys, unknown cache names) are returned; a failed delete is
//! logged and only risks a bounded staleness window.

use crate::backend::CacheBackend;
use crate::buffer::BufferTier;
use crate::error::{Error, Result};
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::registry::CacheRegistry;
use crate::version::{BufferAge, VersionOptions, VersionStore};
use std::sync::Arc;

/// Removes keys and version groups from both tiers.
#[derive(Clone)]
pub struct Invalidator<B: CacheBackend> {
    registry: Arc<CacheRegistry<B>>,
    versions: VersionStore<B>,
    metrics: Arc<dyn CacheMetrics>,
    strict: bool,
}

impl<B: CacheBackend> Invalidator<B> {
    pub fn new(registry: Arc<CacheRegistry<B>>, versions: VersionStore<B>) -> Self {
        let strict = registry.config().strict;
        Invalidator {
            registry,
            versions,
            metrics: Arc::new(NoOpMetrics),
            strict,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Delete `key` at `version` from the named cache and from every buffer
    /// tier of this process.
    ///
    /// # Errors
    /// Returns `Error::InvalidKey` or `Error::UnknownCache`; in strict mode
    /// also the first backend failure.
    pub async fn invalidate_key(
        &self,
        key: &str,
        cache_name: &str,
        version: Option<&str>,
    ) -> Result<()> {
        let cache = self.registry.cache(cache_name)?;
        let distributed = cache.delete(key, version).await;
        let buffered = self
            .registry
            .buffer()
            .delete_all_tiers(cache.key_prefix(), key, version)
            .await;

        self.metrics.record_delete(key);
        debug!("INVALIDATE {} in {} ({:?})", key, cache_name, version);
        self.settle(key, distributed.and(buffered))
    }

    /// Invalidate `key` as cached under the group's current version.
    ///
    /// The tag is read from the distributed tier, not this process's buffer.
    pub async fn invalidate_grouped_key(
        &self,
        key: &str,
        group_key: &str,
        cache_name: &str,
    ) -> Result<()> {
        let options = VersionOptions::default().buffered(BufferAge::Off);
        let tag = self.versions.resolve(group_key, &options).await?;
        self.invalidate_key(key, cache_name, tag.as_ref().map(|t| t.as_str()))
            .await
    }

    /// Drop the group's version tag. Dependent entries are not touched; they
    /// become unreachable and age out of the backend.
    ///
    /// # Errors
    /// Returns `Error::InvalidKey` for an empty group key; in strict mode
    /// also backend failures.
    pub async fn invalidate_group(&self, group_key: &str) -> Result<()> {
        if group_key.is_empty() {
            return Err(Error::InvalidKey(
                "version group key must not be empty".to_string(),
            ));
        }
        let result = self.versions.remove(group_key).await;
        self.metrics.record_delete(group_key);
        debug!("INVALIDATE group {}", group_key);
        self.settle(group_key, result)
    }

    /// Flush one named distributed cache. Operational use only.
    pub async fn clear_backend(&self, cache_name: &str) -> Result<()> {
        let cache = self.registry.cache(cache_name)?;
        warn!(
            "CLEARING CACHE: {} (prefix '{}')",
            cache_name,
            cache.key_prefix()
        );
        let result = cache.clear().await;
        self.settle(cache_name, result)
    }

    /// Flush this process's buffer tiers.
    pub async fn clear_local_buffer(&self) -> Result<()> {
        let result = self.registry.buffer().clear().await;
        debug!("Local buffer cleared ({} tiers)", BufferTier::ALL.len());
        self.settle("local buffer", result)
    }

    fn settle(&self, target: &str, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() || self.strict => Err(e),
            Err(e) => {
                error!("Invalidation failed for {}: {}", target, e);
                self.metrics.record_error(target, &e.to_string());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::config::{CacheConfig, DEFAULT_CACHE, VERSION_CACHE};
    use crate::observability::TtlPolicy;
    use std::time::Duration;

    fn invalidator() -> Invalidator<InMemoryBackend> {
        let registry = Arc::new(CacheRegistry::in_memory(CacheConfig::default()).unwrap());
        let versions = VersionStore::new(
            registry.cache(VERSION_CACHE).unwrap().clone(),
            registry.buffer().clone(),
            Duration::from_secs(8),
            false,
        );
        Invalidator::new(registry, versions)
    }

    #[tokio::test]
    async fn test_invalidate_key_sweeps_every_tier() {
        let inv = invalidator();
        let cache = inv.registry.cache(DEFAULT_CACHE).unwrap();
        cache
            .set("k", Some("v1"), vec![1], &TtlPolicy::Default)
            .await
            .unwrap();
        for tier in BufferTier::ALL {
            inv.registry
                .buffer()
                .set(tier, cache.key_prefix(), "k", Some("v1"), vec![1], None)
                .await
                .unwrap();
        }

        inv.invalidate_key("k", DEFAULT_CACHE, Some("v1"))
            .await
            .unwrap();

        assert!(cache.get("k", Some("v1")).await.unwrap().is_none());
        assert!(inv.registry.buffer().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_group_removes_tag() {
        let inv = invalidator();
        let options = VersionOptions::default();
        let before = inv.versions.resolve("g", &options).await.unwrap();

        inv.invalidate_group("g").await.unwrap();

        let after = inv.versions.resolve("g", &options).await.unwrap();
        assert!(before.is_some() && after.is_some());
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_invalidate_grouped_key() {
        let inv = invalidator();
        let tag = inv
            .versions
            .resolve("g", &VersionOptions::default())
            .await
            .unwrap()
            .unwrap();
        let cache = inv.registry.cache(DEFAULT_CACHE).unwrap();
        cache
            .set("k", Some(tag.as_str()), vec![1], &TtlPolicy::Default)
            .await
            .unwrap();

        inv.invalidate_grouped_key("k", "g", DEFAULT_CACHE)
            .await
            .unwrap();
        assert!(cache.get("k", Some(tag.as_str())).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_programming_errors_surface() {
        let inv = invalidator();
        assert!(matches!(
            inv.invalidate_key("k", "nope", None).await,
            Err(Error::UnknownCache(_))
        ));
        assert!(matches!(
            inv.invalidate_key("", DEFAULT_CACHE, None).await,
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            inv.invalidate_group("").await,
            Err(Error::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_backend_keeps_other_namespaces() {
        let inv = invalidator();
        let default = inv.registry.cache(DEFAULT_CACHE).unwrap();
        let version = inv.registry.cache(VERSION_CACHE).unwrap();
        default
            .set("a", None, vec![1], &TtlPolicy::Default)
            .await
            .unwrap();
        version
            .set("g", None, vec![2], &TtlPolicy::Default)
            .await
            .unwrap();

        inv.clear_backend(DEFAULT_CACHE).await.unwrap();

        assert!(default.get("a", None).await.unwrap().is_none());
        assert!(version.get("g", None).await.unwrap().is_some());
    }
}
