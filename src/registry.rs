//! Named caches and the registry that owns them.
//!
//! Every distributed cache a caller can address (`default`, `version`,
//! `persist`, ...) is a [`NamedCache`]: a backend handle plus the key
//! prefix, default lifetime and key length bound it applies. The
//! [`CacheRegistry`] is built once from a [`CacheConfig`] and passed
//! around explicitly; tests build a fresh one per case.

use crate::backend::{CacheBackend, InMemoryBackend};
use crate::buffer::LocalBuffer;
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::key::{build_key, full_key};
use crate::observability::TtlPolicy;
use std::collections::HashMap;
use std::time::Duration;

/// One addressable cache: a backend seen through a key namespace.
#[derive(Clone)]
pub struct NamedCache<B: CacheBackend> {
    name: String,
    backend: B,
    key_prefix: String,
    default_ttl: Option<Duration>,
    max_key_length: usize,
}

impl<B: CacheBackend> NamedCache<B> {
    pub fn new(
        name: impl Into<String>,
        backend: B,
        key_prefix: impl Into<String>,
        default_ttl: Option<Duration>,
        max_key_length: usize,
    ) -> Self {
        NamedCache {
            name: name.into(),
            backend,
            key_prefix: key_prefix.into(),
            default_ttl,
            max_key_length,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Backend key for `key` at `version`.
    ///
    /// Keys longer than the configured bound keep their prefix and have the
    /// identifier/version part replaced by its digest, so prefix flushes
    /// still reach them.
    ///
    /// # Errors
    /// Returns `Error::InvalidKey` if `key` is empty.
    pub fn key(&self, key: &str, version: Option<&str>) -> Result<String> {
        let composed = build_key(key, version, Some(&self.key_prefix), false)?;
        if composed.len() <= self.max_key_length {
            return Ok(composed);
        }
        let digest = build_key(key, version, None, true)?;
        Ok(full_key(&[&self.key_prefix, &digest]))
    }

    pub async fn get(&self, key: &str, version: Option<&str>) -> Result<Option<Vec<u8>>> {
        let backend_key = self.key(key, version)?;
        self.backend.get(&backend_key).await
    }

    pub async fn set(
        &self,
        key: &str,
        version: Option<&str>,
        value: Vec<u8>,
        ttl: &TtlPolicy,
    ) -> Result<()> {
        let backend_key = self.key(key, version)?;
        self.backend
            .set(&backend_key, value, ttl.resolve(self.default_ttl))
            .await
    }

    pub async fn delete(&self, key: &str, version: Option<&str>) -> Result<()> {
        let backend_key = self.key(key, version)?;
        self.backend.delete(&backend_key).await
    }

    /// Flush this cache's namespace, or the whole backend when it has none.
    pub async fn clear(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            self.backend.clear_all().await
        } else {
            let namespace = format!("{}{}", self.key_prefix, crate::key::KEY_DELIMITER);
            self.backend.clear_prefix(&namespace).await
        }
    }
}

/// Explicitly constructed cache context: named distributed caches plus this
/// process's local buffer.
#[derive(Clone)]
pub struct CacheRegistry<B: CacheBackend> {
    caches: HashMap<String, NamedCache<B>>,
    buffer: LocalBuffer,
    config: CacheConfig,
}

impl<B: CacheBackend> CacheRegistry<B> {
    /// Build every configured cache over one shared backend.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the configuration is invalid.
    pub fn new(config: CacheConfig, backend: B) -> Result<Self> {
        config.validate()?;

        let caches = config
            .caches
            .iter()
            .map(|(name, settings)| {
                let cache = NamedCache::new(
                    name.clone(),
                    backend.clone(),
                    settings.key_prefix.clone(),
                    settings.default_ttl(),
                    config.max_key_length,
                );
                (name.clone(), cache)
            })
            .collect::<HashMap<_, _>>();

        debug!("Cache registry built with {} named caches", caches.len());

        Ok(CacheRegistry {
            caches,
            buffer: LocalBuffer::new(&config),
            config,
        })
    }

    /// Point one configured cache at its own backend.
    ///
    /// # Errors
    /// Returns `Error::UnknownCache` if `name` is not configured.
    pub fn with_backend(mut self, name: &str, backend: B) -> Result<Self> {
        let settings = self
            .config
            .caches
            .get(name)
            .ok_or_else(|| Error::UnknownCache(name.to_string()))?;
        let cache = NamedCache::new(
            name,
            backend,
            settings.key_prefix.clone(),
            settings.default_ttl(),
            self.config.max_key_length,
        );
        self.caches.insert(name.to_string(), cache);
        Ok(self)
    }

    /// Look up a named cache.
    ///
    /// # Errors
    /// Returns `Error::UnknownCache` if `name` is not configured.
    pub fn cache(&self, name: &str) -> Result<&NamedCache<B>> {
        self.caches
            .get(name)
            .ok_or_else(|| Error::UnknownCache(name.to_string()))
    }

    pub fn cache_names(&self) -> impl Iterator<Item = &str> {
        self.caches.keys().map(String::as_str)
    }

    pub fn buffer(&self) -> &LocalBuffer {
        &self.buffer
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Drop everything this process has buffered.
    pub async fn reset(&self) -> Result<()> {
        self.buffer.clear().await
    }
}

impl CacheRegistry<InMemoryBackend> {
    /// Registry whose distributed tier is a fresh in-memory store.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the configuration is invalid.
    pub fn in_memory(config: CacheConfig) -> Result<Self> {
        Self::new(config, InMemoryBackend::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendSettings, DEFAULT_CACHE, VERSION_CACHE};
    use crate::key::HASHED_KEY_LEN;

    fn registry() -> CacheRegistry<InMemoryBackend> {
        CacheRegistry::in_memory(CacheConfig::default()).unwrap()
    }

    #[test]
    fn test_named_cache_key_uses_prefix() {
        let registry = registry();
        let cache = registry.cache(DEFAULT_CACHE).unwrap();
        assert_eq!(cache.key("user:42", None).unwrap(), "def:user:42");
        assert_eq!(
            cache.key("user:42", Some("a1b2c3d4")).unwrap(),
            "def:user:42:a1b2c3d4"
        );
    }

    #[test]
    fn test_oversize_key_is_hashed_with_prefix() {
        let registry = registry();
        let cache = registry.cache(DEFAULT_CACHE).unwrap();
        let long = "x".repeat(400);

        let key = cache.key(&long, Some("v1")).unwrap();
        assert!(key.starts_with("def:"));
        assert_eq!(key.len(), "def:".len() + HASHED_KEY_LEN);
        assert_eq!(key, cache.key(&long, Some("v1")).unwrap());
        assert_ne!(key, cache.key(&long, Some("v2")).unwrap());
    }

    #[test]
    fn test_unknown_cache() {
        let registry = registry();
        assert!(matches!(
            registry.cache("nope"),
            Err(Error::UnknownCache(name)) if name == "nope"
        ));
    }

    #[tokio::test]
    async fn test_named_caches_share_backend_by_prefix() {
        let registry = registry();
        let default = registry.cache(DEFAULT_CACHE).unwrap();
        let version = registry.cache(VERSION_CACHE).unwrap();

        default
            .set("k", None, vec![1], &TtlPolicy::Default)
            .await
            .unwrap();
        version
            .set("k", None, vec![2], &TtlPolicy::Default)
            .await
            .unwrap();

        assert_eq!(default.get("k", None).await.unwrap(), Some(vec![1]));
        assert_eq!(version.get("k", None).await.unwrap(), Some(vec![2]));

        default.clear().await.unwrap();
        assert_eq!(default.get("k", None).await.unwrap(), None);
        assert_eq!(version.get("k", None).await.unwrap(), Some(vec![2]));
    }

    #[tokio::test]
    async fn test_with_backend_isolates_cache() {
        let shared = InMemoryBackend::new();
        let dedicated = InMemoryBackend::new();
        let config = CacheConfig::default().with_cache("reports", BackendSettings::new("rep", None));
        let registry = CacheRegistry::new(config, shared.clone())
            .unwrap()
            .with_backend("reports", dedicated.clone())
            .unwrap();

        registry
            .cache("reports")
            .unwrap()
            .set("r1", None, vec![7], &TtlPolicy::Forever)
            .await
            .unwrap();

        assert_eq!(dedicated.len(), 1);
        assert!(shared.is_empty());
        assert!(registry.clone().with_backend("missing", dedicated).is_err());
    }
}
