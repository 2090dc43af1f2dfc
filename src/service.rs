//! High-level cache service.
//!
//! Bundles the call cache, invalidation and tenant groups behind one
//! cheaply clonable handle.

use crate::backend::{CacheBackend, InMemoryBackend};
use crate::call_cache::{CallCache, CallOptions};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::groups::TenantGroups;
use crate::invalidate::Invalidator;
use crate::observability::CacheMetrics;
use crate::registry::CacheRegistry;
use crate::version::{VersionOptions, VersionTag};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// Caller-facing cache API.
///
/// Every component inside shares one [`CacheRegistry`], so clones of a
/// service (and services built from the same registry) see the same
/// buffer. Services built over one backend but separate registries behave
/// like separate processes sharing a distributed cache.
///
/// # Example
///
/// ```ignore
/// use memo_cache::{CacheConfig, CacheService, CallOptions};
///
/// let cache = CacheService::in_memory(CacheConfig::from_env())?;
///
/// pub struct UserService {
///     cache: CacheService<InMemoryBackend>,
///     repo: Arc<UserRepository>,
/// }
///
/// impl UserService {
///     pub async fn get(&self, id: u64) -> memo_cache::Result<Option<User>> {
///         let options = CallOptions::default().group("users");
///         self.cache
///             .get_or_compute(&format!("user:{}", id), || self.repo.find(id), &options)
///             .await
///     }
///
///     pub async fn rename(&self, id: u64, name: &str) -> memo_cache::Result<()> {
///         self.repo.rename(id, name).await;
///         self.cache.invalidate_group("users").await
///     }
/// }
/// ```
#[derive(Clone)]
pub struct CacheService<B: CacheBackend> {
    calls: Arc<CallCache<B>>,
    invalidator: Invalidator<B>,
}

impl<B: CacheBackend> CacheService<B> {
    /// Create a service whose named caches all share `backend`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the configuration is invalid.
    pub fn new(config: CacheConfig, backend: B) -> Result<Self> {
        Self::from_registry(CacheRegistry::new(config, backend)?)
    }

    /// Create a service over a prepared registry.
    ///
    /// # Errors
    /// Returns `Error::UnknownCache` if the registry has no version cache.
    pub fn from_registry(registry: CacheRegistry<B>) -> Result<Self> {
        let calls = CallCache::new(Arc::new(registry))?;
        let invalidator = Invalidator::new(calls.registry().clone(), calls.versions().clone());
        Ok(CacheService {
            calls: Arc::new(calls),
            invalidator,
        })
    }

    /// Replace the metrics handler.
    pub fn with_metrics(self, metrics: Box<dyn CacheMetrics>) -> Self {
        let metrics: Arc<dyn CacheMetrics> = Arc::from(metrics);
        let calls = CallCache::clone(&self.calls).with_metrics(metrics.clone());
        CacheService {
            calls: Arc::new(calls),
            invalidator: self.invalidator.with_metrics(metrics),
        }
    }

    /// See [`CallCache::get_or_compute`].
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        compute: F,
        options: &CallOptions,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        self.calls.get_or_compute(key, compute, options).await
    }

    /// See [`CallCache::try_get_or_compute`].
    pub async fn try_get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        compute: F,
        options: &CallOptions,
    ) -> std::result::Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<Error>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        self.calls.try_get_or_compute(key, compute, options).await
    }

    /// See [`Invalidator::invalidate_key`].
    pub async fn invalidate_key(
        &self,
        key: &str,
        cache_name: &str,
        version: Option<&str>,
    ) -> Result<()> {
        self.invalidator
            .invalidate_key(key, cache_name, version)
            .await
    }

    /// See [`Invalidator::invalidate_grouped_key`].
    pub async fn invalidate_grouped_key(
        &self,
        key: &str,
        group_key: &str,
        cache_name: &str,
    ) -> Result<()> {
        self.invalidator
            .invalidate_grouped_key(key, group_key, cache_name)
            .await
    }

    /// See [`Invalidator::invalidate_group`].
    pub async fn invalidate_group(&self, group_key: &str) -> Result<()> {
        self.invalidator.invalidate_group(group_key).await
    }

    /// See [`Invalidator::clear_backend`].
    pub async fn clear_backend(&self, cache_name: &str) -> Result<()> {
        self.invalidator.clear_backend(cache_name).await
    }

    /// See [`Invalidator::clear_local_buffer`].
    pub async fn clear_local_buffer(&self) -> Result<()> {
        self.invalidator.clear_local_buffer().await
    }

    /// Resolve a group's version tag directly.
    pub async fn resolve_version(
        &self,
        group_key: &str,
        options: &VersionOptions,
    ) -> Result<Option<VersionTag>> {
        self.calls.versions().resolve(group_key, options).await
    }

    /// Tenant scope helper sharing this service's stores.
    pub fn tenant_groups(&self) -> TenantGroups<B> {
        TenantGroups::new(
            self.calls.versions().clone(),
            self.invalidator.clone(),
            self.calls.registry().config().ages.clone(),
        )
    }

    /// Forget everything this process has buffered. Distributed entries are
    /// untouched.
    pub async fn reset(&self) -> Result<()> {
        self.calls.registry().reset().await
    }

    pub fn registry(&self) -> &CacheRegistry<B> {
        self.calls.registry()
    }

    /// Get a reference to the underlying call cache.
    pub fn calls(&self) -> &CallCache<B> {
        &self.calls
    }
}

impl CacheService<InMemoryBackend> {
    /// Service over a fresh in-memory distributed tier.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the configuration is invalid.
    pub fn in_memory(config: CacheConfig) -> Result<Self> {
        Self::new(config, InMemoryBackend::new())
    }
}
