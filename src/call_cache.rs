//! The memoization engine.
//!
//! [`CallCache::get_or_compute`] walks the tiers in order:
//!
//! 1. resolve the group's version tag (when a group is given)
//! 2. local buffer
//! 3. distributed cache, keyed by value key + version
//! 4. compute
//! 5. write the distributed tier (unless `no_set`)
//! 6. write the local buffer, whether the value came from the distributed
//!    tier or was computed
//!
//! `None` from the compute function is never cached. Backend and decoding
//! failures degrade to a miss or an unpersisted value; only programming
//! errors reach the caller unless the cache is strict.

use crate::backend::CacheBackend;
use crate::buffer::BufferTier;
use crate::config::{DEFAULT_CACHE, VERSION_CACHE};
use crate::error::{Error, Result};
use crate::observability::{CacheMetrics, NoOpMetrics, TtlPolicy};
use crate::registry::CacheRegistry;
use crate::serialization::{pack, unpack};
use crate::version::{BufferAge, VersionOptions, VersionStore, VersionTag};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-call options for [`CallCache::get_or_compute`].
///
/// ```
/// use memo_cache::{BufferTier, CallOptions};
/// use std::time::Duration;
///
/// let options = CallOptions::default()
///     .group("users")
///     .ttl(Duration::from_secs(300))
///     .buffered(Some(BufferTier::Small));
/// assert_eq!(options.cache_name, "default");
/// ```
#[derive(Clone, Debug)]
pub struct CallOptions {
    /// Named distributed cache to read and write.
    pub cache_name: String,
    /// Lifetime of the distributed entry.
    pub ttl: TtlPolicy,
    /// Invalidation group whose version tag is part of the key.
    pub group_key: Option<String>,
    /// Buffer tier, or `None` to skip the local buffer.
    pub buffered: Option<BufferTier>,
    /// Buffer lifetime; `None` uses the tier's age.
    pub buffer_ttl: Option<Duration>,
    /// Never write the distributed tier.
    pub no_set: bool,
    /// Skip both reads and recompute; still writes through.
    pub bypass: bool,
    /// Buffering for the group's version tag.
    pub version_buffer: BufferAge,
}

impl Default for CallOptions {
    fn default() -> Self {
        CallOptions {
            cache_name: DEFAULT_CACHE.to_string(),
            ttl: TtlPolicy::Default,
            group_key: None,
            buffered: Some(BufferTier::Large),
            buffer_ttl: None,
            no_set: false,
            bypass: false,
            version_buffer: BufferAge::Default,
        }
    }
}

impl CallOptions {
    pub fn cache(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    pub fn ttl(mut self, ttl: impl Into<TtlPolicy>) -> Self {
        self.ttl = ttl.into();
        self
    }

    pub fn group(mut self, group_key: impl Into<String>) -> Self {
        self.group_key = Some(group_key.into());
        self
    }

    pub fn buffered(mut self, tier: Option<BufferTier>) -> Self {
        self.buffered = tier;
        self
    }

    pub fn buffer_ttl(mut self, ttl: Duration) -> Self {
        self.buffer_ttl = Some(ttl);
        self
    }

    pub fn no_set(mut self) -> Self {
        self.no_set = true;
        self
    }

    pub fn bypass(mut self) -> Self {
        self.bypass = true;
        self
    }

    pub fn version_buffer(mut self, age: BufferAge) -> Self {
        self.version_buffer = age;
        self
    }
}

/// Two-tier memoization over a [`CacheRegistry`].
#[derive(Clone)]
pub struct CallCache<B: CacheBackend> {
    registry: Arc<CacheRegistry<B>>,
    versions: VersionStore<B>,
    metrics: Arc<dyn CacheMetrics>,
    strict: bool,
}

impl<B: CacheBackend> CallCache<B> {
    /// # Errors
    /// Returns `Error::UnknownCache` if the registry has no version cache.
    pub fn new(registry: Arc<CacheRegistry<B>>) -> Result<Self> {
        let config = registry.config();
        let versions = VersionStore::new(
            registry.cache(VERSION_CACHE)?.clone(),
            registry.buffer().clone(),
            config.ages.buffer_version(),
            config.strict,
        );
        let strict = config.strict;

        Ok(CallCache {
            registry,
            versions,
            metrics: Arc::new(NoOpMetrics),
            strict,
        })
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &Arc<CacheRegistry<B>> {
        &self.registry
    }

    pub fn versions(&self) -> &VersionStore<B> {
        &self.versions
    }

    pub fn metrics(&self) -> &Arc<dyn CacheMetrics> {
        &self.metrics
    }

    /// Cached value for `key`, computing and storing it on a miss.
    ///
    /// ```no_run
    /// # use memo_cache::{CallCache, CallOptions, CacheRegistry, CacheConfig};
    /// # use std::sync::Arc;
    /// # async fn example() -> memo_cache::Result<()> {
    /// let registry = Arc::new(CacheRegistry::in_memory(CacheConfig::default())?);
    /// let calls = CallCache::new(registry)?;
    ///
    /// let name: Option<String> = calls
    ///     .get_or_compute("user:42", || async { Some("a".to_string()) }, &CallOptions::default().group("users"))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// Returns `Error::InvalidKey` for an empty key and
    /// `Error::UnknownCache` for an unconfigured cache name. In strict mode
    /// recovered backend and serialization failures are returned too.
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
        self.try_get_or_compute(key, || async move { Ok::<_, Error>(compute().await) }, options)
            .await
    }

    /// Like [`get_or_compute`](Self::get_or_compute) with a fallible compute
    /// function. A compute error is returned unchanged and nothing is cached.
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
        if key.is_empty() {
            return Err(Error::InvalidKey("cache key must not be empty".to_string()).into());
        }
        let timer = Instant::now();
        let cache = self.registry.cache(&options.cache_name)?;
        let buffer = self.registry.buffer();
        let namespace = cache.key_prefix();

        let tag: Option<VersionTag> = match &options.group_key {
            Some(group) => {
                let version_options = VersionOptions::default().buffered(options.version_buffer);
                self.versions.resolve(group, &version_options).await?
            }
            None => None,
        };
        let version = tag.as_ref().map(VersionTag::as_str);

        let mut found = None;
        if !options.bypass {
            if let Some(tier) = options.buffered {
                let buffered = self.recover(key, buffer.get(tier, namespace, key, version).await)?;
                if let Some(bytes) = buffered.flatten() {
                    if let Some(value) = self.recover(key, unpack::<T>(&bytes))? {
                        self.metrics.record_buffer_hit(key);
                        return Ok(Some(value));
                    }
                }
            }

            let stored = self.recover(key, cache.get(key, version).await)?;
            if let Some(bytes) = stored.flatten() {
                if let Some(value) = self.recover(key, unpack::<T>(&bytes))? {
                    self.metrics.record_hit(key, timer.elapsed());
                    debug!("CACHE HIT {} ({:?})", key, version);
                    found = Some((value, bytes));
                }
            }
        }

        let (value, packed) = match found {
            Some((value, bytes)) => (value, Some(bytes)),
            None => {
                let value = match compute().await? {
                    Some(value) => value,
                    None => {
                        debug!("CACHE NOP {}: computed None", key);
                        return Ok(None);
                    }
                };
                self.metrics.record_miss(key, timer.elapsed());

                let packed = self.recover(key, pack(&value))?;
                if let (Some(bytes), false) = (&packed, options.no_set) {
                    let started = Instant::now();
                    let stored = self.recover(
                        key,
                        cache.set(key, version, bytes.clone(), &options.ttl).await,
                    )?;
                    if stored.is_some() {
                        self.metrics.record_set(key, started.elapsed());
                        debug!("CACHE SET {} ({:?})", key, version);
                    }
                }
                (value, packed)
            }
        };

        if let (Some(tier), Some(bytes)) = (options.buffered, packed) {
            self.recover(
                key,
                buffer
                    .set(tier, namespace, key, version, bytes, options.buffer_ttl)
                    .await,
            )?;
        }

        Ok(Some(value))
    }

    /// Boundary adapter: `Ok(None)` for a logged, recovered failure.
    fn recover<V>(&self, key: &str, result: Result<V>) -> Result<Option<V>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_fatal() || self.strict => Err(e),
            Err(e) if e.is_corrupt_entry() => {
                warn!("Discarding unreadable entry for {}: {}", key, e);
                self.metrics.record_error(key, &e.to_string());
                Ok(None)
            }
            Err(e) => {
                error!("Cache operation failed for {}: {}", key, e);
                self.metrics.record_error(key, &e.to_string());
                Ok(None)
            }
        }
    }
}
