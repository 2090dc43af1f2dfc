//! Metrics hooks and TTL selection.
//!
//! Implement [`CacheMetrics`] to feed cache decisions into a monitoring
//! system. The default methods log through the `log` crate; [`NoOpMetrics`]
//! discards everything and is what a service starts with.
//!
//! ```
//! use memo_cache::{CacheConfig, CacheMetrics, CacheService};
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! #[derive(Default)]
//! struct BufferHits(AtomicU64);
//!
//! impl CacheMetrics for BufferHits {
//!     fn record_buffer_hit(&self, _key: &str) {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!     }
//! }
//!
//! # fn main() -> memo_cache::Result<()> {
//! let cache = CacheService::in_memory(CacheConfig::default())?
//!     .with_metrics(Box::new(BufferHits::default()));
//! # let _ = cache;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

/// Trait for cache metrics collection.
pub trait CacheMetrics: Send + Sync {
    /// Value served from this process's local buffer.
    fn record_buffer_hit(&self, key: &str) {
        debug!("Cache BUFFER HIT: {}", key);
    }

    /// Value served from the distributed tier.
    fn record_hit(&self, key: &str, duration: Duration) {
        debug!("Cache HIT: {} took {:?}", key, duration);
    }

    /// Both tiers missed (or were bypassed) and the value was computed.
    fn record_miss(&self, key: &str, duration: Duration) {
        debug!("Cache MISS: {} took {:?}", key, duration);
    }

    /// Value written to the distributed tier.
    fn record_set(&self, key: &str, duration: Duration) {
        debug!("Cache SET: {} took {:?}", key, duration);
    }

    /// Key or group invalidated.
    fn record_delete(&self, key: &str) {
        debug!("Cache DELETE: {}", key);
    }

    /// A backend or serialization failure was recovered from.
    fn record_error(&self, key: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_buffer_hit(&self, _key: &str) {}
    fn record_hit(&self, _key: &str, _duration: Duration) {}
    fn record_miss(&self, _key: &str, _duration: Duration) {}
    fn record_set(&self, _key: &str, _duration: Duration) {}
    fn record_delete(&self, _key: &str) {}
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// Lifetime requested for a write.
///
/// `Default` defers to the target cache's configured lifetime; `Forever`
/// stores without expiry, which is distinct from "not in cache".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TtlPolicy {
    #[default]
    Default,
    Fixed(Duration),
    Forever,
}

impl TtlPolicy {
    /// Concrete TTL given the target's default.
    pub fn resolve(&self, backend_default: Option<Duration>) -> Option<Duration> {
        match self {
            TtlPolicy::Default => backend_default,
            TtlPolicy::Fixed(d) => Some(*d),
            TtlPolicy::Forever => None,
        }
    }
}

impl From<Duration> for TtlPolicy {
    fn from(d: Duration) -> Self {
        TtlPolicy::Fixed(d)
    }
}

impl From<Option<Duration>> for TtlPolicy {
    fn from(d: Option<Duration>) -> Self {
        d.map(TtlPolicy::Fixed).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_policy_resolution() {
        let backend = Some(Duration::from_secs(60));
        assert_eq!(TtlPolicy::Default.resolve(backend), backend);
        assert_eq!(TtlPolicy::Default.resolve(None), None);
        assert_eq!(
            TtlPolicy::Fixed(Duration::from_secs(5)).resolve(backend),
            Some(Duration::from_secs(5))
        );
        assert_eq!(TtlPolicy::Forever.resolve(backend), None);
    }

    #[test]
    fn test_ttl_policy_from_option() {
        assert_eq!(TtlPolicy::from(None), TtlPolicy::Default);
        assert_eq!(
            TtlPolicy::from(Some(Duration::from_secs(1))),
            TtlPolicy::Fixed(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_noop_metrics() {
        let metrics = NoOpMetrics;
        metrics.record_buffer_hit("key");
        metrics.record_hit("key", Duration::from_millis(1));
        metrics.record_error("key", "boom");
    }
}
