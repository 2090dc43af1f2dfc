//! Process-local backend.
//!
//! Backs the local buffer tiers and stands in for the distributed store in
//! single-process deployments and tests. Entries expire lazily on access.
//! Every `sweep_interval` writes the store also drops whatever has expired,
//! which reclaims entries nobody reads again (values orphaned by a group
//! invalidation). When `max_entries` is reached the whole store is culled
//! rather than a random subset, so short-lived buffers never serve a
//! half-evicted view.

use super::CacheBackend;
use crate::error::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Writes between sweeps of expired entries.
pub const DEFAULT_SWEEP_INTERVAL: usize = 1024;

struct StoredEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        StoredEntry { data, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }
}

/// Thread-safe in-memory backend over a sharded `DashMap`.
///
/// Clones share the same store, so one instance handed to several named
/// caches behaves like one server with several key namespaces.
///
/// ```no_run
/// use memo_cache::backend::{CacheBackend, InMemoryBackend};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> memo_cache::Result<()> {
///     let backend = InMemoryBackend::with_max_entries(1_000);
///     backend.set("ls:tag", b"a1b2c3d4".to_vec(), Some(Duration::from_secs(5))).await?;
///     assert!(backend.get("ls:tag").await?.is_some());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    store: Arc<DashMap<String, StoredEntry>>,
    max_entries: Option<usize>,
    writes: Arc<AtomicUsize>,
    sweep_interval: usize,
}

impl InMemoryBackend {
    /// Unbounded store.
    pub fn new() -> Self {
        InMemoryBackend {
            store: Arc::new(DashMap::new()),
            max_entries: None,
            writes: Arc::new(AtomicUsize::new(0)),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Store that is emptied once it holds `max_entries` entries.
    pub fn with_max_entries(max_entries: usize) -> Self {
        InMemoryBackend {
            max_entries: Some(max_entries.max(1)),
            ..Self::new()
        }
    }

    /// Sweep expired entries every `writes` writes instead of the default.
    pub fn with_sweep_interval(mut self, writes: usize) -> Self {
        self.sweep_interval = writes.max(1);
        self
    }

    /// Number of entries currently held, including expired ones not yet
    /// reclaimed.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.store.len();
        self.store.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.store.len())
    }

    pub fn stats(&self) -> BackendStats {
        let total_bytes: usize = self.store.iter().map(|entry| entry.data.len()).sum();
        let expired_entries = self.store.iter().filter(|entry| entry.is_expired()).count();

        BackendStats {
            total_entries: self.store.len(),
            expired_entries,
            total_bytes,
        }
    }

    fn sweep_if_due(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.sweep_interval == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!("InMemory SWEEP {} expired entries", purged);
            }
        }
    }

    fn cull_if_full(&self, incoming: &str) {
        if let Some(max) = self.max_entries {
            if self.store.len() >= max && !self.store.contains_key(incoming) {
                let culled = self.store.len();
                self.store.clear();
                debug!("InMemory CULL {} entries (max {})", culled, max);
            }
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let expired = match self.store.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.data.clone())),
            Some(_) => true,
            None => false,
        };

        // Ref guard is released above; removing while holding it would deadlock the shard.
        if expired {
            self.store.remove_if(key, |_, entry| entry.is_expired());
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.sweep_if_due();
        self.cull_if_full(key);
        self.store.insert(key.to_string(), StoredEntry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .store
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false))
    }

    async fn mdelete(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.store.remove(*key);
        }
        Ok(())
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<()> {
        let before = self.store.len();
        self.store.retain(|key, _| !key.starts_with(prefix));
        debug!(
            "InMemory CLEAR prefix '{}' ({} entries)",
            prefix,
            before.saturating_sub(self.store.len())
        );
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.store.clear();
        Ok(())
    }
}

/// Snapshot of an in-memory store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub total_bytes: usize,
}
