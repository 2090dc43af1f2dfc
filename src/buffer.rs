//! Process-local buffer tiers.
//!
//! Three short-lived in-memory caches sit in front of the distributed tier.
//! Buffered copies are never distributed: invalidating on one process does
//! not reach another process's buffer, so a stale read there is bounded
//! only by the tier's lifetime.

use crate::backend::InMemoryBackend;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::key::full_key;
use crate::observability::TtlPolicy;
use crate::registry::NamedCache;
use std::fmt;
use std::time::Duration;

/// Buffer tier, ordered by lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferTier {
    Small,
    Medium,
    Large,
}

impl BufferTier {
    pub const ALL: [BufferTier; 3] = [BufferTier::Small, BufferTier::Medium, BufferTier::Large];

    pub fn name(&self) -> &'static str {
        match self {
            BufferTier::Small => "local_small",
            BufferTier::Medium => "local_medium",
            BufferTier::Large => "local_large",
        }
    }

    fn key_prefix(&self) -> &'static str {
        match self {
            BufferTier::Small => "ls",
            BufferTier::Medium => "lm",
            BufferTier::Large => "ll",
        }
    }
}

impl fmt::Display for BufferTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// This process's buffer: one bounded in-memory cache per tier.
///
/// Clones share the same stores, so every component built from one
/// registry sees the same buffered entries.
#[derive(Clone)]
pub struct LocalBuffer {
    small: NamedCache<InMemoryBackend>,
    medium: NamedCache<InMemoryBackend>,
    large: NamedCache<InMemoryBackend>,
}

impl LocalBuffer {
    pub fn new(config: &CacheConfig) -> Self {
        let tier = |tier: BufferTier, age: u64| {
            NamedCache::new(
                tier.name(),
                InMemoryBackend::with_max_entries(config.buffer_max_entries),
                tier.key_prefix(),
                Some(Duration::from_secs(age)),
                config.max_key_length,
            )
        };

        LocalBuffer {
            small: tier(BufferTier::Small, config.ages.buffer_small),
            medium: tier(BufferTier::Medium, config.ages.buffer_medium),
            large: tier(BufferTier::Large, config.ages.buffer_large),
        }
    }

    pub fn tier(&self, tier: BufferTier) -> &NamedCache<InMemoryBackend> {
        match tier {
            BufferTier::Small => &self.small,
            BufferTier::Medium => &self.medium,
            BufferTier::Large => &self.large,
        }
    }

    /// Buffered bytes for `key` as stored under the distributed
    /// `namespace`. Including the namespace keeps entries from different
    /// named caches apart inside one tier.
    pub async fn get(
        &self,
        tier: BufferTier,
        namespace: &str,
        key: &str,
        version: Option<&str>,
    ) -> Result<Option<Vec<u8>>> {
        let value = self
            .tier(tier)
            .get(&full_key(&[namespace, key]), version)
            .await?;
        if value.is_some() {
            debug!("BUFFER HIT {}: {}", tier, key);
        }
        Ok(value)
    }

    /// Buffer `value`; a `ttl` of `None` uses the tier's own lifetime.
    pub async fn set(
        &self,
        tier: BufferTier,
        namespace: &str,
        key: &str,
        version: Option<&str>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.tier(tier)
            .set(&full_key(&[namespace, key]), version, value, &TtlPolicy::from(ttl))
            .await
    }

    pub async fn delete(
        &self,
        tier: BufferTier,
        namespace: &str,
        key: &str,
        version: Option<&str>,
    ) -> Result<()> {
        self.tier(tier)
            .delete(&full_key(&[namespace, key]), version)
            .await
    }

    /// Delete from every tier. The tier used at write time is not tracked.
    pub async fn delete_all_tiers(
        &self,
        namespace: &str,
        key: &str,
        version: Option<&str>,
    ) -> Result<()> {
        let results = futures::future::join_all(
            BufferTier::ALL
                .iter()
                .map(|tier| self.delete(*tier, namespace, key, version)),
        )
        .await;
        results.into_iter().collect()
    }

    /// Flush every tier.
    pub async fn clear(&self) -> Result<()> {
        for tier in BufferTier::ALL {
            self.tier(tier).clear().await?;
        }
        debug!("Local buffer cleared");
        Ok(())
    }

    /// Entries currently held across all tiers.
    pub fn len(&self) -> usize {
        BufferTier::ALL
            .iter()
            .map(|tier| self.tier(*tier).backend().len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
