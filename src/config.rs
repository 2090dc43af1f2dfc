//! Cache configuration.
//!
//! A [`CacheConfig`] names every distributed cache the registry builds, the
//! ages used for each tier and whether recovered failures should be raised
//! (strict mode, for development and test runs). It deserializes from JSON
//! with every field optional:
//!
//! ```
//! use memo_cache::config::CacheConfig;
//!
//! let config = CacheConfig::from_json(r#"{
//!     "strict": true,
//!     "ages": { "buffer_large": 30 },
//!     "caches": { "reports": { "key_prefix": "rep", "default_ttl": 600 } }
//! }"#).unwrap();
//!
//! assert!(config.strict);
//! assert!(config.caches.contains_key("default"));
//! assert!(config.caches.contains_key("reports"));
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Name of the general-purpose distributed cache.
pub const DEFAULT_CACHE: &str = "default";

/// Name of the distributed cache holding version tags.
pub const VERSION_CACHE: &str = "version";

/// Name of the long-lived cache not tied to group invalidation.
pub const PERSIST_CACHE: &str = "persist";

/// Memcached's key length limit; composed keys above it are hashed.
pub const DEFAULT_MAX_KEY_LENGTH: usize = 250;

/// Local buffer tiers are culled once they hold this many entries.
pub const DEFAULT_BUFFER_MAX_ENTRIES: usize = 16_000;

/// Lifetimes (seconds) for each tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheAges {
    pub version: u64,
    pub default: u64,
    pub persist: u64,
    pub buffer_small: u64,
    pub buffer_medium: u64,
    pub buffer_large: u64,
    /// How long a resolved version tag is trusted from the local buffer.
    /// No group invalidation is seen by this process inside the window.
    pub buffer_version: u64,
    pub buffer_version_system: u64,
    pub buffer_version_provider: u64,
}

impl Default for CacheAges {
    fn default() -> Self {
        CacheAges {
            version: 24 * 3600,
            default: 6 * 3600,
            persist: 7 * 24 * 3600,
            buffer_small: 10,
            buffer_medium: 30,
            buffer_large: 60,
            buffer_version: 8,
            buffer_version_system: 60,
            buffer_version_provider: 30,
        }
    }
}

impl CacheAges {
    pub fn buffer_version(&self) -> Duration {
        Duration::from_secs(self.buffer_version)
    }

    pub fn buffer_version_system(&self) -> Duration {
        Duration::from_secs(self.buffer_version_system)
    }

    pub fn buffer_version_provider(&self) -> Duration {
        Duration::from_secs(self.buffer_version_provider)
    }
}

/// Settings for one named distributed cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Namespace prepended to every key stored through this cache.
    pub key_prefix: String,
    /// Default lifetime in seconds; `None` stores without expiry.
    #[serde(default)]
    pub default_ttl: Option<u64>,
}

impl BackendSettings {
    pub fn new(key_prefix: impl Into<String>, default_ttl: Option<u64>) -> Self {
        BackendSettings {
            key_prefix: key_prefix.into(),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl.map(Duration::from_secs)
    }
}

/// Top-level cache configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Raise recovered backend/serialization failures instead of degrading.
    pub strict: bool,
    pub max_key_length: usize,
    pub buffer_max_entries: usize,
    pub ages: CacheAges,
    pub caches: BTreeMap<String, BackendSettings>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let ages = CacheAges::default();
        CacheConfig {
            strict: false,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            buffer_max_entries: DEFAULT_BUFFER_MAX_ENTRIES,
            caches: Self::standard_caches(&ages),
            ages,
        }
    }
}

impl CacheConfig {
    fn standard_caches(ages: &CacheAges) -> BTreeMap<String, BackendSettings> {
        let mut caches = BTreeMap::new();
        caches.insert(
            DEFAULT_CACHE.to_string(),
            BackendSettings::new("def", Some(ages.default)),
        );
        caches.insert(
            VERSION_CACHE.to_string(),
            BackendSettings::new("ver", Some(ages.version)),
        );
        caches.insert(
            PERSIST_CACHE.to_string(),
            BackendSettings::new("per", Some(ages.persist)),
        );
        caches
    }

    /// Parse JSON configuration. Caches missing from the document are
    /// filled in with the standard `default`/`version`/`persist` set.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` on malformed JSON or invalid settings.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut config: CacheConfig = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("invalid cache config: {}", e)))?;
        for (name, settings) in Self::standard_caches(&config.ages) {
            config.caches.entry(name).or_insert(settings);
        }
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides:
    ///
    /// - `MEMO_CACHE_STRICT` (`1`/`true`) enables strict mode
    /// - `MEMO_CACHE_PLAYPEN` namespaces every key prefix, keeping
    ///   deployments that share a store apart
    /// - `MEMO_CACHE_MAX_KEY_LENGTH` overrides the hashing threshold
    pub fn from_env() -> Self {
        let mut config = CacheConfig::default();

        if let Ok(value) = std::env::var("MEMO_CACHE_STRICT") {
            config.strict = matches!(value.trim(), "1" | "true" | "TRUE" | "yes");
        }

        if let Ok(playpen) = std::env::var("MEMO_CACHE_PLAYPEN") {
            let playpen = playpen.trim().to_string();
            if !playpen.is_empty() {
                config = config.with_playpen(&playpen);
            }
        }

        if let Some(len) = std::env::var("MEMO_CACHE_MAX_KEY_LENGTH")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            config.max_key_length = len;
        }

        config
    }

    /// Prefix every cache namespace with `playpen`.
    pub fn with_playpen(mut self, playpen: &str) -> Self {
        for settings in self.caches.values_mut() {
            settings.key_prefix = format!("{}{}", playpen, settings.key_prefix);
        }
        self
    }

    pub fn with_cache(mut self, name: impl Into<String>, settings: BackendSettings) -> Self {
        self.caches.insert(name.into(), settings);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// # Errors
    /// Returns `Error::ConfigError` if a required cache is missing or a
    /// limit is zero.
    pub fn validate(&self) -> Result<()> {
        for required in [DEFAULT_CACHE, VERSION_CACHE] {
            if !self.caches.contains_key(required) {
                return Err(Error::ConfigError(format!(
                    "cache '{}' must be configured",
                    required
                )));
            }
        }
        if self.max_key_length == 0 {
            return Err(Error::ConfigError(
                "max_key_length must be positive".to_string(),
            ));
        }
        if self.buffer_max_entries == 0 {
            return Err(Error::ConfigError(
                "buffer_max_entries must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CacheConfig::default();
        config.validate().unwrap();
        assert!(!config.strict);
        assert_eq!(config.caches[DEFAULT_CACHE].key_prefix, "def");
        assert_eq!(
            config.caches[VERSION_CACHE].default_ttl(),
            Some(Duration::from_secs(24 * 3600))
        );
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CacheConfig::from_json(r#"{ "ages": { "buffer_version": 2 } }"#).unwrap();
        assert_eq!(config.ages.buffer_version(), Duration::from_secs(2));
        assert_eq!(config.ages.buffer_large, CacheAges::default().buffer_large);
        assert_eq!(config.max_key_length, DEFAULT_MAX_KEY_LENGTH);
    }

    #[test]
    fn test_json_cache_overrides_standard_entry() {
        let config = CacheConfig::from_json(
            r#"{ "caches": { "default": { "key_prefix": "v42", "default_ttl": null } } }"#,
        )
        .unwrap();
        assert_eq!(config.caches[DEFAULT_CACHE].key_prefix, "v42");
        assert_eq!(config.caches[DEFAULT_CACHE].default_ttl(), None);
        assert!(config.caches.contains_key(VERSION_CACHE));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = CacheConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_validate_requires_version_cache() {
        let mut config = CacheConfig::default();
        config.caches.remove(VERSION_CACHE);
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_playpen_prefixes_every_cache() {
        let config = CacheConfig::default().with_playpen("qa-");
        assert_eq!(config.caches[DEFAULT_CACHE].key_prefix, "qa-def");
        assert_eq!(config.caches[VERSION_CACHE].key_prefix, "qa-ver");
    }
}
