//! # memo-cache
//!
//! Two-tier memoization: a short-lived process-local buffer in front of a
//! distributed key/value store, with deterministic keys and O(1) group
//! invalidation through version tags.
//!
//! ## Features
//!
//! - **Two tiers:** local buffer tiers absorb hot lookups before the
//!   distributed cache is consulted
//! - **Group invalidation:** values cached under a group carry the group's
//!   version tag in their key; deleting the tag orphans all of them at once
//! - **Memoized functions:** [`Memoized`] derives keys from the function
//!   name and canonicalized arguments
//! - **Degrades, never fails:** backend and decoding failures turn into
//!   misses unless strict mode is on
//! - **Backend agnostic:** in-memory by default, Redis behind the `redis`
//!   feature, or any [`CacheBackend`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use memo_cache::{CacheConfig, CacheService, CallOptions};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct User {
//!     name: String,
//! }
//!
//! # async fn example() -> memo_cache::Result<()> {
//! let cache = CacheService::in_memory(CacheConfig::default())?;
//! let options = CallOptions::default().group("users");
//!
//! // Computed once, then served from the buffer or distributed tier.
//! let user = cache
//!     .get_or_compute("user:42", || async { Some(User { name: "a".into() }) }, &options)
//!     .await?;
//!
//! // Every value cached under "users" is now stale.
//! cache.invalidate_group("users").await?;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod buffer;
pub mod call_cache;
pub mod config;
pub mod error;
pub mod groups;
pub mod invalidate;
pub mod key;
pub mod memoize;
pub mod observability;
pub mod registry;
pub mod serialization;
pub mod service;
pub mod stash;
pub mod version;

// Re-exports for convenience
pub use backend::{CacheBackend, InMemoryBackend};
pub use buffer::{BufferTier, LocalBuffer};
pub use call_cache::{CallCache, CallOptions};
pub use config::{BackendSettings, CacheAges, CacheConfig};
pub use error::{Error, Result};
pub use groups::TenantGroups;
pub use invalidate::Invalidator;
pub use key::{build_key, CacheKeyBuilder};
pub use memoize::{CacheGroup, CallPlan, DerivedKey, Memoized, OwnerGroup};
pub use observability::{CacheMetrics, NoOpMetrics, TtlPolicy};
pub use registry::{CacheRegistry, NamedCache};
pub use service::CacheService;
pub use stash::Stash;
pub use version::{BufferAge, VersionOptions, VersionStore, VersionTag};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
