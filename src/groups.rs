//! Chained tenant invalidation groups.
//!
//! Scopes nest system → provider → sandbox. Each scope's group key embeds
//! the version tag of the scope above it, so deleting an upstream tag
//! renames every group below it and everything cached under them goes
//! stale together (once buffered tags age out).
//!
//! Chaining costs one version lookup per level. The small buffer tier
//! absorbs most of them.

use crate::backend::CacheBackend;
use crate::config::CacheAges;
use crate::error::Result;
use crate::invalidate::Invalidator;
use crate::key::full_key;
use crate::version::{BufferAge, VersionOptions, VersionStore};
use std::fmt::Display;

/// Namespace used when callers do not name one.
pub const DEFAULT_NAMESPACE: &str = "tg";

const SYSTEM_GROUP: &str = "cgsys";
const PROVIDER_GROUP: &str = "cgp";
const SANDBOX_GROUP: &str = "cgs";

/// Resolves and invalidates tenant-scoped group keys.
///
/// The strings returned by [`system`](Self::system),
/// [`provider`](Self::provider) and [`sandbox`](Self::sandbox) are meant to
/// be passed as the `group_key` of cached calls.
#[derive(Clone)]
pub struct TenantGroups<B: CacheBackend> {
    versions: VersionStore<B>,
    invalidator: Invalidator<B>,
    ages: CacheAges,
}

impl<B: CacheBackend> TenantGroups<B> {
    pub fn new(versions: VersionStore<B>, invalidator: Invalidator<B>, ages: CacheAges) -> Self {
        TenantGroups {
            versions,
            invalidator,
            ages,
        }
    }

    /// Group for system-wide values in `namespace`.
    pub async fn system(&self, namespace: &str) -> Result<String> {
        let group_key = system_key(namespace);
        let options = VersionOptions::default()
            .prefix(group_key.clone())
            .buffered(BufferAge::For(self.ages.buffer_version_system()));
        self.scope(group_key, &options).await
    }

    /// Group for one provider, optionally chained below the system scope.
    pub async fn provider(
        &self,
        provider_id: impl Display,
        namespace: &str,
        chain_system: bool,
    ) -> Result<String> {
        let upstream = self.system_upstream(namespace, chain_system).await?;
        let group_key = full_key(&[PROVIDER_GROUP, &provider_id.to_string(), &upstream]);
        let options = VersionOptions::default()
            .prefix(format!("p{}{}", provider_id, upstream))
            .buffered(BufferAge::For(self.ages.buffer_version_provider()));
        self.scope(group_key, &options).await
    }

    /// Group for one sandbox, chained below its provider when given,
    /// otherwise below the system scope or namespace.
    pub async fn sandbox(
        &self,
        sandbox_id: impl Display,
        provider_id: Option<&(dyn Display + Sync)>,
        namespace: &str,
        chain_system: bool,
    ) -> Result<String> {
        let upstream = self
            .provider_upstream(provider_id, namespace, chain_system)
            .await?;
        let group_key = full_key(&[SANDBOX_GROUP, &sandbox_id.to_string(), &upstream]);
        let options = VersionOptions::default().prefix(format!("s{}{}", sandbox_id, upstream));
        self.scope(group_key, &options).await
    }

    pub async fn invalidate_system(&self, namespace: &str) -> Result<()> {
        self.invalidator
            .invalidate_group(&system_key(namespace))
            .await
    }

    /// Invalidate the provider in both its system-chained and unchained
    /// forms.
    pub async fn invalidate_provider(
        &self,
        provider_id: impl Display,
        namespace: &str,
    ) -> Result<()> {
        let id = provider_id.to_string();
        for chain_system in [true, false] {
            let upstream = self.system_upstream(namespace, chain_system).await?;
            self.invalidator
                .invalidate_group(&full_key(&[PROVIDER_GROUP, &id, &upstream]))
                .await?;
        }
        Ok(())
    }

    /// Invalidate the sandbox in both its system-chained and unchained
    /// forms.
    pub async fn invalidate_sandbox(
        &self,
        sandbox_id: impl Display,
        provider_id: Option<&(dyn Display + Sync)>,
        namespace: &str,
    ) -> Result<()> {
        let id = sandbox_id.to_string();
        for chain_system in [true, false] {
            let upstream = self
                .provider_upstream(provider_id, namespace, chain_system)
                .await?;
            self.invalidator
                .invalidate_group(&full_key(&[SANDBOX_GROUP, &id, &upstream]))
                .await?;
        }
        Ok(())
    }

    /// Current tag of `group_key`, or the key itself when versioning is
    /// unavailable (scope still usable, just not invalidatable).
    async fn scope(&self, group_key: String, options: &VersionOptions) -> Result<String> {
        match self.versions.resolve(&group_key, options).await? {
            Some(tag) => Ok(tag.into_inner()),
            None => {
                warn!("No version for tenant group {}, using it unversioned", group_key);
                Ok(group_key)
            }
        }
    }

    async fn system_upstream(&self, namespace: &str, chain_system: bool) -> Result<String> {
        if chain_system {
            self.system(namespace).await
        } else {
            Ok(namespace.to_string())
        }
    }

    async fn provider_upstream(
        &self,
        provider_id: Option<&(dyn Display + Sync)>,
        namespace: &str,
        chain_system: bool,
    ) -> Result<String> {
        match provider_id {
            Some(id) => self.provider(id, namespace, chain_system).await,
            None => self.system_upstream(namespace, chain_system).await,
        }
    }
}

fn system_key(namespace: &str) -> String {
    full_key(&[SYSTEM_GROUP, namespace])
}
