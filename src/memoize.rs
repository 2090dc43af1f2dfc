//! Memoized functions.
//!
//! [`Memoized`] wraps an async function so each call is served through
//! [`CacheService::get_or_compute`]. By default the key is a digest of the
//! function name and its canonicalized arguments, and every call of the
//! function shares one invalidation group named after it.
//!
//! ```no_run
//! use memo_cache::{CacheConfig, CacheService, Memoized};
//!
//! # async fn example() -> memo_cache::Result<()> {
//! let cache = CacheService::in_memory(CacheConfig::default())?;
//! let totals = Memoized::new("order_totals", |(account, year): (u64, u16)| async move {
//!     Some(account * u64::from(year))
//! });
//!
//! let total = totals.call(&cache, (42, 2024)).await?;
//! cache.invalidate_group("order_totals").await?;
//! # Ok(())
//! # }
//! ```
//!
//! A key function takes over key derivation. It returns `None` to skip the
//! cache for that call, a bare key (the key function's name becomes the
//! group, so two functions sharing a key function also share a group unless
//! one sets [`Memoized::key_name`]), or a key with an explicit group.

use crate::backend::CacheBackend;
use crate::call_cache::CallOptions;
use crate::error::{Error, Result};
use crate::key::{full_key, signature_key};
use crate::service::CacheService;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// Key produced by a key function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DerivedKey {
    /// Grouped under the key function's name.
    Key(String),
    /// Explicit group; an empty group caches without versioning.
    Grouped { key: String, group: String },
}

impl From<String> for DerivedKey {
    fn from(key: String) -> Self {
        DerivedKey::Key(key)
    }
}

impl From<&str> for DerivedKey {
    fn from(key: &str) -> Self {
        DerivedKey::Key(key.to_string())
    }
}

impl From<(String, String)> for DerivedKey {
    fn from((key, group): (String, String)) -> Self {
        DerivedKey::Grouped { key, group }
    }
}

/// Objects carrying their own invalidation scope (a tenant, a content
/// item, ...).
pub trait CacheGroup {
    fn cache_group(&self) -> String;
}

impl<T: CacheGroup + ?Sized> CacheGroup for &T {
    fn cache_group(&self) -> String {
        (**self).cache_group()
    }
}

impl<T: CacheGroup + ?Sized> CacheGroup for Arc<T> {
    fn cache_group(&self) -> String {
        (**self).cache_group()
    }
}

/// Argument lists whose first element decides the group.
pub trait OwnerGroup {
    fn owner_group(&self) -> String;
}

macro_rules! owner_group_tuple {
    ($first:ident $(, $rest:ident)*) => {
        impl<$first: CacheGroup, $($rest),*> OwnerGroup for ($first, $($rest,)*) {
            fn owner_group(&self) -> String {
                self.0.cache_group()
            }
        }
    };
}

owner_group_tuple!(O);
owner_group_tuple!(O, B);
owner_group_tuple!(O, B, C);
owner_group_tuple!(O, B, C, D);

type KeyFn<A> = Box<dyn Fn(&A) -> Option<DerivedKey> + Send + Sync>;
type GroupFn<A> = Box<dyn Fn(&A) -> String + Send + Sync>;

enum GroupSpec<A> {
    FunctionName,
    Disabled,
    Named(String),
    Derived(GroupFn<A>),
    Owner(fn(&A) -> String),
}

struct NamedKeyFn<A> {
    name: String,
    derive: KeyFn<A>,
}

/// Resolved cache key and group for one call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallPlan {
    pub key: String,
    pub group_key: Option<String>,
}

/// An async function memoized through a [`CacheService`].
pub struct Memoized<A, F> {
    name: String,
    func: F,
    key_name: Option<String>,
    key_fn: Option<NamedKeyFn<A>>,
    group: GroupSpec<A>,
    options: CallOptions,
}

impl<A, F> Memoized<A, F> {
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Memoized {
            name: name.into(),
            func,
            key_name: None,
            key_fn: None,
            group: GroupSpec::FunctionName,
            options: CallOptions::default(),
        }
    }

    /// Name used in keys instead of the function name. Lets functions that
    /// share a key function cache separately.
    pub fn key_name(mut self, name: impl Into<String>) -> Self {
        self.key_name = Some(name.into());
        self
    }

    /// Derive keys with `derive`, registered under `name`.
    pub fn key_fn<K>(mut self, name: impl Into<String>, derive: K) -> Self
    where
        K: Fn(&A) -> Option<DerivedKey> + Send + Sync + 'static,
    {
        self.key_fn = Some(NamedKeyFn {
            name: name.into(),
            derive: Box::new(derive),
        });
        self
    }

    /// Fixed invalidation group. Ignored when a key function is set.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = GroupSpec::Named(group.into());
        self
    }

    /// Group computed from the arguments.
    pub fn group_by<G>(mut self, group: G) -> Self
    where
        G: Fn(&A) -> String + Send + Sync + 'static,
    {
        self.group = GroupSpec::Derived(Box::new(group));
        self
    }

    /// Group taken from the first argument's [`CacheGroup`].
    pub fn group_by_owner(mut self) -> Self
    where
        A: OwnerGroup,
    {
        self.group = GroupSpec::Owner(<A as OwnerGroup>::owner_group);
        self
    }

    /// Cache without a version group.
    pub fn no_group(mut self) -> Self {
        self.group = GroupSpec::Disabled;
        self
    }

    /// Call options; the group key is always set per call.
    pub fn options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key and group `args` would be cached under, or `None` when the key
    /// function opts this call out of caching.
    ///
    /// # Errors
    /// Returns `Error::InvalidKey` if no usable key can be derived (including
    /// an empty key from the key function), or
    /// `Error::SerializationError` if the arguments cannot be canonicalized.
    pub fn plan(&self, args: &A) -> Result<Option<CallPlan>>
    where
        A: Serialize,
    {
        let mut key_name = self.key_name.clone().unwrap_or_else(|| self.name.clone());

        let (explicit_key, group) = match &self.key_fn {
            Some(key_fn) => match (key_fn.derive)(args) {
                None => return Ok(None),
                Some(DerivedKey::Key(key)) => (Some(key), Some(key_fn.name.clone())),
                Some(DerivedKey::Grouped { key, group }) => (Some(key), Some(group)),
            },
            None => {
                let group = match &self.group {
                    GroupSpec::FunctionName => None,
                    GroupSpec::Disabled => Some(String::new()),
                    GroupSpec::Named(group) => Some(group.clone()),
                    GroupSpec::Derived(derive) => Some(derive(args)),
                    GroupSpec::Owner(owner) => Some(owner(args)),
                };
                (None, group)
            }
        };

        // The function name already names the group; keep it out of the key.
        let group = match group {
            Some(group) => group,
            None => std::mem::take(&mut key_name),
        };

        let key = match explicit_key {
            Some(key) if key.is_empty() => {
                return Err(Error::InvalidKey(format!(
                    "key function for {} derived an empty key",
                    self.name
                )));
            }
            Some(key) => full_key(&[&key_name, &key, &group]),
            None => signature_key(&group, &key_name, args)?,
        };

        Ok(Some(CallPlan {
            key,
            group_key: (!group.is_empty()).then_some(group),
        }))
    }

    /// Call through the cache.
    ///
    /// # Errors
    /// Same as [`CacheService::get_or_compute`], plus key derivation errors.
    pub async fn call<B, T, Fut>(&self, cache: &CacheService<B>, args: A) -> Result<Option<T>>
    where
        B: CacheBackend,
        A: Serialize,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Option<T>>,
        T: Serialize + DeserializeOwned,
    {
        let plan = match self.plan(&args)? {
            Some(plan) => plan,
            None => {
                debug!("MEMO skip {}: key function declined", self.name);
                return Ok((self.func)(args).await);
            }
        };

        let mut options = self.options.clone();
        options.group_key = plan.group_key;
        cache
            .get_or_compute(&plan.key, move || (self.func)(args), &options)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::HASHED_KEY_LEN;
    use serde::Serialize;
    use std::future::Ready;

    struct Tenant {
        id: u32,
    }

    impl CacheGroup for Tenant {
        fn cache_group(&self) -> String {
            format!("tenant{}", self.id)
        }
    }

    impl Serialize for Tenant {
        fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
            s.serialize_u32(self.id)
        }
    }

    fn ready(_args: (u32, String)) -> Ready<Option<u32>> {
        std::future::ready(Some(1))
    }

    #[test]
    fn test_default_plan_groups_by_function_name() {
        let memo = Memoized::new("lookup", ready);
        let plan = memo.plan(&(1, "a".to_string())).unwrap().unwrap();

        assert_eq!(plan.group_key.as_deref(), Some("lookup"));
        assert_eq!(plan.key.len(), HASHED_KEY_LEN);
        assert_eq!(plan, memo.plan(&(1, "a".to_string())).unwrap().unwrap());
        assert_ne!(plan, memo.plan(&(2, "a".to_string())).unwrap().unwrap());
    }

    #[test]
    fn test_different_functions_do_not_collide() {
        let first = Memoized::new("first", ready);
        let second = Memoized::new("second", ready);
        let args = (1, "a".to_string());
        assert_ne!(
            first.plan(&args).unwrap().unwrap().key,
            second.plan(&args).unwrap().unwrap().key
        );
    }

    #[test]
    fn test_key_fn_bare_key_groups_by_key_fn_name() {
        let memo = Memoized::new("lookup", ready)
            .key_fn("by_id", |args: &(u32, String)| Some(format!("id{}", args.0).into()));
        let plan = memo.plan(&(7, "x".to_string())).unwrap().unwrap();

        assert_eq!(plan.group_key.as_deref(), Some("by_id"));
        assert_eq!(plan.key, "lookup:id7:by_id");
    }

    #[test]
    fn test_key_fn_name_changes_group() {
        let a = Memoized::new("lookup", ready).key_fn("by_id", |_: &(u32, String)| {
            Some(DerivedKey::from("k"))
        });
        let b = Memoized::new("lookup", ready).key_fn("by_id_v2", |_: &(u32, String)| {
            Some(DerivedKey::from("k"))
        });
        let args = (1, String::new());
        assert_ne!(
            a.plan(&args).unwrap().unwrap().group_key,
            b.plan(&args).unwrap().unwrap().group_key
        );
    }

    #[test]
    fn test_key_fn_grouped_and_skip() {
        let memo = Memoized::new("lookup", ready).key_fn("by_id", |args: &(u32, String)| {
            match args.0 {
                0 => None,
                1 => Some(DerivedKey::Grouped {
                    key: "one".to_string(),
                    group: String::new(),
                }),
                n => Some((format!("n{}", n), "numbers".to_string()).into()),
            }
        });

        assert!(memo.plan(&(0, String::new())).unwrap().is_none());

        let unversioned = memo.plan(&(1, String::new())).unwrap().unwrap();
        assert_eq!(unversioned.key, "lookup:one");
        assert_eq!(unversioned.group_key, None);

        let grouped = memo.plan(&(5, String::new())).unwrap().unwrap();
        assert_eq!(grouped.key, "lookup:n5:numbers");
        assert_eq!(grouped.group_key.as_deref(), Some("numbers"));
    }

    #[test]
    fn test_key_fn_empty_key_is_invalid() {
        let bare = Memoized::new("lookup", ready)
            .key_fn("by_id", |_: &(u32, String)| Some(DerivedKey::from("")));
        assert!(matches!(
            bare.plan(&(1, String::new())),
            Err(Error::InvalidKey(_))
        ));

        let grouped = Memoized::new("lookup", ready).key_fn("by_id", |_: &(u32, String)| {
            Some(DerivedKey::Grouped {
                key: String::new(),
                group: "numbers".to_string(),
            })
        });
        assert!(matches!(
            grouped.plan(&(1, String::new())),
            Err(Error::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_call_with_empty_derived_key_is_not_cached() {
        use crate::config::CacheConfig;

        let memo = Memoized::new("lookup", ready)
            .key_fn("by_id", |_: &(u32, String)| Some(DerivedKey::from("")));
        let cache = CacheService::in_memory(CacheConfig::default()).unwrap();

        let result = memo.call(&cache, (1, String::new())).await;
        assert!(matches!(result, Err(Error::InvalidKey(_))));
        assert!(cache.registry().buffer().is_empty());
    }

    #[test]
    fn test_key_name_separates_shared_key_fn() {
        let key_fn = |args: &(u32, String)| Some(DerivedKey::Key(args.1.clone()));
        let a = Memoized::new("a", ready).key_fn("shared", key_fn);
        let b = Memoized::new("b", ready).key_fn("shared", key_fn).key_name("b_v2");
        let args = (1, "x".to_string());

        assert_eq!(a.plan(&args).unwrap().unwrap().key, "a:x:shared");
        assert_eq!(b.plan(&args).unwrap().unwrap().key, "b_v2:x:shared");
    }

    #[test]
    fn test_group_variants() {
        let args = (1u32, "x".to_string());

        let named = Memoized::new("f", ready).group("reports");
        let plan = named.plan(&args).unwrap().unwrap();
        assert_eq!(plan.group_key.as_deref(), Some("reports"));
        assert!(plan.key.starts_with("f:"));

        let derived = Memoized::new("f", ready).group_by(|a: &(u32, String)| format!("g{}", a.0));
        assert_eq!(
            derived.plan(&args).unwrap().unwrap().group_key.as_deref(),
            Some("g1")
        );

        let none = Memoized::new("f", ready).no_group();
        assert_eq!(none.plan(&args).unwrap().unwrap().group_key, None);
    }

    #[test]
    fn test_group_by_owner() {
        let memo = Memoized::new("menu", |(tenant, _): (Tenant, u8)| async move {
            Some(tenant.id)
        })
        .group_by_owner();

        let plan = memo.plan(&(Tenant { id: 3 }, 0)).unwrap().unwrap();
        assert_eq!(plan.group_key.as_deref(), Some("tenant3"));
    }

    #[tokio::test]
    async fn test_call_memoizes_and_invalidates() {
        use crate::config::CacheConfig;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let memo = Memoized::new("square", move |n: u64| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Some(n * n)
            }
        });

        let cache = CacheService::in_memory(CacheConfig::default()).unwrap();
        assert_eq!(memo.call(&cache, 4).await.unwrap(), Some(16));
        assert_eq!(memo.call(&cache, 4).await.unwrap(), Some(16));
        assert_eq!(memo.call(&cache, 5).await.unwrap(), Some(25));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        cache.invalidate_group("square").await.unwrap();
        assert_eq!(memo.call(&cache, 4).await.unwrap(), Some(16));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_declined_key_fn_calls_through() {
        use crate::config::CacheConfig;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let memo = Memoized::new("live", move |_: u8| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Some(1u8))
        })
        .key_fn("never", |_: &u8| None);

        let cache = CacheService::in_memory(CacheConfig::default()).unwrap();
        memo.call(&cache, 0).await.unwrap();
        memo.call(&cache, 0).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.registry().buffer().is_empty());
    }
}
