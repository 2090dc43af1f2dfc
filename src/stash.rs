//! Per-object method memo.
//!
//! A [`Stash`] lives inside one object and remembers what its methods
//! returned for each argument list. Nothing ages out; values stay until
//! [`Stash::clear`]. Stashing replaces caching for cheap-to-hold values that
//! are only useful for the object's lifetime, and is never shared between
//! processes.
//!
//! ```
//! use memo_cache::Stash;
//!
//! struct Catalog {
//!     stash: Stash,
//! }
//!
//! impl Catalog {
//!     fn price(&self, sku: &str) -> Option<u64> {
//!         let price = self
//!             .stash
//!             .get_or_insert_with("price", &sku, || Some(sku.len() as u64 * 100))
//!             .ok()
//!             .flatten()?;
//!         Some(*price)
//!     }
//! }
//!
//! let catalog = Catalog { stash: Stash::new() };
//! assert_eq!(catalog.price("ab"), Some(200));
//! assert_eq!(catalog.stash.len(), 1);
//! ```

use crate::error::Result;
use crate::key::signature_key;
use dashmap::DashMap;
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;

type Stashed = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct Stash {
    entries: DashMap<String, Stashed>,
}

impl Stash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stashed value of `method(args)`, computing it with `f` on first use.
    /// `None` results are not stashed.
    ///
    /// # Errors
    /// Returns `Error::SerializationError` if `args` cannot be keyed.
    pub fn get_or_insert_with<A, T, F>(&self, method: &str, args: &A, f: F) -> Result<Option<Arc<T>>>
    where
        A: Serialize + ?Sized,
        T: Any + Send + Sync,
        F: FnOnce() -> Option<T>,
    {
        let key = signature_key("", method, args)?;

        let existing = self.entries.get(&key).map(|entry| Arc::clone(entry.value()));
        if let Some(value) = existing.and_then(|stashed| stashed.downcast::<T>().ok()) {
            trace!("STASH GET {}", key);
            return Ok(Some(value));
        }

        // The map guard is released before `f` runs so it may use the stash.
        let value = match f() {
            Some(value) => Arc::new(value),
            None => return Ok(None),
        };
        self.entries.insert(key.clone(), value.clone() as Stashed);
        trace!("STASH SET {}", key);
        Ok(Some(value))
    }

    pub fn clear(&self) {
        self.entries.clear();
        trace!("STASH CLEAR");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
