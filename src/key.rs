//! Cache key construction.
//!
//! Keys are composed as `prefix:identifier:version`, omitting the prefix and
//! version segments entirely when they are absent, so an unversioned lookup
//! is structurally distinguishable from a versioned one. Whitespace and
//! control characters are replaced with `_` to satisfy backend charset
//! restrictions. Hashed keys are a fixed 40 hex characters.

use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Delimiter between key segments.
pub const KEY_DELIMITER: &str = ":";

/// Replacement for characters backends reject in keys.
pub const KEY_PLACEHOLDER: char = '_';

/// Width of a hashed key, in hex characters.
pub const HASHED_KEY_LEN: usize = 40;

/// Builder for cache keys.
///
/// ```
/// use memo_cache::key::CacheKeyBuilder;
///
/// let key = CacheKeyBuilder::new("user 42")
///     .prefix("def")
///     .version("a1b2c3d4")
///     .build()
///     .unwrap();
/// assert_eq!(key, "def:user_42:a1b2c3d4");
/// ```
#[derive(Clone, Debug, Default)]
pub struct CacheKeyBuilder<'a> {
    identifier: &'a str,
    version: Option<&'a str>,
    prefix: Option<&'a str>,
    hashed: bool,
}

impl<'a> CacheKeyBuilder<'a> {
    pub fn new(identifier: &'a str) -> Self {
        CacheKeyBuilder {
            identifier,
            ..Default::default()
        }
    }

    pub fn version(mut self, version: &'a str) -> Self {
        self.version = Some(version);
        self
    }

    pub fn maybe_version(mut self, version: Option<&'a str>) -> Self {
        self.version = version;
        self
    }

    pub fn prefix(mut self, prefix: &'a str) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Collapse the composed key into a fixed-width digest.
    pub fn hashed(mut self, hashed: bool) -> Self {
        self.hashed = hashed;
        self
    }

    /// Compose the key.
    ///
    /// # Errors
    /// Returns `Error::InvalidKey` if the identifier is empty.
    pub fn build(&self) -> Result<String> {
        build_key(self.identifier, self.version, self.prefix, self.hashed)
    }
}

/// Compose a cache key from its parts.
///
/// # Errors
/// Returns `Error::InvalidKey` if `identifier` is empty.
pub fn build_key(
    identifier: &str,
    version: Option<&str>,
    prefix: Option<&str>,
    hash: bool,
) -> Result<String> {
    if identifier.is_empty() {
        return Err(Error::InvalidKey(
            "cache identifier must not be empty".to_string(),
        ));
    }

    let composed = full_key(&[
        prefix.unwrap_or(""),
        identifier,
        version.unwrap_or(""),
    ]);
    let normalized = normalize(&composed);

    if hash {
        Ok(hash_key(&normalized))
    } else {
        Ok(normalized)
    }
}

/// Join the non-empty parts with the key delimiter.
pub fn full_key(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(KEY_DELIMITER)
}

/// Replace whitespace and control characters with the placeholder.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_whitespace() || c.is_control() {
                KEY_PLACEHOLDER
            } else {
                c
            }
        })
        .collect()
}

/// Stable fixed-width digest of `raw`.
pub fn hash_key(raw: &str) -> String {
    let mut digest = hex::encode(Sha256::digest(raw.as_bytes()));
    digest.truncate(HASHED_KEY_LEN);
    digest
}

/// Canonical text form of a function's arguments.
///
/// Arguments are serialized to JSON with every object's keys sorted, so
/// named (struct/map) arguments are order-independent while positional
/// (tuple/sequence) arguments keep their order.
///
/// # Errors
/// Returns `Error::SerializationError` if the arguments cannot be serialized.
pub fn canonical_args<A: Serialize + ?Sized>(args: &A) -> Result<String> {
    let value = serde_json::to_value(args)
        .map_err(|e| Error::SerializationError(format!("unkeyable arguments: {}", e)))?;
    Ok(canonicalize(value).to_string())
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Key derived from a function signature: `name:` followed by a digest over
/// the group, the name and the canonical arguments.
///
/// # Errors
/// Returns `Error::InvalidKey` if both `group` and `name` are empty, or
/// `Error::SerializationError` if the arguments cannot be serialized.
pub fn signature_key<A: Serialize + ?Sized>(group: &str, name: &str, args: &A) -> Result<String> {
    if group.is_empty() && name.is_empty() {
        return Err(Error::InvalidKey(
            "signature key needs a function name or group".to_string(),
        ));
    }
    let canonical = canonical_args(args)?;
    let digest = hash_key(&full_key(&[group, name, &canonical]));
    Ok(normalize(&full_key(&[name, &digest])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::collections::HashMap;

    #[test]
    fn test_key_ordering() {
        let key = build_key("item", Some("v1"), Some("pre"), false).unwrap();
        assert_eq!(key, "pre:item:v1");
    }

    #[test]
    fn test_absent_segments_are_omitted() {
        assert_eq!(build_key("item", None, None, false).unwrap(), "item");
        assert_eq!(build_key("item", Some(""), Some(""), false).unwrap(), "item");
        assert_eq!(build_key("item", Some("v1"), None, false).unwrap(), "item:v1");
        assert_eq!(build_key("item", None, Some("pre"), false).unwrap(), "pre:item");
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let key = build_key("user name\t42\n", None, Some("my pre"), false).unwrap();
        assert_eq!(key, "my_pre:user_name_42_");
    }

    #[test]
    fn test_empty_identifier_rejected() {
        let err = build_key("", Some("v1"), Some("pre"), false).unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
        assert!(CacheKeyBuilder::new("").build().is_err());
    }

    #[test]
    fn test_hashed_key_is_fixed_width_hex() {
        let short = build_key("a", None, None, true).unwrap();
        let long = build_key(&"x".repeat(5000), Some("v"), Some("p"), true).unwrap();
        assert_eq!(short.len(), HASHED_KEY_LEN);
        assert_eq!(long.len(), HASHED_KEY_LEN);
        assert!(long.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_is_stable() {
        // Fixed expectation guards against a per-process seed sneaking in.
        let first = hash_key("pre:item:v1");
        assert_eq!(first, hash_key("pre:item:v1"));
        assert_eq!(
            hash_key(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4"
        );
    }

    #[test]
    fn test_builder_matches_function() {
        let built = CacheKeyBuilder::new("id")
            .prefix("p")
            .maybe_version(Some("v"))
            .build()
            .unwrap();
        assert_eq!(built, build_key("id", Some("v"), Some("p"), false).unwrap());
    }

    #[test]
    fn test_full_key_skips_empty_parts() {
        assert_eq!(full_key(&["cgp", "", "tg"]), "cgp:tg");
        assert_eq!(full_key(&[]), "");
    }

    #[derive(Serialize)]
    struct Named {
        zeta: u32,
        alpha: &'static str,
    }

    #[test]
    fn test_named_args_are_order_independent() {
        let mut a = HashMap::new();
        a.insert("first", 1);
        a.insert("second", 2);
        a.insert("third", 3);
        let mut b = HashMap::new();
        b.insert("third", 3);
        b.insert("first", 1);
        b.insert("second", 2);
        assert_eq!(canonical_args(&a).unwrap(), canonical_args(&b).unwrap());

        let named = canonical_args(&Named { zeta: 1, alpha: "x" }).unwrap();
        assert_eq!(named, r#"{"alpha":"x","zeta":1}"#);
    }

    #[test]
    fn test_positional_args_are_order_dependent() {
        let a = signature_key("", "area", &(2, 3)).unwrap();
        let b = signature_key("", "area", &(3, 2)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_signature_key_shape() {
        let key = signature_key("", "load_user", &(42u64,)).unwrap();
        let (name, digest) = key.split_once(':').unwrap();
        assert_eq!(name, "load_user");
        assert_eq!(digest.len(), HASHED_KEY_LEN);
        assert_eq!(key, signature_key("", "load_user", &(42u64,)).unwrap());
    }

    #[test]
    fn test_signature_key_depends_on_group_and_name() {
        let args = ("a", 1);
        let base = signature_key("", "f", &args).unwrap();
        assert_ne!(base, signature_key("g1", "f", &args).unwrap());
        assert_ne!(base, signature_key("", "h", &args).unwrap());
        assert!(signature_key("", "", &args).is_err());
    }
}
