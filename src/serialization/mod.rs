//! Packing of cached values.
//!
//! Values crossing into the distributed tier and the local buffer are
//! wrapped in a small Postcard-encoded envelope. The payload itself is JSON,
//! so types whose `Deserialize` relies on a self-describing format
//! (`serde_json::Value`, untagged enums, flattened fields,
//! `skip_serializing_if`) read back exactly as they were written:
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────┐
//! │  MAGIC (4 bytes)│VERSION (varint) │ JSON PAYLOAD (len + N)   │
//! └─────────────────┴─────────────────┴──────────────────────────┘
//!   "MEMO"              u32                serde_json::to_vec(T)
//! ```
//!
//! Anything that fails to unpack (foreign bytes, truncated payload, a schema
//! bump between deployments) is reported as an error the read path treats
//! as a cache miss. Values JSON cannot represent (maps keyed by structs,
//! non-finite floats) fail to pack and are simply not cached.
//!
//! ```rust
//! use memo_cache::serialization::{pack, unpack};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Profile {
//!     id: u64,
//!     #[serde(skip_serializing_if = "Option::is_none")]
//!     nick: Option<String>,
//! }
//!
//! # fn main() -> memo_cache::Result<()> {
//! let profile = Profile { id: 7, nick: None };
//! let bytes = pack(&profile)?;
//! let back: Profile = unpack(&bytes)?;
//! assert_eq!(profile, back);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Magic header identifying packed cache values.
pub const CACHE_MAGIC: [u8; 4] = *b"MEMO";

/// Current schema version.
///
/// Bump when the shape of cached types changes incompatibly; entries written
/// under another version are discarded and recomputed.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Envelope wrapped around every packed value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope {
    pub magic: [u8; 4],
    pub version: u32,
    /// JSON-encoded value.
    pub payload: Vec<u8>,
}

impl CacheEnvelope {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

/// Pack a value for storage.
///
/// # Errors
///
/// Returns `Error::SerializationError` if the value has no JSON form.
pub fn pack<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(value).map_err(|e| {
        debug!("Cache pack failed: {}", e);
        Error::SerializationError(e.to_string())
    })?;
    postcard::to_allocvec(&CacheEnvelope::new(payload))
        .map_err(|e| Error::SerializationError(e.to_string()))
}

/// Unpack a stored value, validating the envelope before the payload.
///
/// # Errors
///
/// - `Error::DeserializationError`: bytes are not a decodable envelope, or
///   the payload does not decode as `T`
/// - `Error::InvalidCacheEntry`: magic header mismatch
/// - `Error::VersionMismatch`: written under another schema version
pub fn unpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let envelope: CacheEnvelope = postcard::from_bytes(bytes).map_err(|e| {
        debug!("Cache unpack failed: {}", e);
        Error::DeserializationError(e.to_string())
    })?;

    if envelope.magic != CACHE_MAGIC {
        return Err(Error::InvalidCacheEntry(format!(
            "expected magic {:?}, got {:?}",
            CACHE_MAGIC, envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    serde_json::from_slice(&envelope.payload).map_err(|e| {
        debug!("Cache payload decode failed: {}", e);
        Error::DeserializationError(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
    enum Plan {
        Free,
        Paid { seats: u32 },
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
    struct Account {
        id: u64,
        name: String,
        plan: Plan,
        limits: BTreeMap<String, i64>,
        parent: Option<Box<Account>>,
    }

    fn sample() -> Account {
        let mut limits = BTreeMap::new();
        limits.insert("uploads".to_string(), 10);
        Account {
            id: 9,
            name: "acme".to_string(),
            plan: Plan::Paid { seats: 3 },
            limits,
            parent: Some(Box::new(Account {
                id: 1,
                name: "root".to_string(),
                plan: Plan::Free,
                limits: BTreeMap::new(),
                parent: None,
            })),
        }
    }

    #[test]
    fn test_nested_structures_survive() {
        let account = sample();
        let bytes = pack(&account).unwrap();
        let back: Account = unpack(&bytes).unwrap();
        assert_eq!(account, back);
    }

    #[test]
    fn test_envelope_header() {
        let bytes = pack(&"tag").unwrap();
        assert_eq!(&bytes[..4], &CACHE_MAGIC[..]);
        let envelope: CacheEnvelope = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(envelope.magic, CACHE_MAGIC);
        assert_eq!(envelope.version, CURRENT_SCHEMA_VERSION);
        assert_eq!(envelope.payload, b"\"tag\"".to_vec());
    }

    #[test]
    fn test_self_describing_types_survive() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Sparse {
            #[serde(skip_serializing_if = "Option::is_none")]
            nick: Option<String>,
            id: u32,
        }

        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        #[serde(untagged)]
        enum Loose {
            Count(u64),
            Label(String),
        }

        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Outer {
            id: u32,
            #[serde(flatten)]
            extra: BTreeMap<String, serde_json::Value>,
        }

        let value = serde_json::json!({"name": "a", "roles": ["admin"], "age": null});
        assert_eq!(unpack::<serde_json::Value>(&pack(&value).unwrap()).unwrap(), value);

        let sparse = Sparse { nick: None, id: 1 };
        assert_eq!(unpack::<Sparse>(&pack(&sparse).unwrap()).unwrap(), sparse);

        let loose = vec![Loose::Count(3), Loose::Label("x".to_string())];
        assert_eq!(unpack::<Vec<Loose>>(&pack(&loose).unwrap()).unwrap(), loose);

        let mut extra = BTreeMap::new();
        extra.insert("colour".to_string(), serde_json::json!("red"));
        let outer = Outer { id: 4, extra };
        assert_eq!(unpack::<Outer>(&pack(&outer).unwrap()).unwrap(), outer);
    }

    #[test]
    fn test_unrepresentable_value_fails_to_pack() {
        let mut keyed = BTreeMap::new();
        keyed.insert((1u8, 2u8), "pair");
        assert!(matches!(pack(&keyed), Err(Error::SerializationError(_))));
    }

    #[test]
    fn test_foreign_magic_rejected() {
        let envelope = CacheEnvelope {
            magic: *b"CKIT",
            version: CURRENT_SCHEMA_VERSION,
            payload: b"5".to_vec(),
        };
        let bytes = postcard::to_allocvec(&envelope).unwrap();
        match unpack::<u32>(&bytes) {
            Err(Error::InvalidCacheEntry(_)) => {}
            other => panic!("Expected InvalidCacheEntry, got {:?}", other),
        }
    }

    #[test]
    fn test_schema_bump_rejected() {
        let mut envelope = CacheEnvelope::new(b"5".to_vec());
        envelope.version = CURRENT_SCHEMA_VERSION + 1;
        let bytes = postcard::to_allocvec(&envelope).unwrap();
        match unpack::<u32>(&bytes) {
            Err(Error::VersionMismatch { expected, found }) => {
                assert_eq!(expected, CURRENT_SCHEMA_VERSION);
                assert_eq!(found, CURRENT_SCHEMA_VERSION + 1);
            }
            other => panic!("Expected VersionMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut bytes = pack(&sample()).unwrap();
        bytes.truncate(bytes.len() / 2);
        let err = unpack::<Account>(&bytes).unwrap_err();
        assert!(err.is_corrupt_entry());
    }

    #[test]
    fn test_packing_is_deterministic() {
        assert_eq!(pack(&sample()).unwrap(), pack(&sample()).unwrap());
    }
}
