//! Error types for the memoization cache.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the cache layer.
///
/// Most variants describe runtime conditions that the cache recovers from
/// locally (a backend failure degrades to a miss, a corrupt entry is
/// recomputed). Only [`Error::is_fatal`] variants always reach the caller;
/// the rest surface only when strict mode is enabled.
#[derive(Debug, Clone)]
pub enum Error {
    /// Empty or otherwise unusable semantic identifier.
    ///
    /// There is no valid cache entry without an identifier, so this is a
    /// programming error and is never swallowed.
    InvalidKey(String),

    /// A named cache was requested that the registry does not know.
    UnknownCache(String),

    /// Serialization failed when packing a value for storage.
    ///
    /// On write this aborts only the SET; the computed value is still
    /// returned to the caller.
    SerializationError(String),

    /// Deserialization of stored bytes failed.
    ///
    /// Treated as a cache miss on read.
    DeserializationError(String),

    /// Stored bytes are not a cache envelope (bad magic).
    InvalidCacheEntry(String),

    /// Stored envelope was written with a different schema version.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from cached entry)
        found: u32,
    },

    /// Backend storage error (Redis connection lost, timeout, protocol error).
    ///
    /// Degrades the specific tier operation to a miss or no-op.
    BackendError(String),

    /// A version group could not be resolved to a tag.
    VersionResolution(String),

    /// Invalid configuration.
    ConfigError(String),

    /// Operation not supported by this backend.
    NotImplemented(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// Errors that indicate misuse of the API rather than a runtime
    /// condition. These are raised even in production mode.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidKey(_) | Error::UnknownCache(_) | Error::ConfigError(_)
        )
    }

    /// Errors caused by the stored bytes themselves; reads treat them as a miss.
    pub fn is_corrupt_entry(&self) -> bool {
        matches!(
            self,
            Error::DeserializationError(_)
                | Error::InvalidCacheEntry(_)
                | Error::VersionMismatch { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidKey(msg) => write!(f, "Invalid cache key: {}", msg),
            Error::UnknownCache(name) => write!(f, "Unknown cache: {}", name),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache schema mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::VersionResolution(msg) => write!(f, "Version resolution failed: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::BackendError(e.to_string())
        } else if e.is_syntax() || e.is_eof() {
            Error::ConfigError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::BackendError(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::BackendError(format!("Redis error: {}", e))
    }
}
