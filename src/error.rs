//! Error types for the cache controller.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by the upstream fetcher.
///
/// The split matters: only `NotFound` may populate the negative-result cache.
/// Everything the upstream could recover from (rate limits, network failures,
/// timeouts) is `Transient`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Rate-limited, network failure, timeout, upstream 5xx.
    Transient(String),

    /// The upstream definitively reports that the resource does not exist.
    NotFound {
        /// Short human-readable message.
        message: String,
        /// Upstream-provided detail (e.g. the status line or page title).
        detail: String,
    },
}

impl FetchError {
    /// Returns true for a definitive "does not exist" result.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Transient(msg) => write!(f, "transient upstream failure: {}", msg),
            FetchError::NotFound { message, detail } => {
                write!(f, "upstream resource not found: {} ({})", message, detail)
            }
        }
    }
}

impl std::error::Error for FetchError {}

/// Error types for the cache controller.
///
/// Upstream failures are recovered inside the dispatcher whenever a stale entry
/// exists, so callers mostly see `Upstream` on a cold miss and the storage
/// variants when the backend itself is unavailable.
#[derive(Debug, Clone)]
pub enum Error {
    /// Serialization failed when converting a value to stored bytes.
    ///
    /// Common causes:
    /// - Upstream document is not representable as JSON
    /// - Postcard codec error while building the storage envelope
    SerializationError(String),

    /// Deserialization failed when converting stored bytes back to a value.
    ///
    /// **Recovery:** the dispatcher treats the entry as absent and refetches.
    DeserializationError(String),

    /// Invalid storage envelope: bad magic or non-swr-kit data under the key.
    InvalidCacheEntry(String),

    /// Schema version mismatch between code and stored data.
    ///
    /// **Recovery:** the entry is treated as a miss and overwritten on next fetch.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from stored entry)
        found: u32,
    },

    /// Backend storage error (Redis connection lost, pool exhausted, etc).
    BackendError(String),

    /// Upstream fetch failed and there was nothing to fall back to.
    Upstream(FetchError),

    /// A synchronous upstream fetch exceeded the configured bound.
    Timeout(String),

    /// Configuration error during startup.
    ConfigError(String),

    /// A response fix-up could not be applied.
    ///
    /// Fatal for the current request only; the stored entry is never touched.
    FixupError(String),

    /// Feature not implemented or not enabled for this backend.
    NotImplemented(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// Returns true if this error came from the upstream fetcher (or its timeout).
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::Upstream(_) | Error::Timeout(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::Upstream(e) => write!(f, "Upstream error: {}", e),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::FixupError(msg) => write!(f, "Fix-up error: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Upstream(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<FetchError> for Error {
    fn from(e: FetchError) -> Self {
        Error::Upstream(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::BackendError(e.to_string())
        } else if e.is_syntax() || e.is_eof() {
            Error::DeserializationError(e.to_string())
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

impl From<::config::ConfigError> for Error {
    fn from(e: ::config::ConfigError) -> Self {
        Error::ConfigError(e.to_string())
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
