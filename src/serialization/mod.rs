//! Postcard-based storage envelopes.
//!
//! Every value the [`CacheStore`](crate::store::CacheStore) writes (response
//! bodies, TTL markers, negative entries, dedup markers) is wrapped in a
//! versioned envelope before it reaches a backend:
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────┐
//! │  MAGIC (4 bytes)│VERSION (varint) │POSTCARD PAYLOAD (N bytes)│
//! └─────────────────┴─────────────────┴──────────────────────────┘
//!   "SWRK"              u32                postcard::to_allocvec(T)
//! ```
//!
//! A schema bump makes old values undecodable; the store reports those as
//! absent so the dispatcher falls into the miss path and overwrites them.
//!
//! # Example
//!
//! ```rust
//! use swr_kit::serialization::{deserialize_from_store, serialize_for_store};
//!
//! # fn main() -> swr_kit::Result<()> {
//! let bytes = serialize_for_store(&1_700_000_000_i64)?;
//! let expires_at: i64 = deserialize_from_store(&bytes)?;
//! assert_eq!(expires_at, 1_700_000_000);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Magic header for swr-kit values: b"SWRK"
pub const STORE_MAGIC: [u8; 4] = *b"SWRK";

/// Current schema version.
///
/// Increment when the layout of any stored type changes (`NegativeEntry`,
/// body bytes, marker payloads).
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Versioned envelope for stored values.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoreEnvelope<T> {
    /// Magic header: must be b"SWRK"
    pub magic: [u8; 4],
    /// Schema version: must match CURRENT_SCHEMA_VERSION
    pub version: u32,
    /// The stored value
    pub payload: T,
}

impl<T> StoreEnvelope<T> {
    /// Create a new envelope with current magic and version.
    pub fn new(payload: T) -> Self {
        Self {
            magic: STORE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

/// Serialize a value with envelope for backend storage.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard serialization fails.
pub fn serialize_for_store<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let envelope = StoreEnvelope::new(value);
    postcard::to_allocvec(&envelope).map_err(|e| {
        error!("Store serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Deserialize a value from backend storage with validation.
///
/// # Errors
///
/// - `Error::InvalidCacheEntry`: Invalid magic header
/// - `Error::VersionMismatch`: Schema version mismatch
/// - `Error::DeserializationError`: Corrupted Postcard payload
pub fn deserialize_from_store<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    let envelope: StoreEnvelope<T> = postcard::from_bytes(bytes).map_err(|e| {
        warn!("Store deserialization failed: {}", e);
        Error::DeserializationError(e.to_string())
    })?;

    if envelope.magic != STORE_MAGIC {
        warn!(
            "Invalid stored value: expected magic {:?}, got {:?}",
            STORE_MAGIC, envelope.magic
        );
        return Err(Error::InvalidCacheEntry(format!(
            "Invalid magic: expected {:?}, got {:?}",
            STORE_MAGIC, envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        warn!(
            "Stored value version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION, envelope.version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    Ok(envelope.payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negative::NegativeEntry;

    #[test]
    fn test_negative_entry_roundtrip() {
        let entry = NegativeEntry::not_found("404 on upstream");
        let bytes = serialize_for_store(&entry).unwrap();
        let decoded: NegativeEntry = deserialize_from_store(&bytes).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_envelope_structure() {
        let bytes = serialize_for_store(&42_i64).unwrap();
        let envelope: StoreEnvelope<i64> = postcard::from_bytes(&bytes).unwrap();

        assert_eq!(envelope.magic, STORE_MAGIC);
        assert_eq!(envelope.version, CURRENT_SCHEMA_VERSION);
        assert_eq!(envelope.payload, 42);
    }

    #[test]
    fn test_invalid_magic_rejected() {
        let envelope = StoreEnvelope {
            magic: *b"XXXX",
            version: CURRENT_SCHEMA_VERSION,
            payload: 7_i64,
        };
        let bytes = postcard::to_allocvec(&envelope).unwrap();

        match deserialize_from_store::<i64>(&bytes) {
            Err(Error::InvalidCacheEntry(_)) => {}
            other => panic!("Expected InvalidCacheEntry, got {:?}", other),
        }
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut envelope = StoreEnvelope::new(7_i64);
        envelope.version = 999;
        let bytes = postcard::to_allocvec(&envelope).unwrap();

        match deserialize_from_store::<i64>(&bytes) {
            Err(Error::VersionMismatch { expected, found }) => {
                assert_eq!(expected, CURRENT_SCHEMA_VERSION);
                assert_eq!(found, 999);
            }
            other => panic!("Expected VersionMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_raw_json_is_not_an_envelope() {
        // Values written by a foreign producer under one of our keys.
        let result: Result<Vec<u8>> = deserialize_from_store(br#"{"data":1}"#);
        assert!(result.is_err());
    }
}
