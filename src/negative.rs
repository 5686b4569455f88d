//! Negative-result cache.
//!
//! Remembers request URIs the upstream definitively reported as not existing
//! and answers them with a fixed 404 without contacting upstream again.
//! Entries have no expiry and are never cleared here; removing one is an
//! administrative operation on the store.

use crate::backend::CacheBackend;
use crate::error::{FetchError, Result};
use crate::store::CacheStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Error type reported in the negative response.
pub const NOT_FOUND_ERROR_TYPE: &str = "BadResponseException";

/// Message reported in the negative response.
pub const NOT_FOUND_MESSAGE: &str = "Resource does not exist";

/// A recorded "does not exist" outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegativeEntry {
    pub error_type: String,
    pub message: String,
    pub detail: String,
}

impl NegativeEntry {
    pub fn not_found(detail: impl Into<String>) -> Self {
        NegativeEntry {
            error_type: NOT_FOUND_ERROR_TYPE.to_string(),
            message: NOT_FOUND_MESSAGE.to_string(),
            detail: detail.into(),
        }
    }

    /// Build from a fetch error; `None` unless it is a definitive not-found.
    pub fn from_fetch_error(error: &FetchError) -> Option<Self> {
        match error {
            FetchError::NotFound { detail, .. } => Some(Self::not_found(detail.clone())),
            FetchError::Transient(_) => None,
        }
    }

    /// Fixed 404 payload.
    pub fn to_payload(&self) -> Value {
        json!({
            "status": 404,
            "type": self.error_type,
            "message": self.message,
            "error": self.detail,
        })
    }
}

/// Negative-result cache over a store.
#[derive(Clone)]
pub struct NegativeCache<B: CacheBackend> {
    store: CacheStore<B>,
}

impl<B: CacheBackend> NegativeCache<B> {
    pub fn new(store: CacheStore<B>) -> Self {
        NegativeCache { store }
    }

    /// # Errors
    /// Returns `Err` if the backend fails.
    pub async fn check(&self, uri_hash: &str) -> Result<Option<NegativeEntry>> {
        self.store.get_negative(uri_hash).await
    }

    /// # Errors
    /// Returns `Err` if the backend fails.
    pub async fn record(&self, uri_hash: &str, entry: &NegativeEntry) -> Result<()> {
        info!("Recording negative result for {}: {}", uri_hash, entry.detail);
        self.store.put_negative(uri_hash, entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;

    #[test]
    fn test_negative_payload_shape() {
        let payload = NegativeEntry::not_found("404 on upstream").to_payload();
        assert_eq!(
            payload,
            json!({
                "status": 404,
                "type": "BadResponseException",
                "message": "Resource does not exist",
                "error": "404 on upstream",
            })
        );
    }

    #[test]
    fn test_only_definitive_not_found_is_negative() {
        let rate_limited = FetchError::Transient("429 Too Many Requests".to_string());
        assert!(NegativeEntry::from_fetch_error(&rate_limited).is_none());

        let missing = FetchError::NotFound {
            message: "gone".to_string(),
            detail: "404 on upstream".to_string(),
        };
        let entry = NegativeEntry::from_fetch_error(&missing).unwrap();
        assert_eq!(entry.message, NOT_FOUND_MESSAGE);
        assert_eq!(entry.detail, "404 on upstream");
    }

    #[tokio::test]
    async fn test_record_then_check() {
        let cache = NegativeCache::new(CacheStore::new(InMemoryBackend::new()));

        assert!(cache.check("h1").await.unwrap().is_none());

        let entry = NegativeEntry::not_found("404 on upstream");
        cache.record("h1", &entry).await.unwrap();

        assert_eq!(cache.check("h1").await.unwrap(), Some(entry));
        assert!(cache.check("h2").await.unwrap().is_none());
    }
}
