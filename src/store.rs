//! Typed access to the controller's keyspace.
//!
//! [`CacheStore`] sits on top of a raw [`CacheBackend`] and knows the key
//! layout from [`crate::key`]. It never decides freshness; it only reads and
//! writes bodies, expiry markers, negative entries and dedup markers.

use crate::backend::CacheBackend;
use crate::error::Result;
use crate::key::KeyBuilder;
use crate::negative::NegativeEntry;
use crate::serialization::{deserialize_from_store, serialize_for_store};

/// A stored response for one fingerprint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: String,
    /// Serialized response body, opaque at this layer.
    pub body: Vec<u8>,
    /// Absolute expiry, unix seconds, read from the `ttl:` marker.
    ///
    /// A body whose marker is missing is reported with `expires_at == 0`,
    /// i.e. long overdue, so the next request refreshes it.
    pub expires_at: i64,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

/// Typed store over a backend.
#[derive(Clone)]
pub struct CacheStore<B: CacheBackend> {
    backend: B,
}

impl<B: CacheBackend> CacheStore<B> {
    pub fn new(backend: B) -> Self {
        CacheStore { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Read the body and expiry for a fingerprint.
    ///
    /// Undecodable bodies (foreign data, older schema) are reported as absent
    /// so the caller takes the miss path and overwrites them.
    ///
    /// # Errors
    /// Returns `Err` if the backend fails.
    pub async fn get_entry(&self, fingerprint: &str) -> Result<Option<CacheEntry>> {
        let raw = match self.backend.get(&KeyBuilder::entry(fingerprint)).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let body: Vec<u8> = match deserialize_from_store(&raw) {
            Ok(body) => body,
            Err(e) => {
                warn!("Discarding undecodable entry {}: {}", fingerprint, e);
                return Ok(None);
            }
        };

        let expires_at = self.expiry(fingerprint).await?.unwrap_or(0);

        Ok(Some(CacheEntry {
            fingerprint: fingerprint.to_string(),
            body,
            expires_at,
        }))
    }

    /// Read only the expiry marker.
    ///
    /// # Errors
    /// Returns `Err` if the backend fails.
    pub async fn expiry(&self, fingerprint: &str) -> Result<Option<i64>> {
        let raw = match self.backend.get(&KeyBuilder::ttl(fingerprint)).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        match deserialize_from_store::<i64>(&raw) {
            Ok(expires_at) => Ok(Some(expires_at)),
            Err(e) => {
                warn!("Discarding undecodable TTL marker {}: {}", fingerprint, e);
                Ok(None)
            }
        }
    }

    /// Overwrite the body and expiry marker for a fingerprint.
    ///
    /// The body is written before the marker, so a concurrent reader can at
    /// worst see the new body with the old expiry.
    ///
    /// # Errors
    /// Returns `Err` if serialization or the backend fails.
    pub async fn put_entry(
        &self,
        fingerprint: &str,
        body: Vec<u8>,
        expires_at: i64,
    ) -> Result<CacheEntry> {
        let raw = serialize_for_store(&body)?;
        self.backend.set(&KeyBuilder::entry(fingerprint), raw).await?;
        self.set_expiry(fingerprint, expires_at).await?;

        Ok(CacheEntry {
            fingerprint: fingerprint.to_string(),
            body,
            expires_at,
        })
    }

    /// Overwrite only the expiry marker.
    ///
    /// # Errors
    /// Returns `Err` if serialization or the backend fails.
    pub async fn set_expiry(&self, fingerprint: &str, expires_at: i64) -> Result<()> {
        let raw = serialize_for_store(&expires_at)?;
        self.backend.set(&KeyBuilder::ttl(fingerprint), raw).await
    }

    /// # Errors
    /// Returns `Err` if the backend fails.
    pub async fn get_negative(&self, uri_hash: &str) -> Result<Option<NegativeEntry>> {
        let raw = match self.backend.get(&KeyBuilder::negative(uri_hash)).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        match deserialize_from_store(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!("Discarding undecodable negative entry {}: {}", uri_hash, e);
                Ok(None)
            }
        }
    }

    /// # Errors
    /// Returns `Err` if serialization or the backend fails.
    pub async fn put_negative(&self, uri_hash: &str, entry: &NegativeEntry) -> Result<()> {
        let raw = serialize_for_store(entry)?;
        self.backend.set(&KeyBuilder::negative(uri_hash), raw).await
    }

    /// Atomically create the refresh marker for a fingerprint.
    ///
    /// Returns `true` if this caller created it and therefore owns the refresh.
    ///
    /// # Errors
    /// Returns `Err` if serialization or the backend fails.
    pub async fn try_mark(&self, fingerprint: &str, now: i64) -> Result<bool> {
        let raw = serialize_for_store(&now)?;
        self.backend
            .set_if_absent(&KeyBuilder::queue_marker(fingerprint), raw)
            .await
    }

    /// Create the refresh marker, or take over one set at least `lease`
    /// seconds before `now`.
    ///
    /// Markers outlive the in-process queue that was meant to clear them when
    /// a process dies or stops without draining. A marker that old is treated
    /// as abandoned; the takeover is a compare-and-swap on the exact stored
    /// value, so concurrent takers still produce a single winner.
    ///
    /// # Errors
    /// Returns `Err` if serialization or the backend fails.
    pub async fn try_mark_or_reclaim(&self, fingerprint: &str, now: i64, lease: i64) -> Result<bool> {
        if self.try_mark(fingerprint, now).await? {
            return Ok(true);
        }

        let key = KeyBuilder::queue_marker(fingerprint);
        let current = match self.backend.get(&key).await? {
            Some(current) => current,
            // Cleared since the failed create; compete for it again.
            None => return self.try_mark(fingerprint, now).await,
        };

        match deserialize_from_store::<i64>(&current) {
            Ok(marked_at) if now.saturating_sub(marked_at) < lease => return Ok(false),
            Ok(marked_at) => warn!(
                "Reclaiming refresh marker for {} set {}s ago",
                fingerprint,
                now.saturating_sub(marked_at)
            ),
            Err(e) => warn!("Reclaiming undecodable refresh marker for {}: {}", fingerprint, e),
        }

        let raw = serialize_for_store(&now)?;
        self.backend.compare_and_swap(&key, &current, raw).await
    }

    /// # Errors
    /// Returns `Err` if the backend fails.
    pub async fn is_marked(&self, fingerprint: &str) -> Result<bool> {
        self.backend
            .exists(&KeyBuilder::queue_marker(fingerprint))
            .await
    }

    /// # Errors
    /// Returns `Err` if the backend fails.
    pub async fn clear_mark(&self, fingerprint: &str) -> Result<()> {
        self.backend
            .delete(&KeyBuilder::queue_marker(fingerprint))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;

    #[tokio::test]
    async fn test_put_and_get_entry() {
        let store = CacheStore::new(InMemoryBackend::new());

        store
            .put_entry("anime:1", br#"{"title":"Cowboy Bebop"}"#.to_vec(), 5_000)
            .await
            .unwrap();

        let entry = store.get_entry("anime:1").await.unwrap().expect("entry");
        assert_eq!(entry.body, br#"{"title":"Cowboy Bebop"}"#.to_vec());
        assert_eq!(entry.expires_at, 5_000);
        assert!(entry.is_fresh(4_999));
        assert!(!entry.is_fresh(5_000));
        assert!(store.backend().exists("ttl:anime:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_expiry_rewritten_independently_of_body() {
        let store = CacheStore::new(InMemoryBackend::new());
        store.put_entry("anime:1", b"{}".to_vec(), 100).await.unwrap();

        store.set_expiry("anime:1", 900).await.unwrap();

        let entry = store.get_entry("anime:1").await.unwrap().unwrap();
        assert_eq!(entry.expires_at, 900);
        assert_eq!(entry.body, b"{}".to_vec());
    }

    #[tokio::test]
    async fn test_missing_ttl_marker_reads_as_overdue() {
        let store = CacheStore::new(InMemoryBackend::new());
        store.put_entry("anime:1", b"{}".to_vec(), 100).await.unwrap();
        store.backend().delete("ttl:anime:1").await.unwrap();

        let entry = store.get_entry("anime:1").await.unwrap().unwrap();
        assert_eq!(entry.expires_at, 0);
    }

    #[tokio::test]
    async fn test_foreign_value_reads_as_absent() {
        let backend = InMemoryBackend::new();
        backend.set("body:anime:1", b"not an envelope".to_vec()).await.unwrap();

        let store = CacheStore::new(backend);
        assert!(store.get_entry("anime:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_abandoned_marker_is_reclaimed_once() {
        let store = CacheStore::new(InMemoryBackend::new());
        assert!(store.try_mark("anime:1", 100).await.unwrap());

        // Within the lease the marker still belongs to its creator.
        assert!(!store.try_mark_or_reclaim("anime:1", 399, 300).await.unwrap());

        // Past the lease exactly one caller takes it over.
        assert!(store.try_mark_or_reclaim("anime:1", 400, 300).await.unwrap());
        assert!(!store.try_mark_or_reclaim("anime:1", 400, 300).await.unwrap());
        assert!(!store.try_mark_or_reclaim("anime:1", 401, 300).await.unwrap());
    }

    #[tokio::test]
    async fn test_reclaim_creates_missing_marker() {
        let store = CacheStore::new(InMemoryBackend::new());
        assert!(store.try_mark_or_reclaim("anime:1", 10, 300).await.unwrap());
        assert!(store.is_marked("anime:1").await.unwrap());
        assert!(!store.try_mark_or_reclaim("anime:1", 11, 300).await.unwrap());
    }

    #[tokio::test]
    async fn test_undecodable_marker_is_reclaimed() {
        let backend = InMemoryBackend::new();
        backend
            .set("queue_update:anime:1", b"garbage".to_vec())
            .await
            .unwrap();

        let store = CacheStore::new(backend);
        assert!(store.try_mark_or_reclaim("anime:1", 10, 300).await.unwrap());
    }

    #[tokio::test]
    async fn test_marker_lifecycle() {
        let store = CacheStore::new(InMemoryBackend::new());

        assert!(store.try_mark("anime:1", 10).await.unwrap());
        assert!(!store.try_mark("anime:1", 11).await.unwrap());
        assert!(store.is_marked("anime:1").await.unwrap());

        store.clear_mark("anime:1").await.unwrap();
        assert!(!store.is_marked("anime:1").await.unwrap());
        assert!(store.try_mark("anime:1", 12).await.unwrap());
    }
}
