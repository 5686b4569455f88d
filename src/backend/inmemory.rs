//! In-memory cache backend (default, thread-safe, async).
//!
//! Uses DashMap for concurrent access with per-key sharding. Values never
//! expire; `set_if_absent` goes through the entry API so it holds the shard
//! lock for the whole test-and-set.

use super::CacheBackend;
use crate::error::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Thread-safe async in-memory backend.
///
/// Suitable for single-node deployments and tests. Clones share the same map.
///
/// # Example
///
/// ```no_run
/// use swr_kit::backend::{CacheBackend, InMemoryBackend};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = InMemoryBackend::new();
///
///     backend.set("anime:1", b"{}".to_vec()).await?;
///     assert!(backend.get("anime:1").await?.is_some());
///
///     // Only the first caller wins the marker
///     assert!(backend.set_if_absent("queue_update:anime:1", vec![1]).await?);
///     assert!(!backend.set_if_absent("queue_update:anime:1", vec![1]).await?);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    store: Arc<DashMap<String, Vec<u8>>>,
}

impl InMemoryBackend {
    /// Create a new in-memory backend.
    pub fn new() -> Self {
        InMemoryBackend {
            store: Arc::new(DashMap::new()),
        }
    }

    /// Get the current number of keys.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if the backend holds no keys.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Get memory statistics.
    pub fn stats(&self) -> BackendStats {
        let total_bytes: usize = self.store.iter().map(|entry| entry.value().len()).sum();

        BackendStats {
            total_entries: self.store.len(),
            total_bytes,
        }
    }

    /// Print statistics to debug log.
    pub fn log_stats(&self) {
        let stats = self.stats();
        debug!(
            "InMemory stats: {} entries, {} bytes",
            stats.total_entries, stats.total_bytes
        );
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self.store.get(key).map(|entry| entry.value().clone());
        if value.is_some() {
            debug!("✓ InMemory GET {} -> HIT", key);
        } else {
            debug!("✓ InMemory GET {} -> MISS", key);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.store.insert(key.to_string(), value);
        debug!("✓ InMemory SET {}", key);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        let created = match self.store.entry(key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        };
        debug!("✓ InMemory SETNX {} -> {}", key, created);
        Ok(created)
    }

    async fn compare_and_swap(&self, key: &str, expected: &[u8], value: Vec<u8>) -> Result<bool> {
        let swapped = match self.store.entry(key.to_string()) {
            Entry::Occupied(mut slot) if slot.get().as_slice() == expected => {
                slot.insert(value);
                true
            }
            _ => false,
        };
        debug!("✓ InMemory CAS {} -> {}", key, swapped);
        Ok(swapped)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        debug!("✓ InMemory DELETE {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.store.contains_key(key))
    }
}

/// Backend statistics.
#[derive(Clone, Debug)]
pub struct BackendStats {
    pub total_entries: usize,
    pub total_bytes: usize,
}
