//! Process-local micro-cache in front of a shared backend.
//!
//! Absorbs request bursts for hot keys by answering reads from a short-lived
//! local copy instead of round-tripping to the shared store. Only worth it for
//! a remote backend, so [`CacheConfig`](crate::config::CacheConfig) enables it
//! for Redis alone.

use super::CacheBackend;
use crate::error::Result;
use moka::sync::Cache;
use std::time::Duration;

/// Default upper bound on local copies held at once.
pub const DEFAULT_MICRO_CACHE_CAPACITY: u64 = 10_000;

/// Backend wrapper that keeps very-short-TTL local copies of read values.
///
/// - `get` serves a fresh local copy, otherwise reads through and remembers
///   the result.
/// - `set` and `delete` go through and refresh or drop the local copy, so a
///   process always reads its own writes.
/// - `set_if_absent` and `compare_and_swap` are never answered locally: dedup
///   markers must hit the shared store to stay atomic across nodes.
///
/// Local copies are bounded by both age and count; expired copies are evicted
/// by the cache's own housekeeping, not only when the key is read again.
#[derive(Clone)]
pub struct MicroCache<B: CacheBackend> {
    inner: B,
    local: Option<Cache<String, Vec<u8>>>,
}

impl<B: CacheBackend> MicroCache<B> {
    /// Wrap `inner`, keeping up to [`DEFAULT_MICRO_CACHE_CAPACITY`] local
    /// copies for `ttl`.
    ///
    /// A zero `ttl` turns the wrapper into a plain passthrough.
    pub fn new(inner: B, ttl: Duration) -> Self {
        Self::with_capacity(inner, ttl, DEFAULT_MICRO_CACHE_CAPACITY)
    }

    /// Wrap `inner`, keeping at most `capacity` local copies for `ttl`.
    pub fn with_capacity(inner: B, ttl: Duration, capacity: u64) -> Self {
        let local = (!ttl.is_zero() && capacity > 0).then(|| {
            Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build()
        });
        MicroCache { inner, local }
    }

    /// Passthrough wrapper that never keeps local copies.
    pub fn disabled(inner: B) -> Self {
        Self::new(inner, Duration::ZERO)
    }

    /// Returns true when local copies are kept.
    pub fn is_enabled(&self) -> bool {
        self.local.is_some()
    }

    /// Get the wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Number of local copies currently held, after pending evictions ran.
    pub fn local_len(&self) -> u64 {
        match &self.local {
            Some(local) => {
                local.run_pending_tasks();
                local.entry_count()
            }
            None => 0,
        }
    }

    fn forget(&self, key: &str) {
        if let Some(local) = &self.local {
            local.invalidate(key);
        }
    }
}

impl<B: CacheBackend> CacheBackend for MicroCache<B> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let local = match &self.local {
            Some(local) => local,
            None => return self.inner.get(key).await,
        };

        if let Some(data) = local.get(key) {
            debug!("✓ MicroCache GET {} -> LOCAL", key);
            return Ok(Some(data));
        }

        let value = self.inner.get(key).await?;
        if let Some(data) = &value {
            local.insert(key.to_string(), data.clone());
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let local = match &self.local {
            Some(local) => local,
            None => return self.inner.set(key, value).await,
        };
        self.inner.set(key, value.clone()).await?;
        local.insert(key.to_string(), value);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        self.forget(key);
        self.inner.set_if_absent(key, value).await
    }

    async fn compare_and_swap(&self, key: &str, expected: &[u8], value: Vec<u8>) -> Result<bool> {
        self.forget(key);
        self.inner.compare_and_swap(key, expected, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.forget(key);
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if let Some(local) = &self.local {
            if local.contains_key(key) {
                return Ok(true);
            }
        }
        self.inner.exists(key).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.inner.health_check().await
    }
}
