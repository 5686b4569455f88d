//! Durable key/value backends for the cache store.

use crate::error::Result;
use std::future::Future;

pub mod inmemory;
pub mod micro;
#[cfg(feature = "redis")]
pub mod redis;

pub use inmemory::InMemoryBackend;
pub use micro::MicroCache;
#[cfg(feature = "redis")]
pub use redis::{PoolStats, RedisBackend, RedisConfig};

/// Trait for cache backend implementations.
///
/// A backend is a plain durable map. It never expires anything on its own:
/// freshness is decided by the dispatcher from the `ttl:` markers, so a stored
/// body stays servable as a fallback for as long as the backend keeps it.
///
/// All methods take `&self`; implementations use interior mutability or an
/// external store. Returned futures are `Send` so dispatchers and workers built
/// on a generic backend can be spawned onto the tokio runtime.
pub trait CacheBackend: Send + Sync + Clone + 'static {
    /// Retrieve value by key.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` - Value found
    /// - `Ok(None)` - Key not present
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs (connection lost, etc.)
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Store value permanently, overwriting any previous value.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn set(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Store value only if the key is absent. Must be atomic.
    ///
    /// Returns `true` when this call created the key, `false` when it already
    /// existed. Used for refresh dedup markers.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Replace the value only if it currently equals `expected`. Must be atomic.
    ///
    /// Returns `true` when the swap happened. Used to take over abandoned
    /// refresh markers without racing other takers.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        value: Vec<u8>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Remove value.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Check if key exists (optional optimization).
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.get(key).await?.is_some()) }
    }

    /// Health check - verify backend is accessible.
    ///
    /// # Errors
    /// Returns `Err` if backend is not accessible
    fn health_check(&self) -> impl Future<Output = Result<bool>> + Send {
        async { Ok(true) }
    }
}
