//! Metrics hooks for cache decisions and refreshes.
//!
//! Implement [`CacheMetrics`] to forward controller events to your monitoring
//! system:
//!
//! ```ignore
//! use swr_kit::observability::CacheMetrics;
//!
//! struct PrometheusMetrics;
//!
//! impl CacheMetrics for PrometheusMetrics {
//!     fn record_stale(&self, key: &str, queued: bool) {
//!         // counter!("swr_stale_served", "queued" => queued.to_string()).increment(1);
//!     }
//! }
//! ```
//!
//! Every method has a default body that logs through the `log` crate, so an
//! implementation only overrides what it cares about. [`NoOpMetrics`] silences
//! everything and is what the dispatcher uses unless told otherwise.

use crate::policy::Priority;
use std::time::Duration;

/// Trait for controller metrics collection.
pub trait CacheMetrics: Send + Sync {
    /// Fresh entry served.
    fn record_hit(&self, key: &str) {
        debug!("Cache HIT: {}", key);
    }

    /// No entry; served after a synchronous fetch.
    fn record_miss(&self, key: &str, fetch: Duration) {
        debug!("Cache MISS: {} fetched in {:?}", key, fetch);
    }

    /// Stale entry served. `queued` tells whether the stale path was the
    /// queueable one (as opposed to a synchronous refresh that failed).
    fn record_stale(&self, key: &str, queued: bool) {
        debug!("Cache STALE: {} (queued: {})", key, queued);
    }

    /// Request short-circuited by the negative-result cache.
    fn record_negative_hit(&self, uri_hash: &str) {
        debug!("Cache NEGATIVE: {}", uri_hash);
    }

    /// Refresh job enqueued.
    fn record_enqueue(&self, key: &str, priority: Priority) {
        debug!("Cache ENQUEUE: {} ({})", key, priority);
    }

    /// Entry rewritten after a successful upstream fetch.
    fn record_refresh(&self, key: &str, duration: Duration) {
        debug!("Cache REFRESH: {} took {:?}", key, duration);
    }

    /// Upstream or store failure.
    fn record_error(&self, key: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str) {}
    fn record_miss(&self, _key: &str, _fetch: Duration) {}
    fn record_stale(&self, _key: &str, _queued: bool) {}
    fn record_negative_hit(&self, _uri_hash: &str) {}
    fn record_enqueue(&self, _key: &str, _priority: Priority) {}
    fn record_refresh(&self, _key: &str, _duration: Duration) {}
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// Metrics implementation that only logs (all default methods).
#[derive(Clone, Default)]
pub struct LogMetrics;

impl CacheMetrics for LogMetrics {}
