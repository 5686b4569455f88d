//! Cache decisions and the metadata they produce.
//!
//! Every request the dispatcher handles ends in exactly one [`CacheDecision`]:
//!
//! | Decision | Entry | Expired | Queueable | Upstream call |
//! |----------|-------|---------|-----------|---------------|
//! | **Bypass** | - | - | - | blocking, nothing stored |
//! | **NegativeHit** | 404 marker | - | - | none |
//! | **Miss** | none | - | - | blocking |
//! | **HitFresh** | yes | no | - | none |
//! | **HitStaleSync** | yes | yes | no | blocking, stale on failure |
//! | **HitStaleQueued** | yes | yes | yes | background, at most one job |
//!
//! Only the entry-dependent part of that table is a pure function of stored
//! state; it lives in [`decide`] so it can be tested without a store.

/// Outcome of the dispatcher's state machine for one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheDecision {
    /// Privileged caller or non-cacheable request; straight to upstream.
    Bypass,
    /// Known not-found URI; fixed 404 without contacting upstream.
    NegativeHit,
    /// No entry; synchronous fetch, failure surfaces to the caller.
    Miss,
    /// Entry exists and has not expired.
    HitFresh,
    /// Entry expired, resource must be refreshed in the request path.
    HitStaleSync,
    /// Entry expired, stale body served while a background refresh runs.
    HitStaleQueued,
}

impl std::fmt::Display for CacheDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheDecision::Bypass => write!(f, "Bypass"),
            CacheDecision::NegativeHit => write!(f, "NegativeHit"),
            CacheDecision::Miss => write!(f, "Miss"),
            CacheDecision::HitFresh => write!(f, "HitFresh"),
            CacheDecision::HitStaleSync => write!(f, "HitStaleSync"),
            CacheDecision::HitStaleQueued => write!(f, "HitStaleQueued"),
        }
    }
}

/// Decide how to serve a cacheable request from stored state.
///
/// `expires_at` is `None` when no entry exists. An entry is fresh only while
/// `expires_at > now`; at `expires_at == now` it is already stale.
pub fn decide(expires_at: Option<i64>, now: i64, queueable: bool) -> CacheDecision {
    match expires_at {
        None => CacheDecision::Miss,
        Some(exp) if exp > now => CacheDecision::HitFresh,
        Some(_) if queueable => CacheDecision::HitStaleQueued,
        Some(_) => CacheDecision::HitStaleSync,
    }
}

/// Cache metadata attached to a served body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheMeta {
    /// Request hash reported to the client.
    pub request_hash: String,
    /// True when the body came out of the store rather than a fetch made
    /// for this request.
    pub is_cached: bool,
    /// Absolute expiry of the served entry (unix seconds); `None` for
    /// bypassed responses.
    pub expires_at: Option<i64>,
    /// Time the decision was taken.
    pub now: i64,
}

impl CacheMeta {
    pub fn new(request_hash: String, now: i64) -> Self {
        CacheMeta {
            request_hash,
            is_cached: false,
            expires_at: None,
            now,
        }
    }

    pub fn with_cached(mut self, is_cached: bool) -> Self {
        self.is_cached = is_cached;
        self
    }

    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Seconds until expiry; negative when overdue and not yet refreshed.
    pub fn ttl_remaining(&self) -> i64 {
        self.expires_at.map(|exp| exp - self.now).unwrap_or(0)
    }
}
