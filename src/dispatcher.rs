//! Refresh dispatcher - main entry point for request handling.
//!
//! Runs the per-request state machine (see [`crate::strategy`]) and returns
//! the body to serve with its cache metadata. The dispatcher never blocks on
//! upstream for a stale queueable entry; it serves the stale body and leaves
//! the refresh to a [`RefreshWorker`].

use crate::backend::CacheBackend;
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::error::{Error, FetchError, Result};
use crate::fingerprint::{Fingerprint, FingerprintResolver, Request, Resolution};
use crate::negative::{NegativeCache, NegativeEntry};
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::policy::PolicyTable;
use crate::queue::{RefreshJob, RefreshQueue};
use crate::refresh::Refresher;
use crate::store::{CacheEntry, CacheStore};
use crate::strategy::{decide, CacheDecision, CacheMeta};
use crate::upstream::{CommitHook, ResponseSerializer, Upstream};
use crate::worker::RefreshWorker;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// How long a refresh marker may stay set before another request treats it
/// as abandoned and enqueues the refresh again.
pub const DEFAULT_MARKER_LEASE: Duration = Duration::from_secs(300);

/// A body ready for the response assembler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServedBody {
    /// Store key, `None` for bypassed requests.
    pub key: Option<String>,
    /// Resource type used to pick content fix-ups.
    pub resource_type: String,
    pub body: Vec<u8>,
    pub meta: CacheMeta,
    pub decision: CacheDecision,
}

/// Result of dispatching one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatched {
    Served(ServedBody),
    /// The URI is known not to exist upstream.
    NotFound {
        request_hash: String,
        entry: NegativeEntry,
    },
}

impl Dispatched {
    pub fn decision(&self) -> CacheDecision {
        match self {
            Dispatched::Served(served) => served.decision,
            Dispatched::NotFound { .. } => CacheDecision::NegativeHit,
        }
    }
}

/// Stale-while-revalidate request dispatcher.
///
/// Store, queue, upstream and serializer are injected; nothing here reads
/// global state.
///
/// # Example
///
/// ```ignore
/// use swr_kit::{RefreshDispatcher, RefreshQueue, backend::InMemoryBackend};
/// use swr_kit::upstream::JsonSerializer;
///
/// let queue = RefreshQueue::new();
/// let dispatcher = RefreshDispatcher::new(InMemoryBackend::new(), upstream, JsonSerializer, queue);
/// let workers = dispatcher.spawn_workers(2);
///
/// let dispatched = dispatcher.dispatch(&Request::new("anime", "/anime/1")).await?;
/// ```
pub struct RefreshDispatcher<B, U, S>
where
    B: CacheBackend,
    U: Upstream,
    S: ResponseSerializer<U::Document>,
{
    store: CacheStore<B>,
    negative: NegativeCache<B>,
    queue: RefreshQueue,
    refresher: Refresher<B, U, S>,
    resolver: FingerprintResolver,
    policies: Arc<PolicyTable>,
    marker_lease: Duration,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn CacheMetrics>,
}

impl<B, U, S> RefreshDispatcher<B, U, S>
where
    B: CacheBackend,
    U: Upstream,
    S: ResponseSerializer<U::Document>,
{
    /// Create a dispatcher with default policies, resolver and system clock.
    pub fn new(backend: B, upstream: U, serializer: S, queue: RefreshQueue) -> Self {
        let store = CacheStore::new(backend);
        let refresher = Refresher::new(store.clone(), upstream, serializer);
        let policies = Arc::new(PolicyTable::with_defaults());

        RefreshDispatcher {
            negative: NegativeCache::new(store.clone()),
            store,
            queue,
            refresher: refresher.with_policies(Arc::clone(&policies)),
            resolver: FingerprintResolver::new(),
            policies,
            marker_lease: DEFAULT_MARKER_LEASE,
            clock: Arc::new(crate::clock::SystemClock),
            metrics: Arc::new(NoOpMetrics),
        }
    }

    /// Create a dispatcher with policies, bypass credential and fetch
    /// timeout taken from configuration.
    pub fn from_config(
        backend: B,
        upstream: U,
        serializer: S,
        queue: RefreshQueue,
        config: &CacheConfig,
    ) -> Self {
        Self::new(backend, upstream, serializer, queue)
            .with_policies(config.policy_table())
            .with_resolver(config.resolver())
            .with_fetch_timeout(config.upstream_timeout())
            .with_marker_lease(config.marker_lease())
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.refresher = self.refresher.with_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.refresher = self.refresher.with_metrics(Arc::clone(&metrics));
        self.metrics = metrics;
        self
    }

    pub fn with_commit_hook(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.refresher = self.refresher.with_commit_hook(hook);
        self
    }

    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        let policies = Arc::new(policies);
        self.refresher = self.refresher.with_policies(Arc::clone(&policies));
        self.policies = policies;
        self
    }

    pub fn with_resolver(mut self, resolver: FingerprintResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.refresher = self.refresher.with_timeout(timeout);
        self
    }

    /// Age after which a pending-refresh marker is considered abandoned.
    pub fn with_marker_lease(mut self, lease: Duration) -> Self {
        self.marker_lease = lease;
        self
    }

    pub fn store(&self) -> &CacheStore<B> {
        &self.store
    }

    pub fn queue(&self) -> &RefreshQueue {
        &self.queue
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn resolver(&self) -> &FingerprintResolver {
        &self.resolver
    }

    /// Build a worker consuming this dispatcher's queue.
    pub fn worker(&self, id: usize) -> RefreshWorker<B, U, S> {
        RefreshWorker::new(
            id,
            self.refresher.clone(),
            self.queue.clone(),
            Arc::clone(&self.metrics),
        )
    }

    /// Spawn a pool of workers consuming this dispatcher's queue.
    pub fn spawn_workers(&self, count: usize) -> Vec<JoinHandle<()>> {
        info!("Spawning {} refresh workers", count);
        RefreshWorker::spawn_pool(
            count,
            self.refresher.clone(),
            self.queue.clone(),
            Arc::clone(&self.metrics),
        )
    }

    /// Handle one request.
    ///
    /// # Errors
    ///
    /// Returns `Err` only when there is nothing to fall back to:
    /// - `Error::Upstream` / `Error::Timeout`: a miss or bypass whose fetch failed
    /// - `Error::BackendError`: the store could not be read
    /// - `Error::SerializationError`: the fetched document could not be serialized
    pub async fn dispatch(&self, request: &Request) -> Result<Dispatched> {
        let now = self.clock.now();

        let fingerprint = match self.resolver.resolve(request) {
            Resolution::Cacheable(fp) => fp,
            Resolution::Bypass { reason, uri_hash } => {
                debug!("» Bypassing cache for {} ({:?})", request.path, reason);
                return self.bypass(request, uri_hash, now).await;
            }
        };

        if let Some(entry) = self.negative.check(&fingerprint.uri_hash).await? {
            debug!("✗ Negative hit for {}", request.path);
            self.metrics.record_negative_hit(&fingerprint.uri_hash);
            return Ok(Dispatched::NotFound {
                request_hash: fingerprint.request_hash,
                entry,
            });
        }

        let entry = self.store.get_entry(&fingerprint.key).await?;
        let queueable = self.policies.is_queueable(&fingerprint.resource_type);
        let decision = decide(entry.as_ref().map(|e| e.expires_at), now, queueable);

        debug!(
            "» Dispatch {} (resource type: {}, decision: {})",
            fingerprint.key, fingerprint.resource_type, decision
        );

        match (decision, entry) {
            (CacheDecision::HitFresh, Some(entry)) => {
                self.metrics.record_hit(&fingerprint.key);
                Ok(Self::serve_cached(fingerprint, entry, now, decision))
            }
            (CacheDecision::HitStaleSync, Some(entry)) => {
                self.refresh_in_place(request, fingerprint, entry, now).await
            }
            (CacheDecision::HitStaleQueued, Some(entry)) => {
                self.enqueue_refresh(request, &fingerprint, now).await;
                Ok(Self::serve_cached(fingerprint, entry, now, decision))
            }
            _ => self.miss(request, fingerprint, now).await,
        }
    }

    async fn bypass(&self, request: &Request, uri_hash: String, now: i64) -> Result<Dispatched> {
        let body = self.refresher.fetch(&request.route, request).await?;
        Ok(Dispatched::Served(ServedBody {
            key: None,
            resource_type: request.route.clone(),
            body,
            meta: CacheMeta::new(uri_hash, now),
            decision: CacheDecision::Bypass,
        }))
    }

    async fn miss(
        &self,
        request: &Request,
        fingerprint: Fingerprint,
        now: i64,
    ) -> Result<Dispatched> {
        let timer = Instant::now();

        let body = match self
            .refresher
            .fetch(&fingerprint.resource_type, request)
            .await
        {
            Ok(body) => body,
            Err(Error::Upstream(fetch_error @ FetchError::NotFound { .. })) => {
                return self.record_not_found(fingerprint, &fetch_error).await;
            }
            Err(e) => {
                warn!("✗ Fetch failed on miss for {}: {}", fingerprint.key, e);
                self.metrics.record_error(&fingerprint.key, &e.to_string());
                return Err(e);
            }
        };

        let expires_at = self.refresher.expiry_from_now(&fingerprint.resource_type);
        if let Err(e) = self
            .refresher
            .commit_until(&fingerprint, body.clone(), expires_at)
            .await
        {
            // Still answer the client; the next request retries the write.
            warn!("Could not store {}: {}", fingerprint.key, e);
            self.metrics.record_error(&fingerprint.key, &e.to_string());
        }

        self.metrics.record_miss(&fingerprint.key, timer.elapsed());

        Ok(Dispatched::Served(ServedBody {
            key: Some(fingerprint.key),
            resource_type: fingerprint.resource_type,
            body,
            meta: CacheMeta::new(fingerprint.request_hash, now)
                .with_cached(false)
                .with_expiry(expires_at),
            decision: CacheDecision::Miss,
        }))
    }

    async fn record_not_found(
        &self,
        fingerprint: Fingerprint,
        error: &FetchError,
    ) -> Result<Dispatched> {
        let entry = match NegativeEntry::from_fetch_error(error) {
            Some(entry) => entry,
            None => return Err(Error::Upstream(error.clone())),
        };

        if let Err(e) = self.negative.record(&fingerprint.uri_hash, &entry).await {
            warn!(
                "Could not record negative result for {}: {}",
                fingerprint.key, e
            );
        }

        Ok(Dispatched::NotFound {
            request_hash: fingerprint.request_hash,
            entry,
        })
    }

    /// Refresh a stale non-queueable entry in the request path, serving the
    /// stale body if the refresh fails.
    async fn refresh_in_place(
        &self,
        request: &Request,
        fingerprint: Fingerprint,
        stale: CacheEntry,
        now: i64,
    ) -> Result<Dispatched> {
        self.metrics.record_stale(&fingerprint.key, false);

        match self.refresher.refresh(&fingerprint, request).await {
            Ok(entry) => Ok(Dispatched::Served(ServedBody {
                key: Some(fingerprint.key),
                resource_type: fingerprint.resource_type,
                body: entry.body,
                meta: CacheMeta::new(fingerprint.request_hash, now)
                    .with_cached(false)
                    .with_expiry(entry.expires_at),
                decision: CacheDecision::HitStaleSync,
            })),
            Err(e) => {
                warn!(
                    "Synchronous refresh of {} failed, serving stale entry: {}",
                    fingerprint.key, e
                );
                self.metrics.record_error(&fingerprint.key, &e.to_string());
                Ok(Self::serve_cached(
                    fingerprint,
                    stale,
                    now,
                    CacheDecision::HitStaleSync,
                ))
            }
        }
    }

    /// Enqueue a background refresh unless one is already pending.
    async fn enqueue_refresh(&self, request: &Request, fingerprint: &Fingerprint, now: i64) {
        let lease = self.marker_lease.as_secs() as i64;
        let won = match self
            .store
            .try_mark_or_reclaim(&fingerprint.key, now, lease)
            .await
        {
            Ok(won) => won,
            Err(e) => {
                warn!("Could not mark {} for refresh: {}", fingerprint.key, e);
                self.metrics.record_error(&fingerprint.key, &e.to_string());
                false
            }
        };

        self.metrics.record_stale(&fingerprint.key, won);
        if !won {
            debug!("Refresh already pending for {}", fingerprint.key);
            return;
        }

        let priority = self.policies.priority(&fingerprint.resource_type);
        let job = RefreshJob::new(fingerprint.clone(), request.clone(), priority, now);

        if self.queue.push(job) {
            self.metrics.record_enqueue(&fingerprint.key, priority);
        } else if let Err(e) = self.store.clear_mark(&fingerprint.key).await {
            // Queue is closed; release the marker so it does not outlive us.
            warn!("Could not clear marker for {}: {}", fingerprint.key, e);
        }
    }

    fn serve_cached(
        fingerprint: Fingerprint,
        entry: CacheEntry,
        now: i64,
        decision: CacheDecision,
    ) -> Dispatched {
        Dispatched::Served(ServedBody {
            key: Some(fingerprint.key),
            resource_type: fingerprint.resource_type,
            body: entry.body,
            meta: CacheMeta::new(fingerprint.request_hash, now)
                .with_cached(true)
                .with_expiry(entry.expires_at),
            decision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::clock::ManualClock;
    use crate::policy::{Priority, ResourcePolicy};
    use crate::upstream::{InMemoryUpstream, JsonSerializer};
    use serde_json::json;

    type TestDispatcher = RefreshDispatcher<InMemoryBackend, InMemoryUpstream, JsonSerializer>;

    fn setup() -> (TestDispatcher, InMemoryUpstream, ManualClock) {
        let upstream = InMemoryUpstream::new();
        let clock = ManualClock::new(1_000_000);
        let dispatcher = RefreshDispatcher::new(
            InMemoryBackend::new(),
            upstream.clone(),
            JsonSerializer,
            RefreshQueue::new(),
        )
        .with_clock(Arc::new(clock.clone()))
        .with_resolver(FingerprintResolver::new().with_bypass("x-cache-bypass", "secret"));
        (dispatcher, upstream, clock)
    }

    fn served(dispatched: Dispatched) -> ServedBody {
        match dispatched {
            Dispatched::Served(served) => served,
            other => panic!("expected a served body, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_miss_then_fresh_hit() {
        let (dispatcher, upstream, _clock) = setup();
        upstream.insert("/anime/1", json!({"title": "Cowboy Bebop"}));
        let request = Request::new("anime", "/anime/1");

        let first = served(dispatcher.dispatch(&request).await.unwrap());
        assert_eq!(first.decision, CacheDecision::Miss);
        assert!(!first.meta.is_cached);

        let second = served(dispatcher.dispatch(&request).await.unwrap());
        assert_eq!(second.decision, CacheDecision::HitFresh);
        assert!(second.meta.is_cached);
        assert_eq!(second.body, first.body);
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn test_miss_surfaces_transient_error_without_storing() {
        let (dispatcher, upstream, _clock) = setup();
        upstream.fail_transient("/anime/1", "429 Too Many Requests");
        let request = Request::new("anime", "/anime/1");

        let err = dispatcher.dispatch(&request).await.unwrap_err();
        assert!(err.is_upstream());
        assert!(dispatcher.store().get_entry("anime:1").await.unwrap().is_none());

        // Rate limits never become negative entries.
        upstream.insert("/anime/1", json!({}));
        let served = served(dispatcher.dispatch(&request).await.unwrap());
        assert_eq!(served.decision, CacheDecision::Miss);
    }

    #[tokio::test]
    async fn test_bypass_stores_nothing() {
        let (dispatcher, upstream, _clock) = setup();
        upstream.insert("/anime/1", json!({"title": "Cowboy Bebop"}));
        let request = Request::new("anime", "/anime/1").with_header("X-Cache-Bypass", "secret");

        let served = served(dispatcher.dispatch(&request).await.unwrap());
        assert_eq!(served.decision, CacheDecision::Bypass);
        assert!(served.key.is_none());
        assert!(dispatcher.store().get_entry("anime:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_queued_marks_once_and_uses_priority() {
        let (dispatcher, upstream, clock) = setup();
        upstream.insert("/anime/1", json!({}));
        let request = Request::new("anime", "/anime/1");

        dispatcher.dispatch(&request).await.unwrap();
        clock.advance(86_400);

        for _ in 0..3 {
            let served = served(dispatcher.dispatch(&request).await.unwrap());
            assert_eq!(served.decision, CacheDecision::HitStaleQueued);
        }

        assert_eq!(dispatcher.queue().lane_len(Priority::High), 1);
        assert_eq!(dispatcher.queue().lane_len(Priority::Low), 0);
        assert!(dispatcher.store().is_marked("anime:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_queue_releases_marker() {
        let (dispatcher, upstream, clock) = setup();
        upstream.insert("/anime/1", json!({}));
        let request = Request::new("anime", "/anime/1");

        dispatcher.dispatch(&request).await.unwrap();
        clock.advance(86_401);
        dispatcher.queue().close();

        let served = served(dispatcher.dispatch(&request).await.unwrap());
        assert_eq!(served.decision, CacheDecision::HitStaleQueued);
        assert!(!dispatcher.store().is_marked("anime:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_abandoned_marker_is_re_enqueued_by_new_process() {
        let (dispatcher, upstream, clock) = setup();
        upstream.insert("/anime/1", json!({}));
        let request = Request::new("anime", "/anime/1");

        dispatcher.dispatch(&request).await.unwrap();
        clock.advance(86_401);
        dispatcher.dispatch(&request).await.unwrap();
        assert_eq!(dispatcher.queue().len(), 1);

        // The process dies with the job still queued; only the store survives.
        let backend = dispatcher.store().backend().clone();
        drop(dispatcher);
        let restarted = RefreshDispatcher::new(
            backend,
            upstream.clone(),
            JsonSerializer,
            RefreshQueue::new(),
        )
        .with_clock(Arc::new(clock.clone()))
        .with_marker_lease(Duration::from_secs(60));

        restarted.dispatch(&request).await.unwrap();
        assert_eq!(restarted.queue().len(), 0, "marker is still within its lease");

        clock.advance(60);
        for _ in 0..3 {
            let served = served(restarted.dispatch(&request).await.unwrap());
            assert_eq!(served.decision, CacheDecision::HitStaleQueued);
        }
        assert_eq!(restarted.queue().len(), 1);

        assert_eq!(restarted.worker(0).run_pending().await, 1);
        assert!(!restarted.store().is_marked("anime:1").await.unwrap());
        let fresh = served(restarted.dispatch(&request).await.unwrap());
        assert_eq!(fresh.decision, CacheDecision::HitFresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_sync_timeout_serves_stale_body() {
        let (dispatcher, upstream, clock) = setup();
        let dispatcher = dispatcher.with_fetch_timeout(Duration::from_secs(2));
        upstream.insert("/users/nekomata", json!({"v": 1}));
        let request = Request::new("user_profile", "/users/nekomata");

        dispatcher.dispatch(&request).await.unwrap();
        clock.advance(90_000);
        upstream.insert("/users/nekomata", json!({"v": 2}));
        upstream.set_delay(Some(Duration::from_secs(30)));

        let started = tokio::time::Instant::now();
        let served = served(dispatcher.dispatch(&request).await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(30));

        assert_eq!(served.decision, CacheDecision::HitStaleSync);
        assert!(served.meta.is_cached);
        assert_eq!(served.body, br#"{"v":1}"#.to_vec());
        assert!(served.meta.ttl_remaining() < 0);
    }

    #[tokio::test]
    async fn test_stale_sync_refreshes_in_request_path() {
        let (dispatcher, upstream, clock) = setup();
        upstream.insert("/users/nekomata", json!({"v": 1}));
        let request = Request::new("user_profile", "/users/nekomata");

        dispatcher.dispatch(&request).await.unwrap();
        clock.advance(90_000);
        upstream.insert("/users/nekomata", json!({"v": 2}));

        let served = served(dispatcher.dispatch(&request).await.unwrap());
        assert_eq!(served.decision, CacheDecision::HitStaleSync);
        assert!(!served.meta.is_cached);
        assert_eq!(served.body, br#"{"v":2}"#.to_vec());
        assert!(served.meta.ttl_remaining() > 0);
        assert!(dispatcher.queue().is_empty());
    }

    #[tokio::test]
    async fn test_per_type_ttl_override() {
        let (dispatcher, upstream, clock) = setup();
        let dispatcher = dispatcher.with_policies(
            PolicyTable::with_defaults().with_policy(
                "schedule",
                ResourcePolicy::queueable(Priority::Low).with_ttl(Duration::from_secs(60)),
            ),
        );
        upstream.insert("/schedule", json!([]));

        let served = served(
            dispatcher
                .dispatch(&Request::new("schedule", "/schedule"))
                .await
                .unwrap(),
        );
        assert_eq!(served.meta.expires_at, Some(clock.now() + 60));

        let key = served.key.clone().unwrap();
        assert_eq!(
            dispatcher.store().expiry(&key).await.unwrap(),
            served.meta.expires_at
        );
    }
}
