//! Fetch-serialize-commit pipeline shared by the request path and workers.

use crate::backend::CacheBackend;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, Request};
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::policy::PolicyTable;
use crate::store::{CacheEntry, CacheStore};
use crate::upstream::{CommitHook, NoOpCommitHook, ResponseSerializer, Upstream};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default upper bound on a single upstream fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Fetches a resource from upstream and commits it to the store.
///
/// Every handle shares the same upstream, serializer and policies, so a
/// refresher is cheap to clone into worker tasks.
pub struct Refresher<B, U, S>
where
    B: CacheBackend,
    U: Upstream,
    S: ResponseSerializer<U::Document>,
{
    store: CacheStore<B>,
    upstream: Arc<U>,
    serializer: Arc<S>,
    policies: Arc<PolicyTable>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn CacheMetrics>,
    hook: Arc<dyn CommitHook>,
}

impl<B, U, S> Clone for Refresher<B, U, S>
where
    B: CacheBackend,
    U: Upstream,
    S: ResponseSerializer<U::Document>,
{
    fn clone(&self) -> Self {
        Refresher {
            store: self.store.clone(),
            upstream: Arc::clone(&self.upstream),
            serializer: Arc::clone(&self.serializer),
            policies: Arc::clone(&self.policies),
            timeout: self.timeout,
            clock: Arc::clone(&self.clock),
            metrics: Arc::clone(&self.metrics),
            hook: Arc::clone(&self.hook),
        }
    }
}

impl<B, U, S> Refresher<B, U, S>
where
    B: CacheBackend,
    U: Upstream,
    S: ResponseSerializer<U::Document>,
{
    pub fn new(store: CacheStore<B>, upstream: U, serializer: S) -> Self {
        Refresher {
            store,
            upstream: Arc::new(upstream),
            serializer: Arc::new(serializer),
            policies: Arc::new(PolicyTable::with_defaults()),
            timeout: DEFAULT_FETCH_TIMEOUT,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(NoOpMetrics),
            hook: Arc::new(NoOpCommitHook),
        }
    }

    pub fn with_policies(mut self, policies: Arc<PolicyTable>) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_commit_hook(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn store(&self) -> &CacheStore<B> {
        &self.store
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch and serialize without touching the store.
    ///
    /// # Errors
    /// - `Error::Timeout` if the upstream does not answer within the bound
    /// - `Error::Upstream` with the fetcher's error otherwise
    /// - `Error::SerializationError` if the document cannot be serialized
    pub async fn fetch(&self, resource_type: &str, request: &Request) -> Result<Vec<u8>> {
        let fetch = self.upstream.fetch(resource_type, request);
        let document = match tokio::time::timeout(self.timeout, fetch).await {
            Ok(Ok(document)) => document,
            Ok(Err(e)) => return Err(Error::Upstream(e)),
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "upstream fetch for {} exceeded {:?}",
                    request.path, self.timeout
                )))
            }
        };
        self.serializer.serialize(&document)
    }

    /// Absolute expiry for a body of `resource_type` written now.
    pub fn expiry_from_now(&self, resource_type: &str) -> i64 {
        self.clock.now() + self.policies.ttl(resource_type).as_secs() as i64
    }

    /// Write a body with a freshly computed expiry.
    ///
    /// # Errors
    /// Returns `Err` if the store write fails.
    pub async fn commit(&self, fingerprint: &Fingerprint, body: Vec<u8>) -> Result<CacheEntry> {
        let expires_at = self.expiry_from_now(&fingerprint.resource_type);
        self.commit_until(fingerprint, body, expires_at).await
    }

    /// Write a body with a caller-computed expiry.
    ///
    /// # Errors
    /// Returns `Err` if the store write fails.
    pub async fn commit_until(
        &self,
        fingerprint: &Fingerprint,
        body: Vec<u8>,
        expires_at: i64,
    ) -> Result<CacheEntry> {
        let entry = self
            .store
            .put_entry(&fingerprint.key, body, expires_at)
            .await?;

        self.hook
            .on_commit(&fingerprint.key, &fingerprint.resource_type, &entry.body);
        debug!("Committed {} (expires at {})", fingerprint.key, expires_at);
        Ok(entry)
    }

    /// Fetch from upstream and overwrite the stored entry.
    ///
    /// On failure the stored entry is left untouched.
    ///
    /// # Errors
    /// Same as [`Refresher::fetch`] and [`Refresher::commit`].
    pub async fn refresh(&self, fingerprint: &Fingerprint, request: &Request) -> Result<CacheEntry> {
        let timer = Instant::now();
        let body = self.fetch(&fingerprint.resource_type, request).await?;
        let entry = self.commit(fingerprint, body).await?;
        self.metrics.record_refresh(&fingerprint.key, timer.elapsed());
        Ok(entry)
    }
}
