//! Upstream fetcher, response serializer and commit hook seams.
//!
//! The controller never knows how the upstream is scraped or what the
//! documents look like. It needs three things from the outside:
//!
//! - an [`Upstream`] that turns a request into a document or a [`FetchError`],
//! - a [`ResponseSerializer`] that turns the document into the stored body,
//! - optionally a [`CommitHook`] told about every body written to the store
//!   (search indexing plugs in here).
//!
//! # Mocking for Tests
//!
//! [`InMemoryUpstream`] is a scriptable upstream keyed by request path:
//!
//! ```ignore
//! use swr_kit::upstream::InMemoryUpstream;
//! use serde_json::json;
//!
//! let upstream = InMemoryUpstream::new();
//! upstream.insert("/anime/1", json!({"title": "Cowboy Bebop"}));
//! upstream.fail_not_found("/anime/0", "404 on upstream");
//! upstream.fail_transient("/anime/2", "429 Too Many Requests");
//! ```

use crate::error::{Error, FetchError, Result};
use crate::fingerprint::Request;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Trait for upstream fetchers.
///
/// Latency and failure modes are opaque to the controller, which bounds every
/// call with its own timeout.
pub trait Upstream: Send + Sync + 'static {
    /// Structured document produced by a successful fetch.
    type Document: Send + 'static;

    /// Fetch the resource a request maps to.
    ///
    /// # Errors
    /// - `FetchError::NotFound` when the upstream definitively reports the
    ///   resource does not exist
    /// - `FetchError::Transient` for everything else (rate limits, network,
    ///   upstream 5xx)
    fn fetch(
        &self,
        resource_type: &str,
        request: &Request,
    ) -> impl Future<Output = std::result::Result<Self::Document, FetchError>> + Send;
}

/// Turns upstream documents into stored response bodies.
pub trait ResponseSerializer<D>: Send + Sync + 'static {
    /// # Errors
    /// Returns `Error::SerializationError` if the document cannot be encoded.
    fn serialize(&self, document: &D) -> Result<Vec<u8>>;
}

/// Serializer for any serde-serializable document.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl<D: Serialize> ResponseSerializer<D> for JsonSerializer {
    fn serialize(&self, document: &D) -> Result<Vec<u8>> {
        serde_json::to_vec(document).map_err(|e| Error::SerializationError(e.to_string()))
    }
}

/// Notified after a body is committed to the store.
pub trait CommitHook: Send + Sync {
    fn on_commit(&self, fingerprint: &str, resource_type: &str, body: &[u8]);
}

/// Commit hook that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpCommitHook;

impl CommitHook for NoOpCommitHook {
    fn on_commit(&self, _fingerprint: &str, _resource_type: &str, _body: &[u8]) {}
}

// ============================================================================
// In-Memory Test Upstream
// ============================================================================

#[derive(Clone)]
enum Scripted {
    Document(Value),
    Fail(FetchError),
}

/// Scriptable upstream keyed by request path, for tests and demos.
///
/// Unscripted paths fail with a transient error. Clones share state, so a
/// test can keep a handle and re-script the upstream while a dispatcher owns
/// another clone.
#[derive(Clone, Default)]
pub struct InMemoryUpstream {
    responses: Arc<DashMap<String, Scripted>>,
    calls: Arc<AtomicUsize>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl InMemoryUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `document` for `path`.
    pub fn insert(&self, path: impl Into<String>, document: Value) {
        self.responses.insert(path.into(), Scripted::Document(document));
    }

    /// Fail `path` with a definitive not-found.
    pub fn fail_not_found(&self, path: impl Into<String>, detail: impl Into<String>) {
        self.responses.insert(
            path.into(),
            Scripted::Fail(FetchError::NotFound {
                message: "Resource does not exist".to_string(),
                detail: detail.into(),
            }),
        );
    }

    /// Fail `path` with a transient error.
    pub fn fail_transient(&self, path: impl Into<String>, reason: impl Into<String>) {
        self.responses
            .insert(path.into(), Scripted::Fail(FetchError::Transient(reason.into())));
    }

    /// Delay every fetch by `delay` (simulates a slow upstream).
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of fetches made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Upstream for InMemoryUpstream {
    type Document = Value;

    async fn fetch(
        &self,
        resource_type: &str,
        request: &Request,
    ) -> std::result::Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!("InMemoryUpstream fetch {} {}", resource_type, request.path);

        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.responses.get(&request.path).map(|r| r.value().clone());
        match scripted {
            Some(Scripted::Document(document)) => Ok(document),
            Some(Scripted::Fail(error)) => Err(error),
            None => Err(FetchError::Transient(format!(
                "no upstream response scripted for {}",
                request.path
            ))),
        }
    }
}
