//! High-level cache service for web applications.
//!
//! Bundles a [`RefreshDispatcher`] and a [`ResponseAssembler`] behind `Arc` so
//! request handlers can share one service without extra locking.

use crate::assembler::{AssembledResponse, ResponseAssembler};
use crate::backend::CacheBackend;
use crate::config::CacheConfig;
use crate::dispatcher::RefreshDispatcher;
use crate::error::Result;
use crate::fingerprint::Request;
use crate::queue::RefreshQueue;
use crate::upstream::{ResponseSerializer, Upstream};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// High-level cache service for web applications.
///
/// # Example
///
/// ```ignore
/// use swr_kit::{CacheConfig, CacheService, RefreshDispatcher, RefreshQueue};
/// use swr_kit::backend::InMemoryBackend;
/// use swr_kit::upstream::JsonSerializer;
///
/// let config = CacheConfig::from_env()?;
/// let dispatcher = RefreshDispatcher::from_config(
///     InMemoryBackend::new(),
///     upstream,
///     JsonSerializer,
///     RefreshQueue::new(),
///     &config,
/// );
/// let service = CacheService::from_config(dispatcher, &config);
/// let workers = service.spawn_workers(config.queue_workers);
///
/// let response = service.serve(&Request::new("anime", "/anime/1")).await?;
///
/// service.shutdown(workers).await;
/// ```
pub struct CacheService<B, U, S>
where
    B: CacheBackend,
    U: Upstream,
    S: ResponseSerializer<U::Document>,
{
    dispatcher: Arc<RefreshDispatcher<B, U, S>>,
    assembler: Arc<ResponseAssembler>,
}

impl<B, U, S> Clone for CacheService<B, U, S>
where
    B: CacheBackend,
    U: Upstream,
    S: ResponseSerializer<U::Document>,
{
    fn clone(&self) -> Self {
        CacheService {
            dispatcher: Arc::clone(&self.dispatcher),
            assembler: Arc::clone(&self.assembler),
        }
    }
}

impl<B, U, S> CacheService<B, U, S>
where
    B: CacheBackend,
    U: Upstream,
    S: ResponseSerializer<U::Document>,
{
    /// Create a service with the default assembler.
    pub fn new(dispatcher: RefreshDispatcher<B, U, S>) -> Self {
        Self::with_assembler(dispatcher, ResponseAssembler::new())
    }

    pub fn with_assembler(
        dispatcher: RefreshDispatcher<B, U, S>,
        assembler: ResponseAssembler,
    ) -> Self {
        CacheService {
            dispatcher: Arc::new(dispatcher),
            assembler: Arc::new(assembler),
        }
    }

    /// Create a service whose assembler carries the configured deprecation
    /// banner.
    pub fn from_config(dispatcher: RefreshDispatcher<B, U, S>, config: &CacheConfig) -> Self {
        let assembler = ResponseAssembler::new().with_deprecation(config.deprecation_notice());
        Self::with_assembler(dispatcher, assembler)
    }

    /// Dispatch a request and assemble the client response.
    ///
    /// # Errors
    ///
    /// Returns `Err` in these cases:
    /// - `Error::Upstream` / `Error::Timeout`: cold miss or bypass whose fetch failed
    /// - `Error::BackendError`: cache backend unavailable
    /// - `Error::SerializationError`: fetched document could not be serialized
    /// - `Error::FixupError`: stored body could not be assembled
    pub async fn serve(&self, request: &Request) -> Result<AssembledResponse> {
        let dispatched = self.dispatcher.dispatch(request).await?;
        debug!("» {} served as {}", request.path, dispatched.decision());
        self.assembler.assemble(&dispatched)
    }

    /// Spawn the background refresh workers.
    pub fn spawn_workers(&self, count: usize) -> Vec<JoinHandle<()>> {
        self.dispatcher.spawn_workers(count)
    }

    /// Close the refresh queue and wait for the workers to finish what is
    /// already queued.
    pub async fn shutdown(&self, workers: Vec<JoinHandle<()>>) {
        self.dispatcher.queue().close();
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!("Refresh worker terminated abnormally: {}", e);
            }
        }
        info!("Cache service stopped");
    }

    /// # Errors
    /// Returns `Err` if the backend is unreachable.
    pub async fn health_check(&self) -> Result<bool> {
        self.dispatcher.store().backend().health_check().await
    }

    pub fn dispatcher(&self) -> &RefreshDispatcher<B, U, S> {
        &self.dispatcher
    }

    pub fn queue(&self) -> &RefreshQueue {
        self.dispatcher.queue()
    }
}
