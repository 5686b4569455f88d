//! Background refresh workers.
//!
//! A worker pops jobs off the [`RefreshQueue`], re-fetches the resource and
//! overwrites the stored entry. Failures are logged and swallowed: the stored
//! entry stays authoritative until a refresh succeeds. The dedup marker is
//! cleared after every job, success or failure, so a later stale hit can
//! enqueue again.

use crate::backend::CacheBackend;
use crate::observability::CacheMetrics;
use crate::queue::{RefreshJob, RefreshQueue};
use crate::refresh::Refresher;
use crate::upstream::{ResponseSerializer, Upstream};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Consumer of the refresh queue.
pub struct RefreshWorker<B, U, S>
where
    B: CacheBackend,
    U: Upstream,
    S: ResponseSerializer<U::Document>,
{
    id: usize,
    refresher: Refresher<B, U, S>,
    queue: RefreshQueue,
    metrics: Arc<dyn CacheMetrics>,
}

impl<B, U, S> RefreshWorker<B, U, S>
where
    B: CacheBackend,
    U: Upstream,
    S: ResponseSerializer<U::Document>,
{
    pub fn new(
        id: usize,
        refresher: Refresher<B, U, S>,
        queue: RefreshQueue,
        metrics: Arc<dyn CacheMetrics>,
    ) -> Self {
        RefreshWorker {
            id,
            refresher,
            queue,
            metrics,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Process one job to completion.
    ///
    /// Returns `true` if the entry was refreshed.
    pub async fn process(&self, job: RefreshJob) -> bool {
        let key = &job.fingerprint.key;
        debug!(
            "Worker {} refreshing {} ({} priority)",
            self.id, key, job.priority
        );

        let refreshed = match self.refresher.refresh(&job.fingerprint, &job.request).await {
            Ok(entry) => {
                info!(
                    "✓ Worker {} refreshed {} (expires at {})",
                    self.id, key, entry.expires_at
                );
                true
            }
            Err(e) => {
                warn!("Worker {} failed to refresh {}: {}", self.id, key, e);
                self.metrics.record_error(key, &e.to_string());
                false
            }
        };

        if let Err(e) = self.refresher.store().clear_mark(key).await {
            error!(
                "Worker {} could not clear refresh marker for {}: {}",
                self.id, key, e
            );
        }

        refreshed
    }

    /// Drain whatever is queued right now without waiting.
    ///
    /// Returns the number of jobs processed.
    pub async fn run_pending(&self) -> usize {
        let mut processed = 0;
        while let Some(job) = self.queue.try_pop() {
            self.process(job).await;
            processed += 1;
        }
        processed
    }

    /// Consume jobs until the queue is closed and drained.
    pub async fn run(self) {
        info!("Refresh worker {} started", self.id);
        while let Some(job) = self.queue.pop().await {
            self.process(job).await;
        }
        info!("Refresh worker {} stopped", self.id);
    }

    /// Run this worker on the tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Spawn `count` workers sharing one refresher and queue.
    pub fn spawn_pool(
        count: usize,
        refresher: Refresher<B, U, S>,
        queue: RefreshQueue,
        metrics: Arc<dyn CacheMetrics>,
    ) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|id| {
                RefreshWorker::new(id, refresher.clone(), queue.clone(), Arc::clone(&metrics))
                    .spawn()
            })
            .collect()
    }
}
