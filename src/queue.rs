//! Two-lane refresh queue.
//!
//! `high` jobs are always handed out before `low` jobs (strict priority, not
//! weighted). Consumers block in [`RefreshQueue::pop`] until a job arrives or
//! the queue is closed and drained.
//!
//! The queue itself does not deduplicate; the dispatcher only pushes after
//! winning the fingerprint's dedup marker in the store.

use crate::fingerprint::{Fingerprint, Request};
use crate::policy::Priority;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// A background refresh request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshJob {
    pub fingerprint: Fingerprint,
    /// Original request shape, enough to re-fetch from upstream.
    pub request: Request,
    pub priority: Priority,
    /// Unix seconds at enqueue time.
    pub enqueued_at: i64,
}

impl RefreshJob {
    pub fn new(fingerprint: Fingerprint, request: Request, priority: Priority, now: i64) -> Self {
        RefreshJob {
            fingerprint,
            request,
            priority,
            enqueued_at: now,
        }
    }
}

#[derive(Default)]
struct Lanes {
    high: VecDeque<RefreshJob>,
    low: VecDeque<RefreshJob>,
    closed: bool,
}

impl Lanes {
    fn pop(&mut self) -> Option<RefreshJob> {
        self.high.pop_front().or_else(|| self.low.pop_front())
    }
}

#[derive(Default)]
struct Inner {
    lanes: Mutex<Lanes>,
    notify: Notify,
}

/// Shared handle to the refresh queue. Clones refer to the same queue.
#[derive(Clone, Default)]
pub struct RefreshQueue {
    inner: Arc<Inner>,
}

impl RefreshQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lanes(&self) -> MutexGuard<'_, Lanes> {
        self.inner
            .lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a job to its lane. Returns `false` if the queue is closed.
    pub fn push(&self, job: RefreshJob) -> bool {
        {
            let mut lanes = self.lanes();
            if lanes.closed {
                warn!(
                    "Refresh queue closed, dropping job for {}",
                    job.fingerprint.key
                );
                return false;
            }
            debug!(
                "Enqueue refresh {} on {} lane",
                job.fingerprint.key, job.priority
            );
            match job.priority {
                Priority::High => lanes.high.push_back(job),
                Priority::Low => lanes.low.push_back(job),
            }
        }
        self.inner.notify.notify_one();
        true
    }

    /// Take the next job without waiting.
    pub fn try_pop(&self) -> Option<RefreshJob> {
        self.lanes().pop()
    }

    /// Wait for the next job.
    ///
    /// Returns `None` once the queue is closed and both lanes are empty.
    pub async fn pop(&self) -> Option<RefreshJob> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await is not lost.
            notified.as_mut().enable();

            {
                let mut lanes = self.lanes();
                if let Some(job) = lanes.pop() {
                    return Some(job);
                }
                if lanes.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stop accepting jobs and wake every waiting consumer.
    ///
    /// Jobs already queued are still handed out.
    pub fn close(&self) {
        self.lanes().closed = true;
        self.inner.notify.notify_waiters();
        info!("Refresh queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.lanes().closed
    }

    pub fn len(&self) -> usize {
        let lanes = self.lanes();
        lanes.high.len() + lanes.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of jobs waiting in one lane.
    pub fn lane_len(&self, priority: Priority) -> usize {
        let lanes = self.lanes();
        match priority {
            Priority::High => lanes.high.len(),
            Priority::Low => lanes.low.len(),
        }
    }
}
