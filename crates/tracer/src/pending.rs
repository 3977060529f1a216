//! Pending result handles: one per submitted usage record.

use ecotrace_core::{Error, ImpactResult, Result, UsageRecord};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::error;

use crate::completion::Completion;
use crate::trace::{Trace, TraceNode};

/// Polling cadence for async waits when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The eventual impact of one submitted usage record.
///
/// Cheap to clone; all clones observe the same result. Resolved exactly
/// once, by the dispatch job (or inline in sync mode). When linked to a
/// trace, the result is also appended to that trace's rows.
#[derive(Clone)]
pub struct PendingResult {
    inner: Arc<PendingInner>,
}

struct PendingInner {
    record: UsageRecord,
    completion: Completion<ImpactResult>,
    trace: Mutex<Option<Weak<TraceNode>>>,
    poll_interval: Duration,
}

impl PendingResult {
    pub fn new(record: UsageRecord, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(PendingInner {
                record,
                completion: Completion::new(),
                trace: Mutex::new(None),
                poll_interval,
            }),
        }
    }

    /// The stamped record this handle was created for.
    pub fn record(&self) -> &UsageRecord {
        &self.inner.record
    }

    pub fn request_id(&self) -> Option<&str> {
        self.inner.record.request_id.as_deref()
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.completion.is_complete()
    }

    /// The result, if it has landed.
    pub fn result(&self) -> Option<ImpactResult> {
        self.inner.completion.get()
    }

    /// Resolve the handle. Returns `false` if it was already resolved, in
    /// which case the first result stands.
    pub fn set_result(&self, result: ImpactResult) -> bool {
        let trace = self.inner.trace.lock().as_ref().and_then(Weak::upgrade);
        let accepted = self.inner.completion.complete_then(result, |row| {
            if let Some(node) = &trace {
                node.push_row(row.clone());
            }
        });
        if !accepted {
            error!(
                request_id = self.request_id().unwrap_or("-"),
                "Pending result resolved twice; keeping the first result"
            );
        }
        accepted
    }

    /// Block the calling thread until the result lands.
    ///
    /// `None` waits indefinitely. On timeout the underlying job keeps
    /// running and may still resolve the handle later.
    pub fn wait_result(&self, timeout: Option<Duration>) -> Result<ImpactResult> {
        let start = Instant::now();
        self.inner
            .completion
            .wait(timeout)
            .ok_or_else(|| timed_out(start))
    }

    /// Wait for the result without blocking the async executor.
    pub async fn wait_result_async(&self, timeout: Option<Duration>) -> Result<ImpactResult> {
        let start = Instant::now();
        self.inner
            .completion
            .wait_async(timeout, self.inner.poll_interval)
            .await
            .ok_or_else(|| timed_out(start))
    }

    pub(crate) fn link_trace(&self, trace: &Trace) {
        *self.inner.trace.lock() = Some(trace.downgrade());
    }

    pub(crate) fn unlink_trace(&self) {
        self.inner.trace.lock().take();
    }

    pub(crate) fn same_as(&self, other: &PendingResult) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Milliseconds since `start`, saturating at `u64::MAX`.
pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn timed_out(start: Instant) -> Error {
    Error::Timeout {
        waited_ms: elapsed_ms(start),
        pending: 1,
    }
}

impl fmt::Debug for PendingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResult")
            .field("request_id", &self.request_id())
            .field("model_id", &self.inner.record.model_id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
