//! Traces: caller-controlled scopes that aggregate impact.
//!
//! A trace owns the pending results submitted while it was the innermost
//! open trace, plus the child traces opened inside it. Aggregation walks
//! the subtree top-down at query time; nothing is flattened eagerly.

use chrono::{DateTime, Utc};
use ecotrace_core::{AggregateImpact, Error, ImpactResult, Result};
use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context;
use crate::pending::{PendingResult, elapsed_ms};

/// Options for opening a trace.
#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    pub name: Option<String>,
    /// Session to attribute records to. Inherited from the root trace when unset.
    pub session_id: Option<String>,
    pub client_id: Option<String>,
    pub project_id: Option<String>,
    pub application_id: Option<String>,
    /// Stay attached to the parent after closing, so its rows remain
    /// inspectable from the parent.
    pub keep_traces: bool,
}

impl TraceOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_application(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    pub fn keep_traces(mut self, keep: bool) -> Self {
        self.keep_traces = keep;
        self
    }
}

/// A node in the trace tree. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Trace {
    node: Arc<TraceNode>,
}

pub(crate) struct TraceNode {
    id: String,
    options: TraceOptions,
    started_at: DateTime<Utc>,
    /// Set at open, cleared at close. Only used to unlink.
    parent: Mutex<Option<Weak<TraceNode>>>,
    children: Mutex<Vec<Trace>>,
    pending: Mutex<Vec<PendingResult>>,
    rows: Mutex<Vec<ImpactResult>>,
}

impl TraceNode {
    pub(crate) fn push_row(&self, row: ImpactResult) {
        self.rows.lock().push(row);
    }
}

impl Trace {
    /// Create a trace and attach it under `parent`.
    pub(crate) fn open(options: TraceOptions, parent: Option<&Trace>) -> Self {
        let trace = Self {
            node: Arc::new(TraceNode {
                id: Uuid::new_v4().to_string(),
                options,
                started_at: Utc::now(),
                parent: Mutex::new(parent.map(|p| Arc::downgrade(&p.node))),
                children: Mutex::new(Vec::new()),
                pending: Mutex::new(Vec::new()),
                rows: Mutex::new(Vec::new()),
            }),
        };
        if let Some(parent) = parent {
            parent.node.children.lock().push(trace.clone());
        }
        debug!(
            trace_id = %trace.id(),
            parent_id = parent.map(|p| p.id()).unwrap_or("-"),
            "Trace opened"
        );
        trace
    }

    /// Detach from the parent unless the trace keeps its history.
    pub(crate) fn close(&self) {
        let parent = self.node.parent.lock().take().and_then(|w| w.upgrade());
        if let Some(parent) = parent {
            if !self.node.options.keep_traces {
                parent.children.lock().retain(|c| c.id() != self.id());
            }
        }
        debug!(trace_id = %self.id(), "Trace closed");
    }

    pub(crate) fn downgrade(&self) -> Weak<TraceNode> {
        Arc::downgrade(&self.node)
    }

    /// Attach a pending result directly to this trace.
    pub(crate) fn register(&self, handle: &PendingResult) {
        handle.link_trace(self);
        self.node.pending.lock().push(handle.clone());
    }

    pub(crate) fn unregister(&self, handle: &PendingResult) {
        handle.unlink_trace();
        self.node.pending.lock().retain(|h| !h.same_as(handle));
    }

    pub fn id(&self) -> &str {
        &self.node.id
    }

    pub fn name(&self) -> Option<&str> {
        self.node.options.name.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.node.options.session_id.as_deref()
    }

    pub fn client_id(&self) -> Option<&str> {
        self.node.options.client_id.as_deref()
    }

    pub fn project_id(&self) -> Option<&str> {
        self.node.options.project_id.as_deref()
    }

    pub fn application_id(&self) -> Option<&str> {
        self.node.options.application_id.as_deref()
    }

    pub fn keeps_history(&self) -> bool {
        self.node.options.keep_traces
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.node.started_at
    }

    pub fn children(&self) -> Vec<Trace> {
        self.node.children.lock().clone()
    }

    /// Results that have landed directly on this trace so far.
    pub fn rows(&self) -> Vec<ImpactResult> {
        self.node.rows.lock().clone()
    }

    /// Every pending result registered in this trace's subtree.
    pub fn pending_results(&self) -> Vec<PendingResult> {
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(trace) = stack.pop() {
            out.extend(trace.node.pending.lock().iter().cloned());
            stack.extend(trace.children());
        }
        out
    }

    /// Aggregate over results already landed in the subtree, without waiting.
    pub fn resolved_impact(&self) -> AggregateImpact {
        let rows = self
            .pending_results()
            .iter()
            .filter_map(PendingResult::result)
            .collect();
        AggregateImpact::from_rows(rows)
    }

    /// Wait for every result in the subtree, then sum them.
    ///
    /// `timeout` is one deadline shared by the whole subtree; `None` waits
    /// indefinitely. Blocks the calling thread.
    pub fn impact(&self, timeout: Option<Duration>) -> Result<AggregateImpact> {
        let start = Instant::now();
        let deadline = timeout.and_then(|t| start.checked_add(t));
        let handles = self.pending_results();

        let mut rows = Vec::with_capacity(handles.len());
        for (i, handle) in handles.iter().enumerate() {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            match handle.wait_result(remaining) {
                Ok(row) => rows.push(row),
                Err(Error::Timeout { .. }) => {
                    let pending = handles[i..].iter().filter(|h| !h.is_resolved()).count();
                    warn!(trace_id = %self.id(), pending, "Trace impact timed out");
                    return Err(Error::Timeout {
                        waited_ms: elapsed_ms(start),
                        pending,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(AggregateImpact::from_rows(rows))
    }

    /// Cooperative variant of [`impact`](Self::impact): waits on every
    /// result concurrently without blocking the executor.
    pub async fn impact_async(&self, timeout: Option<Duration>) -> Result<AggregateImpact> {
        let start = Instant::now();
        let handles = self.pending_results();
        let outcomes = join_all(handles.iter().map(|h| h.wait_result_async(timeout))).await;

        let mut rows = Vec::with_capacity(outcomes.len());
        let mut pending = 0;
        for outcome in outcomes {
            match outcome {
                Ok(row) => rows.push(row),
                Err(Error::Timeout { .. }) => pending += 1,
                Err(e) => return Err(e),
            }
        }
        if pending > 0 {
            warn!(trace_id = %self.id(), pending, "Trace impact timed out");
            return Err(Error::Timeout {
                waited_ms: elapsed_ms(start),
                pending,
            });
        }
        Ok(AggregateImpact::from_rows(rows))
    }
}

impl PartialEq for Trace {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl Eq for Trace {}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trace")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("session_id", &self.session_id())
            .field("children", &self.node.children.lock().len())
            .field("pending", &self.node.pending.lock().len())
            .finish()
    }
}

/// An open trace. Closing happens on drop, on every exit path: the trace
/// is popped from the current context and detached from its parent.
#[must_use = "the trace closes as soon as the guard is dropped"]
pub struct TraceGuard {
    trace: Trace,
}

impl TraceGuard {
    pub(crate) fn new(trace: Trace) -> Self {
        Self { trace }
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }
}

impl Deref for TraceGuard {
    type Target = Trace;

    fn deref(&self) -> &Trace {
        &self.trace
    }
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        if !context::pop(&self.trace) {
            warn!(
                trace_id = %self.trace.id(),
                "Trace closed outside the context it was opened in"
            );
        }
        self.trace.close();
    }
}
