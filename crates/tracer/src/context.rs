//! Per-execution-context stack of open traces.
//!
//! Lookup order:
//! - inside [`scope`] / [`isolated`], the task-local stack set up there
//! - inside any other tokio task, a stack keyed by that task's id, so
//!   unrelated tasks sharing a worker thread never see each other's traces
//!   and a task keeps its stack when it migrates between threads
//! - otherwise, a thread-local stack
//!
//! Spawned tasks start with an empty stack; wrap them in [`scope`] to
//! inherit the traces open at spawn.

use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::LazyLock;
use tokio::task;

use crate::trace::Trace;

tokio::task_local! {
    static TASK_TRACES: RefCell<Vec<Trace>>;
}

thread_local! {
    static THREAD_TRACES: RefCell<Vec<Trace>> = const { RefCell::new(Vec::new()) };
}

/// Stacks of unscoped tokio tasks. Entries are removed once empty.
static SPAWNED_TRACES: LazyLock<Mutex<HashMap<task::Id, Vec<Trace>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn with_stack<R>(f: impl FnOnce(&mut Vec<Trace>) -> R) -> R {
    if TASK_TRACES.try_with(|_| ()).is_ok() {
        return TASK_TRACES.with(|stack| f(&mut stack.borrow_mut()));
    }
    if let Some(id) = task::try_id() {
        let mut stacks = SPAWNED_TRACES.lock();
        let stack = stacks.entry(id).or_default();
        let out = f(stack);
        let empty = stack.is_empty();
        if empty {
            stacks.remove(&id);
        }
        return out;
    }
    THREAD_TRACES.with(|stack| f(&mut stack.borrow_mut()))
}

/// The innermost open trace in this context.
pub fn current_trace() -> Option<Trace> {
    with_stack(|stack| stack.last().cloned())
}

/// The outermost open trace in this context.
pub fn root_trace() -> Option<Trace> {
    with_stack(|stack| stack.first().cloned())
}

/// All open traces, outermost first.
pub fn open_traces() -> Vec<Trace> {
    with_stack(|stack| stack.clone())
}

pub(crate) fn push(trace: Trace) {
    with_stack(|stack| stack.push(trace));
}

/// Remove exactly `trace`, wherever it sits. Returns `false` if it is not
/// open in this context.
pub(crate) fn pop(trace: &Trace) -> bool {
    let removed = with_stack(|stack| {
        let index = stack.iter().rposition(|t| t == trace)?;
        Some(stack.remove(index))
    });
    removed.is_some()
}

/// Run `future` with its own trace stack, seeded with a copy of the
/// caller's open traces.
///
/// Wrap spawned tasks in this so traces opened inside them stay private to
/// the task while still nesting under the trace that was active at spawn.
pub fn scope<F: Future>(future: F) -> impl Future<Output = F::Output> {
    TASK_TRACES.scope(RefCell::new(open_traces()), future)
}

/// Run `future` with an empty trace stack.
pub fn isolated<F: Future>(future: F) -> impl Future<Output = F::Output> {
    TASK_TRACES.scope(RefCell::new(Vec::new()), future)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceOptions;

    #[test]
    fn push_and_pop_restore_previous() {
        let outer = Trace::open(TraceOptions::named("outer"), None);
        let inner = Trace::open(TraceOptions::named("inner"), Some(&outer));
        push(outer.clone());
        push(inner.clone());
        assert_eq!(current_trace(), Some(inner.clone()));
        assert_eq!(root_trace(), Some(outer.clone()));

        assert!(pop(&inner));
        assert_eq!(current_trace(), Some(outer.clone()));
        assert!(!pop(&inner));
        assert!(pop(&outer));
        assert!(current_trace().is_none());
    }

    #[test]
    fn threads_do_not_share_stacks() {
        let trace = Trace::open(TraceOptions::default(), None);
        push(trace.clone());
        let seen = std::thread::spawn(current_trace).join().unwrap();
        assert!(seen.is_none());
        pop(&trace);
    }

    #[tokio::test]
    async fn scope_inherits_a_copy() {
        let outer = Trace::open(TraceOptions::default(), None);
        push(outer.clone());

        let inner_id = scope(async {
            assert_eq!(current_trace(), Some(outer.clone()));
            let inner = Trace::open(TraceOptions::default(), Some(&outer));
            push(inner.clone());
            inner.id().to_string()
        })
        .await;

        // the task's push did not leak out
        let current = current_trace().unwrap();
        assert_ne!(current.id(), inner_id);
        assert_eq!(current, outer);
        pop(&outer);
    }

    #[tokio::test]
    async fn unscoped_tasks_on_one_thread_keep_separate_stacks() {
        let (a_open_tx, a_open_rx) = tokio::sync::oneshot::channel();
        let (b_done_tx, b_done_rx) = tokio::sync::oneshot::channel();

        let a = tokio::spawn(async move {
            let trace = Trace::open(TraceOptions::named("a"), None);
            push(trace.clone());
            let _ = a_open_tx.send(());
            // b opens its own trace while a is suspended here
            let _ = b_done_rx.await;
            let seen = current_trace();
            pop(&trace);
            (seen, trace)
        });
        let b = tokio::spawn(async move {
            let _ = a_open_rx.await;
            let before = current_trace();
            let trace = Trace::open(TraceOptions::named("b"), None);
            push(trace.clone());
            let seen = current_trace();
            pop(&trace);
            let _ = b_done_tx.send(());
            (before, seen, trace)
        });

        let (b_before, b_seen, b_trace) = b.await.unwrap();
        let (a_seen, a_trace) = a.await.unwrap();
        assert!(b_before.is_none());
        assert_eq!(b_seen, Some(b_trace));
        assert_eq!(a_seen, Some(a_trace));
        // the test body itself never saw either task's trace
        assert!(current_trace().is_none());
    }

    #[tokio::test]
    async fn isolated_starts_empty() {
        let outer = Trace::open(TraceOptions::default(), None);
        push(outer.clone());
        let seen = isolated(async { current_trace() }).await;
        assert!(seen.is_none());
        pop(&outer);
    }
}
