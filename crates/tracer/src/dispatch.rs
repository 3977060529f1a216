//! Background dispatch queue
//!
//! A bounded FIFO of jobs drained by exactly one consumer thread. Scoring
//! calls go through here so their latency and failures stay off the
//! caller's request path.
//!
//! - `submit` never blocks; it returns `false` when the queue is full
//! - the consumer is spawned lazily, and again after it was killed
//! - a failing or panicking job is logged and the next job runs
//! - `pause`/`resume` hold execution while still accepting jobs

use ecotrace_core::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Default number of jobs the queue holds before rejecting submissions.
pub const DEFAULT_CAPACITY: usize = 100;

/// A unit of work for the consumer thread.
pub type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Point-in-time counters for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub queued: usize,
    pub in_flight: bool,
    pub processed: u64,
    pub failed: u64,
    pub paused: bool,
    pub running: bool,
}

pub struct DispatchQueue {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    capacity: usize,
    state: Mutex<QueueState>,
    /// Signalled when a job arrives, on resume, and on kill.
    work_ready: Condvar,
    /// Signalled after every job and when the consumer exits.
    progress: Condvar,
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    in_flight: bool,
    paused: bool,
    stop: bool,
    worker_alive: bool,
    processed: u64,
    failed: u64,
}

impl QueueState {
    fn outstanding(&self) -> usize {
        self.jobs.len() + usize::from(self.in_flight)
    }
}

impl DispatchQueue {
    /// Create a queue holding at most `capacity` jobs.
    pub fn new(capacity: usize) -> Self {
        Self::named("dispatch", capacity)
    }

    /// Create a queue whose consumer thread is called `ecotrace-{name}`.
    pub fn named(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                capacity: capacity.max(1),
                state: Mutex::new(QueueState::default()),
                work_ready: Condvar::new(),
                progress: Condvar::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Enqueue a job. Returns `false` if the queue is full or the consumer
    /// thread could not be started; the job is dropped in both cases.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.jobs.len() >= self.shared.capacity {
            debug!(
                queue = %self.shared.name,
                capacity = self.shared.capacity,
                "Dispatch queue full, dropping job"
            );
            return false;
        }
        if !self.ensure_worker(&mut state) {
            return false;
        }
        state.jobs.push_back(Box::new(job));
        self.shared.work_ready.notify_one();
        true
    }

    /// Make sure exactly one consumer is alive and not asked to stop.
    fn ensure_worker(&self, state: &mut QueueState) -> bool {
        state.stop = false;
        if state.worker_alive {
            return true;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("ecotrace-{}", self.shared.name))
            .spawn(move || run_worker(shared));

        match spawned {
            Ok(_) => {
                state.worker_alive = true;
                debug!(queue = %self.shared.name, "Dispatch worker started");
                true
            }
            Err(e) => {
                error!(queue = %self.shared.name, error = %e, "Failed to start dispatch worker");
                false
            }
        }
    }

    /// Block until every queued job and the in-flight one have finished, or
    /// `timeout` elapses. Returns the number of jobs still outstanding.
    ///
    /// Must not be called from inside a job.
    pub fn flush(&self, timeout: Duration) -> usize {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.shared.state.lock();
        while state.outstanding() > 0 {
            match deadline {
                Some(deadline) => {
                    if self.shared.progress.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.shared.progress.wait(&mut state),
            }
        }

        let outstanding = state.outstanding();
        if outstanding > 0 {
            warn!(
                queue = %self.shared.name,
                pending = outstanding,
                "Flush timed out with job(s) still pending"
            );
        }
        outstanding
    }

    /// Stop executing jobs (submissions are still accepted).
    pub fn pause(&self) {
        self.shared.state.lock().paused = true;
    }

    pub fn resume(&self) {
        self.shared.state.lock().paused = false;
        self.shared.work_ready.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// Ask the consumer to exit after its current job. Queued jobs stay
    /// queued; the next `submit` starts a fresh consumer. Idempotent.
    pub fn kill(&self) {
        let mut state = self.shared.state.lock();
        if state.worker_alive && !state.stop {
            debug!(queue = %self.shared.name, "Stopping dispatch worker");
        }
        state.stop = true;
        self.shared.work_ready.notify_all();
    }

    /// Jobs waiting to run (excluding the in-flight one).
    pub fn len(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a consumer thread is alive and not asked to stop.
    pub fn is_running(&self) -> bool {
        let state = self.shared.state.lock();
        state.worker_alive && !state.stop
    }

    pub fn stats(&self) -> DispatchStats {
        let state = self.shared.state.lock();
        DispatchStats {
            queued: state.jobs.len(),
            in_flight: state.in_flight,
            processed: state.processed,
            failed: state.failed,
            paused: state.paused,
            running: state.worker_alive && !state.stop,
        }
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.kill();
    }
}

fn run_worker(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if state.stop {
                    state.worker_alive = false;
                    shared.progress.notify_all();
                    debug!(queue = %shared.name, "Dispatch worker exited");
                    return;
                }
                if !state.paused {
                    if let Some(job) = state.jobs.pop_front() {
                        state.in_flight = true;
                        break job;
                    }
                }
                shared.work_ready.wait(&mut state);
            }
        };

        let failed = match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                error!(queue = %shared.name, error = %e, "Dispatch job failed");
                true
            }
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                error!(queue = %shared.name, reason = %reason, "Dispatch job panicked");
                true
            }
        };

        let mut state = shared.state.lock();
        state.in_flight = false;
        state.processed += 1;
        if failed {
            state.failed += 1;
        }
        shared.progress.notify_all();
    }
}
