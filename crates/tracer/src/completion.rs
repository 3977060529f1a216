//! One-shot completion signal with blocking and polling waiters.
//!
//! The value is written once and then observed by any number of waiters.
//! Threads park on a condvar; async tasks poll on a fixed cadence so they
//! never block the executor.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct Completion<T> {
    slot: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T: Clone> Completion<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Store `value` and wake all waiters. Returns `false` (and drops
    /// `value`) if the completion was already set.
    pub fn complete(&self, value: T) -> bool {
        self.complete_then(value, |_| {})
    }

    /// Like [`complete`](Self::complete), running `hook` on the stored value
    /// before any waiter is woken.
    pub fn complete_then(&self, value: T, hook: impl FnOnce(&T)) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        hook(&value);
        *slot = Some(value);
        self.ready.notify_all();
        true
    }

    pub fn is_complete(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// The value, if already set.
    pub fn get(&self) -> Option<T> {
        self.slot.lock().clone()
    }

    /// Park the calling thread until the value is set or `timeout` elapses.
    /// `None` waits indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<T> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut slot = self.slot.lock();
        while slot.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut slot, deadline).timed_out() {
                        break;
                    }
                }
                None => self.ready.wait(&mut slot),
            }
        }
        slot.clone()
    }

    /// Poll every `interval` until the value is set or `timeout` elapses,
    /// yielding to the executor between checks.
    pub async fn wait_async(&self, timeout: Option<Duration>, interval: Duration) -> Option<T> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            if let Some(value) = self.get() {
                return Some(value);
            }
            let nap = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    interval.min(deadline - now)
                }
                None => interval,
            };
            tokio::time::sleep(nap).await;
        }
    }
}

impl<T: Clone> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn completes_once() {
        let done = Completion::new();
        assert!(!done.is_complete());
        assert!(done.complete(1));
        assert!(!done.complete(2));
        assert_eq!(done.get(), Some(1));
    }

    #[test]
    fn hook_runs_only_on_first_completion() {
        let done = Completion::new();
        let mut seen = Vec::new();
        done.complete_then("a", |v| seen.push(*v));
        done.complete_then("b", |v| seen.push(*v));
        assert_eq!(seen, vec!["a"]);
    }

    #[test]
    fn blocking_wait_times_out() {
        let done: Completion<u8> = Completion::new();
        let start = Instant::now();
        assert_eq!(done.wait(Some(Duration::from_millis(50))), None);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn blocking_wait_wakes_on_complete() {
        let done = Arc::new(Completion::new());
        let setter = Arc::clone(&done);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            setter.complete("ready".to_string());
        });
        assert_eq!(done.wait(None).as_deref(), Some("ready"));
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn async_wait_times_out() {
        let done: Completion<u8> = Completion::new();
        let got = done
            .wait_async(Some(Duration::from_millis(30)), Duration::from_millis(5))
            .await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn async_wait_sees_value_from_thread() {
        let done = Arc::new(Completion::new());
        let setter = Arc::clone(&done);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            setter.complete(7u32);
        });
        let got = done
            .wait_async(Some(Duration::from_secs(5)), Duration::from_millis(5))
            .await;
        assert_eq!(got, Some(7));
    }
}
