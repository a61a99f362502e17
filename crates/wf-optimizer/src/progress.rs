//! Run state shared with observers: running/cancelling flags, the
//! evaluation counter and the append-only progress log.
//!
//! The engine is the only writer. Observers on other threads read through a
//! cloned [`Arc<RunMonitor>`](RunMonitor); flags and counters are atomics and
//! the log is copied out under a short read lock.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag, shared between the caller and a run.
///
/// Cancelling is idempotent and one-way: a token never becomes un-cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// `(iteration, best quality so far)` pairs, index aligned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressLog {
    pub iterations: Vec<usize>,
    pub qualities: Vec<f64>,
}

impl ProgressLog {
    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    pub fn last(&self) -> Option<(usize, f64)> {
        Some((*self.iterations.last()?, *self.qualities.last()?))
    }
}

/// Observable state of the current (or last) run.
#[derive(Debug, Default)]
pub struct RunMonitor {
    running: AtomicBool,
    evaluations: AtomicU64,
    token: Mutex<Option<CancellationToken>>,
    log: RwLock<ProgressLog>,
}

impl RunMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True while a run is active and its cancellation has been requested.
    pub fn is_cancelling(&self) -> bool {
        self.is_running()
            && self
                .token
                .lock()
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
    }

    /// Request cooperative cancellation of the active run. No-op when idle.
    pub fn cancel(&self) {
        if let Some(token) = self.token.lock().as_ref() {
            token.cancel();
        }
    }

    /// Pipeline evaluations charged to the current (or last) run.
    pub fn evaluation_count(&self) -> u64 {
        self.evaluations.load(Ordering::Acquire)
    }

    /// Snapshot of the progress log.
    pub fn progress(&self) -> ProgressLog {
        self.log.read().clone()
    }

    /// Number of logged iterations, without copying the log.
    pub fn iteration_count(&self) -> usize {
        self.log.read().len()
    }

    /// Idle → Running. Returns false if a run is already active.
    pub(crate) fn begin(&self, token: &CancellationToken) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.token.lock() = Some(token.clone());
        self.evaluations.store(0, Ordering::Release);
        *self.log.write() = ProgressLog::default();
        true
    }

    /// Running/Cancelling → Idle. The log and counter stay readable.
    pub(crate) fn finish(&self) {
        self.token.lock().take();
        self.running.store(false, Ordering::Release);
    }

    pub(crate) fn record_evaluation(&self) -> u64 {
        self.evaluations.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn record_iteration(&self, iteration: usize, quality: f64) {
        let mut log = self.log.write();
        log.iterations.push(iteration);
        log.qualities.push(quality);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn token_is_shared_and_one_way() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn monitor_lifecycle() {
        let monitor = RunMonitor::new();
        let token = CancellationToken::new();
        assert!(!monitor.is_running());

        assert!(monitor.begin(&token));
        assert!(monitor.is_running());
        assert!(!monitor.begin(&token), "begin must not be reentrant");

        monitor.record_evaluation();
        monitor.record_iteration(1, 0.25);
        monitor.record_iteration(2, 0.5);
        assert_eq!(monitor.evaluation_count(), 1);
        assert_eq!(monitor.progress().last(), Some((2, 0.5)));

        monitor.cancel();
        assert!(monitor.is_cancelling());
        assert!(token.is_cancelled());

        monitor.finish();
        assert!(!monitor.is_running());
        assert!(!monitor.is_cancelling());
        // results stay inspectable after the run
        assert_eq!(monitor.iteration_count(), 2);
    }

    #[test]
    fn cancel_when_idle_is_a_no_op() {
        let monitor = RunMonitor::new();
        monitor.cancel();
        let token = CancellationToken::new();
        assert!(monitor.begin(&token));
        assert!(!monitor.is_cancelling());
        monitor.finish();
    }

    #[test]
    fn begin_resets_previous_run() {
        let monitor = RunMonitor::new();
        let token = CancellationToken::new();
        monitor.begin(&token);
        monitor.record_iteration(1, 1.0);
        monitor.record_evaluation();
        monitor.finish();

        monitor.begin(&CancellationToken::new());
        assert!(monitor.progress().is_empty());
        assert_eq!(monitor.evaluation_count(), 0);
        monitor.finish();
    }

    #[test]
    fn observers_read_from_other_threads() {
        let monitor = RunMonitor::new();
        let token = CancellationToken::new();
        monitor.begin(&token);

        let observer = Arc::clone(&monitor);
        let reader = thread::spawn(move || {
            while observer.iteration_count() < 50 {
                thread::yield_now();
            }
            observer.cancel();
        });

        let mut i = 0;
        while !token.is_cancelled() {
            i += 1;
            monitor.record_iteration(i, i as f64);
            thread::yield_now();
        }
        reader.join().unwrap();

        let log = monitor.progress();
        assert!(log.len() >= 50);
        assert_eq!(log.iterations.len(), log.qualities.len());
        monitor.finish();
    }
}
