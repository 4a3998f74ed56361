//! Lock-free scheduler counters.
//!
//! ```text
//! TaskScheduler / SchedulerDaemon ──► SchedulerMetrics ──► SchedulerStats
//!                                     (atomic counters)    (point-in-time copy)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the scheduler handle and its loop.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    submitted: AtomicU64,
    replaced: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_submitted(&self, replaced: bool) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        if replaced {
            self.replaced.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn task_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tasks_cancelled(&self, count: usize) {
        self.cancelled.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`SchedulerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tasks handed to `submit`, including replacements.
    pub submitted: u64,
    /// Submissions that replaced a queued task with the same id.
    pub replaced: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    /// Queued tasks dropped by region cancellation.
    pub cancelled: u64,
}

impl SchedulerStats {
    /// Tasks whose continuation has run.
    pub fn finished(&self) -> u64 {
        self.completed + self.failed
    }
}

impl fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "submitted {} (replaced {}), started {}, completed {}, failed {}, cancelled {}",
            self.submitted, self.replaced, self.started, self.completed, self.failed, self.cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = SchedulerMetrics::new();
        metrics.task_submitted(false);
        metrics.task_submitted(true);
        metrics.task_started();
        metrics.task_completed();
        metrics.task_failed();
        metrics.tasks_cancelled(3);

        let stats = metrics.snapshot();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.replaced, 1);
        assert_eq!(stats.started, 1);
        assert_eq!(stats.finished(), 2);
        assert_eq!(stats.cancelled, 3);
    }
}
