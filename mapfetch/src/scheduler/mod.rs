//! Bounded-concurrency task scheduler with region cancellation.
//!
//! Work is grouped by region (a [`TileKey`](crate::coord::TileKey)). When a
//! region scrolls out of view, [`TaskScheduler::cancel_region`] drops every
//! task of that region that has not started yet.
//!
//! Two coalescing rules keep redundant I/O down:
//!
//! - Submitting a task whose id is already queued replaces the queued task.
//! - A new task waits a few ticks (the grace window) before it may start, so
//!   a resubmission arriving right after it still replaces it.

mod daemon;
mod queue;
mod stats;
mod task;

pub use daemon::{
    SchedulerConfig, SchedulerDaemon, SchedulerEvent, TaskScheduler, DEFAULT_ACTIVE_TASK_LIMIT,
    DEFAULT_GRACE_TICKS, DEFAULT_TICK_INTERVAL,
};
pub use stats::{SchedulerMetrics, SchedulerStats};
pub use task::{
    CancelHook, Continuation, Task, TaskError, TaskFuture, TaskId, TaskOutcome, TaskOutcomeKind,
    TaskWork,
};
