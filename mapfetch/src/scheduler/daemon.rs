//! Bounded-concurrency scheduler and its cooperative loop.
//!
//! [`TaskScheduler`] is the cloneable handle: callers submit tasks and cancel
//! regions through it. [`SchedulerDaemon`] owns the loop that starts tasks
//! and delivers their results.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        SchedulerDaemon::tick                      │
//! │                                                                   │
//! │  completions ──► running -= 1 ──► continuation(outcome)           │
//! │                                                                   │
//! │  while running < limit:                                           │
//! │      Registry::take_ready ──► Waiting ──► stop this pass          │
//! │                       │                                           │
//! │                       └──► Start(task) ──► tokio::spawn(work)     │
//! │                                            │                      │
//! │                                            └──► completion ──┐    │
//! └──────────────────────────────────────────────────────────────┼────┘
//!                                                                │
//!                      next tick ◄───────────────────────────────┘
//! ```
//!
//! Continuations always run on the loop, never on the worker that ran the
//! work, so state they touch has a single writer.
//!
//! # Example
//!
//! ```ignore
//! use mapfetch::scheduler::{SchedulerConfig, Task, TaskScheduler};
//!
//! let (scheduler, daemon) = TaskScheduler::new(SchedulerConfig::default());
//! let shutdown = CancellationToken::new();
//! tokio::spawn(daemon.run(shutdown.clone()));
//!
//! scheduler.submit(Task::new(key.clone(), "fetch", || async { Ok(()) }));
//! scheduler.cancel_region(&key);
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::queue::{Ready, Registry};
use super::stats::{SchedulerMetrics, SchedulerStats};
use super::task::{Continuation, Task, TaskError, TaskId, TaskOutcome};
use crate::coord::TileKey;

// =============================================================================
// Configuration
// =============================================================================

/// Default ceiling on concurrently running tasks.
pub const DEFAULT_ACTIVE_TASK_LIMIT: usize = 3;

/// Default number of ticks a new task waits before it may start.
pub const DEFAULT_GRACE_TICKS: u64 = 15;

/// Default interval between scheduler ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Scheduler configuration.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Maximum number of tasks running at once.
    pub active_task_limit: usize,

    /// Ticks a queued task must wait before it may start. While the head of
    /// the queue is inside this window nothing starts. `0` disables it.
    pub grace_ticks: u64,

    /// Interval between ticks when driven by [`SchedulerDaemon::run`].
    pub tick_interval: Duration,
}

impl SchedulerConfig {
    pub fn with_active_task_limit(mut self, limit: usize) -> Self {
        self.active_task_limit = limit.max(1);
        self
    }

    pub fn with_grace_ticks(mut self, ticks: u64) -> Self {
        self.grace_ticks = ticks;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            active_task_limit: DEFAULT_ACTIVE_TASK_LIMIT,
            grace_ticks: DEFAULT_GRACE_TICKS,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Notifications produced by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A queued task was started.
    TaskStarted {
        id: TaskId,
        region: TileKey,
        label: String,
    },

    /// A queued task was dropped by region cancellation.
    TaskCancelled { region: TileKey },
}

// =============================================================================
// Handle
// =============================================================================

struct Shared {
    registry: Mutex<Registry>,
    running: AtomicUsize,
    tick: AtomicU64,
    metrics: SchedulerMetrics,
    events: broadcast::Sender<SchedulerEvent>,
    config: SchedulerConfig,
}

/// Handle used to submit and cancel tasks.
#[derive(Clone)]
pub struct TaskScheduler {
    shared: Arc<Shared>,
}

impl TaskScheduler {
    /// Creates a scheduler and the daemon that drives it.
    pub fn new(config: SchedulerConfig) -> (Self, SchedulerDaemon) {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::new()),
            running: AtomicUsize::new(0),
            tick: AtomicU64::new(0),
            metrics: SchedulerMetrics::new(),
            events,
            config,
        });

        let daemon = SchedulerDaemon {
            shared: Arc::clone(&shared),
            completions_tx,
            completions_rx,
        };

        (Self { shared }, daemon)
    }

    /// Queues a task.
    ///
    /// A queued task with the same id is replaced: it is removed from the
    /// queue and from its region without running any of its hooks.
    pub fn submit(&self, task: Task) {
        let id = task.id;
        let tick = self.shared.tick.load(Ordering::Acquire);
        let replaced = self.shared.registry.lock().submit(task, tick);

        self.shared.metrics.task_submitted(replaced.is_some());
        match replaced {
            Some(old) => debug!(task = %id, region = %old.region, "Replaced queued task"),
            None => trace!(task = %id, "Task queued"),
        }
    }

    /// Drops every task of `region` that has not started yet.
    ///
    /// Cancel hooks run on the calling thread after the registry lock is
    /// released. Running tasks are not interrupted. Returns how many tasks
    /// were cancelled.
    pub fn cancel_region(&self, region: &TileKey) -> usize {
        let cancelled = self.shared.registry.lock().cancel_region(region);
        let count = cancelled.len();
        if count == 0 {
            return 0;
        }

        self.shared.metrics.tasks_cancelled(count);
        debug!(region = %region, count, "Cancelled queued tasks");

        for mut task in cancelled {
            let _ = self.shared.events.send(SchedulerEvent::TaskCancelled {
                region: task.region.clone(),
            });
            if let Some(hook) = task.cancel_hook.take() {
                hook();
            }
        }
        count
    }

    /// Number of tasks currently running.
    pub fn running_count(&self) -> usize {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Number of tasks waiting to start.
    pub fn queued_count(&self) -> usize {
        self.shared.registry.lock().len()
    }

    /// Returns true if a task with `id` is queued.
    pub fn is_queued(&self, id: TaskId) -> bool {
        self.shared.registry.lock().contains(id)
    }

    /// Snapshot of the scheduler counters.
    pub fn stats(&self) -> SchedulerStats {
        self.shared.metrics.snapshot()
    }

    /// Subscribes to [`SchedulerEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.shared.events.subscribe()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }
}

// =============================================================================
// Daemon
// =============================================================================

struct Completion {
    id: TaskId,
    continuation: Option<Continuation>,
    outcome: TaskOutcome,
}

/// The scheduler's cooperative loop.
pub struct SchedulerDaemon {
    shared: Arc<Shared>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl SchedulerDaemon {
    /// One pass: deliver finished tasks, then start queued ones while
    /// capacity allows.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn tick(&mut self) {
        let now = self.shared.tick.fetch_add(1, Ordering::AcqRel) + 1;

        while let Ok(completion) = self.completions_rx.try_recv() {
            self.finish(completion);
        }

        let limit = self.shared.config.active_task_limit;
        let grace = self.shared.config.grace_ticks;
        while self.shared.running.load(Ordering::Acquire) < limit {
            let ready = {
                let mut registry = self.shared.registry.lock();
                let ready = registry.take_ready(now, grace);
                if matches!(ready, Ready::Start(_)) {
                    self.shared.running.fetch_add(1, Ordering::AcqRel);
                }
                ready
            };

            match ready {
                Ready::Start(task) => self.launch(task),
                Ready::Waiting | Ready::Empty => break,
            }
        }
    }

    /// Ticks every `tick_interval` until `shutdown` fires.
    ///
    /// Tasks still running at shutdown are left to finish on their own;
    /// their continuations do not run.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            limit = self.shared.config.active_task_limit,
            grace_ticks = self.shared.config.grace_ticks,
            "Task scheduler starting"
        );

        let mut interval = tokio::time::interval(self.shared.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    break;
                }

                _ = interval.tick() => {
                    self.tick();
                }
            }
        }

        info!(
            queued = self.shared.registry.lock().len(),
            running = self.shared.running.load(Ordering::Acquire),
            "Task scheduler stopped"
        );
    }

    fn launch(&mut self, mut task: Task) {
        let id = task.id;
        let continuation = task.continuation.take();
        let work = (task.work)();

        self.shared.metrics.task_started();
        debug!(task = %id, region = %task.region, label = %task.label, "Task started");
        let _ = self.shared.events.send(SchedulerEvent::TaskStarted {
            id,
            region: task.region,
            label: task.label,
        });

        let handle = tokio::spawn(work);
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let outcome = match handle.await {
                Ok(result) => TaskOutcome::from(result),
                Err(e) if e.is_panic() => {
                    TaskOutcome::Failed(TaskError::panicked(panic_message(e.into_panic())))
                }
                Err(e) => TaskOutcome::Failed(TaskError::new(format!("Task aborted: {}", e))),
            };
            let _ = completions.send(Completion {
                id,
                continuation,
                outcome,
            });
        });
    }

    fn finish(&mut self, completion: Completion) {
        self.shared.running.fetch_sub(1, Ordering::AcqRel);

        let Completion {
            id,
            continuation,
            outcome,
        } = completion;

        match &outcome {
            TaskOutcome::Completed => {
                self.shared.metrics.task_completed();
                trace!(task = %id, "Task completed");
            }
            TaskOutcome::Failed(e) => {
                self.shared.metrics.task_failed();
                warn!(task = %id, error = %e, "Task failed");
            }
        }

        if let Some(continuation) = continuation {
            continuation(outcome);
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::CanonicalTileId;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    fn key(x: u32) -> TileKey {
        TileKey::new("abc", CanonicalTileId::new(4, x, 0))
    }

    fn immediate() -> SchedulerConfig {
        SchedulerConfig::default().with_grace_ticks(0)
    }

    /// Ticks until `done` holds, yielding to spawned work in between.
    async fn tick_until(daemon: &mut SchedulerDaemon, mut done: impl FnMut() -> bool) {
        for _ in 0..1000 {
            daemon.tick();
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_task_runs_and_continuation_fires_on_tick() {
        let (scheduler, mut daemon) = TaskScheduler::new(immediate());
        let done = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&done);
        scheduler.submit(
            Task::new(key(0), "work", || async { Ok(()) }).on_complete(move |outcome| {
                assert!(outcome.is_completed());
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(scheduler.queued_count(), 1);

        tick_until(&mut daemon, || done.load(Ordering::SeqCst) == 1).await;
        assert_eq!(scheduler.running_count(), 0);
        assert_eq!(scheduler.queued_count(), 0);
        assert_eq!(scheduler.stats().completed, 1);
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_is_respected() {
        let (scheduler, mut daemon) = TaskScheduler::new(immediate().with_active_task_limit(3));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        for i in 0..10u32 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let gate = Arc::clone(&gate);
            let finished = Arc::clone(&finished);
            scheduler.submit(
                Task::new(key(i % 5), format!("t{}", i), move || async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    gate.notified().await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .on_complete(move |_| {
                    finished.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        tick_until(&mut daemon, || {
            assert!(scheduler.running_count() <= 3);
            gate.notify_waiters();
            finished.load(Ordering::SeqCst) == 10
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(scheduler.stats().started, 10);
    }

    #[tokio::test]
    async fn test_cancel_region_before_start() {
        let (scheduler, mut daemon) = TaskScheduler::new(immediate());
        let mut events = scheduler.subscribe();
        let ran = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let ran = Arc::clone(&ran);
            let cancelled = Arc::clone(&cancelled);
            scheduler.submit(
                Task::new(key(1), "doomed", move || async move {
                    ran.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .on_complete(|_| panic!("continuation must not run"))
                .on_cancel(move || {
                    cancelled.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        assert_eq!(scheduler.cancel_region(&key(1)), 2);
        assert_eq!(cancelled.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.queued_count(), 0);
        assert_eq!(
            events.try_recv().unwrap(),
            SchedulerEvent::TaskCancelled { region: key(1) }
        );

        for _ in 0..5 {
            daemon.tick();
            tokio::task::yield_now().await;
        }
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(scheduler.stats().cancelled, 2);
    }

    #[tokio::test]
    async fn test_running_task_survives_cancel_and_completes_once() {
        let (scheduler, mut daemon) = TaskScheduler::new(immediate());
        let gate = Arc::new(Notify::new());
        let started = Arc::new(AtomicBool::new(false));
        let completions = Arc::new(AtomicUsize::new(0));
        let hook_ran = Arc::new(AtomicBool::new(false));

        let g = Arc::clone(&gate);
        let s = Arc::clone(&started);
        let c = Arc::clone(&completions);
        let h = Arc::clone(&hook_ran);
        scheduler.submit(
            Task::new(key(2), "long", move || async move {
                s.store(true, Ordering::SeqCst);
                g.notified().await;
                Ok(())
            })
            .on_complete(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .on_cancel(move || h.store(true, Ordering::SeqCst)),
        );

        tick_until(&mut daemon, || started.load(Ordering::SeqCst)).await;
        assert_eq!(scheduler.cancel_region(&key(2)), 0);
        assert!(!hook_ran.load(Ordering::SeqCst));

        tick_until(&mut daemon, || {
            gate.notify_waiters();
            completions.load(Ordering::SeqCst) > 0
        })
        .await;
        for _ in 0..5 {
            daemon.tick();
            tokio::task::yield_now().await;
        }
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resubmit_same_id_runs_once_without_cancel_hook() {
        let (scheduler, mut daemon) = TaskScheduler::new(immediate());
        let runs = Arc::new(AtomicUsize::new(0));
        let hook_ran = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicUsize::new(0));
        let id = TaskId::for_key(&key(3));

        for label in ["first", "second"] {
            let runs = Arc::clone(&runs);
            let hook_ran = Arc::clone(&hook_ran);
            let finished = Arc::clone(&finished);
            scheduler.submit(
                Task::new(key(3), label, move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .with_id(id)
                .on_complete(move |_| {
                    finished.fetch_add(1, Ordering::SeqCst);
                })
                .on_cancel(move || hook_ran.store(true, Ordering::SeqCst)),
            );
        }
        assert_eq!(scheduler.queued_count(), 1);
        assert_eq!(scheduler.stats().replaced, 1);

        tick_until(&mut daemon, || finished.load(Ordering::SeqCst) == 1).await;
        for _ in 0..5 {
            daemon.tick();
            tokio::task::yield_now().await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(!hook_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failure_and_panic_reach_continuation() {
        let (scheduler, mut daemon) = TaskScheduler::new(immediate());
        let messages = Arc::new(Mutex::new(Vec::new()));

        let m = Arc::clone(&messages);
        scheduler.submit(
            Task::new(key(0), "fails", || async { Err(TaskError::new("no route")) })
                .on_complete(move |outcome| {
                    if let TaskOutcome::Failed(e) = outcome {
                        m.lock().push(e.to_string());
                    }
                }),
        );
        let m = Arc::clone(&messages);
        scheduler.submit(
            Task::new(key(1), "panics", || async {
                let payload: Option<()> = None;
                payload.expect("kaboom");
                Ok(())
            })
            .on_complete(move |outcome| {
                if let TaskOutcome::Failed(e) = outcome {
                    m.lock().push(e.to_string());
                }
            }),
        );

        tick_until(&mut daemon, || messages.lock().len() == 2).await;
        let messages = messages.lock().clone();
        assert!(messages.contains(&"no route".to_string()));
        assert!(messages.iter().any(|m| m.contains("kaboom")));
        assert_eq!(scheduler.stats().failed, 2);
        assert_eq!(scheduler.running_count(), 0);
    }

    #[tokio::test]
    async fn test_grace_window_delays_start() {
        let (scheduler, mut daemon) = TaskScheduler::new(SchedulerConfig::default().with_grace_ticks(3));
        let mut events = scheduler.subscribe();
        scheduler.submit(Task::new(key(0), "late", || async { Ok(()) }));

        daemon.tick();
        daemon.tick();
        assert_eq!(scheduler.queued_count(), 1);
        assert!(events.try_recv().is_err());

        daemon.tick();
        assert_eq!(scheduler.queued_count(), 0);
        match events.try_recv().unwrap() {
            SchedulerEvent::TaskStarted { region, label, .. } => {
                assert_eq!(region, key(0));
                assert_eq!(label, "late");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let config = immediate().with_tick_interval(Duration::from_millis(1));
        let (scheduler, daemon) = TaskScheduler::new(config);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(daemon.run(shutdown.clone()));

        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler.submit(Task::new(key(0), "work", || async { Ok(()) }).on_complete(move |o| {
            let _ = tx.send(o.is_completed());
        }));

        assert!(tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap());
        shutdown.cancel();
        handle.await.unwrap();
    }
}
