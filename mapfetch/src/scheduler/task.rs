//! Task type and related types.
//!
//! A task is one unit of asynchronous work tagged with the region (tile) it
//! belongs to. When it finishes, its continuation receives a [`TaskOutcome`].
//! If it is cancelled before it starts, its cancel hook runs instead.
//!
//! # Example
//!
//! ```ignore
//! use mapfetch::scheduler::{Task, TaskOutcome};
//!
//! let task = Task::new(key.clone(), "download", || async move {
//!     fetch(&url).await.map_err(|e| TaskError::new(e.to_string()))
//! })
//! .on_complete(|outcome| {
//!     if let TaskOutcome::Failed(e) = outcome {
//!         tracing::warn!(error = %e, "download failed");
//!     }
//! });
//!
//! scheduler.submit(task);
//! ```

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::coord::TileKey;

// =============================================================================
// Task identity
// =============================================================================

/// Global counter for generated task ids.
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Ids derived from a key have this bit set so they never collide with
/// generated ids.
const KEYED_ID_BIT: u64 = 1 << 63;

/// Identifier of a task. Submitting a task whose id is already registered
/// replaces the earlier registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Returns a fresh, process-unique id.
    pub fn next() -> Self {
        Self(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed) & !KEYED_ID_BIT)
    }

    /// Returns the id for work on a specific tile.
    ///
    /// Every request for the same key maps to the same id, so repeated
    /// requests for one tile coalesce into a single queued task.
    pub fn for_key(key: &TileKey) -> Self {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        Self(hasher.finish() | KEYED_ID_BIT)
    }

    /// Raw id value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{:016x}", self.0)
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Error type for task failures.
#[derive(Debug)]
pub struct TaskError {
    /// Human-readable error message.
    message: String,
    /// Optional source error.
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TaskError {
    /// Creates a new task error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error for work that panicked.
    pub fn panicked(detail: impl fmt::Display) -> Self {
        Self::new(format!("Task panicked: {}", detail))
    }

    /// Attaches a source error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &_)
    }
}

/// Result handed to a task's continuation.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The work finished without error.
    Completed,

    /// The work returned an error or panicked.
    Failed(TaskError),
}

impl TaskOutcome {
    /// Returns true if the work finished without error.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true if the work failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Simplified kind for counters and logging.
    pub fn kind(&self) -> TaskOutcomeKind {
        match self {
            Self::Completed => TaskOutcomeKind::Completed,
            Self::Failed(_) => TaskOutcomeKind::Failed,
        }
    }
}

impl From<Result<(), TaskError>> for TaskOutcome {
    fn from(result: Result<(), TaskError>) -> Self {
        match result {
            Ok(()) => Self::Completed,
            Err(e) => Self::Failed(e),
        }
    }
}

/// Outcome without error details.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcomeKind {
    Completed,
    Failed,
}

// =============================================================================
// Task
// =============================================================================

/// Future produced by a task's work.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

/// Deferred work: nothing runs until the scheduler calls it.
pub type TaskWork = Box<dyn FnOnce() -> TaskFuture + Send + 'static>;

/// Runs on the scheduler loop once the work has finished.
pub type Continuation = Box<dyn FnOnce(TaskOutcome) + Send + 'static>;

/// Runs when the task is cancelled before it starts.
pub type CancelHook = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work tagged with a region.
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) region: TileKey,
    pub(crate) label: String,
    pub(crate) work: TaskWork,
    pub(crate) continuation: Option<Continuation>,
    pub(crate) cancel_hook: Option<CancelHook>,
}

impl Task {
    /// Creates a task with a fresh id.
    ///
    /// `work` is not called until the scheduler starts the task.
    pub fn new<F, Fut>(region: TileKey, label: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self {
            id: TaskId::next(),
            region,
            label: label.into(),
            work: Box::new(move || Box::pin(work()) as TaskFuture),
            continuation: None,
            cancel_hook: None,
        }
    }

    /// Uses a specific id instead of a fresh one.
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Sets the continuation.
    pub fn on_complete<F>(mut self, continuation: F) -> Self
    where
        F: FnOnce(TaskOutcome) + Send + 'static,
    {
        self.continuation = Some(Box::new(continuation));
        self
    }

    /// Sets the cancel hook.
    pub fn on_cancel<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel_hook = Some(Box::new(hook));
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn region(&self) -> &TileKey {
        &self.region
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("region", &self.region)
            .field("label", &self.label)
            .field("has_continuation", &self.continuation.is_some())
            .field("has_cancel_hook", &self.cancel_hook.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::CanonicalTileId;

    fn key(x: u32) -> TileKey {
        TileKey::new("abc", CanonicalTileId::new(4, x, 3))
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert_ne!(a, b);
        assert_eq!(a.value() & KEYED_ID_BIT, 0);
    }

    #[test]
    fn test_keyed_ids_are_stable_per_key() {
        assert_eq!(TaskId::for_key(&key(2)), TaskId::for_key(&key(2)));
        assert_ne!(TaskId::for_key(&key(2)), TaskId::for_key(&key(1)));
        assert_ne!(TaskId::for_key(&key(2)).value() & KEYED_ID_BIT, 0);
    }

    #[test]
    fn test_outcome_from_result() {
        assert!(TaskOutcome::from(Ok(())).is_completed());
        let failed = TaskOutcome::from(Err(TaskError::new("boom")));
        assert!(failed.is_failed());
        assert_eq!(failed.kind(), TaskOutcomeKind::Failed);
    }

    #[test]
    fn test_task_error_display_and_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = TaskError::new("write failed").with_source(io);
        assert_eq!(err.to_string(), "write failed");
        assert!(std::error::Error::source(&err).is_some());
        assert!(TaskError::panicked("oops").message().contains("panicked"));
    }

    #[test]
    fn test_builder_sets_fields() {
        let id = TaskId::for_key(&key(2));
        let task = Task::new(key(2), "fetch", || async { Ok(()) })
            .with_id(id)
            .on_complete(|_| {})
            .on_cancel(|| {});

        assert_eq!(task.id(), id);
        assert_eq!(task.region(), &key(2));
        assert_eq!(task.label(), "fetch");
        let debug = format!("{:?}", task);
        assert!(debug.contains("has_cancel_hook: true"));
    }
}
