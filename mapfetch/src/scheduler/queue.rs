//! Task registry: FIFO ready queue plus per-region index.
//!
//! Every queued task lives in `tasks`. The ready queue only holds
//! `(id, sequence)` slots; a slot whose sequence no longer matches the
//! registered task (replaced or cancelled) is stale and discarded lazily
//! when it reaches the head.
//!
//! The registry is not synchronized itself; the scheduler wraps it in one
//! mutex so that registration, cancellation and start are atomic with
//! respect to each other.

use std::collections::{HashMap, HashSet, VecDeque};

use super::task::{Task, TaskId};
use crate::coord::TileKey;

struct Registered {
    task: Task,
    sequence: u64,
    enqueued_tick: u64,
}

struct QueueSlot {
    id: TaskId,
    sequence: u64,
}

/// What the head of the ready queue allows this pass.
pub(crate) enum Ready {
    /// Nothing queued.
    Empty,
    /// The head is still inside its grace window.
    Waiting,
    /// The head was removed from the registry and may start.
    Start(Task),
}

#[derive(Default)]
pub(crate) struct Registry {
    tasks: HashMap<TaskId, Registered>,
    queue: VecDeque<QueueSlot>,
    by_region: HashMap<TileKey, HashSet<TaskId>>,
    next_sequence: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task at `tick`.
    ///
    /// Returns the task it replaced, if one with the same id was queued. The
    /// replaced task's hooks are not run.
    pub fn submit(&mut self, task: Task, tick: u64) -> Option<Task> {
        let replaced = self.tasks.remove(&task.id).map(|old| {
            self.unindex(&old.task.region, old.task.id);
            old.task
        });

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.by_region
            .entry(task.region.clone())
            .or_default()
            .insert(task.id);
        self.queue.push_back(QueueSlot {
            id: task.id,
            sequence,
        });
        self.tasks.insert(
            task.id,
            Registered {
                task,
                sequence,
                enqueued_tick: tick,
            },
        );

        replaced
    }

    /// Removes every queued task of a region.
    pub fn cancel_region(&mut self, region: &TileKey) -> Vec<Task> {
        let Some(ids) = self.by_region.remove(region) else {
            return Vec::new();
        };
        ids.into_iter()
            .filter_map(|id| self.tasks.remove(&id))
            .map(|registered| registered.task)
            .collect()
    }

    /// Takes the head of the queue if it is outside its grace window.
    ///
    /// A head inside the window blocks the whole queue for this pass.
    pub fn take_ready(&mut self, tick: u64, grace_ticks: u64) -> Ready {
        loop {
            let Some(slot) = self.queue.front() else {
                return Ready::Empty;
            };

            let live = self
                .tasks
                .get(&slot.id)
                .filter(|registered| registered.sequence == slot.sequence);
            let Some(registered) = live else {
                self.queue.pop_front();
                continue;
            };

            if tick.saturating_sub(registered.enqueued_tick) < grace_ticks {
                return Ready::Waiting;
            }

            let id = slot.id;
            self.queue.pop_front();
            return match self.tasks.remove(&id) {
                Some(registered) => {
                    self.unindex(&registered.task.region, id);
                    Ready::Start(registered.task)
                }
                None => Ready::Empty,
            };
        }
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Number of queued tasks for a region.
    pub fn region_len(&self, region: &TileKey) -> usize {
        self.by_region.get(region).map_or(0, HashSet::len)
    }

    /// Number of regions with queued tasks.
    pub fn region_count(&self) -> usize {
        self.by_region.len()
    }

    fn unindex(&mut self, region: &TileKey, id: TaskId) {
        if let Some(ids) = self.by_region.get_mut(region) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_region.remove(region);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::CanonicalTileId;

    fn key(x: u32) -> TileKey {
        TileKey::new("abc", CanonicalTileId::new(4, x, 0))
    }

    fn task(region: TileKey, label: &str) -> Task {
        Task::new(region, label, || async { Ok(()) })
    }

    fn start(registry: &mut Registry, tick: u64) -> Option<Task> {
        match registry.take_ready(tick, 0) {
            Ready::Start(task) => Some(task),
            _ => None,
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut registry = Registry::new();
        registry.submit(task(key(0), "first"), 0);
        registry.submit(task(key(1), "second"), 0);
        registry.submit(task(key(0), "third"), 0);

        assert_eq!(start(&mut registry, 1).unwrap().label(), "first");
        assert_eq!(start(&mut registry, 1).unwrap().label(), "second");
        assert_eq!(start(&mut registry, 1).unwrap().label(), "third");
        assert!(start(&mut registry, 1).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resubmit_replaces_and_moves_to_back() {
        let mut registry = Registry::new();
        let id = TaskId::for_key(&key(0));
        registry.submit(task(key(0), "old").with_id(id), 0);
        registry.submit(task(key(1), "other"), 0);

        let replaced = registry.submit(task(key(0), "new").with_id(id), 0);
        assert_eq!(replaced.unwrap().label(), "old");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.region_len(&key(0)), 1);

        assert_eq!(start(&mut registry, 1).unwrap().label(), "other");
        assert_eq!(start(&mut registry, 1).unwrap().label(), "new");
        assert!(start(&mut registry, 1).is_none());
    }

    #[test]
    fn test_resubmit_under_new_region_cleans_old_region() {
        let mut registry = Registry::new();
        let id = TaskId::next();
        registry.submit(task(key(0), "a").with_id(id), 0);
        registry.submit(task(key(1), "b").with_id(id), 0);

        assert_eq!(registry.region_len(&key(0)), 0);
        assert_eq!(registry.region_len(&key(1)), 1);
        assert_eq!(registry.region_count(), 1);
    }

    #[test]
    fn test_cancel_region_removes_only_that_region() {
        let mut registry = Registry::new();
        registry.submit(task(key(0), "a"), 0);
        registry.submit(task(key(1), "b"), 0);
        registry.submit(task(key(0), "c"), 0);

        let cancelled = registry.cancel_region(&key(0));
        assert_eq!(cancelled.len(), 2);
        assert_eq!(registry.region_count(), 1);
        assert!(registry.cancel_region(&key(0)).is_empty());

        assert_eq!(start(&mut registry, 1).unwrap().label(), "b");
        assert!(start(&mut registry, 1).is_none());
    }

    #[test]
    fn test_started_task_leaves_region_index() {
        let mut registry = Registry::new();
        registry.submit(task(key(0), "a"), 0);
        let started = start(&mut registry, 1).unwrap();

        assert_eq!(registry.region_count(), 0);
        assert!(!registry.contains(started.id()));
        assert!(registry.cancel_region(&key(0)).is_empty());
    }

    #[test]
    fn test_grace_window_blocks_whole_queue() {
        let mut registry = Registry::new();
        registry.submit(task(key(0), "young"), 10);
        registry.submit(task(key(1), "old"), 0);

        assert!(matches!(registry.take_ready(12, 5), Ready::Waiting));
        assert!(matches!(registry.take_ready(14, 5), Ready::Waiting));
        match registry.take_ready(15, 5) {
            Ready::Start(task) => assert_eq!(task.label(), "young"),
            _ => panic!("head should be startable"),
        }
    }
}
