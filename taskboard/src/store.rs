//! Local task store: the board's single source of truth for rendering.
//!
//! [`TaskStore`] is a plain map of task id to task with last-write-wins
//! upserts keyed on `updated_at`. [`SharedStore`] wraps it for the async
//! parts of the client: a `parking_lot` mutex that is never held across an
//! `.await`, plus a `watch` channel carrying the store revision so views can
//! re-render on change.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use taskboard_proto::task::{Task, TaskId, Timestamp};
use tokio::sync::watch;

/// Result of [`TaskStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// The task was not present and has been added.
    Inserted,
    /// The task replaced an older (or equally old) record.
    Updated,
    /// The incoming record is older than the stored one and was dropped.
    Stale,
}

/// Returns `true` if a record stamped `incoming` may replace one stamped `current`.
///
/// A missing stamp on either side counts as "unknown age" and the incoming
/// record wins. Equal stamps also go to the incoming record.
#[must_use]
pub fn is_newer(incoming: Option<Timestamp>, current: Option<Timestamp>) -> bool {
    match (incoming, current) {
        (Some(incoming), Some(current)) => incoming >= current,
        _ => true,
    }
}

/// Keyed collection of the tasks of one board.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: HashMap<TaskId, Task>,
    revision: u64,
    /// Ids deleted by the feed since [`TaskStore::begin_load`]. `None` outside a load.
    load_tombstones: Option<HashSet<TaskId>>,
}

impl TaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if the store holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Monotonic counter bumped on every effective write.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Borrows a task.
    #[must_use]
    pub fn get(&self, task_id: &TaskId) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    /// Returns `true` if the task is present.
    #[must_use]
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.tasks.contains_key(task_id)
    }

    /// Deep copy of one task, independent of later writes.
    #[must_use]
    pub fn snapshot(&self, task_id: &TaskId) -> Option<Task> {
        self.tasks.get(task_id).cloned()
    }

    /// All tasks in board order: lane, then creation time, then id.
    #[must_use]
    pub fn tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by(|a, b| {
            a.status
                .lane_index()
                .cmp(&b.status.lane_index())
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        tasks
    }

    /// Owned copy of [`TaskStore::tasks`].
    #[must_use]
    pub fn to_vec(&self) -> Vec<Task> {
        self.tasks().into_iter().cloned().collect()
    }

    /// Discards the current contents and loads `tasks`.
    pub fn replace_all(&mut self, tasks: impl IntoIterator<Item = Task>) {
        self.tasks = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        self.bump();
    }

    /// Inserts or replaces a task unless the stored record is newer.
    pub fn upsert(&mut self, task: Task) -> Upsert {
        match self.tasks.get(&task.id) {
            Some(current) if !is_newer(task.updated_at, current.updated_at) => Upsert::Stale,
            Some(_) => {
                self.tasks.insert(task.id.clone(), task);
                self.bump();
                Upsert::Updated
            }
            None => {
                self.tasks.insert(task.id.clone(), task);
                self.bump();
                Upsert::Inserted
            }
        }
    }

    /// Writes a task unconditionally, returning the record it replaced.
    ///
    /// Used for authoritative writes: a server response or a rollback to a
    /// snapshot, both of which must land regardless of local stamps.
    pub fn put(&mut self, task: Task) -> Option<Task> {
        let previous = self.tasks.insert(task.id.clone(), task);
        self.bump();
        previous
    }

    /// Removes a task. Returns `None` if it was absent.
    pub fn remove(&mut self, task_id: &TaskId) -> Option<Task> {
        let removed = self.tasks.remove(task_id);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    /// Removes a task on behalf of the change feed.
    ///
    /// While a bulk load is pending the id is remembered, so the load cannot
    /// bring the task back.
    pub fn remove_pushed(&mut self, task_id: &TaskId) -> Option<Task> {
        if let Some(tombstones) = &mut self.load_tombstones {
            tombstones.insert(task_id.clone());
        }
        self.remove(task_id)
    }

    /// Starts remembering feed deletes until [`TaskStore::finish_load`].
    pub fn begin_load(&mut self) {
        self.load_tombstones = Some(HashSet::new());
    }

    /// Installs a bulk fetch taken while the feed was already folding.
    ///
    /// Tasks the feed deleted meanwhile stay deleted, and records it pushed
    /// meanwhile win over fetched ones by `updated_at`.
    pub fn finish_load(&mut self, fetched: impl IntoIterator<Item = Task>) {
        let tombstones = self.load_tombstones.take().unwrap_or_default();
        let pushed = std::mem::take(&mut self.tasks);
        self.tasks = fetched
            .into_iter()
            .filter(|t| !tombstones.contains(&t.id))
            .map(|t| (t.id.clone(), t))
            .collect();
        for task in pushed.into_values() {
            self.upsert(task);
        }
        self.bump();
    }

    /// Shifts a task's cached comment count by `delta`, flooring at zero.
    ///
    /// Returns the delta actually applied, or `None` if the task is absent.
    pub fn adjust_comment_count(&mut self, task_id: &TaskId, delta: i64) -> Option<i64> {
        let task = self.tasks.get_mut(task_id)?;
        let before = i64::from(task.comment_count);
        let after = (before + delta).clamp(0, i64::from(u32::MAX));
        task.comment_count = u32::try_from(after).unwrap_or(u32::MAX);
        if after != before {
            self.bump();
        }
        Some(after - before)
    }

    const fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

/// Cloneable handle to a [`TaskStore`] shared between the board's tasks.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<TaskStore>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStore {
    /// Creates an empty shared store.
    #[must_use]
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(TaskStore::new())),
            revision: Arc::new(revision),
        }
    }

    /// Runs `f` with shared access to the store.
    pub fn read<R>(&self, f: impl FnOnce(&TaskStore) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Runs `f` with exclusive access and publishes the new revision if it changed.
    pub fn write<R>(&self, f: impl FnOnce(&mut TaskStore) -> R) -> R {
        let mut store = self.inner.lock();
        let before = store.revision();
        let out = f(&mut store);
        let after = store.revision();
        drop(store);
        if after != before {
            self.revision.send_replace(after);
        }
        out
    }

    /// Deep copy of one task.
    #[must_use]
    pub fn snapshot(&self, task_id: &TaskId) -> Option<Task> {
        self.read(|s| s.snapshot(task_id))
    }

    /// Owned copy of every task in board order.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.read(TaskStore::to_vec)
    }

    /// Receiver that wakes on every effective write.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
