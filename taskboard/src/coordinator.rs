//! Mutation coordinator: optimistic apply, remote write, reconcile or roll back.
//!
//! Every locally originated write goes through [`MutationCoordinator`]:
//!
//! 1. the permission gate is checked (denied: nothing happens);
//! 2. a task id with a mutation already in flight is rejected as busy;
//! 3. the current record is snapshotted and the change applied to the store
//!    synchronously, before the first `.await`;
//! 4. the remote write runs under a timeout;
//! 5. success installs the server's authoritative record, failure restores
//!    the snapshot and emits one [`BoardNotice::MutationFailed`].
//!
//! The pending record lives in a guard that rolls back and clears the busy
//! flag when dropped, so a caller that abandons the future (or a remote call
//! that never answers) cannot leave a task locked.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use parking_lot::Mutex;
use taskboard_proto::ProtoError;
use taskboard_proto::change::{TaskChange, TaskDraft};
use taskboard_proto::comment::CommentId;
use taskboard_proto::task::{Actor, ProjectId, Task, TaskId, TaskStatus, Timestamp};
use tokio::sync::mpsc;

use crate::comments::CommentThreads;
use crate::permission::PermissionGate;
use crate::remote::{RemoteError, TaskBackend};
use crate::store::{SharedStore, TaskStore};

/// Default bound on a single remote write.
pub const DEFAULT_MUTATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a mutation did not go through.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MutationError {
    /// The actor may not mutate this board. Nothing was applied or sent.
    #[error("permission denied")]
    PermissionDenied,

    /// Another mutation for this task is still in flight. Nothing was applied.
    #[error("task {0} is busy with another change")]
    Busy(TaskId),

    /// The task is not in the store.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The comment is not in the loaded thread.
    #[error("comment not found: {0}")]
    CommentNotFound(CommentId),

    /// The change failed validation.
    #[error("invalid change: {0}")]
    Invalid(#[from] ProtoError),

    /// A schedule ending before it starts.
    #[error("schedule ends ({end}) before it starts ({start})")]
    InvalidSchedule {
        /// Requested start day.
        start: NaiveDate,
        /// Requested end day.
        end: NaiveDate,
    },

    /// The backend refused or the connection failed. The change was rolled back.
    #[error("remote write failed: {0}")]
    Remote(#[from] RemoteError),

    /// The backend did not answer in time. The change was rolled back.
    #[error("remote write timed out")]
    TimedOut,
}

/// User-visible signals raised by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardNotice {
    /// A write failed and local state was restored.
    MutationFailed {
        /// The task whose change was rolled back.
        task_id: TaskId,
        /// Human-readable cause.
        reason: String,
    },
    /// A write was refused because another one for the same task is in flight.
    Busy {
        /// The busy task.
        task_id: TaskId,
    },
}

/// The change a pending mutation is attempting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingChange {
    /// Creating a task from a draft.
    Create(TaskDraft),
    /// Writing fields of an existing task.
    Edit(TaskChange),
    /// Deleting a task.
    Delete,
    /// Appending a comment.
    AddComment,
    /// Replacing a comment body.
    EditComment(CommentId),
    /// Deleting a comment.
    DeleteComment(CommentId),
}

/// Record held between optimistic apply and acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    /// Task being changed (a provisional id for creates).
    pub task_id: TaskId,
    /// What is being attempted.
    pub attempted: PendingChange,
    /// When the optimistic apply happened.
    pub started: Instant,
}

/// How to undo one optimistic apply.
#[derive(Debug)]
pub(crate) enum Rollback {
    /// Put `prior` back while the store still holds `optimistic`.
    Restore { prior: Task, optimistic: Task },
    /// Drop a provisional task that never reached the backend.
    Discard { provisional: Task },
    /// Re-insert a task removed optimistically, unless it reappeared.
    Reinsert { prior: Task },
    /// Reverse a comment counter shift while the task is unchanged otherwise.
    Counter {
        applied: i64,
        stamp: Option<Timestamp>,
    },
    /// The optimistic step did not touch the store.
    Nothing,
}

impl Rollback {
    /// Undoes the optimistic apply. Returns `false` if newer state superseded it.
    fn undo(self, task_id: &TaskId, store: &mut TaskStore) -> bool {
        match self {
            Self::Restore { prior, optimistic } => {
                if store.get(task_id) == Some(&optimistic) {
                    store.put(prior);
                    true
                } else {
                    false
                }
            }
            Self::Discard { provisional } => store.remove(&provisional.id).is_some(),
            Self::Reinsert { prior } => {
                if store.contains(task_id) {
                    false
                } else {
                    store.put(prior);
                    true
                }
            }
            Self::Counter { applied, stamp } => match store.get(task_id) {
                Some(task) if task.updated_at == stamp => {
                    store.adjust_comment_count(task_id, -applied);
                    true
                }
                _ => false,
            },
            Self::Nothing => true,
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<TaskId, PendingMutation>>>;

/// Owns one pending record. Dropping it unsettled rolls back.
pub(crate) struct PendingGuard {
    task_id: TaskId,
    store: SharedStore,
    pending: PendingMap,
    rollback: Option<Rollback>,
}

impl PendingGuard {
    /// Installs the server's record for an edited task.
    ///
    /// Overwrites only while the store still shows this mutation's optimistic
    /// record. Anything else there came from the feed after the write began,
    /// so the server record merges by `updated_at` instead.
    pub(crate) fn confirm(mut self, task: Task) {
        let rollback = self.rollback.take();
        self.store.write(|s| match rollback {
            Some(Rollback::Restore { optimistic, .. }) if s.get(&task.id) == Some(&optimistic) => {
                s.put(task);
            }
            _ => {
                s.upsert(task);
            }
        });
    }

    /// Completes the mutation with the authoritative result.
    pub(crate) fn settle<R>(mut self, f: impl FnOnce(&mut TaskStore) -> R) -> R {
        self.rollback = None;
        self.store.write(f)
    }

    /// Restores the pre-apply state. Returns `false` if it had been superseded.
    pub(crate) fn roll_back(mut self) -> bool {
        self.rollback
            .take()
            .is_some_and(|rollback| self.store.write(|s| rollback.undo(&self.task_id, s)))
    }

    pub(crate) const fn task_id(&self) -> &TaskId {
        &self.task_id
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(rollback) = self.rollback.take() {
            tracing::debug!(task_id = %self.task_id, "pending mutation abandoned, rolling back");
            self.store.write(|s| rollback.undo(&self.task_id, s));
        }
        self.pending.lock().remove(&self.task_id);
    }
}

/// A stamp newer than `previous` from the local clock.
fn local_stamp(previous: Option<Timestamp>) -> Timestamp {
    let now = Timestamp::now().as_millis();
    Timestamp::from_millis(previous.map_or(now, |p| now.max(p.as_millis().saturating_add(1))))
}

/// Applies locally originated changes to one board.
pub struct MutationCoordinator<B> {
    backend: Arc<B>,
    store: SharedStore,
    gate: PermissionGate,
    actor: Actor,
    pending: PendingMap,
    pub(crate) threads: Mutex<CommentThreads>,
    timeout: Duration,
    notices: mpsc::Sender<BoardNotice>,
}

impl<B> MutationCoordinator<B> {
    /// Creates a coordinator for the board the gate was loaded for.
    pub fn new(
        backend: Arc<B>,
        store: SharedStore,
        gate: PermissionGate,
        actor: Actor,
        timeout: Duration,
        notices: mpsc::Sender<BoardNotice>,
    ) -> Self {
        Self {
            backend,
            store,
            gate,
            actor,
            pending: Arc::new(Mutex::new(HashMap::new())),
            threads: Mutex::new(CommentThreads::new()),
            timeout,
            notices,
        }
    }

    /// The store this coordinator writes to.
    #[must_use]
    pub const fn store(&self) -> &SharedStore {
        &self.store
    }

    /// The backend this coordinator writes through.
    #[must_use]
    pub const fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// The board's permission gate.
    #[must_use]
    pub const fn gate(&self) -> &PermissionGate {
        &self.gate
    }

    /// Whether the acting user may mutate this board.
    #[must_use]
    pub const fn can_mutate(&self) -> bool {
        self.gate.allows_mutation()
    }

    /// The board this coordinator writes to.
    #[must_use]
    pub const fn project_id(&self) -> &ProjectId {
        self.gate.project_id()
    }

    /// The acting user.
    #[must_use]
    pub const fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Whether a mutation for `task_id` is in flight.
    #[must_use]
    pub fn is_busy(&self, task_id: &TaskId) -> bool {
        self.pending.lock().contains_key(task_id)
    }

    /// The in-flight record for `task_id`, if any.
    #[must_use]
    pub fn pending(&self, task_id: &TaskId) -> Option<PendingMutation> {
        self.pending.lock().get(task_id).cloned()
    }
}

impl<B: TaskBackend> MutationCoordinator<B> {
    /// Writes `change` to a task.
    ///
    /// An empty change is a no-op that returns the current record.
    ///
    /// # Errors
    ///
    /// See [`MutationError`]. `Remote` and `TimedOut` mean the optimistic
    /// change was rolled back.
    pub async fn mutate(&self, task_id: &TaskId, change: TaskChange) -> Result<Task, MutationError> {
        self.gate.ensure()?;
        change.validate()?;
        if change.is_empty() {
            return self
                .store
                .snapshot(task_id)
                .ok_or_else(|| MutationError::NotFound(task_id.clone()));
        }

        let guard = self.begin(task_id, PendingChange::Edit(change.clone()), |store| {
            let prior = store
                .snapshot(task_id)
                .ok_or_else(|| MutationError::NotFound(task_id.clone()))?;
            let mut optimistic = prior.clone();
            change.apply_to(&mut optimistic);
            optimistic.updated_at = Some(local_stamp(prior.updated_at));
            store.put(optimistic.clone());
            Ok(Rollback::Restore { prior, optimistic })
        })?;

        match self.remote(self.backend.update_task(task_id, &change)).await {
            Ok(task) => {
                tracing::debug!(task_id = %task_id, elapsed_ms = self.elapsed_ms(task_id), "mutation confirmed");
                guard.confirm(task.clone());
                Ok(task)
            }
            Err(e) => Err(self.fail(guard, e)),
        }
    }

    /// Moves a task to another lane.
    ///
    /// # Errors
    ///
    /// Same as [`MutationCoordinator::mutate`].
    pub async fn move_to_lane(&self, task_id: &TaskId, lane: TaskStatus) -> Result<Task, MutationError> {
        self.mutate(task_id, TaskChange::status(lane)).await
    }

    /// Sets both schedule days of a task.
    ///
    /// # Errors
    ///
    /// [`MutationError::InvalidSchedule`] if `due` is before `start`, otherwise
    /// the same as [`MutationCoordinator::mutate`].
    pub async fn reschedule(
        &self,
        task_id: &TaskId,
        start: NaiveDate,
        due: NaiveDate,
    ) -> Result<Task, MutationError> {
        self.gate.ensure()?;
        if due < start {
            return Err(MutationError::InvalidSchedule { start, end: due });
        }
        self.mutate(task_id, TaskChange::schedule(start, due)).await
    }

    /// Creates a task.
    ///
    /// A provisional record is shown immediately under a local id and swapped
    /// for the server's record on success.
    ///
    /// # Errors
    ///
    /// See [`MutationError`]. On failure the provisional record is removed.
    pub async fn create(&self, draft: TaskDraft) -> Result<Task, MutationError> {
        self.gate.ensure()?;
        draft.validate()?;
        let provisional = draft.clone().into_task(
            TaskId::generate(),
            self.project_id().clone(),
            Timestamp::now(),
        );
        let provisional_id = provisional.id.clone();

        let guard = self.begin(&provisional_id, PendingChange::Create(draft.clone()), |store| {
            store.put(provisional.clone());
            Ok(Rollback::Discard { provisional })
        })?;

        match self.remote(self.backend.create_task(self.project_id(), &draft)).await {
            Ok(task) => {
                tracing::debug!(provisional_id = %provisional_id, task_id = %task.id, "create confirmed");
                // The feed may already hold this record, or a newer one.
                guard.settle(|s| {
                    s.remove(&provisional_id);
                    s.upsert(task.clone());
                });
                Ok(task)
            }
            Err(e) => Err(self.fail(guard, e)),
        }
    }

    /// Deletes a task.
    ///
    /// # Errors
    ///
    /// See [`MutationError`]. On failure the task is re-inserted.
    pub async fn delete(&self, task_id: &TaskId) -> Result<(), MutationError> {
        self.gate.ensure()?;
        let guard = self.begin(task_id, PendingChange::Delete, |store| {
            let prior = store
                .remove(task_id)
                .ok_or_else(|| MutationError::NotFound(task_id.clone()))?;
            Ok(Rollback::Reinsert { prior })
        })?;

        match self.remote(self.backend.delete_task(task_id)).await {
            Ok(()) => {
                self.threads.lock().forget(task_id);
                guard.settle(|s| s.remove(task_id));
                Ok(())
            }
            Err(e) => Err(self.fail(guard, e)),
        }
    }

    /// Registers a pending record and runs the optimistic step.
    ///
    /// The busy check and the apply happen under the pending lock so two
    /// callers cannot both pass the check.
    pub(crate) fn begin(
        &self,
        task_id: &TaskId,
        attempted: PendingChange,
        apply: impl FnOnce(&mut TaskStore) -> Result<Rollback, MutationError>,
    ) -> Result<PendingGuard, MutationError> {
        let mut pending = self.pending.lock();
        if pending.contains_key(task_id) {
            drop(pending);
            tracing::info!(task_id = %task_id, "mutation rejected, task busy");
            self.notify(BoardNotice::Busy {
                task_id: task_id.clone(),
            });
            return Err(MutationError::Busy(task_id.clone()));
        }

        let rollback = self.store.write(apply)?;
        pending.insert(
            task_id.clone(),
            PendingMutation {
                task_id: task_id.clone(),
                attempted,
                started: Instant::now(),
            },
        );
        drop(pending);

        Ok(PendingGuard {
            task_id: task_id.clone(),
            store: self.store.clone(),
            pending: Arc::clone(&self.pending),
            rollback: Some(rollback),
        })
    }

    /// Runs a backend call under the mutation timeout.
    pub(crate) async fn remote<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, MutationError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(MutationError::Remote(e)),
            Err(_) => Err(MutationError::TimedOut),
        }
    }

    /// Rolls back, raises the failure notice, and hands the error back.
    pub(crate) fn fail(&self, guard: PendingGuard, error: MutationError) -> MutationError {
        let task_id = guard.task_id().clone();
        let attempted = self.pending(&task_id).map(|p| p.attempted);
        let elapsed_ms = self.elapsed_ms(&task_id);
        let restored = guard.roll_back();
        tracing::warn!(
            task_id = %task_id,
            error = %error,
            ?attempted,
            elapsed_ms,
            restored,
            "mutation failed, rolled back"
        );
        self.notify(BoardNotice::MutationFailed {
            task_id,
            reason: error.to_string(),
        });
        error
    }

    /// Milliseconds since the pending write for `task_id` was applied locally.
    pub(crate) fn elapsed_ms(&self, task_id: &TaskId) -> u64 {
        self.pending.lock().get(task_id).map_or(0, |p| {
            u64::try_from(p.started.elapsed().as_millis()).unwrap_or(u64::MAX)
        })
    }

    fn notify(&self, notice: BoardNotice) {
        if let Err(e) = self.notices.try_send(notice) {
            tracing::debug!(error = %e, "board notice dropped");
        }
    }
}
