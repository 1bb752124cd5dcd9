//! Drag transition state machine for the lane board.
//!
//! `Idle -> Dragging { task_id, origin } -> Idle`. A controller only exists
//! for actors that pass the permission gate, so a read-only board never has
//! a drag source or a drop handler.

use std::sync::Arc;

use parking_lot::Mutex;
use taskboard_proto::task::{Task, TaskId, TaskStatus};

use crate::coordinator::{MutationCoordinator, MutationError};
use crate::remote::TaskBackend;

/// Where the drag machine is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DragState {
    /// No drag in progress.
    #[default]
    Idle,
    /// A task is being dragged out of `origin`.
    Dragging {
        /// The dragged task.
        task_id: TaskId,
        /// The lane it was in when the drag started.
        origin: TaskStatus,
    },
}

/// Errors from driving the drag machine.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DragError {
    /// The task is not on the board.
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    /// A drag is already in progress.
    #[error("already dragging {0}")]
    AlreadyDragging(TaskId),

    /// Drop without a preceding start.
    #[error("no drag in progress")]
    NotDragging,
}

/// Result of a drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragOutcome {
    /// Dropped on the origin lane; nothing was sent.
    Unchanged,
    /// The lane change was confirmed.
    Moved(Task),
    /// The lane change failed and was rolled back to the origin lane.
    Failed(MutationError),
}

/// Drag source and drop handler for one board.
pub struct DragController<B> {
    coordinator: Arc<MutationCoordinator<B>>,
    state: Mutex<DragState>,
}

impl<B: TaskBackend> DragController<B> {
    /// Wires up dragging, or returns `None` for a read-only actor.
    #[must_use]
    pub fn attach(coordinator: Arc<MutationCoordinator<B>>) -> Option<Self> {
        if !coordinator.can_mutate() {
            tracing::debug!(project_id = %coordinator.project_id(), "drag disabled for read-only actor");
            return None;
        }
        Some(Self {
            coordinator,
            state: Mutex::new(DragState::Idle),
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> DragState {
        self.state.lock().clone()
    }

    /// Begins dragging a task, recording the lane it starts in.
    ///
    /// # Errors
    ///
    /// [`DragError::AlreadyDragging`] if a drag is in progress (it is left
    /// untouched), [`DragError::UnknownTask`] if the task is not on the board.
    pub fn start(&self, task_id: &TaskId) -> Result<(), DragError> {
        let mut state = self.state.lock();
        if let DragState::Dragging { task_id: current, .. } = &*state {
            return Err(DragError::AlreadyDragging(current.clone()));
        }
        let origin = self
            .coordinator
            .store()
            .read(|s| s.get(task_id).map(|t| t.status))
            .ok_or_else(|| DragError::UnknownTask(task_id.clone()))?;
        tracing::trace!(task_id = %task_id, origin = %origin, "drag started");
        *state = DragState::Dragging {
            task_id: task_id.clone(),
            origin,
        };
        Ok(())
    }

    /// Ends the drag over `target`.
    ///
    /// The machine is back to idle before anything else happens, whatever the
    /// outcome.
    ///
    /// # Errors
    ///
    /// [`DragError::NotDragging`] if no drag was started.
    pub async fn drop_on(&self, target: TaskStatus) -> Result<DragOutcome, DragError> {
        let previous = std::mem::take(&mut *self.state.lock());
        let DragState::Dragging { task_id, origin } = previous else {
            return Err(DragError::NotDragging);
        };
        if target == origin {
            tracing::trace!(task_id = %task_id, lane = %origin, "dropped on origin lane");
            return Ok(DragOutcome::Unchanged);
        }
        match self.coordinator.move_to_lane(&task_id, target).await {
            Ok(task) => Ok(DragOutcome::Moved(task)),
            Err(e) => Ok(DragOutcome::Failed(e)),
        }
    }

    /// Abandons the drag without mutating anything.
    pub fn cancel(&self) {
        *self.state.lock() = DragState::Idle;
    }
}
