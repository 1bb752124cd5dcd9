//! Realtime change events pushed from the hub to subscribed boards.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskId};

/// Kind of write a [`ChangeEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOperation {
    /// A task was created.
    Insert,
    /// A task was modified.
    Update,
    /// A task was deleted.
    Delete,
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// One server-confirmed change to a board's task table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEvent {
    /// A new task record.
    Insert(Task),
    /// The full, current record of a modified task.
    Update(Task),
    /// The id of a deleted task.
    Delete(TaskId),
}

impl ChangeEvent {
    /// Returns the operation kind.
    #[must_use]
    pub const fn operation(&self) -> ChangeOperation {
        match self {
            Self::Insert(_) => ChangeOperation::Insert,
            Self::Update(_) => ChangeOperation::Update,
            Self::Delete(_) => ChangeOperation::Delete,
        }
    }

    /// Returns the id of the affected task.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        match self {
            Self::Insert(task) | Self::Update(task) => &task.id,
            Self::Delete(id) => id,
        }
    }
}
