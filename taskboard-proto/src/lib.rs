//! Shared data model and wire protocol for the task board.
//!
//! Everything here is plain data: tasks, comments, field-level changes,
//! realtime change events, and the postcard-encoded messages exchanged
//! between board clients and the hub.

pub mod change;
pub mod codec;
pub mod comment;
pub mod feed;
pub mod hub;
pub mod task;

/// Validation errors raised at the data-model boundary.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProtoError {
    /// Task name is empty or whitespace only.
    #[error("task name cannot be empty")]
    NameEmpty,

    /// Task name exceeds [`task::MAX_TASK_NAME_LENGTH`] characters.
    #[error("task name too long (max {max} characters)", max = task::MAX_TASK_NAME_LENGTH)]
    NameTooLong,

    /// Comment body is empty or whitespace only.
    #[error("comment body cannot be empty")]
    CommentEmpty,

    /// Comment body exceeds [`comment::MAX_COMMENT_LENGTH`] characters.
    #[error("comment too long (max {max} characters)", max = comment::MAX_COMMENT_LENGTH)]
    CommentTooLong,

    /// A status string did not name one of the fixed lanes.
    #[error("unknown task status: {0}")]
    UnknownStatus(String),

    /// A priority string did not name a known priority.
    #[error("unknown priority: {0}")]
    UnknownPriority(String),
}
