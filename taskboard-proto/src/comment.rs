//! Comments attached to tasks.
//!
//! Comment threads are append-only: edits change the body in place and
//! never reorder existing comments.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ProtoError;
use crate::task::{Actor, TaskId, Timestamp, string_id};

/// Maximum allowed comment body length in characters.
pub const MAX_COMMENT_LENGTH: usize = 4096;

string_id!(
    /// Identifier of a comment.
    CommentId
);

impl CommentId {
    /// Generates a fresh time-ordered identifier (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

/// A message in a task's comment thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Unique comment identifier.
    pub id: CommentId,
    /// Task the comment belongs to.
    pub task_id: TaskId,
    /// Who wrote it.
    pub author: Actor,
    /// Comment text.
    pub body: String,
    /// When the comment was posted.
    pub created_at: Timestamp,
    /// When the body was last edited, if ever.
    pub edited_at: Option<Timestamp>,
}

impl Comment {
    /// Checks a comment body against the length and emptiness rules.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::CommentEmpty`] or [`ProtoError::CommentTooLong`].
    pub fn validate_body(body: &str) -> Result<(), ProtoError> {
        if body.trim().is_empty() {
            return Err(ProtoError::CommentEmpty);
        }
        if body.chars().count() > MAX_COMMENT_LENGTH {
            return Err(ProtoError::CommentTooLong);
        }
        Ok(())
    }
}
