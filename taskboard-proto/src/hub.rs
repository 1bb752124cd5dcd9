//! Wire protocol between board clients and the board hub.
//!
//! Every WebSocket binary frame carries one postcard-encoded [`HubMessage`].
//! A connection starts with `Hello` / `Welcome`; after that the client sends
//! correlated `Request`s and may `Subscribe` to any number of project feeds.

use serde::{Deserialize, Serialize};

use crate::change::{TaskChange, TaskDraft};
use crate::codec::{self, CodecError};
use crate::comment::{Comment, CommentId};
use crate::feed::ChangeEvent;
use crate::task::{Actor, ActorId, ProjectId, Task, TaskId};

/// Messages exchanged between board clients and the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HubMessage {
    /// Client identifies its actor. Must be the first frame.
    Hello {
        /// The acting user. Comments written on this connection carry it as author.
        actor: Actor,
    },
    /// Hub accepts the connection.
    Welcome {
        /// The actor id, echoed back.
        actor_id: ActorId,
    },
    /// A client request, answered by exactly one [`HubMessage::Response`].
    Request {
        /// Client-chosen correlation id.
        request_id: u64,
        /// The request.
        body: HubRequest,
    },
    /// The hub's answer to a request.
    Response {
        /// Correlation id copied from the request.
        request_id: u64,
        /// The answer.
        body: HubResponse,
    },
    /// Start receiving change events for a project.
    Subscribe {
        /// Project to watch.
        project_id: ProjectId,
    },
    /// Hub confirms a subscription.
    Subscribed {
        /// Project now being watched.
        project_id: ProjectId,
    },
    /// Stop receiving change events for a project.
    Unsubscribe {
        /// Project to stop watching.
        project_id: ProjectId,
    },
    /// A pushed change for a subscribed project.
    Event {
        /// Project the change belongs to.
        project_id: ProjectId,
        /// The change.
        event: ChangeEvent,
    },
    /// Connection-level error (bad frame, protocol violation).
    Error {
        /// Human-readable description.
        reason: String,
    },
}

/// Requests a client can make.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HubRequest {
    /// All tasks of a project.
    FetchTasks {
        /// The project.
        project_id: ProjectId,
    },
    /// Whether an actor may mutate a project.
    Membership {
        /// The project.
        project_id: ProjectId,
        /// The actor.
        actor_id: ActorId,
    },
    /// Create a task.
    CreateTask {
        /// Owning project.
        project_id: ProjectId,
        /// Task contents.
        draft: TaskDraft,
    },
    /// Apply a change to a task.
    UpdateTask {
        /// The task.
        task_id: TaskId,
        /// Fields to write.
        change: TaskChange,
    },
    /// Delete a task.
    DeleteTask {
        /// The task.
        task_id: TaskId,
    },
    /// A task's comment thread, oldest first.
    ListComments {
        /// The task.
        task_id: TaskId,
    },
    /// Append a comment.
    AddComment {
        /// The task.
        task_id: TaskId,
        /// Comment text.
        body: String,
    },
    /// Replace a comment's body.
    EditComment {
        /// The task.
        task_id: TaskId,
        /// The comment.
        comment_id: CommentId,
        /// New text.
        body: String,
    },
    /// Delete a comment.
    DeleteComment {
        /// The task.
        task_id: TaskId,
        /// The comment.
        comment_id: CommentId,
    },
}

/// Hub answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HubResponse {
    /// Result of `FetchTasks`.
    Tasks(Vec<Task>),
    /// Result of `Membership`.
    Membership(bool),
    /// Authoritative record after a create or update.
    Task(Task),
    /// Confirmation of a task deletion.
    TaskDeleted(TaskId),
    /// Result of `ListComments`.
    Comments(Vec<Comment>),
    /// Authoritative comment after an add or edit.
    Comment(Comment),
    /// Confirmation of a comment deletion.
    CommentDeleted(CommentId),
    /// The request was refused (permission, validation, missing record).
    Rejected {
        /// Human-readable reason.
        reason: String,
    },
}

/// Encodes a [`HubMessage`] into bytes.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if serialization fails.
pub fn encode(msg: &HubMessage) -> Result<Vec<u8>, CodecError> {
    codec::encode(msg)
}

/// Decodes a [`HubMessage`] from bytes.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the bytes are not a valid message.
pub fn decode(bytes: &[u8]) -> Result<HubMessage, CodecError> {
    codec::decode(bytes)
}
