//! Boundary between the board and its backend.
//!
//! Three traits describe what the board consumes:
//! - [`TaskBackend`] -- bulk fetch plus task and comment writes
//! - [`MembershipSource`] -- the membership query behind the permission gate
//! - [`FeedSource`] -- the realtime change feed for one project
//!
//! Implementations:
//! - [`loopback::LoopbackBackend`] -- in-process backend for tests and offline use
//! - [`hub::HubClient`] -- WebSocket client for `taskboard-hub`

pub mod hub;
pub mod loopback;

use taskboard_proto::change::{TaskChange, TaskDraft};
use taskboard_proto::codec::CodecError;
use taskboard_proto::comment::{Comment, CommentId};
use taskboard_proto::feed::ChangeEvent;
use taskboard_proto::task::{ActorId, ProjectId, Task, TaskId};
use tokio::sync::mpsc;

/// Errors that can occur talking to the backend.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The backend refused the write (permission, validation, missing record).
    #[error("rejected by backend: {0}")]
    Rejected(String),

    /// The connection to the backend has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The backend did not answer in time.
    #[error("backend request timed out")]
    Timeout,

    /// The backend could not be reached.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The backend answered with a response of the wrong kind.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Task and comment reads and writes.
///
/// Every write returns the authoritative, server-normalized record.
pub trait TaskBackend: Send + Sync {
    /// All tasks of a project.
    fn fetch_tasks(
        &self,
        project_id: &ProjectId,
    ) -> impl std::future::Future<Output = Result<Vec<Task>, RemoteError>> + Send;

    /// Creates a task. The backend assigns the id and timestamps.
    fn create_task(
        &self,
        project_id: &ProjectId,
        draft: &TaskDraft,
    ) -> impl std::future::Future<Output = Result<Task, RemoteError>> + Send;

    /// Writes the fields carried by `change`.
    fn update_task(
        &self,
        task_id: &TaskId,
        change: &TaskChange,
    ) -> impl std::future::Future<Output = Result<Task, RemoteError>> + Send;

    /// Deletes a task.
    fn delete_task(
        &self,
        task_id: &TaskId,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;

    /// A task's comment thread, oldest first.
    fn list_comments(
        &self,
        task_id: &TaskId,
    ) -> impl std::future::Future<Output = Result<Vec<Comment>, RemoteError>> + Send;

    /// Appends a comment authored by the connected actor.
    fn add_comment(
        &self,
        task_id: &TaskId,
        body: &str,
    ) -> impl std::future::Future<Output = Result<Comment, RemoteError>> + Send;

    /// Replaces a comment's body.
    fn edit_comment(
        &self,
        task_id: &TaskId,
        comment_id: &CommentId,
        body: &str,
    ) -> impl std::future::Future<Output = Result<Comment, RemoteError>> + Send;

    /// Deletes a comment.
    fn delete_comment(
        &self,
        task_id: &TaskId,
        comment_id: &CommentId,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;
}

/// Project membership lookups.
pub trait MembershipSource: Send + Sync {
    /// Returns whether `actor_id` may mutate `project_id`.
    fn is_member(
        &self,
        project_id: &ProjectId,
        actor_id: &ActorId,
    ) -> impl std::future::Future<Output = Result<bool, RemoteError>> + Send;
}

/// Realtime change feeds.
pub trait FeedSource: Send + Sync {
    /// Opens the change feed for one project.
    ///
    /// Events written before the feed is open are not delivered.
    fn open_feed(
        &self,
        project_id: &ProjectId,
    ) -> impl std::future::Future<Output = Result<FeedReceiver, RemoteError>> + Send;
}

/// Releases a feed at the source when the receiver is done with it.
pub struct FeedRelease(Option<Box<dyn FnOnce() + Send>>);

impl FeedRelease {
    /// Wraps a release action. It runs at most once.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(release)))
    }

    /// Runs the release action if it has not run yet.
    pub fn release(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

impl Drop for FeedRelease {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for FeedRelease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedRelease")
            .field("released", &self.0.is_none())
            .finish()
    }
}

/// Receiving end of one project's change feed.
#[derive(Debug)]
pub struct FeedReceiver {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    release: FeedRelease,
}

impl FeedReceiver {
    /// Pairs an event channel with the action that releases it at the source.
    #[must_use]
    pub fn new(events: mpsc::UnboundedReceiver<ChangeEvent>, release: FeedRelease) -> Self {
        Self { events, release }
    }

    /// Waits for the next event. `None` once the source closed the feed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Splits the receiver so the release can be driven separately.
    #[must_use]
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<ChangeEvent>, FeedRelease) {
        (self.events, self.release)
    }
}
