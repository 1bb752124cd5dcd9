//! Comment threads and comment writes.
//!
//! Threads are loaded on demand per task and kept oldest first. The cached
//! `comment_count` on the task record moves optimistically with adds and
//! deletes; thread contents change only once the backend confirms.

use std::collections::HashMap;

use taskboard_proto::comment::{Comment, CommentId};
use taskboard_proto::task::TaskId;

use crate::coordinator::{MutationCoordinator, MutationError, PendingChange, Rollback};
use crate::remote::TaskBackend;
use crate::store::TaskStore;

/// Locally loaded comment threads keyed by task.
#[derive(Debug, Default)]
pub struct CommentThreads {
    threads: HashMap<TaskId, Vec<Comment>>,
}

impl CommentThreads {
    /// No threads loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a task's thread, ordering it oldest first.
    pub fn load(&mut self, task_id: &TaskId, mut comments: Vec<Comment>) {
        comments.sort_by_key(|c| c.created_at);
        self.threads.insert(task_id.clone(), comments);
    }

    /// Whether the thread for `task_id` has been loaded.
    #[must_use]
    pub fn is_loaded(&self, task_id: &TaskId) -> bool {
        self.threads.contains_key(task_id)
    }

    /// A task's loaded thread. Empty if never loaded.
    #[must_use]
    pub fn thread(&self, task_id: &TaskId) -> &[Comment] {
        self.threads.get(task_id).map_or(&[], Vec::as_slice)
    }

    /// Appends a comment to the end of its task's thread.
    pub fn append(&mut self, comment: Comment) {
        self.threads
            .entry(comment.task_id.clone())
            .or_default()
            .push(comment);
    }

    /// Whether `comment_id` is in a loaded thread of `task_id`.
    #[must_use]
    pub fn contains(&self, task_id: &TaskId, comment_id: &CommentId) -> bool {
        self.thread(task_id).iter().any(|c| c.id == *comment_id)
    }

    /// Replaces a comment in place. Returns `false` if it is not loaded.
    pub fn replace(&mut self, comment: Comment) -> bool {
        let Some(slot) = self
            .threads
            .get_mut(&comment.task_id)
            .and_then(|thread| thread.iter_mut().find(|c| c.id == comment.id))
        else {
            return false;
        };
        *slot = comment;
        true
    }

    /// Removes a comment, returning its position and value.
    pub fn remove(&mut self, task_id: &TaskId, comment_id: &CommentId) -> Option<(usize, Comment)> {
        let thread = self.threads.get_mut(task_id)?;
        let index = thread.iter().position(|c| c.id == *comment_id)?;
        Some((index, thread.remove(index)))
    }

    /// Drops a task's thread.
    pub fn forget(&mut self, task_id: &TaskId) {
        self.threads.remove(task_id);
    }
}

impl<B: TaskBackend> MutationCoordinator<B> {
    /// Fetches a task's thread from the backend and caches it.
    ///
    /// Reading comments needs no permission.
    ///
    /// # Errors
    ///
    /// [`MutationError::Remote`] or [`MutationError::TimedOut`].
    pub async fn load_comments(&self, task_id: &TaskId) -> Result<Vec<Comment>, MutationError> {
        let comments = self.remote(self.backend().list_comments(task_id)).await?;
        let mut threads = self.threads.lock();
        threads.load(task_id, comments);
        Ok(threads.thread(task_id).to_vec())
    }

    /// The cached thread for a task, oldest first.
    #[must_use]
    pub fn comments(&self, task_id: &TaskId) -> Vec<Comment> {
        self.threads.lock().thread(task_id).to_vec()
    }

    /// Drops the cached thread of a task that no longer exists.
    pub fn forget_comments(&self, task_id: &TaskId) {
        self.threads.lock().forget(task_id);
    }

    /// Posts a comment. The task's count goes up immediately.
    ///
    /// # Errors
    ///
    /// See [`MutationError`]. On failure the count is restored.
    pub async fn add_comment(&self, task_id: &TaskId, body: &str) -> Result<Comment, MutationError> {
        self.gate().ensure()?;
        Comment::validate_body(body)?;
        let guard = self.begin(task_id, PendingChange::AddComment, |store| {
            shift_count(store, task_id, 1)
        })?;

        match self.remote(self.backend().add_comment(task_id, body)).await {
            Ok(comment) => {
                self.threads.lock().append(comment.clone());
                guard.settle(|_| ());
                Ok(comment)
            }
            Err(e) => Err(self.fail(guard, e)),
        }
    }

    /// Replaces a comment's body.
    ///
    /// # Errors
    ///
    /// See [`MutationError`].
    pub async fn edit_comment(
        &self,
        task_id: &TaskId,
        comment_id: &CommentId,
        body: &str,
    ) -> Result<Comment, MutationError> {
        self.gate().ensure()?;
        Comment::validate_body(body)?;
        self.ensure_known_comment(task_id, comment_id)?;
        let guard = self.begin(
            task_id,
            PendingChange::EditComment(comment_id.clone()),
            |store| {
                if store.contains(task_id) {
                    Ok(Rollback::Nothing)
                } else {
                    Err(MutationError::NotFound(task_id.clone()))
                }
            },
        )?;

        match self
            .remote(self.backend().edit_comment(task_id, comment_id, body))
            .await
        {
            Ok(comment) => {
                if !self.threads.lock().replace(comment.clone()) {
                    tracing::debug!(comment_id = %comment_id, "edited comment not in a loaded thread");
                }
                guard.settle(|_| ());
                Ok(comment)
            }
            Err(e) => Err(self.fail(guard, e)),
        }
    }

    /// Deletes a comment. The task's count goes down immediately, never below zero.
    ///
    /// # Errors
    ///
    /// See [`MutationError`]. On failure the count is restored.
    pub async fn delete_comment(
        &self,
        task_id: &TaskId,
        comment_id: &CommentId,
    ) -> Result<(), MutationError> {
        self.gate().ensure()?;
        self.ensure_known_comment(task_id, comment_id)?;
        let guard = self.begin(
            task_id,
            PendingChange::DeleteComment(comment_id.clone()),
            |store| shift_count(store, task_id, -1),
        )?;

        match self
            .remote(self.backend().delete_comment(task_id, comment_id))
            .await
        {
            Ok(()) => {
                self.threads.lock().remove(task_id, comment_id);
                guard.settle(|_| ());
                Ok(())
            }
            Err(e) => Err(self.fail(guard, e)),
        }
    }

    /// A loaded thread must hold the comment. Unloaded threads are left to the backend.
    fn ensure_known_comment(&self, task_id: &TaskId, comment_id: &CommentId) -> Result<(), MutationError> {
        let threads = self.threads.lock();
        if threads.is_loaded(task_id) && !threads.contains(task_id, comment_id) {
            return Err(MutationError::CommentNotFound(comment_id.clone()));
        }
        Ok(())
    }
}

/// Optimistic counter step shared by comment adds and deletes.
fn shift_count(
    store: &mut TaskStore,
    task_id: &TaskId,
    delta: i64,
) -> Result<Rollback, MutationError> {
    let stamp = store
        .get(task_id)
        .ok_or_else(|| MutationError::NotFound(task_id.clone()))?
        .updated_at;
    let applied = store.adjust_comment_count(task_id, delta).unwrap_or(0);
    Ok(Rollback::Counter { applied, stamp })
}
