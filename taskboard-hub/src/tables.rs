//! Authoritative task and comment tables.
//!
//! Every write checks that the acting user belongs to the task's project,
//! stamps the record with an `updated_at` strictly later than its previous
//! one, and reports the [`ChangeEvent`] subscribers of that project should
//! see. Reads are open to anyone connected.

use std::collections::{HashMap, HashSet};

use taskboard_proto::ProtoError;
use taskboard_proto::change::{TaskChange, TaskDraft};
use taskboard_proto::comment::{Comment, CommentId};
use taskboard_proto::feed::ChangeEvent;
use taskboard_proto::task::{Actor, ActorId, ProjectId, Task, TaskId, Timestamp};

/// Reasons a write is refused. The display text is sent back to the client.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TableError {
    /// The actor is not a member of the project.
    #[error("{actor_id} is not a member of {project_id}")]
    NotMember {
        /// Who tried to write.
        actor_id: ActorId,
        /// Project they tried to write to.
        project_id: ProjectId,
    },

    /// No task with this id.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// No comment with this id on the task.
    #[error("comment not found: {0}")]
    CommentNotFound(CommentId),

    /// The request carried invalid field values.
    #[error(transparent)]
    Invalid(#[from] ProtoError),
}

/// A change to push to one project's subscribers.
pub type Broadcast = (ProjectId, ChangeEvent);

/// Result of a committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    /// What the writer gets back.
    pub value: T,
    /// What subscribers get, if anything.
    pub broadcast: Option<Broadcast>,
}

impl<T> Outcome<T> {
    const fn announced(value: T, project_id: ProjectId, event: ChangeEvent) -> Self {
        Self {
            value,
            broadcast: Some((project_id, event)),
        }
    }

    const fn quiet(value: T) -> Self {
        Self {
            value,
            broadcast: None,
        }
    }
}

/// In-memory board data for every project the hub serves.
#[derive(Debug, Default)]
pub struct BoardTables {
    tasks: HashMap<TaskId, Task>,
    comments: HashMap<TaskId, Vec<Comment>>,
    members: HashMap<ProjectId, HashSet<ActorId>>,
    clock: u64,
}

impl BoardTables {
    /// Creates empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `actor_id` write access to `project_id`.
    pub fn add_member(&mut self, project_id: &ProjectId, actor_id: ActorId) {
        self.members
            .entry(project_id.clone())
            .or_default()
            .insert(actor_id);
    }

    /// Whether `actor_id` may write to `project_id`.
    #[must_use]
    pub fn is_member(&self, project_id: &ProjectId, actor_id: &ActorId) -> bool {
        self.members
            .get(project_id)
            .is_some_and(|m| m.contains(actor_id))
    }

    /// Inserts a record as-is, bypassing membership. Used for seeding.
    pub fn insert_task(&mut self, task: Task) {
        if let Some(stamp) = task.updated_at {
            self.clock = self.clock.max(stamp.as_millis());
        }
        self.tasks.insert(task.id.clone(), task);
    }

    /// Number of tasks across all projects.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// One project's tasks, oldest first.
    #[must_use]
    pub fn fetch_tasks(&self, project_id: &ProjectId) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.project_id == *project_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    /// A task's comment thread, oldest first. Unknown tasks have none.
    #[must_use]
    pub fn list_comments(&self, task_id: &TaskId) -> Vec<Comment> {
        self.comments.get(task_id).cloned().unwrap_or_default()
    }

    /// Creates a task with a fresh id.
    ///
    /// # Errors
    ///
    /// [`TableError::Invalid`] for a bad draft, [`TableError::NotMember`]
    /// if `actor` may not write to `project_id`.
    pub fn create_task(
        &mut self,
        actor: &Actor,
        project_id: &ProjectId,
        draft: &TaskDraft,
    ) -> Result<Outcome<Task>, TableError> {
        draft.validate()?;
        self.ensure_member(project_id, &actor.id)?;
        let stamp = self.stamp(None);
        let task = draft
            .clone()
            .into_task(TaskId::generate(), project_id.clone(), stamp);
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(Outcome::announced(
            task.clone(),
            project_id.clone(),
            ChangeEvent::Insert(task),
        ))
    }

    /// Writes the fields set in `change`.
    ///
    /// # Errors
    ///
    /// [`TableError::Invalid`], [`TableError::TaskNotFound`], or
    /// [`TableError::NotMember`].
    pub fn update_task(
        &mut self,
        actor: &Actor,
        task_id: &TaskId,
        change: &TaskChange,
    ) -> Result<Outcome<Task>, TableError> {
        change.validate()?;
        let project_id = self.project_of(task_id)?;
        self.ensure_member(&project_id, &actor.id)?;
        let previous = self.task_mut(task_id)?.updated_at;
        let stamp = self.stamp(previous);
        let task = self.task_mut(task_id)?;
        change.apply_to(task);
        task.updated_at = Some(stamp);
        let task = task.clone();
        Ok(Outcome::announced(
            task.clone(),
            project_id,
            ChangeEvent::Update(task),
        ))
    }

    /// Deletes a task and its comment thread.
    ///
    /// # Errors
    ///
    /// [`TableError::TaskNotFound`] or [`TableError::NotMember`].
    pub fn delete_task(&mut self, actor: &Actor, task_id: &TaskId) -> Result<Outcome<()>, TableError> {
        let project_id = self.project_of(task_id)?;
        self.ensure_member(&project_id, &actor.id)?;
        self.tasks.remove(task_id);
        self.comments.remove(task_id);
        Ok(Outcome::announced(
            (),
            project_id,
            ChangeEvent::Delete(task_id.clone()),
        ))
    }

    /// Appends a comment authored by `actor` and bumps the task's count.
    ///
    /// # Errors
    ///
    /// [`TableError::Invalid`], [`TableError::TaskNotFound`], or
    /// [`TableError::NotMember`].
    pub fn add_comment(
        &mut self,
        actor: &Actor,
        task_id: &TaskId,
        body: &str,
    ) -> Result<Outcome<Comment>, TableError> {
        Comment::validate_body(body)?;
        let project_id = self.project_of(task_id)?;
        self.ensure_member(&project_id, &actor.id)?;
        let comment = Comment {
            id: CommentId::generate(),
            task_id: task_id.clone(),
            author: actor.clone(),
            body: body.to_string(),
            created_at: Timestamp::now(),
            edited_at: None,
        };
        self.comments
            .entry(task_id.clone())
            .or_default()
            .push(comment.clone());
        let task = self.recount_comments(task_id)?;
        Ok(Outcome::announced(comment, project_id, ChangeEvent::Update(task)))
    }

    /// Replaces a comment's body in place. The task record is untouched.
    ///
    /// # Errors
    ///
    /// [`TableError::Invalid`], [`TableError::TaskNotFound`],
    /// [`TableError::NotMember`], or [`TableError::CommentNotFound`].
    pub fn edit_comment(
        &mut self,
        actor: &Actor,
        task_id: &TaskId,
        comment_id: &CommentId,
        body: &str,
    ) -> Result<Outcome<Comment>, TableError> {
        Comment::validate_body(body)?;
        let project_id = self.project_of(task_id)?;
        self.ensure_member(&project_id, &actor.id)?;
        let comment = self
            .comments
            .get_mut(task_id)
            .and_then(|thread| thread.iter_mut().find(|c| c.id == *comment_id))
            .ok_or_else(|| TableError::CommentNotFound(comment_id.clone()))?;
        comment.body = body.to_string();
        comment.edited_at = Some(Timestamp::now());
        Ok(Outcome::quiet(comment.clone()))
    }

    /// Removes a comment and lowers the task's count.
    ///
    /// # Errors
    ///
    /// [`TableError::TaskNotFound`], [`TableError::NotMember`], or
    /// [`TableError::CommentNotFound`].
    pub fn delete_comment(
        &mut self,
        actor: &Actor,
        task_id: &TaskId,
        comment_id: &CommentId,
    ) -> Result<Outcome<()>, TableError> {
        let project_id = self.project_of(task_id)?;
        self.ensure_member(&project_id, &actor.id)?;
        let thread = self.comments.entry(task_id.clone()).or_default();
        let before = thread.len();
        thread.retain(|c| c.id != *comment_id);
        if thread.len() == before {
            return Err(TableError::CommentNotFound(comment_id.clone()));
        }
        let task = self.recount_comments(task_id)?;
        Ok(Outcome::announced((), project_id, ChangeEvent::Update(task)))
    }

    /// Next write stamp: wall clock, but never at or before `previous` or the
    /// last stamp handed out.
    fn stamp(&mut self, previous: Option<Timestamp>) -> Timestamp {
        let floor = previous
            .map_or(0, |p| p.as_millis().saturating_add(1))
            .max(self.clock.saturating_add(1));
        self.clock = Timestamp::now().as_millis().max(floor);
        Timestamp::from_millis(self.clock)
    }

    fn ensure_member(&self, project_id: &ProjectId, actor_id: &ActorId) -> Result<(), TableError> {
        if self.is_member(project_id, actor_id) {
            Ok(())
        } else {
            Err(TableError::NotMember {
                actor_id: actor_id.clone(),
                project_id: project_id.clone(),
            })
        }
    }

    fn project_of(&self, task_id: &TaskId) -> Result<ProjectId, TableError> {
        self.tasks
            .get(task_id)
            .map(|t| t.project_id.clone())
            .ok_or_else(|| TableError::TaskNotFound(task_id.clone()))
    }

    fn task_mut(&mut self, task_id: &TaskId) -> Result<&mut Task, TableError> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| TableError::TaskNotFound(task_id.clone()))
    }

    fn recount_comments(&mut self, task_id: &TaskId) -> Result<Task, TableError> {
        let count = self.comments.get(task_id).map_or(0, Vec::len);
        let previous = self.task_mut(task_id)?.updated_at;
        let stamp = self.stamp(previous);
        let task = self.task_mut(task_id)?;
        task.comment_count = u32::try_from(count).unwrap_or(u32::MAX);
        task.updated_at = Some(stamp);
        Ok(task.clone())
    }
}
