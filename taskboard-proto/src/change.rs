//! Field-level task changes and drafts for new tasks.
//!
//! A [`TaskChange`] carries only the fields being written. Optional task
//! fields use a nested `Option` so a change can distinguish "leave as is"
//! (`None`) from "clear" (`Some(None)`).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ProtoError;
use crate::task::{Actor, Priority, ProjectId, Task, TaskId, TaskStatus, Timestamp};

/// A partial update to a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskChange {
    /// New name.
    pub name: Option<String>,
    /// New description, or `Some(None)` to clear it.
    pub description: Option<Option<String>>,
    /// New lane.
    pub status: Option<TaskStatus>,
    /// New priority.
    pub priority: Option<Priority>,
    /// Replacement assignee list.
    pub assignees: Option<Vec<Actor>>,
    /// New start day, or `Some(None)` to clear it.
    pub started_at: Option<Option<NaiveDate>>,
    /// New due day, or `Some(None)` to clear it.
    pub due_date: Option<Option<NaiveDate>>,
}

impl TaskChange {
    /// A lane transition.
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// A reschedule of both dates.
    #[must_use]
    pub fn schedule(started_at: NaiveDate, due_date: NaiveDate) -> Self {
        Self {
            started_at: Some(Some(started_at)),
            due_date: Some(Some(due_date)),
            ..Self::default()
        }
    }

    /// Sets the new name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets or clears the description.
    #[must_use]
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    /// Sets the new priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Replaces the assignee list.
    #[must_use]
    pub fn with_assignees(mut self, assignees: Vec<Actor>) -> Self {
        self.assignees = Some(assignees);
        self
    }

    /// Sets or clears the due day.
    #[must_use]
    pub fn with_due_date(mut self, due_date: Option<NaiveDate>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// Returns `true` if the change writes no field.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.assignees.is_none()
            && self.started_at.is_none()
            && self.due_date.is_none()
    }

    /// Validates the written fields.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtoError`] if the new name is empty or too long.
    pub fn validate(&self) -> Result<(), ProtoError> {
        if let Some(name) = &self.name {
            Task::validate_name(name)?;
        }
        Ok(())
    }

    /// Writes every field carried by this change into `task`.
    ///
    /// Does not touch `updated_at`; the writer decides which clock stamps it.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(name) = &self.name {
            task.name.clone_from(name);
        }
        if let Some(description) = &self.description {
            task.description.clone_from(description);
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(assignees) = &self.assignees {
            task.assignees.clone_from(assignees);
        }
        if let Some(started_at) = self.started_at {
            task.started_at = started_at;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
    }
}

/// Everything needed to create a task. The hub assigns the id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    /// Task name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Starting lane.
    pub status: TaskStatus,
    /// Priority.
    pub priority: Priority,
    /// Initial assignees.
    pub assignees: Vec<Actor>,
    /// Start day.
    pub started_at: Option<NaiveDate>,
    /// Due day.
    pub due_date: Option<NaiveDate>,
}

impl TaskDraft {
    /// A draft in the `Todo` lane with default priority and nothing else set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            status: TaskStatus::Todo,
            priority: Priority::default(),
            assignees: Vec::new(),
            started_at: None,
            due_date: None,
        }
    }

    /// Sets the starting lane.
    #[must_use]
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Adds an assignee.
    #[must_use]
    pub fn with_assignee(mut self, actor: Actor) -> Self {
        self.assignees.push(actor);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets both schedule days.
    #[must_use]
    pub fn with_schedule(mut self, started_at: NaiveDate, due_date: NaiveDate) -> Self {
        self.started_at = Some(started_at);
        self.due_date = Some(due_date);
        self
    }

    /// Validates the draft.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtoError`] if the name is empty or too long.
    pub fn validate(&self) -> Result<(), ProtoError> {
        Task::validate_name(&self.name)
    }

    /// Materializes the draft as a task with the given identity and creation time.
    #[must_use]
    pub fn into_task(self, id: TaskId, project_id: ProjectId, now: Timestamp) -> Task {
        Task {
            id,
            project_id,
            name: self.name,
            description: self.description,
            status: self.status,
            priority: self.priority,
            assignees: self.assignees,
            started_at: self.started_at,
            due_date: self.due_date,
            comment_count: 0,
            created_at: now,
            updated_at: Some(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn make_task() -> Task {
        TaskDraft::new("Write release notes")
            .with_description("for 1.2")
            .with_schedule(day(1), day(3))
            .into_task(
                TaskId::new("t-1"),
                ProjectId::new("p-1"),
                Timestamp::from_millis(1000),
            )
    }

    #[test]
    fn empty_change_leaves_task_untouched() {
        let mut task = make_task();
        let before = task.clone();
        let change = TaskChange::default();
        assert!(change.is_empty());
        change.apply_to(&mut task);
        assert_eq!(task, before);
    }

    #[test]
    fn status_change_only_moves_lane() {
        let mut task = make_task();
        TaskChange::status(TaskStatus::Review).apply_to(&mut task);
        assert_eq!(task.status, TaskStatus::Review);
        assert_eq!(task.name, "Write release notes");
        assert_eq!(task.due_date, Some(day(3)));
    }

    #[test]
    fn nested_option_clears_fields() {
        let mut task = make_task();
        TaskChange::default()
            .with_description(None)
            .with_due_date(None)
            .apply_to(&mut task);
        assert_eq!(task.description, None);
        assert_eq!(task.due_date, None);
        assert_eq!(task.started_at, Some(day(1)));
    }

    #[test]
    fn schedule_sets_both_days() {
        let mut task = make_task();
        TaskChange::schedule(day(10), day(12)).apply_to(&mut task);
        assert_eq!(task.started_at, Some(day(10)));
        assert_eq!(task.due_date, Some(day(12)));
    }

    #[test]
    fn apply_does_not_stamp_updated_at() {
        let mut task = make_task();
        TaskChange::default()
            .with_priority(Priority::Urgent)
            .apply_to(&mut task);
        assert_eq!(task.updated_at, Some(Timestamp::from_millis(1000)));
    }

    #[test]
    fn validate_rejects_blank_name() {
        assert_eq!(
            TaskChange::default().with_name("  ").validate(),
            Err(ProtoError::NameEmpty)
        );
        assert_eq!(TaskDraft::new("").validate(), Err(ProtoError::NameEmpty));
    }

    #[test]
    fn draft_into_task_starts_with_zero_comments() {
        let task = make_task();
        assert_eq!(task.comment_count, 0);
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.created_at, Timestamp::from_millis(1000));
    }
}
