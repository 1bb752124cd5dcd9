//! Pure filter engine over board tasks.
//!
//! A [`FilterState`] is an immutable value built with a consuming builder.
//! Every predicate is evaluated independently and the results are ANDed;
//! an unset field imposes no constraint. Sets use OR semantics within
//! themselves (any listed priority, any listed assignee).

use std::collections::BTreeSet;

use chrono::NaiveDate;
use taskboard_proto::task::{ActorId, Priority, Task};

/// Filter criteria for board projections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    /// Case-insensitive substring over name, description, assignee names.
    pub search: Option<String>,
    /// Accepted priorities.
    pub priorities: BTreeSet<Priority>,
    /// Accepted assignees; a task matches if any assignee is listed.
    pub assignees: BTreeSet<ActorId>,
    /// Earliest due day, inclusive.
    pub due_from: Option<NaiveDate>,
    /// Latest due day, inclusive.
    pub due_until: Option<NaiveDate>,
    /// Only tasks assigned to the viewing actor.
    pub mine_only: bool,
}

impl FilterState {
    /// An empty filter that matches every task.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the search text. Blank text clears the search.
    #[must_use]
    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.search = if text.trim().is_empty() {
            None
        } else {
            Some(text.trim().to_lowercase())
        };
        self
    }

    /// Adds a priority to accept.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priorities.insert(priority);
        self
    }

    /// Adds an assignee to accept.
    #[must_use]
    pub fn with_assignee(mut self, actor: ActorId) -> Self {
        self.assignees.insert(actor);
        self
    }

    /// Restricts due dates to `from..=until`. Either bound may be open.
    #[must_use]
    pub const fn with_due_range(mut self, from: Option<NaiveDate>, until: Option<NaiveDate>) -> Self {
        self.due_from = from;
        self.due_until = until;
        self
    }

    /// Keeps only tasks assigned to the viewing actor.
    #[must_use]
    pub const fn mine_only(mut self) -> Self {
        self.mine_only = true;
        self
    }

    /// Returns `true` if no predicate is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.search.is_none()
            && self.priorities.is_empty()
            && self.assignees.is_empty()
            && !self.has_due_range()
            && !self.mine_only
    }

    const fn has_due_range(&self) -> bool {
        self.due_from.is_some() || self.due_until.is_some()
    }

    /// Evaluates every predicate against one task.
    #[must_use]
    pub fn matches(&self, task: &Task, actor: Option<&ActorId>) -> bool {
        self.matches_search(task)
            && self.matches_priority(task)
            && self.matches_assignees(task)
            && self.matches_due(task)
            && self.matches_mine(task, actor)
    }

    fn matches_search(&self, task: &Task) -> bool {
        let Some(needle) = &self.search else {
            return true;
        };
        let needle = needle.to_lowercase();
        task.name.to_lowercase().contains(&needle)
            || task
                .description
                .as_ref()
                .is_some_and(|d| d.to_lowercase().contains(&needle))
            || task
                .assignees
                .iter()
                .any(|a| a.display_name.to_lowercase().contains(&needle))
    }

    fn matches_priority(&self, task: &Task) -> bool {
        self.priorities.is_empty() || self.priorities.contains(&task.priority)
    }

    fn matches_assignees(&self, task: &Task) -> bool {
        self.assignees.is_empty() || task.assignees.iter().any(|a| self.assignees.contains(&a.id))
    }

    fn matches_due(&self, task: &Task) -> bool {
        if !self.has_due_range() {
            return true;
        }
        let Some(due) = task.due_date else {
            return false;
        };
        self.due_from.is_none_or(|from| due >= from) && self.due_until.is_none_or(|until| due <= until)
    }

    fn matches_mine(&self, task: &Task, actor: Option<&ActorId>) -> bool {
        if !self.mine_only {
            return true;
        }
        actor.is_some_and(|actor| task.is_assigned_to(actor))
    }
}

/// Returns the tasks matching `filter`, in input order.
#[must_use]
pub fn apply<'a>(tasks: &'a [Task], filter: &FilterState, actor: Option<&ActorId>) -> Vec<&'a Task> {
    tasks.iter().filter(|t| filter.matches(t, actor)).collect()
}

/// Returns the tasks matching every filter in `filters`, in input order.
///
/// An empty slice matches everything.
#[must_use]
pub fn apply_all<'a>(
    tasks: &'a [Task],
    filters: &[FilterState],
    actor: Option<&ActorId>,
) -> Vec<&'a Task> {
    tasks
        .iter()
        .filter(|t| filters.iter().all(|f| f.matches(t, actor)))
        .collect()
}

#[cfg(test)]
mod tests {
    use taskboard_proto::change::TaskDraft;
    use taskboard_proto::task::{Actor, ProjectId, TaskId, Timestamp};

    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn make_task(id: &str, name: &str) -> Task {
        TaskDraft::new(name).into_task(
            TaskId::new(id),
            ProjectId::new("p"),
            Timestamp::from_millis(1),
        )
    }

    fn fixture() -> Vec<Task> {
        let mut a = make_task("a", "Fix login bug");
        a.priority = Priority::Urgent;
        a.assignees.push(Actor::new("ana", "Ana Lima"));
        a.due_date = Some(day(10));

        let mut b = make_task("b", "Write docs");
        b.description = Some("Cover the LOGIN flow".to_string());
        b.assignees.push(Actor::new("bo", "Bo"));

        let mut c = make_task("c", "Plan sprint");
        c.priority = Priority::Low;
        c.due_date = Some(day(20));
        vec![a, b, c]
    }

    fn ids(tasks: &[&Task]) -> Vec<String> {
        tasks.iter().map(|t| t.id.to_string()).collect()
    }

    #[test]
    fn empty_filter_is_identity() {
        let tasks = fixture();
        let filter = FilterState::new();
        assert!(filter.is_empty());
        assert_eq!(ids(&apply(&tasks, &filter, None)), vec!["a", "b", "c"]);
    }

    #[test]
    fn search_covers_name_description_and_assignees() {
        let tasks = fixture();
        let login = FilterState::new().with_search("login");
        assert_eq!(ids(&apply(&tasks, &login, None)), vec!["a", "b"]);
        let by_name = FilterState::new().with_search("ANA");
        assert_eq!(ids(&apply(&tasks, &by_name, None)), vec!["a"]);
    }

    #[test]
    fn blank_search_is_unset() {
        assert!(FilterState::new().with_search("   ").is_empty());
    }

    #[test]
    fn priority_set_is_any_of() {
        let tasks = fixture();
        let filter = FilterState::new()
            .with_priority(Priority::Urgent)
            .with_priority(Priority::Low);
        assert_eq!(ids(&apply(&tasks, &filter, None)), vec!["a", "c"]);
    }

    #[test]
    fn assignee_set_matches_any_assignee() {
        let tasks = fixture();
        let filter = FilterState::new().with_assignee(ActorId::new("bo"));
        assert_eq!(ids(&apply(&tasks, &filter, None)), vec!["b"]);
    }

    #[test]
    fn due_range_excludes_undated_and_is_inclusive() {
        let tasks = fixture();
        let filter = FilterState::new().with_due_range(Some(day(10)), Some(day(20)));
        assert_eq!(ids(&apply(&tasks, &filter, None)), vec!["a", "c"]);
        let open_end = FilterState::new().with_due_range(Some(day(11)), None);
        assert_eq!(ids(&apply(&tasks, &open_end, None)), vec!["c"]);
    }

    #[test]
    fn mine_only_needs_an_actor() {
        let tasks = fixture();
        let filter = FilterState::new().mine_only();
        assert!(apply(&tasks, &filter, None).is_empty());
        let ana = ActorId::new("ana");
        assert_eq!(ids(&apply(&tasks, &filter, Some(&ana))), vec!["a"]);
    }

    #[test]
    fn predicates_are_anded() {
        let tasks = fixture();
        let filter = FilterState::new()
            .with_search("login")
            .with_priority(Priority::Medium);
        assert_eq!(ids(&apply(&tasks, &filter, None)), vec!["b"]);
    }

    #[test]
    fn apply_all_is_a_conjunction() {
        let tasks = fixture();
        let filters = [
            FilterState::new().with_search("login"),
            FilterState::new().with_due_range(None, Some(day(31))),
        ];
        assert_eq!(ids(&apply_all(&tasks, &filters, None)), vec!["a"]);
        assert_eq!(apply_all(&tasks, &[], None).len(), 3);
    }
}
