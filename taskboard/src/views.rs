//! Lane and table projections of the store.
//!
//! Both are recomputed from scratch on every change; nothing here keeps state.

use std::cmp::{Ordering, Reverse};
use std::str::FromStr;

use serde::Serialize;
use taskboard_proto::task::{ActorId, Task, TaskStatus};

use crate::filter::{self, FilterState};

/// One kanban column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lane {
    /// The lane's status.
    pub status: TaskStatus,
    /// Filtered tasks in this lane, in board order.
    pub tasks: Vec<Task>,
}

/// Groups the filtered tasks into the fixed lanes. Empty lanes are kept.
#[must_use]
pub fn lanes(tasks: &[Task], filter: &FilterState, actor: Option<&ActorId>) -> Vec<Lane> {
    let mut lanes: Vec<Lane> = TaskStatus::LANES
        .iter()
        .map(|&status| Lane {
            status,
            tasks: Vec::new(),
        })
        .collect();
    for task in filter::apply(tasks, filter, actor) {
        lanes[task.status.lane_index()].tasks.push(task.clone());
    }
    lanes
}

/// Sort order for the flat table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableSort {
    /// Name, case-insensitive.
    #[default]
    Name,
    /// Most urgent first.
    Priority,
    /// Earliest due first, undated last.
    DueDate,
    /// Most recently updated first.
    UpdatedAt,
}

impl FromStr for TableSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "priority" => Ok(Self::Priority),
            "due" | "due_date" | "due-date" => Ok(Self::DueDate),
            "updated" | "updated_at" | "updated-at" => Ok(Self::UpdatedAt),
            other => Err(format!("unknown sort: {other}")),
        }
    }
}

impl TableSort {
    fn compare(self, a: &Task, b: &Task) -> Ordering {
        match self {
            Self::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            Self::Priority => b.priority.cmp(&a.priority),
            Self::DueDate => match (a.due_date, b.due_date) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
            Self::UpdatedAt => Reverse(a.updated_at).cmp(&Reverse(b.updated_at)),
        }
    }
}

/// The filtered tasks as one sorted table. Ties keep input order.
#[must_use]
pub fn table<'a>(
    tasks: &'a [Task],
    filter: &FilterState,
    actor: Option<&ActorId>,
    sort: TableSort,
) -> Vec<&'a Task> {
    let mut rows = filter::apply(tasks, filter, actor);
    rows.sort_by(|a, b| sort.compare(a, b));
    rows
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use taskboard_proto::change::TaskDraft;
    use taskboard_proto::task::{Priority, ProjectId, TaskId, Timestamp};

    use super::*;

    fn task(id: &str, status: TaskStatus, priority: Priority) -> Task {
        TaskDraft::new(id)
            .with_status(status)
            .with_priority(priority)
            .into_task(TaskId::new(id), ProjectId::new("ops"), Timestamp::from_millis(1))
    }

    fn names(rows: &[&Task]) -> Vec<String> {
        rows.iter().map(|t| t.name.clone()).collect()
    }

    #[test]
    fn every_lane_is_present_in_order() {
        let tasks = vec![
            task("b", TaskStatus::Done, Priority::Low),
            task("a", TaskStatus::Todo, Priority::Low),
        ];
        let lanes = lanes(&tasks, &FilterState::new(), None);
        let statuses: Vec<_> = lanes.iter().map(|l| l.status).collect();
        assert_eq!(statuses, TaskStatus::LANES.to_vec());
        assert_eq!(lanes[0].tasks[0].name, "a");
        assert!(lanes[1].tasks.is_empty());
        assert_eq!(lanes[3].tasks[0].name, "b");
    }

    #[test]
    fn lanes_respect_the_filter() {
        let tasks = vec![
            task("urgent", TaskStatus::Todo, Priority::Urgent),
            task("calm", TaskStatus::Todo, Priority::Low),
        ];
        let filter = FilterState::new().with_priority(Priority::Urgent);
        let lanes = lanes(&tasks, &filter, None);
        assert_eq!(lanes[0].tasks.len(), 1);
        assert_eq!(lanes[0].tasks[0].name, "urgent");
    }

    #[test]
    fn table_sorts() {
        let mut early = task("early", TaskStatus::Todo, Priority::Low);
        early.due_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        early.updated_at = Some(Timestamp::from_millis(5));
        let mut late = task("Late", TaskStatus::Review, Priority::Urgent);
        late.due_date = NaiveDate::from_ymd_opt(2024, 6, 1);
        late.updated_at = Some(Timestamp::from_millis(9));
        let undated = task("undated", TaskStatus::Done, Priority::Medium);
        let tasks = vec![undated, late, early];
        let all = FilterState::new();

        assert_eq!(names(&table(&tasks, &all, None, TableSort::Name)), ["early", "Late", "undated"]);
        assert_eq!(
            names(&table(&tasks, &all, None, TableSort::Priority)),
            ["Late", "undated", "early"]
        );
        assert_eq!(
            names(&table(&tasks, &all, None, TableSort::DueDate)),
            ["early", "Late", "undated"]
        );
        assert_eq!(
            names(&table(&tasks, &all, None, TableSort::UpdatedAt)),
            ["Late", "early", "undated"]
        );
    }

    #[test]
    fn sort_names_parse() {
        assert_eq!("priority".parse::<TableSort>(), Ok(TableSort::Priority));
        assert_eq!("due-date".parse::<TableSort>(), Ok(TableSort::DueDate));
        assert!("colour".parse::<TableSort>().is_err());
    }
}
