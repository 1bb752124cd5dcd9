//! Timeline projection and drag-to-resize rescheduling.

use std::sync::Arc;

use chrono::{Days, NaiveDate, NaiveDateTime};
use serde::Serialize;
use taskboard_proto::task::{Task, TaskId, TaskStatus};

use crate::coordinator::{MutationCoordinator, MutationError};
use crate::remote::TaskBackend;

/// Length given to a bar whose task has no due date.
pub const DEFAULT_SPAN_DAYS: u32 = 1;

/// One task drawn as a day interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineBar {
    /// The task.
    pub task_id: TaskId,
    /// Label.
    pub name: String,
    /// Lane the bar is grouped under.
    pub status: TaskStatus,
    /// First day, inclusive.
    pub start: NaiveDate,
    /// Last day, inclusive. Never before `start`.
    pub end: NaiveDate,
}

impl TimelineBar {
    /// Places a task on the time axis.
    ///
    /// Start falls back to the creation day, end to start plus `span_days`.
    #[must_use]
    pub fn for_task(task: &Task, span_days: u32) -> Self {
        let start = task.started_at.unwrap_or_else(|| task.created_at.to_date());
        let end = task
            .due_date
            .unwrap_or_else(|| start.checked_add_days(Days::new(u64::from(span_days))).unwrap_or(start))
            .max(start);
        Self {
            task_id: task.id.clone(),
            name: task.name.clone(),
            status: task.status,
            start,
            end,
        }
    }

    /// Number of days covered, counting both ends.
    #[must_use]
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// The bars of one lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineLane {
    /// The lane's status.
    pub status: TaskStatus,
    /// Bars ordered by start day.
    pub bars: Vec<TimelineBar>,
}

/// Lays `tasks` out per lane in fixed lane order.
#[must_use]
pub fn project(tasks: &[Task], span_days: u32) -> Vec<TimelineLane> {
    TaskStatus::LANES
        .iter()
        .map(|&status| {
            let mut bars: Vec<TimelineBar> = tasks
                .iter()
                .filter(|t| t.status == status)
                .map(|t| TimelineBar::for_task(t, span_days))
                .collect();
            bars.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.task_id.cmp(&b.task_id)));
            TimelineLane { status, bars }
        })
        .collect()
}

/// Drag-to-resize handler. Only exists for actors that may mutate the board.
pub struct Rescheduler<B> {
    coordinator: Arc<MutationCoordinator<B>>,
}

impl<B: TaskBackend> Rescheduler<B> {
    /// Wires up rescheduling, or returns `None` for a read-only actor.
    #[must_use]
    pub fn attach(coordinator: Arc<MutationCoordinator<B>>) -> Option<Self> {
        coordinator.can_mutate().then_some(Self { coordinator })
    }

    /// Moves or resizes a bar. Times of day are dropped before writing.
    ///
    /// # Errors
    ///
    /// [`MutationError::InvalidSchedule`] if the end day precedes the start
    /// day, otherwise whatever the coordinator reports.
    pub async fn move_task(
        &self,
        task_id: &TaskId,
        new_start: NaiveDateTime,
        new_end: NaiveDateTime,
    ) -> Result<Task, MutationError> {
        let (start, end) = (new_start.date(), new_end.date());
        tracing::debug!(task_id = %task_id, %start, %end, "rescheduling");
        self.coordinator.reschedule(task_id, start, end).await
    }
}
