//! One open board view.
//!
//! [`Board::open`] resolves the permission gate, subscribes to the change
//! feed, and seeds the store from a bulk fetch. Every projection reads the
//! shared store; every write goes through the coordinator. Closing the board
//! (or dropping it) tears the subscription down.

use std::sync::Arc;
use std::time::Duration;

use taskboard_proto::task::{Actor, ActorId, ProjectId, Task};
use tokio::sync::{mpsc, watch};

use crate::coordinator::{BoardNotice, DEFAULT_MUTATION_TIMEOUT, MutationCoordinator};
use crate::drag::DragController;
use crate::filter::{self, FilterState};
use crate::permission::PermissionGate;
use crate::realtime::{Fold, RealtimeListener, Subscription};
use crate::remote::{FeedSource, MembershipSource, RemoteError, TaskBackend};
use crate::store::{SharedStore, TaskStore};
use crate::timeline::{self, DEFAULT_SPAN_DAYS, Rescheduler, TimelineLane};
use crate::views::{self, Lane, TableSort};

/// Tunables for a board session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardOptions {
    /// Bound on each remote write.
    pub mutation_timeout: Duration,
    /// Capacity of the notice channel.
    pub notice_buffer: usize,
    /// Timeline length for tasks without a due date.
    pub default_span_days: u32,
}

impl Default for BoardOptions {
    fn default() -> Self {
        Self {
            mutation_timeout: DEFAULT_MUTATION_TIMEOUT,
            notice_buffer: 64,
            default_span_days: DEFAULT_SPAN_DAYS,
        }
    }
}

/// A live board: store, coordinator, and realtime subscription.
pub struct Board<B> {
    project_id: ProjectId,
    store: SharedStore,
    coordinator: Arc<MutationCoordinator<B>>,
    subscription: Subscription,
    span_days: u32,
}

impl<B> Board<B>
where
    B: TaskBackend + MembershipSource + FeedSource + 'static,
{
    /// Opens a board for `actor`.
    ///
    /// Returns the board and the receiver for its user-visible notices.
    ///
    /// # Errors
    ///
    /// Fails if the change feed cannot be opened or the bulk fetch fails.
    /// A failed membership query does not fail the open; the board is
    /// read-only instead.
    pub async fn open(
        backend: Arc<B>,
        project_id: ProjectId,
        actor: Actor,
        options: BoardOptions,
    ) -> Result<(Self, mpsc::Receiver<BoardNotice>), RemoteError> {
        let gate = PermissionGate::load(backend.as_ref(), &project_id, &actor.id).await;
        let store = SharedStore::new();
        let (notice_tx, notices) = mpsc::channel(options.notice_buffer.max(1));
        let coordinator = Arc::new(MutationCoordinator::new(
            Arc::clone(&backend),
            store.clone(),
            gate,
            actor,
            options.mutation_timeout,
            notice_tx,
        ));

        // Subscribe before fetching so nothing written in between is missed.
        store.write(TaskStore::begin_load);
        let subscription = {
            let coordinator = Arc::clone(&coordinator);
            RealtimeListener::subscribe(backend.as_ref(), &project_id, store.clone(), move |event, fold| {
                if fold == Fold::Removed {
                    coordinator.forget_comments(event.task_id());
                }
            })
            .await?
        };

        let fetched = backend.fetch_tasks(&project_id).await?;
        let count = fetched.len();
        store.write(|s| s.finish_load(fetched));
        tracing::info!(
            project_id = %project_id,
            tasks = count,
            can_mutate = coordinator.can_mutate(),
            "board opened"
        );

        Ok((
            Self {
                project_id,
                store,
                coordinator,
                subscription,
                span_days: options.default_span_days,
            },
            notices,
        ))
    }

    /// Wires up dragging, `None` for a read-only actor.
    #[must_use]
    pub fn drag_controller(&self) -> Option<DragController<B>> {
        DragController::attach(Arc::clone(&self.coordinator))
    }

    /// Wires up timeline rescheduling, `None` for a read-only actor.
    #[must_use]
    pub fn rescheduler(&self) -> Option<Rescheduler<B>> {
        Rescheduler::attach(Arc::clone(&self.coordinator))
    }
}

impl<B> Board<B> {
    /// The board's project.
    #[must_use]
    pub const fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// The shared store every projection reads.
    #[must_use]
    pub const fn store(&self) -> &SharedStore {
        &self.store
    }

    /// The write path for this board.
    #[must_use]
    pub const fn coordinator(&self) -> &Arc<MutationCoordinator<B>> {
        &self.coordinator
    }

    /// All tasks in board order.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.store.tasks()
    }

    /// Kanban projection.
    #[must_use]
    pub fn lanes(&self, filter: &FilterState) -> Vec<Lane> {
        let tasks = self.store.tasks();
        views::lanes(&tasks, filter, Some(self.actor_id()))
    }

    /// Flat table projection.
    #[must_use]
    pub fn table(&self, filter: &FilterState, sort: TableSort) -> Vec<Task> {
        let tasks = self.store.tasks();
        views::table(&tasks, filter, Some(self.actor_id()), sort)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Timeline projection of the filtered tasks.
    #[must_use]
    pub fn timeline(&self, filter: &FilterState) -> Vec<TimelineLane> {
        let tasks = self.store.tasks();
        let visible: Vec<Task> = filter::apply(&tasks, filter, Some(self.actor_id()))
            .into_iter()
            .cloned()
            .collect();
        timeline::project(&visible, self.span_days)
    }

    /// Wakes on every store change.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.store.changes()
    }

    /// Whether the realtime subscription is still live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.subscription.is_open()
    }

    /// Closes the view. No pushed change is folded after this returns.
    pub fn close(mut self) {
        self.subscription.close();
        tracing::info!(project_id = %self.project_id, "board closed");
    }

    fn actor_id(&self) -> &ActorId {
        &self.coordinator.actor().id
    }
}

#[cfg(test)]
mod tests {
    use taskboard_proto::change::{TaskChange, TaskDraft};
    use taskboard_proto::task::{Priority, TaskStatus};

    use super::*;
    use crate::remote::loopback::{BackendCall, LoopbackBackend};

    fn project() -> ProjectId {
        ProjectId::new("ops")
    }

    async fn backend_with_tasks(member: bool) -> Arc<LoopbackBackend> {
        let ana = Actor::new("ana", "Ana");
        let backend = Arc::new(LoopbackBackend::new(ana.clone()));
        backend.add_member(&project(), &ana.id);
        for (name, status) in [("Write", TaskStatus::Todo), ("Test", TaskStatus::Review)] {
            backend
                .create_task(&project(), &TaskDraft::new(name).with_status(status))
                .await
                .unwrap();
        }
        if member {
            backend
        } else {
            Arc::new(backend.connect_as(Actor::new("eve", "Eve")))
        }
    }

    #[tokio::test]
    async fn open_seeds_store_and_projections() {
        let backend = backend_with_tasks(true).await;
        let (board, _notices) = Board::open(backend, project(), Actor::new("ana", "Ana"), BoardOptions::default())
            .await
            .unwrap();
        assert_eq!(board.tasks().len(), 2);
        let lanes = board.lanes(&FilterState::new());
        assert_eq!(lanes[0].tasks[0].name, "Write");
        assert_eq!(lanes[2].tasks[0].name, "Test");
        assert_eq!(board.table(&FilterState::new(), TableSort::Name)[0].name, "Test");
        assert_eq!(board.timeline(&FilterState::new())[2].bars.len(), 1);
        assert!(board.drag_controller().is_some());
        assert!(board.rescheduler().is_some());
        assert!(board.is_live());
    }

    #[tokio::test]
    async fn non_member_board_is_read_only() {
        let backend = backend_with_tasks(false).await;
        let (board, _notices) = Board::open(backend, project(), Actor::new("eve", "Eve"), BoardOptions::default())
            .await
            .unwrap();
        assert_eq!(board.tasks().len(), 2);
        assert!(board.drag_controller().is_none());
        assert!(board.rescheduler().is_none());
        assert!(!board.coordinator().can_mutate());
    }

    #[tokio::test]
    async fn other_clients_changes_show_up() {
        let backend = backend_with_tasks(true).await;
        let (board, _notices) = Board::open(
            Arc::clone(&backend),
            project(),
            Actor::new("ana", "Ana"),
            BoardOptions::default(),
        )
        .await
        .unwrap();
        let mut changes = board.changes();
        let target = board.tasks()[0].clone();
        backend
            .external_update(&target.id, &TaskChange::default().with_priority(Priority::Urgent))
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), changes.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            board.store().snapshot(&target.id).map(|t| t.priority),
            Some(Priority::Urgent)
        );
    }

    #[tokio::test]
    async fn close_releases_the_feed() {
        let backend = backend_with_tasks(true).await;
        let (board, _notices) = Board::open(
            Arc::clone(&backend),
            project(),
            Actor::new("ana", "Ana"),
            BoardOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(backend.open_feeds(&project()), 1);
        board.close();
        assert_eq!(backend.open_feeds(&project()), 0);
    }

    #[tokio::test]
    async fn delete_pushed_during_fetch_stays_deleted() {
        let backend = backend_with_tasks(true).await;
        let doomed = backend
            .fetch_tasks(&project())
            .await
            .unwrap()
            .into_iter()
            .find(|t| t.name == "Write")
            .unwrap();

        backend.hold_responses();
        let opening = tokio::spawn(Board::open(
            Arc::clone(&backend),
            project(),
            Actor::new("ana", "Ana"),
            BoardOptions::default(),
        ));
        let fetches = || {
            backend
                .calls()
                .iter()
                .filter(|c| matches!(c, BackendCall::FetchTasks(_)))
                .count()
        };
        while fetches() < 2 {
            tokio::task::yield_now().await;
        }

        // The fetch has already read the tables; the delete lands after it.
        let deleting = {
            let backend = Arc::clone(&backend);
            let id = doomed.id.clone();
            tokio::spawn(async move { backend.delete_task(&id).await })
        };
        while backend.task(&doomed.id).is_some() {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        backend.release_responses();
        deleting.await.unwrap().unwrap();
        let (board, _notices) = opening.await.unwrap().unwrap();
        assert!(board.store().snapshot(&doomed.id).is_none());
        assert_eq!(board.tasks().len(), 1);
    }
}
