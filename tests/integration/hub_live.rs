//! Boards talking to a real in-process hub over WebSockets.
//!
//! Two clients open the same project: Ana is a member and writes, Bo only
//! watches. Every confirmed write by Ana must show up on Bo's board.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use taskboard::board::{Board, BoardOptions};
use taskboard::coordinator::{BoardNotice, MutationError};
use taskboard::drag::DragOutcome;
use taskboard::filter::FilterState;
use taskboard::remote::hub::{HubClient, HubClientOptions};
use taskboard_hub::hub::{DEFAULT_MAX_FRAME_SIZE, HubState, start_server_with_state};
use taskboard_hub::tables::BoardTables;
use taskboard_proto::change::TaskDraft;
use taskboard_proto::task::{Actor, ActorId, ProjectId, Task, TaskId, TaskStatus, Timestamp};
use tokio::sync::mpsc;

fn project() -> ProjectId {
    ProjectId::new("ops")
}

struct Hub {
    url: String,
    state: Arc<HubState>,
    _handle: tokio::task::JoinHandle<()>,
}

async fn start_hub(seed: &[&str]) -> Hub {
    let mut tables = BoardTables::new();
    tables.add_member(&project(), ActorId::new("ana"));
    for name in seed {
        tables.insert_task(TaskDraft::new(*name).into_task(
            TaskId::generate(),
            project(),
            Timestamp::now(),
        ));
    }
    let state = Arc::new(HubState::new(tables, DEFAULT_MAX_FRAME_SIZE));
    let (addr, handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    Hub {
        url: format!("ws://{addr}/ws"),
        state,
        _handle: handle,
    }
}

async fn open_board(hub: &Hub, actor: Actor) -> (Board<HubClient>, mpsc::Receiver<BoardNotice>) {
    let client = HubClient::connect(&hub.url, actor.clone(), HubClientOptions::default())
        .await
        .unwrap();
    Board::open(Arc::new(client), project(), actor, BoardOptions::default())
        .await
        .unwrap()
}

fn task_named(board: &Board<HubClient>, name: &str) -> Task {
    board
        .tasks()
        .into_iter()
        .find(|t| t.name == name)
        .expect("task on board")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn boards_open_with_the_hub_tables() {
    let hub = start_hub(&["Write", "Test"]).await;
    let (ana, _) = open_board(&hub, Actor::new("ana", "Ana")).await;
    let (bo, _) = open_board(&hub, Actor::new("bo", "Bo")).await;

    assert_eq!(ana.tasks().len(), 2);
    assert_eq!(bo.tasks(), ana.tasks());
    assert!(ana.coordinator().can_mutate());
    assert!(!bo.coordinator().can_mutate());
    assert!(bo.drag_controller().is_none());
    assert_eq!(hub.state.subscriber_count(&project()).await, 2);
}

#[tokio::test]
async fn drag_by_one_client_moves_the_card_for_the_other() {
    let hub = start_hub(&["Write"]).await;
    let (ana, _) = open_board(&hub, Actor::new("ana", "Ana")).await;
    let (bo, _) = open_board(&hub, Actor::new("bo", "Bo")).await;
    let task = task_named(&ana, "Write");

    let drag = ana.drag_controller().unwrap();
    drag.start(&task.id).unwrap();
    let DragOutcome::Moved(moved) = drag.drop_on(TaskStatus::Review).await.unwrap() else {
        panic!("drop should be confirmed");
    };
    assert_eq!(ana.store().snapshot(&task.id), Some(moved.clone()));

    wait_until(|| bo.store().snapshot(&task.id) == Some(moved.clone())).await;
    let lanes = bo.lanes(&FilterState::new());
    assert_eq!(lanes[2].tasks[0].id, task.id);
}

#[tokio::test]
async fn created_and_deleted_tasks_propagate() {
    let hub = start_hub(&[]).await;
    let (ana, _) = open_board(&hub, Actor::new("ana", "Ana")).await;
    let (bo, _) = open_board(&hub, Actor::new("bo", "Bo")).await;

    let created = ana
        .coordinator()
        .create(TaskDraft::new("Ship").with_status(TaskStatus::InProgress))
        .await
        .unwrap();
    assert_eq!(ana.tasks(), vec![created.clone()]);
    wait_until(|| bo.store().snapshot(&created.id).is_some()).await;

    ana.coordinator().delete(&created.id).await.unwrap();
    wait_until(|| ana.tasks().is_empty() && bo.tasks().is_empty()).await;
    assert_eq!(hub.state.tables().read().await.task_count(), 0);
}

#[tokio::test]
async fn comments_update_the_count_everywhere() {
    let hub = start_hub(&["Write"]).await;
    let (ana, _) = open_board(&hub, Actor::new("ana", "Ana")).await;
    let (bo, _) = open_board(&hub, Actor::new("bo", "Bo")).await;
    let task = task_named(&ana, "Write");

    let comment = ana
        .coordinator()
        .add_comment(&task.id, "Needs a test")
        .await
        .unwrap();
    assert_eq!(comment.author.id, ActorId::new("ana"));
    wait_until(|| bo.store().snapshot(&task.id).is_some_and(|t| t.comment_count == 1)).await;

    let thread = bo.coordinator().load_comments(&task.id).await.unwrap();
    assert_eq!(thread, vec![comment]);
}

#[tokio::test]
async fn read_only_viewer_cannot_write() {
    let hub = start_hub(&["Write"]).await;
    let (bo, mut notices) = open_board(&hub, Actor::new("bo", "Bo")).await;
    let task = task_named(&bo, "Write");

    let err = bo
        .coordinator()
        .move_to_lane(&task.id, TaskStatus::Done)
        .await
        .unwrap_err();
    assert_eq!(err, MutationError::PermissionDenied);
    assert_eq!(bo.store().snapshot(&task.id), Some(task));
    assert!(notices.try_recv().is_err());
}

#[tokio::test]
async fn update_of_task_deleted_elsewhere_rolls_back() {
    let hub = start_hub(&["Write"]).await;
    let (ana, mut notices) = open_board(&hub, Actor::new("ana", "Ana")).await;
    let task = task_named(&ana, "Write");

    // Straight into the tables, so no delete event reaches the board.
    hub.state
        .tables()
        .write()
        .await
        .delete_task(&Actor::new("ana", "Ana"), &task.id)
        .unwrap();

    let err = ana
        .coordinator()
        .move_to_lane(&task.id, TaskStatus::Done)
        .await
        .unwrap_err();
    assert!(matches!(err, MutationError::Remote(_)));
    assert_eq!(ana.store().snapshot(&task.id), Some(task));
    assert!(matches!(
        notices.try_recv(),
        Ok(BoardNotice::MutationFailed { .. })
    ));
}

#[tokio::test]
async fn closing_a_board_drops_its_subscription() {
    let hub = start_hub(&[]).await;
    let (ana, _) = open_board(&hub, Actor::new("ana", "Ana")).await;
    let (bo, _) = open_board(&hub, Actor::new("bo", "Bo")).await;
    assert_eq!(hub.state.subscriber_count(&project()).await, 2);

    bo.close();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while hub.state.subscriber_count(&project()).await != 1 {
        assert!(tokio::time::Instant::now() < deadline, "hub kept the subscription");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(ana.is_live());
}
