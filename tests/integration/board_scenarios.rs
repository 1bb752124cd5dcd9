//! End-to-end board scenarios over the in-process backend.
//!
//! Covers the write path (optimistic apply, confirm, rollback, busy
//! rejection), the drag machine, comment counting, and how pushed change
//! events fold into an open board.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::redundant_clone)]

use std::sync::Arc;
use std::time::Duration;

use taskboard::board::{Board, BoardOptions};
use taskboard::coordinator::{BoardNotice, MutationError};
use taskboard::drag::DragOutcome;
use taskboard::remote::TaskBackend;
use taskboard::remote::loopback::{BackendCall, LoopbackBackend};
use taskboard_proto::change::{TaskChange, TaskDraft};
use taskboard_proto::feed::ChangeEvent;
use taskboard_proto::task::{Actor, Priority, ProjectId, Task, TaskId, TaskStatus, Timestamp};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn project() -> ProjectId {
    ProjectId::new("ops")
}

fn ana() -> Actor {
    Actor::new("ana", "Ana")
}

/// A backend where Ana is a member and one task per name sits in Todo.
async fn backend_with(names: &[&str]) -> Arc<LoopbackBackend> {
    let backend = Arc::new(LoopbackBackend::new(ana()));
    backend.add_member(&project(), &ana().id);
    for name in names {
        backend
            .create_task(&project(), &TaskDraft::new(*name))
            .await
            .unwrap();
    }
    backend
}

async fn open(backend: &Arc<LoopbackBackend>) -> (Board<LoopbackBackend>, mpsc::Receiver<BoardNotice>) {
    Board::open(Arc::clone(backend), project(), ana(), BoardOptions::default())
        .await
        .unwrap()
}

fn task_named(board: &Board<LoopbackBackend>, name: &str) -> Task {
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
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Pushes a marker insert and waits for it, so every earlier event has been folded.
async fn drain_feed(board: &Board<LoopbackBackend>, backend: &LoopbackBackend) {
    let marker = TaskDraft::new("marker").into_task(TaskId::generate(), project(), Timestamp::now());
    backend.publish(&project(), &ChangeEvent::Insert(marker.clone()));
    wait_until(|| board.store().snapshot(&marker.id).is_some()).await;
    board.store().write(|s| s.remove(&marker.id));
}

fn failure_notices(notices: &mut mpsc::Receiver<BoardNotice>) -> usize {
    let mut count = 0;
    while let Ok(notice) = notices.try_recv() {
        if matches!(notice, BoardNotice::MutationFailed { .. }) {
            count += 1;
        }
    }
    count
}

// ---------------------------------------------------------------------------
// Mutation outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn confirmed_mutation_leaves_the_server_record() {
    let backend = backend_with(&["Write"]).await;
    let (board, _notices) = open(&backend).await;
    let task = task_named(&board, "Write");

    let change = TaskChange::status(TaskStatus::Review).with_priority(Priority::High);
    let confirmed = board.coordinator().mutate(&task.id, change).await.unwrap();

    let server = backend.task(&task.id).unwrap();
    assert_eq!(confirmed, server);
    assert_eq!(board.store().snapshot(&task.id), Some(server));
}

#[tokio::test]
async fn failed_mutation_restores_the_exact_snapshot() {
    let backend = backend_with(&["Write"]).await;
    let (board, mut notices) = open(&backend).await;
    let task = task_named(&board, "Write");
    let before = board.store().snapshot(&task.id).unwrap();

    backend.fail_next("database unavailable");
    let change = TaskChange::default()
        .with_name("Rewrite")
        .with_description(Some("all of it".to_string()));
    let err = board.coordinator().mutate(&task.id, change).await.unwrap_err();

    assert!(matches!(err, MutationError::Remote(_)));
    assert_eq!(board.store().snapshot(&task.id), Some(before));
    assert_eq!(failure_notices(&mut notices), 1);
}

#[tokio::test]
async fn second_write_to_a_busy_task_is_rejected() {
    let backend = backend_with(&["Write"]).await;
    let (board, mut notices) = open(&backend).await;
    let task = task_named(&board, "Write");
    let coordinator = Arc::clone(board.coordinator());

    backend.pause_writes();
    let first = {
        let coordinator = Arc::clone(&coordinator);
        let id = task.id.clone();
        tokio::spawn(async move {
            coordinator
                .mutate(&id, TaskChange::status(TaskStatus::InProgress))
                .await
        })
    };
    wait_until(|| coordinator.is_busy(&task.id)).await;
    let optimistic = board.store().snapshot(&task.id).unwrap();
    assert_eq!(optimistic.status, TaskStatus::InProgress);

    let second = coordinator
        .mutate(&task.id, TaskChange::status(TaskStatus::Done))
        .await;
    assert_eq!(second, Err(MutationError::Busy(task.id.clone())));
    assert_eq!(board.store().snapshot(&task.id), Some(optimistic));
    assert!(matches!(
        notices.try_recv(),
        Ok(BoardNotice::Busy { task_id }) if task_id == task.id
    ));

    backend.resume_writes();
    let confirmed = first.await.unwrap().unwrap();
    assert_eq!(confirmed.status, TaskStatus::InProgress);
    assert!(!coordinator.is_busy(&task.id));
}

#[tokio::test]
async fn teammate_commit_before_our_answer_survives_confirmation() {
    let backend = backend_with(&["Write"]).await;
    let (board, _notices) = open(&backend).await;
    let task = task_named(&board, "Write");
    let coordinator = Arc::clone(board.coordinator());

    backend.hold_responses();
    let ours = {
        let coordinator = Arc::clone(&coordinator);
        let id = task.id.clone();
        tokio::spawn(async move { coordinator.move_to_lane(&id, TaskStatus::Review).await })
    };
    wait_until(|| backend.task(&task.id).is_some_and(|t| t.status == TaskStatus::Review)).await;

    let theirs = backend
        .external_update(&task.id, &TaskChange::default().with_priority(Priority::Urgent))
        .unwrap();
    wait_until(|| board.store().snapshot(&task.id).is_some_and(|t| t.priority == Priority::Urgent)).await;

    backend.release_responses();
    let confirmed = ours.await.unwrap().unwrap();
    assert_eq!(confirmed.priority, Priority::Medium);
    assert_eq!(board.store().snapshot(&task.id), Some(theirs.clone()));
    assert_eq!(backend.task(&task.id), Some(theirs));
}

#[tokio::test]
async fn writes_to_different_tasks_run_side_by_side() {
    let backend = backend_with(&["Write", "Test"]).await;
    let (board, _notices) = open(&backend).await;
    let write = task_named(&board, "Write");
    let test = task_named(&board, "Test");
    let coordinator = board.coordinator();

    let (a, b) = tokio::join!(
        coordinator.move_to_lane(&write.id, TaskStatus::Done),
        coordinator.move_to_lane(&test.id, TaskStatus::Review),
    );
    assert_eq!(a.unwrap().status, TaskStatus::Done);
    assert_eq!(b.unwrap().status, TaskStatus::Review);
}

// ---------------------------------------------------------------------------
// Drag transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dropping_on_the_origin_lane_sends_nothing() {
    let backend = backend_with(&["Write"]).await;
    let (board, _notices) = open(&backend).await;
    let task = task_named(&board, "Write");
    let drag = board.drag_controller().unwrap();

    drag.start(&task.id).unwrap();
    assert_eq!(drag.drop_on(TaskStatus::Todo).await, Ok(DragOutcome::Unchanged));
    assert!(
        !backend
            .calls()
            .iter()
            .any(|c| matches!(c, BackendCall::UpdateTask(..)))
    );
}

#[tokio::test]
async fn failed_drag_of_commented_task_rolls_back_once() {
    let backend = backend_with(&[]).await;
    let mut t1 = TaskDraft::new("T1").into_task(TaskId::new("T1"), project(), Timestamp::now());
    t1.comment_count = 2;
    backend.seed(t1.clone());
    let (board, mut notices) = open(&backend).await;
    let drag = board.drag_controller().unwrap();

    backend.fail_next("write refused");
    drag.start(&t1.id).unwrap();
    let outcome = drag.drop_on(TaskStatus::InProgress).await.unwrap();

    assert!(matches!(outcome, DragOutcome::Failed(MutationError::Remote(_))));
    let after = board.store().snapshot(&t1.id).unwrap();
    assert_eq!(after.status, TaskStatus::Todo);
    assert_eq!(after.comment_count, 2);
    assert_eq!(after, t1);
    assert_eq!(failure_notices(&mut notices), 1);
}

#[tokio::test]
async fn read_only_board_has_no_drag_source() {
    let backend = backend_with(&["Write"]).await;
    let eve = Actor::new("eve", "Eve");
    let viewer = Arc::new(backend.connect_as(eve.clone()));
    let (board, _notices) = Board::open(viewer, project(), eve, BoardOptions::default())
        .await
        .unwrap();
    let task = task_named(&board, "Write");

    assert!(board.drag_controller().is_none());
    let err = board
        .coordinator()
        .move_to_lane(&task.id, TaskStatus::Done)
        .await
        .unwrap_err();
    assert_eq!(err, MutationError::PermissionDenied);
    assert_eq!(backend.write_count(), 1);
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

#[tokio::test]
async fn comment_round_trip_restores_the_count() {
    let backend = backend_with(&["Write"]).await;
    let (board, _notices) = open(&backend).await;
    let task = task_named(&board, "Write");
    let coordinator = board.coordinator();
    let before = task.comment_count;

    let comment = coordinator.add_comment(&task.id, "Looks good").await.unwrap();
    assert_eq!(
        board.store().snapshot(&task.id).unwrap().comment_count,
        before + 1
    );
    assert_eq!(coordinator.comments(&task.id), vec![comment.clone()]);

    coordinator.delete_comment(&task.id, &comment.id).await.unwrap();
    drain_feed(&board, &backend).await;
    assert_eq!(board.store().snapshot(&task.id).unwrap().comment_count, before);
    assert!(coordinator.comments(&task.id).is_empty());
}

// ---------------------------------------------------------------------------
// Pushed changes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_push_does_not_overwrite_newer_record() {
    let backend = backend_with(&["Write"]).await;
    let (board, _notices) = open(&backend).await;
    let task = task_named(&board, "Write");
    let current = board
        .coordinator()
        .move_to_lane(&task.id, TaskStatus::Review)
        .await
        .unwrap();

    let mut stale = task.clone();
    stale.name = "Old name".to_string();
    backend.publish(&project(), &ChangeEvent::Update(stale));
    drain_feed(&board, &backend).await;

    assert_eq!(board.store().snapshot(&task.id), Some(current));
}

#[tokio::test]
async fn pushed_delete_of_unknown_task_is_ignored() {
    let backend = backend_with(&["Write", "Test"]).await;
    let (board, mut notices) = open(&backend).await;
    let before = board.tasks();

    backend.publish(&project(), &ChangeEvent::Delete(TaskId::new("T2")));
    drain_feed(&board, &backend).await;

    assert_eq!(board.tasks(), before);
    assert!(board.is_live());
    assert!(notices.try_recv().is_err());
}

#[tokio::test]
async fn teammate_changes_reach_every_projection() {
    let backend = backend_with(&["Write"]).await;
    let (board, _notices) = open(&backend).await;
    let task = task_named(&board, "Write");
    let mut changes = board.changes();

    backend.external_update(&task.id, &TaskChange::status(TaskStatus::Done));
    tokio::time::timeout(Duration::from_secs(5), changes.changed())
        .await
        .unwrap()
        .unwrap();

    let lanes = board.lanes(&taskboard::filter::FilterState::new());
    assert!(lanes[0].tasks.is_empty());
    assert_eq!(lanes[3].tasks[0].id, task.id);
    assert_eq!(board.timeline(&taskboard::filter::FilterState::new())[3].bars.len(), 1);
}

#[tokio::test]
async fn closed_board_folds_nothing() {
    let backend = backend_with(&["Write"]).await;
    let (board, _notices) = open(&backend).await;
    let store = board.store().clone();
    let task = task_named(&board, "Write");
    board.close();

    backend.external_update(&task.id, &TaskChange::status(TaskStatus::Done));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.snapshot(&task.id).map(|t| t.status), Some(TaskStatus::Todo));
    assert_eq!(backend.open_feeds(&project()), 0);
}
