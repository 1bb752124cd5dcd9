//! Property-based wire tests for `taskboard-proto`.
//!
//! Uses proptest to verify:
//! 1. Any task survives a trip through a hub `Event` frame.
//! 2. Random bytes never cause a panic in `hub::decode` (returns `Err` gracefully).
//! 3. Status and priority names parse back to the value that printed them.
//! 4. `TaskChange::apply_to` is idempotent.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::NaiveDate;
use proptest::prelude::*;
use taskboard_proto::change::TaskChange;
use taskboard_proto::feed::ChangeEvent;
use taskboard_proto::hub::{self, HubMessage};
use taskboard_proto::task::{
    Actor, ActorId, Priority, ProjectId, Task, TaskId, TaskStatus, Timestamp,
};

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::LANES.to_vec())
}

fn arb_priority() -> impl Strategy<Value = Priority> {
    prop::sample::select(Priority::ALL.to_vec())
}

fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (2000i32..2100, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn arb_actor() -> impl Strategy<Value = Actor> {
    ("[a-z]{1,8}", "[A-Za-z ]{0,16}", prop::option::of("[a-z/:.]{1,24}")).prop_map(
        |(id, display_name, avatar)| Actor {
            id: ActorId::new(id),
            display_name,
            avatar,
        },
    )
}

fn arb_task() -> impl Strategy<Value = Task> {
    (
        ("[a-f0-9-]{1,36}", "[a-z]{1,8}", "[^\x00]{1,64}"),
        prop::option::of("[^\x00]{0,128}"),
        arb_status(),
        arb_priority(),
        prop::collection::vec(arb_actor(), 0..4),
        (prop::option::of(arb_date()), prop::option::of(arb_date())),
        any::<u32>(),
        (any::<u64>(), prop::option::of(any::<u64>())),
    )
        .prop_map(
            |(
                (id, project, name),
                description,
                status,
                priority,
                assignees,
                (started_at, due_date),
                comment_count,
                (created, updated),
            )| Task {
                id: TaskId::new(id),
                project_id: ProjectId::new(project),
                name,
                description,
                status,
                priority,
                assignees,
                started_at,
                due_date,
                comment_count,
                created_at: Timestamp::from_millis(created),
                updated_at: updated.map(Timestamp::from_millis),
            },
        )
}

fn arb_change() -> impl Strategy<Value = TaskChange> {
    (
        prop::option::of(arb_status()),
        prop::option::of(arb_priority()),
        prop::option::of(prop::option::of(arb_date())),
        prop::option::of("[a-z ]{1,16}"),
    )
        .prop_map(|(status, priority, due_date, name)| TaskChange {
            name,
            status,
            priority,
            due_date,
            ..TaskChange::default()
        })
}

proptest! {
    #[test]
    fn task_survives_event_frame(task in arb_task()) {
        let msg = HubMessage::Event {
            project_id: task.project_id.clone(),
            event: ChangeEvent::Update(task),
        };
        let bytes = hub::encode(&msg).unwrap();
        prop_assert_eq!(hub::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn random_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = hub::decode(&bytes);
    }

    #[test]
    fn status_and_priority_names_round_trip(status in arb_status(), priority in arb_priority()) {
        prop_assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        prop_assert_eq!(priority.to_string().parse::<Priority>().unwrap(), priority);
    }

    #[test]
    fn applying_a_change_twice_equals_once(task in arb_task(), change in arb_change()) {
        let mut once = task.clone();
        change.apply_to(&mut once);
        let mut twice = once.clone();
        change.apply_to(&mut twice);
        prop_assert_eq!(once, twice);
    }
}
