//! Property-based tests for the filter engine.
//!
//! Uses proptest to verify:
//! 1. The empty filter returns every task, in order.
//! 2. Combining two filters never yields a task either one alone rejects.
//! 3. Filtering is order-preserving and idempotent.
//! 4. Lanes partition exactly the filtered tasks.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::NaiveDate;
use proptest::prelude::*;
use taskboard::filter::{self, FilterState};
use taskboard::views;
use taskboard_proto::change::TaskDraft;
use taskboard_proto::task::{Actor, ActorId, Priority, ProjectId, Task, TaskId, TaskStatus, Timestamp};

const PEOPLE: [(&str, &str); 3] = [("ana", "Ana Lima"), ("bo", "Bo Chen"), ("cy", "Cy Park")];

fn arb_priority() -> impl Strategy<Value = Priority> {
    prop::sample::select(Priority::ALL.to_vec())
}

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::LANES.to_vec())
}

fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (1u32..=12, 1u32..=28).prop_map(|(m, d)| NaiveDate::from_ymd_opt(2024, m, d).unwrap())
}

fn arb_people() -> impl Strategy<Value = Vec<Actor>> {
    prop::sample::subsequence(PEOPLE.to_vec(), 0..=PEOPLE.len())
        .prop_map(|people| people.into_iter().map(|(id, name)| Actor::new(id, name)).collect())
}

fn arb_task() -> impl Strategy<Value = Task> {
    (
        "[a-d ]{1,8}",
        prop::option::of("[a-d]{0,6}"),
        arb_status(),
        arb_priority(),
        arb_people(),
        prop::option::of(arb_date()),
        0u64..1_000,
    )
        .prop_filter("name must not be blank", |(name, ..)| !name.trim().is_empty())
        .prop_map(|(name, description, status, priority, assignees, due, n)| {
            let mut task = TaskDraft::new(name)
                .with_status(status)
                .with_priority(priority)
                .into_task(TaskId::new("t"), ProjectId::new("ops"), Timestamp::from_millis(n));
            task.description = description;
            task.assignees = assignees;
            task.due_date = due;
            task
        })
}

fn arb_tasks() -> impl Strategy<Value = Vec<Task>> {
    prop::collection::vec(arb_task(), 0..24).prop_map(|mut tasks| {
        for (i, task) in tasks.iter_mut().enumerate() {
            task.id = TaskId::new(format!("t-{i}"));
        }
        tasks
    })
}

fn arb_filter() -> impl Strategy<Value = FilterState> {
    (
        prop::option::of("[a-d]{1,3}"),
        prop::collection::btree_set(arb_priority(), 0..3),
        prop::collection::btree_set(prop::sample::select(vec!["ana", "bo", "cy"]), 0..3),
        prop::option::of(arb_date()),
        prop::option::of(arb_date()),
        any::<bool>(),
    )
        .prop_map(|(search, priorities, assignees, from, until, mine)| {
            let mut filter = FilterState::new().with_due_range(from, until);
            if let Some(text) = search {
                filter = filter.with_search(text);
            }
            for priority in priorities {
                filter = filter.with_priority(priority);
            }
            for id in assignees {
                filter = filter.with_assignee(ActorId::new(id));
            }
            if mine { filter.mine_only() } else { filter }
        })
}

fn arb_actor() -> impl Strategy<Value = Option<ActorId>> {
    prop::option::of(prop::sample::select(vec!["ana", "bo", "zed"]).prop_map(ActorId::new))
}

fn ids(tasks: &[&Task]) -> Vec<TaskId> {
    tasks.iter().map(|t| t.id.clone()).collect()
}

proptest! {
    #[test]
    fn empty_filter_is_identity(tasks in arb_tasks(), actor in arb_actor()) {
        let kept = filter::apply(&tasks, &FilterState::new(), actor.as_ref());
        let all: Vec<&Task> = tasks.iter().collect();
        prop_assert_eq!(kept, all);
    }

    #[test]
    fn combined_filter_is_subset_of_each(
        tasks in arb_tasks(),
        a in arb_filter(),
        b in arb_filter(),
        actor in arb_actor(),
    ) {
        let both = ids(&filter::apply_all(&tasks, &[a.clone(), b.clone()], actor.as_ref()));
        let only_a = ids(&filter::apply(&tasks, &a, actor.as_ref()));
        let only_b = ids(&filter::apply(&tasks, &b, actor.as_ref()));
        for id in &both {
            prop_assert!(only_a.contains(id));
            prop_assert!(only_b.contains(id));
        }
    }

    #[test]
    fn filtering_twice_changes_nothing(tasks in arb_tasks(), f in arb_filter(), actor in arb_actor()) {
        let once: Vec<Task> = filter::apply(&tasks, &f, actor.as_ref()).into_iter().cloned().collect();
        let twice = filter::apply(&once, &f, actor.as_ref());
        prop_assert_eq!(twice.len(), once.len());

        // Input order survives.
        let positions: Vec<usize> = once
            .iter()
            .map(|t| tasks.iter().position(|u| u.id == t.id).unwrap())
            .collect();
        prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn lanes_partition_the_filtered_tasks(tasks in arb_tasks(), f in arb_filter(), actor in arb_actor()) {
        let lanes = views::lanes(&tasks, &f, actor.as_ref());
        prop_assert_eq!(lanes.len(), TaskStatus::LANES.len());
        let laned: usize = lanes.iter().map(|l| l.tasks.len()).sum();
        prop_assert_eq!(laned, filter::apply(&tasks, &f, actor.as_ref()).len());
        for lane in &lanes {
            prop_assert!(lane.tasks.iter().all(|t| t.status == lane.status));
        }
    }

    #[test]
    fn mine_only_without_actor_matches_nothing(tasks in arb_tasks()) {
        let kept = filter::apply(&tasks, &FilterState::new().mine_only(), None);
        prop_assert!(kept.is_empty());
    }
}
