//! Task records and the identifiers, lanes, and priorities they carry.
//!
//! A [`Task`] belongs to exactly one lane at a time, named by its
//! [`TaskStatus`]. The lane order is fixed and exhaustive: every status maps
//! to one position in [`TaskStatus::LANES`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ProtoError;

/// Maximum allowed task name length in characters.
pub const MAX_TASK_NAME_LENGTH: usize = 256;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Wraps an existing identifier string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

pub(crate) use string_id;

string_id!(
    /// Opaque task identifier, stable across the local store and the hub.
    TaskId
);

string_id!(
    /// Identifier of a board (project).
    ProjectId
);

string_id!(
    /// Identifier of an actor (a user who can be assigned or comment).
    ActorId
);

impl TaskId {
    /// Generates a fresh time-ordered identifier (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

/// Milliseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Returns the UTC calendar day this timestamp falls on.
    #[must_use]
    pub fn to_date(&self) -> NaiveDate {
        i64::try_from(self.0)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .map_or(NaiveDate::MAX, |dt| dt.date_naive())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// The lane a task sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Not started.
    Todo,
    /// Actively being worked on.
    InProgress,
    /// Waiting for review.
    Review,
    /// Finished.
    Done,
}

impl TaskStatus {
    /// Every lane, in board order.
    pub const LANES: [Self; 4] = [Self::Todo, Self::InProgress, Self::Review, Self::Done];

    /// Position of this lane in [`TaskStatus::LANES`].
    #[must_use]
    pub const fn lane_index(self) -> usize {
        match self {
            Self::Todo => 0,
            Self::InProgress => 1,
            Self::Review => 2,
            Self::Done => 3,
        }
    }

    /// Canonical snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::LANES
            .into_iter()
            .find(|lane| lane.as_str() == s)
            .ok_or_else(|| ProtoError::UnknownStatus(s.to_string()))
    }
}

/// Task priority, ordered from least to most pressing.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Priority {
    /// Can wait.
    Low,
    /// The default.
    #[default]
    Medium,
    /// Should be picked up soon.
    High,
    /// Drop everything.
    Urgent,
}

impl Priority {
    /// Every priority, lowest first.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Urgent];

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtoError::UnknownPriority(s.to_string()))
    }
}

/// A person who can be assigned to tasks or author comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Stable identifier.
    pub id: ActorId,
    /// Name shown on cards and in search results.
    pub display_name: String,
    /// Avatar reference (URL or asset key), if any.
    pub avatar: Option<String>,
}

impl Actor {
    /// Creates an actor without an avatar.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: ActorId::new(id),
            display_name: display_name.into(),
            avatar: None,
        }
    }
}

/// A work item on a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,
    /// Board this task belongs to.
    pub project_id: ProjectId,
    /// Short name shown on the card.
    pub name: String,
    /// Longer free-form description.
    pub description: Option<String>,
    /// Current lane.
    pub status: TaskStatus,
    /// Priority.
    pub priority: Priority,
    /// Zero or more assignees.
    pub assignees: Vec<Actor>,
    /// Day work started, if set.
    pub started_at: Option<NaiveDate>,
    /// Day the task is due, if set.
    pub due_date: Option<NaiveDate>,
    /// Number of comments on the task (cached for display).
    pub comment_count: u32,
    /// When the task was created.
    pub created_at: Timestamp,
    /// When the task was last written. Drives last-write-wins.
    pub updated_at: Option<Timestamp>,
}

impl Task {
    /// Checks a task name against the length and emptiness rules.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::NameEmpty`] or [`ProtoError::NameTooLong`].
    pub fn validate_name(name: &str) -> Result<(), ProtoError> {
        if name.trim().is_empty() {
            return Err(ProtoError::NameEmpty);
        }
        if name.chars().count() > MAX_TASK_NAME_LENGTH {
            return Err(ProtoError::NameTooLong);
        }
        Ok(())
    }

    /// Returns `true` if the actor is one of the assignees.
    #[must_use]
    pub fn is_assigned_to(&self, actor: &ActorId) -> bool {
        self.assignees.iter().any(|a| a.id == *actor)
    }
}
