//! In-process backend for tests and offline use.
//!
//! [`LoopbackBackend`] keeps task and comment tables in memory and behaves
//! like the hub does: it checks membership on every write, assigns ids and
//! strictly increasing `updated_at` stamps, recomputes comment counts, and
//! pushes a [`ChangeEvent`] to every open feed of the affected project.
//!
//! Tests steer it with one-shot faults ([`LoopbackBackend::fail_next`],
//! [`LoopbackBackend::disconnect_next`], [`LoopbackBackend::stall_next`]),
//! by pausing writes mid-flight, and by reading the recorded call log.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use taskboard_proto::change::{TaskChange, TaskDraft};
use taskboard_proto::comment::{Comment, CommentId};
use taskboard_proto::feed::ChangeEvent;
use taskboard_proto::task::{Actor, ActorId, ProjectId, Task, TaskId, Timestamp};
use tokio::sync::{mpsc, watch};

use super::{FeedReceiver, FeedRelease, FeedSource, MembershipSource, RemoteError, TaskBackend};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    /// `fetch_tasks`.
    FetchTasks(ProjectId),
    /// `is_member`.
    Membership(ProjectId, ActorId),
    /// `open_feed`.
    OpenFeed(ProjectId),
    /// `create_task`.
    CreateTask(ProjectId),
    /// `update_task`.
    UpdateTask(TaskId, TaskChange),
    /// `delete_task`.
    DeleteTask(TaskId),
    /// `list_comments`.
    ListComments(TaskId),
    /// `add_comment`.
    AddComment(TaskId),
    /// `edit_comment`.
    EditComment(TaskId, CommentId),
    /// `delete_comment`.
    DeleteComment(TaskId, CommentId),
}

impl BackendCall {
    /// Returns `true` for calls that write.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        !matches!(
            self,
            Self::FetchTasks(_) | Self::Membership(..) | Self::OpenFeed(_) | Self::ListComments(_)
        )
    }
}

/// A one-shot fault consumed by the next write.
#[derive(Debug, Clone)]
enum Fault {
    Reject(String),
    Disconnect,
    Stall,
}

type Broadcast = Option<(ProjectId, ChangeEvent)>;

#[derive(Default)]
struct State {
    tasks: HashMap<TaskId, Task>,
    comments: HashMap<TaskId, Vec<Comment>>,
    members: HashMap<ProjectId, HashSet<ActorId>>,
    feeds: HashMap<u64, (ProjectId, mpsc::UnboundedSender<ChangeEvent>)>,
    next_feed: u64,
    calls: Vec<BackendCall>,
    faults: VecDeque<Fault>,
    membership_down: bool,
    clock: u64,
}

impl State {
    /// Next server stamp: strictly after both the global clock and `previous`.
    fn stamp(&mut self, previous: Option<Timestamp>) -> Timestamp {
        let floor = previous
            .map_or(0, |p| p.as_millis().saturating_add(1))
            .max(self.clock.saturating_add(1));
        self.clock = Timestamp::now().as_millis().max(floor);
        Timestamp::from_millis(self.clock)
    }

    fn ensure_member(&self, project_id: &ProjectId, actor: &Actor) -> Result<(), RemoteError> {
        let allowed = self
            .members
            .get(project_id)
            .is_some_and(|m| m.contains(&actor.id));
        if allowed {
            Ok(())
        } else {
            Err(RemoteError::Rejected(format!(
                "{} is not a member of {project_id}",
                actor.id
            )))
        }
    }

    fn task_mut(&mut self, task_id: &TaskId) -> Result<&mut Task, RemoteError> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| RemoteError::Rejected(format!("task not found: {task_id}")))
    }

    fn project_of(&self, task_id: &TaskId) -> Result<ProjectId, RemoteError> {
        self.tasks
            .get(task_id)
            .map(|t| t.project_id.clone())
            .ok_or_else(|| RemoteError::Rejected(format!("task not found: {task_id}")))
    }

    /// Recomputes the cached count after a comment write and stamps the task.
    fn touch_comments(&mut self, task_id: &TaskId) -> Result<Task, RemoteError> {
        let count = self.comments.get(task_id).map_or(0, Vec::len);
        let previous = self.task_mut(task_id)?.updated_at;
        let stamp = self.stamp(previous);
        let task = self.task_mut(task_id)?;
        task.comment_count = u32::try_from(count).unwrap_or(u32::MAX);
        task.updated_at = Some(stamp);
        Ok(task.clone())
    }

    fn broadcast(&mut self, project_id: &ProjectId, event: &ChangeEvent) {
        self.feeds.retain(|_, (project, tx)| {
            project != project_id || tx.send(event.clone()).is_ok()
        });
    }
}

struct Shared {
    state: Mutex<State>,
    paused: watch::Sender<bool>,
    held: watch::Sender<bool>,
}

/// In-memory backend speaking for one connected actor.
///
/// Cloning yields another handle to the same tables and the same actor;
/// [`LoopbackBackend::connect_as`] opens the tables for a different actor.
#[derive(Clone)]
pub struct LoopbackBackend {
    actor: Actor,
    shared: Arc<Shared>,
}

impl LoopbackBackend {
    /// Creates an empty backend. Comments written through it are authored by `actor`.
    #[must_use]
    pub fn new(actor: Actor) -> Self {
        let (paused, _) = watch::channel(false);
        let (held, _) = watch::channel(false);
        Self {
            actor,
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                paused,
                held,
            }),
        }
    }

    /// Another connection to the same tables, speaking for `actor`.
    #[must_use]
    pub fn connect_as(&self, actor: Actor) -> Self {
        Self {
            actor,
            shared: Arc::clone(&self.shared),
        }
    }

    /// The actor this backend speaks for.
    #[must_use]
    pub const fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Grants `actor_id` write access to `project_id`.
    pub fn add_member(&self, project_id: &ProjectId, actor_id: &ActorId) {
        self.shared
            .state
            .lock()
            .members
            .entry(project_id.clone())
            .or_default()
            .insert(actor_id.clone());
    }

    /// Inserts a task directly, without an event.
    pub fn seed(&self, task: Task) {
        let mut state = self.shared.state.lock();
        if let Some(stamp) = task.updated_at {
            state.clock = state.clock.max(stamp.as_millis());
        }
        state.tasks.insert(task.id.clone(), task);
    }

    /// Inserts a comment directly, without an event. Does not touch the task.
    pub fn seed_comment(&self, comment: Comment) {
        self.shared
            .state
            .lock()
            .comments
            .entry(comment.task_id.clone())
            .or_default()
            .push(comment);
    }

    /// The backend's copy of a task.
    #[must_use]
    pub fn task(&self, task_id: &TaskId) -> Option<Task> {
        self.shared.state.lock().tasks.get(task_id).cloned()
    }

    /// The backend's copy of a comment thread.
    #[must_use]
    pub fn comments(&self, task_id: &TaskId) -> Vec<Comment> {
        self.shared
            .state
            .lock()
            .comments
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every call made so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.shared.state.lock().calls.clone()
    }

    /// Number of write calls made so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .calls
            .iter()
            .filter(|c| c.is_write())
            .count()
    }

    /// Number of feeds currently open for a project.
    #[must_use]
    pub fn open_feeds(&self, project_id: &ProjectId) -> usize {
        self.shared
            .state
            .lock()
            .feeds
            .values()
            .filter(|(p, tx)| p == project_id && !tx.is_closed())
            .count()
    }

    /// The next write is rejected with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.push_fault(Fault::Reject(reason.into()));
    }

    /// The next write fails as if the connection dropped.
    pub fn disconnect_next(&self) {
        self.push_fault(Fault::Disconnect);
    }

    /// The next write never answers.
    pub fn stall_next(&self) {
        self.push_fault(Fault::Stall);
    }

    /// Membership queries fail until further notice.
    pub fn fail_membership(&self) {
        self.shared.state.lock().membership_down = true;
    }

    /// Holds every write after it is recorded until [`LoopbackBackend::resume_writes`].
    pub fn pause_writes(&self) {
        self.shared.paused.send_replace(true);
    }

    /// Releases held writes.
    pub fn resume_writes(&self) {
        self.shared.paused.send_replace(false);
    }

    /// Lets writes commit and fetches read the tables, but holds their answers
    /// until [`LoopbackBackend::release_responses`].
    pub fn hold_responses(&self) {
        self.shared.held.send_replace(true);
    }

    /// Delivers held answers.
    pub fn release_responses(&self) {
        self.shared.held.send_replace(false);
    }

    /// Writes a change on behalf of another client and broadcasts it.
    pub fn external_update(&self, task_id: &TaskId, change: &TaskChange) -> Option<Task> {
        let mut state = self.shared.state.lock();
        let previous = state.tasks.get(task_id)?.updated_at;
        let stamp = state.stamp(previous);
        let task = state.tasks.get_mut(task_id)?;
        change.apply_to(task);
        task.updated_at = Some(stamp);
        let task = task.clone();
        state.broadcast(&task.project_id.clone(), &ChangeEvent::Update(task.clone()));
        Some(task)
    }

    /// Pushes a raw event to the project's feeds without touching the tables.
    pub fn publish(&self, project_id: &ProjectId, event: &ChangeEvent) {
        self.shared.state.lock().broadcast(project_id, event);
    }

    fn push_fault(&self, fault: Fault) {
        self.shared.state.lock().faults.push_back(fault);
    }

    fn record(&self, call: BackendCall) {
        self.shared.state.lock().calls.push(call);
    }

    async fn write<T, F>(&self, call: BackendCall, op: F) -> Result<T, RemoteError>
    where
        F: FnOnce(&mut State, &Actor) -> Result<(T, Broadcast), RemoteError> + Send,
    {
        let fault = {
            let mut state = self.shared.state.lock();
            state.calls.push(call);
            state.faults.pop_front()
        };

        let mut paused = self.shared.paused.subscribe();
        let _ = paused.wait_for(|p| !*p).await;

        match fault {
            Some(Fault::Reject(reason)) => return Err(RemoteError::Rejected(reason)),
            Some(Fault::Disconnect) => return Err(RemoteError::ConnectionClosed),
            Some(Fault::Stall) => return std::future::pending().await,
            None => {}
        }

        let out = {
            let mut state = self.shared.state.lock();
            let (out, broadcast) = op(&mut state, &self.actor)?;
            if let Some((project_id, event)) = broadcast {
                tracing::debug!(project_id = %project_id, operation = %event.operation(), "loopback broadcast");
                state.broadcast(&project_id, &event);
            }
            out
        };
        Ok(self.answer(out).await)
    }

    async fn answer<T>(&self, out: T) -> T {
        let mut held = self.shared.held.subscribe();
        let _ = held.wait_for(|h| !*h).await;
        out
    }
}

impl TaskBackend for LoopbackBackend {
    async fn fetch_tasks(&self, project_id: &ProjectId) -> Result<Vec<Task>, RemoteError> {
        self.record(BackendCall::FetchTasks(project_id.clone()));
        let tasks: Vec<Task> = self
            .shared
            .state
            .lock()
            .tasks
            .values()
            .filter(|t| t.project_id == *project_id)
            .cloned()
            .collect();
        Ok(self.answer(tasks).await)
    }

    async fn create_task(&self, project_id: &ProjectId, draft: &TaskDraft) -> Result<Task, RemoteError> {
        draft
            .validate()
            .map_err(|e| RemoteError::Rejected(e.to_string()))?;
        self.write(BackendCall::CreateTask(project_id.clone()), |state, actor| {
            state.ensure_member(project_id, actor)?;
            let stamp = state.stamp(None);
            let task = draft
                .clone()
                .into_task(TaskId::generate(), project_id.clone(), stamp);
            state.tasks.insert(task.id.clone(), task.clone());
            Ok((
                task.clone(),
                Some((project_id.clone(), ChangeEvent::Insert(task))),
            ))
        })
        .await
    }

    async fn update_task(&self, task_id: &TaskId, change: &TaskChange) -> Result<Task, RemoteError> {
        change
            .validate()
            .map_err(|e| RemoteError::Rejected(e.to_string()))?;
        self.write(
            BackendCall::UpdateTask(task_id.clone(), change.clone()),
            |state, actor| {
                let project_id = state.project_of(task_id)?;
                state.ensure_member(&project_id, actor)?;
                let previous = state.task_mut(task_id)?.updated_at;
                let stamp = state.stamp(previous);
                let task = state.task_mut(task_id)?;
                change.apply_to(task);
                task.updated_at = Some(stamp);
                let task = task.clone();
                Ok((task.clone(), Some((project_id, ChangeEvent::Update(task)))))
            },
        )
        .await
    }

    async fn delete_task(&self, task_id: &TaskId) -> Result<(), RemoteError> {
        self.write(BackendCall::DeleteTask(task_id.clone()), |state, actor| {
            let project_id = state.project_of(task_id)?;
            state.ensure_member(&project_id, actor)?;
            state.tasks.remove(task_id);
            state.comments.remove(task_id);
            Ok(((), Some((project_id, ChangeEvent::Delete(task_id.clone())))))
        })
        .await
    }

    async fn list_comments(&self, task_id: &TaskId) -> Result<Vec<Comment>, RemoteError> {
        self.record(BackendCall::ListComments(task_id.clone()));
        Ok(self.comments(task_id))
    }

    async fn add_comment(&self, task_id: &TaskId, body: &str) -> Result<Comment, RemoteError> {
        Comment::validate_body(body).map_err(|e| RemoteError::Rejected(e.to_string()))?;
        self.write(BackendCall::AddComment(task_id.clone()), |state, actor| {
            let project_id = state.project_of(task_id)?;
            state.ensure_member(&project_id, actor)?;
            let comment = Comment {
                id: CommentId::generate(),
                task_id: task_id.clone(),
                author: actor.clone(),
                body: body.to_string(),
                created_at: Timestamp::now(),
                edited_at: None,
            };
            state
                .comments
                .entry(task_id.clone())
                .or_default()
                .push(comment.clone());
            let task = state.touch_comments(task_id)?;
            Ok((comment, Some((project_id, ChangeEvent::Update(task)))))
        })
        .await
    }

    async fn edit_comment(
        &self,
        task_id: &TaskId,
        comment_id: &CommentId,
        body: &str,
    ) -> Result<Comment, RemoteError> {
        Comment::validate_body(body).map_err(|e| RemoteError::Rejected(e.to_string()))?;
        self.write(
            BackendCall::EditComment(task_id.clone(), comment_id.clone()),
            |state, actor| {
                let project_id = state.project_of(task_id)?;
                state.ensure_member(&project_id, actor)?;
                let comment = state
                    .comments
                    .get_mut(task_id)
                    .and_then(|thread| thread.iter_mut().find(|c| c.id == *comment_id))
                    .ok_or_else(|| RemoteError::Rejected(format!("comment not found: {comment_id}")))?;
                comment.body = body.to_string();
                comment.edited_at = Some(Timestamp::now());
                Ok((comment.clone(), None))
            },
        )
        .await
    }

    async fn delete_comment(&self, task_id: &TaskId, comment_id: &CommentId) -> Result<(), RemoteError> {
        self.write(
            BackendCall::DeleteComment(task_id.clone(), comment_id.clone()),
            |state, actor| {
                let project_id = state.project_of(task_id)?;
                state.ensure_member(&project_id, actor)?;
                let thread = state.comments.entry(task_id.clone()).or_default();
                let before = thread.len();
                thread.retain(|c| c.id != *comment_id);
                if thread.len() == before {
                    return Err(RemoteError::Rejected(format!(
                        "comment not found: {comment_id}"
                    )));
                }
                let task = state.touch_comments(task_id)?;
                Ok(((), Some((project_id, ChangeEvent::Update(task)))))
            },
        )
        .await
    }
}

impl MembershipSource for LoopbackBackend {
    async fn is_member(&self, project_id: &ProjectId, actor_id: &ActorId) -> Result<bool, RemoteError> {
        self.record(BackendCall::Membership(project_id.clone(), actor_id.clone()));
        let state = self.shared.state.lock();
        if state.membership_down {
            return Err(RemoteError::Unreachable("membership service down".to_string()));
        }
        Ok(state
            .members
            .get(project_id)
            .is_some_and(|m| m.contains(actor_id)))
    }
}

impl FeedSource for LoopbackBackend {
    async fn open_feed(&self, project_id: &ProjectId) -> Result<FeedReceiver, RemoteError> {
        self.record(BackendCall::OpenFeed(project_id.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        let feed_id = {
            let mut state = self.shared.state.lock();
            let id = state.next_feed;
            state.next_feed += 1;
            state.feeds.insert(id, (project_id.clone(), tx));
            id
        };
        let shared = Arc::clone(&self.shared);
        Ok(FeedReceiver::new(
            rx,
            FeedRelease::new(move || {
                shared.state.lock().feeds.remove(&feed_id);
            }),
        ))
    }
}
