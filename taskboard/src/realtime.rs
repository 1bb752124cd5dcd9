//! Realtime listener: folds the project's change feed into the task store.
//!
//! Pushed records are already authorized by the backend, so folding is not
//! gated. Duplicates are absorbed by idempotent upsert/remove; an older
//! record for the same task loses to the stored one by `updated_at`.

use std::sync::Arc;

use parking_lot::Mutex;
use taskboard_proto::feed::ChangeEvent;
use taskboard_proto::task::ProjectId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::remote::{FeedRelease, FeedSource, RemoteError};
use crate::store::{SharedStore, TaskStore, Upsert};

/// What folding one event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fold {
    /// The record was inserted or replaced.
    Applied,
    /// The record was older than the stored one and dropped.
    Stale,
    /// The task was removed.
    Removed,
    /// Delete for a task the store does not hold.
    Absent,
    /// The record belongs to another project.
    Ignored,
}

/// Applies one feed event to `store`.
pub fn fold_event(store: &mut TaskStore, project_id: &ProjectId, event: &ChangeEvent) -> Fold {
    match event {
        ChangeEvent::Insert(task) | ChangeEvent::Update(task) => {
            if task.project_id != *project_id {
                return Fold::Ignored;
            }
            match store.upsert(task.clone()) {
                Upsert::Inserted | Upsert::Updated => Fold::Applied,
                Upsert::Stale => Fold::Stale,
            }
        }
        ChangeEvent::Delete(task_id) => {
            if store.remove_pushed(task_id).is_some() {
                Fold::Removed
            } else {
                Fold::Absent
            }
        }
    }
}

/// Entry point for change-feed subscriptions.
pub struct RealtimeListener;

impl RealtimeListener {
    /// Opens the feed for `project_id` and starts folding it into `store`.
    ///
    /// `on_event` sees every folded event with its result. It runs while the
    /// subscription's close lock is held and must not close the subscription
    /// itself.
    ///
    /// # Errors
    ///
    /// Returns the source's error if the feed cannot be opened.
    pub async fn subscribe<S, F>(
        source: &S,
        project_id: &ProjectId,
        store: SharedStore,
        on_event: F,
    ) -> Result<Subscription, RemoteError>
    where
        S: FeedSource,
        F: FnMut(&ChangeEvent, Fold) + Send + 'static,
    {
        let (events, release) = source.open_feed(project_id).await?.into_parts();
        let open = Arc::new(Mutex::new(true));
        let pump = tokio::spawn(pump(
            events,
            project_id.clone(),
            store,
            Arc::clone(&open),
            on_event,
        ));
        tracing::info!(project_id = %project_id, "realtime subscription open");
        Ok(Subscription {
            project_id: project_id.clone(),
            open,
            release,
            pump: Some(pump),
        })
    }
}

async fn pump<F>(
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    project_id: ProjectId,
    store: SharedStore,
    open: Arc<Mutex<bool>>,
    mut on_event: F,
) where
    F: FnMut(&ChangeEvent, Fold) + Send + 'static,
{
    while let Some(event) = events.recv().await {
        if !deliver(&open, &store, &project_id, &event, &mut on_event) {
            return;
        }
    }
    tracing::debug!(project_id = %project_id, "change feed ended");
}

/// Folds one event unless the subscription was closed. Returns `false` once closed.
fn deliver<F>(
    open: &Mutex<bool>,
    store: &SharedStore,
    project_id: &ProjectId,
    event: &ChangeEvent,
    on_event: &mut F,
) -> bool
where
    F: FnMut(&ChangeEvent, Fold),
{
    let open = open.lock();
    if !*open {
        return false;
    }
    let fold = store.write(|s| fold_event(s, project_id, event));
    match fold {
        Fold::Applied | Fold::Removed => {
            tracing::trace!(task_id = %event.task_id(), operation = %event.operation(), ?fold, "change folded");
        }
        Fold::Stale | Fold::Absent | Fold::Ignored => {
            tracing::debug!(task_id = %event.task_id(), operation = %event.operation(), ?fold, "change absorbed");
        }
    }
    on_event(event, fold);
    drop(open);
    true
}

/// Live change-feed subscription for one project.
///
/// Closing (explicitly or by drop) is synchronous: once it returns no event
/// will be folded and no callback will run.
#[derive(Debug)]
pub struct Subscription {
    project_id: ProjectId,
    open: Arc<Mutex<bool>>,
    release: FeedRelease,
    pump: Option<JoinHandle<()>>,
}

impl Subscription {
    /// The subscribed project.
    #[must_use]
    pub const fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Whether events are still being folded.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Tears the subscription down. Idempotent.
    pub fn close(&mut self) {
        {
            let mut open = self.open.lock();
            if !*open {
                return;
            }
            *open = false;
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.release.release();
        tracing::info!(project_id = %self.project_id, "realtime subscription closed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
