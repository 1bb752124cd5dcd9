//! WebSocket client for `taskboard-hub`.
//!
//! [`HubClient::connect`] opens one WebSocket connection, performs the
//! `Hello` / `Welcome` handshake, then splits the socket between a writer
//! task (fed by an unbounded channel) and a reader task that routes
//! responses to waiting requests by `request_id` and change events to the
//! feeds open for each project.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use taskboard_proto::change::{TaskChange, TaskDraft};
use taskboard_proto::comment::{Comment, CommentId};
use taskboard_proto::feed::ChangeEvent;
use taskboard_proto::hub::{self, HubMessage, HubRequest, HubResponse};
use taskboard_proto::task::{Actor, ActorId, ProjectId, Task, TaskId};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{FeedReceiver, FeedRelease, FeedSource, MembershipSource, RemoteError, TaskBackend};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for the WebSocket connect and the `Welcome` reply.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeouts for a [`HubClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubClientOptions {
    /// Bound on the WebSocket connect and on the handshake.
    pub connect_timeout: Duration,
    /// Bound on each request and on subscription confirmation.
    pub request_timeout: Duration,
}

impl Default for HubClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

type FeedSender = (u64, mpsc::UnboundedSender<ChangeEvent>);

/// Where inbound frames go.
#[derive(Default)]
struct Routes {
    pending: HashMap<u64, oneshot::Sender<HubResponse>>,
    feeds: HashMap<ProjectId, Vec<FeedSender>>,
    subscribing: HashMap<ProjectId, Vec<oneshot::Sender<()>>>,
}

impl Routes {
    fn dispatch_event(&mut self, project_id: &ProjectId, event: &ChangeEvent) {
        if let Some(feeds) = self.feeds.get_mut(project_id) {
            feeds.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        }
    }

    /// Drops every waiter and feed; their receivers observe the closed connection.
    fn close_all(&mut self) {
        self.pending.clear();
        self.feeds.clear();
        self.subscribing.clear();
    }
}

/// Removes a request's route if the caller stops waiting for it.
struct PendingRequest {
    request_id: u64,
    routes: Arc<Mutex<Routes>>,
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.routes.lock().pending.remove(&self.request_id);
    }
}

/// Connection to a board hub, implementing every backend trait.
pub struct HubClient {
    actor: Actor,
    hub_url: String,
    outgoing: mpsc::UnboundedSender<HubMessage>,
    routes: Arc<Mutex<Routes>>,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    request_timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl HubClient {
    /// Connects to `hub_url` and introduces `actor`.
    ///
    /// # Errors
    ///
    /// - [`RemoteError::Timeout`] if the connect or the handshake times out.
    /// - [`RemoteError::Unreachable`] if the hub cannot be reached.
    /// - [`RemoteError::Rejected`] if the hub refuses the handshake.
    /// - [`RemoteError::ConnectionClosed`] if the hub hangs up mid-handshake.
    pub async fn connect(
        hub_url: &str,
        actor: Actor,
        options: HubClientOptions,
    ) -> Result<Self, RemoteError> {
        let (ws_stream, _response) = tokio::time::timeout(options.connect_timeout, connect_async(hub_url))
            .await
            .map_err(|_| {
                tracing::warn!(url = hub_url, "hub WebSocket connect timed out");
                RemoteError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url = hub_url, err = %e, "hub WebSocket connect failed");
                map_ws_connect_error(e)
            })?;

        let (mut ws_sender, mut ws_reader) = ws_stream.split();

        let hello = hub::encode(&HubMessage::Hello {
            actor: actor.clone(),
        })?;
        ws_sender
            .send(Message::Binary(hello.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "failed to send Hello");
                RemoteError::ConnectionClosed
            })?;

        let reply = tokio::time::timeout(options.connect_timeout, ws_reader.next())
            .await
            .map_err(|_| {
                tracing::warn!(url = hub_url, "hub Welcome timed out");
                RemoteError::Timeout
            })?;

        match reply {
            Some(Ok(Message::Binary(data))) => match hub::decode(&data)? {
                HubMessage::Welcome { actor_id } => {
                    tracing::info!(actor_id = %actor_id, url = hub_url, "connected to board hub");
                }
                HubMessage::Error { reason } => {
                    tracing::warn!(reason = %reason, "hub refused handshake");
                    return Err(RemoteError::Rejected(reason));
                }
                other => {
                    tracing::warn!(?other, "unexpected hub message during handshake");
                    return Err(RemoteError::UnexpectedResponse(format!("{other:?}")));
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                tracing::warn!("hub closed connection during handshake");
                return Err(RemoteError::ConnectionClosed);
            }
            Some(Ok(_)) => {
                return Err(RemoteError::UnexpectedResponse(
                    "non-binary frame during handshake".to_string(),
                ));
            }
            Some(Err(e)) => {
                tracing::warn!(err = %e, "WebSocket error during handshake");
                return Err(RemoteError::ConnectionClosed);
            }
        }

        let connected = Arc::new(AtomicBool::new(true));
        let routes = Arc::new(Mutex::new(Routes::default()));
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        let writer_handle = tokio::spawn(writer_loop(ws_sender, outgoing_rx, Arc::clone(&connected)));
        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            Arc::clone(&routes),
            Arc::clone(&connected),
        ));

        Ok(Self {
            actor,
            hub_url: hub_url.to_string(),
            outgoing,
            routes,
            next_id: AtomicU64::new(1),
            connected,
            request_timeout: options.request_timeout,
            reader_handle,
            writer_handle,
        })
    }

    /// The hub URL this client is connected to.
    #[must_use]
    pub fn hub_url(&self) -> &str {
        &self.hub_url
    }

    /// The actor introduced in the handshake.
    #[must_use]
    pub const fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Whether the connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Sends one request and waits for its response.
    async fn request(&self, body: HubRequest) -> Result<HubResponse, RemoteError> {
        if !self.is_connected() {
            return Err(RemoteError::ConnectionClosed);
        }
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.routes.lock().pending.insert(request_id, tx);
        let _route = PendingRequest {
            request_id,
            routes: Arc::clone(&self.routes),
        };

        self.outgoing
            .send(HubMessage::Request { request_id, body })
            .map_err(|_| RemoteError::ConnectionClosed)?;

        match tokio::time::timeout(self.request_timeout, rx).await {
            Err(_) => {
                tracing::warn!(request_id, "hub request timed out");
                Err(RemoteError::Timeout)
            }
            Ok(Err(_)) => Err(RemoteError::ConnectionClosed),
            Ok(Ok(HubResponse::Rejected { reason })) => Err(RemoteError::Rejected(reason)),
            Ok(Ok(response)) => Ok(response),
        }
    }
}

impl Drop for HubClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

fn unexpected(response: &HubResponse) -> RemoteError {
    RemoteError::UnexpectedResponse(format!("{response:?}"))
}

impl TaskBackend for HubClient {
    async fn fetch_tasks(&self, project_id: &ProjectId) -> Result<Vec<Task>, RemoteError> {
        match self
            .request(HubRequest::FetchTasks {
                project_id: project_id.clone(),
            })
            .await?
        {
            HubResponse::Tasks(tasks) => Ok(tasks),
            other => Err(unexpected(&other)),
        }
    }

    async fn create_task(&self, project_id: &ProjectId, draft: &TaskDraft) -> Result<Task, RemoteError> {
        match self
            .request(HubRequest::CreateTask {
                project_id: project_id.clone(),
                draft: draft.clone(),
            })
            .await?
        {
            HubResponse::Task(task) => Ok(task),
            other => Err(unexpected(&other)),
        }
    }

    async fn update_task(&self, task_id: &TaskId, change: &TaskChange) -> Result<Task, RemoteError> {
        match self
            .request(HubRequest::UpdateTask {
                task_id: task_id.clone(),
                change: change.clone(),
            })
            .await?
        {
            HubResponse::Task(task) => Ok(task),
            other => Err(unexpected(&other)),
        }
    }

    async fn delete_task(&self, task_id: &TaskId) -> Result<(), RemoteError> {
        match self
            .request(HubRequest::DeleteTask {
                task_id: task_id.clone(),
            })
            .await?
        {
            HubResponse::TaskDeleted(_) => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn list_comments(&self, task_id: &TaskId) -> Result<Vec<Comment>, RemoteError> {
        match self
            .request(HubRequest::ListComments {
                task_id: task_id.clone(),
            })
            .await?
        {
            HubResponse::Comments(comments) => Ok(comments),
            other => Err(unexpected(&other)),
        }
    }

    async fn add_comment(&self, task_id: &TaskId, body: &str) -> Result<Comment, RemoteError> {
        match self
            .request(HubRequest::AddComment {
                task_id: task_id.clone(),
                body: body.to_string(),
            })
            .await?
        {
            HubResponse::Comment(comment) => Ok(comment),
            other => Err(unexpected(&other)),
        }
    }

    async fn edit_comment(
        &self,
        task_id: &TaskId,
        comment_id: &CommentId,
        body: &str,
    ) -> Result<Comment, RemoteError> {
        match self
            .request(HubRequest::EditComment {
                task_id: task_id.clone(),
                comment_id: comment_id.clone(),
                body: body.to_string(),
            })
            .await?
        {
            HubResponse::Comment(comment) => Ok(comment),
            other => Err(unexpected(&other)),
        }
    }

    async fn delete_comment(&self, task_id: &TaskId, comment_id: &CommentId) -> Result<(), RemoteError> {
        match self
            .request(HubRequest::DeleteComment {
                task_id: task_id.clone(),
                comment_id: comment_id.clone(),
            })
            .await?
        {
            HubResponse::CommentDeleted(_) => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

impl MembershipSource for HubClient {
    async fn is_member(&self, project_id: &ProjectId, actor_id: &ActorId) -> Result<bool, RemoteError> {
        match self
            .request(HubRequest::Membership {
                project_id: project_id.clone(),
                actor_id: actor_id.clone(),
            })
            .await?
        {
            HubResponse::Membership(member) => Ok(member),
            other => Err(unexpected(&other)),
        }
    }
}

impl FeedSource for HubClient {
    /// Opens a local feed; the first feed for a project subscribes at the hub
    /// and waits for `Subscribed`. Releasing the last feed unsubscribes.
    async fn open_feed(&self, project_id: &ProjectId) -> Result<FeedReceiver, RemoteError> {
        if !self.is_connected() {
            return Err(RemoteError::ConnectionClosed);
        }
        let feed_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let confirmation = {
            let mut routes = self.routes.lock();
            let feeds = routes.feeds.entry(project_id.clone()).or_default();
            let first = feeds.is_empty();
            feeds.push((feed_id, tx));
            if first {
                let (ack_tx, ack_rx) = oneshot::channel();
                routes
                    .subscribing
                    .entry(project_id.clone())
                    .or_default()
                    .push(ack_tx);
                Some(ack_rx)
            } else {
                None
            }
        };

        let release = {
            let routes = Arc::clone(&self.routes);
            let outgoing = self.outgoing.clone();
            let project_id = project_id.clone();
            FeedRelease::new(move || {
                let mut routes = routes.lock();
                let Some(feeds) = routes.feeds.get_mut(&project_id) else {
                    return;
                };
                feeds.retain(|(id, _)| *id != feed_id);
                if feeds.is_empty() {
                    routes.feeds.remove(&project_id);
                    tracing::debug!(project_id = %project_id, "unsubscribing from hub feed");
                    let _ = outgoing.send(HubMessage::Unsubscribe { project_id });
                }
            })
        };
        let feed = FeedReceiver::new(rx, release);

        if let Some(ack_rx) = confirmation {
            self.outgoing
                .send(HubMessage::Subscribe {
                    project_id: project_id.clone(),
                })
                .map_err(|_| RemoteError::ConnectionClosed)?;
            match tokio::time::timeout(self.request_timeout, ack_rx).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(RemoteError::ConnectionClosed),
                Err(_) => return Err(RemoteError::Timeout),
            }
        }
        Ok(feed)
    }
}

/// Background task draining the outgoing channel into the socket.
async fn writer_loop(
    mut ws_sender: WsSender,
    mut outgoing: mpsc::UnboundedReceiver<HubMessage>,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg) = outgoing.recv().await {
        let bytes = match hub::encode(&msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(err = %e, "failed to encode hub message, dropping");
                continue;
            }
        };
        if let Err(e) = ws_sender.send(Message::Binary(bytes.into())).await {
            tracing::warn!(err = %e, "hub send failed");
            break;
        }
    }
    connected.store(false, Ordering::Relaxed);
    let _ = ws_sender.close().await;
}

/// Background task routing inbound frames.
///
/// Malformed frames are logged and skipped. When the socket closes every
/// waiting request fails with `ConnectionClosed` and every feed ends.
async fn reader_loop(mut ws_reader: WsReader, routes: Arc<Mutex<Routes>>, connected: Arc<AtomicBool>) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match hub::decode(&data) {
                Ok(HubMessage::Response { request_id, body }) => {
                    let waiter = routes.lock().pending.remove(&request_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(body);
                        }
                        None => tracing::debug!(request_id, "response for abandoned request"),
                    }
                }
                Ok(HubMessage::Event { project_id, event }) => {
                    routes.lock().dispatch_event(&project_id, &event);
                }
                Ok(HubMessage::Subscribed { project_id }) => {
                    let waiters = routes.lock().subscribing.remove(&project_id);
                    for tx in waiters.into_iter().flatten() {
                        let _ = tx.send(());
                    }
                }
                Ok(HubMessage::Error { reason }) => {
                    tracing::warn!(reason = %reason, "hub error");
                }
                Ok(other) => {
                    tracing::debug!(?other, "unexpected hub message type");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed hub frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("hub WebSocket closed by server");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(err = %e, "hub WebSocket read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    routes.lock().close_all();
    tracing::info!("hub reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`RemoteError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> RemoteError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => RemoteError::Unreachable(io_err.to_string()),
        WsError::Http(response) => {
            RemoteError::Unreachable(format!("hub HTTP error: status {}", response.status()))
        }
        other => RemoteError::Unreachable(format!("hub connection error: {other}")),
    }
}
