//! Hub server core: shared state, WebSocket handler, subscriptions, and
//! request dispatch.
//!
//! Each connection starts with `Hello`, answered by `Welcome`. After that the
//! client sends correlated requests, each answered by exactly one response,
//! and subscribes to the projects it wants change events for. Writes and
//! their fan-out happen under the table lock, so every subscriber sees a
//! project's events in commit order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use taskboard_proto::codec::{self, CodecError};
use taskboard_proto::feed::ChangeEvent;
use taskboard_proto::hub::{self, HubMessage, HubRequest, HubResponse};
use taskboard_proto::task::{Actor, ProjectId};
use tokio::sync::{RwLock, mpsc};

use crate::tables::{BoardTables, Outcome, TableError};

/// Default maximum accepted frame size in bytes (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

type ConnectionId = u64;

/// Shared hub state: the tables, open connections, and who watches what.
pub struct HubState {
    tables: RwLock<BoardTables>,
    /// Maps each connection to the sender feeding its WebSocket writer.
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>,
    subscribers: RwLock<HashMap<ProjectId, HashSet<ConnectionId>>>,
    next_connection: AtomicU64,
    max_frame_size: usize,
}

impl Default for HubState {
    fn default() -> Self {
        Self::new(BoardTables::new(), DEFAULT_MAX_FRAME_SIZE)
    }
}

impl HubState {
    /// Creates hub state serving `tables`, rejecting frames over `max_frame_size`.
    #[must_use]
    pub fn new(tables: BoardTables, max_frame_size: usize) -> Self {
        Self {
            tables: RwLock::new(tables),
            connections: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            max_frame_size,
        }
    }

    /// The authoritative tables.
    #[must_use]
    pub const fn tables(&self) -> &RwLock<BoardTables> {
        &self.tables
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of connections subscribed to `project_id`.
    pub async fn subscriber_count(&self, project_id: &ProjectId) -> usize {
        self.subscribers
            .read()
            .await
            .get(project_id)
            .map_or(0, HashSet::len)
    }

    async fn register(&self, sender: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(id, sender);
        id
    }

    /// Drops a connection and every subscription it held.
    async fn unregister(&self, connection: ConnectionId) {
        self.connections.write().await.remove(&connection);
        self.subscribers.write().await.retain(|_, watchers| {
            watchers.remove(&connection);
            !watchers.is_empty()
        });
    }

    async fn subscribe(&self, connection: ConnectionId, project_id: ProjectId) {
        self.subscribers
            .write()
            .await
            .entry(project_id)
            .or_default()
            .insert(connection);
    }

    async fn unsubscribe(&self, connection: ConnectionId, project_id: &ProjectId) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(watchers) = subscribers.get_mut(project_id) {
            watchers.remove(&connection);
            if watchers.is_empty() {
                subscribers.remove(project_id);
            }
        }
    }

    /// Sends one change event to every subscriber of `project_id`.
    async fn broadcast(&self, project_id: &ProjectId, event: &ChangeEvent) {
        let msg = HubMessage::Event {
            project_id: project_id.clone(),
            event: event.clone(),
        };
        let Some(frame) = frame(&msg) else {
            return;
        };
        let subscribers = self.subscribers.read().await;
        let Some(watchers) = subscribers.get(project_id) else {
            return;
        };
        let connections = self.connections.read().await;
        for connection in watchers {
            if let Some(sender) = connections.get(connection) {
                let _ = sender.send(frame.clone());
            }
        }
        tracing::debug!(
            project_id = %project_id,
            operation = %event.operation(),
            subscribers = watchers.len(),
            "change broadcast"
        );
    }

    /// Send a WebSocket Close frame to every open connection.
    pub async fn close_all_connections(&self) {
        let connections = self.connections.read().await;
        for (connection, sender) in connections.iter() {
            tracing::info!(connection, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }
}

/// Handles an upgraded WebSocket connection for one client.
///
/// The connection lifecycle:
/// 1. Wait for `Hello` and answer `Welcome` (or `Error`).
/// 2. Serve requests and subscriptions until either side closes.
/// 3. Drop the connection's subscriptions.
pub async fn handle_socket(socket: WebSocket, state: Arc<HubState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let actor = match wait_for_hello(&mut ws_receiver).await {
        Ok(actor) => actor,
        Err(reason) => {
            tracing::warn!(reason = %reason, "handshake failed");
            let _ = send_hub_msg(&mut ws_sender, &HubMessage::Error { reason }).await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let connection = state.register(tx.clone()).await;

    let welcome = HubMessage::Welcome {
        actor_id: actor.id.clone(),
    };
    if let Err(e) = send_hub_msg(&mut ws_sender, &welcome).await {
        tracing::error!(actor_id = %actor.id, error = %e, "failed to send Welcome");
        state.unregister(connection).await;
        return;
    }
    tracing::info!(actor_id = %actor.id, connection, "client connected");

    let writer_actor = actor.id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(actor_id = %writer_actor, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let reader_actor = actor.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_binary_message(connection, &reader_actor, &data, &reader_state, &tx).await;
                }
                Message::Close(_) => {
                    tracing::info!(actor_id = %reader_actor.id, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister(connection).await;
    tracing::info!(actor_id = %actor.id, connection, "client disconnected");
}

/// Waits for the first binary frame and expects it to be `Hello`.
///
/// Returns the reason to send back if the handshake cannot proceed.
async fn wait_for_hello(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Result<Actor, String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => {
                return match hub::decode(&data) {
                    Ok(HubMessage::Hello { actor }) if actor.id.as_str().is_empty() => {
                        Err("empty actor id".to_string())
                    }
                    Ok(HubMessage::Hello { actor }) => Ok(actor),
                    Ok(other) => Err(format!("expected Hello, got {other:?}")),
                    Err(e) => Err(format!("malformed handshake: {e}")),
                };
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err("connection closed before Hello".to_string())
}

/// Handles one binary frame from a connected client.
async fn handle_binary_message(
    connection: ConnectionId,
    actor: &Actor,
    data: &[u8],
    state: &HubState,
    reply: &mpsc::UnboundedSender<Message>,
) {
    let msg = match codec::decode_bounded::<HubMessage>(data, state.max_frame_size) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(actor_id = %actor.id, error = %e, "rejecting frame");
            let reason = match &e {
                CodecError::FrameTooLarge { .. } => e.to_string(),
                CodecError::Serialization(_) => format!("malformed frame: {e}"),
            };
            send_to(reply, &HubMessage::Error { reason });
            return;
        }
    };

    match msg {
        HubMessage::Request { request_id, body } => {
            let body = dispatch(state, actor, body).await;
            send_to(reply, &HubMessage::Response { request_id, body });
        }
        HubMessage::Subscribe { project_id } => {
            state.subscribe(connection, project_id.clone()).await;
            tracing::debug!(actor_id = %actor.id, project_id = %project_id, "subscribed");
            send_to(reply, &HubMessage::Subscribed { project_id });
        }
        HubMessage::Unsubscribe { project_id } => {
            state.unsubscribe(connection, &project_id).await;
            tracing::debug!(actor_id = %actor.id, project_id = %project_id, "unsubscribed");
        }
        other => {
            tracing::warn!(actor_id = %actor.id, msg = ?other, "unexpected message from client");
            send_to(
                reply,
                &HubMessage::Error {
                    reason: "unexpected message type".to_string(),
                },
            );
        }
    }
}

/// Serves one request against the tables.
async fn dispatch(state: &HubState, actor: &Actor, request: HubRequest) -> HubResponse {
    let result = match request {
        HubRequest::FetchTasks { project_id } => Ok(HubResponse::Tasks(
            state.tables.read().await.fetch_tasks(&project_id),
        )),
        HubRequest::Membership {
            project_id,
            actor_id,
        } => Ok(HubResponse::Membership(
            state.tables.read().await.is_member(&project_id, &actor_id),
        )),
        HubRequest::ListComments { task_id } => Ok(HubResponse::Comments(
            state.tables.read().await.list_comments(&task_id),
        )),
        HubRequest::CreateTask { project_id, draft } => {
            commit(state, |t| t.create_task(actor, &project_id, &draft))
                .await
                .map(HubResponse::Task)
        }
        HubRequest::UpdateTask { task_id, change } => {
            commit(state, |t| t.update_task(actor, &task_id, &change))
                .await
                .map(HubResponse::Task)
        }
        HubRequest::DeleteTask { task_id } => commit(state, |t| t.delete_task(actor, &task_id))
            .await
            .map(|()| HubResponse::TaskDeleted(task_id.clone())),
        HubRequest::AddComment { task_id, body } => {
            commit(state, |t| t.add_comment(actor, &task_id, &body))
                .await
                .map(HubResponse::Comment)
        }
        HubRequest::EditComment {
            task_id,
            comment_id,
            body,
        } => commit(state, |t| t.edit_comment(actor, &task_id, &comment_id, &body))
            .await
            .map(HubResponse::Comment),
        HubRequest::DeleteComment {
            task_id,
            comment_id,
        } => commit(state, |t| t.delete_comment(actor, &task_id, &comment_id))
            .await
            .map(|()| HubResponse::CommentDeleted(comment_id.clone())),
    };

    result.unwrap_or_else(|e| {
        tracing::info!(actor_id = %actor.id, error = %e, "request rejected");
        HubResponse::Rejected {
            reason: e.to_string(),
        }
    })
}

/// Applies a write and fans its event out before releasing the table lock.
async fn commit<T>(
    state: &HubState,
    write: impl FnOnce(&mut BoardTables) -> Result<Outcome<T>, TableError>,
) -> Result<T, TableError> {
    let mut tables = state.tables.write().await;
    let outcome = write(&mut tables)?;
    if let Some((project_id, event)) = &outcome.broadcast {
        state.broadcast(project_id, event).await;
    }
    drop(tables);
    Ok(outcome.value)
}

fn frame(msg: &HubMessage) -> Option<Message> {
    match hub::encode(msg) {
        Ok(bytes) => Some(Message::Binary(bytes.into())),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode hub message");
            None
        }
    }
}

/// Queues a message on a connection's writer.
fn send_to(reply: &mpsc::UnboundedSender<Message>, msg: &HubMessage) {
    if let Some(frame) = frame(msg) {
        let _ = reply.send(frame);
    }
}

/// Encodes and sends a hub message directly on a WebSocket sender.
async fn send_hub_msg(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    msg: &HubMessage,
) -> Result<(), String> {
    let bytes = hub::encode(msg).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts an empty hub on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(HubState::default())).await
}

/// Starts the hub with pre-built [`HubState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<HubState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "hub server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<HubState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
