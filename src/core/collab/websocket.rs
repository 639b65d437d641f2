//! WebSocket handler for note collaboration
//!
//! One socket per client. The identity is resolved during the upgrade; after
//! that the client joins a note's room with `join` and talks to the
//! coordinator through the events defined in the protocol module.
//!
//! WebSocket URL: ws(s)://{host}/ws

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::api::CollabState;
use super::auth::AuthenticatedUser;
use super::coordinator::Coordinator;
use super::error::CollabError;
use super::hub::RoomEvent;
use super::lock::AcquireOutcome;
use super::propagator::SubmitOutcome;
use super::protocol::*;

// ============================================================================
// Constants
// ============================================================================

/// Channel buffer size for outgoing messages
const OUTGOING_BUFFER_SIZE: usize = 64;

// ============================================================================
// WebSocket Handler
// ============================================================================

/// WebSocket upgrade handler. Unauthenticated requests are rejected before
/// the upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<CollabState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    let user = user.to_user_info();
    ws.on_upgrade(move |socket| handle_socket(socket, user, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, user: UserInfo, state: CollabState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create channel for sending messages to this client
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTGOING_BUFFER_SIZE);

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize message: {}", e);
                }
            }
        }
    });

    let mut session = ConnectionSession::new(user, tx, state.coordinator.clone());

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.user.user_id,
        "WebSocket connection opened"
    );

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let text_str: &str = &text;
                match serde_json::from_str::<ClientMessage>(text_str) {
                    Ok(client_msg) => session.handle_message(client_msg).await,
                    Err(e) => {
                        tracing::warn!("Invalid message format: {}", e);
                        session
                            .send(ServerMessage::error(
                                WsErrorCode::InvalidMessage,
                                format!("Invalid message format: {}", e),
                            ))
                            .await;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                session
                    .send(ServerMessage::error(
                        WsErrorCode::InvalidMessage,
                        "Binary frames are not supported",
                    ))
                    .await;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Axum answers pings itself
                tracing::trace!("Received ping/pong frame");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(
                    connection_id = %session.connection_id,
                    user_id = %session.user.user_id,
                    "Client closed connection"
                );
                break;
            }
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
        }
    }

    // Disconnect is an implicit leave
    session.close().await;
    send_task.abort();

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.user.user_id,
        "WebSocket connection closed"
    );
}

// ============================================================================
// Connection Session
// ============================================================================

/// State for a single WebSocket connection
struct ConnectionSession {
    connection_id: ConnectionId,
    /// Identity bound at upgrade time
    user: UserInfo,
    /// Note the connection is joined to
    note_id: Option<NoteId>,
    /// Channel for sending messages to this client
    tx: mpsc::Sender<ServerMessage>,
    /// Room event forwarding task
    broadcast_task: Option<JoinHandle<()>>,
    coordinator: Arc<Coordinator>,
    closed: bool,
}

impl ConnectionSession {
    fn new(user: UserInfo, tx: mpsc::Sender<ServerMessage>, coordinator: Arc<Coordinator>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            user,
            note_id: None,
            tx,
            broadcast_task: None,
            coordinator,
            closed: false,
        }
    }

    async fn send(&self, msg: ServerMessage) {
        let _ = self.tx.send(msg).await;
    }

    /// Handle an incoming client message. Failures are reported to this
    /// connection only.
    async fn handle_message(&mut self, msg: ClientMessage) {
        let result = match msg {
            ClientMessage::Join { note_id } => self.handle_join(note_id).await,
            ClientMessage::Leave { note_id } => {
                self.handle_leave(note_id).await;
                Ok(())
            }
            ClientMessage::AcquireLock { note_id } => self.handle_acquire_lock(note_id).await,
            ClientMessage::ReleaseLock { note_id } => self
                .coordinator
                .release_lock(self.connection_id, note_id)
                .await
                .map(|_| ()),
            ClientMessage::ContentChange { note_id, content } => {
                self.handle_content_change(note_id, content).await
            }
            ClientMessage::Ping => {
                self.send(ServerMessage::Pong).await;
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::debug!(
                connection_id = %self.connection_id,
                user_id = %self.user.user_id,
                error = %e,
                "Client event failed"
            );
            if let CollabError::NoteNotFound(note_id) = &e
                && self.note_id == Some(*note_id)
            {
                self.detach();
            }
            self.send(e.to_message()).await;
        }
    }

    async fn handle_join(&mut self, note_id: NoteId) -> Result<(), CollabError> {
        let joined = self
            .coordinator
            .on_join(self.connection_id, &self.user, note_id)
            .await?;

        // Stop forwarding the previous room before the snapshot goes out
        self.detach();
        self.send(joined.snapshot).await;
        self.note_id = Some(note_id);
        self.broadcast_task = Some(forward_room_events(
            joined.receiver,
            self.tx.clone(),
            self.connection_id,
        ));
        Ok(())
    }

    async fn handle_leave(&mut self, note_id: NoteId) {
        if self.coordinator.on_leave(self.connection_id, note_id).await {
            self.detach();
        }
    }

    async fn handle_acquire_lock(&self, note_id: NoteId) -> Result<(), CollabError> {
        // Granted and renewed locks are announced to the whole room,
        // this connection included
        if let AcquireOutcome::HeldBy { holder } = self
            .coordinator
            .acquire_lock(self.connection_id, note_id)
            .await?
        {
            self.send(ServerMessage::LockHeldBy {
                note_id,
                holder: Some(holder),
            })
            .await;
        }
        Ok(())
    }

    async fn handle_content_change(
        &self,
        note_id: NoteId,
        content: String,
    ) -> Result<(), CollabError> {
        if let SubmitOutcome::Rejected { holder } = self
            .coordinator
            .content_change(self.connection_id, note_id, content)
            .await?
        {
            self.send(ServerMessage::LockHeldBy { note_id, holder }).await;
        }
        Ok(())
    }

    /// Stop receiving room events
    fn detach(&mut self) {
        self.note_id = None;
        if let Some(task) = self.broadcast_task.take() {
            task.abort();
        }
    }

    /// Cleanup when the connection closes
    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.detach();
        self.coordinator.on_disconnect(self.connection_id).await;
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.detach();
        // The connection future was cancelled before `close` ran
        if !self.closed
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            let coordinator = self.coordinator.clone();
            let connection_id = self.connection_id;
            handle.spawn(async move {
                coordinator.on_disconnect(connection_id).await;
            });
        }
    }
}

/// Forward room events to a connection, skipping events it caused itself
fn forward_room_events(
    mut room_rx: broadcast::Receiver<RoomEvent>,
    tx: mpsc::Sender<ServerMessage>,
    connection_id: ConnectionId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match room_rx.recv().await {
                Ok(event) => {
                    if event.is_for(connection_id) && tx.send(event.message).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        skipped,
                        "Connection lagging behind room events"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

// ============================================================================
// Tests
// ============================================================================
