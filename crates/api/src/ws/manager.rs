use std::collections::HashMap;

use aihub_core::types::{SessionId, Timestamp};
use axum::body::Bytes;
use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};

use crate::engine::barrier::InFlightGuard;
use crate::ws::messages::ServerMessage;

/// One unit of outbound work for a session's writer task.
///
/// All frames are written back to back; the receipt (if any) is released
/// after the last one.
#[derive(Debug)]
pub struct Outbound {
    pub frames: Vec<Message>,
    pub receipt: Option<InFlightGuard>,
}

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Outbound>;

/// Receiver half drained by a connection's writer task.
pub type WsReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Cloneable handle for queueing frames to one session.
///
/// Sends never block and never fail loudly: a closed channel means the
/// session is gone and the frame is dropped (releasing its receipt).
#[derive(Debug, Clone)]
pub struct SessionOutbox {
    session_id: SessionId,
    sender: WsSender,
}

impl SessionOutbox {
    /// A standalone outbox, not registered with any manager.
    pub fn channel(session_id: SessionId) -> (Self, WsReceiver) {
        let (sender, rx) = mpsc::unbounded_channel();
        (Self { session_id, sender }, rx)
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Queue a typed message.
    pub fn send(&self, message: &ServerMessage) -> bool {
        self.push(vec![to_frame(message)], None)
    }

    /// Queue a typed message counted against a job's in-flight barrier.
    pub fn send_tracked(&self, message: &ServerMessage, receipt: InFlightGuard) -> bool {
        self.push(vec![to_frame(message)], Some(receipt))
    }

    /// Queue pre-built frames as one unit.
    pub fn push(&self, frames: Vec<Message>, receipt: Option<InFlightGuard>) -> bool {
        self.sender.send(Outbound { frames, receipt }).is_ok()
    }
}

/// Serialize a server message into a text frame.
pub fn to_frame(message: &ServerMessage) -> Message {
    Message::Text(serde_json::to_string(message).unwrap_or_default().into())
}

pub fn json_frame(value: &serde_json::Value) -> Message {
    Message::Text(value.to_string().into())
}

/// Metadata for a single WebSocket connection.
pub struct WsConnection {
    /// Outbox shared with the broker for this connection.
    pub outbox: SessionOutbox,
    /// When this connection was established.
    pub connected_at: Timestamp,
}

/// Manages all active WebSocket connections.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application.
pub struct WsManager {
    connections: RwLock<HashMap<SessionId, WsConnection>>,
}

impl WsManager {
    /// Create a new, empty connection manager.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the session's outbox and the receiver half of its channel
    /// so the caller can forward messages to the WebSocket sink.
    pub async fn add(&self, session_id: SessionId) -> (SessionOutbox, WsReceiver) {
        let (outbox, rx) = SessionOutbox::channel(session_id);
        let conn = WsConnection {
            outbox: outbox.clone(),
            connected_at: chrono::Utc::now(),
        };
        self.connections.write().await.insert(session_id, conn);
        (outbox, rx)
    }

    /// Remove a connection by its ID.
    pub async fn remove(&self, session_id: SessionId) {
        self.connections.write().await.remove(&session_id);
    }

    /// Return the current number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Close frame to every connection, then clear the map.
    ///
    /// Used during graceful shutdown to notify all clients before the
    /// server stops.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            conn.outbox.push(vec![Message::Close(None)], None);
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Queue a Ping on every session. Returns how many were still open.
    pub async fn ping_all(&self) -> usize {
        let conns = self.connections.read().await;
        conns
            .values()
            .filter(|conn| conn.outbox.push(vec![Message::Ping(Bytes::new())], None))
            .count()
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}
