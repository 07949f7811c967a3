//! Connection handle and related types

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::room::RoomKey;
use crate::websocket::{OutboundMessage, ServerMessage};

/// Handle for a single WebSocket connection.
///
/// The transport layer owns the socket itself; everything else holds this
/// handle and talks to the connection through its outbound channel. The user
/// identity is set once at handshake and never changes for the lifetime of
/// the connection.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub user_id: String,
    pub role: String,
    pub sender: mpsc::Sender<OutboundMessage>,
    pub connected_at: DateTime<Utc>,
    pub rooms: RwLock<HashSet<RoomKey>>,
}

impl ConnectionHandle {
    pub fn new(user_id: String, role: String, sender: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            role,
            sender,
            connected_at: Utc::now(),
            rooms: RwLock::new(HashSet::new()),
        }
    }

    /// Send a ServerMessage (will be serialized when written to the socket)
    pub async fn send(
        &self,
        message: ServerMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(OutboundMessage::Raw(message)).await
    }

    /// Send a pre-serialized message (for efficient fan-out)
    pub async fn send_preserialized(
        &self,
        message: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(message).await
    }

    /// Get current room subscription count
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
