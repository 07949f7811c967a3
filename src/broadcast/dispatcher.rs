use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::Value;

use crate::room::RoomKey;
use crate::session::{ConnectionHandle, SessionRegistry};
use crate::websocket::{OutboundMessage, ServerMessage};

/// Maximum number of concurrent message sends
const MAX_CONCURRENT_SENDS: usize = 100;

/// Threshold for using pre-serialization (saves serialization overhead for larger fan-outs)
const PRESERIALIZATION_THRESHOLD: usize = 4;

/// Result of a delivery attempt. Callers observe completion only; a fan-out
/// that reached nobody is not an error.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    /// Number of connections the event was delivered to
    pub delivered_to: usize,
    /// Number of connections that failed to receive
    pub failed: usize,
}

impl DeliveryResult {
    fn new(delivered: usize, failed: usize) -> Self {
        Self {
            delivered_to: delivered,
            failed,
        }
    }
}

#[derive(Debug, Default)]
struct DispatcherStats {
    total_sent: AtomicU64,
    total_delivered: AtomicU64,
    total_failed: AtomicU64,
    room_broadcasts: AtomicU64,
    user_unicasts: AtomicU64,
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub total_sent: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    pub room_broadcasts: u64,
    pub user_unicasts: u64,
}

/// Fans events out to every connection in a room, or to a single user's
/// current connection. Called by the in-socket handlers and, through the
/// internal HTTP API, by the REST layer after it persists data.
pub struct BroadcastDispatcher {
    registry: Arc<SessionRegistry>,
    stats: DispatcherStats,
}

impl BroadcastDispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            stats: DispatcherStats::default(),
        }
    }

    /// Get dispatcher statistics
    pub fn stats(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            total_sent: self.stats.total_sent.load(Ordering::Relaxed),
            total_delivered: self.stats.total_delivered.load(Ordering::Relaxed),
            total_failed: self.stats.total_failed.load(Ordering::Relaxed),
            room_broadcasts: self.stats.room_broadcasts.load(Ordering::Relaxed),
            user_unicasts: self.stats.user_unicasts.load(Ordering::Relaxed),
        }
    }

    /// Deliver an event to every connection currently subscribed to a room
    #[tracing::instrument(name = "dispatcher.to_room", skip(self, message), fields(room = %room))]
    pub async fn to_room(&self, room: &RoomKey, message: ServerMessage) -> DeliveryResult {
        let connections = self.registry.room_connections(room);
        let (delivered, failed) = self.send_to_connections(&connections, &message).await;

        self.stats.total_sent.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.stats
            .total_failed
            .fetch_add(failed as u64, Ordering::Relaxed);
        self.stats.room_broadcasts.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            room = %room,
            delivered = delivered,
            failed = failed,
            "Broadcast event to room"
        );

        DeliveryResult::new(delivered, failed)
    }

    /// Deliver an event to a user's current connection. A user with no
    /// current connection is a silent no-op: there is no store-and-forward.
    #[tracing::instrument(name = "dispatcher.to_user", skip(self, message))]
    pub async fn to_user(&self, user_id: &str, message: ServerMessage) -> DeliveryResult {
        let Some(connection) = self.registry.lookup_connection(user_id) else {
            tracing::debug!(user_id = %user_id, "User has no current connection, dropping event");
            return DeliveryResult::new(0, 0);
        };

        let (delivered, failed) = match connection.send(message).await {
            Ok(()) => (1, 0),
            Err(_) => (0, 1),
        };

        self.stats.total_sent.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.stats
            .total_failed
            .fetch_add(failed as u64, Ordering::Relaxed);
        self.stats.user_unicasts.fetch_add(1, Ordering::Relaxed);

        DeliveryResult::new(delivered, failed)
    }

    /// Broadcast a persisted chat message to its room. The REST layer calls
    /// this after the database write; the payload already carries its
    /// generated id and timestamp and is trusted as-is.
    pub async fn publish_message(&self, room: &RoomKey, message: Value) -> DeliveryResult {
        self.to_room(room, ServerMessage::NewMessage { message }).await
    }

    /// Broadcast a message-deletion notice to its room (REST-triggered)
    pub async fn publish_message_deleted(
        &self,
        room: &RoomKey,
        message_id: String,
    ) -> DeliveryResult {
        self.to_room(
            room,
            ServerMessage::MessageDeleted {
                message_id,
                room: room.clone(),
            },
        )
        .await
    }

    /// Unicast a personal notification payload (REST-triggered)
    pub async fn notify_user(&self, user_id: &str, payload: Value) -> DeliveryResult {
        self.to_user(user_id, ServerMessage::Notification { payload })
            .await
    }

    /// User ids currently subscribed to a room, each subscribed connection
    /// resolved back to its user
    pub fn members_of(&self, room: &RoomKey) -> Vec<String> {
        self.registry.room_members(room)
    }

    /// Send a message to a list of connections.
    /// Small fan-outs go sequentially; larger ones pre-serialize the message
    /// once and send with bounded concurrency.
    async fn send_to_connections(
        &self,
        connections: &[Arc<ConnectionHandle>],
        message: &ServerMessage,
    ) -> (usize, usize) {
        if connections.is_empty() {
            return (0, 0);
        }

        if connections.len() < PRESERIALIZATION_THRESHOLD {
            let mut delivered = 0;
            let mut failed = 0;
            for conn in connections {
                match conn.send(message.clone()).await {
                    Ok(()) => delivered += 1,
                    Err(_) => failed += 1,
                }
            }
            return (delivered, failed);
        }

        let outbound = match OutboundMessage::preserialized(message) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!(error = %e, "Failed to pre-serialize message, falling back to per-connection serialization");
                OutboundMessage::Raw(message.clone())
            }
        };

        let mut futures = FuturesUnordered::new();
        let mut delivered = 0;
        let mut failed = 0;
        let mut pending = 0;

        for conn in connections {
            let conn = conn.clone();
            let msg = outbound.clone();
            futures.push(async move { conn.send_preserialized(msg).await.is_ok() });
            pending += 1;

            // Process completed sends once we hit the concurrency limit
            while pending >= MAX_CONCURRENT_SENDS {
                if let Some(ok) = futures.next().await {
                    pending -= 1;
                    if ok {
                        delivered += 1;
                    } else {
                        failed += 1;
                    }
                } else {
                    break;
                }
            }
        }

        while let Some(ok) = futures.next().await {
            if ok {
                delivered += 1;
            } else {
                failed += 1;
            }
        }

        (delivered, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn setup() -> (Arc<SessionRegistry>, BroadcastDispatcher) {
        let registry = Arc::new(SessionRegistry::new());
        let dispatcher = BroadcastDispatcher::new(registry.clone());
        (registry, dispatcher)
    }

    #[tokio::test]
    async fn test_to_user_without_connection_is_noop() {
        let (_registry, dispatcher) = setup();
        let result = dispatcher.to_user("nobody", ServerMessage::error("X", "y")).await;
        assert_eq!(result.delivered_to, 0);
        assert_eq!(result.failed, 0);
    }

    #[tokio::test]
    async fn test_to_room_reaches_only_subscribers() {
        let (registry, dispatcher) = setup();
        let room = RoomKey::course("offering-1");
        let other = RoomKey::course("offering-2");

        let (tx_in, mut rx_in) = mpsc::channel(8);
        let (tx_out, mut rx_out) = mpsc::channel(8);
        let inside = registry.register("alice".into(), "student".into(), tx_in);
        let outside = registry.register("bob".into(), "student".into(), tx_out);
        registry.join_room(inside.id, &room).await;
        registry.join_room(outside.id, &other).await;

        let result = dispatcher
            .publish_message(&room, json!({"id": "m-1", "body": "hi"}))
            .await;
        assert_eq!(result.delivered_to, 1);

        let received = rx_in.recv().await.unwrap().to_json().unwrap();
        assert!(received.contains("new-message"));
        assert!(rx_out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unicast_follows_latest_registration() {
        let (registry, dispatcher) = setup();

        let (tx_old, mut rx_old) = mpsc::channel(8);
        let (tx_new, mut rx_new) = mpsc::channel(8);
        registry.register("alice".into(), "student".into(), tx_old);
        registry.register("alice".into(), "student".into(), tx_new);

        let result = dispatcher.notify_user("alice", json!({"kind": "grade"})).await;
        assert_eq!(result.delivered_to, 1);
        assert!(rx_new.recv().await.is_some());
        assert!(rx_old.try_recv().is_err());
    }
}
