use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::room::RoomKey;
use crate::websocket::OutboundMessage;

use super::ConnectionHandle;

/// Tracks live connections, who owns them, and which rooms they subscribe to.
///
/// The user index is last-writer-wins: a user is modeled as having at most
/// one "current" connection, and registering a second connection for the same
/// user shadows the first in the user-to-connection direction. The shadowed
/// connection's own entry stays in the connection map until its disconnect
/// cleans it up.
///
/// Everything here is process-local and in-memory; nothing survives a
/// restart, by design.
pub struct SessionRegistry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    /// user_id -> current connection_id (last writer wins)
    user_index: DashMap<String, Uuid>,
    /// room -> Set<connection_id> (the broadcast group)
    room_index: DashMap<RoomKey, HashSet<Uuid>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
            room_index: DashMap::new(),
        }
    }

    /// Register a new connection, overwriting any prior connection recorded
    /// for the same user.
    pub fn register(
        &self,
        user_id: String,
        role: String,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(user_id.clone(), role, sender));
        let conn_id = handle.id;

        self.connections.insert(conn_id, handle.clone());

        if let Some(previous) = self.user_index.insert(user_id, conn_id) {
            tracing::debug!(
                connection_id = %conn_id,
                shadowed_connection_id = %previous,
                user_id = %handle.user_id,
                "New connection shadows an earlier one for the same user"
            );
        }

        tracing::info!(connection_id = %conn_id, user_id = %handle.user_id, "Connection registered");

        handle
    }

    /// Unregister a connection, removing both directions of the mapping and
    /// every room subscription it holds.
    pub fn unregister(&self, connection_id: Uuid) {
        if let Some((_, handle)) = self.connections.remove(&connection_id) {
            // Only drop the user index entry if it still points at this
            // connection; a newer connection for the same user keeps its own.
            self.user_index
                .remove_if(&handle.user_id, |_, current| *current == connection_id);

            // Remove from all room subscriptions
            for mut entry in self.room_index.iter_mut() {
                entry.value_mut().remove(&connection_id);
            }

            // Clean up empty rooms
            self.room_index.retain(|_, conns| !conns.is_empty());

            tracing::info!(connection_id = %connection_id, user_id = %handle.user_id, "Connection unregistered");
        }
    }

    /// Resolve a connection to its authenticated user
    pub fn lookup_user(&self, connection_id: Uuid) -> Option<String> {
        self.connections
            .get(&connection_id)
            .map(|h| h.user_id.clone())
    }

    /// Resolve a user to their current connection, if any
    pub fn lookup_connection(&self, user_id: &str) -> Option<Arc<ConnectionHandle>> {
        let conn_id = *self.user_index.get(user_id)?;
        self.connections.get(&conn_id).map(|h| h.clone())
    }

    /// Subscribe a connection to a room's broadcast group
    pub async fn join_room(&self, connection_id: Uuid, room: &RoomKey) {
        let handle = self.connections.get(&connection_id).map(|h| h.clone());
        if let Some(handle) = handle {
            handle.rooms.write().await.insert(room.clone());

            self.room_index
                .entry(room.clone())
                .or_default()
                .insert(connection_id);

            tracing::debug!(connection_id = %connection_id, room = %room, "Joined room");
        }
    }

    /// Unsubscribe a connection from a room's broadcast group
    pub async fn leave_room(&self, connection_id: Uuid, room: &RoomKey) {
        let handle = self.connections.get(&connection_id).map(|h| h.clone());
        if let Some(handle) = handle {
            handle.rooms.write().await.remove(room);

            if let Some(mut room_conns) = self.room_index.get_mut(room) {
                room_conns.remove(&connection_id);
                if room_conns.is_empty() {
                    drop(room_conns);
                    self.room_index.remove(room);
                }
            }

            tracing::debug!(connection_id = %connection_id, room = %room, "Left room");
        }
    }

    /// Get all connections subscribed to a room
    pub fn room_connections(&self, room: &RoomKey) -> Vec<Arc<ConnectionHandle>> {
        self.room_index
            .get(room)
            .map(|conn_ids| {
                conn_ids
                    .iter()
                    .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolve every connection subscribed to a room back to its user id,
    /// deduplicated. Used for "who's online here" presence queries.
    pub fn room_members(&self, room: &RoomKey) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut members = Vec::new();
        for conn in self.room_connections(room) {
            if seen.insert(conn.user_id.clone()) {
                members.push(conn.user_id.clone());
            }
        }
        members
    }

    /// Get connection by ID
    pub fn get_connection(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    /// Get statistics
    pub fn stats(&self) -> RegistryStats {
        let mut room_counts = std::collections::HashMap::new();
        for entry in self.room_index.iter() {
            room_counts.insert(entry.key().to_string(), entry.value().len());
        }

        RegistryStats {
            total_connections: self.connections.len(),
            unique_users: self.user_index.len(),
            rooms: room_counts,
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub unique_users: usize,
    pub rooms: std::collections::HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> mpsc::Sender<OutboundMessage> {
        mpsc::channel(8).0
    }

    #[tokio::test]
    async fn test_register_and_lookup_both_directions() {
        let registry = SessionRegistry::new();
        let handle = registry.register("u1".into(), "student".into(), channel());

        assert_eq!(registry.lookup_user(handle.id).as_deref(), Some("u1"));
        assert_eq!(registry.lookup_connection("u1").unwrap().id, handle.id);
    }

    #[tokio::test]
    async fn test_last_writer_wins_per_user() {
        let registry = SessionRegistry::new();
        let first = registry.register("u1".into(), "student".into(), channel());
        let second = registry.register("u1".into(), "student".into(), channel());

        // The second connection shadows the first in the user direction
        assert_eq!(registry.lookup_connection("u1").unwrap().id, second.id);
        // The first connection's reverse entry is still reachable
        assert_eq!(registry.lookup_user(first.id).as_deref(), Some("u1"));

        // Unregistering the shadowed connection must not disturb the current one
        registry.unregister(first.id);
        assert_eq!(registry.lookup_connection("u1").unwrap().id, second.id);

        registry.unregister(second.id);
        assert!(registry.lookup_connection("u1").is_none());
    }

    #[tokio::test]
    async fn test_unregister_removes_room_subscriptions() {
        let registry = SessionRegistry::new();
        let handle = registry.register("u1".into(), "student".into(), channel());
        let room = crate::room::RoomKey::course("offering-1");

        registry.join_room(handle.id, &room).await;
        assert_eq!(registry.room_connections(&room).len(), 1);

        registry.unregister(handle.id);
        assert!(registry.room_connections(&room).is_empty());
        assert!(registry.lookup_user(handle.id).is_none());
    }

    #[tokio::test]
    async fn test_room_members_resolves_users() {
        let registry = SessionRegistry::new();
        let a = registry.register("alice".into(), "student".into(), channel());
        let b = registry.register("bob".into(), "student".into(), channel());
        let room = crate::room::RoomKey::academic("year-2025");

        registry.join_room(a.id, &room).await;
        registry.join_room(b.id, &room).await;

        let mut members = registry.room_members(&room);
        members.sort();
        assert_eq!(members, vec!["alice", "bob"]);

        registry.leave_room(b.id, &room).await;
        assert_eq!(registry.room_members(&room), vec!["alice"]);
    }
}
