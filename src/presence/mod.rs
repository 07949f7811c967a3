//! Typing presence.
//!
//! One set of user ids per room, created lazily on first use and mutated by
//! explicit typing-start/typing-stop events and by disconnect reconciliation.
//! There is no timeout-based expiry: if a typing-stop is lost without a
//! disconnect, the flag stays set until the user disconnects. Known
//! limitation, inherited behavior.

use dashmap::DashMap;
use std::collections::HashSet;

use crate::room::RoomKey;

/// Per-room sets of users currently signaling typing activity.
///
/// Start and stop deliberately perform no membership check: a typing event
/// for a room the user never joined is accepted as-is. The permissive
/// boundary is intentional; presence data is advisory.
pub struct TypingRegistry {
    typing: DashMap<RoomKey, HashSet<String>>,
}

impl TypingRegistry {
    pub fn new() -> Self {
        Self {
            typing: DashMap::new(),
        }
    }

    /// Mark a user as typing in a room.
    ///
    /// Returns the updated snapshot when the set actually changed, `None`
    /// when the user was already present (idempotent, no re-broadcast).
    pub fn start(&self, room: &RoomKey, user_id: &str) -> Option<Vec<String>> {
        let mut set = self.typing.entry(room.clone()).or_default();
        if set.insert(user_id.to_string()) {
            Some(snapshot(&set))
        } else {
            None
        }
    }

    /// Clear a user's typing flag in a room.
    ///
    /// Returns the updated snapshot when the set actually changed, `None`
    /// when the user was already absent.
    pub fn stop(&self, room: &RoomKey, user_id: &str) -> Option<Vec<String>> {
        let mut changed = None;
        if let Some(mut set) = self.typing.get_mut(room) {
            if set.remove(user_id) {
                changed = Some(snapshot(&set));
                if set.is_empty() {
                    drop(set);
                    self.typing.remove(room);
                }
            }
        }
        changed
    }

    /// Remove a user from every room set it appears in, returning one
    /// (room, snapshot) pair per room actually changed. Used on disconnect
    /// so no ghost typer survives a dropped connection.
    pub fn drain_user(&self, user_id: &str) -> Vec<(RoomKey, Vec<String>)> {
        let mut changed = Vec::new();
        for mut entry in self.typing.iter_mut() {
            if entry.value_mut().remove(user_id) {
                changed.push((entry.key().clone(), snapshot(entry.value())));
            }
        }
        self.typing.retain(|_, set| !set.is_empty());
        changed
    }

    /// Current snapshot for a room
    pub fn typing_in(&self, room: &RoomKey) -> Vec<String> {
        self.typing
            .get(room)
            .map(|set| snapshot(&set))
            .unwrap_or_default()
    }
}

impl Default for TypingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Sorted for deterministic broadcast payloads
fn snapshot(set: &HashSet<String>) -> Vec<String> {
    let mut users: Vec<String> = set.iter().cloned().collect();
    users.sort();
    users
}
