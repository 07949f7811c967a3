//! Cross-component integration tests for the presence coordinator.
//!
//! These tests drive the session registry, typing registry, and broadcast
//! dispatcher through the same entry points the WebSocket handler uses,
//! with real mpsc receivers standing in for the sockets. No server startup
//! or network is required.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use chat_presence_service::config::{ApiConfig, JwtConfig, ServerConfig, Settings, WebSocketConfig};
use chat_presence_service::room::RoomKey;
use chat_presence_service::server::AppState;
use chat_presence_service::session::ConnectionHandle;
use chat_presence_service::websocket::{
    handle_client_message, reconcile_disconnect, ClientMessage, OutboundMessage,
};

fn test_state() -> AppState {
    let settings = Settings {
        server: ServerConfig::default(),
        jwt: JwtConfig {
            secret: "integration-test-secret".to_string(),
            issuer: None,
            audience: None,
        },
        api: ApiConfig { key: None },
        websocket: WebSocketConfig::default(),
    };
    AppState::new(settings)
}

/// Register a connection for a user, returning the handle plus the receiving
/// end of its outbound channel (the "socket")
fn connect(state: &AppState, user_id: &str) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
    let (tx, rx) = mpsc::channel(32);
    let handle = state
        .registry
        .register(user_id.to_string(), "student".to_string(), tx);
    (handle, rx)
}

async fn recv_json(rx: &mut mpsc::Receiver<OutboundMessage>) -> Value {
    let msg = rx.recv().await.expect("expected an outbound message");
    serde_json::from_str(&msg.to_json().unwrap()).unwrap()
}

fn assert_empty(rx: &mut mpsc::Receiver<OutboundMessage>) {
    assert!(rx.try_recv().is_err(), "expected no outbound message");
}

fn join(room: &RoomKey) -> ClientMessage {
    ClientMessage::JoinChatRoom { room: room.clone() }
}

fn leave(room: &RoomKey) -> ClientMessage {
    ClientMessage::LeaveChatRoom { room: room.clone() }
}

fn typing_start(room: &RoomKey, user_id: &str) -> ClientMessage {
    ClientMessage::TypingStart {
        room: room.clone(),
        user_id: user_id.to_string(),
        user_name: None,
    }
}

fn typing_stop(room: &RoomKey, user_id: &str) -> ClientMessage {
    ClientMessage::TypingStop {
        room: room.clone(),
        user_id: user_id.to_string(),
        user_name: None,
    }
}

// =============================================================================
// Join / leave scenario
// =============================================================================

#[tokio::test]
async fn test_join_leave_scenario() {
    let state = test_state();
    let room = RoomKey::course("offering-1");

    let (c, mut c_rx) = connect(&state, "u1");
    let (observer, mut observer_rx) = connect(&state, "observer");
    handle_client_message(join(&room), &state, &observer).await;
    let _ = recv_json(&mut observer_rx).await; // observer's own join ack

    // Join: the acknowledgement is unicast to the joining connection only
    handle_client_message(join(&room), &state, &c).await;
    let ack = recv_json(&mut c_rx).await;
    assert_eq!(ack["type"], "joined-chat-room");
    assert_eq!(ack["roomId"], "offering-1");
    assert_eq!(ack["roomType"], "COURSE");
    assert_empty(&mut observer_rx);

    // Typing start: the room sees u1 typing
    handle_client_message(typing_start(&room, "u1"), &state, &c).await;
    let update = recv_json(&mut observer_rx).await;
    assert_eq!(update["type"], "typing-update");
    assert_eq!(update["typingUsers"], json!(["u1"]));

    // Leave: the typing flag is dropped and the room's presence republished
    let _ = recv_json(&mut c_rx).await; // c's own copy of the typing update
    handle_client_message(leave(&room), &state, &c).await;
    let update = recv_json(&mut observer_rx).await;
    assert_eq!(update["type"], "typing-update");
    assert_eq!(update["typingUsers"], json!([]));

    // A later typing-stop for the departed user is a no-op (already absent)
    handle_client_message(typing_stop(&room, "u1"), &state, &c).await;
    assert_empty(&mut observer_rx);
}

// =============================================================================
// Typing idempotence
// =============================================================================

#[tokio::test]
async fn test_typing_start_rebroadcasts_exactly_once() {
    let state = test_state();
    let room = RoomKey::academic("year-2025");

    let (c, _c_rx) = connect(&state, "u1");
    let (observer, mut observer_rx) = connect(&state, "u2");
    handle_client_message(join(&room), &state, &observer).await;
    let _ = recv_json(&mut observer_rx).await;

    handle_client_message(typing_start(&room, "u1"), &state, &c).await;
    let update = recv_json(&mut observer_rx).await;
    assert_eq!(update["typingUsers"], json!(["u1"]));

    // Second start for the same (room, user): no re-broadcast
    handle_client_message(typing_start(&room, "u1"), &state, &c).await;
    assert_empty(&mut observer_rx);

    // Stop, then a second stop: one broadcast, then nothing
    handle_client_message(typing_stop(&room, "u1"), &state, &c).await;
    let update = recv_json(&mut observer_rx).await;
    assert_eq!(update["typingUsers"], json!([]));

    handle_client_message(typing_stop(&room, "u1"), &state, &c).await;
    assert_empty(&mut observer_rx);
}

// =============================================================================
// Disconnect reconciliation
// =============================================================================

#[tokio::test]
async fn test_abrupt_disconnect_clears_typing() {
    let state = test_state();
    let room = RoomKey::academic("year-2025");

    let (c1, _c1_rx) = connect(&state, "alice");
    let (c2, mut c2_rx) = connect(&state, "bob");
    handle_client_message(join(&room), &state, &c1).await;
    handle_client_message(join(&room), &state, &c2).await;
    let _ = recv_json(&mut c2_rx).await; // c2's join ack

    // Alice starts typing and then drops without a typing-stop
    handle_client_message(typing_start(&room, "alice"), &state, &c1).await;
    let update = recv_json(&mut c2_rx).await;
    assert_eq!(update["typingUsers"], json!(["alice"]));

    reconcile_disconnect(&state, &c1).await;

    // Bob sees alice removed without any explicit stop event
    let update = recv_json(&mut c2_rx).await;
    assert_eq!(update["type"], "typing-update");
    assert_eq!(update["typingUsers"], json!([]));

    // The session registry no longer resolves alice to any connection
    assert!(state.registry.lookup_connection("alice").is_none());
    assert!(state.registry.lookup_user(c1.id).is_none());
    assert!(state.typing.typing_in(&room).is_empty());
}

#[tokio::test]
async fn test_disconnect_sweeps_every_room() {
    let state = test_state();
    let r1 = RoomKey::course("offering-1");
    let r2 = RoomKey::course("offering-2");

    let (u, _u_rx) = connect(&state, "u");
    let (w1, mut w1_rx) = connect(&state, "watcher-1");
    let (w2, mut w2_rx) = connect(&state, "watcher-2");

    handle_client_message(join(&r1), &state, &u).await;
    handle_client_message(join(&r2), &state, &u).await;
    handle_client_message(join(&r1), &state, &w1).await;
    handle_client_message(join(&r2), &state, &w2).await;
    let _ = recv_json(&mut w1_rx).await;
    let _ = recv_json(&mut w2_rx).await;

    handle_client_message(typing_start(&r1, "u"), &state, &u).await;
    handle_client_message(typing_start(&r2, "u"), &state, &u).await;
    let _ = recv_json(&mut w1_rx).await;
    let _ = recv_json(&mut w2_rx).await;

    reconcile_disconnect(&state, &u).await;

    // Both rooms receive exactly one update with u removed
    let update = recv_json(&mut w1_rx).await;
    assert_eq!(update["typingUsers"], json!([]));
    assert_empty(&mut w1_rx);

    let update = recv_json(&mut w2_rx).await;
    assert_eq!(update["typingUsers"], json!([]));
    assert_empty(&mut w2_rx);

    assert!(state.registry.lookup_connection("u").is_none());
}

// =============================================================================
// Broadcast isolation and REST-triggered fan-out
// =============================================================================

#[tokio::test]
async fn test_rest_triggered_message_broadcast() {
    let state = test_state();
    let room = RoomKey::course("offering-9");
    let elsewhere = RoomKey::course("offering-10");

    let (a, mut a_rx) = connect(&state, "a");
    let (b, mut b_rx) = connect(&state, "b");
    let (c, mut c_rx) = connect(&state, "c");
    handle_client_message(join(&room), &state, &a).await;
    handle_client_message(join(&room), &state, &b).await;
    handle_client_message(join(&elsewhere), &state, &c).await;
    let _ = recv_json(&mut a_rx).await;
    let _ = recv_json(&mut b_rx).await;
    let _ = recv_json(&mut c_rx).await;

    // The REST layer persists the row, then hands it over verbatim
    let row = json!({
        "id": "msg-123",
        "body": "hello",
        "authorId": "a",
        "createdAt": "2025-09-01T10:00:00Z"
    });
    let result = state.dispatcher.publish_message(&room, row.clone()).await;
    assert_eq!(result.delivered_to, 2);
    assert_eq!(result.failed, 0);

    for rx in [&mut a_rx, &mut b_rx] {
        let msg = recv_json(rx).await;
        assert_eq!(msg["type"], "new-message");
        assert_eq!(msg["payload"], row);
    }
    assert_empty(&mut c_rx);

    // Deletion notice goes to the same room
    state
        .dispatcher
        .publish_message_deleted(&room, "msg-123".to_string())
        .await;
    let msg = recv_json(&mut a_rx).await;
    assert_eq!(msg["type"], "message-deleted");
    assert_eq!(msg["messageId"], "msg-123");
    assert_eq!(msg["roomId"], "offering-9");
    assert_empty(&mut c_rx);
}

#[tokio::test]
async fn test_unicast_targets_current_connection_only() {
    let state = test_state();

    let (_old, mut old_rx) = connect(&state, "alice");
    let (_new, mut new_rx) = connect(&state, "alice");

    let result = state
        .dispatcher
        .notify_user("alice", json!({"kind": "deadline"}))
        .await;
    assert_eq!(result.delivered_to, 1);

    let msg = recv_json(&mut new_rx).await;
    assert_eq!(msg["type"], "notification");
    assert_eq!(msg["payload"]["kind"], "deadline");
    assert_empty(&mut old_rx);

    // Offline user: silent no-op
    let result = state
        .dispatcher
        .notify_user("nobody", json!({"kind": "deadline"}))
        .await;
    assert_eq!(result.delivered_to, 0);
    assert_eq!(result.failed, 0);
}

// =============================================================================
// Presence query and legacy events
// =============================================================================

#[tokio::test]
async fn test_members_of_resolves_users() {
    let state = test_state();
    let room = RoomKey::academic("year-2025");

    let (a, _a_rx) = connect(&state, "alice");
    let (b, _b_rx) = connect(&state, "bob");
    handle_client_message(join(&room), &state, &a).await;
    handle_client_message(join(&room), &state, &b).await;

    let mut members = state.dispatcher.members_of(&room);
    members.sort();
    assert_eq!(members, vec!["alice", "bob"]);

    reconcile_disconnect(&state, &b).await;
    assert_eq!(state.dispatcher.members_of(&room), vec!["alice"]);
}

#[tokio::test]
async fn test_legacy_course_subscription() {
    let state = test_state();
    let room = RoomKey::course("c-42");

    let (c, mut c_rx) = connect(&state, "u1");
    handle_client_message(
        ClientMessage::JoinCourse {
            course_id: "c-42".to_string(),
        },
        &state,
        &c,
    )
    .await;

    // No acknowledgement for the legacy variant
    assert_empty(&mut c_rx);

    // But the connection is part of the room's broadcast group
    let result = state.dispatcher.publish_message(&room, json!({"id": "m"})).await;
    assert_eq!(result.delivered_to, 1);
    let msg = recv_json(&mut c_rx).await;
    assert_eq!(msg["type"], "new-message");

    handle_client_message(
        ClientMessage::LeaveCourse {
            course_id: "c-42".to_string(),
        },
        &state,
        &c,
    )
    .await;
    let result = state.dispatcher.publish_message(&room, json!({"id": "m2"})).await;
    assert_eq!(result.delivered_to, 0);
    assert_empty(&mut c_rx);
}
