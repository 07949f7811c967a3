use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::Claims;
use crate::room::RoomKey;
use crate::server::AppState;
use crate::session::ConnectionHandle;

use super::message::{ClientMessage, OutboundMessage, ServerMessage};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// The credential is verified before the upgrade completes; a connection that
/// fails here never touches the session, room, or typing registries.
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    // Extract token from query parameter or Authorization header
    let token = extract_token(&query, &headers);

    let token = match token {
        Some(t) => t,
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                "Missing authentication token",
            )
                .into_response();
        }
    };

    // Validate JWT token
    let claims = match state.jwt_validator.validate(&token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(error = %e, "JWT validation failed");
            return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
        }
    };

    tracing::info!(user_id = %claims.sub, "WebSocket upgrade requested");

    // Upgrade to WebSocket
    ws.on_upgrade(move |socket| handle_socket(socket, state, claims))
}

/// Extract token from query parameter or Authorization header
fn extract_token(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    // First try query parameter
    if let Some(ref token) = query.token {
        return Some(token.clone());
    }

    // Then try Authorization header
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    None
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, claims),
    fields(user_id = %claims.sub)
)]
async fn handle_socket(socket: WebSocket, state: AppState, claims: Claims) {
    let user_id = claims.sub.clone();
    let role = claims.role().to_string();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(state.settings.websocket.channel_buffer);

    // Record the session; a prior connection for the same user is shadowed
    let handle = state.registry.register(user_id.clone(), role, tx);
    let connection_id = handle.id;

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        "WebSocket connection established"
    );

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for sending messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Task for receiving messages from WebSocket
    let state_clone = state.clone();
    let handle_clone = handle.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &state_clone, &handle_clone).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
    }

    // Exactly once per disconnect, whatever the cause
    reconcile_disconnect(&state, &handle).await;

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        "WebSocket connection closed"
    );
}

/// Unwind everything the connection's user participates in: clear the user's
/// typing flag in every room, republish presence for each room that changed,
/// then drop the session mapping in both directions. A user must never remain
/// "typing" in a room after their connection is gone.
#[tracing::instrument(
    name = "ws.disconnect",
    skip(state, handle),
    fields(connection_id = %handle.id, user_id = %handle.user_id)
)]
pub async fn reconcile_disconnect(state: &AppState, handle: &Arc<ConnectionHandle>) {
    let changed = state.typing.drain_user(&handle.user_id);
    for (room, typing_users) in changed {
        state
            .dispatcher
            .to_room(&room, ServerMessage::typing_update(room.clone(), typing_users))
            .await;
    }

    state.registry.unregister(handle.id);
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(msg: Message, state: &AppState, handle: &Arc<ConnectionHandle>) -> bool {
    match msg {
        Message::Text(text) => {
            // Parse client message
            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse client message");
                    let _ = handle
                        .send(ServerMessage::error("INVALID_MESSAGE", e.to_string()))
                        .await;
                    return true;
                }
            };

            // Handle the message
            handle_client_message(client_msg, state, handle).await;
            true
        }
        Message::Binary(_) => {
            // Binary messages not supported
            let _ = handle
                .send(ServerMessage::error(
                    "UNSUPPORTED_FORMAT",
                    "Binary messages are not supported",
                ))
                .await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

/// Handle a parsed client message
#[tracing::instrument(
    name = "ws.message",
    skip(state, handle),
    fields(
        connection_id = %handle.id,
        user_id = %handle.user_id,
        message_type = ?msg
    )
)]
pub async fn handle_client_message(
    msg: ClientMessage,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) {
    match msg {
        ClientMessage::JoinChatRoom { room } => {
            handle_join(room, state, handle).await;
        }
        ClientMessage::LeaveChatRoom { room } => {
            handle_leave(room, state, handle).await;
        }
        ClientMessage::TypingStart { room, user_id, .. } => {
            // The payload's user id is trusted as-is; presence is advisory
            // and there is no membership check before typing events.
            if let Some(typing_users) = state.typing.start(&room, &user_id) {
                state
                    .dispatcher
                    .to_room(&room, ServerMessage::typing_update(room.clone(), typing_users))
                    .await;
            }
        }
        ClientMessage::TypingStop { room, user_id, .. } => {
            if let Some(typing_users) = state.typing.stop(&room, &user_id) {
                state
                    .dispatcher
                    .to_room(&room, ServerMessage::typing_update(room.clone(), typing_users))
                    .await;
            }
        }
        // Legacy variants: bare course subscription, no ack and no typing
        // machinery
        ClientMessage::JoinCourse { course_id } => {
            let room = RoomKey::course(course_id);
            state.registry.join_room(handle.id, &room).await;
        }
        ClientMessage::LeaveCourse { course_id } => {
            let room = RoomKey::course(course_id);
            state.registry.leave_room(handle.id, &room).await;
        }
    }
}

/// Subscribe to a room and acknowledge privately to the joining connection
async fn handle_join(room: RoomKey, state: &AppState, handle: &Arc<ConnectionHandle>) {
    state.registry.join_room(handle.id, &room).await;

    tracing::info!(
        connection_id = %handle.id,
        room = %room,
        "Joined chat room"
    );

    let _ = handle.send(ServerMessage::joined(room)).await;
}

/// Unsubscribe from a room; the leaver's typing flag is dropped and the
/// room's presence republished if it changed
async fn handle_leave(room: RoomKey, state: &AppState, handle: &Arc<ConnectionHandle>) {
    state.registry.leave_room(handle.id, &room).await;

    tracing::info!(
        connection_id = %handle.id,
        room = %room,
        "Left chat room"
    );

    if let Some(typing_users) = state.typing.stop(&room, &handle.user_id) {
        state
            .dispatcher
            .to_room(&room, ServerMessage::typing_update(room.clone(), typing_users))
            .await;
    }
}
