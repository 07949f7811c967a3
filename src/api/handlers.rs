//! Broadcast endpoints for the REST layer.
//!
//! The LMS backend calls these after its own database writes complete: the
//! coordinator performs no database access itself and trusts the caller's
//! payload shape as-is.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::room::{RoomKey, RoomScope};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct PublishMessageRequest {
    #[serde(flatten)]
    pub room: RoomKey,
    /// The persisted message row, already carrying its generated id and
    /// timestamp
    pub message: Value,
}

#[derive(Debug, Deserialize)]
pub struct PublishMessageDeletedRequest {
    #[serde(flatten)]
    pub room: RoomKey,
    #[serde(rename = "messageId")]
    pub message_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    #[serde(rename = "targetUserId")]
    pub target_user_id: String,
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub delivered_to: usize,
    pub failed: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RoomMembersResponse {
    pub room: RoomKey,
    pub members: Vec<String>,
    pub count: usize,
}

/// Broadcast a persisted chat message to its room
#[tracing::instrument(
    name = "http.publish_message",
    skip(state, request),
    fields(room = %request.room)
)]
pub async fn publish_message(
    State(state): State<AppState>,
    Json(request): Json<PublishMessageRequest>,
) -> Result<Json<BroadcastResponse>> {
    let result = state
        .dispatcher
        .publish_message(&request.room, request.message)
        .await;

    Ok(Json(BroadcastResponse {
        delivered_to: result.delivered_to,
        failed: result.failed,
        timestamp: Utc::now(),
    }))
}

/// Broadcast a message-deletion notice to its room
#[tracing::instrument(
    name = "http.publish_message_deleted",
    skip(state, request),
    fields(room = %request.room, message_id = %request.message_id)
)]
pub async fn publish_message_deleted(
    State(state): State<AppState>,
    Json(request): Json<PublishMessageDeletedRequest>,
) -> Result<Json<BroadcastResponse>> {
    let result = state
        .dispatcher
        .publish_message_deleted(&request.room, request.message_id)
        .await;

    Ok(Json(BroadcastResponse {
        delivered_to: result.delivered_to,
        failed: result.failed,
        timestamp: Utc::now(),
    }))
}

/// Unicast a personal notification to a user's current connection.
/// Delivering to an offline user is a no-op, not an error.
#[tracing::instrument(
    name = "http.send_notification",
    skip(state, request),
    fields(target_user_id = %request.target_user_id)
)]
pub async fn send_notification(
    State(state): State<AppState>,
    Json(request): Json<SendNotificationRequest>,
) -> Result<Json<BroadcastResponse>> {
    let result = state
        .dispatcher
        .notify_user(&request.target_user_id, request.payload)
        .await;

    Ok(Json(BroadcastResponse {
        delivered_to: result.delivered_to,
        failed: result.failed,
        timestamp: Utc::now(),
    }))
}

/// Who is currently subscribed to a room
#[tracing::instrument(name = "http.room_members", skip(state))]
pub async fn room_members(
    State(state): State<AppState>,
    Path((room_type, room_id)): Path<(String, String)>,
) -> Result<Json<RoomMembersResponse>> {
    let scope: RoomScope = room_type
        .parse()
        .map_err(|_| AppError::Validation(format!("Unknown room type: {}", room_type)))?;

    let room = RoomKey::new(scope, room_id);
    let members = state.dispatcher.members_of(&room);
    let count = members.len();

    Ok(Json(RoomMembersResponse {
        room,
        members,
        count,
    }))
}
