use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::{api_key_auth, AppState};

use super::handlers::{publish_message, publish_message_deleted, room_members, send_notification};
use super::health::{health, stats};

pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        // Broadcast endpoints called by the REST layer after database writes
        .nest(
            "/api/v1",
            Router::new()
                .route("/rooms/message", post(publish_message))
                .route("/rooms/message-deleted", post(publish_message_deleted))
                .route("/rooms/{room_type}/{room_id}/members", get(room_members))
                .route("/notifications/send", post(send_notification))
                .layer(middleware::from_fn_with_state(state, api_key_auth)),
        )
}
