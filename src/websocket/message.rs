use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::room::RoomKey;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinChatRoom {
        #[serde(flatten)]
        room: RoomKey,
    },
    LeaveChatRoom {
        #[serde(flatten)]
        room: RoomKey,
    },
    TypingStart {
        #[serde(flatten)]
        room: RoomKey,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "userName", default)]
        user_name: Option<String>,
    },
    TypingStop {
        #[serde(flatten)]
        room: RoomKey,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "userName", default)]
        user_name: Option<String>,
    },
    /// Legacy single-id variant: subscribe to a course room without the
    /// join acknowledgement or typing machinery
    JoinCourse {
        #[serde(rename = "courseId")]
        course_id: String,
    },
    /// Legacy counterpart of `join-course`
    LeaveCourse {
        #[serde(rename = "courseId")]
        course_id: String,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Unicast acknowledgement of a join
    JoinedChatRoom {
        #[serde(flatten)]
        room: RoomKey,
    },
    /// Room broadcast of the current typing set
    TypingUpdate {
        #[serde(flatten)]
        room: RoomKey,
        #[serde(rename = "typingUsers")]
        typing_users: Vec<String>,
    },
    /// Room broadcast of a persisted chat message (REST-triggered; the
    /// payload already carries its generated id and timestamp)
    NewMessage {
        #[serde(rename = "payload")]
        message: Value,
    },
    /// Room broadcast of a message deletion (REST-triggered)
    MessageDeleted {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(flatten)]
        room: RoomKey,
    },
    /// Unicast personal notification (REST-triggered)
    Notification {
        #[serde(rename = "payload")]
        payload: Value,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn joined(room: RoomKey) -> Self {
        Self::JoinedChatRoom { room }
    }

    pub fn typing_update(room: RoomKey, typing_users: Vec<String>) -> Self {
        Self::TypingUpdate { room, typing_users }
    }
}

/// Outbound wrapper: either a message still to be serialized, or one
/// serialized once and shared across a fan-out
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Raw(ServerMessage),
    Preserialized(Arc<String>),
}

impl OutboundMessage {
    pub fn preserialized(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        Ok(Self::Preserialized(Arc::new(serde_json::to_string(
            message,
        )?)))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Raw(message) => serde_json::to_string(message),
            Self::Preserialized(json) => Ok(json.as_ref().clone()),
        }
    }
}
