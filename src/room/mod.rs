//! Room identifiers.
//!
//! A room is a logical broadcast channel keyed by (scope, id). Rooms are
//! never created or destroyed explicitly; an empty room is just a key with
//! no subscribed connections, and nothing about a room is persisted.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of entity a chat room is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomScope {
    /// Academic-year-wide chat
    Academic,
    /// Course-offering chat
    Course,
}

impl RoomScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomScope::Academic => "ACADEMIC",
            RoomScope::Course => "COURSE",
        }
    }
}

impl std::str::FromStr for RoomScope {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACADEMIC" => Ok(RoomScope::Academic),
            "COURSE" => Ok(RoomScope::Course),
            _ => Err(()),
        }
    }
}

/// Composite room key: (scope kind, scope id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomKey {
    #[serde(rename = "roomType")]
    pub scope: RoomScope,
    #[serde(rename = "roomId")]
    pub id: String,
}

impl RoomKey {
    pub fn new(scope: RoomScope, id: impl Into<String>) -> Self {
        Self {
            scope,
            id: id.into(),
        }
    }

    pub fn course(id: impl Into<String>) -> Self {
        Self::new(RoomScope::Course, id)
    }

    pub fn academic(id: impl Into<String>) -> Self {
        Self::new(RoomScope::Academic, id)
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope.as_str(), self.id)
    }
}
