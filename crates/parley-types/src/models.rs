use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reactions::Reactions;

/// Well-known id of the rule-based assistant. Seeded by the database migrations.
pub const ASSISTANT_USER_ID: Uuid = Uuid::from_u128(0xa1a1);

/// Public view of a user. Password hashes never leave the db crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// Written only by presence transitions.
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Directory entry for picking whom to start a conversation with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            is_online: user.is_online,
            last_seen: user.last_seen,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    #[default]
    Direct,
    Group,
    Ai,
}

impl RoomType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Ai => "ai",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            "ai" => Some(Self::Ai),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: Uuid,
    pub room_type: RoomType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Never moves backwards; stamped once per accepted message.
    pub last_message_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: DateTime<Utc>,
    pub is_archived: bool,
    pub is_muted: bool,
}

/// Per-participant boolean preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantFlag {
    Archived,
    Muted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub mime_type: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    pub is_read: bool,
    pub is_ai: bool,
    pub reactions: Reactions,
    pub created_at: DateTime<Utc>,
}

/// A room together with its participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDetail {
    #[serde(flatten)]
    pub room: ChatRoom,
    pub participants: Vec<Participant>,
}

/// Room as listed for one user: participants, latest message and unread count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: ChatRoom,
    pub participants: Vec<Participant>,
    pub last_message: Option<Message>,
    pub unread_count: u32,
}

impl RoomSummary {
    pub fn id(&self) -> Uuid {
        self.room.id
    }
}
