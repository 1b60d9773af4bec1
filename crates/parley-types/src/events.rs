use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Attachment, Message};
use crate::reactions::Reactions;

/// Commands sent FROM client TO server over the WebSocket gateway.
///
/// Frames look like `{"type": "message:send", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientEvent {
    /// Authenticate a connection that was not authenticated at upgrade time.
    #[serde(rename = "identify")]
    Identify { token: String },

    /// Announce this connection as a live presence for its user.
    /// `user_id`, when sent, must match the authenticated identity.
    #[serde(rename = "presence:online")]
    PresenceOnline {
        #[serde(default)]
        user_id: Option<Uuid>,
    },

    /// Withdraw this connection's presence without closing it.
    #[serde(rename = "presence:offline")]
    PresenceOffline,

    #[serde(rename = "room:join")]
    RoomJoin { room_id: Uuid },

    #[serde(rename = "room:leave")]
    RoomLeave { room_id: Uuid },

    #[serde(rename = "message:send")]
    MessageSend {
        room_id: Uuid,
        #[serde(default)]
        sender_id: Option<Uuid>,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        attachment: Option<Attachment>,
    },

    #[serde(rename = "reaction:toggle")]
    ReactionToggle { message_id: Uuid, emoji: String },

    #[serde(rename = "typing:start")]
    TypingStart { room_id: Uuid },

    #[serde(rename = "typing:stop")]
    TypingStop { room_id: Uuid },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "identify",
            Self::PresenceOnline { .. } => "presence:online",
            Self::PresenceOffline => "presence:offline",
            Self::RoomJoin { .. } => "room:join",
            Self::RoomLeave { .. } => "room:leave",
            Self::MessageSend { .. } => "message:send",
            Self::ReactionToggle { .. } => "reaction:toggle",
            Self::TypingStart { .. } => "typing:start",
            Self::TypingStop { .. } => "typing:stop",
        }
    }
}

/// Events sent FROM server TO client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Server confirms successful authentication
    #[serde(rename = "ready")]
    Ready { user_id: Uuid, name: String },

    /// Reply to `presence:online`, sent to that connection only.
    #[serde(rename = "presence:snapshot")]
    PresenceSnapshot { user_ids: Vec<Uuid> },

    /// Global: one user's online state changed.
    #[serde(rename = "presence:changed")]
    PresenceChanged { user_id: Uuid, is_online: bool },

    #[serde(rename = "room:joined")]
    RoomJoined { room_id: Uuid },

    #[serde(rename = "room:left")]
    RoomLeft { room_id: Uuid },

    #[serde(rename = "message:new")]
    MessageNew(Message),

    /// Full reaction map of one message. Clients replace, never merge.
    #[serde(rename = "reaction:update")]
    ReactionUpdate {
        room_id: Uuid,
        message_id: Uuid,
        reactions: Reactions,
    },

    #[serde(rename = "typing:start")]
    TypingStart { room_id: Uuid, user_id: Uuid },

    #[serde(rename = "typing:stop")]
    TypingStop { room_id: Uuid, user_id: Uuid },

    /// Failure of one inbound event, reported to its sender only.
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event: Option<String>,
    },
}
