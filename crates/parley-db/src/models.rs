//! Database row types. These map directly to SQLite rows.
//! Distinct from parley-types models to keep the DB layer independent.

use chrono::{DateTime, SecondsFormat, Utc};
use parley_types::models::{
    Attachment, ChatRoom, Message, Participant, RoomType, User,
};
use parley_types::reactions::Reactions;
use rusqlite::Row;
use uuid::Uuid;

use crate::{DbError, Result};

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub is_online: bool,
    pub last_seen: String,
    pub created_at: String,
}

pub struct RoomRow {
    pub id: String,
    pub room_type: String,
    pub created_at: String,
    pub updated_at: String,
    pub last_message_at: String,
}

pub struct ParticipantRow {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub user_name: String,
    pub joined_at: String,
    pub last_read_at: String,
    pub is_archived: bool,
    pub is_muted: bool,
}

pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: Option<String>,
    pub attachment_url: Option<String>,
    pub attachment_type: Option<String>,
    pub attachment_name: Option<String>,
    pub is_read: bool,
    pub is_ai: bool,
    pub reactions: String,
    pub created_at: String,
}

pub(crate) const USER_COLUMNS: &str =
    "id, name, email, password, is_online, last_seen, created_at";
pub(crate) const ROOM_COLUMNS: &str =
    "r.id, r.room_type, r.created_at, r.updated_at, r.last_message_at";
pub(crate) const PARTICIPANT_COLUMNS: &str =
    "p.id, p.room_id, p.user_id, u.name, p.joined_at, p.last_read_at, p.is_archived, p.is_muted";
pub(crate) const MESSAGE_COLUMNS: &str = "m.id, m.room_id, m.sender_id, m.content, \
     m.attachment_url, m.attachment_type, m.attachment_name, m.is_read, m.is_ai, \
     m.reactions, m.created_at";

impl UserRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            password: row.get(3)?,
            is_online: row.get(4)?,
            last_seen: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    pub fn into_user(self) -> Result<User> {
        Ok(User {
            id: parse_id(&self.id)?,
            name: self.name,
            email: self.email,
            is_online: self.is_online,
            last_seen: parse_timestamp(&self.last_seen)?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl RoomRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            room_type: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
            last_message_at: row.get(4)?,
        })
    }

    pub fn into_room(self) -> Result<ChatRoom> {
        let room_type = RoomType::parse(&self.room_type)
            .ok_or_else(|| DbError::Corrupt(format!("room type '{}'", self.room_type)))?;
        Ok(ChatRoom {
            id: parse_id(&self.id)?,
            room_type,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            last_message_at: parse_timestamp(&self.last_message_at)?,
        })
    }
}

impl ParticipantRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            room_id: row.get(1)?,
            user_id: row.get(2)?,
            user_name: row.get::<_, Option<String>>(3)?.unwrap_or_else(|| "unknown".to_string()),
            joined_at: row.get(4)?,
            last_read_at: row.get(5)?,
            is_archived: row.get(6)?,
            is_muted: row.get(7)?,
        })
    }

    pub fn into_participant(self) -> Result<Participant> {
        Ok(Participant {
            id: parse_id(&self.id)?,
            room_id: parse_id(&self.room_id)?,
            user_id: parse_id(&self.user_id)?,
            user_name: self.user_name,
            joined_at: parse_timestamp(&self.joined_at)?,
            last_read_at: parse_timestamp(&self.last_read_at)?,
            is_archived: self.is_archived,
            is_muted: self.is_muted,
        })
    }
}

impl MessageRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            room_id: row.get(1)?,
            sender_id: row.get(2)?,
            content: row.get(3)?,
            attachment_url: row.get(4)?,
            attachment_type: row.get(5)?,
            attachment_name: row.get(6)?,
            is_read: row.get(7)?,
            is_ai: row.get(8)?,
            reactions: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    pub fn into_message(self) -> Result<Message> {
        let attachment = self.attachment_url.map(|url| Attachment {
            url,
            mime_type: self
                .attachment_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            name: self.attachment_name.unwrap_or_default(),
        });
        let reactions: Reactions = serde_json::from_str(&self.reactions)?;

        Ok(Message {
            id: parse_id(&self.id)?,
            room_id: parse_id(&self.room_id)?,
            sender_id: parse_id(&self.sender_id)?,
            content: self.content,
            attachment,
            is_read: self.is_read,
            is_ai: self.is_ai,
            reactions: reactions.normalized(),
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub(crate) fn parse_id(value: &str) -> Result<Uuid> {
    value
        .parse()
        .map_err(|e| DbError::Corrupt(format!("id '{}': {}", value, e)))
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; treat it as UTC.
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .map_err(|e| DbError::Corrupt(format!("timestamp '{}': {}", value, e)))
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
