use chrono::{DateTime, Utc};
use parley_types::models::{
    Attachment, Message, Participant, ParticipantFlag, RoomDetail, RoomSummary, RoomType, User,
    UserSummary,
};
use parley_types::reactions::Reactions;
use uuid::Uuid;

use crate::Result;

/// A message about to be written. At least one of `content`/`attachment` is set.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    pub is_ai: bool,
}

/// Persistence operations the chat core depends on.
///
/// Calls are blocking; async callers go through `spawn_blocking`.
pub trait ChatStore: Send + Sync {
    fn get_user(&self, user_id: Uuid) -> Result<User>;

    /// Every user except `exclude` and the assistant, by name.
    fn list_users(&self, exclude: Uuid) -> Result<Vec<UserSummary>>;

    /// Only presence transitions call this.
    fn set_user_presence(&self, user_id: Uuid, is_online: bool, last_seen: DateTime<Utc>)
    -> Result<()>;

    /// Create a room with `creator` plus `others`. A `direct` room for a pair
    /// that already has one returns the existing room instead.
    fn create_room(&self, room_type: RoomType, creator: Uuid, others: &[Uuid])
    -> Result<RoomDetail>;

    fn room_detail(&self, room_id: Uuid) -> Result<RoomDetail>;

    /// Rooms `user_id` participates in, most recently active first.
    fn find_rooms_for_user(&self, user_id: Uuid) -> Result<Vec<RoomSummary>>;

    fn delete_room(&self, room_id: Uuid) -> Result<()>;

    fn is_participant(&self, room_id: Uuid, user_id: Uuid) -> Result<bool>;

    fn participant_for(&self, room_id: Uuid, user_id: Uuid) -> Result<Participant>;

    fn set_participant_flag(
        &self,
        participant_id: Uuid,
        flag: ParticipantFlag,
        value: bool,
    ) -> Result<Participant>;

    /// Move the participant's read mark to now and flag others' messages as read.
    fn mark_read(&self, room_id: Uuid, user_id: Uuid) -> Result<Participant>;

    /// Insert the message and stamp the room's `last_message_at` atomically.
    fn insert_message(&self, message: &NewMessage) -> Result<Message>;

    fn get_message(&self, message_id: Uuid) -> Result<Message>;

    /// Oldest first.
    fn list_messages(&self, room_id: Uuid) -> Result<Vec<Message>>;

    fn message_reactions(&self, message_id: Uuid) -> Result<Reactions>;

    fn set_message_reactions(&self, message_id: Uuid, reactions: &Reactions) -> Result<()>;

    /// Read-toggle-write of one reaction as a single transaction.
    /// Returns the message with its updated reaction map.
    fn toggle_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<Message>;
}
