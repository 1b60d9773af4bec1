use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;
use uuid::Uuid;

use parley_types::events::ServerEvent;
use parley_types::models::{Message, RoomSummary};
use parley_types::reactions::Reactions;

/// An optimistic reaction toggle awaiting the server's answer.
///
/// Hand it back to [`ChatState::rollback_reaction`] if the request fails.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReaction {
    pub room_id: Uuid,
    pub message_id: Uuid,
    pub emoji: String,
    user_id: Uuid,
    /// Server updates seen for the message when the toggle began.
    generation: u64,
}

/// Local mirror of everything the signed-in user can see.
#[derive(Debug, Default)]
pub struct ChatState {
    user_id: Option<Uuid>,
    /// Most recently active first.
    rooms: Vec<RoomSummary>,
    selected: Option<Uuid>,
    messages: HashMap<Uuid, Vec<Message>>,
    online: HashSet<Uuid>,
    joined: HashSet<Uuid>,
    typing: HashMap<Uuid, BTreeSet<Uuid>>,
    reaction_generations: HashMap<Uuid, u64>,
}

impl ChatState {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    // -- Rooms --

    pub fn rooms(&self) -> &[RoomSummary] {
        &self.rooms
    }

    pub fn room(&self, room_id: Uuid) -> Option<&RoomSummary> {
        self.rooms.iter().find(|room| room.id() == room_id)
    }

    /// Replace the room list, e.g. after fetching it on reconnect.
    pub fn set_rooms(&mut self, rooms: Vec<RoomSummary>) {
        self.rooms = rooms;
        self.sort_rooms();
    }

    /// Insert or replace a room and move it to the front.
    pub fn upsert_room(&mut self, room: RoomSummary) {
        self.rooms.retain(|existing| existing.id() != room.id());
        self.rooms.insert(0, room);
    }

    /// Select a room and clear its unread count. Returns `false` for rooms
    /// not in the list.
    pub fn select_room(&mut self, room_id: Uuid) -> bool {
        match self.rooms.iter_mut().find(|room| room.id() == room_id) {
            Some(room) => {
                room.unread_count = 0;
                self.selected = Some(room_id);
                true
            }
            None => false,
        }
    }

    pub fn selected_room(&self) -> Option<&RoomSummary> {
        self.selected.and_then(|room_id| self.room(room_id))
    }

    pub fn is_joined(&self, room_id: Uuid) -> bool {
        self.joined.contains(&room_id)
    }

    fn sort_rooms(&mut self) {
        // Stable: rooms with equal activity keep their relative order.
        self.rooms
            .sort_by(|a, b| b.room.last_message_at.cmp(&a.room.last_message_at));
    }

    // -- Messages --

    pub fn messages(&self, room_id: Uuid) -> &[Message] {
        self.messages.get(&room_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replace a room's history with a fetched page, oldest first.
    pub fn set_messages(&mut self, room_id: Uuid, messages: Vec<Message>) {
        let mut seen = HashSet::new();
        let messages = messages
            .into_iter()
            .filter(|message| seen.insert(message.id))
            .collect();
        self.messages.insert(room_id, messages);
    }

    /// Append a message that arrived live. Duplicates (by id) are ignored and
    /// return `false`.
    pub fn add_message(&mut self, message: Message) -> bool {
        let list = self.messages.entry(message.room_id).or_default();
        if list.iter().any(|existing| existing.id == message.id) {
            return false;
        }

        let room_id = message.room_id;
        let from_other = self.user_id != Some(message.sender_id);
        let is_selected = self.selected == Some(room_id);

        if let Some(typists) = self.typing.get_mut(&room_id) {
            typists.remove(&message.sender_id);
        }

        if let Some(room) = self.rooms.iter_mut().find(|room| room.id() == room_id) {
            if message.created_at > room.room.last_message_at {
                room.room.last_message_at = message.created_at;
                room.room.updated_at = message.created_at;
            }
            if from_other && !is_selected {
                room.unread_count += 1;
            }
            room.last_message = Some(message.clone());
        } else {
            debug!("Message {} for unknown room {}", message.id, room_id);
        }

        list.push(message);
        self.sort_rooms();
        true
    }

    fn message_mut(&mut self, room_id: Uuid, message_id: Uuid) -> Option<&mut Message> {
        self.messages
            .get_mut(&room_id)?
            .iter_mut()
            .find(|message| message.id == message_id)
    }

    // -- Presence and typing --

    pub fn set_online(&mut self, user_ids: impl IntoIterator<Item = Uuid>) {
        self.online = user_ids.into_iter().collect();
    }

    pub fn set_user_online(&mut self, user_id: Uuid, is_online: bool) {
        if is_online {
            self.online.insert(user_id);
        } else {
            self.online.remove(&user_id);
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.online.contains(&user_id)
    }

    pub fn online_users(&self) -> &HashSet<Uuid> {
        &self.online
    }

    pub fn typing_users(&self, room_id: Uuid) -> Vec<Uuid> {
        self.typing
            .get(&room_id)
            .map(|users| users.iter().copied().collect())
            .unwrap_or_default()
    }

    fn set_typing(&mut self, room_id: Uuid, user_id: Uuid, typing: bool) {
        if typing {
            self.typing.entry(room_id).or_default().insert(user_id);
        } else if let Some(users) = self.typing.get_mut(&room_id) {
            users.remove(&user_id);
            if users.is_empty() {
                self.typing.remove(&room_id);
            }
        }
    }

    // -- Reactions --

    /// Toggle the local user's reaction immediately and return what is
    /// needed to undo it. `None` if the message is not loaded.
    pub fn begin_reaction_toggle(
        &mut self,
        room_id: Uuid,
        message_id: Uuid,
        emoji: &str,
    ) -> Option<PendingReaction> {
        let user_id = self.user_id?;
        let generation = self.reaction_generation(message_id);
        let message = self.message_mut(room_id, message_id)?;

        message.reactions.toggle(emoji, user_id);

        Some(PendingReaction {
            room_id,
            message_id,
            emoji: emoji.to_string(),
            user_id,
            generation,
        })
    }

    /// Undo a failed optimistic toggle by toggling the same pair back.
    /// Other toggles still in flight on the message are left alone, in
    /// whatever order their answers arrive. Skipped (returns `false`) once
    /// a server `reaction:update` for the message has landed, since that
    /// state is authoritative.
    pub fn rollback_reaction(&mut self, pending: PendingReaction) -> bool {
        if self.reaction_generation(pending.message_id) != pending.generation {
            debug!(
                "Rollback of {} on {} superseded by server state",
                pending.emoji, pending.message_id
            );
            return false;
        }

        match self.message_mut(pending.room_id, pending.message_id) {
            Some(message) => {
                message.reactions.toggle(&pending.emoji, pending.user_id);
                true
            }
            None => false,
        }
    }

    /// Replace (never merge) a message's reactions with the server's map.
    fn replace_reactions(&mut self, room_id: Uuid, message_id: Uuid, reactions: Reactions) {
        *self.reaction_generations.entry(message_id).or_insert(0) += 1;

        if let Some(room) = self.rooms.iter_mut().find(|room| room.id() == room_id) {
            if let Some(last) = room.last_message.as_mut().filter(|m| m.id == message_id) {
                last.reactions = reactions.clone();
            }
        }
        if let Some(message) = self.message_mut(room_id, message_id) {
            message.reactions = reactions;
        }
    }

    fn reaction_generation(&self, message_id: Uuid) -> u64 {
        self.reaction_generations
            .get(&message_id)
            .copied()
            .unwrap_or(0)
    }

    // -- Server events --

    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::Ready { user_id, .. } => self.user_id = Some(*user_id),
            ServerEvent::PresenceSnapshot { user_ids } => self.set_online(user_ids.iter().copied()),
            ServerEvent::PresenceChanged { user_id, is_online } => {
                self.set_user_online(*user_id, *is_online)
            }
            ServerEvent::RoomJoined { room_id } => {
                self.joined.insert(*room_id);
            }
            ServerEvent::RoomLeft { room_id } => {
                self.joined.remove(room_id);
                self.typing.remove(room_id);
            }
            ServerEvent::MessageNew(message) => {
                self.add_message(message.clone());
            }
            ServerEvent::ReactionUpdate {
                room_id,
                message_id,
                reactions,
            } => self.replace_reactions(*room_id, *message_id, reactions.clone()),
            ServerEvent::TypingStart { room_id, user_id } => {
                self.set_typing(*room_id, *user_id, true)
            }
            ServerEvent::TypingStop { room_id, user_id } => {
                self.set_typing(*room_id, *user_id, false)
            }
            ServerEvent::Error { code, message, .. } => {
                debug!("Server reported {}: {}", code, message);
            }
        }
    }

    /// Forget everything, e.g. on sign-out.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use parley_types::models::{ChatRoom, RoomType};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn room(last_message_at: i64) -> RoomSummary {
        RoomSummary {
            room: ChatRoom {
                id: Uuid::new_v4(),
                room_type: RoomType::Direct,
                created_at: at(0),
                updated_at: at(0),
                last_message_at: at(last_message_at),
            },
            participants: Vec::new(),
            last_message: None,
            unread_count: 0,
        }
    }

    fn message(room_id: Uuid, sender_id: Uuid, seconds: i64) -> Message {
        Message {
            id: Uuid::new_v4(),
            room_id,
            sender_id,
            content: Some("hi".into()),
            attachment: None,
            is_read: false,
            is_ai: false,
            reactions: Reactions::new(),
            created_at: at(seconds),
        }
    }

    fn ids(state: &ChatState) -> Vec<Uuid> {
        state.rooms().iter().map(RoomSummary::id).collect()
    }

    #[test]
    fn rooms_are_sorted_by_activity() {
        let (a, b, c) = (room(1), room(3), room(2));
        let expected = vec![b.id(), c.id(), a.id()];

        let mut state = ChatState::new(Uuid::new_v4());
        state.set_rooms(vec![a, b, c]);
        assert_eq!(ids(&state), expected);
    }

    #[test]
    fn upsert_moves_room_to_front_without_duplicating() {
        let (a, b) = (room(2), room(1));
        let mut state = ChatState::new(Uuid::new_v4());
        state.set_rooms(vec![a.clone(), b.clone()]);

        state.upsert_room(b.clone());
        assert_eq!(ids(&state), vec![b.id(), a.id()]);
    }

    #[test]
    fn incoming_message_bumps_room_and_counts_unread() {
        let me = Uuid::new_v4();
        let friend = Uuid::new_v4();
        let (quiet, busy) = (room(1), room(5));
        let mut state = ChatState::new(me);
        state.set_rooms(vec![quiet.clone(), busy.clone()]);

        let incoming = message(quiet.id(), friend, 10);
        assert!(state.add_message(incoming.clone()));

        assert_eq!(ids(&state), vec![quiet.id(), busy.id()]);
        let bumped = state.room(quiet.id()).unwrap();
        assert_eq!(bumped.unread_count, 1);
        assert_eq!(bumped.room.last_message_at, at(10));
        assert_eq!(bumped.last_message.as_ref(), Some(&incoming));

        // own messages and the selected room never count as unread
        state.add_message(message(quiet.id(), me, 11));
        assert_eq!(state.room(quiet.id()).unwrap().unread_count, 1);
        assert!(state.select_room(quiet.id()));
        assert_eq!(state.room(quiet.id()).unwrap().unread_count, 0);
        state.add_message(message(quiet.id(), friend, 12));
        assert_eq!(state.room(quiet.id()).unwrap().unread_count, 0);
    }

    #[test]
    fn duplicate_message_is_ignored() {
        let mut state = ChatState::new(Uuid::new_v4());
        let r = room(0);
        state.set_rooms(vec![r.clone()]);
        let m = message(r.id(), Uuid::new_v4(), 1);

        assert!(state.add_message(m.clone()));
        assert!(!state.add_message(m));
        assert_eq!(state.messages(r.id()).len(), 1);
        assert_eq!(state.room(r.id()).unwrap().unread_count, 1);
    }

    #[test]
    fn set_messages_drops_repeated_ids() {
        let mut state = ChatState::new(Uuid::new_v4());
        let room_id = Uuid::new_v4();
        let m = message(room_id, Uuid::new_v4(), 1);

        state.set_messages(room_id, vec![m.clone(), m]);
        assert_eq!(state.messages(room_id).len(), 1);
    }

    #[test]
    fn presence_events_maintain_online_set() {
        let mut state = ChatState::new(Uuid::new_v4());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        state.apply(&ServerEvent::PresenceSnapshot { user_ids: vec![a] });
        state.apply(&ServerEvent::PresenceChanged {
            user_id: b,
            is_online: true,
        });
        assert!(state.is_online(a) && state.is_online(b));

        state.apply(&ServerEvent::PresenceChanged {
            user_id: a,
            is_online: false,
        });
        assert!(!state.is_online(a));
        assert_eq!(state.online_users().len(), 1);
    }

    #[test]
    fn typing_clears_on_stop_and_on_message() {
        let mut state = ChatState::new(Uuid::new_v4());
        let room_id = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        state.apply(&ServerEvent::TypingStart { room_id, user_id: a });
        state.apply(&ServerEvent::TypingStart { room_id, user_id: b });
        state.apply(&ServerEvent::TypingStop { room_id, user_id: a });
        assert_eq!(state.typing_users(room_id), vec![b]);

        state.apply(&ServerEvent::MessageNew(message(room_id, b, 1)));
        assert!(state.typing_users(room_id).is_empty());
    }

    #[test]
    fn failed_toggle_rolls_back() {
        let me = Uuid::new_v4();
        let mut state = ChatState::new(me);
        let room_id = Uuid::new_v4();
        let m = message(room_id, Uuid::new_v4(), 1);
        state.set_messages(room_id, vec![m.clone()]);

        let pending = state.begin_reaction_toggle(room_id, m.id, "🎉").unwrap();
        assert!(state.messages(room_id)[0].reactions.contains("🎉", me));

        assert!(state.rollback_reaction(pending));
        assert!(state.messages(room_id)[0].reactions.is_empty());
    }

    #[test]
    fn overlapping_failed_toggles_roll_back_in_any_order() {
        let me = Uuid::new_v4();
        let mut state = ChatState::new(me);
        let room_id = Uuid::new_v4();
        let m = message(room_id, Uuid::new_v4(), 1);
        state.set_messages(room_id, vec![m.clone()]);

        let thumbs = state.begin_reaction_toggle(room_id, m.id, "👍").unwrap();
        let party = state.begin_reaction_toggle(room_id, m.id, "🎉").unwrap();

        assert!(state.rollback_reaction(thumbs));
        let partial = &state.messages(room_id)[0].reactions;
        assert!(!partial.contains("👍", me));
        assert!(partial.contains("🎉", me));

        assert!(state.rollback_reaction(party));
        assert!(state.messages(room_id)[0].reactions.is_empty());
    }

    #[test]
    fn one_failed_toggle_keeps_the_other() {
        let me = Uuid::new_v4();
        let mut state = ChatState::new(me);
        let room_id = Uuid::new_v4();
        let m = message(room_id, Uuid::new_v4(), 1);
        state.set_messages(room_id, vec![m.clone()]);

        let _thumbs = state.begin_reaction_toggle(room_id, m.id, "👍").unwrap();
        let party = state.begin_reaction_toggle(room_id, m.id, "🎉").unwrap();

        assert!(state.rollback_reaction(party));
        let reactions = &state.messages(room_id)[0].reactions;
        assert!(reactions.contains("👍", me));
        assert_eq!(reactions.len(), 1);
    }

    #[test]
    fn server_update_wins_over_rollback() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut state = ChatState::new(me);
        let room_id = Uuid::new_v4();
        let m = message(room_id, other, 1);
        state.set_messages(room_id, vec![m.clone()]);

        let pending = state.begin_reaction_toggle(room_id, m.id, "👍").unwrap();
        let server: Reactions = [("👍".to_string(), vec![other])].into_iter().collect();
        state.apply(&ServerEvent::ReactionUpdate {
            room_id,
            message_id: m.id,
            reactions: server.clone(),
        });

        assert!(!state.rollback_reaction(pending));
        assert_eq!(state.messages(room_id)[0].reactions, server);
    }

    #[test]
    fn toggle_needs_a_loaded_message() {
        let mut state = ChatState::new(Uuid::new_v4());
        assert!(
            state
                .begin_reaction_toggle(Uuid::new_v4(), Uuid::new_v4(), "👍")
                .is_none()
        );
    }

    #[test]
    fn clear_forgets_everything() {
        let mut state = ChatState::new(Uuid::new_v4());
        let r = room(0);
        state.set_rooms(vec![r.clone()]);
        state.select_room(r.id());
        state.apply(&ServerEvent::RoomJoined { room_id: r.id() });

        state.clear();
        assert!(state.rooms().is_empty());
        assert!(state.selected_room().is_none());
        assert!(!state.is_joined(r.id()));
        assert_eq!(state.user_id(), None);
    }
}
