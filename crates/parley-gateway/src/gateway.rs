use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_db::{ChatStore, NewMessage};
use parley_types::events::{ClientEvent, ServerEvent};
use parley_types::models::{ASSISTANT_USER_ID, Attachment, Message, RoomType};

use crate::ConnectionId;
use crate::assistant;
use crate::dispatcher::{Dispatcher, EventReceiver};
use crate::error::ChatError;
use crate::presence::Arrival;

pub const MAX_MESSAGE_CHARS: usize = 4000;
pub const MAX_EMOJI_CHARS: usize = 16;

/// One authenticated connection.
///
/// Not `Clone`: `Gateway::disconnect` consumes it, so cleanup runs once.
#[derive(Debug)]
pub struct Session {
    pub conn_id: ConnectionId,
    pub user_id: Uuid,
    pub name: String,
}

/// The realtime chat core: presence, room subscriptions, message delivery
/// and reactions. Every write goes through the store before anything is
/// broadcast.
#[derive(Clone)]
pub struct Gateway {
    dispatcher: Dispatcher,
    store: Arc<dyn ChatStore>,
    /// Serializes presence transitions that have to be persisted.
    presence_gate: Arc<Mutex<()>>,
}

impl Gateway {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            dispatcher: Dispatcher::new(),
            store,
            presence_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Register an authenticated connection and queue its `ready` event.
    pub fn connect(&self, user_id: Uuid, name: impl Into<String>) -> (Session, EventReceiver) {
        let name = name.into();
        let (conn_id, rx) = self.dispatcher.register(user_id);
        self.dispatcher.send_to(
            conn_id,
            ServerEvent::Ready {
                user_id,
                name: name.clone(),
            },
        );
        info!("{} ready for {} ({})", conn_id, name, user_id);

        (
            Session {
                conn_id,
                user_id,
                name,
            },
            rx,
        )
    }

    /// Tear down a closed connection: drop its subscriptions, then its
    /// presence.
    pub async fn disconnect(&self, session: Session) {
        self.dispatcher.unregister(session.conn_id);
        if let Err(e) = self.go_offline(session.conn_id).await {
            warn!("{} offline transition not persisted: {}", session.conn_id, e);
        }
        info!(
            "{} closed for {} ({} connections live)",
            session.conn_id,
            session.user_id,
            self.dispatcher.connection_count()
        );
    }

    /// Handle one inbound event. Failures go back to the sender as an
    /// `error` event and nowhere else.
    pub async fn handle(&self, session: &Session, event: ClientEvent) {
        let name = event.name();
        if let Err(e) = self.dispatch(session, event).await {
            match &e {
                ChatError::Persistence(source) => {
                    error!("{} {} failed: {}", session.conn_id, name, source)
                }
                ChatError::Internal => error!("{} {} failed", session.conn_id, name),
                other => debug!("{} {} rejected: {}", session.conn_id, name, other),
            }
            self.report(session.conn_id, &e, Some(name));
        }
    }

    /// Send an `error` event to one connection.
    pub fn report(&self, conn_id: ConnectionId, err: &ChatError, event: Option<&str>) {
        self.dispatcher.send_to(
            conn_id,
            ServerEvent::Error {
                code: err.code().to_string(),
                message: err.to_string(),
                event: event.map(str::to_string),
            },
        );
    }

    async fn dispatch(&self, session: &Session, event: ClientEvent) -> Result<(), ChatError> {
        match event {
            ClientEvent::Identify { .. } => Err(ChatError::Validation(
                "connection is already identified".into(),
            )),
            ClientEvent::PresenceOnline { user_id } => {
                ensure_self(session, user_id)?;
                self.go_online(session).await
            }
            ClientEvent::PresenceOffline => self.go_offline(session.conn_id).await,
            ClientEvent::RoomJoin { room_id } => self.join_room(session, room_id).await,
            ClientEvent::RoomLeave { room_id } => {
                self.leave_room(session, room_id);
                Ok(())
            }
            ClientEvent::MessageSend {
                room_id,
                sender_id,
                content,
                attachment,
            } => {
                ensure_self(session, sender_id)?;
                self.send_message(
                    session.user_id,
                    Some(session.conn_id),
                    room_id,
                    content,
                    attachment,
                )
                .await
                .map(|_| ())
            }
            ClientEvent::ReactionToggle { message_id, emoji } => self
                .toggle_reaction(session.user_id, Some(session.conn_id), message_id, emoji)
                .await
                .map(|_| ()),
            ClientEvent::TypingStart { room_id } => {
                self.typing(session, room_id, true);
                Ok(())
            }
            ClientEvent::TypingStop { room_id } => {
                self.typing(session, room_id, false);
                Ok(())
            }
        }
    }

    // -- Presence --

    /// Count this connection as live presence. The first live connection of
    /// a user persists and announces the transition. The sender always gets
    /// the current snapshot.
    pub async fn go_online(&self, session: &Session) -> Result<(), ChatError> {
        {
            let _gate = self.presence_gate.lock().await;
            let user_id = session.user_id;

            if self.dispatcher.mark_online(session.conn_id, user_id) == Arrival::CameOnline {
                let now = Utc::now();
                if let Err(e) = self
                    .with_store(move |store| store.set_user_presence(user_id, true, now))
                    .await
                {
                    self.dispatcher.mark_offline(session.conn_id);
                    return Err(e);
                }

                info!("User {} is online", user_id);
                self.dispatcher.broadcast_global(ServerEvent::PresenceChanged {
                    user_id,
                    is_online: true,
                });
            }
        }

        self.dispatcher.send_to(
            session.conn_id,
            ServerEvent::PresenceSnapshot {
                user_ids: self.dispatcher.online_users(),
            },
        );
        Ok(())
    }

    /// Withdraw one connection's presence. Only the user's last live
    /// connection produces a transition. The registry and the broadcast
    /// follow the transition even when persisting it fails.
    pub async fn go_offline(&self, conn_id: ConnectionId) -> Result<(), ChatError> {
        let _gate = self.presence_gate.lock().await;

        let Some(departure) = self.dispatcher.mark_offline(conn_id) else {
            return Ok(());
        };
        if !departure.went_offline {
            return Ok(());
        }

        let user_id = departure.user_id;
        let now = Utc::now();
        let persisted = self
            .with_store(move |store| store.set_user_presence(user_id, false, now))
            .await;

        info!("User {} is offline", user_id);
        self.dispatcher.broadcast_global(ServerEvent::PresenceChanged {
            user_id,
            is_online: false,
        });
        persisted
    }

    // -- Rooms --

    pub async fn join_room(&self, session: &Session, room_id: Uuid) -> Result<(), ChatError> {
        let user_id = session.user_id;
        let allowed = self
            .with_store(move |store| store.is_participant(room_id, user_id))
            .await?;
        if !allowed {
            return Err(ChatError::not_participant());
        }

        if self.dispatcher.join(session.conn_id, room_id) {
            debug!("{} joined room {}", session.conn_id, room_id);
        }
        self.dispatcher
            .send_to(session.conn_id, ServerEvent::RoomJoined { room_id });
        Ok(())
    }

    pub fn leave_room(&self, session: &Session, room_id: Uuid) {
        if self.dispatcher.leave(session.conn_id, room_id) {
            debug!("{} left room {}", session.conn_id, room_id);
        }
        self.dispatcher
            .send_to(session.conn_id, ServerEvent::RoomLeft { room_id });
    }

    fn typing(&self, session: &Session, room_id: Uuid, started: bool) {
        if !self.dispatcher.is_subscribed(session.conn_id, room_id) {
            debug!("{} typing in unjoined room {}, dropped", session.conn_id, room_id);
            return;
        }

        let user_id = session.user_id;
        let event = if started {
            ServerEvent::TypingStart { room_id, user_id }
        } else {
            ServerEvent::TypingStop { room_id, user_id }
        };
        self.dispatcher
            .broadcast_except(room_id, session.conn_id, event);
    }

    // -- Messages --

    /// Validate, persist, then fan out a message. This is the only write
    /// path for messages; the HTTP endpoint calls it with no origin.
    ///
    /// `origin` receives the `message:new` echo even if it never joined the
    /// room.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        origin: Option<ConnectionId>,
        room_id: Uuid,
        content: Option<String>,
        attachment: Option<Attachment>,
    ) -> Result<Message, ChatError> {
        let room = self
            .with_store(move |store| store.room_detail(room_id))
            .await?;
        if !room.participants.iter().any(|p| p.user_id == sender_id) {
            return Err(ChatError::not_participant());
        }

        let (content, attachment) = validate_message(content, attachment)?;

        let draft = NewMessage {
            room_id,
            sender_id,
            content,
            attachment,
            is_ai: false,
        };
        let message = self
            .with_store(move |store| store.insert_message(&draft))
            .await?;

        let delivered = self.dispatcher.broadcast_with_echo(
            room_id,
            origin,
            ServerEvent::MessageNew(message.clone()),
        );
        debug!(
            "Message {} in room {} delivered to {} connections",
            message.id, room_id, delivered
        );

        if room.room.room_type == RoomType::Ai && sender_id != ASSISTANT_USER_ID {
            self.answer(&message, origin).await;
        }

        Ok(message)
    }

    /// Post the assistant's reply to a message in an `ai` room.
    /// The user's message is already delivered, so failures are only logged.
    async fn answer(&self, message: &Message, origin: Option<ConnectionId>) {
        let text = assistant::reply(message.content.as_deref().unwrap_or_default(), Utc::now());
        let draft = NewMessage {
            room_id: message.room_id,
            sender_id: ASSISTANT_USER_ID,
            content: Some(text),
            attachment: None,
            is_ai: true,
        };

        match self
            .with_store(move |store| store.insert_message(&draft))
            .await
        {
            Ok(reply) => {
                self.dispatcher.broadcast_with_echo(
                    reply.room_id,
                    origin,
                    ServerEvent::MessageNew(reply),
                );
            }
            Err(e) => warn!("Assistant reply in room {} failed: {}", message.room_id, e),
        }
    }

    // -- Reactions --

    /// Toggle `user_id`'s reaction and broadcast the message's full map.
    pub async fn toggle_reaction(
        &self,
        user_id: Uuid,
        origin: Option<ConnectionId>,
        message_id: Uuid,
        emoji: String,
    ) -> Result<Message, ChatError> {
        validate_emoji(&emoji)?;

        let message = self
            .with_store(move |store| {
                let message = store.get_message(message_id)?;
                if !store.is_participant(message.room_id, user_id)? {
                    return Ok(None);
                }
                store.toggle_reaction(message_id, user_id, &emoji).map(Some)
            })
            .await?
            .ok_or_else(ChatError::not_participant)?;

        self.dispatcher.broadcast_with_echo(
            message.room_id,
            origin,
            ServerEvent::ReactionUpdate {
                room_id: message.room_id,
                message_id,
                reactions: message.reactions.clone(),
            },
        );
        Ok(message)
    }

    /// Run a blocking store call off the async runtime.
    async fn with_store<F, T>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&dyn ChatStore) -> parley_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| {
                error!("Store task failed: {}", e);
                ChatError::Internal
            })?
            .map_err(ChatError::from)
    }
}

/// Client-supplied identity fields must match the authenticated user.
fn ensure_self(session: &Session, claimed: Option<Uuid>) -> Result<(), ChatError> {
    match claimed {
        Some(id) if id != session.user_id => Err(ChatError::Forbidden(
            "user id does not match the authenticated user".into(),
        )),
        _ => Ok(()),
    }
}

/// Blank content counts as absent. A message needs content or an attachment.
fn validate_message(
    content: Option<String>,
    attachment: Option<Attachment>,
) -> Result<(Option<String>, Option<Attachment>), ChatError> {
    let content = content.filter(|text| !text.trim().is_empty());
    if content
        .as_ref()
        .is_some_and(|text| text.chars().count() > MAX_MESSAGE_CHARS)
    {
        return Err(ChatError::Validation(format!(
            "content exceeds {MAX_MESSAGE_CHARS} characters"
        )));
    }

    if attachment
        .as_ref()
        .is_some_and(|file| file.url.trim().is_empty())
    {
        return Err(ChatError::Validation("attachment url is required".into()));
    }

    if content.is_none() && attachment.is_none() {
        return Err(ChatError::Validation(
            "message needs content or an attachment".into(),
        ));
    }
    Ok((content, attachment))
}

fn validate_emoji(emoji: &str) -> Result<(), ChatError> {
    if emoji.is_empty()
        || emoji.chars().count() > MAX_EMOJI_CHARS
        || emoji.chars().any(char::is_whitespace)
    {
        return Err(ChatError::Validation("invalid emoji".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use parley_db::{Database, DbError};
    use parley_types::models::{
        Participant, ParticipantFlag, RoomDetail, RoomSummary, User, UserSummary,
    };
    use parley_types::reactions::Reactions;

    fn user(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(id, name, &format!("{name}@example.com"), "hash")
            .unwrap();
        id
    }

    fn setup() -> (Arc<Database>, Gateway) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let gateway = Gateway::new(db.clone());
        (db, gateway)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    fn messages(events: &[ServerEvent]) -> Vec<&Message> {
        events
            .iter()
            .filter_map(|event| match event {
                ServerEvent::MessageNew(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn error_codes(events: &[ServerEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|event| match event {
                ServerEvent::Error { code, .. } => Some(code.as_str()),
                _ => None,
            })
            .collect()
    }

    fn send(room_id: Uuid, content: &str) -> ClientEvent {
        ClientEvent::MessageSend {
            room_id,
            sender_id: None,
            content: Some(content.into()),
            attachment: None,
        }
    }

    #[tokio::test]
    async fn connect_queues_ready() {
        let (db, gateway) = setup();
        let alice = user(&db, "alice");

        let (_session, mut rx) = gateway.connect(alice, "alice");
        assert_eq!(
            drain(&mut rx),
            vec![ServerEvent::Ready {
                user_id: alice,
                name: "alice".into()
            }]
        );
    }

    #[tokio::test]
    async fn message_reaches_subscribers_and_echoes_to_sender() {
        let (db, gateway) = setup();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let carol = user(&db, "carol");
        let room = db.create_room(RoomType::Direct, alice, &[bob]).unwrap().room;

        let (a, mut a_rx) = gateway.connect(alice, "alice");
        let (b, mut b_rx) = gateway.connect(bob, "bob");
        let (_c, mut c_rx) = gateway.connect(carol, "carol");
        gateway.handle(&b, ClientEvent::RoomJoin { room_id: room.id }).await;
        drain(&mut a_rx);
        drain(&mut b_rx);
        drain(&mut c_rx);

        // alice never joined the room but still gets her own echo
        gateway.handle(&a, send(room.id, "hi")).await;

        let to_alice = drain(&mut a_rx);
        let to_bob = drain(&mut b_rx);
        assert_eq!(messages(&to_alice).len(), 1);
        assert_eq!(messages(&to_bob).len(), 1);
        assert_eq!(messages(&to_bob)[0].content.as_deref(), Some("hi"));
        assert_eq!(messages(&to_bob)[0].sender_id, alice);
        assert!(drain(&mut c_rx).is_empty());

        assert_eq!(db.list_messages(room.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn joined_sender_gets_exactly_one_copy() {
        let (db, gateway) = setup();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let room = db.create_room(RoomType::Direct, alice, &[bob]).unwrap().room;

        let (a, mut a_rx) = gateway.connect(alice, "alice");
        gateway.handle(&a, ClientEvent::RoomJoin { room_id: room.id }).await;
        drain(&mut a_rx);

        gateway.handle(&a, send(room.id, "once")).await;
        assert_eq!(messages(&drain(&mut a_rx)).len(), 1);
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_a_row() {
        let (db, gateway) = setup();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let room = db.create_room(RoomType::Direct, alice, &[bob]).unwrap().room;

        let (a, mut a_rx) = gateway.connect(alice, "alice");
        let (b, mut b_rx) = gateway.connect(bob, "bob");
        gateway.handle(&b, ClientEvent::RoomJoin { room_id: room.id }).await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        let empty = ClientEvent::MessageSend {
            room_id: room.id,
            sender_id: Some(alice),
            content: Some("   ".into()),
            attachment: None,
        };
        gateway.handle(&a, empty).await;

        assert_eq!(error_codes(&drain(&mut a_rx)), vec!["validation"]);
        assert!(drain(&mut b_rx).is_empty());
        assert!(db.list_messages(room.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn attachment_only_message_is_accepted() {
        let (db, gateway) = setup();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let room = db.create_room(RoomType::Direct, alice, &[bob]).unwrap().room;

        let attachment = Attachment {
            url: "http://localhost/files/a.png".into(),
            mime_type: "image/png".into(),
            name: "a.png".into(),
        };
        let message = gateway
            .send_message(alice, None, room.id, None, Some(attachment.clone()))
            .await
            .unwrap();

        assert_eq!(message.content, None);
        assert_eq!(message.attachment, Some(attachment));
    }

    #[tokio::test]
    async fn spoofed_sender_is_forbidden() {
        let (db, gateway) = setup();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let room = db.create_room(RoomType::Direct, alice, &[bob]).unwrap().room;

        let (a, mut a_rx) = gateway.connect(alice, "alice");
        drain(&mut a_rx);
        let spoofed = ClientEvent::MessageSend {
            room_id: room.id,
            sender_id: Some(bob),
            content: Some("it's bob, honest".into()),
            attachment: None,
        };
        gateway.handle(&a, spoofed).await;

        assert_eq!(error_codes(&drain(&mut a_rx)), vec!["forbidden"]);
        assert!(db.list_messages(room.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn outsider_cannot_send_or_join() {
        let (db, gateway) = setup();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let carol = user(&db, "carol");
        let room = db.create_room(RoomType::Direct, alice, &[bob]).unwrap().room;

        let (c, mut c_rx) = gateway.connect(carol, "carol");
        drain(&mut c_rx);

        gateway.handle(&c, ClientEvent::RoomJoin { room_id: room.id }).await;
        gateway.handle(&c, send(room.id, "let me in")).await;

        assert_eq!(error_codes(&drain(&mut c_rx)), vec!["forbidden", "forbidden"]);
        assert!(gateway.dispatcher().subscribers_of(room.id).is_empty());
        assert!(db.list_messages(room.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn outsider_is_refused_before_payload_checks() {
        let (db, gateway) = setup();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let carol = user(&db, "carol");
        let room = db.create_room(RoomType::Direct, alice, &[bob]).unwrap().room;

        let result = gateway
            .send_message(carol, None, room.id, None, None)
            .await;
        assert!(matches!(result, Err(ChatError::Forbidden(_))));
    }

    #[tokio::test]
    async fn typing_is_not_echoed_to_sender() {
        let (db, gateway) = setup();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let room = db.create_room(RoomType::Direct, alice, &[bob]).unwrap().room;

        let (a, mut a_rx) = gateway.connect(alice, "alice");
        let (b, mut b_rx) = gateway.connect(bob, "bob");
        gateway.handle(&a, ClientEvent::RoomJoin { room_id: room.id }).await;
        gateway.handle(&b, ClientEvent::RoomJoin { room_id: room.id }).await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        gateway.handle(&a, ClientEvent::TypingStart { room_id: room.id }).await;

        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(
            drain(&mut b_rx),
            vec![ServerEvent::TypingStart {
                room_id: room.id,
                user_id: alice
            }]
        );
    }

    #[tokio::test]
    async fn typing_in_unjoined_room_is_dropped() {
        let (db, gateway) = setup();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let room = db.create_room(RoomType::Direct, alice, &[bob]).unwrap().room;

        let (a, mut a_rx) = gateway.connect(alice, "alice");
        let (b, mut b_rx) = gateway.connect(bob, "bob");
        gateway.handle(&b, ClientEvent::RoomJoin { room_id: room.id }).await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        gateway.handle(&a, ClientEvent::TypingStart { room_id: room.id }).await;
        assert!(drain(&mut a_rx).is_empty());
        assert!(drain(&mut b_rx).is_empty());
    }

    #[tokio::test]
    async fn second_tab_keeps_presence_until_last_disconnect() {
        let (db, gateway) = setup();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");

        let (observer, mut bob_rx) = gateway.connect(bob, "bob");
        let (tab_one, _rx_one) = gateway.connect(alice, "alice");
        let (tab_two, mut rx_two) = gateway.connect(alice, "alice");
        drain(&mut bob_rx);
        drain(&mut rx_two);

        gateway.handle(&tab_one, ClientEvent::PresenceOnline { user_id: Some(alice) }).await;
        gateway.handle(&tab_two, ClientEvent::PresenceOnline { user_id: None }).await;

        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerEvent::PresenceChanged {
                user_id: alice,
                is_online: true
            }]
        );
        assert!(drain(&mut rx_two).contains(&ServerEvent::PresenceSnapshot {
            user_ids: vec![alice]
        }));
        assert!(db.get_user(alice).unwrap().is_online);

        gateway.disconnect(tab_one).await;
        assert!(gateway.dispatcher().is_online(alice));
        assert!(drain(&mut bob_rx).is_empty());
        assert!(db.get_user(alice).unwrap().is_online);

        gateway.disconnect(tab_two).await;
        assert!(!gateway.dispatcher().is_online(alice));
        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerEvent::PresenceChanged {
                user_id: alice,
                is_online: false
            }]
        );
        assert!(!db.get_user(alice).unwrap().is_online);

        gateway.disconnect(observer).await;
        assert_eq!(gateway.dispatcher().connection_count(), 0);
    }

    #[tokio::test]
    async fn reaction_toggle_broadcasts_full_map() {
        let (db, gateway) = setup();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let room = db.create_room(RoomType::Direct, alice, &[bob]).unwrap().room;
        let message = gateway
            .send_message(bob, None, room.id, Some("nice".into()), None)
            .await
            .unwrap();

        let (a, mut a_rx) = gateway.connect(alice, "alice");
        let (b, mut b_rx) = gateway.connect(bob, "bob");
        gateway.handle(&b, ClientEvent::RoomJoin { room_id: room.id }).await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        let toggle = ClientEvent::ReactionToggle {
            message_id: message.id,
            emoji: "👍".into(),
        };
        gateway.handle(&a, toggle.clone()).await;

        let expected: Reactions = [("👍".to_string(), vec![alice])].into_iter().collect();
        let update = ServerEvent::ReactionUpdate {
            room_id: room.id,
            message_id: message.id,
            reactions: expected,
        };
        assert_eq!(drain(&mut b_rx), vec![update.clone()]);
        assert_eq!(drain(&mut a_rx), vec![update]);

        gateway.handle(&a, toggle).await;
        let cleared = ServerEvent::ReactionUpdate {
            room_id: room.id,
            message_id: message.id,
            reactions: Reactions::new(),
        };
        assert_eq!(drain(&mut b_rx), vec![cleared]);
        assert!(db.message_reactions(message.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn outsider_cannot_react() {
        let (db, gateway) = setup();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let carol = user(&db, "carol");
        let room = db.create_room(RoomType::Direct, alice, &[bob]).unwrap().room;
        let message = gateway
            .send_message(bob, None, room.id, Some("psst".into()), None)
            .await
            .unwrap();

        let result = gateway
            .toggle_reaction(carol, None, message.id, "👀".into())
            .await;
        assert!(matches!(result, Err(ChatError::Forbidden(_))));
        assert!(db.message_reactions(message.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_emoji_is_rejected() {
        let (db, gateway) = setup();
        let alice = user(&db, "alice");
        let result = gateway
            .toggle_reaction(alice, None, Uuid::new_v4(), " ".into())
            .await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn ai_room_gets_an_assistant_reply() {
        let (db, gateway) = setup();
        let alice = user(&db, "alice");
        let room = db.create_room(RoomType::Ai, alice, &[]).unwrap().room;

        let (a, mut a_rx) = gateway.connect(alice, "alice");
        drain(&mut a_rx);
        gateway.handle(&a, send(room.id, "hello")).await;

        let delivered = drain(&mut a_rx);
        let delivered = messages(&delivered);
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].sender_id, alice);
        assert_eq!(delivered[1].sender_id, ASSISTANT_USER_ID);
        assert!(delivered[1].is_ai);

        let history = db.list_messages(room.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content.as_deref(), Some("Hello! How can I assist you today?"));
    }

    /// Real database whose message and presence writes fail.
    struct FailingStore(Database);

    fn broken() -> DbError {
        DbError::Corrupt("disk unavailable".into())
    }

    impl ChatStore for FailingStore {
        fn get_user(&self, user_id: Uuid) -> parley_db::Result<User> {
            self.0.get_user(user_id)
        }

        fn list_users(&self, exclude: Uuid) -> parley_db::Result<Vec<UserSummary>> {
            self.0.list_users(exclude)
        }

        fn set_user_presence(
            &self,
            _user_id: Uuid,
            _is_online: bool,
            _last_seen: DateTime<Utc>,
        ) -> parley_db::Result<()> {
            Err(broken())
        }

        fn create_room(
            &self,
            room_type: RoomType,
            creator: Uuid,
            others: &[Uuid],
        ) -> parley_db::Result<RoomDetail> {
            self.0.create_room(room_type, creator, others)
        }

        fn room_detail(&self, room_id: Uuid) -> parley_db::Result<RoomDetail> {
            self.0.room_detail(room_id)
        }

        fn find_rooms_for_user(&self, user_id: Uuid) -> parley_db::Result<Vec<RoomSummary>> {
            self.0.find_rooms_for_user(user_id)
        }

        fn delete_room(&self, room_id: Uuid) -> parley_db::Result<()> {
            self.0.delete_room(room_id)
        }

        fn is_participant(&self, room_id: Uuid, user_id: Uuid) -> parley_db::Result<bool> {
            self.0.is_participant(room_id, user_id)
        }

        fn participant_for(&self, room_id: Uuid, user_id: Uuid) -> parley_db::Result<Participant> {
            self.0.participant_for(room_id, user_id)
        }

        fn set_participant_flag(
            &self,
            participant_id: Uuid,
            flag: ParticipantFlag,
            value: bool,
        ) -> parley_db::Result<Participant> {
            self.0.set_participant_flag(participant_id, flag, value)
        }

        fn mark_read(&self, room_id: Uuid, user_id: Uuid) -> parley_db::Result<Participant> {
            self.0.mark_read(room_id, user_id)
        }

        fn insert_message(&self, _message: &NewMessage) -> parley_db::Result<Message> {
            Err(broken())
        }

        fn get_message(&self, message_id: Uuid) -> parley_db::Result<Message> {
            self.0.get_message(message_id)
        }

        fn list_messages(&self, room_id: Uuid) -> parley_db::Result<Vec<Message>> {
            self.0.list_messages(room_id)
        }

        fn message_reactions(&self, message_id: Uuid) -> parley_db::Result<Reactions> {
            self.0.message_reactions(message_id)
        }

        fn set_message_reactions(
            &self,
            message_id: Uuid,
            reactions: &Reactions,
        ) -> parley_db::Result<()> {
            self.0.set_message_reactions(message_id, reactions)
        }

        fn toggle_reaction(
            &self,
            message_id: Uuid,
            user_id: Uuid,
            emoji: &str,
        ) -> parley_db::Result<Message> {
            self.0.toggle_reaction(message_id, user_id, emoji)
        }
    }

    fn failing_setup() -> (Arc<FailingStore>, Gateway) {
        let store = Arc::new(FailingStore(Database::open_in_memory().unwrap()));
        let gateway = Gateway::new(store.clone());
        (store, gateway)
    }

    #[tokio::test]
    async fn failed_insert_is_never_broadcast() {
        let (store, gateway) = failing_setup();
        let alice = user(&store.0, "alice");
        let bob = user(&store.0, "bob");
        let room = store.create_room(RoomType::Direct, alice, &[bob]).unwrap().room;

        let (a, mut a_rx) = gateway.connect(alice, "alice");
        let (b, mut b_rx) = gateway.connect(bob, "bob");
        gateway.handle(&a, ClientEvent::RoomJoin { room_id: room.id }).await;
        gateway.handle(&b, ClientEvent::RoomJoin { room_id: room.id }).await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        gateway.handle(&a, send(room.id, "lost")).await;

        let to_alice = drain(&mut a_rx);
        assert_eq!(error_codes(&to_alice), vec!["persistence"]);
        assert!(messages(&to_alice).is_empty());
        assert!(drain(&mut b_rx).is_empty());
    }

    #[tokio::test]
    async fn failed_online_write_rolls_back_presence() {
        let (store, gateway) = failing_setup();
        let alice = user(&store.0, "alice");

        let (a, mut a_rx) = gateway.connect(alice, "alice");
        drain(&mut a_rx);
        gateway.handle(&a, ClientEvent::PresenceOnline { user_id: None }).await;

        assert_eq!(error_codes(&drain(&mut a_rx)), vec!["persistence"]);
        assert!(!gateway.dispatcher().is_online(alice));
    }
}
