use chrono::{DateTime, Utc};
use parley_types::models::{
    Message, Participant, ParticipantFlag, RoomDetail, RoomSummary, RoomType, User, UserSummary,
    ASSISTANT_USER_ID,
};
use parley_types::reactions::Reactions;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::models::{
    MESSAGE_COLUMNS, MessageRow, PARTICIPANT_COLUMNS, ParticipantRow, ROOM_COLUMNS, RoomRow,
    USER_COLUMNS, UserRow, format_timestamp,
};
use crate::store::{ChatStore, NewMessage};
use crate::{Database, DbError, Result};

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: Uuid,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User> {
        let now = format_timestamp(self.now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, password, last_seen, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id.to_string(), name, email, password_hash, now],
            )
            .map_err(|e| match e {
                // Ids are fresh, so the only unique column that can clash is email.
                rusqlite::Error::SqliteFailure(err, _)
                    if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    DbError::Conflict("email is already registered")
                }
                other => DbError::Sqlite(other),
            })?;
            query_user(conn, &id.to_string())?
                .ok_or(DbError::NotFound("user"))?
                .into_user()
        })
    }

    /// Returns the row with its password hash, for login.
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                    [email],
                    UserRow::from_row,
                )
                .optional()?;
            Ok(row)
        })
    }
}

impl ChatStore for Database {
    fn get_user(&self, user_id: Uuid) -> Result<User> {
        self.with_conn(|conn| {
            query_user(conn, &user_id.to_string())?
                .ok_or(DbError::NotFound("user"))?
                .into_user()
        })
    }

    fn list_users(&self, exclude: Uuid) -> Result<Vec<UserSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE id != ?1 AND id != ?2
                 ORDER BY name COLLATE NOCASE ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map(
                    params![exclude.to_string(), ASSISTANT_USER_ID.to_string()],
                    UserRow::from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|row| row.into_user().map(UserSummary::from))
                .collect()
        })
    }

    fn set_user_presence(
        &self,
        user_id: Uuid,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET is_online = ?2, last_seen = ?3 WHERE id = ?1",
                params![user_id.to_string(), is_online, format_timestamp(last_seen)],
            )?;
            if updated == 0 {
                return Err(DbError::NotFound("user"));
            }
            Ok(())
        })
    }

    fn create_room(
        &self,
        room_type: RoomType,
        creator: Uuid,
        others: &[Uuid],
    ) -> Result<RoomDetail> {
        let mut members = vec![creator];
        for id in others {
            if !members.contains(id) {
                members.push(*id);
            }
        }

        let pair_key = match room_type {
            RoomType::Direct => {
                if members.len() != 2 {
                    return Err(DbError::Invalid(
                        "a direct room needs exactly one other user".into(),
                    ));
                }
                Some(direct_key(members[0], members[1]))
            }
            RoomType::Group => {
                if members.len() < 2 {
                    return Err(DbError::Invalid(
                        "a group room needs at least one other user".into(),
                    ));
                }
                None
            }
            RoomType::Ai => {
                if members.len() != 1 {
                    return Err(DbError::Invalid(
                        "an assistant room cannot have other users".into(),
                    ));
                }
                members.push(ASSISTANT_USER_ID);
                None
            }
        };

        let now = format_timestamp(self.now());
        self.with_tx(|tx| {
            if let Some(key) = &pair_key {
                let existing: Option<String> = tx
                    .query_row("SELECT id FROM rooms WHERE direct_key = ?1", [key], |r| {
                        r.get(0)
                    })
                    .optional()?;
                if let Some(room_id) = existing {
                    return query_room_detail(tx, &room_id);
                }
            }

            for member in &members {
                if query_user(tx, &member.to_string())?.is_none() {
                    return Err(DbError::NotFound("user"));
                }
            }

            let room_id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO rooms (id, room_type, direct_key, created_at, updated_at, last_message_at)
                 VALUES (?1, ?2, ?3, ?4, ?4, ?4)",
                params![room_id, room_type.as_str(), pair_key, now],
            )?;
            for member in &members {
                tx.execute(
                    "INSERT INTO participants (id, room_id, user_id, joined_at, last_read_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![Uuid::new_v4().to_string(), room_id, member.to_string(), now],
                )?;
            }

            query_room_detail(tx, &room_id)
        })
    }

    fn room_detail(&self, room_id: Uuid) -> Result<RoomDetail> {
        self.with_conn(|conn| query_room_detail(conn, &room_id.to_string()))
    }

    fn find_rooms_for_user(&self, user_id: Uuid) -> Result<Vec<RoomSummary>> {
        let uid = user_id.to_string();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ROOM_COLUMNS}, p.last_read_at
                 FROM rooms r
                 JOIN participants p ON p.room_id = r.id
                 WHERE p.user_id = ?1
                 ORDER BY r.last_message_at DESC, r.created_at DESC"
            ))?;
            let rows = stmt
                .query_map([&uid], |row| Ok((RoomRow::from_row(row)?, row.get::<_, String>(5)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut summaries = Vec::with_capacity(rows.len());
            for (room_row, last_read_at) in rows {
                let room_id = room_row.id.clone();
                let unread: u32 = conn.query_row(
                    "SELECT COUNT(*) FROM messages
                     WHERE room_id = ?1 AND sender_id != ?2 AND created_at > ?3",
                    params![room_id, uid, last_read_at],
                    |r| r.get(0),
                )?;
                summaries.push(RoomSummary {
                    room: room_row.into_room()?,
                    participants: query_participants(conn, &room_id)?,
                    last_message: query_last_message(conn, &room_id)?,
                    unread_count: unread,
                });
            }
            Ok(summaries)
        })
    }

    fn delete_room(&self, room_id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM rooms WHERE id = ?1", [room_id.to_string()])?;
            if deleted == 0 {
                return Err(DbError::NotFound("room"));
            }
            Ok(())
        })
    }

    fn is_participant(&self, room_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM participants WHERE room_id = ?1 AND user_id = ?2",
                    params![room_id.to_string(), user_id.to_string()],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    fn participant_for(&self, room_id: Uuid, user_id: Uuid) -> Result<Participant> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {PARTICIPANT_COLUMNS} FROM participants p
                     LEFT JOIN users u ON u.id = p.user_id
                     WHERE p.room_id = ?1 AND p.user_id = ?2"
                ),
                params![room_id.to_string(), user_id.to_string()],
                ParticipantRow::from_row,
            )
            .optional()?
            .ok_or(DbError::NotFound("participant"))?
            .into_participant()
        })
    }

    fn set_participant_flag(
        &self,
        participant_id: Uuid,
        flag: ParticipantFlag,
        value: bool,
    ) -> Result<Participant> {
        let sql = match flag {
            ParticipantFlag::Archived => "UPDATE participants SET is_archived = ?2 WHERE id = ?1",
            ParticipantFlag::Muted => "UPDATE participants SET is_muted = ?2 WHERE id = ?1",
        };
        let pid = participant_id.to_string();
        self.with_conn(|conn| {
            if conn.execute(sql, params![pid, value])? == 0 {
                return Err(DbError::NotFound("participant"));
            }
            query_participant(conn, &pid)
        })
    }

    fn mark_read(&self, room_id: Uuid, user_id: Uuid) -> Result<Participant> {
        let now = format_timestamp(self.now());
        let (rid, uid) = (room_id.to_string(), user_id.to_string());
        self.with_tx(|tx| {
            let pid: String = tx
                .query_row(
                    "SELECT id FROM participants WHERE room_id = ?1 AND user_id = ?2",
                    params![rid, uid],
                    |r| r.get(0),
                )
                .optional()?
                .ok_or(DbError::NotFound("participant"))?;
            tx.execute(
                "UPDATE participants SET last_read_at = ?2 WHERE id = ?1",
                params![pid, now],
            )?;
            tx.execute(
                "UPDATE messages SET is_read = 1
                 WHERE room_id = ?1 AND sender_id != ?2 AND is_read = 0",
                params![rid, uid],
            )?;
            query_participant(tx, &pid)
        })
    }

    fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        if message.content.is_none() && message.attachment.is_none() {
            return Err(DbError::Invalid(
                "a message needs content or an attachment".into(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let now = format_timestamp(self.now());
        let attachment = message.attachment.as_ref();
        self.with_tx(|tx| {
            // Stamp first so a missing room fails before the insert.
            let stamped = tx.execute(
                "UPDATE rooms SET last_message_at = MAX(last_message_at, ?2), updated_at = ?2
                 WHERE id = ?1",
                params![message.room_id.to_string(), now],
            )?;
            if stamped == 0 {
                return Err(DbError::NotFound("room"));
            }

            tx.execute(
                "INSERT INTO messages (id, room_id, sender_id, content, attachment_url,
                     attachment_type, attachment_name, is_ai, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    message.room_id.to_string(),
                    message.sender_id.to_string(),
                    message.content,
                    attachment.map(|a| a.url.as_str()),
                    attachment.map(|a| a.mime_type.as_str()),
                    attachment.map(|a| a.name.as_str()),
                    message.is_ai,
                    now,
                ],
            )?;

            query_message(tx, &id)
        })
    }

    fn get_message(&self, message_id: Uuid) -> Result<Message> {
        self.with_conn(|conn| query_message(conn, &message_id.to_string()))
    }

    fn list_messages(&self, room_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE m.room_id = ?1
                 ORDER BY m.created_at ASC, m.rowid ASC"
            ))?;
            let rows = stmt
                .query_map([room_id.to_string()], MessageRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(MessageRow::into_message).collect()
        })
    }

    fn message_reactions(&self, message_id: Uuid) -> Result<Reactions> {
        self.with_conn(|conn| query_reactions(conn, &message_id.to_string()))
    }

    fn set_message_reactions(&self, message_id: Uuid, reactions: &Reactions) -> Result<()> {
        let json = serde_json::to_string(&reactions.clone().normalized())?;
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET reactions = ?2 WHERE id = ?1",
                params![message_id.to_string(), json],
            )?;
            if updated == 0 {
                return Err(DbError::NotFound("message"));
            }
            Ok(())
        })
    }

    fn toggle_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<Message> {
        let mid = message_id.to_string();
        self.with_tx(|tx| {
            let mut reactions = query_reactions(tx, &mid)?;
            reactions.toggle(emoji, user_id);
            tx.execute(
                "UPDATE messages SET reactions = ?2 WHERE id = ?1",
                params![mid, serde_json::to_string(&reactions)?],
            )?;
            query_message(tx, &mid)
        })
    }
}

/// Unordered pair key; the same two users always map to the same key.
fn direct_key(a: Uuid, b: Uuid) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", low, high)
}

fn query_user(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [id],
            UserRow::from_row,
        )
        .optional()?;
    Ok(row)
}

fn query_room_detail(conn: &Connection, room_id: &str) -> Result<RoomDetail> {
    let room = conn
        .query_row(
            &format!("SELECT {ROOM_COLUMNS} FROM rooms r WHERE r.id = ?1"),
            [room_id],
            RoomRow::from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound("room"))?
        .into_room()?;

    Ok(RoomDetail {
        room,
        participants: query_participants(conn, room_id)?,
    })
}

fn query_participants(conn: &Connection, room_id: &str) -> Result<Vec<Participant>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PARTICIPANT_COLUMNS} FROM participants p
         LEFT JOIN users u ON u.id = p.user_id
         WHERE p.room_id = ?1
         ORDER BY p.joined_at ASC, p.rowid ASC"
    ))?;
    let rows = stmt
        .query_map([room_id], ParticipantRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(ParticipantRow::into_participant).collect()
}

fn query_participant(conn: &Connection, participant_id: &str) -> Result<Participant> {
    conn.query_row(
        &format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants p
             LEFT JOIN users u ON u.id = p.user_id
             WHERE p.id = ?1"
        ),
        [participant_id],
        ParticipantRow::from_row,
    )
    .optional()?
    .ok_or(DbError::NotFound("participant"))?
    .into_participant()
}

fn query_message(conn: &Connection, message_id: &str) -> Result<Message> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1"),
        [message_id],
        MessageRow::from_row,
    )
    .optional()?
    .ok_or(DbError::NotFound("message"))?
    .into_message()
}

fn query_last_message(conn: &Connection, room_id: &str) -> Result<Option<Message>> {
    conn.query_row(
        &format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             WHERE m.room_id = ?1
             ORDER BY m.created_at DESC, m.rowid DESC
             LIMIT 1"
        ),
        [room_id],
        MessageRow::from_row,
    )
    .optional()?
    .map(MessageRow::into_message)
    .transpose()
}

fn query_reactions(conn: &Connection, message_id: &str) -> Result<Reactions> {
    let raw: String = conn
        .query_row(
            "SELECT reactions FROM messages WHERE id = ?1",
            [message_id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or(DbError::NotFound("message"))?;
    let reactions: Reactions = serde_json::from_str(&raw)?;
    Ok(reactions.normalized())
}
