use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                is_online   INTEGER NOT NULL DEFAULT 0,
                last_seen   TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE rooms (
                id               TEXT PRIMARY KEY,
                room_type        TEXT NOT NULL CHECK (room_type IN ('direct', 'group', 'ai')),
                -- sorted 'a:b' user pair; only set for direct rooms
                direct_key       TEXT UNIQUE,
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL,
                last_message_at  TEXT NOT NULL
            );

            CREATE INDEX idx_rooms_last_message ON rooms(last_message_at);

            CREATE TABLE participants (
                id            TEXT PRIMARY KEY,
                room_id       TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                user_id       TEXT NOT NULL REFERENCES users(id),
                joined_at     TEXT NOT NULL,
                last_read_at  TEXT NOT NULL,
                is_archived   INTEGER NOT NULL DEFAULT 0,
                is_muted      INTEGER NOT NULL DEFAULT 0,
                UNIQUE(room_id, user_id)
            );

            CREATE INDEX idx_participants_user ON participants(user_id);

            CREATE TABLE messages (
                id               TEXT PRIMARY KEY,
                room_id          TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                sender_id        TEXT NOT NULL REFERENCES users(id),
                content          TEXT,
                attachment_url   TEXT,
                attachment_type  TEXT,
                attachment_name  TEXT,
                is_read          INTEGER NOT NULL DEFAULT 0,
                is_ai            INTEGER NOT NULL DEFAULT 0,
                reactions        TEXT NOT NULL DEFAULT '{}',
                created_at       TEXT NOT NULL,
                CHECK (content IS NOT NULL OR attachment_url IS NOT NULL)
            );

            CREATE INDEX idx_messages_room ON messages(room_id, created_at);

            -- Seed the assistant account that answers in 'ai' rooms
            INSERT OR IGNORE INTO users (id, name, email, password, last_seen, created_at)
                VALUES (
                    '00000000-0000-0000-0000-00000000a1a1',
                    'Assistant',
                    'assistant@parley.local',
                    '!',
                    strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                    strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
