use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- One row per unordered user pair: user1_id < user2_id always.
        -- The unique index resolves concurrent first-time creation races.
        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY,
            user1_id        TEXT NOT NULL,
            user2_id        TEXT NOT NULL,
            user1_passkey   TEXT,
            user2_passkey   TEXT,
            created_at      TEXT NOT NULL,
            UNIQUE(user1_id, user2_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            chat_id         TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL,
            content         TEXT NOT NULL,
            reply_to_id     TEXT REFERENCES messages(id),
            is_read         INTEGER NOT NULL DEFAULT 0,
            read_at         TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, created_at);

        CREATE TABLE IF NOT EXISTS message_likes (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_likes_message
            ON message_likes(message_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
