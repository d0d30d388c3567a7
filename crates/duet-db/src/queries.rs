use crate::Database;
use crate::models::{ConversationRow, LikeRow, MessageRow};
use anyhow::{Result, anyhow};
use rusqlite::Connection;

impl Database {
    // -- Conversations --

    /// Look up or create the single conversation for an unordered user pair.
    ///
    /// The pair is stored in canonical order (smaller id first), so A/B and
    /// B/A resolve to the same row. `INSERT OR IGNORE` against the unique
    /// pair index means a concurrent first-time call cannot create a second
    /// row — the loser of the race just reads the winner's.
    pub fn get_or_create_conversation(
        &self,
        candidate_id: &str,
        user_a: &str,
        user_b: &str,
        created_at: &str,
    ) -> Result<ConversationRow> {
        let (lo, hi) = if user_a <= user_b {
            (user_a, user_b)
        } else {
            (user_b, user_a)
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO conversations (id, user1_id, user2_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![candidate_id, lo, hi, created_at],
            )?;

            query_conversation_by_pair(conn, lo, hi)?
                .ok_or_else(|| anyhow!("conversation vanished after insert: {}/{}", lo, hi))
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation_by_id(conn, id))
    }

    /// All conversations the user participates in, newest first.
    pub fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user1_id, user2_id, user1_passkey, user2_passkey, created_at
                 FROM conversations
                 WHERE user1_id = ?1 OR user2_id = ?1
                 ORDER BY created_at DESC",
            )?;

            let rows = stmt
                .query_map([user_id], map_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Write the caller's own passkey slot. An empty value clears the gate.
    /// Returns false when the conversation does not exist or the caller is
    /// not a participant — the peer's slot is never touched.
    pub fn set_passkey(
        &self,
        chat_id: &str,
        user_id: &str,
        passkey: Option<&str>,
    ) -> Result<bool> {
        let value = passkey.filter(|k| !k.is_empty());

        self.with_conn(|conn| {
            let chat = match query_conversation_by_id(conn, chat_id)? {
                Some(chat) => chat,
                None => return Ok(false),
            };

            let column = if chat.user1_id == user_id {
                "user1_passkey"
            } else if chat.user2_id == user_id {
                "user2_passkey"
            } else {
                return Ok(false);
            };

            let sql = format!("UPDATE conversations SET {} = ?1 WHERE id = ?2", column);
            conn.execute(&sql, rusqlite::params![value, chat_id])?;
            Ok(true)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        chat_id: &str,
        sender_id: &str,
        content: &str,
        reply_to_id: Option<&str>,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, chat_id, sender_id, content, reply_to_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, chat_id, sender_id, content, reply_to_id, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message_by_id(conn, id))
    }

    /// All messages in a conversation, ascending by creation. The rowid
    /// tiebreak keeps insert order stable for same-timestamp rows.
    pub fn messages_for_chat(&self, chat_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, sender_id, content, reply_to_id, is_read, read_at, created_at
                 FROM messages
                 WHERE chat_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;

            let rows = stmt
                .query_map([chat_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn latest_message(&self, chat_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, sender_id, content, reply_to_id, is_read, read_at, created_at
                 FROM messages
                 WHERE chat_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1",
            )?;

            let row = stmt.query_row([chat_id], map_message).optional()?;
            Ok(row)
        })
    }

    /// Mark every unread message the reader did not send. Re-running after
    /// all are read changes nothing. Returns the number of rows flipped.
    pub fn mark_read(&self, chat_id: &str, reader_id: &str, read_at: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1, read_at = ?3
                 WHERE chat_id = ?1 AND sender_id <> ?2 AND is_read = 0",
                rusqlite::params![chat_id, reader_id, read_at],
            )?;
            Ok(changed)
        })
    }

    // -- Likes --

    /// Toggle a like: removes if present, inserts if not.
    /// Returns None when the message does not exist, otherwise Some(added).
    pub fn toggle_like(
        &self,
        message_id: &str,
        user_id: &str,
        created_at: &str,
    ) -> Result<Option<bool>> {
        self.with_conn(|conn| {
            if query_message_by_id(conn, message_id)?.is_none() {
                return Ok(None);
            }

            let existing: Option<String> = conn
                .query_row(
                    "SELECT user_id FROM message_likes WHERE message_id = ?1 AND user_id = ?2",
                    rusqlite::params![message_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;

            if existing.is_some() {
                conn.execute(
                    "DELETE FROM message_likes WHERE message_id = ?1 AND user_id = ?2",
                    rusqlite::params![message_id, user_id],
                )?;
                Ok(Some(false))
            } else {
                conn.execute(
                    "INSERT INTO message_likes (message_id, user_id, created_at)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![message_id, user_id, created_at],
                )?;
                Ok(Some(true))
            }
        })
    }

    pub fn likes_for_message(&self, message_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT user_id FROM message_likes WHERE message_id = ?1 ORDER BY rowid")?;

            let rows = stmt
                .query_map([message_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Batch-fetch likes for a set of message IDs.
    pub fn likes_for_messages(&self, message_ids: &[String]) -> Result<Vec<LikeRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id FROM message_likes WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(LikeRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_conversation_by_id(conn: &Connection, id: &str) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user1_id, user2_id, user1_passkey, user2_passkey, created_at
         FROM conversations WHERE id = ?1",
    )?;

    let row = stmt.query_row([id], map_conversation).optional()?;
    Ok(row)
}

fn query_conversation_by_pair(
    conn: &Connection,
    user1_id: &str,
    user2_id: &str,
) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user1_id, user2_id, user1_passkey, user2_passkey, created_at
         FROM conversations WHERE user1_id = ?1 AND user2_id = ?2",
    )?;

    let row = stmt
        .query_row([user1_id, user2_id], map_conversation)
        .optional()?;
    Ok(row)
}

fn query_message_by_id(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, chat_id, sender_id, content, reply_to_id, is_read, read_at, created_at
         FROM messages WHERE id = ?1",
    )?;

    let row = stmt.query_row([id], map_message).optional()?;
    Ok(row)
}

fn map_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        user1_id: row.get(1)?,
        user2_id: row.get(2)?,
        user1_passkey: row.get(3)?,
        user2_passkey: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        reply_to_id: row.get(4)?,
        is_read: row.get::<_, i64>(5)? != 0,
        read_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
