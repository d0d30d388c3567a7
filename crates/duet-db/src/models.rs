/// Database row types — these map directly to SQLite rows.
/// Distinct from duet-types wire models to keep the DB layer independent.

pub struct ConversationRow {
    pub id: String,
    /// Lexicographically smaller participant id.
    pub user1_id: String,
    pub user2_id: String,
    pub user1_passkey: Option<String>,
    pub user2_passkey: Option<String>,
    pub created_at: String,
}

impl ConversationRow {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    /// The other participant, or None for a non-participant.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        if self.user1_id == user_id {
            Some(&self.user2_id)
        } else if self.user2_id == user_id {
            Some(&self.user1_id)
        } else {
            None
        }
    }

    /// The passkey slot belonging to this user — never the peer's.
    pub fn passkey_of(&self, user_id: &str) -> Option<&str> {
        let slot = if self.user1_id == user_id {
            &self.user1_passkey
        } else if self.user2_id == user_id {
            &self.user2_passkey
        } else {
            return None;
        };
        slot.as_deref().filter(|k| !k.is_empty())
    }
}

pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    /// At-rest representation: `ivhex:cipherhex`.
    pub content: String,
    pub reply_to_id: Option<String>,
    pub is_read: bool,
    pub read_at: Option<String>,
    pub created_at: String,
}

pub struct LikeRow {
    pub message_id: String,
    pub user_id: String,
}
