//! Canonical two-party conversation identity.

use std::sync::Arc;

use uuid::Uuid;

use duet_db::Database;
use duet_db::models::ConversationRow;
use duet_types::api::{ChatSummary, LatestMessage};

use crate::convert::{now_string, parse_timestamp, parse_uuid};
use crate::error::{ChatError, blocking};
use crate::profile::ProfileDirectory;

pub struct ConversationDirectory {
    db: Arc<Database>,
}

impl ConversationDirectory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// The conversation for an unordered user pair, created on first use.
    /// Concurrent first-time calls for the same pair converge on one row.
    pub async fn start_or_get(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<ConversationRow, ChatError> {
        let db = self.db.clone();
        let a = user_a.to_string();
        let b = user_b.to_string();
        let candidate_id = Uuid::new_v4().to_string();
        let created_at = now_string();

        blocking(move || Ok(db.get_or_create_conversation(&candidate_id, &a, &b, &created_at)?))
            .await
    }

    pub async fn get(&self, chat_id: Uuid) -> Result<Option<ConversationRow>, ChatError> {
        let db = self.db.clone();
        let id = chat_id.to_string();
        blocking(move || Ok(db.get_conversation(&id)?)).await
    }

    /// Conversation list for a user, newest first. Each entry carries only
    /// what the list view needs: whether the *requesting* user gated their
    /// own access, the peer's public profile, and latest-message metadata
    /// with the ciphertext stripped.
    pub async fn summaries_for(
        &self,
        user_id: &str,
        profiles: &dyn ProfileDirectory,
    ) -> Result<Vec<ChatSummary>, ChatError> {
        let db = self.db.clone();
        let user = user_id.to_string();

        let rows = blocking(move || {
            let chats = db.conversations_for_user(&user)?;
            let mut out = Vec::with_capacity(chats.len());
            for chat in chats {
                let latest = db.latest_message(&chat.id)?;
                out.push((chat, latest));
            }
            Ok(out)
        })
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for (chat, latest) in rows {
            // The query only returns rows the user participates in
            let peer = chat.peer_of(user_id).unwrap_or(&chat.user2_id).to_string();

            let other_user = match profiles.fetch(&peer).await {
                Ok(profile) => profile,
                Err(e) => {
                    tracing::warn!("profile lookup for {} failed: {}", peer, e);
                    None
                }
            };

            summaries.push(ChatSummary {
                id: parse_uuid(&chat.id),
                has_my_pass_key: chat.passkey_of(user_id).is_some(),
                other_user,
                latest_message: latest.map(|m| LatestMessage {
                    id: parse_uuid(&m.id),
                    sender_id: m.sender_id,
                    is_read: m.is_read,
                    created_at: parse_timestamp(&m.created_at),
                }),
                created_at: parse_timestamp(&chat.created_at),
                user1_id: chat.user1_id,
                user2_id: chat.user2_id,
            });
        }

        Ok(summaries)
    }
}
