//! Encrypted message persistence: send, history, read-state, likes.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use duet_crypto::MessageCipher;
use duet_db::Database;
use duet_db::models::MessageRow;
use duet_types::models::{MessageView, ReplyPreview};

use crate::access;
use crate::convert::{now_string, parse_timestamp, parse_uuid};
use crate::error::{ChatError, blocking};

pub struct MessageStore {
    db: Arc<Database>,
    cipher: Arc<MessageCipher>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>, cipher: Arc<MessageCipher>) -> Self {
        Self { db, cipher }
    }

    /// Encrypt and persist a message, then return the caller's decrypted
    /// view with the replied-to message (if any) resolved inline.
    ///
    /// The write completes before the caller can broadcast anything;
    /// persistence failures surface as errors, never as silent drops.
    pub async fn send(
        &self,
        chat_id: Uuid,
        sender_id: &str,
        content: &str,
        reply_to_id: Option<Uuid>,
    ) -> Result<MessageView, ChatError> {
        let ciphertext = self.cipher.encrypt(content).map_err(ChatError::Storage)?;

        let db = self.db.clone();
        let id = Uuid::new_v4().to_string();
        let cid = chat_id.to_string();
        let sender = sender_id.to_string();
        let reply_id = reply_to_id.map(|r| r.to_string());
        let created_at = now_string();

        let (row, reply_row) = blocking(move || {
            if db.get_conversation(&cid)?.is_none() {
                return Err(ChatError::NotFound);
            }

            // A reply must point at a message in the same conversation
            let reply_row = match &reply_id {
                Some(rid) => match db.get_message(rid)? {
                    Some(r) if r.chat_id == cid => Some(r),
                    _ => return Err(ChatError::NotFound),
                },
                None => None,
            };

            db.insert_message(&id, &cid, &sender, &ciphertext, reply_id.as_deref(), &created_at)?;
            let row = db
                .get_message(&id)?
                .ok_or_else(|| ChatError::Storage(anyhow::anyhow!("inserted message missing")))?;

            Ok((row, reply_row))
        })
        .await?;

        let reply_to = reply_row.as_ref().map(|r| self.reply_preview(r));
        Ok(self.view(row, reply_to, vec![]))
    }

    /// Full history for the requesting user, gated by their own passkey
    /// slot, ascending by creation, with content and replies decrypted.
    pub async fn history(
        &self,
        chat_id: Uuid,
        user_id: &str,
        pass_key: Option<&str>,
    ) -> Result<Vec<MessageView>, ChatError> {
        let db = self.db.clone();
        let cid = chat_id.to_string();
        let user = user_id.to_string();
        let key = pass_key.map(String::from);

        let (rows, like_rows) = blocking(move || {
            let chat = db.get_conversation(&cid)?.ok_or(ChatError::NotFound)?;
            access::check_access(&chat, &user, key.as_deref())?;

            let rows = db.messages_for_chat(&cid)?;
            let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let like_rows = db.likes_for_messages(&ids)?;
            Ok((rows, like_rows))
        })
        .await?;

        let mut like_map: HashMap<String, Vec<String>> = HashMap::new();
        for like in like_rows {
            like_map.entry(like.message_id).or_default().push(like.user_id);
        }

        // Replies always target the same conversation, so the loaded rows
        // are enough to resolve every preview.
        let previews: HashMap<String, ReplyPreview> = rows
            .iter()
            .map(|r| (r.id.clone(), self.reply_preview(r)))
            .collect();

        Ok(rows
            .into_iter()
            .map(|row| {
                let reply_to = row
                    .reply_to_id
                    .as_ref()
                    .and_then(|rid| previews.get(rid))
                    .cloned();
                let liked_by = like_map.remove(&row.id).unwrap_or_default();
                self.view(row, reply_to, liked_by)
            })
            .collect())
    }

    /// Mark every unread message not sent by the reader. Idempotent.
    /// Returns how many messages flipped.
    pub async fn mark_read(&self, chat_id: Uuid, reader_id: &str) -> Result<usize, ChatError> {
        let db = self.db.clone();
        let cid = chat_id.to_string();
        let reader = reader_id.to_string();
        let read_at = now_string();

        blocking(move || Ok(db.mark_read(&cid, &reader, &read_at)?)).await
    }

    /// Toggle the user's like on a message. Returns the updated decrypted
    /// view, or None when the message does not exist.
    pub async fn toggle_like(
        &self,
        message_id: Uuid,
        user_id: &str,
    ) -> Result<Option<MessageView>, ChatError> {
        let db = self.db.clone();
        let mid = message_id.to_string();
        let user = user_id.to_string();
        let now = now_string();

        let updated = blocking(move || {
            if db.toggle_like(&mid, &user, &now)?.is_none() {
                return Ok(None);
            }

            let row = db
                .get_message(&mid)?
                .ok_or_else(|| ChatError::Storage(anyhow::anyhow!("liked message missing")))?;
            let reply_row = match &row.reply_to_id {
                Some(rid) => db.get_message(rid)?,
                None => None,
            };
            let liked_by = db.likes_for_message(&mid)?;
            Ok(Some((row, reply_row, liked_by)))
        })
        .await?;

        Ok(updated.map(|(row, reply_row, liked_by)| {
            let reply_to = reply_row.as_ref().map(|r| self.reply_preview(r));
            self.view(row, reply_to, liked_by)
        }))
    }

    fn view(
        &self,
        row: MessageRow,
        reply_to: Option<ReplyPreview>,
        liked_by: Vec<String>,
    ) -> MessageView {
        MessageView {
            id: parse_uuid(&row.id),
            chat_id: parse_uuid(&row.chat_id),
            sender_id: row.sender_id,
            content: self.cipher.decrypt_lenient(&row.content),
            reply_to_id: row.reply_to_id.as_deref().map(parse_uuid),
            reply_to,
            liked_by,
            is_read: row.is_read,
            read_at: row.read_at.as_deref().map(parse_timestamp),
            created_at: parse_timestamp(&row.created_at),
        }
    }

    fn reply_preview(&self, row: &MessageRow) -> ReplyPreview {
        ReplyPreview {
            id: parse_uuid(&row.id),
            sender_id: row.sender_id.clone(),
            content: self.cipher.decrypt_lenient(&row.content),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::ConversationDirectory;

    fn fixtures() -> (Arc<Database>, ConversationDirectory, MessageStore) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let cipher = Arc::new(MessageCipher::from_secret("store-test-secret"));
        (
            db.clone(),
            ConversationDirectory::new(db.clone()),
            MessageStore::new(db, cipher),
        )
    }

    #[tokio::test]
    async fn send_stores_ciphertext_and_returns_plaintext() {
        let (db, directory, store) = fixtures();
        let chat = directory.start_or_get("alice", "bob").await.unwrap();
        let chat_id = chat.id.parse().unwrap();

        let view = store.send(chat_id, "alice", "hello", None).await.unwrap();
        assert_eq!(view.content, "hello");
        assert_eq!(view.sender_id, "alice");
        assert!(!view.is_read);

        // At rest the content is iv:ciphertext, not the plaintext
        let row = db.get_message(&view.id.to_string()).unwrap().unwrap();
        assert_ne!(row.content, "hello");
        assert!(row.content.contains(':'));
    }

    #[tokio::test]
    async fn history_decrypts_in_creation_order() {
        let (_db, directory, store) = fixtures();
        let chat = directory.start_or_get("alice", "bob").await.unwrap();
        let chat_id = chat.id.parse().unwrap();

        store.send(chat_id, "alice", "first", None).await.unwrap();
        store.send(chat_id, "bob", "second", None).await.unwrap();

        let history = store.history(chat_id, "bob", None).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn history_enforces_only_the_requesters_gate() {
        let (db, directory, store) = fixtures();
        let chat = directory.start_or_get("alice", "bob").await.unwrap();
        let chat_id: Uuid = chat.id.parse().unwrap();

        store.send(chat_id, "alice", "secret", None).await.unwrap();
        access::set_passkey(db, chat_id, "alice", Some("1234".into()))
            .await
            .unwrap();

        assert!(matches!(
            store.history(chat_id, "alice", None).await,
            Err(ChatError::AccessDenied)
        ));
        assert!(matches!(
            store.history(chat_id, "alice", Some("9999")).await,
            Err(ChatError::AccessDenied)
        ));
        assert_eq!(
            store
                .history(chat_id, "alice", Some("1234"))
                .await
                .unwrap()
                .len(),
            1
        );

        // Alice's gate never blocks bob
        assert_eq!(store.history(chat_id, "bob", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replies_resolve_with_decrypted_previews() {
        let (_db, directory, store) = fixtures();
        let chat = directory.start_or_get("alice", "bob").await.unwrap();
        let chat_id = chat.id.parse().unwrap();

        let original = store.send(chat_id, "alice", "question?", None).await.unwrap();
        let reply = store
            .send(chat_id, "bob", "answer!", Some(original.id))
            .await
            .unwrap();

        assert_eq!(reply.reply_to_id, Some(original.id));
        let preview = reply.reply_to.unwrap();
        assert_eq!(preview.content, "question?");
        assert_eq!(preview.sender_id, "alice");

        let history = store.history(chat_id, "alice", None).await.unwrap();
        let stored_reply = history.iter().find(|m| m.id == reply.id).unwrap();
        assert_eq!(
            stored_reply.reply_to.as_ref().unwrap().content,
            "question?"
        );
    }

    #[tokio::test]
    async fn reply_must_live_in_the_same_conversation() {
        let (_db, directory, store) = fixtures();
        let chat_ab = directory.start_or_get("alice", "bob").await.unwrap();
        let chat_ac = directory.start_or_get("alice", "carol").await.unwrap();

        let foreign = store
            .send(chat_ac.id.parse().unwrap(), "carol", "elsewhere", None)
            .await
            .unwrap();

        let result = store
            .send(chat_ab.id.parse().unwrap(), "alice", "hi", Some(foreign.id))
            .await;
        assert!(matches!(result, Err(ChatError::NotFound)));
    }

    #[tokio::test]
    async fn toggle_like_round_trips_and_reports_missing() {
        let (_db, directory, store) = fixtures();
        let chat = directory.start_or_get("alice", "bob").await.unwrap();
        let chat_id = chat.id.parse().unwrap();

        let msg = store.send(chat_id, "alice", "like me", None).await.unwrap();

        let liked = store.toggle_like(msg.id, "bob").await.unwrap().unwrap();
        assert_eq!(liked.liked_by, vec!["bob".to_string()]);
        assert_eq!(liked.content, "like me");

        let unliked = store.toggle_like(msg.id, "bob").await.unwrap().unwrap();
        assert!(unliked.liked_by.is_empty());

        assert!(store
            .toggle_like(Uuid::new_v4(), "bob")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn mark_read_is_idempotent_and_skips_own_messages() {
        let (_db, directory, store) = fixtures();
        let chat = directory.start_or_get("alice", "bob").await.unwrap();
        let chat_id = chat.id.parse().unwrap();

        store.send(chat_id, "alice", "unread", None).await.unwrap();
        store.send(chat_id, "bob", "mine", None).await.unwrap();

        assert_eq!(store.mark_read(chat_id, "bob").await.unwrap(), 1);
        assert_eq!(store.mark_read(chat_id, "bob").await.unwrap(), 0);

        let history = store.history(chat_id, "bob", None).await.unwrap();
        let alice_msg = history.iter().find(|m| m.sender_id == "alice").unwrap();
        let bob_msg = history.iter().find(|m| m.sender_id == "bob").unwrap();
        assert!(alice_msg.is_read);
        assert!(alice_msg.read_at.is_some());
        assert!(!bob_msg.is_read);
    }
}
