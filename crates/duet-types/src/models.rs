use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public profile of a user, as resolved by the external profile service.
/// User ids are opaque strings minted by the auth service — duet never
/// creates or rewrites them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub avatar: Option<String>,
}

/// A message as seen by clients: content already decrypted, the replied-to
/// message (if any) resolved inline, and the full set of users who liked it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: String,
    pub content: String,
    pub reply_to_id: Option<Uuid>,
    pub reply_to: Option<ReplyPreview>,
    pub liked_by: Vec<String>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Decrypted preview of the message a reply points at.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub id: Uuid,
    pub sender_id: String,
    pub content: String,
}
