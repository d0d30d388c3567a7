use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::UserProfile;

// -- JWT Claims --

/// JWT claims shared between duet-api (REST middleware) and duet-gateway
/// (WebSocket authentication). Tokens are issued by the external auth
/// service; duet only verifies them. `name` is carried so the gateway can
/// attribute notifications without a profile lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub exp: usize,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StartChatRequest {
    pub other_user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartChatResponse {
    pub chat_id: Uuid,
    pub user1_id: String,
    pub user2_id: String,
}

/// One entry in the conversation list. Passkeys are never echoed back —
/// only whether the *requesting* user has set their own.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: Uuid,
    pub user1_id: String,
    pub user2_id: String,
    pub created_at: DateTime<Utc>,
    pub has_my_pass_key: bool,
    pub other_user: Option<UserProfile>,
    pub latest_message: Option<LatestMessage>,
}

/// Latest-message metadata for the conversation list. The content is
/// deliberately omitted: it is ciphertext at rest and the list endpoint
/// performs no passkey check.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestMessage {
    pub id: Uuid,
    pub sender_id: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPassKeyRequest {
    /// Empty or absent clears the caller's gate.
    #[serde(default)]
    pub pass_key: Option<String>,
}
