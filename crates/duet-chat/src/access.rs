//! Per-participant access gating.
//!
//! Each participant may set a passkey on their own slot of a conversation;
//! history reads are checked against the *requesting* user's slot only, so
//! one participant's gate never blocks the other's access.

use std::sync::Arc;

use uuid::Uuid;

use duet_db::Database;
use duet_db::models::ConversationRow;

use crate::error::{ChatError, blocking};

/// Check the requesting user's gate. An unset slot always grants access;
/// a set slot must match the supplied value exactly.
pub fn check_access(
    chat: &ConversationRow,
    user_id: &str,
    supplied: Option<&str>,
) -> Result<(), ChatError> {
    match chat.passkey_of(user_id) {
        Some(expected) if supplied != Some(expected) => Err(ChatError::AccessDenied),
        _ => Ok(()),
    }
}

/// Write the caller's own passkey slot; empty or absent clears the gate.
/// NotFound covers both an unknown conversation and a non-participant
/// caller — outsiders cannot probe which conversations exist.
pub async fn set_passkey(
    db: Arc<Database>,
    chat_id: Uuid,
    user_id: &str,
    value: Option<String>,
) -> Result<(), ChatError> {
    let chat_id = chat_id.to_string();
    let user_id = user_id.to_string();

    blocking(move || {
        let updated = db.set_passkey(&chat_id, &user_id, value.as_deref())?;
        if updated { Ok(()) } else { Err(ChatError::NotFound) }
    })
    .await
}
