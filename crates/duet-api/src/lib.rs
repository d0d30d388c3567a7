//! REST query surface: start/list conversations, set a passkey, fetch
//! message history. Thin wrappers — the business logic lives in duet-chat.

pub mod conversations;
pub mod messages;
pub mod middleware;

use std::sync::Arc;

use axum::http::StatusCode;
use tracing::error;

use duet_chat::{ChatError, ConversationDirectory, MessageStore, ProfileDirectory};
use duet_db::Database;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub directory: ConversationDirectory,
    pub store: MessageStore,
    pub profiles: Arc<dyn ProfileDirectory>,
    pub jwt_secret: String,
}

pub(crate) fn error_status(e: ChatError) -> StatusCode {
    match e {
        ChatError::NotFound => StatusCode::NOT_FOUND,
        ChatError::AccessDenied => StatusCode::FORBIDDEN,
        ChatError::Storage(e) => {
            error!("storage failure: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
