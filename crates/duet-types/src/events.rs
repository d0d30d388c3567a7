use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MessageView;

/// Events sent from the server to clients over the WebSocket gateway.
///
/// Presence events (`userOnline`, `userOffline`, `onlineUsers`) are global;
/// everything else is scoped to the room of one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum GatewayEvent {
    /// A user's first connection came up
    UserOnline { user_id: String },

    /// A user's last connection went away
    UserOffline { user_id: String },

    /// Full online snapshot, sent once to a newly connected client
    OnlineUsers { user_ids: Vec<String> },

    /// A message was persisted and fanned out to the room
    NewMessage(MessageView),

    /// The reader cleared their unread state for a conversation
    MessagesRead { chat_id: Uuid, reader_id: String },

    UserTyping { chat_id: Uuid, user_id: String },

    UserStopTyping { chat_id: Uuid, user_id: String },

    /// A like was toggled; carries the updated message
    MessageLiked(MessageView),

    /// Connection-scoped failure report; never broadcast
    Error { message: String },
}

/// Commands sent from clients to the server over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum GatewayCommand {
    /// Join the room for a conversation the sender participates in
    JoinChat { chat_id: Uuid },

    SendMessage {
        chat_id: Uuid,
        content: String,
        #[serde(default)]
        reply_to_id: Option<Uuid>,
    },

    MarkAsRead { chat_id: Uuid },

    Typing { chat_id: Uuid },

    StopTyping { chat_id: Uuid },

    LikeMessage { chat_id: Uuid, message_id: Uuid },
}
