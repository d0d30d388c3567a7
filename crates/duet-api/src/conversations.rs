use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use duet_chat::access;
use duet_types::api::{Claims, SetPassKeyRequest, StartChatRequest, StartChatResponse};

use crate::{AppState, error_status};

pub async fn start_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StartChatRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.other_user_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let chat = state
        .directory
        .start_or_get(&claims.sub, &req.other_user_id)
        .await
        .map_err(error_status)?;

    Ok(Json(StartChatResponse {
        chat_id: chat
            .id
            .parse()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
        user1_id: chat.user1_id,
        user2_id: chat.user2_id,
    }))
}

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let summaries = state
        .directory
        .summaries_for(&claims.sub, state.profiles.as_ref())
        .await
        .map_err(error_status)?;

    Ok(Json(summaries))
}

/// Set the caller's own passkey for a conversation. The peer's slot is
/// out of reach by construction.
pub async fn set_pass_key(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SetPassKeyRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    access::set_passkey(state.db.clone(), chat_id, &claims.sub, req.pass_key)
        .await
        .map_err(error_status)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Your pass key has been set"
    })))
}
