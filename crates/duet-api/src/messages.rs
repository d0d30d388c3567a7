use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use duet_types::api::Claims;

use crate::{AppState, error_status};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    /// Checked against the requesting user's own gate only.
    pub pass_key: Option<String>,
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let messages = state
        .store
        .history(chat_id, &claims.sub, query.pass_key.as_deref())
        .await
        .map_err(error_status)?;

    Ok(Json(messages))
}
