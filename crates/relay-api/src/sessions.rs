use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
};
use tracing::{info, warn};

use relay_types::api::{DeleteSessionQuery, DeleteSessionResponse};
use relay_types::models::{ChatMessage, ChatSession};

use crate::error::ChatError;
use crate::state::AppState;
use crate::store::{self, query, with_db};

/// GET /chat-sessions/{user_id}: newest activity first.
pub async fn list_sessions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ChatSession>>, ChatError> {
    let rows = query(&state, move |db| db.list_sessions(&user_id)).await?;
    Ok(Json(rows.into_iter().map(store::session_from_row).collect()))
}

/// GET /chat-messages/{chat_id}: oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, ChatError> {
    let rows = query(&state, move |db| db.get_messages(&chat_id)).await?;
    Ok(Json(rows.into_iter().map(store::message_from_row).collect()))
}

/// DELETE /chat-sessions/{chat_id}: messages first, then the session row.
/// With `?userId=`, only a session owned by that user is touched.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    scope: Result<Query<DeleteSessionQuery>, QueryRejection>,
) -> Result<Json<DeleteSessionResponse>, ChatError> {
    let Query(scope) = scope?;
    let owner = scope.user_id.filter(|u| !u.trim().is_empty());

    let (cid, uid) = (chat_id.clone(), owner.clone());
    match with_db(&state, move |db| db.delete_messages_for_session(&cid, uid.as_deref())).await? {
        Ok(count) => info!("Deleted {} messages from chat {}", count, chat_id),
        Err(e) => warn!("Failed to delete messages for chat {}: {:#}", chat_id, e),
    }

    let cid = chat_id.clone();
    let deleted = query(&state, move |db| db.delete_session(&cid, owner.as_deref())).await?;
    if deleted == 0 {
        info!("Chat {} had no session row to delete", chat_id);
    }

    Ok(Json(DeleteSessionResponse {
        message: "Chat session deleted successfully".to_string(),
    }))
}
