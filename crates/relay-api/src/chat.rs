use axum::{Json, extract::State, extract::rejection::JsonRejection};
use tracing::{info, warn};

use relay_types::api::{ChatRequest, ChatResponse};

use crate::error::ChatError;
use crate::orchestrator::handle_chat_turn;
use crate::state::AppState;

/// POST /chat: run one turn and return the reply.
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ChatError> {
    let Json(request) = payload?;

    let turn = handle_chat_turn(&state, request)
        .await
        .map_err(ChatError::into_turn_error)?;

    let persisted = &turn.persisted;
    if !(persisted.user_message.is_stored() && persisted.bot_reply.is_stored()) {
        warn!("Chat {}: reply returned with incomplete history", turn.chat_id);
    }
    info!(
        "Chat {}: replied with {} chars (context used: {})",
        turn.chat_id,
        turn.reply.len(),
        turn.context_used
    );

    Ok(Json(ChatResponse {
        reply: turn.reply,
        chat_id: turn.chat_id,
        context_used: turn.context_used,
    }))
}
