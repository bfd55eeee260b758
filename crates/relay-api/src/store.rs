//! Runs blocking store calls off the async runtime and converts rows into
//! API models.

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use relay_db::Database;
use relay_db::models::{MessageRow, SessionRow};
use relay_types::models::{ChatMessage, ChatSession, Role};

use crate::error::ChatError;
use crate::state::AppState;

/// Run `f` on the blocking pool. The outer error is a join failure; the inner
/// result is the store's own, so callers decide whether it is fatal.
pub async fn with_db<F, T>(state: &AppState, f: F) -> Result<anyhow::Result<T>, ChatError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ChatError::Internal(format!("background task failed: {e}"))
        })
}

/// Like [`with_db`], but a store failure is a [`ChatError::Storage`].
pub async fn query<F, T>(state: &AppState, f: F) -> Result<T, ChatError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    with_db(state, f).await?.map_err(ChatError::storage)
}

pub fn session_from_row(row: SessionRow) -> ChatSession {
    ChatSession {
        created_at: parse_timestamp(&row.created_at, &row.id),
        updated_at: parse_timestamp(&row.updated_at, &row.id),
        id: row.id,
        user_id: row.user_id,
        title: row.title,
    }
}

pub fn message_from_row(row: MessageRow) -> ChatMessage {
    let role = row.role.parse::<Role>().unwrap_or_else(|e| {
        warn!("Corrupt role on message '{}': {}", row.id, e);
        Role::Bot
    });

    ChatMessage {
        created_at: parse_timestamp(&row.created_at, &row.id),
        id: row.id,
        chat_id: row.chat_id,
        role,
        content: row.content,
    }
}

fn parse_timestamp(raw: &str, row_id: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on row '{}': {}", raw, row_id, e);
            DateTime::default()
        })
}
