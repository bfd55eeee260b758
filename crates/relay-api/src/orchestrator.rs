//! One chat turn: resolve the session, record the user message, build the
//! prompt from recent history, generate, record the reply.
//!
//! Turns on the same session are not serialized. Two concurrent turns may
//! read each other's half-written history; there is no per-session lock.

use chrono::Utc;
use tracing::{debug, info, warn};

use relay_db::models::SessionRow;
use relay_types::api::ChatRequest;
use relay_types::models::{DEFAULT_SESSION_TITLE, Role};

use crate::context::build_prompt;
use crate::error::ChatError;
use crate::state::{AppState, SessionReuse};
use crate::store::{self, query, with_db};

/// Longest derived session title, in characters, before the ellipsis.
pub const TITLE_MAX_CHARS: usize = 50;

/// Outcome of a write the turn does not depend on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persisted {
    Stored,
    Failed(String),
}

impl Persisted {
    pub fn is_stored(&self) -> bool {
        matches!(self, Persisted::Stored)
    }
}

#[derive(Debug)]
pub struct PersistReport {
    pub user_message: Persisted,
    pub bot_reply: Persisted,
    pub session_touch: Persisted,
}

#[derive(Debug)]
pub struct ChatTurn {
    pub reply: String,
    pub chat_id: String,
    /// Whether any prior messages went into the prompt.
    pub context_used: bool,
    pub persisted: PersistReport,
}

/// Title for a new session: the message itself, cut to
/// [`TITLE_MAX_CHARS`] characters with an ellipsis when longer.
pub fn derive_title(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return DEFAULT_SESSION_TITLE.to_string();
    }
    if message.chars().count() <= TITLE_MAX_CHARS {
        return message.to_string();
    }
    let mut title: String = message.chars().take(TITLE_MAX_CHARS).collect();
    title.push('…');
    title
}

pub async fn handle_chat_turn(state: &AppState, request: ChatRequest) -> Result<ChatTurn, ChatError> {
    let user_id = required(request.user_id, "userId")?;
    let message = required(request.message, "message")?;
    let chat_id = request.chat_id.filter(|id| !id.trim().is_empty());
    let title = request.title.filter(|t| !t.trim().is_empty());

    let session = resolve_session(state, &user_id, chat_id, title, &message).await?;
    let chat_id = session.id;

    // User turn. Best-effort: generation still runs if this write fails.
    let (user_message, user_message_id) = {
        let cid = chat_id.clone();
        let content = message.clone();
        let result = with_db(state, move |db| {
            db.insert_message(&cid, Role::User.as_str(), &content, Utc::now())
        })
        .await?;
        match result {
            Ok(row) => (Persisted::Stored, Some(row.id)),
            Err(e) => (best_effort_failed("user message", &chat_id, e), None),
        }
    };

    // Prior turns only; the current message is appended by the prompt builder.
    let limit = state.chat.history_limit;
    let cid = chat_id.clone();
    let history: Vec<_> = query(state, move |db| {
        db.get_recent_messages(&cid, limit, user_message_id.as_deref())
    })
    .await?
    .into_iter()
    .map(store::message_from_row)
    .collect();

    let context_used = !history.is_empty();
    let prompt = build_prompt(&message, &history);
    debug!("Chat {}: prompt built from {} prior messages", chat_id, history.len());

    let reply = state.generator.generate(&prompt).await?;

    let bot_reply = {
        let cid = chat_id.clone();
        let content = reply.clone();
        let result = with_db(state, move |db| {
            db.insert_message(&cid, Role::Bot.as_str(), &content, Utc::now())
        })
        .await?;
        match result {
            Ok(_) => Persisted::Stored,
            Err(e) => best_effort_failed("assistant reply", &chat_id, e),
        }
    };

    let session_touch = {
        let cid = chat_id.clone();
        match with_db(state, move |db| db.touch_session(&cid, Utc::now())).await? {
            Ok(()) => Persisted::Stored,
            Err(e) => best_effort_failed("session touch", &chat_id, e),
        }
    };

    Ok(ChatTurn {
        reply,
        chat_id,
        context_used,
        persisted: PersistReport {
            user_message,
            bot_reply,
            session_touch,
        },
    })
}

/// Find the session this turn belongs to, creating one if needed. Store
/// failures here abort the turn before any generation call.
async fn resolve_session(
    state: &AppState,
    user_id: &str,
    chat_id: Option<String>,
    title: Option<String>,
    message: &str,
) -> Result<SessionRow, ChatError> {
    if let Some(chat_id) = chat_id {
        let uid = user_id.to_string();
        let cid = chat_id.clone();
        if let Some(session) = query(state, move |db| db.get_session_for_user(&cid, &uid)).await? {
            return Ok(session);
        }
        info!("Chat {} not found for user {}, resolving another session", chat_id, user_id);
    }

    if title.is_none() && state.chat.session_reuse == SessionReuse::ReuseLatest {
        let uid = user_id.to_string();
        if let Some(session) = query(state, move |db| db.latest_session_for_user(&uid)).await? {
            debug!("Reusing latest session {} for user {}", session.id, user_id);
            return Ok(session);
        }
    }

    let title = title.unwrap_or_else(|| derive_title(message));
    let uid = user_id.to_string();
    let session = query(state, move |db| db.create_session(&uid, &title)).await?;
    info!("Created chat session {} for user {}", session.id, user_id);
    Ok(session)
}

fn required(value: Option<String>, field: &str) -> Result<String, ChatError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ChatError::Validation(format!("Missing required field: {field}"))),
    }
}

fn best_effort_failed(what: &str, chat_id: &str, e: anyhow::Error) -> Persisted {
    warn!("Failed to store {} for chat {}: {:#}", what, chat_id, e);
    Persisted::Failed(format!("{e:#}"))
}
