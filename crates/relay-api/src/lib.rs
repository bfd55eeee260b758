pub mod chat;
pub mod context;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod sessions;
pub mod state;
pub mod store;

use axum::{
    Router,
    routing::{get, post},
};

pub use state::{AppState, AppStateInner, ChatConfig, SessionReuse};

/// All chat routes. Middleware layers are added by the binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat::chat))
        // One placeholder name: {id} is a user id for GET and a chat id for DELETE.
        .route(
            "/chat-sessions/{id}",
            get(sessions::list_sessions).delete(sessions::delete_session),
        )
        .route("/chat-messages/{chat_id}", get(sessions::list_messages))
        .route("/health", get(health::health))
        .with_state(state)
}
