use std::str::FromStr;
use std::sync::Arc;

use relay_db::Database;
use relay_genai::GeminiClient;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub generator: GeminiClient,
    pub chat: ChatConfig,
}

impl AppStateInner {
    pub fn new(db: Database, generator: GeminiClient, chat: ChatConfig) -> AppState {
        Arc::new(Self {
            db: Arc::new(db),
            generator,
            chat,
        })
    }
}

/// What a turn without a resolvable chat id does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionReuse {
    /// Continue the caller's most recently updated session, if any.
    ReuseLatest,
    /// Always start a new session.
    AlwaysCreate,
}

impl FromStr for SessionReuse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest" | "reuse-latest" => Ok(SessionReuse::ReuseLatest),
            "new" | "always-create" => Ok(SessionReuse::AlwaysCreate),
            other => Err(format!("invalid session reuse policy: '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// How many prior messages are read for each turn.
    pub history_limit: u32,
    pub session_reuse: SessionReuse,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: 10,
            session_reuse: SessionReuse::ReuseLatest,
        }
    }
}
