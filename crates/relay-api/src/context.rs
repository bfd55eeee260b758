//! Prompt assembly from the current message and recent history.

use relay_types::models::{ChatMessage, Role};

/// Most prior messages that are ever rendered into a prompt.
pub const CONTEXT_WINDOW: usize = 10;

pub const PREAMBLE: &str = "You are a helpful AI assistant. You can help with a wide range of \
topics including answering questions, writing, analysis, coding, math, and general conversation.";

const WITH_HISTORY_INSTRUCTION: &str = "Please respond to the user's current message, taking \
into account the conversation context above.";

const NO_HISTORY_INSTRUCTION: &str =
    "Please provide a helpful, clear, and concise response to the following message:";

/// Build the prompt for `message`. `history` is oldest-first; only its last
/// [`CONTEXT_WINDOW`] entries are used. The prompt always ends with `message`.
pub fn build_prompt(message: &str, history: &[ChatMessage]) -> String {
    let mut prompt = String::from(PREAMBLE);

    if history.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(NO_HISTORY_INSTRUCTION);
        prompt.push_str("\n\n");
    } else {
        let start = history.len().saturating_sub(CONTEXT_WINDOW);
        let transcript = history[start..]
            .iter()
            .map(|m| format!("{}: {}", role_label(m.role), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        prompt.push_str("\n\nPrevious conversation:\n");
        prompt.push_str(&transcript);
        prompt.push_str("\n\n");
        prompt.push_str(WITH_HISTORY_INSTRUCTION);
        prompt.push_str("\n\nCurrent message: ");
    }

    prompt.push_str(message);
    prompt
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Bot => "Assistant",
    }
}
