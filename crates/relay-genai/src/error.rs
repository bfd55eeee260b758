use thiserror::Error;

/// Failures of a single generation call.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Invalid API key configuration")]
    InvalidCredential,

    #[error("API quota exceeded. Please try again later.")]
    QuotaExceeded,

    #[error("Response was blocked by content safety filters. Please rephrase your message.")]
    ContentFiltered,

    #[error("No response generated from the model")]
    EmptyResponse,

    #[error("Generation API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Generation request failed: {0}")]
    Transport(String),

    #[error("Malformed generation response: {0}")]
    Malformed(String),
}

impl GenerationError {
    /// Content filtering is the caller's problem, not a system fault.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, GenerationError::ContentFiltered)
    }
}
