//! `GeminiClient` sends one prompt to `generateContent` and turns the
//! response into reply text or a [`GenerationError`].
//!
//! The API key travels in the `x-goog-api-key` header rather than the query
//! string so it never shows up in request logs.

use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::types::{
    ApiErrorEnvelope, Content, GenerateContentRequest, GenerateContentResponse, GenerationParams,
    Part,
};

/// Substituted when the top candidate carries no text part.
pub const FALLBACK_REPLY: &str = "I apologize, but I couldn't generate a response.";

/// Finish reasons that mean the candidate was withheld by a content filter.
const BLOCKED_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

pub struct GeminiClient {
    client: reqwest::Client,
    config: GenerationConfig,
}

impl GeminiClient {
    pub fn new(config: GenerationConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GenerationError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Whether a non-empty credential was supplied.
    pub fn is_configured(&self) -> bool {
        !self.config.api_key.expose_secret().is_empty()
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url, self.config.model
        )
    }

    fn build_request(&self, prompt: &str) -> GenerateContentRequest {
        let sampling = self.config.sampling;
        GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationParams {
                temperature: sampling.temperature,
                top_p: sampling.top_p,
                max_output_tokens: sampling.max_output_tokens,
            },
            safety_settings: self.config.safety.clone(),
        }
    }

    /// Send `prompt` and return the reply text. No retries.
    pub async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = self.build_request(prompt);

        debug!("Sending {} prompt chars to model {}", prompt.len(), self.config.model);

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::Transport(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            warn!("Generation API returned HTTP {}", status);
            return Err(classify_api_error(status.as_u16(), &text));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| GenerationError::Malformed(format!("failed to parse response: {e}")))?;

        extract_reply(parsed)
    }
}

/// Map a non-success response to an error by inspecting its message.
pub fn classify_api_error(status: u16, body: &str) -> GenerationError {
    let message = serde_json::from_str::<ApiErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.to_string());

    if message.contains("API key") {
        GenerationError::InvalidCredential
    } else if message.to_lowercase().contains("quota") {
        GenerationError::QuotaExceeded
    } else {
        GenerationError::Api { status, message }
    }
}

/// Validate a successful response and pull the reply out of the top candidate.
pub fn extract_reply(response: GenerateContentResponse) -> Result<String, GenerationError> {
    let Some(top) = response.candidates.first() else {
        let blocked = response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
            .is_some();
        return Err(if blocked {
            GenerationError::ContentFiltered
        } else {
            GenerationError::EmptyResponse
        });
    };

    if let Some(reason) = top.finish_reason.as_deref() {
        if BLOCKED_FINISH_REASONS.contains(&reason) {
            return Err(GenerationError::ContentFiltered);
        }
    }

    match top.text() {
        Some(text) => Ok(text.to_string()),
        None => {
            warn!("Top candidate had no text part, using fallback reply");
            Ok(FALLBACK_REPLY.to_string())
        }
    }
}
