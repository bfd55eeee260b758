use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use relay_genai::GenerationError;
use relay_types::api::ErrorBody;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),

    /// A store call failed. The detail is logged, not returned.
    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Unexpected failure; the detail is returned for diagnostics.
    #[error("{0}")]
    Internal(String),
}

impl ChatError {
    pub fn storage(e: anyhow::Error) -> Self {
        ChatError::Storage(format!("{e:#}"))
    }

    /// Failures that abort a chat turn report their cause to the caller.
    pub fn into_turn_error(self) -> Self {
        match self {
            ChatError::Storage(detail) => ChatError::Internal(detail),
            other => other,
        }
    }
}

impl From<JsonRejection> for ChatError {
    fn from(rejection: JsonRejection) -> Self {
        ChatError::Validation(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ChatError {
    fn from(rejection: QueryRejection) -> Self {
        ChatError::Validation(format!("Invalid query string: {}", rejection.body_text()))
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ChatError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: message,
                    details: None,
                },
            ),
            ChatError::Storage(detail) => {
                error!("Storage error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "Database operation failed".to_string(),
                        details: None,
                    },
                )
            }
            ChatError::Generation(e) if e.is_user_facing() => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    error: e.to_string(),
                    details: None,
                },
            ),
            ChatError::Generation(e) => {
                error!("Generation error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: e.to_string(),
                        details: None,
                    },
                )
            }
            ChatError::Internal(detail) => {
                error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "Internal server error".to_string(),
                        details: Some(detail),
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
