use axum::{Json, extract::State};

use relay_types::api::HealthResponse;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now(),
        generation_backend_configured: state.generator.is_configured(),
    })
}
