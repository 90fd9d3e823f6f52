//! Health endpoint. Live-checks the environment on every call.

use axum::{routing::get, Json, Router};

use elisa_core::model::openai::OpenAiClient;

use crate::types::HealthResponse;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health() -> Json<HealthResponse> {
    let key = std::env::var("OPENAI_API_KEY").ok();
    let (api_key, api_key_error) = match key.as_deref() {
        None => ("missing", Some("OPENAI_API_KEY is not set".to_string())),
        Some(k) if k.trim().is_empty() => {
            ("invalid", Some("OPENAI_API_KEY is empty".to_string()))
        }
        Some(k) if !k.trim().starts_with("sk-") => (
            "invalid",
            Some("OPENAI_API_KEY does not look like an API key".to_string()),
        ),
        Some(_) => ("valid", None),
    };

    let agent_sdk = match OpenAiClient::from_env() {
        Ok(_) => "found",
        Err(_) => "not_found",
    };

    let status = if api_key == "valid" && agent_sdk == "found" {
        "ready"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        api_key,
        api_key_error,
        agent_sdk,
    })
}
