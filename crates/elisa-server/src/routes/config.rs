//! Dev-only credential endpoint. Absent when the server is built for
//! production asset serving.

use axum::{routing::post, Json, Router};

use crate::error::AppError;
use crate::types::{ConfigRequest, ConfigResponse};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/internal/config", post(set_config))
}

async fn set_config(Json(req): Json<ConfigRequest>) -> Result<Json<ConfigResponse>, AppError> {
    let key = req.api_key.trim();
    if key.is_empty() {
        return Err(AppError::BadRequest("apiKey must not be empty".into()));
    }

    std::env::set_var("OPENAI_API_KEY", key);

    let api_key = if key.starts_with("sk-") { "valid" } else { "invalid" };
    Ok(Json(ConfigResponse { api_key }))
}
