//! Bearer-token auth middleware.
//!
//! A single token is established at startup and printed to the log; every
//! `/api` request except the health probe must present it.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::AppState;

pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    // Health is probed by tooling without credentials.
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == state.auth_token.as_str() => next.run(request).await,
        _ => AppError::Unauthorized.into_response(),
    }
}
