//! API route assembly.

mod config;
mod health;
mod session;
mod workspace;

use axum::Router;

use crate::AppState;

/// Everything mounted under `/api`. The internal config endpoint is only
/// present in dev mode.
pub fn api_router(dev_mode: bool) -> Router<AppState> {
    let mut router = Router::new()
        .merge(health::router())
        .merge(workspace::router())
        .merge(session::router());
    if dev_mode {
        router = router.merge(config::router());
    }
    router
}
