//! Elisa server.
//!
//! HTTP + WebSocket surface over the build engine. This is a library
//! crate: the binary starts it via `start_server()`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{http::Method, middleware, routing::get, Router};
use tokio::sync::RwLock;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use elisa_core::memory::BuildMemory;
use elisa_core::pipeline::PipelineController;
use elisa_core::session::SessionStore;

pub mod auth;
pub mod error;
pub mod routes;
pub mod types;
pub mod ws;

/// Configuration for starting the server.
pub struct ServerConfig {
    /// Port to listen on (default: 3100).
    pub port: u16,
    /// Root directory user workspaces must live under.
    pub workspace_root: PathBuf,
    /// Expose the internal config endpoint.
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3100,
            workspace_root: std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("workspaces"),
            dev_mode: cfg!(debug_assertions),
        }
    }
}

impl ServerConfig {
    /// Read overrides from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        if let Ok(root) = std::env::var("ELISA_WORKSPACE_ROOT") {
            if !root.trim().is_empty() {
                config.workspace_root = PathBuf::from(root);
            }
        }
        config
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    /// Controllers by session id, for accessor endpoints and debugging.
    pub controllers: Arc<RwLock<HashMap<String, Arc<PipelineController>>>>,
    pub memory: Arc<BuildMemory>,
    pub workspace_root: Arc<PathBuf>,
    /// Bearer token established at startup.
    pub auth_token: Arc<String>,
}

/// Build the router and its state.
pub fn build_router(config: &ServerConfig) -> (Router, AppState) {
    let auth_token = uuid::Uuid::new_v4().to_string();
    let memory_fallback = config.workspace_root.join("memory.json");

    let state = AppState {
        store: Arc::new(SessionStore::new()),
        controllers: Arc::new(RwLock::new(HashMap::new())),
        memory: Arc::new(BuildMemory::from_env(memory_fallback)),
        workspace_root: Arc::new(config.workspace_root.clone()),
        auth_token: Arc::new(auth_token),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    // Only the session event path is upgradable; any other upgrade attempt
    // falls through to the 404 fallback, which drops the socket.
    let app = Router::new()
        .route("/ws/session/:id", get(ws::handler))
        .nest(
            "/api",
            routes::api_router(config.dev_mode).layer(middleware::from_fn_with_state(
                state.clone(),
                auth::auth_middleware,
            )),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    (app, state)
}

/// Start the server and block until shutdown.
pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.workspace_root)?;

    let (app, state) = build_router(&config);
    state.store.spawn_pruner();

    tracing::info!("session auth token: {}", state.auth_token);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    tracing::info!("elisa-server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
