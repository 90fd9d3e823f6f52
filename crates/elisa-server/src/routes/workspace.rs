//! Workspace design-file endpoints: save, load, inspect, reset.

use std::path::PathBuf;

use axum::{extract::State, routing::post, Json, Router};
use serde_json::Value;

use elisa_core::workspace::{self, RestartMode, WorkspaceInspection, WorkspaceManager};

use crate::error::AppError;
use crate::types::{
    StatusResponse, WorkspaceLoadResponse, WorkspacePathRequest, WorkspaceResetRequest,
    WorkspaceResetResponse, WorkspaceSaveRequest,
};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/workspace/save", post(save))
        .route("/workspace/load", post(load))
        .route("/workspace/inspect", post(inspect))
        .route("/workspace/reset", post(reset))
}

/// Resolve a client-supplied workspace path inside the allowed root.
fn validate_path(state: &AppState, path: &str) -> Result<PathBuf, AppError> {
    if path.trim().is_empty() {
        return Err(AppError::BadRequest("workspace_path must not be empty".into()));
    }
    workspace::resolve_inside(&state.workspace_root, path)
        .map_err(|reason| AppError::BadRequest(format!("invalid workspace_path: {}", reason)))
}

async fn save(
    State(state): State<AppState>,
    Json(req): Json<WorkspaceSaveRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    let root = validate_path(&state, &req.workspace_path)?;
    tokio::fs::create_dir_all(&root)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    for (name, payload) in [
        ("workspace.json", &req.workspace_json),
        ("skills.json", &req.skills),
        ("rules.json", &req.rules),
        ("portals.json", &req.portals),
    ] {
        let serialized = serde_json::to_string_pretty(payload)?;
        tokio::fs::write(root.join(name), serialized)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;
    }

    Ok(Json(StatusResponse { status: "saved" }))
}

async fn load(
    State(state): State<AppState>,
    Json(req): Json<WorkspacePathRequest>,
) -> Result<Json<WorkspaceLoadResponse>, AppError> {
    let root = validate_path(&state, &req.workspace_path)?;

    async fn read_or_default(path: PathBuf, default: Value) -> Value {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or(default),
            Err(_) => default,
        }
    }

    Ok(Json(WorkspaceLoadResponse {
        workspace: read_or_default(root.join("workspace.json"), Value::Object(Default::default()))
            .await,
        skills: read_or_default(root.join("skills.json"), Value::Array(Vec::new())).await,
        rules: read_or_default(root.join("rules.json"), Value::Array(Vec::new())).await,
        portals: read_or_default(root.join("portals.json"), Value::Array(Vec::new())).await,
    }))
}

async fn inspect(
    State(state): State<AppState>,
    Json(req): Json<WorkspacePathRequest>,
) -> Result<Json<WorkspaceInspection>, AppError> {
    let root = validate_path(&state, &req.workspace_path)?;
    let report = tokio::task::spawn_blocking(move || workspace::inspect(&root))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(report))
}

async fn reset(
    State(state): State<AppState>,
    Json(req): Json<WorkspaceResetRequest>,
) -> Result<Json<WorkspaceResetResponse>, AppError> {
    if req.mode != "clean_generated" {
        return Err(AppError::BadRequest(format!(
            "unsupported reset mode: {}",
            req.mode
        )));
    }

    let root = validate_path(&state, &req.workspace_path)?;
    let manager = WorkspaceManager::new(root);
    let removed = manager
        .reset(RestartMode::Clean)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(WorkspaceResetResponse {
        status: "reset",
        mode: req.mode,
        removed,
    }))
}
