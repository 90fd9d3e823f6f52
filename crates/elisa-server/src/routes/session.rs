//! Session control endpoints: create (kicks off the run), cancel, gate,
//! and question answers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};

use elisa_core::model::openai::OpenAiClient;
use elisa_core::pipeline::{Capabilities, PipelineController};
use elisa_core::spec::ProjectSpec;
use elisa_core::workspace;

use crate::error::AppError;
use crate::types::{
    AnswerRequest, CreateSessionRequest, CreateSessionResponse, GateRequest, StatusResponse,
};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/session", post(create_session))
        .route("/session/:id/cancel", post(cancel_session))
        .route("/session/:id/gate", post(answer_gate))
        .route("/session/:id/answer", post(answer_question))
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, AppError> {
    let spec = ProjectSpec::from_value(&req.spec);
    if !spec.is_viable() {
        return Err(AppError::BadRequest("spec has no project goal".into()));
    }

    let model: Arc<dyn elisa_core::model::LanguageModel> =
        match elisa_core::model::global() {
            Some(client) => client,
            None => {
                let client = Arc::new(OpenAiClient::from_env().map_err(|e| {
                    AppError::Internal(format!("language model unavailable: {}", e))
                })?);
                elisa_core::model::set_global(client.clone());
                client
            }
        };

    let (workspace_dir, user_workspace) = match req.workspace_path.as_deref() {
        Some(path) if !path.trim().is_empty() => {
            let resolved = workspace::resolve_inside(&state.workspace_root, path)
                .map_err(|reason| {
                    AppError::BadRequest(format!("invalid workspace_path: {}", reason))
                })?;
            (resolved, true)
        }
        // No user-chosen path: build under a fresh per-run directory.
        _ => (
            state
                .workspace_root
                .join("builds")
                .join(uuid::Uuid::new_v4().to_string()),
            false,
        ),
    };

    let session = state.store.create(
        workspace_dir,
        req.restart_mode.unwrap_or_default(),
        user_workspace,
    );

    let controller = PipelineController::new(
        Arc::clone(&session),
        Capabilities::with_defaults(model, Arc::clone(&state.memory)),
    );
    state
        .controllers
        .write()
        .await
        .insert(session.id.clone(), Arc::clone(&controller));

    let spec_for_run = spec;
    let session_id = session.id.clone();
    tokio::spawn(async move {
        controller.run(spec_for_run).await;
    });

    Ok(Json(CreateSessionResponse { session_id }))
}

async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let session = state
        .store
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("session {} not found", id)))?;
    session.cancel();
    Ok(Json(StatusResponse {
        status: "cancelling",
    }))
}

async fn answer_gate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<GateRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    let session = state
        .store
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("session {} not found", id)))?;
    session.answer_gate(req.approved, req.feedback);
    Ok(Json(StatusResponse { status: "ok" }))
}

async fn answer_question(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    let session = state
        .store
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("session {} not found", id)))?;
    session.answer_question(&req.task_id, req.answers);
    Ok(Json(StatusResponse { status: "ok" }))
}
