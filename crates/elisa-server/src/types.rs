//! Request/response DTOs for the HTTP API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use elisa_core::workspace::RestartMode;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(rename = "apiKey")]
    pub api_key: &'static str,
    #[serde(rename = "apiKeyError", skip_serializing_if = "Option::is_none")]
    pub api_key_error: Option<String>,
    #[serde(rename = "agentSdk")]
    pub agent_sdk: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ConfigRequest {
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    #[serde(rename = "apiKey")]
    pub api_key: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct WorkspaceSaveRequest {
    pub workspace_path: String,
    #[serde(default)]
    pub workspace_json: Value,
    #[serde(default)]
    pub skills: Value,
    #[serde(default)]
    pub rules: Value,
    #[serde(default)]
    pub portals: Value,
}

#[derive(Debug, Deserialize)]
pub struct WorkspacePathRequest {
    pub workspace_path: String,
}

#[derive(Debug, Serialize)]
pub struct WorkspaceLoadResponse {
    pub workspace: Value,
    pub skills: Value,
    pub rules: Value,
    pub portals: Value,
}

#[derive(Debug, Deserialize)]
pub struct WorkspaceResetRequest {
    pub workspace_path: String,
    pub mode: String,
}

#[derive(Debug, Serialize)]
pub struct WorkspaceResetResponse {
    pub status: &'static str,
    pub mode: String,
    pub removed: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub spec: Value,
    #[serde(default)]
    pub workspace_path: Option<String>,
    #[serde(default)]
    pub restart_mode: Option<RestartMode>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct GateRequest {
    pub approved: bool,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub task_id: String,
    pub answers: std::collections::HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}
