//! HTTP surface tests driven through the router with `tower::oneshot`.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use elisa_server::{build_router, AppState, ServerConfig};

fn test_server(root: &std::path::Path) -> (axum::Router, AppState) {
    std::fs::create_dir_all(root).unwrap();
    let config = ServerConfig {
        port: 0,
        workspace_root: root.to_path_buf(),
        dev_mode: true,
    };
    build_router(&config)
}

async fn send(
    app: &axum::Router,
    state: &AppState,
    method: &str,
    path: &str,
    body: Option<Value>,
    authed: bool,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if authed {
        builder = builder.header(
            header::AUTHORIZATION,
            format!("Bearer {}", state.auth_token),
        );
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn health_is_open_and_reports_key_state() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, state) = test_server(tmp.path());

    let (status, body) = send(&app, &state, "GET", "/api/health", None, false).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["status"] == "ready" || body["status"] == "degraded");
    assert!(body.get("apiKey").is_some());
    assert!(body.get("agentSdk").is_some());
}

#[tokio::test]
async fn api_requires_bearer_token() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, state) = test_server(tmp.path());

    let body = json!({"workspace_path": "proj"});
    let (status, _) = send(&app, &state, "POST", "/api/workspace/inspect", Some(body.clone()), false).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, &state, "POST", "/api/workspace/inspect", Some(body), true).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn workspace_save_then_load_round_trips() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, state) = test_server(tmp.path());

    let save = json!({
        "workspace_path": "proj",
        "workspace_json": {"goal": "Counter", "blocks": [1, 2, 3]},
        "skills": [{"name": "tidy", "prompt": "keep it tidy"}],
        "rules": [],
        "portals": []
    });
    let (status, body) = send(&app, &state, "POST", "/api/workspace/save", Some(save), true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "saved");

    let (status, body) = send(
        &app,
        &state,
        "POST",
        "/api/workspace/load",
        Some(json!({"workspace_path": "proj"})),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workspace"]["goal"], "Counter");
    assert_eq!(body["workspace"]["blocks"], json!([1, 2, 3]));
    assert_eq!(body["skills"][0]["name"], "tidy");
    assert_eq!(body["rules"], json!([]));
}

#[tokio::test]
async fn workspace_load_missing_files_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, state) = test_server(tmp.path());

    let (status, body) = send(
        &app,
        &state,
        "POST",
        "/api/workspace/load",
        Some(json!({"workspace_path": "never-saved"})),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workspace"], json!({}));
    assert_eq!(body["skills"], json!([]));
    assert_eq!(body["portals"], json!([]));
}

#[tokio::test]
async fn workspace_reset_rejects_other_modes() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, state) = test_server(tmp.path());

    let (status, _) = send(
        &app,
        &state,
        "POST",
        "/api/workspace/reset",
        Some(json!({"workspace_path": "proj", "mode": "nuke_everything"})),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn workspace_reset_cleans_generated_only() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, state) = test_server(tmp.path());

    let proj = tmp.path().join("proj");
    std::fs::create_dir_all(proj.join("src")).unwrap();
    std::fs::create_dir_all(proj.join(".elisa/logs")).unwrap();
    std::fs::write(proj.join("src/app.py"), "x").unwrap();
    std::fs::write(proj.join("workspace.json"), "{}").unwrap();
    std::fs::write(proj.join(".elisa/logs/s.log"), "line").unwrap();

    let (status, body) = send(
        &app,
        &state,
        "POST",
        "/api/workspace/reset",
        Some(json!({"workspace_path": "proj", "mode": "clean_generated"})),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "reset");
    assert!(body["removed"].as_array().unwrap().iter().any(|r| r == "src"));

    assert!(!proj.join("src/app.py").exists());
    assert!(proj.join("workspace.json").exists());
    assert!(proj.join(".elisa/logs/s.log").exists());
}

#[tokio::test]
async fn path_escape_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, state) = test_server(tmp.path());

    let (status, body) = send(
        &app,
        &state,
        "POST",
        "/api/workspace/inspect",
        Some(json!({"workspace_path": "../outside"})),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("workspace_path"));
}

#[tokio::test]
async fn session_creation_rejects_goalless_spec() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, state) = test_server(tmp.path());

    let (status, body) = send(
        &app,
        &state,
        "POST",
        "/api/session",
        Some(json!({"spec": {"project": {"goal": "  "}}})),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("goal"));
}

#[tokio::test]
async fn unknown_session_operations_404() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, state) = test_server(tmp.path());

    let (status, _) = send(&app, &state, "POST", "/api/session/nope/cancel", None, true).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        &state,
        "POST",
        "/api/session/nope/gate",
        Some(json!({"approved": true})),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dev_config_rejects_empty_key() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, state) = test_server(tmp.path());

    let (status, _) = send(
        &app,
        &state,
        "POST",
        "/api/internal/config",
        Some(json!({"apiKey": ""})),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
