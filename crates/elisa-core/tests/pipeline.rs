//! End-to-end pipeline scenarios driven through mock capabilities.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use elisa_core::memory::BuildMemory;
use elisa_core::model::{LanguageModel, ModelRequest, ModelResponse, OutputSink};
use elisa_core::pipeline::{Capabilities, PipelineController};
use elisa_core::ports::{TestCapability, TestReport, WebDeployer, WebHandle};
use elisa_core::session::{Session, SessionStore};
use elisa_core::spec::ProjectSpec;
use elisa_core::tokens::TokenUsage;
use elisa_core::vcs::{CommitRecord, VersionStore};
use elisa_core::workspace::RestartMode;
use elisa_core::BuildEvent;

// ── Mock capabilities ──────────────────────────────────────────────────

/// Model that fails a configurable number of dispatches before answering,
/// recording the user prompt of every call.
struct FlakyModel {
    failures_before_success: usize,
    calls: AtomicUsize,
    user_prompts: Mutex<Vec<String>>,
}

impl FlakyModel {
    fn reliable() -> Arc<Self> {
        Self::failing(0)
    }

    fn failing(failures_before_success: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_before_success,
            calls: AtomicUsize::new(0),
            user_prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.user_prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for FlakyModel {
    fn default_model(&self) -> String {
        "mock".into()
    }

    async fn complete(
        &self,
        request: ModelRequest,
        _output: Option<OutputSink>,
    ) -> Result<ModelResponse> {
        let user_prompt = request
            .messages
            .iter()
            .find(|m| matches!(m.role, elisa_core::model::ChatRole::User))
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.user_prompts.lock().unwrap().push(user_prompt);

        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            return Err(anyhow!("transient upstream failure"));
        }

        Ok(ModelResponse {
            content: "Implemented the task as described.".into(),
            model: "mock".into(),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 20,
                ..Default::default()
            },
            ..Default::default()
        })
    }
}

/// Model that holds each call open long enough to observe concurrency.
struct SlowModel {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl LanguageModel for SlowModel {
    fn default_model(&self) -> String {
        "mock".into()
    }

    async fn complete(
        &self,
        _request: ModelRequest,
        _output: Option<OutputSink>,
    ) -> Result<ModelResponse> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ModelResponse {
            content: "done".into(),
            model: "mock".into(),
            ..Default::default()
        })
    }
}

/// Version store that fabricates a commit per task (or stays silent).
struct FakeVcs {
    produce_commits: bool,
}

#[async_trait]
impl VersionStore for FakeVcs {
    async fn init_repo(&self, _path: &Path, _goal: &str) -> Result<()> {
        Ok(())
    }

    async fn commit(
        &self,
        _path: &Path,
        message: &str,
        agent_name: &str,
        task_id: &str,
    ) -> Result<Option<CommitRecord>> {
        if !self.produce_commits {
            return Ok(None);
        }
        Ok(Some(CommitRecord {
            hash: format!("{:0>40}", task_id.len()),
            short_hash: "abcd1234".into(),
            message: message.to_string(),
            agent_name: agent_name.to_string(),
            task_id: task_id.to_string(),
            timestamp: chrono::Utc::now(),
            files: vec!["src/app.py".into()],
        }))
    }

    async fn diff_summary(&self, _path: &Path, _sha: &str) -> Result<Vec<String>> {
        Ok(vec!["src/app.py".into()])
    }
}

struct NoopWeb;

#[async_trait]
impl WebDeployer for NoopWeb {
    async fn deploy(&self, _workspace: &Path) -> Result<WebHandle> {
        Ok(WebHandle::new(Some("http://localhost:0".into()), None))
    }
}

struct PassingTests;

#[async_trait]
impl TestCapability for PassingTests {
    async fn run_tests(&self, _workspace: &Path) -> Result<TestReport> {
        Ok(TestReport {
            tests: vec![],
            passed: 0,
            failed: 0,
            total: 0,
            coverage_pct: None,
        })
    }
}

// ── Harness ────────────────────────────────────────────────────────────

struct Harness {
    controller: Arc<PipelineController>,
    session: Arc<Session>,
    events: UnboundedReceiver<BuildEvent>,
    _tmp: tempfile::TempDir,
}

fn harness(model: Arc<dyn LanguageModel>, produce_commits: bool) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let store = SessionStore::new();
    let session = store.create(
        tmp.path().join("workspace"),
        RestartMode::Continue,
        false,
    );
    let events = session.take_events().unwrap();

    let memory = Arc::new(BuildMemory::at(tmp.path().join("memory.json")));
    let mut caps = Capabilities::with_defaults(model, memory);
    caps.vcs = Arc::new(FakeVcs { produce_commits });
    caps.web = Arc::new(NoopWeb);
    caps.tests = Arc::new(PassingTests);

    let controller = PipelineController::new(Arc::clone(&session), caps);
    Harness {
        controller,
        session,
        events,
        _tmp: tmp,
    }
}

fn counter_spec() -> ProjectSpec {
    ProjectSpec::from_value(&json!({
        "project": {"goal": "Counter", "type": "app"},
        "requirements": [{"type": "feature", "description": "increment count"}],
        "agents": [{"name": "Builder Bot", "role": "builder", "persona": "friendly"}],
        "deployment": {"target": "preview"},
        "workflow": {"testing_enabled": false}
    }))
}

/// Drain events until the run terminates, answering gates with `approve`.
async fn collect_events(
    mut events: UnboundedReceiver<BuildEvent>,
    session: Arc<Session>,
    approve_gates: bool,
) -> Vec<Value> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv()).await;
        let Ok(Some(event)) = event else { break };
        let value = serde_json::to_value(&event).unwrap();
        let kind = value["type"].as_str().unwrap_or_default().to_string();
        seen.push(value);

        match kind.as_str() {
            "human_gate" => session.answer_gate(approve_gates, None),
            "session_complete" => break,
            "error" => {
                if !seen
                    .last()
                    .and_then(|v| v["recoverable"].as_bool())
                    .unwrap_or(false)
                {
                    break;
                }
            }
            _ => {}
        }
    }
    seen
}

fn types_of(events: &[Value]) -> Vec<String> {
    events
        .iter()
        .map(|e| e["type"].as_str().unwrap_or_default().to_string())
        .collect()
}

fn find<'a>(events: &'a [Value], kind: &str) -> Option<&'a Value> {
    events.iter().find(|e| e["type"] == kind)
}

// ── Scenarios ──────────────────────────────────────────────────────────

#[tokio::test]
async fn single_task_happy_path() {
    let model = FlakyModel::reliable();
    let h = harness(model, true);

    let controller = Arc::clone(&h.controller);
    let run = tokio::spawn(async move { controller.run(counter_spec()).await });
    let events = collect_events(h.events, Arc::clone(&h.session), true).await;
    run.await.unwrap();

    let types = types_of(&events);
    for expected in [
        "workspace_created",
        "planning_started",
        "plan_ready",
        "task_started",
        "commit_created",
        "task_completed",
        "judge_started",
        "judge_result",
        "session_complete",
    ] {
        assert!(types.contains(&expected.to_string()), "missing {}", expected);
    }

    // Ordering: task_started < commit_created < task_completed < judge < complete.
    let pos = |kind: &str| types.iter().position(|t| t == kind).unwrap();
    assert!(pos("task_started") < pos("commit_created"));
    assert!(pos("commit_created") < pos("task_completed"));
    assert!(pos("task_completed") < pos("judge_started"));
    assert!(pos("judge_result") < pos("session_complete"));

    let plan = find(&events, "plan_ready").unwrap();
    assert_eq!(plan["tasks"].as_array().unwrap().len(), 1);

    let judge = find(&events, "judge_result").unwrap();
    assert_eq!(judge["result"]["passed"], true);
    assert!(judge["result"]["score"].as_u64().unwrap() >= 70);

    let complete = find(&events, "session_complete").unwrap();
    assert!(complete["summary"]
        .as_str()
        .unwrap()
        .contains("Completed 1/1 tasks"));
    assert_eq!(complete["judge"]["passed"], true);

    // No gate fired on the happy path.
    assert!(find(&events, "human_gate").is_none());
}

#[tokio::test]
async fn retry_ladder_prompts_and_attempts() {
    // First two dispatches fail, third succeeds.
    let model = FlakyModel::failing(2);
    let h = harness(Arc::clone(&model) as Arc<dyn LanguageModel>, true);

    let controller = Arc::clone(&h.controller);
    let run = tokio::spawn(async move { controller.run(counter_spec()).await });
    let events = collect_events(h.events, Arc::clone(&h.session), true).await;
    run.await.unwrap();

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(!prompts[0].contains("Retry Attempt"));
    assert!(prompts[1].contains("## Retry Attempt 1"));
    assert!(prompts[1].contains("Skip orientation"));
    assert!(prompts[2].contains("## Retry Attempt 2"));
    assert!(!prompts[2].contains("Retry Attempt 1"));

    // Third attempt succeeded, so the task completed without a gate.
    assert!(find(&events, "task_completed").is_some());
    assert!(find(&events, "human_gate").is_none());
}

#[tokio::test]
async fn exhausted_retries_gate_and_cascade() {
    // Every dispatch fails: attempt 0 + 2 retries, then the gate.
    let model = FlakyModel::failing(usize::MAX);
    let spec = ProjectSpec::from_value(&json!({
        "project": {"goal": "Counter", "type": "app"},
        "requirements": [
            {"type": "feature", "description": "increment count"},
            {"type": "feature", "description": "show the total"}
        ],
        "agents": [{"name": "Builder Bot", "role": "builder"}],
        "workflow": {"testing_enabled": false}
    }));

    let h = harness(model, true);
    let controller = Arc::clone(&h.controller);
    let run = tokio::spawn(async move { controller.run(spec).await });
    let events = collect_events(h.events, Arc::clone(&h.session), true).await;
    run.await.unwrap();

    // The task gate fired with the retry count, then the judge gate.
    let gates: Vec<&Value> = events.iter().filter(|e| e["type"] == "human_gate").collect();
    assert!(gates.len() >= 2);
    assert_eq!(gates[0]["task_id"], "task-1");
    assert!(gates[0]["question"].as_str().unwrap().contains("2 retries"));
    assert_eq!(gates.last().unwrap()["task_id"], "__judge__");

    // task-1 failed for real; task-2 cascaded.
    let failures: Vec<&Value> = events.iter().filter(|e| e["type"] == "task_failed").collect();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0]["task_id"], "task-1");
    assert_eq!(failures[0]["retry_count"], 2);
    assert_eq!(failures[1]["task_id"], "task-2");
    assert_eq!(failures[1]["error"], "predecessor_failed");

    // Judge override approved, so the run still completed.
    let complete = find(&events, "session_complete").unwrap();
    assert_eq!(complete["judge"]["raw_passed"], false);
    assert_eq!(complete["judge"]["overridden"], true);
    assert_eq!(complete["judge"]["passed"], true);
}

#[tokio::test]
async fn judge_override_rejected_stops_the_build() {
    let model = FlakyModel::failing(usize::MAX);
    let h = harness(model, true);

    let controller = Arc::clone(&h.controller);
    let run = tokio::spawn(async move { controller.run(counter_spec()).await });

    // Approve the task gate, reject the judge gate.
    let session = Arc::clone(&h.session);
    let mut events = h.events;
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("run stalled");
        let Some(event) = event else { break };
        let value = serde_json::to_value(&event).unwrap();
        let kind = value["type"].as_str().unwrap_or_default().to_string();
        seen.push(value.clone());
        match kind.as_str() {
            "human_gate" if value["task_id"] == "__judge__" => {
                session.answer_gate(false, None);
            }
            "human_gate" => session.answer_gate(true, None),
            "error" => break,
            _ => {}
        }
    }
    run.await.unwrap();

    assert!(find(&seen, "session_complete").is_none());
    let error = find(&seen, "error").unwrap();
    assert_eq!(error["recoverable"], false);
    assert!(error["message"].as_str().unwrap().contains("Judge"));
}

#[tokio::test]
async fn no_staged_changes_means_no_commit_event() {
    let model = FlakyModel::reliable();
    let h = harness(model, false);

    let controller = Arc::clone(&h.controller);
    let run = tokio::spawn(async move { controller.run(counter_spec()).await });
    let events = collect_events(h.events, Arc::clone(&h.session), true).await;
    run.await.unwrap();

    assert!(find(&events, "commit_created").is_none());
    assert!(find(&events, "task_completed").is_some());
}

#[tokio::test]
async fn concurrency_stays_bounded() {
    let model = Arc::new(SlowModel {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });

    // Six independent tasks through the executor directly.
    let spec = ProjectSpec::from_value(&json!({
        "project": {"goal": "Fanout", "type": "app"},
        "agents": [{"name": "B", "role": "builder"}],
        "workflow": {"testing_enabled": false}
    }));

    let tmp = tempfile::tempdir().unwrap();
    let store = SessionStore::new();
    let session = store.create(tmp.path().join("w"), RestartMode::Continue, false);
    session.set_spec(Arc::new(spec));
    let _events = session.take_events().unwrap();

    let tasks: Vec<elisa_core::task::Task> = (1..=6)
        .map(|i| {
            let mut t =
                elisa_core::task::Task::new(format!("task-{}", i), format!("t{}", i), "B");
            t.description = "independent".into();
            t
        })
        .collect();
    let graph = elisa_core::dag::TaskGraph::build(&tasks).unwrap();
    let agents = vec![elisa_core::task::Agent::new(
        "B",
        elisa_core::spec::AgentRole::Builder,
        "",
    )];
    let plan = elisa_core::planner::Plan {
        tasks,
        agents,
        graph,
        explanation: String::new(),
    };

    let ws = Arc::new(elisa_core::workspace::WorkspaceManager::new(
        tmp.path().join("w"),
    ));
    ws.provision().await.unwrap();

    let mut registry = elisa_core::tools::ToolRegistry::new();
    elisa_core::tools::register_all_tools(&mut registry);
    let deps = elisa_core::pipeline::executor::ExecutorDeps {
        dispatcher: Arc::new(elisa_core::dispatch::Dispatcher::new(
            Arc::clone(&model) as Arc<dyn LanguageModel>,
            Arc::new(registry),
        )),
        vcs: Arc::new(FakeVcs {
            produce_commits: false,
        }),
        teaching: Arc::new(elisa_core::ports::NoTeaching),
        workspace: Arc::clone(&ws),
        context: Arc::new(elisa_core::context::ContextManager::new(ws.root())),
    };

    let report = elisa_core::pipeline::executor::execute(&session, &plan, &deps)
        .await
        .unwrap();

    assert_eq!(report.tasks.len(), 6);
    assert!(report
        .tasks
        .iter()
        .all(|t| t.status == elisa_core::task::TaskStatus::Done));
    let peak = model.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {} exceeded the cap", peak);
    assert!(peak >= 2, "independent tasks never overlapped");
}

#[tokio::test]
async fn cancellation_terminates_with_fatal_error() {
    let model = Arc::new(SlowModel {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let h = harness(model, true);

    let controller = Arc::clone(&h.controller);
    let run = tokio::spawn(async move { controller.run(counter_spec()).await });

    // Cancel as soon as the first task starts.
    let session = Arc::clone(&h.session);
    let mut events = h.events;
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("run stalled");
        let Some(event) = event else { break };
        let value = serde_json::to_value(&event).unwrap();
        let kind = value["type"].as_str().unwrap_or_default().to_string();
        seen.push(value);
        match kind.as_str() {
            "task_started" => session.cancel(),
            "error" | "session_complete" => break,
            _ => {}
        }
    }
    run.await.unwrap();

    let error = find(&seen, "error").unwrap();
    assert_eq!(error["recoverable"], false);
    assert!(find(&seen, "session_complete").is_none());
    assert!(h.session.bus.is_closed());

    // cancel() after the terminal state is a no-op.
    h.session.cancel();
}
