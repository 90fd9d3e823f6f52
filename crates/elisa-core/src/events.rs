//! Lifecycle event vocabulary and the per-session event bus.
//!
//! `BuildEvent` is the single source of truth for everything the pipeline
//! emits. The WebSocket layer serializes each event into one JSON frame;
//! observers (the session log sink) see every event before it is queued.
//!
//! Ordering: `publish` runs on the caller's thread and pushes into a single
//! unbounded channel, so the order observed by the subscriber equals the
//! order of publication. After `session_complete` or a non-recoverable
//! `error` the bus latches closed and drops further events.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::pipeline::judge::{JudgeResult, JudgeVerdict};
use crate::spec::{AgentRole, DeployTarget};
use crate::task::{Agent, AgentState, Task};
use crate::vcs::CommitRecord;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildEvent {
    SessionStarted {
        session_id: String,
    },
    PlanningStarted,
    PlanReady {
        tasks: Vec<Task>,
        agents: Vec<Agent>,
        explanation: String,
    },
    TaskStarted {
        task_id: String,
        name: String,
        agent_name: String,
    },
    TaskCompleted {
        task_id: String,
        summary: String,
    },
    TaskFailed {
        task_id: String,
        error: String,
        retry_count: u32,
    },
    AgentSpawned {
        name: String,
        role: AgentRole,
    },
    AgentStatus {
        name: String,
        status: AgentState,
    },
    AgentOutput {
        task_id: String,
        agent_name: String,
        text: String,
    },
    AgentMessage {
        task_id: String,
        agent_name: String,
        text: String,
    },
    AgentQuestion {
        task_id: String,
        questions: Value,
    },
    ToolUse {
        task_id: String,
        tool: String,
        args: Value,
    },
    ToolResult {
        task_id: String,
        tool: String,
        output: String,
        is_error: bool,
    },
    CodeGenerated {
        task_id: String,
        files: Vec<String>,
    },
    CodeReviewStarted {
        task_id: String,
    },
    CodeReviewComplete {
        task_id: String,
        summary: String,
    },
    TestStarted,
    TestResult {
        name: String,
        passed: bool,
        details: String,
    },
    TestPhaseComplete {
        passed: usize,
        failed: usize,
        total: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        coverage_pct: Option<f64>,
    },
    DeployStarted {
        target: DeployTarget,
    },
    DeployProgress {
        message: String,
    },
    DeployComplete {
        target: DeployTarget,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    TeachingMoment {
        task_id: String,
        concept: String,
        explanation: String,
    },
    WorkspaceCreated {
        path: String,
    },
    CommitCreated {
        task_id: String,
        commit: CommitRecord,
    },
    JudgeStarted,
    JudgeResult {
        result: JudgeResult,
    },
    HumanGate {
        task_id: String,
        question: String,
        context: String,
    },
    SessionComplete {
        summary: String,
        judge: JudgeVerdict,
        suggestions: Vec<crate::memory::PatternSuggestion>,
    },
    Error {
        message: String,
        recoverable: bool,
    },
}

impl BuildEvent {
    /// Events that latch the bus closed.
    fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionComplete { .. })
            || matches!(
                self,
                Self::Error {
                    recoverable: false,
                    ..
                }
            )
    }
}

type Observer = Box<dyn Fn(&BuildEvent) + Send + Sync + 'static>;

/// Single ordered outbound channel for one session.
pub struct EventBus {
    tx: mpsc::UnboundedSender<BuildEvent>,
    observers: Mutex<Vec<Observer>>,
    closed: AtomicBool,
}

impl EventBus {
    /// Create a bus and the receiving end handed to the subscriber.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<BuildEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                observers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
            rx,
        )
    }

    /// Adds an observer that sees every published event before the
    /// subscriber does. Used for the session log sink.
    pub fn add_observer<F>(&self, observer: F)
    where
        F: Fn(&BuildEvent) + Send + Sync + 'static,
    {
        self.observers
            .lock()
            .expect("observer lock poisoned")
            .push(Box::new(observer));
    }

    /// Publish one event. Returns false when the bus has latched closed.
    pub fn publish(&self, event: BuildEvent) -> bool {
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(?event, "event dropped after terminal state");
            return false;
        }

        let terminal = event.is_terminal();

        {
            let observers = self.observers.lock().expect("observer lock poisoned");
            for observer in observers.iter() {
                observer(&event);
            }
        }

        let sent = self.tx.send(event).is_ok();
        if terminal {
            self.closed.store(true, Ordering::Release);
        }
        sent
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Observer that appends each event as one NDJSON line to the session log.
///
/// The log file lives under `.elisa/logs/` and is never cleaned between
/// builds. Write failures are swallowed; logging must not stall the bus.
pub fn session_log_observer(log_path: PathBuf) -> impl Fn(&BuildEvent) + Send + Sync + 'static {
    move |event| {
        let line = match serde_json::to_string(&serde_json::json!({
            "ts": chrono::Utc::now().to_rfc3339(),
            "event": event,
        })) {
            Ok(line) => line,
            Err(_) => return,
        };

        use std::io::Write;
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            let _ = writeln!(file, "{}", line);
        }
    }
}
