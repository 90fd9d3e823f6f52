//! Session records and the in-memory session store.
//!
//! A session is the lifetime of one build run: its workspace, its event
//! stream, its cancellation flag, and the two suspension primitives (the
//! single human gate and the per-task question resolvers).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};

use crate::constants::{SESSION_MAX_AGE, SESSION_PRUNE_TICK, SESSION_TERMINAL_GRACE};
use crate::events::{BuildEvent, EventBus};
use crate::spec::ProjectSpec;
use crate::tokens::TokenTracker;
use crate::workspace::RestartMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Planning,
    Executing,
    Testing,
    Deploying,
    Judging,
    Done,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// Cancellation signal shared by every suspension point in a run.
///
/// Backed by a watch channel so that a waiter registered after `cancel()`
/// still observes the signal.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    flag: AtomicBool,
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(CancelInner {
                flag: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::Release);
        let _ = self.inner.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.tx.subscribe();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        // Sender dropped without cancelling; park forever so select! arms
        // relying on this future never fire spuriously.
        std::future::pending::<()>().await;
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Answer delivered through `answer_gate`.
#[derive(Debug, Clone)]
pub struct GateAnswer {
    pub approved: bool,
    pub feedback: Option<String>,
}

pub struct Session {
    pub id: String,
    pub workspace_dir: PathBuf,
    pub restart_mode: RestartMode,
    /// True when the workspace path was chosen by the user.
    pub user_workspace: bool,
    pub bus: Arc<EventBus>,
    pub tokens: TokenTracker,
    cancel: CancelHandle,
    state: Mutex<SessionState>,
    spec: Mutex<Option<Arc<ProjectSpec>>>,
    gate: Mutex<Option<oneshot::Sender<GateAnswer>>>,
    questions: Mutex<HashMap<String, oneshot::Sender<HashMap<String, String>>>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<BuildEvent>>>,
    created_at: Instant,
    terminal_at: Mutex<Option<Instant>>,
}

impl Session {
    pub fn new(id: String, workspace_dir: PathBuf, restart_mode: RestartMode, user_workspace: bool) -> Self {
        let (bus, rx) = EventBus::channel();
        Self {
            id,
            workspace_dir,
            restart_mode,
            user_workspace,
            bus,
            tokens: TokenTracker::new(),
            cancel: CancelHandle::new(),
            state: Mutex::new(SessionState::Idle),
            spec: Mutex::new(None),
            gate: Mutex::new(None),
            questions: Mutex::new(HashMap::new()),
            events: Mutex::new(Some(rx)),
            created_at: Instant::now(),
            terminal_at: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock().expect("state lock poisoned");
        if current.is_terminal() {
            return;
        }
        *current = state;
        if state.is_terminal() {
            *self.terminal_at.lock().expect("terminal lock poisoned") = Some(Instant::now());
        }
    }

    pub fn set_spec(&self, spec: Arc<ProjectSpec>) {
        *self.spec.lock().expect("spec lock poisoned") = Some(spec);
    }

    pub fn spec(&self) -> Option<Arc<ProjectSpec>> {
        self.spec.lock().expect("spec lock poisoned").clone()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Idempotent; a no-op once the session is terminal.
    pub fn cancel(&self) {
        if self.state().is_terminal() {
            return;
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Take the event receiver. The single subscriber claims it on connect.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<BuildEvent>> {
        self.events.lock().expect("events lock poisoned").take()
    }

    /// Arm the human gate and return the receiver for its answer. At most
    /// one gate is pending per session; arming replaces a stale resolver.
    pub fn arm_gate(&self) -> oneshot::Receiver<GateAnswer> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().expect("gate lock poisoned") = Some(tx);
        rx
    }

    /// Resolve the pending gate. Answering when no gate is armed is a
    /// silent no-op.
    pub fn answer_gate(&self, approved: bool, feedback: Option<String>) {
        if let Some(tx) = self.gate.lock().expect("gate lock poisoned").take() {
            let _ = tx.send(GateAnswer { approved, feedback });
        }
    }

    /// Register a question resolver for a task. At most one outstanding
    /// resolver per task id.
    pub fn arm_question(&self, task_id: &str) -> oneshot::Receiver<HashMap<String, String>> {
        let (tx, rx) = oneshot::channel();
        self.questions
            .lock()
            .expect("question lock poisoned")
            .insert(task_id.to_string(), tx);
        rx
    }

    /// Resolve a pending question. Unknown task ids are a silent no-op.
    pub fn answer_question(&self, task_id: &str, answers: HashMap<String, String>) {
        let tx = self
            .questions
            .lock()
            .expect("question lock poisoned")
            .remove(task_id);
        if let Some(tx) = tx {
            let _ = tx.send(answers);
        }
    }

    fn prunable(&self, now: Instant, max_age: Duration, grace: Duration) -> bool {
        if now.duration_since(self.created_at) > max_age {
            return true;
        }
        self.terminal_at
            .lock()
            .expect("terminal lock poisoned")
            .is_some_and(|t| now.duration_since(t) > grace)
    }
}

/// In-memory session registry with periodic pruning.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &self,
        workspace_dir: PathBuf,
        restart_mode: RestartMode,
        user_workspace: bool,
    ) -> Arc<Session> {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(id.clone(), workspace_dir, restart_mode, user_workspace));
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .insert(id, Arc::clone(&session));
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sessions past the max age, and terminal sessions past the
    /// grace period. Returns how many were removed.
    pub fn prune_with(&self, now: Instant, max_age: Duration, grace: Duration) -> usize {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        let before = sessions.len();
        sessions.retain(|_, s| !s.prunable(now, max_age, grace));
        before - sessions.len()
    }

    /// Background pruning loop on the default cadence.
    pub fn spawn_pruner(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SESSION_PRUNE_TICK);
            tick.tick().await;
            loop {
                tick.tick().await;
                let removed =
                    store.prune_with(Instant::now(), SESSION_MAX_AGE, SESSION_TERMINAL_GRACE);
                if removed > 0 {
                    tracing::info!(removed, "pruned stale sessions");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session(store: &SessionStore) -> Arc<Session> {
        store.create(PathBuf::from("/tmp/w"), RestartMode::Continue, false)
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_observable() {
        let handle = CancelHandle::new();
        assert!(!handle.is_cancelled());

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.cancelled().await })
        };

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        waiter.await.unwrap();

        // A waiter registered after the fact resolves immediately.
        handle.cancelled().await;
    }

    #[tokio::test]
    async fn gate_round_trip() {
        let store = SessionStore::new();
        let session = new_session(&store);

        let rx = session.arm_gate();
        session.answer_gate(true, Some("looks fine".into()));
        let answer = rx.await.unwrap();
        assert!(answer.approved);
        assert_eq!(answer.feedback.as_deref(), Some("looks fine"));

        // Answering with no gate armed is a silent no-op.
        session.answer_gate(false, None);
    }

    #[tokio::test]
    async fn question_resolvers_are_per_task() {
        let store = SessionStore::new();
        let session = new_session(&store);

        let rx1 = session.arm_question("task-1");
        let rx2 = session.arm_question("task-2");

        session.answer_question("task-2", HashMap::from([("q".into(), "two".into())]));
        session.answer_question("missing", HashMap::new());

        let answers = rx2.await.unwrap();
        assert_eq!(answers["q"], "two");
        drop(rx1);
    }

    #[test]
    fn terminal_state_is_sticky() {
        let store = SessionStore::new();
        let session = new_session(&store);

        session.set_state(SessionState::Planning);
        session.set_state(SessionState::Done);
        session.set_state(SessionState::Executing);
        assert_eq!(session.state(), SessionState::Done);
    }

    #[test]
    fn cancel_after_done_is_noop() {
        let store = SessionStore::new();
        let session = new_session(&store);
        session.set_state(SessionState::Done);
        session.cancel();
        assert!(!session.is_cancelled());
    }

    #[test]
    fn pruning_respects_age_and_grace() {
        let store = SessionStore::new();
        let session = new_session(&store);
        let max_age = Duration::from_secs(3_600);
        let grace = Duration::from_secs(300);

        // Fresh, non-terminal: kept.
        assert_eq!(store.prune_with(Instant::now(), max_age, grace), 0);

        // Terminal but within grace: kept.
        session.set_state(SessionState::Done);
        assert_eq!(store.prune_with(Instant::now(), max_age, grace), 0);

        // Terminal past grace: removed.
        let later = Instant::now() + grace + Duration::from_secs(1);
        assert_eq!(store.prune_with(later, max_age, grace), 1);
        assert!(store.is_empty());
    }
}
