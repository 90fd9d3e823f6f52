//! Executor phase: drives the scheduler until every task terminates.
//!
//! Each ready task gets a logical worker that runs the retry ladder:
//! dispatch with growing turn and completion-token budgets, compact
//! context after a window overflow, the fallback model after an output
//! overflow. Exhausted tasks fire the human gate; an approved gate fails
//! the task and cascades `predecessor_failed` to every descendant
//! (transitively: a dependent of a skipped task can never become ready).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinSet;

use crate::constants::{
    COMPLETION_TOKENS_CAP, COMPLETION_TOKENS_DEFAULT, COMPLETION_TOKENS_INCREMENT, FALLBACK_MODEL,
    MAX_CONCURRENT_TASKS, MAX_TURNS_DEFAULT, MAX_TURNS_RETRY_INCREMENT, RETRY_LIMIT,
};
use crate::context::ContextManager;
use crate::dispatch::{AgentResult, DispatchObserver, DispatchOptions, Dispatcher};
use crate::events::BuildEvent;
use crate::planner::Plan;
use crate::ports::TeachingEngine;
use crate::prompt::{self, PromptInput};
use crate::session::Session;
use crate::spec::AgentRole;
use crate::task::{AgentState, Task, TaskStatus};
use crate::vcs::{CommitRecord, VersionStore};
use crate::workspace::WorkspaceManager;

/// Turn budget for a dispatch attempt: the default plus a fixed increment
/// per retry.
pub fn max_turns_for(attempt: u32) -> usize {
    MAX_TURNS_DEFAULT + attempt as usize * MAX_TURNS_RETRY_INCREMENT
}

pub struct ExecutorDeps {
    pub dispatcher: Arc<Dispatcher>,
    pub vcs: Arc<dyn VersionStore>,
    pub teaching: Arc<dyn TeachingEngine>,
    pub workspace: Arc<WorkspaceManager>,
    pub context: Arc<ContextManager>,
}

#[derive(Debug)]
pub struct ExecutionReport {
    /// Tasks with their final statuses.
    pub tasks: Vec<Task>,
    pub commits: Vec<CommitRecord>,
    pub retry_counts: HashMap<String, u32>,
}

enum WorkerOutcome {
    Done { summary: String },
    Exhausted { error: String, retry_count: u32 },
    Cancelled,
}

/// Fallback-model latch: once an output-limit error fires anywhere in the
/// run, every later dispatch uses the fallback model.
struct ModelLadder {
    fallback_active: AtomicBool,
    fallback_model: String,
}

impl ModelLadder {
    fn from_env() -> Self {
        Self {
            fallback_active: AtomicBool::new(false),
            fallback_model: std::env::var("OUTPUT_LIMIT_FALLBACK_MODEL")
                .ok()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_MODEL.to_string()),
        }
    }

    fn current(&self) -> Option<String> {
        self.fallback_active
            .load(Ordering::Acquire)
            .then(|| self.fallback_model.clone())
    }

    fn activate(&self) {
        self.fallback_active.store(true, Ordering::Release);
    }
}

pub async fn execute(
    session: &Arc<Session>,
    plan: &Plan,
    deps: &ExecutorDeps,
) -> Result<ExecutionReport> {
    let statuses: Arc<Mutex<HashMap<String, TaskStatus>>> = Arc::new(Mutex::new(
        plan.tasks
            .iter()
            .map(|t| (t.id.clone(), TaskStatus::Pending))
            .collect(),
    ));
    let ladder = Arc::new(ModelLadder::from_env());
    let mut commits: Vec<CommitRecord> = Vec::new();
    let mut retry_counts: HashMap<String, u32> = HashMap::new();

    let mut workers: JoinSet<(String, WorkerOutcome)> = JoinSet::new();
    let mut in_flight = 0usize;

    loop {
        if session.is_cancelled() {
            workers.shutdown().await;
            break;
        }

        // Pull the next ready batch under the shared status lock.
        let batch = {
            let map = statuses.lock().expect("status lock poisoned");
            plan.graph
                .ready_batch(&map, MAX_CONCURRENT_TASKS.saturating_sub(in_flight))
        };

        for task_id in batch {
            let task = plan
                .tasks
                .iter()
                .find(|t| t.id == task_id)
                .expect("scheduled task exists in plan")
                .clone();
            let agent = plan
                .agents
                .iter()
                .find(|a| a.name == task.agent_name)
                .expect("plan validated agent resolution")
                .clone();

            statuses
                .lock()
                .expect("status lock poisoned")
                .insert(task_id.clone(), TaskStatus::InProgress);

            session.bus.publish(BuildEvent::TaskStarted {
                task_id: task.id.clone(),
                name: task.name.clone(),
                agent_name: agent.name.clone(),
            });
            session.bus.publish(BuildEvent::AgentStatus {
                name: agent.name.clone(),
                status: AgentState::Working,
            });
            if agent.role == AgentRole::Reviewer {
                session.bus.publish(BuildEvent::CodeReviewStarted {
                    task_id: task.id.clone(),
                });
            }

            in_flight += 1;
            let worker = TaskWorker {
                session: Arc::clone(session),
                dispatcher: Arc::clone(&deps.dispatcher),
                workspace: Arc::clone(&deps.workspace),
                context: Arc::clone(&deps.context),
                ladder: Arc::clone(&ladder),
                task,
                agent,
                predecessors: plan.graph.dependencies_of(&task_id).to_vec(),
            };
            workers.spawn(async move {
                let id = worker.task.id.clone();
                let outcome = worker.run().await;
                (id, outcome)
            });
        }

        if in_flight == 0 {
            let map = statuses.lock().expect("status lock poisoned");
            if plan.graph.all_terminal(&map) {
                break;
            }
            // No runnable work and nothing in flight: the cascade keeps
            // this unreachable, but never spin.
            tracing::error!(session_id = %session.id, "scheduler wedged with non-terminal tasks");
            break;
        }

        let Some(joined) = workers.join_next().await else {
            in_flight = 0;
            continue;
        };
        in_flight -= 1;

        let (task_id, outcome) = match joined {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "task worker panicked");
                continue;
            }
        };
        let task = plan
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .expect("worker task exists");

        match outcome {
            WorkerOutcome::Done { summary } => {
                statuses
                    .lock()
                    .expect("status lock poisoned")
                    .insert(task_id.clone(), TaskStatus::Done);

                // Commit whatever the agent staged; nothing staged means
                // no commit record and no event.
                let message = format!("{}: {}", task.name, first_line(&summary));
                match deps
                    .vcs
                    .commit(session.workspace_dir.as_path(), &message, &task.agent_name, &task_id)
                    .await
                {
                    Ok(Some(record)) => {
                        session.bus.publish(BuildEvent::CommitCreated {
                            task_id: task_id.clone(),
                            commit: record.clone(),
                        });
                        if !record.files.is_empty() {
                            session.bus.publish(BuildEvent::CodeGenerated {
                                task_id: task_id.clone(),
                                files: record.files.clone(),
                            });
                        }
                        commits.push(record);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(task_id = %task_id, error = %e, "commit failed");
                    }
                }

                let is_review = plan
                    .agents
                    .iter()
                    .any(|a| a.name == task.agent_name && a.role == AgentRole::Reviewer);
                if is_review {
                    session.bus.publish(BuildEvent::CodeReviewComplete {
                        task_id: task_id.clone(),
                        summary: summary.clone(),
                    });
                }

                session.bus.publish(BuildEvent::TaskCompleted {
                    task_id: task_id.clone(),
                    summary: summary.clone(),
                });
                session.bus.publish(BuildEvent::AgentStatus {
                    name: task.agent_name.clone(),
                    status: AgentState::Done,
                });

                match deps.teaching.moment_for(&task.name, &summary).await {
                    Ok(Some(moment)) => {
                        session.bus.publish(BuildEvent::TeachingMoment {
                            task_id: task_id.clone(),
                            concept: moment.concept,
                            explanation: moment.explanation,
                        });
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!(error = %e, "teaching engine unavailable"),
                }
            }
            WorkerOutcome::Exhausted { error, retry_count } => {
                retry_counts.insert(task_id.clone(), retry_count);
                // Arm before publishing so an immediate answer is not lost.
                let gate = session.arm_gate();
                session.bus.publish(BuildEvent::HumanGate {
                    task_id: task_id.clone(),
                    question: format!(
                        "Task \"{}\" failed after {} retries. Continue the build without it?",
                        task.name, retry_count
                    ),
                    context: error.clone(),
                });

                let cancel = session.cancel_handle();
                let answer = tokio::select! {
                    answer = gate => answer.ok(),
                    _ = cancel.cancelled() => None,
                };

                match answer {
                    Some(answer) if answer.approved => {
                        if let Some(feedback) = answer.feedback {
                            tracing::info!(task_id = %task_id, feedback = %feedback, "gate approved");
                        }
                        fail_task(session, &statuses, &task_id, &error, retry_count);
                        session.bus.publish(BuildEvent::AgentStatus {
                            name: task.agent_name.clone(),
                            status: AgentState::Error,
                        });
                        cascade_predecessor_failures(session, plan, &statuses, &task_id);
                    }
                    Some(_) => {
                        workers.shutdown().await;
                        return Err(anyhow!(
                            "Build stopped: task \"{}\" was not approved to continue",
                            task.name
                        ));
                    }
                    None => {
                        // Cancelled while gated.
                        workers.shutdown().await;
                        break;
                    }
                }
            }
            WorkerOutcome::Cancelled => {
                workers.shutdown().await;
                break;
            }
        }
    }

    let final_statuses = statuses.lock().expect("status lock poisoned").clone();
    let tasks = plan
        .tasks
        .iter()
        .map(|t| {
            let mut task = t.clone();
            task.status = final_statuses
                .get(&t.id)
                .copied()
                .unwrap_or(TaskStatus::Pending);
            task
        })
        .collect();

    Ok(ExecutionReport {
        tasks,
        commits,
        retry_counts,
    })
}

fn fail_task(
    session: &Arc<Session>,
    statuses: &Arc<Mutex<HashMap<String, TaskStatus>>>,
    task_id: &str,
    error: &str,
    retry_count: u32,
) {
    statuses
        .lock()
        .expect("status lock poisoned")
        .insert(task_id.to_string(), TaskStatus::Failed);
    session.bus.publish(BuildEvent::TaskFailed {
        task_id: task_id.to_string(),
        error: error.to_string(),
        retry_count,
    });
}

/// Mark every still-pending descendant failed. Cascade is transitive.
fn cascade_predecessor_failures(
    session: &Arc<Session>,
    plan: &Plan,
    statuses: &Arc<Mutex<HashMap<String, TaskStatus>>>,
    task_id: &str,
) {
    for descendant in plan.graph.descendants_of(task_id) {
        let newly_failed = {
            let mut map = statuses.lock().expect("status lock poisoned");
            match map.get(&descendant) {
                Some(TaskStatus::Pending) => {
                    map.insert(descendant.clone(), TaskStatus::Failed);
                    true
                }
                _ => false,
            }
        };
        if newly_failed {
            session.bus.publish(BuildEvent::TaskFailed {
                task_id: descendant,
                error: "predecessor_failed".to_string(),
                retry_count: 0,
            });
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

/// One logical worker: the retry ladder for a single task.
struct TaskWorker {
    session: Arc<Session>,
    dispatcher: Arc<Dispatcher>,
    workspace: Arc<WorkspaceManager>,
    context: Arc<ContextManager>,
    ladder: Arc<ModelLadder>,
    task: Task,
    agent: crate::task::Agent,
    predecessors: Vec<String>,
}

impl TaskWorker {
    async fn run(&self) -> WorkerOutcome {
        let mut attempt = 0u32;
        let mut compact = false;
        let mut completion_tokens = COMPLETION_TOKENS_DEFAULT;

        loop {
            if self.session.is_cancelled() {
                return WorkerOutcome::Cancelled;
            }

            if let Err(e) = self.workspace.stale_clean().await {
                tracing::warn!(error = %e, "stale-metadata cleanup failed");
            }

            let snapshot = prompt::snapshot(self.session.workspace_dir.as_path());
            let behavioral = self
                .session
                .spec()
                .map(|s| s.workflow.behavioral_tests.clone())
                .unwrap_or_default();
            let predecessor_context = self.context.context_for(&self.predecessors);

            let system = prompt::system_prompt(&self.agent);
            let user = prompt::user_prompt(&PromptInput {
                task: &self.task,
                agent: &self.agent,
                attempt,
                compact,
                predecessor_context: &predecessor_context,
                behavioral_tests: &behavioral,
                snapshot: &snapshot,
            });

            let options = DispatchOptions {
                max_turns: max_turns_for(attempt),
                max_completion_tokens: completion_tokens,
                model: self.ladder.current(),
                ..Default::default()
            };

            let observer = Arc::new(WorkerObserver {
                session: Arc::clone(&self.session),
                task_id: self.task.id.clone(),
                agent_name: self.agent.name.clone(),
            });
            let cancel = self.session.cancel_handle();

            let result: AgentResult = self
                .dispatcher
                .dispatch(
                    &self.task.id,
                    &system,
                    &user,
                    self.session.workspace_dir.as_path(),
                    &options,
                    &cancel,
                    observer,
                )
                .await;

            self.session
                .tokens
                .add_with_cost(&result.usage, result.cost_usd);

            if result.success {
                if let Err(e) = self.context.record_result(&self.task.id, &result.summary).await {
                    tracing::warn!(error = %e, "failed to record task context");
                }
                return WorkerOutcome::Done {
                    summary: result.summary,
                };
            }

            if self.session.is_cancelled() || result.summary == "Agent was cancelled" {
                return WorkerOutcome::Cancelled;
            }

            if attempt < RETRY_LIMIT {
                if result.is_output_limit() {
                    completion_tokens =
                        (completion_tokens + COMPLETION_TOKENS_INCREMENT).min(COMPLETION_TOKENS_CAP);
                    self.ladder.activate();
                }
                if result.is_context_overflow() {
                    compact = true;
                }
                attempt += 1;
                self.session.bus.publish(BuildEvent::AgentMessage {
                    task_id: self.task.id.clone(),
                    agent_name: self.agent.name.clone(),
                    text: format!(
                        "Attempt {} failed ({}); retrying",
                        attempt,
                        first_line(&result.summary)
                    ),
                });
                continue;
            }

            return WorkerOutcome::Exhausted {
                error: result.summary,
                retry_count: attempt,
            };
        }
    }
}

/// Bridges dispatcher callbacks onto the session's event bus and question
/// resolvers.
struct WorkerObserver {
    session: Arc<Session>,
    task_id: String,
    agent_name: String,
}

#[async_trait]
impl DispatchObserver for WorkerObserver {
    fn on_output(&self, text: &str) {
        self.session.bus.publish(BuildEvent::AgentOutput {
            task_id: self.task_id.clone(),
            agent_name: self.agent_name.clone(),
            text: text.to_string(),
        });
    }

    fn on_tool_use(&self, tool: &str, args: &Value) {
        self.session.bus.publish(BuildEvent::ToolUse {
            task_id: self.task_id.clone(),
            tool: tool.to_string(),
            args: args.clone(),
        });
    }

    fn on_tool_result(&self, tool: &str, output: &str, is_error: bool) {
        self.session.bus.publish(BuildEvent::ToolResult {
            task_id: self.task_id.clone(),
            tool: tool.to_string(),
            output: output.to_string(),
            is_error,
        });
    }

    async fn ask_question(&self, questions: &Value) -> Option<HashMap<String, String>> {
        let rx = self.session.arm_question(&self.task_id);
        self.session.bus.publish(BuildEvent::AgentQuestion {
            task_id: self.task_id.clone(),
            questions: questions.clone(),
        });

        let cancel = self.session.cancel_handle();
        tokio::select! {
            answers = rx => answers.ok(),
            _ = cancel.cancelled() => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_budget_ladder() {
        let budgets: Vec<usize> = (0..3).map(max_turns_for).collect();
        assert_eq!(budgets, vec![25, 35, 45]);
    }
}
