//! Pipeline controller: the per-session state machine composing
//! plan → execute → test → deploy → judge → complete.

pub mod deploy;
pub mod executor;
pub mod judge;
pub mod testing;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::context::ContextManager;
use crate::dispatch::Dispatcher;
use crate::events::{session_log_observer, BuildEvent};
use crate::memory::{BuildMemory, MemoryRecord, RunOutcome};
use crate::model::LanguageModel;
use crate::planner;
use crate::ports::{
    HardwareFlasher, NoHardware, NoPortals, NoTeaching, NullTestRunner, PortalConnector,
    PortalManager, StaticServerDeployer, TeachingEngine, TestCapability, TestReport, WebDeployer,
};
use crate::session::Session;
use crate::spec::ProjectSpec;
use crate::task::TaskStatus;
use crate::tools::{register_all_tools, ToolRegistry};
use crate::vcs::{CommitRecord, GitStore, VersionStore};
use crate::workspace::WorkspaceManager;

use deploy::DeployPhase;
use executor::ExecutorDeps;
use judge::{JudgeInput, JudgeVerdict};

/// External collaborators injected into a pipeline. Tests swap any of
/// them for mocks; the server wires the defaults.
#[derive(Clone)]
pub struct Capabilities {
    pub model: Arc<dyn LanguageModel>,
    pub vcs: Arc<dyn VersionStore>,
    pub tests: Arc<dyn TestCapability>,
    pub teaching: Arc<dyn TeachingEngine>,
    pub web: Arc<dyn WebDeployer>,
    pub hardware: Arc<dyn HardwareFlasher>,
    pub portals: Arc<dyn PortalConnector>,
    pub memory: Arc<BuildMemory>,
}

impl Capabilities {
    pub fn with_defaults(model: Arc<dyn LanguageModel>, memory: Arc<BuildMemory>) -> Self {
        Self {
            model,
            vcs: Arc::new(GitStore),
            tests: Arc::new(NullTestRunner),
            teaching: Arc::new(NoTeaching),
            web: Arc::new(StaticServerDeployer::default()),
            hardware: Arc::new(NoHardware),
            portals: Arc::new(NoPortals),
            memory,
        }
    }
}

pub struct PipelineController {
    session: Arc<Session>,
    caps: Capabilities,
    registry: Arc<ToolRegistry>,
    running: AtomicBool,
    commits: Mutex<Vec<CommitRecord>>,
    test_report: Mutex<Option<TestReport>>,
}

impl PipelineController {
    pub fn new(session: Arc<Session>, caps: Capabilities) -> Arc<Self> {
        let mut registry = ToolRegistry::new();
        register_all_tools(&mut registry);
        Arc::new(Self {
            session,
            caps,
            registry: Arc::new(registry),
            running: AtomicBool::new(false),
            commits: Mutex::new(Vec::new()),
            test_report: Mutex::new(None),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn commits(&self) -> Vec<CommitRecord> {
        self.commits.lock().expect("commit lock poisoned").clone()
    }

    pub fn test_results(&self) -> Option<TestReport> {
        self.test_report
            .lock()
            .expect("report lock poisoned")
            .clone()
    }

    pub fn cancel(&self) {
        self.session.cancel();
    }

    pub fn answer_gate(&self, approved: bool, feedback: Option<String>) {
        self.session.answer_gate(approved, feedback);
    }

    pub fn answer_question(
        &self,
        task_id: &str,
        answers: std::collections::HashMap<String, String>,
    ) {
        self.session.answer_question(task_id, answers);
    }

    /// Run the full pipeline. Exactly one active run per session; a second
    /// call is a logged no-op.
    pub async fn run(&self, spec: ProjectSpec) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!(session_id = %self.session.id, "run already active");
            return;
        }

        let spec = Arc::new(spec);
        self.session.set_spec(Arc::clone(&spec));

        let workspace = Arc::new(WorkspaceManager::new(&self.session.workspace_dir));
        self.session.bus.add_observer(session_log_observer(
            workspace.session_log_path(&self.session.id),
        ));

        let deploy_phase = DeployPhase::new(
            Arc::clone(&self.caps.web),
            Arc::clone(&self.caps.hardware),
            Arc::new(PortalManager::new(Arc::clone(&self.caps.portals))),
        );

        if let Err(e) = self.run_phases(&spec, &workspace, &deploy_phase).await {
            tracing::error!(session_id = %self.session.id, error = %e, "pipeline run failed");
            self.session.bus.publish(BuildEvent::Error {
                message: e.to_string(),
                recoverable: false,
            });
        }

        self.session.set_state(crate::session::SessionState::Done);
        deploy_phase.teardown().await;
    }

    fn ensure_active(&self) -> Result<()> {
        if self.session.is_cancelled() {
            Err(anyhow!("Build cancelled"))
        } else {
            Ok(())
        }
    }

    async fn run_phases(
        &self,
        spec: &Arc<ProjectSpec>,
        workspace: &Arc<WorkspaceManager>,
        deploy_phase: &DeployPhase,
    ) -> Result<()> {
        use crate::session::SessionState;

        // Workspace lifecycle.
        workspace.provision().await?;
        workspace.reset(self.session.restart_mode).await?;
        workspace.stale_clean().await?;
        self.session.bus.publish(BuildEvent::WorkspaceCreated {
            path: workspace.root().display().to_string(),
        });

        // Plan.
        self.ensure_active()?;
        self.session.set_state(SessionState::Planning);
        self.session.bus.publish(BuildEvent::PlanningStarted);

        let memory_context = self.caps.memory.planner_context(spec, 3).await;
        let plan = planner::plan(spec, &memory_context)?;

        for agent in &plan.agents {
            self.session.bus.publish(BuildEvent::AgentSpawned {
                name: agent.name.clone(),
                role: agent.role,
            });
        }
        self.session.bus.publish(BuildEvent::PlanReady {
            tasks: plan.tasks.clone(),
            agents: plan.agents.clone(),
            explanation: plan.explanation.clone(),
        });

        // Portals come up lazily before the executor needs them.
        let snapshot = deploy::DeploySnapshot::of(spec);
        if deploy::should_initialize_portals(&snapshot) {
            let opened = deploy_phase.portals().initialize(&spec.portals).await;
            tracing::info!(opened, "portals initialized");
        }

        self.caps
            .vcs
            .init_repo(workspace.root(), &spec.goal)
            .await?;

        // Execute.
        self.ensure_active()?;
        self.session.set_state(SessionState::Executing);
        let deps = ExecutorDeps {
            dispatcher: Arc::new(Dispatcher::new(
                Arc::clone(&self.caps.model),
                Arc::clone(&self.registry),
            )),
            vcs: Arc::clone(&self.caps.vcs),
            teaching: Arc::clone(&self.caps.teaching),
            workspace: Arc::clone(workspace),
            context: Arc::new(ContextManager::new(workspace.root())),
        };
        let report = executor::execute(&self.session, &plan, &deps).await?;
        *self.commits.lock().expect("commit lock poisoned") = report.commits.clone();

        // Test.
        self.ensure_active()?;
        self.session.set_state(SessionState::Testing);
        let test_report = testing::run(&self.session, spec, &self.caps.tests).await?;
        *self.test_report.lock().expect("report lock poisoned") = test_report.clone();

        // Deploy.
        self.ensure_active()?;
        self.session.set_state(SessionState::Deploying);
        deploy_phase.run(&self.session, spec).await;

        // Judge.
        self.ensure_active()?;
        self.session.set_state(SessionState::Judging);
        self.session.bus.publish(BuildEvent::JudgeStarted);

        let judge_result = judge::judge(&JudgeInput {
            spec,
            tasks: &report.tasks,
            commits: &report.commits,
            report: test_report.as_ref(),
            workspace_root: workspace.root(),
            threshold: judge::threshold_from_env(),
        });
        self.session.bus.publish(BuildEvent::JudgeResult {
            result: judge_result.clone(),
        });

        let mut overridden = false;
        if !judge_result.passed {
            // Arm before publishing so an immediate answer is not lost.
            let gate = self.session.arm_gate();
            self.session.bus.publish(BuildEvent::HumanGate {
                task_id: "__judge__".to_string(),
                question: format!(
                    "The judge scored this build {}/100 (threshold {}). Accept it anyway?",
                    judge_result.score, judge_result.threshold
                ),
                context: judge_result.blocking_issues.join("; "),
            });

            let cancel = self.session.cancel_handle();
            let answer = tokio::select! {
                answer = gate => answer.ok(),
                _ = cancel.cancelled() => None,
            };
            match answer {
                Some(answer) if answer.approved => overridden = true,
                Some(_) => {
                    return Err(anyhow!("Build stopped: Judge verdict was not overridden"))
                }
                None => return Err(anyhow!("Build cancelled")),
            }
        }
        let verdict = JudgeVerdict::from_result(&judge_result, overridden);

        // Complete: free serial devices before the summary event.
        deploy_phase.close_serial().await;

        let tokens = self.session.tokens.snapshot();
        let done = report
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .count();
        let failed = report
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .count();

        let outcome = RunOutcome {
            tasks_total: report.tasks.len(),
            tasks_done: done,
            tasks_failed: failed,
            tests_passed: test_report.as_ref().map(|r| r.passed).unwrap_or(0),
            tests_failed: test_report.as_ref().map(|r| r.failed).unwrap_or(0),
            coverage_pct: test_report.as_ref().and_then(|r| r.coverage_pct),
            total_tokens: tokens.total(),
            cost_usd: tokens.cost_usd,
            judge_score: verdict.score,
            overridden,
            success: verdict.passed,
        };
        let commit_messages: Vec<String> =
            report.commits.iter().map(|c| c.message.clone()).collect();
        if let Err(e) = self
            .caps
            .memory
            .record_run(MemoryRecord::from_run(
                &self.session.id,
                spec,
                &commit_messages,
                outcome,
            ))
            .await
        {
            tracing::warn!(error = %e, "failed to record run in build memory");
        }

        let suggestions = self.caps.memory.suggest_patterns(spec, 4).await;
        let summary = format!(
            "Completed {}/{} tasks for \"{}\". Judge score: {}/100.",
            done,
            report.tasks.len(),
            spec.goal,
            verdict.score
        );
        self.session.bus.publish(BuildEvent::SessionComplete {
            summary,
            judge: verdict,
            suggestions,
        });

        Ok(())
    }
}
