//! External capabilities consumed at the engine boundary: test runner,
//! teaching engine, web preview server, hardware flasher, and portal
//! transports. Each is a trait with a default implementation the server
//! wires when nothing richer is configured.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::reconnect::{with_reconnect, ReconnectPolicy};
use crate::spec::PortalSpec;

// ── Tests ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestReport {
    pub tests: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_pct: Option<f64>,
}

#[async_trait]
pub trait TestCapability: Send + Sync {
    async fn run_tests(&self, workspace: &Path) -> Result<TestReport>;
}

/// Default capability: no test harness configured, empty aggregate.
pub struct NullTestRunner;

#[async_trait]
impl TestCapability for NullTestRunner {
    async fn run_tests(&self, _workspace: &Path) -> Result<TestReport> {
        Ok(TestReport::default())
    }
}

// ── Teaching ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TeachingMoment {
    pub concept: String,
    pub explanation: String,
}

#[async_trait]
pub trait TeachingEngine: Send + Sync {
    /// Best-effort; `None` means nothing worth teaching for this task.
    async fn moment_for(&self, task_name: &str, summary: &str) -> Result<Option<TeachingMoment>>;
}

pub struct NoTeaching;

#[async_trait]
impl TeachingEngine for NoTeaching {
    async fn moment_for(&self, _task_name: &str, _summary: &str) -> Result<Option<TeachingMoment>> {
        Ok(None)
    }
}

// ── Web deploy ─────────────────────────────────────────────────────────

/// Handle over a running preview/web server child process.
pub struct WebHandle {
    pub url: Option<String>,
    child: Option<Child>,
}

impl WebHandle {
    pub fn new(url: Option<String>, child: Option<Child>) -> Self {
        Self { url, child }
    }

    pub async fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
    }
}

#[async_trait]
pub trait WebDeployer: Send + Sync {
    async fn deploy(&self, workspace: &Path) -> Result<WebHandle>;
}

/// Default deployer: serve the workspace with a static file server child.
pub struct StaticServerDeployer {
    pub port: u16,
}

impl Default for StaticServerDeployer {
    fn default() -> Self {
        Self { port: 8731 }
    }
}

#[async_trait]
impl WebDeployer for StaticServerDeployer {
    async fn deploy(&self, workspace: &Path) -> Result<WebHandle> {
        let child = Command::new("python3")
            .args(["-m", "http.server", &self.port.to_string()])
            .current_dir(workspace)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("failed to start preview server: {}", e))?;

        Ok(WebHandle::new(
            Some(format!("http://localhost:{}", self.port)),
            Some(child),
        ))
    }
}

// ── Hardware ───────────────────────────────────────────────────────────

#[async_trait]
pub trait HardwareFlasher: Send + Sync {
    /// Compile the workspace for the device target; returns the firmware
    /// artifact path.
    async fn compile(&self, workspace: &Path) -> Result<PathBuf>;

    /// Flash the firmware to the connected device.
    async fn flash(&self, firmware: &Path) -> Result<()>;
}

/// Default flasher: no toolchain or device attached.
pub struct NoHardware;

#[async_trait]
impl HardwareFlasher for NoHardware {
    async fn compile(&self, _workspace: &Path) -> Result<PathBuf> {
        Err(anyhow!("no hardware toolchain configured"))
    }

    async fn flash(&self, _firmware: &Path) -> Result<()> {
        Err(anyhow!("no device connected"))
    }
}

// ── Portals ────────────────────────────────────────────────────────────

/// An open connection to an external device or MCP server.
#[async_trait]
pub trait PortalHandle: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> &str;
    async fn close(&self);
}

#[async_trait]
pub trait PortalConnector: Send + Sync {
    async fn connect(&self, portal: &PortalSpec) -> Result<Arc<dyn PortalHandle>>;
}

/// Connector used when no transport is wired: every connect fails, which
/// the manager's reconnect policy turns into a logged give-up.
pub struct NoPortals;

#[async_trait]
impl PortalConnector for NoPortals {
    async fn connect(&self, portal: &PortalSpec) -> Result<Arc<dyn PortalHandle>> {
        Err(anyhow!("no transport available for portal {}", portal.name))
    }
}

/// Tracks open portal handles for a session; teardown closes them all,
/// swallowing errors.
pub struct PortalManager {
    connector: Arc<dyn PortalConnector>,
    handles: Mutex<Vec<Arc<dyn PortalHandle>>>,
}

impl PortalManager {
    pub fn new(connector: Arc<dyn PortalConnector>) -> Self {
        Self {
            connector,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Open every declared portal. Connection attempts use the capped
    /// exponential reconnect policy; portals that never open are skipped.
    pub async fn initialize(&self, portals: &[PortalSpec]) -> usize {
        let mut opened = 0usize;
        for portal in portals {
            let mut policy = ReconnectPolicy::default();
            let connector = Arc::clone(&self.connector);
            let handle = with_reconnect(&portal.name, &mut policy, || {
                let connector = Arc::clone(&connector);
                let portal = portal.clone();
                async move { connector.connect(&portal).await }
            })
            .await;

            if let Some(handle) = handle {
                self.handles.lock().await.push(handle);
                opened += 1;
            }
        }
        opened
    }

    /// Close serial portals only (used during normal completion so the
    /// device frees up before the summary event).
    pub async fn close_serial(&self) {
        let mut handles = self.handles.lock().await;
        let mut remaining = Vec::new();
        for handle in handles.drain(..) {
            if handle.kind() == "serial" {
                handle.close().await;
            } else {
                remaining.push(handle);
            }
        }
        *handles = remaining;
    }

    /// Close everything unconditionally.
    pub async fn teardown(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle.close().await;
        }
    }

    pub async fn open_count(&self) -> usize {
        self.handles.lock().await.len()
    }
}
