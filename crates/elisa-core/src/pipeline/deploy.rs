//! Deploy phase: conditional web/hardware/portal deployment with
//! unconditional teardown.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::events::BuildEvent;
use crate::ports::{HardwareFlasher, PortalManager, WebDeployer, WebHandle};
use crate::session::Session;
use crate::spec::{DeployTarget, ProjectSpec};

/// Immutable view of the session the predicates are evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct DeploySnapshot {
    pub target: DeployTarget,
    pub auto_flash: bool,
    pub has_serial_portals: bool,
    pub has_mcp_portals: bool,
}

impl DeploySnapshot {
    pub fn of(spec: &ProjectSpec) -> Self {
        Self {
            target: spec.deployment.target,
            auto_flash: spec.deployment.auto_flash,
            has_serial_portals: spec.has_serial_portals(),
            has_mcp_portals: spec.has_mcp_portals(),
        }
    }
}

pub fn should_deploy_web(snapshot: &DeploySnapshot) -> bool {
    matches!(
        snapshot.target,
        DeployTarget::Preview | DeployTarget::Web | DeployTarget::Both
    )
}

pub fn should_deploy_hardware(snapshot: &DeploySnapshot) -> bool {
    matches!(snapshot.target, DeployTarget::Esp32 | DeployTarget::Both)
}

pub fn should_deploy_portals(snapshot: &DeploySnapshot) -> bool {
    snapshot.has_serial_portals
}

pub fn should_initialize_portals(snapshot: &DeploySnapshot) -> bool {
    snapshot.has_serial_portals || snapshot.has_mcp_portals
}

/// Owns the handles opened during deployment. Teardown closes everything
/// and swallows errors.
pub struct DeployPhase {
    web: Arc<dyn WebDeployer>,
    hardware: Arc<dyn HardwareFlasher>,
    portals: Arc<PortalManager>,
    web_handles: Mutex<Vec<WebHandle>>,
}

impl DeployPhase {
    pub fn new(
        web: Arc<dyn WebDeployer>,
        hardware: Arc<dyn HardwareFlasher>,
        portals: Arc<PortalManager>,
    ) -> Self {
        Self {
            web,
            hardware,
            portals,
            web_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn portals(&self) -> &Arc<PortalManager> {
        &self.portals
    }

    /// Run the conditional deploy branches. Deployment failures degrade to
    /// progress messages; they never abort the run.
    pub async fn run(&self, session: &Arc<Session>, spec: &ProjectSpec) {
        let snapshot = DeploySnapshot::of(spec);

        if should_deploy_web(&snapshot) {
            session.bus.publish(BuildEvent::DeployStarted {
                target: snapshot.target,
            });
            match self.web.deploy(session.workspace_dir.as_path()).await {
                Ok(handle) => {
                    session.bus.publish(BuildEvent::DeployComplete {
                        target: snapshot.target,
                        url: handle.url.clone(),
                    });
                    self.web_handles.lock().await.push(handle);
                }
                Err(e) => {
                    session.bus.publish(BuildEvent::DeployProgress {
                        message: format!("Web deploy failed: {}", e),
                    });
                }
            }
        }

        if should_deploy_hardware(&snapshot) {
            session.bus.publish(BuildEvent::DeployStarted {
                target: DeployTarget::Esp32,
            });
            match self.hardware.compile(session.workspace_dir.as_path()).await {
                Ok(firmware) => {
                    session.bus.publish(BuildEvent::DeployProgress {
                        message: format!("Compiled firmware: {}", firmware.display()),
                    });
                    if snapshot.auto_flash {
                        match self.hardware.flash(&firmware).await {
                            Ok(()) => session.bus.publish(BuildEvent::DeployComplete {
                                target: DeployTarget::Esp32,
                                url: None,
                            }),
                            Err(e) => session.bus.publish(BuildEvent::DeployProgress {
                                message: format!("Flash failed: {}", e),
                            }),
                        };
                    } else {
                        session.bus.publish(BuildEvent::DeployProgress {
                            message: "Auto-flash disabled; firmware left on disk".to_string(),
                        });
                    }
                }
                Err(e) => {
                    session.bus.publish(BuildEvent::DeployProgress {
                        message: format!("Hardware compile failed: {}", e),
                    });
                }
            }
        }

        if should_deploy_portals(&snapshot) {
            session.bus.publish(BuildEvent::DeployProgress {
                message: format!(
                    "{} portal(s) connected",
                    self.portals.open_count().await
                ),
            });
        }
    }

    /// Close serial portals during normal completion, freeing the device
    /// before the summary event.
    pub async fn close_serial(&self) {
        self.portals.close_serial().await;
    }

    /// Close every handle unconditionally, swallowing errors.
    pub async fn teardown(&self) {
        for mut handle in self.web_handles.lock().await.drain(..) {
            handle.close().await;
        }
        self.portals.teardown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(target: DeployTarget, serial: bool, mcp: bool) -> DeploySnapshot {
        DeploySnapshot {
            target,
            auto_flash: false,
            has_serial_portals: serial,
            has_mcp_portals: mcp,
        }
    }

    #[test]
    fn web_predicate_covers_preview_web_both() {
        assert!(should_deploy_web(&snapshot(DeployTarget::Preview, false, false)));
        assert!(should_deploy_web(&snapshot(DeployTarget::Web, false, false)));
        assert!(should_deploy_web(&snapshot(DeployTarget::Both, false, false)));
        assert!(!should_deploy_web(&snapshot(DeployTarget::Esp32, false, false)));
    }

    #[test]
    fn hardware_predicate_covers_esp32_and_both() {
        assert!(should_deploy_hardware(&snapshot(DeployTarget::Esp32, false, false)));
        assert!(should_deploy_hardware(&snapshot(DeployTarget::Both, false, false)));
        assert!(!should_deploy_hardware(&snapshot(DeployTarget::Web, false, false)));
    }

    #[test]
    fn portal_predicates_follow_declared_portals() {
        assert!(should_initialize_portals(&snapshot(DeployTarget::Preview, true, false)));
        assert!(should_initialize_portals(&snapshot(DeployTarget::Preview, false, true)));
        assert!(!should_initialize_portals(&snapshot(DeployTarget::Preview, false, false)));

        assert!(should_deploy_portals(&snapshot(DeployTarget::Preview, true, false)));
        assert!(!should_deploy_portals(&snapshot(DeployTarget::Preview, false, true)));
    }
}
