//! Bash tool: shell execution with a stripped environment and a command
//! blocklist.
//!
//! Commands run under `bash -c` in the workspace root with only `PATH`
//! inherited. The blocklist rejects network clients, remote VCS writes,
//! package installers and anything that reads the environment, before the
//! command ever spawns.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::time::timeout;

use crate::constants::BASH_TIMEOUT;
use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

const MAX_TIMEOUT: Duration = Duration::from_secs(600);

static BLOCKLIST: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(^|[^\w-])(curl|wget|ssh|scp)\b", "network clients are not allowed"),
        (r"\bgit\s+(push|remote)\b", "remote git operations are not allowed"),
        (
            r"\b(pip3?\s+install|npm\s+install)\b",
            "package installation is not allowed",
        ),
        (
            r"(^|[^\w-])(env|printenv|export)\b",
            "environment access is not allowed",
        ),
        (
            r"\$\{?[A-Za-z_]",
            "environment variable expansion is not allowed",
        ),
    ]
    .into_iter()
    .map(|(pattern, reason)| (Regex::new(pattern).expect("valid blocklist regex"), reason))
    .collect()
});

/// Returns the rejection reason when the command trips the blocklist.
pub fn blocked_reason(command: &str) -> Option<&'static str> {
    BLOCKLIST
        .iter()
        .find(|(regex, _)| regex.is_match(command))
        .map(|(_, reason)| *reason)
}

pub struct BashTool;

#[derive(Deserialize)]
struct Params {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "Bash"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace. No network access, no package installation, no environment variables."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Timeout in seconds (default 30, max 600)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if let Some(reason) = blocked_reason(&params.command) {
            tracing::info!(command = %params.command, reason, "bash command blocked");
            return ToolResult::error(format!("Command blocked by security policy: {}", reason));
        }

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(&params.command)
            .current_dir(&ctx.workspace_root)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }

        let deadline = params
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(BASH_TIMEOUT)
            .min(MAX_TIMEOUT);

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Failed to spawn command: {}", e)),
        };

        let output = match timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolResult::error(format!("Command failed: {}", e)),
            Err(_) => {
                // wait_with_output consumed the child; kill_on_drop reaps it.
                return ToolResult::error(format!(
                    "Command timed out after {} seconds",
                    deadline.as_secs()
                ));
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code == 0 {
            ToolResult::success(json!({ "output": combined, "exit_code": 0 }))
        } else {
            ToolResult::error(format!(
                "Command exited with code {}\n{}",
                exit_code, combined
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn runs_simple_command() {
        let tmp = tempdir().unwrap();
        let ctx = ToolContext::new(tmp.path());

        let result = BashTool
            .execute(json!({"command": "echo hello"}), &ctx)
            .await;
        assert!(!result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert!(parsed["output"].as_str().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn blocks_network_clients() {
        let tmp = tempdir().unwrap();
        let ctx = ToolContext::new(tmp.path());

        let result = BashTool
            .execute(json!({"command": "curl http://example.com"}), &ctx)
            .await;
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["success"], false);
        assert!(parsed["error"]
            .as_str()
            .unwrap()
            .starts_with("Command blocked by security policy"));
    }

    #[tokio::test]
    async fn blocks_env_expansion() {
        let tmp = tempdir().unwrap();
        let ctx = ToolContext::new(tmp.path());

        let result = BashTool
            .execute(json!({"command": "echo $HOME"}), &ctx)
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("Command blocked by security policy"));

        let result = BashTool
            .execute(json!({"command": "echo ${SECRET}"}), &ctx)
            .await;
        assert!(result.is_error);
    }

    #[test]
    fn blocklist_covers_the_policy() {
        for command in [
            "wget http://x",
            "ssh host",
            "scp a b",
            "git push origin main",
            "git remote add origin x",
            "pip install requests",
            "pip3 install requests",
            "npm install left-pad",
            "env",
            "printenv PATH",
            "export FOO=1",
        ] {
            assert!(blocked_reason(command).is_some(), "expected block: {}", command);
        }

        for command in ["echo hi", "python3 main.py", "git commit -m x", "ls -la"] {
            assert!(blocked_reason(command).is_none(), "expected allow: {}", command);
        }
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let tmp = tempdir().unwrap();
        let ctx = ToolContext::new(tmp.path());
        let result = BashTool.execute(json!({"command": "false"}), &ctx).await;
        assert!(result.is_error);
        assert!(result.output.contains("exited with code 1"));
    }

    #[tokio::test]
    async fn times_out_and_reports() {
        let tmp = tempdir().unwrap();
        let ctx = ToolContext::new(tmp.path());
        let result = BashTool
            .execute(json!({"command": "sleep 5", "timeout": 1}), &ctx)
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("timed out after 1 seconds"));
    }
}
