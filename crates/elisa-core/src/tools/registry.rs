//! Tool registry: trait, execution context with the workspace jail, and
//! the JSON result envelope returned to the model.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::model::ToolSpec;
use crate::workspace::resolve_inside;

/// Default timeout for a single tool execution.
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Tool execution result. `output` is the JSON envelope handed back to the
/// model as the tool message.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(data: Value) -> Self {
        let mut envelope = json!({ "success": true });
        if let (Some(envelope), Some(data)) = (envelope.as_object_mut(), data.as_object()) {
            for (key, value) in data {
                envelope.insert(key.clone(), value.clone());
            }
        }
        Self {
            output: envelope.to_string(),
            is_error: false,
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            output: json!({ "success": false, "error": message.to_string() }).to_string(),
            is_error: true,
        }
    }
}

/// Parse tool parameters, mapping failures to an error envelope.
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolResult> {
    serde_json::from_value(params)
        .map_err(|e| ToolResult::error(format!("Invalid parameters: {}", e)))
}

/// Context for one tool execution: the jailed workspace root.
#[derive(Clone)]
pub struct ToolContext {
    pub workspace_root: PathBuf,
    /// Per-call timeout override.
    pub timeout: Option<Duration>,
}

impl ToolContext {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            timeout: None,
        }
    }

    /// Resolve a path argument inside the jail. Escape attempts fail with
    /// the canonical message returned to the model.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolResult> {
        resolve_inside(&self.workspace_root, path).map_err(|reason| {
            if reason.contains("escapes working directory") || reason.contains("traversal") {
                ToolResult::error(format!("Path {} escapes working directory", path))
            } else {
                ToolResult::error(reason)
            }
        })
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult;
}

/// Registry of the fixed tool allowlist.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool schema filtered to an allowlist, as advertised to the model.
    pub fn specs(&self, allowed: &[String]) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .filter(|t| allowed.iter().any(|name| name == t.name()))
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Execute one tool under its timeout. Unknown tools produce an error
    /// envelope rather than a panic; the model sees the failure and moves
    /// on.
    pub async fn execute(&self, name: &str, params: Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::error(format!("Unknown tool: {}", name));
        };

        let timeout = ctx.timeout.unwrap_or(DEFAULT_TOOL_TIMEOUT);
        match tokio::time::timeout(timeout, tool.execute(params, ctx)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(tool = name, timeout_secs = timeout.as_secs(), "tool timed out");
                ToolResult::error(format!(
                    "Tool '{}' timed out after {} seconds",
                    name,
                    timeout.as_secs()
                ))
            }
        }
    }
}
