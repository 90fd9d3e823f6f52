//! Glob tool.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

const MAX_MATCHES: usize = 500;

pub struct GlobTool;

#[derive(Deserialize)]
struct Params {
    pattern: String,
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "Glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern like src/**/*.py, relative to the workspace."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern relative to the workspace root"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if params.pattern.contains("..") {
            return ToolResult::error(format!(
                "Path {} escapes working directory",
                params.pattern
            ));
        }

        let root = match ctx.workspace_root.canonicalize() {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("Workspace unavailable: {}", e)),
        };

        let full_pattern = format!("{}/{}", root.display(), params.pattern.trim_start_matches('/'));
        let paths = match glob::glob(&full_pattern) {
            Ok(paths) => paths,
            Err(e) => return ToolResult::error(format!("Invalid glob pattern: {}", e)),
        };

        let mut matches: Vec<String> = paths
            .flatten()
            .filter(|p| p.starts_with(&root))
            .filter_map(|p| {
                p.strip_prefix(&root)
                    .ok()
                    .map(|rel| rel.display().to_string())
            })
            .take(MAX_MATCHES)
            .collect();
        matches.sort();

        ToolResult::success(json!({ "matches": matches, "count": matches.len() }))
    }
}
