//! Read tool.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

/// Files beyond this size must be read with offset/limit.
const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_LINE_LIMIT: usize = 2_000;

pub struct ReadTool;

#[derive(Deserialize)]
struct Params {
    file_path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "Read"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace. Supports line offset/limit for large files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file to read, relative to the workspace"
                },
                "offset": {
                    "type": "number",
                    "description": "1-indexed line to start reading from"
                },
                "limit": {
                    "type": "number",
                    "description": "Number of lines to read"
                }
            },
            "required": ["file_path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let path = match ctx.resolve(&params.file_path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if !path.is_file() {
            return ToolResult::error(format!("File not found: {}", params.file_path));
        }

        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) => return ToolResult::error(format!("Failed to read metadata: {}", e)),
        };
        if metadata.len() > MAX_FILE_SIZE {
            return ToolResult::error(format!(
                "File too large: {} bytes. Use offset/limit to read portions.",
                metadata.len()
            ));
        }

        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();
        let start = params.offset.unwrap_or(1).saturating_sub(1);
        if start > 0 && start >= total {
            return ToolResult::error(format!(
                "Start line {} is beyond file length ({})",
                start + 1,
                total
            ));
        }
        let end = (start + params.limit.unwrap_or(DEFAULT_LINE_LIMIT)).min(total);

        ToolResult::success(json!({
            "content": lines[start..end].join("\n"),
            "total_lines": total,
            "start_line": start + 1,
        }))
    }
}
