//! Edit tool: exact-substring replacement.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use similar::TextDiff;
use tokio::fs;

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

pub struct EditTool;

#[derive(Deserialize)]
struct Params {
    file_path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "Edit"
    }

    fn description(&self) -> &str {
        "Replace an exact substring in a file. old_string must match the file content exactly; use replace_all to replace every occurrence."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file to modify, relative to the workspace"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence (default: false)",
                    "default": false
                }
            },
            "required": ["file_path", "old_string", "new_string"],
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

        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        let count = content.matches(&params.old_string).count();
        if count == 0 {
            return ToolResult::error("String not found in file");
        }
        if count > 1 && !params.replace_all {
            return ToolResult::error(format!(
                "String found {} times; provide more context or set replace_all",
                count
            ));
        }

        let new_content = if params.replace_all {
            content.replace(&params.old_string, &params.new_string)
        } else {
            content.replacen(&params.old_string, &params.new_string, 1)
        };

        let diff = unified_diff(&content, &new_content);
        match fs::write(&path, &new_content).await {
            Ok(_) => ToolResult::success(json!({
                "message": format!("Replaced {} occurrence(s)", if params.replace_all { count } else { 1 }),
                "file_path": params.file_path,
                "diff": diff,
            })),
            Err(e) => ToolResult::error(format!("Failed to write file: {}", e)),
        }
    }
}

pub(super) fn unified_diff(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output = String::new();
    for hunk in diff.unified_diff().context_radius(2).iter_hunks() {
        output.push_str(&format!("{}", hunk));
    }
    output
}
