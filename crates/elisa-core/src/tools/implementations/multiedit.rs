//! MultiEdit tool: ordered edits applied against the evolving content.
//! The first edit whose old_string is missing fails the whole call; nothing
//! is written in that case.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

use super::edit::unified_diff;

pub struct MultiEditTool;

#[derive(Deserialize)]
struct Params {
    file_path: String,
    edits: Vec<EditOp>,
}

#[derive(Deserialize)]
struct EditOp {
    old_string: String,
    new_string: String,
}

#[async_trait]
impl Tool for MultiEditTool {
    fn name(&self) -> &str {
        "MultiEdit"
    }

    fn description(&self) -> &str {
        "Apply several exact-substring edits to one file in order. Atomic: if any edit's old_string is missing, no change is written."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file to modify, relative to the workspace"
                },
                "edits": {
                    "type": "array",
                    "description": "Edits applied in order against the evolving content",
                    "items": {
                        "type": "object",
                        "properties": {
                            "old_string": { "type": "string" },
                            "new_string": { "type": "string" }
                        },
                        "required": ["old_string", "new_string"],
                        "additionalProperties": false
                    },
                    "minItems": 1
                }
            },
            "required": ["file_path", "edits"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if params.edits.is_empty() {
            return ToolResult::error("At least one edit is required");
        }

        let path = match ctx.resolve(&params.file_path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if !path.is_file() {
            return ToolResult::error(format!("File not found: {}", params.file_path));
        }

        let original = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        let mut content = original.clone();
        for (index, edit) in params.edits.iter().enumerate() {
            if !content.contains(&edit.old_string) {
                return ToolResult::error(format!(
                    "Edit {}: String not found in file",
                    index + 1
                ));
            }
            content = content.replacen(&edit.old_string, &edit.new_string, 1);
        }

        let diff = unified_diff(&original, &content);
        match fs::write(&path, &content).await {
            Ok(_) => ToolResult::success(json!({
                "message": format!("Applied {} edits", params.edits.len()),
                "file_path": params.file_path,
                "diff": diff,
            })),
            Err(e) => ToolResult::error(format!("Failed to write file: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn edits_apply_in_order_against_evolving_content() {
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join("f.py"), "one").unwrap();
        let ctx = ToolContext::new(tmp.path());

        let result = MultiEditTool
            .execute(
                json!({"file_path": "f.py", "edits": [
                    {"old_string": "one", "new_string": "two"},
                    {"old_string": "two", "new_string": "three"}
                ]}),
                &ctx,
            )
            .await;
        assert!(!result.is_error);
        assert_eq!(std::fs::read_to_string(tmp.path().join("f.py")).unwrap(), "three");
    }

    #[tokio::test]
    async fn first_missing_match_fails_whole_call() {
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join("f.py"), "one").unwrap();
        let ctx = ToolContext::new(tmp.path());

        let result = MultiEditTool
            .execute(
                json!({"file_path": "f.py", "edits": [
                    {"old_string": "one", "new_string": "two"},
                    {"old_string": "ghost", "new_string": "x"}
                ]}),
                &ctx,
            )
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("Edit 2"));
        // Nothing written.
        assert_eq!(std::fs::read_to_string(tmp.path().join("f.py")).unwrap(), "one");
    }
}
