//! LS tool.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

pub struct LsTool;

#[derive(Deserialize)]
struct Params {
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "LS"
    }

    fn description(&self) -> &str {
        "List the entries of a workspace directory. Directories are suffixed with /."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (default: workspace root)"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let dir = match ctx.resolve(params.path.as_deref().unwrap_or(".")) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if !dir.is_dir() {
            return ToolResult::error(format!(
                "Not a directory: {}",
                params.path.as_deref().unwrap_or(".")
            ));
        }

        let mut entries = Vec::new();
        let read = match std::fs::read_dir(&dir) {
            Ok(read) => read,
            Err(e) => return ToolResult::error(format!("Failed to list directory: {}", e)),
        };
        for entry in read.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() {
                entries.push(format!("{}/", name));
            } else {
                entries.push(name);
            }
        }
        entries.sort();

        ToolResult::success(json!({ "entries": entries }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn lists_with_dir_markers() {
        let tmp = tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("readme.md"), "").unwrap();
        let ctx = ToolContext::new(tmp.path());

        let result = LsTool.execute(json!({}), &ctx).await;
        assert!(!result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        let entries: Vec<&str> = parsed["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e.as_str().unwrap())
            .collect();
        assert!(entries.contains(&"src/"));
        assert!(entries.contains(&"readme.md"));
    }
}
