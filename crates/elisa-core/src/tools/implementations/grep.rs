//! Grep tool: regex search over workspace files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

const MAX_RESULTS: usize = 200;
const MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;
const SKIP_DIRS: [&str; 3] = [".git", "node_modules", ".elisa"];

pub struct GrepTool;

#[derive(Deserialize)]
struct Params {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "Grep"
    }

    fn description(&self) -> &str {
        "Search workspace files for a regex pattern. Returns path:line matches."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Subdirectory to search (default: whole workspace)"
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

        let regex = match Regex::new(&params.pattern) {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("Invalid regex: {}", e)),
        };

        let root = match ctx.resolve(params.path.as_deref().unwrap_or(".")) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let workspace_root = ctx
            .workspace_root
            .canonicalize()
            .unwrap_or_else(|_| ctx.workspace_root.clone());

        let mut files = Vec::new();
        collect_files(&root, &mut files);
        files.sort();

        let mut matches = Vec::new();
        'outer: for file in files {
            if std::fs::metadata(&file).map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&file) else {
                continue;
            };
            let rel = file
                .strip_prefix(&workspace_root)
                .unwrap_or(&file)
                .display()
                .to_string();
            for (number, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(format!("{}:{}: {}", rel, number + 1, line.trim_end()));
                    if matches.len() >= MAX_RESULTS {
                        break 'outer;
                    }
                }
            }
        }

        ToolResult::success(json!({ "matches": matches, "count": matches.len() }))
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if SKIP_DIRS.iter().any(|skip| name.starts_with(skip)) {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn finds_matches_with_line_numbers() {
        let tmp = tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("src/a.py"), "x = 1\ncounter = 2\n").unwrap();
        let ctx = ToolContext::new(tmp.path());

        let result = GrepTool
            .execute(json!({"pattern": "counter"}), &ctx)
            .await;
        assert!(!result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["count"], 1);
        assert!(parsed["matches"][0]
            .as_str()
            .unwrap()
            .contains("src/a.py:2"));
    }

    #[tokio::test]
    async fn skips_metadata_directories() {
        let tmp = tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(".elisa/comms")).unwrap();
        std::fs::write(tmp.path().join(".elisa/comms/x.md"), "needle").unwrap();
        let ctx = ToolContext::new(tmp.path());

        let result = GrepTool.execute(json!({"pattern": "needle"}), &ctx).await;
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["count"], 0);
    }
}
