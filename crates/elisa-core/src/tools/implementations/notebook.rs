//! Notebook tools: read and edit Jupyter notebook cells.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

pub struct NotebookReadTool;

#[derive(Deserialize)]
struct ReadParams {
    file_path: String,
}

#[async_trait]
impl Tool for NotebookReadTool {
    fn name(&self) -> &str {
        "NotebookRead"
    }

    fn description(&self) -> &str {
        "Read a Jupyter notebook and return its cells with indices."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the .ipynb file, relative to the workspace"
                }
            },
            "required": ["file_path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<ReadParams>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let notebook = match load_notebook(&params.file_path, ctx).await {
            Ok(nb) => nb,
            Err(e) => return e,
        };

        let cells: Vec<Value> = notebook["cells"]
            .as_array()
            .map(|cells| {
                cells
                    .iter()
                    .enumerate()
                    .map(|(index, cell)| {
                        json!({
                            "index": index,
                            "cell_type": cell["cell_type"].as_str().unwrap_or("code"),
                            "source": cell_source(cell),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        ToolResult::success(json!({ "cells": cells, "count": cells.len() }))
    }
}

pub struct NotebookEditTool;

#[derive(Deserialize)]
struct EditParams {
    file_path: String,
    cell_index: usize,
    new_source: String,
}

#[async_trait]
impl Tool for NotebookEditTool {
    fn name(&self) -> &str {
        "NotebookEdit"
    }

    fn description(&self) -> &str {
        "Replace the source of one notebook cell by index."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the .ipynb file, relative to the workspace"
                },
                "cell_index": {
                    "type": "number",
                    "description": "0-indexed cell to replace"
                },
                "new_source": {
                    "type": "string",
                    "description": "New cell source"
                }
            },
            "required": ["file_path", "cell_index", "new_source"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<EditParams>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let path = match ctx.resolve(&params.file_path) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let mut notebook = match load_notebook(&params.file_path, ctx).await {
            Ok(nb) => nb,
            Err(e) => return e,
        };

        let Some(cells) = notebook["cells"].as_array_mut() else {
            return ToolResult::error("Notebook has no cells array");
        };
        let Some(cell) = cells.get_mut(params.cell_index) else {
            return ToolResult::error(format!(
                "Cell index {} out of range ({} cells)",
                params.cell_index,
                cells.len()
            ));
        };

        // Notebook sources are stored as a list of lines with newlines kept.
        let lines: Vec<Value> = params
            .new_source
            .split_inclusive('\n')
            .map(|line| Value::String(line.to_string()))
            .collect();
        cell["source"] = Value::Array(lines);

        let serialized = match serde_json::to_string_pretty(&notebook) {
            Ok(s) => s,
            Err(e) => return ToolResult::error(format!("Failed to serialize notebook: {}", e)),
        };
        match fs::write(&path, serialized).await {
            Ok(_) => ToolResult::success(json!({
                "message": format!("Replaced cell {}", params.cell_index),
                "file_path": params.file_path,
            })),
            Err(e) => ToolResult::error(format!("Failed to write notebook: {}", e)),
        }
    }
}

async fn load_notebook(file_path: &str, ctx: &ToolContext) -> Result<Value, ToolResult> {
    let path = ctx.resolve(file_path)?;
    if !path.is_file() {
        return Err(ToolResult::error(format!("File not found: {}", file_path)));
    }
    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| ToolResult::error(format!("Failed to read notebook: {}", e)))?;
    serde_json::from_str(&content)
        .map_err(|e| ToolResult::error(format!("Not a valid notebook: {}", e)))
}

fn cell_source(cell: &Value) -> String {
    match &cell["source"] {
        Value::String(s) => s.clone(),
        Value::Array(lines) => lines
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}
