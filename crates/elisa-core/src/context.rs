//! Per-session context: predecessor result summaries injected into task
//! prompts, mirrored to the workspace metadata files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;

use crate::constants::{CONTEXT_WORD_BUDGET, META_DIR};

pub struct ContextManager {
    comms_dir: PathBuf,
    context_dir: PathBuf,
    word_budget: usize,
    summaries: Mutex<Vec<(String, String)>>,
}

impl ContextManager {
    pub fn new(workspace_root: &Path) -> Self {
        Self {
            comms_dir: workspace_root.join(META_DIR).join("comms"),
            context_dir: workspace_root.join(META_DIR).join("context"),
            word_budget: CONTEXT_WORD_BUDGET,
            summaries: Mutex::new(Vec::new()),
        }
    }

    #[cfg(test)]
    fn with_budget(workspace_root: &Path, word_budget: usize) -> Self {
        let mut mgr = Self::new(workspace_root);
        mgr.word_budget = word_budget;
        mgr
    }

    /// Context block for a task: the recorded summaries of its
    /// predecessors, oldest first, capped at the word budget. Empty string
    /// when no predecessor has recorded anything.
    pub fn context_for(&self, predecessor_ids: &[String]) -> String {
        let summaries = self.summaries.lock().expect("context lock poisoned");
        let relevant: Vec<&(String, String)> = summaries
            .iter()
            .filter(|(id, _)| predecessor_ids.contains(id))
            .collect();
        if relevant.is_empty() {
            return String::new();
        }

        let mut block = String::from("## Results from completed tasks\n");
        for (id, summary) in relevant {
            block.push_str(&format!("\n### {}\n{}\n", id, summary));
        }
        cap_words(&block, self.word_budget)
    }

    /// Record a task's result summary, mirror it to
    /// `comms/<task>_summary.md`, and rebuild `context/nugget_context.md`.
    /// Both files are written atomically (temp file, then rename).
    pub async fn record_result(&self, task_id: &str, summary: &str) -> Result<()> {
        let rolling = {
            let mut summaries = self.summaries.lock().expect("context lock poisoned");
            summaries.retain(|(id, _)| id != task_id);
            summaries.push((task_id.to_string(), summary.to_string()));

            let mut rolling = String::from("# Build context\n");
            for (id, text) in summaries.iter() {
                rolling.push_str(&format!("\n## {}\n{}\n", id, text));
            }
            rolling
        };

        tokio::fs::create_dir_all(&self.comms_dir).await?;
        tokio::fs::create_dir_all(&self.context_dir).await?;

        write_atomic(
            &self.comms_dir.join(format!("{}_summary.md", task_id)),
            summary,
        )
        .await?;
        write_atomic(&self.context_dir.join("nugget_context.md"), &rolling).await?;
        Ok(())
    }
}

/// Truncate to at most `budget` whitespace-separated words.
fn cap_words(text: &str, budget: usize) -> String {
    for (idx, word) in text.split_whitespace().enumerate() {
        if idx >= budget {
            // Cut at the byte offset where the first excess word starts.
            let offset = word.as_ptr() as usize - text.as_ptr() as usize;
            let mut truncated = text[..offset].trim_end().to_string();
            truncated.push_str("\n[context truncated]");
            return truncated;
        }
    }
    text.to_string()
}

async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
