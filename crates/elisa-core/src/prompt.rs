//! Prompt assembly: role system prompts and per-dispatch user prompts.
//!
//! Assembly is a pure function of (task, agent, attempt, workspace
//! snapshot, workflow). User prompt section order is fixed: retry header
//! (attempt ≥ 1 only) → task block → file manifest → structural digest →
//! behavioral tests (tester role only).

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::spec::{AgentRole, BehavioralTest};
use crate::task::{Agent, Task};

const MANIFEST_HEADER: &str = "FILES ALREADY IN WORKSPACE";
const DIGEST_HEADER: &str = "## Structural digest";
const DIGEST_MAX_FILES: usize = 40;
const DIGEST_MAX_LINES_PER_FILE: usize = 30;

/// Function/class signature lines extracted for the structural digest.
static SIGNATURE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^\s*(?:pub\s+)?(?:async\s+)?(?:export\s+)?(?:def |class |fn |function |const \w+\s*=\s*(?:async\s*)?\()",
    )
    .expect("valid signature regex")
});

/// Immutable view of the generated sources taken before each dispatch.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceSnapshot {
    /// Relative paths under `src/` and `tests/`, sorted.
    pub files: Vec<String>,
    /// Extracted signatures, present only when source files exist.
    pub digest: Option<String>,
}

/// Walk `src/` and `tests/` and extract the snapshot used by the
/// assembler.
pub fn snapshot(workspace_root: &Path) -> WorkspaceSnapshot {
    let mut files = Vec::new();
    for top in ["src", "tests"] {
        collect_files(&workspace_root.join(top), top, &mut files);
    }
    files.sort();

    let mut digest = String::new();
    for rel in files.iter().take(DIGEST_MAX_FILES) {
        let content = match std::fs::read_to_string(workspace_root.join(rel)) {
            Ok(c) => c,
            Err(_) => continue,
        };
        let signatures: Vec<&str> = content
            .lines()
            .filter(|line| SIGNATURE_RE.is_match(line))
            .take(DIGEST_MAX_LINES_PER_FILE)
            .collect();
        if !signatures.is_empty() {
            digest.push_str(&format!("{}:\n", rel));
            for sig in signatures {
                digest.push_str(&format!("  {}\n", sig.trim()));
            }
        }
    }

    WorkspaceSnapshot {
        digest: (!files.is_empty()).then_some(digest),
        files,
    }
}

fn collect_files(dir: &Path, prefix: &str, out: &mut Vec<String>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let rel = format!("{}/{}", prefix, name);
        if path.is_dir() {
            collect_files(&path, &rel, out);
        } else {
            out.push(rel);
        }
    }
}

/// Everything the user prompt is assembled from.
pub struct PromptInput<'a> {
    pub task: &'a Task,
    pub agent: &'a Agent,
    pub attempt: u32,
    /// Drop manifest and digest (context-overflow retries).
    pub compact: bool,
    pub predecessor_context: &'a str,
    pub behavioral_tests: &'a [BehavioralTest],
    pub snapshot: &'a WorkspaceSnapshot,
}

/// Role template + turn-efficiency guidance + thinking steps.
pub fn system_prompt(agent: &Agent) -> String {
    let role_line = match agent.role {
        AgentRole::Builder => {
            "You are a builder agent. You write the project's source code, one task at a time."
        }
        AgentRole::Tester => {
            "You are a tester agent. You write and run tests that verify the project's behavior."
        }
        AgentRole::Reviewer => {
            "You are a reviewer agent. You review the generated code for defects and clarity."
        }
        AgentRole::Custom => "You are a specialist agent working on one task of a larger build.",
    };

    let mut prompt = format!("{}\n\nYour name is {}.", role_line, agent.name);
    if !agent.persona.is_empty() {
        prompt.push_str(&format!(" Persona: {}.", agent.persona));
    }

    prompt.push_str(
        "\n\n## Turn Efficiency\n\
         You have a limited turn budget for this task; every tool call spends a turn.\n\
         Read the FILES ALREADY IN WORKSPACE manifest and the structural digest in your \
         task message before opening any file.",
    );

    match agent.role {
        AgentRole::Tester => prompt.push_str(
            "\nPrioritize testing over exploration. Begin writing tests within your first 3 turns.",
        ),
        AgentRole::Reviewer => prompt.push_str(
            "\nPrioritize review over exploration. Begin your review within your first 3 turns.",
        ),
        _ => {}
    }

    prompt.push_str(
        "\n\n## Thinking Steps\n\
         1. Check the file manifest for what already exists.\n\
         2. Check the structural digest for the signatures you can build on.\n\
         3. Implement the task, then summarize what you changed.",
    );

    prompt
}

/// Assemble the user prompt for one dispatch attempt.
pub fn user_prompt(input: &PromptInput) -> String {
    let mut prompt = String::new();

    if input.attempt >= 1 {
        prompt.push_str(&format!(
            "## Retry Attempt {}\n\n\
             The previous attempt did not complete this task. Skip orientation and go \
             straight to implementation.\n\n",
            input.attempt
        ));
    }

    prompt.push_str(&format!("# Task: {}\n\n{}\n", input.task.name, input.task.description));

    if !input.task.acceptance_criteria.is_empty() {
        prompt.push_str("\n## Acceptance criteria\n");
        for criterion in &input.task.acceptance_criteria {
            prompt.push_str(&format!("- {}\n", criterion));
        }
    }

    if !input.predecessor_context.is_empty() {
        prompt.push_str(&format!("\n{}\n", input.predecessor_context));
    }

    if !input.compact {
        prompt.push_str(&format!("\n## {}\n", MANIFEST_HEADER));
        if input.snapshot.files.is_empty() {
            prompt.push_str("(none yet)\n");
        } else {
            for file in &input.snapshot.files {
                prompt.push_str(&format!("- {}\n", file));
            }
        }

        if let Some(digest) = &input.snapshot.digest {
            prompt.push_str(&format!("\n{}\n", DIGEST_HEADER));
            if digest.is_empty() {
                prompt.push_str("(no signatures extracted)\n");
            } else {
                prompt.push_str(digest);
            }
        }
    }

    if input.agent.role == AgentRole::Tester && !input.behavioral_tests.is_empty() {
        prompt.push_str("\n## Behavioral Tests to Verify\n");
        for test in input.behavioral_tests {
            prompt.push_str(&format!("- When {}, then {}\n", test.when, test.then));
        }
    }

    prompt
}
