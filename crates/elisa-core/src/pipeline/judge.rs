//! Objective acceptance judge: four weighted checks over what the run
//! actually produced, scored deterministically from a keyword corpus.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::JUDGE_DEFAULT_THRESHOLD;
use crate::ports::TestReport;
use crate::spec::ProjectSpec;
use crate::task::{Task, TaskStatus};
use crate::text::{tokenize, unique_tokens};
use crate::vcs::CommitRecord;

const MAX_CORPUS_FILES: usize = 80;
const MAX_CORPUS_BYTES: u64 = 180 * 1024;
const SOURCE_EXTENSIONS: [&str; 15] = [
    "py", "js", "ts", "jsx", "tsx", "html", "css", "json", "md", "ino", "cpp", "h", "rs",
    "toml", "yaml",
];

const REQUIREMENT_COVERAGE_BAR: f64 = 0.6;
const BEHAVIORAL_COVERAGE_BAR: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeCheck {
    pub name: String,
    pub score: u32,
    pub max_score: u32,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeResult {
    pub score: u32,
    pub threshold: u32,
    pub passed: bool,
    pub checks: Vec<JudgeCheck>,
    pub blocking_issues: Vec<String>,
}

/// The judge payload carried by `session_complete`: the raw verdict plus
/// the override outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub score: u32,
    pub threshold: u32,
    pub raw_passed: bool,
    pub overridden: bool,
    pub passed: bool,
    pub blocking_issues: Vec<String>,
}

impl JudgeVerdict {
    pub fn from_result(result: &JudgeResult, overridden: bool) -> Self {
        Self {
            score: result.score,
            threshold: result.threshold,
            raw_passed: result.passed,
            overridden,
            passed: result.passed || overridden,
            blocking_issues: result.blocking_issues.clone(),
        }
    }
}

/// Threshold from `JUDGE_MIN_SCORE`, clamped to [0, 100].
pub fn threshold_from_env() -> u32 {
    std::env::var("JUDGE_MIN_SCORE")
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(|v| v.clamp(0, 100) as u32)
        .unwrap_or(JUDGE_DEFAULT_THRESHOLD)
}

pub struct JudgeInput<'a> {
    pub spec: &'a ProjectSpec,
    pub tasks: &'a [Task],
    pub commits: &'a [CommitRecord],
    pub report: Option<&'a TestReport>,
    pub workspace_root: &'a Path,
    pub threshold: u32,
}

pub fn judge(input: &JudgeInput) -> JudgeResult {
    let corpus = build_corpus(input);

    let mut checks = Vec::with_capacity(4);
    checks.push(task_completion_check(input.tasks));
    checks.push(test_health_check(input));
    checks.push(coverage_check(
        "requirement_traceability",
        25,
        REQUIREMENT_COVERAGE_BAR,
        input
            .spec
            .requirements
            .iter()
            .map(|r| r.description.clone())
            .collect(),
        &corpus,
    ));
    checks.push(coverage_check(
        "behavioral_traceability",
        15,
        BEHAVIORAL_COVERAGE_BAR,
        input
            .spec
            .workflow
            .behavioral_tests
            .iter()
            .map(|t| format!("{} {}", t.when, t.then))
            .collect(),
        &corpus,
    ));

    let total: u32 = checks.iter().map(|c| c.score).sum();
    let max: u32 = checks.iter().map(|c| c.max_score).sum();
    let score = ((total as f64 / max as f64) * 100.0).round() as u32;

    // Only these two checks can block completion.
    let blocking_issues: Vec<String> = checks
        .iter()
        .filter(|c| {
            !c.passed && matches!(c.name.as_str(), "task_completion" | "behavioral_traceability")
        })
        .map(|c| c.details.clone())
        .collect();

    JudgeResult {
        score,
        threshold: input.threshold,
        passed: score >= input.threshold && blocking_issues.is_empty(),
        checks,
        blocking_issues,
    }
}

fn task_completion_check(tasks: &[Task]) -> JudgeCheck {
    let total = tasks.len();
    let done = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Done)
        .count();
    let failed = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Failed)
        .count();

    let passed = total > 0 && done == total && failed == 0;
    let score = if total == 0 {
        0
    } else {
        ((done as f64 / total as f64) * 35.0).round() as u32
    };

    JudgeCheck {
        name: "task_completion".into(),
        score,
        max_score: 35,
        passed,
        details: if passed {
            format!("All {} tasks completed", total)
        } else {
            format!("{} of {} tasks completed, {} failed", done, total, failed)
        },
    }
}

fn test_health_check(input: &JudgeInput) -> JudgeCheck {
    let tests_required =
        input.spec.workflow.testing_enabled || !input.spec.workflow.behavioral_tests.is_empty();

    let (passed, score, details) = match input.report {
        Some(report) if report.total > 0 => {
            let healthy = report.failed == 0;
            let score = ((report.passed as f64 / report.total as f64) * 25.0).round() as u32;
            (
                healthy,
                score,
                format!("{} of {} tests passed", report.passed, report.total),
            )
        }
        _ if !tests_required => (true, 25, "No tests required".to_string()),
        _ => (true, 25, "No tests were run".to_string()),
    };

    JudgeCheck {
        name: "test_health".into(),
        score,
        max_score: 25,
        passed,
        details,
    }
}

fn coverage_check(
    name: &str,
    max_score: u32,
    bar: f64,
    items: Vec<String>,
    corpus: &HashSet<String>,
) -> JudgeCheck {
    if items.is_empty() {
        return JudgeCheck {
            name: name.into(),
            score: max_score,
            max_score,
            passed: true,
            details: "Nothing to trace".into(),
        };
    }

    let mut sum = 0.0;
    for item in &items {
        let tokens = unique_tokens(item);
        if tokens.is_empty() {
            sum += 1.0;
            continue;
        }
        let hit = tokens.iter().filter(|t| corpus.contains(*t)).count();
        sum += hit as f64 / tokens.len() as f64;
    }
    let avg = sum / items.len() as f64;

    JudgeCheck {
        name: name.into(),
        score: (avg * max_score as f64).round() as u32,
        max_score,
        passed: avg >= bar,
        details: if avg >= bar {
            format!("Average keyword coverage {:.2}", avg)
        } else {
            format!(
                "Traceability is weak: average keyword coverage {:.2} (needs {:.2})",
                avg, bar
            )
        },
    }
}

/// Corpus: task text, commit messages, test output, plus a bounded sample
/// of workspace sources.
fn build_corpus(input: &JudgeInput) -> HashSet<String> {
    let mut corpus: HashSet<String> = HashSet::new();

    for task in input.tasks {
        corpus.extend(tokenize(&task.name));
        corpus.extend(tokenize(&task.description));
        for criterion in &task.acceptance_criteria {
            corpus.extend(tokenize(criterion));
        }
    }
    for commit in input.commits {
        corpus.extend(tokenize(&commit.message));
    }
    if let Some(report) = input.report {
        for test in &report.tests {
            corpus.extend(tokenize(&test.name));
            corpus.extend(tokenize(&test.details));
        }
    }

    let mut files_read = 0usize;
    let mut bytes_read = 0u64;
    collect_source_tokens(
        input.workspace_root,
        &mut corpus,
        &mut files_read,
        &mut bytes_read,
    );

    corpus
}

fn collect_source_tokens(
    dir: &Path,
    corpus: &mut HashSet<String>,
    files_read: &mut usize,
    bytes_read: &mut u64,
) {
    if *files_read >= MAX_CORPUS_FILES || *bytes_read >= MAX_CORPUS_BYTES {
        return;
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        if *files_read >= MAX_CORPUS_FILES || *bytes_read >= MAX_CORPUS_BYTES {
            return;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == ".git" || name == "node_modules" || name.starts_with(".elisa") {
            continue;
        }
        if path.is_dir() {
            collect_source_tokens(&path, corpus, files_read, bytes_read);
            continue;
        }
        let allowed = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SOURCE_EXTENSIONS.contains(&e) || e == "yml")
            .unwrap_or(false);
        if !allowed {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if *bytes_read + metadata.len() > MAX_CORPUS_BYTES {
            continue;
        }
        if let Ok(content) = std::fs::read_to_string(&path) {
            corpus.extend(tokenize(&content));
            *files_read += 1;
            *bytes_read += metadata.len();
        }
    }
}
