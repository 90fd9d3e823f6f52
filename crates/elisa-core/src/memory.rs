//! Build memory: append-only records of prior runs, similarity search for
//! planner context, and reusable-pattern suggestion.
//!
//! The store is a single JSON document `{version: 1, records: [...]}`
//! rewritten atomically (temp file, then rename) on every append. Records
//! are deduplicated by session id (latest wins) and FIFO-capped.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::constants::MEMORY_MAX_RECORDS;
use crate::spec::{DeployTarget, PatternSpec, ProjectSpec};
use crate::text::{jaccard, unique_tokens};

const MEMORY_VERSION: u32 = 1;
const CONTEXT_MIN_SCORE: f64 = 0.2;
const PATTERN_MIN_SCORE: f64 = 0.18;
const COMMIT_HIGHLIGHT_CAP: usize = 10;

/// Outcome aggregate folded into each record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOutcome {
    pub tasks_total: usize,
    pub tasks_done: usize,
    pub tasks_failed: usize,
    pub tests_passed: usize,
    pub tests_failed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_pct: Option<f64>,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub judge_score: u32,
    pub overridden: bool,
    pub success: bool,
}

impl RunOutcome {
    fn completion_rate(&self) -> f64 {
        if self.tasks_total == 0 {
            0.0
        } else {
            self.tasks_done as f64 / self.tasks_total as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub goal: String,
    pub nugget_type: String,
    pub deployment_target: DeployTarget,
    pub keywords: Vec<String>,
    pub skills: Vec<PatternSpec>,
    pub rules: Vec<PatternSpec>,
    pub commit_highlights: Vec<String>,
    pub outcome: RunOutcome,
}

impl MemoryRecord {
    /// Derive a record from the run's inputs and outputs.
    pub fn from_run(
        session_id: &str,
        spec: &ProjectSpec,
        commit_messages: &[String],
        outcome: RunOutcome,
    ) -> Self {
        let mut keyword_source = spec.goal.clone();
        for req in &spec.requirements {
            keyword_source.push(' ');
            keyword_source.push_str(&req.description);
        }

        Self {
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            goal: spec.goal.clone(),
            nugget_type: spec.project_type.clone(),
            deployment_target: spec.deployment.target,
            keywords: unique_tokens(&keyword_source),
            skills: spec.skills.clone(),
            rules: spec.rules.clone(),
            commit_highlights: commit_messages
                .iter()
                .take(COMMIT_HIGHLIGHT_CAP)
                .cloned()
                .collect(),
            outcome,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryFile {
    version: u32,
    records: Vec<MemoryRecord>,
}

/// One similar prior run handed to the planner.
#[derive(Debug, Clone, Serialize)]
pub struct PlannerContextEntry {
    pub goal: String,
    pub similarity: f64,
    pub success: bool,
    pub judge_score: u32,
    pub helpful_patterns: Vec<String>,
    pub pitfalls: Vec<String>,
}

/// Reusable skill/rule suggested from successful similar runs.
#[derive(Debug, Clone, Serialize)]
pub struct PatternSuggestion {
    pub name: String,
    pub prompt: String,
    pub weight: f64,
}

pub struct BuildMemory {
    path: PathBuf,
    max_records: usize,
    write_lock: Mutex<()>,
}

impl BuildMemory {
    /// Store at `MEMORY_PATH`, or the given fallback when unset.
    pub fn from_env(fallback: PathBuf) -> Self {
        let path = std::env::var("MEMORY_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(fallback);
        Self::at(path)
    }

    pub fn at(path: PathBuf) -> Self {
        Self {
            path,
            max_records: MEMORY_MAX_RECORDS,
            write_lock: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn with_cap(path: PathBuf, max_records: usize) -> Self {
        Self {
            path,
            max_records,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> MemoryFile {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("unreadable memory file, starting fresh: {}", e);
                MemoryFile::default()
            }),
            Err(_) => MemoryFile::default(),
        }
    }

    async fn save(&self, file: &MemoryFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(file).context("serialize memory")?;
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Append one run. Re-recording a session replaces its earlier record;
    /// overflow drops the oldest records first.
    pub async fn record_run(&self, record: MemoryRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load().await;
        file.version = MEMORY_VERSION;
        file.records.retain(|r| r.session_id != record.session_id);
        file.records.push(record);
        if file.records.len() > self.max_records {
            let excess = file.records.len() - self.max_records;
            file.records.drain(..excess);
        }
        self.save(&file).await
    }

    pub async fn records(&self) -> Vec<MemoryRecord> {
        self.load().await.records
    }

    fn similarity(spec_keywords: &[String], spec: &ProjectSpec, record: &MemoryRecord) -> f64 {
        let mut score = 0.6 * jaccard(spec_keywords, &record.keywords);
        if record.nugget_type == spec.project_type {
            score += 0.25;
        }
        if record.deployment_target == spec.deployment.target {
            score += 0.15;
        }
        if record.outcome.success {
            score += 0.05;
        }
        score
    }

    fn spec_keywords(spec: &ProjectSpec) -> Vec<String> {
        let mut source = spec.goal.clone();
        for req in &spec.requirements {
            source.push(' ');
            source.push_str(&req.description);
        }
        unique_tokens(&source)
    }

    /// Up to `limit` similar prior runs for planner seeding.
    pub async fn planner_context(
        &self,
        spec: &ProjectSpec,
        limit: usize,
    ) -> Vec<PlannerContextEntry> {
        let keywords = Self::spec_keywords(spec);
        let records = self.load().await.records;

        let mut scored: Vec<(f64, &MemoryRecord)> = records
            .iter()
            .filter_map(|record| {
                let score = Self::similarity(&keywords, spec, record);
                (score >= CONTEXT_MIN_SCORE).then_some((score, record))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(limit)
            .map(|(similarity, record)| {
                let mut pitfalls = Vec::new();
                if record.outcome.tasks_failed > 0 {
                    pitfalls.push(format!(
                        "{} of {} tasks failed",
                        record.outcome.tasks_failed, record.outcome.tasks_total
                    ));
                }
                if record.outcome.tests_failed > 0 {
                    pitfalls.push(format!("{} tests failed", record.outcome.tests_failed));
                }
                if !record.outcome.success && pitfalls.is_empty() {
                    pitfalls.push("run did not pass the judge".to_string());
                }

                PlannerContextEntry {
                    goal: record.goal.clone(),
                    similarity,
                    success: record.outcome.success,
                    judge_score: record.outcome.judge_score,
                    helpful_patterns: record
                        .skills
                        .iter()
                        .chain(record.rules.iter())
                        .map(|p| p.name.clone())
                        .collect(),
                    pitfalls,
                }
            })
            .collect()
    }

    /// Aggregate reusable skills/rules from successful similar runs,
    /// excluding patterns the current spec already carries.
    pub async fn suggest_patterns(
        &self,
        spec: &ProjectSpec,
        limit: usize,
    ) -> Vec<PatternSuggestion> {
        let keywords = Self::spec_keywords(spec);
        let records = self.load().await.records;

        let existing: Vec<(String, String)> = spec
            .skills
            .iter()
            .chain(spec.rules.iter())
            .map(|p| normalize_pattern(p))
            .collect();

        let mut suggestions: Vec<PatternSuggestion> = Vec::new();
        for record in &records {
            if !record.outcome.success {
                continue;
            }
            let similarity = Self::similarity(&keywords, spec, record);
            if similarity < PATTERN_MIN_SCORE {
                continue;
            }

            let judge_quality = record.outcome.judge_score as f64 / 100.0;
            let weight = similarity
                * (0.35 + 0.65 * record.outcome.completion_rate())
                * (0.4 + 0.6 * judge_quality);

            for pattern in record.skills.iter().chain(record.rules.iter()) {
                let key = normalize_pattern(pattern);
                if existing.contains(&key) {
                    continue;
                }
                match suggestions
                    .iter_mut()
                    .find(|s| normalize(&s.name, &s.prompt) == key)
                {
                    Some(existing_suggestion) => {
                        existing_suggestion.weight += weight;
                    }
                    None => suggestions.push(PatternSuggestion {
                        name: pattern.name.clone(),
                        prompt: pattern.prompt.clone(),
                        weight,
                    }),
                }
            }
        }

        suggestions.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        suggestions.truncate(limit);
        suggestions
    }
}

fn normalize(name: &str, prompt: &str) -> (String, String) {
    (
        name.trim().to_lowercase(),
        prompt.trim().to_lowercase(),
    )
}

fn normalize_pattern(pattern: &PatternSpec) -> (String, String) {
    normalize(&pattern.name, &pattern.prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn spec(goal: &str, project_type: &str) -> ProjectSpec {
        ProjectSpec::from_value(&json!({
            "project": {"goal": goal, "type": project_type},
            "requirements": [{"type": "feature", "description": goal}],
        }))
    }

    fn record(session: &str, goal: &str, success: bool) -> MemoryRecord {
        MemoryRecord::from_run(
            session,
            &spec(goal, "app"),
            &["Add counter".to_string()],
            RunOutcome {
                tasks_total: 2,
                tasks_done: 2,
                judge_score: 85,
                success,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn record_run_persists_versioned_document() {
        let tmp = tempdir().unwrap();
        let memory = BuildMemory::at(tmp.path().join("memory.json"));

        memory
            .record_run(record("s1", "counter app with buttons", true))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(tmp.path().join("memory.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["version"], 1);
        assert_eq!(parsed["records"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dedupes_by_session_id_latest_wins() {
        let tmp = tempdir().unwrap();
        let memory = BuildMemory::at(tmp.path().join("memory.json"));

        memory.record_run(record("s1", "first goal", false)).await.unwrap();
        memory.record_run(record("s1", "second goal", true)).await.unwrap();

        let records = memory.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].goal, "second goal");
    }

    #[tokio::test]
    async fn caps_records_fifo() {
        let tmp = tempdir().unwrap();
        let memory = BuildMemory::with_cap(tmp.path().join("memory.json"), 3);

        for i in 0..5 {
            memory
                .record_run(record(&format!("s{}", i), &format!("goal {}", i), true))
                .await
                .unwrap();
        }

        let records = memory.records().await;
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].session_id, "s2");
        assert_eq!(records[2].session_id, "s4");
    }

    #[tokio::test]
    async fn planner_context_ranks_similar_runs() {
        let tmp = tempdir().unwrap();
        let memory = BuildMemory::at(tmp.path().join("memory.json"));

        memory
            .record_run(record("s1", "counter app with increment button", true))
            .await
            .unwrap();
        memory
            .record_run(record("s2", "weather station dashboard", true))
            .await
            .unwrap();

        let query = spec("counter app with increment button", "app");
        let context = memory.planner_context(&query, 3).await;
        assert!(!context.is_empty());
        assert_eq!(context[0].goal, "counter app with increment button");
        assert!(context[0].similarity > 0.5);
    }

    #[tokio::test]
    async fn suggestions_exclude_current_spec_patterns_and_failures() {
        let tmp = tempdir().unwrap();
        let memory = BuildMemory::at(tmp.path().join("memory.json"));

        let mut past = spec("counter app", "app");
        past.skills = vec![
            PatternSpec {
                name: "Use small functions".into(),
                prompt: "Keep functions short".into(),
            },
            PatternSpec {
                name: "Existing".into(),
                prompt: "already present".into(),
            },
        ];
        memory
            .record_run(MemoryRecord::from_run(
                "s1",
                &past,
                &[],
                RunOutcome {
                    tasks_total: 1,
                    tasks_done: 1,
                    judge_score: 90,
                    success: true,
                    ..Default::default()
                },
            ))
            .await
            .unwrap();

        // A failed run's patterns never surface.
        let mut failed = spec("counter app", "app");
        failed.skills = vec![PatternSpec {
            name: "From a failure".into(),
            prompt: "ignored".into(),
        }];
        memory
            .record_run(MemoryRecord::from_run(
                "s2",
                &failed,
                &[],
                RunOutcome::default(),
            ))
            .await
            .unwrap();

        let mut query = spec("counter app", "app");
        query.skills = vec![PatternSpec {
            name: "existing".into(),
            prompt: "ALREADY PRESENT".into(),
        }];

        let suggestions = memory.suggest_patterns(&query, 4).await;
        let names: Vec<&str> = suggestions.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"Use small functions"));
        assert!(!names.contains(&"Existing"));
        assert!(!names.contains(&"From a failure"));
    }

    #[tokio::test]
    async fn missing_file_is_empty_memory() {
        let tmp = tempdir().unwrap();
        let memory = BuildMemory::at(tmp.path().join("missing.json"));
        assert!(memory.records().await.is_empty());
        let query = spec("anything", "app");
        assert!(memory.planner_context(&query, 3).await.is_empty());
    }
}
