//! Engine-wide defaults. Env overrides are read where the value is used.

use std::time::Duration;

/// Maximum tasks dispatched concurrently within one session.
pub const MAX_CONCURRENT_TASKS: usize = 3;

/// Turn budget for the first attempt of a dispatch.
pub const MAX_TURNS_DEFAULT: usize = 25;

/// Extra turns granted per retry attempt.
pub const MAX_TURNS_RETRY_INCREMENT: usize = 10;

/// Retries after the first failed attempt before the human gate fires.
pub const RETRY_LIMIT: u32 = 2;

/// Completion-token budget for the first attempt.
pub const COMPLETION_TOKENS_DEFAULT: usize = 4_000;

/// Completion-token increase per retry.
pub const COMPLETION_TOKENS_INCREMENT: usize = 4_000;

/// Hard cap on the completion-token budget.
pub const COMPLETION_TOKENS_CAP: usize = 12_000;

/// Wall-clock budget for a single agent dispatch.
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Default timeout for a bash tool invocation.
pub const BASH_TIMEOUT: Duration = Duration::from_secs(30);

/// Tool output beyond this many characters is truncated.
pub const MAX_TOOL_OUTPUT_CHARS: usize = 10_000;

/// Coalescing window for streamed assistant output.
pub const STREAM_DEBOUNCE: Duration = Duration::from_millis(100);

/// Word budget for the predecessor-context block injected into prompts.
pub const CONTEXT_WORD_BUDGET: usize = 2_000;

/// Node budget for workspace inspection walks.
pub const INSPECT_MAX_NODES: usize = 8_000;

/// Judge acceptance threshold when `JUDGE_MIN_SCORE` is unset.
pub const JUDGE_DEFAULT_THRESHOLD: u32 = 70;

/// Build-memory record cap (FIFO beyond this).
pub const MEMORY_MAX_RECORDS: usize = 200;

/// Sessions older than this are pruned.
pub const SESSION_MAX_AGE: Duration = Duration::from_secs(3_600);

/// Interval of the session-store pruning tick.
pub const SESSION_PRUNE_TICK: Duration = Duration::from_secs(600);

/// Grace period before a terminal session is destroyed.
pub const SESSION_TERMINAL_GRACE: Duration = Duration::from_secs(300);

/// Default model id when `OPENAI_MODEL` is unset.
pub const DEFAULT_MODEL: &str = "gpt-5.2";

/// Model switched to for the rest of a run once an output-limit error fires.
pub const FALLBACK_MODEL: &str = "gpt-4.1";

/// Metadata directory kept inside every workspace.
pub const META_DIR: &str = ".elisa";

/// Design files preserved across builds.
pub const DESIGN_FILES: [&str; 5] = [
    "workspace.json",
    "skills.json",
    "rules.json",
    "portals.json",
    "nugget.json",
];
