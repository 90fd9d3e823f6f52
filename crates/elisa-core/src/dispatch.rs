//! Agent dispatcher: one LLM call with a tool-calling turn loop, streaming,
//! timeout, cancellation, and stable error classification.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::constants::{
    COMPLETION_TOKENS_DEFAULT, DISPATCH_TIMEOUT, MAX_TOOL_OUTPUT_CHARS, MAX_TURNS_DEFAULT,
};
use crate::model::{ChatMessage, LanguageModel, ModelRequest, ToolInvocation};
use crate::session::CancelHandle;
use crate::tokens::{cost_usd, TokenUsage};
use crate::tools::implementations::ASK_USER_TOOL;
use crate::tools::{ToolContext, ToolRegistry};

/// Stable failure markers scanned for by the executor's retry ladder.
pub const CONTEXT_WINDOW_MARKER: &str = "CONTEXT_WINDOW_EXCEEDED:";
pub const OUTPUT_LIMIT_MARKER: &str = "OUTPUT_LIMIT_REACHED:";

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub max_turns: usize,
    pub max_completion_tokens: usize,
    pub timeout: Duration,
    pub allowed_tools: Vec<String>,
    pub enable_streaming: bool,
    pub enable_tool_calling: bool,
    /// Model id override; `None` uses the client default.
    pub model: Option<String>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_turns: MAX_TURNS_DEFAULT,
            max_completion_tokens: COMPLETION_TOKENS_DEFAULT,
            timeout: DISPATCH_TIMEOUT,
            allowed_tools: crate::tools::implementations::default_allowed_tools(),
            enable_streaming: true,
            enable_tool_calling: true,
            model: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub tool: String,
    pub args: Value,
    pub is_error: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AgentResult {
    pub success: bool,
    pub summary: String,
    pub usage: TokenUsage,
    pub tool_calls: Vec<ToolCallRecord>,
    pub cost_usd: f64,
}

impl AgentResult {
    fn failure(summary: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn is_context_overflow(&self) -> bool {
        self.summary.starts_with(CONTEXT_WINDOW_MARKER)
    }

    pub fn is_output_limit(&self) -> bool {
        self.summary.starts_with(OUTPUT_LIMIT_MARKER)
    }
}

/// Callbacks the executor wires to the event bus and the session's
/// question resolvers.
#[async_trait]
pub trait DispatchObserver: Send + Sync {
    fn on_output(&self, _text: &str) {}
    fn on_tool_use(&self, _tool: &str, _args: &Value) {}
    fn on_tool_result(&self, _tool: &str, _output: &str, _is_error: bool) {}

    /// Suspend for a user question. `None` means the question cannot be
    /// answered (no client, cancellation); the turn continues with an
    /// unanswered marker.
    async fn ask_question(&self, _questions: &Value) -> Option<HashMap<String, String>> {
        None
    }
}

pub struct NullObserver;

#[async_trait]
impl DispatchObserver for NullObserver {}

pub struct Dispatcher {
    model: Arc<dyn LanguageModel>,
    registry: Arc<ToolRegistry>,
}

impl Dispatcher {
    pub fn new(model: Arc<dyn LanguageModel>, registry: Arc<ToolRegistry>) -> Self {
        Self { model, registry }
    }

    /// Run one dispatch to completion. Never panics; every failure mode is
    /// folded into an `AgentResult` with a classified summary.
    #[allow(clippy::too_many_arguments)]
    pub async fn dispatch(
        &self,
        task_id: &str,
        system_prompt: &str,
        user_prompt: &str,
        working_dir: &Path,
        options: &DispatchOptions,
        cancel: &CancelHandle,
        observer: Arc<dyn DispatchObserver>,
    ) -> AgentResult {
        let timeout_secs = options.timeout.as_secs();
        match tokio::time::timeout(
            options.timeout,
            self.run_turns(task_id, system_prompt, user_prompt, working_dir, options, cancel, observer),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(task_id, timeout_secs, "dispatch timed out");
                AgentResult::failure(format!("Agent timed out after {} seconds", timeout_secs))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_turns(
        &self,
        task_id: &str,
        system_prompt: &str,
        user_prompt: &str,
        working_dir: &Path,
        options: &DispatchOptions,
        cancel: &CancelHandle,
        observer: Arc<dyn DispatchObserver>,
    ) -> AgentResult {
        let mut messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ];
        let mut usage = TokenUsage::default();
        let mut cost = 0.0_f64;
        let mut records: Vec<ToolCallRecord> = Vec::new();

        let tools = if options.enable_tool_calling {
            self.registry.specs(&options.allowed_tools)
        } else {
            Vec::new()
        };

        for turn in 1..=options.max_turns {
            if cancel.is_cancelled() {
                return self.finish(false, "Agent was cancelled", usage, cost, records);
            }

            let request = ModelRequest {
                model: options.model.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                max_completion_tokens: Some(options.max_completion_tokens),
                stream: options.enable_streaming,
            };
            let (sink, forwarder) = if options.enable_streaming {
                let (tx, mut rx) = mpsc::unbounded_channel::<String>();
                let obs = Arc::clone(&observer);
                let handle = tokio::spawn(async move {
                    while let Some(chunk) = rx.recv().await {
                        obs.on_output(&chunk);
                    }
                });
                (Some(tx), Some(handle))
            } else {
                (None, None)
            };

            let response = tokio::select! {
                result = self.model.complete(request, sink) => result,
                _ = cancel.cancelled() => {
                    return self.finish(false, "Agent was cancelled", usage, cost, records);
                }
            };
            if let Some(handle) = forwarder {
                let _ = handle.await;
            }

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    let summary = classify_failure(&e.to_string());
                    tracing::warn!(task_id, turn, error = %e, "model call failed");
                    return self.finish(false, summary, usage, cost, records);
                }
            };

            cost += cost_usd(&response.model, &response.usage);
            usage.input_tokens += response.usage.input_tokens;
            usage.output_tokens += response.usage.output_tokens;
            usage.cached_input_tokens += response.usage.cached_input_tokens;
            usage.reasoning_tokens += response.usage.reasoning_tokens;

            if response.tool_calls.is_empty() {
                if !options.enable_streaming && !response.content.is_empty() {
                    observer.on_output(&response.content);
                }
                return self.finish(true, response.content, usage, cost, records);
            }

            messages.push(ChatMessage::assistant(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            // AskUser calls suspend; everything else runs concurrently.
            let (questions, actions): (Vec<_>, Vec<_>) = response
                .tool_calls
                .into_iter()
                .partition(|call| call.name == ASK_USER_TOOL);

            let mut results: Vec<(String, String)> =
                match self.execute_batch(&actions, working_dir, cancel, &observer, &mut records).await {
                    Ok(results) => results,
                    Err(cancelled) => {
                        return self.finish(false, cancelled, usage, cost, records);
                    }
                };

            for call in &questions {
                records.push(ToolCallRecord {
                    tool: call.name.clone(),
                    args: call.arguments.clone(),
                    is_error: false,
                });
                let answer = observer.ask_question(&call.arguments).await;
                let output = match answer {
                    Some(answers) => serde_json::to_string(&answers)
                        .unwrap_or_else(|_| "{}".to_string()),
                    None => "{\"error\": \"question was not answered\"}".to_string(),
                };
                results.push((call.id.clone(), output));
            }

            for (call_id, output) in results {
                messages.push(ChatMessage::tool(call_id, output));
            }
        }

        self.finish(
            false,
            format!("Agent reached the turn limit ({} turns)", options.max_turns),
            usage,
            cost,
            records,
        )
    }

    /// Execute a batch of tool calls concurrently under the sandbox.
    /// Returns `(call_id, truncated_output)` pairs in call order, or the
    /// cancellation summary.
    async fn execute_batch(
        &self,
        calls: &[ToolInvocation],
        working_dir: &Path,
        cancel: &CancelHandle,
        observer: &Arc<dyn DispatchObserver>,
        records: &mut Vec<ToolCallRecord>,
    ) -> Result<Vec<(String, String)>, String> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        for call in calls {
            observer.on_tool_use(&call.name, &call.arguments);
        }

        let ctx = ToolContext {
            workspace_root: PathBuf::from(working_dir),
            timeout: None,
        };

        let executions: Vec<_> = calls
            .iter()
            .map(|call| {
                let registry = Arc::clone(&self.registry);
                let ctx = ctx.clone();
                let name = call.name.clone();
                let args = call.arguments.clone();
                async move { registry.execute(&name, args, &ctx).await }
            })
            .collect();

        let outcomes = tokio::select! {
            outcomes = futures::future::join_all(executions) => outcomes,
            _ = cancel.cancelled() => return Err("Agent was cancelled".to_string()),
        };

        let mut results = Vec::with_capacity(calls.len());
        for (call, outcome) in calls.iter().zip(outcomes) {
            let output = truncate_tool_output(&outcome.output);
            observer.on_tool_result(&call.name, &output, outcome.is_error);
            records.push(ToolCallRecord {
                tool: call.name.clone(),
                args: call.arguments.clone(),
                is_error: outcome.is_error,
            });
            results.push((call.id.clone(), output));
        }
        Ok(results)
    }

    fn finish(
        &self,
        success: bool,
        summary: impl Into<String>,
        usage: TokenUsage,
        cost_usd: f64,
        tool_calls: Vec<ToolCallRecord>,
    ) -> AgentResult {
        AgentResult {
            success,
            summary: summary.into(),
            usage,
            tool_calls,
            cost_usd,
        }
    }
}

/// Map a model error message to the stable marker vocabulary.
pub fn classify_failure(message: &str) -> String {
    let lower = message.to_ascii_lowercase();

    const CONTEXT_PATTERNS: [&str; 4] = [
        "context_length_exceeded",
        "too many tokens",
        "prompt too long",
        "maximum context length",
    ];
    const OUTPUT_PATTERNS: [&str; 3] = [
        "max_tokens",
        "could not finish the message",
        "completion length",
    ];

    if CONTEXT_PATTERNS.iter().any(|p| lower.contains(p)) {
        format!("{} {}", CONTEXT_WINDOW_MARKER, message)
    } else if OUTPUT_PATTERNS.iter().any(|p| lower.contains(p)) {
        format!("{} {}", OUTPUT_LIMIT_MARKER, message)
    } else {
        message.to_string()
    }
}

/// Truncate tool output to the model-visible cap with an explicit marker.
pub fn truncate_tool_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }
    let mut boundary = MAX_TOOL_OUTPUT_CHARS;
    while boundary > 0 && !output.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!("{}\n[Output truncated]", &output[..boundary])
}
