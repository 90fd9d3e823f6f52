//! Language-model capability consumed by the agent dispatcher.
//!
//! The engine talks to one trait; the default implementation is the
//! OpenAI-format client in `openai`. Tests inject mocks through the same
//! trait.

pub mod openai;

use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::tokens::TokenUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in the dispatch conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    /// Set on `Tool` messages: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolInvocation>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: output.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Tool call returned by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    /// Model override; `None` uses the client default.
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub max_completion_tokens: Option<usize>,
    pub stream: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub usage: TokenUsage,
    /// Model id that actually served the call, for cost attribution.
    pub model: String,
}

/// Channel carrying debounced assistant-text chunks during streaming.
pub type OutputSink = mpsc::UnboundedSender<String>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model id used when the request carries no override.
    fn default_model(&self) -> String;

    /// One model call. When `output` is set the implementation streams
    /// assistant text into it in coalesced chunks.
    async fn complete(
        &self,
        request: ModelRequest,
        output: Option<OutputSink>,
    ) -> Result<ModelResponse>;
}

/// Process-wide client slot. Initialized lazily from env by the server;
/// replaceable from tests.
static GLOBAL: Lazy<RwLock<Option<Arc<dyn LanguageModel>>>> = Lazy::new(|| RwLock::new(None));

pub fn global() -> Option<Arc<dyn LanguageModel>> {
    GLOBAL.read().expect("model slot poisoned").clone()
}

pub fn set_global(client: Arc<dyn LanguageModel>) {
    *GLOBAL.write().expect("model slot poisoned") = Some(client);
}

/// Test hook.
pub fn reset_global() {
    *GLOBAL.write().expect("model slot poisoned") = None;
}
