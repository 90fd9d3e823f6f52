//! OpenAI-format chat-completions client.
//!
//! Configuration comes from the environment: `OPENAI_API_KEY`,
//! `OPENAI_MODEL` (default `gpt-5.2`), `OPENAI_BASE_URL` for proxy mode,
//! and `OPENAI_WORKSHOP_CODE`/`OPENAI_STUDENT_ID` which ride along as
//! proxy auth headers. Streaming uses SSE with assistant-text deltas
//! coalesced into ~100 ms chunks before they reach the sink.

use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::constants::{DEFAULT_MODEL, STREAM_DEBOUNCE};
use crate::tokens::TokenUsage;

use super::{ChatRole, LanguageModel, ModelRequest, ModelResponse, OutputSink, ToolInvocation};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    workshop_code: Option<String>,
    student_id: Option<String>,
}

impl OpenAiClient {
    /// Build from environment variables. Fails when no API key is set.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is not set"))?;

        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(600))
                .build()
                .context("failed to build HTTP client")?,
            api_key,
            base_url: std::env::var("OPENAI_BASE_URL")
                .ok()
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: std::env::var("OPENAI_MODEL")
                .ok()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            workshop_code: std::env::var("OPENAI_WORKSHOP_CODE").ok(),
            student_id: std::env::var("OPENAI_STUDENT_ID").ok(),
        })
    }

    fn request_body(&self, request: &ModelRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::Tool => "tool",
                };
                let mut msg = json!({ "role": role, "content": m.content });
                if !m.tool_calls.is_empty() {
                    msg["tool_calls"] = m
                        .tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": {
                                    "name": c.name,
                                    "arguments": c.arguments.to_string(),
                                },
                            })
                        })
                        .collect();
                }
                if let Some(call_id) = &m.tool_call_id {
                    msg["tool_call_id"] = json!(call_id);
                }
                msg
            })
            .collect();

        let mut body = json!({
            "model": request.model.clone().unwrap_or_else(|| self.model.clone()),
            "messages": messages,
        });

        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect();
        }
        if let Some(max) = request.max_completion_tokens {
            body["max_completion_tokens"] = json!(max);
        }
        if request.stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let mut req = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body);

        if let Some(code) = &self.workshop_code {
            req = req.header("X-Workshop-Code", code);
        }
        if let Some(id) = &self.student_id {
            req = req.header("X-Student-Id", id);
        }

        let response = req.send().await.context("model request failed")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            bail!("model API error {}: {}", status, detail);
        }
        Ok(response)
    }

    fn parse_usage(value: &Value) -> TokenUsage {
        TokenUsage {
            input_tokens: value["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: value["completion_tokens"].as_u64().unwrap_or(0),
            cached_input_tokens: value["prompt_tokens_details"]["cached_tokens"]
                .as_u64()
                .unwrap_or(0),
            reasoning_tokens: value["completion_tokens_details"]["reasoning_tokens"]
                .as_u64()
                .unwrap_or(0),
        }
    }

    fn parse_tool_calls(calls: &[Value]) -> Vec<ToolInvocation> {
        calls
            .iter()
            .filter_map(|c| {
                let name = c["function"]["name"].as_str()?.to_string();
                let raw_args = c["function"]["arguments"].as_str().unwrap_or("{}");
                Some(ToolInvocation {
                    id: c["id"].as_str().unwrap_or_default().to_string(),
                    name,
                    arguments: serde_json::from_str(raw_args).unwrap_or(Value::Null),
                })
            })
            .collect()
    }

    async fn complete_blocking(&self, model: String, body: Value) -> Result<ModelResponse> {
        let response = self.send(&body).await?;
        let payload: Value = response.json().await.context("invalid model response")?;

        let message = &payload["choices"][0]["message"];
        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|calls| Self::parse_tool_calls(calls))
            .unwrap_or_default();

        Ok(ModelResponse {
            content: message["content"].as_str().unwrap_or_default().to_string(),
            tool_calls,
            usage: Self::parse_usage(&payload["usage"]),
            model,
        })
    }

    async fn complete_streaming(
        &self,
        model: String,
        body: Value,
        output: OutputSink,
    ) -> Result<ModelResponse> {
        let response = self.send(&body).await?;
        let mut stream = response.bytes_stream();

        let mut line_buffer = String::new();
        let mut content = String::new();
        let mut usage = TokenUsage::default();
        // Streamed tool calls arrive as fragments keyed by index.
        let mut partial_calls: Vec<(String, String, String)> = Vec::new();

        let mut pending = String::new();
        let mut last_flush = Instant::now();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.context("stream read error")?;
            line_buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = line_buffer.find('\n') {
                let line = line_buffer[..newline].trim().to_string();
                line_buffer.drain(..=newline);

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    continue;
                }
                let event: Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("unparseable stream event: {}", e);
                        continue;
                    }
                };

                if let Some(u) = event.get("usage").filter(|u| !u.is_null()) {
                    usage = Self::parse_usage(u);
                }

                let delta = &event["choices"][0]["delta"];
                if let Some(text) = delta["content"].as_str() {
                    content.push_str(text);
                    pending.push_str(text);
                }
                if let Some(calls) = delta["tool_calls"].as_array() {
                    for call in calls {
                        let index = call["index"].as_u64().unwrap_or(0) as usize;
                        while partial_calls.len() <= index {
                            partial_calls.push((String::new(), String::new(), String::new()));
                        }
                        let slot = &mut partial_calls[index];
                        if let Some(id) = call["id"].as_str() {
                            slot.0.push_str(id);
                        }
                        if let Some(name) = call["function"]["name"].as_str() {
                            slot.1.push_str(name);
                        }
                        if let Some(args) = call["function"]["arguments"].as_str() {
                            slot.2.push_str(args);
                        }
                    }
                }

                if !pending.is_empty() && last_flush.elapsed() >= STREAM_DEBOUNCE {
                    let _ = output.send(std::mem::take(&mut pending));
                    last_flush = Instant::now();
                }
            }
        }

        if !pending.is_empty() {
            let _ = output.send(pending);
        }

        let tool_calls = partial_calls
            .into_iter()
            .filter(|(_, name, _)| !name.is_empty())
            .map(|(id, name, args)| ToolInvocation {
                id,
                name,
                arguments: serde_json::from_str(&args).unwrap_or(Value::Null),
            })
            .collect();

        Ok(ModelResponse {
            content,
            tool_calls,
            usage,
            model,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    fn default_model(&self) -> String {
        self.model.clone()
    }

    async fn complete(
        &self,
        request: ModelRequest,
        output: Option<OutputSink>,
    ) -> Result<ModelResponse> {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let body = self.request_body(&request);

        match output.filter(|_| request.stream) {
            Some(sink) => self.complete_streaming(model, body, sink).await,
            None => self.complete_blocking(model, body).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatMessage, ToolSpec};

    fn client() -> OpenAiClient {
        OpenAiClient {
            http: reqwest::Client::new(),
            api_key: "sk-test".into(),
            base_url: DEFAULT_BASE_URL.into(),
            model: "gpt-5.2".into(),
            workshop_code: None,
            student_id: None,
        }
    }

    #[test]
    fn request_body_includes_tools_and_budget() {
        let c = client();
        let request = ModelRequest {
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("hello")],
            tools: vec![ToolSpec {
                name: "Read".into(),
                description: "read a file".into(),
                parameters: json!({"type": "object"}),
            }],
            max_completion_tokens: Some(4_000),
            ..Default::default()
        };

        let body = c.request_body(&request);
        assert_eq!(body["model"], "gpt-5.2");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["tools"][0]["function"]["name"], "Read");
        assert_eq!(body["max_completion_tokens"], 4_000);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn request_body_serializes_tool_round_trip() {
        let c = client();
        let request = ModelRequest {
            messages: vec![
                ChatMessage::assistant(
                    "",
                    vec![ToolInvocation {
                        id: "call_1".into(),
                        name: "Read".into(),
                        arguments: json!({"file_path": "src/app.py"}),
                    }],
                ),
                ChatMessage::tool("call_1", "file contents"),
            ],
            ..Default::default()
        };

        let body = c.request_body(&request);
        assert_eq!(body["messages"][0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(body["messages"][1]["role"], "tool");
        assert_eq!(body["messages"][1]["tool_call_id"], "call_1");
    }

    #[test]
    fn usage_parses_cache_and_reasoning_details() {
        let usage = OpenAiClient::parse_usage(&json!({
            "prompt_tokens": 100,
            "completion_tokens": 40,
            "prompt_tokens_details": {"cached_tokens": 25},
            "completion_tokens_details": {"reasoning_tokens": 10}
        }));
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.cached_input_tokens, 25);
        assert_eq!(usage.reasoning_tokens, 10);
    }

    #[test]
    fn tool_call_arguments_parse_from_string() {
        let calls = OpenAiClient::parse_tool_calls(&[json!({
            "id": "call_9",
            "function": {"name": "Bash", "arguments": "{\"command\": \"ls\"}"}
        })]);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["command"], "ls");
    }
}
