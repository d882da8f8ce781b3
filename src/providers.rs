use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// Role of a `ChatMessage` in the wire protocol sent to the remote LLM.
/// Named distinctly from `crate::message::Message` (the session/channel
/// conversation message) to avoid the two concepts colliding in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single requested tool invocation inside an assistant turn.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One turn of the wire-protocol conversation sent to/received from the
/// provider.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), tool_call_id: None, tool_calls: Vec::new() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), tool_call_id: None, tool_calls: Vec::new() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_call_id: None, tool_calls: Vec::new() }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// A request to the provider's `chat` operation.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub system_prompt: String,
    pub tools: Vec<Value>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>, system_prompt: impl Into<String>) -> Self {
        Self {
            messages,
            system_prompt: system_prompt.into(),
            tools: Vec::new(),
            model: None,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Result of a single provider round-trip: either a terminal reply or one
/// or more requested tool calls, plus token accounting.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl ChatResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// The out-of-scope external collaborator: a remote LLM HTTP
/// client. Only the method surface the Router consumes is modelled here.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;
}

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// The one concrete `LLMProvider`, Anthropic's Messages API, trimmed to the
/// single non-streaming `chat` call this crate's Router consumes. Remote
/// HTTP clients are otherwise treated as a named-interface-only external
/// collaborator — this is the minimal implementation of that interface
/// needed to make `waygate serve` independently runnable, see `DESIGN.md`.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    default_model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, default_model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            api_key,
            default_model: default_model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let messages = to_anthropic_messages(&request.messages);
        let mut payload = json!({
            "model": request.model.clone().unwrap_or_else(|| self.default_model.clone()),
            "system": request.system_prompt,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if !request.tools.is_empty() {
            payload["tools"] = json!(request.tools);
        }

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(Duration::from_secs(120))
            .json(&payload)
            .send()
            .await
            .context("failed to send request to Anthropic API")?;

        let status = response.status();
        let body: Value = response.json().await.context("failed to parse Anthropic response body")?;
        if !status.is_success() {
            let message = body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            anyhow::bail!("Anthropic API returned {status}: {message}");
        }
        parse_anthropic_response(&body)
    }
}

fn to_anthropic_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| match m.role {
            Role::User => json!({"role": "user", "content": m.content}),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": m.content}));
                }
                for call in &m.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments,
                    }));
                }
                json!({"role": "assistant", "content": blocks})
            }
            Role::Tool => json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                    "content": m.content,
                }],
            }),
            Role::System => unreachable!("filtered above"),
        })
        .collect()
}

fn parse_anthropic_response(body: &Value) -> Result<ChatResponse> {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    if let Some(blocks) = body.get("content").and_then(|c| c.as_array()) {
        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                        text.push_str(t);
                    }
                }
                Some("tool_use") => {
                    tool_calls.push(ToolCall {
                        id: block.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        name: block.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        arguments: block.get("input").cloned().unwrap_or(Value::Null),
                    });
                }
                _ => {}
            }
        }
    }
    let usage = body.get("usage");
    let input_tokens = usage.and_then(|u| u.get("input_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let output_tokens = usage.and_then(|u| u.get("output_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    Ok(ChatResponse { text, tool_calls, input_tokens, output_tokens })
}

/// Deterministic, scriptable stub provider used by tests alongside the real
/// HTTP client.
#[cfg(any(test, feature = "test-support"))]
pub struct MockProvider {
    pub responses: std::sync::Mutex<std::collections::VecDeque<ChatResponse>>,
}

#[cfg(any(test, feature = "test-support"))]
impl MockProvider {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self { responses: std::sync::Mutex::new(responses.into_iter().collect()) }
    }

    pub fn single_reply(text: impl Into<String>) -> Self {
        Self::new(vec![ChatResponse {
            text: text.into(),
            tool_calls: Vec::new(),
            input_tokens: 10,
            output_tokens: 5,
        }])
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl LLMProvider for MockProvider {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        responses
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("MockProvider exhausted its scripted responses"))
    }
}
