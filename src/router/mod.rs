use crate::message::{Message, Metadata};
use crate::providers::{ChatMessage, ChatRequest, LLMProvider, Role, ToolCall};
use crate::tools::{ExecutionContext, SchemaDialect, ToolRegistry};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const DEFAULT_MAX_ITERATIONS: u32 = 10;
const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Callback invoked with streamed text deltas between provider round-trips.
pub type DeltaCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Facade over the remote LLM, running the tool-calling loop until the
/// model returns a terminal reply.
pub struct AgentRouter {
    provider: Arc<dyn LLMProvider>,
    registry: Arc<ToolRegistry>,
    system_prompt: String,
    max_iterations: u32,
}

impl AgentRouter {
    pub fn new(provider: Arc<dyn LLMProvider>, registry: Arc<ToolRegistry>, system_prompt: impl Into<String>) -> Self {
        Self {
            provider,
            registry,
            system_prompt: system_prompt.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub async fn process_with_history(&self, history: &[Message], ctx: &ExecutionContext) -> Result<Message> {
        self.run_loop(history, ctx, None).await
    }

    pub async fn process_with_history_stream(
        &self,
        history: &[Message],
        ctx: &ExecutionContext,
        on_delta: DeltaCallback,
    ) -> Result<Message> {
        self.run_loop(history, ctx, Some(on_delta)).await
    }

    async fn run_loop(
        &self,
        history: &[Message],
        ctx: &ExecutionContext,
        on_delta: Option<DeltaCallback>,
    ) -> Result<Message> {
        let mut conversation: Vec<ChatMessage> = history.iter().map(to_chat_message).collect();
        let tool_schemas = self.registry.schema_export(SchemaDialect::Anthropic).await;

        let mut total_input = 0u32;
        let mut total_output = 0u32;
        let mut final_text = String::new();

        for _ in 0..self.max_iterations {
            let request = ChatRequest {
                messages: conversation.clone(),
                system_prompt: self.system_prompt.clone(),
                tools: tool_schemas.clone(),
                model: None,
                max_tokens: None,
                temperature: None,
            };
            let response = self.provider.chat(request).await?;
            total_input += response.input_tokens;
            total_output += response.output_tokens;

            if let Some(cb) = &on_delta {
                if !response.text.is_empty() {
                    cb(&response.text);
                }
            }

            if !response.has_tool_calls() {
                final_text = response.text;
                break;
            }

            conversation.push(ChatMessage {
                role: Role::Assistant,
                content: response.text.clone(),
                tool_call_id: None,
                tool_calls: response.tool_calls.clone(),
            });

            for call in &response.tool_calls {
                let result_text = self.invoke_tool(call, ctx).await;
                conversation.push(ChatMessage::tool_result(call.id.clone(), result_text));
            }
            final_text = response.text;
        }

        let metadata = Metadata::new().with_tokens(total_input, total_output);
        Ok(Message::bot(ctx.channel.clone(), final_text).with_metadata(metadata))
    }

    async fn invoke_tool(&self, call: &ToolCall, ctx: &ExecutionContext) -> String {
        let outcome = tokio::time::timeout(
            TOOL_CALL_TIMEOUT,
            self.registry.execute(&call.name, ctx, &call.arguments),
        )
        .await;
        match outcome {
            Ok(result) => result.content,
            Err(_) => {
                warn!(tool = %call.name, "tool call exceeded the 60s per-call timeout");
                format!("tool '{}' timed out after 60s", call.name)
            }
        }
    }
}

/// Adapts `AgentRouter` to the `SubagentManager`'s `SubagentRunner` trait,
/// building a fresh one-shot `AgentRouter` per call over the sub-agent's
/// already-filtered tool registry, across the trait-object seam
/// `subagent/mod.rs` documents between itself and this module.
pub struct RouterSubagentRunner {
    provider: Arc<dyn LLMProvider>,
}

impl RouterSubagentRunner {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl crate::subagent::SubagentRunner for RouterSubagentRunner {
    async fn run(
        &self,
        task: &str,
        system_prompt: &str,
        tools: Arc<ToolRegistry>,
        max_iterations: u32,
    ) -> Result<String> {
        let router = AgentRouter::new(self.provider.clone(), tools, system_prompt).with_max_iterations(max_iterations);
        let ctx = ExecutionContext::new("subagent", "subagent");
        let history = vec![Message::user("subagent", "subagent", task)];
        let reply = router.process_with_history(&history, &ctx).await?;
        Ok(reply.text)
    }
}

fn to_chat_message(message: &Message) -> ChatMessage {
    if message.is_bot {
        ChatMessage::assistant(message.text.clone())
    } else {
        ChatMessage::user(message.text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ChatResponse, MockProvider};
    use crate::tools::base::{Tool, ToolParam, ToolResult};
    use serde_json::Value;

    struct AddOneTool;

    #[async_trait::async_trait]
    impl Tool for AddOneTool {
        fn name(&self) -> &str {
            "add_one"
        }
        fn description(&self) -> &str {
            "adds one to a number"
        }
        fn parameters(&self) -> Vec<ToolParam> {
            vec![ToolParam { name: "n", schema_type: "integer", description: "input", required: true }]
        }
        async fn execute(&self, _ctx: &ExecutionContext, params: &Value) -> ToolResult {
            let n = params["n"].as_i64().unwrap_or(0);
            ToolResult::new((n + 1).to_string())
        }
    }

    #[tokio::test]
    async fn terminal_reply_without_tool_calls() {
        let provider = Arc::new(MockProvider::single_reply("hello there"));
        let registry = Arc::new(ToolRegistry::new());
        let router = AgentRouter::new(provider, registry, "be helpful");
        let ctx = ExecutionContext::new("api", "1");
        let history = vec![Message::user("api", "1", "hi")];
        let reply = router.process_with_history(&history, &ctx).await.unwrap();
        assert_eq!(reply.text, "hello there");
        assert_eq!(reply.metadata.input_tokens, Some(10));
    }

    #[tokio::test]
    async fn tool_call_round_trip_then_terminal_reply() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(AddOneTool)).await;

        let provider = Arc::new(MockProvider::new(vec![
            ChatResponse {
                text: String::new(),
                tool_calls: vec![ToolCall { id: "call1".into(), name: "add_one".into(), arguments: serde_json::json!({"n": 41}) }],
                input_tokens: 5,
                output_tokens: 2,
            },
            ChatResponse {
                text: "the answer is 42".into(),
                tool_calls: vec![],
                input_tokens: 6,
                output_tokens: 3,
            },
        ]));
        let router = AgentRouter::new(provider, registry, "sys");
        let ctx = ExecutionContext::new("api", "1");
        let history = vec![Message::user("api", "1", "add one to 41")];
        let reply = router.process_with_history(&history, &ctx).await.unwrap();
        assert_eq!(reply.text, "the answer is 42");
        assert_eq!(reply.metadata.input_tokens, Some(11));
        assert_eq!(reply.metadata.output_tokens, Some(5));
    }

    #[tokio::test]
    async fn stops_after_max_iterations_with_partial_text() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(AddOneTool)).await;
        let looping_call = ChatResponse {
            text: "still working".into(),
            tool_calls: vec![ToolCall { id: "c".into(), name: "add_one".into(), arguments: serde_json::json!({"n": 1}) }],
            input_tokens: 1,
            output_tokens: 1,
        };
        let provider = Arc::new(MockProvider::new(vec![looping_call.clone(), looping_call.clone(), looping_call]));
        let router = AgentRouter::new(provider, registry, "sys").with_max_iterations(3);
        let ctx = ExecutionContext::new("api", "1");
        let history = vec![Message::user("api", "1", "loop")];
        let reply = router.process_with_history(&history, &ctx).await.unwrap();
        assert_eq!(reply.text, "still working");
    }
}
