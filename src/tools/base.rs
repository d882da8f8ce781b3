use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Output of a single tool invocation. `is_error` lets the loop distinguish
/// a tool-level failure (fed back to the model as a `ToolFailure`)
/// from a successful result — both still carry human-readable text.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }

    pub fn from_result(result: anyhow::Result<String>) -> Self {
        match result {
            Ok(content) => Self::new(content),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

impl fmt::Display for ToolResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.content)
    }
}

/// A parameter entry in a tool's descriptor.
#[derive(Debug, Clone)]
pub struct ToolParam {
    pub name: &'static str,
    pub schema_type: &'static str,
    pub description: &'static str,
    pub required: bool,
}

/// Per-call context threaded through a tool invocation: the originating
/// channel/chat, a short summary of the conversation so far, and an open
/// metadata bag for tool-specific extras.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub channel: String,
    pub chat_id: String,
    pub context_summary: String,
    pub metadata: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            context_summary: String::new(),
            metadata: HashMap::new(),
        }
    }
}

/// Whether a tool is exposed to a sub-agent's filtered registry, and if so,
/// whether it is wrapped read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubagentAccess {
    Full,
    ReadOnly,
    Denied,
}

#[derive(Debug, Clone, Copy)]
pub struct ActionDescriptor {
    pub name: &'static str,
    pub read_only: bool,
}

/// Concise way to build a `Vec<ActionDescriptor>` for `ToolCapabilities`.
macro_rules! actions {
    ($(($name:expr, $read_only:expr)),* $(,)?) => {
        vec![$(crate::tools::base::ActionDescriptor { name: $name, read_only: $read_only }),*]
    };
}
pub(crate) use actions;

#[derive(Debug, Clone)]
pub struct ToolCapabilities {
    pub built_in: bool,
    pub network_outbound: bool,
    pub subagent_access: SubagentAccess,
    pub actions: Vec<ActionDescriptor>,
}

impl Default for ToolCapabilities {
    fn default() -> Self {
        Self {
            built_in: true,
            network_outbound: false,
            subagent_access: SubagentAccess::Full,
            actions: Vec::new(),
        }
    }
}

/// A callable tool exposed to the model through the registry. Implementors
/// provide `execute`; everything else has a sensible default.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Vec<ToolParam>;
    async fn execute(&self, ctx: &ExecutionContext, params: &Value) -> ToolResult;

    fn execution_timeout(&self) -> Duration {
        Duration::from_secs(120)
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities::default()
    }

    /// Export the `{name, description, input_schema}` shape consumed by the
    /// Router when it talks to the provider.
    fn to_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in self.parameters() {
            properties.insert(
                param.name.to_string(),
                serde_json::json!({
                    "type": param.schema_type,
                    "description": param.description,
                }),
            );
            if param.required {
                required.push(Value::String(param.name.to_string()));
            }
        }
        serde_json::json!({
            "name": self.name(),
            "description": self.description(),
            "input_schema": {
                "type": "object",
                "properties": Value::Object(properties),
                "required": required,
            }
        })
    }
}
