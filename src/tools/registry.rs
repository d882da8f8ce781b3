use crate::metrics::Metrics;
use crate::tools::base::{ExecutionContext, SubagentAccess, Tool, ToolResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

const DEFAULT_MAX_RESULT_CHARS: usize = 10_000;

/// Schema dialect requested by `schema_export`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaDialect {
    Anthropic,
    OpenAi,
}

/// Read-only wrapper that rejects any tool whose capabilities are not
/// read-only, used when a sub-agent is granted `SubagentAccess::ReadOnly`.
struct ReadOnlyToolWrapper {
    inner: Arc<dyn Tool>,
}

#[async_trait::async_trait]
impl Tool for ReadOnlyToolWrapper {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters(&self) -> Vec<crate::tools::base::ToolParam> {
        self.inner.parameters()
    }

    async fn execute(&self, ctx: &ExecutionContext, params: &Value) -> ToolResult {
        let caps = self.inner.capabilities();
        let write_actions: Vec<_> = caps.actions.iter().filter(|a| !a.read_only).collect();
        if !write_actions.is_empty() {
            return ToolResult::error(format!(
                "tool '{}' is restricted to read-only access for this sub-agent",
                self.inner.name()
            ));
        }
        self.inner.execute(ctx, params).await
    }

    fn execution_timeout(&self) -> std::time::Duration {
        self.inner.execution_timeout()
    }

    fn capabilities(&self) -> crate::tools::base::ToolCapabilities {
        self.inner.capabilities()
    }
}

/// Before/after hooks around every tool call, chained through the registry.
/// Caching is deliberately not part of this pipeline — see `DESIGN.md`.
#[async_trait::async_trait]
pub trait ToolMiddleware: Send + Sync {
    async fn before_execute(&self, _tool_name: &str, _params: &Value) {}
    async fn after_execute(&self, _tool_name: &str, _result: &mut ToolResult) {}
}

struct LoggingMiddleware;

#[async_trait::async_trait]
impl ToolMiddleware for LoggingMiddleware {
    async fn before_execute(&self, tool_name: &str, _params: &Value) {
        info!(tool = tool_name, "executing tool");
    }

    async fn after_execute(&self, tool_name: &str, result: &mut ToolResult) {
        if result.is_error {
            warn!(tool = tool_name, error = %result.content, "tool returned an error");
        }
    }
}

struct TruncationMiddleware {
    max_chars: usize,
}

#[async_trait::async_trait]
impl ToolMiddleware for TruncationMiddleware {
    async fn after_execute(&self, _tool_name: &str, result: &mut ToolResult) {
        if result.content.chars().count() > self.max_chars {
            let truncated: String = result.content.chars().take(self.max_chars).collect();
            result.content = format!("{truncated}\n... [truncated]");
        }
    }
}

struct MetricsMiddleware {
    metrics: Arc<Metrics>,
}

#[async_trait::async_trait]
impl ToolMiddleware for MetricsMiddleware {
    async fn before_execute(&self, tool_name: &str, _params: &Value) {
        self.metrics.record_tool_call(tool_name);
    }

    async fn after_execute(&self, tool_name: &str, result: &mut ToolResult) {
        if result.is_error {
            self.metrics.record_tool_error(tool_name);
        }
    }
}

/// Thread-safe `name -> Tool` index with schema export and sub-agent
/// filtering.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    middleware: Vec<Arc<dyn ToolMiddleware>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_middleware(vec![
            Arc::new(TruncationMiddleware { max_chars: DEFAULT_MAX_RESULT_CHARS }),
            Arc::new(LoggingMiddleware),
        ])
    }

    /// Same pipeline as `new`, plus a metrics middleware recording
    /// `waygate_tool_calls_total`/`waygate_tool_errors_total` per tool.
    pub fn with_metrics(metrics: Arc<Metrics>) -> Self {
        Self::with_middleware(vec![
            Arc::new(TruncationMiddleware { max_chars: DEFAULT_MAX_RESULT_CHARS }),
            Arc::new(MetricsMiddleware { metrics }),
            Arc::new(LoggingMiddleware),
        ])
    }

    fn with_middleware(middleware: Vec<Arc<dyn ToolMiddleware>>) -> Self {
        Self { tools: RwLock::new(HashMap::new()), middleware }
    }

    /// Registers a tool, last-writer-wins on name collision, used by hot
    /// reload to refresh derived tools such as `read_skill`.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if name.is_empty() || name.len() > 128 || name.chars().any(|c| c.is_control()) {
            warn!(name = %name, "refusing to register tool with invalid name");
            return;
        }
        let mut tools = self.tools.write().await;
        if tools.contains_key(&name) {
            warn!(name = %name, "tool name already registered, overwriting");
        }
        tools.insert(name, tool);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }

    /// Runs the full middleware pipeline around the tool's own `execute`,
    /// under a spawned task + timeout so a panicking handler is caught.
    pub async fn execute(&self, name: &str, ctx: &ExecutionContext, params: &Value) -> ToolResult {
        let Some(tool) = self.get(name).await else {
            return ToolResult::error(format!("unknown tool: {name}"));
        };

        for mw in &self.middleware {
            mw.before_execute(name, params).await;
        }

        let mut result = self.execute_with_guards(tool, ctx, params).await;

        for mw in self.middleware.iter().rev() {
            mw.after_execute(name, &mut result).await;
        }
        result
    }

    async fn execute_with_guards(
        &self,
        tool: Arc<dyn Tool>,
        ctx: &ExecutionContext,
        params: &Value,
    ) -> ToolResult {
        let ctx = ctx.clone();
        let params = params.clone();
        let timeout = tool.execution_timeout();
        let handle = tokio::spawn(async move { tool.execute(&ctx, &params).await });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                if join_err.is_panic() {
                    let panic = join_err.into_panic();
                    let message = panic
                        .downcast_ref::<String>()
                        .cloned()
                        .or_else(|| panic.downcast_ref::<&str>().map(|s| (*s).to_string()))
                        .unwrap_or_else(|| "tool handler panicked".to_string());
                    ToolResult::error(format!("tool panicked: {message}"))
                } else {
                    ToolResult::error("tool execution was cancelled".to_string())
                }
            }
            Err(_) => ToolResult::error(format!(
                "tool timed out after {:.0}s",
                timeout.as_secs_f64()
            )),
        }
    }

    /// Export schemas in the requested dialect.
    pub async fn schema_export(&self, dialect: SchemaDialect) -> Vec<Value> {
        let tools = self.tools.read().await;
        tools
            .values()
            .map(|tool| match dialect {
                SchemaDialect::Anthropic => tool.to_schema(),
                SchemaDialect::OpenAi => {
                    let anthropic = tool.to_schema();
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": anthropic["name"],
                            "description": anthropic["description"],
                            "parameters": anthropic["input_schema"],
                        }
                    })
                }
            })
            .collect()
    }

    /// Produces a new registry for a sub-agent: `spawn_agent` is always
    /// removed (no recursive spawning); other tools pass through, are
    /// wrapped read-only, or are dropped per `access_for`. The original
    /// registry is untouched.
    pub async fn filtered_for_subagent(
        &self,
        access_for: impl Fn(&str) -> SubagentAccess,
    ) -> Arc<ToolRegistry> {
        let filtered = ToolRegistry::with_middleware(self.middleware.clone());
        let tools = self.tools.read().await;
        for (name, tool) in tools.iter() {
            if name == "spawn_agent" {
                continue;
            }
            match access_for(name) {
                SubagentAccess::Denied => continue,
                SubagentAccess::Full => {
                    filtered.register(tool.clone()).await;
                }
                SubagentAccess::ReadOnly => {
                    filtered
                        .register(Arc::new(ReadOnlyToolWrapper { inner: tool.clone() }))
                        .await;
                }
            }
        }
        Arc::new(filtered)
    }
}
