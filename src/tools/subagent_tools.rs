use crate::subagent::SubagentManager;
use crate::tools::base::{
    ActionDescriptor, ExecutionContext, SubagentAccess, Tool, ToolCapabilities, ToolParam, ToolResult,
};
use serde_json::Value;

/// `spawn_agent` — the only way the model reaches `SubagentManager::spawn`.
/// Never present in a registry handed to a sub-agent.
pub struct SpawnAgentTool {
    pub manager: SubagentManager,
}

#[async_trait::async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        "Spawn a background sub-agent to work on a task asynchronously."
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![
            ToolParam {
                name: "task",
                schema_type: "string",
                description: "the task for the sub-agent to perform",
                required: true,
            },
            ToolParam {
                name: "label",
                schema_type: "string",
                description: "short human-readable label for the sub-agent",
                required: false,
            },
            ToolParam {
                name: "system_prompt",
                schema_type: "string",
                description: "optional system prompt override",
                required: false,
            },
        ]
    }

    async fn execute(&self, ctx: &ExecutionContext, params: &Value) -> ToolResult {
        let Some(task) = params.get("task").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter: task");
        };
        let label = params.get("label").and_then(Value::as_str).map(str::to_string);
        let system_prompt = params
            .get("system_prompt")
            .and_then(Value::as_str)
            .map(str::to_string);
        let parent_session_key = format!("{}:{}", ctx.channel, ctx.chat_id);
        let id = self
            .manager
            .spawn(task.to_string(), label, system_prompt, parent_session_key)
            .await;
        ToolResult::new(format!("Sub-agent spawned with id {id}"))
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities {
            built_in: true,
            network_outbound: false,
            subagent_access: SubagentAccess::Denied,
            actions: vec![ActionDescriptor { name: "spawn", read_only: false }],
        }
    }
}

pub struct AgentStatusTool {
    pub manager: SubagentManager,
}

#[async_trait::async_trait]
impl Tool for AgentStatusTool {
    fn name(&self) -> &str {
        "agent_status"
    }

    fn description(&self) -> &str {
        "Check the status of a previously spawned sub-agent."
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![ToolParam {
            name: "id",
            schema_type: "string",
            description: "the sub-agent id returned by spawn_agent",
            required: true,
        }]
    }

    async fn execute(&self, _ctx: &ExecutionContext, params: &Value) -> ToolResult {
        let Some(id) = params.get("id").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter: id");
        };
        match self.manager.get(id).await {
            Some(agent) => ToolResult::new(format!(
                "id={} label={} status={:?} result={:?} error={:?}",
                agent.id, agent.label, agent.status, agent.result, agent.error
            )),
            None => ToolResult::error(format!("no sub-agent with id {id}")),
        }
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities {
            built_in: true,
            network_outbound: false,
            subagent_access: SubagentAccess::ReadOnly,
            actions: vec![ActionDescriptor { name: "status", read_only: true }],
        }
    }
}

pub struct CancelAgentTool {
    pub manager: SubagentManager,
}

#[async_trait::async_trait]
impl Tool for CancelAgentTool {
    fn name(&self) -> &str {
        "cancel_agent"
    }

    fn description(&self) -> &str {
        "Cancel a pending or running sub-agent."
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![ToolParam {
            name: "id",
            schema_type: "string",
            description: "the sub-agent id to cancel",
            required: true,
        }]
    }

    async fn execute(&self, _ctx: &ExecutionContext, params: &Value) -> ToolResult {
        let Some(id) = params.get("id").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter: id");
        };
        match self.manager.cancel(id).await {
            Ok(()) => ToolResult::new(format!("canceled sub-agent {id}")),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities {
            built_in: true,
            network_outbound: false,
            subagent_access: SubagentAccess::Denied,
            actions: vec![ActionDescriptor { name: "cancel", read_only: false }],
        }
    }
}
