//! Spawning a sub-agent and observing its completion message land back in
//! the parent session.
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use waygate::channels::ChannelFacade;
use waygate::coordinator::RequestCoordinator;
use waygate::session::{SessionManager, SessionStore};
use waygate::subagent::{SubagentManager, SubagentManagerConfig, SubagentRunner};
use waygate::tools::base::{ExecutionContext, Tool, ToolResult};
use waygate::tools::subagent_tools::SpawnAgentTool;
use waygate::tools::ToolRegistry;

struct SumRunner;

#[async_trait]
impl SubagentRunner for SumRunner {
    async fn run(&self, _task: &str, _system_prompt: &str, _tools: Arc<ToolRegistry>, _max_iterations: u32) -> anyhow::Result<String> {
        Ok("4".to_string())
    }
}

#[tokio::test]
async fn spawn_to_completion_delivers_result_to_parent_session() {
    let tools = Arc::new(ToolRegistry::new());
    let sessions: Arc<dyn SessionStore> = Arc::new(SessionManager::new(None));
    let channels = Arc::new(ChannelFacade::new());
    let on_complete = RequestCoordinator::completion_callback(sessions.clone(), channels);
    let manager = SubagentManager::new(Arc::new(SumRunner), tools, on_complete, SubagentManagerConfig::default());

    let spawn_tool = SpawnAgentTool { manager: manager.clone() };
    let ctx = ExecutionContext::new("api", "7");
    let params = serde_json::json!({"task": "sum 2+2", "label": "math"});
    let result: ToolResult = spawn_tool.execute(&ctx, &params).await;

    assert!(!result.is_error);
    assert!(result.content.contains("Sub-agent spawned"));

    // give the background worker a moment to finish and invoke the callback.
    for _ in 0..50 {
        let session = sessions.get("api:7").await;
        if let Some(session) = &session {
            if session.messages.iter().any(|m| m.is_bot) {
                let last = session.messages.last().unwrap();
                assert!(last.text.starts_with("[Sub-agent \"math\" completed]"), "unexpected text: {}", last.text);
                assert_eq!(last.metadata.subagent_result, Some(true));
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("sub-agent completion was never delivered to the parent session");
}
