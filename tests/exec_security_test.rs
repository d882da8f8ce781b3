//! A dangerous command is rejected by `exec`'s admission policy regardless
//! of the allow-list.
use std::time::Duration;
use waygate::tools::base::{ExecutionContext, Tool};
use waygate::tools::shell::ExecTool;

#[tokio::test]
async fn dangerous_command_denied_even_when_leading_word_is_allowed() {
    let tool = ExecTool::new(Duration::from_secs(5), vec!["rm".to_string()]);
    let ctx = ExecutionContext::new("api", "1");
    let params = serde_json::json!({"command": "rm -rf /"});

    let result = tool.execute(&ctx, &params).await;

    assert!(result.is_error);
    assert!(result.content.contains("security policy"), "unexpected message: {}", result.content);
}

#[tokio::test]
async fn command_outside_allow_list_is_denied() {
    let tool = ExecTool::new(Duration::from_secs(5), vec!["echo".to_string()]);
    let ctx = ExecutionContext::new("api", "1");
    let params = serde_json::json!({"command": "ls -la"});

    let result = tool.execute(&ctx, &params).await;

    assert!(result.is_error);
    assert!(result.content.contains("security policy"));
}
