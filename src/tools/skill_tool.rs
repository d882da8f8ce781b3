use crate::skills::SkillsLoader;
use crate::tools::base::{
    ActionDescriptor, ExecutionContext, SubagentAccess, Tool, ToolCapabilities, ToolParam, ToolResult,
};
use serde_json::Value;
use std::sync::Arc;

/// Exposes workspace `SKILL.md` files to the model. Re-registered on every
/// hot reload after the workspace is rescanned.
pub struct ReadSkillTool {
    pub loader: Arc<SkillsLoader>,
}

#[async_trait::async_trait]
impl Tool for ReadSkillTool {
    fn name(&self) -> &str {
        "read_skill"
    }

    fn description(&self) -> &str {
        "Read a workspace skill's SKILL.md by name. Call with no name to list available skills."
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![ToolParam {
            name: "name",
            schema_type: "string",
            description: "skill name, omit to list all available skills",
            required: false,
        }]
    }

    async fn execute(&self, _ctx: &ExecutionContext, params: &Value) -> ToolResult {
        match params.get("name").and_then(Value::as_str) {
            None | Some("") => {
                let names = self.loader.list_skills();
                if names.is_empty() {
                    ToolResult::new("no skills available")
                } else {
                    ToolResult::new(names.join("\n"))
                }
            }
            Some(name) => match self.loader.load_skill(name) {
                Some(content) => ToolResult::new(content),
                None => ToolResult::error(format!("no such skill: {name}")),
            },
        }
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities {
            built_in: true,
            network_outbound: false,
            subagent_access: SubagentAccess::Full,
            actions: vec![ActionDescriptor { name: "read_skill", read_only: true }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_then_reads_a_skill() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("skills/alpha")).unwrap();
        std::fs::write(dir.path().join("skills/alpha/SKILL.md"), "alpha content").unwrap();
        let tool = ReadSkillTool { loader: Arc::new(SkillsLoader::new(dir.path())) };
        let ctx = ExecutionContext::new("api", "1");

        let listed = tool.execute(&ctx, &serde_json::json!({})).await;
        assert_eq!(listed.content, "alpha");

        let read = tool.execute(&ctx, &serde_json::json!({"name": "alpha"})).await;
        assert_eq!(read.content, "alpha content");
    }

    #[tokio::test]
    async fn unknown_skill_errors() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadSkillTool { loader: Arc::new(SkillsLoader::new(dir.path())) };
        let ctx = ExecutionContext::new("api", "1");
        let result = tool.execute(&ctx, &serde_json::json!({"name": "missing"})).await;
        assert!(result.is_error);
    }
}
