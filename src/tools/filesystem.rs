use crate::tools::base::{
    ActionDescriptor, ExecutionContext, SubagentAccess, Tool, ToolCapabilities, ToolParam, ToolResult,
};
use crate::utils::fmt::human_bytes;
use crate::utils::path_sanitize::resolve_in_workspace;
use serde_json::Value;
use std::path::PathBuf;

const MAX_READ_BYTES: u64 = 100 * 1024;

#[cfg(unix)]
fn set_permissions(path: &std::path::Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(mode);
        let _ = std::fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_permissions(_path: &std::path::Path, _mode: u32) {}

pub struct ReadFileTool {
    pub workspace: PathBuf,
}

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file from within the workspace."
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![ToolParam {
            name: "path",
            schema_type: "string",
            description: "workspace-relative path",
            required: true,
        }]
    }

    async fn execute(&self, _ctx: &ExecutionContext, params: &Value) -> ToolResult {
        let Some(path) = params.get("path").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter: path");
        };
        let resolved = match resolve_in_workspace(&self.workspace, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let metadata = match tokio::fs::metadata(&resolved).await {
            Ok(m) => m,
            Err(e) => return ToolResult::error(format!("cannot read {path}: {e}")),
        };
        if metadata.is_dir() {
            return ToolResult::error(format!("{path} is a directory"));
        }
        if metadata.len() > MAX_READ_BYTES {
            return ToolResult::error(format!(
                "{path} is {} which exceeds the {} read limit",
                human_bytes(metadata.len()),
                human_bytes(MAX_READ_BYTES)
            ));
        }
        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => ToolResult::new(content),
            Err(e) => ToolResult::error(format!("cannot read {path}: {e}")),
        }
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities {
            built_in: true,
            network_outbound: false,
            subagent_access: SubagentAccess::Full,
            actions: vec![ActionDescriptor { name: "read", read_only: true }],
        }
    }
}

pub struct WriteFileTool {
    pub workspace: PathBuf,
}

#[async_trait::async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write a UTF-8 text file within the workspace, creating parent directories as needed."
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![
            ToolParam {
                name: "path",
                schema_type: "string",
                description: "workspace-relative path",
                required: true,
            },
            ToolParam {
                name: "content",
                schema_type: "string",
                description: "file contents",
                required: true,
            },
        ]
    }

    async fn execute(&self, _ctx: &ExecutionContext, params: &Value) -> ToolResult {
        let Some(path) = params.get("path").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter: path");
        };
        let Some(content) = params.get("content").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter: content");
        };
        let resolved = match resolve_in_workspace(&self.workspace, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::error(format!("cannot create directories for {path}: {e}"));
            }
            set_permissions(parent, 0o755);
        }
        if let Err(e) = tokio::fs::write(&resolved, content).await {
            return ToolResult::error(format!("cannot write {path}: {e}"));
        }
        set_permissions(&resolved, 0o644);
        ToolResult::new(format!("wrote {} bytes to {path}", content.len()))
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities {
            built_in: true,
            network_outbound: false,
            subagent_access: SubagentAccess::Denied,
            actions: vec![ActionDescriptor { name: "write", read_only: false }],
        }
    }
}

pub struct ListFilesTool {
    pub workspace: PathBuf,
}

#[async_trait::async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List files under a workspace-relative directory with human-readable sizes."
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![ToolParam {
            name: "path",
            schema_type: "string",
            description: "workspace-relative directory, defaults to the workspace root",
            required: false,
        }]
    }

    async fn execute(&self, _ctx: &ExecutionContext, params: &Value) -> ToolResult {
        let path = params.get("path").and_then(Value::as_str).unwrap_or(".");
        let resolved = match resolve_in_workspace(&self.workspace, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let mut entries = match tokio::fs::read_dir(&resolved).await {
            Ok(e) => e,
            Err(e) => return ToolResult::error(format!("cannot list {path}: {e}")),
        };
        let mut lines = Vec::new();
        loop {
            let next = entries.next_entry().await;
            match next {
                Ok(Some(entry)) => {
                    let name = entry.file_name().to_string_lossy().to_string();
                    let metadata = entry.metadata().await.ok();
                    let size = metadata.as_ref().map(|m| m.len()).unwrap_or(0);
                    let is_dir = metadata.as_ref().map(|m| m.is_dir()).unwrap_or(false);
                    if is_dir {
                        lines.push(format!("{name}/"));
                    } else {
                        lines.push(format!("{name}\t{}", human_bytes(size)));
                    }
                }
                Ok(None) => break,
                Err(e) => return ToolResult::error(format!("error listing {path}: {e}")),
            }
        }
        lines.sort();
        if lines.is_empty() {
            ToolResult::new(format!("{path} is empty"))
        } else {
            ToolResult::new(lines.join("\n"))
        }
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities {
            built_in: true,
            network_outbound: false,
            subagent_access: SubagentAccess::Full,
            actions: vec![ActionDescriptor { name: "list", read_only: true }],
        }
    }
}
