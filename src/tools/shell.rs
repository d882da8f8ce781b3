use crate::tools::base::{
    ActionDescriptor, ExecutionContext, SubagentAccess, Tool, ToolCapabilities, ToolParam, ToolResult,
};
use crate::utils::security_patterns::compile_security_patterns;
use crate::utils::subprocess::shell_command;
use serde_json::Value;
use std::time::Duration;

const MAX_OUTPUT_BYTES: usize = 10_000;

/// Sandboxed shell execution tool, disabled unless `allowed_commands` is
/// configured.
pub struct ExecTool {
    pub timeout: Duration,
    pub allowed_commands: Vec<String>,
}

impl ExecTool {
    pub fn new(timeout: Duration, allowed_commands: Vec<String>) -> Self {
        Self { timeout, allowed_commands }
    }

    /// The four-step admission algorithm. Returns the
    /// command to actually execute (possibly rewritten by the `bash`
    /// special case) or a security/policy error.
    fn guard_command(&self, command: &str) -> Result<String, String> {
        let patterns = compile_security_patterns().map_err(|e| e.to_string())?;
        if patterns.iter().any(|p| p.is_match(command)) {
            return Err("security policy: command matches a denied pattern".to_string());
        }

        if self.allowed_commands.is_empty() {
            return Err("security policy: no commands are allow-listed".to_string());
        }

        let leading = extract_leading_word(command);
        let admitted = self
            .allowed_commands
            .iter()
            .any(|entry| leading == *entry || leading.starts_with(&format!("{entry}/")));
        if !admitted {
            return Err(format!(
                "security policy: '{leading}' is not in the allow-list"
            ));
        }

        if self.allowed_commands.len() == 1
            && self.allowed_commands[0] == "bash"
            && !command.starts_with("bash ")
        {
            let escaped = command.replace('\'', r"'\''");
            return Ok(format!("bash -c '{escaped}'"));
        }

        Ok(command.to_string())
    }
}

fn extract_leading_word(command: &str) -> &str {
    command.trim().split_whitespace().next().unwrap_or("")
}

fn truncate_bytes(bytes: &[u8], max: usize) -> String {
    if bytes.len() <= max {
        return String::from_utf8_lossy(bytes).to_string();
    }
    let mut cut = max;
    while cut > 0 && !bytes.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... [truncated]", String::from_utf8_lossy(&bytes[..cut]))
}

#[async_trait::async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a shell command on the host, subject to an allow-list and dangerous-pattern denial."
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![ToolParam {
            name: "command",
            schema_type: "string",
            description: "the shell command to run",
            required: true,
        }]
    }

    async fn execute(&self, _ctx: &ExecutionContext, params: &Value) -> ToolResult {
        let Some(command) = params.get("command").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter: command");
        };

        let command = match self.guard_command(command) {
            Ok(cmd) => cmd,
            Err(e) => return ToolResult::error(e),
        };

        let output = tokio::time::timeout(self.timeout, shell_command(&command).output()).await;

        match output {
            Err(_) => ToolResult::error(format!(
                "command timed out after {}s",
                self.timeout.as_secs()
            )),
            Ok(Err(e)) => ToolResult::error(format!("failed to spawn command: {e}")),
            Ok(Ok(output)) => {
                let stdout = truncate_bytes(&output.stdout, MAX_OUTPUT_BYTES);
                let stderr = truncate_bytes(&output.stderr, MAX_OUTPUT_BYTES);
                let mut text = format!("{stdout}\nstderr: {stderr}");
                if !output.status.success() {
                    text.push_str(&format!(
                        "\n(exit error: {})",
                        output.status.code().map_or_else(|| "signal".to_string(), |c| c.to_string())
                    ));
                }
                let text = text.trim().to_string();
                if output.status.success() {
                    ToolResult::new(text)
                } else {
                    ToolResult::error(text)
                }
            }
        }
    }

    fn execution_timeout(&self) -> Duration {
        self.timeout + Duration::from_secs(2)
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities {
            built_in: true,
            network_outbound: false,
            subagent_access: SubagentAccess::Denied,
            actions: vec![ActionDescriptor { name: "exec", read_only: false }],
        }
    }
}
