use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

fn default_true() -> bool {
    true
}

/// `agent` config section: which provider/model the Router should use.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub max_context_tokens: Option<usize>,
    #[serde(default)]
    pub keep_last_n: Option<usize>,
    #[serde(flatten)]
    pub overflow: HashMap<String, Value>,
}

/// One entry under `channels.*`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub allow_list: Vec<String>,
    #[serde(flatten)]
    pub overflow: HashMap<String, Value>,
}

/// `tools.exec` config section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecToolConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(flatten)]
    pub overflow: HashMap<String, Value>,
}

/// `tools.file` config section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileToolConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub workspace: String,
    #[serde(flatten)]
    pub overflow: HashMap<String, Value>,
}

/// `browser` config section — an external collaborator;
/// only its enable flag is consulted by graceful shutdown.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BrowserConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub overflow: HashMap<String, Value>,
}

/// `heartbeat` config section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub interval_seconds: Option<u64>,
    #[serde(flatten)]
    pub overflow: HashMap<String, Value>,
}

/// `workspace` config section: the root `file_read`/`file_write`/`file_list`
/// operate within.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub root: String,
    #[serde(flatten)]
    pub overflow: HashMap<String, Value>,
}

/// `log` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(flatten)]
    pub overflow: HashMap<String, Value>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level(), overflow: HashMap::new() }
    }
}

/// `hooks` config section: arbitrary named webhook endpoints under `/hooks/*`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HooksConfig {
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(flatten)]
    pub overflow: HashMap<String, Value>,
}

/// `metrics` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(flatten)]
    pub overflow: HashMap<String, Value>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true, bearer_token: None, overflow: HashMap::new() }
    }
}

/// `admin` config section: dashboard/API bearer auth.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdminConfig {
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(flatten)]
    pub overflow: HashMap<String, Value>,
}

/// Top-level, deeply-immutable config bag. The running process holds
/// exactly one snapshot; hot reload
/// atomically swaps it wholesale, never mutates one in place.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub exec: ExecToolConfig,
    #[serde(default)]
    pub file: FileToolConfig,
}
