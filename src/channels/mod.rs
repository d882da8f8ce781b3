use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

const NOTIFICATION_TRUNCATE_CHARS: usize = 500;

/// The out-of-scope messaging-channel transport, modelled
/// only by the method surface the core consumes: pushing a notification to
/// a user outside the request/response cycle (e.g. a sub-agent completion
/// notice), truncated to 500 chars.
#[async_trait]
pub trait PushChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn send_notification(&self, user_id: &str, text: &str) -> Result<()>;
}

/// Registry of push-capable channels keyed by channel tag, plus the
/// per-channel allow-list consulted at hot reload. Concrete transports
/// (Telegram, Discord, ...) are external collaborators; this crate ships no
/// transport implementation, only the facade contract and an in-memory test
/// double.
pub struct ChannelFacade {
    channels: RwLock<HashMap<String, Arc<dyn PushChannel>>>,
    allow_list: RwLock<HashSet<String>>,
}

impl Default for ChannelFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelFacade {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            allow_list: RwLock::new(HashSet::new()),
        }
    }

    pub async fn register(&self, channel: Arc<dyn PushChannel>) {
        self.channels.write().await.insert(channel.name().to_string(), channel);
    }

    /// Replaces the allow-list in place without touching registered
    /// transports.
    pub async fn replace_allow_list(&self, allowed: impl IntoIterator<Item = String>) {
        *self.allow_list.write().await = allowed.into_iter().collect();
    }

    pub async fn is_allowed(&self, user_id: &str) -> bool {
        let allow_list = self.allow_list.read().await;
        allow_list.is_empty() || allow_list.contains(user_id)
    }

    /// Best-effort push, truncated to a fixed length. Failures are logged,
    /// never propagated — notification delivery is not part of the request
    /// lifecycle's success/failure contract.
    pub async fn push(&self, channel: &str, user_id: &str, text: &str) {
        let Some(transport) = self.channels.read().await.get(channel).cloned() else {
            return;
        };
        let truncated: String = text.chars().take(NOTIFICATION_TRUNCATE_CHARS).collect();
        if let Err(e) = transport.send_notification(user_id, &truncated).await {
            warn!(channel, error = %e, "failed to push notification");
        }
    }

    /// Stops accepting new inbound traffic through registered transports.
    /// Concrete transports decide what "stop" means for their own
    /// connection; this facade only forgets them so
    /// subsequent pushes are no-ops.
    pub async fn stop(&self) {
        self.channels.write().await.clear();
    }
}

/// Delegate for slash-commands, which bypass rate-limiter admission.
/// Replaced wholesale on hot reload.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Returns `Some(reply)` if `text` was recognised as a command.
    async fn handle(&self, channel: &str, user_id: &str, text: &str) -> Option<String>;
}

pub fn is_slash_command(text: &str) -> bool {
    text.trim_start().starts_with('/')
}

/// Minimal built-in command set grounded directly in core components:
/// `/status` and `/cancel <id>` delegate to the Sub-agent Manager (the same
/// operations the `agent_status`/`cancel_agent` tools expose to the
/// model), `/help` lists them. Unrecognised `/`-prefixed text still counts
/// as a command (bypasses the rate limiter) but gets a fallback reply.
pub struct DefaultCommandHandler {
    subagents: crate::subagent::SubagentManager,
}

impl DefaultCommandHandler {
    pub fn new(subagents: crate::subagent::SubagentManager) -> Self {
        Self { subagents }
    }
}

#[async_trait]
impl CommandHandler for DefaultCommandHandler {
    async fn handle(&self, _channel: &str, _user_id: &str, text: &str) -> Option<String> {
        let trimmed = text.trim();
        if !is_slash_command(trimmed) {
            return None;
        }
        let mut parts = trimmed.splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        let reply = match command {
            "/help" => "Available commands: /help, /status, /cancel <id>".to_string(),
            "/status" => {
                let agents = self.subagents.list().await;
                if agents.is_empty() {
                    "no sub-agents tracked".to_string()
                } else {
                    agents
                        .iter()
                        .map(|a| format!("{} [{}] {:?}", a.id, a.label, a.status))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            "/cancel" if !rest.is_empty() => match self.subagents.cancel(rest).await {
                Ok(()) => format!("canceled sub-agent {rest}"),
                Err(e) => e.to_string(),
            },
            _ => format!("unrecognised command: {command}"),
        };
        Some(reply)
    }
}
