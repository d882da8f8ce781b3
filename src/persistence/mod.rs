mod sqlite;

pub use sqlite::SqlitePersister;

use crate::message::Message;
use crate::subagent::{SubAgent, SubAgentStatus};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A durable session record as stored by a `Persister`
/// (`sessions(key PK, messages JSON, model, updated_at)`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub key: String,
    pub messages: Vec<Message>,
    pub model: String,
    pub profile: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pin {
    pub id: String,
    pub session_key: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A scheduled reminder row. No component in this crate currently fires
/// reminders — the table is carried ready for a future scheduler to drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub channel: String,
    pub user_id: String,
    pub message: String,
    pub fire_at: DateTime<Utc>,
    pub created: DateTime<Utc>,
}

/// Durable key/value persister contract consumed by the core. Concrete
/// storage engines are external collaborators; this crate
/// provides one reference implementation (`SqlitePersister`) and keeps the
/// core generic over the trait so an alternative engine can be substituted.
#[async_trait]
pub trait Persister: Send + Sync {
    async fn save_session(&self, session: &PersistedSession) -> Result<()>;
    async fn load_session(&self, key: &str) -> Result<Option<PersistedSession>>;
    async fn delete_session(&self, key: &str) -> Result<()>;
    async fn load_all_sessions(&self) -> Result<Vec<PersistedSession>>;

    async fn save_subagent(&self, agent: &SubAgent) -> Result<()>;
    async fn load_all_subagents(&self) -> Result<Vec<SubAgent>>;

    async fn save_pin(&self, pin: &Pin) -> Result<()>;
    async fn load_pins(&self, session_key: &str) -> Result<Vec<Pin>>;
    async fn delete_pin(&self, id: &str) -> Result<()>;

    async fn save_reminder(&self, reminder: &Reminder) -> Result<()>;
    async fn load_reminders(&self) -> Result<Vec<Reminder>>;
    async fn delete_reminder(&self, id: &str) -> Result<()>;
}

/// Serialise a `SubAgentStatus` to the flat string the `sub_agents` table
/// column stores.
pub fn status_to_str(status: SubAgentStatus) -> &'static str {
    match status {
        SubAgentStatus::Pending => "pending",
        SubAgentStatus::Running => "running",
        SubAgentStatus::Done => "done",
        SubAgentStatus::Failed => "failed",
        SubAgentStatus::Canceled => "canceled",
    }
}

pub fn status_from_str(s: &str) -> SubAgentStatus {
    match s {
        "running" => SubAgentStatus::Running,
        "done" => SubAgentStatus::Done,
        "failed" => SubAgentStatus::Failed,
        "canceled" => SubAgentStatus::Canceled,
        _ => SubAgentStatus::Pending,
    }
}
