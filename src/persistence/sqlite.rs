use super::{Persister, PersistedSession, Pin, Reminder, status_from_str, status_to_str};
use crate::subagent::{SubAgent, SubAgentStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// SQLite-backed `Persister`, the reference implementation of the storage
/// layout. The connection lives behind a `Mutex<Connection>`; every method
/// body runs on a `tokio::task::spawn_blocking` worker so a slow query never
/// blocks the async runtime's executor threads.
pub struct SqlitePersister {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePersister {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create dir {}", dir.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite db at {}", path.display()))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS sessions (
                key TEXT PRIMARY KEY,
                messages TEXT NOT NULL,
                model TEXT NOT NULL DEFAULT '',
                profile TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sub_agents (
                id TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                task TEXT NOT NULL,
                system_prompt TEXT,
                status TEXT NOT NULL,
                result TEXT,
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                parent_session_key TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pins (
                id TEXT PRIMARY KEY,
                session_key TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS reminders (
                id TEXT PRIMARY KEY,
                channel TEXT NOT NULL,
                user_id TEXT NOT NULL,
                message TEXT NOT NULL,
                fire_at TEXT NOT NULL,
                created TEXT NOT NULL
            );
            ",
        )
        .context("failed to initialize schema")?;
        Ok(())
    }

    /// Runs `f` against the connection on a blocking-pool thread, holding
    /// the mutex only for the closure's duration.
    async fn run_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&conn)
        })
        .await
        .context("sqlite worker thread panicked")?
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl Persister for SqlitePersister {
    async fn save_session(&self, session: &PersistedSession) -> Result<()> {
        let session = session.clone();
        self.run_blocking(move |conn| {
            let messages_json = serde_json::to_string(&session.messages)?;
            conn.execute(
                "INSERT INTO sessions (key, messages, model, profile, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET messages=excluded.messages, model=excluded.model,
                    profile=excluded.profile, updated_at=excluded.updated_at",
                params![
                    session.key,
                    messages_json,
                    session.model,
                    session.profile,
                    session.updated_at.to_rfc3339()
                ],
            )
            .context("failed to upsert session")?;
            Ok(())
        })
        .await
    }

    async fn load_session(&self, key: &str) -> Result<Option<PersistedSession>> {
        let key = key.to_string();
        self.run_blocking(move |conn| {
            let row: Option<(String, String, String, String)> = conn
                .query_row(
                    "SELECT messages, model, profile, updated_at FROM sessions WHERE key = ?1",
                    params![key],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
                )
                .optional()
                .context("failed to load session")?;
            Ok(row.map(|(messages_json, model, profile, updated_at)| PersistedSession {
                key: key.clone(),
                messages: serde_json::from_str(&messages_json).unwrap_or_default(),
                model,
                profile,
                updated_at: parse_ts(&updated_at),
            }))
        })
        .await
    }

    async fn delete_session(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.run_blocking(move |conn| {
            conn.execute("DELETE FROM sessions WHERE key = ?1", params![key])
                .context("failed to delete session")?;
            Ok(())
        })
        .await
    }

    async fn load_all_sessions(&self) -> Result<Vec<PersistedSession>> {
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare("SELECT key, messages, model, profile, updated_at FROM sessions")?;
            let rows = stmt
                .query_map([], |r| {
                    let key: String = r.get(0)?;
                    let messages_json: String = r.get(1)?;
                    let model: String = r.get(2)?;
                    let profile: String = r.get(3)?;
                    let updated_at: String = r.get(4)?;
                    Ok((key, messages_json, model, profile, updated_at))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to read sessions")?;
            Ok(rows
                .into_iter()
                .map(|(key, messages_json, model, profile, updated_at)| PersistedSession {
                    key,
                    messages: serde_json::from_str(&messages_json).unwrap_or_default(),
                    model,
                    profile,
                    updated_at: parse_ts(&updated_at),
                })
                .collect())
        })
        .await
    }

    async fn save_subagent(&self, agent: &SubAgent) -> Result<()> {
        let agent = agent.clone();
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO sub_agents (id, label, task, system_prompt, status, result, error, started_at, completed_at, parent_session_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET label=excluded.label, task=excluded.task,
                    system_prompt=excluded.system_prompt, status=excluded.status, result=excluded.result,
                    error=excluded.error, started_at=excluded.started_at, completed_at=excluded.completed_at,
                    parent_session_key=excluded.parent_session_key",
                params![
                    agent.id,
                    agent.label,
                    agent.task,
                    agent.system_prompt,
                    status_to_str(agent.status),
                    agent.result,
                    agent.error,
                    agent.started_at.to_rfc3339(),
                    agent.completed_at.map(|t| t.to_rfc3339()),
                    agent.parent_session_key,
                ],
            )
            .context("failed to upsert sub-agent")?;
            Ok(())
        })
        .await
    }

    async fn load_all_subagents(&self) -> Result<Vec<SubAgent>> {
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, label, task, system_prompt, status, result, error, started_at, completed_at, parent_session_key FROM sub_agents",
            )?;
            let rows = stmt
                .query_map([], |r| {
                    let completed_at: Option<String> = r.get(8)?;
                    Ok(SubAgent {
                        id: r.get(0)?,
                        label: r.get(1)?,
                        task: r.get(2)?,
                        system_prompt: r.get(3)?,
                        status: status_from_str(&r.get::<_, String>(4)?),
                        result: r.get(5)?,
                        error: r.get(6)?,
                        started_at: parse_ts(&r.get::<_, String>(7)?),
                        completed_at: completed_at.map(|s| parse_ts(&s)),
                        parent_session_key: r.get(9)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to read sub-agents")?;
            Ok(rows)
        })
        .await
    }

    async fn save_pin(&self, pin: &Pin) -> Result<()> {
        let pin = pin.clone();
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO pins (id, session_key, text, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET session_key=excluded.session_key, text=excluded.text,
                    created_at=excluded.created_at",
                params![pin.id, pin.session_key, pin.text, pin.created_at.to_rfc3339()],
            )
            .context("failed to upsert pin")?;
            Ok(())
        })
        .await
    }

    async fn load_pins(&self, session_key: &str) -> Result<Vec<Pin>> {
        let session_key = session_key.to_string();
        self.run_blocking(move |conn| {
            let mut stmt =
                conn.prepare("SELECT id, session_key, text, created_at FROM pins WHERE session_key = ?1")?;
            let rows = stmt
                .query_map(params![session_key], |r| {
                    Ok(Pin {
                        id: r.get(0)?,
                        session_key: r.get(1)?,
                        text: r.get(2)?,
                        created_at: parse_ts(&r.get::<_, String>(3)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to read pins")?;
            Ok(rows)
        })
        .await
    }

    async fn delete_pin(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            conn.execute("DELETE FROM pins WHERE id = ?1", params![id])
                .context("failed to delete pin")?;
            Ok(())
        })
        .await
    }

    async fn save_reminder(&self, reminder: &Reminder) -> Result<()> {
        let reminder = reminder.clone();
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO reminders (id, channel, user_id, message, fire_at, created) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET channel=excluded.channel, user_id=excluded.user_id,
                    message=excluded.message, fire_at=excluded.fire_at, created=excluded.created",
                params![
                    reminder.id,
                    reminder.channel,
                    reminder.user_id,
                    reminder.message,
                    reminder.fire_at.to_rfc3339(),
                    reminder.created.to_rfc3339(),
                ],
            )
            .context("failed to upsert reminder")?;
            Ok(())
        })
        .await
    }

    async fn load_reminders(&self) -> Result<Vec<Reminder>> {
        self.run_blocking(move |conn| {
            let mut stmt =
                conn.prepare("SELECT id, channel, user_id, message, fire_at, created FROM reminders")?;
            let rows = stmt
                .query_map([], |r| {
                    Ok(Reminder {
                        id: r.get(0)?,
                        channel: r.get(1)?,
                        user_id: r.get(2)?,
                        message: r.get(3)?,
                        fire_at: parse_ts(&r.get::<_, String>(4)?),
                        created: parse_ts(&r.get::<_, String>(5)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to read reminders")?;
            Ok(rows)
        })
        .await
    }

    async fn delete_reminder(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            conn.execute("DELETE FROM reminders WHERE id = ?1", params![id])
                .context("failed to delete reminder")?;
            Ok(())
        })
        .await
    }
}

#[allow(dead_code)]
fn _status_roundtrip_sanity(status: SubAgentStatus) -> SubAgentStatus {
    status_from_str(status_to_str(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[tokio::test]
    async fn session_save_load_roundtrip() {
        let db = SqlitePersister::open_in_memory().unwrap();
        let session = PersistedSession {
            key: "telegram:42".to_string(),
            messages: vec![Message::user("telegram", "42", "hi")],
            model: "claude".to_string(),
            profile: "default".to_string(),
            updated_at: Utc::now(),
        };
        db.save_session(&session).await.unwrap();
        let loaded = db.load_session("telegram:42").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].text, "hi");
    }

    #[tokio::test]
    async fn session_upsert_overwrites() {
        let db = SqlitePersister::open_in_memory().unwrap();
        let mut session = PersistedSession {
            key: "k".to_string(),
            messages: vec![],
            model: "a".to_string(),
            profile: String::new(),
            updated_at: Utc::now(),
        };
        db.save_session(&session).await.unwrap();
        session.model = "b".to_string();
        db.save_session(&session).await.unwrap();
        let all = db.load_all_sessions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].model, "b");
    }

    #[tokio::test]
    async fn subagent_roundtrip() {
        let db = SqlitePersister::open_in_memory().unwrap();
        let agent = SubAgent {
            id: "abc123".to_string(),
            label: "math".to_string(),
            task: "sum 2+2".to_string(),
            system_prompt: None,
            status: SubAgentStatus::Done,
            result: Some("4".to_string()),
            error: None,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            parent_session_key: "api:1".to_string(),
        };
        db.save_subagent(&agent).await.unwrap();
        let all = db.load_all_subagents().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, SubAgentStatus::Done);
        assert_eq!(all[0].result.as_deref(), Some("4"));
    }

    #[tokio::test]
    async fn pin_save_load_and_delete() {
        let db = SqlitePersister::open_in_memory().unwrap();
        let pin = Pin {
            id: "p1".to_string(),
            session_key: "k".to_string(),
            text: "remember this".to_string(),
            created_at: Utc::now(),
        };
        db.save_pin(&pin).await.unwrap();
        assert_eq!(db.load_pins("k").await.unwrap().len(), 1);
        db.delete_pin("p1").await.unwrap();
        assert_eq!(db.load_pins("k").await.unwrap().len(), 0);
    }
}
