use crate::message::{parse_session_key, session_key, Message};
use crate::persistence::{Persister, PersistedSession};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

const MAX_CACHED_SESSIONS: usize = 64;

/// Per-`channel:user_id` conversation state.
/// Messages are append-only from the outside; the only mutation to
/// existing messages is the compaction operation's prefix replacement.
#[derive(Debug, Clone)]
pub struct Session {
    pub key: String,
    pub messages: Vec<Message>,
    pub model: String,
    pub profile: String,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    fn new(key: String) -> Self {
        Self {
            key,
            messages: Vec::new(),
            model: String::new(),
            profile: String::new(),
            last_activity: Utc::now(),
        }
    }

    fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.last_activity = Utc::now();
    }

    fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            key: self.key.clone(),
            messages: self.messages.clone(),
            model: self.model.clone(),
            profile: self.profile.clone(),
            updated_at: self.last_activity,
        }
    }

    fn from_persisted(p: PersistedSession) -> Self {
        Self {
            key: p.key,
            messages: p.messages,
            model: p.model,
            profile: p.profile,
            last_activity: p.updated_at,
        }
    }
}

/// The contract the Coordinator and Router depend on, kept as a trait so
/// the in-memory/persisted implementation can be swapped in tests.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_or_create(&self, channel: &str, user_id: &str) -> Session;
    async fn get(&self, key: &str) -> Option<Session>;
    async fn append_message(&self, channel: &str, user_id: &str, message: Message) -> Result<Session>;
    async fn replace_history(&self, key: &str, messages: Vec<Message>) -> Result<()>;
    async fn save(&self, session: &Session) -> Result<()>;
    async fn active_sessions_count(&self) -> usize;
    async fn save_all(&self) -> Result<()>;
}

/// Keyed map `(channel,user) -> Session`, backed by an LRU cache in front of
/// a `Persister`, with a per-session-key lock serialising concurrent
/// appends to the same key, using a double-checked-lock cache pattern.
pub struct SessionManager {
    persister: Option<Arc<dyn Persister>>,
    cache: Mutex<LruCache<String, Session>>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(persister: Option<Arc<dyn Persister>>) -> Self {
        Self {
            persister,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(MAX_CACHED_SESSIONS).unwrap())),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn load_or_create(&self, key: &str) -> Session {
        {
            let mut cache = self.cache.lock().await;
            if let Some(session) = cache.get(key) {
                return session.clone();
            }
        }
        if let Some(persister) = &self.persister {
            match persister.load_session(key).await {
                Ok(Some(persisted)) => {
                    let session = Session::from_persisted(persisted);
                    self.cache.lock().await.put(key.to_string(), session.clone());
                    return session;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, key, "failed to load session from persister, starting fresh"),
            }
        }
        let mut cache = self.cache.lock().await;
        if let Some(session) = cache.get(key) {
            return session.clone();
        }
        let session = Session::new(key.to_string());
        cache.put(key.to_string(), session.clone());
        session
    }
}

#[async_trait]
impl SessionStore for SessionManager {
    async fn get_or_create(&self, channel: &str, user_id: &str) -> Session {
        let key = session_key(channel, user_id);
        self.load_or_create(&key).await
    }

    async fn get(&self, key: &str) -> Option<Session> {
        if let Some(session) = self.cache.lock().await.get(key) {
            return Some(session.clone());
        }
        let persister = self.persister.as_ref()?;
        persister.load_session(key).await.ok().flatten().map(Session::from_persisted)
    }

    async fn append_message(&self, channel: &str, user_id: &str, message: Message) -> Result<Session> {
        let key = session_key(channel, user_id);
        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;

        let mut session = self.load_or_create(&key).await;
        session.push_message(message);
        self.cache.lock().await.put(key.clone(), session.clone());
        self.save(&session).await?;
        Ok(session)
    }

    async fn replace_history(&self, key: &str, messages: Vec<Message>) -> Result<()> {
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;

        let mut session = self.load_or_create(key).await;
        session.messages = messages;
        session.last_activity = Utc::now();
        self.cache.lock().await.put(key.to_string(), session.clone());
        self.save(&session).await
    }

    async fn save(&self, session: &Session) -> Result<()> {
        if let Some(persister) = &self.persister {
            if let Err(e) = persister.save_session(&session.to_persisted()).await {
                warn!(error = %e, key = %session.key, "failed to persist session, in-memory state remains authoritative");
            }
        }
        Ok(())
    }

    async fn active_sessions_count(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Saves every cached session to the persister, used by graceful
    /// shutdown.
    async fn save_all(&self) -> Result<()> {
        let Some(persister) = &self.persister else {
            return Ok(());
        };
        let sessions: Vec<Session> = self.cache.lock().await.iter().map(|(_, v)| v.clone()).collect();
        for session in sessions {
            if let Err(e) = persister.save_session(&session.to_persisted()).await {
                warn!(error = %e, key = %session.key, "failed to persist session during shutdown");
            }
        }
        Ok(())
    }
}

pub fn channel_and_user(key: &str) -> Option<(&str, &str)> {
    parse_session_key(key)
}
