use crate::persistence::Persister;
use crate::tools::registry::ToolRegistry;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, warn};
use uuid::Uuid;

/// Cap on tracked `running_tasks` entries; finished handles are pruned and
/// spawning stops once the cap is hit.
const MAX_TRACKED_TASKS: usize = 100;

const LABEL_TRUNCATE_CHARS: usize = 40;

/// Lifecycle state of a sub-agent, strictly forward: `Pending -> Running ->
/// {Done | Failed | Canceled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubAgentStatus {
    Pending,
    Running,
    Done,
    Failed,
    Canceled,
}

impl SubAgentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Canceled)
    }

    pub fn is_cancelable(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

#[derive(Debug, Clone)]
pub struct SubAgent {
    pub id: String,
    pub label: String,
    pub task: String,
    pub system_prompt: Option<String>,
    pub status: SubAgentStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub parent_session_key: String,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The runner bound to the agentic tool-calling loop (`waygate::router`),
/// kept as a trait object so `subagent` does not depend on the router's
/// provider plumbing directly.
#[async_trait]
pub trait SubagentRunner: Send + Sync {
    async fn run(
        &self,
        task: &str,
        system_prompt: &str,
        tools: Arc<ToolRegistry>,
        max_iterations: u32,
    ) -> Result<String>;
}

/// Fired by the manager when a sub-agent reaches a terminal state; supplied
/// by the Coordinator.
pub struct CompletionEvent {
    pub id: String,
    pub label: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub parent_session_key: String,
    pub duration: Duration,
}

pub type CompletionCallback = Arc<dyn Fn(CompletionEvent) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct SubagentManagerConfig {
    pub max_concurrent: usize,
    pub max_runtime: Duration,
    pub max_iterations: u32,
}

impl Default for SubagentManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_runtime: Duration::from_secs(5 * 60),
            max_iterations: 15,
        }
    }
}

struct Inner {
    agents: Mutex<HashMap<String, SubAgent>>,
    running_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    semaphore: Arc<Semaphore>,
    runner: Arc<dyn SubagentRunner>,
    registry: Arc<ToolRegistry>,
    persister: Mutex<Option<Arc<dyn Persister>>>,
    on_complete: CompletionCallback,
    config: SubagentManagerConfig,
}

/// Tracks and drives background sub-agents. Each spawn
/// runs under a semaphore permit bound by `max_concurrent`, with a runtime
/// deadline enforced by `tokio::time::timeout`.
#[derive(Clone)]
pub struct SubagentManager {
    inner: Arc<Inner>,
}

impl SubagentManager {
    pub fn new(
        runner: Arc<dyn SubagentRunner>,
        registry: Arc<ToolRegistry>,
        on_complete: CompletionCallback,
        config: SubagentManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                agents: Mutex::new(HashMap::new()),
                running_tasks: Mutex::new(HashMap::new()),
                semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
                runner,
                registry,
                persister: Mutex::new(None),
                on_complete,
                config,
            }),
        }
    }

    /// Installs the persister, creating its backing table if missing and
    /// loading previously-persisted sub-agents into memory.
    pub async fn set_persister(&self, persister: Arc<dyn Persister>) -> Result<()> {
        let existing = persister.load_all_subagents().await?;
        let mut agents = self.inner.agents.lock().await;
        for agent in existing {
            agents.insert(agent.id.clone(), agent);
        }
        drop(agents);
        *self.inner.persister.lock().await = Some(persister);
        Ok(())
    }

    async fn persist(&self, agent: &SubAgent) {
        let guard = self.inner.persister.lock().await;
        if let Some(persister) = guard.as_ref() {
            if let Err(e) = persister.save_subagent(agent).await {
                warn!(error = %e, id = %agent.id, "failed to persist sub-agent, continuing with in-memory state");
            }
        }
    }

    /// Allocates an id, persists the pending record, and starts the worker.
    /// Returns the id synchronously without waiting for the worker to run.
    pub async fn spawn(
        &self,
        task: impl Into<String>,
        label: Option<String>,
        system_prompt: Option<String>,
        parent_session_key: impl Into<String>,
    ) -> String {
        let task = task.into();
        let parent_session_key = parent_session_key.into();
        let display_label = label.unwrap_or_else(|| truncate_label(&task));
        let id = short_id();

        let agent = SubAgent {
            id: id.clone(),
            label: display_label,
            task,
            system_prompt,
            status: SubAgentStatus::Pending,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            parent_session_key,
        };
        self.inner.agents.lock().await.insert(id.clone(), agent.clone());
        self.persist(&agent).await;

        let mut running = self.inner.running_tasks.lock().await;
        prune_finished(&mut running);
        if running.len() >= MAX_TRACKED_TASKS {
            warn!("sub-agent tracked task count at cap, oldest handles will not be pruned further");
        }

        let inner = self.inner.clone();
        let worker_id = id.clone();
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            manager.run_worker(inner, worker_id).await;
        });
        running.insert(id.clone(), handle);
        drop(running);
        id
    }

    async fn run_worker(&self, inner: Arc<Inner>, id: String) {
        let _permit = match inner.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let (task, mut system_prompt, parent_session_key, label) = {
            let mut agents = inner.agents.lock().await;
            let Some(agent) = agents.get_mut(&id) else {
                return;
            };
            agent.status = SubAgentStatus::Running;
            (
                agent.task.clone(),
                agent.system_prompt.clone(),
                agent.parent_session_key.clone(),
                agent.label.clone(),
            )
        };
        if let Some(agent) = inner.agents.lock().await.get(&id).cloned() {
            self.persist(&agent).await;
        }

        if system_prompt.as_deref().unwrap_or("").is_empty() {
            system_prompt = Some(default_system_prompt(&task));
        }
        let system_prompt = system_prompt.unwrap_or_default();

        let started = std::time::Instant::now();
        let run_fut = inner
            .runner
            .run(&task, &system_prompt, inner.registry.clone(), inner.config.max_iterations);
        let outcome = tokio::time::timeout(inner.config.max_runtime, run_fut).await;

        let (status, result, error) = match outcome {
            Err(_) => (SubAgentStatus::Failed, None, Some("timeout exceeded".to_string())),
            Ok(Err(e)) => (SubAgentStatus::Failed, None, Some(e.to_string())),
            Ok(Ok(text)) => (SubAgentStatus::Done, Some(text), None),
        };

        let completed_agent = {
            let mut agents = inner.agents.lock().await;
            let Some(agent) = agents.get_mut(&id) else {
                return;
            };
            agent.status = status;
            agent.result = result.clone();
            agent.error = error.clone();
            agent.completed_at = Some(Utc::now());
            agent.clone()
        };
        self.persist(&completed_agent).await;

        inner.running_tasks.lock().await.remove(&id);

        (inner.on_complete)(CompletionEvent {
            id,
            label,
            result,
            error,
            parent_session_key,
            duration: started.elapsed(),
        })
        .await;
    }

    /// Cancels a pending or running sub-agent, aborting its worker task and
    /// marking it terminal immediately.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let mut agents = self.inner.agents.lock().await;
        let agent = agents.get_mut(id).ok_or_else(|| anyhow!("sub-agent not found: {id}"))?;
        if !agent.status.is_cancelable() {
            return Err(anyhow!("sub-agent {id} is not running"));
        }
        agent.status = SubAgentStatus::Canceled;
        agent.completed_at = Some(Utc::now());
        agent.error = Some("canceled by user".to_string());
        let snapshot = agent.clone();
        drop(agents);

        if let Some(handle) = self.inner.running_tasks.lock().await.remove(id) {
            handle.abort();
        }
        self.persist(&snapshot).await;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<SubAgent> {
        self.inner.agents.lock().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<SubAgent> {
        self.inner.agents.lock().await.values().cloned().collect()
    }

    /// Evicts terminal entries whose `completed_at` is older than `max_age`.
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
        let mut agents = self.inner.agents.lock().await;
        let before = agents.len();
        agents.retain(|_, agent| {
            !(agent.status.is_terminal() && agent.completed_at.is_some_and(|t| t < cutoff))
        });
        before - agents.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.semaphore.available_permits()
    }
}

fn prune_finished(running: &mut HashMap<String, JoinHandle<()>>) {
    running.retain(|_, handle| !handle.is_finished());
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn truncate_label(task: &str) -> String {
    if task.chars().count() <= LABEL_TRUNCATE_CHARS {
        task.to_string()
    } else {
        let truncated: String = task.chars().take(LABEL_TRUNCATE_CHARS).collect();
        format!("{truncated}…")
    }
}

fn default_system_prompt(task: &str) -> String {
    format!(
        "You are a sub-agent. Your task is: {task}\n\nBe concise. When finished, return your final answer as plain text."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::ToolRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoRunner {
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl SubagentRunner for EchoRunner {
        async fn run(&self, task: &str, _system_prompt: &str, _tools: Arc<ToolRegistry>, _max_iterations: u32) -> Result<String> {
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                Err(anyhow!("boom"))
            } else {
                Ok(format!("done: {task}"))
            }
        }
    }

    fn test_manager(runner: EchoRunner, config: SubagentManagerConfig, counter: Arc<AtomicUsize>) -> SubagentManager {
        let registry = Arc::new(ToolRegistry::new());
        let on_complete: CompletionCallback = Arc::new(move |_event| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });
        SubagentManager::new(Arc::new(runner), registry, on_complete, config)
    }

    #[tokio::test]
    async fn spawn_runs_to_completion_and_invokes_callback() {
        let counter = Arc::new(AtomicUsize::new(0));
        let manager = test_manager(
            EchoRunner { fail: false, delay: Duration::ZERO },
            SubagentManagerConfig::default(),
            counter.clone(),
        );
        let id = manager.spawn("sum 2+2", None, None, "api:1").await;
        for _ in 0..50 {
            if manager.get(&id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let agent = manager.get(&id).await.unwrap();
        assert_eq!(agent.status, SubAgentStatus::Done);
        assert_eq!(agent.result.as_deref(), Some("done: sum 2+2"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn spawn_records_failure() {
        let counter = Arc::new(AtomicUsize::new(0));
        let manager = test_manager(
            EchoRunner { fail: true, delay: Duration::ZERO },
            SubagentManagerConfig::default(),
            counter,
        );
        let id = manager.spawn("task", None, None, "api:1").await;
        for _ in 0..50 {
            if manager.get(&id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let agent = manager.get(&id).await.unwrap();
        assert_eq!(agent.status, SubAgentStatus::Failed);
        assert_eq!(agent.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn cancel_pending_marks_canceled() {
        let counter = Arc::new(AtomicUsize::new(0));
        let manager = test_manager(
            EchoRunner { fail: false, delay: Duration::from_secs(30) },
            SubagentManagerConfig { max_concurrent: 1, ..Default::default() },
            counter,
        );
        let id = manager.spawn("slow", None, None, "api:1").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.cancel(&id).await.unwrap();
        let agent = manager.get(&id).await.unwrap();
        assert_eq!(agent.status, SubAgentStatus::Canceled);
        assert_eq!(agent.error.as_deref(), Some("canceled by user"));
    }

    #[tokio::test]
    async fn cancel_unknown_id_errors() {
        let counter = Arc::new(AtomicUsize::new(0));
        let manager = test_manager(
            EchoRunner { fail: false, delay: Duration::ZERO },
            SubagentManagerConfig::default(),
            counter,
        );
        let err = manager.cancel("missing").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn cancel_already_terminal_errors() {
        let counter = Arc::new(AtomicUsize::new(0));
        let manager = test_manager(
            EchoRunner { fail: false, delay: Duration::ZERO },
            SubagentManagerConfig::default(),
            counter,
        );
        let id = manager.spawn("quick", None, None, "api:1").await;
        for _ in 0..50 {
            if manager.get(&id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let err = manager.cancel(&id).await.unwrap_err();
        assert!(err.to_string().contains("not running"));
    }

    #[test]
    fn truncate_label_adds_ellipsis_past_cutoff() {
        let short = truncate_label("hi");
        assert_eq!(short, "hi");
        let long = truncate_label(&"x".repeat(100));
        assert!(long.ends_with('…'));
        assert!(long.chars().count() <= LABEL_TRUNCATE_CHARS + 1);
    }
}
