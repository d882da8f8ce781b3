use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Invoked once per registered user on every tick with `(channel, user_id)`.
/// Supplied by the Coordinator, which routes the synthetic prompt through
/// the same pipeline as an ordinary inbound message.
pub type HeartbeatCallback = Arc<dyn Fn(String, String) -> BoxFuture<'static, ()> + Send + Sync>;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Optional periodic self-prompting of registered users, keyed over a set
/// of `(channel, user_id)` pairs rather than a single workspace file.
pub struct Heartbeat {
    enabled: bool,
    interval: Duration,
    registered: Mutex<HashSet<(String, String)>>,
    running: Arc<Mutex<bool>>,
}

impl Heartbeat {
    pub fn new(enabled: bool, interval: Duration) -> Self {
        Self {
            enabled,
            interval: interval.max(MIN_INTERVAL),
            registered: Mutex::new(HashSet::new()),
            running: Arc::new(Mutex::new(false)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Registers `(channel, user_id)` so it receives a self-prompt on every
    /// tick going forward. A no-op when heartbeat is disabled.
    pub async fn register(&self, channel: impl Into<String>, user_id: impl Into<String>) {
        if !self.enabled {
            return;
        }
        self.registered.lock().await.insert((channel.into(), user_id.into()));
    }

    pub async fn registered_count(&self) -> usize {
        self.registered.lock().await.len()
    }

    /// Starts the periodic loop on its own task; a no-op if disabled.
    /// Callback failures are logged and never abort the loop.
    pub async fn start(self: &Arc<Self>, on_tick: HeartbeatCallback) {
        if !self.enabled {
            return;
        }
        *self.running.lock().await = true;
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !*this.running.lock().await {
                    break;
                }
                let users: Vec<(String, String)> = this.registered.lock().await.iter().cloned().collect();
                for (channel, user_id) in users {
                    on_tick(channel.clone(), user_id.clone()).await;
                }
            }
        });
    }

    pub async fn stop(&self) {
        *self.running.lock().await = false;
    }
}
