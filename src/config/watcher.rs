use crate::config::loader::{load_from_path, validate};
use crate::config::schema::ConfigSnapshot;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Invoked with a freshly parsed and validated config once the on-disk file
/// changes.
pub type ReloadCallback = Arc<dyn Fn(ConfigSnapshot) -> BoxFuture<'static, ()> + Send + Sync>;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
}

fn stamp(path: &std::path::Path) -> Option<Stamp> {
    let metadata = std::fs::metadata(path).ok()?;
    Some(Stamp {
        modified: metadata.modified().ok(),
        len: metadata.len(),
    })
}

/// Polls a config file's mtime/size on an interval (a deliberate choice
/// over an inotify/`notify`-based watcher, see `DESIGN.md`).
pub struct ConfigWatcher {
    path: PathBuf,
    poll_interval: Duration,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), poll_interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Starts the polling loop on its own task. The caller is responsible
    /// for aborting the returned handle during shutdown.
    pub fn start(self, on_reload: ReloadCallback) -> JoinHandle<()> {
        let path = self.path;
        let poll_interval = self.poll_interval;
        tokio::spawn(async move {
            let mut last_seen = stamp(&path);
            let mut interval = tokio::time::interval(poll_interval);
            interval.tick().await; // first tick fires immediately, skip it
            loop {
                interval.tick().await;
                let current = stamp(&path);
                if current == last_seen {
                    continue;
                }
                last_seen = current;
                if current.is_none() {
                    warn!(path = %path.display(), "config file disappeared, keeping previous config");
                    continue;
                }
                match load_from_path(&path).await {
                    Ok(parsed) => {
                        let report = validate(&parsed);
                        if !report.is_valid() {
                            warn!(errors = ?report.errors, "config reload failed validation, keeping previous config");
                            continue;
                        }
                        for warning in &report.warnings {
                            warn!(%warning, "config reload warning");
                        }
                        info!(path = %path.display(), "config file changed, reloading");
                        on_reload(parsed).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "config reload failed to parse, keeping previous config");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fires_on_reload_when_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nprovider = \"anthropic\"\n").unwrap();

        let watcher = ConfigWatcher::new(&path).with_poll_interval(Duration::from_millis(20));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let handle = watcher.start(Arc::new(move |_cfg| {
            let count = count_clone.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        }));

        tokio::time::sleep(Duration::from_millis(60)).await;
        std::fs::write(&path, "[agent]\nprovider = \"openai\"\n").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        handle.abort();
        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn does_not_fire_without_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nprovider = \"anthropic\"\n").unwrap();

        let watcher = ConfigWatcher::new(&path).with_poll_interval(Duration::from_millis(20));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let handle = watcher.start(Arc::new(move |_cfg| {
            let count = count_clone.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        }));

        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_reload_keeps_previous_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[channels.telegram]\nenabled = false\n").unwrap();

        let watcher = ConfigWatcher::new(&path).with_poll_interval(Duration::from_millis(20));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let handle = watcher.start(Arc::new(move |_cfg| {
            let count = count_clone.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        }));

        tokio::time::sleep(Duration::from_millis(60)).await;
        std::fs::write(&path, "[channels.telegram]\nenabled = true\n").unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        handle.abort();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
