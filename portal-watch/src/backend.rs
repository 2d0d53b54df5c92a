//! Change-detection backends and the shared sweep timer.
//!
//! Both backends feed the same [`WatchCore`]: [`NotifyBackend`] translates
//! native OS notifications into creation signals, [`PollBackend`] re-lists
//! every READY folder on an interval. The sweep task is shared by both and
//! handles sentinel removal and processing-pass continuation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};

use crate::error::WatchError;
use crate::folder::WatchCore;

/// Which change-detection backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Native OS notifications via the `notify` crate.
    Native,
    /// Periodic re-listing of watched folders.
    Polling,
}

/// Native notification backend.
///
/// Watches each registered folder non-recursively and turns create events
/// into creation signals on the core. Event-to-destination mapping goes
/// through the parent directory of the created path.
pub struct NotifyBackend {
    watcher: std::sync::Mutex<RecommendedWatcher>,
}

impl NotifyBackend {
    /// Start the backend. Folders are added with [`Self::watch_folder`].
    pub fn start(core: Arc<WatchCore>) -> Result<Self, WatchError> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("Watch backend error: {}", e);
                    return;
                }
            };
            if !matches!(event.kind, notify::EventKind::Create(_)) {
                return;
            }
            for path in &event.paths {
                let Some(parent) = path.parent() else {
                    continue;
                };
                if let Some(destination) = core.destination_for(parent) {
                    core.signal_creation(&destination);
                }
            }
        })?;
        Ok(Self {
            watcher: std::sync::Mutex::new(watcher),
        })
    }

    /// Subscribe to create events in one folder.
    pub fn watch_folder(&self, path: &Path) -> Result<(), WatchError> {
        let mut watcher = self.watcher.lock().expect("notify watcher poisoned");
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        Ok(())
    }

    /// Unsubscribe from a folder. Errors are logged, not returned; the
    /// folder is already gone from the core.
    pub fn unwatch_folder(&self, path: &Path) {
        let mut watcher = self.watcher.lock().expect("notify watcher poisoned");
        if let Err(e) = watcher.unwatch(path) {
            tracing::debug!("Unwatch of {:?} failed: {}", path, e);
        }
    }
}

/// Polling backend: signals creation for every READY folder that contains
/// an eligible entry.
pub struct PollBackend;

impl PollBackend {
    /// Spawn the polling loop.
    pub fn spawn(core: Arc<WatchCore>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                for destination in core.ready_candidates() {
                    core.signal_creation(&destination);
                }
            }
        })
    }
}

/// Spawn the periodic sweep task shared by both backends.
pub fn spawn_sweep_task(core: Arc<WatchCore>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            core.sweep();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::EventBatcher;
    use crate::state::LockState;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn poll_backend_detects_dropped_files() {
        let dir = TempDir::new().unwrap();
        let batcher = Arc::new(EventBatcher::new());
        let core = Arc::new(WatchCore::new(false, batcher.clone()));
        core.watch("alpha", dir.path().to_path_buf());

        let task = PollBackend::spawn(core.clone(), Duration::from_millis(10));
        fs::write(dir.path().join("doc.txt"), b"data").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.abort();

        assert_eq!(batcher.pending(), 1);
    }

    #[tokio::test]
    async fn sweep_task_releases_locked_folder() {
        let dir = TempDir::new().unwrap();
        let batcher = Arc::new(EventBatcher::new());
        let core = Arc::new(WatchCore::new(true, batcher.clone()));
        core.watch("alpha", dir.path().to_path_buf());
        fs::write(dir.path().join("doc.txt"), b"data").unwrap();

        core.signal_creation("alpha");
        assert_eq!(core.state_of("alpha"), Some(LockState::Locked));

        let task = spawn_sweep_task(core.clone(), Duration::from_millis(10));
        fs::remove_file(dir.path().join(crate::LOCK_FILE_NAME)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.abort();

        assert_eq!(batcher.pending(), 1);
    }
}
