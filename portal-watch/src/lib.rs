//! # portal-watch
//!
//! Filesystem change detection for PortalSync outbox folders.
//!
//! Each destination portal has one watched folder on the sending side.
//! Dropped files are batched through a lock-file coordination protocol
//! before they ship:
//!
//! ```text
//! READY ──creation event──► LOCKED ──sentinel removed──► PROCESSING
//!   ▲                         (sentinel file created)        │
//!   └────────────── pass finds nothing eligible ◄────────────┘
//! ```
//!
//! The sentinel lock file is user-visible on disk (users delete it to say
//! "batch complete"), but its presence is only an *input* to the state
//! machine - the tagged [`LockState`] per folder is authoritative.
//!
//! Two interchangeable backends drive the same state machine: one blocks on
//! native OS notifications ([`notify`]), one periodically re-lists every
//! watched folder. Queued events are drained on a fixed interval and handed
//! to handlers as one batch per destination.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod backend;
mod batcher;
mod error;
mod folder;
mod state;

pub use backend::{spawn_sweep_task, BackendKind, NotifyBackend, PollBackend};
pub use batcher::{spawn_drain_task, BatchHandler, EventBatcher};
pub use error::WatchError;
pub use folder::{FileEvent, WatchCore, LOCK_FILE_NAME, MAX_LISTING, SENDING_SUFFIX};
pub use state::{FolderAction, FolderEvent, LockState};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Watcher configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Whether the sentinel lock-file protocol is enabled. When disabled, a
    /// creation signal enters PROCESSING immediately.
    pub lock_coordination: bool,
    /// Which backend detects folder changes.
    pub backend: BackendKind,
    /// How often queued events are drained into per-destination batches.
    pub drain_interval: Duration,
    /// How often lock/processing folders are re-examined.
    pub sweep_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            lock_coordination: true,
            backend: BackendKind::Native,
            drain_interval: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// The assembled watcher: core state, batcher, backend, and timers.
pub struct Watcher {
    core: Arc<WatchCore>,
    batcher: Arc<EventBatcher>,
    backend: Option<NotifyBackend>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Watcher {
    /// Build the watcher and spawn its background tasks.
    pub fn spawn(config: WatchConfig) -> Result<Self, WatchError> {
        let batcher = Arc::new(EventBatcher::new());
        let core = Arc::new(WatchCore::new(config.lock_coordination, batcher.clone()));

        let mut tasks = Vec::new();
        tasks.push(spawn_sweep_task(core.clone(), config.sweep_interval));
        tasks.push(spawn_drain_task(batcher.clone(), config.drain_interval));

        let backend = match config.backend {
            BackendKind::Native => Some(NotifyBackend::start(core.clone())?),
            BackendKind::Polling => {
                tasks.push(PollBackend::spawn(core.clone(), config.sweep_interval));
                None
            }
        };

        Ok(Self {
            core,
            batcher,
            backend,
            tasks,
        })
    }

    /// Start watching a folder for a destination.
    pub fn watch(&self, destination: &str, path: PathBuf) -> Result<(), WatchError> {
        self.core.watch(destination, path.clone());
        if let Some(backend) = &self.backend {
            backend.watch_folder(&path)?;
        }
        Ok(())
    }

    /// Stop watching a destination's folder.
    pub fn unwatch(&self, destination: &str) {
        if let Some(path) = self.core.unwatch(destination) {
            if let Some(backend) = &self.backend {
                backend.unwatch_folder(&path);
            }
        }
    }

    /// Register a handler that receives one batch per destination per drain.
    pub fn add_handler(&self, handler: BatchHandler) {
        self.batcher.add_handler(handler);
    }

    /// Mark an in-flight file as done (upload finished, source deleted).
    pub fn complete(&self, destination: &str, path: &std::path::Path) {
        self.core.complete(destination, path);
    }

    /// Access the core for direct state inspection.
    pub fn core(&self) -> &Arc<WatchCore> {
        &self.core
    }

    /// Abort the background tasks. In-flight transfers are abandoned.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
