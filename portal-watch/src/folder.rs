//! Watched-folder registry and processing passes.
//!
//! [`WatchCore`] owns the per-destination folder map and drives the
//! [`LockState`] machine, executing its actions: creating the sentinel
//! file, listing folders, filtering entries, and queueing accepted files
//! into the [`EventBatcher`].

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::batcher::EventBatcher;
use crate::state::{FolderAction, FolderEvent, LockState};

/// Name of the user-visible sentinel lock file.
pub const LOCK_FILE_NAME: &str = ".portal.lock";

/// Suffix marking an upload in progress; such entries are never queued.
pub const SENDING_SUFFIX: &str = ".sending";

/// Bound on entries examined per processing pass.
pub const MAX_LISTING: usize = 1000;

/// A file queued for shipment to a destination portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Absolute path of the dropped file or folder.
    pub path: PathBuf,
    /// Destination portal name (the watched folder's identity).
    pub destination: String,
}

/// State for one watched folder.
#[derive(Debug)]
struct WatchedFolder {
    path: PathBuf,
    state: LockState,
    in_flight: HashSet<PathBuf>,
}

/// Folder registry plus state-machine driver.
///
/// Shared between backends, the sweep timer, and the client engine; all
/// folder state lives behind one mutex.
pub struct WatchCore {
    lock_coordination: bool,
    folders: Mutex<HashMap<String, WatchedFolder>>,
    batcher: Arc<EventBatcher>,
}

impl WatchCore {
    /// Create a core with no watched folders.
    pub fn new(lock_coordination: bool, batcher: Arc<EventBatcher>) -> Self {
        Self {
            lock_coordination,
            folders: Mutex::new(HashMap::new()),
            batcher,
        }
    }

    /// Start watching `path` for `destination`. Idempotent per destination.
    pub fn watch(&self, destination: &str, path: PathBuf) {
        let mut folders = self.folders.lock().expect("folder lock poisoned");
        folders.entry(destination.to_string()).or_insert_with(|| {
            tracing::debug!("Watching {:?} for destination {}", path, destination);
            WatchedFolder {
                path,
                state: LockState::new(),
                in_flight: HashSet::new(),
            }
        });
    }

    /// Stop watching a destination, returning its folder path if it existed.
    pub fn unwatch(&self, destination: &str) -> Option<PathBuf> {
        let mut folders = self.folders.lock().expect("folder lock poisoned");
        let removed = folders.remove(destination);
        if let Some(folder) = &removed {
            tracing::debug!("Unwatched {:?} for destination {}", folder.path, destination);
        }
        removed.map(|f| f.path)
    }

    /// All watched destinations and their folder paths.
    pub fn watched(&self) -> Vec<(String, PathBuf)> {
        let folders = self.folders.lock().expect("folder lock poisoned");
        folders
            .iter()
            .map(|(d, f)| (d.clone(), f.path.clone()))
            .collect()
    }

    /// Current lock state of a destination's folder.
    pub fn state_of(&self, destination: &str) -> Option<LockState> {
        let folders = self.folders.lock().expect("folder lock poisoned");
        folders.get(destination).map(|f| f.state)
    }

    /// Map a folder path back to its destination name.
    pub fn destination_for(&self, folder_path: &Path) -> Option<String> {
        let folders = self.folders.lock().expect("folder lock poisoned");
        folders
            .iter()
            .find(|(_, f)| f.path == folder_path)
            .map(|(d, _)| d.clone())
    }

    /// Handle a creation event in a destination's folder.
    pub fn signal_creation(&self, destination: &str) {
        let mut folders = self.folders.lock().expect("folder lock poisoned");
        let Some(folder) = folders.get_mut(destination) else {
            return;
        };
        self.apply(destination, folder, FolderEvent::CreationSignal);
    }

    /// Periodic sweep: detect released batches and re-run processing
    /// passes until a folder empties out.
    pub fn sweep(&self) {
        let mut folders = self.folders.lock().expect("folder lock poisoned");
        let destinations: Vec<String> = folders.keys().cloned().collect();
        for destination in destinations {
            let Some(folder) = folders.get_mut(&destination) else {
                continue;
            };
            match folder.state {
                LockState::Locked => {
                    if !folder.path.join(LOCK_FILE_NAME).exists() {
                        self.apply(&destination, folder, FolderEvent::SentinelRemoved);
                    }
                }
                LockState::Processing => {
                    self.run_pass(&destination, folder);
                }
                LockState::Ready => {}
            }
        }
    }

    /// Destinations in READY whose folders contain at least one eligible
    /// entry. Used by the polling backend in place of native signals.
    pub fn ready_candidates(&self) -> Vec<String> {
        let folders = self.folders.lock().expect("folder lock poisoned");
        folders
            .iter()
            .filter(|(_, f)| f.state == LockState::Ready && has_candidate(f))
            .map(|(d, _)| d.clone())
            .collect()
    }

    /// Mark an in-flight file as done so a later pass can see its slot.
    pub fn complete(&self, destination: &str, path: &Path) {
        let mut folders = self.folders.lock().expect("folder lock poisoned");
        if let Some(folder) = folders.get_mut(destination) {
            folder.in_flight.remove(path);
        }
    }

    /// Apply one event to a folder and execute the resulting actions.
    fn apply(&self, destination: &str, folder: &mut WatchedFolder, event: FolderEvent) {
        let (next, actions) = folder.state.on_event(event, self.lock_coordination);
        folder.state = next;
        for action in actions {
            match action {
                FolderAction::CreateSentinel => {
                    let sentinel = folder.path.join(LOCK_FILE_NAME);
                    if let Err(e) = fs::write(&sentinel, b"") {
                        tracing::warn!("Failed to create sentinel {:?}: {}", sentinel, e);
                        // Without a sentinel the batch can never be
                        // released; roll back so the next signal retries.
                        folder.state = LockState::Ready;
                    }
                }
                FolderAction::RunPass => self.run_pass(destination, folder),
            }
        }
    }

    /// Run one processing pass and feed the outcome back into the machine.
    fn run_pass(&self, destination: &str, folder: &mut WatchedFolder) {
        let event = match self.execute_pass(destination, folder) {
            Ok(queued) => FolderEvent::PassCompleted { queued },
            Err(e) => {
                tracing::warn!("Processing pass failed for {:?}: {}", folder.path, e);
                FolderEvent::PassFailed
            }
        };
        let (next, actions) = folder.state.on_event(event, self.lock_coordination);
        folder.state = next;
        debug_assert!(actions.is_empty(), "pass outcomes produce no actions");
    }

    /// List the folder, filter, and queue accepted entries.
    fn execute_pass(
        &self,
        destination: &str,
        folder: &mut WatchedFolder,
    ) -> std::io::Result<usize> {
        let mut queued = 0;
        for entry in fs::read_dir(&folder.path)?.take(MAX_LISTING) {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == LOCK_FILE_NAME || name.ends_with(SENDING_SUFFIX) {
                continue;
            }
            let path = entry.path();
            if folder.in_flight.contains(&path) {
                continue;
            }
            if !is_acceptable(&path) {
                continue;
            }
            folder.in_flight.insert(path.clone());
            self.batcher.enqueue(FileEvent {
                path,
                destination: destination.to_string(),
            });
            queued += 1;
        }
        if queued > 0 {
            tracing::debug!("Queued {} entries from {:?}", queued, folder.path);
        }
        Ok(queued)
    }
}

/// Whether an entry is ready to ship: it exists, and a file must be
/// non-empty with a readable first byte (still-copying files fail this).
fn is_acceptable(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if meta.is_dir() {
        return true;
    }
    if !meta.is_file() || meta.len() == 0 {
        return false;
    }
    let Ok(mut file) = fs::File::open(path) else {
        return false;
    };
    let mut byte = [0u8; 1];
    matches!(file.read(&mut byte), Ok(1))
}

/// Cheap check used by the polling backend: any eligible entry present?
fn has_candidate(folder: &WatchedFolder) -> bool {
    let Ok(entries) = fs::read_dir(&folder.path) else {
        return false;
    };
    for entry in entries.take(MAX_LISTING).flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == LOCK_FILE_NAME || name.ends_with(SENDING_SUFFIX) {
            continue;
        }
        let path = entry.path();
        if folder.in_flight.contains(&path) {
            continue;
        }
        if is_acceptable(&path) {
            return true;
        }
    }
    false
}
