//! Error types for portal-watch.

/// Watcher errors.
///
/// Filesystem errors during a processing pass are logged and the pass is
/// skipped (the folder rolls back to READY); they never escape a sweep
/// tick.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The native notification backend failed.
    #[error("watch backend error: {0}")]
    Backend(String),
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        Self::Backend(e.to_string())
    }
}
