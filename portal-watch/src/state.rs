//! Lock-file coordination state machine - NO I/O, just state transitions.
//!
//! The state machine takes folder events as input and produces a new state
//! plus a list of actions to execute. The actual I/O (creating the sentinel
//! file, listing the folder) is performed by [`crate::WatchCore`], which
//! keeps these transitions instantly unit-testable.

/// Per-folder lock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Accepting new-file signals.
    Ready,
    /// Sentinel file placed; further creation signals are ignored until the
    /// user removes the sentinel to mark the batch complete.
    Locked,
    /// Batch released; processing passes run until one finds nothing
    /// eligible.
    Processing,
}

/// Input events for the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderEvent {
    /// Something was created in the folder.
    CreationSignal,
    /// The sentinel lock file disappeared from disk.
    SentinelRemoved,
    /// A processing pass finished, having queued this many entries.
    PassCompleted {
        /// Number of entries queued by the pass.
        queued: usize,
    },
    /// A processing pass hit a filesystem error and was skipped.
    PassFailed,
}

/// Actions for the caller to execute after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderAction {
    /// Create the sentinel lock file in the folder.
    CreateSentinel,
    /// Run a processing pass over the folder.
    RunPass,
}

impl LockState {
    /// Initial state for a newly watched folder.
    pub fn new() -> Self {
        Self::Ready
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// `lock_coordination` selects the two entry paths into PROCESSING:
    /// with it, a creation signal locks the folder until the user removes
    /// the sentinel; without it, the signal starts processing immediately.
    pub fn on_event(self, event: FolderEvent, lock_coordination: bool) -> (Self, Vec<FolderAction>) {
        match (self, event) {
            (Self::Ready, FolderEvent::CreationSignal) => {
                if lock_coordination {
                    (Self::Locked, vec![FolderAction::CreateSentinel])
                } else {
                    (Self::Processing, vec![FolderAction::RunPass])
                }
            }

            // Batch still open: more drops are part of the same batch.
            (Self::Locked, FolderEvent::CreationSignal) => (Self::Locked, vec![]),
            (Self::Locked, FolderEvent::SentinelRemoved) => {
                (Self::Processing, vec![FolderAction::RunPass])
            }

            (Self::Processing, FolderEvent::PassCompleted { queued: 0 }) => (Self::Ready, vec![]),
            (Self::Processing, FolderEvent::PassCompleted { .. }) => (Self::Processing, vec![]),
            (Self::Processing, FolderEvent::PassFailed) => (Self::Ready, vec![]),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }
}

impl Default for LockState {
    fn default() -> Self {
        Self::new()
    }
}
