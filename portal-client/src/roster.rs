//! The client's view of who else is live.
//!
//! The roster is a bidirectional name↔id map plus each portal's public
//! key. Both directions are updated together under one lock so they can
//! never disagree.

use std::collections::HashMap;
use std::sync::Mutex;

use portal_crypto::PUBLIC_KEY_LEN;
use portal_types::PortalId;

/// One remote portal as the roster reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// Relay-assigned id.
    pub id: PortalId,
    /// Human-chosen name.
    pub name: String,
    /// X25519 public key for wrapping file keys to this portal.
    pub public_key: [u8; PUBLIC_KEY_LEN],
}

/// What changed between two roster snapshots.
#[derive(Debug, Default, Clone)]
pub struct RosterDiff {
    /// Portals present now that were absent before.
    pub added: Vec<RosterEntry>,
    /// Portals absent now that were present before.
    pub removed: Vec<RosterEntry>,
}

#[derive(Default)]
struct RosterInner {
    by_id: HashMap<PortalId, RosterEntry>,
    by_name: HashMap<String, PortalId>,
}

/// Thread-safe roster snapshot.
#[derive(Default)]
pub struct RosterMap {
    inner: Mutex<RosterInner>,
}

impl RosterMap {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the roster with a fresh snapshot, returning the diff.
    ///
    /// Entries matching `own_name` are skipped; a portal does not watch an
    /// outbox for itself.
    pub fn replace(&self, entries: Vec<RosterEntry>, own_name: &str) -> RosterDiff {
        let mut inner = self.inner.lock().expect("roster lock poisoned");

        let mut next_by_id = HashMap::new();
        let mut next_by_name = HashMap::new();
        let mut diff = RosterDiff::default();

        for entry in entries {
            if entry.name == own_name {
                continue;
            }
            if !inner.by_id.contains_key(&entry.id) {
                diff.added.push(entry.clone());
            }
            next_by_name.insert(entry.name.clone(), entry.id.clone());
            next_by_id.insert(entry.id.clone(), entry);
        }
        for (id, entry) in &inner.by_id {
            if !next_by_id.contains_key(id) {
                diff.removed.push(entry.clone());
            }
        }

        inner.by_id = next_by_id;
        inner.by_name = next_by_name;
        diff
    }

    /// Look up a portal by name.
    pub fn by_name(&self, name: &str) -> Option<RosterEntry> {
        let inner = self.inner.lock().expect("roster lock poisoned");
        let id = inner.by_name.get(name)?;
        inner.by_id.get(id).cloned()
    }

    /// Look up a portal by id.
    pub fn by_id(&self, id: &PortalId) -> Option<RosterEntry> {
        let inner = self.inner.lock().expect("roster lock poisoned");
        inner.by_id.get(id).cloned()
    }

    /// All known portal names.
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("roster lock poisoned");
        inner.by_name.keys().cloned().collect()
    }

    /// Number of known remote portals.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("roster lock poisoned").by_id.len()
    }

    /// Whether no remote portals are known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
