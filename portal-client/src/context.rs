//! Explicit per-process client session state.
//!
//! Everything the protocol engine needs to remember lives here: the local
//! keypair, the relay-assigned id, the relay's public key, and the roster.
//! The context is constructed once and passed around; nothing is static.

use std::path::PathBuf;
use std::sync::Mutex;

use portal_crypto::{PortalKeyPair, PublicKey};
use portal_types::PortalId;

use crate::roster::RosterMap;

/// Session state for one running portal.
pub struct ClientContext {
    /// This portal's long-lived keypair.
    pub keypair: PortalKeyPair,
    /// The roster of other live portals.
    pub roster: RosterMap,
    home: PathBuf,
    portal_id: Mutex<Option<PortalId>>,
    relay_public: Mutex<Option<PublicKey>>,
}

impl ClientContext {
    /// Create a fresh context with a newly generated keypair.
    pub fn new(home: PathBuf) -> Self {
        Self {
            keypair: PortalKeyPair::generate(),
            roster: RosterMap::new(),
            home,
            portal_id: Mutex::new(None),
            relay_public: Mutex::new(None),
        }
    }

    /// Record the relay-assigned id and the relay's public key after a
    /// successful registration.
    pub fn set_session(&self, id: PortalId, relay_public: PublicKey) {
        *self.portal_id.lock().expect("session lock poisoned") = Some(id);
        *self.relay_public.lock().expect("session lock poisoned") = Some(relay_public);
    }

    /// The relay-assigned portal id, if registered.
    pub fn portal_id(&self) -> Option<PortalId> {
        self.portal_id.lock().expect("session lock poisoned").clone()
    }

    /// The relay's public key, if registered.
    pub fn relay_public(&self) -> Option<PublicKey> {
        self.relay_public
            .lock()
            .expect("session lock poisoned")
            .clone()
    }

    /// The home folder root.
    pub fn home(&self) -> &PathBuf {
        &self.home
    }

    /// Outbox folder for a destination portal. Files dropped here are
    /// shipped to that portal.
    pub fn outbox_dir(&self, destination: &str) -> PathBuf {
        self.home.join("outbox").join(destination)
    }

    /// Inbox folder for a sender portal. Received transfers materialize
    /// here.
    pub fn inbox_dir(&self, sender: &str) -> PathBuf {
        self.home.join("inbox").join(sender)
    }
}
