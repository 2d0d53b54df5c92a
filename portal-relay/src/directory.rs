//! Live-portal registry and admission control.
//!
//! The directory is the relay's only view of who exists. It enforces
//! unique live names, the live-portal cap, and (in gated mode) the
//! admission proof, and it owns the level-triggered refresh flags that
//! polls observe and clear.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use portal_crypto::{unwrap_key, SecretKey, PUBLIC_KEY_LEN};
use portal_types::PortalId;

use crate::error::RelayError;

/// One live portal as the relay sees it.
#[derive(Debug, Clone)]
pub struct Portal {
    /// Relay-assigned opaque id.
    pub id: PortalId,
    /// Unique human-chosen name.
    pub name: String,
    /// X25519 public key, published via the roster.
    pub public_key: [u8; PUBLIC_KEY_LEN],
    /// Updated by every poll; drives the idle expiry sweep.
    pub last_seen_at: Instant,
    /// Set when the roster changed since this portal last polled.
    pub needs_roster_refresh: bool,
    /// Set when new clipboard content arrived since this portal last polled.
    pub needs_clipboard_refresh: bool,
}

/// Registration policy knobs, lifted from [`crate::config::ServerConfig`].
#[derive(Debug, Clone)]
pub struct DirectorySettings {
    /// Require an admission proof wrapped to the relay key.
    pub admission_gated: bool,
    /// Allow an existing name to re-register with a new key.
    pub allow_key_override: bool,
    /// Maximum live portal count.
    pub max_portals: usize,
}

/// The live-portal registry.
pub struct RelayDirectory {
    settings: DirectorySettings,
    relay_secret: SecretKey,
    portals: DashMap<PortalId, Portal>,
    // Serializes the check-then-insert in register(); reads and flag
    // updates go straight to the DashMap.
    register_lock: std::sync::Mutex<()>,
}

impl RelayDirectory {
    /// Create an empty directory.
    pub fn new(settings: DirectorySettings, relay_secret: SecretKey) -> Self {
        Self {
            settings,
            relay_secret,
            portals: DashMap::new(),
            register_lock: std::sync::Mutex::new(()),
        }
    }

    /// Register a portal, returning its id.
    ///
    /// Reconnects (same name, same key) are idempotent. A name held by a
    /// live portal with a different key is rejected unless the operator
    /// enabled key override, in which case the key is replaced and every
    /// other portal is flagged for a roster refresh.
    pub fn register(
        &self,
        name: &str,
        public_key: [u8; PUBLIC_KEY_LEN],
        admission_proof: Option<&[u8]>,
    ) -> Result<PortalId, RelayError> {
        if name.is_empty() {
            return Err(RelayError::BadRequest {
                reason: "empty portal name".into(),
            });
        }

        let _guard = self.register_lock.lock().expect("register lock poisoned");

        if let Some(existing) = self.find_by_name(name) {
            if existing.public_key == public_key {
                // Reconnect.
                self.touch(&existing.id);
                tracing::debug!("Portal {} reconnected as {}", name, existing.id);
                return Ok(existing.id);
            }
            if !self.settings.allow_key_override {
                tracing::warn!("Registration conflict for name {}", name);
                return Err(RelayError::RegistrationConflict {
                    name: name.to_string(),
                });
            }
            let id = existing.id.clone();
            if let Some(mut portal) = self.portals.get_mut(&id) {
                portal.public_key = public_key;
                portal.last_seen_at = Instant::now();
            }
            self.flag_roster_refresh_except(Some(&id));
            tracing::info!("Portal {} re-keyed via operator override", name);
            return Ok(id);
        }

        if self.portals.len() >= self.settings.max_portals {
            return Err(RelayError::DirectoryFull {
                max: self.settings.max_portals,
            });
        }

        if self.settings.admission_gated {
            let proof = admission_proof.ok_or(RelayError::AdmissionDenied)?;
            // The proof is any value that unwraps under the relay's own
            // secret key; what it wraps does not matter.
            unwrap_key(proof, &self.relay_secret).map_err(|_| RelayError::AdmissionDenied)?;
        }

        // Timestamp-based ids are not collision-proof; re-check and
        // regenerate under the registration lock.
        let id = loop {
            let candidate = PortalId::generate();
            if !self.portals.contains_key(&candidate) {
                break candidate;
            }
        };

        self.portals.insert(
            id.clone(),
            Portal {
                id: id.clone(),
                name: name.to_string(),
                public_key,
                last_seen_at: Instant::now(),
                needs_roster_refresh: false,
                needs_clipboard_refresh: false,
            },
        );
        self.flag_roster_refresh_except(Some(&id));
        tracing::info!("Portal {} registered as {}", name, id);
        Ok(id)
    }

    /// Look up a portal by id.
    pub fn get(&self, id: &PortalId) -> Option<Portal> {
        self.portals.get(id).map(|p| p.clone())
    }

    /// All live portals, sorted by name for stable roster output.
    pub fn list_roster(&self) -> Vec<Portal> {
        let mut roster: Vec<Portal> = self.portals.iter().map(|p| p.clone()).collect();
        roster.sort_by(|a, b| a.name.cmp(&b.name));
        roster
    }

    /// Number of live portals.
    pub fn len(&self) -> usize {
        self.portals.len()
    }

    /// Whether the directory has no live portals.
    pub fn is_empty(&self) -> bool {
        self.portals.is_empty()
    }

    /// Update a portal's last-seen timestamp.
    pub fn touch(&self, id: &PortalId) -> bool {
        match self.portals.get_mut(id) {
            Some(mut portal) => {
                portal.last_seen_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Observe and clear a portal's refresh flags, touching it.
    ///
    /// Returns `(needs_roster_refresh, needs_clipboard_refresh)` as they
    /// stood before clearing, or `None` for an unknown portal. Level
    /// triggering lives here: any number of changes between polls collapses
    /// into one observation.
    pub fn poll_flags(&self, id: &PortalId) -> Option<(bool, bool)> {
        let mut portal = self.portals.get_mut(id)?;
        portal.last_seen_at = Instant::now();
        let flags = (portal.needs_roster_refresh, portal.needs_clipboard_refresh);
        portal.needs_roster_refresh = false;
        portal.needs_clipboard_refresh = false;
        Some(flags)
    }

    /// Flag every portal except `skip` for a roster refresh.
    pub fn flag_roster_refresh_except(&self, skip: Option<&PortalId>) {
        for mut portal in self.portals.iter_mut() {
            if Some(&portal.id) != skip {
                portal.needs_roster_refresh = true;
            }
        }
    }

    /// Flag every portal except the sender for a clipboard refresh.
    pub fn flag_clipboard_refresh_except(&self, sender: &PortalId) {
        for mut portal in self.portals.iter_mut() {
            if &portal.id != sender {
                portal.needs_clipboard_refresh = true;
            }
        }
    }

    /// Remove portals idle longer than `window`, returning the removed
    /// portals. Remaining portals are flagged for a roster refresh when
    /// anything was removed.
    pub fn remove_idle(&self, window: Duration) -> Vec<Portal> {
        let now = Instant::now();
        let expired: Vec<PortalId> = self
            .portals
            .iter()
            .filter(|p| now.duration_since(p.last_seen_at) > window)
            .map(|p| p.id.clone())
            .collect();

        let mut removed = Vec::new();
        for id in expired {
            if let Some((_, portal)) = self.portals.remove(&id) {
                tracing::info!("Portal {} ({}) expired", portal.name, portal.id);
                removed.push(portal);
            }
        }
        if !removed.is_empty() {
            self.flag_roster_refresh_except(None);
        }
        removed
    }

    fn find_by_name(&self, name: &str) -> Option<Portal> {
        self.portals
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.clone())
    }
}
