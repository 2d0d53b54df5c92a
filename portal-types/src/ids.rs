//! Identity types for the PortalSync protocol.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique identifier for a registered portal.
///
/// Derived from a nanosecond timestamp plus a random suffix, displayed as
/// lowercase hex. Timestamps alone are not collision-resistant, so the
/// relay directory re-checks uniqueness at registration and regenerates
/// on collision.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortalId(String);

impl PortalId {
    /// Generate a fresh candidate id.
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let mut suffix = [0u8; 4];
        getrandom::getrandom(&mut suffix).expect("getrandom failed");
        Self(format!("{:x}-{}", nanos, hex::encode(suffix)))
    }

    /// Wrap an id received over the wire.
    ///
    /// Rejects empty ids and ids with characters that are unsafe as a
    /// storage bucket name.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || s.len() > 64 {
            return None;
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return None;
        }
        Some(Self(s.to_string()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PortalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortalId({})", self.0)
    }
}

/// A unique identifier for a stored item (one pending transfer).
///
/// UUID v4 format (16 bytes), which doubles as the blob file name in the
/// relay's per-recipient bucket.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId(uuid::Uuid);

impl ItemId {
    /// Create a new random ItemId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse an ItemId from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}
