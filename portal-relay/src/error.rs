//! Error types for portal-relay.

use portal_types::{ItemId, WireError};

/// Main error type for relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Cryptographic failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] portal_crypto::CryptoError),

    /// Malformed wire payload.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// A live portal already uses this name with a different key.
    #[error("registration conflict: name {name} is taken")]
    RegistrationConflict {
        /// The contested portal name.
        name: String,
    },

    /// Admission proof missing or failed to unwrap in gated mode.
    #[error("admission denied")]
    AdmissionDenied,

    /// The live-portal cap is reached.
    #[error("directory full (max {max} portals)")]
    DirectoryFull {
        /// The configured maximum.
        max: usize,
    },

    /// No live portal has this id.
    #[error("unknown portal: {id}")]
    UnknownPortal {
        /// The unrecognized id.
        id: String,
    },

    /// A request parameter is missing or malformed.
    #[error("bad request: {reason}")]
    BadRequest {
        /// What was wrong with the request.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No such item in the recipient's bucket.
    #[error("item not found: {item}")]
    NotFound {
        /// The missing item id.
        item: ItemId,
    },

    /// I/O error against the bucket filesystem.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
