//! Error types for portal-client.

use crate::transport::TransportError;

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport error (network or relay rejection).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Cryptographic failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] portal_crypto::CryptoError),

    /// Malformed wire payload.
    #[error("wire error: {0}")]
    Wire(#[from] portal_types::WireError),

    /// Watcher error.
    #[error("watch error: {0}")]
    Watch(#[from] portal_watch::WatchError),

    /// Not registered with the relay yet.
    #[error("not registered")]
    NotRegistered,

    /// No roster entry for this destination.
    #[error("unknown destination: {name}")]
    UnknownDestination {
        /// The destination portal name.
        name: String,
    },

    /// The relay's response violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
