//! Transport abstraction for the PortalSync client.
//!
//! One method per relay operation, at the wire-document level: the engine
//! builds and parses `key=value` documents and opaque blobs, the transport
//! only moves them. Three implementations share the trait:
//!
//! - [`HttpTransport`] — remote relay over HTTP (derived path segments)
//! - [`LocalTransport`] — direct in-process calls into a relay's state,
//!   for a client embedded in the relay process
//! - [`MockTransport`] — scripted responses for tests

mod http;
mod local;
mod mock;

pub use http::HttpTransport;
pub use local::LocalTransport;
pub use mock::MockTransport;

use async_trait::async_trait;
use portal_types::{ItemId, KvDocument, PortalId};

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Transient network failure; the caller retries on its next tick.
    #[error("network error: {0}")]
    Network(String),

    /// The relay rejected the request.
    #[error("relay rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status code (or equivalent).
        status: u16,
        /// Relay-supplied message.
        message: String,
    },

    /// The response violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// One method per relay operation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit a registration document; returns the relay's response
    /// document (`id`, relay public `key`).
    async fn register(&self, request: KvDocument) -> Result<KvDocument, TransportError>;

    /// Fetch the roster document.
    async fn get_roster(&self) -> Result<KvDocument, TransportError>;

    /// Poll for pending work. `None` is the zero-content "no event"
    /// signal.
    async fn poll(&self, recipient: &PortalId) -> Result<Option<KvDocument>, TransportError>;

    /// Upload an opaque transfer payload for a recipient.
    async fn upload_file(
        &self,
        recipient: &PortalId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Download a pending item. The item is gone from the relay once this
    /// returns (at-most-once).
    async fn download_file(
        &self,
        recipient: &PortalId,
        item: &ItemId,
    ) -> Result<Vec<u8>, TransportError>;

    /// Upload a clipboard payload encrypted to the relay's key.
    async fn upload_clipboard(
        &self,
        sender: &PortalId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Download the shared clipboard re-encrypted to `recipient`. `None`
    /// when nothing is cached.
    async fn download_clipboard(
        &self,
        recipient: &PortalId,
    ) -> Result<Option<Vec<u8>>, TransportError>;
}
