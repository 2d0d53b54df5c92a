//! In-process transport for a client embedded in the relay process.
//!
//! Calls straight into the relay's directory, store, and clipboard cache,
//! with the same semantics as the HTTP surface. Rejections are reported
//! with the status code the HTTP surface would have used, so the engine
//! treats both transports identically.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use portal_crypto::PublicKey;
use portal_relay::error::{RelayError, StoreError};
use portal_relay::http::RelayState;
use portal_types::{ItemId, KvDocument, PortalId};

use super::{Transport, TransportError};

/// Transport backed by an in-process relay.
pub struct LocalTransport {
    state: Arc<RelayState>,
}

impl LocalTransport {
    /// Create a transport over shared relay state.
    pub fn new(state: Arc<RelayState>) -> Self {
        Self { state }
    }
}

fn reject(status: u16, err: impl std::fmt::Display) -> TransportError {
    TransportError::Rejected {
        status,
        message: err.to_string(),
    }
}

fn map_relay_error(err: RelayError) -> TransportError {
    let status = match &err {
        RelayError::RegistrationConflict { .. } => 409,
        RelayError::AdmissionDenied => 403,
        RelayError::DirectoryFull { .. } => 429,
        RelayError::UnknownPortal { .. } => 404,
        RelayError::Store(StoreError::NotFound { .. }) => 404,
        RelayError::BadRequest { .. } | RelayError::Wire(_) | RelayError::Crypto(_) => 400,
        _ => 500,
    };
    reject(status, err)
}

#[async_trait]
impl Transport for LocalTransport {
    async fn register(&self, request: KvDocument) -> Result<KvDocument, TransportError> {
        let name = request
            .require("name")
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        let key_bytes = BASE64
            .decode(request.require("key").map_err(|e| TransportError::Protocol(e.to_string()))?)
            .map_err(|_| TransportError::Protocol("public key is not valid base64".into()))?;
        let public_key: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| TransportError::Protocol("public key has wrong length".into()))?;
        let proof = match request.get("proof") {
            Some(b64) => Some(BASE64.decode(b64).map_err(|_| {
                TransportError::Protocol("admission proof is not valid base64".into())
            })?),
            None => None,
        };

        let id = self
            .state
            .directory
            .register(name, public_key, proof.as_deref())
            .map_err(map_relay_error)?;

        let mut response = KvDocument::new();
        response
            .set("id", id.as_str())
            .set("key", BASE64.encode(self.state.keypair.public_bytes()));
        Ok(response)
    }

    async fn get_roster(&self) -> Result<KvDocument, TransportError> {
        let mut doc = KvDocument::new();
        for (i, portal) in self.state.directory.list_roster().iter().enumerate() {
            doc.set(format!("id.{i}"), portal.id.as_str())
                .set(format!("name.{i}"), &portal.name)
                .set(format!("key.{i}"), BASE64.encode(portal.public_key));
        }
        Ok(doc)
    }

    async fn poll(&self, recipient: &PortalId) -> Result<Option<KvDocument>, TransportError> {
        // Same order as the HTTP handler: list first, so a storage error
        // leaves the refresh flags set for the next poll.
        let pending = self
            .state
            .store
            .list_pending(recipient, self.state.pending_limit)
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let (roster, clipboard) = self
            .state
            .directory
            .poll_flags(recipient)
            .ok_or_else(|| reject(404, format!("unknown portal: {recipient}")))?;

        if !roster && !clipboard && pending.is_empty() {
            return Ok(None);
        }
        let mut doc = KvDocument::new();
        if roster {
            doc.set("roster", "1");
        }
        if clipboard {
            doc.set("clipboard", "1");
        }
        for (i, item) in pending.iter().enumerate() {
            doc.set(format!("item.{i}"), item.to_string());
        }
        Ok(Some(doc))
    }

    async fn upload_file(
        &self,
        recipient: &PortalId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.state
            .store
            .put(recipient, &mut Cursor::new(payload))
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(())
    }

    async fn download_file(
        &self,
        recipient: &PortalId,
        item: &ItemId,
    ) -> Result<Vec<u8>, TransportError> {
        let mut blob = Vec::new();
        self.state
            .store
            .take_and_delete(recipient, item, &mut blob)
            .map_err(|e| match e {
                StoreError::NotFound { .. } => reject(404, e),
                other => TransportError::Network(other.to_string()),
            })?;
        Ok(blob)
    }

    async fn upload_clipboard(
        &self,
        sender: &PortalId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.state
            .clipboard
            .put(&payload, &self.state.keypair.secret)
            .map_err(map_relay_error)?;
        self.state.directory.flag_clipboard_refresh_except(sender);
        Ok(())
    }

    async fn download_clipboard(
        &self,
        recipient: &PortalId,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let portal = self
            .state
            .directory
            .get(recipient)
            .ok_or_else(|| reject(404, format!("unknown portal: {recipient}")))?;
        let public = PublicKey::from(portal.public_key);
        self.state.clipboard.get(&public).map_err(map_relay_error)
    }
}
