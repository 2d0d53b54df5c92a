//! Mock transport for testing.
//!
//! Allows queueing responses and capturing requests for verification.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use portal_types::{ItemId, KvDocument, PortalId};

use super::{Transport, TransportError};

/// Mock transport for testing.
#[derive(Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Default)]
struct MockInner {
    register_response: Option<KvDocument>,
    roster_responses: VecDeque<KvDocument>,
    poll_responses: VecDeque<Option<KvDocument>>,
    downloads: HashMap<String, Vec<u8>>,
    clipboard_download: Option<Vec<u8>>,
    uploads: Vec<(PortalId, Vec<u8>)>,
    clipboard_uploads: Vec<(PortalId, Vec<u8>)>,
    roster_fetches: usize,
    clipboard_fetches: usize,
    fail_next_poll: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the document returned by `register`.
    pub fn set_register_response(&self, doc: KvDocument) {
        self.inner.lock().unwrap().register_response = Some(doc);
    }

    /// Queue a roster document.
    pub fn queue_roster(&self, doc: KvDocument) {
        self.inner.lock().unwrap().roster_responses.push_back(doc);
    }

    /// Queue a poll response (`None` = zero content).
    pub fn queue_poll(&self, response: Option<KvDocument>) {
        self.inner.lock().unwrap().poll_responses.push_back(response);
    }

    /// Stage a downloadable item.
    pub fn stage_download(&self, item: &ItemId, payload: Vec<u8>) {
        self.inner
            .lock()
            .unwrap()
            .downloads
            .insert(item.to_string(), payload);
    }

    /// Stage the clipboard download payload.
    pub fn stage_clipboard(&self, payload: Vec<u8>) {
        self.inner.lock().unwrap().clipboard_download = Some(payload);
    }

    /// All uploaded transfer payloads, with their recipients.
    pub fn uploads(&self) -> Vec<(PortalId, Vec<u8>)> {
        self.inner.lock().unwrap().uploads.clone()
    }

    /// All uploaded clipboard payloads, with their senders.
    pub fn clipboard_uploads(&self) -> Vec<(PortalId, Vec<u8>)> {
        self.inner.lock().unwrap().clipboard_uploads.clone()
    }

    /// Number of roster fetches so far.
    pub fn roster_fetches(&self) -> usize {
        self.inner.lock().unwrap().roster_fetches
    }

    /// Number of clipboard downloads so far.
    pub fn clipboard_fetches(&self) -> usize {
        self.inner.lock().unwrap().clipboard_fetches
    }

    /// Cause the next `poll` to fail with a network error.
    pub fn fail_next_poll(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_poll = Some(error.to_string());
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn register(&self, _request: KvDocument) -> Result<KvDocument, TransportError> {
        self.inner
            .lock()
            .unwrap()
            .register_response
            .clone()
            .ok_or_else(|| TransportError::Protocol("no register response staged".into()))
    }

    async fn get_roster(&self) -> Result<KvDocument, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.roster_fetches += 1;
        inner
            .roster_responses
            .pop_front()
            .ok_or_else(|| TransportError::Protocol("no roster staged".into()))
    }

    async fn poll(&self, _recipient: &PortalId) -> Result<Option<KvDocument>, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_poll.take() {
            return Err(TransportError::Network(error));
        }
        Ok(inner.poll_responses.pop_front().unwrap_or(None))
    }

    async fn upload_file(
        &self,
        recipient: &PortalId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.inner
            .lock()
            .unwrap()
            .uploads
            .push((recipient.clone(), payload));
        Ok(())
    }

    async fn download_file(
        &self,
        _recipient: &PortalId,
        item: &ItemId,
    ) -> Result<Vec<u8>, TransportError> {
        self.inner
            .lock()
            .unwrap()
            .downloads
            .remove(&item.to_string())
            .ok_or(TransportError::Rejected {
                status: 404,
                message: "item not found".into(),
            })
    }

    async fn upload_clipboard(
        &self,
        sender: &PortalId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.inner
            .lock()
            .unwrap()
            .clipboard_uploads
            .push((sender.clone(), payload));
        Ok(())
    }

    async fn download_clipboard(
        &self,
        _recipient: &PortalId,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.clipboard_fetches += 1;
        Ok(inner.clipboard_download.clone())
    }
}
