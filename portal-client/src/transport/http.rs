//! Remote relay transport over HTTP.
//!
//! Request paths are derived from the shared seed, identical to the
//! derivation on the relay side. A millisecond timestamp query parameter
//! rides along on every request to defeat intermediary caches.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use portal_crypto::EndpointPaths;
use portal_types::{ItemId, KvDocument, PortalId};

use super::{Transport, TransportError};

/// HTTP transport against a remote relay.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    paths: EndpointPaths,
}

impl HttpTransport {
    /// Create a transport for `base_url`, deriving endpoints from `seed`.
    pub fn new(base_url: &str, seed: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            paths: EndpointPaths::derive(seed),
        }
    }

    fn url(&self, segment: &str) -> String {
        format!("{}/{}?ts={}", self.base_url, segment, now_millis())
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(TransportError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_bytes(&self, url: String) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let response = Self::check(response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn post_bytes(&self, url: String, body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .post(&url)
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let response = Self::check(response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn parse_doc(bytes: &[u8]) -> Result<KvDocument, TransportError> {
    KvDocument::parse_bytes(bytes).map_err(|e| TransportError::Protocol(e.to_string()))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn register(&self, request: KvDocument) -> Result<KvDocument, TransportError> {
        let url = self.url(&self.paths.register);
        let bytes = self.post_bytes(url, request.encode().into_bytes()).await?;
        parse_doc(&bytes)
    }

    async fn get_roster(&self) -> Result<KvDocument, TransportError> {
        let url = self.url(&self.paths.get_roster);
        let bytes = self.get_bytes(url).await?;
        parse_doc(&bytes)
    }

    async fn poll(&self, recipient: &PortalId) -> Result<Option<KvDocument>, TransportError> {
        let url = format!(
            "{}&recipient={}",
            self.url(&self.paths.poll),
            recipient
        );
        let bytes = self.get_bytes(url).await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        parse_doc(&bytes).map(Some)
    }

    async fn upload_file(
        &self,
        recipient: &PortalId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let url = format!(
            "{}&recipient={}",
            self.url(&self.paths.upload_file),
            recipient
        );
        self.post_bytes(url, payload).await?;
        Ok(())
    }

    async fn download_file(
        &self,
        recipient: &PortalId,
        item: &ItemId,
    ) -> Result<Vec<u8>, TransportError> {
        let url = format!(
            "{}&recipient={}&item={}",
            self.url(&self.paths.download_file),
            recipient,
            item
        );
        self.get_bytes(url).await
    }

    async fn upload_clipboard(
        &self,
        sender: &PortalId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let url = format!(
            "{}&sender={}",
            self.url(&self.paths.upload_clipboard),
            sender
        );
        self.post_bytes(url, payload).await?;
        Ok(())
    }

    async fn download_clipboard(
        &self,
        recipient: &PortalId,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let url = format!(
            "{}&recipient={}",
            self.url(&self.paths.download_clipboard),
            recipient
        );
        let bytes = self.get_bytes(url).await?;
        Ok(if bytes.is_empty() { None } else { Some(bytes) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_use_derived_segments() {
        let transport = HttpTransport::new("http://relay:8701/", "seed");
        let paths = EndpointPaths::derive("seed");
        let url = transport.url(&transport.paths.poll);
        assert!(url.starts_with(&format!("http://relay:8701/{}?ts=", paths.poll)));
    }
}
