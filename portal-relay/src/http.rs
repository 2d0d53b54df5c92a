//! HTTP surface for the relay.
//!
//! Every route is mounted at a path segment derived from the shared seed,
//! so the URL itself is the capability. Request and response payloads are
//! `key=value` documents for control operations and raw bytes for blob
//! transfer. The `ts` query parameter is accepted everywhere and ignored
//! (clients send it to defeat intermediary caches).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;

use portal_crypto::{EndpointPaths, PortalKeyPair, PublicKey, PUBLIC_KEY_LEN};
use portal_types::{ItemId, KvDocument, PortalId};

use crate::clipboard::ClipboardCache;
use crate::config::Config;
use crate::directory::{DirectorySettings, RelayDirectory};
use crate::error::{RelayError, Result, StoreError};
use crate::store::RelayStore;

/// Shared server state: directory, store, clipboard cache, relay keypair.
pub struct RelayState {
    /// Live-portal registry.
    pub directory: RelayDirectory,
    /// Pending-item blob buckets.
    pub store: RelayStore,
    /// Relay-held clipboard cache.
    pub clipboard: ClipboardCache,
    /// The relay's own keypair (admission proofs, clipboard).
    pub keypair: PortalKeyPair,
    /// Derived path segments for this seed.
    pub paths: EndpointPaths,
    /// Maximum pending items reported per poll.
    pub pending_limit: usize,
}

impl RelayState {
    /// Build the state from configuration and a resolved seed.
    pub fn from_config(config: &Config, seed: &str) -> Result<Self> {
        let keypair = PortalKeyPair::generate();
        let directory = RelayDirectory::new(
            DirectorySettings {
                admission_gated: config.server.admission_gated,
                allow_key_override: config.server.allow_key_override,
                max_portals: config.server.max_portals,
            },
            keypair.secret.clone(),
        );
        let store = RelayStore::open(&config.storage.root)?;
        Ok(Self {
            directory,
            store,
            clipboard: ClipboardCache::new(),
            keypair,
            paths: EndpointPaths::derive(seed),
            pending_limit: config.storage.pending_limit,
        })
    }
}

/// Build the router, mounting each operation at its derived segment.
pub fn build_router(state: Arc<RelayState>) -> Router {
    let p = state.paths.clone();
    Router::new()
        .route(&format!("/{}", p.register), post(register_handler))
        .route(&format!("/{}", p.get_roster), get(roster_handler))
        .route(&format!("/{}", p.poll), get(poll_handler))
        .route(&format!("/{}", p.upload_file), post(upload_file_handler))
        .route(&format!("/{}", p.download_file), get(download_file_handler))
        .route(
            &format!("/{}", p.upload_clipboard),
            post(upload_clipboard_handler),
        )
        .route(
            &format!("/{}", p.download_clipboard),
            get(download_clipboard_handler),
        )
        .layer(Extension(state))
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::RegistrationConflict { .. } => StatusCode::CONFLICT,
            RelayError::AdmissionDenied => StatusCode::FORBIDDEN,
            RelayError::DirectoryFull { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayError::UnknownPortal { .. } => StatusCode::NOT_FOUND,
            RelayError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            RelayError::BadRequest { .. } | RelayError::Wire(_) => StatusCode::BAD_REQUEST,
            RelayError::Crypto(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

fn parse_portal_id(raw: &str) -> Result<PortalId> {
    PortalId::parse(raw).ok_or_else(|| RelayError::BadRequest {
        reason: format!("malformed portal id: {raw}"),
    })
}

fn parse_public_key(b64: &str) -> Result<[u8; PUBLIC_KEY_LEN]> {
    let bytes = BASE64.decode(b64).map_err(|_| RelayError::BadRequest {
        reason: "public key is not valid base64".into(),
    })?;
    bytes.try_into().map_err(|_| RelayError::BadRequest {
        reason: "public key has wrong length".into(),
    })
}

/// `POST /{register}` — body is a `key=value` document with `name`, `key`
/// (base64 public key), and optionally `proof` (base64 wrapped-key frame).
///
/// Responds with `id` and the relay's public key so the client can wrap
/// clipboard keys and admission proofs.
async fn register_handler(
    Extension(state): Extension<Arc<RelayState>>,
    body: String,
) -> Result<String> {
    let doc = KvDocument::parse(&body)?;
    let name = doc.require("name")?;
    let public_key = parse_public_key(doc.require("key")?)?;
    let proof = match doc.get("proof") {
        Some(b64) => Some(BASE64.decode(b64).map_err(|_| RelayError::BadRequest {
            reason: "admission proof is not valid base64".into(),
        })?),
        None => None,
    };

    let id = state
        .directory
        .register(name, public_key, proof.as_deref())?;

    let mut response = KvDocument::new();
    response
        .set("id", id.as_str())
        .set("key", BASE64.encode(state.keypair.public_bytes()));
    Ok(response.encode())
}

/// `GET /{get-roster}` — indexed `id.N` / `name.N` / `key.N` lines, one
/// triple per live portal.
async fn roster_handler(Extension(state): Extension<Arc<RelayState>>) -> Result<String> {
    let mut doc = KvDocument::new();
    for (i, portal) in state.directory.list_roster().iter().enumerate() {
        doc.set(format!("id.{i}"), portal.id.as_str())
            .set(format!("name.{i}"), &portal.name)
            .set(format!("key.{i}"), BASE64.encode(portal.public_key));
    }
    Ok(doc.encode())
}

#[derive(Deserialize)]
struct PollQuery {
    recipient: String,
}

/// `GET /{poll}?recipient=` — touches the portal, observes and clears its
/// refresh flags, and lists pending items. Nothing to report yields a
/// zero-content body, the defined "no event" signal.
async fn poll_handler(
    Extension(state): Extension<Arc<RelayState>>,
    Query(query): Query<PollQuery>,
) -> Result<String> {
    let recipient = parse_portal_id(&query.recipient)?;
    // Listing can fail; run it before poll_flags clears the refresh flags,
    // so an error here leaves them set for the next poll.
    let pending = state.store.list_pending(&recipient, state.pending_limit)?;
    let (roster, clipboard) =
        state
            .directory
            .poll_flags(&recipient)
            .ok_or_else(|| RelayError::UnknownPortal {
                id: recipient.to_string(),
            })?;

    if !roster && !clipboard && pending.is_empty() {
        return Ok(String::new());
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
    Ok(doc.encode())
}

#[derive(Deserialize)]
struct UploadQuery {
    recipient: String,
}

/// `POST /{upload-file}?recipient=` — stores the opaque body in the
/// recipient's bucket and responds with `item=<id>`.
async fn upload_file_handler(
    Extension(state): Extension<Arc<RelayState>>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<String> {
    let recipient = parse_portal_id(&query.recipient)?;
    let item = state
        .store
        .put(&recipient, &mut std::io::Cursor::new(&body[..]))?;

    let mut doc = KvDocument::new();
    doc.set("item", item.to_string());
    Ok(doc.encode())
}

#[derive(Deserialize)]
struct DownloadQuery {
    recipient: String,
    item: String,
}

/// `GET /{download-file}?recipient=&item=` — streams the blob out and
/// deletes it (at-most-once).
async fn download_file_handler(
    Extension(state): Extension<Arc<RelayState>>,
    Query(query): Query<DownloadQuery>,
) -> Result<Vec<u8>> {
    let recipient = parse_portal_id(&query.recipient)?;
    let item = ItemId::parse(&query.item).ok_or_else(|| RelayError::BadRequest {
        reason: format!("malformed item id: {}", query.item),
    })?;

    let mut blob = Vec::new();
    state.store.take_and_delete(&recipient, &item, &mut blob)?;
    Ok(blob)
}

#[derive(Deserialize)]
struct ClipboardUploadQuery {
    sender: String,
}

/// `POST /{upload-clipboard}?sender=` — body is a wrapped-key frame
/// addressed to the relay followed by `IV || ciphertext`. Every other
/// portal is flagged for a clipboard refresh.
async fn upload_clipboard_handler(
    Extension(state): Extension<Arc<RelayState>>,
    Query(query): Query<ClipboardUploadQuery>,
    body: Bytes,
) -> Result<String> {
    let sender = parse_portal_id(&query.sender)?;
    state.clipboard.put(&body, &state.keypair.secret)?;
    state.directory.flag_clipboard_refresh_except(&sender);
    Ok(String::new())
}

#[derive(Deserialize)]
struct ClipboardDownloadQuery {
    recipient: String,
}

/// `GET /{download-clipboard}?recipient=` — re-encrypts the cached text to
/// the recipient's key. Zero-content when nothing is cached.
async fn download_clipboard_handler(
    Extension(state): Extension<Arc<RelayState>>,
    Query(query): Query<ClipboardDownloadQuery>,
) -> Result<Vec<u8>> {
    let recipient = parse_portal_id(&query.recipient)?;
    let portal = state
        .directory
        .get(&recipient)
        .ok_or_else(|| RelayError::UnknownPortal {
            id: recipient.to_string(),
        })?;

    let public = PublicKey::from(portal.public_key);
    match state.clipboard.get(&public)? {
        Some(payload) => Ok(payload),
        None => Ok(Vec::new()),
    }
}
