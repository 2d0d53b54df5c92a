//! ClientEngine - registration, polling, and encrypted send/receive.
//!
//! One engine instance drives one portal. Protocol logic is written once
//! against the [`Transport`] trait; the same code serves the standalone
//! HTTP client and the relay-embedded client.
//!
//! ```text
//! outbox event ─► send_path ──wrap+encrypt──► transport.upload_file
//! poll tick ───► poll_once ─► transport.poll ─► receive_item / refresh
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use portal_crypto::{
    decrypt_bytes, encrypt_bytes, encrypt_stream, read_key_frame, unwrap_key, wrap_key, FileKey,
    KeyFrame, PublicKey,
};
use portal_types::container::{
    begin_content, is_safe_relative_path, read_archive_entry, read_content_header, read_meta,
    write_archive_entry, write_meta,
};
use portal_types::{ItemId, KvDocument, PortalId};
use portal_watch::{BackendKind, FileEvent, WatchConfig, Watcher};

use crate::config::ClientConfig;
use crate::context::ClientContext;
use crate::error::{ClientError, Result};
use crate::roster::RosterEntry;
use crate::transport::{HttpTransport, Transport};

/// Transfer type marker in the container metadata.
const TYPE_FILE: &str = "file";
/// Transfer type marker for folder archives.
const TYPE_FOLDER: &str = "folder";

/// The client protocol engine.
pub struct ClientEngine<T: Transport> {
    config: ClientConfig,
    context: ClientContext,
    transport: T,
    watcher: Mutex<Option<Watcher>>,
    latest_clipboard: Mutex<Option<String>>,
}

impl<T: Transport> ClientEngine<T> {
    /// Create an engine with a fresh keypair.
    pub fn new(config: ClientConfig, transport: T) -> Self {
        let context = ClientContext::new(config.home.clone());
        Self {
            config,
            context,
            transport,
            watcher: Mutex::new(None),
            latest_clipboard: Mutex::new(None),
        }
    }

    /// The session context.
    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    /// The engine configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The configured poll cadence.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_secs)
    }

    /// Register with the relay and record the session.
    ///
    /// When the relay runs admission-gated, the configured relay public
    /// key is used to wrap a throwaway key as the admission proof.
    pub async fn register(&self) -> Result<()> {
        let mut request = KvDocument::new();
        request
            .set("name", &self.config.portal_name)
            .set("key", BASE64.encode(self.context.keypair.public_bytes()));

        if let Some(relay_key_b64) = &self.config.relay_public_key {
            let relay_public = decode_public_key(relay_key_b64)?;
            let proof = wrap_key(&FileKey::random(), &relay_public)?;
            request.set("proof", BASE64.encode(proof));
        }

        let response = self.transport.register(request).await?;
        let id = PortalId::parse(response.require("id")?)
            .ok_or_else(|| ClientError::Protocol("relay returned a malformed id".into()))?;
        let relay_public = decode_public_key(response.require("key")?)?;

        tracing::info!("Registered as {} ({})", self.config.portal_name, id);
        self.context.set_session(id, relay_public);
        Ok(())
    }

    /// Fetch the roster and reconcile outbox folders and watchers.
    ///
    /// Newly seen portals get an outbox folder created and watched;
    /// vanished portals get their watcher unregistered and their outbox
    /// folder removed.
    pub async fn refresh_roster(&self) -> Result<()> {
        let doc = self.transport.get_roster().await?;
        let entries = parse_roster(&doc)?;
        let diff = self
            .context
            .roster
            .replace(entries, &self.config.portal_name);

        let watcher = self.watcher.lock().expect("watcher lock poisoned");
        for entry in &diff.added {
            let outbox = self.context.outbox_dir(&entry.name);
            fs::create_dir_all(&outbox)?;
            if let Some(watcher) = watcher.as_ref() {
                watcher.watch(&entry.name, outbox)?;
            }
            tracing::info!("Portal {} joined", entry.name);
        }
        for entry in &diff.removed {
            if let Some(watcher) = watcher.as_ref() {
                watcher.unwatch(&entry.name);
            }
            let outbox = self.context.outbox_dir(&entry.name);
            if let Err(e) = fs::remove_dir_all(&outbox) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove outbox {:?}: {}", outbox, e);
                }
            }
            tracing::info!("Portal {} left", entry.name);
        }
        Ok(())
    }

    /// Ship one outbox entry to a destination portal.
    ///
    /// The source is renamed to the `.sending` convention while the upload
    /// runs and deleted afterwards whether or not the upload succeeded
    /// (at-most-once applies to the sender too).
    pub async fn send_path(&self, destination: &str, path: &Path) -> Result<()> {
        let result = self.send_path_inner(destination, path).await;
        if let Some(watcher) = self.watcher.lock().expect("watcher lock poisoned").as_ref() {
            watcher.complete(destination, path);
        }
        result
    }

    async fn send_path_inner(&self, destination: &str, path: &Path) -> Result<()> {
        let own_id = self.context.portal_id().ok_or(ClientError::NotRegistered)?;
        let entry =
            self.context
                .roster
                .by_name(destination)
                .ok_or_else(|| ClientError::UnknownDestination {
                    name: destination.to_string(),
                })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ClientError::Protocol("source path has no file name".into()))?;

        // Rename out of the watcher's sight while the upload runs.
        let sending = path.with_file_name(format!("{name}.sending"));
        fs::rename(path, &sending)?;

        let result = self
            .build_and_upload(&own_id, &entry, &name, &sending)
            .await;

        // Success or failure, the source is consumed.
        let cleanup = if sending.is_dir() {
            fs::remove_dir_all(&sending)
        } else {
            fs::remove_file(&sending)
        };
        if let Err(e) = cleanup {
            tracing::warn!("Failed to delete sent source {:?}: {}", sending, e);
        }
        result
    }

    async fn build_and_upload(
        &self,
        own_id: &PortalId,
        recipient: &RosterEntry,
        name: &str,
        source: &Path,
    ) -> Result<()> {
        let key = FileKey::random();
        let recipient_public = PublicKey::from(recipient.public_key);
        let wrapped = wrap_key(&key, &recipient_public)?;

        let is_folder = source.is_dir();
        let mut meta = KvDocument::new();
        meta.set("name", name)
            .set("sender", own_id.as_str())
            .set("type", if is_folder { TYPE_FOLDER } else { TYPE_FILE })
            .set("key", BASE64.encode(&wrapped));

        let mut payload = Vec::new();
        write_meta(&mut payload, &meta)?;
        begin_content(&mut payload)?;
        if is_folder {
            let archive = build_archive(source)?;
            encrypt_stream(&key, &mut std::io::Cursor::new(archive), &mut payload)?;
        } else {
            let mut file = fs::File::open(source)?;
            encrypt_stream(&key, &mut file, &mut payload)?;
        }

        tracing::debug!(
            "Sending {} ({} bytes) to {}",
            name,
            payload.len(),
            recipient.name
        );
        self.transport.upload_file(&recipient.id, payload).await?;
        Ok(())
    }

    /// Download, decrypt, and materialize one pending item.
    ///
    /// A pre-existing same-named destination is deleted first; last write
    /// wins, there is no merge.
    pub async fn receive_item(&self, item: &ItemId) -> Result<()> {
        let own_id = self.context.portal_id().ok_or(ClientError::NotRegistered)?;
        let payload = self.transport.download_file(&own_id, item).await?;

        let mut reader = std::io::Cursor::new(&payload[..]);
        let meta = read_meta(&mut reader)?;
        let name = meta.require("name")?.to_string();
        let sender_raw = meta.require("sender")?.to_string();
        let kind = meta.require("type")?.to_string();
        let wrapped = BASE64
            .decode(meta.require("key")?)
            .map_err(|_| ClientError::Protocol("wrapped key is not valid base64".into()))?;
        let key = unwrap_key(&wrapped, &self.context.keypair.secret)?;

        read_content_header(&mut reader)?;
        let content = &payload[reader.position() as usize..];
        let plaintext = decrypt_bytes(&key, content)?;

        if !is_safe_relative_path(&name) || name.contains('/') {
            return Err(ClientError::Protocol(format!(
                "unsafe transfer name: {name}"
            )));
        }

        let sender_name = PortalId::parse(&sender_raw)
            .and_then(|id| self.context.roster.by_id(&id))
            .map(|entry| entry.name)
            .unwrap_or(sender_raw);

        let inbox = self.context.inbox_dir(&sender_name);
        fs::create_dir_all(&inbox)?;
        let target = inbox.join(&name);
        remove_existing(&target)?;

        match kind.as_str() {
            TYPE_FOLDER => unpack_archive(&target, &plaintext)?,
            _ => fs::write(&target, &plaintext)?,
        }
        tracing::info!("Received {} from {}", name, sender_name);
        Ok(())
    }

    /// Share clipboard text, encrypted to the relay's key.
    pub async fn send_clipboard(&self, text: &str) -> Result<()> {
        let own_id = self.context.portal_id().ok_or(ClientError::NotRegistered)?;
        let relay_public = self.context.relay_public().ok_or(ClientError::NotRegistered)?;

        let key = FileKey::random();
        let mut payload = wrap_key(&key, &relay_public)?;
        payload.extend_from_slice(&encrypt_bytes(&key, text.as_bytes())?);
        self.transport.upload_clipboard(&own_id, payload).await?;
        Ok(())
    }

    /// Fetch the shared clipboard, re-encrypted to this portal.
    ///
    /// `None` when no clipboard content exists on the relay.
    pub async fn fetch_clipboard(&self) -> Result<Option<String>> {
        let own_id = self.context.portal_id().ok_or(ClientError::NotRegistered)?;
        let Some(payload) = self.transport.download_clipboard(&own_id).await? else {
            return Ok(None);
        };

        let mut reader = std::io::Cursor::new(&payload[..]);
        let frame = match read_key_frame(&mut reader, false)? {
            KeyFrame::Frame(bytes) => bytes,
            KeyFrame::NoData => unreachable!(),
        };
        let key = unwrap_key(&frame, &self.context.keypair.secret)?;
        let body = &payload[reader.position() as usize..];
        let text = String::from_utf8(decrypt_bytes(&key, body)?)
            .map_err(|_| ClientError::Protocol("clipboard text is not UTF-8".into()))?;

        *self
            .latest_clipboard
            .lock()
            .expect("clipboard lock poisoned") = Some(text.clone());
        Ok(Some(text))
    }

    /// The most recently fetched clipboard text.
    pub fn latest_clipboard(&self) -> Option<String> {
        self.latest_clipboard
            .lock()
            .expect("clipboard lock poisoned")
            .clone()
    }
}

impl<T: Transport + 'static> ClientEngine<T> {
    /// One poll tick: observe flags, then dispatch one background download
    /// task per pending item.
    ///
    /// Downloads are fire-and-forget: a slow or failing item never delays
    /// the rest of the batch or the next tick. Failures are logged inside
    /// their own task.
    pub async fn poll_once(self: Arc<Self>) -> Result<()> {
        let own_id = self.context.portal_id().ok_or(ClientError::NotRegistered)?;
        let Some(doc) = self.transport.poll(&own_id).await? else {
            return Ok(());
        };

        if doc.get("roster") == Some("1") {
            if let Err(e) = self.refresh_roster().await {
                tracing::warn!("Roster refresh failed: {}", e);
            }
        }
        if doc.get("clipboard") == Some("1") {
            if let Err(e) = self.fetch_clipboard().await {
                tracing::warn!("Clipboard fetch failed: {}", e);
            }
        }
        for raw in doc.indexed("item") {
            let Some(item) = ItemId::parse(raw) else {
                tracing::warn!("Relay reported malformed item id {}", raw);
                continue;
            };
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = engine.receive_item(&item).await {
                    tracing::warn!("Failed to receive item {}: {}", item, e);
                }
            });
        }
        Ok(())
    }

    /// Start watching outbox folders, wiring drained batches into send
    /// tasks. Call after the first roster refresh.
    pub fn start_watching(self: Arc<Self>) -> Result<()> {
        let watch_config = WatchConfig {
            lock_coordination: self.config.lock_coordination,
            backend: if self.config.native_watch {
                BackendKind::Native
            } else {
                BackendKind::Polling
            },
            ..WatchConfig::default()
        };
        let watcher = Watcher::spawn(watch_config)?;

        let engine = Arc::clone(&self);
        watcher.add_handler(Arc::new(move |destination: &str, batch: &[FileEvent]| {
            for event in batch {
                let engine = Arc::clone(&engine);
                let destination = destination.to_string();
                let path = event.path.clone();
                // Fire and forget: one failed transfer never blocks the rest.
                tokio::spawn(async move {
                    if let Err(e) = engine.send_path(&destination, &path).await {
                        tracing::warn!("Send of {:?} to {} failed: {}", path, destination, e);
                    }
                });
            }
        }));

        // Watch folders for portals already in the roster.
        for name in self.context.roster.names() {
            let outbox = self.context.outbox_dir(&name);
            fs::create_dir_all(&outbox)?;
            watcher.watch(&name, outbox)?;
        }

        *self.watcher.lock().expect("watcher lock poisoned") = Some(watcher);
        Ok(())
    }
}

impl ClientEngine<HttpTransport> {
    /// Build an engine talking HTTP to the configured relay, with endpoint
    /// paths derived from the configured seed.
    pub fn from_config(config: ClientConfig) -> Self {
        let transport = HttpTransport::new(&config.relay_url, &config.seed);
        Self::new(config, transport)
    }
}

/// Tracks a failure streak so the poll loop warns once per streak instead
/// of once per tick.
#[derive(Default)]
struct WarnStreak(AtomicBool);

impl WarnStreak {
    /// Record a failure. True exactly once, at the start of a streak.
    fn failure(&self) -> bool {
        !self.0.swap(true, Ordering::Relaxed)
    }

    /// Record a success. True when it ends a failure streak.
    fn success(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }
}

/// Spawn the fixed-interval poll loop.
///
/// Network failures are logged once per failure streak; the loop retries
/// on the next tick with no backoff, and nothing terminates it short of
/// aborting the handle.
pub fn spawn_poll_loop<T: Transport + 'static>(
    engine: Arc<ClientEngine<T>>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let warned = WarnStreak::default();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match engine.clone().poll_once().await {
                Ok(()) => {
                    if warned.success() {
                        tracing::info!("Relay connectivity restored");
                    }
                }
                Err(e) => {
                    if warned.failure() {
                        tracing::warn!("Poll failed (suppressing repeats): {}", e);
                    } else {
                        tracing::debug!("Poll still failing: {}", e);
                    }
                }
            }
        }
    })
}

fn decode_public_key(b64: &str) -> Result<PublicKey> {
    let bytes = BASE64
        .decode(b64)
        .map_err(|_| ClientError::Protocol("public key is not valid base64".into()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ClientError::Protocol("public key has wrong length".into()))?;
    Ok(PublicKey::from(bytes))
}

fn parse_roster(doc: &KvDocument) -> Result<Vec<RosterEntry>> {
    let ids = doc.indexed("id");
    let names = doc.indexed("name");
    let keys = doc.indexed("key");
    if ids.len() != names.len() || ids.len() != keys.len() {
        return Err(ClientError::Protocol("ragged roster document".into()));
    }

    let mut entries = Vec::with_capacity(ids.len());
    for ((id, name), key) in ids.iter().zip(&names).zip(&keys) {
        let id = PortalId::parse(id)
            .ok_or_else(|| ClientError::Protocol(format!("malformed roster id: {id}")))?;
        let key_bytes = BASE64
            .decode(key)
            .map_err(|_| ClientError::Protocol("roster key is not valid base64".into()))?;
        let public_key: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| ClientError::Protocol("roster key has wrong length".into()))?;
        entries.push(RosterEntry {
            id,
            name: name.to_string(),
            public_key,
        });
    }
    Ok(entries)
}

/// Serialize a folder into archive records, files only, paths relative to
/// the folder root.
fn build_archive(root: &Path) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut stack = vec![PathBuf::new()];
    while let Some(rel) = stack.pop() {
        for entry in fs::read_dir(root.join(&rel))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = rel.join(&name);
            if entry.file_type()?.is_dir() {
                stack.push(child);
            } else {
                let data = fs::read(entry.path())?;
                let path = child.to_string_lossy().replace('\\', "/");
                write_archive_entry(&mut out, &path, &data)?;
            }
        }
    }
    Ok(out)
}

/// Materialize archive records under `target`.
fn unpack_archive(target: &Path, plaintext: &[u8]) -> Result<()> {
    fs::create_dir_all(target)?;
    let mut reader = std::io::Cursor::new(plaintext);
    while let Some(entry) = read_archive_entry(&mut reader)? {
        // read_archive_entry already rejected traversal paths.
        let dest = target.join(&entry.path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dest, &entry.data)?;
    }
    Ok(())
}

fn remove_existing(target: &Path) -> Result<()> {
    if target.is_dir() {
        fs::remove_dir_all(target)?;
    } else if target.exists() {
        fs::remove_file(target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LocalTransport, MockTransport};
    use portal_crypto::PortalKeyPair;
    use portal_relay::config::Config as RelayConfig;
    use portal_relay::http::RelayState;
    use tempfile::TempDir;

    fn test_config(home: &Path, name: &str) -> ClientConfig {
        ClientConfig {
            portal_name: name.to_string(),
            relay_url: "http://localhost:0".to_string(),
            seed: "test-seed".to_string(),
            home: home.to_path_buf(),
            poll_interval_secs: 5,
            relay_public_key: None,
            native_watch: false,
            lock_coordination: false,
        }
    }

    fn mock_engine(home: &Path) -> Arc<ClientEngine<MockTransport>> {
        Arc::new(ClientEngine::new(
            test_config(home, "self"),
            MockTransport::new(),
        ))
    }

    /// Background download tasks finish on their own schedule; poll a
    /// condition instead of sleeping a fixed amount.
    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..300 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within three seconds");
    }

    fn registered(engine: &ClientEngine<MockTransport>) -> PortalId {
        let id = PortalId::generate();
        let relay = PortalKeyPair::generate();
        engine.context().set_session(id.clone(), relay.public);
        id
    }

    fn roster_doc(entries: &[(&PortalId, &str, &PortalKeyPair)]) -> KvDocument {
        let mut doc = KvDocument::new();
        for (i, (id, name, pair)) in entries.iter().enumerate() {
            doc.set(format!("id.{i}"), id.as_str())
                .set(format!("name.{i}"), *name)
                .set(format!("key.{i}"), BASE64.encode(pair.public_bytes()));
        }
        doc
    }

    // ===========================================
    // Registration and roster
    // ===========================================

    #[tokio::test]
    async fn register_records_session() {
        let home = TempDir::new().unwrap();
        let engine = mock_engine(home.path());
        let relay = PortalKeyPair::generate();
        let id = PortalId::generate();

        let mut response = KvDocument::new();
        response
            .set("id", id.as_str())
            .set("key", BASE64.encode(relay.public_bytes()));
        engine.transport.set_register_response(response);

        engine.register().await.unwrap();
        assert_eq!(engine.context().portal_id(), Some(id));
        assert_eq!(
            engine.context().relay_public().unwrap().as_bytes(),
            relay.public.as_bytes()
        );
    }

    #[tokio::test]
    async fn refresh_roster_creates_and_removes_outboxes() {
        let home = TempDir::new().unwrap();
        let engine = mock_engine(home.path());
        registered(&engine);

        let beta_id = PortalId::generate();
        let beta_pair = PortalKeyPair::generate();
        engine
            .transport
            .queue_roster(roster_doc(&[(&beta_id, "beta", &beta_pair)]));
        engine.refresh_roster().await.unwrap();

        let outbox = engine.context().outbox_dir("beta");
        assert!(outbox.is_dir());
        assert!(engine.context().roster.by_name("beta").is_some());

        // Beta vanishes: outbox folder goes with it.
        engine.transport.queue_roster(KvDocument::new());
        engine.refresh_roster().await.unwrap();
        assert!(!outbox.exists());
        assert!(engine.context().roster.by_name("beta").is_none());
    }

    #[tokio::test]
    async fn ragged_roster_is_rejected() {
        let home = TempDir::new().unwrap();
        let engine = mock_engine(home.path());
        registered(&engine);

        let mut doc = KvDocument::new();
        doc.set("id.0", "abc").set("name.0", "beta"); // key.0 missing
        engine.transport.queue_roster(doc);
        assert!(matches!(
            engine.refresh_roster().await,
            Err(ClientError::Protocol(_))
        ));
    }

    // ===========================================
    // Polling
    // ===========================================

    #[tokio::test]
    async fn poll_zero_content_does_nothing() {
        let home = TempDir::new().unwrap();
        let engine = mock_engine(home.path());
        registered(&engine);

        engine.transport.queue_poll(None);
        engine.clone().poll_once().await.unwrap();
        assert_eq!(engine.transport.roster_fetches(), 0);
        assert_eq!(engine.transport.clipboard_fetches(), 0);
    }

    #[tokio::test]
    async fn poll_roster_flag_triggers_refresh() {
        let home = TempDir::new().unwrap();
        let engine = mock_engine(home.path());
        registered(&engine);

        let mut response = KvDocument::new();
        response.set("roster", "1");
        engine.transport.queue_poll(Some(response));
        engine.transport.queue_roster(KvDocument::new());

        engine.clone().poll_once().await.unwrap();
        assert_eq!(engine.transport.roster_fetches(), 1);
    }

    #[tokio::test]
    async fn pending_items_download_in_background() {
        let home = TempDir::new().unwrap();
        let engine = mock_engine(home.path());
        registered(&engine);

        let sender = PortalId::generate();
        let first = ItemId::new();
        let second = ItemId::new();
        for (item, name, body) in [(first, "a.txt", b"aa"), (second, "b.txt", b"bb")] {
            let payload = build_transfer(
                name,
                &sender,
                TYPE_FILE,
                body,
                &engine.context().keypair.public,
            );
            engine.transport.stage_download(&item, payload);
        }

        let mut response = KvDocument::new();
        response
            .set("item.0", first.to_string())
            .set("item.1", second.to_string());
        engine.transport.queue_poll(Some(response));

        // poll_once only dispatches; the downloads land on their own tasks.
        engine.clone().poll_once().await.unwrap();

        let inbox = engine.context().inbox_dir(sender.as_str());
        wait_until(|| inbox.join("a.txt").exists() && inbox.join("b.txt").exists()).await;
        assert_eq!(fs::read(inbox.join("a.txt")).unwrap(), b"aa");
        assert_eq!(fs::read(inbox.join("b.txt")).unwrap(), b"bb");
    }

    #[tokio::test]
    async fn poll_before_registration_fails() {
        let home = TempDir::new().unwrap();
        let engine = mock_engine(home.path());
        assert!(matches!(
            engine.clone().poll_once().await,
            Err(ClientError::NotRegistered)
        ));
    }

    #[tokio::test]
    async fn poll_network_error_propagates() {
        let home = TempDir::new().unwrap();
        let engine = mock_engine(home.path());
        registered(&engine);
        engine.transport.fail_next_poll("connection refused");
        assert!(matches!(
            engine.clone().poll_once().await,
            Err(ClientError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn poll_loop_outlives_failures_and_resumes() {
        let home = TempDir::new().unwrap();
        let engine = mock_engine(home.path());
        registered(&engine);

        // First tick fails; a later tick must still process the queued
        // response.
        engine.transport.fail_next_poll("connection refused");
        let mut response = KvDocument::new();
        response.set("roster", "1");
        engine.transport.queue_poll(Some(response));
        engine.transport.queue_roster(KvDocument::new());

        let handle = spawn_poll_loop(engine.clone(), Duration::from_millis(10));
        wait_until(|| engine.transport.roster_fetches() == 1).await;
        handle.abort();
    }

    #[test]
    fn warning_fires_once_per_failure_streak() {
        let streak = WarnStreak::default();

        assert!(streak.failure());
        assert!(!streak.failure());
        assert!(!streak.failure());

        // Recovery is reported once, then successes stay quiet.
        assert!(streak.success());
        assert!(!streak.success());

        // A new streak warns again.
        assert!(streak.failure());
        assert!(!streak.failure());
    }

    // ===========================================
    // Send
    // ===========================================

    #[tokio::test]
    async fn send_builds_container_and_consumes_source() {
        let home = TempDir::new().unwrap();
        let engine = mock_engine(home.path());
        let own_id = registered(&engine);

        let beta_id = PortalId::generate();
        let beta_pair = PortalKeyPair::generate();
        engine
            .transport
            .queue_roster(roster_doc(&[(&beta_id, "beta", &beta_pair)]));
        engine.refresh_roster().await.unwrap();

        let source = engine.context().outbox_dir("beta").join("report.txt");
        fs::write(&source, b"quarterly numbers").unwrap();

        engine.send_path("beta", &source).await.unwrap();
        assert!(!source.exists());

        let uploads = engine.transport.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, beta_id);

        // Decode the container as the recipient would.
        let payload = &uploads[0].1;
        let mut reader = std::io::Cursor::new(&payload[..]);
        let meta = read_meta(&mut reader).unwrap();
        assert_eq!(meta.get("name"), Some("report.txt"));
        assert_eq!(meta.get("sender"), Some(own_id.as_str()));
        assert_eq!(meta.get("type"), Some(TYPE_FILE));

        let wrapped = BASE64.decode(meta.require("key").unwrap()).unwrap();
        let key = unwrap_key(&wrapped, &beta_pair.secret).unwrap();
        read_content_header(&mut reader).unwrap();
        let content = &payload[reader.position() as usize..];
        assert_eq!(decrypt_bytes(&key, content).unwrap(), b"quarterly numbers");
    }

    #[tokio::test]
    async fn send_to_unknown_destination_fails_and_consumes_nothing() {
        let home = TempDir::new().unwrap();
        let engine = mock_engine(home.path());
        registered(&engine);

        let source = home.path().join("file.txt");
        fs::write(&source, b"data").unwrap();

        assert!(matches!(
            engine.send_path("ghost", &source).await,
            Err(ClientError::UnknownDestination { .. })
        ));
        // Destination was never resolved, so the source survives.
        assert!(source.exists());
    }

    // ===========================================
    // Receive
    // ===========================================

    fn build_transfer(
        name: &str,
        sender: &PortalId,
        kind: &str,
        plaintext: &[u8],
        recipient: &PublicKey,
    ) -> Vec<u8> {
        let key = FileKey::random();
        let wrapped = wrap_key(&key, recipient).unwrap();
        let mut meta = KvDocument::new();
        meta.set("name", name)
            .set("sender", sender.as_str())
            .set("type", kind)
            .set("key", BASE64.encode(&wrapped));
        let mut payload = Vec::new();
        write_meta(&mut payload, &meta).unwrap();
        begin_content(&mut payload).unwrap();
        encrypt_stream(&key, &mut std::io::Cursor::new(plaintext), &mut payload).unwrap();
        payload
    }

    #[tokio::test]
    async fn receive_materializes_file_under_sender_folder() {
        let home = TempDir::new().unwrap();
        let engine = mock_engine(home.path());
        registered(&engine);

        let sender = PortalId::generate();
        let item = ItemId::new();
        let payload = build_transfer(
            "notes.md",
            &sender,
            TYPE_FILE,
            b"hello",
            &engine.context().keypair.public,
        );
        engine.transport.stage_download(&item, payload);

        engine.receive_item(&item).await.unwrap();

        // Sender not in roster: falls back to its id as folder name.
        let target = engine.context().inbox_dir(sender.as_str()).join("notes.md");
        assert_eq!(fs::read(&target).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn receive_replaces_existing_destination() {
        let home = TempDir::new().unwrap();
        let engine = mock_engine(home.path());
        registered(&engine);

        let sender = PortalId::generate();
        let inbox = engine.context().inbox_dir(sender.as_str());
        fs::create_dir_all(&inbox).unwrap();
        fs::write(inbox.join("doc.txt"), b"stale").unwrap();

        let item = ItemId::new();
        let payload = build_transfer(
            "doc.txt",
            &sender,
            TYPE_FILE,
            b"fresh",
            &engine.context().keypair.public,
        );
        engine.transport.stage_download(&item, payload);
        engine.receive_item(&item).await.unwrap();

        assert_eq!(fs::read(inbox.join("doc.txt")).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn receive_rejects_unsafe_names() {
        let home = TempDir::new().unwrap();
        let engine = mock_engine(home.path());
        registered(&engine);

        let sender = PortalId::generate();
        let item = ItemId::new();
        let payload = build_transfer(
            "../escape.txt",
            &sender,
            TYPE_FILE,
            b"evil",
            &engine.context().keypair.public,
        );
        engine.transport.stage_download(&item, payload);

        assert!(matches!(
            engine.receive_item(&item).await,
            Err(ClientError::Protocol(_))
        ));
    }

    // ===========================================
    // End-to-end through an in-process relay
    // ===========================================

    fn local_pair(
        storage: &TempDir,
        alpha_home: &TempDir,
        beta_home: &TempDir,
    ) -> (
        Arc<ClientEngine<LocalTransport>>,
        Arc<ClientEngine<LocalTransport>>,
    ) {
        let mut relay_config = RelayConfig::default();
        relay_config.storage.root = storage.path().to_path_buf();
        let state = Arc::new(RelayState::from_config(&relay_config, "shared-seed").unwrap());

        let alpha = Arc::new(ClientEngine::new(
            test_config(alpha_home.path(), "alpha"),
            LocalTransport::new(state.clone()),
        ));
        let beta = Arc::new(ClientEngine::new(
            test_config(beta_home.path(), "beta"),
            LocalTransport::new(state),
        ));
        (alpha, beta)
    }

    #[tokio::test]
    async fn file_travels_between_portals() {
        let (storage, alpha_home, beta_home) =
            (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
        let (alpha, beta) = local_pair(&storage, &alpha_home, &beta_home);

        alpha.register().await.unwrap();
        beta.register().await.unwrap();
        alpha.refresh_roster().await.unwrap();
        beta.refresh_roster().await.unwrap();

        let source = alpha.context().outbox_dir("beta").join("plan.txt");
        fs::write(&source, b"the plan").unwrap();
        alpha.send_path("beta", &source).await.unwrap();

        beta.clone().poll_once().await.unwrap();

        let target = beta.context().inbox_dir("alpha").join("plan.txt");
        wait_until(|| target.exists()).await;
        assert_eq!(fs::read(&target).unwrap(), b"the plan");
        // At-most-once: a second poll finds nothing pending.
        beta.clone().poll_once().await.unwrap();
    }

    #[tokio::test]
    async fn folder_travels_between_portals() {
        let (storage, alpha_home, beta_home) =
            (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
        let (alpha, beta) = local_pair(&storage, &alpha_home, &beta_home);

        alpha.register().await.unwrap();
        beta.register().await.unwrap();
        alpha.refresh_roster().await.unwrap();
        beta.refresh_roster().await.unwrap();

        let folder = alpha.context().outbox_dir("beta").join("project");
        fs::create_dir_all(folder.join("src")).unwrap();
        fs::write(folder.join("readme.txt"), b"top").unwrap();
        fs::write(folder.join("src").join("main.rs"), b"fn main() {}").unwrap();

        alpha.send_path("beta", &folder).await.unwrap();
        assert!(!folder.exists());

        beta.clone().poll_once().await.unwrap();

        let target = beta.context().inbox_dir("alpha").join("project");
        wait_until(|| target.join("readme.txt").exists() && target.join("src").join("main.rs").exists())
            .await;
        assert_eq!(fs::read(target.join("readme.txt")).unwrap(), b"top");
        assert_eq!(
            fs::read(target.join("src").join("main.rs")).unwrap(),
            b"fn main() {}"
        );
    }

    #[tokio::test]
    async fn clipboard_travels_between_portals() {
        let (storage, alpha_home, beta_home) =
            (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
        let (alpha, beta) = local_pair(&storage, &alpha_home, &beta_home);

        alpha.register().await.unwrap();
        beta.register().await.unwrap();

        alpha.send_clipboard("copied text").await.unwrap();

        // Beta's poll observes the clipboard flag and fetches.
        beta.clone().poll_once().await.unwrap();
        assert_eq!(beta.latest_clipboard().as_deref(), Some("copied text"));
    }

    #[tokio::test]
    async fn gated_registration_with_configured_relay_key() {
        let storage = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();

        let mut relay_config = RelayConfig::default();
        relay_config.storage.root = storage.path().to_path_buf();
        relay_config.server.admission_gated = true;
        let state = Arc::new(RelayState::from_config(&relay_config, "seed").unwrap());

        // Without the relay key, registration is denied.
        let engine = ClientEngine::new(
            test_config(home.path(), "alpha"),
            LocalTransport::new(state.clone()),
        );
        assert!(engine.register().await.is_err());

        // With it, the engine builds a proof and gets in.
        let mut config = test_config(home.path(), "alpha");
        config.relay_public_key = Some(BASE64.encode(state.keypair.public_bytes()));
        let engine = ClientEngine::new(config, LocalTransport::new(state));
        engine.register().await.unwrap();
        assert!(engine.context().portal_id().is_some());
    }

    // ===========================================
    // Config wiring
    // ===========================================

    #[test]
    fn from_config_wires_the_http_transport() {
        let config = ClientConfig {
            portal_name: "desk".to_string(),
            relay_url: "http://relay:8701".to_string(),
            seed: "cafe".to_string(),
            home: PathBuf::from("/tmp/desk-home"),
            poll_interval_secs: 2,
            relay_public_key: None,
            native_watch: true,
            lock_coordination: true,
        };
        let engine = ClientEngine::from_config(config);
        assert_eq!(engine.poll_interval(), Duration::from_secs(2));
        assert_eq!(engine.context().home(), &PathBuf::from("/tmp/desk-home"));
        assert!(engine.context().portal_id().is_none());
    }
}
