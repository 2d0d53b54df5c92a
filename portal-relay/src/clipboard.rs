//! Relay-held clipboard cache.
//!
//! Clipboard text is the one payload the relay can read: uploads are
//! encrypted *to the relay's key*, so the relay unwraps the file key and
//! re-targets the stream to each recipient's key on download. Files never
//! get this treatment; they stay opaque end to end. The asymmetry is
//! deliberate: clipboard text is broadcast to every portal, and
//! per-recipient re-encryption has to happen somewhere that can hold the
//! key.
//!
//! The cache keeps the uploaded ciphertext together with the unwrapped
//! file key, never the decrypted text; plaintext exists only transiently,
//! while an upload is validated and inside the single-pass re-encryption.

use std::io::Cursor;
use std::sync::Mutex;

use portal_crypto::{
    decrypt_bytes, read_key_frame, reencrypt_stream, unwrap_key, wrap_key, FileKey, KeyFrame,
    PublicKey, SecretKey,
};

use crate::error::{RelayError, Result};

/// One cached clipboard payload: the uploaded `IV || ciphertext` and the
/// file key it is encrypted under.
struct ClipboardSlot {
    key: FileKey,
    ciphertext: Vec<u8>,
}

/// The current shared clipboard content, if any.
pub struct ClipboardCache {
    slot: Mutex<Option<ClipboardSlot>>,
}

impl ClipboardCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Accept an uploaded clipboard payload.
    ///
    /// The payload is a wrapped-key frame addressed to the relay, followed
    /// by `IV || ciphertext`. The ciphertext must decrypt to UTF-8 text;
    /// it then replaces whatever was cached before.
    pub fn put(&self, payload: &[u8], relay_secret: &SecretKey) -> Result<()> {
        let mut reader = Cursor::new(payload);
        let frame = match read_key_frame(&mut reader, false)? {
            KeyFrame::Frame(bytes) => bytes,
            // allow_empty is false, so read_key_frame never returns NoData.
            KeyFrame::NoData => unreachable!(),
        };
        let key = unwrap_key(&frame, relay_secret)?;
        let ciphertext = payload[reader.position() as usize..].to_vec();

        // Reject garbage up front; the decrypted text is dropped here.
        let plaintext = decrypt_bytes(&key, &ciphertext)?;
        let chars = std::str::from_utf8(&plaintext)
            .map_err(|_| RelayError::BadRequest {
                reason: "clipboard text is not UTF-8".into(),
            })?
            .chars()
            .count();

        tracing::debug!("Clipboard updated ({} chars)", chars);
        let mut slot = self.slot.lock().expect("clipboard cache poisoned");
        *slot = Some(ClipboardSlot { key, ciphertext });
        Ok(())
    }

    /// Re-encrypt the cached content to a recipient's key.
    ///
    /// Returns `None` when nothing is cached. Each call re-targets the
    /// stored ciphertext under a fresh file key in a single pass; the
    /// returned payload is the wrapped-key frame followed by
    /// `IV || ciphertext`, mirroring the upload format.
    pub fn get(&self, recipient: &PublicKey) -> Result<Option<Vec<u8>>> {
        let slot = self.slot.lock().expect("clipboard cache poisoned");
        let Some(slot) = slot.as_ref() else {
            return Ok(None);
        };

        let fresh = FileKey::random();
        let mut payload = wrap_key(&fresh, recipient)?;
        reencrypt_stream(
            &slot.key,
            &fresh,
            &mut Cursor::new(&slot.ciphertext),
            &mut payload,
        )?;
        Ok(Some(payload))
    }

    /// Whether any clipboard content is cached.
    pub fn has_content(&self) -> bool {
        self.slot.lock().expect("clipboard cache poisoned").is_some()
    }
}

impl Default for ClipboardCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_crypto::{encrypt_bytes, PortalKeyPair};

    fn upload_payload(text: &str, relay: &PublicKey) -> Vec<u8> {
        let key = FileKey::random();
        let mut payload = wrap_key(&key, relay).unwrap();
        payload.extend_from_slice(&encrypt_bytes(&key, text.as_bytes()).unwrap());
        payload
    }

    fn download_text(payload: &[u8], recipient: &PortalKeyPair) -> String {
        let mut reader = Cursor::new(payload);
        let KeyFrame::Frame(frame) = read_key_frame(&mut reader, false).unwrap() else {
            panic!("expected a frame");
        };
        let key = unwrap_key(&frame, &recipient.secret).unwrap();
        let body = &payload[reader.position() as usize..];
        String::from_utf8(decrypt_bytes(&key, body).unwrap()).unwrap()
    }

    #[test]
    fn put_then_get_reencrypts_for_recipient() {
        let relay = PortalKeyPair::generate();
        let recipient = PortalKeyPair::generate();
        let cache = ClipboardCache::new();

        cache
            .put(&upload_payload("shared text", &relay.public), &relay.secret)
            .unwrap();

        let payload = cache.get(&recipient.public).unwrap().unwrap();
        assert_eq!(download_text(&payload, &recipient), "shared text");
    }

    #[test]
    fn cached_ciphertext_serves_multiple_recipients() {
        let relay = PortalKeyPair::generate();
        let alpha = PortalKeyPair::generate();
        let beta = PortalKeyPair::generate();
        let cache = ClipboardCache::new();

        cache
            .put(&upload_payload("broadcast", &relay.public), &relay.secret)
            .unwrap();

        // One upload, re-targeted independently per recipient; neither can
        // read the other's payload.
        let for_alpha = cache.get(&alpha.public).unwrap().unwrap();
        let for_beta = cache.get(&beta.public).unwrap().unwrap();
        assert_eq!(download_text(&for_alpha, &alpha), "broadcast");
        assert_eq!(download_text(&for_beta, &beta), "broadcast");

        let mut reader = Cursor::new(&for_alpha[..]);
        let KeyFrame::Frame(frame) = read_key_frame(&mut reader, false).unwrap() else {
            panic!("expected a frame");
        };
        assert!(unwrap_key(&frame, &beta.secret).is_err());
    }

    #[test]
    fn cached_payload_is_not_decryptable_with_upload_key() {
        // The download stream is re-encrypted, not replayed: the uploader's
        // file key no longer opens it.
        let relay = PortalKeyPair::generate();
        let recipient = PortalKeyPair::generate();
        let cache = ClipboardCache::new();

        let upload_key = FileKey::random();
        let mut payload = wrap_key(&upload_key, &relay.public).unwrap();
        payload.extend_from_slice(&encrypt_bytes(&upload_key, b"text").unwrap());
        cache.put(&payload, &relay.secret).unwrap();

        let downloaded = cache.get(&recipient.public).unwrap().unwrap();
        let body = &downloaded[portal_crypto::WRAPPED_KEY_LEN..];
        assert!(decrypt_bytes(&upload_key, body).is_err());
    }

    #[test]
    fn empty_cache_returns_none() {
        let cache = ClipboardCache::new();
        let recipient = PortalKeyPair::generate();
        assert!(cache.get(&recipient.public).unwrap().is_none());
        assert!(!cache.has_content());
    }

    #[test]
    fn newer_upload_replaces_older() {
        let relay = PortalKeyPair::generate();
        let recipient = PortalKeyPair::generate();
        let cache = ClipboardCache::new();

        cache
            .put(&upload_payload("first", &relay.public), &relay.secret)
            .unwrap();
        cache
            .put(&upload_payload("second", &relay.public), &relay.secret)
            .unwrap();

        let payload = cache.get(&recipient.public).unwrap().unwrap();
        assert_eq!(download_text(&payload, &recipient), "second");
    }

    #[test]
    fn upload_to_wrong_key_is_rejected() {
        let relay = PortalKeyPair::generate();
        let stranger = PortalKeyPair::generate();
        let cache = ClipboardCache::new();

        let payload = upload_payload("text", &stranger.public);
        assert!(cache.put(&payload, &relay.secret).is_err());
        assert!(!cache.has_content());
    }

    #[test]
    fn truncated_payload_is_corrupt() {
        let relay = PortalKeyPair::generate();
        let cache = ClipboardCache::new();
        assert!(cache.put(&[0u8; 40], &relay.secret).is_err());
    }

    #[test]
    fn each_download_gets_fresh_encryption() {
        let relay = PortalKeyPair::generate();
        let recipient = PortalKeyPair::generate();
        let cache = ClipboardCache::new();
        cache
            .put(&upload_payload("text", &relay.public), &relay.secret)
            .unwrap();

        let a = cache.get(&recipient.public).unwrap().unwrap();
        let b = cache.get(&recipient.public).unwrap().unwrap();
        assert_ne!(a, b);
        assert_eq!(download_text(&a, &recipient), download_text(&b, &recipient));
    }
}
