//! Asymmetric wrapping of file keys into fixed-size frames.
//!
//! A wrapped key travels as a fixed 104-byte frame:
//!
//! ```text
//! [ephemeral X25519 public key: 32][XSalsa20 nonce: 24][sealed key + tag: 48]
//! ```
//!
//! An ephemeral keypair is generated per wrap, so the frame reveals nothing
//! about the sender. Any frame with a different length signals corruption.

use std::io::Read;

use crypto_box::aead::Aead;
use crypto_box::{Nonce, PublicKey, SalsaBox, SecretKey};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::keys::{FileKey, FILE_KEY_LEN};

/// Length of a wrapped-key frame: ephemeral pk + nonce + key ciphertext + tag.
pub const WRAPPED_KEY_LEN: usize = 32 + 24 + FILE_KEY_LEN + 16;

/// Result of reading a key frame from a stream.
///
/// `NoData` is a legitimate "nothing pending" signal, available only to
/// callers that opted in via `allow_empty`; it is not an error.
#[derive(Debug)]
pub enum KeyFrame {
    /// The stream held no bytes at all.
    NoData,
    /// A complete frame, ready for [`unwrap_key`].
    Frame([u8; WRAPPED_KEY_LEN]),
}

/// Wrap a file key for a recipient.
pub fn wrap_key(key: &FileKey, recipient: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    let mut eph_bytes = [0u8; 32];
    getrandom::getrandom(&mut eph_bytes).expect("getrandom failed");
    let ephemeral = SecretKey::from(eph_bytes);
    eph_bytes.zeroize();

    let mut nonce = [0u8; 24];
    getrandom::getrandom(&mut nonce).expect("getrandom failed");

    let sealed = SalsaBox::new(recipient, &ephemeral)
        .encrypt(Nonce::from_slice(&nonce), key.as_bytes().as_slice())
        .map_err(|_| CryptoError::Cipher("key wrap failed".into()))?;

    let mut frame = Vec::with_capacity(WRAPPED_KEY_LEN);
    frame.extend_from_slice(ephemeral.public_key().as_bytes());
    frame.extend_from_slice(&nonce);
    frame.extend_from_slice(&sealed);
    debug_assert_eq!(frame.len(), WRAPPED_KEY_LEN);
    Ok(frame)
}

/// Unwrap a file key with the recipient's secret key.
pub fn unwrap_key(frame: &[u8], own: &SecretKey) -> Result<FileKey, CryptoError> {
    if frame.len() != WRAPPED_KEY_LEN {
        return Err(CryptoError::CorruptKeyFrame {
            len: frame.len(),
            expected: WRAPPED_KEY_LEN,
        });
    }

    let mut eph_bytes = [0u8; 32];
    eph_bytes.copy_from_slice(&frame[..32]);
    let ephemeral_pk = PublicKey::from(eph_bytes);
    let nonce = Nonce::from_slice(&frame[32..56]);

    let raw = SalsaBox::new(&ephemeral_pk, own)
        .decrypt(nonce, &frame[56..])
        .map_err(|_| CryptoError::Cipher("key unwrap failed (wrong key or tampered frame)".into()))?;

    FileKey::from_bytes(&raw)
        .ok_or_else(|| CryptoError::Cipher("unwrapped key has wrong length".into()))
}

/// Read a wrapped-key frame from the head of a stream.
///
/// A zero-byte stream is [`KeyFrame::NoData`] when `allow_empty` is set
/// (absence means "nothing pending") and a corruption error otherwise. A
/// short non-zero read is always corruption.
pub fn read_key_frame(reader: &mut impl Read, allow_empty: bool) -> Result<KeyFrame, CryptoError> {
    let mut frame = [0u8; WRAPPED_KEY_LEN];
    let mut filled = 0;
    while filled < WRAPPED_KEY_LEN {
        let n = reader.read(&mut frame[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    match filled {
        0 if allow_empty => Ok(KeyFrame::NoData),
        n if n == WRAPPED_KEY_LEN => Ok(KeyFrame::Frame(frame)),
        n => Err(CryptoError::CorruptKeyFrame {
            len: n,
            expected: WRAPPED_KEY_LEN,
        }),
    }
}
