//! # portal-crypto
//!
//! Hybrid streaming encryption and endpoint derivation for PortalSync.
//!
//! Every transfer uses a fresh single-use symmetric key (the "file key");
//! long-lived asymmetric keypairs only ever wrap and unwrap that key, never
//! bulk data:
//! - [`FileKey`], [`PortalKeyPair`] - key material
//! - [`wrap_key`] / [`unwrap_key`] - fixed-size asymmetric key frames
//! - [`encrypt_stream`] / [`decrypt_stream`] / [`reencrypt_stream`] -
//!   bounded-memory symmetric stream transport
//! - [`derive_endpoint`] - capability-style operation path derivation
//!
//! # Security Notes
//!
//! - The wrapped-key frame is a fixed 104 bytes; any other length is
//!   treated as corruption, never partially parsed.
//! - Re-encryption decrypts under one key and re-encrypts under another in
//!   a single pass without materializing the plaintext.
//! - Key material is zeroized on drop and redacted in Debug output.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod endpoint;
mod error;
mod keys;
mod stream;
mod wrap;

pub use crypto_box::{PublicKey, SecretKey};
pub use endpoint::{derive_endpoint, generate_seed, ops, EndpointPaths};
pub use error::CryptoError;
pub use keys::{FileKey, PortalKeyPair, FILE_KEY_LEN, PUBLIC_KEY_LEN};
pub use stream::{
    decrypt_bytes, decrypt_stream, encrypt_bytes, encrypt_stream, reencrypt_stream, IV_LEN,
};
pub use wrap::{read_key_frame, unwrap_key, wrap_key, KeyFrame, WRAPPED_KEY_LEN};
