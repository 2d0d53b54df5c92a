//! Key material: long-lived portal keypairs and single-use file keys.

use crypto_box::{PublicKey, SecretKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a raw file key in bytes (256 bits).
pub const FILE_KEY_LEN: usize = 32;

/// Length of a raw X25519 public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// A single-use symmetric key generated per transfer.
///
/// Never reused across transfers; wrapped asymmetrically for the recipient
/// and zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FileKey([u8; FILE_KEY_LEN]);

impl FileKey {
    /// Generate a fresh random file key.
    pub fn random() -> Self {
        let mut bytes = [0u8; FILE_KEY_LEN];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Reconstruct a file key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == FILE_KEY_LEN {
            let mut arr = [0u8; FILE_KEY_LEN];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; FILE_KEY_LEN] {
        &self.0
    }
}

// Don't leak key material in debug output
impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileKey([REDACTED])")
    }
}

/// A long-lived X25519 keypair owned by a portal (or by the relay).
///
/// Used exclusively to wrap and unwrap file keys; bulk data never touches
/// the asymmetric layer. The secret key zeroizes on drop (from crypto_box).
pub struct PortalKeyPair {
    /// Secret half, kept local.
    pub secret: SecretKey,
    /// Public half, published via the roster.
    pub public: PublicKey,
}

impl PortalKeyPair {
    /// Generate a new keypair.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        let secret = SecretKey::from(bytes);
        bytes.zeroize();
        let public = secret.public_key();
        Self { secret, public }
    }

    /// The public key as a raw 32-byte array.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        *self.public.as_bytes()
    }

    /// Reconstruct a keypair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = SecretKey::from(bytes);
        let public = secret.public_key();
        Self { secret, public }
    }
}

impl std::fmt::Debug for PortalKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PortalKeyPair {{ public: {}, secret: [REDACTED] }}",
            hex::encode(self.public.as_bytes())
        )
    }
}
