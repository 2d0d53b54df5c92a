//! Capability-style endpoint path derivation.
//!
//! Every relay operation lives under a path segment derived from a shared
//! seed: PBKDF2-HMAC-SHA1 over (seed as password, operation name as salt),
//! hex-encoding the first 8 output bytes. The segments are deterministic
//! per seed and unguessable without it, so knowledge of the seed stands in
//! for authentication.

use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;

/// PBKDF2 iteration count, fixed by the wire protocol.
const ITERATIONS: u32 = 1024;
/// Full derivation output before truncation (256 bits).
const OUTPUT_LEN: usize = 32;
/// Bytes of the output that become the path segment.
const SEGMENT_BYTES: usize = 8;
/// Random bytes in a generated seed.
const SEED_BYTES: usize = 22;

/// Operation names, one per relay endpoint.
pub mod ops {
    /// Portal registration.
    pub const REGISTER: &str = "register";
    /// Roster document fetch.
    pub const GET_ROSTER: &str = "get-roster";
    /// Pending-item poll.
    pub const POLL: &str = "poll";
    /// File upload.
    pub const UPLOAD_FILE: &str = "upload-file";
    /// File download.
    pub const DOWNLOAD_FILE: &str = "download-file";
    /// Clipboard upload.
    pub const UPLOAD_CLIPBOARD: &str = "upload-clipboard";
    /// Clipboard download.
    pub const DOWNLOAD_CLIPBOARD: &str = "download-clipboard";
}

/// Derive the path segment for one operation.
pub fn derive_endpoint(seed: &str, operation: &str) -> String {
    let mut out = [0u8; OUTPUT_LEN];
    pbkdf2_hmac::<Sha1>(seed.as_bytes(), operation.as_bytes(), ITERATIONS, &mut out);
    hex::encode(&out[..SEGMENT_BYTES])
}

/// Generate a fresh random seed (22 random bytes, hex-encoded).
pub fn generate_seed() -> String {
    let mut bytes = [0u8; SEED_BYTES];
    getrandom::getrandom(&mut bytes).expect("getrandom failed");
    hex::encode(bytes)
}

/// The full set of derived path segments for one seed.
///
/// Derived once at startup on both sides; the relay mounts its routes at
/// these segments and clients address requests to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPaths {
    /// Segment for `POST register`.
    pub register: String,
    /// Segment for `GET get-roster`.
    pub get_roster: String,
    /// Segment for `GET poll`.
    pub poll: String,
    /// Segment for `POST upload-file`.
    pub upload_file: String,
    /// Segment for `GET download-file`.
    pub download_file: String,
    /// Segment for `POST upload-clipboard`.
    pub upload_clipboard: String,
    /// Segment for `GET download-clipboard`.
    pub download_clipboard: String,
}

impl EndpointPaths {
    /// Derive all segments from a seed.
    pub fn derive(seed: &str) -> Self {
        Self {
            register: derive_endpoint(seed, ops::REGISTER),
            get_roster: derive_endpoint(seed, ops::GET_ROSTER),
            poll: derive_endpoint(seed, ops::POLL),
            upload_file: derive_endpoint(seed, ops::UPLOAD_FILE),
            download_file: derive_endpoint(seed, ops::DOWNLOAD_FILE),
            upload_clipboard: derive_endpoint(seed, ops::UPLOAD_CLIPBOARD),
            download_clipboard: derive_endpoint(seed, ops::DOWNLOAD_CLIPBOARD),
        }
    }
}
