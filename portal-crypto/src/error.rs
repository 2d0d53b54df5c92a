//! Error types for portal-crypto.

/// Crypto errors.
///
/// Cipher failures are fatal for the operation that hit them: callers log
/// and surface them, but never let them escape a task boundary.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Any algorithm, padding, or key failure.
    #[error("cipher failure: {0}")]
    Cipher(String),

    /// A wrapped-key frame had the wrong length.
    ///
    /// Distinguished from "no data": a zero-byte read is only reported as
    /// this when the caller did not opt into the allow-empty contract.
    #[error("corrupt key frame: {len} bytes (expected {expected})")]
    CorruptKeyFrame {
        /// Observed frame length.
        len: usize,
        /// Required frame length.
        expected: usize,
    },

    /// Underlying I/O error while streaming.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
