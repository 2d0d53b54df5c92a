//! Error types for portal-types.

/// Wire format errors.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// A document line had no `=` separator.
    #[error("invalid document line: {line:?}")]
    InvalidLine {
        /// The offending line.
        line: String,
    },

    /// A required key was absent from a document.
    #[error("missing key: {key}")]
    MissingKey {
        /// The key that was expected.
        key: String,
    },

    /// Document or path bytes were not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    /// A container entry arrived out of order or under the wrong name.
    #[error("unexpected container entry: expected {expected}, got {actual}")]
    UnexpectedEntry {
        /// Entry name that was expected at this position.
        expected: String,
        /// Entry name actually found.
        actual: String,
    },

    /// A length-prefixed entry exceeded its size bound.
    #[error("container entry too large: {len} bytes")]
    OversizedEntry {
        /// Declared entry length.
        len: u64,
    },

    /// An archive record carried an unsafe or malformed path.
    #[error("invalid archive path: {path:?}")]
    InvalidPath {
        /// The offending path.
        path: String,
    },

    /// The stream ended mid-record.
    #[error("stream truncated mid-record")]
    Truncated,

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
