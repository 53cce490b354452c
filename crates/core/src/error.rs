//! Unified error taxonomy.
//!
//! We use `thiserror` for automatic `Display` and `Error` implementations.
//! Encryption failures are structural failures of the index and are folded
//! into [`Error::Index`] at the point where they are raised.

use std::io;
use thiserror::Error;

/// Result type alias for tessera operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O failure, short read/write, or checksum mismatch in the data path.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Structural violation: bad magic, unknown format version, invalid
    /// column header, missing cipher for an encrypted file.
    #[error("index error: {0}")]
    Index(String),

    /// Another process holds the write lock.
    #[error("lock obtain failed: {0}")]
    LockObtainFailed(String),

    /// API misuse detectable from arguments alone.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// API misuse detectable only from current state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The requested iterator option is not implemented by this reader.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Sub-reader or element index out of bounds.
    #[error("out of range: {0}")]
    OutOfRange(String),
}

impl Error {
    /// Shorthand for checksum failures; they surface as index corruption.
    pub fn checksum_mismatch(expected: u64, computed: u64) -> Self {
        Error::Index(format!(
            "checksum mismatch: expected {expected:016x}, computed {computed:016x}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_conversion() {
        let io = io::Error::new(io::ErrorKind::UnexpectedEof, "short read");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_checksum_message() {
        let err = Error::checksum_mismatch(1, 2);
        let msg = err.to_string();
        assert!(msg.contains("0000000000000001"));
        assert!(msg.contains("0000000000000002"));
    }
}
