//! Error types for the fpindex library.
//!
//! All fallible operations return [`Result`], whose error type [`FpIndexError`]
//! distinguishes caller misuse (transactional state), data corruption, I/O
//! failures, and input validation. Corruption is fatal for the affected index
//! handle; transactional-state errors leave the index untouched.

use std::io;

use thiserror::Error;

/// The error type for all fpindex operations.
#[derive(Error, Debug)]
pub enum FpIndexError {
    /// A writer already exists for this index.
    #[error("already in transaction")]
    AlreadyInTransaction,

    /// The operation requires an open transaction.
    #[error("not in transaction")]
    NotInTransaction,

    /// A segment file failed validation (magic, version, checksum, or structure).
    #[error("corrupt segment: {0}")]
    CorruptSegment(String),

    /// A manifest file failed validation.
    #[error("corrupt manifest: {0}")]
    CorruptManifest(String),

    /// An attribute name or value was rejected before any mutation.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// I/O errors (file operations, fsync, mmap).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for operations that may fail with [`FpIndexError`].
pub type Result<T> = std::result::Result<T, FpIndexError>;

impl FpIndexError {
    /// Create a new corrupt-segment error.
    pub fn corrupt_segment<S: Into<String>>(msg: S) -> Self {
        FpIndexError::CorruptSegment(msg.into())
    }

    /// Create a new corrupt-manifest error.
    pub fn corrupt_manifest<S: Into<String>>(msg: S) -> Self {
        FpIndexError::CorruptManifest(msg.into())
    }

    /// Create a new invalid-attribute error.
    pub fn invalid_attribute<S: Into<String>>(msg: S) -> Self {
        FpIndexError::InvalidAttribute(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = FpIndexError::AlreadyInTransaction;
        assert_eq!(error.to_string(), "already in transaction");

        let error = FpIndexError::corrupt_segment("bad magic");
        assert_eq!(error.to_string(), "corrupt segment: bad magic");

        let error = FpIndexError::invalid_attribute("max_results must be an integer");
        assert_eq!(
            error.to_string(),
            "invalid attribute: max_results must be an integer"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error = FpIndexError::from(io_error);

        match error {
            FpIndexError::Io(_) => {}
            _ => panic!("expected Io variant"),
        }
    }
}
