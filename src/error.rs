//! Error types for the CMap conversion tools.
//!
//! This module defines all error types that can occur while parsing CID tables,
//! decoding legacy pickled maps and writing compressed output.

/// Result type alias for conversion operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur during conversion.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A line of a CID table does not parse
    #[error("Malformed table row at line {line}: {reason}")]
    MalformedRow {
        /// 1-based line number in the source table (0 when the table is empty)
        line: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Legacy container is unreadable or holds values JSON cannot represent
    #[error("Corrupt legacy input: {0}")]
    CorruptInput(String),

    /// Invalid caller-supplied argument (empty registry name, unknown codec)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error (missing source, unwritable destination)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Error::MalformedRow {
            line,
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Error::CorruptInput(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_row_error() {
        let err = Error::malformed(7, "expected 3 columns, found 2");
        let msg = format!("{}", err);
        assert!(msg.contains("line 7"));
        assert!(msg.contains("expected 3 columns"));
    }

    #[test]
    fn test_corrupt_input_error() {
        let err = Error::corrupt("unsupported opcode 0x52");
        let msg = format!("{}", err);
        assert!(msg.contains("Corrupt legacy input"));
        assert!(msg.contains("0x52"));
    }

    #[test]
    fn test_io_error_keeps_kind() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        match err {
            Error::Io(inner) => assert_eq!(inner.kind(), std::io::ErrorKind::NotFound),
            other => panic!("expected Io, got {:?}", other),
        }
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
