//! Error types for Tessera
//!
//! Provides a unified error type for all Tessera operations.

use thiserror::Error;

/// Result type alias for Tessera operations
pub type Result<T> = std::result::Result<T, TesseraError>;

/// Unified error type for Tessera
#[derive(Error, Debug)]
pub enum TesseraError {
    // ===== Configuration Errors =====
    #[error("Invalid redundancy scheme: {0}")]
    InvalidScheme(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Database scheme not supported: {0}")]
    UnsupportedStoreScheme(String),

    // ===== Selection Errors =====
    #[error("Insufficient nodes: selected {selected}, need {required}")]
    InsufficientNodes { selected: usize, required: usize },

    // ===== Store Errors =====
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ===== Erasure Coding Errors =====
    #[error("Erasure coding error: {0}")]
    ErasureCoding(String),

    #[error("Insufficient shares: have {available}, need {required}")]
    InsufficientShares { available: usize, required: usize },

    #[error("Share size mismatch: expected {expected}, got {actual}")]
    ShareSizeMismatch { expected: usize, actual: usize },

    #[error("Invalid share index: {index} (total: {total})")]
    InvalidShareIndex { index: usize, total: usize },

    #[error("Duplicate share index: {0}")]
    DuplicateShare(usize),

    // ===== Cryptography Errors =====
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid node ID: {0}")]
    InvalidNodeId(String),

    // ===== Segment Errors =====
    #[error("Segment {index} unavailable: {available} valid pieces, need {required}")]
    SegmentUnavailable {
        index: u64,
        available: usize,
        required: usize,
    },

    #[error("Quorum not met: {achieved}/{required}")]
    QuorumNotMet { achieved: usize, required: usize },

    // ===== Transport Errors =====
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Piece transfer to {node} timed out")]
    Timeout { node: String },

    // ===== Cancellation =====
    #[error("Operation cancelled")]
    Cancelled,

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TesseraError {
    /// Cancellation is a terminal outcome, not a failure of the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TesseraError::Cancelled)
    }

    /// Errors that are only ever raised while loading configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TesseraError::InvalidScheme(_)
                | TesseraError::InvalidConfiguration(_)
                | TesseraError::UnsupportedStoreScheme(_)
        )
    }
}

impl From<reed_solomon_erasure::Error> for TesseraError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        TesseraError::ErasureCoding(err.to_string())
    }
}

impl From<bincode::Error> for TesseraError {
    fn from(err: bincode::Error) -> Self {
        TesseraError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for TesseraError {
    fn from(err: toml::de::Error) -> Self {
        TesseraError::InvalidConfiguration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TesseraError::InsufficientShares {
            available: 8,
            required: 10,
        };
        assert_eq!(err.to_string(), "Insufficient shares: have 8, need 10");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TesseraError = io_err.into();
        assert!(matches!(err, TesseraError::Io(_)));
    }

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(TesseraError::Cancelled.is_cancelled());
        assert!(!TesseraError::AuthenticationFailed.is_cancelled());
        assert!(TesseraError::UnsupportedStoreScheme("ftp".into()).is_configuration());
        assert!(!TesseraError::StoreUnavailable("down".into()).is_configuration());
    }
}
