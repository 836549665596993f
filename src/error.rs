//! Error types for partstore
//!
//! Provides a unified error type for all part storage operations.

use thiserror::Error;

/// Result type alias using PartError
pub type Result<T> = std::result::Result<T, PartError>;

/// Unified error type for part storage operations
#[derive(Debug, Error)]
pub enum PartError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    /// Backend error, passed through unmodified
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Cannot reserve {requested} bytes, not enough space")]
    NotEnoughSpace { requested: u64 },

    /// Internal invariant violated by the caller or the crate itself
    #[error("Logical error: {0}")]
    Logical(String),

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Corrupted file: {0}")]
    Corrupted(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PartError {
    /// True for an absent file or directory, whichever layer reported it.
    pub fn is_not_found(&self) -> bool {
        match self {
            PartError::NotFound(_) => true,
            PartError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<bincode::Error> for PartError {
    fn from(e: bincode::Error) -> Self {
        PartError::Serialization(e.to_string())
    }
}
