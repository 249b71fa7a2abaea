//! Error types for Cellar
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using CellarError
pub type Result<T> = std::result::Result<T, CellarError>;

/// Unified error type for Cellar operations
#[derive(Debug, Error)]
pub enum CellarError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    // -------------------------------------------------------------------------
    // Catalog / Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found")]
    NotFound,

    #[error("Already exists")]
    AlreadyExists,

    #[error("Busy: container still has {open_count} open handle(s)")]
    Busy { open_count: u32 },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // -------------------------------------------------------------------------
    // Space Errors
    // -------------------------------------------------------------------------
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("No space: requested {requested} bytes, {available} available")]
    NoSpace { requested: u64, available: u64 },

    // -------------------------------------------------------------------------
    // Transaction / B-tree Engine Errors
    // -------------------------------------------------------------------------
    #[error("Storage fault: {0}")]
    StorageFault(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for CellarError {
    fn from(e: bincode::Error) -> Self {
        CellarError::Serialization(e.to_string())
    }
}
