//! Error Module - GC Error Types

use thiserror::Error;

/// Main error type for all collector operations
#[derive(Debug, Error)]
pub enum GcError {
    #[error("Out of memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("Invalid object reference: {reference:#x}")]
    InvalidRef { reference: u32 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GcError {
    /// Check if this error is recoverable (e.g. by an emergency collection)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GcError::OutOfMemory { .. })
    }
}

/// Result type alias for collector operations
pub type Result<T> = std::result::Result<T, GcError>;
