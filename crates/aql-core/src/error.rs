//! Error Module - Data-Model Error Types

use crate::dtype::DataType;
use thiserror::Error;

/// Errors raised by container, string, and value operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("index {index} out of bounds for length {length}")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("dtype mismatch: expected {expected:?}, got {actual:?}")]
    DtypeMismatch {
        expected: DataType,
        actual: DataType,
    },

    #[error("dtype {dtype:?} not valid for {kind}")]
    InvalidDtype { dtype: DataType, kind: &'static str },

    #[error("attempt to modify a read-only container")]
    ReadOnly,

    #[error("invalid key: {reason}")]
    InvalidKey { reason: &'static str },

    #[error("length overflow: {0}")]
    LengthOverflow(usize),

    #[error("range step cannot be zero")]
    ZeroStep,

    #[error("dead object reference {reference:#x}")]
    DeadRef { reference: u32 },

    #[error("type error: expected {expected}, got {actual}")]
    TypeError {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{0}")]
    Runtime(String),
}

/// Result type alias for data-model operations
pub type Result<T> = std::result::Result<T, CoreError>;
