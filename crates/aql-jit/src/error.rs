//! Error Module - JIT Error Types
//!
//! Every failure carries a stable numeric code for embedders that track
//! compile outcomes across runs. Compile failures are diagnostic only: the
//! interpreter is always a correct fallback.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JitError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("out of memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("compilation failed: {0}")]
    CompileFailed(String),

    #[error("optimization failed: {0}")]
    OptimizationFailed(String),

    #[error("generated code too large: {size} bytes (max {max})")]
    CodeTooLarge { size: usize, max: usize },

    #[error("compilation exceeded budget of {budget_ms} ms")]
    Timeout { budget_ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl JitError {
    /// Stable numeric code
    pub fn code(&self) -> i32 {
        match self {
            JitError::InvalidInput(_) => -1,
            JitError::OutOfMemory { .. } => -2,
            JitError::CompileFailed(_) => -3,
            JitError::OptimizationFailed(_) => -5,
            JitError::CodeTooLarge { .. } => -6,
            JitError::Timeout { .. } => -7,
            JitError::Internal(_) => -9,
        }
    }
}

pub type Result<T> = std::result::Result<T, JitError>;
