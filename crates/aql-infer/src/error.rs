//! Error Module - Inference Error Types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InferError {
    #[error("prototype reference is dead")]
    DeadProto,

    #[error("register {0} out of range for prototype (max_stack_size {1})")]
    RegisterOutOfRange(u32, u8),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, InferError>;
