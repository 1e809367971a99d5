//! Error Module - Runtime Error Taxonomy and Status Codes
//!
//! Every failure the VM can surface, each mapping to one of the stable
//! status codes of the embedding API. Runtime errors carry the message the
//! protected-call machinery delivers to handlers; JIT failures never
//! appear here (they are diagnostic, the interpreter continues).

use aql_core::CoreError;
use thiserror::Error;

/// Stable status codes of the embedding API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    Yield = 1,
    ErrRun = 2,
    ErrSyntax = 3,
    ErrMem = 4,
    ErrErr = 5,
    ErrFile = 6,
}

/// Runtime errors
#[derive(Debug, Error)]
pub enum VmError {
    /// Syntax error carried from the external parser
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Type/arithmetic/index errors raised by executing code
    #[error("{message}")]
    Runtime {
        message: String,
        /// Program counter at the raise site, when known
        pc: Option<usize>,
        /// Source line, when debug info is present
        line: Option<u32>,
    },

    #[error("out of memory")]
    Memory,

    /// Error raised while handling another error
    #[error("error in error handling")]
    ErrorInErrorHandler,

    #[error("file error: {0}")]
    File(String),

    #[error("stack overflow")]
    StackOverflow,

    /// Resume of a dead or running coroutine, yield from the outside, etc.
    #[error("{0}")]
    Coroutine(&'static str),
}

impl VmError {
    /// Construct a runtime error with position info
    pub fn runtime(message: impl Into<String>) -> Self {
        VmError::Runtime {
            message: message.into(),
            pc: None,
            line: None,
        }
    }

    pub fn runtime_at(message: impl Into<String>, pc: usize, line: Option<u32>) -> Self {
        VmError::Runtime {
            message: message.into(),
            pc: Some(pc),
            line,
        }
    }

    /// Status code this error maps to
    pub fn status(&self) -> Status {
        match self {
            VmError::Syntax(_) => Status::ErrSyntax,
            VmError::Runtime { .. } => Status::ErrRun,
            VmError::StackOverflow => Status::ErrRun,
            VmError::Coroutine(_) => Status::ErrRun,
            VmError::Memory => Status::ErrMem,
            VmError::ErrorInErrorHandler => Status::ErrErr,
            VmError::File(_) => Status::ErrFile,
        }
    }
}

impl From<CoreError> for VmError {
    fn from(err: CoreError) -> Self {
        VmError::runtime(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VmError>;
