//! aql-infer - Forward Type Inference
//!
//! A pc-ordered forward dataflow pass over a prototype's bytecode that
//! assigns every virtual register a [`TypeInfo`]: the inferred type, a
//! confidence in 0..100, and usage statistics. The mean confidence of the
//! computed registers is the prototype's **type stability**, the score the
//! JIT gates compilation on.
//!
//! Design points carried from the runtime's profiling needs:
//!
//! - `TypeInfo` records come from a pooled arena ([`pool::TypeInfoPool`]),
//!   allocated in batches of 32 with a free list: O(1) alloc/free at
//!   steady state
//! - register updates accumulate in a batch buffer and are flushed every
//!   32 updates (or at end of analysis), which validates entries and marks
//!   low-confidence ones for recomputation
//! - inference never fails hard: deep recursion, conflicting joins, and
//!   unknown opcodes produce a [`Fallback`] record and analysis continues
//!   with the degraded type

pub mod analyzer;
pub mod batch;
pub mod error;
pub mod pool;
pub mod types;

pub use analyzer::{InferConfig, TypeAnalysis, TypeInferContext};
pub use batch::BatchBuffer;
pub use error::{InferError, Result};
pub use pool::TypeInfoPool;
pub use types::{Fallback, FallbackLevel, InferState, InferType, TypeInfo};
