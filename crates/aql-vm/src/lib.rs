//! # aql-vm - The AQL Virtual Machine
//!
//! The execution substrate of the runtime: a single-threaded cooperative
//! register machine over the `aql-core` data model, collected by `agc`,
//! profiled by `aql-infer`, and accelerated by `aql-jit`.
//!
//! ## Architecture
//!
//! ```text
//! parsed Proto ──► State::load ──► Closure value
//!                                      │
//!         ┌────────────────────────────┴──────────────┐
//!         ▼                                           ▼
//!    Executor (dispatch loop)  ◄──cache hit──  JIT entry point
//!         │                                           ▲
//!         │ profile calls/loops ── hotspot gate ──────┘
//!         │
//!    GC safepoints every N instructions
//! ```
//!
//! - [`state::State`]: one VM — shared globals plus the main thread
//! - [`executor::Executor`]: the dispatch loop, call protocol, upvalues,
//!   coroutines
//! - [`arith`]: numeric semantics and exact int/float comparison
//! - [`builtins`]: the BUILTIN function set (print/type/len/tostring/
//!   tonumber/range)
//! - [`api`]: the stack-discipline embedding surface with status codes
//!
//! Errors unwind through `Result` to the nearest protected call
//! ([`State::pcall`]); unprotected errors reach the installed panic
//! handler. JIT compile failures never surface: the prototype cools down
//! and interpretation continues.

pub mod api;
pub mod arith;
pub mod builtins;
pub mod error;
pub mod executor;
mod native;
pub mod state;

pub use api::{ApiArith, Continuation, GcWhat, REGISTRY_INDEX};
pub use error::{Result, Status, VmError};
pub use executor::Executor;
pub use state::{GlobalState, State};

// The data model is part of the public surface
pub use aql_core::{
    ContainerKind, DataType, Instruction, OpCode, Proto, ProtoId, TValue, Thread, UpvalDesc,
};

/// aql-vm version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
