//! aql-util - Foundation Types for the AQL Runtime
//!
//! This crate provides the small, dependency-light utilities shared by every
//! layer of the runtime:
//!
//! - Typed indices (`Idx`, `IndexVec`, `define_idx!`) so that prototype ids,
//!   register numbers, and cache slots cannot be mixed up silently
//! - Alignment helpers used by the vector container and the JIT code pages
//! - High-precision timers for GC pauses and compile budgets
//! - The unified performance monitor (`perf`)
//!
//! Everything here is a zero-cost abstraction: typed indices compile down to
//! the underlying integer, and the perf macros disappear when monitoring is
//! disabled.

pub mod alignment;
pub mod index_vec;
pub mod perf;
pub mod timer;

pub use alignment::Alignment;
pub use index_vec::{Idx, IndexVec};
pub use perf::{PerfConfig, PerfMonitor, TimeStats};
pub use timer::{ScopedTimer, Timer};

// Re-export commonly used collection types
pub use rustc_hash::FxHashMap;
pub use rustc_hash::FxHashSet;
