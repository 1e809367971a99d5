//! # aql-jit - Adaptive Native Compilation for AQL
//!
//! The JIT turns hot, type-stable bytecode functions into native machine
//! code for x86-64 and ARM64.
//!
//! ## Pipeline
//!
//! ```text
//! bytecode ──► live intervals ──► linear scan ──► opt passes ──► templates
//!                                                                    │
//!    VM dispatcher ◄── code cache (LRU) ◄── executable pages ◄───────┘
//! ```
//!
//! - **Hotspot scoring** ([`hotspot`]): per-prototype call/loop/time/size
//!   counters; a weighted score plus three hard gates (min calls, max
//!   size, min type stability) decides compilation
//! - **Live intervals + linear scan** ([`intervals`], [`regalloc`]): one
//!   pass each; spills land in frame slots
//! - **Templates** ([`template`]): per-opcode byte recipes for x86-64 and
//!   32-bit words for ARM64, patched with registers and immediates
//! - **Emission** ([`emit`]): prologue/epilogue, parameter loads, spill
//!   traffic, and a label table with a displacement patching pass
//! - **Executable memory** ([`exec`]): page-aligned RW mappings flipped to
//!   RX before use (W^X safe)
//! - **Code cache** ([`cache`]): prototype-keyed, LRU capacity eviction
//!   plus a time-based idle sweep
//!
//! Compilation failures are never fatal: the prototype enters a cooldown
//! and the interpreter continues. The compiled subset is intentionally
//! conservative (integer moves, arithmetic, jumps, returns); the type
//! stability gate keeps unsuitable functions away from it.

pub mod cache;
pub mod compile;
pub mod config;
pub mod emit;
pub mod error;
pub mod exec;
pub mod hotspot;
pub mod intervals;
pub mod regalloc;
pub mod state;
pub mod stats;
pub mod target;
pub mod template;

pub use cache::{CacheStats, CodeCache};
pub use compile::{compile_bytecode, CompiledCode, OptReport};
pub use config::{HotspotConfig, JitConfig, OptConfig};
pub use error::{JitError, Result};
pub use exec::{ExecutableMemory, JitEntry};
pub use hotspot::{HotspotInfo, HotspotTable};
pub use regalloc::{linear_scan, Allocation, Location};
pub use state::JitState;
pub use stats::JitStats;
pub use target::Arch;

/// aql-jit version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
