//! # agc - Incremental Garbage Collector for AQL
//!
//! agc is the memory subsystem of the AQL runtime: an incremental tri-color
//! mark/sweep collector over an id-keyed object arena.
//!
//! ## Overview
//!
//! - **Id-keyed arena**: objects live in slots addressed by `GcRef` (a
//!   `NonZeroU32`); interior references on the value graph are plain ids,
//!   never owning pointers, so arbitrary cycles are collected
//! - **Tri-color marking**: white/gray/black partition with the no
//!   black-to-white invariant enforced by write barriers
//! - **Two alternating whites**: snapshot-at-the-beginning sweeping; objects
//!   allocated during a sweep carry the new white and survive the cycle
//! - **Debt-driven stepping**: every allocation adds to a debt counter; the
//!   mutator runs one bounded `step` whenever the debt crosses the
//!   configured threshold
//! - **Forward and backward barriers**: pointer-stores into black objects
//!   either mark the target forward or re-gray the container, chosen per
//!   object kind by the caller
//!
//! ## Object Header Layout
//!
//! Every arena object carries a 'marked' byte:
//!
//! ```text
//! ┌───────┬───────────┬───────────┬───────┬───────┬───────┐
//! │ Bit 7 │ Bits 4-6  │   Bit 3   │ Bit 2 │ Bit 1 │ Bit 0 │
//! │ Test  │    Age    │ Finalizer │ Black │White1 │White0 │
//! └───────┴───────────┴───────────┴───────┴───────┴───────┘
//! Gray = no color bit set
//! ```
//!
//! ## Collection Cycle
//!
//! ```text
//! Pause ──► Propagate ──► Atomic ──► SweepAllGc ──► SweepFinObj
//!                                                       │
//! Pause ◄── CallFin ◄── SweepEnd ◄── SweepToBeFnz ◄─────┘
//! ```
//!
//! `Propagate` drains the gray queue a budgeted amount per step. `Atomic`
//! re-marks roots, drains the gray-again queue, separates dead
//! finalizer-flagged objects, and flips the current white. The sweep phases
//! walk the object lists freeing dead-white objects and re-whitening
//! survivors. `CallFin` hands resurrected finalizable objects back to the
//! owner one step at a time.
//!
//! ## Usage
//!
//! The collector is generic over the object type; the owner implements
//! [`Trace`] to enumerate child references:
//!
//! ```rust
//! use agc::{Gc, GcConfig, GcRef, Trace, Tracer};
//!
//! struct Node {
//!     edges: Vec<GcRef>,
//! }
//!
//! impl Trace for Node {
//!     fn trace(&self, tracer: &mut Tracer) {
//!         for &e in &self.edges {
//!             tracer.mark(e);
//!         }
//!     }
//! }
//!
//! let mut gc: Gc<Node> = Gc::new(GcConfig::default());
//! let a = gc.alloc(0, Node { edges: vec![] }, 0);
//! gc.collect_full(&[a]);
//! assert!(gc.contains(a));
//! ```

pub mod barrier;
pub mod config;
pub mod error;
pub mod header;
pub mod heap;
pub mod logging;
pub mod stats;
pub mod trace;

mod gc;

pub use config::GcConfig;
pub use error::{GcError, Result};
pub use gc::{Gc, GcPhase, GcRunState, StepOutcome};
pub use header::{GcHeader, GcRef};
pub use logging::{GcEvent, GcLogger};
pub use stats::GcStats;
pub use trace::{Trace, Tracer};

/// agc version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
