//! Write Barriers
//!
//! The incremental collector interleaves marking with mutation, so a store
//! of a white reference into an already-black object would hide the white
//! object from the current cycle. Two barriers repair that:
//!
//! - **Forward barrier** (`barrier_forward`): mark the white target right
//!   away, moving the collector forward. Right for objects with few pointer
//!   stores (closures, upvalues, prototypes).
//! - **Backward barrier** (`barrier_backward`): flip the black container
//!   back to gray and queue it for re-scanning at the atomic phase. Right
//!   for write-heavy containers (dicts, slices): one re-scan instead of one
//!   mark per store.
//!
//! During sweep phases the invariant is intentionally broken; the forward
//! barrier then only re-whitens the parent so the sweep handles it.

use crate::gc::{Gc, GcPhase};
use crate::header::GcRef;
use crate::trace::Trace;

impl<T: Trace> Gc<T> {
    /// Barrier for `parent.field = child` stores on low-write objects
    ///
    /// No-op unless parent is black and child is white.
    pub fn barrier_forward(&mut self, parent: GcRef, child: GcRef) {
        let parent_black = self.header(parent).is_some_and(|h| h.is_black());
        if !parent_black {
            return;
        }
        let child_white = self.header(child).is_some_and(|h| h.is_white());
        if !child_white {
            return;
        }
        if self.phase() == GcPhase::Propagate {
            // Invariant holds: push the collector forward
            self.mark_object(child);
        } else {
            // Sweep in progress: re-whiten the parent instead, the sweep
            // will re-whiten or free the child
            self.make_current_white(parent);
        }
    }

    /// Barrier for write-heavy containers: re-gray the parent
    ///
    /// No-op unless parent is black.
    pub fn barrier_backward(&mut self, parent: GcRef) {
        let parent_black = self.header(parent).is_some_and(|h| h.is_black());
        if !parent_black {
            return;
        }
        self.re_gray(parent);
    }
}
