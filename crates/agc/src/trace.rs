//! Trace Protocol
//!
//! The collector is generic over the object type; the owner describes the
//! value graph by implementing [`Trace`]: for each object, report every
//! `GcRef` it holds. The collector never inspects object payloads itself.

use crate::header::GcRef;

/// Visitor handed to [`Trace::trace`]
///
/// Collects the child references of one object. Marking state is applied by
/// the collector after the visit; `Tracer` itself is just an edge sink.
pub struct Tracer {
    pub(crate) found: Vec<GcRef>,
}

impl Tracer {
    pub(crate) fn new() -> Self {
        Self { found: Vec::new() }
    }

    /// Report one child reference
    #[inline]
    pub fn mark(&mut self, child: GcRef) {
        self.found.push(child);
    }

    /// Report an optional child reference
    #[inline]
    pub fn mark_opt(&mut self, child: Option<GcRef>) {
        if let Some(c) = child {
            self.found.push(c);
        }
    }

    pub(crate) fn reset(&mut self) {
        self.found.clear();
    }
}

/// Implemented by the arena object type to enumerate outgoing references
pub trait Trace {
    /// Visit every `GcRef` directly held by `self`
    fn trace(&self, tracer: &mut Tracer);
}
