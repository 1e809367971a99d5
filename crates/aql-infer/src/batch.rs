//! Update Batching
//!
//! Register updates accumulate here instead of hitting the register table
//! directly. A flush (every [`BATCH_FLUSH_THRESHOLD`] updates, or at the
//! end of analysis) applies the queued updates, clamps confidences, and
//! marks low-confidence entries for recomputation. Batching amortizes the
//! validation work over 32 instructions.

use crate::types::{InferState, TypeInfo, TYPEINFO_FLAG_RECOMPUTE};

/// Flush after this many queued updates
pub const BATCH_FLUSH_THRESHOLD: usize = 32;

/// Entries below this confidence are flagged for recomputation at flush
pub const RECOMPUTE_CONFIDENCE: f64 = 50.0;

/// Pending register updates
pub struct BatchBuffer {
    updates: Vec<(u32, TypeInfo)>,
    /// Lifetime flush count
    pub flushes: u64,
}

impl BatchBuffer {
    pub fn new() -> Self {
        Self {
            updates: Vec::with_capacity(BATCH_FLUSH_THRESHOLD),
            flushes: 0,
        }
    }

    /// Queue one register update; returns true when a flush is due
    pub fn push(&mut self, reg: u32, mut info: TypeInfo) -> bool {
        info.state = InferState::Pending;
        self.updates.push((reg, info));
        self.updates.len() >= BATCH_FLUSH_THRESHOLD
    }

    /// Apply queued updates to the register table
    pub fn flush(&mut self, registers: &mut [TypeInfo]) {
        if self.updates.is_empty() {
            return;
        }
        self.flushes += 1;
        for (reg, mut info) in self.updates.drain(..) {
            info.confidence = info.confidence.clamp(0.0, 100.0);
            info.state = InferState::Computed;
            if info.confidence < RECOMPUTE_CONFIDENCE {
                info.flags |= TYPEINFO_FLAG_RECOMPUTE;
            }
            if let Some(slot) = registers.get_mut(reg as usize) {
                // Preserve usage statistics across overwrites
                info.usage_count = slot.usage_count;
                info.mutation_count = slot.mutation_count + 1;
                *slot = info;
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.updates.len()
    }

    /// Most recent queued update for a register, if any. Forward analysis
    /// reads through this so same-register chains see pending state.
    pub fn lookup(&self, reg: u32) -> Option<&TypeInfo> {
        self.updates
            .iter()
            .rev()
            .find(|(r, _)| *r == reg)
            .map(|(_, info)| info)
    }
}

impl Default for BatchBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InferType;

    #[test]
    fn test_flush_applies_updates() {
        let mut batch = BatchBuffer::new();
        let mut regs = vec![TypeInfo::unknown(); 4];
        batch.push(1, TypeInfo::exact(InferType::Integer));
        batch.flush(&mut regs);
        assert_eq!(regs[1].inferred_type, InferType::Integer);
        assert_eq!(regs[1].state, InferState::Computed);
        assert_eq!(regs[1].mutation_count, 1);
        assert_eq!(batch.pending(), 0);
    }

    #[test]
    fn test_threshold_signals_flush() {
        let mut batch = BatchBuffer::new();
        for i in 0..BATCH_FLUSH_THRESHOLD - 1 {
            assert!(!batch.push(0, TypeInfo::exact(InferType::Integer)), "early flush at {i}");
        }
        assert!(batch.push(0, TypeInfo::exact(InferType::Integer)));
    }

    #[test]
    fn test_low_confidence_marked_for_recompute() {
        let mut batch = BatchBuffer::new();
        let mut regs = vec![TypeInfo::unknown(); 1];
        batch.push(0, TypeInfo::computed(InferType::Any, 30.0));
        batch.flush(&mut regs);
        assert!(regs[0].flags & TYPEINFO_FLAG_RECOMPUTE != 0);

        batch.push(0, TypeInfo::computed(InferType::Integer, 90.0));
        batch.flush(&mut regs);
        assert!(regs[0].flags & TYPEINFO_FLAG_RECOMPUTE == 0);
        assert_eq!(regs[0].mutation_count, 2);
    }

    #[test]
    fn test_out_of_range_register_ignored() {
        let mut batch = BatchBuffer::new();
        let mut regs = vec![TypeInfo::unknown(); 1];
        batch.push(9, TypeInfo::exact(InferType::Integer));
        batch.flush(&mut regs);
        assert_eq!(regs[0].state, InferState::Unknown);
    }
}
