//! Typed Containers
//!
//! Four container kinds share a common surface (`dtype`, `kind`, `length`,
//! `capacity`, `flags`) behind one trait:
//!
//! - [`Array`]: fixed length, tagged-value storage
//! - [`Slice`]: growable, tagged-value storage, optionally a view into
//!   another container
//! - [`Dict`]: open-addressed robin-hood hash table
//! - [`Vector`]: raw SIMD-aligned numeric storage
//!
//! plus [`RangeObject`], the integer range used by iteration.
//!
//! Operations that need to follow references (slice views, dict key
//! comparison against long strings, deep equality) live in
//! [`crate::object`], where the heap is in reach.

mod array;
mod dict;
mod range;
mod slice;
mod vector;

pub use array::Array;
pub use dict::{Dict, Entry, MAX_LOAD_NUM, MAX_LOAD_DEN};
pub use range::RangeObject;
pub use slice::{Slice, SliceView};
pub use vector::{VecOp, Vector};

use crate::dtype::DataType;
use bitflags::bitflags;
use num_enum::TryFromPrimitive;

/// Container kind discriminator (also the NEWOBJECT operand encoding)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum ContainerKind {
    Array = 0,
    Slice = 1,
    Dict = 2,
    Vector = 3,
}

bitflags! {
    /// Per-container flag word
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContainerFlags: u8 {
        /// Mutation rejected
        const READONLY = 1 << 0;
        /// Slice does not own its storage; reads/writes go to the source
        const VIEW = 1 << 1;
        /// Storage is SIMD-aligned (vectors)
        const SIMD_ALIGNED = 1 << 2;
    }
}

/// Common accessors shared by every container kind
pub trait Container {
    fn kind(&self) -> ContainerKind;
    fn dtype(&self) -> DataType;
    fn len(&self) -> usize;
    fn capacity(&self) -> usize;
    fn flags(&self) -> ContainerFlags;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_readonly(&self) -> bool {
        self.flags().contains(ContainerFlags::READONLY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_raw() {
        assert_eq!(ContainerKind::try_from(2u8).unwrap(), ContainerKind::Dict);
        assert!(ContainerKind::try_from(9u8).is_err());
    }

    #[test]
    fn test_flags() {
        let f = ContainerFlags::READONLY | ContainerFlags::VIEW;
        assert!(f.contains(ContainerFlags::READONLY));
        assert!(!f.contains(ContainerFlags::SIMD_ALIGNED));
    }
}
