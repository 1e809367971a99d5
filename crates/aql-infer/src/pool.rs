//! TypeInfo Pool
//!
//! Registers churn through `TypeInfo` records fast during analysis; a
//! pooled arena with batch growth and a free list keeps alloc/free O(1)
//! at steady state instead of hitting the allocator per record.

use crate::types::TypeInfo;

/// Records added per batch growth
pub const TYPEINFO_BATCH_ALLOC: usize = 32;

/// Handle into the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfoHandle(u32);

/// Pooled TypeInfo storage
pub struct TypeInfoPool {
    slots: Vec<TypeInfo>,
    free_list: Vec<u32>,
    /// Lifetime allocation count
    pub allocated: u64,
    /// Lifetime free count
    pub freed: u64,
}

impl TypeInfoPool {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            allocated: 0,
            freed: 0,
        }
    }

    /// Take a record, growing by one batch when the free list is empty
    pub fn alloc(&mut self) -> TypeInfoHandle {
        self.allocated += 1;
        if let Some(index) = self.free_list.pop() {
            self.slots[index as usize] = TypeInfo::unknown();
            return TypeInfoHandle(index);
        }
        // Grow one batch; hand out the first new slot, free-list the rest
        let base = self.slots.len() as u32;
        self.slots
            .extend(std::iter::repeat(TypeInfo::unknown()).take(TYPEINFO_BATCH_ALLOC));
        for index in (base + 1..base + TYPEINFO_BATCH_ALLOC as u32).rev() {
            self.free_list.push(index);
        }
        TypeInfoHandle(base)
    }

    /// Return a record to the pool
    pub fn free(&mut self, handle: TypeInfoHandle) {
        self.freed += 1;
        self.free_list.push(handle.0);
    }

    pub fn get(&self, handle: TypeInfoHandle) -> &TypeInfo {
        &self.slots[handle.0 as usize]
    }

    pub fn get_mut(&mut self, handle: TypeInfoHandle) -> &mut TypeInfo {
        &mut self.slots[handle.0 as usize]
    }

    /// Slots currently checked out
    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    /// Pool capacity in slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Default for TypeInfoPool {
    fn default() -> Self {
        Self::new()
    }
}
