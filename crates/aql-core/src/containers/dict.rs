//! Dict - Robin-Hood Open Addressing
//!
//! Power-of-two capacity, load factor 3/4. Each occupied entry records its
//! key hash and its probe distance from the home slot; insertion displaces
//! entries that are closer to home than the incoming one ("take from the
//! rich"), and deletion back-shifts the following cluster so the distance
//! invariant
//!
//! ```text
//! entry_at(i).distance == (i - (entry.hash & mask)) mod capacity
//! ```
//!
//! holds for every occupied slot, with vacant slots at distance 0.
//!
//! Key hashing and equality depend on the heap (interned vs long strings),
//! so both are supplied by the caller; see `object::dict_get` and friends
//! for the heap-aware entry points.

use super::{Container, ContainerFlags, ContainerKind};
use crate::dtype::DataType;
use crate::error::{CoreError, Result};
use crate::value::TValue;

/// Load factor: grow once `(len + 1) * 4 > capacity * 3`
pub const MAX_LOAD_NUM: usize = 3;
pub const MAX_LOAD_DEN: usize = 4;

/// Smallest capacity
pub const MIN_DICT_CAPACITY: usize = 16;

/// One table slot
#[derive(Clone, Copy)]
pub struct Entry {
    /// `TValue::Empty` marks a vacant slot
    pub key: TValue,
    pub value: TValue,
    pub hash: u64,
    pub distance: u8,
    pub flags: u8,
}

impl Entry {
    const VACANT: Entry = Entry {
        key: TValue::Empty,
        value: TValue::Nil,
        hash: 0,
        distance: 0,
        flags: 0,
    };

    #[inline]
    pub fn is_vacant(&self) -> bool {
        self.key.is_empty_slot()
    }
}

pub struct Dict {
    dtype: DataType,
    flags: ContainerFlags,
    entries: Box<[Entry]>,
    len: usize,
    mask: usize,
}

impl Dict {
    /// Create with at least `capacity` slots (rounded up to a power of two)
    pub fn new(dtype: DataType, capacity: usize) -> Self {
        let cap = capacity.max(MIN_DICT_CAPACITY).next_power_of_two();
        Self {
            dtype,
            flags: ContainerFlags::empty(),
            entries: vec![Entry::VACANT; cap].into_boxed_slice(),
            len: 0,
            mask: cap - 1,
        }
    }

    /// Probe for a key; `eq` decides key equality among same-hash entries.
    /// Returns the slot index when found.
    pub fn probe(&self, key: &TValue, hash: u64, eq: impl Fn(&TValue, &TValue) -> bool) -> Option<usize> {
        let mut index = hash as usize & self.mask;
        let mut distance = 0u8;
        loop {
            let entry = &self.entries[index];
            if entry.is_vacant() {
                return None;
            }
            if entry.hash == hash && eq(&entry.key, key) {
                return Some(index);
            }
            // A richer entry here means the key was never inserted
            if distance > entry.distance {
                return None;
            }
            distance = distance.saturating_add(1);
            index = (index + 1) & self.mask;
        }
    }

    /// Lookup; the absent-key sentinel flags a miss to container internals
    pub fn get_raw(&self, key: &TValue, hash: u64, eq: impl Fn(&TValue, &TValue) -> bool) -> TValue {
        match self.probe(key, hash, eq) {
            Some(index) => self.entries[index].value,
            None => TValue::AbsentKey,
        }
    }

    /// Insert or update. Grows first when the load factor would be
    /// exceeded. The caller has already rejected invalid keys.
    pub fn insert(
        &mut self,
        key: TValue,
        value: TValue,
        hash: u64,
        eq: impl Fn(&TValue, &TValue) -> bool,
    ) -> Result<()> {
        if self.is_readonly() {
            return Err(CoreError::ReadOnly);
        }
        if (self.len + 1) * MAX_LOAD_DEN > self.capacity() * MAX_LOAD_NUM {
            self.grow()?;
        }

        // Update in place when the key exists
        if let Some(index) = self.probe(&key, hash, &eq) {
            self.entries[index].value = value;
            return Ok(());
        }

        self.insert_fresh(Entry {
            key,
            value,
            hash,
            distance: 0,
            flags: 0,
        })?;
        self.len += 1;
        Ok(())
    }

    /// Robin-hood insertion of a key known to be absent
    fn insert_fresh(&mut self, mut to_insert: Entry) -> Result<()> {
        let mut index = to_insert.hash as usize & self.mask;
        loop {
            let entry = &mut self.entries[index];
            if entry.is_vacant() {
                *entry = to_insert;
                return Ok(());
            }
            if to_insert.distance > entry.distance {
                // Take from the rich: displace the closer-to-home entry
                std::mem::swap(entry, &mut to_insert);
            }
            if to_insert.distance == u8::MAX {
                // Pathological clustering; grow and retry
                self.grow()?;
                return self.insert_fresh(Entry {
                    distance: 0,
                    ..to_insert
                });
            }
            to_insert.distance += 1;
            index = (index + 1) & self.mask;
        }
    }

    /// Delete a key, back-shifting the following cluster. Returns the old
    /// value (absent-key sentinel on miss).
    pub fn remove(
        &mut self,
        key: &TValue,
        hash: u64,
        eq: impl Fn(&TValue, &TValue) -> bool,
    ) -> Result<TValue> {
        if self.is_readonly() {
            return Err(CoreError::ReadOnly);
        }
        let Some(mut index) = self.probe(key, hash, eq) else {
            return Ok(TValue::AbsentKey);
        };
        let removed = self.entries[index].value;

        // Shift subsequent entries back until a vacant slot or an entry
        // already at home
        loop {
            let next = (index + 1) & self.mask;
            let next_entry = self.entries[next];
            if next_entry.is_vacant() || next_entry.distance == 0 {
                self.entries[index] = Entry::VACANT;
                break;
            }
            self.entries[index] = Entry {
                distance: next_entry.distance - 1,
                ..next_entry
            };
            index = next;
        }

        self.len -= 1;
        Ok(removed)
    }

    /// Double the capacity, re-inserting every entry from its stored hash
    fn grow(&mut self) -> Result<()> {
        let new_cap = self
            .capacity()
            .checked_mul(2)
            .ok_or(CoreError::LengthOverflow(self.capacity()))?;
        log::debug!("dict grow: {} -> {} slots", self.capacity(), new_cap);
        let old = std::mem::replace(
            &mut self.entries,
            vec![Entry::VACANT; new_cap].into_boxed_slice(),
        );
        self.mask = new_cap - 1;
        for entry in old.into_vec() {
            if !entry.is_vacant() {
                self.insert_fresh(Entry {
                    distance: 0,
                    ..entry
                })?;
            }
        }
        Ok(())
    }

    /// Iterate occupied entries
    pub fn iter(&self) -> impl Iterator<Item = (&TValue, &TValue)> {
        self.entries
            .iter()
            .filter(|e| !e.is_vacant())
            .map(|e| (&e.key, &e.value))
    }

    /// Occupied slots, for tracing
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| !e.is_vacant())
    }

    pub fn mark_readonly(&mut self) {
        self.flags.insert(ContainerFlags::READONLY);
    }

    /// Byte footprint of the slot array, for GC accounting
    pub fn byte_size(&self) -> usize {
        self.entries.len() * std::mem::size_of::<Entry>()
    }

    /// Verify the robin-hood distance invariant on every occupied slot
    pub fn validate_distances(&self) -> bool {
        let cap = self.capacity();
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.is_vacant() {
                if entry.distance != 0 {
                    return false;
                }
                continue;
            }
            let home = entry.hash as usize & self.mask;
            let expected = (i + cap - home) & self.mask;
            if entry.distance as usize != expected {
                return false;
            }
        }
        true
    }
}

impl Container for Dict {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Dict
    }

    fn dtype(&self) -> DataType {
        self.dtype
    }

    fn len(&self) -> usize {
        self.len
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn flags(&self) -> ContainerFlags {
        self.flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_eq(a: &TValue, b: &TValue) -> bool {
        a.raw_equal(b)
    }

    /// Deterministic int hash for tests
    fn h(i: i64) -> u64 {
        (i as u64).wrapping_mul(0x9E3779B97F4A7C15)
    }

    fn insert_int(d: &mut Dict, k: i64, v: i64) {
        d.insert(TValue::Int(k), TValue::Int(v), h(k), int_eq).unwrap();
    }

    fn get_int(d: &Dict, k: i64) -> TValue {
        d.get_raw(&TValue::Int(k), h(k), int_eq)
    }

    // === Round-trip and Load ===

    #[test]
    fn test_insert_lookup_roundtrip() {
        let mut d = Dict::new(DataType::Any, 16);
        insert_int(&mut d, 1, 10);
        insert_int(&mut d, 2, 20);
        assert_eq!(get_int(&d, 1).as_int(), Some(10));
        assert_eq!(get_int(&d, 2).as_int(), Some(20));
        assert!(get_int(&d, 3).is_absent_key());
    }

    #[test]
    fn test_update_existing_key() {
        let mut d = Dict::new(DataType::Any, 16);
        insert_int(&mut d, 1, 10);
        insert_int(&mut d, 1, 11);
        assert_eq!(d.len(), 1);
        assert_eq!(get_int(&d, 1).as_int(), Some(11));
    }

    #[test]
    fn test_growth_preserves_entries() {
        let mut d = Dict::new(DataType::Any, 16);
        for i in 0..100 {
            insert_int(&mut d, i, i * 2);
        }
        assert_eq!(d.len(), 100);
        assert!(d.capacity() >= 128);
        // Load factor invariant
        assert!(d.len() * MAX_LOAD_DEN <= d.capacity() * MAX_LOAD_NUM);
        for i in 0..100 {
            assert_eq!(get_int(&d, i).as_int(), Some(i * 2), "key {i} lost in grow");
        }
        assert!(d.validate_distances());
    }

    // === Robin-Hood Invariant ===

    #[test]
    fn test_distance_invariant_under_collisions() {
        let mut d = Dict::new(DataType::Any, 16);
        // All keys collide on the same home slot
        let colliding_hash = 5u64;
        for i in 0..8 {
            d.insert(TValue::Int(i), TValue::Int(i), colliding_hash, int_eq)
                .unwrap();
            assert!(d.validate_distances(), "invariant broken after insert {i}");
        }
        for i in 0..8 {
            let found = d.get_raw(&TValue::Int(i), colliding_hash, int_eq);
            assert_eq!(found.as_int(), Some(i));
        }
    }

    #[test]
    fn test_delete_backshift_preserves_probing() {
        let mut d = Dict::new(DataType::Any, 16);
        let colliding_hash = 3u64;
        for i in 0..6 {
            d.insert(TValue::Int(i), TValue::Int(i * 10), colliding_hash, int_eq)
                .unwrap();
        }
        // Delete from the middle of the cluster
        d.remove(&TValue::Int(2), colliding_hash, int_eq).unwrap();
        assert!(d.validate_distances(), "invariant broken after delete");
        // Every remaining key still findable
        for i in [0, 1, 3, 4, 5] {
            let found = d.get_raw(&TValue::Int(i), colliding_hash, int_eq);
            assert_eq!(found.as_int(), Some(i * 10), "key {i} unreachable after delete");
        }
        assert!(d
            .get_raw(&TValue::Int(2), colliding_hash, int_eq)
            .is_absent_key());
    }

    #[test]
    fn test_remove_missing_is_absent() {
        let mut d = Dict::new(DataType::Any, 16);
        let gone = d.remove(&TValue::Int(9), h(9), int_eq).unwrap();
        assert!(gone.is_absent_key());
        assert_eq!(d.len(), 0);
    }

    #[test]
    fn test_interleaved_inserts_and_deletes() {
        let mut d = Dict::new(DataType::Any, 16);
        for i in 0..50 {
            insert_int(&mut d, i, i);
        }
        for i in (0..50).step_by(2) {
            d.remove(&TValue::Int(i), h(i), int_eq).unwrap();
        }
        assert_eq!(d.len(), 25);
        assert!(d.validate_distances());
        for i in 0..50 {
            let found = get_int(&d, i);
            if i % 2 == 0 {
                assert!(found.is_absent_key());
            } else {
                assert_eq!(found.as_int(), Some(i));
            }
        }
    }

    #[test]
    fn test_readonly() {
        let mut d = Dict::new(DataType::Any, 16);
        d.mark_readonly();
        assert!(d
            .insert(TValue::Int(1), TValue::Int(1), h(1), int_eq)
            .is_err());
    }

    #[test]
    fn test_randomized_operations_preserve_invariant() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0xD1C7);
        let mut d = Dict::new(DataType::Any, 16);
        let mut shadow = std::collections::HashMap::new();

        for op in 0..2000 {
            let k = rng.gen_range(0..200i64);
            if rng.gen_bool(0.7) {
                let v = rng.gen_range(0..1_000_000i64);
                insert_int(&mut d, k, v);
                shadow.insert(k, v);
            } else {
                d.remove(&TValue::Int(k), h(k), int_eq).unwrap();
                shadow.remove(&k);
            }
            if op % 64 == 0 {
                assert!(d.validate_distances(), "invariant broken at op {op}");
                assert!(
                    d.len() * MAX_LOAD_DEN <= d.capacity() * MAX_LOAD_NUM,
                    "load factor exceeded at op {op}"
                );
            }
        }

        assert_eq!(d.len(), shadow.len());
        for (&k, &v) in &shadow {
            assert_eq!(get_int(&d, k).as_int(), Some(v), "key {k} diverged");
        }
        assert!(d.validate_distances());
    }
}
