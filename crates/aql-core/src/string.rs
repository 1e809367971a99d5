//! Strings - Interning Table, Long Strings, Conversion Cache
//!
//! Short strings (≤ 40 bytes) are interned: one object per distinct
//! content, equality by id. Long strings are individually allocated, hash
//! lazily on first use, and compare by content.
//!
//! The interning table keeps chains per bucket and grows when the number of
//! interned strings reaches the bucket count. It holds *weak* references:
//! after any sweep that freed objects the owner must call
//! [`StringTable::purge_dead`] (and [`StrCache::clear`]) before the next
//! allocation.

use crate::object::{Heap, Object};
use crate::value::{BaseType, Tag};
use agc::GcRef;
use std::cell::Cell;

/// Strings up to this many bytes are interned
pub const SHORT_STR_LIMIT: usize = 40;

/// Marker in `shrlen` for long strings
const LONG_MARKER: u8 = 0xFF;

/// Conversion cache geometry
pub const STRCACHE_N: usize = 53;
pub const STRCACHE_M: usize = 2;

/// Heap string object, short or long
pub struct StrObject {
    /// Short length; 0xFF marks a long string
    shrlen: u8,
    /// Reserved byte (builtin ids for predefined strings)
    pub extra: u8,
    /// Content hash; lazy for long strings
    hash: Cell<u64>,
    hash_valid: Cell<bool>,
    bytes: Box<[u8]>,
}

impl StrObject {
    /// Create a short string with its hash computed eagerly
    pub fn new_short(bytes: &[u8], seed: u64) -> Self {
        debug_assert!(bytes.len() <= SHORT_STR_LIMIT);
        Self {
            shrlen: bytes.len() as u8,
            extra: 0,
            hash: Cell::new(str_hash(bytes, seed)),
            hash_valid: Cell::new(true),
            bytes: bytes.into(),
        }
    }

    /// Create a long string; the hash is computed on first use
    pub fn new_long(bytes: Vec<u8>) -> Self {
        debug_assert!(bytes.len() > SHORT_STR_LIMIT);
        Self {
            shrlen: LONG_MARKER,
            extra: 0,
            hash: Cell::new(0),
            hash_valid: Cell::new(false),
            bytes: bytes.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn is_long(&self) -> bool {
        self.shrlen == LONG_MARKER
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lossy UTF-8 view for display purposes
    pub fn to_display(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Content hash, computed lazily for long strings
    pub fn hash(&self, seed: u64) -> u64 {
        if !self.hash_valid.get() {
            self.hash.set(str_hash(&self.bytes, seed));
            self.hash_valid.set(true);
        }
        self.hash.get()
    }
}

/// Content hash: seed xor length folded over all bytes
pub fn str_hash(bytes: &[u8], seed: u64) -> u64 {
    let mut h = seed ^ bytes.len() as u64;
    for &b in bytes {
        h ^= (h << 5).wrapping_add(h >> 2).wrapping_add(b as u64);
    }
    h
}

/// Per-VM short-string interning table
pub struct StringTable {
    buckets: Vec<Vec<GcRef>>,
    nuse: usize,
    seed: u64,
}

/// Initial bucket count
const MIN_TABLE_SIZE: usize = 128;

impl StringTable {
    pub fn new(seed: u64) -> Self {
        Self {
            buckets: vec![Vec::new(); MIN_TABLE_SIZE],
            nuse: 0,
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of interned strings
    pub fn len(&self) -> usize {
        self.nuse
    }

    pub fn is_empty(&self) -> bool {
        self.nuse == 0
    }

    /// Intern `bytes`, creating the string object on first sight.
    /// Long inputs bypass the table and always allocate.
    pub fn intern(&mut self, heap: &mut Heap, bytes: &[u8]) -> GcRef {
        if bytes.len() > SHORT_STR_LIMIT {
            return new_long_string(heap, bytes.to_vec());
        }
        let hash = str_hash(bytes, self.seed);
        let slot = (hash as usize) & (self.buckets.len() - 1);
        for &r in &self.buckets[slot] {
            if let Some(Object::Str(s)) = heap.get(r) {
                if s.as_bytes() == bytes {
                    return r;
                }
            }
        }
        // Not found: allocate and chain
        let obj = StrObject::new_short(bytes, self.seed);
        let extra = obj.len();
        let r = heap.alloc(string_tag(), Object::Str(obj), extra);
        self.buckets[slot].push(r);
        self.nuse += 1;
        if self.nuse >= self.buckets.len() {
            self.grow(heap);
        }
        r
    }

    /// Double the bucket count and re-thread every chain
    fn grow(&mut self, heap: &Heap) {
        let new_size = self.buckets.len() * 2;
        log::debug!("string table grow: {} -> {} buckets", self.buckets.len(), new_size);
        let mut new_buckets: Vec<Vec<GcRef>> = vec![Vec::new(); new_size];
        for bucket in self.buckets.drain(..) {
            for r in bucket {
                if let Some(Object::Str(s)) = heap.get(r) {
                    let slot = (s.hash(self.seed) as usize) & (new_size - 1);
                    new_buckets[slot].push(r);
                }
            }
        }
        self.buckets = new_buckets;
    }

    /// Drop references to strings the last sweep freed
    pub fn purge_dead(&mut self, heap: &Heap) {
        let mut nuse = 0;
        for bucket in &mut self.buckets {
            bucket.retain(|&r| heap.contains(r));
            nuse += bucket.len();
        }
        self.nuse = nuse;
    }

    /// Root-less marking helper is intentionally absent: the table is weak.
    /// Interned strings survive only while something else references them.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Allocate a long string object
pub fn new_long_string(heap: &mut Heap, bytes: Vec<u8>) -> GcRef {
    let extra = bytes.len();
    heap.alloc(string_tag(), Object::Str(StrObject::new_long(bytes)), extra)
}

fn string_tag() -> u8 {
    Tag::make(BaseType::String, 0, true).0
}

/// Fixed-size cache in front of the interning table
///
/// Keyed by the source pointer of the converted `&str`, so repeated
/// conversions of the same literal hit without hashing. Cleared whenever
/// the sweep may have freed strings.
pub struct StrCache {
    entries: [[Option<CacheEntry>; STRCACHE_M]; STRCACHE_N],
    pub hits: u64,
    pub misses: u64,
}

#[derive(Clone, Copy)]
struct CacheEntry {
    key_ptr: usize,
    key_len: usize,
    value: GcRef,
}

impl StrCache {
    pub fn new() -> Self {
        Self {
            entries: [[None; STRCACHE_M]; STRCACHE_N],
            hits: 0,
            misses: 0,
        }
    }

    /// Convert `s` to an interned/heap string, consulting the cache
    pub fn get_or_intern(
        &mut self,
        table: &mut StringTable,
        heap: &mut Heap,
        s: &str,
    ) -> GcRef {
        let key_ptr = s.as_ptr() as usize;
        let key_len = s.len();
        let row = key_ptr % STRCACHE_N;
        for entry in self.entries[row].iter().flatten() {
            if entry.key_ptr == key_ptr && entry.key_len == key_len {
                self.hits += 1;
                return entry.value;
            }
        }
        self.misses += 1;
        let value = table.intern(heap, s.as_bytes());
        // Shift the row: newest first
        self.entries[row].rotate_right(1);
        self.entries[row][0] = Some(CacheEntry {
            key_ptr,
            key_len,
            value,
        });
        value
    }

    /// Invalidate everything (sweep may have freed cached strings)
    pub fn clear(&mut self) {
        self.entries = [[None; STRCACHE_M]; STRCACHE_N];
    }
}

impl Default for StrCache {
    fn default() -> Self {
        Self::new()
    }
}
