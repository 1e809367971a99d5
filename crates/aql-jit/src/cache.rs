//! Code Cache
//!
//! Compiled entries keyed by prototype identity, with an LRU ordering for
//! capacity eviction and a time-based sweep for idle entries. Eviction is
//! the only path that frees executable memory, and it always runs on the
//! interpreter thread.

use crate::exec::{ExecutableMemory, JitEntry};
use aql_core::ProtoId;
use aql_util::FxHashMap;
use std::time::{Duration, Instant};

/// One cached compilation
pub struct CacheEntry {
    pub proto: ProtoId,
    code: ExecutableMemory,
    /// Hotspot score at compile time, for diagnostics
    pub hotspot_score: f64,
    pub last_access: Instant,
    pub access_count: u64,
}

impl CacheEntry {
    pub fn code_size(&self) -> usize {
        self.code.code_size()
    }

    /// # Safety
    /// See [`ExecutableMemory::entry`].
    pub unsafe fn entry(&self) -> JitEntry {
        self.code.entry()
    }
}

/// Cache statistics
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    /// Bytes of generated code currently installed
    pub code_bytes: usize,
    /// Largest code_bytes ever observed
    pub peak_code_bytes: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

/// Prototype-keyed cache with LRU eviction
pub struct CodeCache {
    entries: FxHashMap<ProtoId, CacheEntry>,
    /// Most recently used first
    lru: Vec<ProtoId>,
    max_entries: usize,
    pub stats: CacheStats,
}

impl CodeCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: FxHashMap::default(),
            lru: Vec::new(),
            max_entries,
            stats: CacheStats::default(),
        }
    }

    /// Lookup, promoting a hit to most-recently-used
    pub fn lookup(&mut self, proto: ProtoId) -> Option<&CacheEntry> {
        if let Some(entry) = self.entries.get_mut(&proto) {
            entry.last_access = Instant::now();
            entry.access_count += 1;
            self.stats.hits += 1;
            if let Some(pos) = self.lru.iter().position(|&p| p == proto) {
                let id = self.lru.remove(pos);
                self.lru.insert(0, id);
            }
            self.entries.get(&proto)
        } else {
            self.stats.misses += 1;
            None
        }
    }

    /// Peek without statistics or promotion
    pub fn contains(&self, proto: ProtoId) -> bool {
        self.entries.contains_key(&proto)
    }

    /// Install a compilation, evicting LRU entries past the cap
    pub fn insert(&mut self, proto: ProtoId, code: ExecutableMemory, hotspot_score: f64) {
        if let Some(old) = self.entries.remove(&proto) {
            self.stats.code_bytes -= old.code_size();
            self.lru.retain(|&p| p != proto);
        }
        self.stats.insertions += 1;
        self.stats.code_bytes += code.code_size();
        self.stats.peak_code_bytes = self.stats.peak_code_bytes.max(self.stats.code_bytes);
        self.entries.insert(
            proto,
            CacheEntry {
                proto,
                code,
                hotspot_score,
                last_access: Instant::now(),
                access_count: 0,
            },
        );
        self.lru.insert(0, proto);

        while self.entries.len() > self.max_entries {
            let Some(victim) = self.lru.pop() else {
                break;
            };
            self.evict(victim);
        }
    }

    /// Drop one entry, releasing its executable memory
    pub fn evict(&mut self, proto: ProtoId) -> bool {
        if let Some(entry) = self.entries.remove(&proto) {
            self.stats.evictions += 1;
            self.stats.code_bytes -= entry.code_size();
            self.lru.retain(|&p| p != proto);
            log::debug!("code cache evict: proto {:?}, {} bytes", proto, entry.code_size());
            true
        } else {
            false
        }
    }

    /// Time-based GC: drop entries idle longer than `idle_threshold`.
    /// Returns the number evicted.
    pub fn sweep_idle(&mut self, idle_threshold: Duration) -> usize {
        let now = Instant::now();
        let victims: Vec<ProtoId> = self
            .entries
            .values()
            .filter(|e| now.duration_since(e.last_access) > idle_threshold)
            .map(|e| e.proto)
            .collect();
        let count = victims.len();
        for v in victims {
            self.evict(v);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        let all: Vec<ProtoId> = self.entries.keys().copied().collect();
        for p in all {
            self.evict(p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_code() -> ExecutableMemory {
        // A single ret is a valid installed region
        ExecutableMemory::install(&[0xC3]).unwrap()
    }

    #[test]
    fn test_lookup_miss_then_hit() {
        let mut cache = CodeCache::new(4);
        assert!(cache.lookup(ProtoId(1)).is_none());
        cache.insert(ProtoId(1), fake_code(), 70.0);
        assert!(cache.lookup(ProtoId(1)).is_some());
        assert_eq!(cache.stats.hits, 1);
        assert_eq!(cache.stats.misses, 1);
    }

    #[test]
    fn test_capacity_evicts_lru() {
        let mut cache = CodeCache::new(2);
        cache.insert(ProtoId(1), fake_code(), 0.0);
        cache.insert(ProtoId(2), fake_code(), 0.0);
        // Touch 1 so 2 becomes LRU
        cache.lookup(ProtoId(1));
        cache.insert(ProtoId(3), fake_code(), 0.0);
        assert!(cache.contains(ProtoId(1)));
        assert!(!cache.contains(ProtoId(2)), "LRU entry must be evicted");
        assert!(cache.contains(ProtoId(3)));
        assert_eq!(cache.stats.evictions, 1);
    }

    #[test]
    fn test_code_bytes_accounting() {
        let mut cache = CodeCache::new(4);
        cache.insert(ProtoId(1), fake_code(), 0.0);
        let bytes = cache.stats.code_bytes;
        assert!(bytes > 0);
        cache.evict(ProtoId(1));
        assert_eq!(cache.stats.code_bytes, 0);
        assert_eq!(cache.stats.peak_code_bytes, bytes);
    }

    #[test]
    fn test_reinsert_replaces() {
        let mut cache = CodeCache::new(4);
        cache.insert(ProtoId(1), fake_code(), 0.0);
        cache.insert(ProtoId(1), fake_code(), 0.0);
        assert_eq!(cache.len(), 1);
        // Replacement is not an eviction
        assert_eq!(cache.stats.evictions, 0);
    }

    #[test]
    fn test_sweep_idle() {
        let mut cache = CodeCache::new(4);
        cache.insert(ProtoId(1), fake_code(), 0.0);
        cache.insert(ProtoId(2), fake_code(), 0.0);
        // Nothing is idle yet
        assert_eq!(cache.sweep_idle(Duration::from_secs(60)), 0);
        // Everything is idle at threshold zero
        assert_eq!(cache.sweep_idle(Duration::ZERO), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hit_rate() {
        let mut cache = CodeCache::new(4);
        cache.insert(ProtoId(1), fake_code(), 0.0);
        cache.lookup(ProtoId(1));
        cache.lookup(ProtoId(9));
        assert_eq!(cache.stats.hit_rate(), 50.0);
    }
}
