//! Unified Performance Monitor
//!
//! One small (~1KB) counter block shared by the VM, the type-inference
//! engine, and the JIT, plus high-precision time stats and a named-counter
//! registry for ad-hoc instrumentation. Recording is gated by `PerfConfig`
//! so production embedders pay nothing for disabled groups.
//!
//! A single optional process-wide sampling table exists for embedders that
//! aggregate reports across states; it is the only process-global in the
//! runtime.

use indexmap::IndexMap;
use serde::Serialize;
use std::time::Duration;

/// Unified performance counter block
#[derive(Debug, Default, Clone, Serialize)]
pub struct PerfMonitor {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub memory_allocs: u64,
    pub jit_compilations: u64,
    pub type_inference_ns: u64,
    pub jit_execution_ns: u64,
    pub error_count: u64,
    pub memory_kb: u64,

    /// Memory pool fragmentation estimate (0-100)
    pub pool_fragmentation: u8,
    /// Type stability of the most recently analyzed prototype (0-100)
    pub type_stability: u8,

    #[serde(skip)]
    config: PerfConfig,

    /// Named ad-hoc counters, iteration order = registration order
    #[serde(serialize_with = "serialize_named")]
    named: IndexMap<&'static str, u64>,
}

fn serialize_named<S>(
    named: &IndexMap<&'static str, u64>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(named.len()))?;
    for (k, v) in named {
        map.serialize_entry(k, v)?;
    }
    map.end()
}

impl PerfMonitor {
    /// Create a monitor with the given configuration
    pub fn new(config: PerfConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Whether any recording is enabled
    #[inline]
    pub fn enabled(&self) -> bool {
        self.config.enable_time_stats
            || self.config.enable_memory_stats
            || self.config.enable_jit_stats
            || self.config.enable_type_stats
    }

    #[inline]
    pub fn record_request(&mut self) {
        self.total_requests += 1;
    }

    #[inline]
    pub fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    #[inline]
    pub fn record_alloc(&mut self, bytes: usize) {
        if self.config.enable_memory_stats {
            self.memory_allocs += 1;
            self.memory_kb = self.memory_kb.saturating_add((bytes / 1024) as u64);
        }
    }

    #[inline]
    pub fn record_jit_compilation(&mut self) {
        if self.config.enable_jit_stats {
            self.jit_compilations += 1;
        }
    }

    #[inline]
    pub fn record_inference_time(&mut self, d: Duration) {
        if self.config.enable_type_stats {
            self.type_inference_ns += d.as_nanos() as u64;
        }
    }

    #[inline]
    pub fn record_jit_execution(&mut self, d: Duration) {
        if self.config.enable_jit_stats {
            self.jit_execution_ns += d.as_nanos() as u64;
        }
    }

    #[inline]
    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    /// Bump a named counter, registering it on first use
    pub fn bump(&mut self, name: &'static str) {
        *self.named.entry(name).or_insert(0) += 1;
    }

    /// Read a named counter
    pub fn named(&self, name: &str) -> u64 {
        self.named.get(name).copied().unwrap_or(0)
    }

    /// Reset all counters, keeping the configuration
    pub fn reset(&mut self) {
        let config = self.config.clone();
        *self = Self::new(config);
    }

    /// Render a JSON report
    pub fn report_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// High-precision time statistics for one operation class
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TimeStats {
    pub total_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub last_ns: u64,
    pub count: u32,
}

impl TimeStats {
    pub fn new() -> Self {
        Self {
            total_ns: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            last_ns: 0,
            count: 0,
        }
    }

    /// Record one sample
    pub fn record(&mut self, d: Duration) {
        let ns = d.as_nanos() as u64;
        self.total_ns += ns;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.last_ns = ns;
        self.count += 1;
    }

    /// Mean sample duration in nanoseconds (0 when no samples)
    pub fn avg_ns(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_ns / self.count as u64
        }
    }
}

impl Default for TimeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime configuration for the perf monitor
#[derive(Debug, Clone)]
pub struct PerfConfig {
    pub enable_time_stats: bool,
    pub enable_memory_stats: bool,
    pub enable_jit_stats: bool,
    pub enable_type_stats: bool,
    /// Memory usage warning threshold in KB
    pub max_memory_kb: u32,
}

impl PerfConfig {
    /// Production preset: everything off
    pub fn production() -> Self {
        Self {
            enable_time_stats: false,
            enable_memory_stats: false,
            enable_jit_stats: false,
            enable_type_stats: false,
            max_memory_kb: 1024,
        }
    }

    /// Development preset: everything on
    pub fn development() -> Self {
        Self {
            enable_time_stats: true,
            enable_memory_stats: true,
            enable_jit_stats: true,
            enable_type_stats: true,
            max_memory_kb: 256,
        }
    }
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self::production()
    }
}

/// Optional process-wide sampling table
///
/// Embedders running several states can push per-state snapshots here and
/// read an aggregate. This is the only process-global mutable state in the
/// runtime.
pub mod sampling {
    use super::PerfMonitor;
    use parking_lot::Mutex;

    lazy_static::lazy_static! {
        static ref SAMPLES: Mutex<Vec<PerfMonitor>> = Mutex::new(Vec::new());
    }

    /// Push a snapshot into the global table
    pub fn submit(snapshot: PerfMonitor) {
        SAMPLES.lock().push(snapshot);
    }

    /// Number of submitted snapshots
    pub fn count() -> usize {
        SAMPLES.lock().len()
    }

    /// Drain all snapshots
    pub fn drain() -> Vec<PerfMonitor> {
        std::mem::take(&mut *SAMPLES.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_groups_record_nothing() {
        let mut perf = PerfMonitor::new(PerfConfig::production());
        perf.record_alloc(4096);
        perf.record_jit_compilation();
        assert_eq!(perf.memory_allocs, 0);
        assert_eq!(perf.jit_compilations, 0);
    }

    #[test]
    fn test_development_records() {
        let mut perf = PerfMonitor::new(PerfConfig::development());
        perf.record_alloc(4096);
        perf.record_jit_compilation();
        perf.record_inference_time(Duration::from_nanos(500));
        assert_eq!(perf.memory_allocs, 1);
        assert_eq!(perf.memory_kb, 4);
        assert_eq!(perf.jit_compilations, 1);
        assert_eq!(perf.type_inference_ns, 500);
    }

    #[test]
    fn test_named_counters_keep_order() {
        let mut perf = PerfMonitor::new(PerfConfig::development());
        perf.bump("dict_grow");
        perf.bump("slice_grow");
        perf.bump("dict_grow");
        assert_eq!(perf.named("dict_grow"), 2);
        assert_eq!(perf.named("slice_grow"), 1);
        assert_eq!(perf.named("never"), 0);
    }

    #[test]
    fn test_time_stats() {
        let mut stats = TimeStats::new();
        stats.record(Duration::from_nanos(100));
        stats.record(Duration::from_nanos(300));
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_ns, 400);
        assert_eq!(stats.min_ns, 100);
        assert_eq!(stats.max_ns, 300);
        assert_eq!(stats.avg_ns(), 200);
    }

    #[test]
    fn test_report_json_is_valid() {
        let perf = PerfMonitor::new(PerfConfig::development());
        let report = perf.report_json();
        let parsed: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert!(parsed.get("total_requests").is_some());
    }

    #[test]
    fn test_reset() {
        let mut perf = PerfMonitor::new(PerfConfig::development());
        perf.record_request();
        perf.reset();
        assert_eq!(perf.total_requests, 0);
        assert!(perf.enabled());
    }
}
