//! Hotspot Detection
//!
//! Per-prototype execution counters and the weighted scoring that decides
//! when a function is worth compiling. The profiler is cheap enough to run
//! unconditionally: one map update per call.

use crate::config::HotspotConfig;
use aql_core::ProtoId;
use aql_util::FxHashMap;
use std::time::{Duration, Instant};

/// Per-prototype execution profile
#[derive(Debug, Clone)]
pub struct HotspotInfo {
    pub call_count: u64,
    pub loop_count: u64,
    pub bytecode_size: usize,
    /// Total interpreted execution time
    pub execution_time: Duration,
    pub is_hot: bool,
    pub is_compiled: bool,
    /// Set after a compile failure; retry only after the cooldown
    pub noncompilable_until: Option<Instant>,
}

impl HotspotInfo {
    pub fn new(bytecode_size: usize) -> Self {
        Self {
            call_count: 0,
            loop_count: 0,
            bytecode_size,
            execution_time: Duration::ZERO,
            is_hot: false,
            is_compiled: false,
            noncompilable_until: None,
        }
    }

    /// Record one interpreted call
    pub fn record_call(&mut self, duration: Duration) {
        self.call_count += 1;
        self.execution_time += duration;
    }

    /// Record loop back-edges taken
    pub fn record_loops(&mut self, iterations: u64) {
        self.loop_count += iterations;
    }

    /// Average time per call in milliseconds
    pub fn avg_time_per_call_ms(&self) -> f64 {
        if self.call_count == 0 {
            return 0.0;
        }
        self.execution_time.as_secs_f64() * 1000.0 / self.call_count as f64
    }

    /// Weighted hotspot score, 0..100
    pub fn score(&self, config: &HotspotConfig) -> f64 {
        let norm = |value: f64, max: f64| -> f64 {
            if max <= 0.0 {
                0.0
            } else {
                (value / max * 100.0).min(100.0)
            }
        };
        let calls = norm(self.call_count as f64, config.norm_calls as f64);
        let time = norm(
            self.execution_time.as_secs_f64() * 1000.0,
            config.norm_time_ms,
        );
        let size = norm(self.bytecode_size as f64, config.norm_size as f64);
        let loops = norm(self.loop_count as f64, config.norm_loops as f64);

        config.call_weight * calls
            + config.time_weight * time
            + config.size_weight * size
            + config.loop_weight * loops
    }

    /// The compilation decision: score over threshold and every gate green
    pub fn should_compile(&self, type_stability: f64, config: &HotspotConfig) -> bool {
        if self.is_compiled {
            return false;
        }
        if let Some(until) = self.noncompilable_until {
            if Instant::now() < until {
                return false;
            }
        }
        if self.call_count < config.min_calls {
            return false;
        }
        if self.bytecode_size > config.max_bytecode_size {
            return false;
        }
        if type_stability < config.min_type_stability {
            return false;
        }
        self.score(config) >= config.threshold
    }
}

/// Profile table over all prototypes seen by this VM
pub struct HotspotTable {
    map: FxHashMap<ProtoId, HotspotInfo>,
}

impl HotspotTable {
    pub fn new() -> Self {
        Self {
            map: FxHashMap::default(),
        }
    }

    /// Record a call, creating the profile on first sight
    pub fn profile_call(&mut self, proto: ProtoId, bytecode_size: usize, duration: Duration) {
        self.map
            .entry(proto)
            .or_insert_with(|| HotspotInfo::new(bytecode_size))
            .record_call(duration);
    }

    pub fn profile_loops(&mut self, proto: ProtoId, iterations: u64) {
        if let Some(info) = self.map.get_mut(&proto) {
            info.record_loops(iterations);
        }
    }

    pub fn get(&self, proto: ProtoId) -> Option<&HotspotInfo> {
        self.map.get(&proto)
    }

    pub fn get_mut(&mut self, proto: ProtoId) -> Option<&mut HotspotInfo> {
        self.map.get_mut(&proto)
    }

    /// Reset all profiling state
    pub fn reset(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for HotspotTable {
    fn default() -> Self {
        Self::new()
    }
}
