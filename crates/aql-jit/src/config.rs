//! Configuration Module - JIT Tuning Parameters

use crate::error::{JitError, Result};
use std::time::Duration;

/// Hotspot detection configuration
///
/// The score is a weighted sum of four signals, each normalized to 0..100
/// against its configured maximum, compared to `threshold`. Three hard
/// gates apply on top: minimum call count, maximum bytecode size, and
/// minimum type stability.
#[derive(Debug, Clone)]
pub struct HotspotConfig {
    /// Call count weight (0.0-1.0)
    pub call_weight: f64,
    /// Execution time weight (0.0-1.0)
    pub time_weight: f64,
    /// Code size weight (0.0-1.0)
    pub size_weight: f64,
    /// Loop iteration weight (0.0-1.0)
    pub loop_weight: f64,

    /// Hotspot threshold score (0..100)
    pub threshold: f64,

    /// Normalization maxima: the value at which a signal saturates at 100
    pub norm_calls: u64,
    pub norm_time_ms: f64,
    pub norm_size: usize,
    pub norm_loops: u64,

    /// Gate: minimum calls before compilation is considered
    pub min_calls: u64,
    /// Gate: maximum bytecode size accepted
    pub max_bytecode_size: usize,
    /// Gate: minimum type stability (0..100)
    pub min_type_stability: f64,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            call_weight: 0.4,
            time_weight: 0.3,
            size_weight: 0.2,
            loop_weight: 0.1,
            threshold: 60.0,
            norm_calls: 200,
            norm_time_ms: 50.0,
            norm_size: 500,
            norm_loops: 10_000,
            min_calls: 50,
            max_bytecode_size: 2000,
            min_type_stability: 85.0,
        }
    }
}

/// Optimization pass switches
#[derive(Debug, Clone)]
pub struct OptConfig {
    pub constant_folding: bool,
    pub dead_code_elimination: bool,
    pub register_coalescing: bool,
    pub peephole: bool,
}

impl Default for OptConfig {
    fn default() -> Self {
        Self {
            constant_folding: true,
            dead_code_elimination: true,
            register_coalescing: true,
            peephole: true,
        }
    }
}

/// Top-level JIT configuration
#[derive(Debug, Clone)]
pub struct JitConfig {
    pub enabled: bool,
    pub hotspot: HotspotConfig,
    pub opt: OptConfig,

    /// Per-compile wall-clock budget
    pub compile_budget: Duration,
    /// Maximum cached compilations
    pub max_cache_entries: usize,
    /// Maximum bytes of generated code per function
    pub max_code_size: usize,
    /// Entries idle longer than this are swept by the cache GC
    pub idle_eviction: Duration,
    /// Cooldown before a failed prototype may be retried
    pub failure_cooldown: Duration,
}

impl JitConfig {
    pub fn validate(&self) -> Result<()> {
        let h = &self.hotspot;
        let total = h.call_weight + h.time_weight + h.size_weight + h.loop_weight;
        if (total - 1.0).abs() > 1e-9 {
            return Err(JitError::InvalidInput("hotspot weights must sum to 1.0"));
        }
        if !(0.0..=100.0).contains(&h.threshold) {
            return Err(JitError::InvalidInput("threshold must be in 0..100"));
        }
        if !(0.0..=100.0).contains(&h.min_type_stability) {
            return Err(JitError::InvalidInput("min_type_stability must be in 0..100"));
        }
        if self.max_cache_entries == 0 {
            return Err(JitError::InvalidInput("max_cache_entries must be nonzero"));
        }
        Ok(())
    }
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hotspot: HotspotConfig::default(),
            opt: OptConfig::default(),
            compile_budget: Duration::from_secs(5),
            max_cache_entries: 64,
            max_code_size: 256 * 1024,
            idle_eviction: Duration::from_secs(300),
            failure_cooldown: Duration::from_secs(30),
        }
    }
}
