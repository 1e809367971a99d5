//! Configuration Module - GC Tuning Parameters
//!
//! Proper configuration balances throughput, pause length, and footprint.

use crate::error::{GcError, Result};

/// Configuration for the incremental collector
///
/// # Examples
///
/// ```rust
/// use agc::GcConfig;
///
/// // Default configuration
/// let config = GcConfig::default();
///
/// // Latency-leaning configuration: smaller steps, longer pause between cycles
/// let config = GcConfig {
///     step_objects: 32,
///     pause_percent: 300,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Allocation debt (bytes) that triggers one incremental step
    ///
    /// Lower values collect more eagerly; higher values batch more work per
    /// step. Default: 16KB
    pub step_debt: usize,

    /// Objects processed per propagate/sweep step
    ///
    /// Bounds the length of a single mutator pause. Default: 64
    pub step_objects: usize,

    /// Pause between cycles, as percent of live bytes
    ///
    /// After a cycle finishes, the next cycle starts once allocations since
    /// the flip exceed `live_bytes * pause_percent / 100`.
    /// 200 means "wait until the heap doubles". Default: 200
    pub pause_percent: usize,

    /// Step multiplier, as percent
    ///
    /// Scales how much marking work each step performs relative to the debt
    /// that triggered it. Default: 100
    pub step_multiplier: usize,

    /// Finalizable objects handed back per CallFin step
    ///
    /// Default: 4
    pub finalizers_per_step: usize,
}

impl GcConfig {
    /// Validate parameter ranges
    pub fn validate(&self) -> Result<()> {
        if self.step_objects == 0 {
            return Err(GcError::Configuration(
                "step_objects must be nonzero".to_string(),
            ));
        }
        if self.pause_percent < 100 {
            return Err(GcError::Configuration(format!(
                "pause_percent must be >= 100, got {}",
                self.pause_percent
            )));
        }
        if self.step_multiplier == 0 {
            return Err(GcError::Configuration(
                "step_multiplier must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            step_debt: 16 * 1024,
            step_objects: 64,
            pause_percent: 200,
            step_multiplier: 100,
            finalizers_per_step: 4,
        }
    }
}
