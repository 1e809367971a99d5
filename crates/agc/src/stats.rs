//! Collector Statistics

use aql_util::TimeStats;

/// Cumulative collector statistics
#[derive(Debug, Default, Clone)]
pub struct GcStats {
    /// Completed collection cycles
    pub cycles: u64,
    /// Incremental steps executed
    pub steps: u64,
    /// Objects allocated over the collector's lifetime
    pub objects_allocated: u64,
    /// Objects reclaimed by sweeps
    pub objects_freed: u64,
    /// Bytes allocated over the collector's lifetime
    pub bytes_allocated: u64,
    /// Bytes reclaimed by sweeps
    pub bytes_freed: u64,
    /// Peak live bytes observed
    pub peak_bytes: usize,
    /// Step pause durations
    pub step_time: TimeStats,
    /// Finalizable objects handed back to the owner
    pub finalizers_queued: u64,
}

impl GcStats {
    /// Live bytes = allocated - freed (saturating, for safety in reports)
    pub fn live_bytes(&self) -> u64 {
        self.bytes_allocated.saturating_sub(self.bytes_freed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_bytes() {
        let stats = GcStats {
            bytes_allocated: 1000,
            bytes_freed: 400,
            ..Default::default()
        };
        assert_eq!(stats.live_bytes(), 600);
    }
}
