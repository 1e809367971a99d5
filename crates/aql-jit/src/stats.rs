//! JIT Statistics

use std::time::Duration;

/// Cumulative compiler and execution statistics
#[derive(Debug, Default, Clone)]
pub struct JitStats {
    pub compilations: u64,
    pub compile_failures: u64,
    pub executions: u64,
    pub total_compile_time: Duration,
    pub total_execution_time: Duration,
    /// Interpreter time over the same prototypes, for the speedup ratio
    pub interpreter_time: Duration,
    pub interpreter_calls: u64,
    pub optimizations_applied: u64,
    /// Current installed code bytes (mirrors the cache)
    pub current_code_bytes: usize,
    pub peak_code_bytes: usize,
}

impl JitStats {
    pub fn avg_compile_time(&self) -> Duration {
        if self.compilations == 0 {
            Duration::ZERO
        } else {
            self.total_compile_time / self.compilations as u32
        }
    }

    pub fn avg_execution_time(&self) -> Duration {
        if self.executions == 0 {
            Duration::ZERO
        } else {
            self.total_execution_time / self.executions as u32
        }
    }

    /// Interpreter time per call over JIT time per call; 0 until both sides
    /// have samples
    pub fn speedup_ratio(&self) -> f64 {
        if self.executions == 0 || self.interpreter_calls == 0 {
            return 0.0;
        }
        let jit = self.total_execution_time.as_secs_f64() / self.executions as f64;
        let interp = self.interpreter_time.as_secs_f64() / self.interpreter_calls as f64;
        if jit <= 0.0 {
            return 0.0;
        }
        interp / jit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_averages_guard_zero() {
        let stats = JitStats::default();
        assert_eq!(stats.avg_compile_time(), Duration::ZERO);
        assert_eq!(stats.speedup_ratio(), 0.0);
    }

    #[test]
    fn test_speedup_ratio() {
        let stats = JitStats {
            executions: 10,
            total_execution_time: Duration::from_millis(10),
            interpreter_calls: 10,
            interpreter_time: Duration::from_millis(50),
            ..Default::default()
        };
        assert!((stats.speedup_ratio() - 5.0).abs() < 1e-9);
    }
}
