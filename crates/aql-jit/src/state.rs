//! Per-VM JIT State
//!
//! Ties the pieces together: the hotspot table decides *when*, the
//! pipeline produces code, the cache owns the installed entries. The VM
//! dispatcher asks [`JitState::entry_for`] before interpreting a call and
//! transfers control when an entry exists.

use crate::cache::CodeCache;
use crate::compile::compile_bytecode;
use crate::config::JitConfig;
use crate::error::{JitError, Result};
use crate::exec::{ExecutableMemory, JitEntry};
use crate::hotspot::HotspotTable;
use crate::stats::JitStats;
use crate::target::Arch;
use aql_core::{Instruction, ProtoId};
use std::time::{Duration, Instant};

pub struct JitState {
    pub config: JitConfig,
    pub hotspot: HotspotTable,
    pub cache: CodeCache,
    pub stats: JitStats,
    arch: Option<Arch>,
    /// Numeric code of the most recent error, 0 when none
    pub last_error_code: i32,
}

impl JitState {
    pub fn new(config: JitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            hotspot: HotspotTable::new(),
            cache: CodeCache::new(config.max_cache_entries),
            stats: JitStats::default(),
            arch: Arch::host(),
            last_error_code: 0,
            config,
        })
    }

    /// Whether this host can run generated code at all
    pub fn available(&self) -> bool {
        self.config.enabled && self.arch.is_some()
    }

    pub fn arch(&self) -> Option<Arch> {
        self.arch
    }

    /// Record one interpreted call for hotspot profiling
    pub fn profile_call(&mut self, proto: ProtoId, bytecode_size: usize, duration: Duration) {
        self.stats.interpreter_time += duration;
        self.stats.interpreter_calls += 1;
        self.hotspot.profile_call(proto, bytecode_size, duration);
    }

    /// Record loop back-edges for hotspot profiling
    pub fn profile_loops(&mut self, proto: ProtoId, iterations: u64) {
        self.hotspot.profile_loops(proto, iterations);
    }

    /// The full gate: hot score + min calls + size + type stability
    pub fn should_compile(&self, proto: ProtoId, type_stability: f64) -> bool {
        if !self.available() || self.cache.contains(proto) {
            return false;
        }
        self.hotspot
            .get(proto)
            .is_some_and(|info| info.should_compile(type_stability, &self.config.hotspot))
    }

    /// Compile and install one prototype. On failure the prototype is
    /// marked non-compilable for the configured cooldown and the error is
    /// recorded; interpretation continues either way.
    pub fn compile_and_install(
        &mut self,
        proto: ProtoId,
        code: &[Instruction],
        num_params: usize,
    ) -> Result<()> {
        let arch = self
            .arch
            .ok_or(JitError::InvalidInput("unsupported host architecture"))?;
        let score = self
            .hotspot
            .get(proto)
            .map(|i| i.score(&self.config.hotspot))
            .unwrap_or(0.0);

        match compile_bytecode(arch, code, num_params, &self.config) {
            Ok(compiled) => {
                self.stats.compilations += 1;
                self.stats.total_compile_time += compiled.compile_time;
                self.stats.optimizations_applied += compiled.opt_report.total() as u64;
                let mem = ExecutableMemory::install(&compiled.bytes)?;
                self.cache.insert(proto, mem, score);
                self.stats.current_code_bytes = self.cache.stats.code_bytes;
                self.stats.peak_code_bytes = self.cache.stats.peak_code_bytes;
                if let Some(info) = self.hotspot.get_mut(proto) {
                    info.is_hot = true;
                    info.is_compiled = true;
                }
                self.last_error_code = 0;
                Ok(())
            }
            Err(err) => {
                self.stats.compile_failures += 1;
                self.last_error_code = err.code();
                if let Some(info) = self.hotspot.get_mut(proto) {
                    info.noncompilable_until = Some(Instant::now() + self.config.failure_cooldown);
                }
                log::debug!("compile of proto {:?} failed: {} (cooldown engaged)", proto, err);
                Err(err)
            }
        }
    }

    /// Cached entry point for a prototype, promoting it to MRU
    pub fn entry_for(&mut self, proto: ProtoId) -> Option<JitEntry> {
        let entry = self.cache.lookup(proto)?;
        // Handing out the pointer is safe; calling it is the VM's unsafe
        Some(unsafe { entry.entry() })
    }

    /// Record one native execution
    pub fn record_execution(&mut self, duration: Duration) {
        self.stats.executions += 1;
        self.stats.total_execution_time += duration;
    }

    /// Time-based cache sweep; returns evicted count
    pub fn sweep_idle(&mut self) -> usize {
        let evicted = self.cache.sweep_idle(self.config.idle_eviction);
        self.stats.current_code_bytes = self.cache.stats.code_bytes;
        evicted
    }

    /// Drop an installed compilation (e.g. the prototype died)
    pub fn invalidate(&mut self, proto: ProtoId) {
        self.cache.evict(proto);
        if let Some(info) = self.hotspot.get_mut(proto) {
            info.is_compiled = false;
        }
        self.stats.current_code_bytes = self.cache.stats.code_bytes;
    }
}
