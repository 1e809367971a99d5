//! GC Logging and Tracing
//!
//! Structured events for GC operations, useful for performance analysis and
//! production monitoring. Events land in an in-memory ring and, at the
//! appropriate `log` level, on the standard logging facade.

use std::collections::VecDeque;
use std::time::Instant;

/// GC event types
#[derive(Debug, Clone)]
pub enum GcEvent {
    /// Collection cycle started
    CycleStart { cycle: u64, reason: &'static str },

    /// Collection cycle completed
    CycleEnd {
        cycle: u64,
        duration_ms: f64,
        freed_objects: u64,
        reclaimed_bytes: u64,
    },

    /// One incremental step
    Step {
        phase: &'static str,
        work: usize,
        duration_us: u64,
    },

    /// Allocation failed and emergency collection was attempted
    EmergencyCollect { requested: usize },

    /// Heap statistics snapshot
    HeapStats {
        live_objects: usize,
        live_bytes: usize,
    },
}

/// GC Logger configuration
#[derive(Debug, Clone)]
pub struct GcLoggerConfig {
    /// Ring buffer capacity
    pub capacity: usize,
    /// Also emit through the `log` facade
    pub emit_log: bool,
    /// Render events as JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for GcLoggerConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            emit_log: true,
            json: false,
        }
    }
}

/// Centralized event log for one collector
pub struct GcLogger {
    config: GcLoggerConfig,
    events: VecDeque<(Instant, GcEvent)>,
    enabled: bool,
}

impl GcLogger {
    pub fn new(config: GcLoggerConfig) -> Self {
        Self {
            events: VecDeque::with_capacity(config.capacity),
            config,
            enabled: true,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Record one event
    pub fn log(&mut self, event: GcEvent) {
        if !self.enabled {
            return;
        }
        if self.config.emit_log {
            self.emit(&event);
        }
        if self.events.len() == self.config.capacity {
            self.events.pop_front();
        }
        self.events.push_back((Instant::now(), event));
    }

    fn emit(&self, event: &GcEvent) {
        if self.config.json {
            log::debug!("{}", Self::render_json(event));
            return;
        }
        match event {
            GcEvent::CycleStart { cycle, reason } => {
                log::debug!("[GC] cycle {} started (reason: {})", cycle, reason);
            }
            GcEvent::CycleEnd {
                cycle,
                duration_ms,
                freed_objects,
                reclaimed_bytes,
            } => {
                log::debug!(
                    "[GC] cycle {} completed ({:.2}ms, freed {} objects, {} bytes)",
                    cycle,
                    duration_ms,
                    freed_objects,
                    reclaimed_bytes
                );
            }
            GcEvent::Step {
                phase,
                work,
                duration_us,
            } => {
                log::trace!("[GC] {} step: {} units, {} us", phase, work, duration_us);
            }
            GcEvent::EmergencyCollect { requested } => {
                log::warn!("[GC] emergency collection ({} bytes requested)", requested);
            }
            GcEvent::HeapStats {
                live_objects,
                live_bytes,
            } => {
                log::trace!("[GC] heap: {} objects, {} bytes", live_objects, live_bytes);
            }
        }
    }

    /// Render one event as a JSON object
    pub fn render_json(event: &GcEvent) -> String {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let json = match event {
            GcEvent::CycleStart { cycle, reason } => serde_json::json!({
                "ts": timestamp.to_string(),
                "type": "cycle_start",
                "cycle": cycle,
                "reason": reason,
            }),
            GcEvent::CycleEnd {
                cycle,
                duration_ms,
                freed_objects,
                reclaimed_bytes,
            } => serde_json::json!({
                "ts": timestamp.to_string(),
                "type": "cycle_end",
                "cycle": cycle,
                "duration_ms": duration_ms,
                "freed_objects": freed_objects,
                "reclaimed_bytes": reclaimed_bytes,
            }),
            GcEvent::Step {
                phase,
                work,
                duration_us,
            } => serde_json::json!({
                "ts": timestamp.to_string(),
                "type": "step",
                "phase": phase,
                "work": work,
                "duration_us": duration_us,
            }),
            GcEvent::EmergencyCollect { requested } => serde_json::json!({
                "ts": timestamp.to_string(),
                "type": "emergency_collect",
                "requested": requested,
            }),
            GcEvent::HeapStats {
                live_objects,
                live_bytes,
            } => serde_json::json!({
                "ts": timestamp.to_string(),
                "type": "heap_stats",
                "live_objects": live_objects,
                "live_bytes": live_bytes,
            }),
        };
        json.to_string()
    }

    /// Number of retained events
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Iterate retained events, oldest first
    pub fn events(&self) -> impl Iterator<Item = &GcEvent> {
        self.events.iter().map(|(_, e)| e)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Default for GcLogger {
    fn default() -> Self {
        Self::new(GcLoggerConfig::default())
    }
}
