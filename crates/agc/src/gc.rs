//! Core GC - Incremental Cycle Management
//!
//! The collector advances through phases, doing a bounded amount of work per
//! [`Gc::step`] call:
//!
//! - **Pause**: idle between cycles; the first step marks roots and enters
//!   Propagate
//! - **Propagate**: drain the gray queue, a budgeted number of objects per
//!   step
//! - **Atomic** (runs inside one step): re-mark roots, drain the gray and
//!   gray-again queues to empty, separate dead finalizable objects, flip
//!   the current white
//! - **SweepAllGc / SweepFinObj / SweepToBeFnz**: walk the three object
//!   lists, freeing objects carrying the old white and re-whitening
//!   survivors
//! - **SweepEnd**: recompute the debt target for the next cycle
//! - **CallFin**: hand resurrected finalizable objects back to the owner,
//!   a few per step
//!
//! The mutator owns ordering: it must call [`Gc::step`] only at safepoints,
//! pass the current root set, and purge any weak references (string table,
//! caches) whenever a step reports freed objects, before the next
//! allocation.

use crate::config::GcConfig;
use crate::error::{GcError, Result};
use crate::header::{GcHeader, GcRef, WHITE0_MASK, WHITE1_MASK};
use crate::heap::{Arena, GcBox};
use crate::logging::{GcEvent, GcLogger};
use crate::stats::GcStats;
use crate::trace::{Trace, Tracer};
use aql_util::Timer;

/// Collector phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    Pause,
    Propagate,
    SweepAllGc,
    SweepFinObj,
    SweepToBeFnz,
    SweepEnd,
    CallFin,
}

impl GcPhase {
    /// During sweep phases the black-to-white invariant may be broken
    pub fn is_sweep(self) -> bool {
        matches!(
            self,
            GcPhase::SweepAllGc | GcPhase::SweepFinObj | GcPhase::SweepToBeFnz
        )
    }

    fn name(self) -> &'static str {
        match self {
            GcPhase::Pause => "pause",
            GcPhase::Propagate => "propagate",
            GcPhase::SweepAllGc => "sweep-allgc",
            GcPhase::SweepFinObj => "sweep-finobj",
            GcPhase::SweepToBeFnz => "sweep-tobefnz",
            GcPhase::SweepEnd => "sweep-end",
            GcPhase::CallFin => "call-fin",
        }
    }
}

/// Whether the collector reacts to debt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcRunState {
    Running,
    Stopped,
}

/// Which threaded list an object is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListId {
    AllGc,
    FinObj,
    ToBeFnz,
}

/// Result of one incremental step
#[derive(Debug, Default)]
pub struct StepOutcome {
    /// Work units (objects processed) this step
    pub work: usize,
    /// Objects freed this step; when nonzero the owner must purge weak
    /// references before the next allocation
    pub freed: usize,
    /// True when this step completed a cycle (entered Pause)
    pub finished_cycle: bool,
    /// Finalizable objects handed back this step; the owner runs their
    /// finalizers. The objects are alive again (resurrected) and will be
    /// collected by a later cycle once unreachable.
    pub to_finalize: Vec<GcRef>,
}

/// The incremental tri-color collector
pub struct Gc<T: Trace> {
    arena: Arena<T>,
    config: GcConfig,

    /// Heads of the three object lists, threaded through headers
    all_head: Option<GcRef>,
    fin_head: Option<GcRef>,
    tobefnz_head: Option<GcRef>,

    /// Gray queue for propagation
    gray: Vec<GcRef>,
    /// Objects re-grayed by the backward barrier; drained at atomic
    gray_again: Vec<GcRef>,

    phase: GcPhase,
    run_state: GcRunState,
    current_white: u8,

    /// Sweep cursor: (previous, current) on the list being swept
    sweep_cursor: Option<(Option<GcRef>, GcRef)>,

    /// Allocation debt in bytes; a step is due when it exceeds the
    /// configured threshold
    debt: isize,
    /// Live byte estimate
    total_bytes: usize,
    /// Freed counters for the in-flight cycle
    cycle_freed_objects: u64,
    cycle_freed_bytes: u64,
    cycle_timer: Option<Timer>,

    stats: GcStats,
    logger: GcLogger,
    tracer: Tracer,
}

impl<T: Trace> Gc<T> {
    pub fn new(config: GcConfig) -> Self {
        Self {
            arena: Arena::new(),
            config,
            all_head: None,
            fin_head: None,
            tobefnz_head: None,
            gray: Vec::new(),
            gray_again: Vec::new(),
            phase: GcPhase::Pause,
            run_state: GcRunState::Running,
            current_white: WHITE0_MASK,
            sweep_cursor: None,
            debt: 0,
            total_bytes: 0,
            cycle_freed_objects: 0,
            cycle_freed_bytes: 0,
            cycle_timer: None,
            stats: GcStats::default(),
            logger: GcLogger::default(),
            tracer: Tracer::new(),
        }
    }

    // === Allocation ===

    /// Allocate a new object, colored with the current white and threaded
    /// onto the all-objects list. `extra` is the byte footprint of buffers
    /// the object owns beyond its own box.
    pub fn alloc(&mut self, tag: u8, value: T, extra: usize) -> GcRef {
        let mut boxed = GcBox {
            header: GcHeader::new(tag, self.current_white),
            extra,
            value,
        };
        boxed.header.next = self.all_head;
        let r = self.arena.insert(boxed);
        self.all_head = Some(r);

        let bytes = Arena::<T>::object_bytes(extra);
        self.total_bytes += bytes;
        self.debt += bytes as isize;
        self.stats.objects_allocated += 1;
        self.stats.bytes_allocated += bytes as u64;
        self.stats.peak_bytes = self.stats.peak_bytes.max(self.total_bytes);
        r
    }

    /// Report that an object's owned buffers changed size
    pub fn adjust_extra(&mut self, r: GcRef, new_extra: usize) {
        let old = self.arena.adjust_extra(r, new_extra);
        let delta = new_extra as isize - old as isize;
        self.total_bytes = (self.total_bytes as isize + delta) as usize;
        self.debt += delta;
        if delta > 0 {
            self.stats.bytes_allocated += delta as u64;
            self.stats.peak_bytes = self.stats.peak_bytes.max(self.total_bytes);
        } else {
            self.stats.bytes_freed += (-delta) as u64;
        }
    }

    // === Access ===

    #[inline]
    pub fn contains(&self, r: GcRef) -> bool {
        self.arena.contains(r)
    }

    #[inline]
    pub fn get(&self, r: GcRef) -> Option<&T> {
        self.arena.get(r).map(|b| &b.value)
    }

    #[inline]
    pub fn get_mut(&mut self, r: GcRef) -> Option<&mut T> {
        self.arena.get_mut(r).map(|b| &mut b.value)
    }

    #[inline]
    pub fn header(&self, r: GcRef) -> Option<&GcHeader> {
        self.arena.get(r).map(|b| &b.header)
    }

    /// Object kind tag
    #[inline]
    pub fn tag(&self, r: GcRef) -> Option<u8> {
        self.arena.get(r).map(|b| b.header.tag)
    }

    /// Number of live objects
    pub fn live_objects(&self) -> usize {
        self.arena.len()
    }

    /// Live byte estimate (the `count` GC control operation)
    pub fn count_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn phase(&self) -> GcPhase {
        self.phase
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    pub fn logger_mut(&mut self) -> &mut GcLogger {
        &mut self.logger
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    // === Run-state controls ===

    pub fn stop(&mut self) {
        self.run_state = GcRunState::Stopped;
    }

    pub fn restart(&mut self) {
        self.run_state = GcRunState::Running;
    }

    pub fn is_running(&self) -> bool {
        self.run_state == GcRunState::Running
    }

    pub fn set_pause_percent(&mut self, percent: usize) -> Result<()> {
        let candidate = GcConfig {
            pause_percent: percent,
            ..self.config.clone()
        };
        candidate.validate()?;
        self.config = candidate;
        Ok(())
    }

    pub fn set_step_multiplier(&mut self, percent: usize) -> Result<()> {
        let candidate = GcConfig {
            step_multiplier: percent,
            ..self.config.clone()
        };
        candidate.validate()?;
        self.config = candidate;
        Ok(())
    }

    // === Finalizers ===

    /// Flag an object for finalization: it moves to the separated list and
    /// will be handed back through [`StepOutcome::to_finalize`] once it
    /// becomes unreachable.
    pub fn set_finalizer(&mut self, r: GcRef) -> Result<()> {
        let header = self
            .arena
            .get(r)
            .map(|b| &b.header)
            .ok_or(GcError::InvalidRef { reference: r.raw() })?;
        if header.has_finalizer() {
            return Ok(());
        }
        self.unlink(ListId::AllGc, r)?;
        self.link(ListId::FinObj, r);
        if let Some(b) = self.arena.get_mut(r) {
            b.header.set_finalizer();
        }
        Ok(())
    }

    // === Marking ===

    /// Mark one object reachable: white -> gray, queued for propagation
    #[inline]
    pub(crate) fn mark_object(&mut self, r: GcRef) {
        if let Some(boxed) = self.arena.get_mut(r) {
            if boxed.header.is_white() {
                boxed.header.white_to_gray();
                self.gray.push(r);
            }
        }
    }

    /// Re-whiten an object with the current white (sweep-phase barrier)
    pub(crate) fn make_current_white(&mut self, r: GcRef) {
        let white = self.current_white;
        if let Some(b) = self.arena.get_mut(r) {
            b.header.make_white(white);
        }
    }

    /// black -> gray, queued for re-scan at the atomic phase
    pub(crate) fn re_gray(&mut self, r: GcRef) {
        if let Some(b) = self.arena.get_mut(r) {
            if b.header.is_black() {
                b.header.black_to_gray();
                self.gray_again.push(r);
            }
        }
    }

    fn propagate_one(&mut self) -> usize {
        let Some(r) = self.gray.pop() else {
            return 0;
        };
        let Some(boxed) = self.arena.get_mut(r) else {
            return 0;
        };
        boxed.header.gray_to_black();

        self.tracer.reset();
        // Children are collected first, then marked; the arena cannot be
        // borrowed for tracing and marking at once
        self.arena
            .get(r)
            .expect("gray object vanished")
            .value
            .trace(&mut self.tracer);
        let children = std::mem::take(&mut self.tracer.found);
        for child in &children {
            self.mark_object(*child);
        }
        self.tracer.found = children;
        1
    }

    fn drain_gray(&mut self) -> usize {
        let mut work = 0;
        while !self.gray.is_empty() {
            work += self.propagate_one();
        }
        work
    }

    // === List plumbing ===

    fn list_head(&mut self, list: ListId) -> &mut Option<GcRef> {
        match list {
            ListId::AllGc => &mut self.all_head,
            ListId::FinObj => &mut self.fin_head,
            ListId::ToBeFnz => &mut self.tobefnz_head,
        }
    }

    fn link(&mut self, list: ListId, r: GcRef) {
        let head = *self.list_head(list);
        if let Some(b) = self.arena.get_mut(r) {
            b.header.next = head;
        }
        *self.list_head(list) = Some(r);
    }

    fn unlink(&mut self, list: ListId, r: GcRef) -> Result<()> {
        let mut prev: Option<GcRef> = None;
        let mut cur = *self.list_head(list);
        while let Some(c) = cur {
            let next = self.arena.get(c).and_then(|b| b.header.next);
            if c == r {
                match prev {
                    Some(p) => {
                        if let Some(b) = self.arena.get_mut(p) {
                            b.header.next = next;
                        }
                    }
                    None => *self.list_head(list) = next,
                }
                return Ok(());
            }
            prev = cur;
            cur = next;
        }
        Err(GcError::InvalidRef { reference: r.raw() })
    }

    // === Stepping ===

    /// True when accumulated allocation debt warrants a step
    pub fn should_step(&self) -> bool {
        self.run_state == GcRunState::Running && self.debt > self.config.step_debt as isize
    }

    /// Run one bounded increment of collection work
    pub fn step(&mut self, roots: &[GcRef]) -> StepOutcome {
        if self.run_state == GcRunState::Stopped {
            return StepOutcome::default();
        }
        let timer = Timer::new();
        let mut outcome = StepOutcome::default();
        self.stats.steps += 1;

        let budget = self.config.step_objects * self.config.step_multiplier / 100;
        let budget = budget.max(1);

        match self.phase {
            GcPhase::Pause => {
                self.start_cycle(roots);
                outcome.work = self.gray.len();
            }
            GcPhase::Propagate => {
                let mut work = 0;
                while work < budget && !self.gray.is_empty() {
                    work += self.propagate_one();
                }
                outcome.work = work;
                if self.gray.is_empty() {
                    self.atomic(roots);
                }
            }
            GcPhase::SweepAllGc | GcPhase::SweepFinObj | GcPhase::SweepToBeFnz => {
                let (work, freed) = self.sweep_step(budget);
                outcome.work = work;
                outcome.freed = freed;
            }
            GcPhase::SweepEnd => {
                outcome.finished_cycle = self.finish_sweep();
                outcome.work = 1;
            }
            GcPhase::CallFin => {
                outcome.to_finalize = self.call_fin_step();
                outcome.work = outcome.to_finalize.len();
                if self.tobefnz_head.is_none() {
                    outcome.finished_cycle = self.enter_pause();
                }
            }
        }

        self.stats.step_time.record(timer.elapsed());
        self.logger.log(GcEvent::Step {
            phase: self.phase.name(),
            work: outcome.work,
            duration_us: timer.elapsed_us(),
        });
        outcome
    }

    fn start_cycle(&mut self, roots: &[GcRef]) {
        self.stats.cycles += 1;
        self.cycle_freed_objects = 0;
        self.cycle_freed_bytes = 0;
        self.cycle_timer = Some(Timer::new());
        self.logger.log(GcEvent::CycleStart {
            cycle: self.stats.cycles,
            reason: "debt",
        });
        self.gray.clear();
        self.gray_again.clear();
        for &r in roots {
            self.mark_object(r);
        }
        self.phase = GcPhase::Propagate;
    }

    /// Atomic finish of marking: runs to completion within one step
    fn atomic(&mut self, roots: &[GcRef]) {
        // Re-mark roots: the set may have changed since the cycle started
        for &r in roots {
            self.mark_object(r);
        }
        self.drain_gray();

        // Objects re-grayed by the backward barrier
        let again = std::mem::take(&mut self.gray_again);
        for r in again {
            if self.arena.get(r).is_some_and(|b| b.header.is_gray()) {
                self.gray.push(r);
            }
        }
        self.drain_gray();

        // Separate dead finalizable objects and resurrect them
        self.separate_to_be_finalized();
        self.drain_gray();

        // Flip: from here on, the old white is dead
        self.current_white = Self::other_white_of(self.current_white);

        self.phase = GcPhase::SweepAllGc;
        self.sweep_cursor = self.all_head.map(|h| (None, h));
    }

    fn other_white_of(white: u8) -> u8 {
        if white == WHITE0_MASK {
            WHITE1_MASK
        } else {
            WHITE0_MASK
        }
    }

    /// Move still-white finalizable objects to the to-be-finalized list and
    /// mark them (resurrection: the finalizer must see a live object)
    fn separate_to_be_finalized(&mut self) {
        let mut dead = Vec::new();
        let mut cur = self.fin_head;
        while let Some(c) = cur {
            let boxed = self.arena.get(c).expect("finobj list corrupt");
            let next = boxed.header.next;
            if boxed.header.is_white() {
                dead.push(c);
            }
            cur = next;
        }
        for r in dead {
            self.unlink(ListId::FinObj, r).expect("finobj unlink");
            self.link(ListId::ToBeFnz, r);
            self.mark_object(r);
        }
    }

    /// Sweep a budgeted number of objects on the current list
    fn sweep_step(&mut self, budget: usize) -> (usize, usize) {
        let other_white = Self::other_white_of(self.current_white);
        let list = match self.phase {
            GcPhase::SweepAllGc => ListId::AllGc,
            GcPhase::SweepFinObj => ListId::FinObj,
            GcPhase::SweepToBeFnz => ListId::ToBeFnz,
            _ => unreachable!("sweep_step outside sweep phase"),
        };

        let mut work = 0;
        let mut freed = 0;
        while work < budget {
            let Some((prev, cur)) = self.sweep_cursor else {
                break;
            };
            let boxed = self.arena.get(cur).expect("sweep list corrupt");
            let next = boxed.header.next;
            if boxed.header.is_dead_with(other_white) {
                // Unlink and free
                match prev {
                    Some(p) => {
                        if let Some(b) = self.arena.get_mut(p) {
                            b.header.next = next;
                        }
                    }
                    None => *self.list_head(list) = next,
                }
                self.free_object(cur);
                freed += 1;
                self.sweep_cursor = next.map(|n| (prev, n));
            } else {
                let white = self.current_white;
                if let Some(b) = self.arena.get_mut(cur) {
                    b.header.make_white(white);
                }
                self.sweep_cursor = next.map(|n| (Some(cur), n));
            }
            work += 1;
        }

        if self.sweep_cursor.is_none() {
            self.advance_sweep_phase();
        }
        (work, freed)
    }

    fn advance_sweep_phase(&mut self) {
        self.phase = match self.phase {
            GcPhase::SweepAllGc => {
                self.sweep_cursor = self.fin_head.map(|h| (None, h));
                GcPhase::SweepFinObj
            }
            GcPhase::SweepFinObj => {
                self.sweep_cursor = self.tobefnz_head.map(|h| (None, h));
                GcPhase::SweepToBeFnz
            }
            GcPhase::SweepToBeFnz => GcPhase::SweepEnd,
            other => other,
        };
        // Empty lists fall straight through to the next phase
        if self.phase.is_sweep() && self.sweep_cursor.is_none() {
            self.advance_sweep_phase();
        }
    }

    fn free_object(&mut self, r: GcRef) {
        if let Some(boxed) = self.arena.remove(r) {
            let bytes = Arena::<T>::object_bytes(boxed.extra);
            self.total_bytes -= bytes;
            self.debt -= bytes as isize;
            self.stats.objects_freed += 1;
            self.stats.bytes_freed += bytes as u64;
            self.cycle_freed_objects += 1;
            self.cycle_freed_bytes += bytes as u64;
        }
    }

    fn finish_sweep(&mut self) -> bool {
        let duration_ms = self
            .cycle_timer
            .as_ref()
            .map(|t| t.elapsed_ms())
            .unwrap_or(0.0);
        self.logger.log(GcEvent::CycleEnd {
            cycle: self.stats.cycles,
            duration_ms,
            freed_objects: self.cycle_freed_objects,
            reclaimed_bytes: self.cycle_freed_bytes,
        });
        if self.tobefnz_head.is_some() {
            self.phase = GcPhase::CallFin;
            false
        } else {
            self.enter_pause()
        }
    }

    fn enter_pause(&mut self) -> bool {
        self.phase = GcPhase::Pause;
        // Next cycle starts once allocations exceed pause_percent of the
        // live estimate
        let target = self.total_bytes * self.config.pause_percent / 100;
        self.debt = -(target as isize);
        true
    }

    /// Hand back a few finalizable objects: relinked to the all-objects
    /// list with the finalizer flag cleared, so a later cycle collects them
    /// normally once unreachable again.
    fn call_fin_step(&mut self) -> Vec<GcRef> {
        let mut handed = Vec::new();
        for _ in 0..self.config.finalizers_per_step {
            let Some(head) = self.tobefnz_head else {
                break;
            };
            let next = self.arena.get(head).and_then(|b| b.header.next);
            self.tobefnz_head = next;
            self.link(ListId::AllGc, head);
            if let Some(b) = self.arena.get_mut(head) {
                b.header.clear_finalizer();
            }
            self.stats.finalizers_queued += 1;
            handed.push(head);
        }
        handed
    }

    // === Full collections ===

    /// Run the collector to the end of the current cycle (if one is in
    /// flight), then through one complete fresh cycle. Returns every
    /// finalizable object handed back along the way.
    pub fn collect_full(&mut self, roots: &[GcRef]) -> Vec<GcRef> {
        let mut pending = Vec::new();
        // Finish the in-flight cycle
        while self.phase != GcPhase::Pause {
            let outcome = self.step_forced(roots);
            pending.extend(outcome.to_finalize);
        }
        // One complete cycle
        loop {
            let outcome = self.step_forced(roots);
            pending.extend(outcome.to_finalize);
            if outcome.finished_cycle {
                break;
            }
        }
        pending
    }

    /// Full collection attempted on allocation failure: same walk as
    /// [`collect_full`] but logged as an emergency.
    pub fn collect_emergency(&mut self, roots: &[GcRef], requested: usize) -> Vec<GcRef> {
        self.logger.log(GcEvent::EmergencyCollect { requested });
        self.collect_full(roots)
    }

    /// Step regardless of run state (explicit collections ignore `stop`)
    fn step_forced(&mut self, roots: &[GcRef]) -> StepOutcome {
        let saved = self.run_state;
        self.run_state = GcRunState::Running;
        let outcome = self.step(roots);
        self.run_state = saved;
        outcome
    }

    // === Invariant validation (tests and debug builds) ===

    /// Verify the tri-color invariant: outside sweep phases, no black
    /// object references a white one.
    pub fn validate_invariants(&mut self) -> Result<()> {
        if self.phase.is_sweep() {
            return Ok(());
        }
        let mut cur = self.all_head;
        while let Some(c) = cur {
            let boxed = self
                .arena
                .get(c)
                .ok_or(GcError::Internal("all-list references dead object".into()))?;
            let next = boxed.header.next;
            if boxed.header.is_black() {
                self.tracer.reset();
                boxed.value.trace(&mut self.tracer);
                let children = std::mem::take(&mut self.tracer.found);
                for child in &children {
                    if let Some(cb) = self.arena.get(*child) {
                        if cb.header.is_white() {
                            return Err(GcError::Internal(format!(
                                "black {:?} points to white {:?}",
                                c, child
                            )));
                        }
                    }
                }
                self.tracer.found = children;
            }
            cur = next;
        }
        Ok(())
    }
}
