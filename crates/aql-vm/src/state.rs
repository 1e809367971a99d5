//! VM State
//!
//! [`GlobalState`] owns everything shared across threads of one VM: the
//! heap, the string table and conversion cache, the registry, the JIT, the
//! type-inference context, and the perf monitor. [`State`] adds the main
//! thread and is the embedding surface.
//!
//! GC discipline: allocations accumulate debt; the executor calls
//! [`GlobalState::gc_safepoint`] at instruction boundaries, which runs one
//! step with the full root set and immediately purges the weak string
//! structures whenever a sweep freed objects.

use crate::error::{Result, VmError};
use agc::{GcRef, StepOutcome};
use aql_core::object::{self, Heap, Object};
use aql_core::{
    ContainerKind, DataType, Proto, ProtoId, StrCache, StringTable, TValue, Thread,
};
use aql_infer::{InferConfig, TypeInferContext};
use aql_jit::{JitConfig, JitState};
use aql_util::{FxHashMap, PerfConfig, PerfMonitor};
use std::rc::Rc;

/// Panic handler: receives the rendered error before the process aborts
pub type PanicHandler = fn(&str);

/// Warning handler
pub type WarnHandler = fn(&str, bool);

/// Version marker checked by embedders against header expectations
pub const VERSION_NUM: u32 = 100;

/// Shared VM-wide state
pub struct GlobalState {
    pub heap: Heap,
    pub strings: StringTable,
    pub str_cache: StrCache,
    /// Registry dict: values the embedder wants rooted
    pub registry: TValue,
    pub jit: JitState,
    pub infer: TypeInferContext,
    /// Cached type stability per prototype
    pub stability: FxHashMap<ProtoId, f64>,
    pub perf: PerfMonitor,
    pub panic_handler: Option<PanicHandler>,
    pub warn_handler: Option<WarnHandler>,
    /// Extra roots beyond the registry and thread stacks
    pub extra_roots: Vec<GcRef>,
    next_proto_id: u32,
    pub version: u32,
}

impl GlobalState {
    pub fn new(gc_config: agc::GcConfig, jit_config: JitConfig) -> Result<Self> {
        let mut heap = Heap::new(gc_config);
        let strings = StringTable::new(0x2545_F491_4F6C_DD1D);
        let registry_ref = object::new_container(&mut heap, ContainerKind::Dict, DataType::Any, 16)
            .map_err(VmError::from)?;
        Ok(Self {
            heap,
            strings,
            str_cache: StrCache::new(),
            registry: TValue::Dict(registry_ref),
            jit: JitState::new(jit_config).map_err(|e| VmError::runtime(e.to_string()))?,
            infer: TypeInferContext::new(InferConfig::default())
                .map_err(|e| VmError::runtime(e.to_string()))?,
            stability: FxHashMap::default(),
            perf: PerfMonitor::new(PerfConfig::default()),
            panic_handler: None,
            warn_handler: None,
            extra_roots: Vec::new(),
            next_proto_id: 0,
            version: VERSION_NUM,
        })
    }

    /// Intern a string through the conversion cache
    pub fn intern(&mut self, s: &str) -> GcRef {
        self.str_cache
            .get_or_intern(&mut self.strings, &mut self.heap, s)
    }

    /// Intern raw bytes (no cache: the cache keys on `&str` addresses)
    pub fn intern_bytes(&mut self, bytes: &[u8]) -> GcRef {
        self.strings.intern(&mut self.heap, bytes)
    }

    /// Fresh prototype identity
    pub fn next_proto_id(&mut self) -> ProtoId {
        let id = ProtoId(self.next_proto_id);
        self.next_proto_id += 1;
        id
    }

    /// Register a prototype object on the heap
    pub fn load_proto(&mut self, mut proto: Proto) -> GcRef {
        proto.id = self.next_proto_id();
        object::alloc_object(&mut self.heap, Object::Proto(proto))
    }

    // === GC driving ===

    /// Root set shared by every collection: registry + extra roots.
    /// Thread stacks are appended by the caller, which knows the live
    /// thread chain.
    pub fn base_roots(&self, out: &mut Vec<GcRef>) {
        if let Some(r) = self.registry.gc_ref() {
            out.push(r);
        }
        out.extend_from_slice(&self.extra_roots);
    }

    /// Collect the refs a detached thread's stack pins
    pub fn thread_roots(thread: &Thread, out: &mut Vec<GcRef>) {
        for v in &thread.stack[..thread.top] {
            if let Some(r) = v.gc_ref() {
                out.push(r);
            }
        }
        out.extend_from_slice(&thread.open_upvalues);
    }

    /// One incremental step at a safepoint, with weak-table upkeep
    pub fn gc_step_with_roots(&mut self, roots: &[GcRef]) -> StepOutcome {
        let outcome = self.heap.step(roots);
        if outcome.freed > 0 {
            // Sweep may have freed interned strings: purge before the next
            // allocation can recycle their slots
            self.strings.purge_dead(&self.heap);
            self.str_cache.clear();
        }
        // Finalizable objects are resurrected and handed back here; the
        // baseline runtime has no user finalizer protocol, so they simply
        // rejoin the normal object population
        for r in &outcome.to_finalize {
            log::debug!("finalizable object {:?} requeued", r);
        }
        outcome
    }

    /// Full collection with the given extra thread roots
    pub fn collect_full_with(&mut self, threads: &[&Thread]) {
        let mut roots = Vec::new();
        self.base_roots(&mut roots);
        for t in threads {
            Self::thread_roots(t, &mut roots);
        }
        self.heap.collect_full(&roots);
        self.strings.purge_dead(&self.heap);
        self.str_cache.clear();
    }

    /// Type stability for a prototype, computing and caching on first use
    pub fn stability_of(&mut self, proto_ref: GcRef, proto_id: ProtoId) -> f64 {
        if let Some(&s) = self.stability.get(&proto_id) {
            return s;
        }
        let timer = aql_util::Timer::new();
        let stability = match self.infer.infer(&self.heap, proto_ref) {
            Ok(analysis) => analysis.stability,
            Err(err) => {
                log::warn!("type inference failed for {:?}: {}", proto_id, err);
                0.0
            }
        };
        self.perf.record_inference_time(timer.elapsed());
        self.perf.type_stability = stability as u8;
        self.stability.insert(proto_id, stability);
        stability
    }
}

/// One VM instance: shared globals plus the main thread
pub struct State {
    pub g: GlobalState,
    pub main: Thread,
}

impl State {
    /// Create a fresh VM with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(agc::GcConfig::default(), JitConfig::default())
    }

    pub fn with_config(gc: agc::GcConfig, jit: JitConfig) -> Result<Self> {
        Ok(Self {
            g: GlobalState::new(gc, jit)?,
            main: Thread::new(),
        })
    }

    /// Load a prototype built by the external parser; returns a value
    /// callable through the API
    pub fn load(&mut self, proto: Proto) -> TValue {
        let proto_ref = self.g.load_proto(proto);
        let closure = aql_core::Closure {
            proto: proto_ref,
            upvalues: Vec::new(),
        };
        TValue::Closure(object::alloc_object(&mut self.g.heap, Object::Closure(closure)))
    }

    /// Load a prototype that captures upvalues; `upvalues` are the initial
    /// (closed) values
    pub fn load_with_upvalues(&mut self, proto: Proto, upvalues: Vec<TValue>) -> TValue {
        let proto_ref = self.g.load_proto(proto);
        let upvalue_refs: Vec<GcRef> = upvalues
            .into_iter()
            .map(|v| {
                object::alloc_object(
                    &mut self.g.heap,
                    Object::Upvalue(aql_core::Upvalue::Closed(v)),
                )
            })
            .collect();
        let closure = aql_core::Closure {
            proto: proto_ref,
            upvalues: upvalue_refs,
        };
        TValue::Closure(object::alloc_object(&mut self.g.heap, Object::Closure(closure)))
    }

    /// Explicit full collection
    pub fn collect_garbage(&mut self) {
        let State { g, main } = self;
        g.collect_full_with(&[&*main]);
    }

    /// Rendered form of a value (strings print their content)
    pub fn display(&self, v: TValue) -> String {
        object::display_value(&self.g.heap, &v)
    }

    /// Clone of a prototype's code handle, for the JIT
    pub fn proto_code(&self, proto_ref: GcRef) -> Option<Rc<Vec<aql_core::Instruction>>> {
        object::as_proto(&self.g.heap, proto_ref).map(|p| p.code.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state() {
        let state = State::new().unwrap();
        assert_eq!(state.g.version, VERSION_NUM);
        assert!(state.g.registry.gc_ref().is_some());
    }

    #[test]
    fn test_proto_ids_monotonic() {
        let mut state = State::new().unwrap();
        let a = state.g.next_proto_id();
        let b = state.g.next_proto_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_registry_survives_collection() {
        let mut state = State::new().unwrap();
        let registry = state.g.registry.gc_ref().unwrap();
        state.collect_garbage();
        assert!(state.g.heap.contains(registry));
    }

    #[test]
    fn test_interned_string_on_main_stack_survives() {
        let mut state = State::new().unwrap();
        let s = state.g.intern("live string");
        state.main.push(TValue::Str(s));
        state.collect_garbage();
        assert!(state.g.heap.contains(s));

        // Popped, it becomes garbage
        state.main.pop();
        state.collect_garbage();
        assert!(!state.g.heap.contains(s));
        // And the weak table noticed
        let again = state.g.intern_bytes(b"live string");
        assert_ne!(again, s);
    }

    #[test]
    fn test_stability_cached() {
        let mut state = State::new().unwrap();
        let mut proto = Proto::new(ProtoId(0), "t");
        proto.code = Rc::new(vec![
            aql_core::Instruction::asbx(aql_core::OpCode::LoadI, 0, 1),
            aql_core::Instruction::abc(aql_core::OpCode::RetOne, 0, 0, 0, false),
        ]);
        proto.max_stack_size = 1;
        let proto_ref = state.g.load_proto(proto);
        let id = object::as_proto(&state.g.heap, proto_ref).unwrap().id;
        let s1 = state.g.stability_of(proto_ref, id);
        let s2 = state.g.stability_of(proto_ref, id);
        assert_eq!(s1, s2);
        assert!(s1 > 90.0);
        assert_eq!(state.g.infer.analyses, 1, "second call must hit the cache");
    }
}
