//! Embedding API
//!
//! A stack-discipline API over [`State`], mirroring the classic C
//! embedding surface: values travel through the main thread's stack,
//! indices are 1-based from the bottom, negative from the top, with the
//! registry behind a pseudo-index.
//!
//! Errors follow the status-code protocol: `pcall` catches and pushes the
//! error message; `call` without protection reaches the panic handler.

use crate::arith::{self, ArithOp, BitOp};
use crate::builtins;
use crate::error::{Result, Status, VmError};
use crate::executor::Executor;
use crate::state::State;
use aql_core::containers::Container;
use aql_core::object::{self, Object};
use aql_core::{
    ContainerKind, DataType, NativeClosure, NativeFn, TValue, Thread, ThreadStatus,
};

/// Pseudo-index of the registry
pub const REGISTRY_INDEX: i32 = -1_001_000;

/// Pseudo-index of upvalue `i` of the running native (resolved only inside
/// native calls; see `NativeContext::upvalue`)
pub const fn upvalue_index(i: u32) -> i32 {
    REGISTRY_INDEX - 1 - i as i32
}

/// GC control operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcWhat {
    Stop,
    Restart,
    Collect,
    Count,
    Step,
    SetPause(usize),
    SetStepMul(usize),
    IsRunning,
}

/// Arithmetic operations for `arith`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiArith {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Unm,
    Band,
    Bor,
    Bxor,
    Shl,
    Shr,
    Bnot,
}

/// Continuation signature for `callk`/`pcallk`
pub type Continuation = fn(&mut State, Status, i64) -> Result<()>;

impl State {
    // === Index Resolution ===

    /// Absolute stack position for an API index; None when out of range
    fn resolve(&self, index: i32) -> Option<usize> {
        if index == REGISTRY_INDEX {
            return None; // handled by value_at
        }
        if index > 0 {
            let abs = index as usize - 1;
            (abs < self.main.top).then_some(abs)
        } else if index < 0 {
            let offset = (-index) as usize;
            self.main.top.checked_sub(offset)
        } else {
            None
        }
    }

    /// Value at an API index (nil when invalid)
    pub fn value_at(&self, index: i32) -> TValue {
        if index == REGISTRY_INDEX {
            return self.g.registry;
        }
        match self.resolve(index) {
            Some(abs) => self.main.slot(abs),
            None => TValue::Nil,
        }
    }

    fn set_value_at(&mut self, index: i32, value: TValue) -> Result<()> {
        let abs = self
            .resolve(index)
            .ok_or_else(|| VmError::runtime(format!("invalid stack index {index}")))?;
        self.main.set_slot(abs, value);
        Ok(())
    }

    // === Stack Manipulation ===

    pub fn get_top(&self) -> usize {
        self.main.top
    }

    /// Grow (nil-filling) or shrink the stack to `top` values
    pub fn set_top(&mut self, top: usize) -> Result<()> {
        while self.main.top < top {
            if !self.main.push(TValue::Nil) {
                return Err(VmError::StackOverflow);
            }
        }
        while self.main.top > top {
            self.main.pop();
        }
        Ok(())
    }

    /// Ensure room for `n` more pushes
    pub fn check_stack(&mut self, n: usize) -> bool {
        self.main.ensure_stack(n)
    }

    pub fn pop(&mut self, n: usize) {
        for _ in 0..n {
            self.main.pop();
        }
    }

    /// Copy the value at `from` over the slot at `to`
    pub fn copy(&mut self, from: i32, to: i32) -> Result<()> {
        let v = self.value_at(from);
        self.set_value_at(to, v)
    }

    /// Rotate the window between `idx` and the top by `n` positions
    /// (positive: toward the top)
    pub fn rotate(&mut self, idx: i32, n: i32) -> Result<()> {
        let start = self
            .resolve(idx)
            .ok_or_else(|| VmError::runtime(format!("invalid stack index {idx}")))?;
        let window = &mut self.main.stack[start..self.main.top];
        if window.is_empty() {
            return Ok(());
        }
        let len = window.len() as i32;
        let n = ((n % len) + len) % len;
        window.rotate_right(n as usize);
        Ok(())
    }

    /// Move `n` values from this state's stack to a coroutine's stack
    pub fn xmove(&mut self, to_thread: TValue, n: usize) -> Result<()> {
        let TValue::Thread(r) = to_thread else {
            return Err(VmError::runtime("xmove target is not a thread"));
        };
        let mut moved = Vec::with_capacity(n);
        for _ in 0..n {
            moved.push(self.main.pop());
        }
        moved.reverse();
        let th = object::as_thread_mut(&mut self.g.heap, r)
            .ok_or_else(|| VmError::runtime("dead thread"))?;
        for v in moved {
            if !th.push(v) {
                return Err(VmError::StackOverflow);
            }
        }
        Ok(())
    }

    // === Typed Pushes ===

    fn push_value(&mut self, v: TValue) -> Result<()> {
        if !self.main.push(v) {
            return Err(VmError::StackOverflow);
        }
        Ok(())
    }

    pub fn push_nil(&mut self) -> Result<()> {
        self.push_value(TValue::Nil)
    }

    pub fn push_boolean(&mut self, b: bool) -> Result<()> {
        self.push_value(TValue::Bool(b))
    }

    pub fn push_integer(&mut self, i: i64) -> Result<()> {
        self.push_value(TValue::Int(i))
    }

    pub fn push_number(&mut self, n: f64) -> Result<()> {
        self.push_value(TValue::Float(n))
    }

    pub fn push_string(&mut self, s: &str) -> Result<()> {
        let r = self.g.intern(s);
        self.push_value(TValue::Str(r))
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let r = self.g.intern_bytes(bytes);
        self.push_value(TValue::Str(r))
    }

    /// Push a native closure binding `n_upvalues` popped from the stack
    pub fn push_native_closure(&mut self, f: NativeFn, n_upvalues: usize) -> Result<()> {
        let mut upvalues = Vec::with_capacity(n_upvalues);
        for _ in 0..n_upvalues {
            upvalues.push(self.main.pop());
        }
        upvalues.reverse();
        if upvalues.is_empty() {
            return self.push_value(TValue::NativeFn(f));
        }
        let r = object::alloc_object(
            &mut self.g.heap,
            Object::NativeClosure(NativeClosure { func: f, upvalues }),
        );
        self.push_value(TValue::NativeClosure(r))
    }

    pub fn push_light_userdata(&mut self, p: usize) -> Result<()> {
        self.push_value(TValue::LightUserdata(p))
    }

    // === Typed Reads ===

    pub fn to_integer_x(&self, index: i32) -> Option<i64> {
        self.value_at(index).coerce_int()
    }

    pub fn to_number_x(&self, index: i32) -> Option<f64> {
        self.value_at(index).coerce_float()
    }

    pub fn to_boolean(&self, index: i32) -> bool {
        self.value_at(index).is_truthy()
    }

    /// String content with its byte length
    pub fn to_string_x(&self, index: i32) -> Option<(String, usize)> {
        let v = self.value_at(index);
        let bytes = object::str_bytes(&self.g.heap, &v)?;
        Some((String::from_utf8_lossy(bytes).into_owned(), bytes.len()))
    }

    pub fn to_userdata(&self, index: i32) -> Option<usize> {
        match self.value_at(index) {
            TValue::LightUserdata(p) => Some(p),
            _ => None,
        }
    }

    pub fn to_native_fn(&self, index: i32) -> Option<NativeFn> {
        match self.value_at(index) {
            TValue::NativeFn(f) => Some(f),
            TValue::NativeClosure(r) => {
                object::as_native_closure(&self.g.heap, r).map(|nc| nc.func)
            }
            _ => None,
        }
    }

    // === Predicates ===

    pub fn is_nil(&self, index: i32) -> bool {
        self.value_at(index).is_nil()
    }

    pub fn is_boolean(&self, index: i32) -> bool {
        matches!(self.value_at(index), TValue::Bool(_))
    }

    pub fn is_integer(&self, index: i32) -> bool {
        self.value_at(index).is_int()
    }

    pub fn is_number(&self, index: i32) -> bool {
        self.value_at(index).is_number()
    }

    pub fn is_string(&self, index: i32) -> bool {
        self.value_at(index).is_string()
    }

    pub fn is_function(&self, index: i32) -> bool {
        self.value_at(index).is_function()
    }

    pub fn is_thread(&self, index: i32) -> bool {
        matches!(self.value_at(index), TValue::Thread(_))
    }

    // === Containers ===

    pub fn create_array(&mut self, len: usize) -> Result<()> {
        let r = object::new_container(&mut self.g.heap, ContainerKind::Array, DataType::Any, len)
            .map_err(VmError::from)?;
        self.push_value(TValue::Array(r))
    }

    pub fn create_slice(&mut self, capacity: usize) -> Result<()> {
        let r = object::new_container(&mut self.g.heap, ContainerKind::Slice, DataType::Any, capacity)
            .map_err(VmError::from)?;
        self.push_value(TValue::Slice(r))
    }

    pub fn create_dict(&mut self) -> Result<()> {
        let r = object::new_container(&mut self.g.heap, ContainerKind::Dict, DataType::Any, 16)
            .map_err(VmError::from)?;
        self.push_value(TValue::Dict(r))
    }

    pub fn create_vector(&mut self, len: usize) -> Result<()> {
        let r = object::new_container(&mut self.g.heap, ContainerKind::Vector, DataType::F64, len)
            .map_err(VmError::from)?;
        self.push_value(TValue::Vector(r))
    }

    /// Push `container[n]`
    pub fn get_index(&mut self, index: i32, n: i64) -> Result<()> {
        let container = self.value_at(index);
        let r = container
            .gc_ref()
            .ok_or_else(|| VmError::runtime("not a container"))?;
        let v = object::container_get_index(&self.g.heap, r, n).map_err(VmError::from)?;
        self.push_value(v)
    }

    /// `container[n] = pop()`
    pub fn set_index(&mut self, index: i32, n: i64) -> Result<()> {
        let v = self.main.pop();
        let container = self.value_at(index);
        let r = container
            .gc_ref()
            .ok_or_else(|| VmError::runtime("not a container"))?;
        object::container_set_index(&mut self.g.heap, r, n, v).map_err(VmError::from)
    }

    /// Push `dict[pop()]`
    pub fn get_dict(&mut self, index: i32) -> Result<()> {
        let key = self.main.pop();
        let TValue::Dict(r) = self.value_at(index) else {
            return Err(VmError::runtime("not a dict"));
        };
        let v = object::dict_get(&self.g.heap, r, &key, self.g.strings.seed())
            .map_err(VmError::from)?;
        self.push_value(v)
    }

    /// `dict[key] = value`, popping value then key
    pub fn set_dict(&mut self, index: i32) -> Result<()> {
        let value = self.main.pop();
        let key = self.main.pop();
        let TValue::Dict(r) = self.value_at(index) else {
            return Err(VmError::runtime("not a dict"));
        };
        let seed = self.g.strings.seed();
        object::dict_set(&mut self.g.heap, r, key, value, seed).map_err(VmError::from)
    }

    // === Calls ===

    /// Call: function and `nargs` arguments on top of the stack.
    /// Unprotected: errors reach the panic handler and abort.
    pub fn call(&mut self, nargs: usize, nresults: i32) -> Result<()> {
        match self.protected_call_top(nargs, nresults) {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Some(handler) = self.g.panic_handler {
                    handler(&err.to_string());
                    std::process::abort();
                }
                Err(err)
            }
        }
    }

    /// Protected call; on error pushes the message and returns the status
    pub fn pcall(&mut self, nargs: usize, nresults: i32, _errfunc: i32) -> Status {
        let saved_top = self.main.top.saturating_sub(nargs + 1);
        match self.protected_call_top(nargs, nresults) {
            Ok(()) => Status::Ok,
            Err(err) => {
                // Unwind: drop everything above the call site, close
                // upvalues in the range, deliver the error value
                let status = err.status();
                while self.main.top > saved_top {
                    self.main.pop();
                }
                self.main.frames.clear();
                self.main.open_upvalues.clear();
                let msg = err.to_string();
                let _ = self.push_string(&msg);
                status
            }
        }
    }

    /// Call with a continuation invoked after completion
    pub fn callk(&mut self, nargs: usize, nresults: i32, ctx: i64, k: Continuation) -> Result<()> {
        self.call(nargs, nresults)?;
        k(self, Status::Ok, ctx)
    }

    /// Protected call with a continuation
    pub fn pcallk(&mut self, nargs: usize, nresults: i32, errfunc: i32, ctx: i64, k: Continuation) -> Status {
        let status = self.pcall(nargs, nresults, errfunc);
        match k(self, status, ctx) {
            Ok(()) => status,
            Err(err) => err.status(),
        }
    }

    /// Internal: run the call sitting at top-of-stack
    fn protected_call_top(&mut self, nargs: usize, nresults: i32) -> Result<()> {
        let func_idx = self
            .main
            .top
            .checked_sub(nargs + 1)
            .ok_or_else(|| VmError::runtime("call without function on stack"))?;
        let func = self.main.slot(func_idx);
        let args: Vec<TValue> = (0..nargs)
            .map(|j| self.main.slot(func_idx + 1 + j))
            .collect();
        // Drop the call window; the executor rebuilds it
        self.main.top = func_idx;
        self.main.clear_slots(func_idx, func_idx + nargs + 1);

        let outcome = {
            let State { g, main } = self;
            let main_thread = std::mem::take(main);
            let mut ex = Executor::new(g, main_thread);
            let outcome = ex.call(func, &args);
            *main = ex.into_main();
            outcome
        };
        let results = match outcome {
            Ok(results) => results,
            Err(err) => {
                // Leave the thread coherent whether or not the caller
                // protects: frames unwound, upvalues dropped, window gone
                self.main.frames.clear();
                self.main.open_upvalues.clear();
                self.main.tbc.clear();
                while self.main.top > func_idx {
                    self.main.pop();
                }
                return Err(err);
            }
        };

        let produced = results.len();
        let wanted = if nresults < 0 {
            produced
        } else {
            nresults as usize
        };
        for j in 0..wanted {
            let v = results.get(j).copied().unwrap_or(TValue::Nil);
            self.push_value(v)?;
        }
        Ok(())
    }

    // === Arithmetic ===

    /// Pop operands (one for unary ops), push the result
    pub fn arith(&mut self, op: ApiArith) -> Result<()> {
        let result = match op {
            ApiArith::Unm => {
                let a = self.main.pop();
                arith::unm(a)?
            }
            ApiArith::Bnot => {
                let a = self.main.pop();
                arith::bnot(a)?
            }
            _ => {
                let b = self.main.pop();
                let a = self.main.pop();
                match op {
                    ApiArith::Add => arith::arith(ArithOp::Add, a, b)?,
                    ApiArith::Sub => arith::arith(ArithOp::Sub, a, b)?,
                    ApiArith::Mul => arith::arith(ArithOp::Mul, a, b)?,
                    ApiArith::Div => arith::arith(ArithOp::Div, a, b)?,
                    ApiArith::IDiv => arith::arith(ArithOp::IDiv, a, b)?,
                    ApiArith::Mod => arith::arith(ArithOp::Mod, a, b)?,
                    ApiArith::Pow => arith::arith(ArithOp::Pow, a, b)?,
                    ApiArith::Band => arith::bitwise(BitOp::And, a, b)?,
                    ApiArith::Bor => arith::bitwise(BitOp::Or, a, b)?,
                    ApiArith::Bxor => arith::bitwise(BitOp::Xor, a, b)?,
                    ApiArith::Shl => arith::bitwise(BitOp::Shl, a, b)?,
                    ApiArith::Shr => arith::bitwise(BitOp::Shr, a, b)?,
                    ApiArith::Unm | ApiArith::Bnot => unreachable!(),
                }
            }
        };
        self.push_value(result)
    }

    // === GC Control ===

    pub fn gc(&mut self, what: GcWhat) -> Result<i64> {
        match what {
            GcWhat::Stop => {
                self.g.heap.stop();
                Ok(0)
            }
            GcWhat::Restart => {
                self.g.heap.restart();
                Ok(0)
            }
            GcWhat::Collect => {
                self.collect_garbage();
                Ok(0)
            }
            GcWhat::Count => Ok(self.g.heap.count_bytes() as i64),
            GcWhat::Step => {
                let mut roots = Vec::new();
                self.g.base_roots(&mut roots);
                crate::state::GlobalState::thread_roots(&self.main, &mut roots);
                let outcome = self.g.gc_step_with_roots(&roots);
                Ok(outcome.finished_cycle as i64)
            }
            GcWhat::SetPause(p) => {
                self.g
                    .heap
                    .set_pause_percent(p)
                    .map_err(|e| VmError::runtime(e.to_string()))?;
                Ok(0)
            }
            GcWhat::SetStepMul(m) => {
                self.g
                    .heap
                    .set_step_multiplier(m)
                    .map_err(|e| VmError::runtime(e.to_string()))?;
                Ok(0)
            }
            GcWhat::IsRunning => Ok(self.g.heap.is_running() as i64),
        }
    }

    // === Threads (coroutines) ===

    /// Pop a function, push a new suspended thread running it
    pub fn new_thread(&mut self) -> Result<()> {
        let func = self.main.pop();
        if !func.is_function() {
            return Err(VmError::runtime("thread body must be a function"));
        }
        let mut thread = Thread::new();
        let _ = thread.push(func);
        thread.top = 1;
        let r = object::alloc_object(&mut self.g.heap, Object::Thread(thread));
        self.push_value(TValue::Thread(r))
    }

    /// Resume a thread value with arguments; returns the status and the
    /// yielded/returned values
    pub fn resume(&mut self, thread: TValue, args: &[TValue]) -> Result<(Status, Vec<TValue>)> {
        let (suspended, results) = {
            let State { g, main } = self;
            let main_thread = std::mem::take(main);
            let mut ex = Executor::new(g, main_thread);
            let outcome = ex.api_resume(thread, args);
            *main = ex.into_main();
            outcome?
        };
        Ok(if suspended {
            (Status::Yield, results)
        } else {
            (Status::Ok, results)
        })
    }

    /// Thread status of a coroutine value
    pub fn status_of(&self, thread: TValue) -> Status {
        match thread {
            TValue::Thread(r) => match object::as_thread(&self.g.heap, r).map(|t| t.status) {
                Some(ThreadStatus::Suspended) => Status::Yield,
                Some(_) => Status::Ok,
                None => Status::ErrRun,
            },
            _ => Status::ErrRun,
        }
    }

    /// Yieldability from the API: never, outside a running coroutine
    pub fn is_yieldable(&self) -> bool {
        false
    }

    /// API-level yield is only legal inside a running coroutine, which the
    /// synchronous embedding surface never is
    pub fn yieldk(&mut self, _nresults: usize, _ctx: i64, _k: Continuation) -> Result<()> {
        Err(VmError::Coroutine("attempt to yield from outside a coroutine"))
    }

    // === Errors and Warnings ===

    /// Pop the top value and raise it as a runtime error
    pub fn error(&mut self) -> VmError {
        let v = self.main.pop();
        VmError::runtime(self.display(v))
    }

    /// Emit a warning through the installed handler
    pub fn warning(&mut self, msg: &str, to_continue: bool) {
        if let Some(handler) = self.g.warn_handler {
            handler(msg, to_continue);
        } else {
            log::warn!("{}", msg);
        }
    }

    // === Builtins ===

    /// Register the builtin function set into the registry dict
    pub fn open_builtins(&mut self) -> Result<()> {
        let TValue::Dict(registry) = self.g.registry else {
            return Err(VmError::runtime("registry is not a dict"));
        };
        for (name, f) in builtins::builtin_names() {
            let key = TValue::Str(self.g.intern(name));
            let seed = self.g.strings.seed();
            object::dict_set(&mut self.g.heap, registry, key, TValue::NativeFn(f), seed)
                .map_err(VmError::from)?;
        }
        Ok(())
    }

    /// Look up a registered global (builtins live here)
    pub fn global(&mut self, name: &str) -> Option<TValue> {
        let TValue::Dict(registry) = self.g.registry else {
            return None;
        };
        let key = TValue::Str(self.g.intern(name));
        let seed = self.g.strings.seed();
        let v = object::dict_get(&self.g.heap, registry, &key, seed).ok()?;
        (!v.is_nil()).then_some(v)
    }

    /// Number of container elements / string bytes at an index
    pub fn len_of(&self, index: i32) -> Option<usize> {
        let v = self.value_at(index);
        match v {
            TValue::Str(r) => object::as_str(&self.g.heap, r).map(|s| s.len()),
            TValue::Array(r) => object::as_array(&self.g.heap, r).map(|a| a.len()),
            TValue::Slice(r) => object::as_slice_obj(&self.g.heap, r).map(|s| s.len()),
            TValue::Dict(r) => object::as_dict(&self.g.heap, r).map(|d| d.len()),
            TValue::Vector(r) => object::as_vector(&self.g.heap, r).map(|x| x.len()),
            _ => None,
        }
    }
}
