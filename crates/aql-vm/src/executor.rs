//! Register-Machine Executor
//!
//! One dispatch loop drives every script frame of every active thread.
//! Frame context (bytecode handle, constants, base) is copied into locals
//! on (re)entry; all heap and stack access goes through short-lived
//! borrows so a GC safepoint can run between any two instructions.
//!
//! Calls either push a frame and re-enter the loop, or complete inline
//! (native functions, JIT entries). Returns run `poscall`: close upvalues
//! above the frame, move results to the caller's expected slots, pop the
//! frame. Coroutines are a thread switch inside the same loop: the target
//! thread's `Thread` is detached from the heap while it runs and restored
//! on yield, return, or error.

use crate::arith::{self, ArithOp, BitOp};
use crate::error::{Result, VmError};
use crate::state::GlobalState;
use agc::GcRef;
use aql_core::object::{self, Object};
use aql_core::{
    CallFlags, CallInfo, Closure, ContainerKind, DataType, Instruction, NativeFn, OpCode, ProtoId,
    TValue, Thread, ThreadStatus, Upvalue, VecOp,
};
use aql_util::Timer;
use std::rc::Rc;

/// Instructions between GC safepoint checks
const SAFEPOINT_INTERVAL: u32 = 64;

/// One thread participating in the current execution
pub(crate) struct ActiveThread {
    pub th: Thread,
    /// Heap slot this thread was detached from; None for the main thread
    pub coro: Option<GcRef>,
    /// Where resume results land in the parent thread: (slot, expected)
    pub parent_dst: Option<(usize, i32)>,
    /// Per-frame call timers for hotspot profiling
    pub timers: Vec<Timer>,
}

/// Frame context copied into locals for the dispatch loop
struct FrameCtx {
    base: usize,
    pc: usize,
    code: Rc<Vec<Instruction>>,
    consts: Rc<Vec<TValue>>,
    /// Running script closure
    closure: GcRef,
    proto_ref: GcRef,
    proto_id: ProtoId,
}

/// What a call did
enum Precall {
    /// A script frame was pushed; re-enter the dispatch loop
    Script,
    /// The call completed inline (native or JIT)
    Done,
}

/// What a return did
enum ReturnFlow {
    /// The caller's frame is now on top; re-enter
    Reenter,
    /// The original entry frame returned; leave the executor
    Exit,
}

pub struct Executor<'g> {
    g: &'g mut GlobalState,
    threads: Vec<ActiveThread>,
    ticks: u32,
    /// Thread-chain length and frame depth the executor must not unwind
    /// past
    entry_threads: usize,
    entry_depth: usize,
}

impl<'g> Executor<'g> {
    pub fn new(g: &'g mut GlobalState, main: Thread) -> Self {
        Self {
            g,
            threads: vec![ActiveThread {
                th: main,
                coro: None,
                parent_dst: None,
                timers: Vec::new(),
            }],
            ticks: 0,
            entry_threads: 1,
            entry_depth: 0,
        }
    }

    /// Recover the main thread when execution finishes
    pub fn into_main(mut self) -> Thread {
        // Restore any coroutine threads left active by an error unwind
        while self.threads.len() > 1 {
            let mut active = self.threads.pop().expect("thread chain");
            active.th.status = ThreadStatus::Dead;
            if let Some(coro) = active.coro {
                if let Some(slot) = self.g.heap.get_mut(coro) {
                    *slot = Object::Thread(active.th);
                }
            }
        }
        self.threads.pop().expect("main thread").th
    }

    fn parts(&mut self) -> (&mut GlobalState, &mut ActiveThread) {
        (
            &mut *self.g,
            self.threads.last_mut().expect("active thread"),
        )
    }

    fn th(&mut self) -> &mut Thread {
        &mut self.threads.last_mut().expect("active thread").th
    }

    // === Entry Point ===

    /// Call `func` with `args`, running to completion. Returns every
    /// result. On error the caller (State) restores stack state.
    pub fn call(&mut self, func: TValue, args: &[TValue]) -> Result<Vec<TValue>> {
        let th = self.th();
        let func_idx = th.top;
        if !th.push(func) {
            return Err(VmError::StackOverflow);
        }
        for &a in args {
            if !th.push(a) {
                return Err(VmError::StackOverflow);
            }
        }
        self.entry_threads = self.threads.len();
        self.entry_depth = self.th().frames.len();

        match self.precall(func_idx, args.len(), -1)? {
            Precall::Done => {}
            Precall::Script => self.run()?,
        }

        // Results sit at func_idx..top
        let th = self.th();
        let results: Vec<TValue> = th.stack[func_idx..th.top].to_vec();
        th.top = func_idx;
        th.clear_slots(func_idx, func_idx + results.len() + 1);
        Ok(results)
    }

    // === Dispatch Loop ===

    fn run(&mut self) -> Result<()> {
        'reentry: loop {
            // A frame-less current thread means an API-level resume got
            // its values back
            if self.th().frames.is_empty() {
                return Ok(());
            }
            let mut ctx = self.fetch_frame()?;
            loop {
                self.maybe_safepoint();
                let Some(&inst) = ctx.code.get(ctx.pc) else {
                    // Fell off the end: implicit return of no values
                    match self.do_return(ctx.base, 0)? {
                        ReturnFlow::Exit => return Ok(()),
                        ReturnFlow::Reenter => continue 'reentry,
                    }
                };
                ctx.pc += 1;
                let op = inst.opcode().map_err(|raw| {
                    self.runtime_error(&ctx, format!("invalid opcode {raw:#x}"))
                })?;
                let a = inst.a();

                match op {
                    // === Moves and loads ===
                    OpCode::Move => {
                        let v = self.reg(&ctx, inst.b());
                        self.set_reg(&ctx, a, v);
                    }
                    OpCode::LoadI => self.set_reg(&ctx, a, TValue::Int(inst.sbx() as i64)),
                    OpCode::LoadF => self.set_reg(&ctx, a, TValue::Float(inst.sbx() as f64)),
                    OpCode::LoadK => {
                        let v = self.constant(&ctx, inst.bx() as usize)?;
                        self.set_reg(&ctx, a, v);
                    }
                    OpCode::LoadKx => {
                        // Constant index in the following EXTRAARG
                        let extra = ctx.code.get(ctx.pc).copied().ok_or_else(|| {
                            self.runtime_error(&ctx, "LOADKX without EXTRAARG".to_string())
                        })?;
                        ctx.pc += 1;
                        let v = self.constant(&ctx, extra.ax() as usize)?;
                        self.set_reg(&ctx, a, v);
                    }
                    OpCode::LoadFalse => self.set_reg(&ctx, a, TValue::Bool(false)),
                    OpCode::LoadTrue => self.set_reg(&ctx, a, TValue::Bool(true)),
                    OpCode::LoadNil => {
                        for reg in a..=a + inst.b() {
                            self.set_reg(&ctx, reg, TValue::Nil);
                        }
                    }
                    OpCode::ExtraArg => {
                        // Payload of the preceding instruction
                    }

                    // === Upvalues ===
                    OpCode::GetUpval => {
                        let v = self.upvalue_get(&ctx, inst.b() as usize)?;
                        self.set_reg(&ctx, a, v);
                    }
                    OpCode::SetUpval => {
                        let v = self.reg(&ctx, a);
                        self.upvalue_set(&ctx, inst.b() as usize, v)?;
                    }
                    OpCode::GetTabUp => {
                        let container = self.upvalue_get(&ctx, inst.b() as usize)?;
                        let key = self.constant(&ctx, inst.c() as usize)?;
                        let v = self.index_get(&ctx, container, key)?;
                        self.set_reg(&ctx, a, v);
                    }
                    OpCode::SetTabUp => {
                        let container = self.upvalue_get(&ctx, a as usize)?;
                        let key = self.constant(&ctx, inst.b() as usize)?;
                        let v = self.rk(&ctx, inst.c(), inst.k())?;
                        self.index_set(&ctx, container, key, v)?;
                    }

                    // === Arithmetic ===
                    OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::IDiv
                    | OpCode::Mod | OpCode::Pow => {
                        let lhs = self.reg(&ctx, inst.b());
                        let rhs = self.rk(&ctx, inst.c(), inst.k())?;
                        let r = if matches!(lhs, TValue::Vector(_)) {
                            // Element-wise vector arithmetic
                            self.vector_arith(&ctx, op, lhs, rhs)?
                        } else {
                            arith::arith(arith_op_of(op), lhs, rhs)
                                .map_err(|e| self.locate(&ctx, e))?
                        };
                        self.set_reg(&ctx, a, r);
                    }
                    OpCode::AddK | OpCode::SubK | OpCode::MulK | OpCode::DivK => {
                        let lhs = self.reg(&ctx, inst.b());
                        let rhs = self.constant(&ctx, inst.c() as usize)?;
                        let r = arith::arith(arith_op_of(op), lhs, rhs)
                            .map_err(|e| self.locate(&ctx, e))?;
                        self.set_reg(&ctx, a, r);
                    }
                    OpCode::AddI | OpCode::SubI | OpCode::MulI | OpCode::DivI => {
                        let lhs = self.reg(&ctx, inst.b());
                        let rhs = TValue::Int(inst.sc() as i64);
                        let r = arith::arith(arith_op_of(op), lhs, rhs)
                            .map_err(|e| self.locate(&ctx, e))?;
                        self.set_reg(&ctx, a, r);
                    }
                    OpCode::Unm => {
                        let v = self.reg(&ctx, inst.b());
                        let r = arith::unm(v).map_err(|e| self.locate(&ctx, e))?;
                        self.set_reg(&ctx, a, r);
                    }
                    OpCode::Len => {
                        let v = self.reg(&ctx, inst.b());
                        let n = self.value_len(v).ok_or_else(|| {
                            self.runtime_error(
                                &ctx,
                                format!("attempt to get length of a {} value", v.type_name()),
                            )
                        })?;
                        self.set_reg(&ctx, a, TValue::Int(n));
                    }

                    // === Bitwise ===
                    OpCode::Band | OpCode::Bor | OpCode::Bxor | OpCode::Shl | OpCode::Shr => {
                        let lhs = self.reg(&ctx, inst.b());
                        let rhs = self.rk(&ctx, inst.c(), inst.k())?;
                        let r = arith::bitwise(bit_op_of(op), lhs, rhs)
                            .map_err(|e| self.locate(&ctx, e))?;
                        self.set_reg(&ctx, a, r);
                    }
                    OpCode::Shri => {
                        let lhs = self.reg(&ctx, inst.b());
                        let r = arith::bitwise(BitOp::Shr, lhs, TValue::Int(inst.sc() as i64))
                            .map_err(|e| self.locate(&ctx, e))?;
                        self.set_reg(&ctx, a, r);
                    }
                    OpCode::Bnot => {
                        let v = self.reg(&ctx, inst.b());
                        let r = arith::bnot(v).map_err(|e| self.locate(&ctx, e))?;
                        self.set_reg(&ctx, a, r);
                    }

                    // === Logic ===
                    OpCode::Not => {
                        let v = self.reg(&ctx, inst.b());
                        self.set_reg(&ctx, a, TValue::Bool(!v.is_truthy()));
                    }
                    OpCode::Test => {
                        let v = self.reg(&ctx, a);
                        if v.is_truthy() != (inst.c() != 0) {
                            ctx.pc += 1;
                        }
                    }
                    OpCode::TestSet => {
                        let v = self.reg(&ctx, inst.b());
                        if v.is_truthy() == (inst.c() != 0) {
                            self.set_reg(&ctx, a, v);
                        } else {
                            ctx.pc += 1;
                        }
                    }

                    // === Compare: skip the following jump unless cond == A ===
                    OpCode::Eq => {
                        let lhs = self.reg(&ctx, inst.b());
                        let rhs = self.rk(&ctx, inst.c(), inst.k())?;
                        let cond = self.values_equal(&lhs, &rhs);
                        if cond != (a != 0) {
                            ctx.pc += 1;
                        }
                    }
                    OpCode::Lt | OpCode::Le => {
                        let lhs = self.reg(&ctx, inst.b());
                        let rhs = self.rk(&ctx, inst.c(), inst.k())?;
                        let cond = self.order_compare(&ctx, op, &lhs, &rhs)?;
                        if cond != (a != 0) {
                            ctx.pc += 1;
                        }
                    }
                    OpCode::EqI => {
                        let lhs = self.reg(&ctx, inst.b());
                        let cond = arith::num_eq(&lhs, &TValue::Int(inst.sc() as i64))
                            .unwrap_or(false);
                        if cond != (a != 0) {
                            ctx.pc += 1;
                        }
                    }
                    OpCode::LtI => {
                        let lhs = self.reg(&ctx, inst.b());
                        let cond = arith::num_lt(&lhs, &TValue::Int(inst.sc() as i64))
                            .ok_or_else(|| {
                                self.runtime_error(
                                    &ctx,
                                    format!("attempt to compare {} with number", lhs.type_name()),
                                )
                            })?;
                        if cond != (a != 0) {
                            ctx.pc += 1;
                        }
                    }

                    // === Flow ===
                    OpCode::Jmp => {
                        ctx.pc = offset_pc(ctx.pc, inst.sbx());
                    }
                    OpCode::ForPrep => {
                        self.for_prep(&ctx, a)?;
                        ctx.pc = offset_pc(ctx.pc, inst.sbx());
                    }
                    OpCode::ForLoop => {
                        if self.for_loop(&ctx, a)? {
                            self.g.jit.profile_loops(ctx.proto_id, 1);
                            ctx.pc = offset_pc(ctx.pc, inst.sbx());
                        }
                    }

                    // === Containers ===
                    OpCode::NewObject => {
                        let kind = ContainerKind::try_from(inst.b() as u8).map_err(|_| {
                            self.runtime_error(&ctx, format!("bad container kind {}", inst.b()))
                        })?;
                        let dtype = if kind == ContainerKind::Vector {
                            DataType::F64
                        } else {
                            DataType::Any
                        };
                        let r = object::new_container(&mut self.g.heap, kind, dtype, inst.c() as usize)
                            .map_err(|e| self.locate(&ctx, e.into()))?;
                        self.set_reg(&ctx, a, object::container_value(kind, r));
                    }
                    OpCode::GetProp => {
                        let container = self.reg(&ctx, inst.b());
                        let key = self.rk(&ctx, inst.c(), inst.k())?;
                        let v = self.index_get(&ctx, container, key)?;
                        self.set_reg(&ctx, a, v);
                    }
                    OpCode::SetProp => {
                        let container = self.reg(&ctx, a);
                        let key = self.reg(&ctx, inst.b());
                        let v = self.rk(&ctx, inst.c(), inst.k())?;
                        self.index_set(&ctx, container, key, v)?;
                    }
                    OpCode::Concat => {
                        let v = self.concat(&ctx, inst.b(), inst.c())?;
                        self.set_reg(&ctx, a, v);
                    }

                    // === Closures and upvalue lifetime ===
                    OpCode::Closure => {
                        let v = self.make_closure(&ctx, inst.bx() as usize)?;
                        self.set_reg(&ctx, a, v);
                    }
                    OpCode::Close => {
                        let level = ctx.base + a as usize;
                        self.close_upvalues(level);
                    }
                    OpCode::Tbc => {
                        let level = ctx.base + a as usize;
                        self.th().tbc.push(level);
                    }

                    // === Varargs ===
                    OpCode::Vararg => {
                        self.vararg(&ctx, a, inst.c())?;
                    }

                    // === Builtins ===
                    OpCode::Builtin => {
                        let id = inst.b();
                        let arg = self.reg(&ctx, inst.c());
                        let v = self.call_builtin(&ctx, id, arg)?;
                        self.set_reg(&ctx, a, v);
                    }

                    // === Calls ===
                    OpCode::Call | OpCode::Invoke => {
                        let func_idx = ctx.base + a as usize;
                        let nargs = if inst.b() == 0 {
                            self.th().top - func_idx - 1
                        } else {
                            inst.b() as usize - 1
                        };
                        let expected = inst.c() as i32 - 1;
                        self.save_pc(ctx.pc);
                        match self.precall(func_idx, nargs, expected)? {
                            Precall::Script => continue 'reentry,
                            Precall::Done => {
                                // Native left results in place. With a fixed
                                // result count the register window comes
                                // back; multret leaves top at the results
                                // end for the consuming instruction.
                                if expected >= 0 {
                                    self.restore_frame_top();
                                }
                            }
                        }
                    }
                    OpCode::TailCall => {
                        let func_idx = ctx.base + a as usize;
                        let nargs = if inst.b() == 0 {
                            self.th().top - func_idx - 1
                        } else {
                            inst.b() as usize - 1
                        };
                        match self.tailcall(&ctx, func_idx, nargs)? {
                            (Precall::Script, _) => continue 'reentry,
                            (Precall::Done, multret) => {
                                // Native tail call finished the frame
                                match self.after_frame_popped(multret)? {
                                    ReturnFlow::Exit => return Ok(()),
                                    ReturnFlow::Reenter => continue 'reentry,
                                }
                            }
                        }
                    }

                    // === Returns ===
                    OpCode::Ret => {
                        let first = ctx.base + a as usize;
                        let n = if inst.b() == 0 {
                            self.th().top - first
                        } else {
                            inst.b() as usize - 1
                        };
                        match self.do_return(first, n)? {
                            ReturnFlow::Exit => return Ok(()),
                            ReturnFlow::Reenter => continue 'reentry,
                        }
                    }
                    OpCode::RetVoid => match self.do_return(ctx.base, 0)? {
                        ReturnFlow::Exit => return Ok(()),
                        ReturnFlow::Reenter => continue 'reentry,
                    },
                    OpCode::RetOne => {
                        let first = ctx.base + a as usize;
                        match self.do_return(first, 1)? {
                            ReturnFlow::Exit => return Ok(()),
                            ReturnFlow::Reenter => continue 'reentry,
                        }
                    }

                    // === Coroutines ===
                    OpCode::Resume => {
                        let nargs = if inst.b() == 0 {
                            self.th().top - (ctx.base + a as usize) - 1
                        } else {
                            inst.b() as usize - 1
                        };
                        let expected = inst.c() as i32 - 1;
                        self.save_pc(ctx.pc);
                        self.resume(ctx.base + a as usize, nargs, expected)?;
                        continue 'reentry;
                    }
                    OpCode::Yield => {
                        let first = ctx.base + a as usize;
                        let n = if inst.b() == 0 {
                            self.th().top - first
                        } else {
                            inst.b() as usize - 1
                        };
                        self.save_pc(ctx.pc);
                        self.yield_values(first, n)?;
                        continue 'reentry;
                    }
                }
            }
        }
    }

    // === Frame Context ===

    fn fetch_frame(&mut self) -> Result<FrameCtx> {
        let (g, at) = self.parts();
        let ci = at.th.current_frame().expect("no frame to run").clone();
        let closure_val = at.th.slot(ci.func);
        let TValue::Closure(closure) = closure_val else {
            return Err(VmError::runtime("frame function is not a closure"));
        };
        let c = object::as_closure(&g.heap, closure)
            .ok_or_else(|| VmError::runtime("dead closure in frame"))?;
        let proto_ref = c.proto;
        let p = object::as_proto(&g.heap, proto_ref)
            .ok_or_else(|| VmError::runtime("dead prototype in frame"))?;
        Ok(FrameCtx {
            base: ci.base,
            pc: ci.saved_pc,
            code: p.code.clone(),
            consts: p.constants.clone(),
            closure,
            proto_ref,
            proto_id: p.id,
        })
    }

    fn save_pc(&mut self, pc: usize) {
        if let Some(frame) = self.th().current_frame_mut() {
            frame.saved_pc = pc;
        }
    }

    // === Register Access ===

    #[inline]
    fn reg(&mut self, ctx: &FrameCtx, i: u32) -> TValue {
        self.th().slot(ctx.base + i as usize)
    }

    #[inline]
    fn set_reg(&mut self, ctx: &FrameCtx, i: u32, v: TValue) {
        self.th().set_slot(ctx.base + i as usize, v);
    }

    fn constant(&self, ctx: &FrameCtx, i: usize) -> Result<TValue> {
        ctx.consts
            .get(i)
            .copied()
            .ok_or_else(|| VmError::runtime(format!("constant index {i} out of range")))
    }

    /// Register-or-constant operand
    fn rk(&mut self, ctx: &FrameCtx, c: u32, k: bool) -> Result<TValue> {
        if k {
            self.constant(ctx, c as usize)
        } else {
            Ok(self.reg(ctx, c))
        }
    }

    // === Errors ===

    fn runtime_error(&self, ctx: &FrameCtx, message: String) -> VmError {
        let pc = ctx.pc.saturating_sub(1);
        let line = object::as_proto(&self.g.heap, ctx.proto_ref).and_then(|p| p.line_at(pc));
        VmError::runtime_at(message, pc, line)
    }

    fn locate(&self, ctx: &FrameCtx, err: VmError) -> VmError {
        match err {
            VmError::Runtime {
                message,
                pc: None,
                line: None,
            } => self.runtime_error(ctx, message),
            other => other,
        }
    }

    // === GC Safepoint ===

    fn maybe_safepoint(&mut self) {
        self.ticks += 1;
        if self.ticks < SAFEPOINT_INTERVAL {
            return;
        }
        self.ticks = 0;
        if !self.g.heap.should_step() {
            return;
        }
        let mut roots = Vec::new();
        self.g.base_roots(&mut roots);
        for active in &self.threads {
            GlobalState::thread_roots(&active.th, &mut roots);
            if let Some(c) = active.coro {
                roots.push(c);
            }
        }
        self.g.gc_step_with_roots(&roots);
    }

    // === Equality, Ordering, Length ===

    fn values_equal(&self, a: &TValue, b: &TValue) -> bool {
        if let Some(eq) = arith::num_eq(a, b) {
            return eq;
        }
        match (a, b) {
            (TValue::Str(_), TValue::Str(_)) => {
                object::deep_equal(&self.g.heap, self.g.strings.seed(), a, b)
            }
            _ => a.raw_equal(b),
        }
    }

    fn order_compare(&self, ctx: &FrameCtx, op: OpCode, a: &TValue, b: &TValue) -> Result<bool> {
        let le = op == OpCode::Le;
        if let Some(r) = if le {
            arith::num_le(a, b)
        } else {
            arith::num_lt(a, b)
        } {
            return Ok(r);
        }
        // Byte-wise string collation
        if let (Some(x), Some(y)) = (
            object::str_bytes(&self.g.heap, a),
            object::str_bytes(&self.g.heap, b),
        ) {
            return Ok(if le { x <= y } else { x < y });
        }
        Err(self.runtime_error(
            ctx,
            format!(
                "attempt to compare {} with {}",
                a.type_name(),
                b.type_name()
            ),
        ))
    }

    fn value_len(&self, v: TValue) -> Option<i64> {
        use aql_core::containers::Container;
        match v {
            TValue::Str(r) => object::as_str(&self.g.heap, r).map(|s| s.len() as i64),
            TValue::Array(r) => object::as_array(&self.g.heap, r).map(|a| a.len() as i64),
            TValue::Slice(r) => object::as_slice_obj(&self.g.heap, r).map(|s| s.len() as i64),
            TValue::Dict(r) => object::as_dict(&self.g.heap, r).map(|d| d.len() as i64),
            TValue::Vector(r) => object::as_vector(&self.g.heap, r).map(|x| x.len() as i64),
            TValue::Range(r) => object::as_range(&self.g.heap, r).map(|x| x.len() as i64),
            _ => None,
        }
    }

    // === Indexing ===

    fn index_get(&mut self, ctx: &FrameCtx, container: TValue, key: TValue) -> Result<TValue> {
        let heap = &self.g.heap;
        match container {
            TValue::Dict(r) => {
                object::dict_get(heap, r, &key, self.g.strings.seed()).map_err(|e| self.locate(ctx, e.into()))
            }
            TValue::Array(_) | TValue::Slice(_) | TValue::Vector(_) | TValue::Range(_) => {
                let index = key.coerce_int().ok_or_else(|| {
                    self.runtime_error(
                        ctx,
                        format!("container index must be an integer, got {}", key.type_name()),
                    )
                })?;
                object::container_get_index(heap, container.gc_ref().expect("container"), index)
                    .map_err(|e| self.locate(ctx, e.into()))
            }
            other => Err(self.runtime_error(
                ctx,
                format!("attempt to index a {} value", other.type_name()),
            )),
        }
    }

    fn index_set(
        &mut self,
        ctx: &FrameCtx,
        container: TValue,
        key: TValue,
        value: TValue,
    ) -> Result<()> {
        match container {
            TValue::Dict(r) => {
                let seed = self.g.strings.seed();
                object::dict_set(&mut self.g.heap, r, key, value, seed)
                    .map_err(|e| self.locate(ctx, e.into()))
            }
            TValue::Array(_) | TValue::Slice(_) | TValue::Vector(_) => {
                let index = key.coerce_int().ok_or_else(|| {
                    self.runtime_error(
                        ctx,
                        format!("container index must be an integer, got {}", key.type_name()),
                    )
                })?;
                object::container_set_index(
                    &mut self.g.heap,
                    container.gc_ref().expect("container"),
                    index,
                    value,
                )
                .map_err(|e| self.locate(ctx, e.into()))
            }
            other => Err(self.runtime_error(
                ctx,
                format!("attempt to index a {} value", other.type_name()),
            )),
        }
    }

    // === Vector Arithmetic ===

    /// Element-wise arithmetic with a vector on the left: vector-vector
    /// when shapes and dtypes match, vector-scalar for numeric right sides
    fn vector_arith(
        &mut self,
        ctx: &FrameCtx,
        op: OpCode,
        lhs: TValue,
        rhs: TValue,
    ) -> Result<TValue> {
        let vop = match op {
            OpCode::Add => VecOp::Add,
            OpCode::Sub => VecOp::Sub,
            OpCode::Mul => VecOp::Mul,
            OpCode::Div => VecOp::Div,
            _ => {
                return Err(self.runtime_error(
                    ctx,
                    format!("operation not defined for vectors ({op:?})"),
                ))
            }
        };
        let TValue::Vector(lr) = lhs else {
            unreachable!("dispatched on a vector");
        };
        let out = match rhs {
            TValue::Vector(rr) => {
                let va = object::as_vector(&self.g.heap, lr)
                    .ok_or_else(|| VmError::runtime("dead vector"))?;
                let vb = object::as_vector(&self.g.heap, rr)
                    .ok_or_else(|| VmError::runtime("dead vector"))?;
                va.binary_op(vb, vop).map_err(|e| self.locate(ctx, e.into()))?
            }
            scalar if scalar.is_number() => {
                let va = object::as_vector(&self.g.heap, lr)
                    .ok_or_else(|| VmError::runtime("dead vector"))?;
                va.scalar_op(scalar, vop).map_err(|e| self.locate(ctx, e.into()))?
            }
            other => {
                return Err(self.runtime_error(
                    ctx,
                    format!(
                        "attempt to perform vector arithmetic with a {} value",
                        other.type_name()
                    ),
                ))
            }
        };
        Ok(TValue::Vector(object::alloc_object(
            &mut self.g.heap,
            Object::Vector(out),
        )))
    }

    // === Concatenation ===

    /// CONCAT: registers b..=c, two-phase (measure, then copy once)
    fn concat(&mut self, ctx: &FrameCtx, b: u32, c: u32) -> Result<TValue> {
        enum Part {
            Str(GcRef),
            Rendered(String),
        }
        let mut parts = Vec::with_capacity((c.saturating_sub(b) + 1) as usize);
        let mut total: usize = 0;
        for i in b..=c {
            let v = self.reg(ctx, i);
            let part = match v {
                TValue::Str(r) => Part::Str(r),
                TValue::Int(_) | TValue::Float(_) => {
                    Part::Rendered(object::display_value(&self.g.heap, &v))
                }
                other => {
                    return Err(self.runtime_error(
                        ctx,
                        format!("attempt to concatenate a {} value", other.type_name()),
                    ))
                }
            };
            let len = match &part {
                Part::Str(r) => object::as_str(&self.g.heap, *r)
                    .ok_or_else(|| VmError::runtime("dead string in concat"))?
                    .len(),
                Part::Rendered(s) => s.len(),
            };
            total = total
                .checked_add(len)
                .ok_or_else(|| VmError::runtime("concatenation length overflow"))?;
            parts.push(part);
        }

        // Single allocation, sequential copy
        let mut bytes = Vec::with_capacity(total);
        for part in &parts {
            match part {
                Part::Str(r) => {
                    bytes.extend_from_slice(
                        object::as_str(&self.g.heap, *r).expect("checked above").as_bytes(),
                    );
                }
                Part::Rendered(s) => bytes.extend_from_slice(s.as_bytes()),
            }
        }
        self.g.perf.bump("concat_alloc");
        let r = self.g.intern_bytes(&bytes);
        Ok(TValue::Str(r))
    }

    // === Upvalues ===

    fn closure_upvalue(&self, ctx: &FrameCtx, index: usize) -> Result<GcRef> {
        let c = object::as_closure(&self.g.heap, ctx.closure)
            .ok_or_else(|| VmError::runtime("dead closure"))?;
        c.upvalues
            .get(index)
            .copied()
            .ok_or_else(|| VmError::runtime(format!("upvalue index {index} out of range")))
    }

    fn upvalue_get(&mut self, ctx: &FrameCtx, index: usize) -> Result<TValue> {
        let uv_ref = self.closure_upvalue(ctx, index)?;
        let (g, at) = self.parts();
        let uv = object::as_upvalue(&g.heap, uv_ref)
            .ok_or_else(|| VmError::runtime("dead upvalue"))?;
        Ok(match uv {
            Upvalue::Open { slot } => at.th.slot(*slot),
            Upvalue::Closed(v) => *v,
        })
    }

    fn upvalue_set(&mut self, ctx: &FrameCtx, index: usize, value: TValue) -> Result<()> {
        let uv_ref = self.closure_upvalue(ctx, index)?;
        let (g, at) = self.parts();
        let uv = object::as_upvalue_mut(&mut g.heap, uv_ref)
            .ok_or_else(|| VmError::runtime("dead upvalue"))?;
        match uv {
            Upvalue::Open { slot } => {
                let slot = *slot;
                at.th.set_slot(slot, value);
            }
            Upvalue::Closed(v) => {
                *v = value;
                if let Some(child) = value.gc_ref() {
                    g.heap.barrier_forward(uv_ref, child);
                }
            }
        }
        Ok(())
    }

    /// Find the open upvalue for a stack slot or create one, keeping the
    /// per-thread list sorted by slot descending
    fn find_or_create_upvalue(&mut self, slot: usize) -> GcRef {
        let (g, at) = self.parts();
        for &uv_ref in &at.th.open_upvalues {
            if let Some(Upvalue::Open { slot: s }) = object::as_upvalue(&g.heap, uv_ref) {
                if *s == slot {
                    return uv_ref;
                }
                if *s < slot {
                    break; // sorted descending: no match below
                }
            }
        }
        let uv_ref = object::alloc_object(&mut g.heap, Object::Upvalue(Upvalue::Open { slot }));
        let pos = at
            .th
            .open_upvalues
            .iter()
            .position(|&r| {
                matches!(object::as_upvalue(&g.heap, r), Some(Upvalue::Open { slot: s }) if *s < slot)
            })
            .unwrap_or(at.th.open_upvalues.len());
        at.th.open_upvalues.insert(pos, uv_ref);
        uv_ref
    }

    /// Close every open upvalue (and to-be-closed slot) at or above `level`
    fn close_upvalues(&mut self, level: usize) {
        let (g, at) = self.parts();
        while let Some(&uv_ref) = at.th.open_upvalues.first() {
            let slot = match object::as_upvalue(&g.heap, uv_ref) {
                Some(Upvalue::Open { slot }) => *slot,
                _ => {
                    at.th.open_upvalues.remove(0);
                    continue;
                }
            };
            if slot < level {
                break; // sorted descending: rest are below the level
            }
            let value = at.th.slot(slot);
            if let Some(uv) = object::as_upvalue_mut(&mut g.heap, uv_ref) {
                *uv = Upvalue::Closed(value);
            }
            if let Some(child) = value.gc_ref() {
                g.heap.barrier_forward(uv_ref, child);
            }
            at.th.open_upvalues.remove(0);
        }
        // Release to-be-closed marks in the unwound range
        at.th.tbc.retain(|&s| s < level);
    }

    fn make_closure(&mut self, ctx: &FrameCtx, proto_index: usize) -> Result<TValue> {
        let nested_ref = {
            let p = object::as_proto(&self.g.heap, ctx.proto_ref)
                .ok_or_else(|| VmError::runtime("dead prototype"))?;
            p.protos.get(proto_index).copied().ok_or_else(|| {
                VmError::runtime(format!("nested prototype {proto_index} out of range"))
            })?
        };
        let descriptors = {
            let p = object::as_proto(&self.g.heap, nested_ref)
                .ok_or_else(|| VmError::runtime("dead nested prototype"))?;
            p.upvalues.clone()
        };
        let mut upvalues = Vec::with_capacity(descriptors.len());
        for desc in &descriptors {
            let uv = if desc.in_stack {
                self.find_or_create_upvalue(ctx.base + desc.index as usize)
            } else {
                self.closure_upvalue(ctx, desc.index as usize)?
            };
            upvalues.push(uv);
        }
        let closure = Closure {
            proto: nested_ref,
            upvalues,
        };
        Ok(TValue::Closure(object::alloc_object(
            &mut self.g.heap,
            Object::Closure(closure),
        )))
    }

    // === Numeric for ===

    fn for_prep(&mut self, ctx: &FrameCtx, a: u32) -> Result<()> {
        let init = self.reg(ctx, a);
        let limit = self.reg(ctx, a + 1);
        let step = self.reg(ctx, a + 2);
        if !init.is_number() || !limit.is_number() || !step.is_number() {
            return Err(self.runtime_error(ctx, "'for' control values must be numbers".to_string()));
        }
        if step.as_int() == Some(0) || step.as_float() == Some(0.0) {
            return Err(self.runtime_error(ctx, "'for' step is zero".to_string()));
        }
        // Pre-decrement so the first FORLOOP increment lands on init
        let prepped = arith::arith(ArithOp::Sub, init, step).map_err(|e| self.locate(ctx, e))?;
        self.set_reg(ctx, a, prepped);
        Ok(())
    }

    /// One loop iteration; true when the loop continues
    fn for_loop(&mut self, ctx: &FrameCtx, a: u32) -> Result<bool> {
        let counter = self.reg(ctx, a);
        let limit = self.reg(ctx, a + 1);
        let step = self.reg(ctx, a + 2);

        // Integer counters terminate on overflow instead of wrapping
        let next = match (counter, step) {
            (TValue::Int(x), TValue::Int(s)) => match x.checked_add(s) {
                Some(n) => TValue::Int(n),
                None => return Ok(false),
            },
            _ => arith::arith(ArithOp::Add, counter, step).map_err(|e| self.locate(ctx, e))?,
        };
        let ascending = match step {
            TValue::Int(s) => s > 0,
            TValue::Float(s) => s > 0.0,
            _ => unreachable!("validated by for_prep"),
        };
        let continues = if ascending {
            arith::num_le(&next, &limit).unwrap_or(false)
        } else {
            arith::num_le(&limit, &next).unwrap_or(false)
        };
        if continues {
            self.set_reg(ctx, a, next);
            self.set_reg(ctx, a + 3, next);
        }
        Ok(continues)
    }

    // === Varargs ===

    fn vararg(&mut self, ctx: &FrameCtx, a: u32, c: u32) -> Result<()> {
        let (nvarargs, func) = {
            let frame = self.th().current_frame().expect("frame").clone();
            (frame.num_varargs as usize, frame.func)
        };
        let wanted = if c == 0 { nvarargs } else { c as usize - 1 };
        let th = self.th();
        let needed = (ctx.base + a as usize + wanted).saturating_sub(th.top);
        if !th.ensure_stack(needed) {
            return Err(VmError::StackOverflow);
        }
        for j in 0..wanted {
            let v = if j < nvarargs {
                th.slot(func + 1 + j)
            } else {
                TValue::Nil
            };
            th.set_slot(ctx.base + a as usize + j, v);
        }
        Ok(())
    }

    // === Builtins (BUILTIN opcode) ===

    fn call_builtin(&mut self, ctx: &FrameCtx, id: u32, arg: TValue) -> Result<TValue> {
        let f: NativeFn = crate::builtins::builtin_by_id(id).ok_or_else(|| {
            self.runtime_error(ctx, format!("unknown builtin id {id}"))
        })?;
        // Builtins run through the same native protocol as API calls
        let th = self.th();
        let func_idx = th.top;
        if !th.push(TValue::NativeFn(f)) || !th.push(arg) {
            return Err(VmError::StackOverflow);
        }
        self.call_native(f, func_idx, 1, 1, None)?;
        let th = self.th();
        let result = th.slot(func_idx);
        th.top = func_idx;
        th.set_slot(func_idx, TValue::Nil);
        Ok(result)
    }

    // === Call Protocol ===

    /// Prepare a call to the value at `func_idx` with `nargs` arguments
    /// sitting above it. `expected` is the caller's result count (-1 all).
    fn precall(&mut self, func_idx: usize, nargs: usize, expected: i32) -> Result<Precall> {
        let callee = self.th().slot(func_idx);
        match callee {
            TValue::Closure(closure_ref) => {
                self.precall_script(closure_ref, func_idx, nargs, expected)
            }
            TValue::NativeClosure(nc_ref) => {
                let f = object::as_native_closure(&self.g.heap, nc_ref)
                    .ok_or_else(|| VmError::runtime("dead native closure"))?
                    .func;
                self.call_native(f, func_idx, nargs, expected, Some(nc_ref))?;
                Ok(Precall::Done)
            }
            TValue::NativeFn(f) => {
                self.call_native(f, func_idx, nargs, expected, None)?;
                Ok(Precall::Done)
            }
            TValue::Proto(proto_ref) => {
                // Bare prototype: wrap into an upvalue-less closure
                let closure = object::alloc_object(
                    &mut self.g.heap,
                    Object::Closure(Closure {
                        proto: proto_ref,
                        upvalues: Vec::new(),
                    }),
                );
                self.th().set_slot(func_idx, TValue::Closure(closure));
                self.precall_script(closure, func_idx, nargs, expected)
            }
            other => Err(VmError::runtime(format!(
                "attempt to call a {} value",
                other.type_name()
            ))),
        }
    }

    fn precall_script(
        &mut self,
        closure_ref: GcRef,
        func_idx: usize,
        nargs: usize,
        expected: i32,
    ) -> Result<Precall> {
        let (proto_ref, proto_id, num_params, is_vararg, max_stack, code_len) = {
            let c = object::as_closure(&self.g.heap, closure_ref)
                .ok_or_else(|| VmError::runtime("dead closure"))?;
            let p = object::as_proto(&self.g.heap, c.proto)
                .ok_or_else(|| VmError::runtime("dead prototype"))?;
            (
                c.proto,
                p.id,
                p.num_params as usize,
                p.is_vararg,
                p.max_stack_size as usize,
                p.code.len(),
            )
        };

        if self.th().depth() >= 200 {
            return Err(VmError::StackOverflow);
        }

        // Adaptive compilation: consult the gate, then the cache
        let stability = self.g.stability_of(proto_ref, proto_id);
        if self.g.jit.should_compile(proto_id, stability) {
            if let Some(code) = object::as_proto(&self.g.heap, proto_ref).map(|p| p.code.clone()) {
                // Failure engages the cooldown; interpretation continues
                let _ = self
                    .g
                    .jit
                    .compile_and_install(proto_id, &code, num_params);
            }
        }
        if self.g.jit.cache.contains(proto_id) {
            if let Some(done) = self.try_jit_call(proto_id, func_idx, nargs, expected)? {
                return Ok(done);
            }
        }

        // Vararg layout: extras park between func and the new base
        let extras = if is_vararg && nargs > num_params {
            nargs - num_params
        } else {
            0
        };
        let base = func_idx + 1 + extras;
        let th = self.th();
        let needed = (base + max_stack).saturating_sub(th.top);
        if !th.ensure_stack(needed) {
            return Err(VmError::StackOverflow);
        }
        if extras > 0 {
            // args: [a0 .. a(nparams-1) | extras...] -> rotate so extras
            // sit first and fixed params land at base
            let args: Vec<TValue> =
                th.stack[func_idx + 1..func_idx + 1 + nargs].to_vec();
            for (j, v) in args[num_params..].iter().enumerate() {
                th.set_slot(func_idx + 1 + j, *v);
            }
            for (j, v) in args[..num_params].iter().enumerate() {
                th.set_slot(base + j, *v);
            }
        }
        // Nil-fill missing parameters and scratch registers
        for j in nargs.min(num_params)..max_stack {
            if extras == 0 && j < nargs {
                continue;
            }
            th.set_slot(base + j, TValue::Nil);
        }
        th.top = base + max_stack;
        th.frames.push(CallInfo {
            func: func_idx,
            base,
            top: base + max_stack,
            saved_pc: 0,
            expected_results: expected,
            num_varargs: extras as u16,
            flags: CallFlags::empty(),
        });
        let at = self.threads.last_mut().expect("active thread");
        at.timers.push(Timer::new());
        log::trace!(
            "call proto {:?} ({} args, {} extras, depth {})",
            proto_id,
            nargs,
            extras,
            at.th.depth()
        );
        let _ = code_len;
        Ok(Precall::Script)
    }

    /// Dispatch through a cached JIT entry when the arguments fit its
    /// integer calling convention. `None` means "fall back to the
    /// interpreter".
    fn try_jit_call(
        &mut self,
        proto_id: ProtoId,
        func_idx: usize,
        nargs: usize,
        expected: i32,
    ) -> Result<Option<Precall>> {
        let th = self.th();
        let mut args = Vec::with_capacity(nargs);
        for j in 0..nargs {
            match th.slot(func_idx + 1 + j) {
                TValue::Int(i) => args.push(i),
                _ => return Ok(None),
            }
        }
        let Some(entry) = self.g.jit.entry_for(proto_id) else {
            return Ok(None);
        };
        let timer = Timer::new();
        // The compiled code was produced from this prototype's bytecode by
        // our own pipeline and follows the JitEntry convention
        let result = unsafe { entry(args.as_ptr(), args.len() as i64) };
        self.g.jit.record_execution(timer.elapsed());
        self.g.perf.record_jit_execution(timer.elapsed());

        let th = self.th();
        th.set_slot(func_idx, TValue::Int(result));
        let nresults = 1usize;
        let produced = adjust_results(th, func_idx, nresults, expected);
        th.top = func_idx + produced;
        Ok(Some(Precall::Done))
    }

    fn call_native(
        &mut self,
        f: NativeFn,
        func_idx: usize,
        nargs: usize,
        expected: i32,
        native_closure: Option<GcRef>,
    ) -> Result<()> {
        let upvalues = match native_closure {
            Some(r) => object::as_native_closure(&self.g.heap, r)
                .map(|nc| nc.upvalues.clone())
                .unwrap_or_default(),
            None => Vec::new(),
        };
        let (g, at) = self.parts();
        let mut ctx = crate::native::NativeCallCtx::new(g, &mut at.th, func_idx, nargs, upvalues);
        let nresults = f(&mut ctx).map_err(VmError::from)?;
        let results = ctx.take_results();
        if results.len() != nresults {
            log::warn!(
                "native function declared {} results but pushed {}",
                nresults,
                results.len()
            );
        }
        let th = self.th();
        let needed = (func_idx + results.len().max(1)).saturating_sub(th.top);
        if !th.ensure_stack(needed) {
            return Err(VmError::StackOverflow);
        }
        for (j, v) in results.iter().enumerate() {
            th.set_slot(func_idx + j, *v);
        }
        let produced = adjust_results(th, func_idx, results.len(), expected);
        th.top = func_idx + produced;
        Ok(())
    }

    /// Returns the call kind and whether the reused frame was multret
    fn tailcall(&mut self, ctx: &FrameCtx, func_idx: usize, nargs: usize) -> Result<(Precall, bool)> {
        // The dying frame's upvalues close before its registers are reused
        self.close_upvalues(ctx.base);
        let (frame_func, expected) = {
            let frame = self.th().frames.pop().expect("tailcall without frame");
            (frame.func, frame.expected_results)
        };
        let at = self.threads.last_mut().expect("active thread");
        at.timers.pop();

        // Move callee + args down over the dead frame
        let th = self.th();
        for j in 0..=nargs {
            let v = th.slot(func_idx + j);
            th.set_slot(frame_func + j, v);
        }
        th.top = frame_func + nargs + 1;
        match self.precall(frame_func, nargs, expected)? {
            Precall::Script => {
                if let Some(frame) = self.th().current_frame_mut() {
                    frame.flags.insert(CallFlags::TAIL);
                }
                Ok((Precall::Script, expected < 0))
            }
            Precall::Done => Ok((Precall::Done, expected < 0)),
        }
    }

    /// Return from the current frame with `n` results starting at `first`
    fn do_return(&mut self, first: usize, n: usize) -> Result<ReturnFlow> {
        let frame = self.th().frames.pop().expect("return without frame");
        self.close_upvalues(frame.base);

        // Hotspot bookkeeping
        let at = self.threads.last_mut().expect("active thread");
        if let Some(timer) = at.timers.pop() {
            let elapsed = timer.elapsed();
            let (bytecode_size, proto_id) = {
                let closure = at.th.slot(frame.func);
                match closure
                    .gc_ref()
                    .and_then(|c| object::as_closure(&self.g.heap, c))
                    .and_then(|c| object::as_proto(&self.g.heap, c.proto))
                {
                    Some(p) => (p.code.len(), Some(p.id)),
                    None => (0, None),
                }
            };
            if let Some(id) = proto_id {
                self.g.jit.profile_call(id, bytecode_size, elapsed);
                self.g.perf.record_request();
            }
        }

        let th = self.th();
        // Move results into the caller's expected window
        for j in 0..n {
            let v = th.slot(first + j);
            th.set_slot(frame.func + j, v);
        }
        let produced = adjust_results(th, frame.func, n, frame.expected_results);
        th.top = frame.func + produced;
        th.clear_slots(th.top, frame.top);

        self.after_frame_popped(frame.expected_results < 0)
    }

    /// Restore the current frame's register window top
    fn restore_frame_top(&mut self) {
        let Some(top) = self.th().current_frame().map(|f| f.top) else {
            return;
        };
        let th = self.th();
        if th.top < top {
            let _ = th.ensure_stack(top - th.top);
            th.top = top;
        }
    }

    /// Decide control flow after the current thread lost a frame.
    /// `multret`: the finished call had an open result count, so top marks
    /// the results end and must survive until the consumer reads it.
    fn after_frame_popped(&mut self, multret: bool) -> Result<ReturnFlow> {
        let is_coro = self.threads.last().expect("thread").coro.is_some();
        let frames_left = self.th().frames.len();
        if is_coro {
            if frames_left == 0 {
                // Coroutine finished: deliver results to the resumer
                self.finish_coroutine(ThreadStatus::Dead)?;
            }
            return Ok(ReturnFlow::Reenter);
        }
        if frames_left > self.entry_depth {
            if !multret {
                self.restore_frame_top();
            }
            Ok(ReturnFlow::Reenter)
        } else {
            Ok(ReturnFlow::Exit)
        }
    }

    // === Coroutines ===

    /// RESUME: switch execution into the thread object at `slot`
    fn resume(&mut self, slot: usize, nargs: usize, expected: i32) -> Result<()> {
        let target = self.th().slot(slot);
        let TValue::Thread(coro_ref) = target else {
            return Err(VmError::runtime(format!(
                "attempt to resume a {} value",
                target.type_name()
            )));
        };
        // Detach the thread object; a Detached placeholder keeps the slot
        let obj = self
            .g
            .heap
            .get_mut(coro_ref)
            .ok_or_else(|| VmError::runtime("dead thread"))?;
        let Object::Thread(_) = obj else {
            return Err(VmError::Coroutine("cannot resume a running coroutine"));
        };
        let Object::Thread(mut coro) = std::mem::replace(obj, Object::Detached) else {
            unreachable!("matched above");
        };
        if coro.status == ThreadStatus::Dead {
            // Reattach before raising
            *self.g.heap.get_mut(coro_ref).expect("slot") = Object::Thread(coro);
            return Err(VmError::Coroutine("cannot resume dead coroutine"));
        }

        // Arguments travel from the resumer into the coroutine
        let args: Vec<TValue> = {
            let th = self.th();
            (0..nargs).map(|j| th.slot(slot + 1 + j)).collect()
        };
        self.th().status = ThreadStatus::Normal;

        let first_resume = coro.frames.is_empty();
        coro.status = ThreadStatus::Running;
        self.threads.push(ActiveThread {
            th: coro,
            coro: Some(coro_ref),
            parent_dst: Some((slot, expected)),
            timers: Vec::new(),
        });

        if first_resume {
            // stack[0] holds the body closure (placed at creation)
            let th = self.th();
            let func_idx = 0;
            th.top = 1;
            for a in &args {
                if !th.push(*a) {
                    return Err(VmError::StackOverflow);
                }
            }
            match self.precall(func_idx, args.len(), -1)? {
                Precall::Script => Ok(()),
                Precall::Done => {
                    // Body was native and completed immediately
                    self.finish_coroutine(ThreadStatus::Dead)
                }
            }
        } else {
            // Resume after YIELD: resume arguments become its results
            let dst = self.th().pending_resume.take();
            let th = self.th();
            if let Some((yield_slot, yield_expected)) = dst {
                for (j, v) in args.iter().enumerate() {
                    th.set_slot(yield_slot + j, *v);
                }
                let produced = adjust_results(th, yield_slot, args.len(), yield_expected);
                let frame_top = th.current_frame().expect("frame").top;
                th.top = frame_top.max(yield_slot + produced);
            }
            Ok(())
        }
    }

    /// YIELD: suspend the current coroutine, delivering values upward
    fn yield_values(&mut self, first: usize, n: usize) -> Result<()> {
        if self.threads.len() <= self.entry_threads {
            return Err(VmError::Coroutine(
                "attempt to yield from outside a coroutine",
            ));
        }
        // Where resume arguments land when this thread wakes again
        self.th().pending_resume = Some((first, -1));
        let values: Vec<TValue> = {
            let th = self.th();
            (0..n).map(|j| th.slot(first + j)).collect()
        };
        self.suspend_current(ThreadStatus::Suspended, &values)
    }

    /// Coroutine finished (or yielded): reattach it and deliver values to
    /// the resumer
    fn finish_coroutine(&mut self, status: ThreadStatus) -> Result<()> {
        // Results of a finished coroutine sit at stack[0..top]
        let values: Vec<TValue> = {
            let th = self.th();
            th.stack[..th.top].to_vec()
        };
        self.suspend_current(status, &values)
    }

    fn suspend_current(&mut self, status: ThreadStatus, values: &[TValue]) -> Result<()> {
        let mut active = self.threads.pop().expect("coroutine");
        active.th.status = status;
        let coro_ref = active.coro.expect("suspend of main thread");
        let (dst_slot, expected) = active.parent_dst.expect("resume bookkeeping");
        *self
            .g
            .heap
            .get_mut(coro_ref)
            .expect("coroutine slot vanished") = Object::Thread(active.th);

        // Parent wakes up with the delivered values at the RESUME window
        let th = self.th();
        th.status = ThreadStatus::Running;
        for (j, v) in values.iter().enumerate() {
            th.set_slot(dst_slot + j, *v);
        }
        let produced = adjust_results(th, dst_slot, values.len(), expected);
        th.top = match th.current_frame() {
            Some(frame) => frame.top.max(dst_slot + produced),
            // API-level resume: only the delivered values remain
            None => dst_slot + produced,
        };
        Ok(())
    }

    // === API-level coroutine driving ===

    /// Resume a thread value from outside any frame (the embedding API)
    pub fn api_resume(
        &mut self,
        thread: TValue,
        args: &[TValue],
    ) -> Result<(bool, Vec<TValue>)> {
        let th = self.th();
        let slot = th.top;
        if !th.push(thread) {
            return Err(VmError::StackOverflow);
        }
        for &a in args {
            if !th.push(a) {
                return Err(VmError::StackOverflow);
            }
        }
        self.entry_threads = self.threads.len();
        self.entry_depth = self.th().frames.len();
        self.resume(slot, args.len(), -1)?;
        self.run()?;

        // Results replaced the thread value at `slot`
        let suspended = match thread {
            TValue::Thread(r) => matches!(
                object::as_thread(&self.g.heap, r).map(|t| t.status),
                Some(ThreadStatus::Suspended)
            ),
            _ => false,
        };
        let th = self.th();
        let results: Vec<TValue> = th.stack[slot..th.top].to_vec();
        th.top = slot;
        th.clear_slots(slot, slot + results.len() + 1);
        Ok((suspended, results))
    }
}

/// Pad with nils or truncate so `func..` holds what the caller expects.
/// Returns the number of values present.
fn adjust_results(th: &mut Thread, func: usize, produced: usize, expected: i32) -> usize {
    if expected < 0 {
        return produced;
    }
    let expected = expected as usize;
    if !th.ensure_stack((func + expected).saturating_sub(th.top)) {
        return produced.min(expected);
    }
    for j in produced..expected {
        th.set_slot(func + j, TValue::Nil);
    }
    expected
}

fn offset_pc(pc: usize, sbx: i32) -> usize {
    (pc as i64 + sbx as i64).max(0) as usize
}

fn arith_op_of(op: OpCode) -> ArithOp {
    match op {
        OpCode::Add | OpCode::AddK | OpCode::AddI => ArithOp::Add,
        OpCode::Sub | OpCode::SubK | OpCode::SubI => ArithOp::Sub,
        OpCode::Mul | OpCode::MulK | OpCode::MulI => ArithOp::Mul,
        OpCode::Div | OpCode::DivK | OpCode::DivI => ArithOp::Div,
        OpCode::IDiv => ArithOp::IDiv,
        OpCode::Mod => ArithOp::Mod,
        OpCode::Pow => ArithOp::Pow,
        _ => unreachable!("not an arithmetic opcode"),
    }
}

fn bit_op_of(op: OpCode) -> BitOp {
    match op {
        OpCode::Band => BitOp::And,
        OpCode::Bor => BitOp::Or,
        OpCode::Bxor => BitOp::Xor,
        OpCode::Shl => BitOp::Shl,
        OpCode::Shr => BitOp::Shr,
        _ => unreachable!("not a bitwise opcode"),
    }
}
