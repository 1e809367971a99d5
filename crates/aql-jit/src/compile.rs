//! Compilation Pipeline
//!
//! intervals -> linear scan -> optimization passes -> template emission ->
//! jump patching. The pipeline is conservative: any opcode outside the
//! templated subset fails the compile, and the interpreter remains the
//! source of truth. Failures are diagnostic, never fatal.
//!
//! The optimization passes rewrite instructions in place (a no-op is a
//! `MOVE r0, r0`, which emission elides) so that jump offsets survive
//! every pass untouched.

use crate::config::JitConfig;
use crate::emit::Emitter;
use crate::error::{JitError, Result};
use crate::intervals::build_intervals;
use crate::regalloc::{linear_scan, Allocation, Location};
use crate::target::Arch;
use crate::template::template_for;
use aql_core::{Instruction, OpCode};
use aql_util::Timer;

/// Result of one compilation
#[derive(Debug)]
pub struct CompiledCode {
    pub bytes: Vec<u8>,
    pub spill_slots: u32,
    /// Optimizations applied, by pass
    pub opt_report: OptReport,
    pub compile_time: std::time::Duration,
}

/// Per-pass optimization counts
#[derive(Debug, Default, Clone, Copy)]
pub struct OptReport {
    pub constants_folded: u32,
    pub dead_eliminated: u32,
    pub moves_coalesced: u32,
    pub peephole_applied: u32,
}

impl OptReport {
    pub fn total(&self) -> u32 {
        self.constants_folded + self.dead_eliminated + self.moves_coalesced + self.peephole_applied
    }
}

/// The canonical no-op rewrite target
fn nop() -> Instruction {
    Instruction::abc(OpCode::Move, 0, 0, 0, false)
}

fn is_nop(inst: Instruction) -> bool {
    inst.opcode() == Ok(OpCode::Move) && inst.a() == inst.b()
}

/// Compile one function's bytecode for `arch`
pub fn compile_bytecode(
    arch: Arch,
    code: &[Instruction],
    num_params: usize,
    config: &JitConfig,
) -> Result<CompiledCode> {
    let timer = Timer::new();
    if code.is_empty() {
        return Err(JitError::InvalidInput("empty bytecode"));
    }

    // Preflight: reject uncompilable opcodes before doing any work
    for inst in code {
        let op = inst
            .opcode()
            .map_err(|_| JitError::InvalidInput("invalid opcode byte"))?;
        if template_for(op).is_none() && !matches!(op, OpCode::AddI | OpCode::SubI) {
            return Err(JitError::CompileFailed(format!(
                "opcode {op:?} has no template"
            )));
        }
        if matches!(op, OpCode::Add | OpCode::Sub | OpCode::Mul) && inst.k() {
            return Err(JitError::CompileFailed(
                "K-operand arithmetic not templated".to_string(),
            ));
        }
    }

    let mut code = code.to_vec();
    let mut report = OptReport::default();
    if config.opt.constant_folding {
        report.constants_folded = fold_constants(&mut code);
    }
    if config.opt.dead_code_elimination {
        report.dead_eliminated = eliminate_dead(&mut code);
    }
    if config.opt.peephole {
        report.peephole_applied = peephole(&mut code);
    }

    let intervals = build_intervals(&code);
    let alloc = linear_scan(&intervals, arch);

    let mut emitter = Emitter::new(arch, code.len());
    emitter.prologue(alloc.spill_area_bytes());
    emitter.load_params(num_params, |v| alloc.location(v))?;

    let budget_ms = config.compile_budget.as_millis() as u64;
    let mut ends_in_return = false;
    for (pc, inst) in code.iter().enumerate() {
        if timer.elapsed() > config.compile_budget {
            return Err(JitError::Timeout { budget_ms });
        }
        emitter.bind(pc);
        ends_in_return = emit_one(&mut emitter, &alloc, *inst, pc, &mut report, config)?;
    }
    emitter.bind(code.len());
    if !ends_in_return {
        emitter.emit_return(template_for(OpCode::RetVoid).unwrap(), None)?;
    }

    let bytes = emitter.finalize()?;
    if bytes.len() > config.max_code_size {
        return Err(JitError::CodeTooLarge {
            size: bytes.len(),
            max: config.max_code_size,
        });
    }
    log::debug!(
        "compiled {} instructions to {} bytes ({} opts, {} spills)",
        code.len(),
        bytes.len(),
        report.total(),
        alloc.spills_generated,
    );
    Ok(CompiledCode {
        bytes,
        spill_slots: alloc.spill_slots,
        opt_report: report,
        compile_time: timer.elapsed(),
    })
}

/// Emit one instruction; returns whether it was a return
fn emit_one(
    emitter: &mut Emitter,
    alloc: &Allocation,
    inst: Instruction,
    pc: usize,
    report: &mut OptReport,
    config: &JitConfig,
) -> Result<bool> {
    let op = inst.opcode().expect("preflight validated opcodes");
    let loc = |v: u32| -> Result<Location> {
        alloc
            .location(v)
            .ok_or(JitError::Internal(format!("vreg {v} unallocated")))
    };
    match op {
        OpCode::Move => {
            if is_nop(inst) {
                return Ok(false);
            }
            let (dst, src) = (loc(inst.a())?, loc(inst.b())?);
            if dst == src {
                // Allocation put both names in one home: nothing to emit
                if config.opt.register_coalescing {
                    report.moves_coalesced += 1;
                }
                return Ok(false);
            }
            emitter.emit_move(dst, src)?;
        }
        OpCode::LoadI => {
            emitter.emit_load_int(loc(inst.a())?, inst.sbx() as i64)?;
        }
        OpCode::Add | OpCode::Sub | OpCode::Mul => {
            let template = template_for(op).unwrap();
            emitter.emit_arith(template, loc(inst.a())?, loc(inst.b())?, loc(inst.c())?)?;
        }
        OpCode::AddI => {
            let template = template_for(OpCode::AddI).unwrap();
            emitter.emit_arith_imm(template, loc(inst.a())?, loc(inst.b())?, inst.sc() as i64)?;
        }
        OpCode::SubI => {
            let template = template_for(OpCode::SubI).unwrap();
            emitter.emit_arith_imm(template, loc(inst.a())?, loc(inst.b())?, inst.sc() as i64)?;
        }
        OpCode::Jmp => {
            // Displacement resolved at finalize from the label table
            let target = (pc as i64 + 1 + inst.sbx() as i64).max(0) as usize;
            emitter.emit_jump(template_for(OpCode::Jmp).unwrap(), target)?;
        }
        OpCode::RetOne => {
            emitter.emit_return(template_for(op).unwrap(), Some(loc(inst.a())?))?;
            return Ok(true);
        }
        OpCode::RetVoid => {
            emitter.emit_return(template_for(op).unwrap(), None)?;
            return Ok(true);
        }
        OpCode::Ret => {
            // b-1 results; the native convention carries at most one
            let value = match inst.b() {
                1 => None,
                2 => Some(loc(inst.a())?),
                _ => {
                    return Err(JitError::CompileFailed(
                        "multi-result return not templated".to_string(),
                    ))
                }
            };
            emitter.emit_return(template_for(op).unwrap(), value)?;
            return Ok(true);
        }
        other => {
            return Err(JitError::CompileFailed(format!(
                "opcode {other:?} reached emission without a template"
            )))
        }
    }
    Ok(false)
}

// === Optimization Passes ===

/// Positions that are jump targets: constant state resets there
fn jump_targets(code: &[Instruction]) -> Vec<bool> {
    let mut targets = vec![false; code.len() + 1];
    for (pc, inst) in code.iter().enumerate() {
        if inst.opcode() == Ok(OpCode::Jmp) {
            let t = (pc as i64 + 1 + inst.sbx() as i64).max(0) as usize;
            if t < targets.len() {
                targets[t] = true;
            }
        }
    }
    targets
}

/// Fold arithmetic over registers with statically-known integer values.
/// Straight-line only: known state resets at every jump boundary.
fn fold_constants(code: &mut [Instruction]) -> u32 {
    let targets = jump_targets(code);
    let mut known: Vec<Option<i64>> = vec![None; 256];
    let mut folded = 0;

    for pc in 0..code.len() {
        if targets[pc] {
            known.iter_mut().for_each(|k| *k = None);
        }
        let inst = code[pc];
        let Ok(op) = inst.opcode() else { continue };
        match op {
            OpCode::LoadI => {
                known[inst.a() as usize] = Some(inst.sbx() as i64);
            }
            OpCode::Add | OpCode::Sub | OpCode::Mul if !inst.k() => {
                let lhs = known[inst.b() as usize];
                let rhs = known[inst.c() as usize];
                if let (Some(x), Some(y)) = (lhs, rhs) {
                    let value = match op {
                        OpCode::Add => x.wrapping_add(y),
                        OpCode::Sub => x.wrapping_sub(y),
                        _ => x.wrapping_mul(y),
                    };
                    // Only foldable when the result fits a LOADI immediate
                    if value >= -(1 << 16) && value < (1 << 16) {
                        code[pc] = Instruction::asbx(OpCode::LoadI, inst.a(), value as i32);
                        known[inst.a() as usize] = Some(value);
                        folded += 1;
                        continue;
                    }
                }
                known[inst.a() as usize] = None;
            }
            OpCode::Jmp => {
                known.iter_mut().for_each(|k| *k = None);
            }
            _ => {
                if op.sets_a() {
                    known[inst.a() as usize] = None;
                }
            }
        }
    }
    folded
}

/// Remove unreachable instructions between a return and the next jump
/// target
fn eliminate_dead(code: &mut [Instruction]) -> u32 {
    let targets = jump_targets(code);
    let mut dead = false;
    let mut eliminated = 0;
    for pc in 0..code.len() {
        if targets[pc] {
            dead = false;
        }
        let op = code[pc].opcode();
        if dead {
            if !is_nop(code[pc]) {
                code[pc] = nop();
                eliminated += 1;
            }
            continue;
        }
        if matches!(
            op,
            Ok(OpCode::Ret) | Ok(OpCode::RetVoid) | Ok(OpCode::RetOne)
        ) {
            dead = true;
        }
    }
    eliminated
}

/// Local rewrites: identity arithmetic becomes a move
fn peephole(code: &mut [Instruction]) -> u32 {
    let mut applied = 0;
    for inst in code.iter_mut() {
        let Ok(op) = inst.opcode() else { continue };
        match op {
            // x + 0 and x - 0 are moves
            OpCode::AddI | OpCode::SubI if inst.sc() == 0 => {
                *inst = Instruction::abc(OpCode::Move, inst.a(), inst.b(), 0, false);
                applied += 1;
            }
            _ => {}
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JitConfig {
        JitConfig::default()
    }

    fn loadi(a: u32, v: i32) -> Instruction {
        Instruction::asbx(OpCode::LoadI, a, v)
    }

    #[test]
    fn test_compile_simple_function() {
        let code = vec![
            loadi(0, 7),
            loadi(1, 3),
            Instruction::abc(OpCode::Add, 2, 0, 1, false),
            Instruction::abc(OpCode::RetOne, 2, 0, 0, false),
        ];
        let compiled = compile_bytecode(Arch::X86_64, &code, 0, &config()).unwrap();
        assert!(!compiled.bytes.is_empty());
        // Both targets produce code for the same bytecode
        let arm = compile_bytecode(Arch::Arm64, &code, 0, &config()).unwrap();
        assert!(!arm.bytes.is_empty());
        assert_ne!(compiled.bytes, arm.bytes);
    }

    #[test]
    fn test_untemplated_opcode_fails() {
        let code = vec![Instruction::abc(OpCode::NewObject, 0, 0, 4, false)];
        let err = compile_bytecode(Arch::X86_64, &code, 0, &config()).unwrap_err();
        assert!(matches!(err, JitError::CompileFailed(_)));
        assert_eq!(err.code(), -3);
    }

    #[test]
    fn test_timeout_budget() {
        let code = vec![loadi(0, 1); 64];
        let config = JitConfig {
            compile_budget: std::time::Duration::ZERO,
            ..JitConfig::default()
        };
        let err = compile_bytecode(Arch::X86_64, &code, 0, &config).unwrap_err();
        assert!(matches!(err, JitError::Timeout { .. }));
    }

    #[test]
    fn test_constant_folding() {
        let mut code = vec![
            loadi(0, 6),
            loadi(1, 7),
            Instruction::abc(OpCode::Mul, 2, 0, 1, false),
        ];
        let folded = fold_constants(&mut code);
        assert_eq!(folded, 1);
        assert_eq!(code[2].opcode().unwrap(), OpCode::LoadI);
        assert_eq!(code[2].sbx(), 42);
    }

    #[test]
    fn test_folding_respects_immediate_range() {
        let mut code = vec![
            loadi(0, 65535),
            loadi(1, 65535),
            Instruction::abc(OpCode::Mul, 2, 0, 1, false),
        ];
        assert_eq!(fold_constants(&mut code), 0);
        assert_eq!(code[2].opcode().unwrap(), OpCode::Mul);
    }

    #[test]
    fn test_dead_code_after_return() {
        let mut code = vec![
            Instruction::abc(OpCode::RetVoid, 0, 0, 0, false),
            loadi(0, 1),
            loadi(1, 2),
        ];
        assert_eq!(eliminate_dead(&mut code), 2);
        assert!(is_nop(code[1]));
        assert!(is_nop(code[2]));
    }

    #[test]
    fn test_peephole_add_zero() {
        let mut code = vec![Instruction::abc(OpCode::AddI, 1, 0, 128, false)];
        assert_eq!(peephole(&mut code), 1);
        assert_eq!(code[0].opcode().unwrap(), OpCode::Move);
    }

    #[test]
    fn test_disabled_passes_do_nothing() {
        let code = vec![
            loadi(0, 6),
            loadi(1, 7),
            Instruction::abc(OpCode::Mul, 2, 0, 1, false),
            Instruction::abc(OpCode::RetOne, 2, 0, 0, false),
        ];
        let config = JitConfig {
            opt: crate::config::OptConfig {
                constant_folding: false,
                dead_code_elimination: false,
                register_coalescing: false,
                peephole: false,
            },
            ..JitConfig::default()
        };
        let compiled = compile_bytecode(Arch::X86_64, &code, 0, &config).unwrap();
        assert_eq!(compiled.opt_report.total(), 0);
    }

    #[test]
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    fn test_compile_and_execute_arithmetic() {
        use crate::exec::ExecutableMemory;

        // r0 = 7; r1 = 3; r2 = r0 * r1; r2 = r2 + r0; return r2  (= 28)
        let code = vec![
            loadi(0, 7),
            loadi(1, 3),
            Instruction::abc(OpCode::Mul, 2, 0, 1, false),
            Instruction::abc(OpCode::Add, 2, 2, 0, false),
            Instruction::abc(OpCode::RetOne, 2, 0, 0, false),
        ];
        // Folding would turn this into a single constant; prove the
        // unoptimized path too
        for folding in [true, false] {
            let config = JitConfig {
                opt: crate::config::OptConfig {
                    constant_folding: folding,
                    ..crate::config::OptConfig::default()
                },
                ..JitConfig::default()
            };
            let arch = Arch::host().unwrap();
            let compiled = compile_bytecode(arch, &code, 0, &config).unwrap();
            let mem = ExecutableMemory::install(&compiled.bytes).unwrap();
            let result = unsafe { (mem.entry())(std::ptr::null(), 0) };
            assert_eq!(result, 28);
        }
    }

    #[test]
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    fn test_compile_and_execute_with_params() {
        use crate::exec::ExecutableMemory;

        // fn(a, b) = a - b
        let code = vec![
            Instruction::abc(OpCode::Sub, 2, 0, 1, false),
            Instruction::abc(OpCode::RetOne, 2, 0, 0, false),
        ];
        let arch = Arch::host().unwrap();
        let compiled = compile_bytecode(arch, &code, 2, &config()).unwrap();
        let mem = ExecutableMemory::install(&compiled.bytes).unwrap();
        let args = [50i64, 8i64];
        let result = unsafe { (mem.entry())(args.as_ptr(), 2) };
        assert_eq!(result, 42);
    }
}
