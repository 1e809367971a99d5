//! Live Interval Construction
//!
//! One linear pass over the bytecode. An instruction whose opcode writes
//! its A operand *defines* A at that pc; B and C operands (when they name
//! registers, not constants) *use* theirs. An interval spans from first
//! definition (or first use, for parameters live on entry) to last use.

use aql_core::{Instruction, OpCode, OpMode};

/// Live range of one virtual register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveInterval {
    pub vreg: u32,
    pub start: u32,
    pub end: u32,
}

/// Build intervals for a bytecode sequence, sorted by start pc
pub fn build_intervals(code: &[Instruction]) -> Vec<LiveInterval> {
    // Indexed by vreg: (first_seen, last_seen)
    let mut ranges: Vec<Option<(u32, u32)>> = Vec::new();

    let mut touch = |reg: u32, pc: u32, ranges: &mut Vec<Option<(u32, u32)>>| {
        if ranges.len() <= reg as usize {
            ranges.resize(reg as usize + 1, None);
        }
        match &mut ranges[reg as usize] {
            Some((_, end)) => *end = pc,
            slot @ None => *slot = Some((pc, pc)),
        }
    };

    for (pc, inst) in code.iter().enumerate() {
        let pc = pc as u32;
        let Ok(op) = inst.opcode() else {
            continue;
        };
        match op.mode() {
            OpMode::ABC => {
                if uses_b(op) {
                    touch(inst.b(), pc, &mut ranges);
                }
                if uses_c(op) && !inst.k() {
                    touch(inst.c(), pc, &mut ranges);
                }
                if op.sets_a() || reads_a(op) {
                    touch(inst.a(), pc, &mut ranges);
                }
            }
            OpMode::ABx | OpMode::AsBx => {
                if op.sets_a() || reads_a(op) {
                    touch(inst.a(), pc, &mut ranges);
                }
            }
            OpMode::Ax => {}
        }
    }

    let mut intervals: Vec<LiveInterval> = ranges
        .iter()
        .enumerate()
        .filter_map(|(vreg, range)| {
            range.map(|(start, end)| LiveInterval {
                vreg: vreg as u32,
                start,
                end,
            })
        })
        .collect();
    intervals.sort_by_key(|iv| (iv.start, iv.vreg));
    intervals
}

/// Opcodes whose B operand names a register
fn uses_b(op: OpCode) -> bool {
    !matches!(
        op,
        OpCode::LoadI
            | OpCode::LoadF
            | OpCode::LoadK
            | OpCode::LoadKx
            | OpCode::LoadFalse
            | OpCode::LoadTrue
            | OpCode::Closure
            | OpCode::Jmp
            | OpCode::ForPrep
            | OpCode::ForLoop
            | OpCode::GetUpval
            | OpCode::SetUpval
            | OpCode::Vararg
            | OpCode::Builtin
            | OpCode::NewObject
            | OpCode::ExtraArg
            | OpCode::Close
            | OpCode::Tbc
            | OpCode::Ret
            | OpCode::RetVoid
            | OpCode::RetOne
            | OpCode::LoadNil
    )
}

/// Opcodes whose C operand names a register (subject to the K bit)
fn uses_c(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::IDiv
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::Band
            | OpCode::Bor
            | OpCode::Bxor
            | OpCode::Shl
            | OpCode::Shr
            | OpCode::Eq
            | OpCode::Lt
            | OpCode::Le
            | OpCode::GetProp
            | OpCode::SetProp
            | OpCode::Concat
            | OpCode::TestSet
            | OpCode::Invoke
    )
}

/// Opcodes that read their A operand instead of (or before) writing it
fn reads_a(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::SetUpval
            | OpCode::SetProp
            | OpCode::SetTabUp
            | OpCode::Eq
            | OpCode::Lt
            | OpCode::Le
            | OpCode::EqI
            | OpCode::LtI
            | OpCode::Test
            | OpCode::Ret
            | OpCode::RetOne
            | OpCode::Call
            | OpCode::TailCall
            | OpCode::Concat
    )
}
