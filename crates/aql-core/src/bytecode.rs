//! Bytecode Encoding
//!
//! Fixed 32-bit little-endian instructions with three operand layouts:
//!
//! ```text
//!  31    23      15       7      0
//! ┌─┬───────┬───────┬───────┬───────┐
//! │k│   C   │   B   │   A   │  op   │   iABC
//! ├─┴───────┴───────┼───────┼───────┤
//! │       Bx        │   A   │  op   │   iABx / iAsBx
//! ├─────────────────┴───────┼───────┤
//! │           Ax            │  op   │   iAx (EXTRAARG)
//! └─────────────────────────┴───────┘
//! ```
//!
//! - opcode: 7 bits, A/B/C: 8 bits each, k: 1 bit
//! - `Bx`: 17 unsigned bits (B, C, and k merged)
//! - `sBx`: `Bx - 2^16` (excess-K encoding)
//! - `Ax`: 25 unsigned bits, carried by `EXTRAARG` for the instruction
//!   before it
//!
//! The k bit flags the C operand of an iABC instruction as a constant-table
//! index instead of a register.

use num_enum::TryFromPrimitive;

pub const SIZE_OP: u32 = 7;
pub const SIZE_A: u32 = 8;
pub const SIZE_B: u32 = 8;
pub const SIZE_C: u32 = 8;
pub const SIZE_BX: u32 = 17;
pub const SIZE_AX: u32 = 25;

pub const POS_OP: u32 = 0;
pub const POS_A: u32 = POS_OP + SIZE_OP;
pub const POS_B: u32 = POS_A + SIZE_A;
pub const POS_C: u32 = POS_B + SIZE_B;
pub const POS_K: u32 = POS_C + SIZE_C;
pub const POS_BX: u32 = POS_B;
pub const POS_AX: u32 = POS_A;

pub const MAX_ARG_A: u32 = (1 << SIZE_A) - 1;
pub const MAX_ARG_B: u32 = (1 << SIZE_B) - 1;
pub const MAX_ARG_C: u32 = (1 << SIZE_C) - 1;
pub const MAX_ARG_BX: u32 = (1 << SIZE_BX) - 1;
pub const MAX_ARG_AX: u32 = (1 << SIZE_AX) - 1;

/// Excess-K offset for sBx
pub const OFFSET_SBX: i32 = 1 << (SIZE_BX - 1);

/// The opcode set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum OpCode {
    // Moves and loads
    Move = 0,
    LoadI,
    LoadF,
    LoadK,
    LoadKx,
    LoadFalse,
    LoadTrue,
    LoadNil,

    // Upvalues
    GetUpval,
    SetUpval,
    GetTabUp,
    SetTabUp,

    // Arithmetic
    Add,
    AddK,
    AddI,
    Sub,
    SubK,
    SubI,
    Mul,
    MulK,
    MulI,
    Div,
    DivK,
    DivI,
    IDiv,
    Mod,
    Pow,
    Unm,
    Len,

    // Bitwise
    Band,
    Bor,
    Bxor,
    Shl,
    Shr,
    Shri,
    Bnot,

    // Logic
    Not,
    Test,
    TestSet,

    // Compare
    Eq,
    Lt,
    Le,
    EqI,
    LtI,

    // Flow
    Jmp,
    ForPrep,
    ForLoop,

    // Calls
    Call,
    TailCall,
    Ret,
    RetVoid,
    RetOne,

    // Containers
    NewObject,
    GetProp,
    SetProp,
    Concat,

    // Misc
    Closure,
    Close,
    Tbc,
    Vararg,
    Builtin,
    Invoke,
    Yield,
    Resume,
    ExtraArg,
}

/// Operand layout of one opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    ABC,
    ABx,
    AsBx,
    Ax,
}

impl OpCode {
    pub const COUNT: usize = OpCode::ExtraArg as usize + 1;

    /// Operand layout for this opcode
    pub fn mode(self) -> OpMode {
        match self {
            OpCode::LoadI | OpCode::LoadF => OpMode::AsBx,
            OpCode::LoadK | OpCode::LoadKx | OpCode::Closure => OpMode::ABx,
            OpCode::Jmp | OpCode::ForPrep | OpCode::ForLoop => OpMode::AsBx,
            OpCode::ExtraArg => OpMode::Ax,
            _ => OpMode::ABC,
        }
    }

    /// Whether the A operand is written by this opcode (used by live
    /// interval construction and type inference)
    pub fn sets_a(self) -> bool {
        !matches!(
            self,
            OpCode::SetUpval
                | OpCode::SetTabUp
                | OpCode::SetProp
                | OpCode::Eq
                | OpCode::Lt
                | OpCode::Le
                | OpCode::EqI
                | OpCode::LtI
                | OpCode::Test
                | OpCode::Jmp
                | OpCode::Ret
                | OpCode::RetVoid
                | OpCode::RetOne
                | OpCode::Close
                | OpCode::Tbc
                | OpCode::ExtraArg
        )
    }
}

/// One encoded instruction
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u32);

impl Instruction {
    // === Constructors ===

    pub fn abc(op: OpCode, a: u32, b: u32, c: u32, k: bool) -> Self {
        debug_assert!(a <= MAX_ARG_A && b <= MAX_ARG_B && c <= MAX_ARG_C);
        Instruction(
            (op as u32)
                | (a << POS_A)
                | (b << POS_B)
                | (c << POS_C)
                | ((k as u32) << POS_K),
        )
    }

    pub fn abx(op: OpCode, a: u32, bx: u32) -> Self {
        debug_assert!(a <= MAX_ARG_A && bx <= MAX_ARG_BX);
        Instruction((op as u32) | (a << POS_A) | (bx << POS_BX))
    }

    pub fn asbx(op: OpCode, a: u32, sbx: i32) -> Self {
        let bx = (sbx + OFFSET_SBX) as u32;
        Self::abx(op, a, bx)
    }

    pub fn iax(op: OpCode, ax: u32) -> Self {
        debug_assert!(ax <= MAX_ARG_AX);
        Instruction((op as u32) | (ax << POS_AX))
    }

    // === Field Access ===

    #[inline]
    pub fn raw_opcode(self) -> u8 {
        (self.0 & ((1 << SIZE_OP) - 1)) as u8
    }

    /// Decoded opcode; invalid bytes surface as an error at dispatch
    #[inline]
    pub fn opcode(self) -> Result<OpCode, u8> {
        OpCode::try_from(self.raw_opcode()).map_err(|_| self.raw_opcode())
    }

    #[inline]
    pub fn a(self) -> u32 {
        (self.0 >> POS_A) & MAX_ARG_A
    }

    #[inline]
    pub fn b(self) -> u32 {
        (self.0 >> POS_B) & MAX_ARG_B
    }

    #[inline]
    pub fn c(self) -> u32 {
        (self.0 >> POS_C) & MAX_ARG_C
    }

    /// K-bit: C is a constant-table index
    #[inline]
    pub fn k(self) -> bool {
        (self.0 >> POS_K) & 1 != 0
    }

    /// C as a signed immediate (excess-128), for the `_I` opcode variants
    #[inline]
    pub fn sc(self) -> i32 {
        self.c() as i32 - 128
    }

    #[inline]
    pub fn bx(self) -> u32 {
        (self.0 >> POS_BX) & MAX_ARG_BX
    }

    #[inline]
    pub fn sbx(self) -> i32 {
        self.bx() as i32 - OFFSET_SBX
    }

    #[inline]
    pub fn ax(self) -> u32 {
        (self.0 >> POS_AX) & MAX_ARG_AX
    }
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.opcode() {
            Ok(op) => match op.mode() {
                OpMode::ABC => write!(
                    f,
                    "{:?} A={} B={} C={}{}",
                    op,
                    self.a(),
                    self.b(),
                    self.c(),
                    if self.k() { " k" } else { "" }
                ),
                OpMode::ABx => write!(f, "{:?} A={} Bx={}", op, self.a(), self.bx()),
                OpMode::AsBx => write!(f, "{:?} A={} sBx={}", op, self.a(), self.sbx()),
                OpMode::Ax => write!(f, "{:?} Ax={}", op, self.ax()),
            },
            Err(raw) => write!(f, "INVALID({:#x})", raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abc_roundtrip() {
        let i = Instruction::abc(OpCode::Add, 3, 250, 17, true);
        assert_eq!(i.opcode().unwrap(), OpCode::Add);
        assert_eq!(i.a(), 3);
        assert_eq!(i.b(), 250);
        assert_eq!(i.c(), 17);
        assert!(i.k());
    }

    #[test]
    fn test_abx_roundtrip() {
        let i = Instruction::abx(OpCode::LoadK, 9, MAX_ARG_BX);
        assert_eq!(i.opcode().unwrap(), OpCode::LoadK);
        assert_eq!(i.a(), 9);
        assert_eq!(i.bx(), MAX_ARG_BX);
    }

    #[test]
    fn test_sbx_signed_range() {
        for sbx in [-OFFSET_SBX, -1, 0, 1, OFFSET_SBX - 1] {
            let i = Instruction::asbx(OpCode::Jmp, 0, sbx);
            assert_eq!(i.sbx(), sbx, "sBx roundtrip failed for {sbx}");
        }
    }

    #[test]
    fn test_ax_roundtrip() {
        let i = Instruction::iax(OpCode::ExtraArg, MAX_ARG_AX);
        assert_eq!(i.opcode().unwrap(), OpCode::ExtraArg);
        assert_eq!(i.ax(), MAX_ARG_AX);
    }

    #[test]
    fn test_sc_excess_encoding() {
        let i = Instruction::abc(OpCode::AddI, 0, 1, 128 + 7, false);
        assert_eq!(i.sc(), 7);
        let i = Instruction::abc(OpCode::AddI, 0, 1, 128 - 3, false);
        assert_eq!(i.sc(), -3);
    }

    #[test]
    fn test_invalid_opcode_detected() {
        let i = Instruction(0x7F);
        assert!(i.opcode().is_err());
    }

    #[test]
    fn test_fields_do_not_overlap() {
        let i = Instruction::abc(OpCode::Move, MAX_ARG_A, 0, 0, false);
        assert_eq!(i.b(), 0);
        assert_eq!(i.c(), 0);
        assert!(!i.k());
        let i = Instruction::abc(OpCode::Move, 0, MAX_ARG_B, 0, false);
        assert_eq!(i.a(), 0);
        assert_eq!(i.c(), 0);
    }

    #[test]
    fn test_sets_a_classification() {
        assert!(OpCode::Move.sets_a());
        assert!(OpCode::Add.sets_a());
        assert!(!OpCode::SetProp.sets_a());
        assert!(!OpCode::Eq.sets_a());
        assert!(!OpCode::Jmp.sets_a());
    }
}
