//! Per-Opcode Instruction Templates
//!
//! Each supported opcode maps to one template per architecture. x86-64
//! templates carry the REX+opcode byte sequence plus modrm/immediate/
//! displacement flags; ARM64 templates carry a 32-bit base encoding with
//! register-slot shifts and an immediate width. The emitter patches
//! register and immediate fields into a copy of the template.
//!
//! Opcodes without a template are not compilable; the pipeline reports
//! `CompileFailed` and the interpreter keeps running the function.

use aql_core::OpCode;

/// Template family, for diagnostics and pass decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Move,
    LoadImmediate,
    Arith,
    ArithImmediate,
    Jump,
    Return,
}

/// x86-64 encoding recipe
#[derive(Debug, Clone, Copy)]
pub struct X86Template {
    /// REX prefix + opcode bytes (REX.R/REX.B patched for r8-r15)
    pub encoding: &'static [u8],
    pub has_modrm: bool,
    /// Opcode extension digit stored in the modrm reg field (`/n` forms)
    pub modrm_ext: Option<u8>,
    /// true: dst in reg field, src in rm (e.g. 0F AF imul)
    /// false: dst in rm field, src in reg (e.g. 01 add, 89 mov)
    pub dst_in_reg_field: bool,
    pub has_immediate: bool,
    /// Immediate width in bytes (sign-extended imm32 for 64-bit forms)
    pub imm_size: u8,
    /// Trailing rel32 displacement (branches)
    pub has_displacement: bool,
}

/// ARM64 encoding recipe
#[derive(Debug, Clone, Copy)]
pub struct Arm64Template {
    pub encoding: u32,
    pub rd_shift: Option<u8>,
    pub rn_shift: Option<u8>,
    pub rm_shift: Option<u8>,
    pub has_immediate: bool,
    pub immediate_bits: u8,
    pub imm_shift: u8,
    /// imm26 branch displacement in the low bits
    pub has_displacement: bool,
}

/// One opcode's recipes for both targets
#[derive(Debug, Clone, Copy)]
pub struct InstructionTemplate {
    pub kind: TemplateKind,
    pub x86_64: X86Template,
    pub arm64: Arm64Template,
}

const fn x86(
    encoding: &'static [u8],
    has_modrm: bool,
    modrm_ext: Option<u8>,
    dst_in_reg_field: bool,
    imm_size: u8,
    has_displacement: bool,
) -> X86Template {
    X86Template {
        encoding,
        has_modrm,
        modrm_ext,
        dst_in_reg_field,
        has_immediate: imm_size > 0,
        imm_size,
        has_displacement,
    }
}

const fn arm(
    encoding: u32,
    rd_shift: Option<u8>,
    rn_shift: Option<u8>,
    rm_shift: Option<u8>,
    immediate_bits: u8,
    imm_shift: u8,
    has_displacement: bool,
) -> Arm64Template {
    Arm64Template {
        encoding,
        rd_shift,
        rn_shift,
        rm_shift,
        has_immediate: immediate_bits > 0,
        immediate_bits,
        imm_shift,
        has_displacement,
    }
}

/// MOV r64, r64 / ORR Xd, XZR, Xm
static MOVE: InstructionTemplate = InstructionTemplate {
    kind: TemplateKind::Move,
    x86_64: x86(&[0x48, 0x89], true, None, false, 0, false),
    arm64: arm(0xAA00_03E0, Some(0), None, Some(16), 0, 0, false),
};

/// MOV r64, imm32 (sign-extended) / MOVZ Xd, #imm16
static LOAD_I: InstructionTemplate = InstructionTemplate {
    kind: TemplateKind::LoadImmediate,
    x86_64: x86(&[0x48, 0xC7], true, Some(0), false, 4, false),
    arm64: arm(0xD280_0000, Some(0), None, None, 16, 5, false),
};

/// ADD r/m64, r64 / ADD Xd, Xn, Xm
static ADD: InstructionTemplate = InstructionTemplate {
    kind: TemplateKind::Arith,
    x86_64: x86(&[0x48, 0x01], true, None, false, 0, false),
    arm64: arm(0x8B00_0000, Some(0), Some(5), Some(16), 0, 0, false),
};

/// SUB r/m64, r64 / SUB Xd, Xn, Xm
static SUB: InstructionTemplate = InstructionTemplate {
    kind: TemplateKind::Arith,
    x86_64: x86(&[0x48, 0x29], true, None, false, 0, false),
    arm64: arm(0xCB00_0000, Some(0), Some(5), Some(16), 0, 0, false),
};

/// IMUL r64, r/m64 / MUL Xd, Xn, Xm (MADD with Ra=XZR)
static MUL: InstructionTemplate = InstructionTemplate {
    kind: TemplateKind::Arith,
    x86_64: x86(&[0x48, 0x0F, 0xAF], true, None, true, 0, false),
    arm64: arm(0x9B00_7C00, Some(0), Some(5), Some(16), 0, 0, false),
};

/// ADD r/m64, imm32 / ADD Xd, Xn, #imm12
static ADD_I: InstructionTemplate = InstructionTemplate {
    kind: TemplateKind::ArithImmediate,
    x86_64: x86(&[0x48, 0x81], true, Some(0), false, 4, false),
    arm64: arm(0x9100_0000, Some(0), Some(5), None, 12, 10, false),
};

/// SUB r/m64, imm32 / SUB Xd, Xn, #imm12
static SUB_I: InstructionTemplate = InstructionTemplate {
    kind: TemplateKind::ArithImmediate,
    x86_64: x86(&[0x48, 0x81], true, Some(5), false, 4, false),
    arm64: arm(0xD100_0000, Some(0), Some(5), None, 12, 10, false),
};

/// JMP rel32 / B imm26
static JMP: InstructionTemplate = InstructionTemplate {
    kind: TemplateKind::Jump,
    x86_64: x86(&[0xE9], false, None, false, 0, true),
    arm64: arm(0x1400_0000, None, None, None, 0, 0, true),
};

/// RET / RET (x30); the emitter inserts the epilogue before these
static RET: InstructionTemplate = InstructionTemplate {
    kind: TemplateKind::Return,
    x86_64: x86(&[0xC3], false, None, false, 0, false),
    arm64: arm(0xD65F_03C0, None, None, None, 0, 0, false),
};

/// Template for an opcode, when it is compilable
pub fn template_for(op: OpCode) -> Option<&'static InstructionTemplate> {
    match op {
        OpCode::Move => Some(&MOVE),
        OpCode::LoadI => Some(&LOAD_I),
        OpCode::Add => Some(&ADD),
        OpCode::Sub => Some(&SUB),
        OpCode::Mul => Some(&MUL),
        OpCode::AddI => Some(&ADD_I),
        OpCode::SubI => Some(&SUB_I),
        OpCode::Jmp => Some(&JMP),
        OpCode::Ret | OpCode::RetVoid | OpCode::RetOne => Some(&RET),
        _ => None,
    }
}
