//! Code Emission
//!
//! The emitter turns template + operand decisions into machine bytes in a
//! growable buffer. Register and immediate fields are patched into a copy
//! of each template; branch targets go through a per-pc label table and a
//! second patching pass ([`Emitter::finalize`]).
//!
//! Calling convention for compiled entries:
//!
//! ```text
//! extern "C" fn(args: *const i64, nargs: i64) -> i64
//! ```
//!
//! The prologue copies the argument-array pointer into the scratch
//! register and loads each parameter into its allocated location. Spilled
//! operands travel through the scratch pair around each instruction.

use crate::error::{JitError, Result};
use crate::regalloc::Location;
use crate::target::Arch;
use crate::template::{InstructionTemplate, TemplateKind};

/// Growable machine-code buffer
#[derive(Default)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    #[inline]
    pub fn emit_u8(&mut self, b: u8) {
        self.bytes.push(b);
    }

    #[inline]
    pub fn emit_bytes(&mut self, bs: &[u8]) {
        self.bytes.extend_from_slice(bs);
    }

    #[inline]
    pub fn emit_u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn emit_i32(&mut self, v: i32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Patch a previously-emitted 32-bit slot
    pub fn patch_u32(&mut self, at: usize, v: u32) {
        self.bytes[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Per-function emitter
pub struct Emitter {
    arch: Arch,
    pub buf: CodeBuffer,
    /// Buffer offset per bytecode pc, bound as emission reaches each pc
    labels: Vec<Option<usize>>,
    /// (patch-site offset, target pc) for the displacement pass
    pending_jumps: Vec<(usize, usize)>,
    spill_bytes: u32,
}

impl Emitter {
    pub fn new(arch: Arch, bytecode_len: usize) -> Self {
        Self {
            arch,
            buf: CodeBuffer::new(),
            labels: vec![None; bytecode_len + 1],
            pending_jumps: Vec::new(),
            spill_bytes: 0,
        }
    }

    /// Record that emission reached bytecode pc
    pub fn bind(&mut self, pc: usize) {
        self.labels[pc] = Some(self.buf.len());
    }

    // === Frame ===

    /// Function prologue: frame setup, spill area, parameter loads
    pub fn prologue(&mut self, spill_bytes: u32) {
        self.spill_bytes = (spill_bytes + 15) & !15;
        match self.arch {
            Arch::X86_64 => {
                self.buf.emit_u8(0x55); // push rbp
                self.buf.emit_bytes(&[0x48, 0x89, 0xE5]); // mov rbp, rsp
                if self.spill_bytes > 0 {
                    // sub rsp, imm32
                    self.buf.emit_bytes(&[0x48, 0x81, 0xEC]);
                    self.buf.emit_u32(self.spill_bytes);
                }
                // mov r11, rdi: keep the argument base in scratch
                self.emit_x86_mov_rr(self.arch.scratch(), 7);
            }
            Arch::Arm64 => {
                self.buf.emit_u32(0xA9BF_7BFD); // stp x29, x30, [sp, #-16]!
                self.buf.emit_u32(0x9100_03FD); // mov x29, sp
                if self.spill_bytes > 0 {
                    // sub sp, sp, #imm12
                    self.buf
                        .emit_u32(0xD100_0000 | (self.spill_bytes & 0xFFF) << 10 | 31 << 5 | 31);
                }
                // mov x16, x0
                self.emit_arm_mov_rr(self.arch.scratch(), 0);
            }
        }
    }

    fn epilogue(&mut self) {
        match self.arch {
            Arch::X86_64 => {
                self.buf.emit_u8(0xC9); // leave
            }
            Arch::Arm64 => {
                self.buf.emit_u32(0x9100_03BF); // mov sp, x29
                self.buf.emit_u32(0xA8C1_7BFD); // ldp x29, x30, [sp], #16
            }
        }
    }

    /// Load parameters 0..nparams from the argument array into their
    /// allocated locations
    pub fn load_params(
        &mut self,
        nparams: usize,
        location_of: impl Fn(u32) -> Option<Location>,
    ) -> Result<()> {
        for param in 0..nparams {
            let Some(loc) = location_of(param as u32) else {
                continue; // parameter never used
            };
            let offset = (param * 8) as i32;
            match loc {
                Location::Reg(r) => self.emit_load_from_base(r, offset),
                Location::Spill(slot) => {
                    let scratch2 = self.arch.scratch2();
                    self.emit_load_from_base(scratch2, offset);
                    self.emit_spill_store(slot, scratch2)?;
                }
            }
        }
        Ok(())
    }

    // === Operand plumbing ===

    /// Materialize an operand into a register: identity for allocated
    /// registers, a frame load into the given scratch for spills
    fn operand_reg(&mut self, loc: Location, scratch: u8) -> Result<u8> {
        match loc {
            Location::Reg(r) => Ok(r),
            Location::Spill(slot) => {
                self.emit_spill_load(scratch, slot)?;
                Ok(scratch)
            }
        }
    }

    /// Store a result register back if the destination is spilled
    fn store_result(&mut self, loc: Location, reg: u8) -> Result<()> {
        if let Location::Spill(slot) = loc {
            self.emit_spill_store(slot, reg)?;
        }
        Ok(())
    }

    /// Register a destination computes into: its own, or scratch for spills
    fn dest_reg(&self, loc: Location) -> u8 {
        match loc {
            Location::Reg(r) => r,
            Location::Spill(_) => self.arch.scratch(),
        }
    }

    fn spill_offset(&self, slot: u32) -> Result<i32> {
        let off = (slot + 1) * 8;
        if off > self.spill_bytes {
            return Err(JitError::Internal(format!(
                "spill slot {slot} outside {}-byte frame",
                self.spill_bytes
            )));
        }
        Ok(-(off as i32))
    }

    // === High-level emissions (used by the pipeline) ===

    /// dst = src
    pub fn emit_move(&mut self, dst: Location, src: Location) -> Result<()> {
        if dst == src {
            return Ok(());
        }
        let src_reg = self.operand_reg(src, self.arch.scratch())?;
        match dst {
            Location::Reg(d) => self.emit_mov_rr(d, src_reg),
            Location::Spill(slot) => self.emit_spill_store(slot, src_reg)?,
        }
        Ok(())
    }

    /// dst = constant
    pub fn emit_load_int(&mut self, dst: Location, value: i64) -> Result<()> {
        let d = self.dest_reg(dst);
        match self.arch {
            Arch::X86_64 => {
                if value < i32::MIN as i64 || value > i32::MAX as i64 {
                    return Err(JitError::CompileFailed(format!(
                        "immediate {value} exceeds imm32"
                    )));
                }
                // mov r64, imm32 (sign-extended): REX.W C7 /0
                let mut rex = 0x48u8;
                if d > 7 {
                    rex |= 0x01;
                }
                self.buf.emit_u8(rex);
                self.buf.emit_u8(0xC7);
                self.buf.emit_u8(0xC0 | (d & 7));
                self.buf.emit_i32(value as i32);
            }
            Arch::Arm64 => {
                if (0..=0xFFFF).contains(&value) {
                    // movz xd, #imm16
                    self.buf
                        .emit_u32(0xD280_0000 | ((value as u32) << 5) | d as u32);
                } else if (-0x1_0000..0).contains(&value) {
                    // movn xd, #(!imm16)
                    let inverted = (!value) as u32 & 0xFFFF;
                    self.buf.emit_u32(0x9280_0000 | (inverted << 5) | d as u32);
                } else {
                    return Err(JitError::CompileFailed(format!(
                        "immediate {value} exceeds one-instruction range"
                    )));
                }
            }
        }
        self.store_result(dst, d)
    }

    /// dst = lhs <op> rhs, through an arith template
    pub fn emit_arith(
        &mut self,
        template: &InstructionTemplate,
        dst: Location,
        lhs: Location,
        rhs: Location,
    ) -> Result<()> {
        debug_assert_eq!(template.kind, TemplateKind::Arith);
        let lhs_reg = self.operand_reg(lhs, self.arch.scratch())?;
        let rhs_reg = self.operand_reg(rhs, self.arch.scratch2())?;
        let d = self.dest_reg(dst);
        match self.arch {
            Arch::X86_64 => {
                // Two-operand form: route through the destination register
                if d != lhs_reg {
                    if d == rhs_reg {
                        // dst aliases rhs: preserve rhs in scratch2 first
                        let saved = self.arch.scratch2();
                        if saved != rhs_reg {
                            self.emit_mov_rr(saved, rhs_reg);
                        }
                        self.emit_mov_rr(d, lhs_reg);
                        self.emit_x86_template(template, d, saved)?;
                        return self.store_result(dst, d);
                    }
                    self.emit_mov_rr(d, lhs_reg);
                }
                self.emit_x86_template(template, d, rhs_reg)?;
            }
            Arch::Arm64 => {
                self.emit_arm_template(template, d, Some(lhs_reg), Some(rhs_reg), 0)?;
            }
        }
        self.store_result(dst, d)
    }

    /// dst = lhs <op> immediate, through an arith-immediate template
    pub fn emit_arith_imm(
        &mut self,
        template: &InstructionTemplate,
        dst: Location,
        lhs: Location,
        imm: i64,
    ) -> Result<()> {
        debug_assert_eq!(template.kind, TemplateKind::ArithImmediate);
        let lhs_reg = self.operand_reg(lhs, self.arch.scratch())?;
        let d = self.dest_reg(dst);
        match self.arch {
            Arch::X86_64 => {
                if imm < i32::MIN as i64 || imm > i32::MAX as i64 {
                    return Err(JitError::CompileFailed("imm32 overflow".to_string()));
                }
                if d != lhs_reg {
                    self.emit_mov_rr(d, lhs_reg);
                }
                self.emit_x86_template_imm(template, d, imm as i32)?;
            }
            Arch::Arm64 => {
                let t = &template.arm64;
                let max = (1u64 << t.immediate_bits) - 1;
                if imm < 0 || imm as u64 > max {
                    return Err(JitError::CompileFailed(format!(
                        "immediate {imm} exceeds {} bits",
                        t.immediate_bits
                    )));
                }
                self.emit_arm_template(template, d, Some(lhs_reg), None, imm as u32)?;
            }
        }
        self.store_result(dst, d)
    }

    /// Unconditional jump to a bytecode pc (patched at finalize)
    pub fn emit_jump(&mut self, template: &InstructionTemplate, target_pc: usize) -> Result<()> {
        debug_assert_eq!(template.kind, TemplateKind::Jump);
        match self.arch {
            Arch::X86_64 => {
                self.buf.emit_bytes(template.x86_64.encoding);
                let site = self.buf.len();
                self.buf.emit_i32(0);
                self.pending_jumps.push((site, target_pc));
            }
            Arch::Arm64 => {
                let site = self.buf.len();
                self.buf.emit_u32(template.arm64.encoding);
                self.pending_jumps.push((site, target_pc));
            }
        }
        Ok(())
    }

    /// Return with an optional value: moves it to the ABI return register,
    /// tears down the frame, emits the ret template
    pub fn emit_return(
        &mut self,
        template: &InstructionTemplate,
        value: Option<Location>,
    ) -> Result<()> {
        debug_assert_eq!(template.kind, TemplateKind::Return);
        let ret_reg = 0; // rax / x0
        if let Some(loc) = value {
            let src = self.operand_reg(loc, self.arch.scratch())?;
            if src != ret_reg {
                self.emit_mov_rr(ret_reg, src);
            }
        } else {
            self.emit_load_int(Location::Reg(ret_reg), 0)?;
        }
        self.epilogue();
        match self.arch {
            Arch::X86_64 => self.buf.emit_bytes(template.x86_64.encoding),
            Arch::Arm64 => self.buf.emit_u32(template.arm64.encoding),
        }
        Ok(())
    }

    /// Patch every pending branch displacement
    pub fn finalize(mut self) -> Result<Vec<u8>> {
        for (site, target_pc) in std::mem::take(&mut self.pending_jumps) {
            let target = self
                .labels
                .get(target_pc)
                .copied()
                .flatten()
                .ok_or_else(|| {
                    JitError::CompileFailed(format!("jump to unbound pc {target_pc}"))
                })?;
            match self.arch {
                Arch::X86_64 => {
                    // rel32 from the end of the displacement field
                    let rel = target as i64 - (site as i64 + 4);
                    self.buf.patch_u32(site, rel as i32 as u32);
                }
                Arch::Arm64 => {
                    let rel_words = (target as i64 - site as i64) / 4;
                    let imm26 = (rel_words as u32) & 0x03FF_FFFF;
                    let word = u32::from_le_bytes(
                        self.buf.as_slice()[site..site + 4].try_into().unwrap(),
                    );
                    self.buf.patch_u32(site, word | imm26);
                }
            }
        }
        Ok(self.buf.into_bytes())
    }

    // === Low-level encodings ===

    fn emit_mov_rr(&mut self, dst: u8, src: u8) {
        match self.arch {
            Arch::X86_64 => self.emit_x86_mov_rr(dst, src),
            Arch::Arm64 => self.emit_arm_mov_rr(dst, src),
        }
    }

    /// x86: mov dst, src (REX.W 89 /r, dst in rm)
    fn emit_x86_mov_rr(&mut self, dst: u8, src: u8) {
        let mut rex = 0x48u8;
        if src > 7 {
            rex |= 0x04; // REX.R extends the reg field
        }
        if dst > 7 {
            rex |= 0x01; // REX.B extends the rm field
        }
        self.buf.emit_u8(rex);
        self.buf.emit_u8(0x89);
        self.buf.emit_u8(0xC0 | ((src & 7) << 3) | (dst & 7));
    }

    /// arm64: mov dst, src (orr xd, xzr, xm)
    fn emit_arm_mov_rr(&mut self, dst: u8, src: u8) {
        self.buf
            .emit_u32(0xAA00_03E0 | (src as u32) << 16 | dst as u32);
    }

    /// Register-register template body (x86)
    fn emit_x86_template(&mut self, template: &InstructionTemplate, dst: u8, src: u8) -> Result<()> {
        let t = &template.x86_64;
        let (reg, rm) = if t.dst_in_reg_field {
            (dst, src)
        } else {
            (src, dst)
        };
        let mut encoding = t.encoding.to_vec();
        // First byte is the REX prefix in every 64-bit template
        if reg > 7 {
            encoding[0] |= 0x04;
        }
        if rm > 7 {
            encoding[0] |= 0x01;
        }
        self.buf.emit_bytes(&encoding);
        if t.has_modrm {
            self.buf.emit_u8(0xC0 | ((reg & 7) << 3) | (rm & 7));
        }
        Ok(())
    }

    /// Register+immediate template body (x86 `/digit` forms)
    fn emit_x86_template_imm(
        &mut self,
        template: &InstructionTemplate,
        rm: u8,
        imm: i32,
    ) -> Result<()> {
        let t = &template.x86_64;
        let ext = t.modrm_ext.ok_or(JitError::Internal(
            "immediate template without opcode extension".to_string(),
        ))?;
        let mut encoding = t.encoding.to_vec();
        if rm > 7 {
            encoding[0] |= 0x01;
        }
        self.buf.emit_bytes(&encoding);
        self.buf.emit_u8(0xC0 | (ext << 3) | (rm & 7));
        self.buf.emit_i32(imm);
        Ok(())
    }

    /// Patched ARM64 template word
    fn emit_arm_template(
        &mut self,
        template: &InstructionTemplate,
        rd: u8,
        rn: Option<u8>,
        rm: Option<u8>,
        imm: u32,
    ) -> Result<()> {
        let t = &template.arm64;
        let mut word = t.encoding;
        if let Some(shift) = t.rd_shift {
            word |= (rd as u32) << shift;
        }
        if let (Some(shift), Some(rn)) = (t.rn_shift, rn) {
            word |= (rn as u32) << shift;
        }
        if let (Some(shift), Some(rm)) = (t.rm_shift, rm) {
            word |= (rm as u32) << shift;
        }
        if t.has_immediate {
            let max = (1u32 << t.immediate_bits) - 1;
            if imm > max {
                return Err(JitError::CompileFailed(format!(
                    "immediate {imm} exceeds {} bits",
                    t.immediate_bits
                )));
            }
            word |= imm << t.imm_shift;
        }
        self.buf.emit_u32(word);
        Ok(())
    }

    /// Load from the argument base: mov reg, [base + offset]
    fn emit_load_from_base(&mut self, reg: u8, offset: i32) {
        let base = self.arch.scratch();
        match self.arch {
            Arch::X86_64 => {
                let mut rex = 0x48u8;
                if reg > 7 {
                    rex |= 0x04;
                }
                if base > 7 {
                    rex |= 0x01;
                }
                self.buf.emit_u8(rex);
                self.buf.emit_u8(0x8B); // mov r64, r/m64
                self.buf.emit_u8(0x80 | ((reg & 7) << 3) | (base & 7));
                self.buf.emit_i32(offset);
            }
            Arch::Arm64 => {
                // ldr xt, [xn, #imm12 * 8]
                let scaled = (offset / 8) as u32;
                self.buf.emit_u32(
                    0xF940_0000 | (scaled & 0xFFF) << 10 | (base as u32) << 5 | reg as u32,
                );
            }
        }
    }

    /// Frame-relative spill store: [fp - 8*(slot+1)] = reg
    fn emit_spill_store(&mut self, slot: u32, reg: u8) -> Result<()> {
        let offset = self.spill_offset(slot)?;
        match self.arch {
            Arch::X86_64 => {
                let mut rex = 0x48u8;
                if reg > 7 {
                    rex |= 0x04;
                }
                self.buf.emit_u8(rex);
                self.buf.emit_u8(0x89); // mov r/m64, r64
                self.buf.emit_u8(0x80 | ((reg & 7) << 3) | 5); // [rbp + disp32]
                self.buf.emit_i32(offset);
            }
            Arch::Arm64 => {
                // stur xt, [x29, #imm9] (unscaled, signed offset)
                let imm9 = (offset as u32) & 0x1FF;
                self.buf
                    .emit_u32(0xF800_0000 | imm9 << 12 | 29 << 5 | reg as u32);
            }
        }
        Ok(())
    }

    /// Frame-relative spill load: reg = [fp - 8*(slot+1)]
    fn emit_spill_load(&mut self, reg: u8, slot: u32) -> Result<()> {
        let offset = self.spill_offset(slot)?;
        match self.arch {
            Arch::X86_64 => {
                let mut rex = 0x48u8;
                if reg > 7 {
                    rex |= 0x04;
                }
                self.buf.emit_u8(rex);
                self.buf.emit_u8(0x8B);
                self.buf.emit_u8(0x80 | ((reg & 7) << 3) | 5);
                self.buf.emit_i32(offset);
            }
            Arch::Arm64 => {
                // ldur xt, [x29, #imm9]
                let imm9 = (offset as u32) & 0x1FF;
                self.buf
                    .emit_u32(0xF840_0000 | imm9 << 12 | 29 << 5 | reg as u32);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::template_for;
    use aql_core::OpCode;

    fn reg(r: u8) -> Location {
        Location::Reg(r)
    }

    // === x86-64 Encodings ===

    #[test]
    fn test_x86_mov_rr() {
        let mut e = Emitter::new(Arch::X86_64, 1);
        e.emit_move(reg(0), reg(1)).unwrap(); // mov rax, rcx
        assert_eq!(e.buf.as_slice(), &[0x48, 0x89, 0xC8]);
    }

    #[test]
    fn test_x86_mov_extended_register() {
        let mut e = Emitter::new(Arch::X86_64, 1);
        e.emit_move(reg(8), reg(0)).unwrap(); // mov r8, rax
        assert_eq!(e.buf.as_slice(), &[0x49, 0x89, 0xC0]);
    }

    #[test]
    fn test_x86_load_int() {
        let mut e = Emitter::new(Arch::X86_64, 1);
        e.emit_load_int(reg(0), 7).unwrap(); // mov rax, 7
        assert_eq!(e.buf.as_slice(), &[0x48, 0xC7, 0xC0, 7, 0, 0, 0]);
    }

    #[test]
    fn test_x86_add_in_place() {
        let mut e = Emitter::new(Arch::X86_64, 1);
        let add = template_for(OpCode::Add).unwrap();
        e.emit_arith(add, reg(0), reg(0), reg(1)).unwrap(); // add rax, rcx
        assert_eq!(e.buf.as_slice(), &[0x48, 0x01, 0xC8]);
    }

    #[test]
    fn test_x86_mul_reg_field_order() {
        let mut e = Emitter::new(Arch::X86_64, 1);
        let mul = template_for(OpCode::Mul).unwrap();
        e.emit_arith(mul, reg(0), reg(0), reg(1)).unwrap(); // imul rax, rcx
        assert_eq!(e.buf.as_slice(), &[0x48, 0x0F, 0xAF, 0xC1]);
    }

    #[test]
    fn test_x86_three_address_add_routes_through_dst() {
        let mut e = Emitter::new(Arch::X86_64, 1);
        let add = template_for(OpCode::Add).unwrap();
        e.emit_arith(add, reg(2), reg(0), reg(1)).unwrap();
        // mov rdx, rax; add rdx, rcx
        assert_eq!(e.buf.as_slice(), &[0x48, 0x89, 0xC2, 0x48, 0x01, 0xCA]);
    }

    #[test]
    fn test_x86_prologue_epilogue_roundtrip() {
        let mut e = Emitter::new(Arch::X86_64, 1);
        e.prologue(0);
        let ret = template_for(OpCode::RetVoid).unwrap();
        e.emit_return(ret, None).unwrap();
        let bytes = e.finalize().unwrap();
        assert_eq!(&bytes[..4], &[0x55, 0x48, 0x89, 0xE5]); // push rbp; mov rbp, rsp
        assert_eq!(bytes[bytes.len() - 2], 0xC9); // leave
        assert_eq!(bytes[bytes.len() - 1], 0xC3); // ret
    }

    // === ARM64 Encodings ===

    #[test]
    fn test_arm_add() {
        let mut e = Emitter::new(Arch::Arm64, 1);
        let add = template_for(OpCode::Add).unwrap();
        e.emit_arith(add, reg(0), reg(1), reg(2)).unwrap(); // add x0, x1, x2
        assert_eq!(e.buf.as_slice(), &0x8B02_0020u32.to_le_bytes());
    }

    #[test]
    fn test_arm_movz() {
        let mut e = Emitter::new(Arch::Arm64, 1);
        e.emit_load_int(reg(0), 42).unwrap(); // movz x0, #42
        assert_eq!(e.buf.as_slice(), &0xD280_0540u32.to_le_bytes());
    }

    #[test]
    fn test_arm_movn_negative() {
        let mut e = Emitter::new(Arch::Arm64, 1);
        e.emit_load_int(reg(0), -1).unwrap(); // movn x0, #0
        assert_eq!(e.buf.as_slice(), &0x9280_0000u32.to_le_bytes());
    }

    #[test]
    fn test_arm_ret_word() {
        let mut e = Emitter::new(Arch::Arm64, 1);
        let ret = template_for(OpCode::RetOne).unwrap();
        e.emit_return(ret, Some(reg(0))).unwrap();
        let bytes = e.finalize().unwrap();
        assert_eq!(&bytes[bytes.len() - 4..], &0xD65F_03C0u32.to_le_bytes());
    }

    // === Jump Patching ===

    #[test]
    fn test_x86_forward_jump_patched() {
        let mut e = Emitter::new(Arch::X86_64, 3);
        let jmp = template_for(OpCode::Jmp).unwrap();
        e.bind(0);
        e.emit_jump(jmp, 2).unwrap();
        e.bind(1);
        e.emit_load_int(reg(0), 1).unwrap();
        e.bind(2);
        e.emit_load_int(reg(0), 2).unwrap();
        let bytes = e.finalize().unwrap();
        // jmp is E9 + rel32; target is right after the 7-byte load at pc 1
        assert_eq!(bytes[0], 0xE9);
        let rel = i32::from_le_bytes(bytes[1..5].try_into().unwrap());
        assert_eq!(rel, 7, "rel32 must skip the 7-byte mov");
    }

    #[test]
    fn test_jump_to_unbound_pc_fails() {
        let mut e = Emitter::new(Arch::X86_64, 3);
        let jmp = template_for(OpCode::Jmp).unwrap();
        e.bind(0);
        e.emit_jump(jmp, 2).unwrap();
        assert!(e.finalize().is_err());
    }

    // === Spill Traffic ===

    #[test]
    fn test_spilled_operands_roundtrip_through_scratch() {
        let mut e = Emitter::new(Arch::X86_64, 1);
        e.prologue(16);
        let add = template_for(OpCode::Add).unwrap();
        e.emit_arith(add, Location::Spill(0), Location::Spill(0), Location::Spill(1))
            .unwrap();
        let bytes = e.finalize().unwrap();
        // Load, load, add, store: the exact sequence is an implementation
        // detail, but both frame offsets must appear
        let has = |needle: &[u8]| bytes.windows(needle.len()).any(|w| w == needle);
        assert!(has(&(-8i32).to_le_bytes()), "slot 0 offset missing");
        assert!(has(&(-16i32).to_le_bytes()), "slot 1 offset missing");
    }
}
