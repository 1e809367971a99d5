//! Executable Memory
//!
//! Generated code is copied into an anonymous mapping sized to whole
//! pages. The mapping is writable during the copy and flipped to
//! read+execute before the entry point is handed out, which satisfies
//! W^X platforms; no page is ever writable and executable at once.

use crate::error::{JitError, Result};
use aql_util::Alignment;

/// Signature of a compiled entry point
///
/// `args` points at the unboxed integer arguments, `nargs` is their count;
/// the return value is the raw result the VM re-boxes.
pub type JitEntry = unsafe extern "C" fn(args: *const i64, nargs: i64) -> i64;

/// One read+execute region owning a compiled function
pub struct ExecutableMemory {
    map: memmap2::Mmap,
    code_size: usize,
}

impl ExecutableMemory {
    /// Copy `code` into a fresh page-aligned mapping and make it executable
    pub fn install(code: &[u8]) -> Result<Self> {
        if code.is_empty() {
            return Err(JitError::InvalidInput("empty code buffer"));
        }
        let size = Alignment::align_up(code.len(), page_size::get());
        let mut writable = memmap2::MmapMut::map_anon(size).map_err(|_| JitError::OutOfMemory {
            requested: size,
        })?;
        writable[..code.len()].copy_from_slice(code);
        // RW -> RX transition
        let map = writable
            .make_exec()
            .map_err(|e| JitError::Internal(format!("make_exec failed: {e}")))?;
        Ok(Self {
            map,
            code_size: code.len(),
        })
    }

    /// Bytes of generated code (mapping may be larger)
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    /// Bytes of address space held
    pub fn mapped_size(&self) -> usize {
        self.map.len()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    /// The entry point
    ///
    /// # Safety
    ///
    /// The installed bytes must be a valid function for the host
    /// architecture following the [`JitEntry`] convention.
    pub unsafe fn entry(&self) -> JitEntry {
        std::mem::transmute::<*const u8, JitEntry>(self.map.as_ptr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_rounds_to_pages() {
        let mem = ExecutableMemory::install(&[0xC3]).unwrap();
        assert_eq!(mem.code_size(), 1);
        assert_eq!(mem.mapped_size() % page_size::get(), 0);
        assert!(mem.mapped_size() >= page_size::get());
    }

    #[test]
    fn test_empty_rejected() {
        assert!(ExecutableMemory::install(&[]).is_err());
    }

    #[test]
    fn test_bytes_preserved() {
        let code = [0x55, 0x48, 0x89, 0xE5, 0xC9, 0xC3];
        let mem = ExecutableMemory::install(&code).unwrap();
        let installed = unsafe { std::slice::from_raw_parts(mem.as_ptr(), code.len()) };
        assert_eq!(installed, &code);
    }

    /// End-to-end: emit a constant-returning function and execute it
    #[test]
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    fn test_execute_constant_function() {
        use crate::emit::Emitter;
        use crate::regalloc::Location;
        use crate::target::Arch;
        use crate::template::template_for;
        use aql_core::OpCode;

        let arch = Arch::host().unwrap();
        let mut e = Emitter::new(arch, 1);
        e.prologue(0);
        e.bind(0);
        e.emit_load_int(Location::Reg(0), 42).unwrap();
        e.emit_return(template_for(OpCode::RetOne).unwrap(), Some(Location::Reg(0)))
            .unwrap();
        let code = e.finalize().unwrap();
        let mem = ExecutableMemory::install(&code).unwrap();
        let result = unsafe { (mem.entry())(std::ptr::null(), 0) };
        assert_eq!(result, 42);
    }
}
