//! Target instruction set architectures.
//!
//! An ISA bundles the instruction encoders, the per-opcode rules and the
//! calling-convention wiring for one target. `lookup` selects the backend
//! from a `target_lexicon::Triple`; JIT use always passes the host triple.

pub mod x64;
pub mod x86;

use target_lexicon::{Architecture, Triple};

use crate::binemit::CodeBuffer;
use crate::compile::{CompileEnv, EmitInfo};
use crate::ir::{FunctionBody, Opcode, PtrWidth};
use crate::{CodegenError, CodegenResult};

/// Methods that the compile driver and the builder need from a target.
pub trait TargetIsa: Send + Sync {
    /// Short name of this ISA.
    fn name(&self) -> &'static str;

    /// Pointer width of the target.
    fn ptr_width(&self) -> PtrWidth;

    /// Does the backend emit this opcode directly? Unsupported opcodes make
    /// the builder fall back to intrinsic calls.
    fn supports(&self, op: Opcode) -> bool;

    /// Populate the entry block with incoming-parameter instructions per
    /// the target's calling convention.
    fn create_entry_insns(&self, body: &mut FunctionBody) -> CodegenResult<()>;

    /// Emit the whole body into `buf`. Called by the compile driver, which
    /// owns the out-of-space restart loop.
    fn emit_body(
        &self,
        body: &mut FunctionBody,
        buf: &mut CodeBuffer,
        env: &mut CompileEnv,
    ) -> CodegenResult<EmitInfo>;

    /// Size in bytes of the reserved prologue slot at the head of every
    /// emitted function. The entry point lies at the tail of the slot.
    fn prolog_size(&self) -> usize;
}

/// Look up the backend for a target triple.
pub fn lookup(triple: &Triple) -> CodegenResult<&'static dyn TargetIsa> {
    match triple.architecture {
        Architecture::X86_64 => Ok(&x64::Isa),
        Architecture::X86_32(_) => Ok(&x86::Isa),
        _ => Err(CodegenError::Unencodable),
    }
}

/// The backend for the machine we are running on.
pub fn host() -> CodegenResult<&'static dyn TargetIsa> {
    lookup(&Triple::host())
}
