//! The 32-bit x86 backend.
//!
//! Considerably smaller than its 64-bit sibling: arguments travel on the
//! stack (push-based), all floats live on the x87 stack, and 64-bit
//! arithmetic beyond add/sub goes through runtime intrinsics.

pub mod enc;
pub mod lower;

use crate::binemit::CodeBuffer;
use crate::compile::{CompileEnv, EmitInfo};
use crate::ir::{FunctionBody, Opcode, PtrWidth};
use crate::CodegenResult;

/// Size of the reserved prologue slot, sharing the right-aligned copy
/// scheme with the 64-bit backend.
pub const PROLOG_SIZE: usize = 32;

/// The x86 target.
pub struct Isa;

impl crate::isa::TargetIsa for Isa {
    fn name(&self) -> &'static str {
        "x86"
    }

    fn ptr_width(&self) -> PtrWidth {
        PtrWidth::P32
    }

    fn supports(&self, op: Opcode) -> bool {
        lower::opcode_is_supported(op)
    }

    fn create_entry_insns(&self, body: &mut FunctionBody) -> CodegenResult<()> {
        lower::create_entry_insns(body)
    }

    fn emit_body(
        &self,
        body: &mut FunctionBody,
        buf: &mut CodeBuffer,
        env: &mut CompileEnv,
    ) -> CodegenResult<EmitInfo> {
        lower::emit_body(body, buf, env)
    }

    fn prolog_size(&self) -> usize {
        PROLOG_SIZE
    }
}
