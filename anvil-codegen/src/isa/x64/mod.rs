//! The x86-64 backend.

pub mod enc;
pub mod emit;
pub mod lower;

use crate::binemit::CodeBuffer;
use crate::compile::{CompileEnv, EmitInfo};
use crate::ir::{FunctionBody, Opcode, PtrWidth};
use crate::CodegenResult;

/// Size of the reserved prologue slot. The prologue is assembled into a
/// scratch buffer and copied right-aligned into this slot so the entry
/// address always lies at the slot's tail.
pub const PROLOG_SIZE: usize = 64;

/// The x86-64 target.
pub struct Isa;

impl crate::isa::TargetIsa for Isa {
    fn name(&self) -> &'static str {
        "x86-64"
    }

    fn ptr_width(&self) -> PtrWidth {
        PtrWidth::P64
    }

    fn supports(&self, op: Opcode) -> bool {
        lower::opcode_is_supported(op)
    }

    fn create_entry_insns(&self, body: &mut FunctionBody) -> CodegenResult<()> {
        emit::create_entry_insns(body)
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
