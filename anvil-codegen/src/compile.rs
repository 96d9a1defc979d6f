//! The compile driver.
//!
//! Walks a function body's blocks in layout order and hands each
//! instruction to the target's rules, producing machine code directly into
//! a caller-provided region. The driver itself is target-independent: block
//! fixup patching, prologue back-patching and the out-of-space protocol are
//! all mediated through [`CodeBuffer`] and the [`TargetIsa`] seam. The
//! caller (the runtime layer) owns the grow-and-retry loop because only it
//! can allocate a bigger region.

use log::debug;

use crate::binemit::{CodeBuffer, CodeOffset};
use crate::ir::insn::FuncRef;
use crate::ir::FunctionBody;
use crate::isa::TargetIsa;
use crate::{CodegenError, CodegenResult};

/// Addresses of runtime support entry points that emitted code calls.
#[derive(Clone, Copy)]
pub struct RuntimeHooks {
    /// `extern "C" fn(i32) -> !` - raise a builtin exception.
    pub exception_builtin: usize,
    /// `extern "C" fn(*mut u8) -> !` - throw an exception object.
    pub exception_throw: usize,
    /// `memcpy`-compatible routine for large block copies.
    pub memcpy: usize,
    /// `memmove`-compatible routine for overlapping copies.
    pub memmove: usize,
    /// `memset`-compatible routine for large fills.
    pub memset: usize,
}

/// Resolves function references at call sites to entry addresses.
///
/// For an uncompiled or recompilable callee this yields the redirector or
/// indirector, so emitted call sites stay valid across recompilation.
pub trait FuncResolver {
    /// The address emitted for a direct call to `func`.
    fn address_of(&self, func: FuncRef) -> usize;
}

/// Allocates read-only data (extended-float immediates) that emitted code
/// references. Allocations live as long as the emitted code.
pub trait ConstAlloc {
    /// Copy `bytes` into the pool with the given alignment and return the
    /// allocation's address, or `None` when the pool is exhausted.
    fn alloc(&mut self, bytes: &[u8], align: usize) -> Option<usize>;
}

/// Everything the per-instruction rules need from the environment.
pub struct CompileEnv<'a> {
    /// Runtime support addresses.
    pub hooks: RuntimeHooks,
    /// Call-site address resolution.
    pub resolver: &'a dyn FuncResolver,
    /// Read-only data pool.
    pub consts: &'a mut dyn ConstAlloc,
}

/// Result of one successful emission pass.
#[derive(Clone, Debug)]
pub struct EmitInfo {
    /// Offset of the function entry point within the region. The entry sits
    /// at the tail of the reserved prologue slot.
    pub entry_offset: CodeOffset,
    /// Total bytes emitted.
    pub code_size: CodeOffset,
    /// Bytecode-offset marks recorded by `mark_offset`, as
    /// `(code offset, bytecode offset)` pairs in emission order.
    pub marks: Vec<(CodeOffset, i64)>,
}

/// Emit `body` into `buf`.
///
/// Returns `CodegenError::CodeTooLarge` when the region was too small, in
/// which case the caller should allocate a larger region and call again;
/// nothing is retained from the failed pass.
pub fn compile_body(
    body: &mut FunctionBody,
    isa: &dyn TargetIsa,
    buf: &mut CodeBuffer,
    env: &mut CompileEnv,
) -> CodegenResult<EmitInfo> {
    // Fixup chains and block addresses are scratch state from any previous
    // attempt.
    for block in body.blocks.values_mut() {
        block.reset_codegen_state();
    }

    let info = isa.emit_body(body, buf, env)?;
    if buf.overflowed() {
        return Err(CodegenError::CodeTooLarge);
    }
    debug!(
        "compiled {} blocks into {} bytes ({})",
        body.block_order.len(),
        info.code_size,
        isa.name()
    );
    Ok(info)
}

/// A resolver for bodies with no outgoing direct calls.
pub struct NullResolver;

impl FuncResolver for NullResolver {
    fn address_of(&self, func: FuncRef) -> usize {
        panic!("unresolved function reference {func}");
    }
}

/// A constant pool that leaks heap allocations; suitable for tests, where
/// emitted code is inspected rather than executed beyond the test.
pub struct LeakyConstAlloc;

impl ConstAlloc for LeakyConstAlloc {
    fn alloc(&mut self, bytes: &[u8], align: usize) -> Option<usize> {
        let layout = std::alloc::Layout::from_size_align(bytes.len().max(1), align).ok()?;
        unsafe {
            let p = std::alloc::alloc(layout);
            if p.is_null() {
                return None;
            }
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), p, bytes.len());
            Some(p as usize)
        }
    }
}
