//! Function records and their compilation.

use std::sync::atomic::{AtomicPtr, Ordering};

use anvil_codegen::binemit::CodeBuffer;
use anvil_codegen::builder::call::CalleeInfo;
use anvil_codegen::compile::{compile_body, CompileEnv, ConstAlloc, FuncResolver, RuntimeHooks};
use anvil_codegen::ir::insn::FuncRef;
use anvil_codegen::ir::{FunctionBody, Signature};
use anvil_codegen::isa::TargetIsa;
use anvil_codegen::CodegenError;
use anvil_entity::{EntityRef, PrimaryMap};
use log::{debug, trace};

use crate::context::{Cookie, FuncId, OnDemandCompiler};
use crate::exception;
use crate::memory::Memory;
use crate::unwind;
use crate::JitError;

/// One JIT function.
///
/// Boxed inside the context so the `entry` slot has a stable address for
/// the indirector to chase.
pub struct Function {
    /// The immutable signature.
    pub signature: Signature,
    /// The published entry point: the redirector until first compilation,
    /// then the latest code.
    pub entry: AtomicPtr<u8>,
    /// Base of the trampoline slot (the redirector).
    pub redirector: *mut u8,
    /// The indirector inside the trampoline slot.
    pub indirector: *mut u8,
    /// Dynamic optimization level.
    pub optimization_level: u32,
    /// Has the function been compiled at least once?
    pub is_compiled: bool,
    /// May the function be compiled again?
    pub is_recompilable: bool,
    /// The body contained a try region.
    pub has_try: bool,
    /// Known not to throw (derived at compile time).
    pub no_throw: bool,
    /// Known not to return normally.
    pub no_return: bool,
    /// The enclosing function for nested functions.
    pub nested_parent: Option<FuncId>,
    /// The user's on-demand compiler.
    pub on_demand: Option<OnDemandCompiler>,
    /// The body under construction, present only while building.
    pub builder: Option<Box<FunctionBody>>,
    /// Identity passed to the redirector driver.
    pub cookie: Box<Cookie>,
    /// The published code range after compilation.
    pub code_range: Option<(usize, usize)>,
    /// Bytecode-offset marks as `(absolute pc, bytecode offset)`, sorted by
    /// pc; the only debug information the library records.
    pub bytecode_marks: Vec<(usize, i64)>,
}

// Trampoline pointers are only dereferenced by executing threads; all
// mutation happens behind the context build lock.
unsafe impl Send for Function {}

impl Function {
    /// What a call site needs to know about this function.
    pub fn callee_info(&self, id: FuncId) -> CalleeInfo {
        CalleeInfo {
            func: FuncRef::new(id.index()),
            signature: self.signature.clone(),
            is_nested: self.nested_parent.is_some(),
            no_throw: self.no_throw,
            no_return: self.no_return,
        }
    }

    /// The current entry pointer.
    pub fn entry_address(&self) -> *const u8 {
        self.entry.load(Ordering::Acquire)
    }

    /// The address handed out to C callers: the indirector while the
    /// function may still be (re)compiled, the final code otherwise.
    pub fn closure_address(&self) -> *const u8 {
        if !self.is_compiled || self.is_recompilable {
            self.indirector as *const u8
        } else {
            self.entry_address()
        }
    }
}

/// Resolve direct call targets during emission: compiled, frozen callees
/// get their final entry; everything else goes through the indirector so
/// on-demand compilation and recompilation stay transparent.
pub(crate) struct ContextResolver<'a> {
    pub functions: &'a PrimaryMap<FuncId, Option<Box<Function>>>,
}

impl FuncResolver for ContextResolver<'_> {
    fn address_of(&self, func: FuncRef) -> usize {
        let id = FuncId::new(func.index());
        match &self.functions[id] {
            Some(f) if f.is_compiled && !f.is_recompilable => f.entry_address() as usize,
            Some(f) => f.indirector as usize,
            None => 0,
        }
    }
}

pub(crate) struct DataPool<'a> {
    pub memory: &'a mut Memory,
}

impl ConstAlloc for DataPool<'_> {
    fn alloc(&mut self, bytes: &[u8], align: usize) -> Option<usize> {
        self.memory.alloc_data(bytes, align)
    }
}

/// The runtime entry points emitted code calls.
pub(crate) fn runtime_hooks() -> RuntimeHooks {
    RuntimeHooks {
        exception_builtin: exception::exception_builtin as usize,
        exception_throw: unwind::exception_throw as usize,
        memcpy: libc::memcpy as usize,
        memmove: libc::memmove as usize,
        memset: libc::memset as usize,
    }
}

/// The result of placing one body into executable memory.
pub(crate) struct CompiledCode {
    pub entry: *const u8,
    pub range: (usize, usize),
    pub marks: Vec<(usize, i64)>,
}

/// Compile `body` into executable memory and return the entry pointer and
/// published range. Grows the reservation and retries when the body
/// outgrows it.
pub(crate) fn compile_into_memory(
    body: &mut Box<FunctionBody>,
    isa: &'static dyn TargetIsa,
    memory: &mut Memory,
    functions: &PrimaryMap<FuncId, Option<Box<Function>>>,
) -> Result<CompiledCode, JitError> {
    let mut estimate = body.insts.len() * 160 + 1024;
    loop {
        let (base, capacity) = memory.start_code(estimate)?;
        let result = {
            let mut buf = unsafe { CodeBuffer::new(base, capacity) };
            let resolver = ContextResolver { functions };
            let mut consts = DataPool {
                memory: &mut *memory,
            };
            let mut env = CompileEnv {
                hooks: runtime_hooks(),
                resolver: &resolver,
                consts: &mut consts,
            };
            compile_body(body, isa, &mut buf, &mut env)
        };
        match result {
            Ok(info) => {
                memory.commit_code(base, info.code_size as usize);
                Memory::flush_exec(base, info.code_size as usize);
                let entry = unsafe { base.add(info.entry_offset as usize) };
                debug!(
                    "compiled function: {} bytes, entry at {:#x}",
                    info.code_size, entry as usize
                );
                let marks = info
                    .marks
                    .iter()
                    .map(|&(off, mark)| (base as usize + off as usize, mark))
                    .collect();
                return Ok(CompiledCode {
                    entry: entry as *const u8,
                    range: (base as usize, info.code_size as usize),
                    marks,
                });
            }
            Err(CodegenError::CodeTooLarge) => {
                trace!("code region of {estimate:#x} bytes too small, retrying");
                estimate *= 2;
            }
            Err(e) => return Err(JitError::Codegen(e)),
        }
    }
}
