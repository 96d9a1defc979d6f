//! The JIT context: function list, build lock, and the on-demand driver.

use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Mutex, MutexGuard};

use anvil_codegen::fold::builtin;
use anvil_codegen::ir::insn::FuncRef;
use anvil_codegen::ir::value::ValueFlags;
use anvil_codegen::ir::{FunctionBody, InstData, Opcode, PtrWidth, Signature, Slot, Type};
use anvil_codegen::isa::{self, TargetIsa};
use anvil_entity::{entity_impl, EntityRef, PrimaryMap};
use hashbrown::HashMap;
use log::{debug, trace};
use target_lexicon::Triple;

use crate::exception;
use crate::function::{compile_into_memory, Function};
use crate::memory::Memory;
use crate::trampoline;
use crate::unwind;
use crate::JitError;

/// An opaque reference to a function owned by a context.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(u32);
entity_impl!(FuncId, "f");

/// Result codes for on-demand compilers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnDemandResult {
    /// The body was built successfully.
    Ok,
    /// The body could not be built.
    CompileError,
    /// Allocation failed while building.
    OutOfMemory,
}

/// The callback invoked to build a function's body the first time it is
/// called. Runs with the context's build lock held.
pub type OnDemandCompiler = fn(&mut FunctionBody) -> OnDemandResult;

/// The identity a redirector passes to the on-demand driver.
pub struct Cookie {
    pub(crate) ctx: *const Mutex<ContextData>,
    pub(crate) func: FuncId,
}

pub(crate) struct ContextData {
    pub memory: Memory,
    pub functions: PrimaryMap<FuncId, Option<Box<Function>>>,
    /// Per-signature apply stubs, keyed by signature identity.
    pub invokers: HashMap<usize, usize>,
    pub isa: &'static dyn TargetIsa,
    self_ptr: *const Mutex<ContextData>,
}

unsafe impl Send for ContextData {}

/// A JIT context: process-wide state owning the code memory manager and
/// all functions created within it.
///
/// The context's internal lock is the build lock of the concurrency model:
/// function creation and destruction, trampoline allocation and the whole
/// on-demand compilation sequence run under it. Multiple threads may build
/// different functions by taking turns; compiled code runs without it.
pub struct Context {
    inner: Box<Mutex<ContextData>>,
}

impl Context {
    /// Create a context for the host machine.
    pub fn new() -> Context {
        let isa = isa::lookup(&Triple::host()).expect("unsupported host");
        exception::install_thrower();
        let inner = Box::new(Mutex::new(ContextData {
            memory: Memory::new(),
            functions: PrimaryMap::new(),
            invokers: HashMap::new(),
            isa,
            self_ptr: core::ptr::null(),
        }));
        let ptr = &*inner as *const Mutex<ContextData>;
        inner.lock().expect("fresh lock").self_ptr = ptr;
        Context { inner }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ContextData> {
        self.inner.lock().expect("context lock poisoned")
    }

    /// Create a new function with the given signature. The function's
    /// entry point initially targets its redirector, so calling it before
    /// compilation invokes the on-demand compiler.
    pub fn create_function(&self, signature: Signature) -> Result<FuncId, JitError> {
        let mut data = self.lock();
        data.create_function(signature, None)
    }

    /// Create a function nested inside `parent`, able to address its
    /// parent's locals through the parent frame pointer.
    pub fn create_nested_function(
        &self,
        signature: Signature,
        parent: FuncId,
    ) -> Result<FuncId, JitError> {
        let mut data = self.lock();
        data.func(parent)?;
        data.create_function(signature, Some(parent))
    }

    /// Run `build` against the function's body, creating the builder (and
    /// its incoming-parameter instructions) on first use.
    pub fn build<R>(
        &self,
        func: FuncId,
        build: impl FnOnce(&mut FunctionBody) -> R,
    ) -> Result<R, JitError> {
        let mut data = self.lock();
        let body = data.ensure_builder(func)?;
        Ok(build(body))
    }

    /// What a call site in another function needs to know about `func`.
    pub fn callee_info(&self, func: FuncId) -> Result<anvil_codegen::builder::call::CalleeInfo, JitError> {
        let data = self.lock();
        Ok(data.func(func)?.callee_info(func))
    }

    /// The function's signature.
    pub fn signature(&self, func: FuncId) -> Result<Signature, JitError> {
        let data = self.lock();
        Ok(data.func(func)?.signature.clone())
    }

    /// Compile the function's body into native code and publish the entry
    /// point. The builder is discarded; recompilable functions may build a
    /// fresh body and compile again.
    pub fn compile(&self, func: FuncId) -> Result<(), JitError> {
        let mut data = self.lock();
        data.compile(func)
    }

    /// Has the function been compiled?
    pub fn is_compiled(&self, func: FuncId) -> Result<bool, JitError> {
        Ok(self.lock().func(func)?.is_compiled)
    }

    /// Mark the function as a candidate for recompilation. Must be set
    /// before the first `compile` for existing callers to track the
    /// latest version.
    pub fn set_recompilable(&self, func: FuncId, recompilable: bool) -> Result<(), JitError> {
        self.lock().func_mut(func)?.is_recompilable = recompilable;
        Ok(())
    }

    /// Is the function recompilable?
    pub fn is_recompilable(&self, func: FuncId) -> Result<bool, JitError> {
        Ok(self.lock().func(func)?.is_recompilable)
    }

    /// Set the dynamic optimization level, clamped to the maximum.
    pub fn set_optimization_level(&self, func: FuncId, level: u32) -> Result<(), JitError> {
        let level = level.min(Self::max_optimization_level());
        self.lock().func_mut(func)?.optimization_level = level;
        Ok(())
    }

    /// The function's current optimization level.
    pub fn optimization_level(&self, func: FuncId) -> Result<u32, JitError> {
        Ok(self.lock().func(func)?.optimization_level)
    }

    /// The highest optimization level the library distinguishes.
    pub fn max_optimization_level() -> u32 {
        1
    }

    /// Install the on-demand compiler called when an uncompiled function
    /// is entered through its redirector.
    pub fn set_on_demand_compiler(
        &self,
        func: FuncId,
        compiler: OnDemandCompiler,
    ) -> Result<(), JitError> {
        self.lock().func_mut(func)?.on_demand = Some(compiler);
        Ok(())
    }

    /// Abandon a function mid-build: an uncompiled function is destroyed
    /// outright, a previously compiled one just loses the new builder.
    pub fn abandon(&self, func: FuncId) -> Result<(), JitError> {
        let mut data = self.lock();
        let f = data.func_mut(func)?;
        if f.is_compiled {
            f.builder = None;
            return Ok(());
        }
        let slot = f.redirector;
        data.functions[func] = None;
        data.memory.free_trampoline(slot);
        Ok(())
    }

    /// Convert the function into a native function pointer callable from
    /// C. Uncompiled and recompilable functions hand out the indirector so
    /// the pointer stays valid across (re)compilation.
    pub fn to_closure(&self, func: FuncId) -> Result<*const u8, JitError> {
        Ok(self.lock().func(func)?.closure_address())
    }

    /// The pointer stored into vtables; pairs with
    /// [`FunctionBody::call_vtable`].
    pub fn to_vtable_pointer(&self, func: FuncId) -> Result<*const u8, JitError> {
        self.to_closure(func)
    }

    /// Map a closure pointer back to the function that produced it.
    pub fn from_closure(&self, closure: *const u8) -> Option<FuncId> {
        self.lock().memory.find_function_info(closure as usize)
    }

    /// Map a vtable pointer back to its function.
    pub fn from_vtable_pointer(&self, ptr: *const u8) -> Option<FuncId> {
        self.from_closure(ptr)
    }

    /// Map an arbitrary instruction pointer to the containing function.
    pub fn function_from_pc(&self, pc: usize) -> Option<FuncId> {
        self.lock().memory.find_function_info(pc)
    }

    /// The bytecode offset recorded by the most recent `mark_offset` at or
    /// before `pc`, for stack traces and diagnostics.
    pub fn bytecode_offset_from_pc(&self, func: FuncId, pc: usize) -> Result<Option<i64>, JitError> {
        let data = self.lock();
        let marks = &data.func(func)?.bytecode_marks;
        Ok(marks
            .iter()
            .take_while(|&&(addr, _)| addr <= pc)
            .last()
            .map(|&(_, mark)| mark))
    }

    /// Import a value from `parent` into the nested function `func`,
    /// returning its address relative to the parent frame pointer.
    pub fn import_value(
        &self,
        func: FuncId,
        parent: FuncId,
        value: anvil_codegen::ir::Value,
    ) -> Result<anvil_codegen::ir::Value, JitError> {
        let mut data = self.lock();
        if data.func(func)?.nested_parent != Some(parent) {
            return Err(JitError::UnknownFunction);
        }
        let mut parent_body = data
            .func_mut(parent)?
            .builder
            .take()
            .ok_or(JitError::NoBuilder)?;
        let result = data
            .ensure_builder(func)
            .and_then(|body| body.import(&mut parent_body, value).map_err(JitError::from));
        data.func_mut(parent)?.builder = Some(parent_body);
        result
    }

    /// Iterate the functions of this context in creation order.
    pub fn functions(&self) -> Vec<FuncId> {
        let data = self.lock();
        data.functions
            .iter()
            .filter(|(_, f)| f.is_some())
            .map(|(id, _)| id)
            .collect()
    }

    /// Build a closure around a native handler: C code calling the
    /// returned pointer lands in `handler` with the register state packed
    /// into an apply buffer.
    pub fn create_closure(
        &self,
        handler: trampoline::ClosureHandler,
        user_data: *mut c_void,
    ) -> Result<*const u8, JitError> {
        let mut data = self.lock();
        let stub = data.memory.alloc_stub(trampoline::CLOSURE_SIZE)?;
        let entry = trampoline::create_closure(stub, handler, user_data);
        Memory::flush_exec(stub, trampoline::CLOSURE_SIZE);
        Ok(entry)
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::new()
    }
}

impl ContextData {
    pub(crate) fn func(&self, id: FuncId) -> Result<&Function, JitError> {
        self.functions
            .get(id)
            .and_then(|f| f.as_deref())
            .ok_or(JitError::UnknownFunction)
    }

    pub(crate) fn func_mut(&mut self, id: FuncId) -> Result<&mut Function, JitError> {
        self.functions
            .get_mut(id)
            .and_then(|f| f.as_deref_mut())
            .ok_or(JitError::UnknownFunction)
    }

    fn create_function(
        &mut self,
        signature: Signature,
        nested_parent: Option<FuncId>,
    ) -> Result<FuncId, JitError> {
        let id = self.functions.next_key();
        let slot = self.memory.alloc_trampoline()?;
        let indirector_base = unsafe { slot.add(trampoline::REDIRECTOR_SIZE) };

        let mut func = Box::new(Function {
            signature,
            entry: AtomicPtr::new(core::ptr::null_mut()),
            redirector: slot,
            indirector: indirector_base,
            optimization_level: 1,
            is_compiled: false,
            is_recompilable: false,
            has_try: false,
            no_throw: false,
            no_return: false,
            nested_parent,
            on_demand: None,
            builder: None,
            cookie: Box::new(Cookie {
                ctx: self.self_ptr,
                func: id,
            }),
            code_range: None,
            bytecode_marks: Vec::new(),
        });

        let cookie_ptr = &*func.cookie as *const Cookie as *mut c_void;
        let redirector = trampoline::create_redirector(slot, on_demand_driver, cookie_ptr);
        func.entry.store(redirector as *mut u8, Ordering::Release);
        trampoline::create_indirector(indirector_base, func.entry.as_ptr() as *const *const u8);
        Memory::flush_exec(slot, crate::memory::TRAMPOLINE_SLOT);

        // Trampoline addresses map back to the function for closure and
        // vtable reverse lookups.
        self.memory
            .register_function(slot as usize, crate::memory::TRAMPOLINE_SLOT, id);

        let pushed = self.functions.push(Some(func));
        debug_assert_eq!(pushed, id);
        debug!("created function {id}");
        Ok(id)
    }

    pub(crate) fn ensure_builder(&mut self, id: FuncId) -> Result<&mut FunctionBody, JitError> {
        let isa = self.isa;
        let nested = self.func(id)?.nested_parent;
        let func = self.func_mut(id)?;
        if func.builder.is_none() {
            let mut body = Box::new(FunctionBody::new(func.signature.clone(), isa));
            body.self_ref = Some(FuncRef::new(id.index()));
            isa.create_entry_insns(&mut body)?;
            if nested.is_some() {
                install_parent_frame(&mut body);
            }
            // User instructions start in a fresh block so initialization
            // code can be hoisted in front of them later.
            body.init_block = body.current_block;
            body.new_block();
            func.builder = Some(body);
        }
        Ok(self
            .func_mut(id)?
            .builder
            .as_deref_mut()
            .expect("just created"))
    }

    pub(crate) fn compile(&mut self, id: FuncId) -> Result<(), JitError> {
        // Detach the body so the function table stays borrowable for call
        // target resolution.
        let mut body = self
            .func_mut(id)?
            .builder
            .take()
            .ok_or(JitError::NoBuilder)?;
        let isa = self.isa;

        // Fall-through bodies return void rather than running off the end.
        body.flush_defer_pop(0)?;
        body.default_return()?;

        let code = compile_into_memory(&mut body, isa, &mut self.memory, &self.functions)?;
        self.memory.register_function(code.range.0, code.range.1, id);

        let func = self.func_mut(id)?;
        func.has_try = body.has_try;
        func.no_throw = !body.may_throw;
        func.no_return = !body.ordinary_return;
        func.code_range = Some(code.range);
        func.bytecode_marks = code.marks;
        func.is_compiled = true;
        // Publication: an aligned pointer store; indirector readers see
        // either the redirector or the finished code, never a torn value.
        func.entry.store(code.entry as *mut u8, Ordering::Release);
        debug!("published entry for {id} at {:#x}", code.entry as usize);
        Ok(())
    }
}

/// Give a nested function access to its parent's frame, passed in the
/// static-chain register.
fn install_parent_frame(body: &mut FunctionBody) {
    if body.ptr_width != PtrWidth::P64 {
        return;
    }
    let value = body.create_value(Type::Ptr);
    body.values[value].flags.insert(ValueFlags::PARAMETER);
    let reg = body.const_nint(Type::NInt, anvil_codegen::regs::x64::R10 as i64);
    let part = body.const_nint(Type::NInt, 0);
    let mut insn = InstData::new(Opcode::IncomingReg);
    insn.dest = Slot::Value(value);
    insn.value1 = Slot::Value(reg);
    insn.value2 = Slot::Value(part);
    body.add_insn(insn);
    body.parent_frame = Some(value);
}

/// The driver behind every redirector: compile on demand and return the
/// entry to jump to. Runs on whatever thread called the function.
pub(crate) extern "C" fn on_demand_driver(
    cookie: *mut c_void,
    _saved_args: *mut u8,
) -> *const u8 {
    let cookie = unsafe { &*(cookie as *const Cookie) };
    let mutex = unsafe { &*cookie.ctx };
    match drive_compile(mutex, cookie.func) {
        Ok(entry) => entry,
        Err(code) => exception::exception_builtin(code),
    }
}

fn drive_compile(mutex: &Mutex<ContextData>, id: FuncId) -> Result<*const u8, i32> {
    let mut data = mutex.lock().map_err(|_| builtin::COMPILE_ERROR)?;

    // Another thread may have won the race to this function.
    if let Ok(func) = data.func(id) {
        if func.is_compiled {
            return Ok(func.entry_address());
        }
    } else {
        return Err(builtin::COMPILE_ERROR);
    }

    trace!("on-demand compiling {id}");
    let compiler = data
        .func(id)
        .map_err(|_| builtin::COMPILE_ERROR)?
        .on_demand;
    if data.func(id).map_err(|_| builtin::COMPILE_ERROR)?.builder.is_none() {
        let Some(compiler) = compiler else {
            return Err(builtin::COMPILE_ERROR);
        };
        let body = data.ensure_builder(id).map_err(|_| builtin::OUT_OF_MEMORY)?;
        match compiler(body) {
            OnDemandResult::Ok => {}
            OnDemandResult::CompileError => return Err(builtin::COMPILE_ERROR),
            OnDemandResult::OutOfMemory => return Err(builtin::OUT_OF_MEMORY),
        }
    }
    data.compile(id).map_err(|e| match e {
        JitError::OutOfMemory => builtin::OUT_OF_MEMORY,
        _ => builtin::COMPILE_ERROR,
    })?;
    Ok(data.func(id).map_err(|_| builtin::COMPILE_ERROR)?.entry_address())
}
