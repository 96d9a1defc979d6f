//! Calling JIT'd code from Rust: `apply` and its per-signature stubs.
//!
//! `apply` marshals an argument array through a small JIT'd *invoker* stub
//! emitted once per signature: the stub loads each argument from the array
//! into the registers or stack slots the calling convention demands, makes
//! the call, and stores the return value into the caller's buffer. The stub
//! also doubles as the exception blocker of the error model: it pushes an
//! unwind frame around the call and reports `0` instead of letting an
//! exception escape into Rust frames.

use anvil_codegen::abi::sysv64::{classify_param, classify_return, finish_call_layout, PassingState};
use anvil_codegen::abi::{ArgClass, ParamDesc, RetLoc};
use anvil_codegen::binemit::CodeBuffer;
use anvil_codegen::fold::builtin;
use anvil_codegen::ir::types::{PtrWidth, Type, TypeKind};
use anvil_codegen::ir::{Abi, Signature};
use anvil_codegen::isa::x64::enc;
use anvil_codegen::regs::x64;
use std::sync::Arc;

use crate::context::{Context, ContextData, FuncId};
use crate::exception::builtin_exception_object;
use crate::unwind;
use crate::JitError;

/// The native shape of an invoker stub.
type Invoker = extern "C" fn(*const u8, *const *const u8, *mut u8) -> i32;

impl Context {
    /// Call `func` with the given arguments. Each element of `args` points
    /// at one argument value; `return_area` receives the result. Returns
    /// `false` when an exception escaped the function, in which case the
    /// exception object is available from
    /// [`unwind::exception_get_last`].
    ///
    /// Uncompiled functions are compiled on demand first. Apply acts as an
    /// exception blocker: exceptions never propagate past it into Rust
    /// frames.
    pub fn apply(
        &self,
        func: FuncId,
        args: &[*const u8],
        return_area: *mut u8,
    ) -> Result<bool, JitError> {
        let signature = self.signature(func)?;
        self.apply_vararg(func, &signature, args, return_area)
    }

    /// Like [`Context::apply`] with an explicit signature, for calling
    /// variadic functions with extra trailing arguments.
    pub fn apply_vararg(
        &self,
        func: FuncId,
        signature: &Signature,
        args: &[*const u8],
        return_area: *mut u8,
    ) -> Result<bool, JitError> {
        debug_assert_eq!(args.len(), signature.params.len());
        let (entry, invoker) = {
            let mut data = self.lock();
            if data.func(func)?.nested_parent.is_some() {
                // Nested functions cannot be entered from the outside.
                unwind::set_last_exception(builtin_exception_object(builtin::CALLED_NESTED));
                return Ok(false);
            }
            if !data.func(func)?.is_compiled {
                if data.func(func)?.builder.is_none() {
                    return Err(JitError::CompileFailed);
                }
                data.compile(func)?;
            }
            let entry = data.func(func)?.entry_address();
            let invoker = data.invoker_for(signature)?;
            (entry, invoker)
        };
        // The lock must be released before entering JIT'd code: the callee
        // may reach an uncompiled function whose redirector takes it again.
        unwind::clear_last_exception();
        let invoker: Invoker = unsafe { std::mem::transmute(invoker) };
        Ok(invoker(entry, args.as_ptr(), return_area) != 0)
    }
}

impl ContextData {
    /// The invoker stub for `signature`, emitting it on first use.
    pub(crate) fn invoker_for(&mut self, signature: &Signature) -> Result<usize, JitError> {
        debug_assert_eq!(self.isa.ptr_width(), PtrWidth::P64);
        let key = Arc::as_ptr(&signature.0) as usize;
        if let Some(&stub) = self.invokers.get(&key) {
            return Ok(stub);
        }
        let estimate = 256 + signature.params.len() * 64;
        let stub = self.memory.alloc_stub(estimate)?;
        let mut buf = unsafe { CodeBuffer::new(stub, estimate) };
        emit_invoker(&mut buf, signature);
        if buf.overflowed() {
            return Err(JitError::OutOfMemory);
        }
        crate::memory::Memory::flush_exec(stub, estimate);
        self.invokers.insert(key, stub as usize);
        Ok(stub as usize)
    }
}

/// Offset of the unwind frame below the frame pointer (under the five
/// saved callee registers).
const FRAME_OFF: i32 = -88;

/// Hardware encodings used below: rsp, rbp and the argument/scratch set.
const RSP: u8 = 4;
const RBP: u8 = 5;

fn emit_invoker(b: &mut CodeBuffer, signature: &Signature) {
    // Classify the whole argument list up front.
    let mut state = PassingState::new();
    let ret_loc = classify_return(&signature.ret);
    let mut descs: Vec<(ParamDesc, Option<usize>, Type)> = Vec::new();
    if ret_loc.is_memory() {
        let mut p = ParamDesc::new(None);
        classify_param(&mut state, &mut p, &Type::Ptr);
        descs.push((p, None, Type::Ptr));
    }
    for (i, ty) in signature.params.iter().enumerate() {
        let mut p = ParamDesc::new(None);
        classify_param(&mut state, &mut p, ty);
        descs.push((p, Some(i), ty.clone()));
    }
    let mut plain: Vec<ParamDesc> = descs.iter().map(|(p, _, _)| p.clone()).collect();
    let stack_bytes = finish_call_layout(&mut state, &mut plain);
    for (slot, padded) in descs.iter_mut().zip(plain.into_iter()) {
        slot.0 = padded;
    }

    // Prologue: save the whole callee-saved set. An exception unwinding
    // through native frames skips their epilogues, so this blocker is
    // where the caller's register state gets made whole again.
    enc::push_reg(b, RBP);
    enc::mov_reg_reg(b, RBP, RSP, 8);
    enc::push_reg(b, 3); // rbx <- args array
    enc::push_reg(b, 12); // r12 <- entry
    enc::push_reg(b, 13); // r13 <- return area
    enc::push_reg(b, 14);
    enc::push_reg(b, 15);
    enc::mov_reg_reg(b, 12, 7, 8);
    enc::mov_reg_reg(b, 3, 6, 8);
    enc::mov_reg_reg(b, 13, 2, 8);
    // 48 bytes of unwind frame, 8 of alignment, plus the argument area.
    let frame = stack_bytes as i32 + 56;
    enc::alu_reg_imm(b, enc::Alu::Sub, RSP, frame, 8);

    // Become an exception blocker: push an unwind frame and capture the
    // resume context in it.
    enc::lea_reg_membase(b, 7, RBP, FRAME_OFF);
    enc::mov_reg_imm(b, 0, unwind::unwind_push_frame as usize as i64, 8);
    enc::call_reg(b, 0);
    enc::lea_reg_membase(b, 1, RBP, FRAME_OFF);
    enc::lea_reg_rip(b, 11, 0);
    let capture_disp = b.offset() - 4;
    enc::mov_membase_reg(b, 1, 16, 11, 8);
    enc::mov_membase_reg(b, 1, 0, RSP, 8);
    enc::mov_membase_reg(b, 1, 8, RBP, 8);
    enc::clear_reg(b, 0);
    let resume = b.offset();
    b.patch_u32_at(capture_disp, resume - (capture_disp + 4));
    enc::test_reg_reg(b, 0, 0, 4);
    // jnz exception-path
    b.put1(0x0F);
    b.put1(0x80 + enc::CC_NE);
    let exc_patch = b.offset();
    b.put4(0);

    // Stack-passed arguments first.
    for (desc, index, ty) in descs.iter() {
        if desc.arg_class != ArgClass::Stack {
            continue;
        }
        let index = index.expect("hidden return pointer is never stack class");
        enc::mov_reg_membase(b, 11, 3, (index * 8) as i32, 8);
        let size = ty.size(PtrWidth::P64).max(1);
        let mut copied = 0u32;
        let mut chunk = 8u32;
        while chunk > 0 {
            while copied + chunk <= size {
                enc::mov_reg_membase(b, 0, 11, copied as i32, chunk as u8);
                enc::mov_membase_reg(b, RSP, (desc.offset + copied) as i32, 0, chunk as u8);
                copied += chunk;
            }
            chunk /= 2;
        }
    }
    // Then register arguments.
    for (desc, index, ty) in descs.iter() {
        let n = match desc.arg_class {
            ArgClass::Reg(n) => n,
            ArgClass::Stack => continue,
        };
        let Some(index) = index else {
            // The hidden struct-return pointer: forward the return area.
            enc::mov_reg_reg(b, 7, 13, 8);
            continue;
        };
        enc::mov_reg_membase(b, 11, 3, (index * 8) as i32, 8);
        for part in 0..n {
            let reg = desc.regs[part as usize].reg;
            let e = x64::encoding(reg);
            let off = (part as i32) * 8;
            if x64::is_xmm(reg) {
                let double =
                    part > 0 || !matches!(ty.kind(), TypeKind::Float32);
                enc::movs_xreg_membase(b, e, 11, off, double);
            } else if n > 1 || ty.is_aggregate() {
                enc::mov_reg_membase(b, e, 11, off, 8);
            } else {
                match ty.size(PtrWidth::P64).max(1) {
                    1 => enc::movzx_reg_membase(b, e, 11, 0, 1),
                    2 => enc::movzx_reg_membase(b, e, 11, 0, 2),
                    4 => enc::mov_reg_membase(b, e, 11, 0, 4),
                    _ => enc::mov_reg_membase(b, e, 11, 0, 8),
                }
            }
        }
    }

    // Variadic callees expect the number of vector arguments in al.
    if signature.abi == Abi::VarArg {
        let xmm_args = state.float_index as i64;
        enc::mov_reg_imm(b, 0, xmm_args, 4);
    }

    enc::call_reg(b, 12);

    // Store the return value.
    match ret_loc {
        RetLoc::Void | RetLoc::Memory => {}
        RetLoc::Gpr(_) => {
            let size = signature.ret.size(PtrWidth::P64).clamp(1, 8) as u8;
            enc::mov_membase_reg(b, 13, 0, 0, size);
        }
        RetLoc::GprPair(_, _) => {
            enc::mov_membase_reg(b, 13, 0, 0, 8);
            enc::mov_membase_reg(b, 13, 8, 2, 8);
        }
        RetLoc::Xmm(_) => {
            let double = !matches!(signature.ret.kind(), TypeKind::Float32);
            enc::movs_membase_xreg(b, 13, 0, 0, double);
        }
        RetLoc::XmmPair(_, _) => {
            enc::movs_membase_xreg(b, 13, 0, 0, true);
            enc::movs_membase_xreg(b, 13, 8, 1, true);
        }
        RetLoc::GprXmm(_, _) => {
            enc::mov_membase_reg(b, 13, 0, 0, 8);
            enc::movs_membase_xreg(b, 13, 8, 0, true);
        }
        RetLoc::XmmGpr(_, _) => {
            enc::movs_membase_xreg(b, 13, 0, 0, true);
            enc::mov_membase_reg(b, 13, 8, 0, 8);
        }
        RetLoc::X87 => {
            enc::fstp_membase(b, 13, 0, 10);
        }
    }

    // Normal exit: unlink the blocker and report success.
    enc::mov_reg_imm(b, 0, unwind::unwind_pop_frame as usize as i64, 8);
    enc::call_reg(b, 0);
    enc::mov_reg_imm(b, 0, 1, 4);
    b.put1(0xE9);
    let out_patch = b.offset();
    b.put4(0);

    // Exception path: the throw restored our captured context.
    let exc = b.offset();
    b.patch_u32_at(exc_patch, exc - (exc_patch + 4));
    enc::mov_reg_imm(b, 0, unwind::unwind_pop_frame as usize as i64, 8);
    enc::call_reg(b, 0);
    enc::clear_reg(b, 0);

    // Common epilogue.
    let out = b.offset();
    b.patch_u32_at(out_patch, out - (out_patch + 4));
    enc::lea_reg_membase(b, RSP, RBP, -40);
    enc::pop_reg(b, 15);
    enc::pop_reg(b, 14);
    enc::pop_reg(b, 13);
    enc::pop_reg(b, 12);
    enc::pop_reg(b, 3);
    enc::pop_reg(b, RBP);
    enc::ret(b);
}
