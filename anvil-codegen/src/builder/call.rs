//! Calls, returns and outgoing-parameter plumbing.
//!
//! All call forms share a skeleton: convert arguments to the signature's
//! types, stash the exception frame state, let the calling convention place
//! each argument, emit the call opcode, then receive the return value and
//! restore the exception state. Tail calls that cannot be performed safely
//! demote silently to normal calls.

use smallvec::SmallVec;

use crate::abi::{sysv64, x86 as abi_x86, ArgClass, ParamDesc, RetLoc};
use crate::ir::insn::{FuncRef, InstData, InstFlags, Slot};
use crate::ir::sig::Signature;
use crate::ir::types::{Type, TypeKind};
use crate::ir::value::Value;
use crate::ir::{FunctionBody, Label, Opcode, PtrWidth};
use crate::{CodegenError, CodegenResult};

/// Flags modifying a call site.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct CallFlags(u8);

impl CallFlags {
    /// No special behavior.
    pub const NONE: CallFlags = CallFlags(0);
    /// The callee never throws.
    pub const NOTHROW: CallFlags = CallFlags(1);
    /// The callee never returns normally.
    pub const NORETURN: CallFlags = CallFlags(2);
    /// Perform the call as a tail call when legal.
    pub const TAIL: CallFlags = CallFlags(4);

    /// Test whether all bits of `other` are set.
    pub fn contains(self, other: CallFlags) -> bool {
        self.0 & other.0 == other.0
    }

    fn remove(&mut self, other: CallFlags) {
        self.0 &= !other.0;
    }

    fn insert(&mut self, other: CallFlags) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for CallFlags {
    type Output = CallFlags;

    fn bitor(self, rhs: CallFlags) -> CallFlags {
        CallFlags(self.0 | rhs.0)
    }
}

/// What a call site needs to know about a JIT callee.
#[derive(Clone)]
pub struct CalleeInfo {
    /// The callee's reference, resolved to an address at emission time.
    pub func: FuncRef,
    /// The callee's signature.
    pub signature: Signature,
    /// Whether the callee is a nested function.
    pub is_nested: bool,
    /// The callee is known not to throw.
    pub no_throw: bool,
    /// The callee is known not to return.
    pub no_return: bool,
}

/// The placement of one call's arguments and return value.
struct CallPlan {
    return_value: Option<Value>,
    ret_loc: RetLoc,
    stack_bytes: u32,
}

impl FunctionBody {
    // ---- public call forms ----------------------------------------------

    /// Call another JIT function. `name` is diagnostic only.
    pub fn call(
        &mut self,
        name: Option<&str>,
        callee: &CalleeInfo,
        args: &[Value],
        mut flags: CallFlags,
    ) -> CodegenResult<Value> {
        let signature = callee.signature.clone();

        // Verify that a tail call is actually possible; demote silently
        // when it is not.
        if flags.contains(CallFlags::TAIL) {
            if self.parent_frame.is_some() || callee.is_nested {
                flags.remove(CallFlags::TAIL);
            } else if !signature.identical(&self.signature, self.ptr_width) {
                flags.remove(CallFlags::TAIL);
            } else if self.any_stack_args(&signature) {
                // The incoming argument area cannot be rewritten in place.
                flags.remove(CallFlags::TAIL);
            }
        }

        let args = self.convert_call_parameters(&signature, args)?;

        if callee.no_throw {
            flags.insert(CallFlags::NOTHROW);
        }
        if callee.no_return {
            flags.insert(CallFlags::NORETURN);
        }

        // A tail call to ourselves becomes a branch back to the entry.
        if flags.contains(CallFlags::TAIL) && Some(callee.func) == self.self_ref {
            for (i, arg) in args.iter().enumerate() {
                let param = self
                    .param(i)
                    .ok_or(CodegenError::Malformed("argument count mismatch"))?;
                // Duplicate first so swapped arguments don't trample each
                // other.
                let dup = self.dup(*arg)?;
                self.store(param, dup)?;
            }
            let mut entry = Label::UNDEFINED;
            let mut end = Label::UNDEFINED;
            self.branch(&mut entry)?;
            self.label_tight(&mut entry)?;
            self.label(&mut end)?;
            self.move_blocks_to_start(entry, end)?;
            self.has_tail_call = true;
            return self.handle_return(&signature, flags, None, RetLoc::Void);
        }

        self.setup_eh_frame_for_call(flags)?;
        let plan = self.create_call_setup_insns(&signature, &args, callee.is_nested, flags)?;

        self.non_leaf = true;
        let mut insn = InstData::new(if flags.contains(CallFlags::TAIL) {
            self.has_tail_call = true;
            Opcode::CallTail
        } else {
            Opcode::Call
        });
        insn.flags =
            InstFlags::DEST_IS_FUNCTION | InstFlags::VALUE1_IS_NAME | InstFlags::VALUE2_IS_SIGNATURE;
        insn.dest = Slot::Func(callee.func);
        insn.value1 = Slot::Name(name.unwrap_or("").into());
        insn.value2 = Slot::Sig(signature.0.clone());
        self.add_insn(insn);

        self.finish_call(&signature, flags, plan)
    }

    /// Call through a function pointer value.
    pub fn call_indirect(
        &mut self,
        target: Value,
        signature: &Signature,
        args: &[Value],
        mut flags: CallFlags,
    ) -> CodegenResult<Value> {
        // Indirect targets are never known to be ourselves.
        if flags.contains(CallFlags::TAIL)
            && (self.parent_frame.is_some()
                || !signature.identical(&self.signature, self.ptr_width)
                || self.any_stack_args(signature))
        {
            flags.remove(CallFlags::TAIL);
        }
        let args = self.convert_call_parameters(signature, args)?;
        self.setup_eh_frame_for_call(flags)?;
        let plan = self.create_call_setup_insns(signature, &args, false, flags)?;

        self.non_leaf = true;
        let target = self.convert(target, Type::Ptr, false)?;
        self.value_ref(target);
        let mut insn = InstData::new(if flags.contains(CallFlags::TAIL) {
            self.has_tail_call = true;
            Opcode::CallIndirectTail
        } else {
            Opcode::CallIndirect
        });
        insn.flags = InstFlags::VALUE2_IS_SIGNATURE;
        insn.value1 = Slot::Value(target);
        insn.value2 = Slot::Sig(signature.0.clone());
        self.add_insn(insn);

        self.finish_call(signature, flags, plan)
    }

    /// Call through a vtable pointer. Like an indirect call but the target
    /// is trusted to be a JIT entry point.
    pub fn call_vtable(
        &mut self,
        target: Value,
        signature: &Signature,
        args: &[Value],
        mut flags: CallFlags,
    ) -> CodegenResult<Value> {
        if flags.contains(CallFlags::TAIL)
            && (self.parent_frame.is_some()
                || !signature.identical(&self.signature, self.ptr_width)
                || self.any_stack_args(signature))
        {
            flags.remove(CallFlags::TAIL);
        }
        let args = self.convert_call_parameters(signature, args)?;
        self.setup_eh_frame_for_call(flags)?;
        let plan = self.create_call_setup_insns(signature, &args, false, flags)?;

        self.non_leaf = true;
        let target = self.convert(target, Type::Ptr, false)?;
        self.value_ref(target);
        let mut insn = InstData::new(if flags.contains(CallFlags::TAIL) {
            self.has_tail_call = true;
            Opcode::CallVtablePtrTail
        } else {
            Opcode::CallVtablePtr
        });
        insn.flags = InstFlags::VALUE2_IS_SIGNATURE;
        insn.value1 = Slot::Value(target);
        insn.value2 = Slot::Sig(signature.0.clone());
        self.add_insn(insn);

        self.finish_call(signature, flags, plan)
    }

    /// Call a native C function at a known address.
    pub fn call_native(
        &mut self,
        name: &str,
        address: usize,
        signature: &Signature,
        args: &[Value],
        flags: CallFlags,
    ) -> CodegenResult<Value> {
        let args = self.convert_call_parameters(signature, args)?;
        self.setup_eh_frame_for_call(flags)?;
        let plan = self.create_call_setup_insns(signature, &args, false, flags)?;

        self.non_leaf = true;
        let mut insn = InstData::new(if flags.contains(CallFlags::TAIL) {
            Opcode::CallExternalTail
        } else {
            Opcode::CallExternal
        });
        insn.flags =
            InstFlags::DEST_IS_NATIVE | InstFlags::VALUE1_IS_NAME | InstFlags::VALUE2_IS_SIGNATURE;
        insn.dest = Slot::Native(address);
        insn.value1 = Slot::Name(name.into());
        insn.value2 = Slot::Sig(signature.0.clone());
        self.add_insn(insn);

        self.finish_call(signature, flags, plan)
    }

    /// Call a runtime intrinsic standing in for an operation the target
    /// cannot emit directly.
    pub(crate) fn call_intrinsic(
        &mut self,
        name: &str,
        address: usize,
        param_tys: &[Type],
        ret_ty: Type,
        args: &[Value],
        may_throw: bool,
    ) -> CodegenResult<Value> {
        let sig = Signature::new(crate::ir::Abi::Cdecl, ret_ty, param_tys.to_vec());
        let flags = if may_throw {
            CallFlags::NONE
        } else {
            CallFlags::NOTHROW
        };
        self.call_native(name, address, &sig, args, flags)
    }

    // ---- shared skeleton -------------------------------------------------

    fn any_stack_args(&self, signature: &Signature) -> bool {
        match self.ptr_width {
            PtrWidth::P64 => {
                let mut state = sysv64::PassingState::new();
                if sysv64::classify_return(&signature.ret).is_memory() {
                    let mut p = ParamDesc::new(None);
                    sysv64::classify_param(&mut state, &mut p, &Type::Ptr);
                }
                signature.params.iter().any(|ty| {
                    let mut p = ParamDesc::new(None);
                    sysv64::classify_param(&mut state, &mut p, ty);
                    p.arg_class == ArgClass::Stack
                })
            }
            // Everything is on the stack in the 32-bit conventions.
            PtrWidth::P32 => !signature.params.is_empty(),
        }
    }

    fn convert_call_parameters(
        &mut self,
        signature: &Signature,
        args: &[Value],
    ) -> CodegenResult<SmallVec<[Value; 8]>> {
        if args.len() != signature.params.len() {
            return Err(CodegenError::Malformed("argument count mismatch"));
        }
        let mut out = SmallVec::with_capacity(args.len());
        for (arg, ty) in args.iter().zip(signature.params.iter()) {
            out.push(self.convert(*arg, ty.clone(), false)?);
        }
        Ok(out)
    }

    /// Stash the current PC into the active unwind frame before a call
    /// that may throw, so the catcher can be found from the handler.
    pub(crate) fn setup_eh_frame_for_call(&mut self, flags: CallFlags) -> CodegenResult<()> {
        if flags.contains(CallFlags::TAIL) && self.has_try {
            if let Some(eh) = self.eh {
                let sig = Signature::new(crate::ir::Abi::Cdecl, Type::Void, vec![]);
                self.call_native("unwind_pop_frame", eh.pop_frame, &sig, &[], CallFlags::NOTHROW)?;
            }
        }
        if flags.contains(CallFlags::NOTHROW) || flags.contains(CallFlags::TAIL) {
            return Ok(());
        }
        self.may_throw = true;
        if let (Some(setjmp_value), Some(eh)) = (self.setjmp_value, self.eh) {
            let pc = self.create_temporary(Type::Ptr);
            let mut insn = InstData::new(Opcode::LoadPc);
            insn.dest = Slot::Value(pc);
            self.add_insn(insn);
            let addr = self.address_of(setjmp_value)?;
            self.store_relative(addr, eh.catch_pc_offset, pc)?;
        }
        Ok(())
    }

    /// Clear the stashed PC after the call returns normally.
    pub(crate) fn restore_eh_frame_after_call(&mut self, flags: CallFlags) -> CodegenResult<()> {
        if flags.contains(CallFlags::NOTHROW)
            || flags.contains(CallFlags::NORETURN)
            || flags.contains(CallFlags::TAIL)
        {
            return Ok(());
        }
        if let (Some(setjmp_value), Some(eh)) = (self.setjmp_value, self.eh) {
            let null = self.const_nint(Type::Ptr, 0);
            let addr = self.address_of(setjmp_value)?;
            self.store_relative(addr, eh.catch_pc_offset, null)?;
        }
        Ok(())
    }

    /// Classify every argument and emit the per-parameter setup: stack
    /// stores first (they use scratch registers freely), then register
    /// moves.
    fn create_call_setup_insns(
        &mut self,
        signature: &Signature,
        args: &[Value],
        is_nested: bool,
        flags: CallFlags,
    ) -> CodegenResult<CallPlan> {
        match self.ptr_width {
            PtrWidth::P64 => self.setup_sysv64(signature, args, is_nested, flags),
            PtrWidth::P32 => self.setup_x86(signature, args, flags),
        }
    }

    fn setup_sysv64(
        &mut self,
        signature: &Signature,
        args: &[Value],
        is_nested: bool,
        _flags: CallFlags,
    ) -> CodegenResult<CallPlan> {
        let mut state = sysv64::PassingState::new();
        let ret_loc = sysv64::classify_return(&signature.ret);
        let mut descs: Vec<(ParamDesc, Value, Type)> = Vec::new();
        let mut return_value = None;

        if ret_loc.is_memory() {
            let rv = self.create_value(signature.ret.clone());
            let addr = self.address_of(rv)?;
            return_value = Some(rv);
            let mut p = ParamDesc::new(Some(addr));
            sysv64::classify_param(&mut state, &mut p, &Type::Ptr);
            descs.push((p, addr, Type::Ptr));
        }

        for (arg, ty) in args.iter().zip(signature.params.iter()) {
            let mut p = ParamDesc::new(Some(*arg));
            sysv64::classify_param(&mut state, &mut p, ty);
            descs.push((p, *arg, ty.clone()));
        }

        let mut plain: Vec<ParamDesc> = descs.iter().map(|(p, _, _)| p.clone()).collect();
        let stack_bytes = sysv64::finish_call_layout(&mut state, &mut plain);
        for (slot, padded) in descs.iter_mut().zip(plain.into_iter()) {
            slot.0 = padded;
        }
        self.note_param_area(stack_bytes);

        // Stack-passed arguments first.
        for (desc, value, ty) in descs.iter().filter(|(p, _, _)| p.arg_class == ArgClass::Stack) {
            self.emit_set_param(*value, ty, desc.offset)?;
        }
        // Then register arguments.
        for (desc, value, _) in &descs {
            if let ArgClass::Reg(n) = desc.arg_class {
                for part in 0..n {
                    self.emit_outgoing_reg(*value, desc.regs[part as usize].reg, part)?;
                }
            }
        }
        // Nested callees receive the parent frame in the static chain
        // register.
        if is_nested {
            let frame = match self.parent_frame {
                Some(f) => self.load(f)?,
                None => self.get_frame_pointer()?,
            };
            self.emit_outgoing_reg(frame, crate::regs::x64::R10, 0)?;
        }

        Ok(CallPlan {
            return_value,
            ret_loc,
            stack_bytes,
        })
    }

    fn setup_x86(
        &mut self,
        signature: &Signature,
        args: &[Value],
        _flags: CallFlags,
    ) -> CodegenResult<CallPlan> {
        let mut state = abi_x86::PassingState::new(signature.abi);
        let ret_loc = abi_x86::classify_return(&signature.ret);
        let mut descs: Vec<(ParamDesc, Value, Type)> = Vec::new();
        let mut return_value = None;

        for (arg, ty) in args.iter().zip(signature.params.iter()) {
            let mut p = ParamDesc::new(Some(*arg));
            abi_x86::classify_param(&mut state, &mut p, ty);
            descs.push((p, *arg, ty.clone()));
        }

        // Push stack arguments right to left.
        for (desc, value, ty) in descs.iter().rev() {
            if desc.arg_class == ArgClass::Stack {
                self.emit_push(*value, ty)?;
            }
        }
        // The hidden return pointer is pushed last, as the first argument.
        if ret_loc.is_memory() {
            let rv = self.create_value(signature.ret.clone());
            let addr = self.address_of(rv)?;
            return_value = Some(rv);
            self.emit_push(addr, &Type::Ptr)?;
        }
        for (desc, value, _) in &descs {
            if let ArgClass::Reg(_) = desc.arg_class {
                self.emit_outgoing_reg(*value, desc.regs[0].reg, 0)?;
            }
        }

        let hidden = if ret_loc.is_memory() { 4 } else { 0 };
        Ok(CallPlan {
            return_value,
            ret_loc,
            stack_bytes: state.stack_size + hidden,
        })
    }

    fn emit_set_param(&mut self, value: Value, ty: &Type, offset: u32) -> CodegenResult<()> {
        let op = match ty.normalize(self.ptr_width).kind() {
            TypeKind::Float32 => Opcode::SetParamFloat32,
            TypeKind::Float64 => Opcode::SetParamFloat64,
            TypeKind::NFloat => Opcode::SetParamNFloat,
            TypeKind::Struct | TypeKind::Union => Opcode::SetParamStruct,
            TypeKind::Long | TypeKind::ULong => Opcode::SetParamLong,
            _ => Opcode::SetParamInt,
        };
        let off = self.const_nint(Type::NInt, offset as i64);
        self.create_note(op, value, off);
        Ok(())
    }

    fn emit_push(&mut self, value: Value, ty: &Type) -> CodegenResult<()> {
        let op = match ty.normalize(self.ptr_width).kind() {
            TypeKind::Float32 => Opcode::PushFloat32,
            TypeKind::Float64 => Opcode::PushFloat64,
            TypeKind::NFloat => Opcode::PushNFloat,
            TypeKind::Struct | TypeKind::Union => Opcode::PushStruct,
            TypeKind::Long | TypeKind::ULong => Opcode::PushLong,
            _ => Opcode::PushInt,
        };
        self.create_unary_note(op, value);
        Ok(())
    }

    fn emit_outgoing_reg(&mut self, value: Value, reg: u8, part: u8) -> CodegenResult<()> {
        let packed = self.const_nint(Type::NInt, (reg as i64) | ((part as i64) << 8));
        self.create_note(Opcode::OutgoingReg, value, packed);
        Ok(())
    }

    fn finish_call(
        &mut self,
        signature: &Signature,
        flags: CallFlags,
        plan: CallPlan,
    ) -> CodegenResult<Value> {
        // 32-bit caller-pop conventions clean the stack lazily. The hidden
        // return pointer is popped by the callee on every convention.
        if self.ptr_width == PtrWidth::P32 && plan.stack_bytes > 0 {
            let hidden = if plan.return_value.is_some() { 4 } else { 0 };
            let arg_bytes = plan.stack_bytes - hidden;
            let caller_pops = if signature.abi.callee_pops() { 0 } else { arg_bytes };
            if caller_pops > 0 && !flags.contains(CallFlags::TAIL) {
                self.defer_pop_stack((caller_pops / 4) as i64)?;
            }
        }
        self.handle_return(signature, flags, plan.return_value, plan.ret_loc)
    }

    fn handle_return(
        &mut self,
        signature: &Signature,
        flags: CallFlags,
        return_value: Option<Value>,
        ret_loc: RetLoc,
    ) -> CodegenResult<Value> {
        if flags.contains(CallFlags::NORETURN) || flags.contains(CallFlags::TAIL) {
            self.blocks[self.current_block].ends_in_dead = true;
        }
        // Exceptional control flow ends the basic block.
        if !flags.contains(CallFlags::NOTHROW) || self.blocks[self.current_block].ends_in_dead {
            self.new_block();
        }
        let return_value = match return_value {
            Some(v) => v,
            None => self.create_value(signature.ret.clone()),
        };
        if !flags.contains(CallFlags::TAIL) {
            self.receive_return(return_value, ret_loc)?;
        }
        self.restore_eh_frame_after_call(flags)?;
        Ok(return_value)
    }

    fn receive_return(&mut self, value: Value, ret_loc: RetLoc) -> CodegenResult<()> {
        let mut pair = |body: &mut Self, lo: u8, hi: u8| {
            body.emit_return_reg(value, lo, 0);
            body.emit_return_reg(value, hi, 1);
        };
        match ret_loc {
            RetLoc::Void | RetLoc::Memory => {}
            RetLoc::Gpr(reg) | RetLoc::Xmm(reg) => self.emit_return_reg(value, reg, 0),
            RetLoc::GprPair(lo, hi)
            | RetLoc::XmmPair(lo, hi)
            | RetLoc::GprXmm(lo, hi)
            | RetLoc::XmmGpr(lo, hi) => pair(self, lo, hi),
            RetLoc::X87 => {
                let st0 = match self.ptr_width {
                    PtrWidth::P64 => crate::regs::x64::ST0,
                    PtrWidth::P32 => crate::regs::x86::ST0,
                };
                self.emit_return_reg(value, st0, 0);
            }
        }
        Ok(())
    }

    fn emit_return_reg(&mut self, value: Value, reg: u8, part: u8) {
        let packed = self.const_nint(Type::NInt, (reg as i64) | ((part as i64) << 8));
        self.create_note(Opcode::ReturnReg, value, packed);
    }

    // ---- returns ---------------------------------------------------------

    /// Return `value` (or void) from the function.
    pub fn return_(&mut self, value: Option<Value>) -> CodegenResult<()> {
        self.pop_unwind_frame_if_needed()?;
        self.ordinary_return = true;

        let ret_ty = self
            .signature
            .ret
            .normalize(self.ptr_width)
            .promote_int();
        match (value, ret_ty.kind()) {
            (None, _) | (_, TypeKind::Void) => {
                self.create_noarg_note(Opcode::Return);
            }
            (Some(value), kind) => {
                let value = self.convert(value, self.signature.ret.clone(), false)?;
                match kind {
                    TypeKind::Int | TypeKind::UInt => {
                        self.create_unary_note(Opcode::ReturnInt, value)
                    }
                    TypeKind::Long | TypeKind::ULong => {
                        self.create_unary_note(Opcode::ReturnLong, value)
                    }
                    TypeKind::Float32 => self.create_unary_note(Opcode::ReturnFloat32, value),
                    TypeKind::Float64 => self.create_unary_note(Opcode::ReturnFloat64, value),
                    TypeKind::NFloat => self.create_unary_note(Opcode::ReturnNFloat, value),
                    TypeKind::Struct | TypeKind::Union => {
                        self.return_struct_value(value)?;
                    }
                    _ => return Err(CodegenError::UnsupportedType),
                }
            }
        }

        self.blocks[self.current_block].ends_in_dead = true;
        self.new_block();
        Ok(())
    }

    fn return_struct_value(&mut self, value: Value) -> CodegenResult<()> {
        let size = self.signature.ret.size(self.ptr_width);
        if let Some(ret_ptr) = self.struct_return {
            // Copy into the caller-supplied return area.
            let value_addr = self.address_of(value)?;
            let size_value = self.const_nint(Type::NInt, size as i64);
            self.memcpy(ret_ptr, value_addr, size_value)?;
            self.create_noarg_note(Opcode::Return);
        } else {
            let size_value = self.const_nint(Type::NInt, size as i64);
            self.create_note(Opcode::ReturnSmallStruct, value, size_value);
        }
        Ok(())
    }

    /// Return `*value` as the function's result; used for struct returns
    /// where only the address is at hand.
    pub fn return_ptr(&mut self, value: Value, ty: Type) -> CodegenResult<()> {
        let value = self.convert(value, Type::Ptr, false)?;
        if ty.is_aggregate() {
            self.pop_unwind_frame_if_needed()?;
            self.ordinary_return = true;
            let size = ty.size(self.ptr_width);
            if let Some(ret_ptr) = self.struct_return {
                let size_value = self.const_nint(Type::NInt, size as i64);
                self.memcpy(ret_ptr, value, size_value)?;
                self.create_noarg_note(Opcode::Return);
            } else {
                let tmp = self.load_relative(value, 0, ty)?;
                let size_value = self.const_nint(Type::NInt, size as i64);
                self.create_note(Opcode::ReturnSmallStruct, tmp, size_value);
            }
            self.blocks[self.current_block].ends_in_dead = true;
            self.new_block();
            Ok(())
        } else {
            let loaded = self.load_relative(value, 0, ty)?;
            self.return_(Some(loaded))
        }
    }

    /// Terminate the function with a default (void) return unless the
    /// current block is already dead. Returns whether a return was added.
    pub fn default_return(&mut self) -> CodegenResult<bool> {
        if self.current_is_dead() {
            return Ok(false);
        }
        self.return_(None)?;
        Ok(true)
    }

    fn pop_unwind_frame_if_needed(&mut self) -> CodegenResult<()> {
        if self.has_try {
            if let Some(eh) = self.eh {
                let sig = Signature::new(crate::ir::Abi::Cdecl, Type::Void, vec![]);
                self.call_native("unwind_pop_frame", eh.pop_frame, &sig, &[], CallFlags::NOTHROW)?;
            }
        }
        Ok(())
    }

    // ---- deferred stack pops --------------------------------------------

    /// Pop `n` stack items immediately.
    pub fn pop_stack(&mut self, n: i64) -> CodegenResult<()> {
        let v = self.const_nint(Type::NInt, n);
        self.create_unary_note(Opcode::PopStack, v);
        Ok(())
    }

    /// Schedule `n` stack items for popping at the next flush point.
    pub fn defer_pop_stack(&mut self, n: i64) -> CodegenResult<()> {
        self.deferred_pop_items += n;
        Ok(())
    }

    /// Pop all deferred items if at least `threshold` have accumulated.
    pub fn flush_defer_pop(&mut self, threshold: i64) -> CodegenResult<()> {
        let pending = self.deferred_pop_items;
        if pending >= threshold && pending > 0 {
            self.deferred_pop_items = 0;
            self.pop_stack(pending)?;
        }
        Ok(())
    }
}
