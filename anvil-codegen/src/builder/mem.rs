//! Memory operations: value loads and stores, pointer-relative accesses
//! with offset folding, null checks, block copies and `alloca`.

use crate::ir::block::Block;
use crate::ir::insn::{InstData, InstFlags, Slot};
use crate::ir::types::{Type, TypeKind};
use crate::ir::value::{Value, ValueFlags};
use crate::ir::{FunctionBody, Opcode};
use crate::{CodegenError, CodegenResult};

/// The copy opcode moving a value of `kind` between locals.
fn copy_opcode(kind: TypeKind) -> Opcode {
    match kind {
        TypeKind::SByte | TypeKind::UByte => Opcode::CopyStoreByte,
        TypeKind::Short | TypeKind::UShort => Opcode::CopyStoreShort,
        TypeKind::Long | TypeKind::ULong => Opcode::CopyLong,
        TypeKind::Float32 => Opcode::CopyFloat32,
        TypeKind::Float64 => Opcode::CopyFloat64,
        TypeKind::NFloat => Opcode::CopyNFloat,
        TypeKind::Struct | TypeKind::Union => Opcode::CopyStruct,
        _ => Opcode::CopyInt,
    }
}

/// The load opcode reading a value of `kind` through a pointer.
fn load_relative_opcode(kind: TypeKind) -> Option<Opcode> {
    Some(match kind {
        TypeKind::SByte => Opcode::LoadRelativeSByte,
        TypeKind::UByte => Opcode::LoadRelativeUByte,
        TypeKind::Short => Opcode::LoadRelativeShort,
        TypeKind::UShort => Opcode::LoadRelativeUShort,
        TypeKind::Int | TypeKind::UInt => Opcode::LoadRelativeInt,
        TypeKind::Long | TypeKind::ULong => Opcode::LoadRelativeLong,
        TypeKind::Float32 => Opcode::LoadRelativeFloat32,
        TypeKind::Float64 => Opcode::LoadRelativeFloat64,
        TypeKind::NFloat => Opcode::LoadRelativeNFloat,
        TypeKind::Struct | TypeKind::Union => Opcode::LoadRelativeStruct,
        _ => return None,
    })
}

/// The store opcode writing a value of `kind` through a pointer.
fn store_relative_opcode(kind: TypeKind) -> Option<Opcode> {
    Some(match kind {
        TypeKind::SByte | TypeKind::UByte => Opcode::StoreRelativeByte,
        TypeKind::Short | TypeKind::UShort => Opcode::StoreRelativeShort,
        TypeKind::Int | TypeKind::UInt => Opcode::StoreRelativeInt,
        TypeKind::Long | TypeKind::ULong => Opcode::StoreRelativeLong,
        TypeKind::Float32 => Opcode::StoreRelativeFloat32,
        TypeKind::Float64 => Opcode::StoreRelativeFloat64,
        TypeKind::NFloat => Opcode::StoreRelativeNFloat,
        TypeKind::Struct | TypeKind::Union => Opcode::StoreRelativeStruct,
        _ => return None,
    })
}

impl FunctionBody {
    /// Load (duplicate) the current contents of `value` into a temporary.
    pub fn load(&mut self, value: Value) -> CodegenResult<Value> {
        let ty = self.values[value].ty.clone();
        let kind = ty.normalize(self.ptr_width).kind();
        Ok(self.apply_unary(copy_opcode(kind), value, ty))
    }

    /// An alias for [`FunctionBody::load`] matching the original API.
    pub fn dup(&mut self, value: Value) -> CodegenResult<Value> {
        self.load(value)
    }

    /// Store `value` into `dest` (an addressable local or parameter).
    pub fn store(&mut self, dest: Value, value: Value) -> CodegenResult<()> {
        let ty = self.values[dest].ty.clone();
        let value = self.convert(value, ty.clone(), false)?;
        let kind = ty.normalize(self.ptr_width).kind();
        self.value_ref(value);
        let mut insn = InstData::new(copy_opcode(kind));
        insn.dest = Slot::Value(dest);
        insn.value1 = Slot::Value(value);
        self.add_insn(insn);
        Ok(())
    }

    /// Find a dominating `address_of`/`add_relative` instruction defining
    /// `value` in the current block, for offset folding. Returns the
    /// instruction and whether it is the last instruction of the block.
    fn find_base_insn(&self, value: Value) -> Option<(crate::ir::Inst, Value, bool)> {
        let data = &self.values[value];
        if data.flags.contains(ValueFlags::ADDRESSABLE)
            || data.flags.contains(ValueFlags::VOLATILE)
        {
            return None;
        }
        let insns = &self.blocks[self.current_block].insns;
        let mut last = true;
        for (pos, &inst) in insns.iter().enumerate().rev() {
            let idata = &self.insts[inst];
            if idata.dest.value() == Some(value) {
                if idata.opcode == Opcode::AddressOf {
                    return Some((inst, value, last));
                }
                if idata.opcode == Opcode::AddRelative {
                    let base = idata.value1.value()?;
                    let bdata = &self.values[base];
                    if bdata.flags.contains(ValueFlags::ADDRESSABLE)
                        || bdata.flags.contains(ValueFlags::VOLATILE)
                    {
                        return None;
                    }
                    // The base must not be redefined between the
                    // add_relative and the operation being built.
                    for &later in &insns[pos + 1..] {
                        let ldata = &self.insts[later];
                        if ldata.dest.value() == Some(base) && ldata.defines_dest() {
                            return None;
                        }
                    }
                    return Some((inst, base, last));
                }
                if idata.defines_dest() {
                    // Redefinition blocks any earlier base instruction.
                    return None;
                }
            }
            last = false;
        }
        None
    }

    /// Fold `value + offset` against a dominating `add_relative`, and
    /// re-emit a trailing `address_of` so field accesses stay cheap for
    /// the code generator. Returns the effective base and offset.
    fn fold_relative(&mut self, mut value: Value, mut offset: i64) -> CodegenResult<(Value, i64)> {
        if let Some((inst, base, _last)) = self.find_base_insn(value) {
            if self.insts[inst].opcode == Opcode::AddRelative {
                let add_off = self.insts[inst]
                    .value2
                    .value()
                    .and_then(|v| self.values[v].nint_constant())
                    .unwrap_or(0);
                offset += add_off;
                value = base;
                if let Some((inst2, inner, last2)) = self.find_base_insn(value) {
                    if self.insts[inst2].opcode == Opcode::AddressOf && !last2 {
                        value = self.address_of(inner)?;
                    }
                }
            } else if !_last {
                // A non-trailing address_of: re-emit it just before the
                // memory operation.
                value = self.address_of(base)?;
            }
        }
        Ok((value, offset))
    }

    /// Load a value of `ty` from `*(value + offset)`.
    pub fn load_relative(
        &mut self,
        value: Value,
        offset: i64,
        ty: Type,
    ) -> CodegenResult<Value> {
        let (value, offset) = self.fold_relative(value, offset)?;
        let kind = ty.normalize(self.ptr_width).kind();
        let op = load_relative_opcode(kind).ok_or(CodegenError::UnsupportedType)?;
        let offset_value = self.const_nint(Type::NInt, offset);
        Ok(self.apply_binary(op, value, offset_value, ty))
    }

    /// Store `value` at `*(dest + offset)`.
    pub fn store_relative(
        &mut self,
        dest: Value,
        offset: i64,
        value: Value,
    ) -> CodegenResult<()> {
        let (dest, offset) = self.fold_relative(dest, offset)?;
        let kind = self.values[value].ty.normalize(self.ptr_width).kind();
        let op = store_relative_opcode(kind).ok_or(CodegenError::UnsupportedType)?;
        let offset_value = self.const_nint(Type::NInt, offset);
        self.value_ref(dest);
        self.value_ref(value);
        let mut insn = InstData::new(op);
        insn.flags = InstFlags::DEST_IS_VALUE;
        insn.dest = Slot::Value(dest);
        insn.value1 = Slot::Value(value);
        insn.value2 = Slot::Value(offset_value);
        self.add_insn(insn);
        Ok(())
    }

    /// Add a constant byte offset to a pointer. Consecutive adjustments on
    /// the same pointer collapse into one.
    pub fn add_relative(&mut self, value: Value, offset: i64) -> CodegenResult<Value> {
        let (value, offset) = {
            let mut v = value;
            let mut off = offset;
            if let Some((inst, base, _)) = self.find_base_insn(v) {
                if self.insts[inst].opcode == Opcode::AddRelative {
                    off += self.insts[inst]
                        .value2
                        .value()
                        .and_then(|x| self.values[x].nint_constant())
                        .unwrap_or(0);
                    v = base;
                }
            }
            (v, off)
        };
        let offset_value = self.const_nint(Type::NInt, offset);
        Ok(self.apply_binary(Opcode::AddRelative, value, offset_value, Type::Ptr))
    }

    /// Load an element of `elem_ty` at `base[index]`.
    pub fn load_elem(
        &mut self,
        base: Value,
        index: Value,
        elem_ty: Type,
    ) -> CodegenResult<Value> {
        let size = elem_ty.size(self.ptr_width) as i64;
        let index = self.convert(index, Type::NInt, false)?;
        if let Some(i) = self.values[index].nint_constant() {
            return self.load_relative(base, i * size, elem_ty);
        }
        let addr = self.element_address(base, index, size)?;
        self.load_relative(addr, 0, elem_ty)
    }

    /// The effective address of `base[index]` for elements of `elem_ty`.
    pub fn load_elem_address(
        &mut self,
        base: Value,
        index: Value,
        elem_ty: Type,
    ) -> CodegenResult<Value> {
        let size = elem_ty.size(self.ptr_width) as i64;
        let index = self.convert(index, Type::NInt, false)?;
        self.element_address(base, index, size)
    }

    /// Store `value` at `base[index]`.
    pub fn store_elem(&mut self, base: Value, index: Value, value: Value) -> CodegenResult<()> {
        let elem_ty = self.values[value].ty.clone();
        let size = elem_ty.size(self.ptr_width) as i64;
        let index = self.convert(index, Type::NInt, false)?;
        if let Some(i) = self.values[index].nint_constant() {
            return self.store_relative(base, i * size, value);
        }
        let addr = self.element_address(base, index, size)?;
        self.store_relative(addr, 0, value)
    }

    fn element_address(&mut self, base: Value, index: Value, size: i64) -> CodegenResult<Value> {
        let size_value = self.const_nint(Type::NInt, size);
        let offset = self.mul(index, size_value)?;
        self.add(base, offset)
    }

    /// Take the address of `value`, pinning it to a stack slot.
    pub fn address_of(&mut self, value: Value) -> CodegenResult<Value> {
        self.set_addressable(value);
        Ok(self.apply_unary(Opcode::AddressOf, value, Type::Ptr))
    }

    /// The current function's frame pointer.
    pub fn get_frame_pointer(&mut self) -> CodegenResult<Value> {
        let dest = self.create_temporary(Type::Ptr);
        let mut insn = InstData::new(Opcode::LoadFramePtr);
        insn.dest = Slot::Value(dest);
        self.add_insn(insn);
        Ok(dest)
    }

    /// Import a value from the parent of a nested function. The parent's
    /// value is pinned to its frame eagerly so the child can address it
    /// through the parent frame pointer.
    pub fn import(&mut self, parent: &mut FunctionBody, value: Value) -> CodegenResult<Value> {
        let frame = self
            .parent_frame
            .ok_or(CodegenError::Malformed("import outside a nested function"))?;
        parent.set_addressable(value);
        parent.pin_to_frame(value);
        let offset = parent.values[value].frame_offset as i64;
        self.add_relative(frame, offset)
    }

    /// Emit a null check on `value` unless it is a non-null constant.
    pub fn check_null(&mut self, value: Value) -> CodegenResult<()> {
        if let Some(k) = self.values[value].nint_constant() {
            if k != 0 {
                return Ok(());
            }
        }
        self.may_throw = true;
        self.create_unary_note(Opcode::CheckNull, value);
        Ok(())
    }

    /// Copy `size` bytes from `src` to `dest`; the ranges must not overlap.
    pub fn memcpy(&mut self, dest: Value, src: Value, size: Value) -> CodegenResult<()> {
        self.block_memory_op(Opcode::Memcpy, dest, src, size)
    }

    /// Copy `size` bytes from `src` to `dest`, tolerating overlap.
    pub fn memmove(&mut self, dest: Value, src: Value, size: Value) -> CodegenResult<()> {
        self.block_memory_op(Opcode::Memmove, dest, src, size)
    }

    /// Fill `size` bytes at `dest` with the low byte of `value`.
    pub fn memset(&mut self, dest: Value, value: Value, size: Value) -> CodegenResult<()> {
        let value = self.convert(value, Type::Int, false)?;
        self.block_memory_op(Opcode::Memset, dest, value, size)
    }

    fn block_memory_op(
        &mut self,
        op: Opcode,
        dest: Value,
        arg: Value,
        size: Value,
    ) -> CodegenResult<()> {
        let dest = self.convert(dest, Type::Ptr, false)?;
        let size = self.convert(size, Type::NInt, false)?;
        self.non_leaf = true; // may call the runtime helper
        self.value_ref(dest);
        self.value_ref(arg);
        self.value_ref(size);
        let mut insn = InstData::new(op);
        insn.flags = InstFlags::DEST_IS_VALUE;
        insn.dest = Slot::Value(dest);
        insn.value1 = Slot::Value(arg);
        insn.value2 = Slot::Value(size);
        self.add_insn(insn);
        Ok(())
    }

    /// Allocate `size` bytes in the stack frame at runtime.
    pub fn alloca(&mut self, size: Value) -> CodegenResult<Value> {
        let size = self.convert(size, Type::NUInt, false)?;
        // The epilog must know an allocation happened, and the outgoing
        // argument area must be re-established below the allocation.
        self.non_leaf = true;
        Ok(self.apply_unary(Opcode::Alloca, size, Type::Ptr))
    }
}

/// Is the `check_null` at `block[index]` made redundant by an earlier check
/// of the same value with no intervening redefinition?
///
/// Stores through pointers (`store_relative*`) write to the pointed-at
/// memory, not the pointer value, so they do not invalidate a prior check.
pub fn check_is_redundant(body: &FunctionBody, block: Block, index: usize) -> bool {
    let insns = &body.blocks[block].insns;
    let check = insns[index];
    let value = match body.insts[check].value1.value() {
        Some(v) => v,
        None => return false,
    };
    let data = &body.values[value];
    if !data.flags.contains(ValueFlags::TEMPORARY) && !data.flags.contains(ValueFlags::LOCAL) {
        return false;
    }
    if data.flags.contains(ValueFlags::VOLATILE) || data.flags.contains(ValueFlags::ADDRESSABLE) {
        return false;
    }
    for &prev in insns[..index].iter().rev() {
        let pdata = &body.insts[prev];
        if pdata.opcode == Opcode::CheckNull && pdata.value1.value() == Some(value) {
            return true;
        }
        if pdata.opcode.is_store_relative() {
            continue;
        }
        if pdata.dest.value() == Some(value) {
            return false;
        }
    }
    false
}
