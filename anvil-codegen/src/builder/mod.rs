//! The instruction builder.
//!
//! User-level operations become typed IR instructions through a shared
//! machinery: promote operand types, find the common arithmetic type,
//! convert both operands, fold constants through the live intrinsics, and
//! finally either emit the opcode (when the target supports it) or a call
//! to the equivalent runtime intrinsic.

pub mod arith;
pub mod branch;
pub mod call;
pub mod convert;
pub mod except;
pub mod mem;

use crate::fold::{self, Intrinsic, IntrinsicSig};
use crate::ir::insn::{InstData, Slot};
use crate::ir::types::{Type, TypeKind};
use crate::ir::value::Value;
use crate::ir::{FunctionBody, Opcode};
use crate::{CodegenError, CodegenResult};

/// Per-kind opcode selection for one user-level operation, in the order
/// int, uint, long, ulong, float32, float64, nfloat. `None` entries always
/// go through an intrinsic.
pub(crate) struct OpcodeDescr {
    pub i: Option<Opcode>,
    pub iu: Option<Opcode>,
    pub l: Option<Opcode>,
    pub lu: Option<Opcode>,
    pub f: Option<Opcode>,
    pub d: Option<Opcode>,
    pub nf: Option<Opcode>,
}

impl OpcodeDescr {
    fn select(&self, kind: TypeKind) -> Option<Opcode> {
        match kind {
            TypeKind::Int => self.i,
            TypeKind::UInt => self.iu,
            TypeKind::Long => self.l,
            TypeKind::ULong => self.lu,
            TypeKind::Float32 => self.f,
            TypeKind::Float64 => self.d,
            TypeKind::NFloat => self.nf,
            _ => None,
        }
    }
}

impl FunctionBody {
    // ---- raw instruction creation ---------------------------------------

    /// Append `op dest <- value` with a fresh temporary destination.
    pub(crate) fn apply_unary(&mut self, op: Opcode, value: Value, ty: Type) -> Value {
        let dest = self.create_temporary(ty);
        self.value_ref(value);
        let mut insn = InstData::new(op);
        insn.dest = Slot::Value(dest);
        insn.value1 = Slot::Value(value);
        self.add_insn(insn);
        dest
    }

    /// Append `op dest <- value1, value2` with a fresh temporary destination.
    pub(crate) fn apply_binary(
        &mut self,
        op: Opcode,
        value1: Value,
        value2: Value,
        ty: Type,
    ) -> Value {
        let dest = self.create_temporary(ty);
        self.value_ref(value1);
        self.value_ref(value2);
        let mut insn = InstData::new(op);
        insn.dest = Slot::Value(dest);
        insn.value1 = Slot::Value(value1);
        insn.value2 = Slot::Value(value2);
        self.add_insn(insn);
        dest
    }

    /// Append `op value1, value2` with no destination.
    pub(crate) fn create_note(&mut self, op: Opcode, value1: Value, value2: Value) {
        self.value_ref(value1);
        self.value_ref(value2);
        let mut insn = InstData::new(op);
        insn.value1 = Slot::Value(value1);
        insn.value2 = Slot::Value(value2);
        self.add_insn(insn);
    }

    /// Append `op value1` with no destination.
    pub(crate) fn create_unary_note(&mut self, op: Opcode, value1: Value) {
        self.value_ref(value1);
        let mut insn = InstData::new(op);
        insn.value1 = Slot::Value(value1);
        self.add_insn(insn);
    }

    /// Append a bare `op`.
    pub(crate) fn create_noarg_note(&mut self, op: Opcode) {
        self.add_insn(InstData::new(op));
    }

    // ---- common-type selection ------------------------------------------

    /// The type both operands of a binary operation are brought to.
    pub(crate) fn common_binary(
        &self,
        ty1: &Type,
        ty2: &Type,
        int_only: bool,
        float_only: bool,
    ) -> Type {
        let t1 = ty1.normalize(self.ptr_width).promote_int();
        let t2 = ty2.normalize(self.ptr_width).promote_int();
        let (k1, k2) = (t1.kind(), t2.kind());
        if !float_only {
            use TypeKind::*;
            match (k1, k2) {
                (Int, Int) | (Int, UInt) | (UInt, Int) | (UInt, UInt) => {
                    return if k1 == UInt && k2 == UInt {
                        Type::UInt
                    } else if k1 == UInt || k2 == UInt {
                        // Mixed signedness at one width keeps the other
                        // operand's type, as C's usual conversions do.
                        if k1 == UInt { t2 } else { t1 }
                    } else {
                        Type::Int
                    };
                }
                (Int | UInt, Long) | (Long, Int | UInt) | (Long, Long) => return Type::Long,
                (Int, ULong) | (ULong, Int) | (Long, ULong) | (ULong, Long) => {
                    return Type::Long
                }
                (UInt, ULong) | (ULong, UInt) | (ULong, ULong) => return Type::ULong,
                _ => {}
            }
            if int_only {
                return Type::Long;
            }
        }
        if k1 == TypeKind::NFloat || k2 == TypeKind::NFloat {
            Type::NFloat
        } else if k1 == TypeKind::Float64 || k2 == TypeKind::Float64 {
            Type::Float64
        } else if k1 == TypeKind::Float32 || k2 == TypeKind::Float32 {
            Type::Float32
        } else {
            // Integer operands reaching a float-only operation widen all
            // the way.
            Type::NFloat
        }
    }

    // ---- the shared operation machinery ---------------------------------

    /// Apply a binary arithmetic operator after coercing both operands to a
    /// common type.
    pub(crate) fn arith_op(
        &mut self,
        descr: &OpcodeDescr,
        value1: Value,
        value2: Value,
        int_only: bool,
        float_only: bool,
        overflow_check: bool,
    ) -> CodegenResult<Value> {
        let ty = self.common_binary(
            &self.values[value1].ty.clone(),
            &self.values[value2].ty.clone(),
            int_only,
            float_only,
        );
        let op = descr
            .select(ty.kind())
            .ok_or(CodegenError::UnsupportedType)?;
        let value1 = self.convert(value1, ty.clone(), overflow_check)?;
        let value2 = self.convert(value2, ty.clone(), overflow_check)?;
        if let (Some(k1), Some(k2)) = (
            self.values[value1].konst,
            self.values[value2].konst,
        ) {
            if let Some(folded) = fold::fold_binary(op, &k1, &k2) {
                return Ok(self.create_constant(ty, folded));
            }
        }
        if let Some(intr) = fold::intrinsic_for_opcode(op) {
            if intr.may_throw {
                self.may_throw = true;
            }
            if !self.isa.supports(op) {
                return self.emit_intrinsic(&intr, &[value1, value2], &ty);
            }
        }
        Ok(self.apply_binary(op, value1, value2, ty))
    }

    /// Apply a unary arithmetic operator after coercing the operand.
    pub(crate) fn unary_arith_op(
        &mut self,
        descr: &OpcodeDescr,
        value: Value,
        int_only: bool,
        float_only: bool,
        overflow_check: bool,
    ) -> CodegenResult<Value> {
        let vt = self.values[value].ty.clone();
        let ty = self.common_binary(&vt, &vt, int_only, float_only);
        let op = descr
            .select(ty.kind())
            .ok_or(CodegenError::UnsupportedType)?;
        let value = self.convert(value, ty.clone(), overflow_check)?;
        if let Some(k) = self.values[value].konst {
            if let Some(folded) = fold::fold_unary(op, &k) {
                return Ok(self.create_constant(ty, folded));
            }
        }
        if let Some(intr) = fold::intrinsic_for_opcode(op) {
            if intr.may_throw {
                self.may_throw = true;
            }
            if !self.isa.supports(op) {
                return self.emit_intrinsic(&intr, &[value], &ty);
            }
        }
        Ok(self.apply_unary(op, value, ty))
    }

    /// Apply a shift operator: the shifted operand takes its own promoted
    /// type, the count becomes a plain integer.
    pub(crate) fn shift_op(
        &mut self,
        descr: &OpcodeDescr,
        value1: Value,
        value2: Value,
    ) -> CodegenResult<Value> {
        let t1 = self.values[value1].ty.clone();
        let ty = self.common_binary(&t1, &t1, true, false);
        let op = descr
            .select(ty.kind())
            .ok_or(CodegenError::UnsupportedType)?;
        let count_ty = match self.values[value2].ty.normalize(self.ptr_width).promote_int() {
            Type::Int => Type::Int,
            _ => Type::UInt,
        };
        let value1 = self.convert(value1, ty.clone(), false)?;
        let value2 = self.convert(value2, count_ty, false)?;
        if let (Some(k1), Some(k2)) = (
            self.values[value1].konst,
            self.values[value2].konst,
        ) {
            if let Some(folded) = fold::fold_binary(op, &k1, &k2) {
                return Ok(self.create_constant(ty, folded));
            }
        }
        if !self.isa.supports(op) {
            if let Some(intr) = fold::intrinsic_for_opcode(op) {
                return self.emit_intrinsic(&intr, &[value1, value2], &ty);
            }
        }
        Ok(self.apply_binary(op, value1, value2, ty))
    }

    /// Apply a comparison operator: operands coerce to a common type, the
    /// result is a boolean `Int` temporary.
    pub(crate) fn compare_op(
        &mut self,
        descr: &OpcodeDescr,
        value1: Value,
        value2: Value,
    ) -> CodegenResult<Value> {
        let ty = self.common_binary(
            &self.values[value1].ty.clone(),
            &self.values[value2].ty.clone(),
            false,
            false,
        );
        let op = descr
            .select(ty.kind())
            .ok_or(CodegenError::UnsupportedType)?;
        let value1 = self.convert(value1, ty.clone(), false)?;
        let value2 = self.convert(value2, ty, false)?;
        if let (Some(k1), Some(k2)) = (
            self.values[value1].konst,
            self.values[value2].konst,
        ) {
            if let Some(folded) = fold::fold_binary(op, &k1, &k2) {
                return Ok(self.create_constant(Type::Int, folded));
            }
        }
        Ok(self.apply_binary(op, value1, value2, Type::Int))
    }

    /// Emit a call to a runtime intrinsic standing in for an opcode,
    /// bridging `nfloat` operands through doubles where the intrinsic's
    /// shape asks for them.
    pub(crate) fn emit_intrinsic(
        &mut self,
        intr: &Intrinsic,
        args: &[Value],
        result_ty: &Type,
    ) -> CodegenResult<Value> {
        let (param_tys, ret_ty): (Vec<Type>, Type) = match intr.sig {
            IntrinsicSig::Binary(k) => {
                let t = kind_type(k);
                (vec![t.clone(), t.clone()], t)
            }
            IntrinsicSig::Unary(k) => {
                let t = kind_type(k);
                (vec![t.clone()], t)
            }
            IntrinsicSig::Convert(from, to) => (vec![kind_type(from)], kind_type(to)),
            IntrinsicSig::Predicate2(k) => {
                let t = kind_type(k);
                (vec![t.clone(), t], Type::Int)
            }
            IntrinsicSig::Predicate1(k) => (vec![kind_type(k)], Type::Int),
            IntrinsicSig::ShiftCount(k) => {
                let t = kind_type(k);
                (vec![t.clone(), Type::Int], t)
            }
        };
        let mut converted = Vec::with_capacity(args.len());
        for (arg, ty) in args.iter().zip(param_tys.iter()) {
            converted.push(self.convert(*arg, ty.clone(), false)?);
        }
        let result =
            self.call_intrinsic(intr.name, intr.addr, &param_tys, ret_ty, &converted, intr.may_throw)?;
        // Bridge the result back when the intrinsic computed in a stand-in
        // type (doubles for nfloat).
        if self.values[result].ty != *result_ty && result_ty.kind() != TypeKind::Void {
            return self.convert(result, result_ty.clone(), false);
        }
        Ok(result)
    }
}

pub(crate) fn kind_type(kind: TypeKind) -> Type {
    match kind {
        TypeKind::SByte => Type::SByte,
        TypeKind::UByte => Type::UByte,
        TypeKind::Short => Type::Short,
        TypeKind::UShort => Type::UShort,
        TypeKind::Int => Type::Int,
        TypeKind::UInt => Type::UInt,
        TypeKind::NInt => Type::NInt,
        TypeKind::NUInt => Type::NUInt,
        TypeKind::Long => Type::Long,
        TypeKind::ULong => Type::ULong,
        TypeKind::Float32 => Type::Float32,
        TypeKind::Float64 => Type::Float64,
        TypeKind::NFloat => Type::NFloat,
        TypeKind::Ptr => Type::Ptr,
        _ => Type::Void,
    }
}
