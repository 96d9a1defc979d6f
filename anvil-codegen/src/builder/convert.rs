//! Type conversions.
//!
//! A conversion is built from a per-destination-kind table of up to three
//! chained primitive steps, each an opcode plus the intermediate type it
//! produces. The `overflow_check` flag selects the checked variants, which
//! raise `OVERFLOW` at runtime instead of truncating silently.

use smallvec::SmallVec;

use crate::builder::kind_type;
use crate::fold;
use crate::ir::types::{Type, TypeKind};
use crate::ir::value::Value;
use crate::ir::{FunctionBody, Opcode};
use crate::{CodegenError, CodegenResult};

type Steps = SmallVec<[(Opcode, TypeKind); 3]>;

impl FunctionBody {
    /// Convert `value` to `ty`, optionally checking for overflow.
    pub fn convert(
        &mut self,
        value: Value,
        ty: Type,
        overflow_check: bool,
    ) -> CodegenResult<Value> {
        let vtype = self.values[value].ty.normalize(self.ptr_width);
        let ty_norm = ty.normalize(self.ptr_width);
        if ty_norm.kind() == vtype.kind() {
            return Ok(value);
        }

        // Constants convert at build time unless the checked form would
        // have to fault.
        if let Some(k) = self.values[value].konst {
            if let Some(folded) = fold::fold_convert(&k, ty_norm.kind(), overflow_check) {
                return Ok(self.create_constant(ty, folded));
            }
        }

        let from = vtype.promote_int().kind();
        let steps = conversion_steps(from, ty_norm.kind(), overflow_check)
            .ok_or(CodegenError::UnsupportedType)?;
        let mut current = value;
        let n = steps.len();
        for (i, (op, out_kind)) in steps.into_iter().enumerate() {
            // The final step produces the requested type itself, so pointer
            // kinds survive normalization.
            let out_ty = if i + 1 == n {
                ty.clone()
            } else {
                kind_type(out_kind)
            };
            current = self.apply_conversion(op, current, out_ty)?;
        }
        Ok(current)
    }

    /// Emit one primitive conversion step, falling back to the runtime
    /// intrinsic when the backend has no rule for it.
    fn apply_conversion(
        &mut self,
        op: Opcode,
        value: Value,
        result_ty: Type,
    ) -> CodegenResult<Value> {
        if let Some(intr) = fold::intrinsic_for_opcode(op) {
            if intr.may_throw {
                self.may_throw = true;
            }
            if !self.isa.supports(op) {
                return self.emit_intrinsic(&intr, &[value], &result_ty);
            }
        } else if !self.isa.supports(op) {
            return Err(CodegenError::Unencodable);
        }
        Ok(self.apply_unary(op, value, result_ty))
    }
}

/// The chain of primitive steps for one conversion, or `None` when the
/// pair of kinds has no meaning (e.g. aggregates).
fn conversion_steps(from: TypeKind, to: TypeKind, ovf: bool) -> Option<Steps> {
    use Opcode::*;
    use TypeKind::*;

    fn steps(list: &[(Opcode, TypeKind)]) -> Option<Steps> {
        Some(SmallVec::from_slice(list))
    }

    // Pointer-like kinds behave as their fixed-width equivalents; callers
    // normalized them already.
    match to {
        SByte => match (from, ovf) {
            (Int, false) | (UInt, false) => steps(&[(TruncSByte, SByte)]),
            (Int, true) => steps(&[(CheckSByte, SByte)]),
            (UInt, true) => steps(&[(CheckInt, Int), (CheckSByte, SByte)]),
            (Long, false) | (ULong, false) => steps(&[(LowWord, Int), (TruncSByte, SByte)]),
            (Long, true) => steps(&[(CheckSignedLowWord, Int), (CheckSByte, SByte)]),
            (ULong, true) => steps(&[
                (CheckLowWord, UInt),
                (CheckInt, Int),
                (CheckSByte, SByte),
            ]),
            (Float32, false) => steps(&[(Float32ToInt, Int), (TruncSByte, SByte)]),
            (Float32, true) => steps(&[(CheckFloat32ToInt, Int), (CheckSByte, SByte)]),
            (Float64, false) => steps(&[(Float64ToInt, Int), (TruncSByte, SByte)]),
            (Float64, true) => steps(&[(CheckFloat64ToInt, Int), (CheckSByte, SByte)]),
            (NFloat, false) => steps(&[(NFloatToInt, Int), (TruncSByte, SByte)]),
            (NFloat, true) => steps(&[(CheckNFloatToInt, Int), (CheckSByte, SByte)]),
            _ => None,
        },
        UByte => match (from, ovf) {
            (Int, false) | (UInt, false) => steps(&[(TruncUByte, UByte)]),
            (Int, true) | (UInt, true) => steps(&[(CheckUByte, UByte)]),
            (Long, false) | (ULong, false) => steps(&[(LowWord, Int), (TruncUByte, UByte)]),
            (Long, true) => steps(&[(CheckSignedLowWord, Int), (CheckUByte, UByte)]),
            (ULong, true) => steps(&[(CheckLowWord, UInt), (CheckUByte, UByte)]),
            (Float32, false) => steps(&[(Float32ToInt, Int), (TruncUByte, UByte)]),
            (Float32, true) => steps(&[(CheckFloat32ToInt, Int), (CheckUByte, UByte)]),
            (Float64, false) => steps(&[(Float64ToInt, Int), (TruncUByte, UByte)]),
            (Float64, true) => steps(&[(CheckFloat64ToInt, Int), (CheckUByte, UByte)]),
            (NFloat, false) => steps(&[(NFloatToInt, Int), (TruncUByte, UByte)]),
            (NFloat, true) => steps(&[(CheckNFloatToInt, Int), (CheckUByte, UByte)]),
            _ => None,
        },
        Short => match (from, ovf) {
            (Int, false) | (UInt, false) => steps(&[(TruncShort, Short)]),
            (Int, true) => steps(&[(CheckShort, Short)]),
            (UInt, true) => steps(&[(CheckInt, Int), (CheckShort, Short)]),
            (Long, false) | (ULong, false) => steps(&[(LowWord, Int), (TruncShort, Short)]),
            (Long, true) => steps(&[(CheckSignedLowWord, Int), (CheckShort, Short)]),
            (ULong, true) => steps(&[
                (CheckLowWord, UInt),
                (CheckInt, Int),
                (CheckShort, Short),
            ]),
            (Float32, false) => steps(&[(Float32ToInt, Int), (TruncShort, Short)]),
            (Float32, true) => steps(&[(CheckFloat32ToInt, Int), (CheckShort, Short)]),
            (Float64, false) => steps(&[(Float64ToInt, Int), (TruncShort, Short)]),
            (Float64, true) => steps(&[(CheckFloat64ToInt, Int), (CheckShort, Short)]),
            (NFloat, false) => steps(&[(NFloatToInt, Int), (TruncShort, Short)]),
            (NFloat, true) => steps(&[(CheckNFloatToInt, Int), (CheckShort, Short)]),
            _ => None,
        },
        UShort => match (from, ovf) {
            (Int, false) | (UInt, false) => steps(&[(TruncUShort, UShort)]),
            (Int, true) | (UInt, true) => steps(&[(CheckUShort, UShort)]),
            (Long, false) | (ULong, false) => steps(&[(LowWord, Int), (TruncUShort, UShort)]),
            (Long, true) => steps(&[(CheckSignedLowWord, Int), (CheckUShort, UShort)]),
            (ULong, true) => steps(&[(CheckLowWord, UInt), (CheckUShort, UShort)]),
            (Float32, false) => steps(&[(Float32ToInt, Int), (TruncUShort, UShort)]),
            (Float32, true) => steps(&[(CheckFloat32ToInt, Int), (CheckUShort, UShort)]),
            (Float64, false) => steps(&[(Float64ToInt, Int), (TruncUShort, UShort)]),
            (Float64, true) => steps(&[(CheckFloat64ToInt, Int), (CheckUShort, UShort)]),
            (NFloat, false) => steps(&[(NFloatToInt, Int), (TruncUShort, UShort)]),
            (NFloat, true) => steps(&[(CheckNFloatToInt, Int), (CheckUShort, UShort)]),
            _ => None,
        },
        Int => match (from, ovf) {
            // Same representation; only the sign interpretation moves.
            (UInt, false) => steps(&[(CopyInt, Int)]),
            (UInt, true) => steps(&[(CheckInt, Int)]),
            (Long, false) | (ULong, false) => steps(&[(LowWord, Int)]),
            (Long, true) => steps(&[(CheckSignedLowWord, Int)]),
            (ULong, true) => steps(&[(CheckLowWord, UInt), (CheckInt, Int)]),
            (Float32, false) => steps(&[(Float32ToInt, Int)]),
            (Float32, true) => steps(&[(CheckFloat32ToInt, Int)]),
            (Float64, false) => steps(&[(Float64ToInt, Int)]),
            (Float64, true) => steps(&[(CheckFloat64ToInt, Int)]),
            (NFloat, false) => steps(&[(NFloatToInt, Int)]),
            (NFloat, true) => steps(&[(CheckNFloatToInt, Int)]),
            _ => None,
        },
        UInt => match (from, ovf) {
            (Int, false) => steps(&[(CopyInt, UInt)]),
            (Int, true) => steps(&[(CheckUInt, UInt)]),
            (Long, false) | (ULong, false) => steps(&[(LowWord, UInt)]),
            (Long, true) => steps(&[(CheckSignedLowWord, Int), (CheckUInt, UInt)]),
            (ULong, true) => steps(&[(CheckLowWord, UInt)]),
            (Float32, false) => steps(&[(Float32ToUInt, UInt)]),
            (Float32, true) => steps(&[(CheckFloat32ToUInt, UInt)]),
            (Float64, false) => steps(&[(Float64ToUInt, UInt)]),
            (Float64, true) => steps(&[(CheckFloat64ToUInt, UInt)]),
            (NFloat, false) => steps(&[(NFloatToUInt, UInt)]),
            (NFloat, true) => steps(&[(CheckNFloatToUInt, UInt)]),
            _ => None,
        },
        Long => match (from, ovf) {
            (Int, _) => steps(&[(ExpandInt, Long)]),
            (UInt, _) => steps(&[(ExpandUInt, Long)]),
            (ULong, false) => steps(&[(CopyLong, Long)]),
            (ULong, true) => steps(&[(CheckLong, Long)]),
            (Float32, false) => steps(&[(Float32ToLong, Long)]),
            (Float32, true) => steps(&[(CheckFloat32ToLong, Long)]),
            (Float64, false) => steps(&[(Float64ToLong, Long)]),
            (Float64, true) => steps(&[(CheckFloat64ToLong, Long)]),
            (NFloat, false) => steps(&[(NFloatToLong, Long)]),
            (NFloat, true) => steps(&[(CheckNFloatToLong, Long)]),
            _ => None,
        },
        ULong => match (from, ovf) {
            (Int, false) => steps(&[(ExpandInt, ULong)]),
            (Int, true) => steps(&[(CheckUInt, UInt), (ExpandUInt, ULong)]),
            (UInt, _) => steps(&[(ExpandUInt, ULong)]),
            (Long, false) => steps(&[(CopyLong, ULong)]),
            (Long, true) => steps(&[(CheckULong, ULong)]),
            (Float32, false) => steps(&[(Float32ToULong, ULong)]),
            (Float32, true) => steps(&[(CheckFloat32ToULong, ULong)]),
            (Float64, false) => steps(&[(Float64ToULong, ULong)]),
            (Float64, true) => steps(&[(CheckFloat64ToULong, ULong)]),
            (NFloat, false) => steps(&[(NFloatToULong, ULong)]),
            (NFloat, true) => steps(&[(CheckNFloatToULong, ULong)]),
            _ => None,
        },
        Float32 => match from {
            Int => steps(&[(IntToFloat32, Float32)]),
            UInt => steps(&[(UIntToFloat32, Float32)]),
            Long => steps(&[(LongToFloat32, Float32)]),
            ULong => steps(&[(ULongToFloat32, Float32)]),
            Float64 => steps(&[(Float64ToFloat32, Float32)]),
            NFloat => steps(&[(NFloatToFloat32, Float32)]),
            _ => None,
        },
        Float64 => match from {
            Int => steps(&[(IntToFloat64, Float64)]),
            UInt => steps(&[(UIntToFloat64, Float64)]),
            Long => steps(&[(LongToFloat64, Float64)]),
            ULong => steps(&[(ULongToFloat64, Float64)]),
            Float32 => steps(&[(Float32ToFloat64, Float64)]),
            NFloat => steps(&[(NFloatToFloat64, Float64)]),
            _ => None,
        },
        NFloat => match from {
            Int => steps(&[(IntToNFloat, NFloat)]),
            UInt => steps(&[(UIntToNFloat, NFloat)]),
            Long => steps(&[(LongToNFloat, NFloat)]),
            ULong => steps(&[(ULongToNFloat, NFloat)]),
            Float32 => steps(&[(Float32ToNFloat, NFloat)]),
            Float64 => steps(&[(Float64ToNFloat, NFloat)]),
            _ => None,
        },
        _ => None,
    }
}
