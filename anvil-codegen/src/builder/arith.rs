//! Arithmetic, bitwise, comparison and math operations.

use crate::builder::OpcodeDescr;
use crate::fold;
use crate::ir::types::{Type, TypeKind};
use crate::ir::value::Value;
use crate::ir::{FunctionBody, Opcode};
use crate::CodegenResult;

macro_rules! descr {
    ($i:ident, $iu:ident, $l:ident, $lu:ident, $f:ident, $d:ident, $nf:ident) => {
        OpcodeDescr {
            i: Some(Opcode::$i),
            iu: Some(Opcode::$iu),
            l: Some(Opcode::$l),
            lu: Some(Opcode::$lu),
            f: Some(Opcode::$f),
            d: Some(Opcode::$d),
            nf: Some(Opcode::$nf),
        }
    };
    (int $i:ident, $iu:ident, $l:ident, $lu:ident) => {
        OpcodeDescr {
            i: Some(Opcode::$i),
            iu: Some(Opcode::$iu),
            l: Some(Opcode::$l),
            lu: Some(Opcode::$lu),
            f: None,
            d: None,
            nf: None,
        }
    };
    (float $f:ident, $d:ident, $nf:ident) => {
        OpcodeDescr {
            i: None,
            iu: None,
            l: None,
            lu: None,
            f: Some(Opcode::$f),
            d: Some(Opcode::$d),
            nf: Some(Opcode::$nf),
        }
    };
}

/// The intrinsic-only math operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MathOp {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Log,
    Log10,
    Pow,
    Ceil,
    Floor,
    Rint,
    Round,
    Trunc,
}

impl FunctionBody {
    /// Add two values.
    pub fn add(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(IAdd, IAdd, LAdd, LAdd, FAdd, DAdd, NfAdd);
        self.arith_op(&D, v1, v2, false, false, false)
    }

    /// Add with overflow checking.
    pub fn add_ovf(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(IAddOvf, IAddOvfUn, LAddOvf, LAddOvfUn, FAdd, DAdd, NfAdd);
        self.arith_op(&D, v1, v2, false, false, true)
    }

    /// Subtract two values.
    pub fn sub(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(ISub, ISub, LSub, LSub, FSub, DSub, NfSub);
        self.arith_op(&D, v1, v2, false, false, false)
    }

    /// Subtract with overflow checking.
    pub fn sub_ovf(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(ISubOvf, ISubOvfUn, LSubOvf, LSubOvfUn, FSub, DSub, NfSub);
        self.arith_op(&D, v1, v2, false, false, true)
    }

    /// Multiply two values.
    pub fn mul(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(IMul, IMul, LMul, LMul, FMul, DMul, NfMul);
        self.arith_op(&D, v1, v2, false, false, false)
    }

    /// Multiply with overflow checking.
    pub fn mul_ovf(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(IMulOvf, IMulOvfUn, LMulOvf, LMulOvfUn, FMul, DMul, NfMul);
        self.arith_op(&D, v1, v2, false, false, true)
    }

    /// Divide two values. Integer division by zero and `MIN / -1` raise
    /// builtin exceptions at runtime.
    pub fn div(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(IDiv, IDivUn, LDiv, LDivUn, FDiv, DDiv, NfDiv);
        self.arith_op(&D, v1, v2, false, false, false)
    }

    /// Remainder of a division. Float remainders truncate the quotient
    /// like C's `fmod`.
    pub fn rem(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(int IRem, IRemUn, LRem, LRemUn);
        let common = self.common_binary(
            &self.values[v1].ty.clone(),
            &self.values[v2].ty.clone(),
            false,
            false,
        );
        if common.is_float() {
            return self.math_binary_named(
                v1,
                v2,
                ("float32_fmod", fold::float32_fmod as usize),
                ("float64_fmod", fold::float64_fmod as usize),
            );
        }
        self.arith_op(&D, v1, v2, false, false, false)
    }

    /// IEEE 754 remainder (round-to-nearest quotient).
    pub fn rem_ieee(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        self.math_binary_named(
            v1,
            v2,
            ("float32_ieee_rem", fold::float32_ieee_rem as usize),
            ("float64_ieee_rem", fold::float64_ieee_rem as usize),
        )
    }

    /// Negate a value.
    pub fn neg(&mut self, v: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(INeg, INeg, LNeg, LNeg, FNeg, DNeg, NfNeg);
        self.unary_arith_op(&D, v, false, false, false)
    }

    /// Bitwise and.
    pub fn and(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(int IAnd, IAnd, LAnd, LAnd);
        self.arith_op(&D, v1, v2, true, false, false)
    }

    /// Bitwise or.
    pub fn or(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(int IOr, IOr, LOr, LOr);
        self.arith_op(&D, v1, v2, true, false, false)
    }

    /// Bitwise exclusive or.
    pub fn xor(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(int IXor, IXor, LXor, LXor);
        self.arith_op(&D, v1, v2, true, false, false)
    }

    /// Bitwise not.
    pub fn not(&mut self, v: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(int INot, INot, LNot, LNot);
        self.unary_arith_op(&D, v, true, false, false)
    }

    /// Shift left.
    pub fn shl(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(int IShl, IShl, LShl, LShl);
        self.shift_op(&D, v1, v2)
    }

    /// Shift right, arithmetic for signed types.
    pub fn shr(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(int IShr, IShrUn, LShr, LShrUn);
        self.shift_op(&D, v1, v2)
    }

    /// Logical shift right regardless of signedness.
    pub fn ushr(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(int IShrUn, IShrUn, LShrUn, LShrUn);
        self.shift_op(&D, v1, v2)
    }

    /// Arithmetic shift right regardless of signedness.
    pub fn sshr(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(int IShr, IShr, LShr, LShr);
        self.shift_op(&D, v1, v2)
    }

    // ---- comparisons -----------------------------------------------------

    /// Equality.
    pub fn eq(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(IEq, IEq, LEq, LEq, FEq, DEq, NfEq);
        self.compare_op(&D, v1, v2)
    }

    /// Inequality (true on unordered operands).
    pub fn ne(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(INe, INe, LNe, LNe, FNe, DNe, NfNe);
        self.compare_op(&D, v1, v2)
    }

    /// Ordered less-than.
    pub fn lt(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(ILt, ILtUn, LLt, LLtUn, FLt, DLt, NfLt);
        self.compare_op(&D, v1, v2)
    }

    /// Ordered less-or-equal.
    pub fn le(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(ILe, ILeUn, LLe, LLeUn, FLe, DLe, NfLe);
        self.compare_op(&D, v1, v2)
    }

    /// Ordered greater-than.
    pub fn gt(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(IGt, IGtUn, LGt, LGtUn, FGt, DGt, NfGt);
        self.compare_op(&D, v1, v2)
    }

    /// Ordered greater-or-equal.
    pub fn ge(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(IGe, IGeUn, LGe, LGeUn, FGe, DGe, NfGe);
        self.compare_op(&D, v1, v2)
    }

    /// Three-way comparison treating NaN as less than everything.
    pub fn cmpl(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        self.three_way(v1, v2, true)
    }

    /// Three-way comparison treating NaN as greater than everything.
    pub fn cmpg(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        self.three_way(v1, v2, false)
    }

    /// Convert a value to a boolean: non-zero becomes 1.
    pub fn to_bool(&mut self, v: Value) -> CodegenResult<Value> {
        // Comparison results are already normalized booleans.
        if self.is_fresh_comparison(v) {
            return Ok(v);
        }
        let zero = self.zero_like(v)?;
        self.ne(v, zero)
    }

    /// Convert a value to an inverted boolean: zero becomes 1.
    pub fn to_not_bool(&mut self, v: Value) -> CodegenResult<Value> {
        let zero = self.zero_like(v)?;
        self.eq(v, zero)
    }

    // ---- math ------------------------------------------------------------

    /// Square root. Hardware-backed for all float kinds.
    pub fn sqrt(&mut self, v: Value) -> CodegenResult<Value> {
        static D: OpcodeDescr = descr!(float FSqrt, DSqrt, NfSqrt);
        self.unary_arith_op(&D, v, false, true, false)
    }

    /// Absolute value.
    pub fn abs(&mut self, v: Value) -> CodegenResult<Value> {
        let ty = {
            let t = self.values[v].ty.clone();
            self.common_binary(&t, &t, false, false)
        };
        let (name, addr): (&str, usize) = match ty.kind() {
            TypeKind::Int => ("int_abs", fold::int_abs as usize),
            TypeKind::UInt | TypeKind::ULong => return Ok(v),
            TypeKind::Long => ("long_abs", fold::long_abs as usize),
            TypeKind::Float32 => ("float32_abs", fold::float32_abs as usize),
            _ => ("float64_abs", fold::float64_abs as usize),
        };
        self.unary_intrinsic_in(name, addr, v, ty)
    }

    /// The smaller of two values.
    pub fn min(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        self.minmax_intrinsic(v1, v2, true)
    }

    /// The larger of two values.
    pub fn max(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        self.minmax_intrinsic(v1, v2, false)
    }

    /// The sign of a value: -1, 0 or 1 as an `Int`.
    pub fn sign(&mut self, v: Value) -> CodegenResult<Value> {
        let ty = {
            let t = self.values[v].ty.clone();
            self.common_binary(&t, &t, false, false)
        };
        let (name, addr): (&str, usize) = match ty.kind() {
            TypeKind::Int => ("int_sign", fold::int_sign as usize),
            TypeKind::UInt => ("uint_sign", fold::uint_sign as usize),
            TypeKind::Long => ("long_sign", fold::long_sign as usize),
            TypeKind::ULong => ("ulong_sign", fold::ulong_sign as usize),
            TypeKind::Float32 => ("float32_sign", fold::float32_sign as usize),
            _ => ("float64_sign", fold::float64_sign as usize),
        };
        let ty2 = self.bridge_float(ty);
        let v = self.convert(v, ty2.clone(), false)?;
        self.call_intrinsic(name, addr, &[ty2], Type::Int, &[v], false)
    }

    /// Is the value a NaN?
    pub fn is_nan(&mut self, v: Value) -> CodegenResult<Value> {
        self.float_predicate(v, "float32_is_nan", "float64_is_nan")
    }

    /// Is the value finite?
    pub fn is_finite(&mut self, v: Value) -> CodegenResult<Value> {
        self.float_predicate(v, "float32_is_finite", "float64_is_finite")
    }

    /// Is the value an infinity?
    pub fn is_inf(&mut self, v: Value) -> CodegenResult<Value> {
        self.float_predicate(v, "float32_is_inf", "float64_is_inf")
    }

    /// Trigonometric and transcendental operations; all reach the host's
    /// libm through intrinsics.
    pub fn sin(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Sin)
    }
    /// See [`FunctionBody::sin`].
    pub fn cos(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Cos)
    }
    /// See [`FunctionBody::sin`].
    pub fn tan(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Tan)
    }
    /// See [`FunctionBody::sin`].
    pub fn asin(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Asin)
    }
    /// See [`FunctionBody::sin`].
    pub fn acos(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Acos)
    }
    /// See [`FunctionBody::sin`].
    pub fn atan(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Atan)
    }
    /// Two-argument arctangent.
    pub fn atan2(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        self.math_binary(v1, v2, MathOp::Atan2)
    }
    /// See [`FunctionBody::sin`].
    pub fn sinh(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Sinh)
    }
    /// See [`FunctionBody::sin`].
    pub fn cosh(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Cosh)
    }
    /// See [`FunctionBody::sin`].
    pub fn tanh(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Tanh)
    }
    /// See [`FunctionBody::sin`].
    pub fn exp(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Exp)
    }
    /// See [`FunctionBody::sin`].
    pub fn log(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Log)
    }
    /// See [`FunctionBody::sin`].
    pub fn log10(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Log10)
    }
    /// `v1` raised to `v2`.
    pub fn pow(&mut self, v1: Value, v2: Value) -> CodegenResult<Value> {
        self.math_binary(v1, v2, MathOp::Pow)
    }
    /// Round towards positive infinity.
    pub fn ceil(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Ceil)
    }
    /// Round towards negative infinity.
    pub fn floor(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Floor)
    }
    /// Round to nearest, ties to even.
    pub fn rint(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Rint)
    }
    /// Round to nearest, ties away from zero.
    pub fn round(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Round)
    }
    /// Round towards zero.
    pub fn trunc(&mut self, v: Value) -> CodegenResult<Value> {
        self.math_unary(v, MathOp::Trunc)
    }

    // ---- helpers ---------------------------------------------------------

    fn is_fresh_comparison(&self, v: Value) -> bool {
        if let Some(last) = self.last_insn() {
            let data = &self.insts[last];
            data.opcode.is_compare() && data.dest.value() == Some(v)
        } else {
            false
        }
    }

    fn zero_like(&mut self, v: Value) -> CodegenResult<Value> {
        let ty = self.values[v].ty.normalize(self.ptr_width).promote_int();
        Ok(match ty.kind() {
            TypeKind::Long | TypeKind::ULong => self.const_long(0),
            TypeKind::Float32 => self.const_f32(0.0),
            TypeKind::Float64 => self.const_f64(0.0),
            TypeKind::NFloat => self.const_nfloat(0.0),
            _ => self.const_int(0),
        })
    }

    /// `nfloat` intrinsics compute in double precision.
    fn bridge_float(&self, ty: Type) -> Type {
        if ty.kind() == TypeKind::NFloat {
            Type::Float64
        } else {
            ty
        }
    }

    fn unary_intrinsic_in(
        &mut self,
        name: &'static str,
        addr: usize,
        v: Value,
        ty: Type,
    ) -> CodegenResult<Value> {
        let bridged = self.bridge_float(ty.clone());
        let v = self.convert(v, bridged.clone(), false)?;
        let r = self.call_intrinsic(name, addr, &[bridged.clone()], bridged, &[v], false)?;
        self.convert(r, ty, false)
    }

    fn minmax_intrinsic(&mut self, v1: Value, v2: Value, is_min: bool) -> CodegenResult<Value> {
        let ty = self.common_binary(
            &self.values[v1].ty.clone(),
            &self.values[v2].ty.clone(),
            false,
            false,
        );
        let (name, addr): (&str, usize) = match (ty.kind(), is_min) {
            (TypeKind::Int, true) => ("int_min", fold::int_min as usize),
            (TypeKind::Int, false) => ("int_max", fold::int_max as usize),
            (TypeKind::UInt, true) => ("uint_min", fold::uint_min as usize),
            (TypeKind::UInt, false) => ("uint_max", fold::uint_max as usize),
            (TypeKind::Long, true) => ("long_min", fold::long_min as usize),
            (TypeKind::Long, false) => ("long_max", fold::long_max as usize),
            (TypeKind::ULong, true) => ("ulong_min", fold::ulong_min as usize),
            (TypeKind::ULong, false) => ("ulong_max", fold::ulong_max as usize),
            (TypeKind::Float32, true) => ("float32_min", fold::float32_min as usize),
            (TypeKind::Float32, false) => ("float32_max", fold::float32_max as usize),
            (_, true) => ("float64_min", fold::float64_min as usize),
            (_, false) => ("float64_max", fold::float64_max as usize),
        };
        let bridged = self.bridge_float(ty.clone());
        let v1 = self.convert(v1, bridged.clone(), false)?;
        let v2 = self.convert(v2, bridged.clone(), false)?;
        let r = self.call_intrinsic(
            name,
            addr,
            &[bridged.clone(), bridged.clone()],
            bridged,
            &[v1, v2],
            false,
        )?;
        self.convert(r, ty, false)
    }

    fn three_way(&mut self, v1: Value, v2: Value, nan_less: bool) -> CodegenResult<Value> {
        let ty = self.common_binary(
            &self.values[v1].ty.clone(),
            &self.values[v2].ty.clone(),
            false,
            false,
        );
        let (name, addr): (&str, usize) = match (ty.kind(), nan_less) {
            (TypeKind::Int, _) => ("int_cmp", fold::int_cmp as usize),
            (TypeKind::UInt, _) => ("uint_cmp", fold::uint_cmp as usize),
            (TypeKind::Long, _) => ("long_cmp", fold::long_cmp as usize),
            (TypeKind::ULong, _) => ("ulong_cmp", fold::ulong_cmp as usize),
            (TypeKind::Float32, true) => ("float32_cmpl", fold::float32_cmpl as usize),
            (TypeKind::Float32, false) => ("float32_cmpg", fold::float32_cmpg as usize),
            (_, true) => ("float64_cmpl", fold::float64_cmpl as usize),
            (_, false) => ("float64_cmpg", fold::float64_cmpg as usize),
        };
        let bridged = self.bridge_float(ty);
        let v1 = self.convert(v1, bridged.clone(), false)?;
        let v2 = self.convert(v2, bridged.clone(), false)?;
        self.call_intrinsic(name, addr, &[bridged.clone(), bridged], Type::Int, &[v1, v2], false)
    }

    fn float_predicate(
        &mut self,
        v: Value,
        name32: &'static str,
        name64: &'static str,
    ) -> CodegenResult<Value> {
        let ty = {
            let t = self.values[v].ty.clone();
            self.common_binary(&t, &t, false, true)
        };
        let (name, addr): (&str, usize) = if ty.kind() == TypeKind::Float32 {
            (
                name32,
                match name32 {
                    "float32_is_nan" => fold::float32_is_nan as usize,
                    "float32_is_finite" => fold::float32_is_finite as usize,
                    _ => fold::float32_is_inf as usize,
                },
            )
        } else {
            (
                name64,
                match name64 {
                    "float64_is_nan" => fold::float64_is_nan as usize,
                    "float64_is_finite" => fold::float64_is_finite as usize,
                    _ => fold::float64_is_inf as usize,
                },
            )
        };
        let bridged = self.bridge_float(ty);
        let v = self.convert(v, bridged.clone(), false)?;
        self.call_intrinsic(name, addr, &[bridged], Type::Int, &[v], false)
    }

    fn math_addr(op: MathOp, double: bool) -> (&'static str, usize) {
        use MathOp::*;
        if double {
            match op {
                Sin => ("float64_sin", fold::float64_sin as usize),
                Cos => ("float64_cos", fold::float64_cos as usize),
                Tan => ("float64_tan", fold::float64_tan as usize),
                Asin => ("float64_asin", fold::float64_asin as usize),
                Acos => ("float64_acos", fold::float64_acos as usize),
                Atan => ("float64_atan", fold::float64_atan as usize),
                Atan2 => ("float64_atan2", fold::float64_atan2 as usize),
                Sinh => ("float64_sinh", fold::float64_sinh as usize),
                Cosh => ("float64_cosh", fold::float64_cosh as usize),
                Tanh => ("float64_tanh", fold::float64_tanh as usize),
                Exp => ("float64_exp", fold::float64_exp as usize),
                Log => ("float64_log", fold::float64_log as usize),
                Log10 => ("float64_log10", fold::float64_log10 as usize),
                Pow => ("float64_pow", fold::float64_pow as usize),
                Ceil => ("float64_ceil", fold::float64_ceil as usize),
                Floor => ("float64_floor", fold::float64_floor as usize),
                Rint => ("float64_rint", fold::float64_rint as usize),
                Round => ("float64_round", fold::float64_round as usize),
                Trunc => ("float64_trunc", fold::float64_trunc as usize),
            }
        } else {
            match op {
                Sin => ("float32_sin", fold::float32_sin as usize),
                Cos => ("float32_cos", fold::float32_cos as usize),
                Tan => ("float32_tan", fold::float32_tan as usize),
                Asin => ("float32_asin", fold::float32_asin as usize),
                Acos => ("float32_acos", fold::float32_acos as usize),
                Atan => ("float32_atan", fold::float32_atan as usize),
                Atan2 => ("float32_atan2", fold::float32_atan2 as usize),
                Sinh => ("float32_sinh", fold::float32_sinh as usize),
                Cosh => ("float32_cosh", fold::float32_cosh as usize),
                Tanh => ("float32_tanh", fold::float32_tanh as usize),
                Exp => ("float32_exp", fold::float32_exp as usize),
                Log => ("float32_log", fold::float32_log as usize),
                Log10 => ("float32_log10", fold::float32_log10 as usize),
                Pow => ("float32_pow", fold::float32_pow as usize),
                Ceil => ("float32_ceil", fold::float32_ceil as usize),
                Floor => ("float32_floor", fold::float32_floor as usize),
                Rint => ("float32_rint", fold::float32_rint as usize),
                Round => ("float32_round", fold::float32_round as usize),
                Trunc => ("float32_trunc", fold::float32_trunc as usize),
            }
        }
    }

    fn math_unary(&mut self, v: Value, op: MathOp) -> CodegenResult<Value> {
        let ty = {
            let t = self.values[v].ty.clone();
            self.common_binary(&t, &t, false, true)
        };
        let bridged = self.bridge_float(ty.clone());
        let (name, addr) = Self::math_addr(op, bridged.kind() != TypeKind::Float32);
        let v = self.convert(v, bridged.clone(), false)?;
        let r = self.call_intrinsic(name, addr, &[bridged.clone()], bridged, &[v], false)?;
        self.convert(r, ty, false)
    }

    fn math_binary(&mut self, v1: Value, v2: Value, op: MathOp) -> CodegenResult<Value> {
        let ty = self.common_binary(
            &self.values[v1].ty.clone(),
            &self.values[v2].ty.clone(),
            false,
            true,
        );
        let bridged = self.bridge_float(ty.clone());
        let (name, addr) = Self::math_addr(op, bridged.kind() != TypeKind::Float32);
        let v1 = self.convert(v1, bridged.clone(), false)?;
        let v2 = self.convert(v2, bridged.clone(), false)?;
        let r = self.call_intrinsic(
            name,
            addr,
            &[bridged.clone(), bridged.clone()],
            bridged,
            &[v1, v2],
            false,
        )?;
        self.convert(r, ty, false)
    }

    fn math_binary_named(
        &mut self,
        v1: Value,
        v2: Value,
        f32_intrinsic: (&'static str, usize),
        f64_intrinsic: (&'static str, usize),
    ) -> CodegenResult<Value> {
        let ty = self.common_binary(
            &self.values[v1].ty.clone(),
            &self.values[v2].ty.clone(),
            false,
            true,
        );
        let bridged = self.bridge_float(ty.clone());
        let (name, addr) = if bridged.kind() == TypeKind::Float32 {
            f32_intrinsic
        } else {
            f64_intrinsic
        };
        let v1 = self.convert(v1, bridged.clone(), false)?;
        let v2 = self.convert(v2, bridged.clone(), false)?;
        let r = self.call_intrinsic(
            name,
            addr,
            &[bridged.clone(), bridged.clone()],
            bridged,
            &[v1, v2],
            false,
        )?;
        self.convert(r, ty, false)
    }

    /// The `Int`-typed kind of a value after normalization, exposed for the
    /// branch builders.
    pub(crate) fn promoted_kind(&self, v: Value) -> TypeKind {
        self.values[v]
            .ty
            .normalize(self.ptr_width)
            .promote_int()
            .kind()
    }

    /// A typed zero constant used when a truth test needs an explicit
    /// comparison operand.
    pub(crate) fn zero_constant(&mut self, kind: TypeKind) -> Value {
        match kind {
            TypeKind::Float32 => self.const_f32(0.0),
            TypeKind::Float64 => self.const_f64(0.0),
            TypeKind::NFloat => self.const_nfloat(0.0),
            TypeKind::Long | TypeKind::ULong => self.const_long(0),
            _ => self.const_int(0),
        }
    }
}
