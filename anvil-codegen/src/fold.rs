//! Build-time constant folding and the runtime intrinsics that back it.
//!
//! The builder folds an operation on constant operands by running the same
//! host implementation that the emitted code would call as an intrinsic, so
//! there is exactly one definition of every operation's semantics: two's
//! complement wrapping for plain integer ops, host IEEE for floats, and
//! explicit failure for the checked (`_ovf`) variants, which makes the
//! folder fall through to runtime emission.
//!
//! Intrinsics that can fail at runtime (division, checked conversions)
//! raise a builtin exception through a hook installed by the runtime layer.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::ir::types::{ConstData, TypeKind};
use crate::ir::Opcode;

/// Builtin exception codes shared between the folder, the emitters and the
/// runtime. The numeric values are part of the embedding ABI.
pub mod builtin {
    /// Result code: success.
    pub const OK: i32 = 1;
    /// A null pointer was dereferenced.
    pub const NULL_REFERENCE: i32 = -1;
    /// A null function pointer was called.
    pub const NULL_FUNCTION: i32 = -2;
    /// A nested function was applied from the outside.
    pub const CALLED_NESTED: i32 = -3;
    /// Integer division by zero.
    pub const DIVISION_BY_ZERO: i32 = -4;
    /// Arithmetic result out of range (e.g. `INT_MIN / -1`).
    pub const ARITHMETIC: i32 = -5;
    /// Overflow in a checked operation.
    pub const OVERFLOW: i32 = -6;
    /// Allocation failure.
    pub const OUT_OF_MEMORY: i32 = -7;
    /// On-demand compilation failed.
    pub const COMPILE_ERROR: i32 = -8;
}

static BUILTIN_THROWER: AtomicUsize = AtomicUsize::new(0);

/// Install the runtime's builtin-exception thrower. Intrinsics that detect a
/// fault call it; it must not return.
pub fn set_builtin_thrower(f: extern "C" fn(i32) -> !) {
    BUILTIN_THROWER.store(f as usize, Ordering::Release);
}

fn raise(code: i32) -> ! {
    let f = BUILTIN_THROWER.load(Ordering::Acquire);
    if f != 0 {
        let f: extern "C" fn(i32) -> ! = unsafe { std::mem::transmute(f) };
        f(code)
    }
    panic!("builtin exception {code} with no thrower installed");
}

// ---- runtime intrinsics ---------------------------------------------------

/// `i32` division with the full fault behavior of the emitted form.
pub extern "C" fn int_div(a: i32, b: i32) -> i32 {
    match b {
        0 => raise(builtin::DIVISION_BY_ZERO),
        -1 if a == i32::MIN => raise(builtin::ARITHMETIC),
        _ => a.wrapping_div(b),
    }
}

/// `i32` remainder.
pub extern "C" fn int_rem(a: i32, b: i32) -> i32 {
    match b {
        0 => raise(builtin::DIVISION_BY_ZERO),
        -1 if a == i32::MIN => raise(builtin::ARITHMETIC),
        _ => a.wrapping_rem(b),
    }
}

/// `u32` division.
pub extern "C" fn uint_div(a: u32, b: u32) -> u32 {
    if b == 0 {
        raise(builtin::DIVISION_BY_ZERO);
    }
    a / b
}

/// `u32` remainder.
pub extern "C" fn uint_rem(a: u32, b: u32) -> u32 {
    if b == 0 {
        raise(builtin::DIVISION_BY_ZERO);
    }
    a % b
}

/// `i64` division.
pub extern "C" fn long_div(a: i64, b: i64) -> i64 {
    match b {
        0 => raise(builtin::DIVISION_BY_ZERO),
        -1 if a == i64::MIN => raise(builtin::ARITHMETIC),
        _ => a.wrapping_div(b),
    }
}

/// `i64` remainder.
pub extern "C" fn long_rem(a: i64, b: i64) -> i64 {
    match b {
        0 => raise(builtin::DIVISION_BY_ZERO),
        -1 if a == i64::MIN => raise(builtin::ARITHMETIC),
        _ => a.wrapping_rem(b),
    }
}

/// `u64` division.
pub extern "C" fn ulong_div(a: u64, b: u64) -> u64 {
    if b == 0 {
        raise(builtin::DIVISION_BY_ZERO);
    }
    a / b
}

/// `u64` remainder.
pub extern "C" fn ulong_rem(a: u64, b: u64) -> u64 {
    if b == 0 {
        raise(builtin::DIVISION_BY_ZERO);
    }
    a % b
}

/// IEEE 754 remainder for doubles, used by `rem_ieee`. The quotient rounds
/// to nearest even, unlike the truncating `%`.
pub extern "C" fn float64_ieee_rem(a: f64, b: f64) -> f64 {
    let q = a / b;
    let mut n = q.round();
    if (q - n).abs() == 0.5 {
        n = (q / 2.0).round() * 2.0;
    }
    a - n * b
}

/// IEEE 754 remainder for singles.
pub extern "C" fn float32_ieee_rem(a: f32, b: f32) -> f32 {
    float64_ieee_rem(a as f64, b as f64) as f32
}

/// Truncating float remainder (C's `fmod`).
pub extern "C" fn float64_fmod(a: f64, b: f64) -> f64 {
    a % b
}

/// Truncating float remainder for singles.
pub extern "C" fn float32_fmod(a: f32, b: f32) -> f32 {
    a % b
}

// Checked arithmetic; the emitted form raises on the overflow flag, the
// intrinsic form raises here.
macro_rules! checked_intrinsics {
    ($($name:ident: $ty:ty, $m:ident;)*) => {
        $(
            #[allow(missing_docs)]
            pub extern "C" fn $name(a: $ty, b: $ty) -> $ty {
                match a.$m(b) {
                    Some(v) => v,
                    None => raise(builtin::OVERFLOW),
                }
            }
        )*
    };
}

checked_intrinsics! {
    int_add_ovf: i32, checked_add;
    int_sub_ovf: i32, checked_sub;
    int_mul_ovf: i32, checked_mul;
    uint_add_ovf: u32, checked_add;
    uint_sub_ovf: u32, checked_sub;
    uint_mul_ovf: u32, checked_mul;
    long_add_ovf: i64, checked_add;
    long_sub_ovf: i64, checked_sub;
    long_mul_ovf: i64, checked_mul;
    ulong_add_ovf: u64, checked_add;
    ulong_sub_ovf: u64, checked_sub;
    ulong_mul_ovf: u64, checked_mul;
}

// Wrapping 64-bit helpers for targets without native 64-bit arithmetic.
#[allow(missing_docs)]
pub extern "C" fn long_mul(a: i64, b: i64) -> i64 {
    a.wrapping_mul(b)
}
#[allow(missing_docs)]
pub extern "C" fn long_shl(a: i64, b: i32) -> i64 {
    a.wrapping_shl(b as u32)
}
#[allow(missing_docs)]
pub extern "C" fn long_shr(a: i64, b: i32) -> i64 {
    a.wrapping_shr(b as u32)
}
#[allow(missing_docs)]
pub extern "C" fn ulong_shr(a: u64, b: i32) -> u64 {
    a.wrapping_shr(b as u32)
}

// Checked narrowing conversions.
macro_rules! check_range {
    ($($name:ident: $from:ty => $to:ty;)*) => {
        $(
            #[allow(missing_docs)]
            pub extern "C" fn $name(v: $from) -> $to {
                match <$to>::try_from(v) {
                    Ok(r) => r,
                    Err(_) => raise(builtin::OVERFLOW),
                }
            }
        )*
    };
}

check_range! {
    check_sbyte: i32 => i8;
    check_ubyte: i32 => u8;
    check_short: i32 => i16;
    check_ushort: i32 => u16;
    check_int: u32 => i32;
    check_uint: i32 => u32;
    check_low_word: u64 => u32;
    check_signed_low_word: i64 => i32;
    check_long: u64 => i64;
    check_ulong: i64 => u64;
}

// Float/unsigned-64 conversions the emitters do not inline, and the checked
// float-to-integer family.
#[allow(missing_docs)]
pub extern "C" fn ulong_to_float32(v: u64) -> f32 {
    v as f32
}
#[allow(missing_docs)]
pub extern "C" fn ulong_to_float64(v: u64) -> f64 {
    v as f64
}
#[allow(missing_docs)]
pub extern "C" fn float32_to_ulong(v: f32) -> u64 {
    v as u64
}
#[allow(missing_docs)]
pub extern "C" fn float64_to_ulong(v: f64) -> u64 {
    v as u64
}
#[allow(missing_docs)]
pub extern "C" fn float64_to_int(v: f64) -> i32 {
    v as i32
}
#[allow(missing_docs)]
pub extern "C" fn float64_to_uint(v: f64) -> u32 {
    v as u32
}
#[allow(missing_docs)]
pub extern "C" fn float64_to_long(v: f64) -> i64 {
    v as i64
}
#[allow(missing_docs)]
pub extern "C" fn float32_to_int(v: f32) -> i32 {
    v as i32
}
#[allow(missing_docs)]
pub extern "C" fn float32_to_uint(v: f32) -> u32 {
    v as u32
}
#[allow(missing_docs)]
pub extern "C" fn float32_to_long(v: f32) -> i64 {
    v as i64
}

macro_rules! check_float_to_int {
    ($($name:ident: $from:ty => $to:ty;)*) => {
        $(
            #[allow(missing_docs)]
            pub extern "C" fn $name(v: $from) -> $to {
                let t = v.trunc();
                if v.is_nan() || t < <$to>::MIN as $from || t > <$to>::MAX as $from {
                    raise(builtin::OVERFLOW);
                }
                t as $to
            }
        )*
    };
}

check_float_to_int! {
    check_float32_to_int: f32 => i32;
    check_float32_to_uint: f32 => u32;
    check_float32_to_long: f32 => i64;
    check_float32_to_ulong: f32 => u64;
    check_float64_to_int: f64 => i32;
    check_float64_to_uint: f64 => u32;
    check_float64_to_long: f64 => i64;
    check_float64_to_ulong: f64 => u64;
}

// Math operations with no dedicated opcode; always reached as intrinsics.
macro_rules! unary_math {
    ($($name:ident: $ty:ty, $m:ident;)*) => {
        $(
            #[allow(missing_docs)]
            pub extern "C" fn $name(v: $ty) -> $ty {
                v.$m()
            }
        )*
    };
}

unary_math! {
    float32_sin: f32, sin;
    float32_cos: f32, cos;
    float32_tan: f32, tan;
    float32_asin: f32, asin;
    float32_acos: f32, acos;
    float32_atan: f32, atan;
    float32_sinh: f32, sinh;
    float32_cosh: f32, cosh;
    float32_tanh: f32, tanh;
    float32_exp: f32, exp;
    float32_log: f32, ln;
    float32_log10: f32, log10;
    float32_ceil: f32, ceil;
    float32_floor: f32, floor;
    float32_round: f32, round;
    float32_trunc: f32, trunc;
    float32_abs: f32, abs;
    float64_sin: f64, sin;
    float64_cos: f64, cos;
    float64_tan: f64, tan;
    float64_asin: f64, asin;
    float64_acos: f64, acos;
    float64_atan: f64, atan;
    float64_sinh: f64, sinh;
    float64_cosh: f64, cosh;
    float64_tanh: f64, tanh;
    float64_exp: f64, exp;
    float64_log: f64, ln;
    float64_log10: f64, log10;
    float64_ceil: f64, ceil;
    float64_floor: f64, floor;
    float64_round: f64, round;
    float64_trunc: f64, trunc;
    float64_abs: f64, abs;
}

#[allow(missing_docs)]
pub extern "C" fn float32_rint(v: f32) -> f32 {
    float64_rint(v as f64) as f32
}

/// Round to nearest even, matching the default FPU rounding mode.
pub extern "C" fn float64_rint(v: f64) -> f64 {
    let r = v.round();
    if (v - v.trunc()).abs() == 0.5 && r % 2.0 != 0.0 {
        r - v.signum()
    } else {
        r
    }
}

#[allow(missing_docs)]
pub extern "C" fn float32_atan2(a: f32, b: f32) -> f32 {
    a.atan2(b)
}
#[allow(missing_docs)]
pub extern "C" fn float64_atan2(a: f64, b: f64) -> f64 {
    a.atan2(b)
}
#[allow(missing_docs)]
pub extern "C" fn float32_pow(a: f32, b: f32) -> f32 {
    a.powf(b)
}
#[allow(missing_docs)]
pub extern "C" fn float64_pow(a: f64, b: f64) -> f64 {
    a.powf(b)
}

// Min/max/sign and NaN tests.
macro_rules! minmax {
    ($($min:ident, $max:ident, $sign:ident: $ty:ty;)*) => {
        $(
            #[allow(missing_docs)]
            pub extern "C" fn $min(a: $ty, b: $ty) -> $ty {
                if a < b { a } else { b }
            }
            #[allow(missing_docs)]
            pub extern "C" fn $max(a: $ty, b: $ty) -> $ty {
                if a > b { a } else { b }
            }
            #[allow(missing_docs)]
            pub extern "C" fn $sign(v: $ty) -> i32 {
                if v < (0 as $ty) {
                    -1
                } else if v > (0 as $ty) {
                    1
                } else {
                    0
                }
            }
        )*
    };
}

minmax! {
    int_min, int_max, int_sign: i32;
    uint_min, uint_max, uint_sign: u32;
    long_min, long_max, long_sign: i64;
    ulong_min, ulong_max, ulong_sign: u64;
    float32_min, float32_max, float32_sign: f32;
    float64_min, float64_max, float64_sign: f64;
}

#[allow(missing_docs)]
pub extern "C" fn int_abs(v: i32) -> i32 {
    v.wrapping_abs()
}
#[allow(missing_docs)]
pub extern "C" fn long_abs(v: i64) -> i64 {
    v.wrapping_abs()
}
#[allow(missing_docs)]
pub extern "C" fn float32_is_nan(v: f32) -> i32 {
    v.is_nan() as i32
}
#[allow(missing_docs)]
pub extern "C" fn float64_is_nan(v: f64) -> i32 {
    v.is_nan() as i32
}
#[allow(missing_docs)]
pub extern "C" fn float32_is_finite(v: f32) -> i32 {
    v.is_finite() as i32
}
#[allow(missing_docs)]
pub extern "C" fn float64_is_finite(v: f64) -> i32 {
    v.is_finite() as i32
}
#[allow(missing_docs)]
pub extern "C" fn float32_is_inf(v: f32) -> i32 {
    v.is_infinite() as i32
}
#[allow(missing_docs)]
pub extern "C" fn float64_is_inf(v: f64) -> i32 {
    v.is_infinite() as i32
}

// Three-way comparisons: `cmpl` treats NaN as less, `cmpg` as greater.
#[allow(missing_docs)]
pub extern "C" fn float32_cmpl(a: f32, b: f32) -> i32 {
    float64_cmpl(a as f64, b as f64)
}
#[allow(missing_docs)]
pub extern "C" fn float64_cmpl(a: f64, b: f64) -> i32 {
    if a.is_nan() || b.is_nan() || a < b {
        -1
    } else if a > b {
        1
    } else {
        0
    }
}
#[allow(missing_docs)]
pub extern "C" fn float32_cmpg(a: f32, b: f32) -> i32 {
    float64_cmpg(a as f64, b as f64)
}
#[allow(missing_docs)]
pub extern "C" fn float64_cmpg(a: f64, b: f64) -> i32 {
    if a.is_nan() || b.is_nan() || a > b {
        1
    } else if a < b {
        -1
    } else {
        0
    }
}
#[allow(missing_docs)]
pub extern "C" fn int_cmp(a: i32, b: i32) -> i32 {
    (a > b) as i32 - (a < b) as i32
}
#[allow(missing_docs)]
pub extern "C" fn uint_cmp(a: u32, b: u32) -> i32 {
    (a > b) as i32 - (a < b) as i32
}
#[allow(missing_docs)]
pub extern "C" fn long_cmp(a: i64, b: i64) -> i32 {
    (a > b) as i32 - (a < b) as i32
}
#[allow(missing_docs)]
pub extern "C" fn ulong_cmp(a: u64, b: u64) -> i32 {
    (a > b) as i32 - (a < b) as i32
}

// ---- intrinsic lookup -----------------------------------------------------

/// The argument and result shape of an intrinsic, in IR types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntrinsicSig {
    /// `(T, T) -> T`.
    Binary(TypeKind),
    /// `(T) -> T`.
    Unary(TypeKind),
    /// `(From) -> To`.
    Convert(TypeKind, TypeKind),
    /// `(T, T) -> i32` (comparisons and predicates).
    Predicate2(TypeKind),
    /// `(T) -> i32`.
    Predicate1(TypeKind),
    /// `(T, i32) -> T` (shift counts).
    ShiftCount(TypeKind),
}

/// A runtime intrinsic: the symbol name is diagnostic only, the address is
/// what the call site uses.
#[derive(Clone, Copy, Debug)]
pub struct Intrinsic {
    /// Diagnostic name.
    pub name: &'static str,
    /// Entry address.
    pub addr: usize,
    /// Call shape.
    pub sig: IntrinsicSig,
    /// Whether the intrinsic can raise a builtin exception.
    pub may_throw: bool,
}

/// The runtime intrinsic standing in for an opcode the target does not
/// emit directly.
pub fn intrinsic_for_opcode(op: Opcode) -> Option<Intrinsic> {
    use IntrinsicSig::*;
    use Opcode::*;
    use TypeKind::*;
    let (name, addr, sig, may_throw) = match op {
        IDiv => ("int_div", int_div as usize, Binary(Int), true),
        IDivUn => ("uint_div", uint_div as usize, Binary(UInt), true),
        IRem => ("int_rem", int_rem as usize, Binary(Int), true),
        IRemUn => ("uint_rem", uint_rem as usize, Binary(UInt), true),
        LDiv => ("long_div", long_div as usize, Binary(Long), true),
        LDivUn => ("ulong_div", ulong_div as usize, Binary(ULong), true),
        LRem => ("long_rem", long_rem as usize, Binary(Long), true),
        LRemUn => ("ulong_rem", ulong_rem as usize, Binary(ULong), true),
        IAddOvf => ("int_add_ovf", int_add_ovf as usize, Binary(Int), true),
        ISubOvf => ("int_sub_ovf", int_sub_ovf as usize, Binary(Int), true),
        IMulOvf => ("int_mul_ovf", int_mul_ovf as usize, Binary(Int), true),
        IAddOvfUn => ("uint_add_ovf", uint_add_ovf as usize, Binary(UInt), true),
        ISubOvfUn => ("uint_sub_ovf", uint_sub_ovf as usize, Binary(UInt), true),
        IMulOvfUn => ("uint_mul_ovf", uint_mul_ovf as usize, Binary(UInt), true),
        LAddOvf => ("long_add_ovf", long_add_ovf as usize, Binary(Long), true),
        LSubOvf => ("long_sub_ovf", long_sub_ovf as usize, Binary(Long), true),
        LMulOvf => ("long_mul_ovf", long_mul_ovf as usize, Binary(Long), true),
        LAddOvfUn => ("ulong_add_ovf", ulong_add_ovf as usize, Binary(ULong), true),
        LSubOvfUn => ("ulong_sub_ovf", ulong_sub_ovf as usize, Binary(ULong), true),
        LMulOvfUn => ("ulong_mul_ovf", ulong_mul_ovf as usize, Binary(ULong), true),
        LMul => ("long_mul", long_mul as usize, Binary(Long), false),
        LShl => ("long_shl", long_shl as usize, ShiftCount(Long), false),
        LShr => ("long_shr", long_shr as usize, ShiftCount(Long), false),
        LShrUn => ("ulong_shr", ulong_shr as usize, ShiftCount(ULong), false),
        CheckSByte => ("check_sbyte", check_sbyte as usize, Convert(Int, SByte), true),
        CheckUByte => ("check_ubyte", check_ubyte as usize, Convert(Int, UByte), true),
        CheckShort => ("check_short", check_short as usize, Convert(Int, Short), true),
        CheckUShort => ("check_ushort", check_ushort as usize, Convert(Int, UShort), true),
        CheckInt => ("check_int", check_int as usize, Convert(UInt, Int), true),
        CheckUInt => ("check_uint", check_uint as usize, Convert(Int, UInt), true),
        CheckLowWord => ("check_low_word", check_low_word as usize, Convert(ULong, UInt), true),
        CheckSignedLowWord => (
            "check_signed_low_word",
            check_signed_low_word as usize,
            Convert(Long, Int),
            true,
        ),
        CheckLong => ("check_long", check_long as usize, Convert(ULong, Long), true),
        CheckULong => ("check_ulong", check_ulong as usize, Convert(Long, ULong), true),
        ULongToFloat32 => (
            "ulong_to_float32",
            ulong_to_float32 as usize,
            Convert(ULong, Float32),
            false,
        ),
        ULongToFloat64 | ULongToNFloat => (
            "ulong_to_float64",
            ulong_to_float64 as usize,
            Convert(ULong, Float64),
            false,
        ),
        Float32ToULong => (
            "float32_to_ulong",
            float32_to_ulong as usize,
            Convert(Float32, ULong),
            false,
        ),
        Float64ToULong => (
            "float64_to_ulong",
            float64_to_ulong as usize,
            Convert(Float64, ULong),
            false,
        ),
        Float32ToInt => (
            "float32_to_int",
            float32_to_int as usize,
            Convert(Float32, Int),
            false,
        ),
        Float32ToUInt => (
            "float32_to_uint",
            float32_to_uint as usize,
            Convert(Float32, UInt),
            false,
        ),
        Float32ToLong => (
            "float32_to_long",
            float32_to_long as usize,
            Convert(Float32, Long),
            false,
        ),
        Float64ToInt => (
            "float64_to_int",
            float64_to_int as usize,
            Convert(Float64, Int),
            false,
        ),
        Float64ToUInt => (
            "float64_to_uint",
            float64_to_uint as usize,
            Convert(Float64, UInt),
            false,
        ),
        Float64ToLong => (
            "float64_to_long",
            float64_to_long as usize,
            Convert(Float64, Long),
            false,
        ),
        CheckFloat32ToInt => (
            "check_float32_to_int",
            check_float32_to_int as usize,
            Convert(Float32, Int),
            true,
        ),
        CheckFloat32ToUInt => (
            "check_float32_to_uint",
            check_float32_to_uint as usize,
            Convert(Float32, UInt),
            true,
        ),
        CheckFloat32ToLong => (
            "check_float32_to_long",
            check_float32_to_long as usize,
            Convert(Float32, Long),
            true,
        ),
        CheckFloat32ToULong => (
            "check_float32_to_ulong",
            check_float32_to_ulong as usize,
            Convert(Float32, ULong),
            true,
        ),
        CheckFloat64ToInt | CheckNFloatToInt => (
            "check_float64_to_int",
            check_float64_to_int as usize,
            Convert(Float64, Int),
            true,
        ),
        CheckFloat64ToUInt | CheckNFloatToUInt => (
            "check_float64_to_uint",
            check_float64_to_uint as usize,
            Convert(Float64, UInt),
            true,
        ),
        CheckFloat64ToLong | CheckNFloatToLong => (
            "check_float64_to_long",
            check_float64_to_long as usize,
            Convert(Float64, Long),
            true,
        ),
        CheckFloat64ToULong | CheckNFloatToULong => (
            "check_float64_to_ulong",
            check_float64_to_ulong as usize,
            Convert(Float64, ULong),
            true,
        ),
        NFloatToInt => (
            "float64_to_int",
            float64_to_int as usize,
            Convert(Float64, Int),
            false,
        ),
        NFloatToUInt => (
            "float64_to_uint",
            float64_to_uint as usize,
            Convert(Float64, UInt),
            false,
        ),
        NFloatToLong => (
            "float64_to_long",
            float64_to_long as usize,
            Convert(Float64, Long),
            false,
        ),
        NFloatToULong => (
            "float64_to_ulong",
            float64_to_ulong as usize,
            Convert(Float64, ULong),
            false,
        ),
        _ => return None,
    };
    Some(Intrinsic {
        name,
        addr,
        sig,
        may_throw,
    })
}

// ---- constant folding -----------------------------------------------------

macro_rules! int_binop {
    ($a:expr, $b:expr, i32, $f:expr) => {{
        let (x, y) = ($a, $b);
        Some(ConstData::Int($f(x as i32, y as i32)?))
    }};
    ($a:expr, $b:expr, i64, $f:expr) => {{
        let (x, y) = ($a, $b);
        Some(ConstData::Long($f(x, y)?))
    }};
}

/// Fold a binary operation over two constants. `None` means the operation
/// cannot be folded (overflow in a checked variant, division fault, or a
/// non-foldable opcode) and must be emitted for runtime.
pub fn fold_binary(op: Opcode, a: &ConstData, b: &ConstData) -> Option<ConstData> {
    use Opcode::*;
    // Integer forms.
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        return match op {
            IAdd => int_binop!(x, y, i32, |a: i32, b: i32| Some(a.wrapping_add(b))),
            ISub => int_binop!(x, y, i32, |a: i32, b: i32| Some(a.wrapping_sub(b))),
            IMul => int_binop!(x, y, i32, |a: i32, b: i32| Some(a.wrapping_mul(b))),
            IAddOvf => int_binop!(x, y, i32, |a: i32, b: i32| a.checked_add(b)),
            ISubOvf => int_binop!(x, y, i32, |a: i32, b: i32| a.checked_sub(b)),
            IMulOvf => int_binop!(x, y, i32, |a: i32, b: i32| a.checked_mul(b)),
            IAddOvfUn => {
                let r = (x as u32).checked_add(y as u32)?;
                Some(ConstData::Int(r as i32))
            }
            ISubOvfUn => {
                let r = (x as u32).checked_sub(y as u32)?;
                Some(ConstData::Int(r as i32))
            }
            IMulOvfUn => {
                let r = (x as u32).checked_mul(y as u32)?;
                Some(ConstData::Int(r as i32))
            }
            IDiv => {
                let (a, b) = (x as i32, y as i32);
                if b == 0 || (b == -1 && a == i32::MIN) {
                    None
                } else {
                    Some(ConstData::Int(a / b))
                }
            }
            IDivUn => {
                let (a, b) = (x as u32, y as u32);
                if b == 0 {
                    None
                } else {
                    Some(ConstData::Int((a / b) as i32))
                }
            }
            IRem => {
                let (a, b) = (x as i32, y as i32);
                if b == 0 || (b == -1 && a == i32::MIN) {
                    None
                } else {
                    Some(ConstData::Int(a % b))
                }
            }
            IRemUn => {
                let (a, b) = (x as u32, y as u32);
                if b == 0 {
                    None
                } else {
                    Some(ConstData::Int((a % b) as i32))
                }
            }
            IAnd => Some(ConstData::Int((x as i32) & (y as i32))),
            IOr => Some(ConstData::Int((x as i32) | (y as i32))),
            IXor => Some(ConstData::Int((x as i32) ^ (y as i32))),
            IShl => Some(ConstData::Int((x as i32).wrapping_shl(y as u32))),
            IShr => Some(ConstData::Int((x as i32).wrapping_shr(y as u32))),
            IShrUn => Some(ConstData::Int(((x as u32).wrapping_shr(y as u32)) as i32)),
            LAdd => int_binop!(x, y, i64, |a: i64, b: i64| Some(a.wrapping_add(b))),
            LSub => int_binop!(x, y, i64, |a: i64, b: i64| Some(a.wrapping_sub(b))),
            LMul => int_binop!(x, y, i64, |a: i64, b: i64| Some(a.wrapping_mul(b))),
            LAddOvf => int_binop!(x, y, i64, |a: i64, b: i64| a.checked_add(b)),
            LSubOvf => int_binop!(x, y, i64, |a: i64, b: i64| a.checked_sub(b)),
            LMulOvf => int_binop!(x, y, i64, |a: i64, b: i64| a.checked_mul(b)),
            LAddOvfUn => {
                let r = (x as u64).checked_add(y as u64)?;
                Some(ConstData::Long(r as i64))
            }
            LSubOvfUn => {
                let r = (x as u64).checked_sub(y as u64)?;
                Some(ConstData::Long(r as i64))
            }
            LMulOvfUn => {
                let r = (x as u64).checked_mul(y as u64)?;
                Some(ConstData::Long(r as i64))
            }
            LDiv => {
                if y == 0 || (y == -1 && x == i64::MIN) {
                    None
                } else {
                    Some(ConstData::Long(x / y))
                }
            }
            LDivUn => {
                if y == 0 {
                    None
                } else {
                    Some(ConstData::Long(((x as u64) / (y as u64)) as i64))
                }
            }
            LRem => {
                if y == 0 || (y == -1 && x == i64::MIN) {
                    None
                } else {
                    Some(ConstData::Long(x % y))
                }
            }
            LRemUn => {
                if y == 0 {
                    None
                } else {
                    Some(ConstData::Long(((x as u64) % (y as u64)) as i64))
                }
            }
            LAnd => Some(ConstData::Long(x & y)),
            LOr => Some(ConstData::Long(x | y)),
            LXor => Some(ConstData::Long(x ^ y)),
            LShl => Some(ConstData::Long(x.wrapping_shl(y as u32))),
            LShr => Some(ConstData::Long(x.wrapping_shr(y as u32))),
            LShrUn => Some(ConstData::Long(((x as u64).wrapping_shr(y as u32)) as i64)),
            IEq => Some(bool_const((x as i32) == (y as i32))),
            INe => Some(bool_const((x as i32) != (y as i32))),
            ILt => Some(bool_const((x as i32) < (y as i32))),
            ILtUn => Some(bool_const((x as u32) < (y as u32))),
            ILe => Some(bool_const((x as i32) <= (y as i32))),
            ILeUn => Some(bool_const((x as u32) <= (y as u32))),
            IGt => Some(bool_const((x as i32) > (y as i32))),
            IGtUn => Some(bool_const((x as u32) > (y as u32))),
            IGe => Some(bool_const((x as i32) >= (y as i32))),
            IGeUn => Some(bool_const((x as u32) >= (y as u32))),
            LEq => Some(bool_const(x == y)),
            LNe => Some(bool_const(x != y)),
            LLt => Some(bool_const(x < y)),
            LLtUn => Some(bool_const((x as u64) < (y as u64))),
            LLe => Some(bool_const(x <= y)),
            LLeUn => Some(bool_const((x as u64) <= (y as u64))),
            LGt => Some(bool_const(x > y)),
            LGtUn => Some(bool_const((x as u64) > (y as u64))),
            LGe => Some(bool_const(x >= y)),
            LGeUn => Some(bool_const((x as u64) >= (y as u64))),
            _ => None,
        };
    }
    // Float forms. Comparisons follow IEEE: the `Inv` family is true on
    // unordered operands.
    if let (Some(x), Some(y)) = (a.as_float(), b.as_float()) {
        return match op {
            FAdd => Some(ConstData::Float32((x as f32) + (y as f32))),
            FSub => Some(ConstData::Float32((x as f32) - (y as f32))),
            FMul => Some(ConstData::Float32((x as f32) * (y as f32))),
            FDiv => Some(ConstData::Float32((x as f32) / (y as f32))),
            DAdd => Some(ConstData::Float64(x + y)),
            DSub => Some(ConstData::Float64(x - y)),
            DMul => Some(ConstData::Float64(x * y)),
            DDiv => Some(ConstData::Float64(x / y)),
            NfAdd => Some(ConstData::NFloat(x + y)),
            NfSub => Some(ConstData::NFloat(x - y)),
            NfMul => Some(ConstData::NFloat(x * y)),
            NfDiv => Some(ConstData::NFloat(x / y)),
            FEq | DEq | NfEq => Some(bool_const(x == y)),
            FNe | DNe | NfNe => Some(bool_const(x != y)),
            FLt | DLt | NfLt => Some(bool_const(x < y)),
            FLe | DLe | NfLe => Some(bool_const(x <= y)),
            FGt | DGt | NfGt => Some(bool_const(x > y)),
            FGe | DGe | NfGe => Some(bool_const(x >= y)),
            FLtInv | DLtInv | NfLtInv => Some(bool_const(!(x >= y))),
            FLeInv | DLeInv | NfLeInv => Some(bool_const(!(x > y))),
            FGtInv | DGtInv | NfGtInv => Some(bool_const(!(x <= y))),
            FGeInv | DGeInv | NfGeInv => Some(bool_const(!(x < y))),
            _ => None,
        };
    }
    None
}

fn bool_const(b: bool) -> ConstData {
    ConstData::Int(if b { 1 } else { 0 })
}

/// Fold a unary operation over a constant.
pub fn fold_unary(op: Opcode, a: &ConstData) -> Option<ConstData> {
    use Opcode::*;
    if let Some(x) = a.as_int() {
        return match op {
            INeg => Some(ConstData::Int((x as i32).wrapping_neg())),
            INot => Some(ConstData::Int(!(x as i32))),
            LNeg => Some(ConstData::Long(x.wrapping_neg())),
            LNot => Some(ConstData::Long(!x)),
            _ => None,
        };
    }
    if let Some(x) = a.as_float() {
        return match op {
            FNeg => Some(ConstData::Float32(-(x as f32))),
            DNeg => Some(ConstData::Float64(-x)),
            NfNeg => Some(ConstData::NFloat(-x)),
            FSqrt => Some(ConstData::Float32((x as f32).sqrt())),
            DSqrt => Some(ConstData::Float64(x.sqrt())),
            NfSqrt => Some(ConstData::NFloat(x.sqrt())),
            _ => None,
        };
    }
    None
}

/// Fold a constant conversion. `None` when the checked form would overflow
/// (the conversion is then emitted for runtime so the fault is observable).
pub fn fold_convert(c: &ConstData, to: TypeKind, overflow_check: bool) -> Option<ConstData> {
    use TypeKind::*;

    fn int_fits(v: i64, to: TypeKind) -> bool {
        match to {
            SByte => (i8::MIN as i64..=i8::MAX as i64).contains(&v),
            UByte => (0..=u8::MAX as i64).contains(&v),
            Short => (i16::MIN as i64..=i16::MAX as i64).contains(&v),
            UShort => (0..=u16::MAX as i64).contains(&v),
            Int => (i32::MIN as i64..=i32::MAX as i64).contains(&v),
            UInt => (0..=u32::MAX as i64).contains(&v),
            Long | NInt => true,
            ULong | NUInt | Ptr => v >= 0,
            _ => true,
        }
    }

    match c {
        ConstData::Int(_) | ConstData::Long(_) | ConstData::NInt(_) => {
            let v = c.as_int()?;
            match to {
                SByte => Some(ConstData::Int(v as i8 as i32))
                    .filter(|_| !overflow_check || int_fits(v, to)),
                UByte => Some(ConstData::Int(v as u8 as i32))
                    .filter(|_| !overflow_check || int_fits(v, to)),
                Short => Some(ConstData::Int(v as i16 as i32))
                    .filter(|_| !overflow_check || int_fits(v, to)),
                UShort => Some(ConstData::Int(v as u16 as i32))
                    .filter(|_| !overflow_check || int_fits(v, to)),
                Int => Some(ConstData::Int(v as i32))
                    .filter(|_| !overflow_check || int_fits(v, to)),
                UInt => Some(ConstData::Int(v as u32 as i32))
                    .filter(|_| !overflow_check || int_fits(v, to)),
                Long => Some(ConstData::Long(v)),
                ULong => {
                    Some(ConstData::Long(v)).filter(|_| !overflow_check || int_fits(v, to))
                }
                NInt => Some(ConstData::NInt(v)),
                NUInt | Ptr => {
                    Some(ConstData::NInt(v)).filter(|_| !overflow_check || int_fits(v, to))
                }
                Float32 => Some(ConstData::Float32(v as f32)),
                Float64 => Some(ConstData::Float64(v as f64)),
                NFloat => Some(ConstData::NFloat(v as f64)),
                _ => None,
            }
        }
        ConstData::Float32(_) | ConstData::Float64(_) | ConstData::NFloat(_) => {
            let v = c.as_float()?;
            match to {
                Float32 => Some(ConstData::Float32(v as f32)),
                Float64 => Some(ConstData::Float64(v)),
                NFloat => Some(ConstData::NFloat(v)),
                SByte | UByte | Short | UShort | Int | UInt | NInt | NUInt | Long | ULong => {
                    let t = v.trunc();
                    if overflow_check {
                        let lo = match to {
                            SByte => i8::MIN as f64,
                            Short => i16::MIN as f64,
                            Int => i32::MIN as f64,
                            Long | NInt => i64::MIN as f64,
                            _ => 0.0,
                        };
                        let hi = match to {
                            SByte => i8::MAX as f64,
                            UByte => u8::MAX as f64,
                            Short => i16::MAX as f64,
                            UShort => u16::MAX as f64,
                            Int => i32::MAX as f64,
                            UInt => u32::MAX as f64,
                            Long | NInt => i64::MAX as f64,
                            ULong | NUInt => u64::MAX as f64,
                            _ => 0.0,
                        };
                        if !(t >= lo && t <= hi) || v.is_nan() {
                            return None;
                        }
                    }
                    let wide = t as i64;
                    fold_convert(&ConstData::Long(wide), to, false)
                }
                _ => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_and_checked() {
        assert_eq!(
            fold_binary(
                Opcode::IAdd,
                &ConstData::Int(i32::MAX),
                &ConstData::Int(1)
            ),
            Some(ConstData::Int(i32::MIN))
        );
        assert_eq!(
            fold_binary(
                Opcode::IAddOvf,
                &ConstData::Int(i32::MAX),
                &ConstData::Int(1)
            ),
            None
        );
        assert_eq!(
            fold_binary(Opcode::IAdd, &ConstData::Int(3), &ConstData::Int(4)),
            Some(ConstData::Int(7))
        );
    }

    #[test]
    fn division_faults_do_not_fold() {
        assert_eq!(
            fold_binary(Opcode::IDiv, &ConstData::Int(10), &ConstData::Int(0)),
            None
        );
        assert_eq!(
            fold_binary(
                Opcode::IDiv,
                &ConstData::Int(i32::MIN),
                &ConstData::Int(-1)
            ),
            None
        );
        assert_eq!(
            fold_binary(Opcode::IDiv, &ConstData::Int(10), &ConstData::Int(5)),
            Some(ConstData::Int(2))
        );
    }

    #[test]
    fn nan_comparisons() {
        let nan = ConstData::Float64(f64::NAN);
        let one = ConstData::Float64(1.0);
        assert_eq!(fold_binary(Opcode::DLt, &nan, &one), Some(ConstData::Int(0)));
        assert_eq!(
            fold_binary(Opcode::DLtInv, &nan, &one),
            Some(ConstData::Int(1))
        );
        assert_eq!(fold_binary(Opcode::DNe, &nan, &one), Some(ConstData::Int(1)));
    }

    #[test]
    fn convert_checked() {
        assert_eq!(
            fold_convert(&ConstData::Int(200), TypeKind::SByte, false),
            Some(ConstData::Int(-56))
        );
        assert_eq!(
            fold_convert(&ConstData::Int(200), TypeKind::SByte, true),
            None
        );
        assert_eq!(
            fold_convert(&ConstData::Float64(3.9), TypeKind::Int, false),
            Some(ConstData::Int(3))
        );
        assert_eq!(
            fold_convert(&ConstData::Float64(f64::NAN), TypeKind::Int, true),
            None
        );
    }
}
