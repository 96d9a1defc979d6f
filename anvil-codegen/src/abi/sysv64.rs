//! System V AMD64 parameter and return classification.
//!
//! Arguments are split into eightbytes; each eightbyte is classified as
//! INTEGER, SSE, X87 or MEMORY by merging the classes of the fields that
//! touch it. Six integer registers and eight SSE registers are available;
//! whatever does not fit goes to the stack, 8-byte slots, with the final
//! stack pointer kept 16-byte aligned at the call instruction.

use crate::abi::{ArgClass, ParamDesc, RetLoc};
use crate::ir::types::{PtrWidth, StructLayout, Type, TypeKind};
use crate::regs::x64::{FLOAT_ARG_REGS, SSE_RETURN_REGS, WORD_ARG_REGS, WORD_RETURN_REGS};

/// Eightbyte classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    /// No fields touch this eightbyte.
    NoClass,
    /// Integer register.
    Integer,
    /// SSE register.
    Sse,
    /// x87 stack (returns only).
    X87,
    /// Passed in memory.
    Memory,
}

impl ArgKind {
    /// The class-merge rule for two field classes in the same eightbyte.
    pub fn merge(self, other: ArgKind) -> ArgKind {
        use ArgKind::*;
        match (self, other) {
            (a, b) if a == b => a,
            (NoClass, b) => b,
            (a, NoClass) => a,
            (Memory, _) | (_, Memory) => Memory,
            (Integer, _) | (_, Integer) => Integer,
            // Mixing X87 with anything non-X87, non-MEMORY also goes to
            // memory rather than splitting across unit families.
            (X87, _) | (_, X87) => Memory,
            _ => Sse,
        }
    }
}

/// Classify a scalar (non-aggregate) type.
pub fn classify_scalar(ty: &Type, is_return: bool) -> ArgKind {
    match ty.kind() {
        TypeKind::SByte
        | TypeKind::UByte
        | TypeKind::Short
        | TypeKind::UShort
        | TypeKind::Int
        | TypeKind::UInt
        | TypeKind::NInt
        | TypeKind::NUInt
        | TypeKind::Long
        | TypeKind::ULong
        | TypeKind::Signature
        | TypeKind::Ptr => ArgKind::Integer,
        TypeKind::Float32 | TypeKind::Float64 => ArgKind::Sse,
        // The extended format returns in ST0 but never travels in registers
        // as an argument.
        TypeKind::NFloat => {
            if is_return {
                ArgKind::X87
            } else {
                ArgKind::Memory
            }
        }
        TypeKind::Void => ArgKind::NoClass,
        TypeKind::Struct | TypeKind::Union => unreachable!("aggregates use classify_part"),
    }
}

/// Classify the bytes `[start_offset, end_offset]` (relative to the
/// aggregate base plus `start`) of an aggregate by merging the classes of
/// every field that overlaps the range. A misaligned field forces MEMORY.
pub fn classify_part(
    layout: &StructLayout,
    start: u32,
    start_offset: u32,
    end_offset: u32,
) -> ArgKind {
    let mut class = ArgKind::NoClass;
    for field in &layout.fields {
        if field.offset > end_offset {
            continue;
        }
        let field_size = field.ty.size(PtrWidth::P64);
        if field_size == 0 || field.offset + field_size <= start_offset {
            continue;
        }
        let field_class = if let Some(inner) = field.ty.layout() {
            let current_start = start + start_offset;
            let nested_start = current_start.saturating_sub(field.offset);
            let nested_end = if field.offset + field_size - 1 > end_offset {
                end_offset - field.offset
            } else {
                field_size - 1
            };
            classify_part(inner, start + field.offset, nested_start, nested_end)
        } else {
            if (start + field.offset) & (field_size - 1) != 0 {
                return ArgKind::Memory;
            }
            classify_scalar(&field.ty, false)
        };
        class = class.merge(field_class);
        if class == ArgKind::Memory {
            return ArgKind::Memory;
        }
    }
    class
}

/// The classified shape of an aggregate: up to two eightbyte classes, or
/// memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructClass {
    /// A single eightbyte with this class.
    One(ArgKind),
    /// Two eightbytes with these classes.
    Two(ArgKind, ArgKind),
    /// Passed or returned in memory.
    Memory,
}

/// Classify a whole aggregate.
pub fn classify_aggregate(layout: &StructLayout) -> StructClass {
    let size = layout.size;
    if size == 0 || size > 16 {
        return StructClass::Memory;
    }
    if size <= 8 {
        let mut k = classify_part(layout, 0, 0, size - 1);
        if k == ArgKind::NoClass {
            k = ArgKind::Sse;
        }
        if k == ArgKind::Memory || k == ArgKind::X87 {
            return StructClass::Memory;
        }
        StructClass::One(k)
    } else {
        let mut lo = classify_part(layout, 0, 0, 7);
        let mut hi = classify_part(layout, 0, 8, size - 1);
        if lo == ArgKind::NoClass {
            lo = ArgKind::Sse;
        }
        if hi == ArgKind::NoClass {
            hi = ArgKind::Sse;
        }
        if lo == ArgKind::Memory
            || hi == ArgKind::Memory
            || lo == ArgKind::X87
            || hi == ArgKind::X87
        {
            return StructClass::Memory;
        }
        StructClass::Two(lo, hi)
    }
}

/// The passing-state cursor for one call's argument list.
pub struct PassingState {
    /// Next integer argument register to hand out.
    pub word_index: usize,
    /// Next SSE argument register to hand out.
    pub float_index: usize,
    /// Bytes of stack-passed arguments so far.
    pub stack_size: u32,
}

impl PassingState {
    /// A fresh cursor.
    pub fn new() -> PassingState {
        PassingState {
            word_index: 0,
            float_index: 0,
            stack_size: 0,
        }
    }

    fn take_word(&mut self) -> Option<u8> {
        let r = WORD_ARG_REGS.get(self.word_index).copied();
        if r.is_some() {
            self.word_index += 1;
        }
        r
    }

    fn take_float(&mut self) -> Option<u8> {
        let r = FLOAT_ARG_REGS.get(self.float_index).copied();
        if r.is_some() {
            self.float_index += 1;
        }
        r
    }

    /// Allocate a stack slot for a parameter of the given type.
    fn alloc_stack_slot(&mut self, param: &mut ParamDesc, ty: &Type) {
        let size = round_stack(ty.size(PtrWidth::P64));
        let align = round_stack(ty.align(PtrWidth::P64));
        if self.stack_size & (align - 1) != 0 {
            let padding = self.stack_size & (align - 1);
            self.stack_size += padding;
            param.stack_pad = padding / 8;
        }
        param.arg_class = ArgClass::Stack;
        param.offset = self.stack_size;
        self.stack_size += size;
    }
}

fn round_stack(n: u32) -> u32 {
    (n + 7) & !7
}

/// Classify a single parameter, advancing the cursor.
pub fn classify_param(state: &mut PassingState, param: &mut ParamDesc, ty: &Type) {
    if let Some(layout) = ty.layout() {
        classify_aggregate_param(state, param, ty, layout);
        return;
    }
    match classify_scalar(ty, false) {
        ArgKind::Integer => match state.take_word() {
            Some(reg) => {
                param.arg_class = ArgClass::Reg(1);
                param.regs[0].reg = reg;
                param.regs[0].value = param.value;
            }
            None => state.alloc_stack_slot(param, ty),
        },
        ArgKind::Sse => match state.take_float() {
            Some(reg) => {
                param.arg_class = ArgClass::Reg(1);
                param.regs[0].reg = reg;
                param.regs[0].value = param.value;
            }
            None => state.alloc_stack_slot(param, ty),
        },
        _ => state.alloc_stack_slot(param, ty),
    }
}

fn classify_aggregate_param(
    state: &mut PassingState,
    param: &mut ParamDesc,
    ty: &Type,
    layout: &StructLayout,
) {
    match classify_aggregate(layout) {
        StructClass::One(ArgKind::Integer) => match state.take_word() {
            Some(reg) => {
                param.arg_class = ArgClass::Reg(1);
                param.regs[0].reg = reg;
                param.regs[0].value = param.value;
            }
            None => state.alloc_stack_slot(param, ty),
        },
        StructClass::One(_) => match state.take_float() {
            Some(reg) => {
                param.arg_class = ArgClass::Reg(1);
                param.regs[0].reg = reg;
                param.regs[0].value = param.value;
            }
            None => state.alloc_stack_slot(param, ty),
        },
        StructClass::Two(ArgKind::Sse, ArgKind::Sse) => {
            // Both halves are SSE; they share one vector register pair
            // slot-wise but we model them as two scalar halves.
            if state.float_index + 1 < FLOAT_ARG_REGS.len() {
                param.arg_class = ArgClass::Reg(2);
                param.regs[0].reg = state.take_float().unwrap();
                param.regs[1].reg = state.take_float().unwrap();
            } else {
                state.alloc_stack_slot(param, ty);
            }
        }
        StructClass::Two(ArgKind::Integer, ArgKind::Integer) => {
            if state.word_index + 1 < WORD_ARG_REGS.len() {
                param.arg_class = ArgClass::Reg(2);
                param.regs[0].reg = state.take_word().unwrap();
                param.regs[1].reg = state.take_word().unwrap();
            } else {
                state.alloc_stack_slot(param, ty);
            }
        }
        StructClass::Two(lo, _hi) => {
            // One integer and one SSE half, in field order.
            if state.word_index < WORD_ARG_REGS.len()
                && state.float_index < FLOAT_ARG_REGS.len()
            {
                param.arg_class = ArgClass::Reg(2);
                if lo == ArgKind::Integer {
                    param.regs[0].reg = state.take_word().unwrap();
                    param.regs[1].reg = state.take_float().unwrap();
                } else {
                    param.regs[0].reg = state.take_float().unwrap();
                    param.regs[1].reg = state.take_word().unwrap();
                }
            } else {
                state.alloc_stack_slot(param, ty);
            }
        }
        StructClass::Memory => state.alloc_stack_slot(param, ty),
    }
}

/// Classify a return type.
pub fn classify_return(ty: &Type) -> RetLoc {
    if ty.kind() == TypeKind::Void {
        return RetLoc::Void;
    }
    if let Some(layout) = ty.layout() {
        return match classify_aggregate(layout) {
            StructClass::One(ArgKind::Integer) => RetLoc::Gpr(WORD_RETURN_REGS[0]),
            StructClass::One(_) => RetLoc::Xmm(SSE_RETURN_REGS[0]),
            StructClass::Two(ArgKind::Integer, ArgKind::Integer) => {
                RetLoc::GprPair(WORD_RETURN_REGS[0], WORD_RETURN_REGS[1])
            }
            StructClass::Two(ArgKind::Sse, ArgKind::Sse) => {
                RetLoc::XmmPair(SSE_RETURN_REGS[0], SSE_RETURN_REGS[1])
            }
            StructClass::Two(ArgKind::Integer, _) => {
                RetLoc::GprXmm(WORD_RETURN_REGS[0], SSE_RETURN_REGS[0])
            }
            StructClass::Two(_, _) => RetLoc::XmmGpr(SSE_RETURN_REGS[0], WORD_RETURN_REGS[0]),
            StructClass::Memory => RetLoc::Memory,
        };
    }
    match classify_scalar(ty, true) {
        ArgKind::Integer => RetLoc::Gpr(WORD_RETURN_REGS[0]),
        ArgKind::Sse => RetLoc::Xmm(SSE_RETURN_REGS[0]),
        ArgKind::X87 => RetLoc::X87,
        ArgKind::NoClass => RetLoc::Void,
        ArgKind::Memory => RetLoc::Memory,
    }
}

/// Pad the classified argument list so the stack pointer is 16-byte aligned
/// at the `call` instruction. The pad is attached to the last stack
/// parameter in push order so push-based emitters insert the zero words at
/// the right moment; area-based emitters only need the returned total.
pub fn finish_call_layout(state: &mut PassingState, params: &mut [ParamDesc]) -> u32 {
    let misalign = state.stack_size & 15;
    if misalign != 0 {
        let pad = 16 - misalign;
        state.stack_size += pad;
        if let Some(last_stack) = params
            .iter_mut()
            .rev()
            .find(|p| p.arg_class == ArgClass::Stack)
        {
            last_stack.stack_pad += pad / 8;
        }
    }
    state.stack_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::x64;

    fn desc() -> ParamDesc {
        ParamDesc::new(None)
    }

    #[test]
    fn scalars_use_register_cursors() {
        let mut state = PassingState::new();
        let mut p = [desc(), desc(), desc()];
        classify_param(&mut state, &mut p[0], &Type::Int);
        classify_param(&mut state, &mut p[1], &Type::Float64);
        classify_param(&mut state, &mut p[2], &Type::Ptr);
        assert_eq!(p[0].arg_class, ArgClass::Reg(1));
        assert_eq!(p[0].regs[0].reg, x64::RDI);
        assert_eq!(p[1].regs[0].reg, x64::XMM0);
        assert_eq!(p[2].regs[0].reg, x64::RSI);
    }

    #[test]
    fn seventh_integer_goes_to_stack() {
        let mut state = PassingState::new();
        for _ in 0..6 {
            let mut p = desc();
            classify_param(&mut state, &mut p, &Type::Int);
            assert!(matches!(p.arg_class, ArgClass::Reg(1)));
        }
        let mut p = desc();
        classify_param(&mut state, &mut p, &Type::Int);
        assert_eq!(p.arg_class, ArgClass::Stack);
        assert_eq!(p.offset, 0);
        assert_eq!(state.stack_size, 8);
    }

    #[test]
    fn mixed_eightbytes_take_both_units() {
        // { i64, f64 } passes as (rdi, xmm0); { f64, i64 } as (xmm0, rdi).
        let int_first = StructLayout::new_struct(&[Type::Long, Type::Float64], PtrWidth::P64);
        let mut state = PassingState::new();
        let mut p = desc();
        classify_param(&mut state, &mut p, &Type::Aggregate(int_first));
        assert_eq!(p.arg_class, ArgClass::Reg(2));
        assert_eq!(p.regs[0].reg, x64::RDI);
        assert_eq!(p.regs[1].reg, x64::XMM0);

        let float_first = StructLayout::new_struct(&[Type::Float64, Type::Long], PtrWidth::P64);
        let mut state = PassingState::new();
        let mut p = desc();
        classify_param(&mut state, &mut p, &Type::Aggregate(float_first));
        assert_eq!(p.regs[0].reg, x64::XMM0);
        assert_eq!(p.regs[1].reg, x64::RDI);
    }

    #[test]
    fn large_and_extended_go_to_memory() {
        let big = StructLayout::new_struct(
            &[Type::Long, Type::Long, Type::Long],
            PtrWidth::P64,
        );
        assert_eq!(classify_aggregate(&big), StructClass::Memory);
        assert_eq!(classify_scalar(&Type::NFloat, false), ArgKind::Memory);
        assert_eq!(classify_scalar(&Type::NFloat, true), ArgKind::X87);
    }

    #[test]
    fn small_int_pair_shares_one_eightbyte() {
        // { i32, i32 } is one INTEGER eightbyte in one register.
        let layout = StructLayout::new_struct(&[Type::Int, Type::Int], PtrWidth::P64);
        assert_eq!(classify_aggregate(&layout), StructClass::One(ArgKind::Integer));
    }

    #[test]
    fn int_float_in_same_eightbyte_merges_to_integer() {
        // { i32, f32 } both land in the low eightbyte: INTEGER wins.
        let layout = StructLayout::new_struct(&[Type::Int, Type::Float32], PtrWidth::P64);
        assert_eq!(classify_aggregate(&layout), StructClass::One(ArgKind::Integer));
    }

    #[test]
    fn double_pair_returns_in_xmm_pair() {
        let layout = StructLayout::new_struct(&[Type::Float64, Type::Float64], PtrWidth::P64);
        assert_eq!(
            classify_return(&Type::Aggregate(layout)),
            RetLoc::XmmPair(x64::XMM0, x64::XMM1)
        );
    }

    #[test]
    fn nfloat_returns_in_st0() {
        assert_eq!(classify_return(&Type::NFloat), RetLoc::X87);
    }

    #[test]
    fn call_site_stack_is_16_byte_aligned() {
        let mut state = PassingState::new();
        let mut params = vec![];
        for _ in 0..7 {
            let mut p = desc();
            classify_param(&mut state, &mut p, &Type::Int);
            params.push(p);
        }
        // One 8-byte stack arg: needs one pad slot.
        let total = finish_call_layout(&mut state, &mut params);
        assert_eq!(total, 16);
        assert_eq!(params[6].stack_pad, 1);
    }
}
