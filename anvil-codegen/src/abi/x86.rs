//! 32-bit x86 parameter and return classification.
//!
//! `cdecl` passes everything on the stack and the caller pops. `stdcall` is
//! the same layout with the callee popping. `fastcall` routes the first two
//! word-sized scalar arguments through `ecx`/`edx` and the callee pops the
//! remainder. Struct returns larger than eight bytes travel through a
//! hidden pointer pushed as the first argument.

use crate::abi::{ArgClass, ParamDesc, RetLoc};
use crate::ir::sig::Abi;
use crate::ir::types::{PtrWidth, Type, TypeKind};
use crate::regs::x86::{EAX, EDX, FASTCALL_ARG_REGS};

/// The passing-state cursor for one call's argument list.
pub struct PassingState {
    /// Calling convention being classified.
    pub abi: Abi,
    /// Next `fastcall` register to hand out.
    pub reg_index: usize,
    /// Bytes of stack-passed arguments so far.
    pub stack_size: u32,
}

impl PassingState {
    /// A fresh cursor for the given convention.
    pub fn new(abi: Abi) -> PassingState {
        PassingState {
            abi,
            reg_index: 0,
            stack_size: 0,
        }
    }

    fn take_fastcall_reg(&mut self) -> Option<u8> {
        if self.abi != Abi::FastCall {
            return None;
        }
        let r = FASTCALL_ARG_REGS.get(self.reg_index).copied();
        if r.is_some() {
            self.reg_index += 1;
        }
        r
    }
}

fn round_stack(n: u32) -> u32 {
    (n + 3) & !3
}

/// Is this type a word-sized scalar eligible for `fastcall` registers?
fn is_fastcall_candidate(ty: &Type) -> bool {
    match ty.kind() {
        TypeKind::SByte
        | TypeKind::UByte
        | TypeKind::Short
        | TypeKind::UShort
        | TypeKind::Int
        | TypeKind::UInt
        | TypeKind::NInt
        | TypeKind::NUInt
        | TypeKind::Ptr
        | TypeKind::Signature => true,
        _ => false,
    }
}

/// Classify a single parameter, advancing the cursor.
pub fn classify_param(state: &mut PassingState, param: &mut ParamDesc, ty: &Type) {
    if is_fastcall_candidate(ty) {
        if let Some(reg) = state.take_fastcall_reg() {
            param.arg_class = ArgClass::Reg(1);
            param.regs[0].reg = reg;
            param.regs[0].value = param.value;
            return;
        }
    }
    param.arg_class = ArgClass::Stack;
    param.offset = state.stack_size;
    state.stack_size += round_stack(ty.size(PtrWidth::P32));
}

/// Classify a return type.
pub fn classify_return(ty: &Type) -> RetLoc {
    match ty.kind() {
        TypeKind::Void => RetLoc::Void,
        TypeKind::SByte
        | TypeKind::UByte
        | TypeKind::Short
        | TypeKind::UShort
        | TypeKind::Int
        | TypeKind::UInt
        | TypeKind::NInt
        | TypeKind::NUInt
        | TypeKind::Ptr
        | TypeKind::Signature => RetLoc::Gpr(EAX),
        TypeKind::Long | TypeKind::ULong => RetLoc::GprPair(EAX, EDX),
        // All floats return on the x87 stack.
        TypeKind::Float32 | TypeKind::Float64 | TypeKind::NFloat => RetLoc::X87,
        TypeKind::Struct | TypeKind::Union => {
            let size = ty.size(PtrWidth::P32);
            if size <= 4 {
                RetLoc::Gpr(EAX)
            } else if size <= 8 {
                RetLoc::GprPair(EAX, EDX)
            } else {
                RetLoc::Memory
            }
        }
    }
}

/// How many bytes of arguments the callee pops on return.
pub fn callee_pop_bytes(abi: Abi, stack_arg_bytes: u32, returns_via_pointer: bool) -> u32 {
    match abi {
        Abi::StdCall | Abi::FastCall => {
            // The hidden return pointer is popped by the callee as well.
            stack_arg_bytes + if returns_via_pointer { 4 } else { 0 }
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::x86::{ECX, EDX};

    fn desc() -> ParamDesc {
        ParamDesc::new(None)
    }

    #[test]
    fn cdecl_is_all_stack() {
        let mut state = PassingState::new(Abi::Cdecl);
        let mut a = desc();
        let mut b = desc();
        classify_param(&mut state, &mut a, &Type::Int);
        classify_param(&mut state, &mut b, &Type::Float64);
        assert_eq!(a.arg_class, ArgClass::Stack);
        assert_eq!(a.offset, 0);
        assert_eq!(b.arg_class, ArgClass::Stack);
        assert_eq!(b.offset, 4);
        assert_eq!(state.stack_size, 12);
    }

    #[test]
    fn fastcall_first_two_words_in_regs() {
        let mut state = PassingState::new(Abi::FastCall);
        let mut a = desc();
        let mut b = desc();
        let mut c = desc();
        classify_param(&mut state, &mut a, &Type::Int);
        classify_param(&mut state, &mut b, &Type::Ptr);
        classify_param(&mut state, &mut c, &Type::Int);
        assert_eq!(a.regs[0].reg, ECX);
        assert_eq!(b.regs[0].reg, EDX);
        assert_eq!(c.arg_class, ArgClass::Stack);
    }

    #[test]
    fn fastcall_skips_registers_for_floats() {
        let mut state = PassingState::new(Abi::FastCall);
        let mut a = desc();
        classify_param(&mut state, &mut a, &Type::Float32);
        assert_eq!(a.arg_class, ArgClass::Stack);
    }

    #[test]
    fn struct_returns() {
        let small =
            crate::ir::types::StructLayout::new_struct(&[Type::Int], PtrWidth::P32);
        let medium = crate::ir::types::StructLayout::new_struct(
            &[Type::Int, Type::Int],
            PtrWidth::P32,
        );
        let large = crate::ir::types::StructLayout::new_struct(
            &[Type::Int, Type::Int, Type::Int],
            PtrWidth::P32,
        );
        assert_eq!(classify_return(&Type::Aggregate(small)), RetLoc::Gpr(EAX));
        assert_eq!(
            classify_return(&Type::Aggregate(medium)),
            RetLoc::GprPair(EAX, EDX)
        );
        assert_eq!(classify_return(&Type::Aggregate(large)), RetLoc::Memory);
    }

    #[test]
    fn callee_pop_accounting() {
        assert_eq!(callee_pop_bytes(Abi::Cdecl, 12, false), 0);
        assert_eq!(callee_pop_bytes(Abi::StdCall, 12, false), 12);
        assert_eq!(callee_pop_bytes(Abi::StdCall, 12, true), 16);
    }
}
