//! Function signatures and calling-convention selection.

use std::sync::Arc;

use crate::ir::types::{PtrWidth, Type, TypeKind};

/// The calling convention of a signature.
///
/// On x86-64 everything maps onto the System V convention; the distinctions
/// matter on 32-bit x86 where the conventions disagree about who pops the
/// arguments and whether any travel in registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Abi {
    /// The default C convention: caller pops, everything on the stack (x86)
    /// or the System V register convention (x86-64).
    Cdecl,
    /// `cdecl` with a variable argument tail.
    VarArg,
    /// Win32 `stdcall`: like `cdecl` but the callee pops its arguments.
    StdCall,
    /// Win32 `fastcall`: first two word-sized scalars in `ecx`/`edx`,
    /// callee pops the rest.
    FastCall,
}

impl Abi {
    /// Does the callee pop the stack arguments on return (32-bit only)?
    pub fn callee_pops(self) -> bool {
        matches!(self, Abi::StdCall | Abi::FastCall)
    }
}

/// The payload of a signature type.
#[derive(Clone, Debug)]
pub struct SigData {
    /// Calling convention.
    pub abi: Abi,
    /// Return type.
    pub ret: Type,
    /// Parameter types in declaration order.
    pub params: Vec<Type>,
}

impl SigData {
    /// Two signatures are interchangeable for the purpose of tail calls when
    /// their ABI matches and every component agrees kind-for-kind (struct
    /// components must also agree on size and alignment).
    pub fn identical(&self, other: &SigData, width: PtrWidth) -> bool {
        if self.abi != other.abi || self.params.len() != other.params.len() {
            return false;
        }
        if !type_identical(&self.ret, &other.ret, width) {
            return false;
        }
        self.params
            .iter()
            .zip(other.params.iter())
            .all(|(a, b)| type_identical(a, b, width))
    }
}

fn type_identical(a: &Type, b: &Type, width: PtrWidth) -> bool {
    let (na, nb) = (a.normalize(width), b.normalize(width));
    if na.kind() != nb.kind() {
        // "double" and "nfloat" never alias: the extended format is real on
        // both targets we support.
        return false;
    }
    match (na.kind(), a.layout(), b.layout()) {
        (TypeKind::Struct | TypeKind::Union, Some(la), Some(lb)) => {
            la.size == lb.size && la.align == lb.align
        }
        _ => true,
    }
}

/// A shared, immutable function signature.
#[derive(Clone, Debug)]
pub struct Signature(pub Arc<SigData>);

impl Signature {
    /// Create a new signature.
    pub fn new(abi: Abi, ret: Type, params: Vec<Type>) -> Signature {
        Signature(Arc::new(SigData { abi, ret, params }))
    }

    /// The signature viewed as a value type (a function pointer type).
    pub fn as_type(&self) -> Type {
        Type::Sig(self.0.clone())
    }

    /// Number of declared parameters.
    pub fn num_params(&self) -> usize {
        self.0.params.len()
    }
}

impl std::ops::Deref for Signature {
    type Target = SigData;

    fn deref(&self) -> &SigData {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_signatures() {
        let a = Signature::new(Abi::Cdecl, Type::Int, vec![Type::Int, Type::Int]);
        let b = Signature::new(Abi::Cdecl, Type::Int, vec![Type::Int, Type::Int]);
        let c = Signature::new(Abi::Cdecl, Type::Int, vec![Type::Int]);
        let d = Signature::new(Abi::StdCall, Type::Int, vec![Type::Int, Type::Int]);
        assert!(a.identical(&b, PtrWidth::P64));
        assert!(!a.identical(&c, PtrWidth::P64));
        assert!(!a.identical(&d, PtrWidth::P64));
    }

    #[test]
    fn pointer_params_normalize() {
        let a = Signature::new(Abi::Cdecl, Type::Void, vec![Type::Ptr]);
        let b = Signature::new(Abi::Cdecl, Type::Void, vec![Type::NUInt]);
        assert!(a.identical(&b, PtrWidth::P64));
    }
}
