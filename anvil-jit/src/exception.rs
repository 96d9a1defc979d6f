//! Builtin exception objects.
//!
//! Faults detected by emitted code (null dereference, division by zero,
//! overflow, ...) are thrown as pointers to static records so the throw
//! path never allocates. Result codes follow the embedding ABI in
//! [`anvil_codegen::fold::builtin`].

use anvil_codegen::fold::{builtin, set_builtin_thrower};

use crate::unwind::exception_throw;

/// A builtin exception record. User exceptions are arbitrary pointers; a
/// pointer into [`BUILTIN_EXCEPTIONS`] identifies a runtime fault.
#[repr(C)]
#[derive(Debug)]
pub struct BuiltinException {
    /// The fault code (`builtin::DIVISION_BY_ZERO` and friends).
    pub code: i32,
}

/// The static fault records, indexed by `-code - 1`.
pub static BUILTIN_EXCEPTIONS: [BuiltinException; 8] = [
    BuiltinException { code: builtin::NULL_REFERENCE },
    BuiltinException { code: builtin::NULL_FUNCTION },
    BuiltinException { code: builtin::CALLED_NESTED },
    BuiltinException { code: builtin::DIVISION_BY_ZERO },
    BuiltinException { code: builtin::ARITHMETIC },
    BuiltinException { code: builtin::OVERFLOW },
    BuiltinException { code: builtin::OUT_OF_MEMORY },
    BuiltinException { code: builtin::COMPILE_ERROR },
];

/// The exception object thrown for `code`.
pub fn builtin_exception_object(code: i32) -> *mut u8 {
    let index = (-code - 1).clamp(0, 7) as usize;
    &BUILTIN_EXCEPTIONS[index] as *const BuiltinException as *mut u8
}

/// Raise a builtin exception. Emitted code calls this through the runtime
/// hooks; intrinsics reach it through the thrower installed at context
/// creation.
pub extern "C" fn exception_builtin(code: i32) -> ! {
    exception_throw(builtin_exception_object(code))
}

/// The fault code of an exception object, when it is one of the builtin
/// records.
pub fn exception_code(obj: *const u8) -> Option<i32> {
    let base = BUILTIN_EXCEPTIONS.as_ptr() as usize;
    let end = base + core::mem::size_of_val(&BUILTIN_EXCEPTIONS);
    let p = obj as usize;
    if p >= base && p < end {
        let index = (p - base) / core::mem::size_of::<BuiltinException>();
        Some(BUILTIN_EXCEPTIONS[index].code)
    } else {
        None
    }
}

/// Install the thrower hook so constant-fold intrinsics fault through the
/// same path as emitted code.
pub(crate) fn install_thrower() {
    set_builtin_thrower(exception_builtin);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        let obj = builtin_exception_object(builtin::DIVISION_BY_ZERO);
        assert_eq!(exception_code(obj), Some(builtin::DIVISION_BY_ZERO));
        assert_eq!(exception_code(core::ptr::null()), None);
    }
}
