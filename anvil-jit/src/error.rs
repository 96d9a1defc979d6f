//! Error type for the JIT runtime.

use thiserror::Error;

/// An error from the JIT runtime.
#[derive(Error, Debug)]
pub enum JitError {
    /// A code or trampoline pool could not be grown.
    #[error("out of executable memory")]
    OutOfMemory,

    /// The referenced function does not exist in this context.
    #[error("unknown function")]
    UnknownFunction,

    /// The function has no body under construction.
    #[error("function has no builder")]
    NoBuilder,

    /// The user's on-demand compiler reported failure.
    #[error("on-demand compilation failed")]
    CompileFailed,

    /// A nested function was applied from outside its parent.
    #[error("nested function called directly")]
    CalledNested,

    /// Code generation failed.
    #[error("codegen: {0}")]
    Codegen(#[from] anvil_codegen::CodegenError),
}
