//! Error type for the code generation library.

use thiserror::Error;

/// An error produced while building or compiling a function.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodegenError {
    /// A pool or code-region allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// The function body references a label that was never placed and the
    /// operation cannot create the block lazily.
    #[error("undefined label {0}")]
    UndefinedLabel(u32),

    /// An operation was applied to a value of an unsupported type.
    #[error("unsupported type for operation")]
    UnsupportedType,

    /// The instruction stream is malformed (e.g. emission after a dead end
    /// without opening a new block).
    #[error("malformed instruction stream: {0}")]
    Malformed(&'static str),

    /// The target ISA cannot encode the requested operation.
    #[error("unsupported instruction for target")]
    Unencodable,

    /// The reserved code region was too small for the emitted function.
    ///
    /// The compile driver treats this as a request to grow the region and
    /// restart emission; it never escapes to the user.
    #[error("code region exhausted")]
    CodeTooLarge,
}
