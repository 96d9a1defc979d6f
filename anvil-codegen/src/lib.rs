//! Code generation library for the anvil JIT.
//!
//! This crate owns everything between the user-facing instruction builder and
//! finished machine code in an executable region:
//!
//! - the typed three-address intermediate representation (`ir`),
//! - the instruction builder with type promotion, constant folding and
//!   peephole opcode selection (`builder`),
//! - calling-convention classification for System V AMD64 and the 32-bit
//!   cdecl/stdcall/fastcall conventions (`abi`),
//! - the x86 and x86-64 instruction encoders and per-opcode rules (`isa`),
//! - the code buffer with in-placeholder fixup chains (`binemit`),
//! - and the compile driver that walks blocks and patches forward branches
//!   (`compile`).
//!
//! The register allocator proper is not part of this crate; the rules engine
//! consumes a register assignment strategy through the `regs` seam. Runtime
//! concerns (executable memory, trampolines, unwinding) live in `anvil-jit`.

#![allow(clippy::new_without_default)]

pub mod abi;
pub mod binemit;
pub mod builder;
pub mod compile;
pub mod fold;
pub mod ir;
pub mod isa;
pub mod regs;

mod error;

pub use crate::error::CodegenError;

/// A compact result type used throughout the builder and emitters.
pub type CodegenResult<T> = Result<T, CodegenError>;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
