//! The anvil JIT runtime.
//!
//! This crate turns the code generation library into a working just-in-time
//! compiler: it owns the executable memory pools, creates functions with
//! their redirector/indirector trampolines, drives on-demand compilation,
//! marshals calls from Rust into JIT'd code (`apply`), builds closures for
//! plain C callers, and carries the thread-local unwind chain that lets
//! exceptions cross JIT frames.
//!
//! ```no_run
//! use anvil_codegen::ir::{Abi, Signature, Type};
//! use anvil_jit::Context;
//!
//! let ctx = Context::new();
//! let f = ctx
//!     .create_function(Signature::new(Abi::Cdecl, Type::Int, vec![Type::Int, Type::Int]))
//!     .unwrap();
//! ctx.build(f, |body| {
//!     let a = body.param(0).unwrap();
//!     let b = body.param(1).unwrap();
//!     let sum = body.add(a, b)?;
//!     body.return_(Some(sum))
//! })
//! .unwrap()
//! .unwrap();
//! ctx.compile(f).unwrap();
//!
//! let mut result = 0i32;
//! let args = [&3i32 as *const i32 as *const u8, &4i32 as *const i32 as *const u8];
//! assert!(ctx
//!     .apply(f, &args, &mut result as *mut i32 as *mut u8)
//!     .unwrap());
//! assert_eq!(result, 7);
//! ```

mod apply;
mod context;
mod error;
mod function;
mod memory;
mod trampoline;

pub mod exception;
pub mod unwind;

pub use crate::context::{Context, FuncId, OnDemandCompiler, OnDemandResult};
pub use crate::error::JitError;
pub use crate::exception::{exception_code, BUILTIN_EXCEPTIONS};

pub use anvil_codegen::builder::call::{CallFlags, CalleeInfo};
pub use anvil_codegen::ir;
