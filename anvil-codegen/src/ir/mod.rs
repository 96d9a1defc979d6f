//! Intermediate representation of function bodies.
//!
//! The IR is a typed three-address form: every instruction has an opcode and
//! up to three operand slots whose interpretation is governed by the
//! instruction flags. Instructions live in basic blocks; blocks live in an
//! ordered layout inside a [`FunctionBody`]. Cross-references between
//! entities are typed indices into pools owned by the body, so nothing here
//! is reference counted and nothing outlives the body.

pub mod block;
pub mod body;
pub mod insn;
pub mod sig;
pub mod types;
pub mod value;

pub use self::block::{Block, BlockData};
pub use self::body::{FunctionBody, Label};
pub use self::insn::{FuncRef, Inst, InstData, InstFlags, Opcode, Slot};
pub use self::sig::{Abi, SigData, Signature};
pub use self::types::{ConstData, PtrWidth, StructLayout, Type, TypeKind};
pub use self::value::{Value, ValueData, ValueFlags};
