//! Basic blocks.

use anvil_entity::entity_impl;

use crate::binemit::CodeOffset;
use crate::ir::body::Label;
use crate::ir::insn::Inst;

/// An opaque reference to a basic block in a function body.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// The data backing a block handle.
///
/// The `address` and fixup fields are scratch state for one code generation
/// pass: forward branches targeting a block that has not been started yet
/// link their 4-byte displacement holes into `fixup_rel` (each hole stores
/// the backward distance to the previous hole; zero terminates), and
/// pointer-sized holes (jump table entries, label addresses) link into
/// `fixup_abs` the same way. Both chains must be empty once `address` is
/// known.
#[derive(Clone)]
pub struct BlockData {
    /// First label bound to this block, if any. Further labels may alias
    /// the block through the body's label index.
    pub label: Option<Label>,
    /// Instructions in execution order.
    pub insns: Vec<Inst>,
    /// The block's terminator transfers control unconditionally; emission
    /// after this point must open a new block first.
    pub ends_in_dead: bool,
    /// Whether control can reach this block from the top (not only via a
    /// branch). Blocks opened after a dead end are only reachable by label.
    pub entered_via_top: bool,
    /// Code offset of the block once codegen has started it.
    pub address: Option<CodeOffset>,
    /// Head of the relative (PC-relative displacement) fixup chain, or 0.
    pub fixup_rel: CodeOffset,
    /// Head of the absolute (pointer-valued) fixup chain, or 0.
    pub fixup_abs: CodeOffset,
}

impl BlockData {
    /// A new empty block.
    pub fn new() -> BlockData {
        BlockData {
            label: None,
            insns: Vec::new(),
            ends_in_dead: false,
            entered_via_top: true,
            address: None,
            fixup_rel: 0,
            fixup_abs: 0,
        }
    }

    /// Is the block empty of instructions?
    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// The last instruction in the block, if any.
    pub fn last_insn(&self) -> Option<Inst> {
        self.insns.last().copied()
    }

    /// Reset the per-codegen scratch state.
    pub fn reset_codegen_state(&mut self) {
        self.address = None;
        self.fixup_rel = 0;
        self.fixup_abs = 0;
    }
}
