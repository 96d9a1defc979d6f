//! The transient builder state of a function under construction.

use anvil_entity::PrimaryMap;
use log::trace;

use crate::ir::block::{Block, BlockData};
use crate::ir::insn::{Inst, InstData, Slot};
use crate::ir::sig::Signature;
use crate::ir::types::{ConstData, PtrWidth, Type};
use crate::ir::value::{Value, ValueData, ValueFlags};
use crate::isa::TargetIsa;
use crate::{CodegenError, CodegenResult};

/// A label identifier. Labels are monotonic integers allocated by the
/// builder; a label becomes meaningful once it is bound to a block.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

impl Label {
    /// The "no label yet" sentinel. Branch builders allocate a fresh label
    /// when handed this value, mirroring the lazy-label idiom of the API.
    pub const UNDEFINED: Label = Label(u32::MAX);

    /// Is this the undefined sentinel?
    pub fn is_undefined(self) -> bool {
        self == Label::UNDEFINED
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, ".L{}", self.0)
    }
}

/// Addresses of the runtime's unwind support entry points, together with the
/// layout of its per-frame record. The builder wires these into the
/// exception init block; the runtime layer supplies the real values.
#[derive(Clone, Copy)]
pub struct EhRuntime {
    /// Size of the unwind frame record in bytes.
    pub frame_size: u32,
    /// Alignment of the unwind frame record.
    pub frame_align: u32,
    /// Byte offset of the `catch_pc` field inside the record.
    pub catch_pc_offset: i64,
    /// `fn(*mut Frame)` - link a frame at the head of the thread's chain.
    pub push_frame: usize,
    /// `fn()` - unlink the top frame.
    pub pop_frame: usize,
    /// `fn() -> !` - unlink the top frame and rethrow the current exception.
    pub pop_and_rethrow: usize,
    /// `fn(*mut u8) -> !` - throw an exception object.
    pub throw_exception: usize,
    /// `fn() -> *mut u8` - the thread's most recent exception object.
    pub get_last_exception: usize,
}

/// Builder state for one function body.
///
/// Owns all blocks, instructions and values of the function while it is
/// being constructed or compiled. Compiled functions drop this whole
/// structure; only the emitted code and the signature survive.
pub struct FunctionBody {
    /// The function's signature.
    pub signature: Signature,
    /// The target this body is being built for.
    pub isa: &'static dyn TargetIsa,
    /// Pointer width of the target, cached off the ISA.
    pub ptr_width: PtrWidth,

    /// Value pool.
    pub values: PrimaryMap<Value, ValueData>,
    /// Instruction pool.
    pub insts: PrimaryMap<Inst, InstData>,
    /// Block pool.
    pub blocks: PrimaryMap<Block, BlockData>,
    /// Blocks in layout order; authoritative for code generation.
    pub block_order: Vec<Block>,

    /// Label-to-block index.
    pub labels: Vec<Option<Block>>,
    /// Next label number to allocate.
    pub next_label: u32,

    /// The block currently receiving instructions.
    pub current_block: Block,
    /// The entry block holding incoming-parameter instructions.
    pub entry_block: Block,
    /// Insertion point for initialization code moved to the function head.
    pub init_block: Block,

    /// This function's own call reference, for self-tail-call detection.
    pub self_ref: Option<crate::ir::insn::FuncRef>,
    /// Incoming parameter values, one per signature parameter.
    pub params: Vec<Value>,
    /// The caller-supplied structure return pointer, if the return type is
    /// passed by hidden pointer.
    pub struct_return: Option<Value>,
    /// The parent frame pointer value for nested functions.
    pub parent_frame: Option<Value>,

    /// Local variable area size accumulated so far; grows monotonically.
    pub frame_size: u32,
    /// Outgoing call argument area size.
    pub param_area_size: u32,

    /// Some instruction in this body can throw.
    pub may_throw: bool,
    /// This body calls out somewhere.
    pub non_leaf: bool,
    /// A tail call was emitted.
    pub has_tail_call: bool,
    /// The body contains a try region (set by `uses_catcher`).
    pub has_try: bool,
    /// An ordinary return path exists.
    pub ordinary_return: bool,

    /// Deferred stack pop counter (32-bit call conventions).
    pub deferred_pop_items: i64,

    /// Storage for the unwind frame record, reserved when a try is seen.
    pub setjmp_value: Option<Value>,
    /// Value holding the most recently thrown exception object.
    pub thrown_exception: Option<Value>,
    /// Value holding the PC at which the exception was thrown.
    pub thrown_pc: Option<Value>,
    /// Label of the function's catcher block.
    pub catcher_label: Option<Label>,
    /// Unwind runtime wiring, present once `uses_catcher` ran.
    pub eh: Option<EhRuntime>,

    /// Jump tables: inline arrays of labels.
    pub jump_tables: Vec<Vec<Label>>,
}

impl FunctionBody {
    /// Create a new builder for a function with the given signature.
    ///
    /// The entry block is created and made current; the runtime layer runs
    /// the ABI's entry classification to populate it with incoming-parameter
    /// instructions before user code is built.
    pub fn new(signature: Signature, isa: &'static dyn TargetIsa) -> FunctionBody {
        let mut blocks = PrimaryMap::new();
        let entry = blocks.push(BlockData::new());
        let mut body = FunctionBody {
            signature,
            isa,
            ptr_width: isa.ptr_width(),
            values: PrimaryMap::new(),
            insts: PrimaryMap::new(),
            blocks,
            block_order: vec![entry],
            labels: Vec::new(),
            next_label: 0,
            current_block: entry,
            entry_block: entry,
            init_block: entry,
            self_ref: None,
            params: Vec::new(),
            struct_return: None,
            parent_frame: None,
            frame_size: 0,
            param_area_size: 0,
            may_throw: false,
            non_leaf: false,
            has_tail_call: false,
            has_try: false,
            ordinary_return: false,
            deferred_pop_items: 0,
            setjmp_value: None,
            thrown_exception: None,
            thrown_pc: None,
            catcher_label: None,
            eh: None,
            jump_tables: Vec::new(),
        };
        // Everything after the entry instructions goes into a fresh block so
        // that initialization code can later be moved to `init_block`.
        body.init_block = body.current_block;
        body
    }

    // ---- values ----------------------------------------------------------

    /// Create a new local value of the given type.
    pub fn create_value(&mut self, ty: Type) -> Value {
        let mut data = ValueData::new(ty);
        data.flags.insert(ValueFlags::LOCAL);
        self.values.push(data)
    }

    /// Create a new temporary value of the given type.
    pub fn create_temporary(&mut self, ty: Type) -> Value {
        let mut data = ValueData::new(ty);
        data.flags.insert(ValueFlags::TEMPORARY | ValueFlags::LOCAL);
        self.values.push(data)
    }

    /// Create a constant value.
    pub fn create_constant(&mut self, ty: Type, konst: ConstData) -> Value {
        self.values.push(ValueData::constant(ty, konst))
    }

    /// A 32-bit integer constant.
    pub fn const_int(&mut self, v: i32) -> Value {
        self.create_constant(Type::Int, ConstData::Int(v))
    }

    /// A 64-bit integer constant.
    pub fn const_long(&mut self, v: i64) -> Value {
        self.create_constant(Type::Long, ConstData::Long(v))
    }

    /// A pointer-sized integer constant of the given type.
    pub fn const_nint(&mut self, ty: Type, v: i64) -> Value {
        self.create_constant(ty, ConstData::NInt(v))
    }

    /// A single precision constant.
    pub fn const_f32(&mut self, v: f32) -> Value {
        self.create_constant(Type::Float32, ConstData::Float32(v))
    }

    /// A double precision constant.
    pub fn const_f64(&mut self, v: f64) -> Value {
        self.create_constant(Type::Float64, ConstData::Float64(v))
    }

    /// A native extended precision constant.
    pub fn const_nfloat(&mut self, v: f64) -> Value {
        self.create_constant(Type::NFloat, ConstData::NFloat(v))
    }

    /// Note one more use of `value`.
    pub fn value_ref(&mut self, value: Value) {
        self.values[value].usage_count += 1;
    }

    /// The incoming parameter value at `index`.
    pub fn param(&self, index: usize) -> Option<Value> {
        self.params.get(index).copied()
    }

    /// Mark a value addressable: it needs a stable frame slot from now on.
    pub fn set_addressable(&mut self, value: Value) {
        self.values[value].flags.insert(ValueFlags::ADDRESSABLE);
    }

    /// Assign a stable frame slot to `value` if it does not have one yet.
    /// Constants never get slots; they materialize at each use.
    pub fn pin_to_frame(&mut self, value: Value) {
        if self.values[value].has_frame_offset() || self.values[value].is_constant() {
            return;
        }
        let ty = self.values[value].ty.clone();
        let size = ty.size(self.ptr_width).max(1);
        let align = ty.align(self.ptr_width).clamp(8, 16);
        let offset = self.allocate_frame_slot((size + 7) & !7, align);
        let data = &mut self.values[value];
        data.frame_offset = offset;
        data.flags.insert(ValueFlags::HAS_FRAME_OFFSET);
    }

    // ---- blocks and labels ----------------------------------------------

    /// Allocate a fresh label without binding it to a block.
    pub fn reserve_label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    /// Resolve `label`, allocating a fresh one if it is the sentinel.
    pub fn materialize_label(&mut self, label: &mut Label) -> Label {
        if label.is_undefined() {
            *label = self.reserve_label();
        }
        *label
    }

    /// The block a label is bound to, if it has been placed.
    pub fn block_of_label(&self, label: Label) -> Option<Block> {
        self.labels
            .get(label.0 as usize)
            .copied()
            .flatten()
    }

    /// Do two labels denote the same basic block? Labels that were never
    /// placed are equal to nothing, including themselves.
    pub fn labels_equal(&self, a: Label, b: Label) -> bool {
        match (self.block_of_label(a), self.block_of_label(b)) {
            (Some(ba), Some(bb)) => ba == bb,
            _ => false,
        }
    }

    /// Bind `label` to `block`.
    fn bind_label(&mut self, label: Label, block: Block) {
        let idx = label.0 as usize;
        if idx >= self.labels.len() {
            self.labels.resize(idx + 1, None);
        }
        self.labels[idx] = Some(block);
        if self.blocks[block].label.is_none() {
            self.blocks[block].label = Some(label);
        }
    }

    /// Open a new block after the current one and make it current.
    pub fn new_block(&mut self) -> Block {
        let entered_via_top = !self.blocks[self.current_block].ends_in_dead;
        let block = self.blocks.push(BlockData::new());
        self.blocks[block].entered_via_top = entered_via_top;
        let pos = self
            .block_order
            .iter()
            .position(|&b| b == self.current_block)
            .expect("current block must be in layout");
        self.block_order.insert(pos + 1, block);
        self.current_block = block;
        block
    }

    /// Start (or reuse) a block for `label`.
    ///
    /// An empty unlabeled current block is always reused. With `tight`
    /// set, the label may additionally alias a block that already carries
    /// one, so adjacent labels denote the same block.
    pub fn new_block_with_label(&mut self, label: &mut Label, tight: bool) -> CodegenResult<Block> {
        let label = self.materialize_label(label);
        if let Some(existing) = self.block_of_label(label) {
            // The label was already placed; labels can only be placed once.
            if existing != self.current_block {
                return Err(CodegenError::Malformed("label placed twice"));
            }
            return Ok(existing);
        }
        let cur = self.current_block;
        let reusable = self.blocks[cur].is_empty()
            && !self.blocks[cur].ends_in_dead
            && (tight || self.blocks[cur].label.is_none());
        if reusable {
            self.bind_label(label, cur);
            return Ok(cur);
        }
        let block = self.new_block();
        self.bind_label(label, block);
        trace!("placed {} at {}", label, block);
        Ok(block)
    }

    /// Move the blocks between `from_label` (inclusive) and `to_label`
    /// (exclusive) to the head of the function, just after the init block.
    /// Used to hoist initialization code and loop-entry tests.
    pub fn move_blocks_to_start(&mut self, from_label: Label, to_label: Label) -> CodegenResult<()> {
        let range = self.label_range(from_label, to_label)?;
        let moved: Vec<Block> = self.block_order.splice(range.clone(), []).collect();
        let init_pos = self
            .block_order
            .iter()
            .position(|&b| b == self.init_block)
            .expect("init block must be in layout");
        let mut at = init_pos + 1;
        for b in moved {
            self.block_order.insert(at, b);
            at += 1;
        }
        Ok(())
    }

    /// Move the blocks between `from_label` (inclusive) and `to_label`
    /// (exclusive) to the end of the function. Used to relocate loop exit
    /// tests after the loop body.
    pub fn move_blocks_to_end(&mut self, from_label: Label, to_label: Label) -> CodegenResult<()> {
        let range = self.label_range(from_label, to_label)?;
        let moved: Vec<Block> = self.block_order.splice(range, []).collect();
        self.block_order.extend(moved);
        Ok(())
    }

    fn label_range(&self, from_label: Label, to_label: Label) -> CodegenResult<std::ops::Range<usize>> {
        let from_block = self
            .block_of_label(from_label)
            .ok_or(CodegenError::UndefinedLabel(from_label.0))?;
        let to_block = self
            .block_of_label(to_label)
            .ok_or(CodegenError::UndefinedLabel(to_label.0))?;
        let from_pos = self
            .block_order
            .iter()
            .position(|&b| b == from_block)
            .expect("block in layout");
        let to_pos = self
            .block_order
            .iter()
            .position(|&b| b == to_block)
            .expect("block in layout");
        if from_pos > to_pos {
            return Err(CodegenError::Malformed("label range is inverted"));
        }
        Ok(from_pos..to_pos)
    }

    /// Is the block currently receiving instructions dead-ended?
    pub fn current_is_dead(&self) -> bool {
        self.blocks[self.current_block].ends_in_dead
    }

    // ---- instructions ----------------------------------------------------

    /// Append an instruction to the current block.
    pub fn add_insn(&mut self, data: InstData) -> Inst {
        debug_assert!(
            !self.blocks[self.current_block].ends_in_dead,
            "emission after a dead end must open a new block first"
        );
        let inst = self.insts.push(data);
        let cur = self.current_block;
        self.blocks[cur].insns.push(inst);
        inst
    }

    /// The last instruction of the current block.
    pub fn last_insn(&self) -> Option<Inst> {
        self.blocks[self.current_block].last_insn()
    }

    /// Does `inst` define `value` through its dest slot?
    pub fn inst_defines(&self, inst: Inst, value: Value) -> bool {
        let data = &self.insts[inst];
        data.defines_dest() && data.dest.value() == Some(value)
    }

    /// Record one more jump table, returning its index.
    pub fn add_jump_table(&mut self, labels: Vec<Label>) -> u32 {
        self.jump_tables.push(labels);
        (self.jump_tables.len() - 1) as u32
    }

    /// Allocate `size` bytes of frame space with the given alignment and
    /// return the (negative) frame offset. The frame grows monotonically.
    pub fn allocate_frame_slot(&mut self, size: u32, align: u32) -> i32 {
        let align = align.max(1);
        self.frame_size = (self.frame_size + size + align - 1) & !(align - 1);
        -(self.frame_size as i32)
    }

    /// Record that outgoing calls need at least `size` bytes of argument
    /// area.
    pub fn note_param_area(&mut self, size: u32) {
        if size > self.param_area_size {
            self.param_area_size = size;
        }
    }

    /// Iterate instructions of `block` backwards from the end.
    pub fn insns_rev(&self, block: Block) -> impl Iterator<Item = Inst> + '_ {
        self.blocks[block].insns.iter().rev().copied()
    }

    /// Convenience: the instruction data for `inst`.
    pub fn inst(&self, inst: Inst) -> &InstData {
        &self.insts[inst]
    }

    /// Convenience: the value data for `value`.
    pub fn value(&self, value: Value) -> &ValueData {
        &self.values[value]
    }

    /// Replace the destination slot of `inst`.
    pub fn set_inst_dest(&mut self, inst: Inst, dest: Slot) {
        self.insts[inst].dest = dest;
    }
}
