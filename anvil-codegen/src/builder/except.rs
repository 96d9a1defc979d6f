//! Exception handling: the lazy unwind init block, catchers, throws,
//! `finally` clauses and filters.
//!
//! A function with a `try` region gets an init block at its head that
//! reserves an unwind frame record on the stack, links it into the
//! thread's chain and captures the resume context. When an exception
//! unwinds to this frame, control re-enters at the capture point with a
//! nonzero flag; the init code then dispatches to the catcher if a call
//! site stashed a `catch_pc`, and rethrows otherwise.

use crate::builder::call::CallFlags;
use crate::ir::body::EhRuntime;
use crate::ir::insn::{InstData, Slot};
use crate::ir::sig::{Abi, Signature};
use crate::ir::types::{StructLayout, Type};
use crate::ir::value::Value;
use crate::ir::{FunctionBody, Label, Opcode};
use crate::{CodegenError, CodegenResult};

impl FunctionBody {
    /// Declare that this function contains a `catch` clause. Must run
    /// before any instruction covered by the `try`. Idempotent.
    pub fn uses_catcher(&mut self, eh: EhRuntime) -> CodegenResult<()> {
        if self.has_try {
            return Ok(());
        }
        self.has_try = true;
        self.may_throw = true;
        self.non_leaf = true;
        self.eh = Some(eh);
        self.initialize_unwind_block()
    }

    /// The value holding the most recently thrown exception object.
    pub fn thrown_exception_value(&mut self) -> Value {
        match self.thrown_exception {
            Some(v) => v,
            None => {
                let v = self.create_value(Type::Ptr);
                self.thrown_exception = Some(v);
                v
            }
        }
    }

    /// Throw `value` as an exception object.
    pub fn throw(&mut self, value: Value) -> CodegenResult<()> {
        self.may_throw = true;
        self.non_leaf = true;
        let value = self.convert(value, Type::Ptr, false)?;
        self.create_unary_note(Opcode::Throw, value);
        self.blocks[self.current_block].ends_in_dead = true;
        self.new_block();
        Ok(())
    }

    /// Start the function's catcher block. There is exactly one; all
    /// exceptions caught by this function arrive here. Returns the value
    /// holding the thrown exception.
    pub fn start_catcher(&mut self) -> CodegenResult<Value> {
        let mut label = self
            .catcher_label
            .ok_or(CodegenError::Malformed("start_catcher without uses_catcher"))?;
        self.label_tight(&mut label)?;
        self.catcher_label = Some(label);
        let value = self.thrown_exception_value();
        let eh = self.eh.ok_or(CodegenError::Malformed("missing unwind runtime"))?;
        let sig = Signature::new(Abi::Cdecl, Type::Ptr, vec![]);
        let last = self.call_native(
            "exception_get_last",
            eh.get_last_exception,
            &sig,
            &[],
            CallFlags::NOTHROW,
        )?;
        self.store(value, last)?;
        Ok(value)
    }

    /// Branch to `label` when the PC at which the current exception was
    /// thrown does not fall between `start` and `end`.
    pub fn branch_if_pc_not_in_range(
        &mut self,
        start: Label,
        end: Label,
        label: &mut Label,
    ) -> CodegenResult<()> {
        if !self.has_try {
            return Err(CodegenError::Malformed("no try region in this function"));
        }
        self.flush_defer_pop(0)?;
        let pc = self
            .thrown_pc
            .ok_or(CodegenError::Malformed("no thrown pc value"))?;
        let mut start = start;
        let mut end = end;
        let start_addr = self.address_of_label(&mut start)?;
        let below = self.lt(pc, start_addr)?;
        self.branch_if(below, label)?;
        let end_addr = self.address_of_label(&mut end)?;
        let above = self.ge(pc, end_addr)?;
        self.branch_if(above, label)?;
        Ok(())
    }

    /// Rethrow the current exception because no catcher in this function
    /// wants it. Intended for use inside catcher blocks.
    pub fn rethrow_unhandled(&mut self) -> CodegenResult<()> {
        let eh = self.eh.ok_or(CodegenError::Malformed("missing unwind runtime"))?;
        let value = self.thrown_exception_value();
        let void_sig = Signature::new(Abi::Cdecl, Type::Void, vec![]);
        self.call_native(
            "unwind_pop_frame",
            eh.pop_frame,
            &void_sig,
            &[],
            CallFlags::NOTHROW,
        )?;
        let throw_sig = Signature::new(Abi::Cdecl, Type::Void, vec![Type::Ptr]);
        self.call_native(
            "exception_throw",
            eh.throw_exception,
            &throw_sig,
            &[value],
            CallFlags::NOTHROW | CallFlags::NORETURN,
        )?;
        self.blocks[self.current_block].ends_in_dead = true;
        self.new_block();
        Ok(())
    }

    /// Start a `finally` clause at `finally_label`.
    pub fn start_finally(&mut self, finally_label: &mut Label) -> CodegenResult<()> {
        self.label_tight(finally_label)?;
        self.create_noarg_note(Opcode::EnterFinally);
        Ok(())
    }

    /// Return from a `finally` clause to wherever it was called from.
    pub fn return_from_finally(&mut self) -> CodegenResult<()> {
        self.create_noarg_note(Opcode::LeaveFinally);
        self.blocks[self.current_block].ends_in_dead = true;
        self.new_block();
        Ok(())
    }

    /// Call a `finally` clause. The clause may be placed later in the
    /// function; the call site patches through the block's fixup chain.
    pub fn call_finally(&mut self, finally_label: &mut Label) -> CodegenResult<()> {
        self.flush_defer_pop(0)?;
        let label = self.materialize_label(finally_label);
        let mut insn = InstData::new(Opcode::CallFinally);
        insn.flags = crate::ir::InstFlags::DEST_IS_LABEL;
        insn.dest = Slot::Label(label);
        self.add_insn(insn);
        self.non_leaf = true;
        Ok(())
    }

    /// Start a `filter` clause receiving a value of `ty`.
    pub fn start_filter(&mut self, label: &mut Label, ty: Type) -> CodegenResult<Value> {
        self.label_tight(label)?;
        let dest = self.create_value(ty);
        let mut insn = InstData::new(Opcode::EnterFilter);
        insn.dest = Slot::Value(dest);
        self.add_insn(insn);
        Ok(dest)
    }

    /// Return `value` from a `filter` clause.
    pub fn return_from_filter(&mut self, value: Value) -> CodegenResult<()> {
        self.create_unary_note(Opcode::LeaveFilter, value);
        self.blocks[self.current_block].ends_in_dead = true;
        self.new_block();
        Ok(())
    }

    /// Call a `filter` clause with `value`, receiving its result.
    pub fn call_filter(
        &mut self,
        label: &mut Label,
        value: Value,
        result_ty: Type,
    ) -> CodegenResult<Value> {
        self.flush_defer_pop(0)?;
        let label = self.materialize_label(label);
        self.value_ref(value);
        let mut insn = InstData::new(Opcode::CallFilter);
        insn.flags = crate::ir::InstFlags::DEST_IS_LABEL;
        insn.dest = Slot::Label(label);
        insn.value1 = Slot::Value(value);
        self.add_insn(insn);
        self.non_leaf = true;
        // The filter leaves its result where `EnterFilter` finds its
        // argument; receive it the same way.
        let dest = self.create_value(result_ty);
        let mut recv = InstData::new(Opcode::EnterFilter);
        recv.dest = Slot::Value(dest);
        self.add_insn(recv);
        Ok(dest)
    }

    /// Build the init block that reserves the unwind frame, links it and
    /// captures the resume context. Runs once per function, at the head.
    fn initialize_unwind_block(&mut self) -> CodegenResult<()> {
        if self.setjmp_value.is_some() {
            return Ok(());
        }
        let eh = self.eh.expect("unwind runtime installed by uses_catcher");
        self.catcher_label = Some(self.reserve_label());

        let mut start_label = Label::UNDEFINED;
        let mut end_label = Label::UNDEFINED;
        let mut code_label = Label::UNDEFINED;
        let mut rethrow_label = Label::UNDEFINED;

        // Mark the start of the init code.
        self.label_tight(&mut start_label)?;

        // Reserve stack storage for the frame record.
        let layout = StructLayout::opaque(eh.frame_size, eh.frame_align);
        let frame = self.create_value(Type::Aggregate(layout));
        self.setjmp_value = Some(frame);

        // Link the frame into the thread's chain.
        let addr = self.address_of(frame)?;
        let push_sig = Signature::new(Abi::Cdecl, Type::Void, vec![Type::Ptr]);
        self.call_native(
            "unwind_push_frame",
            eh.push_frame,
            &push_sig,
            &[addr],
            CallFlags::NOTHROW,
        )?;

        // Capture the resume context into the frame; yields zero when
        // falling through, nonzero when re-entered by a throw.
        let addr = self.address_of(frame)?;
        let flag = self.create_temporary(Type::Int);
        self.value_ref(addr);
        let mut capture = InstData::new(Opcode::CaptureContext);
        capture.dest = Slot::Value(flag);
        capture.value1 = Slot::Value(addr);
        self.add_insn(capture);

        self.branch_if_not(flag, &mut code_label)?;

        // Exceptional re-entry: fetch and clear the stashed catch_pc.
        let pc = self.create_value(Type::Ptr);
        self.thrown_pc = Some(pc);
        let addr = self.address_of(frame)?;
        let stashed = self.load_relative(addr, eh.catch_pc_offset, Type::Ptr)?;
        self.store(pc, stashed)?;
        self.branch_if_not(stashed, &mut rethrow_label)?;

        let null = self.const_nint(Type::Ptr, 0);
        let addr = self.address_of(frame)?;
        self.store_relative(addr, eh.catch_pc_offset, null)?;

        let mut catcher = self.catcher_label.expect("reserved above");
        self.branch(&mut catcher)?;
        self.catcher_label = Some(catcher);

        // No catch_pc: unlink this frame and rethrow to the next one.
        self.label_tight(&mut rethrow_label)?;
        let void_sig = Signature::new(Abi::Cdecl, Type::Void, vec![]);
        self.call_native(
            "unwind_pop_and_rethrow",
            eh.pop_and_rethrow,
            &void_sig,
            &[],
            CallFlags::NOTHROW | CallFlags::NORETURN,
        )?;

        self.label_tight(&mut code_label)?;
        self.label(&mut end_label)?;

        // Hoist the whole init sequence to the function head.
        self.move_blocks_to_start(start_label, end_label)
    }
}
