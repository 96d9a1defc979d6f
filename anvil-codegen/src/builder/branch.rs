//! Labels, branches and jump tables.

use crate::ir::insn::{InstData, InstFlags, Slot};
use crate::ir::types::TypeKind;
use crate::ir::value::Value;
use crate::ir::{FunctionBody, Label, Opcode};
use crate::{CodegenError, CodegenResult};

impl FunctionBody {
    /// Place `label` here, starting a new block (or binding the label to
    /// the current block when it is still empty and unlabeled).
    pub fn label(&mut self, label: &mut Label) -> CodegenResult<()> {
        self.flush_defer_pop(0)?;
        self.new_block_with_label(label, false)?;
        Ok(())
    }

    /// Place `label` here, preferring to reuse the current block so that
    /// adjacent labels denote the same block.
    pub fn label_tight(&mut self, label: &mut Label) -> CodegenResult<()> {
        self.flush_defer_pop(0)?;
        self.new_block_with_label(label, true)?;
        Ok(())
    }

    /// Branch unconditionally to `label`, allocating it when undefined.
    /// The current block dead-ends and a new block is opened.
    pub fn branch(&mut self, label: &mut Label) -> CodegenResult<()> {
        self.flush_defer_pop(0)?;
        let label = self.materialize_label(label);
        let mut insn = InstData::new(Opcode::Br);
        insn.flags = InstFlags::DEST_IS_LABEL;
        insn.dest = Slot::Label(label);
        self.add_insn(insn);
        self.blocks[self.current_block].ends_in_dead = true;
        self.new_block();
        Ok(())
    }

    /// Branch to `label` when `value` is non-zero.
    ///
    /// When `value` is the result of the immediately preceding comparison,
    /// the comparison is replaced by a direct conditional branch.
    pub fn branch_if(&mut self, value: Value, label: &mut Label) -> CodegenResult<()> {
        self.branch_on(value, label, false)
    }

    /// Branch to `label` when `value` is zero.
    pub fn branch_if_not(&mut self, value: Value, label: &mut Label) -> CodegenResult<()> {
        self.branch_on(value, label, true)
    }

    fn branch_on(
        &mut self,
        value: Value,
        label: &mut Label,
        inverted: bool,
    ) -> CodegenResult<()> {
        self.flush_defer_pop(0)?;
        let label = self.materialize_label(label);

        // A constant condition becomes an unconditional branch or nothing.
        if self.values[value].is_constant() {
            let taken = self.values[value].is_true() != inverted;
            if taken {
                let mut l = label;
                return self.branch(&mut l);
            }
            return Ok(());
        }

        // Fuse with an immediately preceding comparison that produced this
        // value.
        if self.values[value].flags.contains(crate::ir::ValueFlags::TEMPORARY) {
            if let Some(prev) = self.last_insn() {
                let data = &self.insts[prev];
                if data.dest.value() == Some(value) {
                    let fused = if inverted {
                        data.opcode.branch_for_inverted_compare()
                    } else {
                        data.opcode.branch_for_compare()
                    };
                    if let Some(branch_op) = fused {
                        // Capture the operands, then replace the compare
                        // with the branch in place.
                        let v1 = data.value1.clone();
                        let v2 = data.value2.clone();
                        let mut insn = InstData::new(branch_op);
                        insn.flags = InstFlags::DEST_IS_LABEL;
                        insn.dest = Slot::Label(label);
                        insn.value1 = v1;
                        insn.value2 = v2;
                        self.insts[prev] = insn;
                        self.new_block();
                        return Ok(());
                    }
                }
            }
        }

        // Coerce to something testable and emit a truth-test branch.
        let kind = self.promoted_kind(value);
        let (op, value, value2) = match kind {
            TypeKind::Int | TypeKind::UInt => {
                let op = if inverted { Opcode::BrIFalse } else { Opcode::BrITrue };
                (op, value, None)
            }
            TypeKind::Long | TypeKind::ULong => {
                let op = if inverted { Opcode::BrLFalse } else { Opcode::BrLTrue };
                (op, value, None)
            }
            TypeKind::Float32 => {
                let z = self.zero_constant(TypeKind::Float32);
                let op = if inverted { Opcode::BrFEq } else { Opcode::BrFNe };
                (op, value, Some(z))
            }
            TypeKind::Float64 => {
                let z = self.zero_constant(TypeKind::Float64);
                let op = if inverted { Opcode::BrDEq } else { Opcode::BrDNe };
                (op, value, Some(z))
            }
            TypeKind::NFloat => {
                let z = self.zero_constant(TypeKind::NFloat);
                let op = if inverted { Opcode::BrNfEq } else { Opcode::BrNfNe };
                (op, value, Some(z))
            }
            _ => return Err(CodegenError::UnsupportedType),
        };
        self.value_ref(value);
        let mut insn = InstData::new(op);
        insn.flags = InstFlags::DEST_IS_LABEL;
        insn.dest = Slot::Label(label);
        insn.value1 = Slot::Value(value);
        if let Some(v2) = value2 {
            self.value_ref(v2);
            insn.value2 = Slot::Value(v2);
        }
        self.add_insn(insn);
        self.new_block();
        Ok(())
    }

    /// Branch through a table of labels indexed by `value`. Undefined
    /// entries are allocated fresh labels in place.
    pub fn jump_table(&mut self, value: Value, labels: &mut [Label]) -> CodegenResult<()> {
        if labels.is_empty() {
            return Err(CodegenError::Malformed("empty jump table"));
        }
        self.flush_defer_pop(0)?;
        for label in labels.iter_mut() {
            self.materialize_label(label);
        }
        let value = self.convert(value, crate::ir::Type::NInt, false)?;
        let table = self.add_jump_table(labels.to_vec());
        self.value_ref(value);
        let mut insn = InstData::new(Opcode::JumpTable);
        insn.dest = Slot::Table(table);
        insn.value1 = Slot::Value(value);
        self.add_insn(insn);
        self.blocks[self.current_block].ends_in_dead = true;
        self.new_block();
        Ok(())
    }

    /// Materialize the address a label will have once compiled. Reserves
    /// the label for PC capture; the label must be placed somewhere in the
    /// function before compilation.
    pub fn address_of_label(&mut self, label: &mut Label) -> CodegenResult<Value> {
        let label = self.materialize_label(label);
        let dest = self.create_temporary(crate::ir::Type::Ptr);
        let mut insn = InstData::new(Opcode::AddressOfLabel);
        insn.flags = InstFlags::VALUE1_IS_LABEL;
        insn.dest = Slot::Value(dest);
        insn.value1 = Slot::Label(label);
        self.add_insn(insn);
        Ok(dest)
    }

    /// Append a no-op instruction.
    pub fn nop(&mut self) {
        self.create_noarg_note(Opcode::Nop);
    }

    /// Record a bytecode offset mark at the current position.
    pub fn mark_offset(&mut self, offset: i32) {
        let v = self.const_nint(crate::ir::Type::NInt, offset as i64);
        self.create_unary_note(Opcode::MarkOffset, v);
    }
}
