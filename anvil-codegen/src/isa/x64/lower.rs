//! Per-opcode rules for x86-64.
//!
//! One IR instruction at a time is dispatched to the encoders, with operand
//! staging through a fixed set of scratch registers (`rax`/`rcx`/`rdx`,
//! `xmm8`/`xmm9`, and the x87 stack for extended floats). Values live in
//! frame slots between instructions; the register assignment seam is this
//! staging discipline, so a richer allocator can replace it without
//! touching the opcode rules.

use log::trace;

use crate::binemit::CodeBuffer;
use crate::builder::mem::check_is_redundant;
use crate::compile::{CompileEnv, EmitInfo};
use crate::fold::builtin;
use crate::ir::insn::{Inst, Slot};
use crate::ir::types::TypeKind;
use crate::ir::value::Value;
use crate::ir::{Block, FunctionBody, Label, Opcode};
use crate::isa::x64::emit::{self, GenState};
use crate::isa::x64::enc::{self, Alu, FpOp, Shift, SseOp};
use crate::isa::x64::PROLOG_SIZE;
use crate::regs::x64::{self, encoding};
use crate::{CodegenError, CodegenResult};

/// Does the x86-64 backend emit this opcode directly?
///
/// Checked 64-bit/float range conversions and the float-to-unsigned-64
/// family go through intrinsics instead of long inline sequences.
pub fn opcode_is_supported(op: Opcode) -> bool {
    use Opcode::*;
    !matches!(
        op,
        ULongToFloat32
            | ULongToFloat64
            | ULongToNFloat
            | Float32ToULong
            | Float64ToULong
            | NFloatToInt
            | NFloatToUInt
            | NFloatToLong
            | NFloatToULong
            | CheckFloat32ToInt
            | CheckFloat32ToUInt
            | CheckFloat32ToLong
            | CheckFloat32ToULong
            | CheckFloat64ToInt
            | CheckFloat64ToUInt
            | CheckFloat64ToLong
            | CheckFloat64ToULong
            | CheckNFloatToInt
            | CheckNFloatToUInt
            | CheckNFloatToLong
            | CheckNFloatToULong
    )
}

/// Emit a whole body: blocks in layout order, then the epilogue, then the
/// right-aligned prologue into the reserved head slot.
pub fn emit_body(
    body: &mut FunctionBody,
    buf: &mut CodeBuffer,
    env: &mut CompileEnv,
) -> CodegenResult<EmitInfo> {
    let mut gen = GenState::new(buf, env);
    gen.buf.reserve(PROLOG_SIZE);

    let order = body.block_order.clone();
    for block in order {
        emit::start_block(&mut gen, body, block);
        let insns = body.blocks[block].insns.clone();
        for (index, inst) in insns.iter().enumerate() {
            gen_insn(&mut gen, body, block, *inst, index)?;
        }
    }
    emit::emit_epilog(&mut gen, body);
    let entry_offset = emit::emit_prolog(&mut gen, body);
    Ok(EmitInfo {
        entry_offset,
        code_size: gen.buf.offset(),
        marks: gen.marks,
    })
}

// ---- operand helpers -----------------------------------------------------

fn value_slot(slot: &Slot) -> CodegenResult<Value> {
    slot.value().ok_or(CodegenError::Malformed("expected value operand"))
}

fn label_slot(slot: &Slot) -> CodegenResult<Label> {
    slot.label().ok_or(CodegenError::Malformed("expected label operand"))
}

fn dest_value(body: &FunctionBody, inst: Inst) -> CodegenResult<Value> {
    value_slot(&body.insts[inst].dest)
}

fn value1(body: &FunctionBody, inst: Inst) -> CodegenResult<Value> {
    value_slot(&body.insts[inst].value1)
}

fn value2(body: &FunctionBody, inst: Inst) -> CodegenResult<Value> {
    value_slot(&body.insts[inst].value2)
}

fn nint_of(body: &FunctionBody, value: Value) -> i64 {
    body.values[value].nint_constant().unwrap_or(0)
}

/// The GPR condition code for an integer compare opcode.
fn int_cc(op: Opcode) -> u8 {
    use Opcode::*;
    match op {
        IEq | LEq | BrIEq | BrLEq => enc::CC_E,
        INe | LNe | BrINe | BrLNe => enc::CC_NE,
        ILt | LLt | BrILt | BrLLt => enc::CC_L,
        ILtUn | LLtUn | BrILtUn | BrLLtUn => enc::CC_B,
        ILe | LLe | BrILe | BrLLe => enc::CC_LE,
        ILeUn | LLeUn | BrILeUn | BrLLeUn => enc::CC_BE,
        IGt | LGt | BrIGt | BrLGt => enc::CC_G,
        IGtUn | LGtUn | BrIGtUn | BrLGtUn => enc::CC_A,
        IGe | LGe | BrIGe | BrLGe => enc::CC_GE,
        IGeUn | LGeUn | BrIGeUn | BrLGeUn => enc::CC_AE,
        _ => unreachable!("not an integer compare: {op:?}"),
    }
}

/// Float compare staging: the unsigned-style condition after `ucomis`, and
/// how a NaN outcome must be treated.
struct FloatCond {
    cc: u8,
    /// NaN makes the condition true (the `Inv` family).
    nan_true: bool,
    /// NaN makes the raw `cc` read true even though the condition is false,
    /// so the parity flag must veto it.
    nan_poisons_cc: bool,
}

fn float_cond(op: Opcode) -> FloatCond {
    use Opcode::*;
    match op {
        FEq | DEq | NfEq | BrFEq | BrDEq | BrNfEq => FloatCond {
            cc: enc::CC_E,
            nan_true: false,
            nan_poisons_cc: true,
        },
        FNe | DNe | NfNe | BrFNe | BrDNe | BrNfNe => FloatCond {
            cc: enc::CC_NE,
            nan_true: true,
            nan_poisons_cc: false,
        },
        FLt | DLt | NfLt | BrFLt | BrDLt | BrNfLt => FloatCond {
            cc: enc::CC_B,
            nan_true: false,
            nan_poisons_cc: true,
        },
        FLtInv | DLtInv | NfLtInv | BrFLtInv | BrDLtInv | BrNfLtInv => FloatCond {
            cc: enc::CC_B,
            nan_true: true,
            nan_poisons_cc: false,
        },
        FLe | DLe | NfLe | BrFLe | BrDLe | BrNfLe => FloatCond {
            cc: enc::CC_BE,
            nan_true: false,
            nan_poisons_cc: true,
        },
        FLeInv | DLeInv | NfLeInv | BrFLeInv | BrDLeInv | BrNfLeInv => FloatCond {
            cc: enc::CC_BE,
            nan_true: true,
            nan_poisons_cc: false,
        },
        FGt | DGt | NfGt | BrFGt | BrDGt | BrNfGt => FloatCond {
            cc: enc::CC_A,
            nan_true: false,
            nan_poisons_cc: false,
        },
        FGtInv | DGtInv | NfGtInv | BrFGtInv | BrDGtInv | BrNfGtInv => FloatCond {
            cc: enc::CC_A,
            nan_true: true,
            nan_poisons_cc: false,
        },
        FGe | DGe | NfGe | BrFGe | BrDGe | BrNfGe => FloatCond {
            cc: enc::CC_AE,
            nan_true: false,
            nan_poisons_cc: false,
        },
        FGeInv | DGeInv | NfGeInv | BrFGeInv | BrDGeInv | BrNfGeInv => FloatCond {
            cc: enc::CC_AE,
            nan_true: true,
            nan_poisons_cc: false,
        },
        _ => unreachable!("not a float compare: {op:?}"),
    }
}

/// Stage a float comparison's flags: loads operands and emits `ucomis` or
/// the x87 equivalent.
fn stage_float_compare(
    gen: &mut GenState,
    body: &mut FunctionBody,
    op: Opcode,
    a: Value,
    b: Value,
) {
    use Opcode::*;
    match op {
        NfEq | NfNe | NfLt | NfLe | NfGt | NfGe | NfLtInv | NfLeInv | NfGtInv | NfGeInv
        | BrNfEq | BrNfNe | BrNfLt | BrNfLe | BrNfGt | BrNfGe | BrNfLtInv | BrNfLeInv
        | BrNfGtInv | BrNfGeInv => {
            // fucomip compares st(0) with st(1), so load b first.
            emit::load_fpu(gen, body, b);
            emit::load_fpu(gen, body, a);
            enc::fucomip(gen.buf, 1);
            gen.fp_top -= 1;
            emit::move_top(gen, 0);
        }
        _ => {
            let double = !matches!(
                op,
                FEq | FNe | FLt | FLe | FGt | FGe | FLtInv | FLeInv | FGtInv | FGeInv
                    | BrFEq | BrFNe | BrFLt | BrFLe | BrFGt | BrFGe | BrFLtInv | BrFLeInv
                    | BrFGtInv | BrFGeInv
            );
            emit::load_xmm(gen, body, a, x64::XMM8, double);
            emit::load_xmm(gen, body, b, x64::XMM9, double);
            enc::ucomis_xreg_xreg(gen.buf, encoding(x64::XMM8), encoding(x64::XMM9), double);
        }
    }
}

/// Stage an integer comparison's flags.
fn stage_int_compare(gen: &mut GenState, body: &mut FunctionBody, size: u8, a: Value, b: Value) {
    emit::load_gpr(gen, body, a, x64::RAX);
    if let Some(imm) = body.values[b].nint_constant().filter(|v| enc::is_imm32(*v)) {
        enc::alu_reg_imm(gen.buf, Alu::Cmp, encoding(x64::RAX), imm as i32, size);
    } else {
        emit::load_gpr(gen, body, b, x64::RCX);
        enc::alu_reg_reg(gen.buf, Alu::Cmp, encoding(x64::RAX), encoding(x64::RCX), size);
    }
}

/// Store a staged condition into a boolean destination value.
fn setcc_value(gen: &mut GenState, body: &mut FunctionBody, cond: FloatCond, dest: Value) {
    let al = encoding(x64::RAX);
    let cl = encoding(x64::RCX);
    enc::setcc_reg(gen.buf, cond.cc, al);
    if cond.nan_poisons_cc {
        enc::setcc_reg(gen.buf, enc::CC_NP, cl);
        enc::alu_reg_reg(gen.buf, Alu::And, al, cl, 1);
    } else if cond.nan_true {
        // The raw condition may already be true on NaN for the carry-based
        // codes; or-ing parity in covers the ones where it is not.
        enc::setcc_reg(gen.buf, enc::CC_P, cl);
        enc::alu_reg_reg(gen.buf, Alu::Or, al, cl, 1);
    }
    enc::movzx_reg_reg8(gen.buf, al, al);
    emit::store_gpr(gen, body, dest, x64::RAX);
}

/// Branch on a staged float condition.
fn branch_float_cond(
    gen: &mut GenState,
    body: &mut FunctionBody,
    cond: FloatCond,
    label: Label,
) -> CodegenResult<()> {
    if cond.nan_poisons_cc {
        // Parity set means unordered: skip the branch entirely.
        let skip = emit::forward_jcc(gen, enc::CC_P);
        emit::output_branch(gen, body, Some(cond.cc), label)?;
        emit::patch_forward_jcc(gen, skip);
    } else if cond.nan_true {
        emit::output_branch(gen, body, Some(cond.cc), label)?;
        emit::output_branch(gen, body, Some(enc::CC_P), label)?;
    } else {
        emit::output_branch(gen, body, Some(cond.cc), label)?;
    }
    Ok(())
}

// ---- the dispatcher ------------------------------------------------------

/// Emit one instruction.
pub fn gen_insn(
    gen: &mut GenState,
    body: &mut FunctionBody,
    block: Block,
    inst: Inst,
    index: usize,
) -> CodegenResult<()> {
    use Opcode::*;
    let op = body.insts[inst].opcode;
    trace!("emit {:?} at {:#x}", op, gen.buf.offset());
    match op {
        Nop => gen.buf.put1(0x90),

        // ---- unconditional and truth-test branches ----
        Br => {
            let label = label_slot(&body.insts[inst].dest)?;
            emit::output_branch(gen, body, None, label)?;
        }
        BrIFalse | BrITrue | BrLFalse | BrLTrue => {
            let label = label_slot(&body.insts[inst].dest)?;
            let v = value1(body, inst)?;
            let size = if matches!(op, BrLFalse | BrLTrue) { 8 } else { 4 };
            emit::load_gpr(gen, body, v, x64::RAX);
            enc::test_reg_reg(gen.buf, encoding(x64::RAX), encoding(x64::RAX), size);
            let cc = if matches!(op, BrIFalse | BrLFalse) {
                enc::CC_E
            } else {
                enc::CC_NE
            };
            emit::output_branch(gen, body, Some(cc), label)?;
        }

        // ---- fused compare-and-branch ----
        BrIEq | BrINe | BrILt | BrILtUn | BrILe | BrILeUn | BrIGt | BrIGtUn | BrIGe
        | BrIGeUn | BrLEq | BrLNe | BrLLt | BrLLtUn | BrLLe | BrLLeUn | BrLGt | BrLGtUn
        | BrLGe | BrLGeUn => {
            let label = label_slot(&body.insts[inst].dest)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            let size = if op >= BrLEq && op <= BrLGeUn { 8 } else { 4 };
            stage_int_compare(gen, body, size, a, b);
            emit::output_branch(gen, body, Some(int_cc(op)), label)?;
        }
        BrFEq | BrFNe | BrFLt | BrFLe | BrFGt | BrFGe | BrFLtInv | BrFLeInv | BrFGtInv
        | BrFGeInv | BrDEq | BrDNe | BrDLt | BrDLe | BrDGt | BrDGe | BrDLtInv | BrDLeInv
        | BrDGtInv | BrDGeInv | BrNfEq | BrNfNe | BrNfLt | BrNfLe | BrNfGt | BrNfGe
        | BrNfLtInv | BrNfLeInv | BrNfGtInv | BrNfGeInv => {
            let label = label_slot(&body.insts[inst].dest)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            stage_float_compare(gen, body, op, a, b);
            branch_float_cond(gen, body, float_cond(op), label)?;
        }

        JumpTable => {
            gen_jump_table(gen, body, inst)?;
        }
        AddressOfLabel => {
            let dest = dest_value(body, inst)?;
            let label = label_slot(&body.insts[inst].value1)?;
            let target = body
                .block_of_label(label)
                .ok_or(CodegenError::UndefinedLabel(label.0))?;
            // lea rax, [rip + disp]; forward references patch through the
            // block's relative chain, which shares the displacement format.
            enc::lea_reg_rip(gen.buf, encoding(x64::RAX), 0);
            let disp_at = gen.buf.offset() - 4;
            match body.blocks[target].address {
                Some(addr) => {
                    let rel = addr as i64 - gen.buf.offset() as i64;
                    gen.buf.patch_u32_at(disp_at, rel as i32 as u32);
                }
                None => {
                    let mut head = body.blocks[target].fixup_rel;
                    let link = if head == 0 { 0 } else { disp_at - head };
                    gen.buf.patch_u32_at(disp_at, link);
                    head = disp_at;
                    body.blocks[target].fixup_rel = head;
                }
            }
            emit::store_gpr(gen, body, dest, x64::RAX);
        }

        // ---- comparisons producing a value ----
        IEq | INe | ILt | ILtUn | ILe | ILeUn | IGt | IGtUn | IGe | IGeUn | LEq | LNe
        | LLt | LLtUn | LLe | LLeUn | LGt | LGtUn | LGe | LGeUn => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            let size = if op >= LEq && op <= LGeUn { 8 } else { 4 };
            stage_int_compare(gen, body, size, a, b);
            let al = encoding(x64::RAX);
            enc::setcc_reg(gen.buf, int_cc(op), al);
            enc::movzx_reg_reg8(gen.buf, al, al);
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        FEq | FNe | FLt | FLe | FGt | FGe | FLtInv | FLeInv | FGtInv | FGeInv | DEq | DNe
        | DLt | DLe | DGt | DGe | DLtInv | DLeInv | DGtInv | DGeInv | NfEq | NfNe | NfLt
        | NfLe | NfGt | NfGe | NfLtInv | NfLeInv | NfGtInv | NfGeInv => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            stage_float_compare(gen, body, op, a, b);
            setcc_value(gen, body, float_cond(op), dest);
        }

        // ---- integer arithmetic ----
        IAdd | ISub | IMul | IAnd | IOr | IXor | LAdd | LSub | LMul | LAnd | LOr | LXor => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            let size = if matches!(op, LAdd | LSub | LMul | LAnd | LOr | LXor) { 8 } else { 4 };
            emit::load_gpr(gen, body, a, x64::RAX);
            if op == IMul || op == LMul {
                emit::load_gpr(gen, body, b, x64::RCX);
                enc::imul_reg_reg(gen.buf, encoding(x64::RAX), encoding(x64::RCX), size);
            } else {
                let alu = match op {
                    IAdd | LAdd => Alu::Add,
                    ISub | LSub => Alu::Sub,
                    IAnd | LAnd => Alu::And,
                    IOr | LOr => Alu::Or,
                    _ => Alu::Xor,
                };
                if let Some(imm) = body.values[b].nint_constant().filter(|v| enc::is_imm32(*v)) {
                    enc::alu_reg_imm(gen.buf, alu, encoding(x64::RAX), imm as i32, size);
                } else {
                    emit::load_gpr(gen, body, b, x64::RCX);
                    enc::alu_reg_reg(gen.buf, alu, encoding(x64::RAX), encoding(x64::RCX), size);
                }
            }
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        IAddOvf | ISubOvf | IMulOvf | LAddOvf | LSubOvf | LMulOvf | IAddOvfUn | ISubOvfUn
        | LAddOvfUn | LSubOvfUn => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            let size = if matches!(
                op,
                LAddOvf | LSubOvf | LMulOvf | LAddOvfUn | LSubOvfUn
            ) {
                8
            } else {
                4
            };
            emit::load_gpr(gen, body, a, x64::RAX);
            emit::load_gpr(gen, body, b, x64::RCX);
            match op {
                IAddOvf | LAddOvf | IAddOvfUn | LAddOvfUn => {
                    enc::alu_reg_reg(gen.buf, Alu::Add, encoding(x64::RAX), encoding(x64::RCX), size)
                }
                ISubOvf | LSubOvf | ISubOvfUn | LSubOvfUn => {
                    enc::alu_reg_reg(gen.buf, Alu::Sub, encoding(x64::RAX), encoding(x64::RCX), size)
                }
                _ => enc::imul_reg_reg(gen.buf, encoding(x64::RAX), encoding(x64::RCX), size),
            }
            // Signed overflow raises on OF (jno skips), unsigned on CF
            // (jnc skips).
            let skip = if matches!(op, IAddOvfUn | ISubOvfUn | LAddOvfUn | LSubOvfUn) {
                emit::forward_jcc(gen, enc::CC_AE)
            } else {
                emit::forward_jcc(gen, 0x1)
            };
            emit::throw_builtin(gen, body, builtin::OVERFLOW);
            emit::patch_forward_jcc(gen, skip);
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        IMulOvfUn | LMulOvfUn => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            let size = if op == LMulOvfUn { 8 } else { 4 };
            emit::load_gpr(gen, body, a, x64::RAX);
            emit::load_gpr(gen, body, b, x64::RCX);
            enc::mul_reg(gen.buf, encoding(x64::RCX), size);
            let skip = emit::forward_jcc(gen, enc::CC_AE); // jnc
            emit::throw_builtin(gen, body, builtin::OVERFLOW);
            emit::patch_forward_jcc(gen, skip);
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        IDiv | IDivUn | IRem | IRemUn | LDiv | LDivUn | LRem | LRemUn => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            let size = if matches!(op, LDiv | LDivUn | LRem | LRemUn) { 8 } else { 4 };
            let signed = matches!(op, IDiv | IRem | LDiv | LRem);
            emit::load_gpr(gen, body, a, x64::RAX);
            emit::load_gpr(gen, body, b, x64::RCX);
            emit::emit_div_checks(gen, body, size, signed);
            let result = if matches!(op, IRem | IRemUn | LRem | LRemUn) {
                x64::RDX
            } else {
                x64::RAX
            };
            emit::store_gpr(gen, body, dest, result);
        }
        INeg | INot | LNeg | LNot => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let size = if matches!(op, LNeg | LNot) { 8 } else { 4 };
            emit::load_gpr(gen, body, a, x64::RAX);
            if matches!(op, INeg | LNeg) {
                enc::neg_reg(gen.buf, encoding(x64::RAX), size);
            } else {
                enc::not_reg(gen.buf, encoding(x64::RAX), size);
            }
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        IShl | IShr | IShrUn | LShl | LShr | LShrUn => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            let size = if matches!(op, LShl | LShr | LShrUn) { 8 } else { 4 };
            let shift = match op {
                IShl | LShl => Shift::Shl,
                IShr | LShr => Shift::Sar,
                _ => Shift::Shr,
            };
            emit::load_gpr(gen, body, a, x64::RAX);
            if let Some(imm) = body.values[b].nint_constant() {
                enc::shift_reg_imm(gen.buf, shift, encoding(x64::RAX), imm as u8, size);
            } else {
                emit::load_gpr(gen, body, b, x64::RCX);
                enc::shift_reg_cl(gen.buf, shift, encoding(x64::RAX), size);
            }
            emit::store_gpr(gen, body, dest, x64::RAX);
        }

        // ---- float arithmetic ----
        FAdd | FSub | FMul | FDiv | DAdd | DSub | DMul | DDiv => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            let double = matches!(op, DAdd | DSub | DMul | DDiv);
            let sse = match op {
                FAdd | DAdd => SseOp::Add,
                FSub | DSub => SseOp::Sub,
                FMul | DMul => SseOp::Mul,
                _ => SseOp::Div,
            };
            emit::load_xmm(gen, body, a, x64::XMM8, double);
            emit::load_xmm(gen, body, b, x64::XMM9, double);
            enc::sse_op_xreg_xreg(gen.buf, sse, encoding(x64::XMM8), encoding(x64::XMM9), double);
            emit::store_xmm(gen, body, dest, x64::XMM8, double);
        }
        FNeg | DNeg => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let double = op == DNeg;
            emit::load_gpr(gen, body, a, x64::RAX);
            if double {
                enc::mov_reg_imm(gen.buf, encoding(x64::SCRATCH), i64::MIN, 8);
                enc::alu_reg_reg(gen.buf, Alu::Xor, encoding(x64::RAX), encoding(x64::SCRATCH), 8);
            } else {
                enc::alu_reg_imm(gen.buf, Alu::Xor, encoding(x64::RAX), i32::MIN, 4);
            }
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        FSqrt | DSqrt => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let double = op == DSqrt;
            emit::load_xmm(gen, body, a, x64::XMM8, double);
            enc::sse_op_xreg_xreg(
                gen.buf,
                SseOp::Sqrt,
                encoding(x64::XMM8),
                encoding(x64::XMM8),
                double,
            );
            emit::store_xmm(gen, body, dest, x64::XMM8, double);
        }
        NfAdd | NfSub | NfMul | NfDiv => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            emit::load_fpu(gen, body, a);
            emit::load_fpu(gen, body, b);
            let fp = match op {
                NfAdd => FpOp::Add,
                NfSub => FpOp::Sub,
                NfMul => FpOp::Mul,
                _ => FpOp::Div,
            };
            enc::fp_op_p(gen.buf, fp);
            gen.fp_top -= 1;
            emit::store_fpu_pop(gen, body, dest);
        }
        NfNeg => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            emit::load_fpu(gen, body, a);
            enc::fchs(gen.buf);
            emit::store_fpu_pop(gen, body, dest);
        }
        NfSqrt => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            emit::load_fpu(gen, body, a);
            enc::fsqrt(gen.buf);
            emit::store_fpu_pop(gen, body, dest);
        }

        // ---- conversions ----
        TruncSByte | TruncUByte | TruncShort | TruncUShort => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            emit::load_gpr(gen, body, a, x64::RAX);
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        CheckSByte | CheckUByte | CheckShort | CheckUShort | CheckInt | CheckUInt => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            emit::load_gpr(gen, body, a, x64::RAX);
            let (lo, hi) = match op {
                CheckSByte => (i8::MIN as i32, i8::MAX as i32),
                CheckUByte => (0, u8::MAX as i32),
                CheckShort => (i16::MIN as i32, i16::MAX as i32),
                CheckUShort => (0, u16::MAX as i32),
                CheckUInt => (0, i32::MAX),
                // From an unsigned 32-bit source: reject the high half.
                CheckInt => (0, i32::MAX),
                _ => unreachable!(),
            };
            if lo != i32::MIN {
                enc::alu_reg_imm(gen.buf, Alu::Cmp, encoding(x64::RAX), lo, 4);
                let ok = emit::forward_jcc(gen, enc::CC_GE);
                emit::throw_builtin(gen, body, builtin::OVERFLOW);
                emit::patch_forward_jcc(gen, ok);
            }
            enc::alu_reg_imm(gen.buf, Alu::Cmp, encoding(x64::RAX), hi, 4);
            let ok = emit::forward_jcc(gen, enc::CC_LE);
            emit::throw_builtin(gen, body, builtin::OVERFLOW);
            emit::patch_forward_jcc(gen, ok);
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        LowWord => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            emit::load_gpr(gen, body, a, x64::RAX);
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        CheckLowWord => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            emit::load_gpr(gen, body, a, x64::RAX);
            enc::mov_reg_imm(gen.buf, encoding(x64::SCRATCH), u32::MAX as i64, 8);
            enc::alu_reg_reg(gen.buf, Alu::Cmp, encoding(x64::RAX), encoding(x64::SCRATCH), 8);
            let ok = emit::forward_jcc(gen, enc::CC_BE);
            emit::throw_builtin(gen, body, builtin::OVERFLOW);
            emit::patch_forward_jcc(gen, ok);
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        CheckSignedLowWord => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            emit::load_gpr(gen, body, a, x64::RAX);
            enc::movsx_reg_reg(gen.buf, encoding(x64::RCX), encoding(x64::RAX), 4);
            enc::alu_reg_reg(gen.buf, Alu::Cmp, encoding(x64::RAX), encoding(x64::RCX), 8);
            let ok = emit::forward_jcc(gen, enc::CC_E);
            emit::throw_builtin(gen, body, builtin::OVERFLOW);
            emit::patch_forward_jcc(gen, ok);
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        ExpandInt => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            emit::load_gpr(gen, body, a, x64::RAX);
            enc::movsx_reg_reg(gen.buf, encoding(x64::RAX), encoding(x64::RAX), 4);
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        ExpandUInt => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            // A 32-bit load already zero-extends.
            emit::load_gpr(gen, body, a, x64::RAX);
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        CheckLong | CheckULong => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            emit::load_gpr(gen, body, a, x64::RAX);
            enc::test_reg_reg(gen.buf, encoding(x64::RAX), encoding(x64::RAX), 8);
            let ok = emit::forward_jcc(gen, enc::CC_GE); // sign clear
            emit::throw_builtin(gen, body, builtin::OVERFLOW);
            emit::patch_forward_jcc(gen, ok);
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        IntToFloat32 | IntToFloat64 | LongToFloat32 | LongToFloat64 | UIntToFloat32
        | UIntToFloat64 => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let double = matches!(op, IntToFloat64 | LongToFloat64 | UIntToFloat64);
            let src64 = matches!(
                op,
                LongToFloat32 | LongToFloat64 | UIntToFloat32 | UIntToFloat64
            );
            emit::load_gpr(gen, body, a, x64::RAX);
            enc::cvtsi2s_xreg_reg(gen.buf, encoding(x64::XMM8), encoding(x64::RAX), double, src64);
            emit::store_xmm(gen, body, dest, x64::XMM8, double);
        }
        IntToNFloat | UIntToNFloat | LongToNFloat => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            emit::load_gpr(gen, body, a, x64::RAX);
            // Stage through the red zone; fild needs a memory operand.
            enc::mov_membase_reg(gen.buf, encoding(x64::RSP), -16, encoding(x64::RAX), 8);
            enc::fild_membase(gen.buf, encoding(x64::RSP), -16, 8);
            gen.fp_top += 1;
            emit::store_fpu_pop(gen, body, dest);
        }
        Float32ToInt | Float64ToInt | Float32ToLong | Float64ToLong | Float32ToUInt
        | Float64ToUInt => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let double = matches!(op, Float64ToInt | Float64ToLong | Float64ToUInt);
            let dst64 = !matches!(op, Float32ToInt | Float64ToInt);
            emit::load_xmm(gen, body, a, x64::XMM8, double);
            enc::cvtts2si_reg_xreg(gen.buf, encoding(x64::RAX), encoding(x64::XMM8), double, dst64);
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        Float32ToFloat64 | Float64ToFloat32 => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let from_double = op == Float64ToFloat32;
            emit::load_xmm(gen, body, a, x64::XMM8, from_double);
            enc::cvts2s_xreg_xreg(gen.buf, encoding(x64::XMM8), encoding(x64::XMM8), from_double);
            emit::store_xmm(gen, body, dest, x64::XMM8, !from_double);
        }
        Float32ToNFloat | Float64ToNFloat | NFloatToFloat32 | NFloatToFloat64 => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            // The x87 unit widens and narrows on load/store.
            emit::load_fpu(gen, body, a);
            emit::store_fpu_pop(gen, body, dest);
        }

        // ---- value copies ----
        CopyInt | CopyLong | CopyStoreByte | CopyStoreShort | CopyLoadSByte | CopyLoadUByte
        | CopyLoadShort | CopyLoadUShort => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            emit::load_gpr(gen, body, a, x64::RAX);
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        CopyFloat32 | CopyFloat64 => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let double = op == CopyFloat64;
            emit::load_xmm(gen, body, a, x64::XMM8, double);
            emit::store_xmm(gen, body, dest, x64::XMM8, double);
        }
        CopyNFloat => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            emit::load_fpu(gen, body, a);
            emit::store_fpu_pop(gen, body, dest);
        }
        CopyStruct => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            emit::fix_value(body, dest);
            emit::fix_value(body, a);
            let size = body.values[dest].ty.size(body.ptr_width) as u64;
            let doff = body.values[dest].frame_offset;
            let soff = body.values[a].frame_offset;
            emit::small_block_copy(gen, x64::RBP, doff, x64::RBP, soff, size, false);
        }

        // ---- memory ----
        AddressOf => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            emit::load_address(gen, body, a, x64::RAX);
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        AddRelative => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?);
            emit::load_gpr(gen, body, a, x64::RAX);
            if off != 0 {
                enc::alu_reg_imm(gen.buf, Alu::Add, encoding(x64::RAX), off as i32, 8);
            }
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        LoadRelativeSByte | LoadRelativeUByte | LoadRelativeShort | LoadRelativeUShort
        | LoadRelativeInt | LoadRelativeLong => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            emit::load_gpr(gen, body, a, x64::RAX);
            let e = encoding(x64::RAX);
            match op {
                LoadRelativeSByte => enc::movsx_reg_membase(gen.buf, e, e, off, 1),
                LoadRelativeUByte => enc::movzx_reg_membase(gen.buf, e, e, off, 1),
                LoadRelativeShort => enc::movsx_reg_membase(gen.buf, e, e, off, 2),
                LoadRelativeUShort => enc::movzx_reg_membase(gen.buf, e, e, off, 2),
                LoadRelativeInt => enc::mov_reg_membase(gen.buf, e, e, off, 4),
                _ => enc::mov_reg_membase(gen.buf, e, e, off, 8),
            }
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        LoadRelativeFloat32 | LoadRelativeFloat64 => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            let double = op == LoadRelativeFloat64;
            emit::load_gpr(gen, body, a, x64::RAX);
            enc::movs_xreg_membase(gen.buf, encoding(x64::XMM8), encoding(x64::RAX), off, double);
            emit::store_xmm(gen, body, dest, x64::XMM8, double);
        }
        LoadRelativeNFloat => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            emit::load_gpr(gen, body, a, x64::RAX);
            enc::fld_membase(gen.buf, encoding(x64::RAX), off, 10);
            gen.fp_top += 1;
            emit::store_fpu_pop(gen, body, dest);
        }
        LoadRelativeStruct => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            emit::load_gpr(gen, body, a, x64::RCX);
            emit::fix_value(body, dest);
            let size = body.values[dest].ty.size(body.ptr_width) as u64;
            let doff = body.values[dest].frame_offset;
            emit::small_block_copy(gen, x64::RBP, doff, x64::RCX, off, size, false);
        }
        StoreRelativeByte | StoreRelativeShort | StoreRelativeInt | StoreRelativeLong => {
            let ptr = dest_value(body, inst)?;
            let v = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            emit::load_gpr(gen, body, ptr, x64::RAX);
            emit::load_gpr(gen, body, v, x64::RCX);
            let size = match op {
                StoreRelativeByte => 1,
                StoreRelativeShort => 2,
                StoreRelativeInt => 4,
                _ => 8,
            };
            enc::mov_membase_reg(gen.buf, encoding(x64::RAX), off, encoding(x64::RCX), size);
        }
        StoreRelativeFloat32 | StoreRelativeFloat64 => {
            let ptr = dest_value(body, inst)?;
            let v = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            let double = op == StoreRelativeFloat64;
            emit::load_gpr(gen, body, ptr, x64::RAX);
            emit::load_xmm(gen, body, v, x64::XMM8, double);
            enc::movs_membase_xreg(gen.buf, encoding(x64::RAX), off, encoding(x64::XMM8), double);
        }
        StoreRelativeNFloat => {
            let ptr = dest_value(body, inst)?;
            let v = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            emit::load_gpr(gen, body, ptr, x64::RAX);
            emit::load_fpu(gen, body, v);
            enc::fstp_membase(gen.buf, encoding(x64::RAX), off, 10);
            gen.fp_top -= 1;
        }
        StoreRelativeStruct => {
            let ptr = dest_value(body, inst)?;
            let v = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            emit::load_gpr(gen, body, ptr, x64::RCX);
            emit::fix_value(body, v);
            let size = body.values[v].ty.size(body.ptr_width) as u64;
            let soff = body.values[v].frame_offset;
            emit::small_block_copy(gen, x64::RCX, off, x64::RBP, soff, size, false);
        }
        CheckNull => {
            // The rules engine elides provably redundant checks.
            if check_is_redundant(body, block, index) {
                return Ok(());
            }
            let v = value1(body, inst)?;
            emit::load_gpr(gen, body, v, x64::RAX);
            emit::check_gpr_not_null(gen, body, x64::RAX, builtin::NULL_REFERENCE);
        }
        Memcpy | Memmove => {
            gen_memcpy(gen, body, inst, op == Opcode::Memmove)?;
        }
        Memset => {
            gen_memset(gen, body, inst)?;
        }
        Alloca => {
            let dest = dest_value(body, inst)?;
            let size = value1(body, inst)?;
            emit::load_gpr(gen, body, size, x64::RAX);
            enc::alu_reg_imm(gen.buf, Alu::Add, encoding(x64::RAX), 15, 8);
            enc::alu_reg_imm(gen.buf, Alu::And, encoding(x64::RAX), -16, 8);
            enc::alu_reg_reg(gen.buf, Alu::Sub, encoding(x64::RSP), encoding(x64::RAX), 8);
            enc::mov_reg_reg(gen.buf, encoding(x64::RAX), encoding(x64::RSP), 8);
            // The outgoing argument area must stay below the allocation;
            // its final size is patched in at epilogue time.
            gen.buf.put1(0x48);
            gen.buf.put1(0x05); // add rax, imm32
            let mut head = gen.alloca_fixup;
            gen.buf.emit_rel_fixup(&mut head);
            gen.alloca_fixup = head;
            emit::store_gpr(gen, body, dest, x64::RAX);
        }

        // ---- outgoing parameters ----
        SetParamInt | SetParamLong => {
            // Stack argument slots are full words regardless of the type.
            let v = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            emit::load_gpr(gen, body, v, x64::RAX);
            enc::mov_membase_reg(gen.buf, encoding(x64::RSP), off, encoding(x64::RAX), 8);
        }
        SetParamFloat32 | SetParamFloat64 => {
            let v = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            let double = op == SetParamFloat64;
            emit::load_xmm(gen, body, v, x64::XMM8, double);
            // Stack argument slots are full words.
            enc::movs_membase_xreg(gen.buf, encoding(x64::RSP), off, encoding(x64::XMM8), double);
        }
        SetParamNFloat => {
            let v = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            emit::load_fpu(gen, body, v);
            enc::fstp_membase(gen.buf, encoding(x64::RSP), off, 10);
            gen.fp_top -= 1;
        }
        SetParamStruct => {
            let v = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            emit::fix_value(body, v);
            let size = body.values[v].ty.size(body.ptr_width) as u64;
            let soff = body.values[v].frame_offset;
            emit::small_block_copy(gen, x64::RSP, off, x64::RBP, soff, size, false);
        }
        OutgoingReg => {
            let v = value1(body, inst)?;
            let packed = nint_of(body, value2(body, inst)?);
            let reg = (packed & 0xff) as u8;
            let part = ((packed >> 8) & 0xff) as i32;
            gen_outgoing_reg(gen, body, v, reg, part);
        }
        ReturnReg => {
            let v = value1(body, inst)?;
            let packed = nint_of(body, value2(body, inst)?);
            let reg = (packed & 0xff) as u8;
            let part = ((packed >> 8) & 0xff) as i32;
            gen_return_reg(gen, body, v, reg, part);
        }
        PopStack => {
            let n = nint_of(body, value1(body, inst)?);
            if n > 0 {
                enc::alu_reg_imm(gen.buf, Alu::Add, encoding(x64::RSP), (n * 8) as i32, 8);
            }
        }

        // ---- calls ----
        Call | CallExternal | CallIndirect | CallVtablePtr => {
            gen_call(gen, body, inst, op, false)?;
        }
        CallTail | CallExternalTail | CallIndirectTail | CallVtablePtrTail => {
            gen_call(gen, body, inst, op, true)?;
        }

        // ---- returns ----
        Return => {
            emit::jump_to_epilog(gen, body, block);
        }
        ReturnInt | ReturnLong => {
            let v = value1(body, inst)?;
            emit::load_gpr(gen, body, v, x64::RAX);
            emit::jump_to_epilog(gen, body, block);
        }
        ReturnFloat32 | ReturnFloat64 => {
            let v = value1(body, inst)?;
            emit::load_xmm(gen, body, v, x64::XMM0, op == Opcode::ReturnFloat64);
            emit::jump_to_epilog(gen, body, block);
        }
        ReturnNFloat => {
            let v = value1(body, inst)?;
            emit::load_fpu(gen, body, v);
            gen.fp_top -= 1; // stays in ST0 for the caller
            emit::jump_to_epilog(gen, body, block);
        }
        ReturnSmallStruct => {
            let v = value1(body, inst)?;
            let loc = emit::own_return_location(body);
            emit::emit_return_in(gen, body, v, loc);
            emit::jump_to_epilog(gen, body, block);
        }

        // ---- exceptions ----
        Throw => {
            let v = value1(body, inst)?;
            emit::load_gpr(gen, body, v, x64::RDI);
            let thrower = gen.env.hooks.exception_throw;
            emit::call_code(gen, thrower);
        }
        LoadPc => {
            let dest = dest_value(body, inst)?;
            enc::lea_reg_rip(gen.buf, encoding(x64::RAX), 0);
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        LoadFramePtr => {
            let dest = dest_value(body, inst)?;
            enc::mov_reg_reg(gen.buf, encoding(x64::RAX), encoding(x64::RBP), 8);
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        CaptureContext => {
            gen_capture_context(gen, body, inst)?;
        }
        EnterFinally => {
            // The return address of call_finally is the linkage.
        }
        LeaveFinally => {
            enc::ret(gen.buf);
        }
        CallFinally => {
            let label = label_slot(&body.insts[inst].dest)?;
            gen_call_label(gen, body, label)?;
        }
        EnterFilter => {
            // Filter argument arrives in rax.
            let dest = dest_value(body, inst)?;
            emit::store_gpr(gen, body, dest, x64::RAX);
        }
        LeaveFilter => {
            let v = value1(body, inst)?;
            emit::load_gpr(gen, body, v, x64::RAX);
            enc::ret(gen.buf);
        }
        CallFilter => {
            let label = label_slot(&body.insts[inst].dest)?;
            let v = value1(body, inst)?;
            emit::load_gpr(gen, body, v, x64::RAX);
            gen_call_label(gen, body, label)?;
        }

        // ---- entry plumbing ----
        IncomingReg => {
            let dest = dest_value(body, inst)?;
            let reg = nint_of(body, value1(body, inst)?) as u8;
            let part = nint_of(body, value2(body, inst)?) as i32;
            gen_incoming_reg(gen, body, dest, reg, part);
        }
        MarkOffset => {
            let mark = nint_of(body, value1(body, inst)?);
            trace!("bytecode offset {} at {:#x}", mark, gen.buf.offset());
            let at = gen.buf.offset();
            gen.marks.push((at, mark));
        }

        _ => return Err(CodegenError::Malformed("opcode has no x86-64 rule")),
    }
    Ok(())
}

// ---- compound emissions --------------------------------------------------

fn gen_incoming_reg(gen: &mut GenState, body: &mut FunctionBody, dest: Value, reg: u8, part: i32) {
    emit::fix_value(body, dest);
    let off = body.values[dest].frame_offset + part * 8;
    if x64::is_xmm(reg) {
        enc::movs_membase_xreg(gen.buf, 5, off, encoding(reg), true);
    } else if part > 0 || body.values[dest].ty.is_aggregate() {
        enc::mov_membase_reg(gen.buf, 5, off, encoding(reg), 8);
    } else {
        let size = body.values[dest].ty.size(body.ptr_width).clamp(1, 8) as u8;
        enc::mov_membase_reg(gen.buf, 5, off, encoding(reg), size);
    }
}

fn gen_outgoing_reg(gen: &mut GenState, body: &mut FunctionBody, v: Value, reg: u8, part: i32) {
    if x64::is_xmm(reg) {
        if part > 0 || body.values[v].ty.is_aggregate() {
            emit::fix_value(body, v);
            let off = body.values[v].frame_offset + part * 8;
            enc::movs_xreg_membase(gen.buf, encoding(reg), 5, off, true);
        } else {
            let double = !matches!(body.values[v].ty.kind(), TypeKind::Float32);
            emit::load_xmm(gen, body, v, reg, double);
        }
    } else if part > 0 || body.values[v].ty.is_aggregate() {
        emit::fix_value(body, v);
        let off = body.values[v].frame_offset + part * 8;
        enc::mov_reg_membase(gen.buf, encoding(reg), 5, off, 8);
    } else {
        emit::load_gpr(gen, body, v, reg);
    }
}

fn gen_return_reg(gen: &mut GenState, body: &mut FunctionBody, v: Value, reg: u8, part: i32) {
    emit::fix_value(body, v);
    let off = body.values[v].frame_offset + part * 8;
    if x64::is_fp_stack(reg) {
        gen.fp_top += 1;
        emit::store_fpu_pop(gen, body, v);
    } else if x64::is_xmm(reg) {
        if part == 0 && !body.values[v].ty.is_aggregate() {
            let double = !matches!(body.values[v].ty.kind(), TypeKind::Float32);
            enc::movs_membase_xreg(gen.buf, 5, off, encoding(reg), double);
        } else {
            enc::movs_membase_xreg(gen.buf, 5, off, encoding(reg), true);
        }
    } else if part == 0 && !body.values[v].ty.is_aggregate() {
        emit::store_gpr(gen, body, v, reg);
    } else {
        enc::mov_membase_reg(gen.buf, 5, off, encoding(reg), 8);
    }
}

fn gen_call(
    gen: &mut GenState,
    body: &mut FunctionBody,
    inst: Inst,
    op: Opcode,
    tail: bool,
) -> CodegenResult<()> {
    use Opcode::*;
    // Resolve the target before any frame teardown: indirect targets live
    // in frame slots that die with the frame.
    let target = match op {
        Call | CallTail => {
            let func = match &body.insts[inst].dest {
                Slot::Func(f) => *f,
                _ => return Err(CodegenError::Malformed("call without function target")),
            };
            Some(gen.env.resolver.address_of(func))
        }
        CallExternal | CallExternalTail => match &body.insts[inst].dest {
            Slot::Native(addr) => Some(*addr),
            _ => return Err(CodegenError::Malformed("native call without address")),
        },
        CallIndirect | CallIndirectTail | CallVtablePtr | CallVtablePtrTail => {
            let v = value1(body, inst)?;
            emit::load_gpr(gen, body, v, x64::SCRATCH);
            emit::check_gpr_not_null(gen, body, x64::SCRATCH, builtin::NULL_FUNCTION);
            None
        }
        _ => unreachable!(),
    };
    if tail {
        // Unwind our own frame; the callee builds a fresh one in the same
        // stack space, so self-recursion runs in constant stack.
        enc::mov_reg_reg(gen.buf, encoding(x64::RSP), encoding(x64::RBP), 8);
        enc::pop_reg(gen.buf, encoding(x64::RBP));
        match target {
            Some(addr) => emit::jump_to_code(gen, addr),
            None => enc::jmp_reg(gen.buf, encoding(x64::SCRATCH)),
        }
    } else {
        match target {
            Some(addr) => emit::call_code(gen, addr),
            None => enc::call_reg(gen.buf, encoding(x64::SCRATCH)),
        }
    }
    Ok(())
}

fn gen_call_label(gen: &mut GenState, body: &mut FunctionBody, label: Label) -> CodegenResult<()> {
    let block = body
        .block_of_label(label)
        .ok_or(CodegenError::UndefinedLabel(label.0))?;
    gen.buf.put1(0xE8);
    match body.blocks[block].address {
        Some(addr) => {
            let rel = addr as i64 - (gen.buf.offset() as i64 + 4);
            gen.buf.put4(rel as i32 as u32);
        }
        None => {
            let mut head = body.blocks[block].fixup_rel;
            gen.buf.emit_rel_fixup(&mut head);
            body.blocks[block].fixup_rel = head;
        }
    }
    Ok(())
}

fn gen_capture_context(
    gen: &mut GenState,
    body: &mut FunctionBody,
    inst: Inst,
) -> CodegenResult<()> {
    let dest = dest_value(body, inst)?;
    let addr = value1(body, inst)?;
    emit::load_gpr(gen, body, addr, x64::RCX);
    let rcx = encoding(x64::RCX);
    let scratch = encoding(x64::SCRATCH);
    // lea r11, [rip + <resume>]
    enc::lea_reg_rip(gen.buf, scratch, 0);
    let disp_at = gen.buf.offset() - 4;
    enc::mov_membase_reg(gen.buf, rcx, 16, scratch, 8); // saved rip
    enc::mov_membase_reg(gen.buf, rcx, 0, encoding(x64::RSP), 8); // saved rsp
    enc::mov_membase_reg(gen.buf, rcx, 8, encoding(x64::RBP), 8); // saved rbp
    enc::clear_reg(gen.buf, encoding(x64::RAX));
    // The thrower re-enters here with rax = 1 and rsp/rbp restored.
    let resume = gen.buf.offset();
    gen.buf.patch_u32_at(disp_at, resume - (disp_at + 4));
    emit::store_gpr(gen, body, dest, x64::RAX);
    Ok(())
}

fn gen_jump_table(gen: &mut GenState, body: &mut FunctionBody, inst: Inst) -> CodegenResult<()> {
    let table = match &body.insts[inst].dest {
        Slot::Table(id) => *id,
        _ => return Err(CodegenError::Malformed("jump table without table")),
    };
    let index = value1(body, inst)?;
    emit::load_gpr(gen, body, index, x64::RAX);
    let rax = encoding(x64::RAX);
    let scratch = encoding(x64::SCRATCH);
    enc::lea_reg_rip(gen.buf, scratch, 0);
    let disp_at = gen.buf.offset() - 4;
    // jmp [r11 + rax*8]
    gen.buf.put1(0x41);
    gen.buf.put1(0xFF);
    enc::memindex(gen.buf, 4, scratch, rax, 3, 0);
    // Align and place the table inline; nothing falls through the jmp.
    while gen.buf.offset() % 8 != 0 {
        gen.buf.put1(0x90);
    }
    let table_at = gen.buf.offset();
    gen.buf.patch_u32_at(disp_at, table_at - (disp_at + 4));
    let labels = body.jump_tables[table as usize].clone();
    for label in labels {
        let block = body
            .block_of_label(label)
            .ok_or(CodegenError::UndefinedLabel(label.0))?;
        match body.blocks[block].address {
            Some(addr) => {
                let absolute = gen.buf.address_of(addr) as u64;
                gen.buf.put8(absolute);
            }
            None => {
                let mut head = body.blocks[block].fixup_abs;
                gen.buf.emit_abs_fixup(&mut head);
                body.blocks[block].fixup_abs = head;
            }
        }
    }
    Ok(())
}

fn gen_memcpy(
    gen: &mut GenState,
    body: &mut FunctionBody,
    inst: Inst,
    overlapping: bool,
) -> CodegenResult<()> {
    let dest = dest_value(body, inst)?;
    let src = value1(body, inst)?;
    let size = value2(body, inst)?;
    let size_const = body.values[size].nint_constant();
    if let Some(n) = size_const.filter(|&n| !overlapping && n as u64 <= emit::MAX_MEMCPY_INLINE) {
        emit::load_gpr(gen, body, dest, x64::RCX);
        emit::load_gpr(gen, body, src, x64::RDX);
        emit::small_block_copy(gen, x64::RCX, 0, x64::RDX, 0, n as u64, false);
        return Ok(());
    }
    emit::load_gpr(gen, body, dest, x64::RDI);
    emit::load_gpr(gen, body, src, x64::RSI);
    emit::load_gpr(gen, body, size, x64::RDX);
    let hook = if overlapping {
        gen.env.hooks.memmove
    } else {
        gen.env.hooks.memcpy
    };
    emit::call_code(gen, hook);
    Ok(())
}

fn gen_memset(gen: &mut GenState, body: &mut FunctionBody, inst: Inst) -> CodegenResult<()> {
    let dest = dest_value(body, inst)?;
    let value = value1(body, inst)?;
    let size = value2(body, inst)?;
    let size_const = body.values[size].nint_constant();
    let value_const = body.values[value].nint_constant();
    if let (Some(n), Some(v)) = (size_const, value_const) {
        if (n as u64) <= emit::MAX_MEMSET_INLINE {
            emit::load_gpr(gen, body, dest, x64::RCX);
            emit::small_block_set(gen, x64::RCX, 0, v as u8, n as u64, false);
            return Ok(());
        }
    }
    emit::load_gpr(gen, body, dest, x64::RDI);
    emit::load_gpr(gen, body, value, x64::RSI);
    emit::load_gpr(gen, body, size, x64::RDX);
    let hook = gen.env.hooks.memset;
    emit::call_code(gen, hook);
    Ok(())
}
