//! Per-opcode rules for 32-bit x86.
//!
//! Values stage through `eax`/`ecx`/`edx` and the x87 stack; 64-bit values
//! live in frame slots as low/high word pairs. The push-based calling
//! conventions mean outgoing arguments are real pushes and the deferred
//! stack-pop machinery is live here, unlike on x86-64.

use log::trace;

use crate::abi::x86 as abi_x86;
use crate::abi::{ArgClass, ParamDesc};
use crate::binemit::{CodeBuffer, CodeOffset};
use crate::builder::mem::check_is_redundant;
use crate::compile::{CompileEnv, EmitInfo};
use crate::fold::builtin;
use crate::ir::insn::{Inst, InstData, Slot};
use crate::ir::types::{ConstData, PtrWidth, Type, TypeKind};
use crate::ir::value::{Value, ValueFlags};
use crate::ir::{Block, FunctionBody, Label, Opcode};
use crate::isa::x86::enc::{self, Alu, Shift};
use crate::isa::x86::PROLOG_SIZE;
use crate::regs::x86::{self, encoding};
use crate::{CodegenError, CodegenResult};

/// Does the x86 backend emit this opcode directly?
///
/// 64-bit multiply/divide/shift, the float-to-integer family and the
/// checked wide conversions all go through intrinsics.
pub fn opcode_is_supported(op: Opcode) -> bool {
    use Opcode::*;
    !matches!(
        op,
        LMul | LMulOvf
            | LMulOvfUn
            | LDiv
            | LDivUn
            | LRem
            | LRemUn
            | LShl
            | LShr
            | LShrUn
            | Float32ToInt
            | Float32ToUInt
            | Float32ToLong
            | Float32ToULong
            | Float64ToInt
            | Float64ToUInt
            | Float64ToLong
            | Float64ToULong
            | NFloatToInt
            | NFloatToUInt
            | NFloatToLong
            | NFloatToULong
            | ULongToFloat32
            | ULongToFloat64
            | ULongToNFloat
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

/// Per-codegen state for the 32-bit backend.
pub struct Gen32<'a, 'b> {
    buf: &'a mut CodeBuffer,
    env: &'a mut CompileEnv<'b>,
    epilog_fixup: CodeOffset,
    fp_top: i32,
    marks: Vec<(CodeOffset, i64)>,
}

/// Populate the entry block with incoming-parameter instructions for the
/// signature's 32-bit convention.
pub fn create_entry_insns(body: &mut FunctionBody) -> CodegenResult<()> {
    let sig = body.signature.clone();
    let mut state = abi_x86::PassingState::new(sig.abi);

    // The hidden return pointer is the first stack argument.
    let mut arg_base = 8;
    if abi_x86::classify_return(&sig.ret).is_memory() {
        let v = body.create_value(Type::Ptr);
        body.values[v]
            .flags
            .insert(ValueFlags::PARAMETER | ValueFlags::HAS_FRAME_OFFSET);
        body.values[v].frame_offset = arg_base;
        arg_base += 4;
        body.struct_return = Some(v);
    }

    for i in 0..sig.params.len() {
        let ty = sig.params[i].clone();
        let v = body.create_value(ty.clone());
        body.values[v].flags.insert(ValueFlags::PARAMETER);
        let mut p = ParamDesc::new(Some(v));
        abi_x86::classify_param(&mut state, &mut p, &ty);
        match p.arg_class {
            ArgClass::Reg(_) => {
                body.values[v].flags.insert(ValueFlags::REG_PARAMETER);
                let reg_const = body.const_nint(Type::NInt, p.regs[0].reg as i64);
                let part_const = body.const_nint(Type::NInt, 0);
                let mut insn = InstData::new(Opcode::IncomingReg);
                insn.dest = Slot::Value(v);
                insn.value1 = Slot::Value(reg_const);
                insn.value2 = Slot::Value(part_const);
                body.add_insn(insn);
            }
            ArgClass::Stack => {
                body.values[v].frame_offset = arg_base + p.offset as i32;
                body.values[v].flags.insert(ValueFlags::HAS_FRAME_OFFSET);
            }
        }
    }
    Ok(())
}

/// Emit a whole body for x86.
pub fn emit_body(
    body: &mut FunctionBody,
    buf: &mut CodeBuffer,
    env: &mut CompileEnv,
) -> CodegenResult<EmitInfo> {
    let mut gen = Gen32 {
        buf,
        env,
        epilog_fixup: 0,
        fp_top: 0,
        marks: Vec::new(),
    };
    gen.buf.reserve(PROLOG_SIZE);
    let order = body.block_order.clone();
    for block in order {
        start_block(&mut gen, body, block);
        let insns = body.blocks[block].insns.clone();
        for (index, inst) in insns.iter().enumerate() {
            gen_insn(&mut gen, body, block, *inst, index)?;
        }
    }
    emit_epilog(&mut gen, body);
    let entry_offset = emit_prolog(&mut gen, body);
    Ok(EmitInfo {
        entry_offset,
        code_size: gen.buf.offset(),
        marks: gen.marks,
    })
}

// ---- frame and value staging ----------------------------------------------

fn fix_value(body: &mut FunctionBody, value: Value) {
    body.pin_to_frame(value);
}

fn const_words(k: &ConstData) -> (i32, i32) {
    match *k {
        ConstData::Int(v) => (v, v >> 31),
        ConstData::Long(v) | ConstData::NInt(v) => (v as i32, (v >> 32) as i32),
        ConstData::Float32(v) => (v.to_bits() as i32, 0),
        ConstData::Float64(v) | ConstData::NFloat(v) => {
            let bits = v.to_bits();
            (bits as i32, (bits >> 32) as i32)
        }
    }
}

/// Load the low word (or whole 32-bit value) into a register.
fn load_word(gen: &mut Gen32, body: &mut FunctionBody, value: Value, reg: u8, part: i32) {
    let data = &body.values[value];
    if let Some(k) = &data.konst {
        let (lo, hi) = const_words(k);
        enc::mov_reg_imm(gen.buf, encoding(reg), if part == 0 { lo } else { hi }, 4);
        return;
    }
    fix_value(body, value);
    let data = &body.values[value];
    let off = data.frame_offset + part * 4;
    let e = encoding(reg);
    if part == 0 {
        match data.ty.kind() {
            TypeKind::SByte => return enc::movsx_reg_membase(gen.buf, e, 5, off, 1),
            TypeKind::UByte => return enc::movzx_reg_membase(gen.buf, e, 5, off, 1),
            TypeKind::Short => return enc::movsx_reg_membase(gen.buf, e, 5, off, 2),
            TypeKind::UShort => return enc::movzx_reg_membase(gen.buf, e, 5, off, 2),
            _ => {}
        }
    }
    enc::mov_reg_membase(gen.buf, e, 5, off, 4);
}

/// Store a register into a value's slot (low word or whole value).
fn store_word(gen: &mut Gen32, body: &mut FunctionBody, value: Value, reg: u8, part: i32) {
    fix_value(body, value);
    let data = &body.values[value];
    let off = data.frame_offset + part * 4;
    let size = if part == 0 {
        data.ty.size(PtrWidth::P32).clamp(1, 4) as u8
    } else {
        4
    };
    enc::mov_membase_reg(gen.buf, 5, off, encoding(reg), size);
}

/// Push a value onto the x87 stack.
fn load_fpu(gen: &mut Gen32, body: &mut FunctionBody, value: Value) {
    let was_constant = body.values[value].is_constant();
    if was_constant {
        // Materialize through a hidden slot first; the image is a double.
        fix_value_const(gen, body, value);
    }
    fix_value(body, value);
    let data = &body.values[value];
    let off = data.frame_offset;
    let size = match data.ty.kind() {
        TypeKind::Float32 => 4,
        TypeKind::Float64 => 8,
        _ if was_constant => 8,
        _ => 10,
    };
    enc::fld_membase(gen.buf, 5, off, size);
    gen.fp_top += 1;
}

/// Spill a float constant to a frame slot so the FPU can load it.
fn fix_value_const(gen: &mut Gen32, body: &mut FunctionBody, value: Value) {
    if body.values[value].has_frame_offset() {
        return;
    }
    let ty = body.values[value].ty.clone();
    let size = ty.size(PtrWidth::P32).max(4);
    let offset = body.allocate_frame_slot((size + 3) & !3, 4);
    {
        let data = &mut body.values[value];
        data.frame_offset = offset;
        data.flags.insert(ValueFlags::HAS_FRAME_OFFSET);
    }
    let k = body.values[value].konst.expect("constant");
    match body.values[value].ty.kind() {
        TypeKind::Float32 => {
            let bits = (k.as_float().unwrap_or(0.0) as f32).to_bits();
            enc::mov_reg_imm(gen.buf, encoding(x86::EAX), bits as i32, 4);
            enc::mov_membase_reg(gen.buf, 5, offset, encoding(x86::EAX), 4);
        }
        _ => {
            let bits = k.as_float().unwrap_or(0.0).to_bits();
            enc::mov_reg_imm(gen.buf, encoding(x86::EAX), bits as i32, 4);
            enc::mov_membase_reg(gen.buf, 5, offset, encoding(x86::EAX), 4);
            enc::mov_reg_imm(gen.buf, encoding(x86::EAX), (bits >> 32) as i32, 4);
            enc::mov_membase_reg(gen.buf, 5, offset + 4, encoding(x86::EAX), 4);
        }
    }
}

/// Pop the x87 top of stack into a value's slot.
fn store_fpu_pop(gen: &mut Gen32, body: &mut FunctionBody, value: Value) {
    fix_value(body, value);
    let data = &body.values[value];
    let off = data.frame_offset;
    let size = match data.ty.kind() {
        TypeKind::Float32 => 4,
        TypeKind::Float64 => 8,
        _ => 10,
    };
    enc::fstp_membase(gen.buf, 5, off, size);
    gen.fp_top -= 1;
}

// ---- control flow ----------------------------------------------------------

fn start_block(gen: &mut Gen32, body: &mut FunctionBody, block: Block) {
    let address = gen.buf.offset();
    body.blocks[block].address = Some(address);
    let rel = body.blocks[block].fixup_rel;
    if rel != 0 {
        gen.buf.patch_rel_chain(rel, address);
        body.blocks[block].fixup_rel = 0;
    }
    let abs = body.blocks[block].fixup_abs;
    if abs != 0 {
        let target = gen.buf.address_of(address) as u32;
        gen.buf.patch_abs_chain32(abs, target);
        body.blocks[block].fixup_abs = 0;
    }
}

fn output_branch(
    gen: &mut Gen32,
    body: &mut FunctionBody,
    cond: Option<u8>,
    label: Label,
) -> CodegenResult<()> {
    let block = body
        .block_of_label(label)
        .ok_or(CodegenError::UndefinedLabel(label.0))?;
    if let Some(address) = body.blocks[block].address {
        let rel8 = address as i64 - (gen.buf.offset() as i64 + 2);
        if (-128..=127).contains(&rel8) {
            match cond {
                Some(cc) => {
                    gen.buf.put1(0x70 + cc);
                    gen.buf.put1(rel8 as u8);
                }
                None => {
                    gen.buf.put1(0xEB);
                    gen.buf.put1(rel8 as u8);
                }
            }
        } else {
            let long_len: i64 = if cond.is_some() { 6 } else { 5 };
            let rel32 = address as i64 - (gen.buf.offset() as i64 + long_len);
            match cond {
                Some(cc) => {
                    gen.buf.put1(0x0F);
                    gen.buf.put1(0x80 + cc);
                }
                None => gen.buf.put1(0xE9),
            }
            gen.buf.put4(rel32 as i32 as u32);
        }
    } else {
        match cond {
            Some(cc) => {
                gen.buf.put1(0x0F);
                gen.buf.put1(0x80 + cc);
            }
            None => gen.buf.put1(0xE9),
        }
        let mut head = body.blocks[block].fixup_rel;
        gen.buf.emit_rel_fixup(&mut head);
        body.blocks[block].fixup_rel = head;
    }
    Ok(())
}

fn jump_to_epilog(gen: &mut Gen32, body: &FunctionBody, block: Block) {
    if body.block_order.last() == Some(&block) {
        return;
    }
    gen.buf.put1(0xE9);
    let mut head = gen.epilog_fixup;
    gen.buf.emit_rel_fixup(&mut head);
    gen.epilog_fixup = head;
}

fn forward_jcc(gen: &mut Gen32, cc: u8) -> CodeOffset {
    gen.buf.put1(0x0F);
    gen.buf.put1(0x80 + cc);
    let at = gen.buf.offset();
    gen.buf.put4(0);
    at
}

fn patch_forward_jcc(gen: &mut Gen32, disp_at: CodeOffset) {
    let rel = gen.buf.offset() - (disp_at + 4);
    gen.buf.patch_u32_at(disp_at, rel);
}

fn call_code(gen: &mut Gen32, target: usize) {
    let rel = target as i64 - (gen.buf.current_address() as i64 + 5);
    if rel == (rel as i32) as i64 {
        enc::call_rel32(gen.buf, rel as i32);
    } else {
        enc::mov_reg_imm(gen.buf, encoding(x86::EAX), target as i32, 4);
        enc::call_reg(gen.buf, encoding(x86::EAX));
    }
}

fn throw_builtin(gen: &mut Gen32, body: &mut FunctionBody, code: i32) {
    if let (Some(setjmp_value), Some(eh)) = (body.setjmp_value, body.eh) {
        fix_value(body, setjmp_value);
        let off = body.values[setjmp_value].frame_offset;
        // call +0 / pop reg captures the PC.
        enc::call_rel32(gen.buf, 0);
        enc::pop_reg(gen.buf, encoding(x86::ECX));
        enc::mov_membase_reg(
            gen.buf,
            5,
            off + eh.catch_pc_offset as i32,
            encoding(x86::ECX),
            4,
        );
    }
    enc::push_imm(gen.buf, code);
    let thrower = gen.env.hooks.exception_builtin;
    call_code(gen, thrower);
}

fn check_reg_not_null(gen: &mut Gen32, body: &mut FunctionBody, reg: u8, code: i32) {
    enc::test_reg_reg(gen.buf, encoding(reg), encoding(reg), 4);
    let ok = forward_jcc(gen, enc::CC_NE);
    throw_builtin(gen, body, code);
    patch_forward_jcc(gen, ok);
}

// ---- prologue / epilogue ----------------------------------------------------

fn emit_prolog(gen: &mut Gen32, body: &FunctionBody) -> CodeOffset {
    let mut scratch = [0u8; PROLOG_SIZE];
    let len = {
        let mut pbuf = unsafe { CodeBuffer::new(scratch.as_mut_ptr(), PROLOG_SIZE) };
        enc::push_reg(&mut pbuf, encoding(x86::EBP));
        enc::mov_reg_reg(&mut pbuf, encoding(x86::EBP), encoding(x86::ESP), 4);
        let frame = (body.frame_size + 3) & !3;
        if frame > 0 {
            enc::alu_reg_imm(&mut pbuf, Alu::Sub, encoding(x86::ESP), frame as i32, 4);
        }
        debug_assert!(!pbuf.overflowed());
        pbuf.offset() as usize
    };
    let entry = PROLOG_SIZE - len;
    gen.buf.copy_in(entry as CodeOffset, &scratch[..len]);
    entry as CodeOffset
}

/// Bytes the callee pops with `ret imm16` under this body's convention.
fn callee_pop_amount(body: &FunctionBody) -> u16 {
    let sig = &body.signature;
    let mut state = abi_x86::PassingState::new(sig.abi);
    for ty in &sig.params {
        let mut p = ParamDesc::new(None);
        abi_x86::classify_param(&mut state, &mut p, ty);
    }
    let hidden = abi_x86::classify_return(&sig.ret).is_memory();
    abi_x86::callee_pop_bytes(sig.abi, state.stack_size, hidden) as u16
        + if hidden && !sig.abi.callee_pops() { 4 } else { 0 }
}

fn emit_epilog(gen: &mut Gen32, body: &FunctionBody) {
    let here = gen.buf.offset();
    if gen.epilog_fixup != 0 {
        gen.buf.patch_rel_chain(gen.epilog_fixup, here);
        gen.epilog_fixup = 0;
    }
    enc::mov_reg_reg(gen.buf, encoding(x86::ESP), encoding(x86::EBP), 4);
    enc::pop_reg(gen.buf, encoding(x86::EBP));
    let pop = callee_pop_amount(body);
    if pop > 0 {
        enc::ret_imm16(gen.buf, pop);
    } else {
        enc::ret(gen.buf);
    }
}

// ---- condition helpers ------------------------------------------------------

fn int_cc(op: Opcode) -> u8 {
    use Opcode::*;
    match op {
        IEq | BrIEq => enc::CC_E,
        INe | BrINe => enc::CC_NE,
        ILt | BrILt => enc::CC_L,
        ILtUn | BrILtUn => enc::CC_B,
        ILe | BrILe => enc::CC_LE,
        ILeUn | BrILeUn => enc::CC_BE,
        IGt | BrIGt => enc::CC_G,
        IGtUn | BrIGtUn => enc::CC_A,
        IGe | BrIGe => enc::CC_GE,
        IGeUn | BrIGeUn => enc::CC_AE,
        _ => unreachable!("not a 32-bit integer compare: {op:?}"),
    }
}

/// Long compares decompose into a high-word compare and an unsigned
/// low-word compare. Returns (high cc deciding true, high cc deciding
/// false, low cc) for the ordered forms.
fn long_cc(op: Opcode) -> (u8, u8, u8) {
    use Opcode::*;
    match op {
        LLt | BrLLt => (enc::CC_L, enc::CC_G, enc::CC_B),
        LLtUn | BrLLtUn => (enc::CC_B, enc::CC_A, enc::CC_B),
        LLe | BrLLe => (enc::CC_L, enc::CC_G, enc::CC_BE),
        LLeUn | BrLLeUn => (enc::CC_B, enc::CC_A, enc::CC_BE),
        LGt | BrLGt => (enc::CC_G, enc::CC_L, enc::CC_A),
        LGtUn | BrLGtUn => (enc::CC_A, enc::CC_B, enc::CC_A),
        LGe | BrLGe => (enc::CC_G, enc::CC_L, enc::CC_AE),
        LGeUn | BrLGeUn => (enc::CC_A, enc::CC_B, enc::CC_AE),
        _ => unreachable!("not a long ordered compare: {op:?}"),
    }
}

/// Stage a float comparison through `fucomip`; flags read like an
/// unsigned compare of `a` against `b`.
fn stage_float_compare(gen: &mut Gen32, body: &mut FunctionBody, a: Value, b: Value) {
    load_fpu(gen, body, b);
    load_fpu(gen, body, a);
    // fucomip st(0), st(1); fstp st(0)
    gen.buf.put1(0xDF);
    gen.buf.put1(0xE9);
    gen.fp_top -= 1;
    gen.buf.put1(0xDD);
    gen.buf.put1(0xD8);
    gen.fp_top -= 1;
}

struct FloatCond {
    cc: u8,
    nan_true: bool,
    nan_poisons_cc: bool,
}

fn float_cond(op: Opcode) -> FloatCond {
    use Opcode::*;
    let (cc, nan_true, nan_poisons_cc) = match op {
        FEq | DEq | NfEq | BrFEq | BrDEq | BrNfEq => (enc::CC_E, false, true),
        FNe | DNe | NfNe | BrFNe | BrDNe | BrNfNe => (enc::CC_NE, true, false),
        FLt | DLt | NfLt | BrFLt | BrDLt | BrNfLt => (enc::CC_B, false, true),
        FLtInv | DLtInv | NfLtInv | BrFLtInv | BrDLtInv | BrNfLtInv => (enc::CC_B, true, false),
        FLe | DLe | NfLe | BrFLe | BrDLe | BrNfLe => (enc::CC_BE, false, true),
        FLeInv | DLeInv | NfLeInv | BrFLeInv | BrDLeInv | BrNfLeInv => (enc::CC_BE, true, false),
        FGt | DGt | NfGt | BrFGt | BrDGt | BrNfGt => (enc::CC_A, false, false),
        FGtInv | DGtInv | NfGtInv | BrFGtInv | BrDGtInv | BrNfGtInv => (enc::CC_A, true, false),
        FGe | DGe | NfGe | BrFGe | BrDGe | BrNfGe => (enc::CC_AE, false, false),
        FGeInv | DGeInv | NfGeInv | BrFGeInv | BrDGeInv | BrNfGeInv => (enc::CC_AE, true, false),
        _ => unreachable!("not a float compare: {op:?}"),
    };
    FloatCond {
        cc,
        nan_true,
        nan_poisons_cc,
    }
}

// ---- operand access ---------------------------------------------------------

fn value_slot(slot: &Slot) -> CodegenResult<Value> {
    slot.value().ok_or(CodegenError::Malformed("expected value operand"))
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

fn label_slot(slot: &Slot) -> CodegenResult<Label> {
    slot.label().ok_or(CodegenError::Malformed("expected label operand"))
}

fn nint_of(body: &FunctionBody, value: Value) -> i64 {
    body.values[value].nint_constant().unwrap_or(0)
}

// ---- the dispatcher ---------------------------------------------------------

fn gen_insn(
    gen: &mut Gen32,
    body: &mut FunctionBody,
    block: Block,
    inst: Inst,
    index: usize,
) -> CodegenResult<()> {
    use Opcode::*;
    let op = body.insts[inst].opcode;
    trace!("emit(x86) {:?} at {:#x}", op, gen.buf.offset());
    match op {
        Nop => gen.buf.put1(0x90),

        Br => {
            let label = label_slot(&body.insts[inst].dest)?;
            output_branch(gen, body, None, label)?;
        }
        BrIFalse | BrITrue => {
            let label = label_slot(&body.insts[inst].dest)?;
            let v = value1(body, inst)?;
            load_word(gen, body, v, x86::EAX, 0);
            enc::test_reg_reg(gen.buf, encoding(x86::EAX), encoding(x86::EAX), 4);
            let cc = if op == BrIFalse { enc::CC_E } else { enc::CC_NE };
            output_branch(gen, body, Some(cc), label)?;
        }
        BrLFalse | BrLTrue => {
            let label = label_slot(&body.insts[inst].dest)?;
            let v = value1(body, inst)?;
            load_word(gen, body, v, x86::EAX, 0);
            load_word(gen, body, v, x86::ECX, 1);
            enc::alu_reg_reg(gen.buf, Alu::Or, encoding(x86::EAX), encoding(x86::ECX), 4);
            let cc = if op == BrLFalse { enc::CC_E } else { enc::CC_NE };
            output_branch(gen, body, Some(cc), label)?;
        }
        BrIEq | BrINe | BrILt | BrILtUn | BrILe | BrILeUn | BrIGt | BrIGtUn | BrIGe
        | BrIGeUn => {
            let label = label_slot(&body.insts[inst].dest)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            load_word(gen, body, a, x86::EAX, 0);
            load_word(gen, body, b, x86::ECX, 0);
            enc::alu_reg_reg(gen.buf, Alu::Cmp, encoding(x86::EAX), encoding(x86::ECX), 4);
            output_branch(gen, body, Some(int_cc(op)), label)?;
        }
        BrLEq | BrLNe => {
            let label = label_slot(&body.insts[inst].dest)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            // xor both halves together: zero iff equal.
            load_word(gen, body, a, x86::EAX, 0);
            load_word(gen, body, b, x86::ECX, 0);
            enc::alu_reg_reg(gen.buf, Alu::Xor, encoding(x86::EAX), encoding(x86::ECX), 4);
            load_word(gen, body, a, x86::EDX, 1);
            load_word(gen, body, b, x86::ECX, 1);
            enc::alu_reg_reg(gen.buf, Alu::Xor, encoding(x86::EDX), encoding(x86::ECX), 4);
            enc::alu_reg_reg(gen.buf, Alu::Or, encoding(x86::EAX), encoding(x86::EDX), 4);
            let cc = if op == BrLEq { enc::CC_E } else { enc::CC_NE };
            output_branch(gen, body, Some(cc), label)?;
        }
        BrLLt | BrLLtUn | BrLLe | BrLLeUn | BrLGt | BrLGtUn | BrLGe | BrLGeUn => {
            let label = label_slot(&body.insts[inst].dest)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            let (hi_true, hi_false, lo_cc) = long_cc(op);
            load_word(gen, body, a, x86::EAX, 1);
            load_word(gen, body, b, x86::ECX, 1);
            enc::alu_reg_reg(gen.buf, Alu::Cmp, encoding(x86::EAX), encoding(x86::ECX), 4);
            output_branch(gen, body, Some(hi_true), label)?;
            let skip = forward_jcc(gen, hi_false);
            load_word(gen, body, a, x86::EAX, 0);
            load_word(gen, body, b, x86::ECX, 0);
            enc::alu_reg_reg(gen.buf, Alu::Cmp, encoding(x86::EAX), encoding(x86::ECX), 4);
            output_branch(gen, body, Some(lo_cc), label)?;
            patch_forward_jcc(gen, skip);
        }
        BrFEq | BrFNe | BrFLt | BrFLe | BrFGt | BrFGe | BrFLtInv | BrFLeInv | BrFGtInv
        | BrFGeInv | BrDEq | BrDNe | BrDLt | BrDLe | BrDGt | BrDGe | BrDLtInv | BrDLeInv
        | BrDGtInv | BrDGeInv | BrNfEq | BrNfNe | BrNfLt | BrNfLe | BrNfGt | BrNfGe
        | BrNfLtInv | BrNfLeInv | BrNfGtInv | BrNfGeInv => {
            let label = label_slot(&body.insts[inst].dest)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            stage_float_compare(gen, body, a, b);
            let cond = float_cond(op);
            if cond.nan_poisons_cc {
                let skip = forward_jcc(gen, enc::CC_P);
                output_branch(gen, body, Some(cond.cc), label)?;
                patch_forward_jcc(gen, skip);
            } else if cond.nan_true {
                output_branch(gen, body, Some(cond.cc), label)?;
                output_branch(gen, body, Some(enc::CC_P), label)?;
            } else {
                output_branch(gen, body, Some(cond.cc), label)?;
            }
        }
        JumpTable => {
            let table = match &body.insts[inst].dest {
                Slot::Table(id) => *id,
                _ => return Err(CodegenError::Malformed("jump table without table")),
            };
            let idx = value1(body, inst)?;
            load_word(gen, body, idx, x86::EAX, 0);
            let hole = enc::jmp_memindex_abs(gen.buf, encoding(x86::EAX));
            // Inline table of absolute 32-bit entries.
            while gen.buf.offset() % 4 != 0 {
                gen.buf.put1(0x90);
            }
            let table_at = gen.buf.offset();
            gen.buf
                .patch_u32_at(hole, gen.buf.address_of(table_at) as u32);
            let labels = body.jump_tables[table as usize].clone();
            for label in labels {
                let target = body
                    .block_of_label(label)
                    .ok_or(CodegenError::UndefinedLabel(label.0))?;
                match body.blocks[target].address {
                    Some(addr) => {
                        let absolute = gen.buf.address_of(addr) as u32;
                        gen.buf.put4(absolute);
                    }
                    None => {
                        let mut head = body.blocks[target].fixup_abs;
                        gen.buf.emit_abs_fixup32(&mut head);
                        body.blocks[target].fixup_abs = head;
                    }
                }
            }
        }
        AddressOfLabel => {
            let dest = dest_value(body, inst)?;
            let label = label_slot(&body.insts[inst].value1)?;
            let target = body
                .block_of_label(label)
                .ok_or(CodegenError::UndefinedLabel(label.0))?;
            enc::mov_reg_imm(gen.buf, encoding(x86::EAX), 0, 4);
            let hole = gen.buf.offset() - 4;
            match body.blocks[target].address {
                Some(addr) => {
                    let absolute = gen.buf.address_of(addr) as u32;
                    gen.buf.patch_u32_at(hole, absolute);
                }
                None => {
                    let link = body.blocks[target].fixup_abs;
                    gen.buf.patch_u32_at(hole, link);
                    body.blocks[target].fixup_abs = hole;
                }
            }
            store_word(gen, body, dest, x86::EAX, 0);
        }

        IEq | INe | ILt | ILtUn | ILe | ILeUn | IGt | IGtUn | IGe | IGeUn => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            load_word(gen, body, a, x86::EAX, 0);
            load_word(gen, body, b, x86::ECX, 0);
            enc::alu_reg_reg(gen.buf, Alu::Cmp, encoding(x86::EAX), encoding(x86::ECX), 4);
            enc::setcc_reg(gen.buf, int_cc(op), encoding(x86::EAX));
            enc::movzx_reg_reg8(gen.buf, encoding(x86::EAX), encoding(x86::EAX));
            store_word(gen, body, dest, x86::EAX, 0);
        }
        LEq | LNe | LLt | LLtUn | LLe | LLeUn | LGt | LGtUn | LGe | LGeUn => {
            // Compute through a short branch diamond into edx.
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            match op {
                LEq | LNe => {
                    load_word(gen, body, a, x86::EAX, 0);
                    load_word(gen, body, b, x86::ECX, 0);
                    enc::alu_reg_reg(gen.buf, Alu::Xor, encoding(x86::EAX), encoding(x86::ECX), 4);
                    load_word(gen, body, a, x86::EDX, 1);
                    load_word(gen, body, b, x86::ECX, 1);
                    enc::alu_reg_reg(gen.buf, Alu::Xor, encoding(x86::EDX), encoding(x86::ECX), 4);
                    enc::alu_reg_reg(gen.buf, Alu::Or, encoding(x86::EAX), encoding(x86::EDX), 4);
                    let cc = if op == LEq { enc::CC_E } else { enc::CC_NE };
                    enc::setcc_reg(gen.buf, cc, encoding(x86::EAX));
                    enc::movzx_reg_reg8(gen.buf, encoding(x86::EAX), encoding(x86::EAX));
                    store_word(gen, body, dest, x86::EAX, 0);
                    return Ok(());
                }
                _ => {
                    enc::mov_reg_imm(gen.buf, encoding(x86::EDX), 1, 4);
                    let (hi_true, hi_false, lo_cc) = long_cc(op);
                    load_word(gen, body, a, x86::EAX, 1);
                    load_word(gen, body, b, x86::ECX, 1);
                    enc::alu_reg_reg(gen.buf, Alu::Cmp, encoding(x86::EAX), encoding(x86::ECX), 4);
                    let set_true = forward_jcc(gen, hi_true);
                    let set_false = forward_jcc(gen, hi_false);
                    load_word(gen, body, a, x86::EAX, 0);
                    load_word(gen, body, b, x86::ECX, 0);
                    enc::alu_reg_reg(gen.buf, Alu::Cmp, encoding(x86::EAX), encoding(x86::ECX), 4);
                    let set_true2 = forward_jcc(gen, lo_cc);
                    patch_forward_jcc(gen, set_false);
                    enc::clear_reg(gen.buf, encoding(x86::EDX));
                    patch_forward_jcc(gen, set_true);
                    patch_forward_jcc(gen, set_true2);
                    store_word(gen, body, dest, x86::EDX, 0);
                }
            }
        }
        FEq | FNe | FLt | FLe | FGt | FGe | FLtInv | FLeInv | FGtInv | FGeInv | DEq | DNe
        | DLt | DLe | DGt | DGe | DLtInv | DLeInv | DGtInv | DGeInv | NfEq | NfNe | NfLt
        | NfLe | NfGt | NfGe | NfLtInv | NfLeInv | NfGtInv | NfGeInv => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            stage_float_compare(gen, body, a, b);
            let cond = float_cond(op);
            enc::setcc_reg(gen.buf, cond.cc, encoding(x86::EAX));
            if cond.nan_poisons_cc {
                enc::setcc_reg(gen.buf, enc::CC_NP, encoding(x86::ECX));
                enc::alu_reg_reg(gen.buf, Alu::And, encoding(x86::EAX), encoding(x86::ECX), 1);
            } else if cond.nan_true {
                enc::setcc_reg(gen.buf, enc::CC_P, encoding(x86::ECX));
                enc::alu_reg_reg(gen.buf, Alu::Or, encoding(x86::EAX), encoding(x86::ECX), 1);
            }
            enc::movzx_reg_reg8(gen.buf, encoding(x86::EAX), encoding(x86::EAX));
            store_word(gen, body, dest, x86::EAX, 0);
        }

        IAdd | ISub | IMul | IAnd | IOr | IXor => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            load_word(gen, body, a, x86::EAX, 0);
            load_word(gen, body, b, x86::ECX, 0);
            match op {
                IMul => enc::imul_reg_reg(gen.buf, encoding(x86::EAX), encoding(x86::ECX)),
                _ => {
                    let alu = match op {
                        IAdd => Alu::Add,
                        ISub => Alu::Sub,
                        IAnd => Alu::And,
                        IOr => Alu::Or,
                        _ => Alu::Xor,
                    };
                    enc::alu_reg_reg(gen.buf, alu, encoding(x86::EAX), encoding(x86::ECX), 4);
                }
            }
            store_word(gen, body, dest, x86::EAX, 0);
        }
        LAdd | LSub | LAnd | LOr | LXor => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            let (lo_op, hi_op) = match op {
                LAdd => (Alu::Add, Alu::Adc),
                LSub => (Alu::Sub, Alu::Sbb),
                LAnd => (Alu::And, Alu::And),
                LOr => (Alu::Or, Alu::Or),
                _ => (Alu::Xor, Alu::Xor),
            };
            load_word(gen, body, a, x86::EAX, 0);
            load_word(gen, body, a, x86::EDX, 1);
            load_word(gen, body, b, x86::ECX, 0);
            enc::alu_reg_reg(gen.buf, lo_op, encoding(x86::EAX), encoding(x86::ECX), 4);
            load_word(gen, body, b, x86::ECX, 1);
            enc::alu_reg_reg(gen.buf, hi_op, encoding(x86::EDX), encoding(x86::ECX), 4);
            store_word(gen, body, dest, x86::EAX, 0);
            store_word(gen, body, dest, x86::EDX, 1);
        }
        IAddOvf | ISubOvf | IMulOvf | IAddOvfUn | ISubOvfUn | IMulOvfUn | LAddOvf
        | LSubOvf | LAddOvfUn | LSubOvfUn => {
            gen_overflow_arith(gen, body, inst, op)?;
        }
        IDiv | IDivUn | IRem | IRemUn => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            let signed = matches!(op, IDiv | IRem);
            load_word(gen, body, a, x86::EAX, 0);
            load_word(gen, body, b, x86::ECX, 0);
            check_reg_not_null(gen, body, x86::ECX, builtin::DIVISION_BY_ZERO);
            if signed {
                enc::alu_reg_imm(gen.buf, Alu::Cmp, encoding(x86::ECX), -1, 4);
                let ok1 = forward_jcc(gen, enc::CC_NE);
                enc::alu_reg_imm(gen.buf, Alu::Cmp, encoding(x86::EAX), i32::MIN, 4);
                let ok2 = forward_jcc(gen, enc::CC_NE);
                throw_builtin(gen, body, builtin::ARITHMETIC);
                patch_forward_jcc(gen, ok1);
                patch_forward_jcc(gen, ok2);
                enc::cdq(gen.buf);
                enc::idiv_reg(gen.buf, encoding(x86::ECX));
            } else {
                enc::clear_reg(gen.buf, encoding(x86::EDX));
                enc::div_reg(gen.buf, encoding(x86::ECX));
            }
            let result = if matches!(op, IRem | IRemUn) { x86::EDX } else { x86::EAX };
            store_word(gen, body, dest, result, 0);
        }
        INeg | INot => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            load_word(gen, body, a, x86::EAX, 0);
            if op == INeg {
                enc::neg_reg(gen.buf, encoding(x86::EAX));
            } else {
                enc::not_reg(gen.buf, encoding(x86::EAX));
            }
            store_word(gen, body, dest, x86::EAX, 0);
        }
        LNeg => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            load_word(gen, body, a, x86::EAX, 0);
            load_word(gen, body, a, x86::EDX, 1);
            // negate the pair: neg low; adc high, 0; neg high.
            enc::neg_reg(gen.buf, encoding(x86::EAX));
            enc::alu_reg_imm(gen.buf, Alu::Adc, encoding(x86::EDX), 0, 4);
            enc::neg_reg(gen.buf, encoding(x86::EDX));
            store_word(gen, body, dest, x86::EAX, 0);
            store_word(gen, body, dest, x86::EDX, 1);
        }
        LNot => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            load_word(gen, body, a, x86::EAX, 0);
            enc::not_reg(gen.buf, encoding(x86::EAX));
            store_word(gen, body, dest, x86::EAX, 0);
            load_word(gen, body, a, x86::EAX, 1);
            enc::not_reg(gen.buf, encoding(x86::EAX));
            store_word(gen, body, dest, x86::EAX, 1);
        }
        IShl | IShr | IShrUn => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            let shift = match op {
                IShl => Shift::Shl,
                IShr => Shift::Sar,
                _ => Shift::Shr,
            };
            load_word(gen, body, a, x86::EAX, 0);
            if let Some(imm) = body.values[b].nint_constant() {
                enc::shift_reg_imm(gen.buf, shift, encoding(x86::EAX), imm as u8);
            } else {
                load_word(gen, body, b, x86::ECX, 0);
                enc::shift_reg_cl(gen.buf, shift, encoding(x86::EAX));
            }
            store_word(gen, body, dest, x86::EAX, 0);
        }

        FAdd | FSub | FMul | FDiv | DAdd | DSub | DMul | DDiv | NfAdd | NfSub | NfMul
        | NfDiv => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let b = value2(body, inst)?;
            load_fpu(gen, body, a);
            load_fpu(gen, body, b);
            gen.buf.put1(0xDE);
            gen.buf.put1(match op {
                FAdd | DAdd | NfAdd => 0xC1,
                FMul | DMul | NfMul => 0xC9,
                FSub | DSub | NfSub => 0xE9,
                _ => 0xF9,
            });
            gen.fp_top -= 1;
            store_fpu_pop(gen, body, dest);
        }
        FNeg | DNeg | NfNeg => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            load_fpu(gen, body, a);
            gen.buf.put1(0xD9);
            gen.buf.put1(0xE0); // fchs
            store_fpu_pop(gen, body, dest);
        }
        FSqrt | DSqrt | NfSqrt => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            load_fpu(gen, body, a);
            gen.buf.put1(0xD9);
            gen.buf.put1(0xFA); // fsqrt
            store_fpu_pop(gen, body, dest);
        }

        TruncSByte | TruncUByte | TruncShort | TruncUShort | LowWord | CopyInt
        | CopyStoreByte | CopyStoreShort | CopyLoadSByte | CopyLoadUByte | CopyLoadShort
        | CopyLoadUShort => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            load_word(gen, body, a, x86::EAX, 0);
            store_word(gen, body, dest, x86::EAX, 0);
        }
        CheckSByte | CheckUByte | CheckShort | CheckUShort | CheckInt | CheckUInt => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            load_word(gen, body, a, x86::EAX, 0);
            let (lo, hi) = match op {
                CheckSByte => (i8::MIN as i32, i8::MAX as i32),
                CheckUByte => (0, u8::MAX as i32),
                CheckShort => (i16::MIN as i32, i16::MAX as i32),
                CheckUShort => (0, u16::MAX as i32),
                _ => (0, i32::MAX),
            };
            if lo != i32::MIN {
                enc::alu_reg_imm(gen.buf, Alu::Cmp, encoding(x86::EAX), lo, 4);
                let ok = forward_jcc(gen, enc::CC_GE);
                throw_builtin(gen, body, builtin::OVERFLOW);
                patch_forward_jcc(gen, ok);
            }
            enc::alu_reg_imm(gen.buf, Alu::Cmp, encoding(x86::EAX), hi, 4);
            let ok = forward_jcc(gen, enc::CC_LE);
            throw_builtin(gen, body, builtin::OVERFLOW);
            patch_forward_jcc(gen, ok);
            store_word(gen, body, dest, x86::EAX, 0);
        }
        CheckLowWord => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            load_word(gen, body, a, x86::ECX, 1);
            enc::test_reg_reg(gen.buf, encoding(x86::ECX), encoding(x86::ECX), 4);
            let ok = forward_jcc(gen, enc::CC_E);
            throw_builtin(gen, body, builtin::OVERFLOW);
            patch_forward_jcc(gen, ok);
            load_word(gen, body, a, x86::EAX, 0);
            store_word(gen, body, dest, x86::EAX, 0);
        }
        CheckSignedLowWord => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            load_word(gen, body, a, x86::EAX, 0);
            enc::mov_reg_reg(gen.buf, encoding(x86::ECX), encoding(x86::EAX), 4);
            enc::shift_reg_imm(gen.buf, Shift::Sar, encoding(x86::ECX), 31);
            load_word(gen, body, a, x86::EDX, 1);
            enc::alu_reg_reg(gen.buf, Alu::Cmp, encoding(x86::EDX), encoding(x86::ECX), 4);
            let ok = forward_jcc(gen, enc::CC_E);
            throw_builtin(gen, body, builtin::OVERFLOW);
            patch_forward_jcc(gen, ok);
            store_word(gen, body, dest, x86::EAX, 0);
        }
        CheckLong | CheckULong => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            load_word(gen, body, a, x86::ECX, 1);
            enc::test_reg_reg(gen.buf, encoding(x86::ECX), encoding(x86::ECX), 4);
            let ok = forward_jcc(gen, enc::CC_GE);
            throw_builtin(gen, body, builtin::OVERFLOW);
            patch_forward_jcc(gen, ok);
            load_word(gen, body, a, x86::EAX, 0);
            store_word(gen, body, dest, x86::EAX, 0);
            store_word(gen, body, dest, x86::ECX, 1);
        }
        ExpandInt => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            load_word(gen, body, a, x86::EAX, 0);
            enc::cdq(gen.buf);
            store_word(gen, body, dest, x86::EAX, 0);
            store_word(gen, body, dest, x86::EDX, 1);
        }
        ExpandUInt => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            load_word(gen, body, a, x86::EAX, 0);
            enc::clear_reg(gen.buf, encoding(x86::EDX));
            store_word(gen, body, dest, x86::EAX, 0);
            store_word(gen, body, dest, x86::EDX, 1);
        }
        CopyLong => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            load_word(gen, body, a, x86::EAX, 0);
            store_word(gen, body, dest, x86::EAX, 0);
            load_word(gen, body, a, x86::EAX, 1);
            store_word(gen, body, dest, x86::EAX, 1);
        }
        IntToFloat32 | IntToFloat64 | IntToNFloat => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            fix_value(body, a);
            if body.values[a].is_constant() {
                fix_value_const(gen, body, a);
            }
            let off = body.values[a].frame_offset;
            enc::fild_membase(gen.buf, 5, off, 4);
            gen.fp_top += 1;
            store_fpu_pop(gen, body, dest);
        }
        UIntToFloat32 | UIntToFloat64 | UIntToNFloat | LongToFloat32 | LongToFloat64
        | LongToNFloat => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            // Stage an 8-byte signed image in the frame and fild it.
            let tmp = body.allocate_frame_slot(8, 8);
            load_word(gen, body, a, x86::EAX, 0);
            enc::mov_membase_reg(gen.buf, 5, tmp, encoding(x86::EAX), 4);
            if matches!(op, UIntToFloat32 | UIntToFloat64 | UIntToNFloat) {
                enc::clear_reg(gen.buf, encoding(x86::EAX));
            } else {
                load_word(gen, body, a, x86::EAX, 1);
            }
            enc::mov_membase_reg(gen.buf, 5, tmp + 4, encoding(x86::EAX), 4);
            enc::fild_membase(gen.buf, 5, tmp, 8);
            gen.fp_top += 1;
            store_fpu_pop(gen, body, dest);
        }
        Float32ToFloat64 | Float64ToFloat32 | Float32ToNFloat | Float64ToNFloat
        | NFloatToFloat32 | NFloatToFloat64 | CopyFloat32 | CopyFloat64 | CopyNFloat => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            load_fpu(gen, body, a);
            store_fpu_pop(gen, body, dest);
        }
        CopyStruct => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            fix_value(body, dest);
            fix_value(body, a);
            let size = body.values[dest].ty.size(PtrWidth::P32) as u64;
            let doff = body.values[dest].frame_offset;
            let soff = body.values[a].frame_offset;
            block_copy(gen, x86::EBP, doff, x86::EBP, soff, size);
        }

        AddressOf => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            fix_value(body, a);
            let off = body.values[a].frame_offset;
            enc::lea_reg_membase(gen.buf, encoding(x86::EAX), 5, off);
            store_word(gen, body, dest, x86::EAX, 0);
        }
        AddRelative => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            load_word(gen, body, a, x86::EAX, 0);
            if off != 0 {
                enc::alu_reg_imm(gen.buf, Alu::Add, encoding(x86::EAX), off, 4);
            }
            store_word(gen, body, dest, x86::EAX, 0);
        }
        LoadRelativeSByte | LoadRelativeUByte | LoadRelativeShort | LoadRelativeUShort
        | LoadRelativeInt => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            load_word(gen, body, a, x86::EAX, 0);
            let e = encoding(x86::EAX);
            match op {
                LoadRelativeSByte => enc::movsx_reg_membase(gen.buf, e, e, off, 1),
                LoadRelativeUByte => enc::movzx_reg_membase(gen.buf, e, e, off, 1),
                LoadRelativeShort => enc::movsx_reg_membase(gen.buf, e, e, off, 2),
                LoadRelativeUShort => enc::movzx_reg_membase(gen.buf, e, e, off, 2),
                _ => enc::mov_reg_membase(gen.buf, e, e, off, 4),
            }
            store_word(gen, body, dest, x86::EAX, 0);
        }
        LoadRelativeLong => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            load_word(gen, body, a, x86::ECX, 0);
            enc::mov_reg_membase(gen.buf, encoding(x86::EAX), encoding(x86::ECX), off, 4);
            store_word(gen, body, dest, x86::EAX, 0);
            enc::mov_reg_membase(gen.buf, encoding(x86::EAX), encoding(x86::ECX), off + 4, 4);
            store_word(gen, body, dest, x86::EAX, 1);
        }
        LoadRelativeFloat32 | LoadRelativeFloat64 | LoadRelativeNFloat => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            load_word(gen, body, a, x86::EAX, 0);
            let size = match op {
                LoadRelativeFloat32 => 4,
                LoadRelativeFloat64 => 8,
                _ => 10,
            };
            enc::fld_membase(gen.buf, encoding(x86::EAX), off, size);
            gen.fp_top += 1;
            store_fpu_pop(gen, body, dest);
        }
        LoadRelativeStruct => {
            let dest = dest_value(body, inst)?;
            let a = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            load_word(gen, body, a, x86::ECX, 0);
            fix_value(body, dest);
            let size = body.values[dest].ty.size(PtrWidth::P32) as u64;
            let doff = body.values[dest].frame_offset;
            block_copy(gen, x86::EBP, doff, x86::ECX, off, size);
        }
        StoreRelativeByte | StoreRelativeShort | StoreRelativeInt => {
            let ptr = dest_value(body, inst)?;
            let v = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            load_word(gen, body, ptr, x86::ECX, 0);
            load_word(gen, body, v, x86::EAX, 0);
            let size = match op {
                StoreRelativeByte => 1,
                StoreRelativeShort => 2,
                _ => 4,
            };
            enc::mov_membase_reg(gen.buf, encoding(x86::ECX), off, encoding(x86::EAX), size);
        }
        StoreRelativeLong => {
            let ptr = dest_value(body, inst)?;
            let v = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            load_word(gen, body, ptr, x86::ECX, 0);
            load_word(gen, body, v, x86::EAX, 0);
            enc::mov_membase_reg(gen.buf, encoding(x86::ECX), off, encoding(x86::EAX), 4);
            load_word(gen, body, v, x86::EAX, 1);
            enc::mov_membase_reg(gen.buf, encoding(x86::ECX), off + 4, encoding(x86::EAX), 4);
        }
        StoreRelativeFloat32 | StoreRelativeFloat64 | StoreRelativeNFloat => {
            let ptr = dest_value(body, inst)?;
            let v = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            load_fpu(gen, body, v);
            load_word(gen, body, ptr, x86::ECX, 0);
            let size = match op {
                StoreRelativeFloat32 => 4,
                StoreRelativeFloat64 => 8,
                _ => 10,
            };
            enc::fstp_membase(gen.buf, encoding(x86::ECX), off, size);
            gen.fp_top -= 1;
        }
        StoreRelativeStruct => {
            let ptr = dest_value(body, inst)?;
            let v = value1(body, inst)?;
            let off = nint_of(body, value2(body, inst)?) as i32;
            load_word(gen, body, ptr, x86::ECX, 0);
            fix_value(body, v);
            let size = body.values[v].ty.size(PtrWidth::P32) as u64;
            let soff = body.values[v].frame_offset;
            block_copy(gen, x86::ECX, off, x86::EBP, soff, size);
        }
        CheckNull => {
            if check_is_redundant(body, block, index) {
                return Ok(());
            }
            let v = value1(body, inst)?;
            load_word(gen, body, v, x86::EAX, 0);
            check_reg_not_null(gen, body, x86::EAX, builtin::NULL_REFERENCE);
        }
        Memcpy | Memmove | Memset => {
            // Push (size, src/value, dest) and call the C helper.
            let dest = dest_value(body, inst)?;
            let arg = value1(body, inst)?;
            let size = value2(body, inst)?;
            load_word(gen, body, size, x86::EAX, 0);
            enc::push_reg(gen.buf, encoding(x86::EAX));
            load_word(gen, body, arg, x86::EAX, 0);
            enc::push_reg(gen.buf, encoding(x86::EAX));
            load_word(gen, body, dest, x86::EAX, 0);
            enc::push_reg(gen.buf, encoding(x86::EAX));
            let hook = match op {
                Memcpy => gen.env.hooks.memcpy,
                Memmove => gen.env.hooks.memmove,
                _ => gen.env.hooks.memset,
            };
            call_code(gen, hook);
            enc::alu_reg_imm(gen.buf, Alu::Add, encoding(x86::ESP), 12, 4);
        }
        Alloca => {
            let dest = dest_value(body, inst)?;
            let size = value1(body, inst)?;
            load_word(gen, body, size, x86::EAX, 0);
            enc::alu_reg_imm(gen.buf, Alu::Add, encoding(x86::EAX), 15, 4);
            enc::alu_reg_imm(gen.buf, Alu::And, encoding(x86::EAX), -16, 4);
            enc::alu_reg_reg(gen.buf, Alu::Sub, encoding(x86::ESP), encoding(x86::EAX), 4);
            enc::mov_reg_reg(gen.buf, encoding(x86::EAX), encoding(x86::ESP), 4);
            store_word(gen, body, dest, x86::EAX, 0);
        }

        PushInt | PushFloat32 => {
            let v = value1(body, inst)?;
            push_value_words(gen, body, v, 1);
        }
        PushLong | PushFloat64 => {
            let v = value1(body, inst)?;
            push_value_words(gen, body, v, 2);
        }
        PushNFloat => {
            let v = value1(body, inst)?;
            push_value_words(gen, body, v, 3);
        }
        PushPtr => {
            let v = value1(body, inst)?;
            push_value_words(gen, body, v, 1);
        }
        PushStruct => {
            let v = value1(body, inst)?;
            fix_value(body, v);
            let size = (body.values[v].ty.size(PtrWidth::P32) + 3) & !3;
            push_value_words(gen, body, v, (size / 4) as i32);
        }
        PopStack => {
            let n = nint_of(body, value1(body, inst)?);
            if n > 0 {
                enc::alu_reg_imm(gen.buf, Alu::Add, encoding(x86::ESP), (n * 4) as i32, 4);
            }
        }
        OutgoingReg => {
            let v = value1(body, inst)?;
            let packed = nint_of(body, value2(body, inst)?);
            load_word(gen, body, v, (packed & 0xff) as u8, ((packed >> 8) & 0xff) as i32);
        }
        ReturnReg => {
            let v = value1(body, inst)?;
            let packed = nint_of(body, value2(body, inst)?);
            let reg = (packed & 0xff) as u8;
            let part = ((packed >> 8) & 0xff) as i32;
            if x86::is_fp_stack(reg) {
                gen.fp_top += 1;
                store_fpu_pop(gen, body, v);
            } else {
                store_word(gen, body, v, reg, part);
            }
        }
        IncomingReg => {
            let dest = dest_value(body, inst)?;
            let reg = nint_of(body, value1(body, inst)?) as u8;
            let part = nint_of(body, value2(body, inst)?) as i32;
            store_word(gen, body, dest, reg, part);
        }

        Call | CallTail | CallExternal | CallExternalTail | CallIndirect
        | CallIndirectTail | CallVtablePtr | CallVtablePtrTail => {
            gen_call(gen, body, inst, op)?;
        }

        Return => jump_to_epilog(gen, body, block),
        ReturnInt => {
            let v = value1(body, inst)?;
            load_word(gen, body, v, x86::EAX, 0);
            jump_to_epilog(gen, body, block);
        }
        ReturnLong => {
            let v = value1(body, inst)?;
            load_word(gen, body, v, x86::EAX, 0);
            load_word(gen, body, v, x86::EDX, 1);
            jump_to_epilog(gen, body, block);
        }
        ReturnFloat32 | ReturnFloat64 | ReturnNFloat => {
            let v = value1(body, inst)?;
            load_fpu(gen, body, v);
            gen.fp_top -= 1; // stays in ST0 for the caller
            jump_to_epilog(gen, body, block);
        }
        ReturnSmallStruct => {
            let v = value1(body, inst)?;
            fix_value(body, v);
            let off = body.values[v].frame_offset;
            let size = body.values[v].ty.size(PtrWidth::P32);
            enc::mov_reg_membase(gen.buf, encoding(x86::EAX), 5, off, 4);
            if size > 4 {
                enc::mov_reg_membase(gen.buf, encoding(x86::EDX), 5, off + 4, 4);
            }
            jump_to_epilog(gen, body, block);
        }

        Throw => {
            let v = value1(body, inst)?;
            load_word(gen, body, v, x86::EAX, 0);
            enc::push_reg(gen.buf, encoding(x86::EAX));
            let thrower = gen.env.hooks.exception_throw;
            call_code(gen, thrower);
        }
        LoadPc => {
            let dest = dest_value(body, inst)?;
            enc::call_rel32(gen.buf, 0);
            enc::pop_reg(gen.buf, encoding(x86::EAX));
            store_word(gen, body, dest, x86::EAX, 0);
        }
        LoadFramePtr => {
            let dest = dest_value(body, inst)?;
            enc::mov_reg_reg(gen.buf, encoding(x86::EAX), encoding(x86::EBP), 4);
            store_word(gen, body, dest, x86::EAX, 0);
        }
        CaptureContext => {
            let dest = dest_value(body, inst)?;
            let addr = value1(body, inst)?;
            load_word(gen, body, addr, x86::ECX, 0);
            // call +0 / pop captures the PC of the pop itself; the resume
            // point is a fixed 14 bytes later (pop 1, add 3, the three
            // stores 3+2+3, xor 2).
            enc::call_rel32(gen.buf, 0);
            enc::pop_reg(gen.buf, encoding(x86::EDX));
            enc::alu_reg_imm(gen.buf, Alu::Add, encoding(x86::EDX), 14, 4);
            enc::mov_membase_reg(gen.buf, encoding(x86::ECX), 8, encoding(x86::EDX), 4);
            enc::mov_membase_reg(gen.buf, encoding(x86::ECX), 0, encoding(x86::ESP), 4);
            enc::mov_membase_reg(gen.buf, encoding(x86::ECX), 4, encoding(x86::EBP), 4);
            enc::clear_reg(gen.buf, encoding(x86::EAX));
            // A throw re-enters here with eax nonzero.
            store_word(gen, body, dest, x86::EAX, 0);
        }
        EnterFinally => {}
        LeaveFinally => enc::ret(gen.buf),
        CallFinally => {
            let label = label_slot(&body.insts[inst].dest)?;
            gen_call_label(gen, body, label)?;
        }
        EnterFilter => {
            let dest = dest_value(body, inst)?;
            store_word(gen, body, dest, x86::EAX, 0);
        }
        LeaveFilter => {
            let v = value1(body, inst)?;
            load_word(gen, body, v, x86::EAX, 0);
            enc::ret(gen.buf);
        }
        CallFilter => {
            let label = label_slot(&body.insts[inst].dest)?;
            let v = value1(body, inst)?;
            load_word(gen, body, v, x86::EAX, 0);
            gen_call_label(gen, body, label)?;
        }
        MarkOffset => {
            let mark = nint_of(body, value1(body, inst)?);
            trace!("bytecode offset {} at {:#x}", mark, gen.buf.offset());
            let at = gen.buf.offset();
            gen.marks.push((at, mark));
        }

        _ => return Err(CodegenError::Malformed("opcode has no x86 rule")),
    }
    Ok(())
}

// ---- compound emissions -----------------------------------------------------

fn push_value_words(gen: &mut Gen32, body: &mut FunctionBody, v: Value, words: i32) {
    if body.values[v].is_constant() && words <= 2 {
        let (lo, hi) = const_words(&body.values[v].konst.expect("constant"));
        if words == 2 {
            enc::push_imm(gen.buf, hi);
        }
        enc::push_imm(gen.buf, lo);
        return;
    }
    fix_value(body, v);
    if body.values[v].is_constant() {
        fix_value_const(gen, body, v);
    }
    let off = body.values[v].frame_offset;
    for w in (0..words).rev() {
        enc::push_membase(gen.buf, 5, off + w * 4);
    }
}

fn block_copy(gen: &mut Gen32, dreg: u8, doff: i32, sreg: u8, soff: i32, mut size: u64) {
    let mut offset = 0i32;
    let mut chunk = 4u64;
    while chunk > 0 {
        while size >= chunk {
            enc::mov_reg_membase(
                gen.buf,
                encoding(x86::EAX),
                encoding(sreg),
                soff + offset,
                chunk as u8,
            );
            enc::mov_membase_reg(
                gen.buf,
                encoding(dreg),
                doff + offset,
                encoding(x86::EAX),
                chunk as u8,
            );
            size -= chunk;
            offset += chunk as i32;
        }
        chunk /= 2;
    }
}

fn gen_overflow_arith(
    gen: &mut Gen32,
    body: &mut FunctionBody,
    inst: Inst,
    op: Opcode,
) -> CodegenResult<()> {
    use Opcode::*;
    let dest = dest_value(body, inst)?;
    let a = value1(body, inst)?;
    let b = value2(body, inst)?;
    let long = matches!(op, LAddOvf | LSubOvf | LAddOvfUn | LSubOvfUn);
    let unsigned = matches!(op, IAddOvfUn | ISubOvfUn | LAddOvfUn | LSubOvfUn | IMulOvfUn);
    load_word(gen, body, a, x86::EAX, 0);
    if long {
        load_word(gen, body, a, x86::EDX, 1);
        load_word(gen, body, b, x86::ECX, 0);
        let (lo_op, hi_op) = if matches!(op, LAddOvf | LAddOvfUn) {
            (Alu::Add, Alu::Adc)
        } else {
            (Alu::Sub, Alu::Sbb)
        };
        enc::alu_reg_reg(gen.buf, lo_op, encoding(x86::EAX), encoding(x86::ECX), 4);
        load_word(gen, body, b, x86::ECX, 1);
        enc::alu_reg_reg(gen.buf, hi_op, encoding(x86::EDX), encoding(x86::ECX), 4);
    } else {
        load_word(gen, body, b, x86::ECX, 0);
        match op {
            IAddOvf | IAddOvfUn => {
                enc::alu_reg_reg(gen.buf, Alu::Add, encoding(x86::EAX), encoding(x86::ECX), 4)
            }
            ISubOvf | ISubOvfUn => {
                enc::alu_reg_reg(gen.buf, Alu::Sub, encoding(x86::EAX), encoding(x86::ECX), 4)
            }
            IMulOvf => enc::imul_reg_reg(gen.buf, encoding(x86::EAX), encoding(x86::ECX)),
            IMulOvfUn => {
                // one-operand mul: edx:eax <- eax * ecx
                gen.buf.put1(0xF7);
                gen.buf.put1(0xE1);
            }
            _ => unreachable!(),
        }
    }
    let skip = if unsigned {
        forward_jcc(gen, enc::CC_AE) // jnc
    } else {
        forward_jcc(gen, 0x1) // jno
    };
    throw_builtin(gen, body, builtin::OVERFLOW);
    patch_forward_jcc(gen, skip);
    store_word(gen, body, dest, x86::EAX, 0);
    if long {
        store_word(gen, body, dest, x86::EDX, 1);
    }
    Ok(())
}

fn gen_call(
    gen: &mut Gen32,
    body: &mut FunctionBody,
    inst: Inst,
    op: Opcode,
) -> CodegenResult<()> {
    use Opcode::*;
    let tail = matches!(
        op,
        CallTail | CallExternalTail | CallIndirectTail | CallVtablePtrTail
    );
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
        _ => {
            // `eax` is the only caller-saved register the 32-bit
            // conventions never pass arguments in.
            let v = value1(body, inst)?;
            load_word(gen, body, v, x86::EAX, 0);
            check_reg_not_null(gen, body, x86::EAX, builtin::NULL_FUNCTION);
            None
        }
    };
    if tail {
        enc::mov_reg_reg(gen.buf, encoding(x86::ESP), encoding(x86::EBP), 4);
        enc::pop_reg(gen.buf, encoding(x86::EBP));
        match target {
            Some(addr) => {
                let rel = addr as i64 - (gen.buf.current_address() as i64 + 5);
                if rel == (rel as i32) as i64 {
                    gen.buf.put1(0xE9);
                    gen.buf.put4(rel as i32 as u32);
                } else {
                    enc::mov_reg_imm(gen.buf, encoding(x86::EAX), addr as i32, 4);
                    enc::jmp_reg(gen.buf, encoding(x86::EAX));
                }
            }
            None => enc::jmp_reg(gen.buf, encoding(x86::EAX)),
        }
    } else {
        match target {
            Some(addr) => call_code(gen, addr),
            None => enc::call_reg(gen.buf, encoding(x86::EAX)),
        }
    }
    Ok(())
}

fn gen_call_label(gen: &mut Gen32, body: &mut FunctionBody, label: Label) -> CodegenResult<()> {
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
