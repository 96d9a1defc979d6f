//! x86-64 emission helpers above the raw encoders.
//!
//! This layer knows about the frame layout, value storage, the fixup
//! chains, the x87 stack cursor and the runtime hooks. The per-opcode
//! dispatch in `lower` is built entirely from these helpers.
//!
//! Frame layout (rbp-relative, downwards):
//!
//! ```text
//!   [rbp]                 saved rbp
//!   [rbp - frame_size..]  local value slots
//!   below locals          callee-saved register save area
//!   [rsp ..]              outgoing argument area (param_area_size bytes)
//! ```

use crate::abi::sysv64::{classify_param, classify_return, PassingState};
use crate::abi::{ArgClass, ParamDesc, RetLoc};
use crate::binemit::{CodeBuffer, CodeOffset};
use crate::compile::CompileEnv;
use crate::fold::builtin;
use crate::ir::insn::{InstData, Slot};
use crate::ir::types::{ConstData, PtrWidth, Type, TypeKind};
use crate::ir::value::{Value, ValueFlags};
use crate::ir::{FunctionBody, Opcode};
use crate::isa::x64::enc;
use crate::isa::x64::PROLOG_SIZE;
use crate::regs::x64::{self, encoding, REG_INFO};
use crate::regs::RegSet;
use crate::{CodegenError, CodegenResult};

/// Threshold below which struct copies are inlined.
pub const MAX_MEMCPY_INLINE: u64 = 0x40;

/// Threshold below which memory fills are inlined.
pub const MAX_MEMSET_INLINE: u64 = 0x80;

/// Per-codegen mutable state.
pub struct GenState<'a, 'b> {
    /// The output sink.
    pub buf: &'a mut CodeBuffer,
    /// Runtime environment: hooks, call resolution, constant pool.
    pub env: &'a mut CompileEnv<'b>,
    /// Callee-saved registers the body touched.
    pub touched: RegSet,
    /// Head of the jump-to-epilog fixup chain.
    pub epilog_fixup: CodeOffset,
    /// Head of the alloca param-area fixup chain.
    pub alloca_fixup: CodeOffset,
    /// Logical depth of the x87 register stack.
    pub fp_top: i32,
    /// Bytecode-offset marks collected during emission.
    pub marks: Vec<(CodeOffset, i64)>,
}

impl<'a, 'b> GenState<'a, 'b> {
    /// Fresh state over a buffer.
    pub fn new(buf: &'a mut CodeBuffer, env: &'a mut CompileEnv<'b>) -> GenState<'a, 'b> {
        GenState {
            buf,
            env,
            touched: RegSet::empty(),
            epilog_fixup: 0,
            alloca_fixup: 0,
            fp_top: 0,
            marks: Vec::new(),
        }
    }

    /// Note that a register was used (callee-saved tracking).
    pub fn touch(&mut self, reg: u8) {
        self.touched.add(reg);
    }
}

// ---- value storage -------------------------------------------------------

/// The operand width of a GPR holding a value of this kind.
pub fn gpr_width(kind: TypeKind) -> u8 {
    match kind {
        TypeKind::Long | TypeKind::ULong | TypeKind::NInt | TypeKind::NUInt
        | TypeKind::Ptr | TypeKind::Signature => 8,
        _ => 4,
    }
}

/// The in-memory size of a value slot for this kind.
fn slot_size(body: &FunctionBody, ty: &Type) -> u32 {
    ty.size(body.ptr_width).max(1)
}

/// Assign a stable frame slot to `value` if it does not have one yet.
pub fn fix_value(body: &mut FunctionBody, value: Value) {
    body.pin_to_frame(value);
}

/// Load an integer-kind value into a GPR.
pub fn load_gpr(gen: &mut GenState, body: &mut FunctionBody, value: Value, reg: u8) {
    let data = &body.values[value];
    let kind = data.ty.normalize(PtrWidth::P64).kind();
    if let Some(k) = &data.konst {
        let imm = match *k {
            ConstData::Int(v) => v as i64,
            ConstData::Long(v) | ConstData::NInt(v) => v,
            ConstData::Float32(v) => v.to_bits() as i64,
            ConstData::Float64(v) | ConstData::NFloat(v) => v.to_bits() as i64,
        };
        enc::mov_reg_imm(gen.buf, encoding(reg), imm, gpr_width(kind));
        return;
    }
    fix_value(body, value);
    let data = &body.values[value];
    let off = data.frame_offset;
    let e = encoding(reg);
    match data.ty.kind() {
        TypeKind::SByte => enc::movsx_reg_membase(gen.buf, e, 5, off, 1),
        TypeKind::UByte => enc::movzx_reg_membase(gen.buf, e, 5, off, 1),
        TypeKind::Short => enc::movsx_reg_membase(gen.buf, e, 5, off, 2),
        TypeKind::UShort => enc::movzx_reg_membase(gen.buf, e, 5, off, 2),
        _ => enc::mov_reg_membase(gen.buf, e, 5, off, gpr_width(kind)),
    }
}

/// Store a GPR into a value's slot at the value's natural size.
pub fn store_gpr(gen: &mut GenState, body: &mut FunctionBody, value: Value, reg: u8) {
    fix_value(body, value);
    let data = &body.values[value];
    let size = slot_size(body, &data.ty).min(8) as u8;
    let off = data.frame_offset;
    enc::mov_membase_reg(gen.buf, 5, off, encoding(reg), size);
}

/// Load a float value into an XMM register.
pub fn load_xmm(gen: &mut GenState, body: &mut FunctionBody, value: Value, xreg: u8, double: bool) {
    let data = &body.values[value];
    if let Some(k) = data.konst {
        // Materialize through a GPR; no constant pool needed for f32/f64.
        let bits = match k {
            ConstData::Float32(v) => v.to_bits() as u64 as i64,
            ConstData::Float64(v) | ConstData::NFloat(v) => v.to_bits() as i64,
            _ => k.as_int().unwrap_or(0),
        };
        let scratch = x64::RAX;
        if double {
            enc::mov_reg_imm(gen.buf, encoding(scratch), bits, 8);
            enc::movq_xreg_reg(gen.buf, encoding(xreg), encoding(scratch));
        } else {
            enc::mov_reg_imm(gen.buf, encoding(scratch), bits as u32 as i64, 4);
            enc::movd_xreg_reg(gen.buf, encoding(xreg), encoding(scratch));
        }
        return;
    }
    fix_value(body, value);
    let off = body.values[value].frame_offset;
    enc::movs_xreg_membase(gen.buf, encoding(xreg), 5, off, double);
}

/// Store an XMM register into a value's slot.
pub fn store_xmm(gen: &mut GenState, body: &mut FunctionBody, value: Value, xreg: u8, double: bool) {
    fix_value(body, value);
    let off = body.values[value].frame_offset;
    enc::movs_membase_xreg(gen.buf, 5, off, encoding(xreg), double);
}

/// Push a value onto the x87 stack.
pub fn load_fpu(gen: &mut GenState, body: &mut FunctionBody, value: Value) {
    let data = &body.values[value];
    if let Some(k) = data.konst {
        // Extended constants go through the pool; the arithmetic payload is
        // double precision, loaded and widened by the FPU.
        let bits = k.as_float().unwrap_or(0.0).to_bits();
        let addr = gen
            .env
            .consts
            .alloc(&bits.to_le_bytes(), 8)
            .unwrap_or(0);
        enc::mov_reg_imm(gen.buf, encoding(x64::SCRATCH), addr as i64, 8);
        enc::fld_membase(gen.buf, encoding(x64::SCRATCH), 0, 8);
        gen.fp_top += 1;
        return;
    }
    fix_value(body, value);
    let data = &body.values[value];
    let off = data.frame_offset;
    let size = match data.ty.kind() {
        TypeKind::Float32 => 4,
        TypeKind::Float64 => 8,
        _ => 10,
    };
    enc::fld_membase(gen.buf, 5, off, size);
    gen.fp_top += 1;
}

/// Pop the x87 top of stack into a value's slot.
pub fn store_fpu_pop(gen: &mut GenState, body: &mut FunctionBody, value: Value) {
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

// ---- x87 stack strategy --------------------------------------------------

/// Translate a logical x87 pseudo-register to a stack-relative index.
fn fp_stack_index(gen: &GenState, reg: i32) -> u8 {
    (gen.fp_top - reg - 1) as u8
}

/// Exchange a logical x87 register with the top of stack.
pub fn exch_top(gen: &mut GenState, reg: i32) {
    let idx = fp_stack_index(gen, reg);
    if idx != 0 {
        enc::fxch(gen.buf, idx);
    }
}

/// Pop the top of stack into a logical x87 register.
pub fn move_top(gen: &mut GenState, reg: i32) {
    let idx = fp_stack_index(gen, reg);
    enc::fstp_st(gen.buf, idx);
    gen.fp_top -= 1;
}

/// Store the top of stack into a logical x87 register without popping.
pub fn spill_top(gen: &mut GenState, reg: i32) {
    let idx = fp_stack_index(gen, reg);
    enc::fst_st(gen.buf, idx);
}

// ---- address materialization --------------------------------------------

/// Load the address of a value's frame slot into a GPR.
pub fn load_address(gen: &mut GenState, body: &mut FunctionBody, value: Value, reg: u8) {
    fix_value(body, value);
    let off = body.values[value].frame_offset;
    enc::lea_reg_membase(gen.buf, encoding(reg), 5, off);
}

// ---- branches ------------------------------------------------------------

/// Emit a branch to `label` using the given condition (`None` for an
/// unconditional jump). Backward branches to started blocks use the short
/// form when in range; forward branches emit a long-form placeholder linked
/// into the target block's relative fixup chain.
pub fn output_branch(
    gen: &mut GenState,
    body: &mut FunctionBody,
    cond: Option<u8>,
    label: crate::ir::Label,
) -> CodegenResult<()> {
    let block = body
        .block_of_label(label)
        .ok_or(CodegenError::UndefinedLabel(label.0))?;
    if let Some(address) = body.blocks[block].address {
        // Backward branch: the target offset is known.
        let short_len: i64 = 2;
        let rel8 = address as i64 - (gen.buf.offset() as i64 + short_len);
        if enc::is_imm8(rel8) {
            match cond {
                Some(cc) => enc::jcc_short(gen.buf, cc, rel8 as i8),
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
        // Forward branch: placeholder threaded into the fixup chain.
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

/// Start a block: bind its address and resolve pending fixups.
pub fn start_block(gen: &mut GenState, body: &mut FunctionBody, block: crate::ir::Block) {
    let address = gen.buf.offset();
    body.blocks[block].address = Some(address);
    let rel = body.blocks[block].fixup_rel;
    if rel != 0 {
        gen.buf.patch_rel_chain(rel, address);
        body.blocks[block].fixup_rel = 0;
    }
    let abs = body.blocks[block].fixup_abs;
    if abs != 0 {
        let target = gen.buf.address_of(address) as u64;
        gen.buf.patch_abs_chain(abs, target);
        body.blocks[block].fixup_abs = 0;
    }
}

/// Jump to the function's epilog through the shared fixup chain. Falls
/// through when `block` is the final block in layout order.
pub fn jump_to_epilog(gen: &mut GenState, body: &FunctionBody, block: crate::ir::Block) {
    if body.block_order.last() == Some(&block) {
        return;
    }
    gen.buf.put1(0xE9);
    let mut head = gen.epilog_fixup;
    gen.buf.emit_rel_fixup(&mut head);
    gen.epilog_fixup = head;
}

// ---- calls ---------------------------------------------------------------

/// Call an absolute address, using the rel32 form when it is in range.
pub fn call_code(gen: &mut GenState, target: usize) {
    let rel = target as i64 - (gen.buf.current_address() as i64 + 5);
    if enc::is_imm32(rel) {
        enc::call_rel32(gen.buf, rel as i32);
    } else {
        enc::mov_reg_imm(gen.buf, encoding(x64::SCRATCH), target as i64, 8);
        enc::call_reg(gen.buf, encoding(x64::SCRATCH));
    }
}

/// Jump to an absolute address, using the rel32 form when it is in range.
pub fn jump_to_code(gen: &mut GenState, target: usize) {
    let rel = target as i64 - (gen.buf.current_address() as i64 + 5);
    if enc::is_imm32(rel) {
        gen.buf.put1(0xE9);
        gen.buf.put4(rel as i32 as u32);
    } else {
        enc::mov_reg_imm(gen.buf, encoding(x64::SCRATCH), target as i64, 8);
        enc::jmp_reg(gen.buf, encoding(x64::SCRATCH));
    }
}

// ---- builtin exceptions --------------------------------------------------

/// Raise a builtin exception at this point: stash the PC into the active
/// unwind frame's `catch_pc` when a try region exists, then call the
/// runtime thrower.
pub fn throw_builtin(gen: &mut GenState, body: &mut FunctionBody, code: i32) {
    if let (Some(setjmp_value), Some(eh)) = (body.setjmp_value, body.eh) {
        fix_value(body, setjmp_value);
        let off = body.values[setjmp_value].frame_offset;
        let scratch = encoding(x64::SCRATCH);
        enc::lea_reg_rip(gen.buf, scratch, 0);
        enc::mov_membase_reg(gen.buf, 5, off + eh.catch_pc_offset as i32, scratch, 8);
    }
    enc::mov_reg_imm(gen.buf, encoding(x64::RDI), code as i64, 4);
    let thrower = gen.env.hooks.exception_builtin;
    call_code(gen, thrower);
}

/// Emit a null test on a GPR followed by a builtin throw when it is zero.
pub fn check_gpr_not_null(gen: &mut GenState, body: &mut FunctionBody, reg: u8, code: i32) {
    check_gpr_not_null_sized(gen, body, reg, 8, code);
}

fn check_gpr_not_null_sized(
    gen: &mut GenState,
    body: &mut FunctionBody,
    reg: u8,
    size: u8,
    code: i32,
) {
    enc::test_reg_reg(gen.buf, encoding(reg), encoding(reg), size);
    let skip = forward_jcc(gen, enc::CC_NE);
    throw_builtin(gen, body, code);
    patch_forward_jcc(gen, skip);
}

// ---- prologue / epilogue -------------------------------------------------

fn saved_regs(touched: &RegSet) -> Vec<u8> {
    let mut regs = Vec::new();
    for reg in 0..14u8 {
        if touched.contains(reg) && REG_INFO[reg as usize].callee_saved {
            regs.push(reg);
        }
    }
    regs
}

/// The final rounded frame size: locals + register save area + outgoing
/// argument area, 16-byte aligned.
pub fn total_frame_size(body: &FunctionBody, touched: &RegSet) -> u32 {
    let mut frame = (body.frame_size + 7) & !7;
    frame += (saved_regs(touched).len() as u32) * 8;
    frame += body.param_area_size;
    (frame + 15) & !15
}

/// Assemble the prologue into a scratch buffer and copy it right-aligned
/// into the reserved slot so the entry address is the slot tail minus the
/// prologue length. Returns the entry offset.
pub fn emit_prolog(gen: &mut GenState, body: &FunctionBody) -> CodeOffset {
    let mut scratch = [0u8; PROLOG_SIZE];
    let len = {
        let mut pbuf = unsafe { CodeBuffer::new(scratch.as_mut_ptr(), PROLOG_SIZE) };
        enc::push_reg(&mut pbuf, encoding(x64::RBP));
        enc::mov_reg_reg(&mut pbuf, encoding(x64::RBP), encoding(x64::RSP), 8);
        let frame = total_frame_size(body, &gen.touched);
        if frame > 0 {
            enc::alu_reg_imm(&mut pbuf, enc::Alu::Sub, encoding(x64::RSP), frame as i32, 8);
        }
        // Save the callee-saved registers above the outgoing argument area.
        let mut offset = body.param_area_size as i32;
        for reg in saved_regs(&gen.touched) {
            enc::mov_membase_reg(&mut pbuf, encoding(x64::RSP), offset, encoding(reg), 8);
            offset += 8;
        }
        debug_assert!(!pbuf.overflowed());
        pbuf.offset() as usize
    };
    let entry = PROLOG_SIZE - len;
    gen.buf.copy_in(entry as CodeOffset, &scratch[..len]);
    entry as CodeOffset
}

/// Emit the epilogue: resolve the epilog and alloca fixup chains, restore
/// callee-saved registers, restore the stack frame and return.
pub fn emit_epilog(gen: &mut GenState, body: &FunctionBody) {
    let here = gen.buf.offset();
    if gen.epilog_fixup != 0 {
        gen.buf.patch_rel_chain(gen.epilog_fixup, here);
        gen.epilog_fixup = 0;
    }
    if gen.alloca_fixup != 0 {
        gen.buf
            .patch_rel_chain_value(gen.alloca_fixup, body.param_area_size);
        gen.alloca_fixup = 0;
    }
    // Restore through rbp so the epilog is immune to runtime rsp changes
    // (alloca).
    let frame = total_frame_size(body, &gen.touched) as i32;
    let mut offset = -frame + body.param_area_size as i32;
    for reg in saved_regs(&gen.touched) {
        enc::mov_reg_membase(gen.buf, encoding(reg), encoding(x64::RBP), offset, 8);
        offset += 8;
    }
    enc::mov_reg_reg(gen.buf, encoding(x64::RSP), encoding(x64::RBP), 8);
    enc::pop_reg(gen.buf, encoding(x64::RBP));
    enc::ret(gen.buf);
}

// ---- inline memory operations -------------------------------------------

/// Inline copy of a small block through `rax`/`xmm8`.
pub fn small_block_copy(
    gen: &mut GenState,
    dreg: u8,
    doffset: i32,
    sreg: u8,
    soffset: i32,
    mut size: u64,
    is_aligned: bool,
) {
    let scratch = encoding(x64::RAX);
    let xscratch = encoding(x64::XMM8);
    let (d, s) = (encoding(dreg), encoding(sreg));
    let mut offset = 0i32;
    while size >= 16 {
        if is_aligned {
            enc::movaps_xreg_membase(gen.buf, xscratch, s, soffset + offset);
            enc::movaps_membase_xreg(gen.buf, d, doffset + offset, xscratch);
        } else {
            enc::movups_xreg_membase(gen.buf, xscratch, s, soffset + offset);
            enc::movups_membase_xreg(gen.buf, d, doffset + offset, xscratch);
        }
        size -= 16;
        offset += 16;
    }
    let mut chunk = 8u64;
    while chunk > 0 {
        if size >= chunk {
            enc::mov_reg_membase(gen.buf, scratch, s, soffset + offset, chunk as u8);
            enc::mov_membase_reg(gen.buf, d, doffset + offset, scratch, chunk as u8);
            size -= chunk;
            offset += chunk as i32;
        }
        chunk /= 2;
    }
}

/// Inline fill of a small block with a splatted byte.
pub fn small_block_set(
    gen: &mut GenState,
    dreg: u8,
    doffset: i32,
    value: u8,
    mut size: u64,
    is_aligned: bool,
) {
    let scratch = encoding(x64::RAX);
    let xscratch = encoding(x64::XMM8);
    let d = encoding(dreg);
    let mut splat = value as u64;
    splat |= splat << 8;
    splat |= splat << 16;
    splat |= splat << 32;
    if value == 0 {
        enc::clear_reg(gen.buf, scratch);
    } else {
        enc::mov_reg_imm(gen.buf, scratch, splat as i64, 8);
    }
    let mut offset = 0i32;
    if size >= 16 {
        if value == 0 {
            enc::xorps_xreg_xreg(gen.buf, xscratch, xscratch);
        } else {
            enc::movq_xreg_reg(gen.buf, xscratch, scratch);
            enc::movlhps(gen.buf, xscratch, xscratch);
        }
        while size >= 16 {
            if is_aligned {
                enc::movaps_membase_xreg(gen.buf, d, doffset + offset, xscratch);
            } else {
                enc::movups_membase_xreg(gen.buf, d, doffset + offset, xscratch);
            }
            size -= 16;
            offset += 16;
        }
    }
    let mut chunk = 8u64;
    while chunk > 0 {
        while size >= chunk {
            enc::mov_membase_reg(gen.buf, d, doffset + offset, scratch, chunk as u8);
            size -= chunk;
            offset += chunk as i32;
        }
        chunk /= 2;
    }
}

// ---- entry classification ------------------------------------------------

/// Populate the entry block with incoming-parameter instructions for the
/// System V convention.
pub fn create_entry_insns(body: &mut FunctionBody) -> CodegenResult<()> {
    let sig = body.signature.clone();
    let mut state = PassingState::new();

    // A memory-class return consumes the first integer register as the
    // hidden destination pointer.
    if classify_return(&sig.ret).is_memory() {
        let v = body.create_value(Type::Ptr);
        body.values[v].flags.insert(ValueFlags::PARAMETER);
        let mut p = ParamDesc::new(Some(v));
        classify_param(&mut state, &mut p, &Type::Ptr);
        emit_incoming(body, &p, v)?;
        body.struct_return = Some(v);
    }

    for i in 0..sig.params.len() {
        let ty = sig.params[i].clone();
        let v = body.create_value(ty.clone());
        body.values[v].flags.insert(ValueFlags::PARAMETER);
        let mut p = ParamDesc::new(Some(v));
        classify_param(&mut state, &mut p, &ty);
        emit_incoming(body, &p, v)?;
        body.params.push(v);
    }
    Ok(())
}

fn emit_incoming(body: &mut FunctionBody, param: &ParamDesc, value: Value) -> CodegenResult<()> {
    match param.arg_class {
        ArgClass::Reg(n) => {
            body.values[value].flags.insert(ValueFlags::REG_PARAMETER);
            for part in 0..n {
                let reg = param.regs[part as usize].reg;
                let reg_const = body.const_nint(Type::NInt, reg as i64);
                let part_const = body.const_nint(Type::NInt, part as i64);
                let mut insn = InstData::new(Opcode::IncomingReg);
                insn.dest = Slot::Value(value);
                insn.value1 = Slot::Value(reg_const);
                insn.value2 = Slot::Value(part_const);
                body.add_insn(insn);
            }
        }
        ArgClass::Stack => {
            // The argument already lives in the caller's frame: saved rbp
            // and the return address sit between rbp and the first slot.
            let data = &mut body.values[value];
            data.frame_offset = 16 + param.offset as i32;
            data.flags.insert(ValueFlags::HAS_FRAME_OFFSET);
        }
    }
    Ok(())
}

/// The return location for the body's own signature.
pub fn own_return_location(body: &FunctionBody) -> RetLoc {
    classify_return(&body.signature.ret)
}

/// Store the code needed to receive `loc` into `value` after a call.
pub fn receive_return(
    gen: &mut GenState,
    body: &mut FunctionBody,
    value: Value,
    loc: RetLoc,
) {
    match loc {
        RetLoc::Void | RetLoc::Memory => {}
        RetLoc::Gpr(reg) => store_gpr(gen, body, value, reg),
        RetLoc::GprPair(lo, hi) => {
            fix_value(body, value);
            let off = body.values[value].frame_offset;
            enc::mov_membase_reg(gen.buf, 5, off, encoding(lo), 8);
            enc::mov_membase_reg(gen.buf, 5, off + 8, encoding(hi), 8);
        }
        RetLoc::Xmm(reg) => {
            let double = !matches!(body.values[value].ty.kind(), TypeKind::Float32);
            store_xmm(gen, body, value, reg, double);
        }
        RetLoc::XmmPair(lo, hi) => {
            fix_value(body, value);
            let off = body.values[value].frame_offset;
            enc::movs_membase_xreg(gen.buf, 5, off, encoding(lo), true);
            enc::movs_membase_xreg(gen.buf, 5, off + 8, encoding(hi), true);
        }
        RetLoc::GprXmm(g, x) => {
            fix_value(body, value);
            let off = body.values[value].frame_offset;
            enc::mov_membase_reg(gen.buf, 5, off, encoding(g), 8);
            enc::movs_membase_xreg(gen.buf, 5, off + 8, encoding(x), true);
        }
        RetLoc::XmmGpr(x, g) => {
            fix_value(body, value);
            let off = body.values[value].frame_offset;
            enc::movs_membase_xreg(gen.buf, 5, off, encoding(x), true);
            enc::mov_membase_reg(gen.buf, 5, off + 8, encoding(g), 8);
        }
        RetLoc::X87 => {
            gen.fp_top += 1;
            store_fpu_pop(gen, body, value);
        }
    }
}

/// Load our own return value into `loc` before jumping to the epilog.
pub fn emit_return_in(gen: &mut GenState, body: &mut FunctionBody, value: Value, loc: RetLoc) {
    match loc {
        RetLoc::Void | RetLoc::Memory => {}
        RetLoc::Gpr(reg) => load_gpr(gen, body, value, reg),
        RetLoc::GprPair(lo, hi) => {
            fix_value(body, value);
            let off = body.values[value].frame_offset;
            enc::mov_reg_membase(gen.buf, encoding(lo), 5, off, 8);
            enc::mov_reg_membase(gen.buf, encoding(hi), 5, off + 8, 8);
        }
        RetLoc::Xmm(reg) => {
            let double = !matches!(body.values[value].ty.kind(), TypeKind::Float32);
            load_xmm(gen, body, value, reg, double);
        }
        RetLoc::XmmPair(lo, hi) => {
            fix_value(body, value);
            let off = body.values[value].frame_offset;
            enc::movs_xreg_membase(gen.buf, encoding(lo), 5, off, true);
            enc::movs_xreg_membase(gen.buf, encoding(hi), 5, off + 8, true);
        }
        RetLoc::GprXmm(g, x) => {
            fix_value(body, value);
            let off = body.values[value].frame_offset;
            enc::mov_reg_membase(gen.buf, encoding(g), 5, off, 8);
            enc::movs_xreg_membase(gen.buf, encoding(x), 5, off + 8, true);
        }
        RetLoc::XmmGpr(x, g) => {
            fix_value(body, value);
            let off = body.values[value].frame_offset;
            enc::movs_xreg_membase(gen.buf, encoding(x), 5, off, true);
            enc::mov_reg_membase(gen.buf, encoding(g), 5, off + 8, 8);
        }
        RetLoc::X87 => {
            load_fpu(gen, body, value);
            gen.fp_top -= 1; // leaves the value in ST0 for the caller
        }
    }
}

/// Raise `DIVISION_BY_ZERO`/`ARITHMETIC` checks and perform a signed or
/// unsigned division. Inputs in rax (dividend) and rcx (divisor); quotient
/// lands in rax, remainder in rdx.
pub fn emit_div_checks(
    gen: &mut GenState,
    body: &mut FunctionBody,
    size: u8,
    signed: bool,
) {
    // Divisor of zero faults.
    check_gpr_not_null_sized(gen, body, x64::RCX, size, builtin::DIVISION_BY_ZERO);
    if signed {
        // INT_MIN / -1 overflows the quotient.
        let min = if size == 8 { i64::MIN } else { i32::MIN as i64 };
        enc::alu_reg_imm(gen.buf, enc::Alu::Cmp, encoding(x64::RCX), -1, size);
        let skip1 = forward_jcc(gen, enc::CC_NE);
        if size == 8 {
            enc::mov_reg_imm(gen.buf, encoding(x64::SCRATCH), min, 8);
            enc::alu_reg_reg(gen.buf, enc::Alu::Cmp, encoding(x64::RAX), encoding(x64::SCRATCH), 8);
        } else {
            enc::alu_reg_imm(gen.buf, enc::Alu::Cmp, encoding(x64::RAX), min as i32, 4);
        }
        let skip2 = forward_jcc(gen, enc::CC_NE);
        throw_builtin(gen, body, builtin::ARITHMETIC);
        patch_forward_jcc(gen, skip1);
        patch_forward_jcc(gen, skip2);
        enc::cdq(gen.buf, size);
        enc::idiv_reg(gen.buf, encoding(x64::RCX), size);
    } else {
        enc::clear_reg(gen.buf, encoding(x64::RDX));
        enc::div_reg(gen.buf, encoding(x64::RCX), size);
    }
}

/// Emit a long-form conditional jump with a zero displacement and return
/// the offset of its displacement field for later patching.
pub fn forward_jcc(gen: &mut GenState, cc: u8) -> CodeOffset {
    gen.buf.put1(0x0F);
    gen.buf.put1(0x80 + cc);
    let at = gen.buf.offset();
    gen.buf.put4(0);
    at
}

/// Point a previously emitted forward jump at the current position.
pub fn patch_forward_jcc(gen: &mut GenState, disp_at: CodeOffset) {
    let rel = gen.buf.offset() - (disp_at + 4);
    gen.buf.patch_u32_at(disp_at, rel);
}
