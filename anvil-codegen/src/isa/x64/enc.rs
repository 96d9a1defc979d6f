//! x86-64 instruction encoding primitives.
//!
//! Everything here takes hardware register encodings (0..15), not
//! pseudo-register numbers. Helpers that accept a `size` take it in bytes
//! (1, 2, 4 or 8) and emit the operand-size prefix, REX.W bit and opcode
//! width bit accordingly.

use crate::binemit::CodeBuffer;

/// Encode the ModR/M byte.
#[inline]
pub fn modrm(m0d: u8, reg: u8, rm: u8) -> u8 {
    debug_assert!(m0d < 4);
    ((m0d & 3) << 6) | ((reg & 7) << 3) | (rm & 7)
}

/// Encode the SIB byte (scale-index-base).
#[inline]
pub fn sib(scale: u8, index: u8, base: u8) -> u8 {
    debug_assert!(scale < 4);
    ((scale & 3) << 6) | ((index & 7) << 3) | (base & 7)
}

/// Does this displacement fit in a sign-extended byte?
#[inline]
pub fn is_imm8(v: i64) -> bool {
    (-128..=127).contains(&v)
}

/// Does this value fit in a sign-extended 32-bit immediate?
#[inline]
pub fn is_imm32(v: i64) -> bool {
    v == (v as i32) as i64
}

/// Emit a REX prefix. `w` selects 64-bit operands; `r`, `x`, `b` extend the
/// reg, index and rm fields. Nothing is emitted when no bit is needed and
/// `force` is clear.
#[inline]
fn rex(buf: &mut CodeBuffer, w: bool, r: u8, x: u8, b: u8, force: bool) {
    let byte = 0x40u8
        | ((w as u8) << 3)
        | (((r >> 3) & 1) << 2)
        | (((x >> 3) & 1) << 1)
        | ((b >> 3) & 1);
    if byte != 0x40 || force {
        buf.put1(byte);
    }
}

fn size_prefix(buf: &mut CodeBuffer, size: u8, reg: u8, index: u8, base: u8) {
    if size == 2 {
        buf.put1(0x66);
    }
    rex(buf, size == 8, reg, index, base, false);
}

/// Emit ModR/M (+SIB) addressing a `[base + disp]` memory operand.
/// `reg` is the register field. Handles the rbp/r13 and rsp/r12 encodings.
pub fn membase(buf: &mut CodeBuffer, reg: u8, base: u8, disp: i32) {
    let base_low = base & 7;
    let need_disp8 = disp == 0 && base_low == 5; // rbp/r13 need an explicit disp
    if disp == 0 && !need_disp8 {
        buf.put1(modrm(0, reg, base_low));
        if base_low == 4 {
            buf.put1(sib(0, 4, base_low));
        }
    } else if is_imm8(disp as i64) {
        buf.put1(modrm(1, reg, base_low));
        if base_low == 4 {
            buf.put1(sib(0, 4, base_low));
        }
        buf.put1(disp as u8);
    } else {
        buf.put1(modrm(2, reg, base_low));
        if base_low == 4 {
            buf.put1(sib(0, 4, base_low));
        }
        buf.put4(disp as u32);
    }
}

/// Emit ModR/M + SIB addressing `[base + index*scale + disp]`.
pub fn memindex(buf: &mut CodeBuffer, reg: u8, base: u8, index: u8, scale: u8, disp: i32) {
    debug_assert!(index & 7 != 4, "rsp cannot be an index");
    let base_low = base & 7;
    let force_disp8 = disp == 0 && base_low == 5;
    if disp == 0 && !force_disp8 {
        buf.put1(modrm(0, reg, 4));
        buf.put1(sib(scale, index & 7, base_low));
    } else if is_imm8(disp as i64) {
        buf.put1(modrm(1, reg, 4));
        buf.put1(sib(scale, index & 7, base_low));
        buf.put1(disp as u8);
    } else {
        buf.put1(modrm(2, reg, 4));
        buf.put1(sib(scale, index & 7, base_low));
        buf.put4(disp as u32);
    }
}

/// Emit ModR/M for a RIP-relative operand with a 32-bit displacement.
pub fn memrip(buf: &mut CodeBuffer, reg: u8, disp: i32) {
    buf.put1(modrm(0, reg, 5));
    buf.put4(disp as u32);
}

// ---- moves ---------------------------------------------------------------

/// `mov reg, imm` sized; uses the shortest form that preserves the value.
pub fn mov_reg_imm(buf: &mut CodeBuffer, reg: u8, imm: i64, size: u8) {
    match size {
        8 => {
            if imm == (imm as u32) as i64 {
                // 32-bit move zero-extends.
                rex(buf, false, 0, 0, reg, false);
                buf.put1(0xB8 + (reg & 7));
                buf.put4(imm as u32);
            } else if is_imm32(imm) {
                rex(buf, true, 0, 0, reg, false);
                buf.put1(0xC7);
                buf.put1(modrm(3, 0, reg));
                buf.put4(imm as u32);
            } else {
                rex(buf, true, 0, 0, reg, false);
                buf.put1(0xB8 + (reg & 7));
                buf.put8(imm as u64);
            }
        }
        _ => {
            size_prefix(buf, size, 0, 0, reg);
            match size {
                1 => {
                    buf.put1(0xB0 + (reg & 7));
                    buf.put1(imm as u8);
                }
                2 => {
                    buf.put1(0xB8 + (reg & 7));
                    buf.put2(imm as u16);
                }
                _ => {
                    buf.put1(0xB8 + (reg & 7));
                    buf.put4(imm as u32);
                }
            }
        }
    }
}

/// `mov dreg, sreg` sized.
pub fn mov_reg_reg(buf: &mut CodeBuffer, dreg: u8, sreg: u8, size: u8) {
    size_prefix(buf, size, sreg, 0, dreg);
    buf.put1(if size == 1 { 0x88 } else { 0x89 });
    buf.put1(modrm(3, sreg, dreg));
}

/// `mov reg, [base + disp]` sized.
pub fn mov_reg_membase(buf: &mut CodeBuffer, reg: u8, base: u8, disp: i32, size: u8) {
    size_prefix(buf, size, reg, 0, base);
    buf.put1(if size == 1 { 0x8A } else { 0x8B });
    membase(buf, reg, base, disp);
}

/// `mov [base + disp], reg` sized.
pub fn mov_membase_reg(buf: &mut CodeBuffer, base: u8, disp: i32, reg: u8, size: u8) {
    size_prefix(buf, size, reg, 0, base);
    buf.put1(if size == 1 { 0x88 } else { 0x89 });
    membase(buf, reg, base, disp);
}

/// `mov [base + index*scale + disp], reg` sized.
pub fn mov_memindex_reg(
    buf: &mut CodeBuffer,
    base: u8,
    index: u8,
    scale: u8,
    disp: i32,
    reg: u8,
    size: u8,
) {
    if size == 2 {
        buf.put1(0x66);
    }
    rex(buf, size == 8, reg, index, base, false);
    buf.put1(if size == 1 { 0x88 } else { 0x89 });
    memindex(buf, reg, base, index, scale, disp);
}

/// Sign-extending load: `movsx reg, <size> [base + disp]`.
pub fn movsx_reg_membase(buf: &mut CodeBuffer, reg: u8, base: u8, disp: i32, from_size: u8) {
    rex(buf, true, reg, 0, base, false);
    match from_size {
        1 => {
            buf.put1(0x0F);
            buf.put1(0xBE);
        }
        2 => {
            buf.put1(0x0F);
            buf.put1(0xBF);
        }
        4 => buf.put1(0x63), // movsxd
        _ => unreachable!("movsx from size {from_size}"),
    }
    membase(buf, reg, base, disp);
}

/// Zero-extending load: `movzx reg, <size> [base + disp]`.
pub fn movzx_reg_membase(buf: &mut CodeBuffer, reg: u8, base: u8, disp: i32, from_size: u8) {
    rex(buf, false, reg, 0, base, false);
    match from_size {
        1 => {
            buf.put1(0x0F);
            buf.put1(0xB6);
        }
        2 => {
            buf.put1(0x0F);
            buf.put1(0xB7);
        }
        // A plain 32-bit load zero-extends.
        _ => unreachable!("movzx from size {from_size}"),
    }
    membase(buf, reg, base, disp);
}

/// `movzx dreg, sreg8`.
pub fn movzx_reg_reg8(buf: &mut CodeBuffer, dreg: u8, sreg: u8) {
    rex(buf, false, dreg, 0, sreg, false);
    buf.put1(0x0F);
    buf.put1(0xB6);
    buf.put1(modrm(3, dreg, sreg));
}

/// Sign-extend: `movsx dreg, sreg` from 1/2/4 bytes to 8.
pub fn movsx_reg_reg(buf: &mut CodeBuffer, dreg: u8, sreg: u8, from_size: u8) {
    rex(buf, true, dreg, 0, sreg, false);
    match from_size {
        1 => {
            buf.put1(0x0F);
            buf.put1(0xBE);
        }
        2 => {
            buf.put1(0x0F);
            buf.put1(0xBF);
        }
        4 => buf.put1(0x63),
        _ => unreachable!(),
    }
    buf.put1(modrm(3, dreg, sreg));
}

/// `lea reg, [base + disp]` (64-bit).
pub fn lea_reg_membase(buf: &mut CodeBuffer, reg: u8, base: u8, disp: i32) {
    rex(buf, true, reg, 0, base, false);
    buf.put1(0x8D);
    membase(buf, reg, base, disp);
}

/// `lea reg, [rip + disp]` (64-bit).
pub fn lea_reg_rip(buf: &mut CodeBuffer, reg: u8, disp: i32) {
    rex(buf, true, reg, 0, 0, false);
    buf.put1(0x8D);
    memrip(buf, reg, disp);
}

// ---- integer ALU ---------------------------------------------------------

/// ALU operation selectors: the /r column of the 0x01-style opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Alu {
    Add = 0,
    Or = 1,
    Adc = 2,
    Sbb = 3,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

/// `op dreg, sreg` sized.
pub fn alu_reg_reg(buf: &mut CodeBuffer, op: Alu, dreg: u8, sreg: u8, size: u8) {
    size_prefix(buf, size, sreg, 0, dreg);
    let base = (op as u8) << 3;
    buf.put1(base + if size == 1 { 0x00 } else { 0x01 });
    buf.put1(modrm(3, sreg, dreg));
}

/// `op reg, [base + disp]` sized.
pub fn alu_reg_membase(buf: &mut CodeBuffer, op: Alu, reg: u8, base: u8, disp: i32, size: u8) {
    size_prefix(buf, size, reg, 0, base);
    let opbase = (op as u8) << 3;
    buf.put1(opbase + if size == 1 { 0x02 } else { 0x03 });
    membase(buf, reg, base, disp);
}

/// `op reg, imm` sized.
pub fn alu_reg_imm(buf: &mut CodeBuffer, op: Alu, reg: u8, imm: i32, size: u8) {
    size_prefix(buf, size, 0, 0, reg);
    if size == 1 {
        buf.put1(0x80);
        buf.put1(modrm(3, op as u8, reg));
        buf.put1(imm as u8);
    } else if is_imm8(imm as i64) {
        buf.put1(0x83);
        buf.put1(modrm(3, op as u8, reg));
        buf.put1(imm as u8);
    } else {
        buf.put1(0x81);
        buf.put1(modrm(3, op as u8, reg));
        if size == 2 {
            buf.put2(imm as u16);
        } else {
            buf.put4(imm as u32);
        }
    }
}

/// `test reg, reg` sized.
pub fn test_reg_reg(buf: &mut CodeBuffer, reg1: u8, reg2: u8, size: u8) {
    size_prefix(buf, size, reg2, 0, reg1);
    buf.put1(if size == 1 { 0x84 } else { 0x85 });
    buf.put1(modrm(3, reg2, reg1));
}

/// `imul dreg, sreg` sized (2/4/8).
pub fn imul_reg_reg(buf: &mut CodeBuffer, dreg: u8, sreg: u8, size: u8) {
    size_prefix(buf, size, dreg, 0, sreg);
    buf.put1(0x0F);
    buf.put1(0xAF);
    buf.put1(modrm(3, dreg, sreg));
}

/// `neg reg` sized.
pub fn neg_reg(buf: &mut CodeBuffer, reg: u8, size: u8) {
    size_prefix(buf, size, 0, 0, reg);
    buf.put1(if size == 1 { 0xF6 } else { 0xF7 });
    buf.put1(modrm(3, 3, reg));
}

/// `not reg` sized.
pub fn not_reg(buf: &mut CodeBuffer, reg: u8, size: u8) {
    size_prefix(buf, size, 0, 0, reg);
    buf.put1(if size == 1 { 0xF6 } else { 0xF7 });
    buf.put1(modrm(3, 2, reg));
}

/// `cdq` / `cqo`: sign-extend rax into rdx.
pub fn cdq(buf: &mut CodeBuffer, size: u8) {
    if size == 8 {
        rex(buf, true, 0, 0, 0, false);
    }
    buf.put1(0x99);
}

/// `idiv reg` (signed) sized.
pub fn idiv_reg(buf: &mut CodeBuffer, reg: u8, size: u8) {
    size_prefix(buf, size, 0, 0, reg);
    buf.put1(0xF7);
    buf.put1(modrm(3, 7, reg));
}

/// `div reg` (unsigned) sized.
pub fn div_reg(buf: &mut CodeBuffer, reg: u8, size: u8) {
    size_prefix(buf, size, 0, 0, reg);
    buf.put1(0xF7);
    buf.put1(modrm(3, 6, reg));
}

/// `mul reg` (unsigned widening multiply into rdx:rax) sized.
pub fn mul_reg(buf: &mut CodeBuffer, reg: u8, size: u8) {
    size_prefix(buf, size, 0, 0, reg);
    buf.put1(0xF7);
    buf.put1(modrm(3, 4, reg));
}

/// Shift group selectors.
#[derive(Clone, Copy, Debug)]
pub enum Shift {
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

/// `shift reg, cl` sized.
pub fn shift_reg_cl(buf: &mut CodeBuffer, op: Shift, reg: u8, size: u8) {
    size_prefix(buf, size, 0, 0, reg);
    buf.put1(0xD3);
    buf.put1(modrm(3, op as u8, reg));
}

/// `shift reg, imm8` sized.
pub fn shift_reg_imm(buf: &mut CodeBuffer, op: Shift, reg: u8, imm: u8, size: u8) {
    size_prefix(buf, size, 0, 0, reg);
    if imm == 1 {
        buf.put1(0xD1);
        buf.put1(modrm(3, op as u8, reg));
    } else {
        buf.put1(0xC1);
        buf.put1(modrm(3, op as u8, reg));
        buf.put1(imm);
    }
}

/// `xor reg, reg` as the canonical register clear (32-bit form).
pub fn clear_reg(buf: &mut CodeBuffer, reg: u8) {
    rex(buf, false, reg, 0, reg, false);
    buf.put1(0x31);
    buf.put1(modrm(3, reg, reg));
}

// ---- stack, calls, returns ----------------------------------------------

/// `push reg` (64-bit).
pub fn push_reg(buf: &mut CodeBuffer, reg: u8) {
    rex(buf, false, 0, 0, reg, false);
    buf.put1(0x50 + (reg & 7));
}

/// `pop reg` (64-bit).
pub fn pop_reg(buf: &mut CodeBuffer, reg: u8) {
    rex(buf, false, 0, 0, reg, false);
    buf.put1(0x58 + (reg & 7));
}

/// `call reg`.
pub fn call_reg(buf: &mut CodeBuffer, reg: u8) {
    rex(buf, false, 0, 0, reg, false);
    buf.put1(0xFF);
    buf.put1(modrm(3, 2, reg));
}

/// `call rel32` with the displacement as given.
pub fn call_rel32(buf: &mut CodeBuffer, rel: i32) {
    buf.put1(0xE8);
    buf.put4(rel as u32);
}

/// `jmp reg`.
pub fn jmp_reg(buf: &mut CodeBuffer, reg: u8) {
    rex(buf, false, 0, 0, reg, false);
    buf.put1(0xFF);
    buf.put1(modrm(3, 4, reg));
}

/// `jmp [base + disp]`.
pub fn jmp_membase(buf: &mut CodeBuffer, base: u8, disp: i32) {
    rex(buf, false, 0, 0, base, false);
    buf.put1(0xFF);
    membase(buf, 4, base, disp);
}

/// `jmp [rip + disp]`.
pub fn jmp_riprel(buf: &mut CodeBuffer, disp: i32) {
    buf.put1(0xFF);
    memrip(buf, 4, disp);
}

/// `ret`.
pub fn ret(buf: &mut CodeBuffer) {
    buf.put1(0xC3);
}

/// `ret imm16` (callee-pop conventions).
pub fn ret_imm16(buf: &mut CodeBuffer, imm: u16) {
    buf.put1(0xC2);
    buf.put2(imm);
}

/// `setcc reg8`. `cond` is the low nibble of the 0x90-series opcode.
pub fn setcc_reg(buf: &mut CodeBuffer, cond: u8, reg: u8) {
    rex(buf, false, 0, 0, reg, reg >= 4);
    buf.put1(0x0F);
    buf.put1(0x90 + cond);
    buf.put1(modrm(3, 0, reg));
}

// Condition codes for `setcc` and `jcc`.
pub const CC_O: u8 = 0x0;
pub const CC_B: u8 = 0x2;
pub const CC_AE: u8 = 0x3;
pub const CC_E: u8 = 0x4;
pub const CC_NE: u8 = 0x5;
pub const CC_BE: u8 = 0x6;
pub const CC_A: u8 = 0x7;
pub const CC_P: u8 = 0xA;
pub const CC_NP: u8 = 0xB;
pub const CC_L: u8 = 0xC;
pub const CC_GE: u8 = 0xD;
pub const CC_LE: u8 = 0xE;
pub const CC_G: u8 = 0xF;

/// Short conditional jump with an 8-bit displacement.
pub fn jcc_short(buf: &mut CodeBuffer, cond: u8, disp: i8) {
    buf.put1(0x70 + cond);
    buf.put1(disp as u8);
}

// ---- SSE -----------------------------------------------------------------

fn sse_prefix(buf: &mut CodeBuffer, prefix: u8, reg: u8, base: u8) {
    if prefix != 0 {
        buf.put1(prefix);
    }
    rex(buf, false, reg, 0, base, false);
    buf.put1(0x0F);
}

/// `movss`/`movsd` xmm <- [base + disp].
pub fn movs_xreg_membase(buf: &mut CodeBuffer, xreg: u8, base: u8, disp: i32, double: bool) {
    sse_prefix(buf, if double { 0xF2 } else { 0xF3 }, xreg, base);
    buf.put1(0x10);
    membase(buf, xreg, base, disp);
}

/// `movss`/`movsd` [base + disp] <- xmm.
pub fn movs_membase_xreg(buf: &mut CodeBuffer, base: u8, disp: i32, xreg: u8, double: bool) {
    sse_prefix(buf, if double { 0xF2 } else { 0xF3 }, xreg, base);
    buf.put1(0x11);
    membase(buf, xreg, base, disp);
}

/// `movaps` xmm <- [base + disp].
pub fn movaps_xreg_membase(buf: &mut CodeBuffer, xreg: u8, base: u8, disp: i32) {
    sse_prefix(buf, 0, xreg, base);
    buf.put1(0x28);
    membase(buf, xreg, base, disp);
}

/// `movaps` [base + disp] <- xmm.
pub fn movaps_membase_xreg(buf: &mut CodeBuffer, base: u8, disp: i32, xreg: u8) {
    sse_prefix(buf, 0, xreg, base);
    buf.put1(0x29);
    membase(buf, xreg, base, disp);
}

/// `movups` xmm <- [base + disp].
pub fn movups_xreg_membase(buf: &mut CodeBuffer, xreg: u8, base: u8, disp: i32) {
    sse_prefix(buf, 0, xreg, base);
    buf.put1(0x10);
    membase(buf, xreg, base, disp);
}

/// `movups` [base + disp] <- xmm.
pub fn movups_membase_xreg(buf: &mut CodeBuffer, base: u8, disp: i32, xreg: u8) {
    sse_prefix(buf, 0, xreg, base);
    buf.put1(0x11);
    membase(buf, xreg, base, disp);
}

/// Scalar SSE arithmetic: add/sub/mul/div/sqrt selectors.
#[derive(Clone, Copy, Debug)]
pub enum SseOp {
    Add = 0x58,
    Mul = 0x59,
    Sub = 0x5C,
    Div = 0x5E,
    Sqrt = 0x51,
}

/// `<op>ss`/`<op>sd` dxmm, sxmm.
pub fn sse_op_xreg_xreg(buf: &mut CodeBuffer, op: SseOp, dxreg: u8, sxreg: u8, double: bool) {
    sse_prefix(buf, if double { 0xF2 } else { 0xF3 }, dxreg, sxreg);
    buf.put1(op as u8);
    buf.put1(modrm(3, dxreg, sxreg));
}

/// `ucomiss`/`ucomisd` xmm1, xmm2.
pub fn ucomis_xreg_xreg(buf: &mut CodeBuffer, xreg1: u8, xreg2: u8, double: bool) {
    if double {
        buf.put1(0x66);
    }
    rex(buf, false, xreg1, 0, xreg2, false);
    buf.put1(0x0F);
    buf.put1(0x2E);
    buf.put1(modrm(3, xreg1, xreg2));
}

/// `xorps` dxmm, sxmm (used to flip the sign with a mask or to clear).
pub fn xorps_xreg_xreg(buf: &mut CodeBuffer, dxreg: u8, sxreg: u8) {
    sse_prefix(buf, 0, dxreg, sxreg);
    buf.put1(0x57);
    buf.put1(modrm(3, dxreg, sxreg));
}

/// `movlhps` dxmm, sxmm.
pub fn movlhps(buf: &mut CodeBuffer, dxreg: u8, sxreg: u8) {
    sse_prefix(buf, 0, dxreg, sxreg);
    buf.put1(0x16);
    buf.put1(modrm(3, dxreg, sxreg));
}

/// `movq` xmm <- gpr (66 REX.W 0F 6E).
pub fn movq_xreg_reg(buf: &mut CodeBuffer, xreg: u8, reg: u8) {
    buf.put1(0x66);
    rex(buf, true, xreg, 0, reg, false);
    buf.put1(0x0F);
    buf.put1(0x6E);
    buf.put1(modrm(3, xreg, reg));
}

/// `movq` gpr <- xmm (66 REX.W 0F 7E).
pub fn movq_reg_xreg(buf: &mut CodeBuffer, reg: u8, xreg: u8) {
    buf.put1(0x66);
    rex(buf, true, xreg, 0, reg, false);
    buf.put1(0x0F);
    buf.put1(0x7E);
    buf.put1(modrm(3, xreg, reg));
}

/// `movd` xmm <- gpr (32-bit).
pub fn movd_xreg_reg(buf: &mut CodeBuffer, xreg: u8, reg: u8) {
    buf.put1(0x66);
    rex(buf, false, xreg, 0, reg, false);
    buf.put1(0x0F);
    buf.put1(0x6E);
    buf.put1(modrm(3, xreg, reg));
}

/// `movd` gpr <- xmm (32-bit).
pub fn movd_reg_xreg(buf: &mut CodeBuffer, reg: u8, xreg: u8) {
    buf.put1(0x66);
    rex(buf, false, xreg, 0, reg, false);
    buf.put1(0x0F);
    buf.put1(0x7E);
    buf.put1(modrm(3, xreg, reg));
}

/// `cvtsi2ss`/`cvtsi2sd` xmm <- gpr, from 32 or 64-bit source.
pub fn cvtsi2s_xreg_reg(buf: &mut CodeBuffer, xreg: u8, reg: u8, double: bool, src64: bool) {
    buf.put1(if double { 0xF2 } else { 0xF3 });
    rex(buf, src64, xreg, 0, reg, false);
    buf.put1(0x0F);
    buf.put1(0x2A);
    buf.put1(modrm(3, xreg, reg));
}

/// `cvttss2si`/`cvttsd2si` gpr <- xmm, to 32 or 64-bit destination.
pub fn cvtts2si_reg_xreg(buf: &mut CodeBuffer, reg: u8, xreg: u8, double: bool, dst64: bool) {
    buf.put1(if double { 0xF2 } else { 0xF3 });
    rex(buf, dst64, reg, 0, xreg, false);
    buf.put1(0x0F);
    buf.put1(0x2C);
    buf.put1(modrm(3, reg, xreg));
}

/// `cvtss2sd` / `cvtsd2ss` dxmm <- sxmm.
pub fn cvts2s_xreg_xreg(buf: &mut CodeBuffer, dxreg: u8, sxreg: u8, from_double: bool) {
    sse_prefix(buf, if from_double { 0xF2 } else { 0xF3 }, dxreg, sxreg);
    buf.put1(0x5A);
    buf.put1(modrm(3, dxreg, sxreg));
}

// ---- x87 -----------------------------------------------------------------

/// `fld` from memory: 4, 8 or 10 byte operand.
pub fn fld_membase(buf: &mut CodeBuffer, base: u8, disp: i32, size: u8) {
    rex(buf, false, 0, 0, base, false);
    match size {
        4 => {
            buf.put1(0xD9);
            membase(buf, 0, base, disp);
        }
        8 => {
            buf.put1(0xDD);
            membase(buf, 0, base, disp);
        }
        _ => {
            buf.put1(0xDB);
            membase(buf, 5, base, disp);
        }
    }
}

/// `fstp` to memory: 4, 8 or 10 byte operand.
pub fn fstp_membase(buf: &mut CodeBuffer, base: u8, disp: i32, size: u8) {
    rex(buf, false, 0, 0, base, false);
    match size {
        4 => {
            buf.put1(0xD9);
            membase(buf, 3, base, disp);
        }
        8 => {
            buf.put1(0xDD);
            membase(buf, 3, base, disp);
        }
        _ => {
            buf.put1(0xDB);
            membase(buf, 7, base, disp);
        }
    }
}

/// `fxch st(i)`.
pub fn fxch(buf: &mut CodeBuffer, i: u8) {
    buf.put1(0xD9);
    buf.put1(0xC8 + i);
}

/// `fstp st(i)`.
pub fn fstp_st(buf: &mut CodeBuffer, i: u8) {
    buf.put1(0xDD);
    buf.put1(0xD8 + i);
}

/// `fst st(i)`.
pub fn fst_st(buf: &mut CodeBuffer, i: u8) {
    buf.put1(0xDD);
    buf.put1(0xD0 + i);
}

/// `fucomip st(0), st(i)` - compare and pop, flags in EFLAGS.
pub fn fucomip(buf: &mut CodeBuffer, i: u8) {
    buf.put1(0xDF);
    buf.put1(0xE8 + i);
}

/// x87 arithmetic with pop: `faddp`/`fsubp`/`fmulp`/`fdivp` st(1), st(0).
#[derive(Clone, Copy, Debug)]
pub enum FpOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Emit the pop form computing `st(1) <- st(1) op st(0)`.
pub fn fp_op_p(buf: &mut CodeBuffer, op: FpOp) {
    buf.put1(0xDE);
    buf.put1(match op {
        FpOp::Add => 0xC1,
        FpOp::Mul => 0xC9,
        // The reversed-operand forms keep left-to-right evaluation order.
        FpOp::Sub => 0xE9,
        FpOp::Div => 0xF9,
    });
}

/// `fchs` - negate st(0).
pub fn fchs(buf: &mut CodeBuffer) {
    buf.put1(0xD9);
    buf.put1(0xE0);
}

/// `fsqrt` - square root of st(0).
pub fn fsqrt(buf: &mut CodeBuffer) {
    buf.put1(0xD9);
    buf.put1(0xFA);
}

/// `fild` - integer load, 4 or 8 byte operand.
pub fn fild_membase(buf: &mut CodeBuffer, base: u8, disp: i32, size: u8) {
    rex(buf, false, 0, 0, base, false);
    if size == 8 {
        buf.put1(0xDF);
        membase(buf, 5, base, disp);
    } else {
        buf.put1(0xDB);
        membase(buf, 0, base, disp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(f: impl FnOnce(&mut CodeBuffer)) -> Vec<u8> {
        let mut storage = vec![0u8; 64];
        let len = {
            let mut buf = unsafe { CodeBuffer::new(storage.as_mut_ptr(), storage.len()) };
            f(&mut buf);
            assert!(!buf.overflowed());
            buf.offset() as usize
        };
        storage.truncate(len);
        storage
    }

    #[test]
    fn mov_encodings() {
        // mov rax, rcx
        assert_eq!(emit(|b| mov_reg_reg(b, 0, 1, 8)), vec![0x48, 0x89, 0xC8]);
        // mov eax, 1
        assert_eq!(
            emit(|b| mov_reg_imm(b, 0, 1, 4)),
            vec![0xB8, 1, 0, 0, 0]
        );
        // mov r8, imm64
        assert_eq!(
            emit(|b| mov_reg_imm(b, 8, 0x1122334455667788, 8)),
            vec![0x49, 0xB8, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
        // mov rax, [rbp - 8]
        assert_eq!(
            emit(|b| mov_reg_membase(b, 0, 5, -8, 8)),
            vec![0x48, 0x8B, 0x45, 0xF8]
        );
        // mov [rsp + 16], rdi: needs a SIB byte.
        assert_eq!(
            emit(|b| mov_membase_reg(b, 4, 16, 7, 8)),
            vec![0x48, 0x89, 0x7C, 0x24, 0x10]
        );
    }

    #[test]
    fn alu_encodings() {
        // add rax, rcx
        assert_eq!(
            emit(|b| alu_reg_reg(b, Alu::Add, 0, 1, 8)),
            vec![0x48, 0x01, 0xC8]
        );
        // sub rsp, 0x28 (imm8 form)
        assert_eq!(
            emit(|b| alu_reg_imm(b, Alu::Sub, 4, 0x28, 8)),
            vec![0x48, 0x83, 0xEC, 0x28]
        );
        // cmp eax, 1000 (imm32 form)
        assert_eq!(
            emit(|b| alu_reg_imm(b, Alu::Cmp, 0, 1000, 4)),
            vec![0x81, 0xF8, 0xE8, 0x03, 0, 0]
        );
    }

    #[test]
    fn stack_and_flow() {
        assert_eq!(emit(|b| push_reg(b, 5)), vec![0x55]); // push rbp
        assert_eq!(emit(|b| push_reg(b, 13)), vec![0x41, 0x55]); // push r13
        assert_eq!(emit(|b| ret(b)), vec![0xC3]);
        assert_eq!(emit(|b| ret_imm16(b, 12)), vec![0xC2, 0x0C, 0x00]);
        // call r11
        assert_eq!(emit(|b| call_reg(b, 11)), vec![0x41, 0xFF, 0xD3]);
        // jmp [rip + 2]
        assert_eq!(
            emit(|b| jmp_riprel(b, 2)),
            vec![0xFF, 0x25, 0x02, 0, 0, 0]
        );
    }

    #[test]
    fn sse_encodings() {
        // movsd xmm0, [rbp - 16]
        assert_eq!(
            emit(|b| movs_xreg_membase(b, 0, 5, -16, true)),
            vec![0xF2, 0x0F, 0x10, 0x45, 0xF0]
        );
        // addsd xmm0, xmm1
        assert_eq!(
            emit(|b| sse_op_xreg_xreg(b, SseOp::Add, 0, 1, true)),
            vec![0xF2, 0x0F, 0x58, 0xC1]
        );
        // ucomisd xmm0, xmm1
        assert_eq!(
            emit(|b| ucomis_xreg_xreg(b, 0, 1, true)),
            vec![0x66, 0x0F, 0x2E, 0xC1]
        );
        // cvtsi2sd xmm0, rax
        assert_eq!(
            emit(|b| cvtsi2s_xreg_reg(b, 0, 0, true, true)),
            vec![0xF2, 0x48, 0x0F, 0x2A, 0xC0]
        );
    }

    #[test]
    fn x87_encodings() {
        // fld tbyte [rbp - 32]
        assert_eq!(
            emit(|b| fld_membase(b, 5, -32, 10)),
            vec![0xDB, 0x6D, 0xE0]
        );
        // fstp qword [rbp - 8]
        assert_eq!(
            emit(|b| fstp_membase(b, 5, -8, 8)),
            vec![0xDD, 0x5D, 0xF8]
        );
        assert_eq!(emit(|b| fxch(b, 1)), vec![0xD9, 0xC9]);
        assert_eq!(emit(|b| fucomip(b, 1)), vec![0xDF, 0xE9]);
    }
}
