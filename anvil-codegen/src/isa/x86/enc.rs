//! 32-bit x86 instruction encoding primitives.
//!
//! No REX machinery here: eight general registers, hardware encodings
//! straight from the manual. Helpers that take a `size` accept 1, 2 or 4.

use crate::binemit::CodeBuffer;
use crate::isa::x64::enc::{is_imm8, modrm, sib};

pub use crate::isa::x64::enc::{
    Alu, Shift, CC_A, CC_AE, CC_B, CC_BE, CC_E, CC_G, CC_GE, CC_L, CC_LE, CC_NE, CC_NP, CC_O,
    CC_P,
};

/// Emit ModR/M (+SIB) addressing a `[base + disp]` memory operand.
pub fn membase(buf: &mut CodeBuffer, reg: u8, base: u8, disp: i32) {
    let need_disp8 = disp == 0 && base == 5;
    if disp == 0 && !need_disp8 {
        buf.put1(modrm(0, reg, base));
        if base == 4 {
            buf.put1(sib(0, 4, base));
        }
    } else if is_imm8(disp as i64) {
        buf.put1(modrm(1, reg, base));
        if base == 4 {
            buf.put1(sib(0, 4, base));
        }
        buf.put1(disp as u8);
    } else {
        buf.put1(modrm(2, reg, base));
        if base == 4 {
            buf.put1(sib(0, 4, base));
        }
        buf.put4(disp as u32);
    }
}

fn size_prefix(buf: &mut CodeBuffer, size: u8) {
    if size == 2 {
        buf.put1(0x66);
    }
}

/// `mov reg, imm` sized.
pub fn mov_reg_imm(buf: &mut CodeBuffer, reg: u8, imm: i32, size: u8) {
    size_prefix(buf, size);
    match size {
        1 => {
            buf.put1(0xB0 + reg);
            buf.put1(imm as u8);
        }
        2 => {
            buf.put1(0xB8 + reg);
            buf.put2(imm as u16);
        }
        _ => {
            buf.put1(0xB8 + reg);
            buf.put4(imm as u32);
        }
    }
}

/// `mov dreg, sreg` sized.
pub fn mov_reg_reg(buf: &mut CodeBuffer, dreg: u8, sreg: u8, size: u8) {
    size_prefix(buf, size);
    buf.put1(if size == 1 { 0x88 } else { 0x89 });
    buf.put1(modrm(3, sreg, dreg));
}

/// `mov reg, [base + disp]` sized.
pub fn mov_reg_membase(buf: &mut CodeBuffer, reg: u8, base: u8, disp: i32, size: u8) {
    size_prefix(buf, size);
    buf.put1(if size == 1 { 0x8A } else { 0x8B });
    membase(buf, reg, base, disp);
}

/// `mov [base + disp], reg` sized.
pub fn mov_membase_reg(buf: &mut CodeBuffer, base: u8, disp: i32, reg: u8, size: u8) {
    size_prefix(buf, size);
    buf.put1(if size == 1 { 0x88 } else { 0x89 });
    membase(buf, reg, base, disp);
}

/// Sign-extending load from a 1 or 2 byte operand.
pub fn movsx_reg_membase(buf: &mut CodeBuffer, reg: u8, base: u8, disp: i32, from_size: u8) {
    buf.put1(0x0F);
    buf.put1(if from_size == 1 { 0xBE } else { 0xBF });
    membase(buf, reg, base, disp);
}

/// Zero-extending load from a 1 or 2 byte operand.
pub fn movzx_reg_membase(buf: &mut CodeBuffer, reg: u8, base: u8, disp: i32, from_size: u8) {
    buf.put1(0x0F);
    buf.put1(if from_size == 1 { 0xB6 } else { 0xB7 });
    membase(buf, reg, base, disp);
}

/// `movzx dreg, sreg8`.
pub fn movzx_reg_reg8(buf: &mut CodeBuffer, dreg: u8, sreg: u8) {
    buf.put1(0x0F);
    buf.put1(0xB6);
    buf.put1(modrm(3, dreg, sreg));
}

/// `lea reg, [base + disp]`.
pub fn lea_reg_membase(buf: &mut CodeBuffer, reg: u8, base: u8, disp: i32) {
    buf.put1(0x8D);
    membase(buf, reg, base, disp);
}

/// `op dreg, sreg` sized.
pub fn alu_reg_reg(buf: &mut CodeBuffer, op: Alu, dreg: u8, sreg: u8, size: u8) {
    size_prefix(buf, size);
    buf.put1(((op as u8) << 3) + if size == 1 { 0x00 } else { 0x01 });
    buf.put1(modrm(3, sreg, dreg));
}

/// `op reg, imm` sized.
pub fn alu_reg_imm(buf: &mut CodeBuffer, op: Alu, reg: u8, imm: i32, size: u8) {
    size_prefix(buf, size);
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
    size_prefix(buf, size);
    buf.put1(if size == 1 { 0x84 } else { 0x85 });
    buf.put1(modrm(3, reg2, reg1));
}

/// `imul dreg, sreg`.
pub fn imul_reg_reg(buf: &mut CodeBuffer, dreg: u8, sreg: u8) {
    buf.put1(0x0F);
    buf.put1(0xAF);
    buf.put1(modrm(3, dreg, sreg));
}

/// `neg reg`.
pub fn neg_reg(buf: &mut CodeBuffer, reg: u8) {
    buf.put1(0xF7);
    buf.put1(modrm(3, 3, reg));
}

/// `not reg`.
pub fn not_reg(buf: &mut CodeBuffer, reg: u8) {
    buf.put1(0xF7);
    buf.put1(modrm(3, 2, reg));
}

/// `cdq`.
pub fn cdq(buf: &mut CodeBuffer) {
    buf.put1(0x99);
}

/// `idiv reg`.
pub fn idiv_reg(buf: &mut CodeBuffer, reg: u8) {
    buf.put1(0xF7);
    buf.put1(modrm(3, 7, reg));
}

/// `div reg`.
pub fn div_reg(buf: &mut CodeBuffer, reg: u8) {
    buf.put1(0xF7);
    buf.put1(modrm(3, 6, reg));
}

/// `shift reg, cl`.
pub fn shift_reg_cl(buf: &mut CodeBuffer, op: Shift, reg: u8) {
    buf.put1(0xD3);
    buf.put1(modrm(3, op as u8, reg));
}

/// `shift reg, imm8`.
pub fn shift_reg_imm(buf: &mut CodeBuffer, op: Shift, reg: u8, imm: u8) {
    if imm == 1 {
        buf.put1(0xD1);
        buf.put1(modrm(3, op as u8, reg));
    } else {
        buf.put1(0xC1);
        buf.put1(modrm(3, op as u8, reg));
        buf.put1(imm);
    }
}

/// `xor reg, reg` clear.
pub fn clear_reg(buf: &mut CodeBuffer, reg: u8) {
    buf.put1(0x31);
    buf.put1(modrm(3, reg, reg));
}

/// `push reg`.
pub fn push_reg(buf: &mut CodeBuffer, reg: u8) {
    buf.put1(0x50 + reg);
}

/// `push imm32`.
pub fn push_imm(buf: &mut CodeBuffer, imm: i32) {
    if is_imm8(imm as i64) {
        buf.put1(0x6A);
        buf.put1(imm as u8);
    } else {
        buf.put1(0x68);
        buf.put4(imm as u32);
    }
}

/// `push dword [base + disp]`.
pub fn push_membase(buf: &mut CodeBuffer, base: u8, disp: i32) {
    buf.put1(0xFF);
    membase(buf, 6, base, disp);
}

/// `pop reg`.
pub fn pop_reg(buf: &mut CodeBuffer, reg: u8) {
    buf.put1(0x58 + reg);
}

/// `call reg`.
pub fn call_reg(buf: &mut CodeBuffer, reg: u8) {
    buf.put1(0xFF);
    buf.put1(modrm(3, 2, reg));
}

/// `call rel32`.
pub fn call_rel32(buf: &mut CodeBuffer, rel: i32) {
    buf.put1(0xE8);
    buf.put4(rel as u32);
}

/// `jmp reg`.
pub fn jmp_reg(buf: &mut CodeBuffer, reg: u8) {
    buf.put1(0xFF);
    buf.put1(modrm(3, 4, reg));
}

/// `ret`.
pub fn ret(buf: &mut CodeBuffer) {
    buf.put1(0xC3);
}

/// `ret imm16` for the callee-pop conventions.
pub fn ret_imm16(buf: &mut CodeBuffer, imm: u16) {
    buf.put1(0xC2);
    buf.put2(imm);
}

/// `setcc reg8`.
pub fn setcc_reg(buf: &mut CodeBuffer, cond: u8, reg: u8) {
    buf.put1(0x0F);
    buf.put1(0x90 + cond);
    buf.put1(modrm(3, 0, reg));
}

/// `jmp [table + index*4]` through an absolute table address hole; returns
/// the offset of the 4-byte table-address field for fixup.
pub fn jmp_memindex_abs(buf: &mut CodeBuffer, index: u8) -> crate::binemit::CodeOffset {
    buf.put1(0xFF);
    buf.put1(modrm(0, 4, 4));
    buf.put1(sib(2, index, 5));
    let at = buf.offset();
    buf.put4(0);
    at
}

// ---- x87 (shared forms with the 64-bit encoder, minus the REX logic) ----

/// `fld` from memory: 4, 8 or 10 byte operand.
pub fn fld_membase(buf: &mut CodeBuffer, base: u8, disp: i32, size: u8) {
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

/// `fild` from a 4 or 8 byte integer.
pub fn fild_membase(buf: &mut CodeBuffer, base: u8, disp: i32, size: u8) {
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
        let mut storage = vec![0u8; 32];
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
    fn basic_encodings() {
        // mov eax, 1
        assert_eq!(emit(|b| mov_reg_imm(b, 0, 1, 4)), vec![0xB8, 1, 0, 0, 0]);
        // mov eax, [ebp + 8]
        assert_eq!(
            emit(|b| mov_reg_membase(b, 0, 5, 8, 4)),
            vec![0x8B, 0x45, 0x08]
        );
        // push ebp / pop ebp
        assert_eq!(emit(|b| push_reg(b, 5)), vec![0x55]);
        assert_eq!(emit(|b| pop_reg(b, 5)), vec![0x5D]);
        // ret 12
        assert_eq!(emit(|b| ret_imm16(b, 12)), vec![0xC2, 0x0C, 0x00]);
        // push dword [ebp - 4]
        assert_eq!(emit(|b| push_membase(b, 5, -4)), vec![0xFF, 0x75, 0xFC]);
    }

    #[test]
    fn x87_encodings() {
        // fld dword [ebp - 8]
        assert_eq!(emit(|b| fld_membase(b, 5, -8, 4)), vec![0xD9, 0x45, 0xF8]);
        // fstp tbyte [ebp - 12]
        assert_eq!(
            emit(|b| fstp_membase(b, 5, -12, 10)),
            vec![0xDB, 0x7D, 0xF4]
        );
    }
}
