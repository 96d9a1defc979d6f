//! The pseudo-register file.
//!
//! The rules engine sees a flat file of pseudo-registers partitioned into
//! classes: general purpose, XMM, and the x87 stack. The x87 class is not a
//! free list: operands must be brought to the top of the stack before use,
//! so those registers carry the `IN_STACK` property and are driven by a
//! dedicated stack strategy in the emitters rather than a general assigner.
//!
//! Pseudo-register numbers are not hardware encodings; `RegInfo::cpu_reg`
//! holds the encoding for the instruction emitters.

/// The class a pseudo-register belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegClass {
    /// General purpose integer registers.
    Gpr,
    /// SSE registers.
    Xmm,
    /// x87 stack registers, `IN_STACK` semantics.
    FpStack,
}

/// Static description of one pseudo-register.
#[derive(Clone, Copy, Debug)]
pub struct RegInfo {
    /// Display name.
    pub name: &'static str,
    /// Hardware encoding used by the instruction emitters.
    pub cpu_reg: u8,
    /// Register class.
    pub class: RegClass,
    /// Preserved across calls by the callee.
    pub callee_saved: bool,
}

/// A small set of pseudo-registers, used to track which callee-saved
/// registers a function touched.
#[derive(Clone, Copy, Default)]
pub struct RegSet(u64);

impl RegSet {
    /// The empty set.
    pub fn empty() -> RegSet {
        RegSet(0)
    }

    /// Add a register to the set.
    pub fn add(&mut self, reg: u8) {
        self.0 |= 1 << reg;
    }

    /// Test membership.
    pub fn contains(&self, reg: u8) -> bool {
        self.0 & (1 << reg) != 0
    }
}

/// x86-64 pseudo-register numbering and tables.
pub mod x64 {
    use super::{RegClass, RegInfo};

    // Pseudo numbers. The order matches `REG_INFO` below.
    pub const RAX: u8 = 0;
    pub const RCX: u8 = 1;
    pub const RDX: u8 = 2;
    pub const RBX: u8 = 3;
    pub const RSI: u8 = 4;
    pub const RDI: u8 = 5;
    pub const R8: u8 = 6;
    pub const R9: u8 = 7;
    pub const R10: u8 = 8;
    pub const R11: u8 = 9;
    pub const R12: u8 = 10;
    pub const R13: u8 = 11;
    pub const R14: u8 = 12;
    pub const R15: u8 = 13;
    pub const RBP: u8 = 14;
    pub const RSP: u8 = 15;
    pub const XMM0: u8 = 16;
    pub const XMM1: u8 = 17;
    pub const XMM2: u8 = 18;
    pub const XMM3: u8 = 19;
    pub const XMM4: u8 = 20;
    pub const XMM5: u8 = 21;
    pub const XMM6: u8 = 22;
    pub const XMM7: u8 = 23;
    pub const XMM8: u8 = 24;
    pub const XMM9: u8 = 25;
    pub const XMM10: u8 = 26;
    pub const XMM11: u8 = 27;
    pub const XMM12: u8 = 28;
    pub const XMM13: u8 = 29;
    pub const XMM14: u8 = 30;
    pub const XMM15: u8 = 31;
    pub const ST0: u8 = 32;
    pub const ST7: u8 = 39;

    /// Is this pseudo-register a general purpose register?
    pub fn is_gpr(reg: u8) -> bool {
        reg & !0x0f == 0
    }

    /// Is this pseudo-register an XMM register?
    pub fn is_xmm(reg: u8) -> bool {
        reg & !0x0f == 0x10
    }

    /// Is this pseudo-register an x87 stack register?
    pub fn is_fp_stack(reg: u8) -> bool {
        reg & !0x0f == 0x20
    }

    /// Hardware encoding of a pseudo-register.
    pub fn encoding(reg: u8) -> u8 {
        REG_INFO[reg as usize].cpu_reg
    }

    /// The scratch register used for indirect calls and exception PC
    /// stashing. Must be caller-saved and never used for arguments.
    pub const SCRATCH: u8 = R11;

    /// Static register descriptions, indexed by pseudo number.
    pub static REG_INFO: [RegInfo; 40] = [
        RegInfo { name: "rax", cpu_reg: 0, class: RegClass::Gpr, callee_saved: false },
        RegInfo { name: "rcx", cpu_reg: 1, class: RegClass::Gpr, callee_saved: false },
        RegInfo { name: "rdx", cpu_reg: 2, class: RegClass::Gpr, callee_saved: false },
        RegInfo { name: "rbx", cpu_reg: 3, class: RegClass::Gpr, callee_saved: true },
        RegInfo { name: "rsi", cpu_reg: 6, class: RegClass::Gpr, callee_saved: false },
        RegInfo { name: "rdi", cpu_reg: 7, class: RegClass::Gpr, callee_saved: false },
        RegInfo { name: "r8", cpu_reg: 8, class: RegClass::Gpr, callee_saved: false },
        RegInfo { name: "r9", cpu_reg: 9, class: RegClass::Gpr, callee_saved: false },
        RegInfo { name: "r10", cpu_reg: 10, class: RegClass::Gpr, callee_saved: false },
        RegInfo { name: "r11", cpu_reg: 11, class: RegClass::Gpr, callee_saved: false },
        RegInfo { name: "r12", cpu_reg: 12, class: RegClass::Gpr, callee_saved: true },
        RegInfo { name: "r13", cpu_reg: 13, class: RegClass::Gpr, callee_saved: true },
        RegInfo { name: "r14", cpu_reg: 14, class: RegClass::Gpr, callee_saved: true },
        RegInfo { name: "r15", cpu_reg: 15, class: RegClass::Gpr, callee_saved: true },
        RegInfo { name: "rbp", cpu_reg: 5, class: RegClass::Gpr, callee_saved: true },
        RegInfo { name: "rsp", cpu_reg: 4, class: RegClass::Gpr, callee_saved: true },
        RegInfo { name: "xmm0", cpu_reg: 0, class: RegClass::Xmm, callee_saved: false },
        RegInfo { name: "xmm1", cpu_reg: 1, class: RegClass::Xmm, callee_saved: false },
        RegInfo { name: "xmm2", cpu_reg: 2, class: RegClass::Xmm, callee_saved: false },
        RegInfo { name: "xmm3", cpu_reg: 3, class: RegClass::Xmm, callee_saved: false },
        RegInfo { name: "xmm4", cpu_reg: 4, class: RegClass::Xmm, callee_saved: false },
        RegInfo { name: "xmm5", cpu_reg: 5, class: RegClass::Xmm, callee_saved: false },
        RegInfo { name: "xmm6", cpu_reg: 6, class: RegClass::Xmm, callee_saved: false },
        RegInfo { name: "xmm7", cpu_reg: 7, class: RegClass::Xmm, callee_saved: false },
        RegInfo { name: "xmm8", cpu_reg: 8, class: RegClass::Xmm, callee_saved: false },
        RegInfo { name: "xmm9", cpu_reg: 9, class: RegClass::Xmm, callee_saved: false },
        RegInfo { name: "xmm10", cpu_reg: 10, class: RegClass::Xmm, callee_saved: false },
        RegInfo { name: "xmm11", cpu_reg: 11, class: RegClass::Xmm, callee_saved: false },
        RegInfo { name: "xmm12", cpu_reg: 12, class: RegClass::Xmm, callee_saved: false },
        RegInfo { name: "xmm13", cpu_reg: 13, class: RegClass::Xmm, callee_saved: false },
        RegInfo { name: "xmm14", cpu_reg: 14, class: RegClass::Xmm, callee_saved: false },
        RegInfo { name: "xmm15", cpu_reg: 15, class: RegClass::Xmm, callee_saved: false },
        RegInfo { name: "st0", cpu_reg: 0, class: RegClass::FpStack, callee_saved: false },
        RegInfo { name: "st1", cpu_reg: 1, class: RegClass::FpStack, callee_saved: false },
        RegInfo { name: "st2", cpu_reg: 2, class: RegClass::FpStack, callee_saved: false },
        RegInfo { name: "st3", cpu_reg: 3, class: RegClass::FpStack, callee_saved: false },
        RegInfo { name: "st4", cpu_reg: 4, class: RegClass::FpStack, callee_saved: false },
        RegInfo { name: "st5", cpu_reg: 5, class: RegClass::FpStack, callee_saved: false },
        RegInfo { name: "st6", cpu_reg: 6, class: RegClass::FpStack, callee_saved: false },
        RegInfo { name: "st7", cpu_reg: 7, class: RegClass::FpStack, callee_saved: false },
    ];

    /// Integer argument registers in System V order.
    pub static WORD_ARG_REGS: [u8; 6] = [RDI, RSI, RDX, RCX, R8, R9];

    /// SSE argument registers in System V order.
    pub static FLOAT_ARG_REGS: [u8; 8] = [XMM0, XMM1, XMM2, XMM3, XMM4, XMM5, XMM6, XMM7];

    /// Integer return registers.
    pub static WORD_RETURN_REGS: [u8; 2] = [RAX, RDX];

    /// SSE return registers.
    pub static SSE_RETURN_REGS: [u8; 2] = [XMM0, XMM1];
}

/// x86 (32-bit) pseudo-register numbering and tables.
pub mod x86 {
    use super::{RegClass, RegInfo};

    pub const EAX: u8 = 0;
    pub const ECX: u8 = 1;
    pub const EDX: u8 = 2;
    pub const EBX: u8 = 3;
    pub const ESI: u8 = 4;
    pub const EDI: u8 = 5;
    pub const EBP: u8 = 6;
    pub const ESP: u8 = 7;
    pub const ST0: u8 = 8;

    /// Is this pseudo-register a general purpose register?
    pub fn is_gpr(reg: u8) -> bool {
        reg < 8
    }

    /// Is this pseudo-register an x87 stack register?
    pub fn is_fp_stack(reg: u8) -> bool {
        (8..16).contains(&reg)
    }

    /// Hardware encoding of a pseudo-register.
    pub fn encoding(reg: u8) -> u8 {
        REG_INFO[reg as usize].cpu_reg
    }

    /// Static register descriptions, indexed by pseudo number.
    pub static REG_INFO: [RegInfo; 16] = [
        RegInfo { name: "eax", cpu_reg: 0, class: RegClass::Gpr, callee_saved: false },
        RegInfo { name: "ecx", cpu_reg: 1, class: RegClass::Gpr, callee_saved: false },
        RegInfo { name: "edx", cpu_reg: 2, class: RegClass::Gpr, callee_saved: false },
        RegInfo { name: "ebx", cpu_reg: 3, class: RegClass::Gpr, callee_saved: true },
        RegInfo { name: "esi", cpu_reg: 6, class: RegClass::Gpr, callee_saved: true },
        RegInfo { name: "edi", cpu_reg: 7, class: RegClass::Gpr, callee_saved: true },
        RegInfo { name: "ebp", cpu_reg: 5, class: RegClass::Gpr, callee_saved: true },
        RegInfo { name: "esp", cpu_reg: 4, class: RegClass::Gpr, callee_saved: true },
        RegInfo { name: "st0", cpu_reg: 0, class: RegClass::FpStack, callee_saved: false },
        RegInfo { name: "st1", cpu_reg: 1, class: RegClass::FpStack, callee_saved: false },
        RegInfo { name: "st2", cpu_reg: 2, class: RegClass::FpStack, callee_saved: false },
        RegInfo { name: "st3", cpu_reg: 3, class: RegClass::FpStack, callee_saved: false },
        RegInfo { name: "st4", cpu_reg: 4, class: RegClass::FpStack, callee_saved: false },
        RegInfo { name: "st5", cpu_reg: 5, class: RegClass::FpStack, callee_saved: false },
        RegInfo { name: "st6", cpu_reg: 6, class: RegClass::FpStack, callee_saved: false },
        RegInfo { name: "st7", cpu_reg: 7, class: RegClass::FpStack, callee_saved: false },
    ];

    /// `fastcall` argument registers.
    pub static FASTCALL_ARG_REGS: [u8; 2] = [ECX, EDX];
}
