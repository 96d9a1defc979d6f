//! Trampolines: redirectors, indirectors and closure stubs.
//!
//! Every function gets a trampoline pair at creation. The *redirector*
//! saves the full argument-register state, calls the on-demand driver, and
//! jumps to whatever entry address the driver returns, so the first call to
//! an unbuilt function transparently compiles it. The *indirector* is a
//! single indirect jump through the function's published entry pointer, so
//! call sites that captured an address before compilation always reach the
//! latest code. Closure stubs pack the register state into an apply buffer
//! and hand it to a native handler, giving C callers an ordinary function
//! pointer.

use anvil_codegen::binemit::CodeBuffer;
use anvil_codegen::isa::x64::enc;

/// Bytes reserved for a redirector.
pub const REDIRECTOR_SIZE: usize = 256;

/// Bytes reserved for an indirector.
pub const INDIRECTOR_SIZE: usize = 32;

/// Bytes reserved for a closure stub.
pub const CLOSURE_SIZE: usize = 192;

/// The register-state area a redirector saves: 7 GPRs and 8 XMM registers.
const REDIRECTOR_FRAME: i32 = 0xB8;

/// The stack-resident argument block handed to closure handlers, mirroring
/// the argument-register state at entry plus a pointer to the stack-passed
/// tail.
#[repr(C)]
pub struct ApplyBuffer {
    /// Pointer to the caller's stack-passed arguments.
    pub stack_args: *mut usize,
    /// rdi, rsi, rdx, rcx, r8, r9 in argument order.
    pub gp: [u64; 6],
    /// Padding keeps the XMM area 16-byte aligned.
    pub _pad: u64,
    /// xmm0..xmm7.
    pub xmm: [[u8; 16]; 8],
}

/// `extern "C" fn(user_data, buffer)` receiving closure invocations.
pub type ClosureHandler = extern "C" fn(*mut core::ffi::c_void, *mut ApplyBuffer);

/// The driver a redirector calls: `fn(cookie, saved_args) -> entry`.
pub type RedirectorDriver = extern "C" fn(*mut core::ffi::c_void, *mut u8) -> *const u8;

fn buffer_at(base: *mut u8, len: usize) -> CodeBuffer {
    unsafe { CodeBuffer::new(base, len) }
}

/// Emit a redirector at `base`. Returns its entry address.
pub fn create_redirector(
    base: *mut u8,
    driver: RedirectorDriver,
    cookie: *mut core::ffi::c_void,
) -> *const u8 {
    let mut buf = buffer_at(base, REDIRECTOR_SIZE);
    let b = &mut buf;

    // The return address is already pushed, so rsp is 8 mod 16; the frame
    // size keeps the XMM saves aligned.
    enc::alu_reg_imm(b, enc::Alu::Sub, 4, REDIRECTOR_FRAME, 8);
    enc::mov_membase_reg(b, 4, 0xB0, 0, 8); // rax (vararg SSE count)
    enc::mov_membase_reg(b, 4, 0xA8, 7, 8); // rdi
    enc::mov_membase_reg(b, 4, 0xA0, 6, 8); // rsi
    enc::mov_membase_reg(b, 4, 0x98, 2, 8); // rdx
    enc::mov_membase_reg(b, 4, 0x90, 1, 8); // rcx
    enc::mov_membase_reg(b, 4, 0x88, 8, 8); // r8
    enc::mov_membase_reg(b, 4, 0x80, 9, 8); // r9
    for i in 0..8u8 {
        enc::movaps_membase_xreg(b, 4, 0x70 - 0x10 * i as i32, i);
    }

    // Second argument: pointer to the stack-passed arguments (above the
    // frame and the return address).
    enc::lea_reg_membase(b, 6, 4, REDIRECTOR_FRAME + 8);
    // First argument: the cookie identifying the function.
    enc::mov_reg_imm(b, 7, cookie as i64, 8);
    enc::mov_reg_imm(b, 11, driver as usize as i64, 8);
    enc::call_reg(b, 11);

    // The fresh entry lands in rax; stash it while we restore.
    enc::mov_reg_reg(b, 11, 0, 8);
    enc::mov_reg_membase(b, 0, 4, 0xB0, 8);
    enc::mov_reg_membase(b, 7, 4, 0xA8, 8);
    enc::mov_reg_membase(b, 6, 4, 0xA0, 8);
    enc::mov_reg_membase(b, 2, 4, 0x98, 8);
    enc::mov_reg_membase(b, 1, 4, 0x90, 8);
    enc::mov_reg_membase(b, 8, 4, 0x88, 8);
    enc::mov_reg_membase(b, 9, 4, 0x80, 8);
    for i in 0..8u8 {
        enc::movaps_xreg_membase(b, i, 4, 0x70 - 0x10 * i as i32);
    }
    enc::alu_reg_imm(b, enc::Alu::Add, 4, REDIRECTOR_FRAME, 8);
    enc::jmp_reg(b, 11);

    debug_assert!(!buf.overflowed());
    base as *const u8
}

/// Emit an indirector at `base` chasing `entry_slot`. Returns its entry
/// address.
pub fn create_indirector(base: *mut u8, entry_slot: *const *const u8) -> *const u8 {
    let mut buf = buffer_at(base, INDIRECTOR_SIZE);
    let b = &mut buf;
    let slot = entry_slot as i64;
    let rip_after = base as i64 + 6;
    let disp = slot - rip_after;
    if disp == (disp as i32) as i64 {
        enc::jmp_riprel(b, disp as i32);
    } else {
        // The entry slot is outside rip-relative range; chase it through a
        // register instead.
        enc::mov_reg_imm(b, 11, slot, 8);
        enc::jmp_membase(b, 11, 0);
    }
    debug_assert!(!buf.overflowed());
    base as *const u8
}

/// Emit a closure stub at `base`: packs the register state into an
/// [`ApplyBuffer`] and calls `handler(user_data, &buffer)`. Returns the
/// native function pointer C code may call.
pub fn create_closure(
    base: *mut u8,
    handler: ClosureHandler,
    user_data: *mut core::ffi::c_void,
) -> *const u8 {
    let mut buf = buffer_at(base, CLOSURE_SIZE);
    let b = &mut buf;

    enc::push_reg(b, 5); // rbp
    enc::mov_reg_reg(b, 5, 4, 8);
    enc::alu_reg_imm(b, enc::Alu::Sub, 4, 192, 8);

    // Fill the apply buffer: integer registers first.
    enc::mov_membase_reg(b, 4, 0x08, 7, 8);
    enc::mov_membase_reg(b, 4, 0x10, 6, 8);
    enc::mov_membase_reg(b, 4, 0x18, 2, 8);
    enc::mov_membase_reg(b, 4, 0x20, 1, 8);
    enc::mov_membase_reg(b, 4, 0x28, 8, 8);
    enc::mov_membase_reg(b, 4, 0x30, 9, 8);
    for i in 0..8u8 {
        enc::movaps_membase_xreg(b, 4, 0x40 + 0x10 * i as i32, i);
    }
    // Stack-passed arguments start above the saved rbp and return address.
    enc::lea_reg_membase(b, 0, 5, 16);
    enc::mov_membase_reg(b, 4, 0, 0, 8);

    enc::mov_reg_imm(b, 7, user_data as i64, 8);
    enc::mov_reg_reg(b, 6, 4, 8);
    enc::mov_reg_imm(b, 11, handler as usize as i64, 8);
    enc::call_reg(b, 11);

    enc::mov_reg_reg(b, 4, 5, 8);
    enc::pop_reg(b, 5);
    enc::ret(b);

    debug_assert!(!buf.overflowed());
    base as *const u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_buffer_layout() {
        assert_eq!(core::mem::offset_of!(ApplyBuffer, stack_args), 0);
        assert_eq!(core::mem::offset_of!(ApplyBuffer, gp), 0x08);
        assert_eq!(core::mem::offset_of!(ApplyBuffer, xmm), 0x40);
        assert_eq!(core::mem::size_of::<ApplyBuffer>(), 192);
    }

    #[test]
    fn indirector_fits_reserved_slot() {
        let mut code = vec![0u8; INDIRECTOR_SIZE];
        let slot: *const u8 = core::ptr::null();
        // Whichever form is chosen (rip-relative or register-indirect), it
        // must fit the reserved slot.
        create_indirector(code.as_mut_ptr(), &slot);
        assert!(code.iter().any(|&b| b != 0));
    }
}
