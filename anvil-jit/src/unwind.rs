//! The unwind chain: a thread-local stack of frames that exceptions
//! restore.
//!
//! Each frame records the stack pointer, frame pointer and resume address
//! of a capture point, plus a `catch_pc` slot that call sites inside a
//! `try` region stash their location into. The capture side is always
//! emitted machine code (the try-init block of a JIT'd function, or the
//! apply stub's blocker); the restore side is [`exception_throw`], which
//! re-enters the top capture point with a nonzero flag in the return
//! register.
//!
//! The chain is per-thread and needs no locking.

use core::cell::Cell;

use anvil_codegen::ir::body::EhRuntime;

/// One frame of the unwind chain.
///
/// The first three words are the capture buffer and their offsets are baked
/// into emitted code; `catch_pc` sits at [`CATCH_PC_OFFSET`].
#[repr(C)]
pub struct UnwindFrame {
    /// Saved stack pointer.
    pub sp: usize,
    /// Saved frame pointer.
    pub fp: usize,
    /// Resume address.
    pub pc: usize,
    /// Backtrace cookie, reserved for stack walkers.
    pub trace: usize,
    /// PC of the active call site inside a try region, or zero.
    pub catch_pc: usize,
    /// Next older frame.
    pub parent: *mut UnwindFrame,
}

/// Size of an [`UnwindFrame`] in bytes.
pub const FRAME_SIZE: u32 = core::mem::size_of::<UnwindFrame>() as u32;

/// Required alignment of an [`UnwindFrame`].
pub const FRAME_ALIGN: u32 = 16;

/// Byte offset of the `catch_pc` field.
pub const CATCH_PC_OFFSET: i64 = 32;

thread_local! {
    static UNWIND_HEAD: Cell<*mut UnwindFrame> = const { Cell::new(core::ptr::null_mut()) };
    static LAST_EXCEPTION: Cell<*mut u8> = const { Cell::new(core::ptr::null_mut()) };
}

/// Link `frame` at the head of this thread's chain.
pub extern "C" fn unwind_push_frame(frame: *mut UnwindFrame) {
    UNWIND_HEAD.with(|head| {
        unsafe {
            (*frame).catch_pc = 0;
            (*frame).parent = head.get();
        }
        head.set(frame);
    });
}

/// Unlink the top frame.
pub extern "C" fn unwind_pop_frame() {
    UNWIND_HEAD.with(|head| {
        let top = head.get();
        if !top.is_null() {
            head.set(unsafe { (*top).parent });
        }
    });
}

/// The top of this thread's chain.
pub fn current_frame() -> *mut UnwindFrame {
    UNWIND_HEAD.with(|head| head.get())
}

/// The most recently thrown exception object on this thread.
pub extern "C" fn exception_get_last() -> *mut u8 {
    LAST_EXCEPTION.with(|e| e.get())
}

/// Record `obj` as the most recently thrown exception.
pub fn set_last_exception(obj: *mut u8) {
    LAST_EXCEPTION.with(|e| e.set(obj));
}

/// Forget the most recently thrown exception.
pub fn clear_last_exception() {
    LAST_EXCEPTION.with(|e| e.set(core::ptr::null_mut()));
}

/// Throw `obj`: record it and restore the top capture point.
///
/// The frame is deliberately *not* unlinked here; the capture point's
/// dispatch code pops it (or rethrows through [`unwind_pop_and_rethrow`]),
/// mirroring how a `setjmp` handler owns its own cleanup.
pub extern "C" fn exception_throw(obj: *mut u8) -> ! {
    set_last_exception(obj);
    let frame = current_frame();
    if frame.is_null() {
        // Nothing established a capture point on this thread; treat it as
        // a fatal error rather than corrupting the stack.
        panic!("JIT exception thrown with no unwind frame on this thread");
    }
    unsafe { restore_frame(frame) }
}

/// Unlink the top frame, then rethrow the current exception to the next.
pub extern "C" fn unwind_pop_and_rethrow() -> ! {
    unwind_pop_frame();
    exception_throw(exception_get_last())
}

#[cfg(target_arch = "x86_64")]
unsafe fn restore_frame(frame: *mut UnwindFrame) -> ! {
    // Re-enter the capture point: flag register nonzero, stack and frame
    // pointers as captured, and jump to the saved resume address.
    core::arch::asm!(
        "mov rbp, [{f} + 8]",
        "mov rsp, [{f}]",
        "mov eax, 1",
        "jmp qword ptr [{f} + 16]",
        f = in(reg) frame,
        options(noreturn),
    );
}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn restore_frame(_frame: *mut UnwindFrame) -> ! {
    unreachable!("the unwinder only supports x86-64 hosts");
}

/// The wiring handed to the instruction builder for try regions.
pub fn eh_runtime() -> EhRuntime {
    EhRuntime {
        frame_size: FRAME_SIZE,
        frame_align: FRAME_ALIGN,
        catch_pc_offset: CATCH_PC_OFFSET,
        push_frame: unwind_push_frame as usize,
        pop_frame: unwind_pop_frame as usize,
        pop_and_rethrow: unwind_pop_and_rethrow as usize,
        throw_exception: exception_throw as usize,
        get_last_exception: exception_get_last as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_matches_emitted_offsets() {
        assert_eq!(core::mem::offset_of!(UnwindFrame, sp), 0);
        assert_eq!(core::mem::offset_of!(UnwindFrame, fp), 8);
        assert_eq!(core::mem::offset_of!(UnwindFrame, pc), 16);
        assert_eq!(
            core::mem::offset_of!(UnwindFrame, catch_pc) as i64,
            CATCH_PC_OFFSET
        );
        assert_eq!(FRAME_SIZE, 48);
    }

    #[test]
    fn push_pop_chain() {
        let mut a = UnwindFrame {
            sp: 0,
            fp: 0,
            pc: 0,
            trace: 0,
            catch_pc: 0,
            parent: core::ptr::null_mut(),
        };
        let mut b = UnwindFrame {
            sp: 0,
            fp: 0,
            pc: 0,
            trace: 0,
            catch_pc: 0,
            parent: core::ptr::null_mut(),
        };
        unwind_push_frame(&mut a);
        unwind_push_frame(&mut b);
        assert_eq!(current_frame(), &mut b as *mut _);
        unwind_pop_frame();
        assert_eq!(current_frame(), &mut a as *mut _);
        unwind_pop_frame();
        assert!(current_frame().is_null());
    }
}
