//! Exception Vectors and Trap Frames
//!
//! The sixteen-slot, 2 KB-aligned ARMv8-A vector table. Four slots carry
//! real entry paths — synchronous and IRQ, from kernel mode (SP_ELx) and
//! from user mode (lower EL, AArch64). The remaining slots spin: nothing in
//! this kernel runs on SP_EL0 at EL1, takes FIQs, or executes AArch32.
//!
//! Each live slot saves a full [`TrapFrame`] onto the current kernel stack,
//! calls a high-level handler through a patchable slot, restores the frame
//! and returns via `eret`. The handler slots are installed at init time by
//! the kernel's dispatch code; until then, defaults panic with a register
//! dump so early faults are loud.

use core::sync::atomic::{AtomicPtr, Ordering};

use crate::registers::esr;

/// Register frame saved on the kernel stack at every exception entry.
///
/// System registers sit at the front so the entry stub can spill them
/// early with one `stp` each; the GPR file follows. 36 u64s, 288 bytes,
/// keeping SP 16-aligned.
///
/// | Offset | Field   |
/// |--------|---------|
/// | 0      | `elr`   |
/// | 8      | `spsr`  |
/// | 16     | `sp`    |
/// | 24     | `esr`   |
/// | 32     | `far`   |
/// | 40     | `gpr`   |
#[repr(C)]
#[derive(Debug, Clone)]
pub struct TrapFrame {
    /// Exception link register: where `eret` will resume.
    pub elr: u64,
    /// Saved program status.
    pub spsr: u64,
    /// User stack pointer (SP_EL0) at the time of the exception.
    pub sp: u64,
    /// Exception syndrome.
    pub esr: u64,
    /// Fault address (meaningful for aborts only).
    pub far: u64,
    /// General purpose registers x0-x30.
    pub gpr: [u64; 31],
}

impl TrapFrame {
    /// Get the exception class from the saved ESR.
    #[must_use]
    pub fn exception_class(&self) -> u8 {
        esr::exception_class(self.esr)
    }

    /// Check if the exception was taken from EL0.
    #[must_use]
    pub fn from_el0(&self) -> bool {
        (self.spsr & 0x0F) == 0
    }
}

/// Exception handler function type.
pub type ExceptionHandler = fn(&mut TrapFrame);

/// Patchable handler slots, one per live vector class.
static SYNC_HANDLER: AtomicPtr<()> = AtomicPtr::new(default_sync_handler as *mut ());
static IRQ_HANDLER: AtomicPtr<()> = AtomicPtr::new(default_irq_handler as *mut ());
static SERROR_HANDLER: AtomicPtr<()> = AtomicPtr::new(default_serror_handler as *mut ());

/// Install the synchronous exception handler.
///
/// Takes effect on the next synchronous exception.
pub fn set_sync_handler(handler: ExceptionHandler) {
    SYNC_HANDLER.store(handler as *mut (), Ordering::Release);
}

/// Install the IRQ handler.
pub fn set_irq_handler(handler: ExceptionHandler) {
    IRQ_HANDLER.store(handler as *mut (), Ordering::Release);
}

/// Install the SError handler.
pub fn set_serror_handler(handler: ExceptionHandler) {
    SERROR_HANDLER.store(handler as *mut (), Ordering::Release);
}

/// Load a handler slot.
///
/// # Safety
/// The pointer must have been stored by one of the `set_*_handler`
/// functions (or be the compile-time default).
#[inline]
unsafe fn load_handler(slot: &AtomicPtr<()>) -> ExceptionHandler {
    let ptr = slot.load(Ordering::Acquire);
    // SAFETY: Only valid function pointers are ever stored.
    unsafe { core::mem::transmute(ptr) }
}

/// Default synchronous handler: nothing should trap before the kernel
/// installs its dispatcher.
fn default_sync_handler(frame: &mut TrapFrame) {
    panic!(
        "Early synchronous exception: EC={:#04x} ({}) ELR={:#x} FAR={:#x} ESR={:#x}",
        frame.exception_class(),
        esr::ec_name(frame.exception_class()),
        frame.elr,
        frame.far,
        frame.esr
    );
}

/// Default IRQ handler.
fn default_irq_handler(frame: &mut TrapFrame) {
    panic!("Early IRQ at ELR={:#x}", frame.elr);
}

/// Default SError handler. SErrors are always fatal in this kernel.
fn default_serror_handler(frame: &mut TrapFrame) {
    panic!(
        "SError at ELR={:#x}, ESR={:#x}",
        frame.elr, frame.esr
    );
}

// C-ABI shims called from the vector landings.

#[unsafe(no_mangle)]
extern "C" fn mlk_trap_sync(frame: &mut TrapFrame) {
    // SAFETY: The slot holds a valid handler.
    let handler = unsafe { load_handler(&SYNC_HANDLER) };
    handler(frame);
}

#[unsafe(no_mangle)]
extern "C" fn mlk_trap_irq(frame: &mut TrapFrame) {
    // SAFETY: The slot holds a valid handler.
    let handler = unsafe { load_handler(&IRQ_HANDLER) };
    handler(frame);
}

#[unsafe(no_mangle)]
extern "C" fn mlk_trap_serror(frame: &mut TrapFrame) {
    // SAFETY: The slot holds a valid handler.
    let handler = unsafe { load_handler(&SERROR_HANDLER) };
    handler(frame);
}

/// Vector entry stub: build a [`TrapFrame`] on the stack, branch to a
/// landing.
///
/// The frame's system-register block lives at the bottom, so the stub
/// spills x0-x3 into their `gpr` slots straight away and reuses them as
/// scratch for the `mrs` reads; the rest of the GPR file follows once the
/// system state is captured. 26 instructions, inside the 32-instruction
/// (128-byte) slot limit.
#[cfg(target_arch = "aarch64")]
macro_rules! vector_stub {
    ($landing:ident) => {
        concat!(
            "sub sp, sp, #288\n",
            // Free up four scratch registers.
            "stp x0, x1, [sp, #40]\n",
            "stp x2, x3, [sp, #56]\n",
            // Capture the system-register block while nothing can trap.
            "mrs x0, elr_el1\n",
            "mrs x1, spsr_el1\n",
            "stp x0, x1, [sp, #0]\n",
            "mrs x2, sp_el0\n",
            "mrs x3, esr_el1\n",
            "stp x2, x3, [sp, #16]\n",
            "mrs x0, far_el1\n",
            "str x0, [sp, #32]\n",
            // Spill the remaining GPR file.
            "stp x4, x5, [sp, #72]\n",
            "stp x6, x7, [sp, #88]\n",
            "stp x8, x9, [sp, #104]\n",
            "stp x10, x11, [sp, #120]\n",
            "stp x12, x13, [sp, #136]\n",
            "stp x14, x15, [sp, #152]\n",
            "stp x16, x17, [sp, #168]\n",
            "stp x18, x19, [sp, #184]\n",
            "stp x20, x21, [sp, #200]\n",
            "stp x22, x23, [sp, #216]\n",
            "stp x24, x25, [sp, #232]\n",
            "stp x26, x27, [sp, #248]\n",
            "stp x28, x29, [sp, #264]\n",
            "str x30, [sp, #280]\n",
            "b ", stringify!($landing), "\n",
        )
    };
}

/// Vector landing: hand the frame to the Rust handler, then rebuild the
/// interrupted state from it and `eret`.
///
/// Restore runs top-down: return state first (while x0-x2 are free for
/// scratch), then the GPR file from x30 downwards so x0/x1 are the last
/// thing touched before the frame is popped.
#[cfg(target_arch = "aarch64")]
macro_rules! vector_landing {
    ($handler:ident) => {
        concat!(
            "mov x0, sp\n",
            "bl ", stringify!($handler), "\n",
            // Return state back into the system registers.
            "ldp x0, x1, [sp, #0]\n",
            "msr elr_el1, x0\n",
            "msr spsr_el1, x1\n",
            "ldr x2, [sp, #16]\n",
            "msr sp_el0, x2\n",
            // GPR file, descending.
            "ldr x30, [sp, #280]\n",
            "ldp x28, x29, [sp, #264]\n",
            "ldp x26, x27, [sp, #248]\n",
            "ldp x24, x25, [sp, #232]\n",
            "ldp x22, x23, [sp, #216]\n",
            "ldp x20, x21, [sp, #200]\n",
            "ldp x18, x19, [sp, #184]\n",
            "ldp x16, x17, [sp, #168]\n",
            "ldp x14, x15, [sp, #152]\n",
            "ldp x12, x13, [sp, #136]\n",
            "ldp x10, x11, [sp, #120]\n",
            "ldp x8, x9, [sp, #104]\n",
            "ldp x6, x7, [sp, #88]\n",
            "ldp x4, x5, [sp, #72]\n",
            "ldp x2, x3, [sp, #56]\n",
            "ldp x0, x1, [sp, #40]\n",
            "add sp, sp, #288\n",
            "eret\n",
        )
    };
}

#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
#[unsafe(no_mangle)]
unsafe extern "C" fn __vec_sync_landing() {
    core::arch::naked_asm!(vector_landing!(mlk_trap_sync));
}

#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
#[unsafe(no_mangle)]
unsafe extern "C" fn __vec_irq_landing() {
    core::arch::naked_asm!(vector_landing!(mlk_trap_irq));
}

#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
#[unsafe(no_mangle)]
unsafe extern "C" fn __vec_serror_landing() {
    core::arch::naked_asm!(vector_landing!(mlk_trap_serror));
}

/// The exception vector table.
///
/// 16 slots of 128 bytes, 2 KB aligned. Slot groups, in order:
/// current EL with SP_EL0, current EL with SP_ELx (kernel), lower EL
/// AArch64 (user), lower EL AArch32 (unsupported).
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
#[unsafe(no_mangle)]
#[unsafe(link_section = ".vectors")]
unsafe extern "C" fn exception_vectors() {
    core::arch::naked_asm!(
        ".balign 2048",
        // -- Current EL with SP_EL0: never used, hang.
        ".balign 128",
        "b .",
        ".balign 128",
        "b .",
        ".balign 128",
        "b .",
        ".balign 128",
        "b .",
        // -- Current EL with SP_ELx: kernel mode.
        ".balign 128",
        vector_stub!(__vec_sync_landing),
        ".balign 128",
        vector_stub!(__vec_irq_landing),
        ".balign 128",
        "b .", // FIQ: not routed
        ".balign 128",
        vector_stub!(__vec_serror_landing),
        // -- Lower EL, AArch64: user mode.
        ".balign 128",
        vector_stub!(__vec_sync_landing),
        ".balign 128",
        vector_stub!(__vec_irq_landing),
        ".balign 128",
        "b .", // FIQ: not routed
        ".balign 128",
        vector_stub!(__vec_serror_landing),
        // -- Lower EL, AArch32: unsupported.
        ".balign 128",
        "b .",
        ".balign 128",
        "b .",
        ".balign 128",
        "b .",
        ".balign 128",
        "b .",
    );
}

/// Point VBAR_EL1 at the vector table.
#[cfg(target_arch = "aarch64")]
pub fn init() {
    let vectors = exception_vectors as *const () as u64;
    crate::registers::write_vbar_el1(vectors);
    crate::cpu::isb();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_frame_layout() {
        // The vector stubs hard-code these offsets; keep the struct honest.
        assert_eq!(core::mem::size_of::<TrapFrame>(), 288);
        assert_eq!(core::mem::offset_of!(TrapFrame, elr), 0);
        assert_eq!(core::mem::offset_of!(TrapFrame, spsr), 8);
        assert_eq!(core::mem::offset_of!(TrapFrame, sp), 16);
        assert_eq!(core::mem::offset_of!(TrapFrame, esr), 24);
        assert_eq!(core::mem::offset_of!(TrapFrame, far), 32);
        assert_eq!(core::mem::offset_of!(TrapFrame, gpr), 40);
    }

    #[test]
    fn test_from_el0() {
        let mut frame = TrapFrame {
            elr: 0,
            spsr: 0,
            sp: 0,
            esr: 0,
            far: 0,
            gpr: [0; 31],
        };
        assert!(frame.from_el0());
        frame.spsr = crate::registers::spsr::EL1H;
        assert!(!frame.from_el0());
    }
}
