//! Context Switch Primitives
//!
//! Kernel-side context switching is cooperative: [`cpu_switch`] saves the
//! callee-saved register set, stack pointer and return address of the
//! outgoing thread and resumes the incoming one where it last suspended.
//! A thread that has never run "resumes" into [`thread_trampoline`], whose
//! address was planted in the context's link register at creation.
//!
//! Dropping to user mode is one-way: [`enter_user`] programs ELR/SP_EL0/SPSR,
//! clears every user-visible register and issues `eret`. The thread re-enters
//! the kernel only through the exception vectors, which save the user
//! register file onto this thread's kernel stack.

/// Callee-saved CPU context of a suspended thread.
///
/// Offsets are hard-coded in [`cpu_switch`]; keep the layout in sync.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct CpuContext {
    /// Callee-saved registers x19-x28.
    pub regs: [u64; 10],
    /// Frame pointer.
    pub x29: u64,
    /// Return address: where the thread resumes.
    pub lr: u64,
    /// Kernel stack pointer.
    pub sp: u64,
}

impl CpuContext {
    /// An empty context (only valid as save space).
    pub const EMPTY: Self = Self {
        regs: [0; 10],
        x29: 0,
        lr: 0,
        sp: 0,
    };

    /// Context for a thread that has never run: the first `cpu_switch` to
    /// it "returns" into the trampoline on a fresh kernel stack.
    #[must_use]
    pub fn first_run(kernel_stack_top: u64) -> Self {
        Self {
            regs: [0; 10],
            x29: 0,
            lr: thread_trampoline as *const () as u64,
            sp: kernel_stack_top,
        }
    }
}

/// Switch kernel contexts: save into `prev`, resume `next`.
///
/// Returns (into the caller) only when some later switch resumes `prev`.
///
/// # Safety
///
/// - Both pointers must reference live `CpuContext` storage.
/// - Interrupts must be masked across the call.
/// - `next` must hold either a context saved by a previous `cpu_switch` or
///   a [`CpuContext::first_run`] image over a valid kernel stack.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
pub unsafe extern "C" fn cpu_switch(prev: *mut CpuContext, next: *const CpuContext) {
    core::arch::naked_asm!(
        // Save outgoing callee-saved state.
        "stp x19, x20, [x0, #0]",
        "stp x21, x22, [x0, #16]",
        "stp x23, x24, [x0, #32]",
        "stp x25, x26, [x0, #48]",
        "stp x27, x28, [x0, #64]",
        "stp x29, x30, [x0, #80]",
        "mov x9, sp",
        "str x9, [x0, #96]",
        // Restore incoming state.
        "ldp x19, x20, [x1, #0]",
        "ldp x21, x22, [x1, #16]",
        "ldp x23, x24, [x1, #32]",
        "ldp x25, x26, [x1, #48]",
        "ldp x27, x28, [x1, #64]",
        "ldp x29, x30, [x1, #80]",
        "ldr x9, [x1, #96]",
        "mov sp, x9",
        "ret",
    );
}

/// Host stand-in so the scheduler compiles off-target.
#[cfg(not(target_arch = "aarch64"))]
pub unsafe extern "C" fn cpu_switch(prev: *mut CpuContext, next: *const CpuContext) {
    let _ = (prev, next);
    unimplemented!("cpu_switch is aarch64-only");
}

/// Drop to EL0 at `entry` with the given user stack.
///
/// SPSR selects EL0t with all interrupt masks clear; every user-visible
/// register except the program counter and stack pointer is zeroed.
///
/// # Safety
///
/// `entry` and `user_sp` must be valid in the currently-installed TTBR0
/// tree. This function does not return.
#[cfg(target_arch = "aarch64")]
pub unsafe fn enter_user(entry: u64, user_sp: u64) -> ! {
    // SAFETY: Caller guarantees a valid EL0 target; eret leaves EL1.
    unsafe {
        core::arch::asm!(
            "msr elr_el1, {entry}",
            "msr sp_el0, {sp}",
            "msr spsr_el1, xzr",
            "mov x1, #0",
            "mov x2, #0",
            "mov x3, #0",
            "mov x4, #0",
            "mov x5, #0",
            "mov x6, #0",
            "mov x7, #0",
            "mov x8, #0",
            "mov x9, #0",
            "mov x10, #0",
            "mov x11, #0",
            "mov x12, #0",
            "mov x13, #0",
            "mov x14, #0",
            "mov x15, #0",
            "mov x16, #0",
            "mov x17, #0",
            "mov x18, #0",
            "mov x19, #0",
            "mov x20, #0",
            "mov x21, #0",
            "mov x22, #0",
            "mov x23, #0",
            "mov x24, #0",
            "mov x25, #0",
            "mov x26, #0",
            "mov x27, #0",
            "mov x28, #0",
            "mov x29, #0",
            "mov x30, #0",
            "mov x0, #0",
            "eret",
            entry = in(reg) entry,
            sp = in(reg) user_sp,
            options(noreturn)
        );
    }
}

/// Host stand-in.
#[cfg(not(target_arch = "aarch64"))]
pub unsafe fn enter_user(entry: u64, user_sp: u64) -> ! {
    let _ = (entry, user_sp);
    unimplemented!("enter_user is aarch64-only");
}

/// First-run landing for every thread.
///
/// `cpu_switch` delivers control here with interrupts masked and SP at the
/// top of the thread's fresh kernel stack. User threads drop to EL0; kernel
/// threads call their entry function directly.
extern "C" fn thread_trampoline() -> ! {
    let (is_user, entry, user_sp) = super::current_entry_info();

    if is_user {
        // SAFETY: The loader validated entry and stack against the
        // process's address space, which the reschedule path installed.
        unsafe { enter_user(entry, user_sp) }
    } else {
        mlk_arch::cpu::enable_interrupts();
        let entry_fn: extern "C" fn() = unsafe { core::mem::transmute(entry as *const ()) };
        entry_fn();
        panic!("kernel thread returned from its entry function");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_layout() {
        // cpu_switch hard-codes these offsets.
        assert_eq!(core::mem::offset_of!(CpuContext, x29), 80);
        assert_eq!(core::mem::offset_of!(CpuContext, lr), 88);
        assert_eq!(core::mem::offset_of!(CpuContext, sp), 96);
        assert_eq!(core::mem::size_of::<CpuContext>(), 104);
    }

    #[test]
    fn test_first_run_context() {
        let ctx = CpuContext::first_run(0x4100_4000);
        assert_eq!(ctx.sp, 0x4100_4000);
        assert_ne!(ctx.lr, 0);
    }
}
