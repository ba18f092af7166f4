//! CPU Control
//!
//! Low-level CPU operations: interrupt masking, barriers, and halt.

#[cfg(target_arch = "aarch64")]
use aarch64_cpu::registers::*;
#[cfg(target_arch = "aarch64")]
use core::arch::asm;

/// Get the current exception level.
#[cfg(target_arch = "aarch64")]
#[must_use]
pub fn current_el() -> u8 {
    ((CurrentEL.get() >> 2) & 0x3) as u8
}

/// Park the CPU forever.
///
/// Used by the panic path: interrupts are expected to be masked by the
/// caller, so the event loop never wakes into handler code.
#[inline]
pub fn halt() -> ! {
    loop {
        wait_for_event();
    }
}

/// Wait for interrupt (WFI instruction).
#[inline]
pub fn wait_for_interrupt() {
    // SAFETY: WFI is always safe to execute.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("wfi", options(nomem, nostack));
    }
}

/// Wait for event (WFE instruction).
#[inline]
pub fn wait_for_event() {
    // SAFETY: WFE is always safe to execute.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("wfe", options(nomem, nostack));
    }
}

/// Data synchronisation barrier, full system.
///
/// Used to frame MMIO register writes and shared queue-index updates.
#[inline]
pub fn dsb_sy() {
    // SAFETY: Memory barriers are always safe.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("dsb sy", options(nostack));
    }
}

/// Data synchronisation barrier, inner shareable.
#[inline]
pub fn dsb_ish() {
    // SAFETY: Memory barriers are always safe.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("dsb ish", options(nostack));
    }
}

/// Instruction synchronisation barrier.
///
/// Must follow every MMU register write before the new translation regime
/// is relied upon.
#[inline]
pub fn isb() {
    // SAFETY: ISB is always safe.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("isb", options(nostack));
    }
}

/// Disable all interrupts and return the previous DAIF state.
#[must_use]
#[inline]
pub fn disable_interrupts() -> u64 {
    #[cfg(target_arch = "aarch64")]
    {
        let daif = DAIF.get();
        // SAFETY: Masking DAIF is safe in kernel mode.
        unsafe {
            asm!("msr daifset, #0xf", options(nomem, nostack));
        }
        daif
    }
    #[cfg(not(target_arch = "aarch64"))]
    0
}

/// Enable all interrupts.
#[inline]
pub fn enable_interrupts() {
    // SAFETY: Clearing DAIF is safe in kernel mode.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("msr daifclr, #0xf", options(nomem, nostack));
    }
}

/// Restore a DAIF state previously returned by [`disable_interrupts`].
#[inline]
pub fn restore_interrupts(daif: u64) {
    #[cfg(target_arch = "aarch64")]
    DAIF.set(daif);
    #[cfg(not(target_arch = "aarch64"))]
    let _ = daif;
}

/// Check if IRQs are currently enabled.
#[must_use]
pub fn interrupts_enabled() -> bool {
    #[cfg(target_arch = "aarch64")]
    {
        (DAIF.get() & 0xC0) == 0
    }
    #[cfg(not(target_arch = "aarch64"))]
    false
}

/// Invalidate the entire instruction cache.
///
/// Required after writing code bytes into frames that will be executed.
#[inline]
pub fn invalidate_icache() {
    // SAFETY: Cache maintenance is always safe.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("ic iallu", "dsb sy", "isb", options(nostack));
    }
}
