//! Interrupt routing and the scheduler tick
//!
//! The IRQ vector lands here: acknowledge through the GIC, run the
//! per-INTID handler, then consult the reschedule flag — but only when it
//! is safe to switch. An IRQ that interrupted the kernel mid-syscall must
//! not context-switch; the interrupted syscall's own return path performs
//! the deferred switch instead.

use core::sync::atomic::{AtomicU64, Ordering};

use mlk_arch::exceptions::TrapFrame;
use mlk_pal::{gic, platform, timer};

use crate::sched;

/// Timer ticks since boot (10 ms units at the 100 Hz tick).
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Tick count since boot.
#[must_use]
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Bring up the interrupt controller and start the scheduler tick.
///
/// # Safety
///
/// Must be called once, after the MMU and exception vectors are live.
pub unsafe fn init() {
    // SAFETY: Single call, GIC window mapped by the kernel tree.
    unsafe { gic::init() };

    gic::register_handler(platform::TIMER_INTID, timer_tick);
    gic::enable_irq(platform::TIMER_INTID);

    timer::init();
    timer::start_tick();
}

/// The 100 Hz tick: charge the running thread and re-arm.
fn timer_tick(_intid: u32) {
    TICKS.fetch_add(1, Ordering::Relaxed);
    timer::arm_next_tick();
    sched::tick();
}

/// IRQ exception entry.
pub fn irq_exception_handler(frame: &mut TrapFrame) {
    if frame.from_el0() {
        sched::set_current_trap_frame(frame);
    }

    gic::dispatch_irq();

    // Deferred reschedule: switch only when returning to user mode, or
    // when the interrupted context is a kernel thread (the idle loop).
    // An IRQ nested inside a syscall skips this; the syscall's own return
    // path picks the flag up.
    if frame.from_el0() || sched::current_is_kernel() {
        sched::maybe_reschedule();
    }
}
