//! ARM Generic Timer
//!
//! Drives the scheduler tick from the virtual generic timer (CNTV) and
//! provides coarse timestamps for the logger and `GET_TICKS`.

use core::sync::atomic::{AtomicU64, Ordering};

#[cfg(target_arch = "aarch64")]
use aarch64_cpu::registers::{CNTFRQ_EL0, CNTV_CTL_EL0, CNTV_CVAL_EL0, CNTVCT_EL0};
#[cfg(target_arch = "aarch64")]
use tock_registers::interfaces::{Readable, Writeable};

use crate::platform::TICK_HZ;

/// Counter frequency, read once from CNTFRQ_EL0 at init.
static TIMER_FREQ: AtomicU64 = AtomicU64::new(0);

/// Timer control register bits.
mod ctl {
    /// Timer enabled.
    pub const ENABLE: u64 = 1 << 0;
    /// Interrupt masked.
    pub const IMASK: u64 = 1 << 1;
}

/// Read the virtual counter.
#[must_use]
pub fn read_counter() -> u64 {
    #[cfg(target_arch = "aarch64")]
    {
        CNTVCT_EL0.get()
    }
    #[cfg(not(target_arch = "aarch64"))]
    0
}

fn write_cntv_cval(cval: u64) {
    #[cfg(target_arch = "aarch64")]
    CNTV_CVAL_EL0.set(cval);
    #[cfg(not(target_arch = "aarch64"))]
    let _ = cval;
}

fn write_cntv_ctl(value: u64) {
    #[cfg(target_arch = "aarch64")]
    CNTV_CTL_EL0.set(value);
    #[cfg(not(target_arch = "aarch64"))]
    let _ = value;
}

/// Initialise the timer subsystem: latch the counter frequency and leave
/// the timer disabled until [`start_tick`].
pub fn init() {
    #[cfg(target_arch = "aarch64")]
    TIMER_FREQ.store(CNTFRQ_EL0.get(), Ordering::Relaxed);

    write_cntv_ctl(0);
}

/// Get the counter frequency in Hz.
#[must_use]
pub fn frequency() -> u64 {
    TIMER_FREQ.load(Ordering::Relaxed)
}

/// Counter increments per scheduler tick.
#[must_use]
pub fn ticks_per_interval() -> u64 {
    frequency() / TICK_HZ
}

/// Milliseconds since boot, for log timestamps.
#[must_use]
pub fn now_ms() -> u64 {
    let count = read_counter();
    let freq = frequency();
    if freq == 0 {
        return 0;
    }
    let secs = count / freq;
    let frac = count % freq;
    secs * 1_000 + (frac * 1_000) / freq
}

/// Arm the timer for the next scheduler tick.
pub fn arm_next_tick() {
    let target = read_counter().wrapping_add(ticks_per_interval());
    write_cntv_cval(target);
    write_cntv_ctl(ctl::ENABLE);
}

/// Start the periodic scheduler tick.
///
/// The tick handler must re-arm with [`arm_next_tick`] on each expiry.
pub fn start_tick() {
    arm_next_tick();
    log::info!(
        "Generic timer: {} Hz counter, {} Hz tick",
        frequency(),
        TICK_HZ
    );
}

/// Mask the timer interrupt without disabling the counter.
pub fn mask() {
    write_cntv_ctl(ctl::ENABLE | ctl::IMASK);
}
