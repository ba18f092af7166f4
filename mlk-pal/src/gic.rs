//! GICv2 interrupt controller
//!
//! Driver for the GICv2 on the QEMU `virt` machine, built on the `arm-gic`
//! crate. The kernel registers per-INTID handlers; the IRQ vector calls
//! [`dispatch_irq`], which acknowledges the interrupt, runs the handler and
//! signals end-of-interrupt.

use arm_gic::gicv2::GicV2;
use arm_gic::gicv2::registers::{Gicc, Gicd};
use arm_gic::{IntId, Trigger};
use spin::Mutex;

use crate::platform;

/// Highest INTID the handler table covers (SGIs + PPIs + virt's SPIs).
const MAX_HANDLERS: usize = 256;

/// Interrupt handler function type.
pub type IrqHandler = fn(intid: u32);

/// Registered interrupt handlers, indexed by INTID.
static IRQ_HANDLERS: Mutex<[Option<IrqHandler>; MAX_HANDLERS]> =
    Mutex::new([None; MAX_HANDLERS]);

/// GIC driver state.
enum GicDriver {
    Ready(GicV2<'static>),
    Uninitialised,
}

// SAFETY: GIC register access goes through the Mutex; the raw pointers
// inside GicV2 refer to identity-mapped device memory.
unsafe impl Send for GicDriver {}

/// Global GIC driver instance.
static GIC: Mutex<GicDriver> = Mutex::new(GicDriver::Uninitialised);

/// Initialise the GICv2 distributor and CPU interface.
///
/// # Safety
///
/// - Must be called exactly once, after the MMU maps the GIC window as
///   device memory (or before the MMU is enabled, under the identity map).
/// - No other code may touch the GIC registers.
pub unsafe fn init() {
    let gicd_ptr = platform::GICD_BASE as *mut Gicd;
    let gicc_ptr = platform::GICC_BASE as *mut Gicc;

    // SAFETY: Pointers address the platform GIC window; caller guarantees
    // exclusive access and a valid mapping.
    let mut driver = unsafe { GicV2::new(gicd_ptr, gicc_ptr) };

    driver.setup();
    driver.set_priority_mask(0xFF); // accept all priorities

    *GIC.lock() = GicDriver::Ready(driver);
    log::info!("GICv2 initialised: GICD={:#x} GICC={:#x}", platform::GICD_BASE, platform::GICC_BASE);
}

/// Enable an interrupt.
pub fn enable_irq(intid: u32) {
    let mut gic = GIC.lock();
    match &mut *gic {
        GicDriver::Ready(driver) => {
            let _ = driver.enable_interrupt(intid_from_raw(intid), true);
        }
        GicDriver::Uninitialised => panic!("GIC not initialised"),
    }
}

/// Disable an interrupt.
pub fn disable_irq(intid: u32) {
    let mut gic = GIC.lock();
    match &mut *gic {
        GicDriver::Ready(driver) => {
            let _ = driver.enable_interrupt(intid_from_raw(intid), false);
        }
        GicDriver::Uninitialised => panic!("GIC not initialised"),
    }
}

/// Set an interrupt's trigger mode.
pub fn set_trigger(intid: u32, edge: bool) {
    let mut gic = GIC.lock();
    let trigger = if edge { Trigger::Edge } else { Trigger::Level };
    match &mut *gic {
        GicDriver::Ready(driver) => {
            driver.set_trigger(intid_from_raw(intid), trigger);
        }
        GicDriver::Uninitialised => panic!("GIC not initialised"),
    }
}

/// Acknowledge the highest-priority pending interrupt.
fn acknowledge_interrupt() -> Option<u32> {
    let mut gic = GIC.lock();
    match &mut *gic {
        GicDriver::Ready(driver) => driver.get_and_acknowledge_interrupt().map(|id| id.into()),
        GicDriver::Uninitialised => panic!("GIC not initialised"),
    }
}

/// Signal end of interrupt processing.
fn end_interrupt(intid: u32) {
    let mut gic = GIC.lock();
    match &mut *gic {
        GicDriver::Ready(driver) => driver.end_interrupt(intid_from_raw(intid)),
        GicDriver::Uninitialised => panic!("GIC not initialised"),
    }
}

/// Register an interrupt handler for an INTID.
pub fn register_handler(intid: u32, handler: IrqHandler) {
    assert!(
        (intid as usize) < MAX_HANDLERS,
        "INTID {} exceeds handler table",
        intid
    );
    IRQ_HANDLERS.lock()[intid as usize] = Some(handler);
}

/// Acknowledge, dispatch and complete one pending interrupt.
///
/// Called from the IRQ exception vector. Spurious INTIDs (1020-1023) are
/// dropped without EOI.
pub fn dispatch_irq() {
    let intid = match acknowledge_interrupt() {
        Some(id) => id,
        None => return,
    };

    if intid >= 1020 {
        return;
    }

    let handler = {
        let handlers = IRQ_HANDLERS.lock();
        handlers.get(intid as usize).and_then(|h| *h)
    };

    if let Some(handler) = handler {
        // Handler runs without any GIC lock held.
        handler(intid);
    } else {
        log::warn!("Unhandled IRQ {}", intid);
    }

    end_interrupt(intid);
}

/// Convert a raw INTID to the typed `IntId`.
///
/// - 0-15: SGI, 16-31: PPI, 32+: SPI.
fn intid_from_raw(intid: u32) -> IntId {
    if intid < 16 {
        IntId::sgi(intid)
    } else if intid < 32 {
        IntId::ppi(intid - 16)
    } else {
        IntId::spi(intid - 32)
    }
}
