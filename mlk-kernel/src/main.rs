//! MLK kernel binary: boot entry, initialisation order, idle loop, panic.

#![cfg_attr(target_arch = "aarch64", no_std)]
#![cfg_attr(target_arch = "aarch64", no_main)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(target_arch = "aarch64")]
mod boot {
    use core::panic::PanicInfo;

    use mlk_kernel::{loader, logging, memory, sched, syscall};
    use mlk_kernel::sched::Priority;
    use mlk_pal::{console, println};

    /// Kernel entry.
    ///
    /// QEMU's `-kernel` drops us here at EL1 with the MMU off and no
    /// stack. Clear .bss, raise the boot stack, and hand over to Rust.
    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    #[unsafe(link_section = ".text.boot")]
    unsafe extern "C" fn _start() -> ! {
        core::arch::naked_asm!(
            // Zero .bss.
            "adrp x0, __bss_start",
            "add x0, x0, :lo12:__bss_start",
            "adrp x1, __bss_end",
            "add x1, x1, :lo12:__bss_end",
            "1:",
            "cmp x0, x1",
            "b.hs 2f",
            "str xzr, [x0], #8",
            "b 1b",
            "2:",
            // Boot stack, then Rust.
            "adrp x2, __boot_stack_top",
            "add x2, x2, :lo12:__boot_stack_top",
            "mov sp, x2",
            "bl kmain",
            "3:",
            "wfe",
            "b 3b",
        );
    }

    /// Rust-side bring-up. The boot context becomes the idle thread.
    #[unsafe(no_mangle)]
    extern "C" fn kmain() -> ! {
        console::init();
        logging::init();

        println!();
        println!("MLK microkernel");
        log::info!("Booting at EL{}", mlk_arch::cpu::current_el());

        mlk_arch::exceptions::init();

        // SAFETY: Single boot path; nothing else has touched memory or
        // interrupt state yet.
        unsafe {
            memory::init();
        }

        sched::init();
        syscall::init();

        // SAFETY: MMU and vectors are live; the GIC window is mapped.
        unsafe {
            mlk_kernel::irq::init();
        }

        loader::spawn(loader::registry::BIN_INIT, Priority::Normal, None)
            .expect("failed to spawn init");

        log::info!("Entering idle loop; first tick hands over to init");
        idle_loop();
    }

    /// The idle thread: wait for interrupts forever. The timer tick
    /// preempts into whatever is ready.
    fn idle_loop() -> ! {
        mlk_arch::cpu::enable_interrupts();
        loop {
            mlk_arch::cpu::wait_for_interrupt();
        }
    }

    /// Fatal stop: mask interrupts, print the banner, park on WFE.
    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        mlk_arch::cpu::disable_interrupts();

        println!();
        println!("*** KERNEL PANIC ***");
        println!("{}", info);

        mlk_arch::halt();
    }
}

#[cfg(not(target_arch = "aarch64"))]
fn main() {
    // The kernel image only exists for aarch64; host builds of this
    // package are for running the unit tests in the library crates.
}
