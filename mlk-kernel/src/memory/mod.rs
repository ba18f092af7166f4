//! Kernel memory management
//!
//! Initialisation order matters: the frame allocator first (pure bookkeeping
//! over RAM, usable with the MMU still off), then the kernel's own
//! translation tree, then the MMU itself. The kernel runs identity-mapped —
//! the physical RAM window doubles as the kernel's virtual window, which is
//! what lets page-table pages and freshly allocated frames be touched
//! directly by their physical address.

pub mod asid;
pub mod frame;
pub mod layout;
pub mod vspace;

use core::sync::atomic::{AtomicU64, Ordering};

use mlk_arch::mmu::{self, PageTable, flags};
use mlk_common::PhysAddr;
use mlk_common::memory::page;
use mlk_pal::platform;

pub use vspace::{AddressSpace, MapError};

/// Physical address of the kernel's level-0 table.
static KERNEL_ROOT: AtomicU64 = AtomicU64::new(0);

/// The kernel's L0 slot-0 descriptor, aliased into every process tree.
static KERNEL_L0_SLOT0: AtomicU64 = AtomicU64::new(0);

/// Physical address of the kernel root table.
#[must_use]
pub fn kernel_root() -> u64 {
    KERNEL_ROOT.load(Ordering::Relaxed)
}

/// TTBR0 value for kernel and idle threads (kernel root, ASID 0).
#[must_use]
pub fn kernel_ttbr0() -> u64 {
    mmu::ttbr_value(kernel_root(), asid::KERNEL_ASID)
}

/// The level-0 slot-0 table descriptor shared with every process tree.
#[must_use]
pub fn kernel_l0_slot0() -> u64 {
    KERNEL_L0_SLOT0.load(Ordering::Relaxed)
}

/// Borrow a freshly allocated table page through the identity window.
///
/// # Safety
///
/// `phys` must be a zeroed, exclusively-owned table page.
unsafe fn table_mut(phys: PhysAddr) -> &'static mut PageTable {
    // SAFETY: Caller guarantees exclusivity; RAM is identity-accessible.
    unsafe { &mut *(phys.as_u64() as *mut PageTable) }
}

/// Build the kernel translation tree and switch the MMU on.
///
/// The tree maps, with 2 MB blocks under L0 slot 0:
/// - the GIC, UART and VirtIO device windows as privileged device memory,
/// - the kernel image region as privileged RWX,
/// - the rest of RAM as privileged RW (the identity window the allocator,
///   loader and page-table walks rely on).
///
/// # Safety
///
/// Must be called exactly once during boot, before any user mapping exists.
pub unsafe fn init() {
    // SAFETY: Single call during boot.
    unsafe { frame::init() };

    let root = frame::alloc_frame_zeroed().expect("no frame for kernel root");
    let l1_phys = frame::alloc_frame_zeroed().expect("no frame for kernel L1");
    let l2_dev_phys = frame::alloc_frame_zeroed().expect("no frame for device L2");
    let l2_ram_phys = frame::alloc_frame_zeroed().expect("no frame for RAM L2");

    // SAFETY: All four pages were just allocated and zeroed.
    let root_table = unsafe { table_mut(root) };
    let l1 = unsafe { table_mut(l1_phys) };
    let l2_dev = unsafe { table_mut(l2_dev_phys) };
    let l2_ram = unsafe { table_mut(l2_ram_phys) };

    let slot0_desc = l1_phys.as_u64() | flags::TABLE_DESC;
    root_table.set(0, slot0_desc);
    l1.set(0, l2_dev_phys.as_u64() | flags::TABLE_DESC); // 0..1 GB: devices
    l1.set(1, l2_ram_phys.as_u64() | flags::TABLE_DESC); // 1..2 GB: RAM

    // Device windows, one 2 MB block each.
    for base in [platform::GICD_BASE, platform::UART0_BASE, platform::VIRTIO_BASE] {
        let idx = ((base >> 21) & 0x1FF) as usize;
        let block_base = base & !(page::BLOCK_2M as u64 - 1);
        l2_dev.set(idx, block_base | flags::block(flags::DEVICE_RW));
    }

    // RAM identity window. The kernel image region keeps execute rights;
    // everything above it is data only.
    let mut pa = platform::RAM_BASE;
    while pa < platform::RAM_END {
        let idx = ((pa >> 21) & 0x1FF) as usize;
        let block_flags = if pa < platform::RAM_BASE + platform::KERNEL_RESERVED {
            flags::block(flags::KERNEL_RWX)
        } else {
            flags::block(flags::KERNEL_RW)
        };
        l2_ram.set(idx, pa | block_flags);
        pa += page::BLOCK_2M as u64;
    }

    KERNEL_ROOT.store(root.as_u64(), Ordering::Relaxed);
    KERNEL_L0_SLOT0.store(slot0_desc, Ordering::Relaxed);

    // Both halves get the kernel tree; user roots replace TTBR0 at switch.
    mmu::mmu().enable(kernel_ttbr0(), root.as_u64());

    log::info!(
        "MMU on: kernel root {:#x}, identity window {:#x}..{:#x}",
        root.as_u64(),
        platform::RAM_BASE,
        platform::RAM_END
    );
}
