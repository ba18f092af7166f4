//! MMU (Memory Management Unit) Support
//!
//! Page-table descriptor encoding, translation-register programming and TLB
//! maintenance for ARMv8-A with 4 KB granules and 48-bit virtual addresses
//! (4-level walk).
//!
//! The walk itself — mapping, unmapping, address-space teardown — lives in
//! the kernel's memory subsystem; this module owns the architectural bits:
//! what a descriptor looks like and how the translation registers are
//! sequenced.

#[cfg(target_arch = "aarch64")]
use aarch64_cpu::registers::*;
#[cfg(target_arch = "aarch64")]
use core::arch::asm;
use spin::Mutex;

use crate::cpu::{dsb_ish, dsb_sy, isb};

/// Number of entries per translation table.
pub const ENTRIES_PER_TABLE: usize = 512;

/// Physical address field of a descriptor (bits 47:12).
pub const PHYS_ADDR_MASK: u64 = 0x0000_FFFF_FFFF_F000;

/// TCR_EL1 configuration.
///
/// 48-bit virtual addresses for both halves, 4 KB granules, inner-shareable
/// write-back table walks, and A1=0 so TLB entries are tagged with the
/// TTBR0 ASID.
mod tcr_config {
    /// T0SZ: 64 - 48 = 16 for a 48-bit TTBR0 VA range.
    pub const T0SZ: u64 = 16;
    /// T1SZ: 48-bit TTBR1 VA range.
    pub const T1SZ: u64 = 16 << 16;
    /// TG0: 4 KB granule for TTBR0 (0b00).
    pub const TG0_4KB: u64 = 0b00 << 14;
    /// TG1: 4 KB granule for TTBR1 (0b10).
    pub const TG1_4KB: u64 = 0b10 << 30;
    /// IPS: 48-bit intermediate physical addresses.
    pub const IPS_48BIT: u64 = 0b101 << 32;
    /// SH0/SH1: inner shareable walks.
    pub const SH0_INNER: u64 = 0b11 << 12;
    pub const SH1_INNER: u64 = 0b11 << 28;
    /// ORGN/IRGN: write-back read/write-allocate walks, both halves.
    pub const ORGN0_WBRWA: u64 = 0b01 << 10;
    pub const ORGN1_WBRWA: u64 = 0b01 << 26;
    pub const IRGN0_WBRWA: u64 = 0b01 << 8;
    pub const IRGN1_WBRWA: u64 = 0b01 << 24;
}

/// MAIR_EL1 attribute assignments.
///
/// Index 0: normal write-back read/write-allocate (0xFF)
/// Index 1: device nGnRnE (0x00)
/// Index 2: normal non-cacheable (0x44)
const MAIR_VALUE: u64 = 0x00_00_00_00_00_44_00_FF;

/// Page table entry flags.
///
/// The raw bits plus the composed permission sets the kernel hands out.
/// Every mapping in the system is one of the named combinations at the
/// bottom; nothing else composes descriptors ad hoc.
pub mod flags {
    /// Descriptor is valid.
    pub const VALID: u64 = 1 << 0;
    /// Table descriptor (levels 0-2): points at the next-level table.
    pub const TABLE: u64 = 1 << 1;
    /// Page descriptor (level 3).
    pub const PAGE: u64 = 1 << 1;
    /// Access flag; set at map time since there is no HW AF management.
    pub const AF: u64 = 1 << 10;
    /// Shareability: non-shareable.
    pub const SH_NONE: u64 = 0 << 8;
    /// Shareability: inner shareable.
    pub const SH_INNER: u64 = 3 << 8;
    /// Access permission: read-only.
    pub const AP_RO: u64 = 1 << 7;
    /// Access permission: accessible from EL0.
    pub const AP_EL0: u64 = 1 << 6;
    /// Not global: the TLB entry is tagged with the current ASID.
    pub const NG: u64 = 1 << 11;
    /// Unprivileged execute never.
    pub const UXN: u64 = 1 << 54;
    /// Privileged execute never.
    pub const PXN: u64 = 1 << 53;

    /// Memory attribute index shift (MAIR index).
    pub const ATTR_INDEX_SHIFT: u64 = 2;
    /// Normal write-back memory (MAIR index 0).
    pub const ATTR_NORMAL: u64 = 0 << ATTR_INDEX_SHIFT;
    /// Device nGnRnE memory (MAIR index 1).
    pub const ATTR_DEVICE: u64 = 1 << ATTR_INDEX_SHIFT;
    /// Normal non-cacheable memory (MAIR index 2).
    pub const ATTR_NORMAL_NC: u64 = 2 << ATTR_INDEX_SHIFT;

    // -- Kernel mappings: privileged-only, user-execute-never, global.

    /// Kernel code+data identity window (read/write/execute).
    pub const KERNEL_RWX: u64 = VALID | PAGE | AF | SH_INNER | ATTR_NORMAL | UXN;
    /// Kernel data (no execute).
    pub const KERNEL_RW: u64 = VALID | PAGE | AF | SH_INNER | ATTR_NORMAL | UXN | PXN;
    /// Kernel read-only data.
    pub const KERNEL_RO: u64 = KERNEL_RW | AP_RO;
    /// Kernel code (read + execute).
    pub const KERNEL_RX: u64 = VALID | PAGE | AF | SH_INNER | ATTR_NORMAL | UXN | AP_RO;
    /// Kernel device registers: non-cacheable, execute-never.
    pub const DEVICE_RW: u64 = VALID | PAGE | AF | SH_NONE | ATTR_DEVICE | UXN | PXN;

    // -- User mappings: EL0-accessible, per-ASID (non-global).

    /// User code+data (read/write/execute from EL0).
    pub const USER_RWX: u64 = VALID | PAGE | AF | SH_INNER | ATTR_NORMAL | AP_EL0 | PXN | NG;
    /// User data (no execute).
    pub const USER_RW: u64 =
        VALID | PAGE | AF | SH_INNER | ATTR_NORMAL | AP_EL0 | UXN | PXN | NG;
    /// User read-only data.
    pub const USER_RO: u64 = USER_RW | AP_RO;
    /// User code (read + execute).
    pub const USER_RX: u64 =
        VALID | PAGE | AF | SH_INNER | ATTR_NORMAL | AP_EL0 | AP_RO | PXN | NG;
    /// User device registers (for MAP_DEVICE).
    pub const USER_DEVICE: u64 =
        VALID | PAGE | AF | SH_NONE | ATTR_DEVICE | AP_EL0 | UXN | PXN | NG;
    /// User DMA memory: inner-shareable, normal non-cacheable, so device and
    /// CPU see the same bytes without explicit cache maintenance.
    pub const USER_DMA: u64 =
        VALID | PAGE | AF | SH_INNER | ATTR_NORMAL_NC | AP_EL0 | UXN | PXN | NG;

    /// Table descriptor linking to the next level.
    pub const TABLE_DESC: u64 = VALID | TABLE;

    /// Convert a level-3 page flag set into its level-1/2 block equivalent.
    #[inline]
    #[must_use]
    pub const fn block(page_flags: u64) -> u64 {
        page_flags & !TABLE
    }
}

/// A single translation table: 512 64-bit descriptors, page-sized and
/// page-aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [u64; ENTRIES_PER_TABLE],
}

impl PageTable {
    /// Create an empty page table.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            entries: [0; ENTRIES_PER_TABLE],
        }
    }

    /// Get a descriptor by index.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> u64 {
        self.entries[index]
    }

    /// Set a descriptor by index.
    #[inline]
    pub fn set(&mut self, index: usize, value: u64) {
        self.entries[index] = value;
    }

    /// Check if a descriptor is valid.
    #[inline]
    #[must_use]
    pub fn is_valid(&self, index: usize) -> bool {
        self.entries[index] & flags::VALID != 0
    }

    /// Check if a descriptor is a table pointer (valid, bit 1 set).
    #[inline]
    #[must_use]
    pub fn is_table(&self, index: usize) -> bool {
        let entry = self.entries[index];
        (entry & flags::VALID != 0) && (entry & flags::TABLE != 0)
    }

    /// Get the physical address a descriptor points at.
    #[inline]
    #[must_use]
    pub fn address(&self, index: usize) -> u64 {
        self.entries[index] & PHYS_ADDR_MASK
    }

    /// Clear all descriptors.
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = 0;
        }
    }
}

/// Page-table level indices extracted from a virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtAddrParts {
    /// Level 0 index.
    pub l0: usize,
    /// Level 1 index.
    pub l1: usize,
    /// Level 2 index.
    pub l2: usize,
    /// Level 3 index.
    pub l3: usize,
    /// Byte offset within the page.
    pub offset: usize,
}

impl VirtAddrParts {
    /// Extract the four level indices and page offset from a virtual address.
    #[inline]
    #[must_use]
    pub const fn from_vaddr(vaddr: u64) -> Self {
        Self {
            l0: ((vaddr >> 39) & 0x1FF) as usize,
            l1: ((vaddr >> 30) & 0x1FF) as usize,
            l2: ((vaddr >> 21) & 0x1FF) as usize,
            l3: ((vaddr >> 12) & 0x1FF) as usize,
            offset: (vaddr & 0xFFF) as usize,
        }
    }
}

/// MMU controller.
pub struct Mmu {
    enabled: bool,
}

impl Mmu {
    /// Create a new MMU controller.
    #[must_use]
    pub const fn new() -> Self {
        Self { enabled: false }
    }

    /// Check if the MMU has been enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Program MAIR/TCR, install the translation roots, and turn the MMU on
    /// together with the data and instruction caches.
    pub fn enable(&mut self, ttbr0: u64, ttbr1: u64) {
        #[cfg(target_arch = "aarch64")]
        {
            MAIR_EL1.set(MAIR_VALUE);

            let tcr: u64 = tcr_config::T0SZ
                | tcr_config::T1SZ
                | tcr_config::TG0_4KB
                | tcr_config::TG1_4KB
                | tcr_config::IPS_48BIT
                | tcr_config::SH0_INNER
                | tcr_config::SH1_INNER
                | tcr_config::ORGN0_WBRWA
                | tcr_config::ORGN1_WBRWA
                | tcr_config::IRGN0_WBRWA
                | tcr_config::IRGN1_WBRWA;
            TCR_EL1.set(tcr);

            TTBR0_EL1.set(ttbr0);
            TTBR1_EL1.set(ttbr1);

            dsb_sy();
            isb();

            invalidate_tlb_all();

            let mut sctlr = SCTLR_EL1.get();
            sctlr |= 1 << 0; // M: MMU enable
            sctlr |= 1 << 2; // C: data cache enable
            sctlr |= 1 << 12; // I: instruction cache enable
            SCTLR_EL1.set(sctlr);

            isb();
        }
        #[cfg(not(target_arch = "aarch64"))]
        let _ = (ttbr0, ttbr1);

        self.enabled = true;
    }

    /// Load a new TTBR0 (root | asid << 48) for the next user thread.
    ///
    /// ASID tagging means no TLB invalidation is needed on the switch.
    pub fn set_ttbr0(&self, ttbr0: u64) {
        #[cfg(target_arch = "aarch64")]
        {
            TTBR0_EL1.set(ttbr0);
            isb();
        }
        #[cfg(not(target_arch = "aarch64"))]
        let _ = ttbr0;
    }

    /// Get the current TTBR0 value.
    #[must_use]
    pub fn ttbr0(&self) -> u64 {
        #[cfg(target_arch = "aarch64")]
        {
            TTBR0_EL1.get()
        }
        #[cfg(not(target_arch = "aarch64"))]
        0
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

/// Global MMU instance.
static MMU: Mutex<Mmu> = Mutex::new(Mmu::new());

/// Get access to the global MMU.
pub fn mmu() -> spin::MutexGuard<'static, Mmu> {
    MMU.lock()
}

/// Invalidate all TLB entries on this core.
pub fn invalidate_tlb_all() {
    // SAFETY: TLB invalidation only affects translation caching.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("tlbi vmalle1", "dsb ish", "isb", options(nostack));
    }
}

/// Invalidate the TLB entry for a single virtual address (current ASID).
pub fn invalidate_tlb_vaddr(vaddr: u64) {
    // SAFETY: TLB invalidation only affects translation caching.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!(
            "tlbi vale1is, {}",
            "dsb ish",
            "isb",
            in(reg) vaddr >> 12,
            options(nostack)
        );
    }
    #[cfg(not(target_arch = "aarch64"))]
    let _ = vaddr;
}

/// Invalidate every TLB entry tagged with the given ASID.
///
/// Used on address-space destroy so the ASID can be recycled without stale
/// translations surviving.
pub fn invalidate_tlb_asid(asid: u16) {
    // The ASID occupies bits [63:48] of the TLBI operand.
    #[cfg(target_arch = "aarch64")]
    {
        let operand = (asid as u64) << 48;
        // SAFETY: TLB invalidation only affects translation caching.
        unsafe {
            asm!(
                "tlbi aside1is, {}",
                in(reg) operand,
                options(nostack, preserves_flags)
            );
        }
        dsb_ish();
        isb();
    }
    #[cfg(not(target_arch = "aarch64"))]
    let _ = asid;
}

/// Compose a TTBR0 value from a root table and an ASID.
#[inline]
#[must_use]
pub const fn ttbr_value(root: u64, asid: u16) -> u64 {
    ((asid as u64) << 48) | (root & 0x0000_FFFF_FFFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vaddr_parts() {
        // 0x0000_0080_0000_0000 is the first address of L0 slot 1.
        let parts = VirtAddrParts::from_vaddr(0x0000_0080_0000_0000);
        assert_eq!(parts.l0, 1);
        assert_eq!(parts.l1, 0);
        assert_eq!(parts.l2, 0);
        assert_eq!(parts.l3, 0);

        let parts = VirtAddrParts::from_vaddr(0x4020_3456);
        assert_eq!(parts.l0, 0);
        assert_eq!(parts.l1, 1); // 1 GB
        assert_eq!(parts.l2, 1); // 2 MB
        assert_eq!(parts.l3, 3);
        assert_eq!(parts.offset, 0x456);
    }

    #[test]
    fn test_flag_taxonomy() {
        // Kernel pages: never executable from EL0, executable at EL1 only
        // for the RWX/RX sets.
        assert_eq!(flags::KERNEL_RWX & flags::UXN, flags::UXN);
        assert_eq!(flags::KERNEL_RWX & flags::PXN, 0);
        assert_eq!(flags::KERNEL_RW & flags::PXN, flags::PXN);

        // User pages: non-global, EL0-accessible, never EL1-executable.
        for f in [flags::USER_RWX, flags::USER_RW, flags::USER_RO, flags::USER_RX, flags::USER_DMA]
        {
            assert_eq!(f & flags::NG, flags::NG);
            assert_eq!(f & flags::AP_EL0, flags::AP_EL0);
            assert_eq!(f & flags::PXN, flags::PXN);
        }

        // DMA memory is inner-shareable and non-cacheable.
        assert_eq!(flags::USER_DMA & (3 << 8), flags::SH_INNER);
        assert_eq!(flags::USER_DMA & (3 << 2), flags::ATTR_NORMAL_NC);

        // Device memory uses MAIR index 1.
        assert_eq!(flags::DEVICE_RW & (3 << 2), flags::ATTR_DEVICE);
    }

    #[test]
    fn test_block_flag_conversion() {
        let block = flags::block(flags::KERNEL_RW);
        assert_eq!(block & flags::TABLE, 0);
        assert_eq!(block & flags::VALID, flags::VALID);
    }

    #[test]
    fn test_ttbr_value() {
        let v = ttbr_value(0x4040_0000, 5);
        assert_eq!(v & PHYS_ADDR_MASK, 0x4040_0000);
        assert_eq!(v >> 48, 5);
    }

    #[test]
    fn test_page_table_entries() {
        let mut table = PageTable::empty();
        assert!(!table.is_valid(0));
        table.set(3, 0x4100_0000 | flags::TABLE_DESC);
        assert!(table.is_valid(3));
        assert!(table.is_table(3));
        assert_eq!(table.address(3), 0x4100_0000);
        table.clear();
        assert!(!table.is_valid(3));
    }
}
