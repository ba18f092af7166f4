//! Per-process address spaces
//!
//! An [`AddressSpace`] owns a 4-level page-table tree and an ASID. The tree
//! shares the kernel's identity window by aliasing the kernel's level-0
//! slot 0, so exception entry always resolves kernel code and data no
//! matter which process tree is live in TTBR0.
//!
//! Ownership of physical memory is split in two:
//! - page-table pages are owned by the tree and reclaimed by [`AddressSpace::destroy`];
//! - mapped data frames are owned by the process's memory-region ledger and
//!   reclaimed at process reap.
//!
//! The split is what lets the same data frame appear transiently in more
//! than one mapping during process setup.

use mlk_arch::mmu::{self, PageTable, VirtAddrParts, flags};
use mlk_common::{PhysAddr, VirtAddr};
use mlk_common::memory::page;

use super::{asid, frame, layout};

/// Errors from mapping operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Out of frames for an intermediate table or the root.
    NoMemory,
    /// Address not page-aligned.
    NotAligned,
    /// The leaf descriptor is already populated.
    AlreadyMapped,
    /// The virtual address is outside the user-mappable range.
    OutOfRange,
    /// No ASID available.
    NoAsid,
}

/// Borrow a page table through the kernel identity window.
///
/// # Safety
///
/// `phys` must be a live, exclusively-owned table page.
unsafe fn table_mut(phys: u64) -> &'static mut PageTable {
    // SAFETY: Caller guarantees the table page; RAM is identity-mapped.
    unsafe { &mut *(phys as *mut PageTable) }
}

/// A per-process virtual address space: root table + ASID.
pub struct AddressSpace {
    root: PhysAddr,
    asid: u16,
}

impl AddressSpace {
    /// Create a new address space with the kernel window aliased in.
    pub fn new() -> Result<Self, MapError> {
        let asid = asid::allocate_asid().ok_or(MapError::NoAsid)?;
        let Some(root) = frame::alloc_frame_zeroed() else {
            asid::free_asid(asid);
            return Err(MapError::NoMemory);
        };

        // Alias the kernel's L0 slot 0 so kernel code, data and devices
        // resolve identically under this tree. destroy() skips slot 0 for
        // the same reason.
        // SAFETY: root was just allocated and zeroed.
        let root_table = unsafe { table_mut(root.as_u64()) };
        root_table.set(0, super::kernel_l0_slot0());

        Ok(Self { root, asid })
    }

    /// Physical address of the level-0 table.
    #[must_use]
    pub fn root(&self) -> PhysAddr {
        self.root
    }

    /// This address space's ASID.
    #[must_use]
    pub fn asid(&self) -> u16 {
        self.asid
    }

    /// The value to load into TTBR0 while a thread of this process runs.
    #[must_use]
    pub fn ttbr0_value(&self) -> u64 {
        mmu::ttbr_value(self.root.as_u64(), self.asid)
    }

    /// Walk to the level-3 table covering `virt`, allocating intermediate
    /// tables on demand.
    fn walk_alloc(&mut self, parts: VirtAddrParts) -> Result<&'static mut PageTable, MapError> {
        // SAFETY: root is a live table page owned by this address space.
        let mut table = unsafe { table_mut(self.root.as_u64()) };

        for index in [parts.l0, parts.l1, parts.l2] {
            if !table.is_valid(index) {
                let next = frame::alloc_frame_zeroed().ok_or(MapError::NoMemory)?;
                table.set(index, next.as_u64() | flags::TABLE_DESC);
            }
            let next_phys = table.address(index);
            // SAFETY: The descriptor was written by this walk (or a prior
            // one) and points at a table page owned by this tree.
            table = unsafe { table_mut(next_phys) };
        }

        Ok(table)
    }

    /// Map a single page.
    ///
    /// TLB invalidation is the caller's responsibility at bulk boundaries;
    /// fresh mappings need none because the translation was previously
    /// invalid.
    pub fn map(&mut self, virt: VirtAddr, phys: PhysAddr, page_flags: u64) -> Result<(), MapError> {
        if !virt.is_page_aligned() || !phys.is_page_aligned() {
            return Err(MapError::NotAligned);
        }
        if !layout::is_user_addr(virt.as_u64()) {
            return Err(MapError::OutOfRange);
        }

        let parts = VirtAddrParts::from_vaddr(virt.as_u64());
        let l3 = self.walk_alloc(parts)?;

        if l3.is_valid(parts.l3) {
            return Err(MapError::AlreadyMapped);
        }
        l3.set(parts.l3, (phys.as_u64() & mmu::PHYS_ADDR_MASK) | page_flags);

        Ok(())
    }

    /// Unmap a single page and invalidate its TLB entry.
    ///
    /// Intermediate tables are not reclaimed here; they fall with the
    /// address space.
    pub fn unmap(&mut self, virt: VirtAddr) -> Result<(), MapError> {
        if !virt.is_page_aligned() {
            return Err(MapError::NotAligned);
        }
        if !layout::is_user_addr(virt.as_u64()) {
            return Err(MapError::OutOfRange);
        }

        let parts = VirtAddrParts::from_vaddr(virt.as_u64());
        // SAFETY: root is live.
        let mut table = unsafe { table_mut(self.root.as_u64()) };
        for index in [parts.l0, parts.l1, parts.l2] {
            if !table.is_table(index) {
                return Ok(()); // nothing mapped here
            }
            // SAFETY: Valid table descriptor within this tree.
            table = unsafe { table_mut(table.address(index)) };
        }

        table.set(parts.l3, 0);
        mmu::invalidate_tlb_vaddr(virt.as_u64());

        Ok(())
    }

    /// Translate a user virtual address through this tree.
    #[must_use]
    pub fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        if !layout::is_user_addr(virt.as_u64()) {
            return None;
        }

        let parts = VirtAddrParts::from_vaddr(virt.as_u64());
        // SAFETY: root is live.
        let mut table = unsafe { table_mut(self.root.as_u64()) };
        for index in [parts.l0, parts.l1, parts.l2] {
            if !table.is_table(index) {
                return None;
            }
            // SAFETY: Valid table descriptor within this tree.
            table = unsafe { table_mut(table.address(index)) };
        }

        if !table.is_valid(parts.l3) {
            return None;
        }
        Some(PhysAddr::new(table.address(parts.l3) | parts.offset as u64))
    }

    /// Tear down the tree: free every page-table page, the root, and the
    /// ASID. Leaf data frames are deliberately left alone — the process
    /// memory-region ledger owns them.
    pub fn destroy(self) {
        // SAFETY: root is live until the end of this function.
        let root_table = unsafe { table_mut(self.root.as_u64()) };

        // Slot 0 aliases the shared kernel subtree; never walk into it.
        for l0_idx in 1..mmu::ENTRIES_PER_TABLE {
            if !root_table.is_table(l0_idx) {
                continue;
            }
            let l1_phys = root_table.address(l0_idx);
            // SAFETY: table pages in slots 1.. are exclusively owned here.
            let l1 = unsafe { table_mut(l1_phys) };
            for l1_idx in 0..mmu::ENTRIES_PER_TABLE {
                if !l1.is_table(l1_idx) {
                    continue;
                }
                let l2_phys = l1.address(l1_idx);
                // SAFETY: As above.
                let l2 = unsafe { table_mut(l2_phys) };
                for l2_idx in 0..mmu::ENTRIES_PER_TABLE {
                    if l2.is_table(l2_idx) {
                        // Level-3 tables hold only leaf descriptors; free
                        // the table page, not the frames it points at.
                        frame::free_frame(PhysAddr::new(l2.address(l2_idx)));
                    }
                }
                frame::free_frame(PhysAddr::new(l2_phys));
            }
            frame::free_frame(PhysAddr::new(l1_phys));
        }

        frame::free_frame(self.root);
        mmu::invalidate_tlb_asid(self.asid);
        asid::free_asid(self.asid);
    }

    /// Copy bytes out of this address space into a kernel buffer.
    ///
    /// Walks the tree page by page; unmapped source pages fail the whole
    /// copy rather than faulting in kernel mode.
    pub fn copy_from_user(&self, src: VirtAddr, dst: &mut [u8]) -> Result<(), MapError> {
        let mut copied = 0;
        while copied < dst.len() {
            let va = src.as_u64() + copied as u64;
            let phys = self
                .translate(VirtAddr::new(va))
                .ok_or(MapError::OutOfRange)?;
            let in_page = page::SIZE - (va as usize & (page::SIZE - 1));
            let chunk = in_page.min(dst.len() - copied);
            // SAFETY: translate() proved the page is mapped; RAM and device
            // windows are identity-accessible to the kernel.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    phys.as_u64() as *const u8,
                    dst[copied..].as_mut_ptr(),
                    chunk,
                );
            }
            copied += chunk;
        }
        Ok(())
    }

    /// Copy a kernel buffer into this address space.
    pub fn copy_to_user(&self, dst: VirtAddr, src: &[u8]) -> Result<(), MapError> {
        let mut copied = 0;
        while copied < src.len() {
            let va = dst.as_u64() + copied as u64;
            let phys = self
                .translate(VirtAddr::new(va))
                .ok_or(MapError::OutOfRange)?;
            let in_page = page::SIZE - (va as usize & (page::SIZE - 1));
            let chunk = in_page.min(src.len() - copied);
            // SAFETY: translate() proved the page is mapped.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    src[copied..].as_ptr(),
                    phys.as_u64() as *mut u8,
                    chunk,
                );
            }
            copied += chunk;
        }
        Ok(())
    }
}
