//! Memory syscalls: MAP_DEVICE, ALLOC_DMA, GET_PHYS
//!
//! The only path by which user drivers gain access to hardware. Device
//! mappings are gated by the platform allowlist; DMA memory is allocated
//! physically contiguous and mapped non-cacheable so drivers and devices
//! agree on the bytes without cache maintenance.

use mlk_abi::{SysError, SysResult};
use mlk_arch::exceptions::TrapFrame;
use mlk_arch::mmu::flags;
use mlk_common::memory::page;
use mlk_common::{PhysAddr, VirtAddr};
use mlk_pal::platform;

use crate::memory::{MapError, frame, layout};
use crate::sched;

/// Largest single DMA allocation, in pages.
const DMA_MAX_PAGES: u64 = 1024;

/// `MAP_DEVICE(phys, size)`: map an allowlisted device window into the
/// caller's address space.
///
/// The range must be page-aligned and fully contained in one allowlist
/// entry. The mapping lands at the fixed per-physical-address device
/// window; the virtual base is returned.
pub fn map_device(phys: u64, size: u64) -> SysResult {
    if phys % page::SIZE as u64 != 0 || size == 0 || size % page::SIZE as u64 != 0 {
        return Err(SysError::InvalidArgument);
    }

    let allowed = platform::MMIO_ALLOWLIST
        .iter()
        .any(|region| region.contains(phys, size));
    if !allowed {
        log::warn!(
            "MAP_DEVICE refused: {:#x}..{:#x} not allowlisted",
            phys,
            phys + size
        );
        return Err(SysError::NoPermission);
    }

    let virt_base = layout::device_map_addr(phys);
    let pages = (size / page::SIZE as u64) as usize;

    let result = sched::with_current_aspace(|aspace| {
        for i in 0..pages {
            let offset = (i * page::SIZE) as u64;
            match aspace.map(
                VirtAddr::new(virt_base + offset),
                PhysAddr::new(phys + offset),
                flags::USER_DEVICE,
            ) {
                Ok(()) => {}
                Err(MapError::AlreadyMapped) => return Err(SysError::AlreadyExists),
                Err(_) => return Err(SysError::NoMemory),
            }
        }
        Ok(())
    })
    .ok_or(SysError::InvalidArgument)?;

    result?;
    Ok(virt_base as i64)
}

/// `ALLOC_DMA(pages)`: allocate physically-contiguous, non-cacheable
/// user memory.
///
/// Returns the virtual base in x0 and the physical base in x1. The range
/// joins the caller's memory-region ledger and is released at reap like
/// any other owned memory.
pub fn alloc_dma(pages: u64, frame_regs: &mut TrapFrame) -> SysResult {
    if pages == 0 || pages > DMA_MAX_PAGES {
        return Err(SysError::InvalidArgument);
    }
    let count = pages as usize;

    let phys = frame::alloc_frames_zeroed(count).ok_or(SysError::NoMemory)?;
    let virt_base = layout::dma_map_addr(phys.as_u64());

    let map_result = sched::with_current_aspace(|aspace| {
        for i in 0..count {
            let offset = (i * page::SIZE) as u64;
            if aspace
                .map(
                    VirtAddr::new(virt_base + offset),
                    PhysAddr::new(phys.as_u64() + offset),
                    flags::USER_DMA,
                )
                .is_err()
            {
                // Unwind the partial mapping before reporting failure.
                for j in 0..i {
                    let _ = aspace.unmap(VirtAddr::new(virt_base + (j * page::SIZE) as u64));
                }
                return Err(SysError::NoMemory);
            }
        }
        Ok(())
    })
    .ok_or(SysError::InvalidArgument)?;

    if let Err(e) = map_result {
        frame::free_frames(phys, count);
        return Err(e);
    }

    if let Err(e) = sched::add_region_to_current(phys.as_u64(), count) {
        let _ = sched::with_current_aspace(|aspace| {
            for i in 0..count {
                let _ = aspace.unmap(VirtAddr::new(virt_base + (i * page::SIZE) as u64));
            }
        });
        frame::free_frames(phys, count);
        return Err(e);
    }

    frame_regs.gpr[1] = phys.as_u64();
    Ok(virt_base as i64)
}

/// `GET_PHYS(virt)`: translate a caller virtual address.
pub fn get_phys(virt: u64) -> SysResult {
    sched::with_current_aspace(|aspace| aspace.translate(VirtAddr::new(virt)))
        .flatten()
        .map(|phys| phys.as_u64() as i64)
        .ok_or(SysError::NotFound)
}
