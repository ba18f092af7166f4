//! Process loader
//!
//! Builds a user process from an embedded MLK image: validates the header,
//! copies the code into fresh frames mapped at the fixed user code base,
//! maps the user stack, allocates a physically-contiguous kernel stack,
//! and hands the whole assembly to the scheduler in one transactional
//! insert.
//!
//! Failure anywhere unwinds every allocation already made; a
//! partially-constructed process is never reachable.

pub mod registry;

use mlk_abi::{SysError, image};
use mlk_arch::cpu;
use mlk_arch::mmu::flags;
use mlk_common::memory::{page, pages_for};
use mlk_common::{PhysAddr, VirtAddr};

use crate::memory::{AddressSpace, frame, layout};
use crate::sched::{self, NewProcess, Priority};

/// Spawn a new process from an embedded binary.
///
/// Returns the new pid. Any allocation failure unwinds all partial
/// allocations before returning; nothing half-built survives.
pub fn spawn(binary_id: u32, priority: Priority, parent: Option<u32>) -> Result<u32, SysError> {
    let data = registry::image(binary_id).ok_or(SysError::NotFound)?;
    let (header, code) = image::parse(data).map_err(|e| {
        log::warn!("Rejected binary {}: {:?}", binary_id, e);
        SysError::InvalidArgument
    })?;

    let code_pages = pages_for(code.len());

    let mut aspace = AddressSpace::new().map_err(|_| SysError::NoMemory)?;

    // Code image: copy into fresh frames, then map executable at the fixed
    // code base. The frames are identity-reachable for the copy.
    let Some(code_phys) = frame::alloc_frames_zeroed(code_pages) else {
        aspace.destroy();
        return Err(SysError::NoMemory);
    };
    // SAFETY: The frames were just allocated and are exclusively ours.
    unsafe {
        core::ptr::copy_nonoverlapping(
            code.as_ptr(),
            code_phys.as_u64() as *mut u8,
            code.len(),
        );
    }
    // The data cache holds the freshly written instructions; make sure
    // instruction fetch sees them.
    cpu::dsb_sy();
    cpu::invalidate_icache();

    let mut mapped_ok = true;
    for i in 0..code_pages {
        let virt = VirtAddr::new(layout::USER_CODE_BASE + (i * page::SIZE) as u64);
        let phys = PhysAddr::new(code_phys.as_u64() + (i * page::SIZE) as u64);
        if aspace.map(virt, phys, flags::USER_RWX).is_err() {
            mapped_ok = false;
            break;
        }
    }
    if !mapped_ok {
        frame::free_frames(code_phys, code_pages);
        aspace.destroy();
        return Err(SysError::NoMemory);
    }

    // User stack, mapped below the fixed stack top.
    let Some(stack_phys) = frame::alloc_frames_zeroed(layout::USER_STACK_PAGES) else {
        frame::free_frames(code_phys, code_pages);
        aspace.destroy();
        return Err(SysError::NoMemory);
    };
    for i in 0..layout::USER_STACK_PAGES {
        let virt = VirtAddr::new(layout::USER_STACK_BASE + (i * page::SIZE) as u64);
        let phys = PhysAddr::new(stack_phys.as_u64() + (i * page::SIZE) as u64);
        if aspace.map(virt, phys, flags::USER_RW).is_err() {
            mapped_ok = false;
            break;
        }
    }
    if !mapped_ok {
        frame::free_frames(stack_phys, layout::USER_STACK_PAGES);
        frame::free_frames(code_phys, code_pages);
        aspace.destroy();
        return Err(SysError::NoMemory);
    }

    // Kernel (exception) stack: physically contiguous, identity-reachable,
    // never mapped into the user tree.
    let Some(kstack_phys) = frame::alloc_frames_zeroed(layout::KERNEL_STACK_PAGES) else {
        frame::free_frames(stack_phys, layout::USER_STACK_PAGES);
        frame::free_frames(code_phys, code_pages);
        aspace.destroy();
        return Err(SysError::NoMemory);
    };

    let entry = layout::USER_CODE_BASE + header.entry_offset as u64;
    let new = NewProcess {
        aspace,
        parent,
        priority,
        entry,
        user_sp: layout::USER_STACK_TOP,
        kstack_base: kstack_phys.as_u64(),
        kstack_pages: layout::KERNEL_STACK_PAGES,
        regions: [
            (code_phys.as_u64(), code_pages),
            (stack_phys.as_u64(), layout::USER_STACK_PAGES),
            (kstack_phys.as_u64(), layout::KERNEL_STACK_PAGES),
        ],
    };

    match sched::install_process(new) {
        Ok(pid) => {
            log::info!(
                "Spawned {} as pid {} ({} code pages, entry {:#x})",
                registry::name(binary_id),
                pid,
                code_pages,
                entry
            );
            Ok(pid)
        }
        Err(rejected) => {
            rejected.aspace.destroy();
            frame::free_frames(kstack_phys, layout::KERNEL_STACK_PAGES);
            frame::free_frames(stack_phys, layout::USER_STACK_PAGES);
            frame::free_frames(code_phys, code_pages);
            Err(SysError::NoMemory)
        }
    }
}
