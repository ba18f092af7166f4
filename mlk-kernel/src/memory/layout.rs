//! User address space layout
//!
//! All user mappings live above the first 512 GB of virtual space: level-0
//! slot 0 of every process tree aliases the kernel's identity window (RAM
//! plus device registers, privileged-only), so the map/unmap paths refuse
//! to touch it.
//!
//! ```text
//! 0x0000_0000_0000_0000 .. 0x0000_0080_0000_0000 : kernel window (L0 slot 0)
//! 0x0000_0080_0000_0000 ..                       : process code image
//! 0x0000_4000_0000_0000 ..                       : MAP_DEVICE mappings
//! 0x0000_6000_0000_0000 ..                       : ALLOC_DMA mappings
//! 0x0000_7FFF_FFEF_0000 .. 0x0000_7FFF_FFF0_0000 : user stack (grows down)
//! 0x0000_8000_0000_0000                          : end of user space
//! ```

use mlk_common::memory::page;

/// First user-mappable virtual address (start of L0 slot 1).
pub const USER_SPACE_BASE: u64 = 0x0000_0080_0000_0000;

/// First byte past user space (end of the lower canonical half).
pub const USER_SPACE_END: u64 = 0x0000_8000_0000_0000;

/// Where process code images are mapped.
pub const USER_CODE_BASE: u64 = USER_SPACE_BASE;

/// Base of the MAP_DEVICE window; a device at physical `p` appears at
/// `USER_DEVICE_BASE + p`.
pub const USER_DEVICE_BASE: u64 = 0x0000_4000_0000_0000;

/// Base of the ALLOC_DMA window; DMA memory at physical `p` appears at
/// `USER_DMA_BASE + p`.
pub const USER_DMA_BASE: u64 = 0x0000_6000_0000_0000;

/// Initial user stack pointer (top of stack, grows down).
pub const USER_STACK_TOP: u64 = 0x0000_7FFF_FFF0_0000;

/// User stack size in pages (64 KB).
pub const USER_STACK_PAGES: usize = 16;

/// Bottom of the user stack mapping.
pub const USER_STACK_BASE: u64 = USER_STACK_TOP - (USER_STACK_PAGES * page::SIZE) as u64;

/// Kernel (exception) stack size per thread, in physically-contiguous pages.
pub const KERNEL_STACK_PAGES: usize = 4;

/// Check if an address is in the user-mappable range.
#[inline]
#[must_use]
pub const fn is_user_addr(addr: u64) -> bool {
    addr >= USER_SPACE_BASE && addr < USER_SPACE_END
}

/// Check if `[start, start+size)` lies entirely in the user-mappable range.
#[inline]
#[must_use]
pub const fn is_user_range(start: u64, size: u64) -> bool {
    if size == 0 {
        return false;
    }
    let end = match start.checked_add(size) {
        Some(e) => e,
        None => return false,
    };
    is_user_addr(start) && end <= USER_SPACE_END
}

/// Virtual address of a MAP_DEVICE mapping for a physical device address.
#[inline]
#[must_use]
pub const fn device_map_addr(phys: u64) -> u64 {
    USER_DEVICE_BASE + phys
}

/// Virtual address of an ALLOC_DMA mapping for a physical frame address.
#[inline]
#[must_use]
pub const fn dma_map_addr(phys: u64) -> u64 {
    USER_DMA_BASE + phys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_range_boundaries() {
        assert!(is_user_addr(USER_SPACE_BASE));
        assert!(!is_user_addr(USER_SPACE_BASE - 1));
        assert!(!is_user_addr(USER_SPACE_END));
        assert!(is_user_addr(USER_STACK_TOP - 1));

        assert!(is_user_range(USER_CODE_BASE, 0x1000));
        assert!(!is_user_range(USER_CODE_BASE, 0));
        assert!(!is_user_range(USER_SPACE_END - 0x800, 0x1000));
        assert!(!is_user_range(u64::MAX - 0x10, 0x1000));
    }

    #[test]
    fn test_stack_layout() {
        assert_eq!(USER_STACK_TOP - USER_STACK_BASE, 64 * 1024);
        assert!(is_user_range(
            USER_STACK_BASE,
            (USER_STACK_PAGES * page::SIZE) as u64
        ));
    }

    #[test]
    fn test_window_separation() {
        // Code, device, DMA and stack windows sit in distinct L0 slots.
        let l0 = |a: u64| (a >> 39) & 0x1FF;
        let slots = [
            l0(USER_CODE_BASE),
            l0(USER_DEVICE_BASE),
            l0(USER_DMA_BASE),
            l0(USER_STACK_TOP - 1),
        ];
        for (i, a) in slots.iter().enumerate() {
            assert_ne!(*a, 0, "user window in kernel L0 slot");
            for b in &slots[i + 1..] {
                assert_ne!(a, b, "user windows share an L0 slot");
            }
        }
    }
}
