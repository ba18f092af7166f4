//! ASID (Address Space Identifier) pool
//!
//! Bitmap allocator over ASIDs 1..=255. ASID 0 is reserved for the kernel's
//! own translation regime. Address-space destroy frees its ASID eagerly, so
//! no generation/rollover machinery is needed: an ASID is only ever reused
//! after every TLB entry tagged with it has been invalidated.

use mlk_arch::IrqSpinMutex;

/// Highest usable ASID (conservative 8-bit, valid on all ARMv8 cores).
pub const MAX_ASID: u16 = 255;

/// ASID reserved for the kernel.
pub const KERNEL_ASID: u16 = 0;

/// Bitmap pool over ASIDs `1..=MAX_ASID`.
pub struct AsidPool {
    /// One bit per ASID, bit set = allocated. Bit 0 (the kernel ASID) is
    /// permanently set.
    bitmap: [u64; (MAX_ASID as usize + 1).div_ceil(64)],
    /// Number of ASIDs handed out.
    allocated: u16,
}

impl AsidPool {
    /// Create a pool with every user ASID free.
    #[must_use]
    pub const fn new() -> Self {
        let mut bitmap = [0u64; (MAX_ASID as usize + 1).div_ceil(64)];
        bitmap[0] = 1; // kernel ASID
        Self {
            bitmap,
            allocated: 0,
        }
    }

    /// Allocate the lowest free ASID, or `None` when the pool is exhausted.
    #[must_use]
    pub fn alloc(&mut self) -> Option<u16> {
        for (word_idx, word) in self.bitmap.iter_mut().enumerate() {
            if *word != !0 {
                let bit = word.trailing_ones() as usize;
                let asid = (word_idx * 64 + bit) as u16;
                if asid > MAX_ASID {
                    break;
                }
                *word |= 1 << bit;
                self.allocated += 1;
                return Some(asid);
            }
        }
        None
    }

    /// Free an ASID. Idempotent; the kernel ASID is never released.
    pub fn free(&mut self, asid: u16) {
        if asid == KERNEL_ASID || asid > MAX_ASID {
            return;
        }
        let (word, bit) = ((asid / 64) as usize, asid % 64);
        if self.bitmap[word] & (1 << bit) != 0 {
            self.bitmap[word] &= !(1 << bit);
            self.allocated -= 1;
        }
    }

    /// Number of ASIDs currently handed out.
    #[must_use]
    pub fn allocated(&self) -> u16 {
        self.allocated
    }
}

impl Default for AsidPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Global ASID pool.
static ASID_POOL: IrqSpinMutex<AsidPool> = IrqSpinMutex::new(AsidPool::new());

/// Allocate an ASID for a new address space.
#[must_use]
pub fn allocate_asid() -> Option<u16> {
    ASID_POOL.lock().alloc()
}

/// Return an ASID to the pool.
///
/// The caller must have invalidated all TLB entries tagged with it first.
pub fn free_asid(asid: u16) {
    ASID_POOL.lock().free(asid);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_asid_never_allocated() {
        let mut pool = AsidPool::new();
        for _ in 0..MAX_ASID {
            let asid = pool.alloc().unwrap();
            assert_ne!(asid, KERNEL_ASID);
        }
        assert_eq!(pool.alloc(), None);
    }

    #[test]
    fn test_alloc_free_reuse() {
        let mut pool = AsidPool::new();
        let a = pool.alloc().unwrap();
        assert_eq!(a, 1);
        let b = pool.alloc().unwrap();
        assert_eq!(b, 2);
        pool.free(a);
        assert_eq!(pool.alloc(), Some(1));
    }

    #[test]
    fn test_free_is_idempotent() {
        let mut pool = AsidPool::new();
        let a = pool.alloc().unwrap();
        pool.free(a);
        pool.free(a);
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_exhaustion_then_recovery() {
        let mut pool = AsidPool::new();
        while pool.alloc().is_some() {}
        assert_eq!(pool.allocated(), MAX_ASID);
        pool.free(42);
        assert_eq!(pool.alloc(), Some(42));
    }
}
