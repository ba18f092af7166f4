//! Physical Frame Allocator
//!
//! Bitmap-based allocator over the usable RAM window. One bit per 4 KB
//! frame, 0 = free. Single frames use first-fit; contiguous runs use a
//! first-fit scan with a search hint.
//!
//! Callers are the scheduler and the MMU-backed syscalls only; interrupt
//! handlers never allocate.

use mlk_arch::IrqSpinMutex;
use mlk_common::PhysAddr;
use mlk_common::memory::page;
use mlk_pal::platform;

// -- Frame Allocator Errors

/// Errors from frame-range operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAllocError {
    /// Requested frame range is outside the managed window.
    OutOfBounds,
    /// Zero-count operation requested.
    ZeroCount,
}

// -- Physical Frame Allocator

/// Bitmap frame allocator.
///
/// # Invariants
///
/// - `free_frames` always equals the number of zero bits within
///   `[0, total_frames)`.
/// - `bitmap.len() * 64 >= total_frames`.
pub struct FrameAllocator {
    /// Allocation bitmap (1 = allocated, 0 = free).
    bitmap: &'static mut [u64],
    /// Number of frames managed.
    total_frames: usize,
    /// Number of free frames.
    free_frames: usize,
    /// First frame number managed.
    first_frame: usize,
    /// Where the next allocation scan starts.
    search_hint: usize,
}

impl FrameAllocator {
    const BITS_PER_ENTRY: usize = 64;

    /// Create a new allocator with every frame initially allocated; the
    /// caller frees the usable range afterwards.
    ///
    /// # Safety
    ///
    /// The bitmap memory must outlive the allocator and not be touched by
    /// anything else.
    ///
    /// # Panics
    ///
    /// Panics if the bitmap is too small for `total_frames`.
    pub unsafe fn new(
        bitmap: &'static mut [u64],
        first_frame: usize,
        total_frames: usize,
    ) -> Self {
        let required = total_frames.div_ceil(Self::BITS_PER_ENTRY);
        assert!(
            bitmap.len() >= required,
            "bitmap too small: need {} entries for {} frames, got {}",
            required,
            total_frames,
            bitmap.len()
        );

        for entry in bitmap.iter_mut() {
            *entry = !0;
        }

        Self {
            bitmap,
            total_frames,
            free_frames: 0,
            first_frame,
            search_hint: 0,
        }
    }

    #[inline]
    fn bitmap_pos(relative: usize) -> (usize, usize) {
        (relative / Self::BITS_PER_ENTRY, relative % Self::BITS_PER_ENTRY)
    }

    #[inline]
    fn is_frame_free(&self, relative: usize) -> bool {
        let (entry, bit) = Self::bitmap_pos(relative);
        (self.bitmap[entry] >> bit) & 1 == 0
    }

    fn check_range(&self, start_frame: usize, count: usize) -> Result<usize, FrameAllocError> {
        if count == 0 {
            return Err(FrameAllocError::ZeroCount);
        }
        if start_frame < self.first_frame {
            return Err(FrameAllocError::OutOfBounds);
        }
        let relative = start_frame - self.first_frame;
        if relative + count > self.total_frames {
            return Err(FrameAllocError::OutOfBounds);
        }
        Ok(relative)
    }

    /// Mark a range of frames free.
    ///
    /// Idempotent: frames that are already free are skipped. Returns the
    /// number of frames actually freed.
    pub fn free_range(&mut self, start_frame: usize, count: usize) -> Result<usize, FrameAllocError> {
        let relative_start = self.check_range(start_frame, count)?;

        let mut freed = 0;
        for relative in relative_start..relative_start + count {
            let (entry, bit) = Self::bitmap_pos(relative);
            if (self.bitmap[entry] >> bit) & 1 == 1 {
                self.bitmap[entry] &= !(1 << bit);
                freed += 1;
            }
        }
        self.free_frames += freed;

        if relative_start < self.search_hint {
            self.search_hint = relative_start;
        }

        Ok(freed)
    }

    /// Mark a range of frames allocated. Returns the number of frames that
    /// were free before the call.
    pub fn mark_allocated(
        &mut self,
        start_frame: usize,
        count: usize,
    ) -> Result<usize, FrameAllocError> {
        let relative_start = self.check_range(start_frame, count)?;

        let mut marked = 0;
        for relative in relative_start..relative_start + count {
            let (entry, bit) = Self::bitmap_pos(relative);
            if (self.bitmap[entry] >> bit) & 1 == 0 {
                self.bitmap[entry] |= 1 << bit;
                marked += 1;
            }
        }

        assert!(
            self.free_frames >= marked,
            "free_frames accounting error: {} < {}",
            self.free_frames,
            marked
        );
        self.free_frames -= marked;

        Ok(marked)
    }

    /// Allocate a single frame. The frame contains stale data.
    #[must_use]
    pub fn alloc(&mut self) -> Option<usize> {
        self.alloc_contiguous(1)
    }

    /// Allocate `count` contiguous frames, first-fit from the search hint.
    ///
    /// Returns the absolute frame number of the first frame, or `None` —
    /// never a partial allocation.
    #[must_use]
    pub fn alloc_contiguous(&mut self, count: usize) -> Option<usize> {
        if count == 0 || self.free_frames < count {
            return None;
        }

        let found = self
            .find_run(self.search_hint, self.total_frames, count)
            .or_else(|| self.find_run(0, self.search_hint, count));

        let relative_start = found?;
        let abs_start = self.first_frame + relative_start;
        self.mark_allocated(abs_start, count)
            .expect("validated range failed to mark");

        self.search_hint = relative_start + count;
        if self.search_hint >= self.total_frames {
            self.search_hint = 0;
        }

        Some(abs_start)
    }

    /// Find a run of `count` free frames in `[start, end)`.
    fn find_run(&self, start: usize, end: usize, count: usize) -> Option<usize> {
        if start >= end || count == 0 {
            return None;
        }

        let mut run_start = start;
        let mut run_length = 0;
        let mut frame = start;

        while frame < end {
            let (entry_idx, _) = Self::bitmap_pos(frame);

            // Skip fully-allocated words.
            if entry_idx < self.bitmap.len() && self.bitmap[entry_idx] == !0 {
                frame = ((entry_idx + 1) * Self::BITS_PER_ENTRY).min(end);
                run_length = 0;
                continue;
            }

            if self.is_frame_free(frame) {
                if run_length == 0 {
                    run_start = frame;
                }
                run_length += 1;
                if run_length >= count {
                    return Some(run_start);
                }
            } else {
                run_length = 0;
            }

            frame += 1;
        }

        None
    }

    /// Free a single frame.
    ///
    /// # Panics
    ///
    /// Panics if the frame is outside the managed window.
    pub fn free(&mut self, frame: usize) {
        self.free_range(frame, 1)
            .expect("freed frame out of bounds");
    }

    /// Number of free frames.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free_frames
    }

    /// Number of managed frames.
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.total_frames
    }

    /// Recount free bits and compare to `free_frames`. O(n); debug only.
    #[cfg(any(test, debug_assertions))]
    pub fn verify_invariants(&self) -> bool {
        let mut actual_free = 0;
        for frame in 0..self.total_frames {
            if self.is_frame_free(frame) {
                actual_free += 1;
            }
        }
        actual_free == self.free_frames
    }
}

// -- Global Frame Allocator

/// Number of bitmap words needed to cover managed RAM.
const BITMAP_WORDS: usize = (platform::RAM_SIZE as usize / page::SIZE).div_ceil(64);

/// Static storage for the allocation bitmap.
static mut BITMAP_STORAGE: [u64; BITMAP_WORDS] = [0; BITMAP_WORDS];

/// Global frame allocator instance.
static FRAME_ALLOCATOR: IrqSpinMutex<Option<FrameAllocator>> = IrqSpinMutex::new(None);

/// Initialise the frame allocator over the RAM window above the kernel
/// reservation.
///
/// # Safety
///
/// Must be called exactly once, before any allocation.
pub(super) unsafe fn init() {
    let managed_base = platform::RAM_BASE + platform::KERNEL_RESERVED;
    let first_frame = (managed_base as usize) / page::SIZE;
    let total_frames = ((platform::RAM_END - managed_base) as usize) / page::SIZE;

    // SAFETY: BITMAP_STORAGE is only ever referenced here, once.
    let bitmap = unsafe { &mut *core::ptr::addr_of_mut!(BITMAP_STORAGE) };

    // SAFETY: Single init, exclusive bitmap.
    let mut allocator = unsafe { FrameAllocator::new(bitmap, first_frame, total_frames) };
    allocator
        .free_range(first_frame, total_frames)
        .expect("failed to release managed RAM");

    log::info!(
        "Frame allocator: {:#x}..{:#x} ({} frames, {} MB free)",
        managed_base,
        platform::RAM_END,
        total_frames,
        (total_frames * page::SIZE) / (1024 * 1024)
    );

    let mut guard = FRAME_ALLOCATOR.lock();
    assert!(guard.is_none(), "frame allocator initialised twice");
    *guard = Some(allocator);
}

/// Allocate a physical frame. The frame contains stale data.
#[must_use]
pub fn alloc_frame() -> Option<PhysAddr> {
    alloc_frames(1)
}

/// Allocate a physical frame and zero it.
#[must_use]
pub fn alloc_frame_zeroed() -> Option<PhysAddr> {
    alloc_frames_zeroed(1)
}

/// Allocate `count` contiguous physical frames. Stale data.
#[must_use]
pub fn alloc_frames(count: usize) -> Option<PhysAddr> {
    let mut guard = FRAME_ALLOCATOR.lock();
    guard
        .as_mut()
        .and_then(|alloc| alloc.alloc_contiguous(count))
        .map(|frame| PhysAddr::new((frame * page::SIZE) as u64))
}

/// Allocate `count` contiguous physical frames, zeroed through the kernel
/// identity window.
#[must_use]
pub fn alloc_frames_zeroed(count: usize) -> Option<PhysAddr> {
    let phys = alloc_frames(count)?;
    // SAFETY: Freshly allocated frames are exclusively ours and the whole
    // RAM window is identity-mapped for the kernel.
    unsafe {
        core::ptr::write_bytes(phys.as_u64() as *mut u8, 0, count * page::SIZE);
    }
    Some(phys)
}

/// Free a single physical frame.
pub fn free_frame(phys: PhysAddr) {
    free_frames(phys, 1);
}

/// Free `count` consecutive physical frames starting at `phys`.
pub fn free_frames(phys: PhysAddr, count: usize) {
    let mut guard = FRAME_ALLOCATOR.lock();
    if let Some(alloc) = guard.as_mut() {
        alloc
            .free_range(phys.frame_index(), count)
            .expect("freed range out of bounds");
    }
}

/// Number of free frames.
#[must_use]
pub fn free_count() -> usize {
    let guard = FRAME_ALLOCATOR.lock();
    guard.as_ref().map_or(0, |alloc| alloc.free_count())
}

#[cfg(test)]
mod tests {
    extern crate alloc;

    use super::*;

    fn make_allocator(frames: usize) -> FrameAllocator {
        let words = frames.div_ceil(64);
        let bitmap = alloc::vec![0u64; words].leak();
        // SAFETY: Leaked storage is exclusively owned by the allocator.
        let mut a = unsafe { FrameAllocator::new(bitmap, 0x100, frames) };
        a.free_range(0x100, frames).unwrap();
        a
    }

    #[test]
    fn test_alloc_free_round_trip() {
        let mut a = make_allocator(64);
        let before = a.free_count();
        let frame = a.alloc().unwrap();
        assert_eq!(a.free_count(), before - 1);
        a.free(frame);
        assert_eq!(a.free_count(), before);
        assert!(a.verify_invariants());
    }

    #[test]
    fn test_contiguous_exact_fit() {
        let mut a = make_allocator(16);
        // Carve the window into a run of exactly 8 by pinning both ends.
        a.mark_allocated(0x100, 4).unwrap();
        a.mark_allocated(0x100 + 12, 4).unwrap();
        assert_eq!(a.free_count(), 8);

        // A 9-frame request must fail without partial allocation.
        assert_eq!(a.alloc_contiguous(9), None);
        assert_eq!(a.free_count(), 8);

        // Exactly 8 succeeds.
        let start = a.alloc_contiguous(8).unwrap();
        assert_eq!(start, 0x104);
        assert_eq!(a.free_count(), 0);
        assert!(a.verify_invariants());
    }

    #[test]
    fn test_zero_count_invalid() {
        let mut a = make_allocator(8);
        assert_eq!(a.alloc_contiguous(0), None);
        assert_eq!(a.free_range(0x100, 0), Err(FrameAllocError::ZeroCount));
    }

    #[test]
    fn test_over_capacity_fails_cleanly() {
        let mut a = make_allocator(8);
        let free = a.free_count();
        assert_eq!(a.alloc_contiguous(9), None);
        assert_eq!(a.free_count(), free);
    }

    #[test]
    fn test_free_is_idempotent() {
        let mut a = make_allocator(8);
        let frame = a.alloc().unwrap();
        assert_eq!(a.free_range(frame, 1).unwrap(), 1);
        assert_eq!(a.free_range(frame, 1).unwrap(), 0);
        assert!(a.verify_invariants());
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mut a = make_allocator(8);
        assert_eq!(a.free_range(0x0, 1), Err(FrameAllocError::OutOfBounds));
        assert_eq!(a.free_range(0x100 + 7, 2), Err(FrameAllocError::OutOfBounds));
    }

    #[test]
    fn test_hint_wraps_around() {
        let mut a = make_allocator(8);
        // Consume everything, free the first frame, and check the scan
        // wraps back to find it.
        for _ in 0..8 {
            a.alloc().unwrap();
        }
        a.free(0x100);
        assert_eq!(a.alloc(), Some(0x100));
    }
}
