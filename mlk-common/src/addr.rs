//! Physical and Virtual Address Types
//!
//! Simple address newtypes used throughout the kernel. Only the frame
//! allocator produces [`PhysAddr`]s and only the MMU code maps a
//! [`VirtAddr`] onto one, so keeping them as distinct types catches the
//! usual class of "passed the wrong kind of address" bugs at compile time.
//!
//! Both are intentionally thin `#[repr(transparent)]` wrappers around `u64`:
//! zero runtime overhead and safe to carry across the syscall ABI.

use core::fmt;

use crate::memory::page;

/// Physical memory address (as seen by the MMU walk output).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

/// Virtual memory address (as used by CPU loads/stores/fetches).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(pub u64);

impl PhysAddr {
    /// The canonical "no frame" value. Physical address zero is outside
    /// usable RAM on every platform this kernel targets, so it doubles as
    /// the allocation-failure sentinel on the syscall ABI.
    pub const NULL: Self = Self(0);

    /// Create a new physical address.
    #[inline]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if this address is null (zero).
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Check if this address is page-aligned (4 KB).
    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (page::SIZE as u64 - 1) == 0
    }

    /// Align this address down to a page boundary.
    #[inline]
    #[must_use]
    pub const fn page_align_down(self) -> Self {
        Self(self.0 & !(page::SIZE as u64 - 1))
    }

    /// Align this address up to a page boundary.
    #[inline]
    #[must_use]
    pub const fn page_align_up(self) -> Self {
        Self((self.0 + page::SIZE as u64 - 1) & !(page::SIZE as u64 - 1))
    }

    /// Add a byte offset to this address.
    #[inline]
    #[must_use]
    pub const fn offset(self, offset: u64) -> Self {
        Self(self.0.wrapping_add(offset))
    }

    /// Frame number containing this address.
    #[inline]
    #[must_use]
    pub const fn frame_index(self) -> usize {
        (self.0 as usize) / page::SIZE
    }
}

impl VirtAddr {
    /// Create a new virtual address.
    #[inline]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if this address is null (zero).
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Check if this address is page-aligned (4 KB).
    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (page::SIZE as u64 - 1) == 0
    }

    /// Align this address down to a page boundary.
    #[inline]
    #[must_use]
    pub const fn page_align_down(self) -> Self {
        Self(self.0 & !(page::SIZE as u64 - 1))
    }

    /// Add a byte offset to this address.
    #[inline]
    #[must_use]
    pub const fn offset(self, offset: u64) -> Self {
        Self(self.0.wrapping_add(offset))
    }

    /// Convert to a raw pointer.
    ///
    /// # Safety
    ///
    /// Dereferencing requires the address to be mapped and aligned for `T`.
    #[inline]
    #[must_use]
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// Convert to a mutable raw pointer.
    ///
    /// # Safety
    ///
    /// Dereferencing requires the address to be mapped and aligned for `T`.
    #[inline]
    #[must_use]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

// -- Formatting implementations

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#018x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA:{:#018x}", self.0)
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#018x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA:{:#018x}", self.0)
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

// -- Conversion implementations

impl From<u64> for PhysAddr {
    #[inline]
    fn from(addr: u64) -> Self {
        Self(addr)
    }
}

impl From<PhysAddr> for u64 {
    #[inline]
    fn from(addr: PhysAddr) -> Self {
        addr.0
    }
}

impl From<u64> for VirtAddr {
    #[inline]
    fn from(addr: u64) -> Self {
        Self(addr)
    }
}

impl From<VirtAddr> for u64 {
    #[inline]
    fn from(addr: VirtAddr) -> Self {
        addr.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_alignment() {
        let a = PhysAddr::new(0x4000_1234);
        assert!(!a.is_page_aligned());
        assert_eq!(a.page_align_down(), PhysAddr::new(0x4000_1000));
        assert_eq!(a.page_align_up(), PhysAddr::new(0x4000_2000));
        assert!(PhysAddr::new(0x4000_2000).is_page_aligned());
    }

    #[test]
    fn test_null_sentinel() {
        assert!(PhysAddr::NULL.is_null());
        assert!(!PhysAddr::new(0x1000).is_null());
    }

    #[test]
    fn test_frame_index() {
        assert_eq!(PhysAddr::new(0x4000_0000).frame_index(), 0x4_0000);
        assert_eq!(PhysAddr::new(0x4000_0FFF).frame_index(), 0x4_0000);
        assert_eq!(PhysAddr::new(0x4000_1000).frame_index(), 0x4_0001);
    }
}
