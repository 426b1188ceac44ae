//! Physical and Virtual Address Types
//!
//! Type-safe wrappers for 32-bit memory addresses that prevent mixing
//! physical and virtual addresses at compile time, plus the frame-typed
//! handles used by the allocator and the page-table code.
//!
//! # Layout
//! ```text
//! 0x0000_0000 ┌──────────────────────────────┐
//!             │ low memory + kernel image    │
//! pmm start   ├──────────────────────────────┤
//!             │ identity window (4 MiB)      │  bump-allocated frames
//!             ├──────────────────────────────┤
//!             │ ...                          │
//! 0xB000_0000 ├──────────────────────────────┤
//!             │ free-list storage (grows up) │
//! 0xC000_0000 ├──────────────────────────────┤
//!             │ kernel (first 4 MiB of RAM)  │
//! 0xD000_0000 ├──────────────────────────────┤
//!             │ kernel heap                  │
//! 0xFFFF_FFFF └──────────────────────────────┘
//! ```
//!
//! # Invariants
//! - [`Frame`], [`TableFrame`] and [`DirectoryFrame`] always hold a 4 KiB
//!   aligned address; the only way to build one from an arbitrary address
//!   is a fallible constructor.

use core::fmt;

/// Page size (4 KiB)
pub const PAGE_SIZE: u32 = 4096;
/// Page offset mask
pub const PAGE_MASK: u32 = PAGE_SIZE - 1;

/// Number of entries in a page table or page directory.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Kernel virtual address base (higher-half).
pub const KERNEL_VIRT_BASE: u32 = 0xC000_0000;

/// Physical memory mapped at [`KERNEL_VIRT_BASE`] during VMM bring-up.
pub const KERNEL_MAPPING_SIZE: u32 = 0x0040_0000;

/// Size of the identity-mapped window starting at the PMM start location.
pub const IDENTITY_WINDOW_SIZE: u32 = 0x0040_0000;

/// Virtual base of the PMM free-list stack.
pub const FREE_LIST_BASE: u32 = 0xB000_0000;

/// Virtual base of the kernel heap.
pub const KERNEL_HEAP_BASE: u32 = 0xD000_0000;

/// Number of pages mapped for the kernel heap at boot (256 KiB).
pub const KERNEL_HEAP_PAGES: u32 = 64;

/// An address was required to be 4 KiB aligned but was not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("address {addr:#010x} is not 4 KiB aligned")]
pub struct AlignmentError {
    /// The offending address.
    pub addr: u32,
}

/// A physical memory address.
///
/// Physical addresses cannot be dereferenced directly; page tables and
/// free-list storage are reached through a [`PhysMapper`](super::mapper::PhysMapper).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(u32);

impl PhysAddr {
    /// Create a new physical address.
    #[inline]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Get the raw address as usize (for pointer casts).
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Check if the address is page-aligned.
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Align the address down to the nearest page boundary.
    #[inline]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Align the address up to the nearest page boundary.
    ///
    /// Returns `None` if the result does not fit in 32 bits.
    #[inline]
    pub const fn align_up(self) -> Option<Self> {
        match self.0.checked_add(PAGE_MASK) {
            Some(v) => Some(Self(v & !PAGE_MASK)),
            None => None,
        }
    }

    /// Offset within the 4 KiB frame.
    #[inline]
    pub const fn page_offset(self) -> u32 {
        self.0 & PAGE_MASK
    }

    /// Add an offset, returning `None` on overflow.
    #[inline]
    pub const fn checked_add(self, offset: u32) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#010x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A virtual memory address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(u32);

impl VirtAddr {
    /// Create a new virtual address.
    #[inline]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Get the raw address as usize (for pointer casts).
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Check if the address is page-aligned.
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Align the address down to the nearest page boundary.
    #[inline]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Page directory index (bits 31..22).
    #[inline]
    pub const fn directory_index(self) -> usize {
        ((self.0 >> 22) & 0x3FF) as usize
    }

    /// Page table index (bits 21..12).
    #[inline]
    pub const fn table_index(self) -> usize {
        ((self.0 >> 12) & 0x3FF) as usize
    }

    /// Get the page offset (lowest 12 bits).
    #[inline]
    pub const fn page_offset(self) -> u32 {
        self.0 & PAGE_MASK
    }

    /// Add an offset, returning `None` on overflow.
    #[inline]
    pub const fn checked_add(self, offset: u32) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#010x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A 4 KiB aligned physical frame.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Frame(PhysAddr);

impl Frame {
    /// Build a frame from an address, rejecting unaligned input.
    #[inline]
    pub const fn from_addr(addr: PhysAddr) -> Result<Self, AlignmentError> {
        if addr.is_aligned() {
            Ok(Self(addr))
        } else {
            Err(AlignmentError { addr: addr.as_u32() })
        }
    }

    /// The frame that contains `addr`.
    #[inline]
    pub const fn containing(addr: PhysAddr) -> Self {
        Self(addr.align_down())
    }

    /// Base address of the frame.
    #[inline]
    pub const fn addr(self) -> PhysAddr {
        self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:#010x})", self.0.as_u32())
    }
}

/// A frame that holds a [`PageTable`](super::paging::PageTable).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct TableFrame(Frame);

impl TableFrame {
    /// Build from an address, rejecting unaligned input.
    #[inline]
    pub const fn from_addr(addr: PhysAddr) -> Result<Self, AlignmentError> {
        match Frame::from_addr(addr) {
            Ok(frame) => Ok(Self(frame)),
            Err(e) => Err(e),
        }
    }

    /// Claim `frame` as page-table storage.
    #[inline]
    pub const fn new(frame: Frame) -> Self {
        Self(frame)
    }

    /// Base address of the table.
    #[inline]
    pub const fn addr(self) -> PhysAddr {
        self.0.addr()
    }
}

/// A frame that holds a [`PageDirectory`](super::paging::PageDirectory).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct DirectoryFrame(Frame);

impl DirectoryFrame {
    /// Build from an address, rejecting unaligned input.
    #[inline]
    pub const fn from_addr(addr: PhysAddr) -> Result<Self, AlignmentError> {
        match Frame::from_addr(addr) {
            Ok(frame) => Ok(Self(frame)),
            Err(e) => Err(e),
        }
    }

    /// Claim `frame` as page-directory storage.
    #[inline]
    pub const fn new(frame: Frame) -> Self {
        Self(frame)
    }

    /// Base address of the directory.
    #[inline]
    pub const fn addr(self) -> PhysAddr {
        self.0.addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_alignment() {
        let addr = PhysAddr::new(0x4008_1234);
        assert!(!addr.is_aligned());
        assert_eq!(addr.align_down().as_u32(), 0x4008_1000);
        assert_eq!(addr.align_up(), Some(PhysAddr::new(0x4008_2000)));
        assert_eq!(PhysAddr::new(0xFFFF_F001).align_up(), None);
    }

    #[test]
    fn test_directory_and_table_index() {
        let va = VirtAddr::new(0xC040_3123);
        assert_eq!(va.directory_index(), 0x301);
        assert_eq!(va.table_index(), 0x003);
        assert_eq!(va.page_offset(), 0x123);
    }

    #[test]
    fn test_frame_rejects_unaligned() {
        assert_eq!(
            Frame::from_addr(PhysAddr::new(0x1001)),
            Err(AlignmentError { addr: 0x1001 })
        );
        assert!(TableFrame::from_addr(PhysAddr::new(0x2000)).is_ok());
        assert!(DirectoryFrame::from_addr(PhysAddr::new(0x2004)).is_err());
        assert_eq!(
            Frame::containing(PhysAddr::new(0x3FFF)).addr(),
            PhysAddr::new(0x3000)
        );
    }
}
