//! x86 Two-Level Page Table Management
//!
//! Implements the 32-bit (non-PAE) paging structures.
//!
//! # Page Table Structure (4KB pages)
//! - Page Directory: 1024 entries, each covers 4MB
//! - Page Table: 1024 entries, each covers 4KB
//!
//! ```text
//! | 31‒22      | 21‒12      | 11‒0   |
//! | dir index  | table index| offset |
//! ```
//!
//! Both kinds of entry are 32-bit: the upper 20 bits hold a 4 KiB aligned
//! physical address, the lower 12 bits hold flags.

use core::ops::{Index, IndexMut};

use bitflags::bitflags;

use super::address::{Frame, PhysAddr, TableFrame, VirtAddr, ENTRIES_PER_TABLE};

/// Address bits of an entry (bits 31..12).
pub const ENTRY_FRAME_MASK: u32 = 0xFFFF_F000;

bitflags! {
    /// Flags of a page table entry (PTE).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        /// Page is present in physical memory.
        const PRESENT = 1 << 0;
        /// Page is writable.
        const WRITABLE = 1 << 1;
        /// Page is accessible from ring 3.
        const USER = 1 << 2;
        /// Write-through caching.
        const WRITE_THROUGH = 1 << 3;
        /// Caching disabled.
        const NOT_CACHEABLE = 1 << 4;
        /// Set by the CPU on access.
        const ACCESSED = 1 << 5;
        /// Set by the CPU on write.
        const DIRTY = 1 << 6;
        /// Bits 9..11, free for software use.
        const AVAILABLE = 0b111 << 9;
    }
}

bitflags! {
    /// Flags of a page directory entry (PDE).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PdeFlags: u32 {
        /// Page table is present.
        const PRESENT = 1 << 0;
        /// Writes allowed through this entry.
        const WRITABLE = 1 << 1;
        /// Ring 3 access allowed through this entry.
        const USER = 1 << 2;
        /// Write-through caching for the table.
        const WRITE_THROUGH = 1 << 3;
        /// Caching disabled for the table.
        const NOT_CACHEABLE = 1 << 4;
        /// Set by the CPU on access.
        const ACCESSED = 1 << 5;
        /// Set by the CPU on write (4 MiB pages only).
        const DIRTY = 1 << 6;
        /// Entry maps a 4 MiB page directly (requires CR4.PSE).
        const LARGE_PAGE = 1 << 7;
        /// Bits 9..11, free for software use.
        const AVAILABLE = 0b111 << 9;
    }
}

/// A single page table entry.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    /// Create an empty (not present) entry.
    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Get the raw u32 value.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Get the flags from this entry. Unknown bits are dropped.
    #[inline]
    pub const fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    /// Set `flags` on this entry.
    #[inline]
    pub fn insert(&mut self, flags: PteFlags) {
        self.0 |= flags.bits();
    }

    /// Clear `flags` on this entry.
    #[inline]
    pub fn remove(&mut self, flags: PteFlags) {
        self.0 &= !flags.bits();
    }

    /// Point this entry at the frame containing `addr`.
    ///
    /// The low 12 bits of `addr` are discarded and any previous frame
    /// address is cleared; flags are left untouched.
    #[inline]
    pub fn set_frame(&mut self, addr: PhysAddr) {
        self.0 = (self.0 & !ENTRY_FRAME_MASK) | (addr.as_u32() & ENTRY_FRAME_MASK);
    }

    /// The frame this entry points at.
    #[inline]
    pub const fn frame(self) -> Frame {
        Frame::containing(PhysAddr::new(self.0 & ENTRY_FRAME_MASK))
    }

    /// Check if the entry is present.
    #[inline]
    pub const fn is_present(self) -> bool {
        self.0 & PteFlags::PRESENT.bits() != 0
    }

    /// Check if the entry is writable.
    #[inline]
    pub const fn is_writable(self) -> bool {
        self.0 & PteFlags::WRITABLE.bits() != 0
    }

    /// Clear the entry.
    #[inline]
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_present() {
            write!(f, "PTE(frame={}, flags={:?})", self.frame().addr(), self.flags())
        } else {
            write!(f, "PTE(not present)")
        }
    }
}

/// A single page directory entry.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageDirectoryEntry(u32);

impl PageDirectoryEntry {
    /// Create an empty (not present) entry.
    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Get the raw u32 value.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Get the flags from this entry. Unknown bits are dropped.
    #[inline]
    pub const fn flags(self) -> PdeFlags {
        PdeFlags::from_bits_truncate(self.0)
    }

    /// Set `flags` on this entry.
    #[inline]
    pub fn insert(&mut self, flags: PdeFlags) {
        self.0 |= flags.bits();
    }

    /// Clear `flags` on this entry.
    #[inline]
    pub fn remove(&mut self, flags: PdeFlags) {
        self.0 &= !flags.bits();
    }

    /// Point this entry at the page table containing `addr`.
    ///
    /// Same masking rules as [`PageTableEntry::set_frame`].
    #[inline]
    pub fn set_table_address(&mut self, addr: PhysAddr) {
        self.0 = (self.0 & !ENTRY_FRAME_MASK) | (addr.as_u32() & ENTRY_FRAME_MASK);
    }

    /// The page table this entry points at.
    #[inline]
    pub const fn table(self) -> TableFrame {
        TableFrame::new(Frame::containing(PhysAddr::new(self.0 & ENTRY_FRAME_MASK)))
    }

    /// Check if the entry is present.
    #[inline]
    pub const fn is_present(self) -> bool {
        self.0 & PdeFlags::PRESENT.bits() != 0
    }

    /// Check if the entry is writable.
    #[inline]
    pub const fn is_writable(self) -> bool {
        self.0 & PdeFlags::WRITABLE.bits() != 0
    }

    /// Check if the entry maps a 4 MiB page instead of a table.
    #[inline]
    pub const fn is_large(self) -> bool {
        self.0 & PdeFlags::LARGE_PAGE.bits() != 0
    }

    /// Clear the entry.
    #[inline]
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl core::fmt::Debug for PageDirectoryEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_present() {
            write!(f, "PDE(table={}, flags={:?})", self.table().addr(), self.flags())
        } else {
            write!(f, "PDE(not present)")
        }
    }
}

/// A page table: 1024 entries, 4 KiB, 4 KiB aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

impl PageTable {
    /// Create a new empty page table (all entries not present).
    pub const fn new() -> Self {
        Self {
            entries: [PageTableEntry::empty(); ENTRIES_PER_TABLE],
        }
    }

    /// Entry responsible for `va`.
    #[inline]
    pub fn entry(&self, va: VirtAddr) -> &PageTableEntry {
        &self.entries[va.table_index()]
    }

    /// Mutable entry responsible for `va`.
    #[inline]
    pub fn entry_mut(&mut self, va: VirtAddr) -> &mut PageTableEntry {
        &mut self.entries[va.table_index()]
    }

    /// Iterate over all present entries with their indices.
    pub fn iter_present(&self) -> impl Iterator<Item = (usize, &PageTableEntry)> {
        self.entries.iter().enumerate().filter(|(_, e)| e.is_present())
    }

    /// Clear all entries.
    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(PageTableEntry::clear);
    }
}

impl Index<usize> for PageTable {
    type Output = PageTableEntry;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl IndexMut<usize> for PageTable {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.entries[index]
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A page directory: 1024 entries, 4 KiB, 4 KiB aligned.
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PageDirectoryEntry; ENTRIES_PER_TABLE],
}

impl PageDirectory {
    /// Create a new empty page directory.
    pub const fn new() -> Self {
        Self {
            entries: [PageDirectoryEntry::empty(); ENTRIES_PER_TABLE],
        }
    }

    /// Entry responsible for `va`.
    #[inline]
    pub fn entry(&self, va: VirtAddr) -> &PageDirectoryEntry {
        &self.entries[va.directory_index()]
    }

    /// Mutable entry responsible for `va`.
    #[inline]
    pub fn entry_mut(&mut self, va: VirtAddr) -> &mut PageDirectoryEntry {
        &mut self.entries[va.directory_index()]
    }

    /// Iterate over all present entries with their indices.
    pub fn iter_present(&self) -> impl Iterator<Item = (usize, &PageDirectoryEntry)> {
        self.entries.iter().enumerate().filter(|(_, e)| e.is_present())
    }

    /// Clear all entries.
    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(PageDirectoryEntry::clear);
    }
}

impl Index<usize> for PageDirectory {
    type Output = PageDirectoryEntry;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl IndexMut<usize> for PageDirectory {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.entries[index]
    }
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}

/// Look up the directory entry for `va`; `None` without a directory.
#[inline]
pub fn directory_lookup_entry(
    directory: Option<&mut PageDirectory>,
    va: VirtAddr,
) -> Option<&mut PageDirectoryEntry> {
    directory.map(|pd| pd.entry_mut(va))
}

/// Look up the table entry for `va`; `None` without a table.
#[inline]
pub fn table_lookup_entry(table: Option<&mut PageTable>, va: VirtAddr) -> Option<&mut PageTableEntry> {
    table.map(|pt| pt.entry_mut(va))
}
