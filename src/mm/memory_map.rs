//! Boot Memory Map
//!
//! Parses the memory map the boot loader hands over in the multiboot
//! information block.
//!
//! # Record Layout
//! ```text
//! offset  0   size         (not counted in itself)
//!         4   base_low
//!         8   base_high
//!        12   length_low
//!        16   length_high
//!        20   type         (1 = available RAM)
//! ```
//! Records are variable-stride: the next record starts `size + 4` bytes
//! after the current one.

use super::address::{Frame, PhysAddr, PAGE_SIZE};

/// Multiboot `flags` bit announcing valid `mmap_*` fields.
pub const MULTIBOOT_FLAG_MMAP: u32 = 1 << 6;

/// Bytes of the logical record that follows the size field.
const RECORD_BODY: usize = 20;

/// Width of the leading size field.
const SIZE_FIELD: usize = 4;

/// Highest address + 1 this 32-bit kernel can use.
const ADDRESS_SPACE_END: u64 = 1 << 32;

/// The part of the multiboot information block the memory core reads.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MultibootInfo {
    pub flags: u32,
    pub mem_lower: u32,
    pub mem_upper: u32,
    pub boot_device: u32,
    pub cmdline: u32,
    pub mods_count: u32,
    pub mods_addr: u32,
    pub syms: [u32; 4],
    pub mmap_length: u32,
    pub mmap_addr: u32,
}

impl MultibootInfo {
    /// Whether the boot loader supplied a memory map.
    #[inline]
    pub const fn has_memory_map(&self) -> bool {
        self.flags & MULTIBOOT_FLAG_MMAP != 0
    }

    /// The memory map, reached at `mmap_addr + phys_offset`.
    ///
    /// # Safety
    /// `mmap_addr + phys_offset` must be mapped and hold `mmap_length`
    /// readable bytes for the lifetime of `self`.
    pub unsafe fn memory_map(&self, phys_offset: usize) -> Option<MemoryMap<'_>> {
        if !self.has_memory_map() {
            return None;
        }
        let ptr = (self.mmap_addr as usize).wrapping_add(phys_offset) as *const u8;
        // SAFETY: Caller guarantees the range is mapped and readable.
        let bytes = unsafe { core::slice::from_raw_parts(ptr, self.mmap_length as usize) };
        Some(MemoryMap::new(bytes))
    }
}

/// Type of a memory-map region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Usable RAM.
    Available,
    /// Reserved by firmware or hardware.
    Reserved,
    /// ACPI tables, reclaimable after parsing.
    AcpiReclaimable,
    /// ACPI non-volatile storage.
    AcpiNvs,
    /// Defective RAM.
    BadMemory,
    /// Anything else.
    Other(u32),
}

impl From<u32> for RegionKind {
    fn from(raw: u32) -> Self {
        match raw {
            1 => Self::Available,
            2 => Self::Reserved,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::BadMemory,
            other => Self::Other(other),
        }
    }
}

/// One decoded memory-map record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMapEntry {
    /// First byte of the region.
    pub base: u64,
    /// Length in bytes.
    pub length: u64,
    /// Region type.
    pub kind: RegionKind,
}

impl MemoryMapEntry {
    /// Whether the region is usable RAM.
    #[inline]
    pub fn is_available(&self) -> bool {
        self.kind == RegionKind::Available
    }

    /// Whole frames inside the region that lie below 4 GiB.
    pub fn frames(&self) -> impl Iterator<Item = Frame> {
        let page = u64::from(PAGE_SIZE);
        let first = self.base.saturating_add(page - 1) & !(page - 1);
        let end = self.base.saturating_add(self.length).min(ADDRESS_SPACE_END) & !(page - 1);

        (first..end.max(first))
            .step_by(PAGE_SIZE as usize)
            .map(|addr| Frame::containing(PhysAddr::new(addr as u32)))
    }
}

/// A memory map laid out as multiboot records.
#[derive(Debug, Clone, Copy)]
pub struct MemoryMap<'a> {
    bytes: &'a [u8],
}

impl<'a> MemoryMap<'a> {
    /// Wrap raw record bytes.
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Iterate over the records. A truncated trailing record ends iteration.
    pub fn iter(&self) -> MemoryMapIter<'a> {
        MemoryMapIter {
            bytes: self.bytes,
            offset: 0,
        }
    }

    /// Call `f` with every whole frame of every available region.
    ///
    /// Returns the number of bytes those frames cover, or the first error
    /// `f` reports.
    pub fn for_each_available_frame<E>(
        &self,
        mut f: impl FnMut(Frame) -> Result<(), E>,
    ) -> Result<u64, E> {
        let mut bytes = 0u64;
        for entry in self.iter().filter(MemoryMapEntry::is_available) {
            for frame in entry.frames() {
                f(frame)?;
                bytes += u64::from(PAGE_SIZE);
            }
        }
        Ok(bytes)
    }
}

impl<'a> IntoIterator for &MemoryMap<'a> {
    type Item = MemoryMapEntry;
    type IntoIter = MemoryMapIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over [`MemoryMapEntry`] records.
#[derive(Debug, Clone)]
pub struct MemoryMapIter<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl MemoryMapIter<'_> {
    fn read_u32(&self, at: usize) -> Option<u32> {
        let raw = self.bytes.get(at..at.checked_add(4)?)?;
        Some(u32::from_le_bytes(raw.try_into().ok()?))
    }
}

impl Iterator for MemoryMapIter<'_> {
    type Item = MemoryMapEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let size = self.read_u32(self.offset)? as usize;
        if size < RECORD_BODY {
            return None;
        }

        let body = self.offset + SIZE_FIELD;
        let base_low = self.read_u32(body)?;
        let base_high = self.read_u32(body + 4)?;
        let length_low = self.read_u32(body + 8)?;
        let length_high = self.read_u32(body + 12)?;
        let kind = self.read_u32(body + 16)?;

        self.offset = body.checked_add(size)?;

        Some(MemoryMapEntry {
            base: u64::from(base_high) << 32 | u64::from(base_low),
            length: u64::from(length_high) << 32 | u64::from(length_low),
            kind: RegionKind::from(kind),
        })
    }
}
