//! Memory management
//!
//! Provides:
//! - Physical frame allocation ([`FrameAllocator`])
//! - Two-level x86 paging ([`AddressSpace`])
//! - Boot memory map parsing ([`MemoryMap`])
//! - Kernel heap setup
//!
//! # Ownership
//! The PMM and the VMM need each other: the VMM takes page tables from the
//! PMM, and the PMM needs the VMM to map free-list storage. [`MemoryManager`]
//! owns both and lends each to the other per call, so neither holds a
//! reference to the other.

pub mod address;
pub mod allocator;
pub mod frame;
pub mod mapper;
pub mod memory_map;
pub mod paging;

#[cfg(test)]
pub(crate) mod testing;

pub use address::{DirectoryFrame, Frame, PhysAddr, TableFrame, VirtAddr};
pub use allocator::{map_heap_region, HeapRegion};
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use allocator::init_heap;
pub use frame::{FrameAllocator, FrameSource, FrameStats, Phase, PmmError, PmmLayout};
pub use mapper::{AddressSpace, IdentityMapper, PagingHardware, PhysMapper};
pub use memory_map::{MemoryMap, MultibootInfo};

/// The kernel's memory core: one frame allocator and the active address
/// space.
pub struct MemoryManager<'m, M: PhysMapper, H: PagingHardware> {
    frames: FrameAllocator,
    space: AddressSpace<'m, M, H>,
}

impl<'m, M: PhysMapper, H: PagingHardware> MemoryManager<'m, M, H> {
    /// Bring up the PMM at `start` and switch to a kernel-built directory.
    pub fn initialize(mapper: &'m M, hw: &'m H, start: PhysAddr) -> Result<Self, PmmError> {
        Self::with_allocator(mapper, hw, FrameAllocator::new(), start)
    }

    /// Like [`initialize`](Self::initialize), with a preconfigured allocator.
    pub fn with_allocator(
        mapper: &'m M,
        hw: &'m H,
        mut frames: FrameAllocator,
        start: PhysAddr,
    ) -> Result<Self, PmmError> {
        frames.initialize(start)?;
        let space = AddressSpace::initialize(mapper, hw, &mut frames)?;
        Ok(Self { frames, space })
    }

    pub fn allocate_frame(&mut self, require_identity_mapped: bool) -> Result<Frame, PmmError> {
        self.frames.allocate_frame(require_identity_mapped, &self.space)
    }

    pub fn allocate_contiguous(&mut self, n: u32) -> Result<Frame, PmmError> {
        self.frames.allocate_contiguous(n)
    }

    pub fn free_frame(&mut self, frame: Frame) -> Result<(), PmmError> {
        self.frames.free_frame(frame, &mut self.space)
    }

    pub fn give_frame(&mut self, frame: Frame) -> Result<(), PmmError> {
        self.frames.give_frame(frame, &mut self.space)
    }

    /// Feed the boot memory map to the free list. Returns the available bytes.
    pub fn ingest_boot_memory_map(&mut self, map: &MemoryMap<'_>) -> Result<u64, PmmError> {
        self.frames.ingest_boot_memory_map(map, &mut self.space)
    }

    pub fn map_page(&mut self, phys: PhysAddr, virt: VirtAddr) -> Result<(), PmmError> {
        self.space.map_page(&mut self.frames, phys, virt)
    }

    /// Map a fresh frame at `virt`.
    pub fn alloc_page(&mut self, virt: VirtAddr) -> Result<Frame, PmmError> {
        self.space.alloc_page(&mut self.frames, virt)
    }

    /// Unmap `virt` and return its frame to the free list. Unmapped
    /// addresses are ignored.
    pub fn free_page(&mut self, virt: VirtAddr) -> Result<(), PmmError> {
        match self.space.unmap_page(virt) {
            Some(frame) => self.free_frame(frame),
            None => Ok(()),
        }
    }

    pub fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        self.space.translate(virt)
    }

    pub fn switch_directory(&mut self, directory: DirectoryFrame) {
        self.space.switch_directory(directory);
    }

    pub fn active_directory(&self) -> DirectoryFrame {
        self.space.active_directory()
    }

    /// Turn paging off and put the PMM back into bump mode.
    pub fn disable_paging(&mut self) {
        self.space.disable_paging();
        self.frames.notify_paging_disabled();
    }

    /// Turn paging back on over the active directory.
    pub fn enable_paging(&mut self) {
        self.space.enable_paging();
        self.frames.notify_paging_enabled();
    }

    pub fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    pub fn address_space(&self) -> &AddressSpace<'m, M, H> {
        &self.space
    }

    pub fn stats(&self) -> FrameStats {
        self.frames.stats()
    }
}
