//! Kernel Heap Allocator
//!
//! Uses `linked_list_allocator` for heap management.
//!
//! # Memory Layout
//! The heap is a run of pages at [`KERNEL_HEAP_BASE`], each backed by a
//! frame from the free list. It can only be set up once the memory map has
//! been ingested.

use log::info;

use super::address::{VirtAddr, KERNEL_HEAP_BASE, KERNEL_HEAP_PAGES, PAGE_SIZE};
use super::frame::PmmError;
use super::mapper::{PagingHardware, PhysMapper};
use super::MemoryManager;

/// Virtual range backing the kernel heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapRegion {
    /// First byte of the heap.
    pub start: VirtAddr,
    /// Size in bytes.
    pub size: u32,
}

impl HeapRegion {
    /// The kernel's heap range.
    pub const fn kernel() -> Self {
        Self {
            start: VirtAddr::new(KERNEL_HEAP_BASE),
            size: KERNEL_HEAP_PAGES * PAGE_SIZE,
        }
    }

    /// Number of pages in the region.
    pub const fn pages(&self) -> u32 {
        self.size.div_ceil(PAGE_SIZE)
    }
}

/// Back every page of `region` with a free-list frame.
pub fn map_heap_region<M: PhysMapper, H: PagingHardware>(
    memory: &mut MemoryManager<'_, M, H>,
    region: HeapRegion,
) -> Result<HeapRegion, PmmError> {
    for page in 0..region.pages() {
        let va = region
            .start
            .checked_add(page * PAGE_SIZE)
            .ok_or(PmmError::UnsupportedOperation {
                operation: "mapping a heap past 4 GiB",
                phase: memory.frames().phase(),
            })?;
        memory.alloc_page(va)?;
    }
    info!("kernel heap: {} KiB at {}", region.size / 1024, region.start);
    Ok(region)
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use kernel_heap::init_heap;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod kernel_heap {
    use linked_list_allocator::LockedHeap;

    use super::HeapRegion;

    /// Global heap allocator instance
    #[global_allocator]
    static ALLOCATOR: LockedHeap = LockedHeap::empty();

    /// Hand a mapped region to the global allocator.
    ///
    /// # Safety
    /// - Must be called exactly once, before any heap allocation.
    /// - Every page of `region` must be mapped writable and unused.
    pub unsafe fn init_heap(region: HeapRegion) {
        // SAFETY: Caller guarantees the region is mapped and exclusively ours.
        unsafe {
            ALLOCATOR
                .lock()
                .init(region.start.as_usize() as *mut u8, region.size as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::address::{Frame, PhysAddr};
    use crate::mm::testing::TestMachine;

    #[test]
    fn kernel_region_is_256_kib() {
        let region = HeapRegion::kernel();
        assert_eq!(region.size, 256 * 1024);
        assert_eq!(region.pages(), 64);
    }

    #[test]
    fn heap_pages_get_distinct_frames() {
        let machine = TestMachine::new();
        let mut memory = MemoryManager::initialize(&machine, &machine, PhysAddr::new(0x0010_0000)).unwrap();
        for i in 0..6 {
            memory
                .give_frame(Frame::containing(PhysAddr::new(0x0100_0000 + i * PAGE_SIZE)))
                .unwrap();
        }

        let region = HeapRegion {
            start: VirtAddr::new(KERNEL_HEAP_BASE),
            size: 4 * PAGE_SIZE,
        };
        assert_eq!(map_heap_region(&mut memory, region), Ok(region));

        let mut backing: std::vec::Vec<_> = (0..4)
            .map(|p| memory.translate(VirtAddr::new(KERNEL_HEAP_BASE + p * PAGE_SIZE)).unwrap())
            .collect();
        backing.sort();
        backing.dedup();
        assert_eq!(backing.len(), 4);
        assert_eq!(memory.translate(VirtAddr::new(KERNEL_HEAP_BASE + 4 * PAGE_SIZE)), None);
    }

    #[test]
    fn heap_mapping_fails_without_free_frames() {
        let machine = TestMachine::new();
        let mut memory = MemoryManager::initialize(&machine, &machine, PhysAddr::new(0x0010_0000)).unwrap();
        assert_eq!(
            map_heap_region(&mut memory, HeapRegion::kernel()),
            Err(PmmError::FrameExhausted)
        );
    }
}
