//! Address-Space Manager
//!
//! Owns the active page directory and maps virtual pages to physical frames.
//!
//! # Bring-up
//! The boot loader enters the kernel with a coarse 4 MiB mapping of the
//! higher half. [`AddressSpace::initialize`] rebuilds that mapping with
//! 4 KiB pages in a fresh directory, identity-maps the PMM window, loads the
//! directory and only then turns off large pages and tells the PMM that the
//! free list may take over.
//!
//! # Memory Access
//! Page tables live in identity-mapped frames and are reached through a
//! [`PhysMapper`]; control registers are reached through [`PagingHardware`].
//! Both are traits so the mapping logic can run against a simulated machine.

use log::{debug, info, trace};

use super::address::{
    DirectoryFrame, Frame, PhysAddr, TableFrame, VirtAddr, KERNEL_MAPPING_SIZE, KERNEL_VIRT_BASE,
    PAGE_SIZE,
};
use super::frame::{FrameAllocator, FrameSource, PmmError, StorageBacking};
use super::paging::{PageDirectory, PageTable, PdeFlags, PteFlags};

/// Turns addresses into references the kernel can dereference.
///
/// # Safety
/// - The address must be mapped writable in the current address space.
/// - Lifetime `'a` is not tied to the mapping; the caller keeps it valid.
/// - `T` must match the bytes at the address.
pub trait PhysMapper {
    /// Reference to the object at physical address `pa`.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysAddr) -> &'a mut T;

    /// Reference to the object at virtual address `va` in the active
    /// address space.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn virt_to_mut<'a, T>(&self, va: VirtAddr) -> &'a mut T;
}

/// [`PhysMapper`] for the kernel: page tables are identity-mapped and
/// virtual addresses are dereferenced as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapper;

impl PhysMapper for IdentityMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysAddr) -> &'a mut T {
        // SAFETY: Caller guarantees `pa` is identity-mapped and holds a `T`.
        unsafe { &mut *(pa.as_usize() as *mut T) }
    }

    unsafe fn virt_to_mut<'a, T>(&self, va: VirtAddr) -> &'a mut T {
        // SAFETY: Caller guarantees `va` is mapped and holds a `T`.
        unsafe { &mut *(va.as_usize() as *mut T) }
    }
}

/// Paging control of the CPU.
pub trait PagingHardware {
    /// Load `directory` as the page-table base (CR3).
    fn load_directory(&self, directory: PhysAddr);

    /// Set or clear the paging-enable bit (CR0.PG).
    fn set_paging(&self, enabled: bool);

    /// Set or clear 4 MiB page support (CR4.PSE).
    fn set_large_pages(&self, enabled: bool);

    /// Drop the TLB entry for the page containing `va` (`invlpg`).
    fn flush_tlb_entry(&self, va: VirtAddr);
}

/// The active address space.
pub struct AddressSpace<'m, M: PhysMapper, H: PagingHardware> {
    mapper: &'m M,
    hw: &'m H,
    active: DirectoryFrame,
}

impl<'m, M: PhysMapper, H: PagingHardware> AddressSpace<'m, M, H> {
    /// Build the kernel's first directory and switch to it.
    ///
    /// Maps physical `[0, 4 MiB)` at [`KERNEL_VIRT_BASE`] and identity-maps
    /// the PMM window, then loads the directory, disables 4 MiB pages,
    /// enables paging and notifies `pmm`. The directory is complete before
    /// it is loaded.
    pub fn initialize(mapper: &'m M, hw: &'m H, pmm: &mut FrameAllocator) -> Result<Self, PmmError> {
        let directory = DirectoryFrame::new(pmm.allocate_mapped_frame()?);
        // SAFETY: The frame was just handed out from the identity window.
        unsafe { mapper.phys_to_mut::<PageDirectory>(directory.addr()) }.clear();

        for offset in (0..KERNEL_MAPPING_SIZE).step_by(PAGE_SIZE as usize) {
            map_in(
                mapper,
                directory,
                pmm,
                PhysAddr::new(offset),
                VirtAddr::new(KERNEL_VIRT_BASE + offset),
            )?;
        }

        let start = pmm.start_location();
        let window = pmm.layout().identity_window;
        for offset in (0..window).step_by(PAGE_SIZE as usize) {
            let Some(addr) = start.checked_add(offset) else {
                break;
            };
            map_in(mapper, directory, pmm, addr, VirtAddr::new(addr.as_u32()))?;
        }

        let mut space = Self {
            mapper,
            hw,
            active: directory,
        };
        space.switch_directory(directory);
        space.disable_4mb_pages();
        space.enable_paging();
        pmm.notify_paging_enabled();

        info!(
            "paging active: directory {}, identity window {start}+{window:#x}, {} bytes of bump frames used",
            directory.addr(),
            pmm.stats().bump_bytes
        );
        Ok(space)
    }

    /// Map the page at `virt` to the frame containing `phys`.
    ///
    /// A missing page table is taken from `frames` and zeroed. No TLB
    /// invalidation happens here: when replacing an existing mapping the
    /// caller must [`flush_tlb_entry`](Self::flush_tlb_entry) before relying
    /// on the new translation.
    pub fn map_page<F: FrameSource>(
        &mut self,
        frames: &mut F,
        phys: PhysAddr,
        virt: VirtAddr,
    ) -> Result<(), PmmError> {
        map_in(self.mapper, self.active, frames, phys, virt)
    }

    /// Take a frame from the free list and map it at `virt`.
    pub fn alloc_page(&mut self, pmm: &mut FrameAllocator, virt: VirtAddr) -> Result<Frame, PmmError> {
        let frame = pmm.allocate_frame(false, &*self)?;
        self.map_page(pmm, frame.addr(), virt)?;
        Ok(frame)
    }

    /// Remove the mapping of `virt` and return the frame it pointed at.
    ///
    /// The frame is not freed; hand it to the PMM when it is no longer used.
    pub fn unmap_page(&mut self, virt: VirtAddr) -> Option<Frame> {
        let table = self.table_for(virt)?;
        let pte = table.entry_mut(virt);
        if !pte.is_present() {
            return None;
        }
        let frame = pte.frame();
        pte.remove(PteFlags::PRESENT | PteFlags::WRITABLE);
        self.flush_tlb_entry(virt);
        trace!("unmapped {virt} (was {frame:?})");
        Some(frame)
    }

    /// Physical address `virt` translates to, if mapped.
    pub fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        let pte = *self.table_for(virt)?.entry(virt);
        if !pte.is_present() {
            return None;
        }
        pte.frame().addr().checked_add(virt.page_offset())
    }

    /// Make `directory` the active one and load it into CR3.
    pub fn switch_directory(&mut self, directory: DirectoryFrame) {
        self.active = directory;
        self.hw.load_directory(directory.addr());
        debug!("switched to page directory {}", directory.addr());
    }

    /// The directory currently loaded.
    pub const fn active_directory(&self) -> DirectoryFrame {
        self.active
    }

    /// Invalidate the TLB entry of one page.
    pub fn flush_tlb_entry(&self, virt: VirtAddr) {
        self.hw.flush_tlb_entry(virt);
    }

    pub fn enable_paging(&self) {
        self.hw.set_paging(true);
    }

    pub fn disable_paging(&self) {
        self.hw.set_paging(false);
    }

    pub fn enable_4mb_pages(&self) {
        self.hw.set_large_pages(true);
    }

    pub fn disable_4mb_pages(&self) {
        self.hw.set_large_pages(false);
    }

    fn table_for(&self, virt: VirtAddr) -> Option<&'m mut PageTable> {
        // SAFETY: The active directory and its tables are identity-mapped.
        let pd = unsafe { self.mapper.phys_to_mut::<PageDirectory>(self.active.addr()) };
        let pde = *pd.entry(virt);
        if !pde.is_present() || pde.is_large() {
            return None;
        }
        // SAFETY: A present, non-large PDE points at a page table we created.
        Some(unsafe { self.mapper.phys_to_mut::<PageTable>(pde.table().addr()) })
    }
}

impl<M: PhysMapper, H: PagingHardware> StorageBacking for AddressSpace<'_, M, H> {
    fn map_storage<F: FrameSource>(
        &mut self,
        frames: &mut F,
        frame: Frame,
        at: VirtAddr,
    ) -> Result<(), PmmError> {
        self.map_page(frames, frame.addr(), at)
    }

    fn read_slot(&self, at: VirtAddr) -> u32 {
        // SAFETY: The PMM only reads slots inside storage it had mapped.
        unsafe { *self.mapper.virt_to_mut::<u32>(at) }
    }

    fn write_slot(&mut self, at: VirtAddr, value: u32) {
        // SAFETY: The PMM only writes slots inside storage it had mapped.
        unsafe { *self.mapper.virt_to_mut::<u32>(at) = value }
    }
}

/// Map `virt` to `phys` in `directory`, creating the page table if needed.
fn map_in<M: PhysMapper, F: FrameSource>(
    mapper: &M,
    directory: DirectoryFrame,
    frames: &mut F,
    phys: PhysAddr,
    virt: VirtAddr,
) -> Result<(), PmmError> {
    // SAFETY: Directories are allocated from the identity window.
    let pd = unsafe { mapper.phys_to_mut::<PageDirectory>(directory.addr()) };
    let pde = pd.entry_mut(virt);
    if pde.is_present() && pde.is_large() {
        return Err(PmmError::LargePageConflict { virt });
    }

    let table = if pde.is_present() {
        pde.table()
    } else {
        let table = TableFrame::new(frames.allocate_mapped_frame()?);
        // SAFETY: Identity-mapped frame just handed out by `frames`.
        unsafe { mapper.phys_to_mut::<PageTable>(table.addr()) }.clear();
        pde.insert(PdeFlags::PRESENT | PdeFlags::WRITABLE);
        pde.set_table_address(table.addr());
        trace!("new page table {} for directory slot {}", table.addr(), virt.directory_index());
        table
    };

    // SAFETY: `table` is a page table of this directory.
    let pt = unsafe { mapper.phys_to_mut::<PageTable>(table.addr()) };
    let pte = pt.entry_mut(virt);
    pte.insert(PteFlags::PRESENT | PteFlags::WRITABLE);
    pte.set_frame(phys);
    Ok(())
}
