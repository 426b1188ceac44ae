//! Simulated machine for host tests.
//!
//! Physical memory is a sparse map of zero-filled frames. With paging on,
//! virtual accesses are translated by walking the loaded directory the way
//! the MMU would.

use core::cell::{Cell, RefCell};
use std::boxed::Box;
use std::collections::BTreeMap;
use std::vec::Vec;

use super::address::{DirectoryFrame, Frame, PhysAddr, TableFrame, VirtAddr, PAGE_MASK, PAGE_SIZE};
use super::frame::{FrameAllocator, FrameSource, PmmError};
use super::mapper::{PagingHardware, PhysMapper};
use super::paging::{PageDirectory, PageTable};

#[repr(C, align(4096))]
struct FrameBytes([u8; PAGE_SIZE as usize]);

/// Control-register write the machine takes a snapshot at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwEvent {
    DirectoryLoaded,
    PagingEnabled,
}

/// Machine state right after a [`HwEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub event: HwEvent,
    pub paging: bool,
    pub large_pages: bool,
    /// Translation of each watched address through CR3.
    pub translations: Vec<Option<PhysAddr>>,
}

pub struct TestMachine {
    frames: RefCell<BTreeMap<u32, Box<FrameBytes>>>,
    cr3: Cell<Option<PhysAddr>>,
    paging: Cell<bool>,
    // The boot loader leaves 4 MiB pages on.
    large_pages: Cell<bool>,
    flushed: RefCell<Vec<VirtAddr>>,
    watched: RefCell<Vec<VirtAddr>>,
    snapshots: RefCell<Vec<Snapshot>>,
}

impl TestMachine {
    pub fn new() -> Self {
        Self {
            frames: RefCell::new(BTreeMap::new()),
            cr3: Cell::new(None),
            paging: Cell::new(false),
            large_pages: Cell::new(true),
            flushed: RefCell::new(Vec::new()),
            watched: RefCell::new(Vec::new()),
            snapshots: RefCell::new(Vec::new()),
        }
    }

    pub fn cr3(&self) -> Option<PhysAddr> {
        self.cr3.get()
    }

    pub fn paging_enabled(&self) -> bool {
        self.paging.get()
    }

    pub fn large_pages_enabled(&self) -> bool {
        self.large_pages.get()
    }

    pub fn flushed(&self) -> Vec<VirtAddr> {
        self.flushed.borrow().clone()
    }

    /// Translate `addrs` at every later [`HwEvent`].
    pub fn watch(&self, addrs: &[VirtAddr]) {
        self.watched.borrow_mut().extend_from_slice(addrs);
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.snapshots.borrow().clone()
    }

    fn snapshot(&self, event: HwEvent) {
        let translations = self.watched.borrow().iter().map(|&va| self.walk(va)).collect();
        self.snapshots.borrow_mut().push(Snapshot {
            event,
            paging: self.paging.get(),
            large_pages: self.large_pages.get(),
            translations,
        });
    }

    pub fn directory(&self, directory: DirectoryFrame) -> &PageDirectory {
        unsafe { self.phys_to_mut::<PageDirectory>(directory.addr()) }
    }

    pub fn table(&self, table: TableFrame) -> &PageTable {
        unsafe { self.phys_to_mut::<PageTable>(table.addr()) }
    }

    pub fn read_phys_u32(&self, pa: PhysAddr) -> u32 {
        unsafe { *self.phys_to_mut::<u32>(pa) }
    }

    /// Translate `va` through the loaded directory.
    pub fn walk(&self, va: VirtAddr) -> Option<PhysAddr> {
        let pd = self.directory(DirectoryFrame::from_addr(self.cr3.get()?).ok()?);
        let pde = *pd.entry(va);
        if !pde.is_present() {
            return None;
        }
        let pte = *self.table(pde.table()).entry(va);
        if !pte.is_present() {
            return None;
        }
        pte.frame().addr().checked_add(va.page_offset())
    }

    fn byte_ptr(&self, pa: PhysAddr) -> *mut u8 {
        let mut frames = self.frames.borrow_mut();
        let frame = frames
            .entry(pa.as_u32() & !PAGE_MASK)
            .or_insert_with(|| Box::new(FrameBytes([0; PAGE_SIZE as usize])));
        // Boxed frames never move, so the pointer outlives the borrow.
        unsafe { frame.0.as_mut_ptr().add(pa.page_offset() as usize) }
    }
}

impl PhysMapper for TestMachine {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysAddr) -> &'a mut T {
        assert!(
            pa.page_offset() as usize + core::mem::size_of::<T>() <= PAGE_SIZE as usize,
            "access at {pa} crosses a frame"
        );
        unsafe { &mut *self.byte_ptr(pa).cast::<T>() }
    }

    unsafe fn virt_to_mut<'a, T>(&self, va: VirtAddr) -> &'a mut T {
        let pa = if self.paging.get() {
            self.walk(va)
                .unwrap_or_else(|| panic!("page fault at {va}"))
        } else {
            PhysAddr::new(va.as_u32())
        };
        unsafe { self.phys_to_mut(pa) }
    }
}

impl PagingHardware for TestMachine {
    fn load_directory(&self, directory: PhysAddr) {
        self.cr3.set(Some(directory));
        self.snapshot(HwEvent::DirectoryLoaded);
    }

    fn set_paging(&self, enabled: bool) {
        self.paging.set(enabled);
        if enabled {
            self.snapshot(HwEvent::PagingEnabled);
        }
    }

    fn set_large_pages(&self, enabled: bool) {
        self.large_pages.set(enabled);
    }

    fn flush_tlb_entry(&self, va: VirtAddr) {
        self.flushed.borrow_mut().push(va);
    }
}

/// Frame source that counts how many page tables were requested.
pub struct CountingFrames<'a> {
    inner: &'a mut FrameAllocator,
    count: usize,
}

impl<'a> CountingFrames<'a> {
    pub fn new(inner: &'a mut FrameAllocator) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl FrameSource for CountingFrames<'_> {
    fn allocate_mapped_frame(&mut self) -> Result<Frame, PmmError> {
        self.count += 1;
        self.inner.allocate_mapped_frame()
    }
}
