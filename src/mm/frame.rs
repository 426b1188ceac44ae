//! Physical Frame Allocator
//!
//! Hands out 4 KiB physical frames in two phases.
//!
//! # Design
//! - **Bootstrap**: a bump allocator over the region starting at the PMM
//!   start location. Everything it hands out stays reachable because the
//!   VMM identity-maps that window.
//! - **ListBacked**: once the VMM has loaded its own directory, frames come
//!   from a stack of free frame addresses stored at [`FREE_LIST_BASE`].
//!   Callers that need an identity-mapped frame (page tables) still get one
//!   from the bump region.
//!
//! The free-list storage is itself made of frames. When a frame is given to
//! a full stack, it is mapped at the stack limit instead of being pushed,
//! which grows the capacity by 1024 entries. That mapping is the one place
//! where the PMM calls back into the VMM, through [`StorageBacking`].
//!
//! ```text
//! FREE_LIST_BASE      top                limit
//!      │ frame │ frame │ ......free...... │   (unmapped)
//!      └───────────────┴──────────────────┘
//! ```

use log::{debug, info, trace, warn};

use super::address::{
    Frame, PhysAddr, VirtAddr, FREE_LIST_BASE, IDENTITY_WINDOW_SIZE, PAGE_SIZE,
};
use super::memory_map::MemoryMap;

/// Width of one free-list slot.
const SLOT_SIZE: u32 = core::mem::size_of::<u32>() as u32;

/// Allocation phase of the [`FrameAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Linear bump allocation; paging is still owned by the boot loader.
    Bootstrap,
    /// The VMM owns paging; single frames come from the free list.
    ListBacked,
}

/// Errors of the physical allocator.
///
/// Every variant is fatal at boot time; the boot driver turns them into a
/// panic. They are values here so callers and tests can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PmmError {
    /// The free list is empty.
    #[error("out of memory: free list is empty")]
    FrameExhausted,
    /// The bump allocator would run into memory it must not hand out.
    #[error("bump allocation of {frames} frame(s) at {cursor} would reach the reserved region at {limit:#010x}")]
    ReservedRegionCollision {
        /// Cursor at the time of the request.
        cursor: PhysAddr,
        /// Number of frames requested.
        frames: u32,
        /// First address the bump region may not reach.
        limit: u32,
    },
    /// The request is not valid in the current phase.
    #[error("{operation} is not supported in the {phase:?} phase")]
    UnsupportedOperation {
        /// What was attempted.
        operation: &'static str,
        /// Phase at the time of the request.
        phase: Phase,
    },
    /// The directory maps the page with a 4 MiB entry, so there is no page
    /// table to put the mapping in.
    #[error("cannot map {virt}: it lies under a 4 MiB page")]
    LargePageConflict {
        /// Page that was to be mapped.
        virt: VirtAddr,
    },
}

/// Source of frames that are addressable without further mapping.
///
/// The VMM takes its page tables from here.
pub trait FrameSource {
    /// Allocate one identity-mapped 4 KiB frame.
    fn allocate_mapped_frame(&mut self) -> Result<Frame, PmmError>;
}

/// The VMM side of the free-list bookkeeping.
///
/// The allocator only knows the virtual addresses of its slots; whoever
/// implements this trait makes them addressable.
pub trait StorageBacking {
    /// Map `frame` at `at` so it can hold free-list slots.
    ///
    /// Any page table needed for the mapping must come from `frames`.
    fn map_storage<F: FrameSource>(
        &mut self,
        frames: &mut F,
        frame: Frame,
        at: VirtAddr,
    ) -> Result<(), PmmError>;

    /// Read the slot at `at`. The page must have been mapped by `map_storage`.
    fn read_slot(&self, at: VirtAddr) -> u32;

    /// Write the slot at `at`. The page must have been mapped by `map_storage`.
    fn write_slot(&mut self, at: VirtAddr, value: u32);
}

/// Layout parameters of the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmmLayout {
    /// Virtual base of the free-list stack. The bump allocator may not reach it.
    pub free_list_base: VirtAddr,
    /// Size of the identity-mapped window starting at the PMM start location.
    pub identity_window: u32,
}

impl PmmLayout {
    /// The kernel's layout.
    pub const fn kernel() -> Self {
        Self {
            free_list_base: VirtAddr::new(FREE_LIST_BASE),
            identity_window: IDENTITY_WINDOW_SIZE,
        }
    }
}

impl Default for PmmLayout {
    fn default() -> Self {
        Self::kernel()
    }
}

/// Stack of free frame addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeList {
    base: VirtAddr,
    top: VirtAddr,
    limit: VirtAddr,
}

impl FreeList {
    const fn new(base: VirtAddr) -> Self {
        Self {
            base,
            top: base,
            limit: base,
        }
    }

    /// Number of frames on the stack.
    pub const fn len(&self) -> u32 {
        (self.top.as_u32() - self.base.as_u32()) / SLOT_SIZE
    }

    /// Whether the stack holds no frames.
    pub const fn is_empty(&self) -> bool {
        self.top.as_u32() == self.base.as_u32()
    }

    /// Whether every mapped slot is in use.
    pub const fn is_full(&self) -> bool {
        self.top.as_u32() == self.limit.as_u32()
    }

    /// Number of frames used as storage for the stack.
    pub const fn storage_frames(&self) -> u32 {
        (self.limit.as_u32() - self.base.as_u32()) / PAGE_SIZE
    }

    /// First unmapped address above the storage.
    pub const fn limit(&self) -> VirtAddr {
        self.limit
    }

    fn push<B: StorageBacking>(&mut self, frame: Frame, backing: &mut B) {
        debug_assert!(!self.is_full());
        backing.write_slot(self.top, frame.addr().as_u32());
        self.top = VirtAddr::new(self.top.as_u32() + SLOT_SIZE);
    }

    fn pop<B: StorageBacking>(&mut self, backing: &B) -> Result<Frame, PmmError> {
        if self.is_empty() {
            return Err(PmmError::FrameExhausted);
        }
        self.top = VirtAddr::new(self.top.as_u32() - SLOT_SIZE);
        Ok(Frame::containing(PhysAddr::new(backing.read_slot(self.top))))
    }
}

/// Allocator counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Frames currently on the free list.
    pub free_frames: u32,
    /// Frames consumed as free-list storage.
    pub storage_frames: u32,
    /// Bytes handed out by the bump allocator so far.
    pub bump_bytes: u32,
}

/// The physical frame allocator.
#[derive(Debug)]
pub struct FrameAllocator {
    phase: Phase,
    layout: PmmLayout,
    start: PhysAddr,
    cursor: PhysAddr,
    list: FreeList,
    initialized: bool,
}

impl FrameAllocator {
    /// Allocator with the kernel layout. Call [`initialize`](Self::initialize)
    /// before use.
    pub const fn new() -> Self {
        Self::with_layout(PmmLayout::kernel())
    }

    /// Allocator with a custom layout.
    pub const fn with_layout(layout: PmmLayout) -> Self {
        Self {
            phase: Phase::Bootstrap,
            layout,
            start: PhysAddr::new(0),
            cursor: PhysAddr::new(0),
            list: FreeList::new(layout.free_list_base),
            initialized: false,
        }
    }

    /// Allocator with the kernel layout but a different free-list base.
    pub const fn with_free_list_base(base: VirtAddr) -> Self {
        Self::with_layout(PmmLayout {
            free_list_base: base,
            identity_window: IDENTITY_WINDOW_SIZE,
        })
    }

    /// Start bump allocation at `start`, rounded up to a frame boundary.
    ///
    /// Only the first call has an effect.
    pub fn initialize(&mut self, start: PhysAddr) -> Result<(), PmmError> {
        if self.initialized {
            warn!("frame allocator already initialized at {}", self.start);
            return Ok(());
        }

        let aligned = start
            .align_up()
            .ok_or(PmmError::UnsupportedOperation {
                operation: "starting the allocator in the last partial frame",
                phase: self.phase,
            })?;

        self.start = aligned;
        self.cursor = aligned;
        self.initialized = true;
        debug!("frame allocator starts at {aligned} (requested {start})");
        Ok(())
    }

    /// Allocate one frame.
    ///
    /// With `require_identity_mapped` the frame comes from the bump region
    /// in either phase, so it is addressable at its physical address.
    pub fn allocate_frame<B: StorageBacking>(
        &mut self,
        require_identity_mapped: bool,
        backing: &B,
    ) -> Result<Frame, PmmError> {
        let frame = match self.phase {
            Phase::ListBacked if !require_identity_mapped => self.list.pop(backing)?,
            Phase::Bootstrap | Phase::ListBacked => self.bump(1)?,
        };
        trace!("allocated {frame:?} (identity: {require_identity_mapped})");
        Ok(frame)
    }

    /// Allocate `n` physically contiguous frames; returns the first.
    ///
    /// Only the bump allocator can do this, so the request fails once the
    /// free list has taken over.
    pub fn allocate_contiguous(&mut self, n: u32) -> Result<Frame, PmmError> {
        match self.phase {
            Phase::Bootstrap if n > 0 => self.bump(n),
            Phase::Bootstrap => Err(PmmError::UnsupportedOperation {
                operation: "zero-frame allocation",
                phase: self.phase,
            }),
            Phase::ListBacked => Err(PmmError::UnsupportedOperation {
                operation: "contiguous allocation",
                phase: self.phase,
            }),
        }
    }

    /// Return a frame to the allocator.
    ///
    /// Frames below the bump cursor hold page tables, the directory or the
    /// early kernel and are never recycled.
    pub fn free_frame<B: StorageBacking>(
        &mut self,
        frame: Frame,
        backing: &mut B,
    ) -> Result<(), PmmError> {
        if frame.addr() < self.cursor {
            trace!("ignoring free of bump-region {frame:?}");
            return Ok(());
        }
        self.give_frame(frame, backing)
    }

    /// Add a frame to the free list without the bump-region check.
    ///
    /// When the stack is full the frame becomes free-list storage instead.
    pub fn give_frame<B: StorageBacking>(
        &mut self,
        frame: Frame,
        backing: &mut B,
    ) -> Result<(), PmmError> {
        match self.phase {
            Phase::Bootstrap => Err(PmmError::UnsupportedOperation {
                operation: "returning frames to the free list",
                phase: self.phase,
            }),
            Phase::ListBacked if self.list.is_full() => self.grow(frame, backing),
            Phase::ListBacked => {
                self.list.push(frame, backing);
                Ok(())
            }
        }
    }

    /// Grow the free-list capacity by one page, using `frame` as storage.
    fn grow<B: StorageBacking>(&mut self, frame: Frame, backing: &mut B) -> Result<(), PmmError> {
        let at = self.list.limit;
        let next_limit = at
            .checked_add(PAGE_SIZE)
            .ok_or(PmmError::UnsupportedOperation {
                operation: "growing the free list past 4 GiB",
                phase: self.phase,
            })?;

        backing.map_storage(self, frame, at)?;
        self.list.limit = next_limit;
        debug!(
            "free list grew to {} slot(s) using {frame:?} at {at}",
            self.list.storage_frames() * (PAGE_SIZE / SLOT_SIZE)
        );
        Ok(())
    }

    /// Hand every available frame of the boot memory map to the free list.
    ///
    /// Frames below [`reserved_end`](Self::reserved_end) are counted but kept
    /// back. Returns the number of available bytes found.
    pub fn ingest_boot_memory_map<B: StorageBacking>(
        &mut self,
        map: &MemoryMap<'_>,
        backing: &mut B,
    ) -> Result<u64, PmmError> {
        let reserved_end = self.reserved_end();
        let mut kept_back = 0u32;

        let found = map.for_each_available_frame(|frame| {
            if frame.addr().as_u32() < reserved_end {
                kept_back += 1;
                return Ok(());
            }
            self.give_frame(frame, backing)
        })?;

        info!(
            "memory map: {found:#x} bytes available, {kept_back} frame(s) below {reserved_end:#010x} kept back, {} free",
            self.list.len()
        );
        Ok(found)
    }

    /// Switch to the free list; called by the VMM once its directory is live.
    pub fn notify_paging_enabled(&mut self) {
        debug!("frame allocator: {:?} -> ListBacked", self.phase);
        self.phase = Phase::ListBacked;
    }

    /// Switch back to bump allocation. The free list is kept as is.
    pub fn notify_paging_disabled(&mut self) {
        debug!("frame allocator: {:?} -> Bootstrap", self.phase);
        self.phase = Phase::Bootstrap;
    }

    /// First frame of the bump region.
    pub const fn start_location(&self) -> PhysAddr {
        self.start
    }

    /// Next frame the bump allocator will hand out.
    pub const fn cursor(&self) -> PhysAddr {
        self.cursor
    }

    /// Current phase.
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Layout the allocator was built with.
    pub const fn layout(&self) -> PmmLayout {
        self.layout
    }

    /// The free-list stack.
    pub const fn free_list(&self) -> &FreeList {
        &self.list
    }

    /// End of the identity-mapped window starting at the start location.
    pub const fn identity_window_end(&self) -> u32 {
        self.start.as_u32().saturating_add(self.layout.identity_window)
    }

    /// Frames below this address are never put on the free list by
    /// memory-map ingestion.
    pub fn reserved_end(&self) -> u32 {
        self.identity_window_end().max(self.cursor.as_u32())
    }

    /// Allocator counters.
    pub fn stats(&self) -> FrameStats {
        FrameStats {
            free_frames: self.list.len(),
            storage_frames: self.list.storage_frames(),
            bump_bytes: self.cursor.as_u32() - self.start.as_u32(),
        }
    }

    fn bump_limit(&self) -> u32 {
        let list_base = self.layout.free_list_base.as_u32();
        match self.phase {
            Phase::Bootstrap => list_base,
            // Past the window a frame is no longer addressable.
            Phase::ListBacked => list_base.min(self.identity_window_end().saturating_add(1)),
        }
    }

    fn bump(&mut self, frames: u32) -> Result<Frame, PmmError> {
        if !self.initialized {
            return Err(PmmError::UnsupportedOperation {
                operation: "allocation before initialization",
                phase: self.phase,
            });
        }

        let limit = self.bump_limit();
        let collision = PmmError::ReservedRegionCollision {
            cursor: self.cursor,
            frames,
            limit,
        };
        let end = frames
            .checked_mul(PAGE_SIZE)
            .and_then(|bytes| self.cursor.checked_add(bytes))
            .ok_or(collision)?;
        if end.as_u32() >= limit {
            return Err(collision);
        }

        let frame = Frame::containing(self.cursor);
        self.cursor = end;
        Ok(frame)
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for FrameAllocator {
    fn allocate_mapped_frame(&mut self) -> Result<Frame, PmmError> {
        let frame = self.bump(1)?;
        trace!("allocated identity-mapped {frame:?}");
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::memory_map::tests::encode_map;
    use std::collections::BTreeMap;
    use std::vec::Vec;

    /// Storage that records mappings and keeps slots in a map.
    #[derive(Default)]
    struct RecordingBacking {
        mapped: Vec<(Frame, VirtAddr)>,
        tables: Vec<Frame>,
        slots: BTreeMap<u32, u32>,
    }

    impl RecordingBacking {
        fn is_mapped(&self, at: VirtAddr) -> bool {
            self.mapped.iter().any(|(_, va)| *va == at.align_down())
        }
    }

    impl StorageBacking for RecordingBacking {
        fn map_storage<F: FrameSource>(
            &mut self,
            frames: &mut F,
            frame: Frame,
            at: VirtAddr,
        ) -> Result<(), PmmError> {
            if self.mapped.is_empty() {
                self.tables.push(frames.allocate_mapped_frame()?);
            }
            self.mapped.push((frame, at));
            Ok(())
        }

        fn read_slot(&self, at: VirtAddr) -> u32 {
            assert!(self.is_mapped(at), "read of unmapped slot {at}");
            self.slots[&at.as_u32()]
        }

        fn write_slot(&mut self, at: VirtAddr, value: u32) {
            assert!(self.is_mapped(at), "write to unmapped slot {at}");
            self.slots.insert(at.as_u32(), value);
        }
    }

    fn frame(addr: u32) -> Frame {
        Frame::from_addr(PhysAddr::new(addr)).unwrap()
    }

    fn list_backed(start: u32) -> FrameAllocator {
        let mut pmm = FrameAllocator::new();
        pmm.initialize(PhysAddr::new(start)).unwrap();
        pmm.notify_paging_enabled();
        pmm
    }

    #[test]
    fn initialize_rounds_up_to_frame_boundary() {
        let mut pmm = FrameAllocator::new();
        pmm.initialize(PhysAddr::new(0x0010_0001)).unwrap();
        assert_eq!(pmm.start_location(), PhysAddr::new(0x0010_1000));
        assert_eq!(pmm.cursor(), PhysAddr::new(0x0010_1000));

        let mut aligned = FrameAllocator::new();
        aligned.initialize(PhysAddr::new(0x0020_0000)).unwrap();
        assert_eq!(aligned.start_location(), PhysAddr::new(0x0020_0000));
    }

    #[test]
    fn initialize_in_last_partial_frame_fails() {
        let mut pmm = FrameAllocator::new();
        assert_eq!(
            pmm.initialize(PhysAddr::new(0xFFFF_F001)),
            Err(PmmError::UnsupportedOperation {
                operation: "starting the allocator in the last partial frame",
                phase: Phase::Bootstrap,
            })
        );
        // Still uninitialized, so a valid start is accepted afterwards.
        pmm.initialize(PhysAddr::new(0x1000)).unwrap();
        assert_eq!(pmm.start_location(), PhysAddr::new(0x1000));
    }

    #[test]
    fn second_initialize_is_ignored() {
        let mut pmm = FrameAllocator::new();
        pmm.initialize(PhysAddr::new(0x1000)).unwrap();
        pmm.initialize(PhysAddr::new(0x9000)).unwrap();
        assert_eq!(pmm.start_location(), PhysAddr::new(0x1000));
    }

    #[test]
    fn allocation_before_initialize_fails() {
        let mut pmm = FrameAllocator::new();
        let backing = RecordingBacking::default();
        assert!(matches!(
            pmm.allocate_frame(false, &backing),
            Err(PmmError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn bootstrap_frames_are_aligned_and_increasing() {
        let mut pmm = FrameAllocator::new();
        pmm.initialize(PhysAddr::new(0x0010_0001)).unwrap();
        let backing = RecordingBacking::default();

        let mut last = None;
        for i in 0..64 {
            let f = pmm.allocate_frame(i % 2 == 0, &backing).unwrap();
            assert!(f.addr().is_aligned());
            if let Some(prev) = last {
                assert!(f.addr() > prev);
            }
            last = Some(f.addr());
        }
        assert_eq!(pmm.stats().bump_bytes, 64 * PAGE_SIZE);
    }

    #[test]
    fn contiguous_allocation_stops_at_free_list_base() {
        let mut pmm = FrameAllocator::new();
        pmm.initialize(PhysAddr::new(0x1000)).unwrap();

        let mut ok = 0;
        let err = loop {
            match pmm.allocate_contiguous(0x1000) {
                Ok(f) => {
                    assert_eq!(f.addr().as_u32(), 0x1000 + ok * 0x0100_0000);
                    ok += 1;
                }
                Err(e) => break e,
            }
        };
        // 0x1000 + 176 * 16 MiB is the first cursor at or past 0xB000_0000.
        assert_eq!(ok, 175);
        assert_eq!(
            err,
            PmmError::ReservedRegionCollision {
                cursor: PhysAddr::new(0xAF00_1000),
                frames: 0x1000,
                limit: FREE_LIST_BASE,
            }
        );
    }

    #[test]
    fn collision_is_exact_with_a_low_free_list_base() {
        let mut pmm = FrameAllocator::with_free_list_base(VirtAddr::new(0x0001_0000));
        pmm.initialize(PhysAddr::new(0x1000)).unwrap();

        for i in 1..15u32 {
            assert_eq!(pmm.allocate_contiguous(1).unwrap().addr().as_u32(), i * 0x1000);
        }
        assert!(matches!(
            pmm.allocate_contiguous(1),
            Err(PmmError::ReservedRegionCollision { .. })
        ));
        // A failed request leaves the cursor alone.
        assert_eq!(pmm.cursor(), PhysAddr::new(0xF000));
    }

    #[test]
    fn contiguous_allocation_rejected_after_paging() {
        let mut pmm = list_backed(0x1000);
        assert_eq!(
            pmm.allocate_contiguous(2),
            Err(PmmError::UnsupportedOperation {
                operation: "contiguous allocation",
                phase: Phase::ListBacked,
            })
        );
        let mut boot = FrameAllocator::new();
        boot.initialize(PhysAddr::new(0x1000)).unwrap();
        assert!(boot.allocate_contiguous(0).is_err());
    }

    #[test]
    fn first_given_frame_becomes_storage() {
        let mut pmm = list_backed(0x0010_0000);
        let mut backing = RecordingBacking::default();

        pmm.give_frame(frame(0x0080_0000), &mut backing).unwrap();
        assert_eq!(backing.mapped, [(frame(0x0080_0000), VirtAddr::new(FREE_LIST_BASE))]);
        // The page table for the storage came from the bump region.
        assert_eq!(backing.tables, [frame(0x0010_0000)]);
        assert_eq!(pmm.stats().free_frames, 0);
        assert_eq!(pmm.stats().storage_frames, 1);
        assert_eq!(pmm.allocate_frame(false, &backing), Err(PmmError::FrameExhausted));
    }

    #[test]
    fn give_then_allocate_round_trips() {
        let mut pmm = list_backed(0x0010_0000);
        let mut backing = RecordingBacking::default();
        pmm.give_frame(frame(0x0080_0000), &mut backing).unwrap();

        pmm.give_frame(frame(0x0090_0000), &mut backing).unwrap();
        assert_eq!(pmm.allocate_frame(false, &backing), Ok(frame(0x0090_0000)));
        assert_eq!(pmm.allocate_frame(false, &backing), Err(PmmError::FrameExhausted));
    }

    #[test]
    fn free_list_is_lifo_and_grows_when_full() {
        let mut pmm = list_backed(0x0010_0000);
        let mut backing = RecordingBacking::default();

        let first = 0x0100_0000;
        let slots = PAGE_SIZE / SLOT_SIZE;
        // One storage frame, `slots` pushes, then another storage frame.
        for i in 0..slots + 2 {
            pmm.give_frame(frame(first + i * PAGE_SIZE), &mut backing).unwrap();
        }
        assert_eq!(backing.mapped.len(), 2);
        assert_eq!(backing.mapped[1].1, VirtAddr::new(FREE_LIST_BASE + PAGE_SIZE));
        assert_eq!(pmm.free_list().len(), slots);

        assert_eq!(
            pmm.allocate_frame(false, &backing).unwrap(),
            frame(first + slots * PAGE_SIZE)
        );
    }

    #[test]
    fn free_below_cursor_is_ignored() {
        let mut pmm = list_backed(0x0010_0000);
        let mut backing = RecordingBacking::default();
        let low = pmm.allocate_frame(true, &backing).unwrap();

        pmm.free_frame(low, &mut backing).unwrap();
        assert!(backing.mapped.is_empty());

        pmm.free_frame(frame(0x0200_0000), &mut backing).unwrap();
        assert_eq!(backing.mapped.len(), 1);
    }

    #[test]
    fn identity_allocations_stay_inside_window_after_paging() {
        let mut pmm = FrameAllocator::with_layout(PmmLayout {
            free_list_base: VirtAddr::new(FREE_LIST_BASE),
            identity_window: 2 * PAGE_SIZE,
        });
        pmm.initialize(PhysAddr::new(0x0010_0000)).unwrap();
        pmm.notify_paging_enabled();
        let backing = RecordingBacking::default();

        assert!(pmm.allocate_frame(true, &backing).is_ok());
        assert!(pmm.allocate_frame(true, &backing).is_ok());
        assert!(matches!(
            pmm.allocate_frame(true, &backing),
            Err(PmmError::ReservedRegionCollision { .. })
        ));
    }

    #[test]
    fn disable_notification_reverts_to_bootstrap() {
        let mut pmm = list_backed(0x0010_0000);
        let mut backing = RecordingBacking::default();
        pmm.give_frame(frame(0x0080_0000), &mut backing).unwrap();
        pmm.give_frame(frame(0x0090_0000), &mut backing).unwrap();

        pmm.notify_paging_disabled();
        assert_eq!(pmm.phase(), Phase::Bootstrap);
        // Bump allocation again, list untouched.
        let f = pmm.allocate_frame(false, &backing).unwrap();
        assert_eq!(f.addr(), PhysAddr::new(0x0010_1000));
        assert_eq!(pmm.free_list().len(), 1);
        assert!(pmm.allocate_contiguous(2).is_ok());
        assert!(matches!(
            pmm.give_frame(frame(0x00A0_0000), &mut backing),
            Err(PmmError::UnsupportedOperation { .. })
        ));

        pmm.notify_paging_enabled();
        assert_eq!(pmm.allocate_frame(false, &backing), Ok(frame(0x0090_0000)));
    }

    #[test]
    fn ingest_gives_available_frames_above_reserved_window() {
        let mut pmm = FrameAllocator::with_layout(PmmLayout {
            free_list_base: VirtAddr::new(FREE_LIST_BASE),
            identity_window: 0x0001_0000,
        });
        pmm.initialize(PhysAddr::new(0x1000)).unwrap();
        pmm.notify_paging_enabled();
        let mut backing = RecordingBacking::default();

        let bytes = encode_map(&[(0x0010_0000, 0x2000, 1), (0x0020_0000, 0x1000, 2)]);
        let found = pmm
            .ingest_boot_memory_map(&MemoryMap::new(&bytes), &mut backing)
            .unwrap();

        assert_eq!(found, 0x2000);
        // 0x100000 became storage, 0x101000 was pushed.
        assert_eq!(backing.mapped, [(frame(0x0010_0000), VirtAddr::new(FREE_LIST_BASE))]);
        assert_eq!(pmm.allocate_frame(false, &backing), Ok(frame(0x0010_1000)));
    }

    #[test]
    fn ingest_keeps_back_frames_in_identity_window() {
        let mut pmm = list_backed(0x0010_0000);
        let mut backing = RecordingBacking::default();

        // 8 MiB of RAM from 1 MiB: the first 4 MiB from the start are kept.
        let bytes = encode_map(&[(0x0010_0000, 0x0080_0000, 1)]);
        let found = pmm
            .ingest_boot_memory_map(&MemoryMap::new(&bytes), &mut backing)
            .unwrap();

        assert_eq!(found, 0x0080_0000);
        assert_eq!(backing.mapped[0].0, frame(0x0050_0000));
        let given = (0x0090_0000 - 0x0050_0000) / PAGE_SIZE;
        assert_eq!(pmm.stats().free_frames + pmm.stats().storage_frames, given);
    }
}
