//! Memory bring-up at boot
//!
//! [`bring_up`] runs the whole sequence against any machine: PMM at the end
//! of the kernel image, VMM directory, memory-map ingestion, kernel heap.
//! On the bare-metal target, `kernel_main` wires it to the real CPU and turns
//! any failure into a panic.

use log::info;

use crate::mm::{
    map_heap_region, FrameStats, HeapRegion, MemoryManager, MemoryMap, PagingHardware, PhysAddr,
    PhysMapper, PmmError,
};

/// Magic value a multiboot loader leaves in EAX.
pub const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

/// Errors that stop the boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BootError {
    #[error("not loaded by a multiboot loader (magic {0:#010x})")]
    BadMagic(u32),
    #[error("boot loader supplied no memory map")]
    NoMemoryMap,
    #[error(transparent)]
    Memory(#[from] PmmError),
}

/// What the memory core looks like after bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootReport {
    /// Bytes of available RAM in the memory map.
    pub available_bytes: u64,
    /// The mapped kernel heap.
    pub heap: HeapRegion,
    /// Allocator counters after the heap was mapped.
    pub frames: FrameStats,
}

/// Build the memory core and map `heap`.
pub fn bring_up<'m, M: PhysMapper, H: PagingHardware>(
    mapper: &'m M,
    hw: &'m H,
    kernel_end: PhysAddr,
    map: Option<MemoryMap<'_>>,
    heap: HeapRegion,
) -> Result<(MemoryManager<'m, M, H>, BootReport), BootError> {
    let map = map.ok_or(BootError::NoMemoryMap)?;

    let mut memory = MemoryManager::initialize(mapper, hw, kernel_end)?;
    let available_bytes = memory.ingest_boot_memory_map(&map)?;
    let heap = map_heap_region(&mut memory, heap)?;

    let report = BootReport {
        available_bytes,
        heap,
        frames: memory.stats(),
    };
    info!(
        "memory core up: {} KiB available, {} frames free",
        available_bytes / 1024,
        report.frames.free_frames
    );
    Ok((memory, report))
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod kernel {
    use core::panic::PanicInfo;

    use log::{error, LevelFilter};

    use super::{bring_up, BootError, MULTIBOOT_BOOTLOADER_MAGIC};
    use crate::arch::{halt, Cpu};
    use crate::drivers::serial::{init_logger, SERIAL};
    use crate::kprintln;
    use crate::mm::address::KERNEL_VIRT_BASE;
    use crate::mm::{init_heap, HeapRegion, IdentityMapper, MemoryManager, MultibootInfo, PhysAddr};
    use crate::sync::IrqMutex;

    /// Log level of the serial console.
    const LOG_LEVEL: LevelFilter = LevelFilter::Debug;

    static MAPPER: IdentityMapper = IdentityMapper;
    static CPU: Cpu = Cpu;

    /// The kernel's memory core, once bring-up is done.
    pub static MEMORY: IrqMutex<Option<MemoryManager<'static, IdentityMapper, Cpu>>> =
        IrqMutex::new(None);

    extern "C" {
        /// End of the kernel image, placed by the linker script (virtual).
        static __kernel_end: u8;
    }

    /// Kernel entry point, called by the boot stub with the multiboot
    /// registers after it has set up the higher-half 4 MiB mapping and a
    /// stack.
    #[no_mangle]
    pub extern "C" fn kernel_main(magic: u32, info_phys: u32) -> ! {
        // SAFETY: COM1 is ours; nothing else drives it this early.
        unsafe { SERIAL.lock().init() };
        if init_logger(LOG_LEVEL).is_err() {
            kprintln!("logger already installed");
        }

        if let Err(e) = start(magic, info_phys) {
            panic!("boot failed: {e}");
        }
        halt()
    }

    fn start(magic: u32, info_phys: u32) -> Result<(), BootError> {
        if magic != MULTIBOOT_BOOTLOADER_MAGIC {
            return Err(BootError::BadMagic(magic));
        }

        // SAFETY: The loader's 4 MiB mapping covers low memory at
        // KERNEL_VIRT_BASE, and the info block stays untouched until the
        // memory map is ingested.
        let info = unsafe { &*((info_phys + KERNEL_VIRT_BASE) as *const MultibootInfo) };
        let map = unsafe { info.memory_map(KERNEL_VIRT_BASE as usize) };

        // SAFETY: Only the address of the linker symbol is taken.
        let kernel_end = unsafe { core::ptr::addr_of!(__kernel_end) } as u32 - KERNEL_VIRT_BASE;

        let mut memory = MEMORY.lock();
        let (manager, report) = bring_up(&MAPPER, &CPU, PhysAddr::new(kernel_end), map, HeapRegion::kernel())?;
        // SAFETY: Freshly mapped, used by nothing else, initialized once.
        unsafe { init_heap(report.heap) };
        *memory = Some(manager);
        Ok(())
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        error!("{info}");
        kprintln!("KERNEL PANIC: {info}");
        halt()
    }
}
