//! 32-bit x86 instructions.

use core::arch::asm;

use crate::mm::{PagingHardware, PhysAddr, VirtAddr};

/// CR0.PG
const CR0_PAGING: u32 = 1 << 31;
/// CR4.PSE
const CR4_PAGE_SIZE_EXTENSION: u32 = 1 << 4;
/// EFLAGS.IF
const EFLAGS_INTERRUPT: u32 = 1 << 9;

/// The executing CPU's paging controls.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cpu;

impl Cpu {
    fn read_cr0() -> u32 {
        let value: u32;
        // SAFETY: Reading CR0 has no side effects in ring 0.
        unsafe { asm!("mov {}, cr0", out(reg) value, options(nomem, nostack, preserves_flags)) };
        value
    }

    fn write_cr0(value: u32) {
        // SAFETY: Callers only flip CR0.PG over a complete directory.
        unsafe { asm!("mov cr0, {}", in(reg) value, options(nostack, preserves_flags)) };
    }

    fn read_cr4() -> u32 {
        let value: u32;
        // SAFETY: Reading CR4 has no side effects in ring 0.
        unsafe { asm!("mov {}, cr4", out(reg) value, options(nomem, nostack, preserves_flags)) };
        value
    }

    fn write_cr4(value: u32) {
        // SAFETY: Only CR4.PSE is changed.
        unsafe { asm!("mov cr4, {}", in(reg) value, options(nostack, preserves_flags)) };
    }
}

impl PagingHardware for Cpu {
    fn load_directory(&self, directory: PhysAddr) {
        // SAFETY: The directory maps the running kernel; loading CR3 also
        // flushes all non-global TLB entries.
        unsafe { asm!("mov cr3, {}", in(reg) directory.as_u32(), options(nostack, preserves_flags)) };
    }

    fn set_paging(&self, enabled: bool) {
        let cr0 = Self::read_cr0();
        Self::write_cr0(if enabled { cr0 | CR0_PAGING } else { cr0 & !CR0_PAGING });
    }

    fn set_large_pages(&self, enabled: bool) {
        let cr4 = Self::read_cr4();
        Self::write_cr4(if enabled {
            cr4 | CR4_PAGE_SIZE_EXTENSION
        } else {
            cr4 & !CR4_PAGE_SIZE_EXTENSION
        });
    }

    fn flush_tlb_entry(&self, va: VirtAddr) {
        // SAFETY: `invlpg` only drops a cached translation.
        unsafe { asm!("invlpg [{}]", in(reg) va.as_u32(), options(nostack, preserves_flags)) };
    }
}

/// Whether maskable interrupts are enabled.
pub fn interrupts_enabled() -> bool {
    let flags: u32;
    // SAFETY: Reads EFLAGS through the stack.
    unsafe { asm!("pushfd; pop {}", out(reg) flags, options(nomem, preserves_flags)) };
    flags & EFLAGS_INTERRUPT != 0
}

pub fn disable_interrupts() {
    // SAFETY: Ring 0.
    unsafe { asm!("cli", options(nomem, nostack)) };
}

pub fn enable_interrupts() {
    // SAFETY: Ring 0.
    unsafe { asm!("sti", options(nomem, nostack)) };
}

/// Write a byte to an I/O port.
///
/// # Safety
/// Port writes can have arbitrary device side effects.
pub unsafe fn outb(port: u16, value: u8) {
    // SAFETY: Caller vouches for the port.
    unsafe { asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags)) };
}

/// Read a byte from an I/O port.
///
/// # Safety
/// Port reads can have device side effects.
pub unsafe fn inb(port: u16) -> u8 {
    let value: u8;
    // SAFETY: Caller vouches for the port.
    unsafe { asm!("in al, dx", out("al") value, in("dx") port, options(nomem, nostack, preserves_flags)) };
    value
}

/// Stop the CPU for good.
pub fn halt() -> ! {
    loop {
        // SAFETY: Ring 0.
        unsafe { asm!("cli; hlt", options(nomem, nostack)) };
    }
}
