//! Kestrel - memory core of a 32-bit x86 higher-half kernel
//!
//! Brings a multiboot-loaded kernel from the boot loader's coarse mapping to
//! a self-managed address space.
//!
//! # Components
//! - Physical frame allocator: bump allocation at boot, then a free-list stack
//! - Address-space manager: two-level paging with 4 KiB pages
//! - Boot memory map ingestion and kernel heap setup
//!
//! # Architecture
//! - Target: i686, bare metal (`target_os = "none"`)
//! - Boot: multiboot loader plus a stub that maps the kernel at 0xC000_0000
//!   with a 4 MiB page and calls `kernel_main`
//!
//! Everything but the CPU instructions and the kernel entry also builds for
//! the host, where the tests run against a simulated machine.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod arch;
pub mod boot;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod drivers;
pub mod mm;
pub mod sync;
