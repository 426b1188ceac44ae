//! CPU access
//!
//! Control registers, port I/O and the interrupt flag. The real
//! instructions are only built for the bare-metal x86 target; hosted builds
//! get a simulated interrupt flag so lock code can be tested.

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod x86;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use x86::{halt, inb, outb, Cpu};

/// The interrupt flag (EFLAGS.IF).
pub mod interrupts {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    pub use super::x86::{disable_interrupts as disable, enable_interrupts as enable, interrupts_enabled as are_enabled};

    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    mod simulated {
        use core::sync::atomic::{AtomicBool, Ordering};

        static ENABLED: AtomicBool = AtomicBool::new(true);

        pub fn are_enabled() -> bool {
            ENABLED.load(Ordering::SeqCst)
        }

        pub fn disable() {
            ENABLED.store(false, Ordering::SeqCst);
        }

        pub fn enable() {
            ENABLED.store(true, Ordering::SeqCst);
        }
    }

    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    pub use simulated::{are_enabled, disable, enable};
}
