//! Interrupt-safe locking
//!
//! The memory core is reachable from interrupt handlers (page faults, the
//! heap). A plain spinlock would deadlock if a handler tried to take a lock
//! the interrupted code already holds, so [`IrqMutex`] keeps interrupts off
//! while its guard is alive.

use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

use crate::arch::interrupts;

/// A spinlock that disables interrupts while held.
pub struct IrqMutex<T> {
    inner: Mutex<T>,
}

impl<T> IrqMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Disable interrupts, then spin until the lock is ours.
    pub fn lock(&self) -> IrqMutexGuard<'_, T> {
        let irq = IrqState::save_and_disable();
        IrqMutexGuard {
            guard: self.inner.lock(),
            _irq: irq,
        }
    }

    /// Take the lock if it is free. Interrupts are left alone on failure.
    pub fn try_lock(&self) -> Option<IrqMutexGuard<'_, T>> {
        let irq = IrqState::save_and_disable();
        let guard = self.inner.try_lock()?;
        Some(IrqMutexGuard { guard, _irq: irq })
    }
}

/// Guard of an [`IrqMutex`].
///
/// Unlocks first, then restores the interrupt flag.
pub struct IrqMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    _irq: IrqState,
}

impl<T> Deref for IrqMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Interrupt flag as it was before the lock was taken.
struct IrqState {
    were_enabled: bool,
}

impl IrqState {
    fn save_and_disable() -> Self {
        let were_enabled = interrupts::are_enabled();
        if were_enabled {
            interrupts::disable();
        }
        Self { were_enabled }
    }
}

impl Drop for IrqState {
    fn drop(&mut self) {
        if self.were_enabled {
            interrupts::enable();
        }
    }
}
