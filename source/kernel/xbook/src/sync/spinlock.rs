// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Interrupt-masking spinlock for kernel shared state
//! OWNERS: @kernel-sync-team
//! PUBLIC API: IrqSpinLock::new(), lock(), try_lock(), is_locked()
//! DEPENDS_ON: spin::Mutex, arch::riscv::{irq_save, irq_restore}
//! INVARIANTS: Interrupt state restored exactly as saved; recursive acquire panics
//!
//! On a single hart an interrupt handler that takes a lock already held by the
//! code it interrupted would spin forever. Every acquisition therefore masks
//! interrupts first. Once interrupts are masked nothing else can run, so a lock
//! that is still held can only belong to the caller: that is reported as a
//! recursive acquire instead of hanging.

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use crate::arch::riscv::{irq_restore, irq_save, read_time};

/// Holds longer than this many timebase ticks are reported in debug builds.
const LONG_HOLD_TICKS: u64 = 500_000;

/// Spinlock that masks supervisor interrupts for the lifetime of its guard.
pub struct IrqSpinLock<T> {
    inner: spin::Mutex<T>,
}

impl<T> IrqSpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self { inner: spin::Mutex::new(value) }
    }

    /// Masks interrupts and takes the lock.
    ///
    /// # Panics
    /// Panics when the lock is already held, which on one hart with interrupts
    /// masked means the caller is re-entering its own critical section.
    #[track_caller]
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        let irq = irq_save();
        match self.inner.try_lock() {
            Some(guard) => IrqSpinLockGuard::new(guard, irq),
            None => {
                irq_restore(irq);
                panic!("spinlock: recursive acquire");
            }
        }
    }

    /// Takes the lock if it is free; interrupt state is untouched on failure.
    pub fn try_lock(&self) -> Option<IrqSpinLockGuard<'_, T>> {
        let irq = irq_save();
        match self.inner.try_lock() {
            Some(guard) => Some(IrqSpinLockGuard::new(guard, irq)),
            None => {
                irq_restore(irq);
                None
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> Default for IrqSpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Guard returned by [`IrqSpinLock::lock`]; unlocks, then restores interrupts.
pub struct IrqSpinLockGuard<'a, T> {
    guard: ManuallyDrop<spin::MutexGuard<'a, T>>,
    irq: bool,
    taken_at: u64,
}

impl<'a, T> IrqSpinLockGuard<'a, T> {
    fn new(guard: spin::MutexGuard<'a, T>, irq: bool) -> Self {
        Self { guard: ManuallyDrop::new(guard), irq, taken_at: read_time() }
    }
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        if cfg!(debug_assertions) && read_time().wrapping_sub(self.taken_at) > LONG_HOLD_TICKS {
            log_warn!(target: "sync", "spinlock: long hold");
        }
        // SAFETY: the guard is dropped exactly once, here, before interrupts
        // are re-enabled.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        irq_restore(self.irq);
    }
}
