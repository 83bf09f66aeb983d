// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware abstraction layer traits.
//!
//! The kernel core owns its devices as trait objects so host builds can plug in
//! the deterministic fakes from [`sim`].

pub mod sim;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub mod virt;

use alloc::sync::Arc;

/// Abstraction for a monotonic timer.
pub trait Timer {
    /// Returns the current time in nanoseconds.
    fn now(&self) -> u64;
    /// Programs the next wake-up time in nanoseconds.
    fn set_wakeup(&self, deadline: u64);
}

/// Platform-level interrupt controller.
pub trait InterruptController {
    /// Claims the highest priority pending line, if any.
    fn claim(&self) -> Option<usize>;
    /// Signals completion of a claimed line.
    fn complete(&self, irq: usize);
}

impl<T: Timer + ?Sized> Timer for Arc<T> {
    fn now(&self) -> u64 {
        (**self).now()
    }

    fn set_wakeup(&self, deadline: u64) {
        (**self).set_wakeup(deadline)
    }
}

impl<T: InterruptController + ?Sized> InterruptController for Arc<T> {
    fn claim(&self) -> Option<usize> {
        (**self).claim()
    }

    fn complete(&self, irq: usize) {
        (**self).complete(irq)
    }
}
