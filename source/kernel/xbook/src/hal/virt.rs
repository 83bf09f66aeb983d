// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! HAL implementation targeting QEMU's `virt` machine (and the K210 timer).

use core::ptr::{read_volatile, write_volatile};

use crate::arch::riscv;
use crate::config::TIMEBASE_HZ;

use super::{InterruptController, Timer};

const PLIC_BASE: usize = 0x0c00_0000;
/// Supervisor context of hart 0.
const PLIC_S_THRESHOLD: usize = PLIC_BASE + 0x20_1000;
const PLIC_S_CLAIM: usize = PLIC_BASE + 0x20_1004;
const PLIC_S_ENABLE: usize = PLIC_BASE + 0x2080;

const NS_PER_SEC: u64 = 1_000_000_000;

/// Timer driven by the `time` CSR and programmed through SBI.
pub struct SbiTimer;

impl Timer for SbiTimer {
    fn now(&self) -> u64 {
        (u128::from(riscv::read_time()) * u128::from(NS_PER_SEC) / u128::from(TIMEBASE_HZ)) as u64
    }

    fn set_wakeup(&self, deadline: u64) {
        let ticks = (u128::from(deadline) * u128::from(TIMEBASE_HZ) / u128::from(NS_PER_SEC)) as u64;
        let _ = sbi_rt::set_timer(ticks);
    }
}

/// Supervisor view of the PLIC.
pub struct Plic;

impl Plic {
    /// Enables `irq` for the supervisor context with priority 1.
    pub fn enable(&self, irq: usize) {
        // SAFETY: PLIC registers are identity mapped on the virt board and only
        // touched from the single hart with interrupts masked.
        unsafe {
            write_volatile((PLIC_BASE + irq * 4) as *mut u32, 1);
            let word = (PLIC_S_ENABLE + (irq / 32) * 4) as *mut u32;
            write_volatile(word, read_volatile(word) | 1 << (irq % 32));
            write_volatile(PLIC_S_THRESHOLD as *mut u32, 0);
        }
    }
}

impl InterruptController for Plic {
    fn claim(&self) -> Option<usize> {
        // SAFETY: see `enable`.
        let irq = unsafe { read_volatile(PLIC_S_CLAIM as *const u32) };
        (irq != 0).then_some(irq as usize)
    }

    fn complete(&self, irq: usize) {
        // SAFETY: see `enable`.
        unsafe { write_volatile(PLIC_S_CLAIM as *mut u32, irq as u32) }
    }
}
