// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! RISC-V supervisor-mode helpers used across the xbook kernel.
//!
//! Bare-metal builds talk to the CSRs through the `riscv` crate. Host builds
//! simulate the supervisor interrupt-enable bit so lock and trap logic can be
//! exercised by unit tests; under `cfg(test)` the bit is per test thread.

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod hw {
    use riscv::register::{sie, sstatus, stvec};

    #[inline]
    pub fn sie_enabled() -> bool {
        sstatus::read().sie()
    }

    #[inline]
    pub fn set_sie(enabled: bool) {
        // SAFETY: toggling SSTATUS.SIE only gates interrupt delivery on this hart.
        unsafe {
            if enabled {
                sstatus::set_sie();
            } else {
                sstatus::clear_sie();
            }
        }
    }

    pub fn configure_traps(vector: usize) {
        // SAFETY: `vector` is the 4-byte aligned address of the assembly trap entry.
        unsafe { stvec::write(vector, stvec::TrapMode::Direct) }
    }

    pub fn enable_sources() {
        // SAFETY: enabling timer and external interrupt sources in SIE is harmless
        // while SSTATUS.SIE stays clear.
        unsafe {
            sie::set_stimer();
            sie::set_sext();
        }
    }

    #[inline]
    pub fn read_time() -> u64 {
        riscv::register::time::read64()
    }

    #[inline]
    pub fn wait_for_interrupt() {
        // SAFETY: WFI has no memory side effects.
        unsafe { riscv::asm::wfi() }
    }
}


#[cfg(all(not(test), not(all(target_arch = "riscv64", target_os = "none"))))]
mod hw {
    use core::sync::atomic::{AtomicBool, Ordering};

    static SIE: AtomicBool = AtomicBool::new(false);

    pub fn sie_enabled() -> bool {
        SIE.load(Ordering::Relaxed)
    }

    pub fn set_sie(enabled: bool) {
        SIE.store(enabled, Ordering::Relaxed);
    }

    pub fn configure_traps(_vector: usize) {}

    pub fn enable_sources() {}

    pub fn read_time() -> u64 {
        0
    }

    pub fn wait_for_interrupt() {
        core::hint::spin_loop();
    }
}

/// Masks supervisor interrupts and returns whether they were enabled before.
#[inline]
#[must_use = "pass the saved state back to irq_restore"]
pub fn irq_save() -> bool {
    let was = hw::sie_enabled();
    if was {
        hw::set_sie(false);
    }
    was
}

/// Restores the interrupt-enable state captured by [`irq_save`].
#[inline]
pub fn irq_restore(was_enabled: bool) {
    if was_enabled {
        hw::set_sie(true);
    }
}

/// Unconditionally enables supervisor interrupts.
#[inline]
pub fn irq_enable() {
    hw::set_sie(true);
}

/// Reports whether supervisor interrupts are currently enabled.
#[inline]
pub fn interrupts_enabled() -> bool {
    hw::sie_enabled()
}

/// Installs the trap vector address for supervisor mode.
#[inline]
pub fn configure_traps(trap_vector: usize) {
    hw::configure_traps(trap_vector);
}

/// Enables the supervisor timer and external interrupt sources.
#[inline]
pub fn enable_interrupt_sources() {
    hw::enable_sources();
}

/// Reads the `time` CSR (ticks of the board timebase).
#[inline]
pub fn read_time() -> u64 {
    hw::read_time()
}

/// Issues a WFI instruction or spins on the host.
#[inline]
pub fn wait_for_interrupt() {
    hw::wait_for_interrupt();
}
