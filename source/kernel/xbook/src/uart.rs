// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Minimal 16550 UART support for kernel logs and panic output.
//!
//! Only the MMIO accessors touch hardware; host builds never call them because
//! the log sink is swapped for an in-memory ring.

use core::fmt::{self, Write};
use spin::Mutex;

#[cfg(not(feature = "k210"))]
const UART0_BASE: usize = 0x1000_0000;
#[cfg(feature = "k210")]
const UART0_BASE: usize = 0x3800_0000;
const UART_TX: usize = 0x0;
const UART_LSR: usize = 0x5;
const LSR_TX_IDLE: u8 = 1 << 5;

static UART0: Mutex<KernelUart> = Mutex::new(KernelUart::new(UART0_BASE));

/// UART implementation capable of formatted writes.
#[derive(Clone, Copy)]
pub struct KernelUart {
    base: usize,
}

impl KernelUart {
    /// Creates a UART abstraction rooted at `base`.
    pub const fn new(base: usize) -> Self {
        Self { base }
    }

    /// Returns a guard for the console UART singleton.
    pub fn lock() -> spin::MutexGuard<'static, KernelUart> {
        UART0.lock()
    }

    fn put(&self, byte: u8) {
        // SAFETY: `base` points at the board's memory-mapped UART registers.
        unsafe { mmio_put(self.base, byte) }
    }
}

/// # Safety
/// `base` must be the address of a mapped 16550-compatible register block.
unsafe fn mmio_put(base: usize, byte: u8) {
    let lsr = (base + UART_LSR) as *const u8;
    let tx = (base + UART_TX) as *mut u8;
    // SAFETY: guaranteed by the caller.
    unsafe {
        while core::ptr::read_volatile(lsr) & LSR_TX_IDLE == 0 {}
        core::ptr::write_volatile(tx, byte);
    }
}

impl Write for KernelUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if byte == b'\n' {
                self.put(b'\r');
            }
            self.put(byte);
        }
        Ok(())
    }
}

/// Lock-free writer for panic paths where the UART mutex may already be held.
pub struct RawUart;

impl Write for RawUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            // SAFETY: the console UART is always mapped on supported boards.
            unsafe {
                if byte == b'\n' {
                    mmio_put(UART0_BASE, b'\r');
                }
                mmio_put(UART0_BASE, byte);
            }
        }
        Ok(())
    }
}

pub fn raw_writer() -> RawUart {
    RawUart
}
