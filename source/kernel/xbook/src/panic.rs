// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Panic handler for bare-metal kernel images
//! OWNERS: @kernel-team
//! PUBLIC API: panic handler (no_std, `panic_handler` feature)
//! DEPENDS_ON: trap::last_trap(), uart::raw_writer()
//! INVARIANTS: Never takes the UART mutex; no allocations; interrupts masked before output

use core::{fmt::Write, panic::PanicInfo};

use crate::{arch, trap, uart};

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    let _ = arch::riscv::irq_save();
    let mut w = uart::raw_writer();

    let _ = w.write_str("\nPANIC: ");
    if let Some(location) = info.location() {
        let _ = write!(w, "{}:{}: ", location.file(), location.line());
    }
    let _ = writeln!(w, "{}", info.message());

    if let Some(frame) = trap::last_trap() {
        let _ = writeln!(w, "PANIC: last trap:");
        let _ = trap::fmt_trap(&frame, &mut w);
    }

    loop {
        arch::riscv::wait_for_interrupt();
    }
}
