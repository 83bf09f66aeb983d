// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fixed-size interrupt/exception vector table.
//!
//! Slots `0..16` hold handlers for exception codes, slots `16..64` hold
//! handlers for external IRQ lines (`IRQ_OFFSET + irq`). Empty slots fall back
//! to [`generic_handler`].

use super::{describe_cause, TrapDump, TrapFrame};
use crate::kernel::Kernel;
use crate::signal::Signal;

pub const EXCEPTION_SLOTS: usize = 16;
pub const IRQ_SLOTS: usize = 48;
pub const IRQ_OFFSET: usize = EXCEPTION_SLOTS;
pub const VECTOR_SLOTS: usize = EXCEPTION_SLOTS + IRQ_SLOTS;

/// Handler invoked with the live trap frame and its vector index.
pub type TrapHandler = fn(&mut Kernel, &mut TrapFrame, usize);

#[must_use]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VectorError {
    /// Exception code or IRQ line outside the table.
    OutOfRange,
}

#[derive(Copy, Clone)]
struct Slot {
    name: &'static str,
    handler: TrapHandler,
}

pub struct VectorTable {
    slots: [Option<Slot>; VECTOR_SLOTS],
}

impl VectorTable {
    pub const fn new() -> Self {
        Self { slots: [None; VECTOR_SLOTS] }
    }

    pub fn register_exception(
        &mut self,
        code: usize,
        name: &'static str,
        handler: TrapHandler,
    ) -> Result<(), VectorError> {
        if code >= EXCEPTION_SLOTS {
            log_warn!(target: "trap", "register: exception code {} out of range", code);
            return Err(VectorError::OutOfRange);
        }
        self.slots[code] = Some(Slot { name, handler });
        Ok(())
    }

    pub fn unregister_exception(&mut self, code: usize) -> Result<(), VectorError> {
        if code >= EXCEPTION_SLOTS {
            return Err(VectorError::OutOfRange);
        }
        self.slots[code] = None;
        Ok(())
    }

    pub fn register_irq(
        &mut self,
        irq: usize,
        name: &'static str,
        handler: TrapHandler,
    ) -> Result<(), VectorError> {
        if irq >= IRQ_SLOTS {
            log_warn!(target: "trap", "register: irq {} out of range", irq);
            return Err(VectorError::OutOfRange);
        }
        self.slots[IRQ_OFFSET + irq] = Some(Slot { name, handler });
        Ok(())
    }

    /// Restores the default handler for `irq`.
    pub fn unregister_irq(&mut self, irq: usize) -> Result<(), VectorError> {
        if irq >= IRQ_SLOTS {
            return Err(VectorError::OutOfRange);
        }
        self.slots[IRQ_OFFSET + irq] = None;
        Ok(())
    }

    /// Handler for vector `index`; the generic handler for empty or unknown slots.
    pub fn handler(&self, index: usize) -> TrapHandler {
        self.slots
            .get(index)
            .copied()
            .flatten()
            .map_or(generic_handler as TrapHandler, |slot| slot.handler)
    }

    /// Handler for exception `code`. Codes past the exception slots never
    /// reach the IRQ half of the table; they are unhandled exceptions.
    pub fn exception_handler(&self, code: usize) -> TrapHandler {
        if code >= EXCEPTION_SLOTS {
            return unhandled_exception;
        }
        self.handler(code)
    }

    pub fn name(&self, index: usize) -> &'static str {
        self.slots.get(index).copied().flatten().map_or("default", |slot| slot.name)
    }

    pub fn is_registered(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }
}

impl Default for VectorTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Default handler: unexpected IRQs are logged and dropped, exceptions
/// without a registered handler are fatal.
pub fn generic_handler(kernel: &mut Kernel, frame: &mut TrapFrame, index: usize) {
    if index >= IRQ_OFFSET {
        log_warn!(target: "trap", "unhandled irq {}", index - IRQ_OFFSET);
        return;
    }
    unhandled_exception(kernel, frame, index);
}

fn unhandled_exception(_kernel: &mut Kernel, frame: &mut TrapFrame, index: usize) {
    panic!(
        "unhandled exception {} ({})\n{}",
        index,
        describe_cause(frame.scause),
        TrapDump(frame)
    );
}

/// Maps a user-mode fault onto the signal POSIX prescribes for it.
pub(crate) fn fault_signal(code: usize) -> Option<Signal> {
    use super::*;
    match code {
        EXC_INST_MISALIGNED | EXC_LOAD_MISALIGNED | EXC_STORE_MISALIGNED => Some(Signal::SIGBUS),
        EXC_INST_ACCESS | EXC_LOAD_ACCESS | EXC_STORE_ACCESS => Some(Signal::SIGSEGV),
        EXC_INST_PAGE_FAULT | EXC_LOAD_PAGE_FAULT | EXC_STORE_PAGE_FAULT => Some(Signal::SIGSEGV),
        EXC_ILLEGAL_INST => Some(Signal::SIGILL),
        EXC_BREAKPOINT => Some(Signal::SIGTRAP),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut Kernel, _: &mut TrapFrame, _: usize) {}

    #[test]
    fn out_of_range_indices_are_rejected() {
        let mut table = VectorTable::new();
        assert_eq!(table.register_irq(IRQ_SLOTS, "bad", noop), Err(VectorError::OutOfRange));
        assert_eq!(table.unregister_irq(IRQ_SLOTS + 3), Err(VectorError::OutOfRange));
        assert_eq!(
            table.register_exception(EXCEPTION_SLOTS, "bad", noop),
            Err(VectorError::OutOfRange)
        );
    }

    #[test]
    fn unregister_restores_default() {
        let mut table = VectorTable::new();
        table.register_irq(10, "uart", noop).unwrap();
        assert!(table.is_registered(IRQ_OFFSET + 10));
        assert_eq!(table.name(IRQ_OFFSET + 10), "uart");
        table.unregister_irq(10).unwrap();
        assert!(!table.is_registered(IRQ_OFFSET + 10));
        assert_eq!(table.name(IRQ_OFFSET + 10), "default");
    }

    #[test]
    fn exception_codes_never_reach_irq_slots() {
        let mut table = VectorTable::new();
        table.register_irq(8, "dev", noop).unwrap();
        table.register_exception(super::super::EXC_BREAKPOINT, "bp", noop).unwrap();
        assert_eq!(table.exception_handler(super::super::EXC_BREAKPOINT) as usize, noop as TrapHandler as usize);
        assert_eq!(table.exception_handler(IRQ_OFFSET + 8) as usize, unhandled_exception as TrapHandler as usize);
        assert_eq!(table.exception_handler(usize::MAX) as usize, unhandled_exception as TrapHandler as usize);
    }

    #[test]
    fn faults_map_to_posix_signals() {
        assert_eq!(fault_signal(super::super::EXC_LOAD_PAGE_FAULT), Some(Signal::SIGSEGV));
        assert_eq!(fault_signal(super::super::EXC_STORE_MISALIGNED), Some(Signal::SIGBUS));
        assert_eq!(fault_signal(super::super::EXC_ILLEGAL_INST), Some(Signal::SIGILL));
        assert_eq!(fault_signal(super::super::EXC_BREAKPOINT), Some(Signal::SIGTRAP));
        assert_eq!(fault_signal(super::super::EXC_USER_ECALL), None);
    }
}
