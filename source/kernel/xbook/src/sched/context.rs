// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Context-switch primitive.
//!
//! The scheduler calls [`ContextSwitch::switch`] and nothing else touches
//! callee-saved register state. On RISC-V the switch is a short assembly
//! routine; host builds plug in [`HostSwitch`], which does nothing, so the
//! scheduler's bookkeeping can be tested without real stacks.

/// Callee-saved register file of a suspended task.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskContext {
    pub ra: usize,
    pub sp: usize,
    pub s: [usize; 12],
}

impl TaskContext {
    /// Context that starts at `entry` on the stack ending at `stack_top`,
    /// with `s0`/`s1` preloaded for the entry trampoline.
    pub fn new(entry: usize, stack_top: usize, s0: usize, s1: usize) -> Self {
        let mut s = [0usize; 12];
        s[0] = s0;
        s[1] = s1;
        Self { ra: entry, sp: stack_top, s }
    }
}

/// Saves the caller's registers into `from` and resumes `to`.
pub trait ContextSwitch {
    /// # Safety
    /// `from` must be writable and `to` must hold a context previously saved
    /// by this primitive or built with [`TaskContext::new`] over a live stack.
    /// Interrupts must be masked and no lock may be held.
    unsafe fn switch(&self, from: *mut TaskContext, to: *const TaskContext);
}

/// Switch used off-target: control stays with the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSwitch;

impl ContextSwitch for HostSwitch {
    unsafe fn switch(&self, _from: *mut TaskContext, _to: *const TaskContext) {}
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
core::arch::global_asm!(
    ".section .text",
    ".globl __switch_context",
    ".align 2",
    "__switch_context:",
    "    sd ra, 0(a0)",
    "    sd sp, 8(a0)",
    "    sd s0, 16(a0)",
    "    sd s1, 24(a0)",
    "    sd s2, 32(a0)",
    "    sd s3, 40(a0)",
    "    sd s4, 48(a0)",
    "    sd s5, 56(a0)",
    "    sd s6, 64(a0)",
    "    sd s7, 72(a0)",
    "    sd s8, 80(a0)",
    "    sd s9, 88(a0)",
    "    sd s10, 96(a0)",
    "    sd s11, 104(a0)",
    "    ld ra, 0(a1)",
    "    ld sp, 8(a1)",
    "    ld s0, 16(a1)",
    "    ld s1, 24(a1)",
    "    ld s2, 32(a1)",
    "    ld s3, 40(a1)",
    "    ld s4, 48(a1)",
    "    ld s5, 56(a1)",
    "    ld s6, 64(a1)",
    "    ld s7, 72(a1)",
    "    ld s8, 80(a1)",
    "    ld s9, 88(a1)",
    "    ld s10, 96(a1)",
    "    ld s11, 104(a1)",
    "    ret",
);

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
extern "C" {
    fn __switch_context(from: *mut TaskContext, to: *const TaskContext);
}

/// Assembly switch for RV64.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct RiscvSwitch;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
impl ContextSwitch for RiscvSwitch {
    unsafe fn switch(&self, from: *mut TaskContext, to: *const TaskContext) {
        // SAFETY: forwarded from the caller's contract.
        unsafe { __switch_context(from, to) }
    }
}

static_assertions::const_assert_eq!(
    core::mem::size_of::<TaskContext>(),
    14 * core::mem::size_of::<usize>()
);
