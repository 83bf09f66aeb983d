// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Bare-metal glue between the assembly trap vector and [`Kernel::handle_trap`]
//! OWNERS: @kernel-team
//! PUBLIC API: install(kernel), idle_loop()
//! DEPENDS_ON: arch/riscv/trap.S, arch::riscv, kernel::Kernel
//! INVARIANTS: install() runs once, before interrupts are enabled; single hart
//!
//! A task switched away inside `handle_trap` keeps its borrow of the kernel
//! suspended on its own kernel stack; it is only touched again once that task
//! is resumed, so at most one trap path runs at a time.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use super::TrapFrame;
use crate::arch::riscv;
use crate::kernel::{Kernel, KernelThreadEntry};
use crate::sched::TaskContext;

core::arch::global_asm!(
    include_str!("../arch/riscv/trap.S"),
    TF_SIZE = const core::mem::size_of::<TrapFrame>(),
    OFF_SEPC = const 32 * 8,
    OFF_SSTATUS = const 33 * 8,
    OFF_SCAUSE = const 34 * 8,
    OFF_STVAL = const 35 * 8,
);

extern "C" {
    fn __trap_vector();
    fn __user_entry();
    fn __kthread_entry();
}

static KERNEL: AtomicPtr<Kernel> = AtomicPtr::new(ptr::null_mut());

fn kernel() -> &'static mut Kernel {
    let kernel = KERNEL.load(Ordering::Acquire);
    assert!(!kernel.is_null(), "trap: no kernel installed");
    // SAFETY: the pointer came from a `&'static mut` in `install`; exclusivity
    // follows from the single-hart, interrupts-masked trap path.
    unsafe { &mut *kernel }
}

/// Publishes `kernel` to the trap vector, points `stvec` at it and enables
/// the timer and external interrupt sources.
pub fn install(kernel: &'static mut Kernel) {
    let tick = kernel.tunables().tick_period_ns();
    KERNEL.store(kernel, Ordering::Release);
    // SAFETY: sscratch == 0 marks "running in S-mode" for the trap vector.
    unsafe { ::riscv::register::sscratch::write(0) };
    riscv::configure_traps(__trap_vector as usize);
    riscv::enable_interrupt_sources();
    if cfg!(feature = "timer_irq") {
        let kernel = self::kernel();
        let now = kernel.timer.now();
        kernel.timer.set_wakeup(now.saturating_add(tick));
    }
    log_info!(target: "trap", "vector installed at 0x{:x}", __trap_vector as usize);
}

/// Body of the idle task once boot is complete.
pub fn idle_loop() -> ! {
    loop {
        riscv::irq_enable();
        riscv::wait_for_interrupt();
    }
}

#[no_mangle]
extern "C" fn __trap_rust(frame: &mut TrapFrame) {
    kernel().handle_trap(frame);
}

/// Copies the saved user frame of the task being started onto its kernel stack.
#[no_mangle]
extern "C" fn __user_entry_rust(frame: &mut TrapFrame) {
    let kernel = kernel();
    *frame = kernel.current_task().map(|task| task.frame()).unwrap_or_default();
}

#[no_mangle]
extern "C" fn __kthread_start(entry: usize, arg: usize) {
    // SAFETY: `entry` was stored from a `KernelThreadEntry` by `kernel_thread_context`.
    let entry: KernelThreadEntry = unsafe { core::mem::transmute(entry) };
    riscv::irq_enable();
    entry(arg);
    kernel().exit(0);
}

/// Context whose first switch-in enters user mode with the task's saved frame.
pub fn user_context(stack_top: usize) -> TaskContext {
    TaskContext::new(__user_entry as usize, stack_top, 0, 0)
}

/// Context whose first switch-in runs `entry(arg)` and exits the thread.
pub fn kernel_thread_context(entry: KernelThreadEntry, arg: usize, stack_top: usize) -> TaskContext {
    TaskContext::new(__kthread_entry as usize, stack_top, entry as usize, arg)
}
