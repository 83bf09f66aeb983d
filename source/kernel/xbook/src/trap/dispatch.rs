// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Rust side of trap handling.
//!
//! The saved user context of a task lives in its control block. A trap works
//! on a copy of the live frame, stores the result into the task that took the
//! trap and, before returning, loads the frame of whichever task is current.

use super::{record, TrapClass, TrapDump, TrapFrame, IRQ_OFFSET};
use crate::kernel::Kernel;
use crate::task::TaskFlags;
use crate::trap::SoftIrq;

/// Exit status of a task ended by cancellation.
pub const CANCELED_EXIT_CODE: i32 = -1;

impl Kernel {
    /// Handles one trap described by `live` and leaves in it the context to
    /// resume. Kernel-mode exceptions are fatal.
    pub fn handle_trap(&mut self, live: &mut TrapFrame) {
        record(live);
        let class = TrapClass::classify(live);
        let from_user = live.from_user();
        let entry = self.current();
        let mut frame = *live;
        if from_user {
            self.save_user_frame(entry, &frame);
        }

        match class {
            TrapClass::TimerInterrupt => self.timer_interrupt(!from_user),
            TrapClass::ExternalInterrupt => {
                while let Some(irq) = self.irq.claim() {
                    let index = IRQ_OFFSET + irq;
                    let handler = self.vectors.handler(index);
                    handler(self, &mut frame, index);
                    self.irq.complete(irq);
                }
                self.run_softirqs();
            }
            TrapClass::Exception { code, from_kernel: true } => {
                panic!("kernel trap: exception {} in pid {}\n{}", code, entry, TrapDump(&frame));
            }
            TrapClass::Exception { code, from_kernel: false } => {
                let handler = self.vectors.exception_handler(code);
                handler(self, &mut frame, code);
            }
            TrapClass::Unsupported(code) => {
                panic!("unsupported interrupt {}\n{}", code, TrapDump(&frame));
            }
        }

        if !from_user {
            return;
        }
        self.save_user_frame(entry, &frame);
        self.return_to_user();
        if let Some(task) = self.current_task() {
            if !task.is_kernel_thread() {
                *live = task.frame();
            }
        }
    }

    fn save_user_frame(&self, pid: crate::types::Pid, frame: &TrapFrame) {
        if let Some(task) = self.task(pid) {
            let mut inner = task.lock();
            if !inner.state.has_exited() {
                inner.frame = *frame;
            }
        }
    }

    /// Clock and alarm bookkeeping for one timer interrupt; the scheduler
    /// tick comes last since it may switch away.
    fn timer_interrupt(&mut self, in_kernel: bool) {
        if self.clock.advance() {
            self.softirq.raise(SoftIrq::TIMER);
        }
        self.tick_alarms();
        if cfg!(feature = "timer_irq") {
            let next = self.timer.now().saturating_add(self.tunables.tick_period_ns());
            self.timer.set_wakeup(next);
        }
        self.run_softirqs();
        self.tick(in_kernel);
    }

    /// Acts on asynchronous cancellation and pending signals of the task about
    /// to run in user mode. Repeats while that changes which task is current.
    fn return_to_user(&mut self) {
        loop {
            let pid = self.current();
            let Some(task) = self.task(pid) else {
                return;
            };
            if task.is_kernel_thread() {
                return;
            }
            let flags = task.flags();
            drop(task);
            let cancel = TaskFlags::CANCELED | TaskFlags::CANCEL_ASYNC;
            if flags.contains(cancel) && !flags.contains(TaskFlags::CANCEL_DISABLE) {
                self.exit_task(pid, CANCELED_EXIT_CODE);
                continue;
            }
            self.deliver_pending(pid);
            if self.current() == pid {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{SimIrq, SimTimer};
    use crate::kernel::KernelConfig;
    use crate::mm::SimSpaces;
    use crate::sched::PRIORITY_NORMAL;
    use crate::signal::{exit_status_signal, Signal};
    use crate::trap::{EXC_LOAD_PAGE_FAULT, EXC_USER_ECALL, INTERRUPT_FLAG, IRQ_EXTERNAL, IRQ_TIMER, SSTATUS_SPP};
    use crate::types::Pid;
    use alloc::boxed::Box;
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct Rig {
        kernel: Kernel,
        timer: Arc<SimTimer>,
        irq: Arc<SimIrq>,
        spaces: Arc<SimSpaces>,
    }

    fn rig() -> Rig {
        let timer = Arc::new(SimTimer::new());
        let irq = Arc::new(SimIrq::new());
        let spaces = Arc::new(SimSpaces::new());
        let kernel = Kernel::new(KernelConfig {
            timer: Box::new(timer.clone()),
            irq: Box::new(irq.clone()),
            spaces: Box::new(spaces.clone()),
            ..KernelConfig::default()
        })
        .unwrap();
        Rig { kernel, timer, irq, spaces }
    }

    fn user_trap(kernel: &Kernel, scause: usize) -> TrapFrame {
        let mut frame = kernel.current_task().unwrap().frame();
        frame.scause = scause;
        frame
    }

    #[test]
    fn timer_interrupt_advances_clock_and_rearms() {
        let mut rig = rig();
        let mut frame = TrapFrame { scause: INTERRUPT_FLAG | IRQ_TIMER, sstatus: SSTATUS_SPP, ..Default::default() };
        rig.kernel.handle_trap(&mut frame);
        assert_eq!(rig.kernel.clock().now(), 1);
        assert_eq!(rig.timer.wakeup_count(), 1);
        assert_eq!(rig.timer.last_wakeup(), Some(rig.kernel.tunables().tick_period_ns()));
    }

    #[test]
    fn external_interrupts_are_claimed_and_completed() {
        static SEEN: AtomicUsize = AtomicUsize::new(0);
        fn uart(_: &mut Kernel, _: &mut TrapFrame, index: usize) {
            SEEN.store(index, Ordering::SeqCst);
        }
        let mut rig = rig();
        rig.kernel.vectors_mut().register_irq(10, "uart", uart).unwrap();
        rig.irq.raise(10);
        rig.irq.raise(3);
        let mut frame = TrapFrame { scause: INTERRUPT_FLAG | IRQ_EXTERNAL, sstatus: SSTATUS_SPP, ..Default::default() };
        rig.kernel.handle_trap(&mut frame);
        assert_eq!(SEEN.load(Ordering::SeqCst), IRQ_OFFSET + 10);
        assert_eq!(rig.irq.completed(), [10, 3]);
    }

    #[test]
    #[should_panic(expected = "kernel trap")]
    fn kernel_mode_exception_is_fatal() {
        let mut rig = rig();
        let mut frame =
            TrapFrame { scause: EXC_LOAD_PAGE_FAULT, sstatus: SSTATUS_SPP, stval: 0xdead, ..Default::default() };
        rig.kernel.handle_trap(&mut frame);
    }

    #[test]
    #[should_panic(expected = "unhandled exception")]
    fn reserved_user_exception_is_fatal() {
        let mut rig = rig();
        let space = rig.spaces.create().unwrap();
        rig.kernel.create_process("init", PRIORITY_NORMAL, space, 0x1000, 0x8000).unwrap();
        rig.kernel.yield_now();
        let mut frame = user_trap(&rig.kernel, 14);
        rig.kernel.handle_trap(&mut frame);
    }

    #[test]
    #[should_panic(expected = "unhandled exception 24")]
    fn custom_exception_code_does_not_alias_an_irq_line() {
        fn dev(_: &mut Kernel, _: &mut TrapFrame, index: usize) {
            panic!("device handler ran for vector {}", index);
        }
        let mut rig = rig();
        rig.kernel.vectors_mut().register_irq(24 - IRQ_OFFSET, "dev", dev).unwrap();
        let space = rig.spaces.create().unwrap();
        rig.kernel.create_process("init", PRIORITY_NORMAL, space, 0x1000, 0x8000).unwrap();
        rig.kernel.yield_now();
        let mut frame = user_trap(&rig.kernel, 24);
        rig.kernel.handle_trap(&mut frame);
    }

    #[test]
    fn unmapped_user_access_kills_with_segv() {
        let mut rig = rig();
        let space = rig.spaces.create().unwrap();
        let task = rig.kernel.create_process("init", PRIORITY_NORMAL, space, 0x1000, 0x8000).unwrap();
        rig.kernel.yield_now();
        let mut frame = user_trap(&rig.kernel, EXC_LOAD_PAGE_FAULT);
        frame.stval = 0x4_0000;
        rig.kernel.handle_trap(&mut frame);
        assert!(task.state().has_exited());
        assert_eq!(task.exit_status(), exit_status_signal(Signal::SIGSEGV, true));
        assert_eq!(rig.kernel.current(), Pid::IDLE);
    }

    #[test]
    fn ecall_returns_past_the_instruction_with_the_result() {
        let mut rig = rig();
        let space = rig.spaces.create().unwrap();
        let task = rig.kernel.create_process("init", PRIORITY_NORMAL, space, 0x1000, 0x8000).unwrap();
        rig.kernel.yield_now();
        let mut frame = user_trap(&rig.kernel, EXC_USER_ECALL);
        frame.x[TrapFrame::A7] = 172;
        rig.kernel.handle_trap(&mut frame);
        assert_eq!(frame.sepc, 0x1004);
        assert_eq!(frame.arg(0), task.pid().as_raw() as usize);
        assert_eq!(task.frame(), frame);
    }

    #[test]
    fn async_cancellation_ends_the_task_on_return_to_user() {
        let mut rig = rig();
        let space = rig.spaces.create().unwrap();
        let task = rig.kernel.create_process("worker", PRIORITY_NORMAL, space, 0x1000, 0x8000).unwrap();
        rig.kernel.yield_now();
        rig.kernel.set_cancel_async(true);
        assert!(rig.kernel.cancel(task.pid()));
        let mut frame = user_trap(&rig.kernel, INTERRUPT_FLAG | IRQ_TIMER);
        rig.kernel.handle_trap(&mut frame);
        assert!(task.state().has_exited());
        assert_eq!(task.exit_status(), CANCELED_EXIT_CODE);
    }
}
