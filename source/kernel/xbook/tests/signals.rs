// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Signal delivery across the trap boundary on the host build
//! OWNERS: @kernel-team
//! STATUS: Functional
//! TEST_SCENARIOS:
//!   - handler_runs_and_sigreturn_restores_context(): user handler frame push and rt_sigreturn
//!   - blocked_signal_is_delivered_once_unblocked(): sigprocmask defers default termination
//!   - periodic_alarm_fires_only_at_user_boundary(): SIGALRM stays pending across kernel-mode ticks
//!   - disarmed_alarm_never_fires(): set_alarm(0, 0) cancels a pending countdown

use std::sync::Arc;

use xbook::kernel::MaskHow;
use xbook::mm::SimSpaces;
use xbook::sched::PRIORITY_NORMAL;
use xbook::signal::{exit_status_signal, Alarm, SigAction, SigSet, Signal};
use xbook::syscall::{SYSCALL_GETPID, SYSCALL_RT_SIGRETURN};
use xbook::task::Task;
use xbook::trap::{TrapFrame, EXC_USER_ECALL, INTERRUPT_FLAG, IRQ_TIMER, SSTATUS_SPP};
use xbook::{Kernel, KernelConfig};

const ENTRY: usize = 0x1000;
const STACK_TOP: usize = 0x8000;

fn running_process() -> (Kernel, Arc<Task>) {
    let spaces = Arc::new(SimSpaces::new());
    let mut kernel =
        Kernel::new(KernelConfig { spaces: Box::new(spaces.clone()), ..KernelConfig::default() }).expect("kernel");
    let space = spaces.create().expect("space");
    spaces.map(space, STACK_TOP - 0x1000, 0x1000).expect("stack");
    let task = kernel.create_process("sig", PRIORITY_NORMAL, space, ENTRY, STACK_TOP).expect("process");
    kernel.yield_now();
    assert_eq!(kernel.current(), task.pid());
    (kernel, task)
}

fn ecall(kernel: &mut Kernel, frame: &mut TrapFrame, number: usize) {
    frame.scause = EXC_USER_ECALL;
    frame.x[TrapFrame::A7] = number;
    kernel.handle_trap(frame);
}

fn user_tick(kernel: &mut Kernel) -> TrapFrame {
    let mut frame = kernel.current_task().expect("current").frame();
    frame.scause = INTERRUPT_FLAG | IRQ_TIMER;
    kernel.handle_trap(&mut frame);
    frame
}

fn kernel_tick(kernel: &mut Kernel) {
    let mut frame = TrapFrame { scause: INTERRUPT_FLAG | IRQ_TIMER, sstatus: SSTATUS_SPP, ..Default::default() };
    kernel.handle_trap(&mut frame);
}

#[test]
fn handler_runs_and_sigreturn_restores_context() {
    let (mut kernel, task) = running_process();
    kernel.sigaction(Signal::SIGUSR1.number(), Some(SigAction::handler(0x5000, 0x6000))).expect("sigaction");
    kernel.kill(task.pid().as_raw() as isize, Signal::SIGUSR1.number()).expect("kill");

    let mut frame = task.frame();
    ecall(&mut kernel, &mut frame, SYSCALL_GETPID);
    assert_eq!(frame.sepc, 0x5000);
    assert_eq!(frame.arg(0), Signal::SIGUSR1.number());
    assert_eq!(frame.x[TrapFrame::RA], 0x6000);
    assert!(frame.sp() < STACK_TOP && frame.sp() % 16 == 0);
    assert!(task.signal_state().blocked.contains(Signal::SIGUSR1));

    // The restorer trampoline issues rt_sigreturn with the handler's sp.
    ecall(&mut kernel, &mut frame, SYSCALL_RT_SIGRETURN);
    assert_eq!(frame.sepc, ENTRY + 4);
    assert_eq!(frame.arg(0), task.pid().as_raw() as usize);
    assert_eq!(frame.sp(), STACK_TOP);
    assert!(frame.from_user());
    assert!(task.signal_state().blocked.is_empty());
    assert!(!task.state().has_exited());
}

#[test]
fn blocked_signal_is_delivered_once_unblocked() {
    let (mut kernel, task) = running_process();
    let mut set = SigSet::EMPTY;
    set.insert(Signal::SIGUSR2);
    kernel.sigprocmask(MaskHow::Block, Some(set)).expect("block");
    kernel.kill(task.pid().as_raw() as isize, Signal::SIGUSR2.number()).expect("kill");

    user_tick(&mut kernel);
    assert!(!task.state().has_exited());
    assert!(task.signal_state().pending.contains(Signal::SIGUSR2));

    kernel.sigprocmask(MaskHow::Unblock, Some(set)).expect("unblock");
    user_tick(&mut kernel);
    assert!(task.state().has_exited());
    assert_eq!(task.exit_status(), exit_status_signal(Signal::SIGUSR2, false));
}

#[test]
fn periodic_alarm_fires_only_at_user_boundary() {
    let (mut kernel, task) = running_process();
    kernel.set_alarm(task.pid(), 2, 2).expect("alarm");

    kernel_tick(&mut kernel);
    assert!(!task.signal_state().pending.contains(Signal::SIGALRM));
    kernel_tick(&mut kernel);
    assert!(task.signal_state().pending.contains(Signal::SIGALRM));
    assert_eq!(task.signal_state().alarm, Alarm { remaining: 2, interval: 2 });
    assert!(!task.state().has_exited());

    user_tick(&mut kernel);
    assert!(task.state().has_exited());
    assert_eq!(task.exit_status(), exit_status_signal(Signal::SIGALRM, false));
}

#[test]
fn disarmed_alarm_never_fires() {
    let (mut kernel, task) = running_process();
    kernel.set_alarm(task.pid(), 3, 2).expect("arm");
    let previous = kernel.set_alarm(task.pid(), 0, 0).expect("disarm");
    assert_eq!(previous, Alarm { remaining: 3, interval: 2 });

    for _ in 0..20 {
        kernel_tick(&mut kernel);
    }
    assert!(task.signal_state().pending.is_empty());
    assert!(!task.signal_state().alarm.is_armed());
    let frame = user_tick(&mut kernel);
    assert!(!task.state().has_exited());
    assert_eq!(frame.sepc, ENTRY);
}
