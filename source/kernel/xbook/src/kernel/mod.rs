// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel aggregate tying the registry, scheduler, clock and trap tables together
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests + integration tests under tests/
//! PUBLIC API: Kernel, KernelConfig, WaitTarget, ProcessTimes, MaskHow, Delivery
//! DEPENDS_ON: task, sched, time, trap, signal, syscall, mm::AddressSpaces, hal::{Timer, InterruptController}
//! INVARIANTS: Created once at boot; the idle task (PID 0) always exists; one Kernel per hart
//!
//! Everything that needs to find a task goes through the registry owned here.
//! The scheduling wrappers forward to [`Scheduler`] with the registry and the
//! configured context-switch primitive.

mod process;
mod signals;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::config::Tunables;
use crate::hal::{InterruptController, Timer};
use crate::mm::AddressSpaces;
use crate::sched::{ContextSwitch, Scheduler, TaskContext, PRIORITY_IDLE};
use crate::signal::SignalState;
use crate::syscall::{api, SyscallTable};
use crate::task::{CreateError, KernelStack, Task, TaskFlags, TaskInner, TaskRegistry, TaskState};
use crate::time::{Clock, TimerEvent};
use crate::trap::{self, SoftIrq, SoftIrqQueue, TrapFrame, VectorTable};
use crate::types::{Pid, Ticks};

pub use process::{KernelThreadEntry, ProcessTimes, WaitTarget};
pub use signals::{Delivery, MaskHow};

/// Exception codes routed to the fault handler by default.
const FAULT_CODES: [usize; 11] = [
    trap::EXC_INST_MISALIGNED,
    trap::EXC_INST_ACCESS,
    trap::EXC_ILLEGAL_INST,
    trap::EXC_BREAKPOINT,
    trap::EXC_LOAD_MISALIGNED,
    trap::EXC_LOAD_ACCESS,
    trap::EXC_STORE_MISALIGNED,
    trap::EXC_STORE_ACCESS,
    trap::EXC_INST_PAGE_FAULT,
    trap::EXC_LOAD_PAGE_FAULT,
    trap::EXC_STORE_PAGE_FAULT,
];

/// Boot-time configuration and platform collaborators.
pub struct KernelConfig {
    pub tunables: Tunables,
    pub spaces: Box<dyn AddressSpaces>,
    pub cpu: Box<dyn ContextSwitch>,
    pub timer: Box<dyn Timer>,
    pub irq: Box<dyn InterruptController>,
}

impl Default for KernelConfig {
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    fn default() -> Self {
        use crate::hal::sim::{SimIrq, SimTimer};
        Self {
            tunables: Tunables::default(),
            spaces: Box::new(crate::mm::SimSpaces::new()),
            cpu: Box::new(crate::sched::HostSwitch),
            timer: Box::new(SimTimer::new()),
            irq: Box::new(SimIrq::new()),
        }
    }

    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    fn default() -> Self {
        use crate::hal::virt::{Plic, SbiTimer};
        Self {
            tunables: Tunables::default(),
            spaces: Box::new(crate::mm::SimSpaces::new()),
            cpu: Box::new(crate::sched::RiscvSwitch),
            timer: Box::new(SbiTimer),
            irq: Box::new(Plic),
        }
    }
}

pub struct Kernel {
    pub(crate) tasks: TaskRegistry,
    pub(crate) sched: Scheduler,
    pub(crate) clock: Clock,
    pub(crate) vectors: VectorTable,
    pub(crate) softirq: SoftIrqQueue,
    pub(crate) syscalls: SyscallTable,
    pub(crate) tunables: Tunables,
    pub(crate) spaces: Box<dyn AddressSpaces>,
    cpu: Box<dyn ContextSwitch>,
    pub(crate) timer: Box<dyn Timer>,
    pub(crate) irq: Box<dyn InterruptController>,
    /// Exited tasks nobody will wait for.
    reap: Vec<Pid>,
}
static_assertions::assert_not_impl_any!(Kernel: Sync);

impl Kernel {
    /// Builds the kernel around the boot context, which becomes the idle task.
    pub fn new(config: KernelConfig) -> Result<Self, CreateError> {
        let tasks = TaskRegistry::new();
        let mut sched = Scheduler::new(config.tunables);

        let mut inner = TaskInner::new(KernelStack::allocate()?, PRIORITY_IDLE, sched.timeslice_for(PRIORITY_IDLE));
        inner.flags.insert(TaskFlags::KERNEL);
        let idle = Arc::new(Task::new(Pid::IDLE, "idle", TaskContext::default(), inner, SignalState::new()));
        tasks.insert(idle.clone());
        sched.adopt_boot_task(&idle);

        let mut vectors = VectorTable::new();
        for code in FAULT_CODES {
            let _ = vectors.register_exception(code, "user-fault", user_fault);
        }
        let _ = vectors.register_exception(trap::EXC_USER_ECALL, "syscall", user_ecall);

        let mut syscalls = SyscallTable::new();
        api::install_handlers(&mut syscalls);

        if !config.tunables.is_valid() {
            let (asked, used) = (config.tunables.tick_hz, config.tunables.tick_rate());
            log_warn!(target: "kernel", "tick {} Hz out of range, using {} Hz", asked, used);
        }
        log_info!(target: "kernel", "xbook: up, tick {} Hz", config.tunables.tick_rate());
        Ok(Self {
            tasks,
            sched,
            clock: Clock::new(),
            vectors,
            softirq: SoftIrqQueue::new(),
            syscalls,
            tunables: config.tunables,
            spaces: config.spaces,
            cpu: config.cpu,
            timer: config.timer,
            irq: config.irq,
            reap: Vec::new(),
        })
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    pub fn vectors(&self) -> &VectorTable {
        &self.vectors
    }

    pub fn vectors_mut(&mut self) -> &mut VectorTable {
        &mut self.vectors
    }

    pub fn softirq_mut(&mut self) -> &mut SoftIrqQueue {
        &mut self.softirq
    }

    pub fn syscalls_mut(&mut self) -> &mut SyscallTable {
        &mut self.syscalls
    }

    pub fn address_spaces(&self) -> &dyn AddressSpaces {
        &*self.spaces
    }

    pub fn current(&self) -> Pid {
        self.sched.current()
    }

    pub fn current_task(&self) -> Option<Arc<Task>> {
        self.tasks.find_by_pid(self.sched.current())
    }

    pub fn task(&self, pid: Pid) -> Option<Arc<Task>> {
        self.tasks.find_by_pid(pid)
    }

    // ——— scheduling ———

    /// Parks the current task in `state` and runs the next one.
    pub fn block(&mut self, state: TaskState) {
        self.sched.block(&self.tasks, &*self.cpu, state);
    }

    pub fn unblock(&mut self, pid: Pid) -> bool {
        match self.tasks.find_by_pid(pid) {
            Some(task) => self.sched.unblock(&task),
            None => false,
        }
    }

    pub fn wakeup(&mut self, pid: Pid) -> bool {
        match self.tasks.find_by_pid(pid) {
            Some(task) => self.sched.wakeup(&task),
            None => false,
        }
    }

    pub fn yield_now(&mut self) {
        self.sched.yield_now(&self.tasks, &*self.cpu);
    }

    /// Accounts one tick to the running task; true if it was preempted.
    pub fn tick(&mut self, in_kernel: bool) -> bool {
        self.sched.tick(&self.tasks, &*self.cpu, in_kernel)
    }

    /// Blocks the current task for `ticks` ticks or until woken earlier.
    ///
    /// The sleep stays recorded on the task until [`Kernel::resume_sleep`]
    /// collects it, so the caller can tell an expired timer from an early wake.
    pub fn sleep_by_ticks(&mut self, ticks: Ticks) {
        let pid = self.sched.current();
        let Some(task) = self.tasks.find_by_pid(pid) else {
            return;
        };
        let timer = self.clock.arm(ticks, TimerEvent::Wake(pid));
        let deadline = self.clock.deadline(timer).unwrap_or(self.clock.now());
        let previous = task.lock().sleep.replace(crate::task::SleepState { deadline, timer });
        if let Some(stale) = previous {
            self.clock.cancel(stale.timer);
        }
        drop(task);
        self.block(TaskState::Blocked);
    }

    /// Ends the recorded sleep of `pid`; returns the ticks that were left
    /// (0 when the timer fired), or `None` if the task was not sleeping.
    pub fn resume_sleep(&mut self, pid: Pid) -> Option<Ticks> {
        let task = self.tasks.find_by_pid(pid)?;
        let sleep = task.lock().sleep.take()?;
        Some(self.clock.cancel(sleep.timer).unwrap_or(0))
    }

    /// Marks `pid` for cancellation. Asynchronous-mode targets are woken so
    /// they reach the return-to-user boundary where cancellation is acted on.
    pub fn cancel(&mut self, pid: Pid) -> bool {
        let Some(task) = self.tasks.find_by_pid(pid) else {
            return false;
        };
        let wake = {
            let mut inner = task.lock();
            if inner.state.has_exited() {
                return false;
            }
            inner.flags.insert(TaskFlags::CANCELED);
            inner.flags.contains(TaskFlags::CANCEL_ASYNC) && !inner.flags.contains(TaskFlags::CANCEL_DISABLE)
        };
        if wake {
            self.sched.wakeup(&task);
        }
        true
    }

    /// Enables or disables cancellation for the current task; returns the old setting.
    pub fn set_cancel_enabled(&mut self, enabled: bool) -> bool {
        !self.update_current_flag(TaskFlags::CANCEL_DISABLE, !enabled)
    }

    /// Switches the current task between deferred and asynchronous cancellation.
    pub fn set_cancel_async(&mut self, asynchronous: bool) -> bool {
        self.update_current_flag(TaskFlags::CANCEL_ASYNC, asynchronous)
    }

    /// Sets or clears `flag` on the current task, returning whether it was set before.
    fn update_current_flag(&mut self, flag: TaskFlags, set: bool) -> bool {
        let Some(task) = self.current_task() else {
            return false;
        };
        let mut inner = task.lock();
        let was = inner.flags.contains(flag);
        inner.flags.set(flag, set);
        was
    }

    /// Cancellation point: ends the current task if a request is pending and
    /// cancellation is enabled. Returns false when the task keeps running.
    pub fn test_cancel(&mut self) -> bool {
        let pid = self.sched.current();
        let Some(task) = self.tasks.find_by_pid(pid) else {
            return false;
        };
        let flags = task.flags();
        drop(task);
        if flags.contains(TaskFlags::CANCELED) && !flags.contains(TaskFlags::CANCEL_DISABLE) {
            self.exit_task(pid, trap::CANCELED_EXIT_CODE);
            return true;
        }
        false
    }

    // ——— deferred work ———

    /// Drains soft interrupts raised so far, including ones raised while draining.
    pub fn run_softirqs(&mut self) {
        loop {
            let pending = self.softirq.take();
            if pending.is_empty() {
                break;
            }
            if pending.contains(SoftIrq::TIMER) {
                while let Some((id, event)) = self.clock.pop_expired() {
                    match event {
                        TimerEvent::Wake(pid) => self.timer_wake(id, pid),
                    }
                }
            }
            if pending.contains(SoftIrq::REAP) {
                self.reap_detached();
            }
            if pending.contains(SoftIrq::DEVICE) {
                while let Some(work) = self.softirq.next_device_work() {
                    work(self);
                }
            }
        }
    }

    fn timer_wake(&mut self, id: crate::time::TimerId, pid: Pid) {
        let Some(task) = self.tasks.find_by_pid(pid) else {
            return;
        };
        let ours = task.lock().sleep.is_some_and(|sleep| sleep.timer == id);
        if ours && task.state() == TaskState::Blocked {
            log_trace!(target: "time", "sleep of {} expired", pid);
            self.sched.wakeup(&task);
        }
    }

    /// Destroys queued exited tasks; the running task is kept until it has
    /// switched away from its own stack.
    fn reap_detached(&mut self) {
        let current = self.sched.current();
        let queued = core::mem::take(&mut self.reap);
        for pid in queued {
            if pid == current {
                self.reap.push(pid);
            } else {
                self.destroy(pid);
            }
        }
    }
}

/// Default handler for user faults: lets the memory manager resolve page
/// faults, otherwise raises the matching signal against the current task.
fn user_fault(kernel: &mut Kernel, frame: &mut TrapFrame, code: usize) {
    let pid = kernel.current();
    if matches!(code, trap::EXC_INST_PAGE_FAULT | trap::EXC_LOAD_PAGE_FAULT | trap::EXC_STORE_PAGE_FAULT) {
        let space = kernel.tasks.find_by_pid(pid).and_then(|task| task.address_space());
        if let Some(space) = space {
            if kernel.spaces.handle_page_fault(space, frame.stval, code) {
                return;
            }
        }
    }
    let Some(sig) = trap::fault_signal(code) else {
        return;
    };
    log_info!(
        target: "trap",
        "pid {}: {} at sepc=0x{:x} stval=0x{:x} -> {}",
        pid,
        trap::describe_cause(frame.scause),
        frame.sepc,
        frame.stval,
        sig
    );
    let _ = kernel.force_signal(pid, sig);
}

fn user_ecall(kernel: &mut Kernel, frame: &mut TrapFrame, _code: usize) {
    kernel.syscall(frame);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::PRIORITY_NORMAL;

    #[test]
    fn boot_task_is_idle_and_running() {
        let kernel = Kernel::new(KernelConfig::default()).unwrap();
        assert_eq!(kernel.current(), Pid::IDLE);
        let idle = kernel.current_task().unwrap();
        assert_eq!(idle.state(), TaskState::Running);
        assert!(idle.is_kernel_thread());
        assert!(kernel.vectors().is_registered(trap::EXC_USER_ECALL));
        assert!(kernel.vectors().is_registered(trap::EXC_LOAD_PAGE_FAULT));
        assert!(!kernel.vectors().is_registered(trap::EXC_SUPERVISOR_ECALL));
    }

    #[test]
    fn timed_sleep_reports_remaining_on_early_wake() {
        let mut kernel = Kernel::new(KernelConfig::default()).unwrap();
        let t = kernel.create("sleeper", PRIORITY_NORMAL).unwrap();
        kernel.yield_now();
        assert_eq!(kernel.current(), t.pid());
        kernel.sleep_by_ticks(10);
        assert_eq!(t.state(), TaskState::Blocked);
        assert_eq!(kernel.current(), Pid::IDLE);
        assert!(kernel.wakeup(t.pid()));
        assert_eq!(kernel.resume_sleep(t.pid()), Some(10));
        assert_eq!(kernel.clock().armed(), 0);
        assert_eq!(kernel.resume_sleep(t.pid()), None);
    }

    #[test]
    fn deferred_cancellation_waits_for_a_cancellation_point() {
        let mut kernel = Kernel::new(KernelConfig::default()).unwrap();
        let t = kernel.create("worker", PRIORITY_NORMAL).unwrap();
        kernel.yield_now();
        assert!(kernel.set_cancel_enabled(false));
        assert!(kernel.cancel(t.pid()));
        assert!(!kernel.test_cancel());
        assert!(!kernel.set_cancel_enabled(true));
        assert!(kernel.test_cancel());
        assert!(t.state().has_exited());
        assert_eq!(t.exit_status(), trap::CANCELED_EXIT_CODE);
        assert_eq!(kernel.current(), Pid::IDLE);
    }

    #[test]
    fn softirqs_raised_while_draining_are_drained_too() {
        fn raise_timer(kernel: &mut Kernel) {
            kernel.softirq_mut().raise(SoftIrq::TIMER);
        }
        let mut kernel = Kernel::new(KernelConfig::default()).unwrap();
        kernel.softirq_mut().defer(raise_timer);
        kernel.run_softirqs();
        assert!(kernel.softirq_mut().pending().is_empty());
    }
}
