// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Preemptive priority scheduler with per-level FIFO ready queues
//! OWNERS: @kernel-sched-team
//! PUBLIC API: Scheduler (enqueue/block/unblock/wakeup/yield_now/tick/pick_next/dispatch,
//!             wait queues), TaskContext, ContextSwitch, WaitQueueId, priority constants
//! DEPENDS_ON: task::{Task, TaskRegistry}, sched::context (switch primitive), config::Tunables
//! INVARIANTS: A task is in at most one list (one ready queue or one wait queue);
//!             FIFO within a level; idle (level 0) is always Running or queued;
//!             the switch primitive is only called when the next task differs from the current one
//!
//! The scheduler stores PIDs, not tasks. Task fields (state, membership,
//! priorities, slice counters) are updated under each task's own lock, which is
//! always released before the context switch.

pub mod context;
#[cfg(test)]
mod tests_prop;

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use core::marker::PhantomData;

use crate::config::{Tunables, PRIORITY_LEVELS, TIMESLICE_MAX, TIMESLICE_MIN};
use crate::task::{Membership, Task, TaskFlags, TaskRegistry, TaskState};
use crate::types::{Pid, Ticks};

pub use context::{ContextSwitch, HostSwitch, TaskContext};
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub use context::RiscvSwitch;

pub const PRIORITY_IDLE: u8 = 0;
pub const PRIORITY_LOW: u8 = 4;
pub const PRIORITY_NORMAL: u8 = 8;
pub const PRIORITY_HIGH: u8 = 12;
pub const PRIORITY_REALTIME: u8 = (PRIORITY_LEVELS - 1) as u8;

/// Identifier of a scheduler-owned wait queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WaitQueueId(u32);

/// Ticks granted to a task at dynamic priority `priority`.
pub fn timeslice_for(tunables: &Tunables, priority: u8) -> Ticks {
    let slice = tunables.timeslice_base.saturating_mul(u64::from(priority) + 1);
    slice.clamp(TIMESLICE_MIN, TIMESLICE_MAX)
}

/// Single-hart scheduler.
///
/// `!Send`/`!Sync`: it belongs to the one hart that runs the kernel.
pub struct Scheduler {
    ready: [VecDeque<Pid>; PRIORITY_LEVELS],
    waitlists: BTreeMap<WaitQueueId, VecDeque<Pid>>,
    next_queue: u32,
    current: Pid,
    tunables: Tunables,
    switches: u64,
    /// Save area used when the outgoing task no longer exists.
    scratch: TaskContext,
    _not_send_sync: PhantomData<*mut ()>,
}
static_assertions::assert_not_impl_any!(Scheduler: Send, Sync);

impl Scheduler {
    pub fn new(tunables: Tunables) -> Self {
        Self {
            ready: core::array::from_fn(|_| VecDeque::new()),
            waitlists: BTreeMap::new(),
            next_queue: 0,
            current: Pid::IDLE,
            tunables,
            switches: 0,
            scratch: TaskContext::default(),
            _not_send_sync: PhantomData,
        }
    }

    pub fn current(&self) -> Pid {
        self.current
    }

    /// Number of context switches performed so far.
    pub fn switch_count(&self) -> u64 {
        self.switches
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    pub fn timeslice_for(&self, priority: u8) -> Ticks {
        timeslice_for(&self.tunables, priority)
    }

    /// Marks the boot task (idle) as running without a switch.
    pub(crate) fn adopt_boot_task(&mut self, task: &Task) {
        let mut inner = task.lock();
        inner.state = TaskState::Running;
        inner.membership = Membership::None;
        self.current = task.pid();
    }

    /// PIDs queued at `level`, head first.
    pub fn ready_queue(&self, level: u8) -> Vec<Pid> {
        self.ready.get(level as usize).map(|q| q.iter().copied().collect()).unwrap_or_default()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.iter().map(VecDeque::len).sum()
    }

    /// Appends `task` to the tail of its dynamic priority level and marks it Ready.
    /// A task already queued stays where it is.
    pub fn enqueue(&mut self, task: &Task) {
        let mut inner = task.lock();
        match inner.membership {
            Membership::Ready(_) => return,
            Membership::WaitList(queue) => self.unlink_waiter(queue, task.pid()),
            Membership::None => {}
        }
        let level = inner.priority.min((PRIORITY_LEVELS - 1) as u8);
        self.ready[level as usize].push_back(task.pid());
        inner.membership = Membership::Ready(level);
        inner.state = TaskState::Ready;
    }

    /// Takes `task` off whatever list it is on.
    pub(crate) fn unlink(&mut self, task: &Task) {
        let mut inner = task.lock();
        match inner.membership {
            Membership::Ready(level) => {
                if let Some(queue) = self.ready.get_mut(level as usize) {
                    queue.retain(|&pid| pid != task.pid());
                }
            }
            Membership::WaitList(queue) => self.unlink_waiter(queue, task.pid()),
            Membership::None => {}
        }
        inner.membership = Membership::None;
    }

    fn unlink_waiter(&mut self, queue: WaitQueueId, pid: Pid) {
        if let Some(waiters) = self.waitlists.get_mut(&queue) {
            waiters.retain(|&waiter| waiter != pid);
        }
    }

    /// Parks the current task in `state` and runs something else.
    ///
    /// On hardware this returns only once the task has been woken and
    /// re-selected. With a host switch it returns immediately and the task
    /// stays parked.
    ///
    /// # Panics
    /// Panics if `state` is not a sleeping state or the idle task tries to block.
    pub fn block(&mut self, tasks: &TaskRegistry, cpu: &dyn ContextSwitch, state: TaskState) {
        assert!(state.is_sleeping(), "block: {:?} is not a sleeping state", state);
        assert!(self.current != Pid::IDLE, "block: idle task cannot block");
        if let Some(task) = tasks.find_by_pid(self.current) {
            let mut inner = task.lock();
            if let Membership::Ready(level) = inner.membership {
                self.ready[level as usize].retain(|&pid| pid != task.pid());
                inner.membership = Membership::None;
            }
            inner.state = state;
            inner.flags.insert(TaskFlags::WAITLIST);
        }
        self.dispatch(tasks, cpu);
    }

    /// Makes a sleeping task Ready again. No-op for tasks that are not
    /// Blocked, Waiting or Stopped. Safe from interrupt context.
    ///
    /// The dynamic priority recovers to the static level, which favours tasks
    /// that block often over ones that burn their whole slice.
    pub fn unblock(&mut self, task: &Task) -> bool {
        {
            let mut inner = task.lock();
            if !inner.state.is_sleeping() {
                return false;
            }
            inner.flags.remove(TaskFlags::WAITLIST);
            inner.priority = inner.static_priority;
        }
        self.enqueue(task);
        true
    }

    /// Unlinks `task` from any wait queue it is still on, then unblocks it.
    pub fn wakeup(&mut self, task: &Task) -> bool {
        if !task.state().is_sleeping() {
            return false;
        }
        if let Membership::WaitList(_) = task.membership() {
            self.unlink(task);
        }
        self.unblock(task)
    }

    /// Requeues the running task at the tail of its level and dispatches.
    pub fn yield_now(&mut self, tasks: &TaskRegistry, cpu: &dyn ContextSwitch) {
        if let Some(task) = tasks.find_by_pid(self.current) {
            if task.state() == TaskState::Running {
                self.enqueue(&task);
            }
        }
        self.dispatch(tasks, cpu);
    }

    /// Accounts one timer tick to the running task. Returns true when its
    /// slice ran out and it was preempted.
    pub fn tick(&mut self, tasks: &TaskRegistry, cpu: &dyn ContextSwitch, in_kernel: bool) -> bool {
        let Some(task) = tasks.find_by_pid(self.current) else {
            return false;
        };
        let expired = {
            let mut inner = task.lock();
            inner.elapsed_ticks += 1;
            if in_kernel {
                inner.syscall_ticks += 1;
            }
            inner.ticks = inner.ticks.saturating_sub(1);
            if inner.ticks == 0 {
                let floor = if inner.static_priority == PRIORITY_IDLE {
                    PRIORITY_IDLE
                } else {
                    inner.static_priority.saturating_sub(self.tunables.max_priority_decay).max(1)
                };
                inner.priority = inner.priority.saturating_sub(1).max(floor);
                inner.timeslice = self.timeslice_for(inner.priority);
                inner.ticks = inner.timeslice;
                true
            } else {
                false
            }
        };
        drop(task);
        if expired {
            self.yield_now(tasks, cpu);
        }
        expired
    }

    /// Head of the highest non-empty level.
    ///
    /// # Panics
    /// Panics when every level is empty: the idle task has gone missing.
    pub fn pick_next(&mut self) -> Pid {
        for queue in self.ready.iter_mut().rev() {
            if let Some(pid) = queue.pop_front() {
                return pid;
            }
        }
        panic!("sched: no runnable task");
    }

    /// Selects the next task and switches to it if it differs from the current one.
    pub fn dispatch(&mut self, tasks: &TaskRegistry, cpu: &dyn ContextSwitch) {
        let next_pid = self.pick_next();
        let Some(next) = tasks.find_by_pid(next_pid) else {
            panic!("sched: queued pid {} is not registered", next_pid);
        };
        {
            let mut inner = next.lock();
            if !inner.kstack.guard_intact() {
                log_error!(target: "sched", "kernel stack guard smashed: pid {} ({})", next_pid, next.name());
                panic!("kernel stack overflow: pid {}", next_pid);
            }
            inner.state = TaskState::Running;
            inner.membership = Membership::None;
        }
        if next_pid == self.current {
            return;
        }

        let from = match tasks.find_by_pid(self.current) {
            Some(prev) => prev.context_ptr(),
            None => &mut self.scratch as *mut TaskContext,
        };
        let to = next.context_ptr() as *const TaskContext;
        log_trace!(target: "sched", "switch {} -> {}", self.current, next_pid);
        self.current = next_pid;
        self.switches += 1;
        // The registry keeps both tasks alive; no Arc may be held across the
        // switch because a task that exits never resumes to drop it.
        drop(next);
        // SAFETY: both pointers come from registered tasks (or the scratch
        // area) and stay valid until the tasks are reaped, which never happens
        // to the running task. Interrupts are masked by the trap entry.
        unsafe { cpu.switch(from, to) };
    }

    pub fn create_wait_queue(&mut self) -> WaitQueueId {
        let id = WaitQueueId(self.next_queue);
        self.next_queue = self.next_queue.wrapping_add(1);
        self.waitlists.insert(id, VecDeque::new());
        id
    }

    /// Wakes every waiter and forgets the queue.
    pub fn destroy_wait_queue(&mut self, tasks: &TaskRegistry, queue: WaitQueueId) -> usize {
        let woken = self.wake_all(tasks, queue);
        self.waitlists.remove(&queue);
        woken
    }

    pub fn waiters(&self, queue: WaitQueueId) -> Vec<Pid> {
        self.waitlists.get(&queue).map(|w| w.iter().copied().collect()).unwrap_or_default()
    }

    /// Appends the current task to `queue` and blocks it in `state`.
    pub fn wait_on(
        &mut self,
        tasks: &TaskRegistry,
        cpu: &dyn ContextSwitch,
        queue: WaitQueueId,
        state: TaskState,
    ) {
        let Some(task) = tasks.find_by_pid(self.current) else {
            return;
        };
        let Some(waiters) = self.waitlists.get_mut(&queue) else {
            log_warn!(target: "sched", "wait_on: unknown queue {:?}", queue);
            return;
        };
        waiters.push_back(task.pid());
        task.lock().membership = Membership::WaitList(queue);
        drop(task);
        self.block(tasks, cpu, state);
    }

    /// Wakes the longest waiter on `queue`.
    pub fn wake_one(&mut self, tasks: &TaskRegistry, queue: WaitQueueId) -> Option<Pid> {
        loop {
            let pid = self.waitlists.get_mut(&queue)?.pop_front()?;
            if let Some(task) = tasks.find_by_pid(pid) {
                task.lock().membership = Membership::None;
                if self.unblock(&task) {
                    return Some(pid);
                }
            }
        }
    }

    pub fn wake_all(&mut self, tasks: &TaskRegistry, queue: WaitQueueId) -> usize {
        let mut woken = 0;
        while self.wake_one(tasks, queue).is_some() {
            woken += 1;
        }
        woken
    }

    /// Checks that every task's state agrees with its list membership.
    pub fn check_invariants(&self, tasks: &TaskRegistry) -> Result<(), &'static str> {
        let mut seen: Vec<Pid> = Vec::new();
        let mut note = |pid: Pid| -> Result<(), &'static str> {
            if seen.contains(&pid) {
                return Err("task linked twice");
            }
            seen.push(pid);
            Ok(())
        };
        for (level, queue) in self.ready.iter().enumerate() {
            for &pid in queue {
                note(pid)?;
                let task = tasks.find_by_pid(pid).ok_or("queued task not registered")?;
                let inner = task.lock();
                if inner.state != TaskState::Ready || inner.membership != Membership::Ready(level as u8) {
                    return Err("ready queue entry disagrees with task");
                }
            }
        }
        for (&id, queue) in &self.waitlists {
            for &pid in queue {
                note(pid)?;
                let task = tasks.find_by_pid(pid).ok_or("waiter not registered")?;
                if task.membership() != Membership::WaitList(id) {
                    return Err("wait queue entry disagrees with task");
                }
            }
        }
        let mut running = 0;
        for task in tasks.tasks() {
            let inner = task.lock();
            match inner.state {
                TaskState::Ready if !matches!(inner.membership, Membership::Ready(_)) => {
                    return Err("ready task not queued");
                }
                TaskState::Running => {
                    running += 1;
                    if task.pid() != self.current || inner.membership != Membership::None {
                        return Err("running task is not current");
                    }
                }
                TaskState::Hanging | TaskState::Zombie if inner.membership != Membership::None => {
                    return Err("exited task still linked");
                }
                _ => {}
            }
        }
        if running != 1 {
            return Err("exactly one task must be running");
        }
        Ok(())
    }
}
