// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Task construction, exit, wait and reaping.
//!
//! Construction never leaves a half-registered task behind: the PID is rolled
//! back if the kernel stack cannot be allocated, and a duplicated address
//! space is released if registration fails.

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::Kernel;
use crate::mm::AsHandle;
use crate::sched::{TaskContext, PRIORITY_REALTIME};
use crate::signal::{Alarm, Signal, SignalState};
use crate::task::{
    ChildTimes, CreateError, KernelStack, Task, TaskFlags, TaskInner, TaskState, ThreadGroup, ThreadMode, WaitError,
};
use crate::trap::{SoftIrq, TrapFrame};
use crate::types::{Pid, Ticks};

/// Which children a wait call accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    Any,
    Pid(Pid),
    /// Any child in the given process group.
    Group(Pid),
}

impl WaitTarget {
    /// Decodes the `pid` argument of `wait4`. Ids that do not fit a PID
    /// cannot name a child.
    pub fn from_raw(raw: isize, caller_pgid: Pid) -> Result<Self, WaitError> {
        let id = |raw: usize| u32::try_from(raw).map(Pid::from_raw).map_err(|_| WaitError::NoSuchPid);
        Ok(match raw {
            -1 => WaitTarget::Any,
            0 => WaitTarget::Group(caller_pgid),
            pid if pid > 0 => WaitTarget::Pid(id(pid as usize)?),
            group => WaitTarget::Group(id(group.unsigned_abs())?),
        })
    }

    fn matches(self, task: &Task) -> bool {
        match self {
            WaitTarget::Any => true,
            WaitTarget::Pid(pid) => task.pid() == pid,
            WaitTarget::Group(pgid) => task.pgid() == pgid,
        }
    }
}

/// Accounting returned by `times`, in ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessTimes {
    pub utime: Ticks,
    pub stime: Ticks,
    pub cutime: Ticks,
    pub cstime: Ticks,
}

/// Kernel-thread body; receives the argument given at spawn time.
pub type KernelThreadEntry = fn(usize);

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
fn user_context(stack_top: usize) -> TaskContext {
    crate::trap::entry::user_context(stack_top)
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
fn user_context(stack_top: usize) -> TaskContext {
    TaskContext::new(0, stack_top, 0, 0)
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
fn kernel_thread_context(entry: KernelThreadEntry, arg: usize, stack_top: usize) -> TaskContext {
    crate::trap::entry::kernel_thread_context(entry, arg, stack_top)
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
fn kernel_thread_context(entry: KernelThreadEntry, arg: usize, stack_top: usize) -> TaskContext {
    TaskContext::new(0, stack_top, entry as usize, arg)
}

impl Kernel {
    /// Allocates and registers a Ready task without a user context.
    ///
    /// Priority is clamped into `1..=PRIORITY_REALTIME`; level 0 belongs to idle.
    pub fn create(&mut self, name: &str, priority: u8) -> Result<Arc<Task>, CreateError> {
        self.build(name, priority, None, SignalState::new(), |_| {})
    }

    /// Creates a user process that starts at `entry` with stack pointer `user_sp`
    /// inside `space`.
    pub fn create_process(
        &mut self,
        name: &str,
        priority: u8,
        space: AsHandle,
        entry: usize,
        user_sp: usize,
    ) -> Result<Arc<Task>, CreateError> {
        self.build(name, priority, None, SignalState::new(), |inner| {
            inner.frame = TrapFrame::new_user(entry, user_sp);
            inner.address_space = Some(space);
        })
    }

    /// Starts a supervisor-only task running `entry(arg)`.
    pub fn spawn_kernel_thread(
        &mut self,
        name: &str,
        priority: u8,
        entry: KernelThreadEntry,
        arg: usize,
    ) -> Result<Arc<Task>, CreateError> {
        self.build(name, priority, Some((entry, arg)), SignalState::new(), |inner| {
            inner.flags.insert(TaskFlags::KERNEL);
        })
    }

    /// Duplicates the current task. The child resumes from `frame` with `a0 = 0`
    /// in a copy of the parent's address space.
    pub fn fork(&mut self, frame: &TrapFrame) -> Result<Arc<Task>, CreateError> {
        let parent = self.current_task().ok_or(CreateError::InvalidParent)?;
        if parent.is_kernel_thread() {
            return Err(CreateError::InvalidParent);
        }
        let space = match parent.address_space() {
            Some(handle) => Some(self.spaces.duplicate(handle).map_err(|_| CreateError::OutOfMemory)?),
            None => None,
        };
        let mut child_frame = *frame;
        child_frame.set_return(0);
        let signals = parent.signals().for_child();
        let result = self.build(parent.name(), parent.static_priority(), None, signals, |inner| {
            inner.frame = child_frame;
            inner.address_space = space;
        });
        if result.is_err() {
            if let Some(handle) = space {
                self.spaces.release(handle);
            }
        }
        result
    }

    /// Starts a thread in the current task's thread group, sharing its address
    /// space. `stack == 0` keeps the caller's stack pointer.
    pub fn spawn_thread(&mut self, frame: &TrapFrame, stack: usize, tls: Option<usize>) -> Result<Arc<Task>, CreateError> {
        let parent = self.current_task().ok_or(CreateError::InvalidParent)?;
        if parent.is_kernel_thread() {
            return Err(CreateError::InvalidParent);
        }
        let group = {
            let mut inner = parent.lock();
            match &inner.thread {
                ThreadMode::Group(group) => group.clone(),
                ThreadMode::Single => {
                    let group = ThreadGroup::new(inner.tgid);
                    inner.thread = ThreadMode::Group(group.clone());
                    group
                }
            }
        };
        group.join();

        let mut child_frame = *frame;
        child_frame.set_return(0);
        if stack != 0 {
            child_frame.x[TrapFrame::SP] = stack;
        }
        if let Some(tls) = tls {
            child_frame.x[TrapFrame::TP] = tls;
        }
        let space = parent.address_space();
        let grandparent = parent.parent();
        let signals = parent.signals().for_child();
        let member = group.clone();
        let result = self.build(parent.name(), parent.static_priority(), None, signals, move |inner| {
            inner.parent = grandparent;
            inner.tgid = member.tgid();
            inner.frame = child_frame;
            inner.address_space = space;
            inner.thread = ThreadMode::Group(member);
            inner.flags.insert(TaskFlags::DETACH);
        });
        if result.is_err() {
            group.leave();
        }
        result
    }

    fn build(
        &mut self,
        name: &str,
        priority: u8,
        kernel_entry: Option<(KernelThreadEntry, usize)>,
        signals: SignalState,
        setup: impl FnOnce(&mut TaskInner),
    ) -> Result<Arc<Task>, CreateError> {
        let pid = self.tasks.take_pid().ok_or(CreateError::PidExhausted)?;
        let kstack = match KernelStack::allocate() {
            Ok(kstack) => kstack,
            Err(err) => {
                self.tasks.rollback_pid(pid);
                return Err(err);
            }
        };
        let stack_top = kstack.top();
        let priority = priority.clamp(1, PRIORITY_REALTIME);
        let mut inner = TaskInner::new(kstack, priority, self.sched.timeslice_for(priority));
        inner.tgid = pid;
        inner.pgid = pid;
        inner.sid = pid;
        if let Some(creator) = self.current_task().filter(|task| task.pid() != Pid::IDLE) {
            let creator_inner = creator.lock();
            inner.parent = Some(creator.pid());
            inner.pgid = creator_inner.pgid;
            inner.sid = creator_inner.sid;
            inner.cred = creator_inner.cred.clone();
        }
        setup(&mut inner);

        let context = match kernel_entry {
            Some((entry, arg)) => kernel_thread_context(entry, arg, stack_top),
            None => user_context(stack_top),
        };
        let task = Arc::new(Task::new(pid, name, context, inner, signals));
        self.tasks.insert(task.clone());
        self.sched.enqueue(&task);
        log_debug!(target: "task", "created pid {} ({}) prio {}", pid, task.name(), priority);
        Ok(task)
    }

    /// Records where the thread id is cleared on exit; returns the caller's tid.
    pub fn set_tid_address(&mut self, addr: usize) -> Pid {
        let pid = self.sched.current();
        if let Some(task) = self.tasks.find_by_pid(pid) {
            task.lock().clear_child_tid = addr;
        }
        pid
    }

    pub fn times(&self) -> ProcessTimes {
        let Some(task) = self.current_task() else {
            return ProcessTimes::default();
        };
        let inner = task.lock();
        ProcessTimes {
            utime: inner.elapsed_ticks.saturating_sub(inner.syscall_ticks),
            stime: inner.syscall_ticks,
            cutime: inner.child_times.cutime,
            cstime: inner.child_times.cstime,
        }
    }

    /// Ends the current task with a raw wait status.
    pub fn exit(&mut self, status: i32) {
        let pid = self.sched.current();
        self.exit_task(pid, status);
    }

    /// Moves `pid` to Hanging (or Zombie when nobody will wait for it), tells
    /// the parent, hands its children to the reaper and, if it was running,
    /// dispatches the next task.
    ///
    /// # Panics
    /// Panics if asked to end the idle task.
    pub fn exit_task(&mut self, pid: Pid, status: i32) {
        assert!(pid != Pid::IDLE, "exit: idle task cannot exit");
        let Some(task) = self.tasks.find_by_pid(pid) else {
            return;
        };
        if task.state().has_exited() {
            return;
        }
        if let Some(hook) = task.take_exit_hook() {
            hook(pid);
        }

        let (clear_tid, space, sleep) = {
            let mut inner = task.lock();
            (core::mem::take(&mut inner.clear_child_tid), inner.address_space, inner.sleep.take())
        };
        if let Some(space) = space.filter(|_| clear_tid != 0) {
            if self.spaces.copy_to_user(space, clear_tid, &0u32.to_ne_bytes()).is_err() {
                log_debug!(target: "task", "pid {}: cannot clear child tid at 0x{:x}", pid, clear_tid);
            }
        }
        if let Some(sleep) = sleep {
            self.clock.cancel(sleep.timer);
        }
        self.sched.unlink(&task);
        task.signals().alarm = Alarm::default();
        self.reparent_children(pid);

        let parent = task
            .parent()
            .and_then(|ppid| self.tasks.find_by_pid(ppid))
            .filter(|parent| !parent.state().has_exited());
        let detached = task.flags().contains(TaskFlags::DETACH) || parent.is_none();
        let parent_waiting = parent.as_ref().is_some_and(|p| p.state() == TaskState::Waiting);
        {
            let mut inner = task.lock();
            inner.exit_status = status;
            inner.flags.remove(TaskFlags::WAITLIST);
            inner.state = if detached || parent_waiting { TaskState::Zombie } else { TaskState::Hanging };
        }
        log_debug!(target: "task", "pid {} exited, status 0x{:x}", pid, status);

        if detached {
            self.reap.push(pid);
            self.softirq.raise(SoftIrq::REAP);
        } else if let Some(parent) = parent {
            let ppid = parent.pid();
            drop(parent);
            let _ = self.send_signal(ppid, Signal::SIGCHLD);
            if parent_waiting {
                self.wakeup(ppid);
            }
        }

        let was_running = pid == self.sched.current();
        drop(task);
        if was_running {
            self.sched.dispatch(&self.tasks, &*self.cpu);
        }
    }

    /// Hands the children of `pid` to init (PID 1), or queues exited ones for
    /// reaping when there is no init.
    fn reparent_children(&mut self, pid: Pid) {
        let reaper = (pid != Pid::INIT && self.tasks.contains(Pid::INIT)).then_some(Pid::INIT);
        let mut wake_reaper = false;
        for child in self.tasks.children_of(pid) {
            let exited = {
                let mut inner = child.lock();
                inner.parent = reaper;
                if reaper.is_none() {
                    inner.flags.insert(TaskFlags::DETACH);
                }
                inner.state.has_exited()
            };
            if !exited {
                continue;
            }
            match reaper {
                Some(_) => wake_reaper = true,
                None => {
                    child.lock().state = TaskState::Zombie;
                    self.reap.push(child.pid());
                    self.softirq.raise(SoftIrq::REAP);
                }
            }
        }
        if let Some(init) = reaper.filter(|_| wake_reaper) {
            if self.tasks.find_by_pid(init).is_some_and(|task| task.state() == TaskState::Waiting) {
                self.wakeup(init);
            }
        }
    }

    /// Collects one exited child of the current task matching `target`.
    ///
    /// The child's times are folded into the caller's `cutime`/`cstime` and
    /// the child is destroyed, freeing its PID.
    pub fn wait_child(&mut self, target: WaitTarget) -> Result<(Pid, i32), WaitError> {
        let caller = self.current_task().ok_or(WaitError::NoChildren)?;
        let candidates: Vec<Arc<Task>> = self
            .tasks
            .children_of(caller.pid())
            .into_iter()
            .filter(|child| child.tgid() == child.pid() && !child.flags().contains(TaskFlags::DETACH))
            .filter(|child| target.matches(child))
            .collect();
        if candidates.is_empty() {
            return Err(match target {
                WaitTarget::Pid(_) => WaitError::NoSuchPid,
                _ => WaitError::NoChildren,
            });
        }
        let child = candidates
            .into_iter()
            .find(|child| child.state().has_exited())
            .ok_or(WaitError::WouldBlock)?;

        let (status, times) = {
            let mut inner = child.lock();
            inner.state = TaskState::Zombie;
            let times = ChildTimes {
                cutime: inner.elapsed_ticks.saturating_sub(inner.syscall_ticks) + inner.child_times.cutime,
                cstime: inner.syscall_ticks + inner.child_times.cstime,
            };
            (inner.exit_status, times)
        };
        {
            let mut inner = caller.lock();
            inner.child_times.cutime += times.cutime;
            inner.child_times.cstime += times.cstime;
        }
        let pid = child.pid();
        drop(child);
        self.destroy(pid);
        Ok((pid, status))
    }

    /// Releases an exited task: registry entry, scheduler links and, for the
    /// last member of its thread group, the address space.
    pub(crate) fn destroy(&mut self, pid: Pid) {
        let Some(task) = self.tasks.remove(pid) else {
            return;
        };
        debug_assert!(task.state().has_exited(), "destroy: pid {} is still alive", pid);
        self.sched.unlink(&task);
        let (thread, space) = {
            let inner = task.lock();
            (inner.thread.clone(), inner.address_space)
        };
        let last = match thread {
            ThreadMode::Single => true,
            ThreadMode::Group(group) => group.leave(),
        };
        if last {
            if let Some(space) = space {
                self.spaces.release(space);
            }
        }
        self.reap.retain(|&queued| queued != pid);
        log_debug!(target: "task", "reaped pid {}", pid);
    }
}
