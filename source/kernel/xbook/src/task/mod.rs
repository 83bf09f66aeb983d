// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Task control block and global task registry
//! OWNERS: @kernel-sched-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests + proptest (PID uniqueness, credentials)
//! PUBLIC API: Task, TaskState, Membership, TaskFlags, ThreadMode, ThreadGroup, TaskRegistry,
//!             Credentials, KernelStack, CreateError, WaitError, GroupError
//! DEPENDS_ON: sync::IrqSpinLock, signal::SignalState, sched::TaskContext, trap::TrapFrame, mm::AsHandle
//! INVARIANTS: Ready => in exactly one ready queue; Blocked/Waiting/Stopped => in one wait list or none;
//!             Hanging/Zombie => in no scheduling list; PIDs unique among registered tasks
//!
//! A task has two independent locks: the general lock over [`TaskInner`] and the
//! signal lock over [`SignalState`]. Senders only ever take the signal lock, so
//! posting a signal never contends with the scheduler's use of the general lock.
//! Neither lock is held across a context switch.

pub mod cred;
pub mod group;
mod registry;
mod stack;
#[cfg(test)]
mod tests_prop;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use bitflags::bitflags;

use crate::config::MAX_TASK_NAMELEN;
use crate::mm::AsHandle;
use crate::sched::{TaskContext, WaitQueueId};
use crate::signal::SignalState;
use crate::sync::{IrqSpinLock, IrqSpinLockGuard};
use crate::time::TimerId;
use crate::trap::TrapFrame;
use crate::types::Ticks;

pub use crate::types::Pid;
pub use cred::{CredError, Credentials};
pub use group::GroupError;
pub use registry::{TaskRegistry, TaskSnapshot};
pub use stack::KernelStack;

/// Scheduling state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    /// Sleeping on a wait queue or timer; woken by signals.
    Blocked,
    /// Waiting for a child to change state.
    Waiting,
    /// Stopped by a stop signal; only SIGCONT or SIGKILL resume it.
    Stopped,
    /// Exited; the parent has not been told yet.
    Hanging,
    /// Exited and observed; waiting to be reaped.
    Zombie,
}

impl TaskState {
    pub const fn is_sleeping(self) -> bool {
        matches!(self, TaskState::Blocked | TaskState::Waiting | TaskState::Stopped)
    }

    pub const fn has_exited(self) -> bool {
        matches!(self, TaskState::Hanging | TaskState::Zombie)
    }
}

/// The one scheduling list a task may be linked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    None,
    /// Ready queue of the given priority level.
    Ready(u8),
    WaitList(WaitQueueId),
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct TaskFlags: u32 {
        /// Reaped automatically on exit; nobody waits for it.
        const DETACH = 1 << 0;
        const JOINED = 1 << 1;
        const JOINING = 1 << 2;
        /// Cancellation requests are recorded but not acted on.
        const CANCEL_DISABLE = 1 << 3;
        /// Cancellation also wakes the task and ends it at the next safe point.
        const CANCEL_ASYNC = 1 << 4;
        const CANCELED = 1 << 5;
        /// Parked by `block` and not yet made ready again.
        const WAITLIST = 1 << 6;
        /// Runs only in supervisor mode; never returns to user space.
        const KERNEL = 1 << 7;
        const NO_NEW_PRIVS = 1 << 8;
    }
}

/// Threads sharing one address space and thread-group id.
#[derive(Debug)]
pub struct ThreadGroup {
    tgid: Pid,
    threads: AtomicUsize,
}

impl ThreadGroup {
    pub fn new(leader: Pid) -> Arc<Self> {
        Arc::new(Self { tgid: leader, threads: AtomicUsize::new(1) })
    }

    pub fn tgid(&self) -> Pid {
        self.tgid
    }

    pub fn thread_count(&self) -> usize {
        self.threads.load(Ordering::Acquire)
    }

    pub(crate) fn join(&self) {
        self.threads.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops one member; true when it was the last one.
    pub(crate) fn leave(&self) -> bool {
        self.threads.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

/// Whether a task owns its address space alone or shares it with a group.
#[derive(Debug, Clone)]
pub enum ThreadMode {
    Single,
    Group(Arc<ThreadGroup>),
}

/// Accounting times collected from reaped children, in ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChildTimes {
    pub cutime: Ticks,
    pub cstime: Ticks,
}

/// Pending timed sleep of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SleepState {
    pub deadline: Ticks,
    pub timer: TimerId,
}

/// Runs once, when the task exits.
pub type ExitHook = Box<dyn FnOnce(Pid) + Send>;

/// Fields behind the task's general lock.
pub struct TaskInner {
    pub(crate) state: TaskState,
    pub(crate) membership: Membership,
    pub(crate) flags: TaskFlags,
    pub(crate) parent: Option<Pid>,
    pub(crate) tgid: Pid,
    pub(crate) pgid: Pid,
    pub(crate) sid: Pid,
    pub(crate) cred: Credentials,
    pub(crate) static_priority: u8,
    pub(crate) priority: u8,
    /// Ticks left in the current slice.
    pub(crate) ticks: Ticks,
    pub(crate) timeslice: Ticks,
    pub(crate) elapsed_ticks: Ticks,
    pub(crate) syscall_ticks: Ticks,
    pub(crate) child_times: ChildTimes,
    pub(crate) exit_status: i32,
    pub(crate) exit_hook: Option<ExitHook>,
    pub(crate) frame: TrapFrame,
    pub(crate) kstack: KernelStack,
    pub(crate) thread: ThreadMode,
    pub(crate) address_space: Option<AsHandle>,
    pub(crate) clear_child_tid: usize,
    pub(crate) sleep: Option<SleepState>,
}

impl TaskInner {
    pub(crate) fn new(kstack: KernelStack, priority: u8, timeslice: Ticks) -> Self {
        Self {
            state: TaskState::Ready,
            membership: Membership::None,
            flags: TaskFlags::empty(),
            parent: None,
            tgid: Pid::IDLE,
            pgid: Pid::IDLE,
            sid: Pid::IDLE,
            cred: Credentials::root(),
            static_priority: priority,
            priority,
            ticks: timeslice,
            timeslice,
            elapsed_ticks: 0,
            syscall_ticks: 0,
            child_times: ChildTimes::default(),
            exit_status: 0,
            exit_hook: None,
            frame: TrapFrame::default(),
            kstack,
            thread: ThreadMode::Single,
            address_space: None,
            clear_child_tid: 0,
            sleep: None,
        }
    }
}

/// Register save area handed to the context switch.
struct ContextCell(UnsafeCell<TaskContext>);

// SAFETY: the context is only touched by the dispatcher on the single hart
// with interrupts masked, and by the task-creation path before the task is
// visible to the scheduler.
unsafe impl Sync for ContextCell {}

/// Task control block.
pub struct Task {
    pid: Pid,
    name: String,
    context: ContextCell,
    inner: IrqSpinLock<TaskInner>,
    signals: IrqSpinLock<SignalState>,
}

impl Task {
    pub(crate) fn new(pid: Pid, name: &str, context: TaskContext, inner: TaskInner, signals: SignalState) -> Self {
        let mut end = name.len().min(MAX_TASK_NAMELEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            pid,
            name: String::from(&name[..end]),
            context: ContextCell(UnsafeCell::new(context)),
            inner: IrqSpinLock::new(inner),
            signals: IrqSpinLock::new(signals),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// General lock. Must not be held while taking the registry lock.
    pub(crate) fn lock(&self) -> IrqSpinLockGuard<'_, TaskInner> {
        self.inner.lock()
    }

    /// Signal lock, independent of the general lock.
    pub(crate) fn signals(&self) -> IrqSpinLockGuard<'_, SignalState> {
        self.signals.lock()
    }

    pub(crate) fn context_ptr(&self) -> *mut TaskContext {
        self.context.0.get()
    }

    pub fn state(&self) -> TaskState {
        self.lock().state
    }

    pub fn membership(&self) -> Membership {
        self.lock().membership
    }

    pub fn flags(&self) -> TaskFlags {
        self.lock().flags
    }

    pub fn is_kernel_thread(&self) -> bool {
        self.flags().contains(TaskFlags::KERNEL)
    }

    pub fn parent(&self) -> Option<Pid> {
        self.lock().parent
    }

    pub fn tgid(&self) -> Pid {
        self.lock().tgid
    }

    pub fn pgid(&self) -> Pid {
        self.lock().pgid
    }

    pub fn sid(&self) -> Pid {
        self.lock().sid
    }

    pub fn credentials(&self) -> Credentials {
        self.lock().cred.clone()
    }

    pub fn priority(&self) -> u8 {
        self.lock().priority
    }

    pub fn static_priority(&self) -> u8 {
        self.lock().static_priority
    }

    pub fn ticks_left(&self) -> Ticks {
        self.lock().ticks
    }

    pub fn timeslice(&self) -> Ticks {
        self.lock().timeslice
    }

    pub fn elapsed_ticks(&self) -> Ticks {
        self.lock().elapsed_ticks
    }

    pub fn syscall_ticks(&self) -> Ticks {
        self.lock().syscall_ticks
    }

    pub fn child_times(&self) -> ChildTimes {
        self.lock().child_times
    }

    pub fn exit_status(&self) -> i32 {
        self.lock().exit_status
    }

    pub fn frame(&self) -> TrapFrame {
        self.lock().frame
    }

    pub fn address_space(&self) -> Option<AsHandle> {
        self.lock().address_space
    }

    pub fn thread_mode(&self) -> ThreadMode {
        self.lock().thread.clone()
    }

    pub fn signal_state(&self) -> SignalState {
        self.signals().clone()
    }

    /// Installs the hook run when the task exits; replaces any previous one.
    pub fn set_exit_hook(&self, hook: ExitHook) {
        self.lock().exit_hook = Some(hook);
    }

    pub(crate) fn take_exit_hook(&self) -> Option<ExitHook> {
        self.lock().exit_hook.take()
    }

    pub fn stack_guard_intact(&self) -> bool {
        self.lock().kstack.guard_intact()
    }
}

impl core::fmt::Debug for Task {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task").field("pid", &self.pid).field("name", &self.name).finish()
    }
}

/// Errors returned when creating tasks.
#[must_use = "creation errors must be handled"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateError {
    /// Kernel stack or registry allocation failed.
    OutOfMemory,
    /// Every PID in `1..PID_MAX` is held by a live task.
    PidExhausted,
    /// Parent does not exist or cannot be duplicated.
    InvalidParent,
}

/// Errors returned when waiting for child processes.
#[must_use = "wait errors must be handled explicitly"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// Current task has no children matching the request.
    NoChildren,
    /// Requested PID is not a child of the current task.
    NoSuchPid,
    /// Matching children exist but none has exited yet.
    WouldBlock,
}
