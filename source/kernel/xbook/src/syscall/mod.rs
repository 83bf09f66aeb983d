// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall dispatcher and error handling
//! OWNERS: @kernel-team
//! PUBLIC API: SyscallTable, Args, Error, Handler, SysResult, SYSCALL_* IDs
//! DEPENDS_ON: kernel::Kernel, task, signal, mm, syscall::api
//! INVARIANTS: Fixed MAX_SYSCALL window; RISC-V Linux numbering; decode/check/execute discipline;
//!             a handler that has to wait returns `Reschedule` and is re-executed when the task resumes

pub mod api;

use core::fmt;

use crate::kernel::Kernel;
use crate::mm::{AddressSpaceError, UserAccessError};
use crate::signal::SignalError;
use crate::task::{CreateError, CredError, GroupError, WaitError};
use crate::trap::TrapFrame;

/// Size of the dispatch window; numbers at or above it are `ENOSYS`.
const MAX_SYSCALL: usize = 512;

/// Length of the `ecall` instruction.
const ECALL_LEN: usize = 4;

/// Result type used by syscall handlers.
pub type SysResult<T> = Result<T, Error>;

/// Syscall arguments passed in registers a0-a5.
#[derive(Default, Clone, Copy, Debug)]
pub struct Args {
    regs: [usize; 6],
}

impl Args {
    /// Creates a new argument pack from the provided registers.
    pub const fn new(regs: [usize; 6]) -> Self {
        Self { regs }
    }

    pub fn from_frame(frame: &TrapFrame) -> Self {
        let mut regs = [0; 6];
        for (n, reg) in regs.iter_mut().enumerate() {
            *reg = frame.arg(n);
        }
        Self { regs }
    }

    /// Returns the raw register at `index`.
    pub fn get(&self, index: usize) -> usize {
        self.regs[index]
    }
}

pub const SYSCALL_EXIT: usize = 93;
pub const SYSCALL_SET_TID_ADDRESS: usize = 96;
/// Sleeps for a `timespec`, rounded up to whole ticks.
pub const SYSCALL_NANOSLEEP: usize = 101;
pub const SYSCALL_GETITIMER: usize = 102;
pub const SYSCALL_SETITIMER: usize = 103;
pub const SYSCALL_SCHED_YIELD: usize = 124;
pub const SYSCALL_KILL: usize = 129;
pub const SYSCALL_RT_SIGACTION: usize = 134;
pub const SYSCALL_RT_SIGPROCMASK: usize = 135;
pub const SYSCALL_RT_SIGRETURN: usize = 139;
pub const SYSCALL_SETREGID: usize = 143;
pub const SYSCALL_SETGID: usize = 144;
pub const SYSCALL_SETREUID: usize = 145;
pub const SYSCALL_SETUID: usize = 146;
pub const SYSCALL_SETRESUID: usize = 147;
pub const SYSCALL_GETRESUID: usize = 148;
pub const SYSCALL_SETRESGID: usize = 149;
pub const SYSCALL_GETRESGID: usize = 150;
pub const SYSCALL_TIMES: usize = 153;
pub const SYSCALL_SETPGID: usize = 154;
pub const SYSCALL_GETPGID: usize = 155;
pub const SYSCALL_GETSID: usize = 156;
pub const SYSCALL_SETSID: usize = 157;
pub const SYSCALL_GETGROUPS: usize = 158;
pub const SYSCALL_SETGROUPS: usize = 159;
pub const SYSCALL_GETPID: usize = 172;
pub const SYSCALL_GETPPID: usize = 173;
pub const SYSCALL_GETUID: usize = 174;
pub const SYSCALL_GETEUID: usize = 175;
pub const SYSCALL_GETGID: usize = 176;
pub const SYSCALL_GETEGID: usize = 177;
pub const SYSCALL_GETTID: usize = 178;
/// Fork, or a thread when `CLONE_VM | CLONE_THREAD` is set.
pub const SYSCALL_CLONE: usize = 220;
pub const SYSCALL_WAIT4: usize = 260;

pub const EPERM: i32 = 1;
pub const ESRCH: i32 = 3;
pub const EINTR: i32 = 4;
pub const ECHILD: i32 = 10;
pub const EAGAIN: i32 = 11;
pub const ENOMEM: i32 = 12;
pub const EFAULT: i32 = 14;
pub const EINVAL: i32 = 22;
pub const ENOSYS: i32 = 38;

/// Error returned by the dispatcher and handler stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Syscall number not present in the dispatch table.
    InvalidSyscall,
    /// Re-execute the call once the task runs again; `sepc` is not advanced.
    ///
    /// The handler has already parked the task. On hardware the task comes
    /// back through the same trap; on host builds the retry is a second trap.
    Reschedule,
    /// Current task terminated and should not resume.
    TaskExit,
    /// The handler installed a whole new user frame (`rt_sigreturn`).
    FrameReplaced,
    /// A sleep ended early.
    Interrupted,
    Create(CreateError),
    Cred(CredError),
    Group(GroupError),
    Wait(WaitError),
    Signal(SignalError),
    AddressSpace(AddressSpaceError),
    /// A user pointer could not be read or written.
    Fault,
    InvalidArgument,
}

impl Error {
    /// Positive errno reported to user space; `None` for the control-flow
    /// variants that never reach `a0`.
    pub fn errno(self) -> Option<i32> {
        let code = match self {
            Error::Reschedule | Error::TaskExit | Error::FrameReplaced => return None,
            Error::InvalidSyscall => ENOSYS,
            Error::Interrupted => EINTR,
            Error::Create(CreateError::OutOfMemory) => ENOMEM,
            Error::Create(CreateError::PidExhausted) => EAGAIN,
            Error::Create(CreateError::InvalidParent) => EINVAL,
            Error::Cred(CredError::PermissionDenied) => EPERM,
            Error::Cred(CredError::InvalidArgument) => EINVAL,
            Error::Group(GroupError::NoSuchProcess) => ESRCH,
            Error::Group(GroupError::PermissionDenied) => EPERM,
            Error::Group(GroupError::InvalidArgument) => EINVAL,
            Error::Wait(WaitError::NoChildren | WaitError::NoSuchPid) => ECHILD,
            Error::Wait(WaitError::WouldBlock) => EAGAIN,
            Error::Signal(SignalError::InvalidSignal) => EINVAL,
            Error::Signal(SignalError::NoSuchProcess) => ESRCH,
            Error::Signal(SignalError::PermissionDenied) => EPERM,
            Error::AddressSpace(AddressSpaceError::OutOfMemory) => ENOMEM,
            Error::AddressSpace(AddressSpaceError::InvalidHandle) => EFAULT,
            Error::Fault => EFAULT,
            Error::InvalidArgument => EINVAL,
        };
        Some(code)
    }
}

/// Register encoding of a failed call: `-errno`.
pub const fn error_return(errno: i32) -> usize {
    (-(errno as isize)) as usize
}

impl From<CreateError> for Error {
    fn from(value: CreateError) -> Self {
        Self::Create(value)
    }
}

impl From<CredError> for Error {
    fn from(value: CredError) -> Self {
        Self::Cred(value)
    }
}

impl From<GroupError> for Error {
    fn from(value: GroupError) -> Self {
        Self::Group(value)
    }
}

impl From<WaitError> for Error {
    fn from(value: WaitError) -> Self {
        Self::Wait(value)
    }
}

impl From<SignalError> for Error {
    fn from(value: SignalError) -> Self {
        Self::Signal(value)
    }
}

impl From<AddressSpaceError> for Error {
    fn from(value: AddressSpaceError) -> Self {
        Self::AddressSpace(value)
    }
}

impl From<UserAccessError> for Error {
    fn from(_: UserAccessError) -> Self {
        Self::Fault
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Type alias for a syscall handler.
pub type Handler = fn(&mut api::Context<'_>, &Args) -> SysResult<usize>;

/// Dispatch table storing handlers by syscall number.
pub struct SyscallTable {
    handlers: [Option<Handler>; MAX_SYSCALL],
}

impl SyscallTable {
    /// Creates an empty dispatch table.
    pub const fn new() -> Self {
        const NONE: Option<Handler> = None;
        Self { handlers: [NONE; MAX_SYSCALL] }
    }

    /// Registers a handler; numbers outside the window are ignored.
    pub fn register(&mut self, number: usize, handler: Handler) {
        if number < MAX_SYSCALL {
            self.handlers[number] = Some(handler);
        }
    }

    pub fn handler(&self, number: usize) -> Option<Handler> {
        self.handlers.get(number).copied().flatten()
    }

    /// Executes the handler referenced by `number`.
    #[must_use]
    pub fn dispatch(&self, number: usize, ctx: &mut api::Context<'_>, args: &Args) -> SysResult<usize> {
        self.handler(number).ok_or(Error::InvalidSyscall).and_then(|handler| handler(ctx, args))
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Runs the system call described by `frame` (number in `a7`, arguments
    /// in `a0..a5`) and writes the result or `-errno` to `a0`.
    pub fn syscall(&mut self, frame: &mut TrapFrame) {
        let number = frame.syscall_number();
        let args = Args::from_frame(frame);
        frame.sepc = frame.sepc.wrapping_add(ECALL_LEN);

        let entry = self.syscalls.handler(number);
        let result = match entry {
            Some(handler) => {
                let mut ctx = api::Context::new(self, frame);
                handler(&mut ctx, &args)
            }
            None => Err(Error::InvalidSyscall),
        };

        match result {
            Ok(value) => frame.set_return(value),
            Err(Error::Reschedule) => frame.sepc = frame.sepc.wrapping_sub(ECALL_LEN),
            Err(Error::TaskExit | Error::FrameReplaced) => {}
            Err(err) => {
                if err == Error::InvalidSyscall {
                    log_warn!(target: "syscall", "pid {}: unknown syscall {}", self.current(), number);
                } else {
                    log_trace!(target: "syscall", "pid {}: syscall {} -> {}", self.current(), number, err);
                }
                let errno = err.errno().unwrap_or(EINVAL);
                frame.set_return(error_return(errno));
            }
        }
    }
}
