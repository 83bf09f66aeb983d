// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall handlers exposed to the dispatcher
//! OWNERS: @kernel-team
//! PUBLIC API: install_handlers(table), Context
//! DEPENDS_ON: kernel::Kernel, task::{cred, group}, signal, mm::AddressSpaces
//! INVARIANTS: Stable syscall IDs; Decode→Check→Execute pattern; a handler that parks the
//!             caller returns `Reschedule`, never a value
//!
//! Id arguments equal to `u32::MAX` (the C `-1`) mean "leave unchanged".
//! User pointers equal to zero are treated as absent where the call allows it.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use super::*;
use crate::kernel::{MaskHow, WaitTarget};
use crate::mm::{self, AsHandle};
use crate::signal::{exit_status_code, ITimerVal, SigAction, SigSet, Signal};
use crate::task::{group, Task, TaskState, WaitError};
use crate::types::{Gid, Pid, Uid};

const WNOHANG: usize = 1;
const ITIMER_REAL: usize = 0;

const CLONE_VM: usize = 0x0000_0100;
const CLONE_SETTLS: usize = 0x0008_0000;
const CLONE_THREAD: usize = 0x0001_0000;
const CLONE_PARENT_SETTID: usize = 0x0010_0000;
const CLONE_CHILD_CLEARTID: usize = 0x0020_0000;

const NSEC_PER_SEC: i64 = 1_000_000_000;
const TIMESPEC_SIZE: usize = 16;
const SIGSET_SIZE: usize = 8;

/// Execution context handed to every handler: the kernel and the caller's
/// saved user frame.
pub struct Context<'a> {
    pub kernel: &'a mut Kernel,
    pub frame: &'a mut TrapFrame,
}

impl<'a> Context<'a> {
    /// Creates a new context for the current task.
    pub fn new(kernel: &'a mut Kernel, frame: &'a mut TrapFrame) -> Self {
        Self { kernel, frame }
    }

    fn caller(&self) -> SysResult<Arc<Task>> {
        self.kernel.current_task().ok_or(Error::InvalidArgument)
    }

    fn space(&self) -> SysResult<AsHandle> {
        self.caller()?.address_space().ok_or(Error::Fault)
    }

    fn copy_out(&self, addr: usize, bytes: &[u8]) -> SysResult<()> {
        if addr == 0 {
            return Err(Error::Fault);
        }
        let space = self.space()?;
        self.kernel.address_spaces().copy_to_user(space, addr, bytes)?;
        Ok(())
    }

    fn copy_in(&self, addr: usize, out: &mut [u8]) -> SysResult<()> {
        if addr == 0 {
            return Err(Error::Fault);
        }
        let space = self.space()?;
        self.kernel.address_spaces().copy_from_user(space, addr, out)?;
        Ok(())
    }

    fn write_u32s(&self, addr: usize, values: &[u32]) -> SysResult<()> {
        let bytes: Vec<u8> = values.iter().flat_map(|value| value.to_le_bytes()).collect();
        self.copy_out(addr, &bytes)
    }

    fn read_u32s(&self, addr: usize, count: usize) -> SysResult<Vec<u32>> {
        let mut bytes = vec![0u8; count * 4];
        self.copy_in(addr, &mut bytes)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}

/// Registers every handler with `table`.
pub fn install_handlers(table: &mut SyscallTable) {
    table.register(SYSCALL_EXIT, sys_exit);
    table.register(SYSCALL_SET_TID_ADDRESS, sys_set_tid_address);
    table.register(SYSCALL_NANOSLEEP, sys_nanosleep);
    table.register(SYSCALL_GETITIMER, sys_getitimer);
    table.register(SYSCALL_SETITIMER, sys_setitimer);
    table.register(SYSCALL_SCHED_YIELD, sys_sched_yield);
    table.register(SYSCALL_KILL, sys_kill);
    table.register(SYSCALL_RT_SIGACTION, sys_rt_sigaction);
    table.register(SYSCALL_RT_SIGPROCMASK, sys_rt_sigprocmask);
    table.register(SYSCALL_RT_SIGRETURN, sys_rt_sigreturn);
    table.register(SYSCALL_SETREGID, sys_setregid);
    table.register(SYSCALL_SETGID, sys_setgid);
    table.register(SYSCALL_SETREUID, sys_setreuid);
    table.register(SYSCALL_SETUID, sys_setuid);
    table.register(SYSCALL_SETRESUID, sys_setresuid);
    table.register(SYSCALL_GETRESUID, sys_getresuid);
    table.register(SYSCALL_SETRESGID, sys_setresgid);
    table.register(SYSCALL_GETRESGID, sys_getresgid);
    table.register(SYSCALL_TIMES, sys_times);
    table.register(SYSCALL_SETPGID, sys_setpgid);
    table.register(SYSCALL_GETPGID, sys_getpgid);
    table.register(SYSCALL_GETSID, sys_getsid);
    table.register(SYSCALL_SETSID, sys_setsid);
    table.register(SYSCALL_GETGROUPS, sys_getgroups);
    table.register(SYSCALL_SETGROUPS, sys_setgroups);
    table.register(SYSCALL_GETPID, sys_getpid);
    table.register(SYSCALL_GETPPID, sys_getppid);
    table.register(SYSCALL_GETUID, sys_getuid);
    table.register(SYSCALL_GETEUID, sys_geteuid);
    table.register(SYSCALL_GETGID, sys_getgid);
    table.register(SYSCALL_GETEGID, sys_getegid);
    table.register(SYSCALL_GETTID, sys_gettid);
    table.register(SYSCALL_CLONE, sys_clone);
    table.register(SYSCALL_WAIT4, sys_wait4);
}

// Typed decoders for Decode→Check→Execute

fn id_arg(raw: usize) -> Option<u32> {
    let raw = raw as u32;
    (raw != u32::MAX).then_some(raw)
}

fn uid_arg(raw: usize) -> Option<Uid> {
    id_arg(raw).map(Uid::from_raw)
}

fn gid_arg(raw: usize) -> Option<Gid> {
    id_arg(raw).map(Gid::from_raw)
}

/// Optional pid argument where 0 means "the caller".
fn pid_arg(raw: usize) -> SysResult<Option<Pid>> {
    if raw == 0 {
        return Ok(None);
    }
    Pid::from_arg(raw).map(Some).ok_or(Error::InvalidArgument)
}

#[derive(Copy, Clone)]
struct TimeSpec {
    sec: i64,
    nsec: i64,
}

impl TimeSpec {
    #[inline]
    fn decode(bytes: &[u8; TIMESPEC_SIZE]) -> Self {
        let mut sec = [0u8; 8];
        let mut nsec = [0u8; 8];
        sec.copy_from_slice(&bytes[..8]);
        nsec.copy_from_slice(&bytes[8..]);
        Self { sec: i64::from_le_bytes(sec), nsec: i64::from_le_bytes(nsec) }
    }

    #[inline]
    fn check(&self) -> Result<(), Error> {
        if self.sec < 0 || !(0..NSEC_PER_SEC).contains(&self.nsec) {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    fn encode(&self) -> [u8; TIMESPEC_SIZE] {
        let mut out = [0u8; TIMESPEC_SIZE];
        out[..8].copy_from_slice(&self.sec.to_le_bytes());
        out[8..].copy_from_slice(&self.nsec.to_le_bytes());
        out
    }

    fn as_micros(&self) -> u64 {
        (self.sec as u64).saturating_mul(1_000_000).saturating_add((self.nsec as u64).div_ceil(1_000))
    }

    fn from_micros(micros: u64) -> Self {
        Self { sec: (micros / 1_000_000) as i64, nsec: (micros % 1_000_000) as i64 * 1_000 }
    }
}

#[derive(Copy, Clone)]
struct CloneArgsTyped {
    flags: usize,
    stack: usize,
    parent_tid: usize,
    tls: usize,
    child_tid: usize,
}

impl CloneArgsTyped {
    #[inline]
    fn decode(args: &Args) -> Self {
        Self {
            flags: args.get(0),
            stack: args.get(1),
            parent_tid: args.get(2),
            tls: args.get(3),
            child_tid: args.get(4),
        }
    }

    #[inline]
    fn check(&self) -> Result<(), Error> {
        if self.flags & CLONE_THREAD != 0 && self.flags & CLONE_VM == 0 {
            return Err(Error::InvalidArgument);
        }
        if self.stack % core::mem::size_of::<usize>() != 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    fn is_thread(&self) -> bool {
        self.flags & CLONE_THREAD != 0
    }
}

// ——— lifecycle ———

fn sys_exit(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    ctx.kernel.exit(exit_status_code(args.get(0) as i32));
    Err(Error::TaskExit)
}

fn sys_set_tid_address(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    Ok(ctx.kernel.set_tid_address(args.get(0)).as_raw() as usize)
}

fn sys_sched_yield(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    ctx.kernel.yield_now();
    Ok(0)
}

/// First entry arms the sleep and parks the caller; the re-executed call
/// collects the result.
fn sys_nanosleep(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let (req, rem) = (args.get(0), args.get(1));
    let pid = ctx.kernel.current();
    if let Some(remaining) = ctx.kernel.resume_sleep(pid) {
        if remaining == 0 {
            return Ok(0);
        }
        if rem != 0 {
            let left = TimeSpec::from_micros(ctx.kernel.tunables().ticks_to_micros(remaining));
            ctx.copy_out(rem, &left.encode())?;
        }
        return Err(Error::Interrupted);
    }

    let mut raw = [0u8; TIMESPEC_SIZE];
    ctx.copy_in(req, &mut raw)?;
    let request = TimeSpec::decode(&raw);
    request.check()?;
    let ticks = ctx.kernel.tunables().micros_to_ticks(request.as_micros());
    if ticks == 0 {
        return Ok(0);
    }
    ctx.kernel.sleep_by_ticks(ticks);
    Err(Error::Reschedule)
}

fn sys_clone(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = CloneArgsTyped::decode(args);
    typed.check()?;

    let frame = *ctx.frame;
    let child = if typed.is_thread() {
        let tls = (typed.flags & CLONE_SETTLS != 0).then_some(typed.tls);
        ctx.kernel.spawn_thread(&frame, typed.stack, tls)?
    } else {
        let child = ctx.kernel.fork(&frame)?;
        if typed.stack != 0 {
            child.lock().frame.x[TrapFrame::SP] = typed.stack;
        }
        child
    };
    if typed.flags & CLONE_CHILD_CLEARTID != 0 {
        child.lock().clear_child_tid = typed.child_tid;
    }
    let tid = child.pid().as_raw();
    if typed.flags & CLONE_PARENT_SETTID != 0 {
        ctx.write_u32s(typed.parent_tid, &[tid])?;
    }
    Ok(tid as usize)
}

/// Blocks in `Waiting` until a matching child exits, unless `WNOHANG`.
fn sys_wait4(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let (raw_pid, status_ptr, options) = (args.get(0) as isize, args.get(1), args.get(2));
    if options & !WNOHANG != 0 {
        return Err(Error::InvalidArgument);
    }
    let target = WaitTarget::from_raw(raw_pid, ctx.caller()?.pgid())?;
    match ctx.kernel.wait_child(target) {
        Ok((pid, status)) => {
            if status_ptr != 0 {
                ctx.copy_out(status_ptr, &status.to_le_bytes())?;
            }
            Ok(pid.as_raw() as usize)
        }
        Err(WaitError::WouldBlock) if options & WNOHANG != 0 => Ok(0),
        Err(WaitError::WouldBlock) => {
            ctx.kernel.block(TaskState::Waiting);
            Err(Error::Reschedule)
        }
        Err(err) => Err(err.into()),
    }
}

fn sys_times(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let buf = args.get(0);
    if buf != 0 {
        let times = ctx.kernel.times();
        let words = [times.utime, times.stime, times.cutime, times.cstime].map(|ticks| ticks as usize);
        let space = ctx.space()?;
        mm::write_words(ctx.kernel.address_spaces(), space, buf, &words)?;
    }
    Ok(ctx.kernel.clock().now() as usize)
}

// ——— identity ———

fn sys_getpid(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    Ok(ctx.caller()?.tgid().as_raw() as usize)
}

fn sys_gettid(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    Ok(ctx.kernel.current().as_raw() as usize)
}

fn sys_getppid(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    Ok(ctx.caller()?.parent().map_or(0, |pid| pid.as_raw() as usize))
}

fn sys_getpgid(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let pid = pid_arg(args.get(0))?;
    let pgid = group::get_pgid(ctx.kernel.tasks(), ctx.kernel.current(), pid)?;
    Ok(pgid.as_raw() as usize)
}

fn sys_setpgid(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let pid = pid_arg(args.get(0))?;
    let pgid = pid_arg(args.get(1))?;
    group::set_pgid(ctx.kernel.tasks(), ctx.kernel.current(), pid, pgid)?;
    Ok(0)
}

fn sys_getsid(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let pid = pid_arg(args.get(0))?;
    let sid = group::get_sid(ctx.kernel.tasks(), ctx.kernel.current(), pid)?;
    Ok(sid.as_raw() as usize)
}

fn sys_setsid(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    let sid = group::set_sid(ctx.kernel.tasks(), ctx.kernel.current())?;
    Ok(sid.as_raw() as usize)
}

// ——— credentials ———

fn sys_getuid(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    Ok(ctx.caller()?.credentials().ruid.as_raw() as usize)
}

fn sys_geteuid(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    Ok(ctx.caller()?.credentials().euid.as_raw() as usize)
}

fn sys_getgid(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    Ok(ctx.caller()?.credentials().rgid.as_raw() as usize)
}

fn sys_getegid(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    Ok(ctx.caller()?.credentials().egid.as_raw() as usize)
}

fn sys_setuid(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let uid = uid_arg(args.get(0)).ok_or(Error::InvalidArgument)?;
    ctx.caller()?.lock().cred.set_uid(uid)?;
    Ok(0)
}

fn sys_setgid(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let gid = gid_arg(args.get(0)).ok_or(Error::InvalidArgument)?;
    ctx.caller()?.lock().cred.set_gid(gid)?;
    Ok(0)
}

fn sys_setreuid(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let (ruid, euid) = (uid_arg(args.get(0)), uid_arg(args.get(1)));
    ctx.caller()?.lock().cred.set_reuid(ruid, euid)?;
    Ok(0)
}

fn sys_setregid(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let (rgid, egid) = (gid_arg(args.get(0)), gid_arg(args.get(1)));
    ctx.caller()?.lock().cred.set_regid(rgid, egid)?;
    Ok(0)
}

fn sys_setresuid(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let (r, e, s) = (uid_arg(args.get(0)), uid_arg(args.get(1)), uid_arg(args.get(2)));
    ctx.caller()?.lock().cred.set_resuid(r, e, s)?;
    Ok(0)
}

fn sys_setresgid(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let (r, e, s) = (gid_arg(args.get(0)), gid_arg(args.get(1)), gid_arg(args.get(2)));
    ctx.caller()?.lock().cred.set_resgid(r, e, s)?;
    Ok(0)
}

fn sys_getresuid(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let (r, e, s) = ctx.caller()?.credentials().resuid();
    for (addr, id) in [(args.get(0), r), (args.get(1), e), (args.get(2), s)] {
        ctx.write_u32s(addr, &[id.as_raw()])?;
    }
    Ok(0)
}

fn sys_getresgid(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let (r, e, s) = ctx.caller()?.credentials().resgid();
    for (addr, id) in [(args.get(0), r), (args.get(1), e), (args.get(2), s)] {
        ctx.write_u32s(addr, &[id.as_raw()])?;
    }
    Ok(0)
}

/// `size == 0` only reports the count.
fn sys_getgroups(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let (size, list) = (args.get(0), args.get(1));
    let cred = ctx.caller()?.credentials();
    let groups: Vec<u32> = cred.groups().iter().map(|gid| gid.as_raw()).collect();
    if size == 0 {
        return Ok(groups.len());
    }
    if size < groups.len() {
        return Err(Error::InvalidArgument);
    }
    if !groups.is_empty() {
        ctx.write_u32s(list, &groups)?;
    }
    Ok(groups.len())
}

fn sys_setgroups(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let (size, list) = (args.get(0), args.get(1));
    if size > crate::config::NGROUPS_MAX {
        return Err(Error::InvalidArgument);
    }
    let groups: Vec<Gid> = if size == 0 {
        Vec::new()
    } else {
        ctx.read_u32s(list, size)?.into_iter().map(Gid::from_raw).collect()
    };
    ctx.caller()?.lock().cred.set_groups(&groups)?;
    Ok(0)
}

// ——— signals ———

fn sys_kill(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    ctx.kernel.kill(args.get(0) as isize, args.get(1))?;
    Ok(0)
}

fn sys_rt_sigaction(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let (sig, act, oldact) = (args.get(0), args.get(1), args.get(2));
    let new = if act != 0 {
        let mut raw = [0u8; SigAction::WIRE_SIZE];
        ctx.copy_in(act, &mut raw)?;
        Some(SigAction::decode(&raw))
    } else {
        None
    };
    let old = ctx.kernel.sigaction(sig, new)?;
    if oldact != 0 {
        ctx.copy_out(oldact, &old.encode())?;
    }
    Ok(0)
}

fn sys_rt_sigprocmask(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let (how, set, oldset) = (args.get(0), args.get(1), args.get(2));
    let update = if set != 0 {
        let how = MaskHow::from_raw(how).ok_or(Error::InvalidArgument)?;
        let mut raw = [0u8; SIGSET_SIZE];
        ctx.copy_in(set, &mut raw)?;
        Some((how, SigSet::from_bits(u64::from_le_bytes(raw))))
    } else {
        None
    };
    let old = match update {
        Some((how, set)) => ctx.kernel.sigprocmask(how, Some(set))?,
        None => ctx.kernel.sigprocmask(MaskHow::Block, None)?,
    };
    if oldset != 0 {
        ctx.copy_out(oldset, &old.bits().to_le_bytes())?;
    }
    Ok(0)
}

/// A corrupt signal frame is fatal for the caller.
fn sys_rt_sigreturn(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    let pid = ctx.kernel.current();
    match ctx.kernel.sigreturn(ctx.frame) {
        Ok(()) => Err(Error::FrameReplaced),
        Err(err) => {
            let _ = ctx.kernel.force_signal(pid, Signal::SIGSEGV);
            Err(err.into())
        }
    }
}

fn sys_getitimer(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    if args.get(0) != ITIMER_REAL {
        return Err(Error::InvalidArgument);
    }
    let current = ctx.kernel.getitimer()?;
    ctx.copy_out(args.get(1), &current.encode())?;
    Ok(0)
}

fn sys_setitimer(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let (which, new, old) = (args.get(0), args.get(1), args.get(2));
    if which != ITIMER_REAL {
        return Err(Error::InvalidArgument);
    }
    let mut raw = [0u8; ITimerVal::SIZE];
    ctx.copy_in(new, &mut raw)?;
    let request = ITimerVal::decode(&raw);
    if request.value.usec >= 1_000_000 || request.interval.usec >= 1_000_000 {
        return Err(Error::InvalidArgument);
    }
    let previous = ctx.kernel.setitimer(&request)?;
    if old != 0 {
        ctx.copy_out(old, &previous.encode())?;
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelConfig;
    use crate::mm::{AddressSpaces, SimSpaces};
    use crate::sched::PRIORITY_NORMAL;
    use crate::trap::{INTERRUPT_FLAG, IRQ_TIMER, SSTATUS_SPP};
    use alloc::boxed::Box;

    const USER_DATA: usize = 0x1_0000;

    struct Rig {
        kernel: Kernel,
        spaces: Arc<SimSpaces>,
        task: Arc<Task>,
    }

    fn rig() -> Rig {
        let spaces = Arc::new(SimSpaces::new());
        let mut kernel = Kernel::new(KernelConfig { spaces: Box::new(spaces.clone()), ..KernelConfig::default() }).unwrap();
        let space = spaces.create().unwrap();
        spaces.map(space, USER_DATA, 0x1000).unwrap();
        let task = kernel.create_process("init", PRIORITY_NORMAL, space, 0x1000, USER_DATA + 0x1000).unwrap();
        kernel.yield_now();
        assert_eq!(kernel.current(), task.pid());
        Rig { kernel, spaces, task }
    }

    fn call(kernel: &mut Kernel, number: usize, args: [usize; 6]) -> (usize, TrapFrame) {
        let mut frame = kernel.current_task().unwrap().frame();
        frame.x[TrapFrame::A7] = number;
        frame.x[TrapFrame::A0..TrapFrame::A0 + 6].copy_from_slice(&args);
        kernel.syscall(&mut frame);
        (frame.arg(0), frame)
    }

    fn read_u32(rig: &Rig, addr: usize) -> u32 {
        let mut raw = [0u8; 4];
        rig.spaces.copy_from_user(rig.task.address_space().unwrap(), addr, &mut raw).unwrap();
        u32::from_le_bytes(raw)
    }

    fn timer_tick(kernel: &mut Kernel) {
        let mut frame = TrapFrame { scause: INTERRUPT_FLAG | IRQ_TIMER, sstatus: SSTATUS_SPP, ..TrapFrame::default() };
        kernel.handle_trap(&mut frame);
    }

    #[test]
    fn identity_calls_report_the_caller() {
        let mut rig = rig();
        let pid = rig.task.pid().as_raw() as usize;
        assert_eq!(call(&mut rig.kernel, SYSCALL_GETPID, [0; 6]).0, pid);
        assert_eq!(call(&mut rig.kernel, SYSCALL_GETTID, [0; 6]).0, pid);
        assert_eq!(call(&mut rig.kernel, SYSCALL_GETPPID, [0; 6]).0, 0);
        assert_eq!(call(&mut rig.kernel, SYSCALL_GETPGID, [0; 6]).0, pid);
        assert_eq!(call(&mut rig.kernel, SYSCALL_GETUID, [0; 6]).0, 0);
    }

    #[test]
    fn setresuid_then_getresuid_round_trips_through_user_memory() {
        let mut rig = rig();
        assert_eq!(call(&mut rig.kernel, SYSCALL_SETRESUID, [10, 20, 30, 0, 0, 0]).0, 0);
        let out = [USER_DATA, USER_DATA + 4, USER_DATA + 8];
        assert_eq!(call(&mut rig.kernel, SYSCALL_GETRESUID, [out[0], out[1], out[2], 0, 0, 0]).0, 0);
        assert_eq!([read_u32(&rig, out[0]), read_u32(&rig, out[1]), read_u32(&rig, out[2])], [10, 20, 30]);

        assert_eq!(call(&mut rig.kernel, SYSCALL_SETUID, [0; 6]).0, error_return(EPERM));
        assert_eq!(call(&mut rig.kernel, SYSCALL_GETEUID, [0; 6]).0, 20);
        assert_eq!(call(&mut rig.kernel, SYSCALL_GETRESUID, [0x9000_0000, out[1], out[2], 0, 0, 0]).0, error_return(EFAULT));
    }

    #[test]
    fn groups_are_bounded_and_privileged() {
        let mut rig = rig();
        let space = rig.task.address_space().unwrap();
        for (n, gid) in [7u32, 8, 9].iter().enumerate() {
            rig.spaces.copy_to_user(space, USER_DATA + n * 4, &gid.to_le_bytes()).unwrap();
        }
        assert_eq!(call(&mut rig.kernel, SYSCALL_SETGROUPS, [3, USER_DATA, 0, 0, 0, 0]).0, 0);
        assert_eq!(call(&mut rig.kernel, SYSCALL_GETGROUPS, [0; 6]).0, 3);
        assert_eq!(call(&mut rig.kernel, SYSCALL_GETGROUPS, [1, USER_DATA + 0x100, 0, 0, 0, 0]).0, error_return(EINVAL));
        assert_eq!(call(&mut rig.kernel, SYSCALL_GETGROUPS, [8, USER_DATA + 0x100, 0, 0, 0, 0]).0, 3);
        assert_eq!(read_u32(&rig, USER_DATA + 0x108), 9);
        assert_eq!(call(&mut rig.kernel, SYSCALL_SETGROUPS, [64, USER_DATA, 0, 0, 0, 0]).0, error_return(EINVAL));
    }

    #[test]
    fn nanosleep_parks_then_reports_early_wake() {
        let mut rig = rig();
        let request = TimeSpec { sec: 0, nsec: 30_000_000 };
        let space = rig.task.address_space().unwrap();
        rig.spaces.copy_to_user(space, USER_DATA, &request.encode()).unwrap();

        let sepc = rig.task.frame().sepc;
        let (_, frame) = call(&mut rig.kernel, SYSCALL_NANOSLEEP, [USER_DATA, USER_DATA + 16, 0, 0, 0, 0]);
        assert_eq!(frame.sepc, sepc);
        assert_eq!(rig.task.state(), TaskState::Blocked);

        rig.kernel.wakeup(rig.task.pid());
        rig.kernel.yield_now();
        assert_eq!(rig.kernel.current(), rig.task.pid());
        let (ret, frame) = call(&mut rig.kernel, SYSCALL_NANOSLEEP, [USER_DATA, USER_DATA + 16, 0, 0, 0, 0]);
        assert_eq!(ret, error_return(EINTR));
        assert_eq!(frame.sepc, sepc + 4);
        let mut raw = [0u8; TIMESPEC_SIZE];
        rig.spaces.copy_from_user(space, USER_DATA + 16, &mut raw).unwrap();
        assert_eq!(TimeSpec::decode(&raw).nsec, 30_000_000);
    }

    #[test]
    fn nanosleep_completes_when_the_timer_fires() {
        let mut rig = rig();
        let request = TimeSpec { sec: 0, nsec: 20_000_000 };
        let space = rig.task.address_space().unwrap();
        rig.spaces.copy_to_user(space, USER_DATA, &request.encode()).unwrap();
        call(&mut rig.kernel, SYSCALL_NANOSLEEP, [USER_DATA, 0, 0, 0, 0, 0]);
        assert_eq!(rig.kernel.current(), Pid::IDLE);

        timer_tick(&mut rig.kernel);
        assert_eq!(rig.task.state(), TaskState::Blocked);
        timer_tick(&mut rig.kernel);
        assert_ne!(rig.task.state(), TaskState::Blocked);
        if rig.kernel.current() != rig.task.pid() {
            rig.kernel.yield_now();
        }
        assert_eq!(call(&mut rig.kernel, SYSCALL_NANOSLEEP, [USER_DATA, 0, 0, 0, 0, 0]).0, 0);
    }

    #[test]
    fn clone_wait_and_exit() {
        let mut rig = rig();
        let parent = rig.task.pid();
        let (child, _) = call(&mut rig.kernel, SYSCALL_CLONE, [Signal::SIGCHLD.number(), 0, 0, 0, 0, 0]);
        let child = Pid::from_raw(child as u32);
        assert_eq!(rig.kernel.task(child).unwrap().parent(), Some(parent));

        assert_eq!(call(&mut rig.kernel, SYSCALL_WAIT4, [usize::MAX, 0, WNOHANG, 0, 0, 0]).0, 0);
        let (_, frame) = call(&mut rig.kernel, SYSCALL_WAIT4, [usize::MAX, USER_DATA, 0, 0, 0, 0]);
        assert_eq!(frame.sepc, 0x1000);
        assert_eq!(rig.task.state(), TaskState::Waiting);
        assert_eq!(rig.kernel.current(), child);

        call(&mut rig.kernel, SYSCALL_EXIT, [3, 0, 0, 0, 0, 0]);
        assert_eq!(rig.kernel.current(), parent);
        let (reaped, _) = call(&mut rig.kernel, SYSCALL_WAIT4, [usize::MAX, USER_DATA, 0, 0, 0, 0]);
        assert_eq!(reaped, child.as_raw() as usize);
        assert_eq!(read_u32(&rig, USER_DATA) as i32, exit_status_code(3));
        assert!(rig.kernel.task(child).is_none());
        assert_eq!(call(&mut rig.kernel, SYSCALL_WAIT4, [usize::MAX, 0, 0, 0, 0, 0]).0, error_return(ECHILD));
    }

    #[test]
    fn clone_thread_shares_the_space_and_sets_tls() {
        let mut rig = rig();
        let flags = CLONE_VM | CLONE_THREAD | CLONE_SETTLS | CLONE_PARENT_SETTID;
        let (tid, _) = call(&mut rig.kernel, SYSCALL_CLONE, [flags, USER_DATA + 0x800, USER_DATA, 0x7777, 0, 0]);
        let thread = rig.kernel.task(Pid::from_raw(tid as u32)).unwrap();
        assert_eq!(thread.tgid(), rig.task.pid());
        assert_eq!(thread.address_space(), rig.task.address_space());
        assert_eq!(thread.frame().x[TrapFrame::TP], 0x7777);
        assert_eq!(thread.frame().sp(), USER_DATA + 0x800);
        assert_eq!(read_u32(&rig, USER_DATA), tid as u32);

        let bad = CLONE_THREAD;
        assert_eq!(call(&mut rig.kernel, SYSCALL_CLONE, [bad, 0, 0, 0, 0, 0]).0, error_return(EINVAL));
    }

    #[test]
    fn sigprocmask_validates_how_and_reports_old_mask() {
        let mut rig = rig();
        let space = rig.task.address_space().unwrap();
        let mut set = SigSet::EMPTY;
        set.insert(Signal::SIGUSR1);
        set.insert(Signal::SIGKILL);
        rig.spaces.copy_to_user(space, USER_DATA, &set.bits().to_le_bytes()).unwrap();

        assert_eq!(call(&mut rig.kernel, SYSCALL_RT_SIGPROCMASK, [9, USER_DATA, 0, 8, 0, 0]).0, error_return(EINVAL));
        assert_eq!(call(&mut rig.kernel, SYSCALL_RT_SIGPROCMASK, [0, USER_DATA, 0, 8, 0, 0]).0, 0);
        assert_eq!(call(&mut rig.kernel, SYSCALL_RT_SIGPROCMASK, [0, 0, USER_DATA + 8, 8, 0, 0]).0, 0);
        let mut raw = [0u8; 8];
        rig.spaces.copy_from_user(space, USER_DATA + 8, &mut raw).unwrap();
        let blocked = SigSet::from_bits(u64::from_le_bytes(raw));
        assert!(blocked.contains(Signal::SIGUSR1));
        assert!(!blocked.contains(Signal::SIGKILL));
    }

    #[test]
    fn itimer_round_trip() {
        let mut rig = rig();
        let space = rig.task.address_space().unwrap();
        let request = ITimerVal {
            interval: crate::signal::TimeVal { sec: 0, usec: 50_000 },
            value: crate::signal::TimeVal { sec: 1, usec: 0 },
        };
        rig.spaces.copy_to_user(space, USER_DATA, &request.encode()).unwrap();
        assert_eq!(call(&mut rig.kernel, SYSCALL_SETITIMER, [ITIMER_REAL, USER_DATA, 0, 0, 0, 0]).0, 0);
        assert_eq!(call(&mut rig.kernel, SYSCALL_GETITIMER, [ITIMER_REAL, USER_DATA + 64, 0, 0, 0, 0]).0, 0);
        let mut raw = [0u8; ITimerVal::SIZE];
        rig.spaces.copy_from_user(space, USER_DATA + 64, &mut raw).unwrap();
        assert_eq!(ITimerVal::decode(&raw), request);
        assert_eq!(call(&mut rig.kernel, SYSCALL_GETITIMER, [1, USER_DATA, 0, 0, 0, 0]).0, error_return(EINVAL));
    }
}
