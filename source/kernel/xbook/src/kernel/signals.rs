// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Posting, masking and delivering signals; the per-task alarm.
//!
//! Senders only touch the target's signal lock. Delivery happens on the way
//! back to user mode and installs at most one user handler per pass.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use super::Kernel;
use crate::mm::UserAccessError;
use crate::signal::{
    exit_status_signal, Alarm, DefaultAction, Disposition, ITimerVal, SaFlags, SigAction, SigSet, Signal,
    SignalError, SignalFrame, SignalState, TimeVal,
};
use crate::task::{Credentials, Task, TaskState};
use crate::trap::{TrapFrame, SSTATUS_SPIE, SSTATUS_SPP};
use crate::types::{Pid, Ticks};

const STOP_SIGNALS: [Signal; 4] = [Signal::SIGSTOP, Signal::SIGTSTP, Signal::SIGTTIN, Signal::SIGTTOU];

/// `how` argument of `rt_sigprocmask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskHow {
    Block,
    Unblock,
    SetMask,
}

impl MaskHow {
    pub fn from_raw(raw: usize) -> Option<Self> {
        match raw {
            0 => Some(MaskHow::Block),
            1 => Some(MaskHow::Unblock),
            2 => Some(MaskHow::SetMask),
            _ => None,
        }
    }
}

/// What one delivery pass did to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Nothing,
    /// A user handler frame was pushed for this signal.
    Handler(Signal),
    Stopped(Signal),
    Terminated(Signal),
}

/// True when delivering `sig` would have no effect, so a sleeper need not wake.
fn has_no_effect(state: &SignalState, sig: Signal) -> bool {
    match state.action(sig).disposition {
        Disposition::Ignore => true,
        Disposition::Default => {
            matches!(sig.default_action(), DefaultAction::Ignore | DefaultAction::Continue)
        }
        Disposition::Handler(_) => false,
    }
}

/// POSIX rule: the sender's real or effective uid must match the target's
/// real or saved uid, unless the sender is privileged.
fn may_signal(sender: &Credentials, target: &Credentials) -> bool {
    sender.is_privileged()
        || [sender.ruid, sender.euid].iter().any(|uid| *uid == target.ruid || *uid == target.suid)
}

impl Kernel {
    /// Marks `sig` pending on `pid` and wakes it if it sleeps interruptibly
    /// and the signal is deliverable. SIGCONT resumes a stopped task and
    /// SIGKILL wakes it.
    pub fn send_signal(&mut self, pid: Pid, sig: Signal) -> Result<(), SignalError> {
        let task = self.tasks.find_by_pid(pid).ok_or(SignalError::NoSuchProcess)?;
        let state = task.state();
        if state.has_exited() {
            return Ok(());
        }
        let deliverable = {
            let mut signals = task.signals();
            if sig == Signal::SIGCONT {
                for stop in STOP_SIGNALS {
                    signals.pending.remove(stop);
                }
            } else if sig.default_action() == DefaultAction::Stop {
                signals.pending.remove(Signal::SIGCONT);
            }
            signals.pending.insert(sig);
            let blocked = signals.blocked.without_uncatchable().contains(sig);
            sig.is_uncatchable() || (!blocked && !has_no_effect(&signals, sig))
        };
        let wake = match state {
            TaskState::Stopped => sig == Signal::SIGCONT || sig == Signal::SIGKILL,
            TaskState::Blocked | TaskState::Waiting => deliverable,
            _ => false,
        };
        log_trace!(target: "signal", "{} -> pid {} (wake {})", sig, pid, wake);
        if wake {
            self.sched.wakeup(&task);
        }
        Ok(())
    }

    /// Posts a signal the task cannot ignore or block, as for synchronous faults.
    pub fn force_signal(&mut self, pid: Pid, sig: Signal) -> Result<(), SignalError> {
        let task = self.tasks.find_by_pid(pid).ok_or(SignalError::NoSuchProcess)?;
        {
            let mut signals = task.signals();
            signals.blocked.remove(sig);
            if signals.action(sig).disposition == Disposition::Ignore {
                signals.set_action(sig, SigAction::default());
            }
        }
        drop(task);
        self.send_signal(pid, sig)
    }

    /// `kill(2)` on behalf of the current task. `sig == 0` only checks that
    /// the target exists and may be signalled.
    ///
    /// `target > 0` names one process, `0` the caller's process group, `-1`
    /// every process except idle, init and the caller, and `< -1` the group `-target`.
    pub fn kill(&mut self, target: isize, sig: usize) -> Result<(), SignalError> {
        let sig = match sig {
            0 => None,
            raw => Some(Signal::new(raw).ok_or(SignalError::InvalidSignal)?),
        };
        let caller = self.current_task().ok_or(SignalError::NoSuchProcess)?;
        let sender = caller.credentials();
        let caller_pid = caller.pid();
        let caller_pgid = caller.pgid();
        drop(caller);

        let group_of = |raw: usize| u32::try_from(raw).map(Pid::from_raw).map_err(|_| SignalError::NoSuchProcess);
        let targets: Vec<Arc<Task>> = match target {
            pid if pid > 0 => {
                let pid = group_of(pid as usize)?;
                vec![self.tasks.find_by_pid(pid).ok_or(SignalError::NoSuchProcess)?]
            }
            0 => self.tasks.members_of_group(caller_pgid),
            -1 => self
                .tasks
                .tasks()
                .into_iter()
                .filter(|task| task.pid() != Pid::INIT && task.pid() != caller_pid)
                .collect(),
            group => self.tasks.members_of_group(group_of(group.unsigned_abs())?),
        };

        let mut delivered = false;
        let mut denied = false;
        for task in targets {
            if task.pid() == Pid::IDLE || task.is_kernel_thread() {
                continue;
            }
            if !may_signal(&sender, &task.credentials()) {
                denied = true;
                continue;
            }
            delivered = true;
            if let Some(sig) = sig {
                self.send_signal(task.pid(), sig)?;
            }
        }
        match (delivered, denied) {
            (true, _) => Ok(()),
            (false, true) => Err(SignalError::PermissionDenied),
            (false, false) => Err(SignalError::NoSuchProcess),
        }
    }

    /// Reads and optionally replaces the current task's action for `sig`.
    /// Ignoring a signal discards it if pending.
    pub fn sigaction(&mut self, sig: usize, new: Option<SigAction>) -> Result<SigAction, SignalError> {
        let sig = Signal::new(sig).ok_or(SignalError::InvalidSignal)?;
        if new.is_some() && sig.is_uncatchable() {
            return Err(SignalError::InvalidSignal);
        }
        let task = self.current_task().ok_or(SignalError::NoSuchProcess)?;
        let mut signals = task.signals();
        let old = signals.action(sig);
        if let Some(mut action) = new {
            action.mask = action.mask.without_uncatchable();
            signals.set_action(sig, action);
            if has_no_effect(&signals, sig) {
                signals.pending.remove(sig);
            }
        }
        Ok(old)
    }

    /// Updates the current task's blocked mask; returns the previous one.
    pub fn sigprocmask(&mut self, how: MaskHow, set: Option<SigSet>) -> Result<SigSet, SignalError> {
        let task = self.current_task().ok_or(SignalError::NoSuchProcess)?;
        let mut signals = task.signals();
        let old = signals.blocked;
        if let Some(set) = set {
            let blocked = match how {
                MaskHow::Block => old.union(set),
                MaskHow::Unblock => old.difference(set),
                MaskHow::SetMask => set,
            };
            signals.blocked = blocked.without_uncatchable();
        }
        Ok(old)
    }

    /// Runs the dispositions of `pid`'s deliverable signals, lowest number
    /// first. Ignored signals are dropped, default actions applied, and the
    /// pass ends after the first user handler, stop or termination.
    pub fn deliver_pending(&mut self, pid: Pid) -> Delivery {
        let Some(task) = self.tasks.find_by_pid(pid) else {
            return Delivery::Nothing;
        };
        loop {
            let next = {
                let mut signals = task.signals();
                signals.next_deliverable().map(|sig| {
                    signals.pending.remove(sig);
                    (sig, signals.action(sig))
                })
            };
            let Some((sig, action)) = next else {
                return Delivery::Nothing;
            };
            match action.disposition {
                Disposition::Ignore => continue,
                Disposition::Default => match sig.default_action() {
                    DefaultAction::Ignore | DefaultAction::Continue => continue,
                    DefaultAction::Stop => {
                        drop(task);
                        self.stop_task(pid);
                        return Delivery::Stopped(sig);
                    }
                    DefaultAction::Terminate | DefaultAction::CoreDump => {
                        drop(task);
                        let core = sig.default_action() == DefaultAction::CoreDump;
                        self.exit_task(pid, exit_status_signal(sig, core));
                        return Delivery::Terminated(sig);
                    }
                },
                Disposition::Handler(entry) => {
                    let pushed = self.push_signal_frame(&task, sig, entry, &action);
                    return match pushed {
                        Ok(()) => Delivery::Handler(sig),
                        Err(UserAccessError::Fault) => {
                            log_warn!(target: "signal", "pid {}: cannot push frame for {}", pid, sig);
                            drop(task);
                            self.exit_task(pid, exit_status_signal(Signal::SIGSEGV, true));
                            Delivery::Terminated(Signal::SIGSEGV)
                        }
                    };
                }
            }
        }
    }

    fn stop_task(&mut self, pid: Pid) {
        if pid == self.sched.current() {
            self.block(TaskState::Stopped);
            return;
        }
        if let Some(task) = self.tasks.find_by_pid(pid) {
            self.sched.unlink(&task);
            let mut inner = task.lock();
            inner.state = TaskState::Stopped;
            inner.flags.insert(crate::task::TaskFlags::WAITLIST);
        }
    }

    /// Saves the interrupted user context below the user stack and redirects
    /// the task into `entry(signo)` returning through the restorer.
    fn push_signal_frame(
        &mut self,
        task: &Task,
        sig: Signal,
        entry: usize,
        action: &SigAction,
    ) -> Result<(), UserAccessError> {
        let space = task.address_space().ok_or(UserAccessError::Fault)?;
        let frame = task.frame();
        let saved_mask = task.signals().blocked;
        let addr = SignalFrame::placement(frame.sp()).ok_or(UserAccessError::Fault)?;
        let record = SignalFrame::new(sig, saved_mask, frame);
        self.spaces.copy_to_user(space, addr, &record.encode())?;
        {
            let mut inner = task.lock();
            let user = &mut inner.frame;
            user.sepc = entry;
            user.x[TrapFrame::A0] = sig.number();
            user.x[TrapFrame::RA] = action.restorer;
            user.x[TrapFrame::SP] = addr;
        }
        let mut signals = task.signals();
        let mut blocked = signals.blocked.union(action.mask);
        if !action.flags.contains(SaFlags::NODEFER) {
            blocked.insert(sig);
        }
        signals.blocked = blocked.without_uncatchable();
        if action.flags.contains(SaFlags::RESETHAND) {
            signals.set_action(sig, SigAction::default());
        }
        log_debug!(target: "signal", "pid {}: handler 0x{:x} for {}", task.pid(), entry, sig);
        Ok(())
    }

    /// Restores the context saved by the last handler frame at `frame.sp()`.
    /// The restored frame always returns to user mode.
    pub fn sigreturn(&mut self, frame: &mut TrapFrame) -> Result<(), UserAccessError> {
        let task = self.current_task().ok_or(UserAccessError::Fault)?;
        let space = task.address_space().ok_or(UserAccessError::Fault)?;
        let mut raw = [0u8; SignalFrame::SIZE];
        self.spaces.copy_from_user(space, frame.sp(), &mut raw)?;
        let record = SignalFrame::decode(&raw).ok_or(UserAccessError::Fault)?;
        let mut restored = record.frame;
        restored.sstatus = (restored.sstatus & !SSTATUS_SPP) | SSTATUS_SPIE;
        *frame = restored;
        task.signals().blocked = record.saved_mask;
        Ok(())
    }

    // ——— alarm ———

    /// Replaces the alarm of `pid` (`delay == 0` disarms) and returns the old one.
    pub fn set_alarm(&mut self, pid: Pid, delay: Ticks, interval: Ticks) -> Result<Alarm, SignalError> {
        let task = self.tasks.find_by_pid(pid).ok_or(SignalError::NoSuchProcess)?;
        let previous = task.signals().alarm.set(delay, interval);
        Ok(previous)
    }

    /// `alarm(2)`: one-shot SIGALRM after `seconds`; returns the seconds that
    /// were left on the previous alarm, rounded up.
    pub fn alarm(&mut self, seconds: u64) -> u64 {
        let ticks = self.tunables.secs_to_ticks(seconds);
        let pid = self.sched.current();
        let previous = self.set_alarm(pid, ticks, 0).unwrap_or_default();
        previous.remaining.div_ceil(self.tunables.tick_rate())
    }

    /// `setitimer(ITIMER_REAL)`.
    pub fn setitimer(&mut self, new: &ITimerVal) -> Result<ITimerVal, SignalError> {
        let value = self.tunables.micros_to_ticks(new.value.as_micros());
        let interval = self.tunables.micros_to_ticks(new.interval.as_micros());
        let pid = self.sched.current();
        let previous = self.set_alarm(pid, value, interval)?;
        Ok(self.itimerval(previous))
    }

    /// `getitimer(ITIMER_REAL)`.
    pub fn getitimer(&self) -> Result<ITimerVal, SignalError> {
        let task = self.current_task().ok_or(SignalError::NoSuchProcess)?;
        let alarm = task.signals().alarm;
        Ok(self.itimerval(alarm))
    }

    fn itimerval(&self, alarm: Alarm) -> ITimerVal {
        ITimerVal {
            interval: TimeVal::from_micros(self.tunables.ticks_to_micros(alarm.interval)),
            value: TimeVal::from_micros(self.tunables.ticks_to_micros(alarm.remaining)),
        }
    }

    /// Counts one tick on every armed alarm and posts SIGALRM for those that fire.
    pub(crate) fn tick_alarms(&mut self) {
        let fired: Vec<Pid> = self
            .tasks
            .tasks()
            .into_iter()
            .filter(|task| !task.state().has_exited() && task.signals().alarm.tick())
            .map(|task| task.pid())
            .collect();
        for pid in fired {
            let _ = self.send_signal(pid, Signal::SIGALRM);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelConfig;
    use crate::sched::PRIORITY_NORMAL;

    fn running_task(kernel: &mut Kernel) -> Arc<Task> {
        let task = kernel.create("t", PRIORITY_NORMAL).unwrap();
        kernel.yield_now();
        assert_eq!(kernel.current(), task.pid());
        task
    }

    #[test]
    fn blocked_signal_stays_pending_and_does_not_wake() {
        let mut kernel = Kernel::new(KernelConfig::default()).unwrap();
        let t = running_task(&mut kernel);
        let mut mask = SigSet::EMPTY;
        mask.insert(Signal::SIGUSR1);
        kernel.sigprocmask(MaskHow::Block, Some(mask)).unwrap();
        kernel.block(TaskState::Blocked);

        kernel.send_signal(t.pid(), Signal::SIGUSR1).unwrap();
        assert_eq!(t.state(), TaskState::Blocked);
        assert!(t.signal_state().pending.contains(Signal::SIGUSR1));

        kernel.send_signal(t.pid(), Signal::SIGKILL).unwrap();
        assert_eq!(t.state(), TaskState::Ready);
    }

    #[test]
    fn ignored_signals_are_discarded_at_delivery() {
        let mut kernel = Kernel::new(KernelConfig::default()).unwrap();
        let t = running_task(&mut kernel);
        kernel.sigaction(Signal::SIGTERM.number(), Some(SigAction::ignore())).unwrap();
        kernel.send_signal(t.pid(), Signal::SIGTERM).unwrap();
        kernel.send_signal(t.pid(), Signal::SIGCHLD).unwrap();
        assert_eq!(kernel.deliver_pending(t.pid()), Delivery::Nothing);
        assert!(t.signal_state().pending.is_empty());
        assert!(!t.state().has_exited());
    }

    #[test]
    fn kill_and_stop_cannot_be_caught() {
        let mut kernel = Kernel::new(KernelConfig::default()).unwrap();
        running_task(&mut kernel);
        let handler = SigAction::handler(0x1000, 0x2000);
        assert_eq!(kernel.sigaction(Signal::SIGKILL.number(), Some(handler)), Err(SignalError::InvalidSignal));
        assert_eq!(kernel.sigaction(Signal::SIGSTOP.number(), Some(handler)), Err(SignalError::InvalidSignal));
        assert_eq!(kernel.sigaction(0, None), Err(SignalError::InvalidSignal));
        assert!(kernel.sigaction(Signal::SIGKILL.number(), None).is_ok());
    }

    #[test]
    fn default_terminate_encodes_the_signal() {
        let mut kernel = Kernel::new(KernelConfig::default()).unwrap();
        let t = running_task(&mut kernel);
        kernel.send_signal(t.pid(), Signal::SIGTERM).unwrap();
        assert_eq!(kernel.deliver_pending(t.pid()), Delivery::Terminated(Signal::SIGTERM));
        assert_eq!(t.exit_status(), Signal::SIGTERM.number() as i32);
        assert_eq!(kernel.current(), Pid::IDLE);
    }

    #[test]
    fn stop_and_continue() {
        let mut kernel = Kernel::new(KernelConfig::default()).unwrap();
        let t = running_task(&mut kernel);
        kernel.send_signal(t.pid(), Signal::SIGTSTP).unwrap();
        assert_eq!(kernel.deliver_pending(t.pid()), Delivery::Stopped(Signal::SIGTSTP));
        assert_eq!(t.state(), TaskState::Stopped);

        kernel.send_signal(t.pid(), Signal::SIGUSR1).unwrap();
        assert_eq!(t.state(), TaskState::Stopped);
        kernel.send_signal(t.pid(), Signal::SIGCONT).unwrap();
        assert_eq!(t.state(), TaskState::Ready);
        kernel.sched.check_invariants(&kernel.tasks).unwrap();
    }

    #[test]
    fn handler_without_address_space_kills_with_segv() {
        let mut kernel = Kernel::new(KernelConfig::default()).unwrap();
        let t = running_task(&mut kernel);
        kernel.sigaction(Signal::SIGUSR2.number(), Some(SigAction::handler(0x1000, 0x2000))).unwrap();
        kernel.send_signal(t.pid(), Signal::SIGUSR2).unwrap();
        assert_eq!(kernel.deliver_pending(t.pid()), Delivery::Terminated(Signal::SIGSEGV));
        assert_eq!(t.exit_status(), exit_status_signal(Signal::SIGSEGV, true));
    }

    #[test]
    fn alarm_fires_once_after_its_delay() {
        let mut kernel = Kernel::new(KernelConfig::default()).unwrap();
        let t = running_task(&mut kernel);
        assert_eq!(kernel.set_alarm(t.pid(), 2, 0), Ok(Alarm::default()));
        kernel.tick_alarms();
        assert!(!t.signal_state().pending.contains(Signal::SIGALRM));
        kernel.tick_alarms();
        assert!(t.signal_state().pending.contains(Signal::SIGALRM));
        assert!(!t.signal_state().alarm.is_armed());
    }

    #[test]
    fn alarm_reports_previous_seconds_rounded_up() {
        let mut kernel = Kernel::new(KernelConfig::default()).unwrap();
        let t = running_task(&mut kernel);
        assert_eq!(kernel.alarm(5), 0);
        kernel.tick_alarms();
        assert_eq!(kernel.alarm(0), 5);
        assert!(!t.signal_state().alarm.is_armed());
    }

    #[test]
    fn kill_checks_permissions() {
        let mut kernel = Kernel::new(KernelConfig::default()).unwrap();
        let victim = running_task(&mut kernel);
        victim.lock().cred = Credentials::new(crate::types::Uid::from_raw(0), crate::types::Gid::from_raw(0));
        let attacker = kernel.create("attacker", PRIORITY_NORMAL).unwrap();
        attacker.lock().cred = Credentials::new(crate::types::Uid::from_raw(1000), crate::types::Gid::from_raw(1000));
        kernel.yield_now();
        assert_eq!(kernel.current(), attacker.pid());
        assert_eq!(kernel.kill(victim.pid().as_raw() as isize, 15), Err(SignalError::PermissionDenied));
        assert_eq!(kernel.kill(4000, 15), Err(SignalError::NoSuchProcess));
        assert_eq!(kernel.kill(attacker.pid().as_raw() as isize, 64), Err(SignalError::InvalidSignal));
        assert_eq!(kernel.kill(attacker.pid().as_raw() as isize, 0), Ok(()));
    }
}
