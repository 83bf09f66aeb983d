// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: POSIX signal model (numbers, sets, dispositions, per-task state, alarms)
//! OWNERS: @kernel-team
//! PUBLIC API: Signal, SigSet, SigAction, SaFlags, DefaultAction, SignalState, Alarm,
//!             SignalFrame, ITimerVal, SignalError
//! DEPENDS_ON: bitflags, trap::TrapFrame
//! INVARIANTS: SIGKILL/SIGSTOP are never blocked, caught or ignored;
//!             delivery order is lowest pending number first
//!
//! The kernel-side operations (send, deliver, sigreturn, alarm ticking) live in
//! `kernel::signals`; this module only holds data and pure transitions.

mod action;
mod frame;
mod state;

pub use action::{Disposition, SaFlags, SigAction, SIG_DFL, SIG_IGN};
pub use frame::{ITimerVal, SignalFrame, TimeVal};
pub use state::{Alarm, SignalState};

use core::fmt;

/// Number of signals supported (1..=NSIG).
pub const NSIG: usize = 31;

/// A valid signal number in `1..=31`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Signal(u8);

impl Signal {
    pub const SIGHUP: Self = Self(1);
    pub const SIGINT: Self = Self(2);
    pub const SIGQUIT: Self = Self(3);
    pub const SIGILL: Self = Self(4);
    pub const SIGTRAP: Self = Self(5);
    pub const SIGABRT: Self = Self(6);
    pub const SIGBUS: Self = Self(7);
    pub const SIGFPE: Self = Self(8);
    pub const SIGKILL: Self = Self(9);
    pub const SIGUSR1: Self = Self(10);
    pub const SIGSEGV: Self = Self(11);
    pub const SIGUSR2: Self = Self(12);
    pub const SIGPIPE: Self = Self(13);
    pub const SIGALRM: Self = Self(14);
    pub const SIGTERM: Self = Self(15);
    pub const SIGSTKFLT: Self = Self(16);
    pub const SIGCHLD: Self = Self(17);
    pub const SIGCONT: Self = Self(18);
    pub const SIGSTOP: Self = Self(19);
    pub const SIGTSTP: Self = Self(20);
    pub const SIGTTIN: Self = Self(21);
    pub const SIGTTOU: Self = Self(22);
    pub const SIGURG: Self = Self(23);
    pub const SIGXCPU: Self = Self(24);
    pub const SIGXFSZ: Self = Self(25);
    pub const SIGVTALRM: Self = Self(26);
    pub const SIGPROF: Self = Self(27);
    pub const SIGWINCH: Self = Self(28);
    pub const SIGIO: Self = Self(29);
    pub const SIGPWR: Self = Self(30);
    pub const SIGSYS: Self = Self(31);

    /// Validates a raw signal number.
    pub const fn new(raw: usize) -> Option<Self> {
        if raw >= 1 && raw <= NSIG {
            Some(Self(raw as u8))
        } else {
            None
        }
    }

    pub const fn number(self) -> usize {
        self.0 as usize
    }

    const fn bit(self) -> u64 {
        1 << (self.0 - 1)
    }

    /// SIGKILL and SIGSTOP cannot be caught, blocked or ignored.
    pub const fn is_uncatchable(self) -> bool {
        self.0 == Self::SIGKILL.0 || self.0 == Self::SIGSTOP.0
    }

    pub const fn default_action(self) -> DefaultAction {
        match self.0 {
            3 | 4 | 5 | 6 | 7 | 8 | 11 | 24 | 25 | 31 => DefaultAction::CoreDump,
            17 | 23 | 28 => DefaultAction::Ignore,
            19 | 20 | 21 | 22 => DefaultAction::Stop,
            18 => DefaultAction::Continue,
            _ => DefaultAction::Terminate,
        }
    }

    /// Iterates over every valid signal in ascending order.
    pub fn all() -> impl Iterator<Item = Signal> {
        (1..=NSIG as u8).map(Signal)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sig{}", self.0)
    }
}

/// What happens to a signal whose disposition is `SIG_DFL`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DefaultAction {
    Terminate,
    /// Terminate and flag the exit status with the core bit.
    CoreDump,
    Ignore,
    Stop,
    Continue,
}

/// Wait status bit reported for core-dumping terminations.
pub const CORE_FLAG: i32 = 0x80;

/// Encodes a normal exit for `wait4`.
pub const fn exit_status_code(code: i32) -> i32 {
    (code & 0xff) << 8
}

/// Encodes a termination by signal for `wait4`.
pub const fn exit_status_signal(sig: Signal, core: bool) -> i32 {
    sig.0 as i32 | if core { CORE_FLAG } else { 0 }
}

/// A set of signals as a 64-bit mask; bit `n - 1` stands for signal `n`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct SigSet(u64);

impl SigSet {
    pub const EMPTY: Self = Self(0);
    const VALID: u64 = (1 << NSIG) - 1;

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits & Self::VALID)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, sig: Signal) -> bool {
        self.0 & sig.bit() != 0
    }

    pub fn insert(&mut self, sig: Signal) {
        self.0 |= sig.bit();
    }

    pub fn remove(&mut self, sig: Signal) {
        self.0 &= !sig.bit();
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Drops SIGKILL and SIGSTOP; used for every mask that comes from user space.
    pub const fn without_uncatchable(self) -> Self {
        Self(self.0 & !(Signal::SIGKILL.bit() | Signal::SIGSTOP.bit()))
    }

    /// Lowest-numbered member.
    pub fn first(self) -> Option<Signal> {
        if self.0 == 0 {
            None
        } else {
            Signal::new(self.0.trailing_zeros() as usize + 1)
        }
    }
}

impl From<Signal> for SigSet {
    fn from(sig: Signal) -> Self {
        Self(sig.bit())
    }
}

/// Errors reported by signal-related operations.
#[must_use]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SignalError {
    /// Signal number outside `1..=31`, or an attempt to change SIGKILL/SIGSTOP.
    InvalidSignal,
    NoSuchProcess,
    PermissionDenied,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_outside_range_are_rejected() {
        assert!(Signal::new(0).is_none());
        assert!(Signal::new(32).is_none());
        assert_eq!(Signal::new(9), Some(Signal::SIGKILL));
    }

    #[test]
    fn default_actions_follow_posix() {
        assert_eq!(Signal::SIGSEGV.default_action(), DefaultAction::CoreDump);
        assert_eq!(Signal::SIGTERM.default_action(), DefaultAction::Terminate);
        assert_eq!(Signal::SIGCHLD.default_action(), DefaultAction::Ignore);
        assert_eq!(Signal::SIGTSTP.default_action(), DefaultAction::Stop);
        assert_eq!(Signal::SIGCONT.default_action(), DefaultAction::Continue);
        assert_eq!(Signal::SIGALRM.default_action(), DefaultAction::Terminate);
    }

    #[test]
    fn first_picks_lowest_number() {
        let mut set = SigSet::EMPTY;
        set.insert(Signal::SIGTERM);
        set.insert(Signal::SIGINT);
        assert_eq!(set.first(), Some(Signal::SIGINT));
        set.remove(Signal::SIGINT);
        assert_eq!(set.first(), Some(Signal::SIGTERM));
    }

    #[test]
    fn user_masks_cannot_hold_kill_or_stop() {
        let set = SigSet::from_bits(u64::MAX).without_uncatchable();
        assert!(!set.contains(Signal::SIGKILL));
        assert!(!set.contains(Signal::SIGSTOP));
        assert!(set.contains(Signal::SIGUSR1));
        assert_eq!(SigSet::from_bits(u64::MAX).bits(), (1 << 31) - 1);
    }

    #[test]
    fn exit_status_encoding() {
        assert_eq!(exit_status_code(3), 0x300);
        assert_eq!(exit_status_signal(Signal::SIGSEGV, true), 11 | 0x80);
        assert_eq!(exit_status_signal(Signal::SIGKILL, false), 9);
    }
}
