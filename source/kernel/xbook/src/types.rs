// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Identifier newtypes shared by the task, scheduler and syscall layers
//! OWNERS: @kernel-team
//! PUBLIC API: Pid, Uid, Gid, Ticks
//! INVARIANTS: PID 0 is the idle task; PID 1 is the reaper when it exists
//!
//! Newtypes keep PIDs and credential ids from being mixed up at syscall
//! decoding time; they compile down to the raw integers.

use core::fmt;

/// Count of timer ticks since boot.
pub type Ticks = u64;

/// Process identifier (PID).
///
/// **Ownership**: Only the task registry hands out PIDs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Pid(u32);

impl Pid {
    /// Idle task; always present, never exits.
    pub const IDLE: Self = Self(0);
    /// Reaper that adopts orphans once it has been created.
    pub const INIT: Self = Self(1);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Decodes a syscall argument; negative or oversized values are rejected.
    #[inline]
    pub fn from_arg(arg: usize) -> Option<Self> {
        let signed = arg as isize;
        if signed < 0 {
            return None;
        }
        u32::try_from(signed).ok().map(Self)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}

/// User identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Uid(u32);

impl Uid {
    pub const ROOT: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Group identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Gid(u32);

impl Gid {
    pub const ROOT: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_from_arg_rejects_negative_values() {
        assert_eq!(Pid::from_arg(5), Some(Pid::from_raw(5)));
        assert_eq!(Pid::from_arg(0), Some(Pid::IDLE));
        assert_eq!(Pid::from_arg(usize::MAX), None);
    }
}
