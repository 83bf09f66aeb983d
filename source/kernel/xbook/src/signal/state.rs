// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-task signal bookkeeping and the tick-driven alarm.

use super::{SigAction, SigSet, Signal, NSIG};
use crate::types::Ticks;

/// Countdown timer that raises SIGALRM; both fields count timer ticks.
///
/// `remaining == 0` means disarmed. A non-zero `interval` re-arms the alarm
/// from the tick it fired on; ticks lost while the alarm was being handled are
/// not compensated.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Alarm {
    pub remaining: Ticks,
    pub interval: Ticks,
}

impl Alarm {
    pub const fn is_armed(&self) -> bool {
        self.remaining != 0
    }

    /// Arms (or with `value == 0` disarms) the alarm and returns the previous setting.
    pub fn set(&mut self, value: Ticks, interval: Ticks) -> Alarm {
        let previous = *self;
        self.remaining = value;
        self.interval = if value == 0 { 0 } else { interval };
        previous
    }

    /// Counts one tick; returns true when the alarm fires.
    pub fn tick(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        if self.remaining > 0 {
            return false;
        }
        self.remaining = self.interval;
        true
    }
}

/// Signal state carried by every task.
#[derive(Clone, Debug)]
pub struct SignalState {
    pub pending: SigSet,
    pub blocked: SigSet,
    actions: [SigAction; NSIG],
    pub alarm: Alarm,
}

impl SignalState {
    pub fn new() -> Self {
        Self {
            pending: SigSet::EMPTY,
            blocked: SigSet::EMPTY,
            actions: [SigAction::default(); NSIG],
            alarm: Alarm::default(),
        }
    }

    pub fn action(&self, sig: Signal) -> SigAction {
        self.actions[sig.number() - 1]
    }

    pub(crate) fn set_action(&mut self, sig: Signal, action: SigAction) -> SigAction {
        core::mem::replace(&mut self.actions[sig.number() - 1], action)
    }

    /// Lowest pending signal not blocked; SIGKILL and SIGSTOP are never blocked.
    pub fn next_deliverable(&self) -> Option<Signal> {
        self.pending.difference(self.blocked.without_uncatchable()).first()
    }

    pub fn has_deliverable(&self) -> bool {
        self.next_deliverable().is_some()
    }

    /// State inherited by a forked child: actions and mask, nothing pending, no alarm.
    pub fn for_child(&self) -> Self {
        Self {
            pending: SigSet::EMPTY,
            blocked: self.blocked,
            actions: self.actions,
            alarm: Alarm::default(),
        }
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_alarm_fires_once() {
        let mut alarm = Alarm::default();
        alarm.set(3, 0);
        assert!(!alarm.tick());
        assert!(!alarm.tick());
        assert!(alarm.tick());
        assert!(!alarm.is_armed());
        assert!(!alarm.tick());
    }

    #[test]
    fn periodic_alarm_rearms_from_interval() {
        let mut alarm = Alarm::default();
        alarm.set(1, 2);
        assert!(alarm.tick());
        assert_eq!(alarm.remaining, 2);
        assert!(!alarm.tick());
        assert!(alarm.tick());
    }

    #[test]
    fn set_returns_previous_and_zero_disarms() {
        let mut alarm = Alarm::default();
        assert_eq!(alarm.set(10, 5), Alarm::default());
        let prev = alarm.set(0, 7);
        assert_eq!(prev, Alarm { remaining: 10, interval: 5 });
        assert!(!alarm.is_armed());
        assert_eq!(alarm.interval, 0);
    }

    #[test]
    fn blocked_signals_wait_but_kill_does_not() {
        let mut state = SignalState::new();
        state.blocked = SigSet::from_bits(u64::MAX);
        state.pending.insert(Signal::SIGUSR1);
        assert_eq!(state.next_deliverable(), None);
        state.pending.insert(Signal::SIGKILL);
        assert_eq!(state.next_deliverable(), Some(Signal::SIGKILL));
    }

    #[test]
    fn child_state_drops_pending_and_alarm() {
        let mut state = SignalState::new();
        state.pending.insert(Signal::SIGUSR1);
        state.blocked.insert(Signal::SIGUSR2);
        state.alarm.set(5, 0);
        state.set_action(Signal::SIGINT, SigAction::ignore());
        let child = state.for_child();
        assert!(child.pending.is_empty());
        assert!(child.blocked.contains(Signal::SIGUSR2));
        assert!(!child.alarm.is_armed());
        assert_eq!(child.action(Signal::SIGINT), SigAction::ignore());
    }
}
