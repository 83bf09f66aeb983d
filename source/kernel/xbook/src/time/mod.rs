// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Tick clock and one-shot kernel timers
//! OWNERS: @kernel-team
//! PUBLIC API: Clock (now/advance/arm/cancel/pop_expired), TimerId, TimerEvent
//! DEPENDS_ON: alloc::collections::BTreeMap
//! INVARIANTS: Tick count is monotonic; a timer fires at most once; equal deadlines fire in arming order

use alloc::collections::BTreeMap;

use crate::types::{Pid, Ticks};

/// Handle of an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

/// What to do when a timer expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// End of a timed sleep of `pid`.
    Wake(Pid),
}

pub struct Clock {
    now: Ticks,
    next_id: u64,
    queue: BTreeMap<(Ticks, TimerId), TimerEvent>,
    deadlines: BTreeMap<TimerId, Ticks>,
}

impl Clock {
    pub const fn new() -> Self {
        Self { now: 0, next_id: 0, queue: BTreeMap::new(), deadlines: BTreeMap::new() }
    }

    pub fn now(&self) -> Ticks {
        self.now
    }

    /// Advances by one tick; returns true if some timer is now due.
    pub fn advance(&mut self) -> bool {
        self.now += 1;
        self.has_expired()
    }

    pub fn has_expired(&self) -> bool {
        self.queue.keys().next().is_some_and(|&(deadline, _)| deadline <= self.now)
    }

    /// Arms a timer `delay` ticks from now (at least one tick).
    pub fn arm(&mut self, delay: Ticks, event: TimerEvent) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let deadline = self.now.saturating_add(delay.max(1));
        self.queue.insert((deadline, id), event);
        self.deadlines.insert(id, deadline);
        id
    }

    /// Disarms `id`; returns the ticks it had left, or `None` if it already fired.
    pub fn cancel(&mut self, id: TimerId) -> Option<Ticks> {
        let deadline = self.deadlines.remove(&id)?;
        self.queue.remove(&(deadline, id));
        Some(deadline.saturating_sub(self.now))
    }

    pub fn deadline(&self, id: TimerId) -> Option<Ticks> {
        self.deadlines.get(&id).copied()
    }

    /// Removes and returns the earliest due timer.
    pub fn pop_expired(&mut self) -> Option<(TimerId, TimerEvent)> {
        let (&(deadline, id), _) = self.queue.iter().next()?;
        if deadline > self.now {
            return None;
        }
        let event = self.queue.remove(&(deadline, id))?;
        self.deadlines.remove(&id);
        Some((id, event))
    }

    pub fn armed(&self) -> usize {
        self.queue.len()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timers_fire_in_deadline_then_arming_order() {
        let mut clock = Clock::new();
        let late = clock.arm(3, TimerEvent::Wake(Pid::from_raw(1)));
        let first = clock.arm(2, TimerEvent::Wake(Pid::from_raw(2)));
        let second = clock.arm(2, TimerEvent::Wake(Pid::from_raw(3)));
        assert!(!clock.advance());
        assert!(clock.advance());
        assert_eq!(clock.pop_expired().map(|(id, _)| id), Some(first));
        assert_eq!(clock.pop_expired().map(|(id, _)| id), Some(second));
        assert!(clock.pop_expired().is_none());
        clock.advance();
        assert_eq!(clock.pop_expired(), Some((late, TimerEvent::Wake(Pid::from_raw(1)))));
    }

    #[test]
    fn cancel_reports_remaining_ticks_once() {
        let mut clock = Clock::new();
        let id = clock.arm(5, TimerEvent::Wake(Pid::from_raw(4)));
        clock.advance();
        assert_eq!(clock.cancel(id), Some(4));
        assert_eq!(clock.cancel(id), None);
        assert_eq!(clock.armed(), 0);
    }

    #[test]
    fn zero_delay_still_waits_one_tick() {
        let mut clock = Clock::new();
        clock.arm(0, TimerEvent::Wake(Pid::from_raw(1)));
        assert!(clock.pop_expired().is_none());
        assert!(clock.advance());
    }
}
