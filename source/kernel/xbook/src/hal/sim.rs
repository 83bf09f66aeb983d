// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Deterministic devices for host builds.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::{InterruptController, Timer};

/// Manually advanced clock that records the programmed wake-ups.
#[derive(Default)]
pub struct SimTimer {
    now: AtomicU64,
    wakeups: Mutex<Vec<u64>>,
}

impl SimTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ns: u64) {
        self.now.fetch_add(ns, Ordering::Relaxed);
    }

    pub fn last_wakeup(&self) -> Option<u64> {
        self.wakeups.lock().last().copied()
    }

    pub fn wakeup_count(&self) -> usize {
        self.wakeups.lock().len()
    }
}

impl Timer for SimTimer {
    fn now(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }

    fn set_wakeup(&self, deadline: u64) {
        self.wakeups.lock().push(deadline);
    }
}

/// Interrupt controller fed by the test.
#[derive(Default)]
pub struct SimIrq {
    pending: Mutex<VecDeque<usize>>,
    completed: Mutex<Vec<usize>>,
}

impl SimIrq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, irq: usize) {
        self.pending.lock().push_back(irq);
    }

    pub fn completed(&self) -> Vec<usize> {
        self.completed.lock().clone()
    }
}

impl InterruptController for SimIrq {
    fn claim(&self) -> Option<usize> {
        self.pending.lock().pop_front()
    }

    fn complete(&self, irq: usize) {
        self.completed.lock().push(irq);
    }
}
