// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Deferred work raised from interrupt handlers and drained before the trap returns.

use alloc::collections::VecDeque;
use bitflags::bitflags;

use crate::kernel::Kernel;

bitflags! {
    /// Kinds of pending deferred work.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct SoftIrq: u8 {
        /// Clock timers reached their deadline.
        const TIMER = 1 << 0;
        /// Exited tasks with nobody left to wait for them.
        const REAP = 1 << 1;
        /// Driver bottom halves queued with [`SoftIrqQueue::defer`].
        const DEVICE = 1 << 2;
    }
}

/// Device bottom half.
pub type DeferredWork = fn(&mut Kernel);

#[derive(Default)]
pub struct SoftIrqQueue {
    pending: SoftIrq,
    device: VecDeque<DeferredWork>,
}

impl SoftIrqQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&mut self, kind: SoftIrq) {
        self.pending |= kind;
    }

    /// Queues a driver bottom half and raises [`SoftIrq::DEVICE`].
    pub fn defer(&mut self, work: DeferredWork) {
        self.device.push_back(work);
        self.pending |= SoftIrq::DEVICE;
    }

    pub fn pending(&self) -> SoftIrq {
        self.pending
    }

    /// Clears and returns the pending kinds.
    pub fn take(&mut self) -> SoftIrq {
        core::mem::take(&mut self.pending)
    }

    pub fn next_device_work(&mut self) -> Option<DeferredWork> {
        self.device.pop_front()
    }
}
