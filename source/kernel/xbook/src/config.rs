// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel-wide constants and boot tunables
//! OWNERS: @kernel-team
//! PUBLIC API: Tunables, KSTACK_SIZE, STACK_MAGIC, PID_MAX, NGROUPS_MAX, TIMESLICE_MIN/MAX
//! INVARIANTS: Defaults are stable across boots; tunables are captured once at kernel construction

/// Kernel stack per task (three 8 KiB units).
pub const KSTACK_SIZE: usize = 8192 * 3;
/// Sentinel written at the lowest word of every kernel stack.
pub const STACK_MAGIC: u32 = 0x1998_0325;
/// Task names are truncated to this many bytes.
pub const MAX_TASK_NAMELEN: usize = 32;
/// PIDs are handed out from `1..PID_MAX`; 0 is the idle task.
pub const PID_MAX: u32 = 32768;
/// Maximum number of supplementary groups per task.
pub const NGROUPS_MAX: usize = 32;
/// Number of priority levels; level 0 is reserved for the idle task.
pub const PRIORITY_LEVELS: usize = 16;
pub const TIMESLICE_MIN: u64 = 1;
pub const TIMESLICE_MAX: u64 = 100;

/// `time` CSR frequency of the selected board.
#[cfg(not(feature = "k210"))]
pub const TIMEBASE_HZ: u64 = 10_000_000;
#[cfg(feature = "k210")]
pub const TIMEBASE_HZ: u64 = 403_000_000 / 62;

const DEFAULT_TICK_HZ: u64 = 100;
/// Highest tick rate the microsecond conversions can express.
pub const MAX_TICK_HZ: u64 = 1_000_000;
const DEFAULT_TIMESLICE_BASE: u64 = 1;
const DEFAULT_MAX_PRIORITY_DECAY: u8 = 3;

/// Scheduling knobs chosen at boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tunables {
    /// Timer interrupts per second.
    pub tick_hz: u64,
    /// Ticks granted per dynamic priority level.
    pub timeslice_base: u64,
    /// How far below its static priority a task may decay.
    pub max_priority_decay: u8,
}

impl Tunables {
    /// `tick_hz` clamped into `1..=MAX_TICK_HZ`; every conversion goes through it.
    pub const fn tick_rate(&self) -> u64 {
        if self.tick_hz == 0 {
            1
        } else if self.tick_hz > MAX_TICK_HZ {
            MAX_TICK_HZ
        } else {
            self.tick_hz
        }
    }

    pub const fn is_valid(&self) -> bool {
        self.tick_hz == self.tick_rate()
    }

    /// Nanoseconds between two timer ticks.
    pub const fn tick_period_ns(&self) -> u64 {
        1_000_000_000 / self.tick_rate()
    }

    /// Converts whole seconds into ticks.
    pub const fn secs_to_ticks(&self, secs: u64) -> u64 {
        secs.saturating_mul(self.tick_rate())
    }

    /// Microseconds per tick, never zero.
    const fn micros_per_tick(&self) -> u64 {
        1_000_000 / self.tick_rate()
    }

    /// Converts microseconds into ticks, rounding up so short intervals still fire.
    pub const fn micros_to_ticks(&self, micros: u64) -> u64 {
        micros.div_ceil(self.micros_per_tick())
    }

    /// Converts ticks into microseconds.
    pub const fn ticks_to_micros(&self, ticks: u64) -> u64 {
        ticks.saturating_mul(self.micros_per_tick())
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_TICK_HZ,
            timeslice_base: DEFAULT_TIMESLICE_BASE,
            max_priority_decay: DEFAULT_MAX_PRIORITY_DECAY,
        }
    }
}
