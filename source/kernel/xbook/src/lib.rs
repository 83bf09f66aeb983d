// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: xbook kernel core library
//! OWNERS: @kernel-team
//! PUBLIC API: Kernel, Task, Scheduler, VectorTable, signal and syscall surfaces
//! DEPENDS_ON: alloc, spin, bitflags, riscv (target only)
//! INVARIANTS: single hart; every task is in at most one of {ready queue, one wait list}
//!
//! Hardware specific pieces (context switch assembly, CSR access, SBI timer) are
//! compiled only for `riscv64` bare-metal targets. Host builds substitute fakes so
//! the scheduling, trap and signal logic runs under `cargo test`.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

#[macro_use]
pub mod diag;

pub mod arch;
pub mod config;
pub mod hal;
pub mod heap;
pub mod kernel;
pub mod mm;
#[cfg(all(feature = "panic_handler", target_arch = "riscv64", target_os = "none"))]
mod panic;
pub mod sched;
pub mod signal;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod time;
pub mod trap;
pub mod types;
pub mod uart;

pub use kernel::{Kernel, KernelConfig};
pub use types::{Gid, Pid, Uid};
