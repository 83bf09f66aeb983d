// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel synchronisation primitives
//! OWNERS: @kernel-sync-team
//! PUBLIC API: IrqSpinLock, IrqSpinLockGuard
//! DEPENDS_ON: spin, arch::riscv interrupt masking
//! INVARIANTS: Single hart; every critical section runs with supervisor interrupts masked

mod spinlock;

pub use spinlock::{IrqSpinLock, IrqSpinLockGuard};
