// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the task registry and credentials
//! OWNERS: @kernel-sched-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - PID allocation never collides with a registered task
//!   - Unprivileged credential changes never introduce a new id
//!
//! TEST_SCENARIOS:
//!   - pids_never_collide(): random create/reap sequences keep PIDs unique
//!   - unprivileged_resuid_stays_within_old_ids(): setresuid without privilege only permutes ids

use alloc::sync::Arc;
use alloc::vec::Vec;

use proptest::prelude::*;

use super::{Credentials, KernelStack, Task, TaskInner, TaskRegistry};
use crate::sched::TaskContext;
use crate::signal::SignalState;
use crate::types::{Gid, Pid, Uid};

#[derive(Debug, Clone)]
enum Op {
    Create,
    Reap(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![3 => Just(Op::Create), 1 => any::<usize>().prop_map(Op::Reap)]
}

fn arb_id() -> impl Strategy<Value = Option<Uid>> {
    prop_oneof![Just(None), (0u32..6).prop_map(|n| Some(Uid::from_raw(n + 1)))]
}

proptest! {
    #[test]
    fn pids_never_collide(ops in proptest::collection::vec(arb_op(), 1..64)) {
        let reg = TaskRegistry::new();
        let mut live: Vec<Pid> = Vec::new();
        for op in ops {
            match op {
                Op::Create => {
                    let pid = reg.take_pid().expect("pid space");
                    prop_assert!(!live.contains(&pid));
                    let inner = TaskInner::new(KernelStack::allocate().expect("stack"), 8, 9);
                    reg.insert(Arc::new(Task::new(pid, "p", TaskContext::default(), inner, SignalState::new())));
                    live.push(pid);
                }
                Op::Reap(idx) if !live.is_empty() => {
                    let pid = live.remove(idx % live.len());
                    prop_assert!(reg.remove(pid).is_some());
                }
                Op::Reap(_) => {}
            }
        }
        prop_assert_eq!(reg.len(), live.len());
    }

    #[test]
    fn unprivileged_resuid_stays_within_old_ids(
        start in (1u32..6, 1u32..6, 1u32..6),
        r in arb_id(), e in arb_id(), s in arb_id(),
    ) {
        let mut cred = Credentials::new(Uid::from_raw(start.0), Gid::from_raw(1));
        cred.euid = Uid::from_raw(start.1);
        cred.suid = Uid::from_raw(start.2);
        let before = cred.clone();
        let old = [before.ruid, before.euid, before.suid];
        match cred.set_resuid(r, e, s) {
            Ok(()) => {
                for id in [cred.ruid, cred.euid, cred.suid] {
                    prop_assert!(old.contains(&id));
                }
            }
            Err(_) => prop_assert_eq!(cred, before),
        }
    }
}
