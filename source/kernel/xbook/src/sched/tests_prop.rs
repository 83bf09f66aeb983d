// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for scheduler list membership and slice accounting
//! OWNERS: @kernel-sched-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - State implies list membership after every transition
//!   - No task is ever linked twice; unblock of a schedulable task is a no-op
//!   - A slice of T ticks triggers exactly one forced yield
//!
//! TEST_SCENARIOS:
//!   - membership_matches_state(): random spawn/yield/block/unblock/wake/tick sequences
//!   - unblock_is_idempotent(): repeated unblock never duplicates a queue entry
//!   - slice_expires_exactly_once(): T ticks -> one preemption

use proptest::prelude::*;

use super::tests::Rig;
use super::*;

#[derive(Debug, Clone)]
enum Op {
    Spawn(u8),
    Yield,
    Block(u8),
    WaitOn,
    Unblock(usize),
    Wakeup(usize),
    WakeOne,
    Tick(bool),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u8..16).prop_map(Op::Spawn),
        Just(Op::Yield),
        (0u8..3).prop_map(Op::Block),
        Just(Op::WaitOn),
        any::<usize>().prop_map(Op::Unblock),
        any::<usize>().prop_map(Op::Wakeup),
        Just(Op::WakeOne),
        any::<bool>().prop_map(Op::Tick),
    ]
}

fn sleeping_state(n: u8) -> TaskState {
    match n {
        0 => TaskState::Blocked,
        1 => TaskState::Waiting,
        _ => TaskState::Stopped,
    }
}

proptest! {
    #[test]
    fn membership_matches_state(ops in proptest::collection::vec(arb_op(), 1..80)) {
        let mut rig = Rig::new();
        let queue = rig.sched.create_wait_queue();
        for op in ops {
            match op {
                Op::Spawn(prio) => {
                    rig.spawn(prio);
                }
                Op::Yield => rig.run_next(),
                Op::Block(state) if rig.sched.current() != Pid::IDLE => {
                    rig.sched.block(&rig.tasks, &rig.cpu, sleeping_state(state));
                }
                Op::WaitOn if rig.sched.current() != Pid::IDLE => {
                    rig.sched.wait_on(&rig.tasks, &rig.cpu, queue, TaskState::Blocked);
                }
                Op::Unblock(idx) | Op::Wakeup(idx) if rig.tasks.len() > 1 => {
                    let pids = rig.tasks.pids();
                    let task = rig.tasks.find_by_pid(pids[idx % pids.len()]).unwrap();
                    if matches!(op, Op::Unblock(_)) {
                        rig.sched.unblock(&task);
                    } else {
                        rig.sched.wakeup(&task);
                    }
                }
                Op::WakeOne => {
                    rig.sched.wake_one(&rig.tasks, queue);
                }
                Op::Tick(in_kernel) => {
                    rig.sched.tick(&rig.tasks, &rig.cpu, in_kernel);
                }
                _ => {}
            }
            prop_assert_eq!(rig.sched.check_invariants(&rig.tasks), Ok(()));
        }
    }

    #[test]
    fn unblock_is_idempotent(prio in 1u8..16, repeats in 1usize..5) {
        let mut rig = Rig::new();
        let task = rig.spawn(prio);
        for _ in 0..repeats {
            prop_assert!(!rig.sched.unblock(&task));
        }
        prop_assert_eq!(rig.sched.ready_queue(prio), alloc::vec![task.pid()]);
        prop_assert_eq!(rig.sched.check_invariants(&rig.tasks), Ok(()));
    }

    #[test]
    fn slice_expires_exactly_once(prio in 1u8..16, base in 1u64..8) {
        let mut rig = Rig::new();
        rig.sched.tunables.timeslice_base = base;
        let task = rig.spawn(prio);
        let slice = rig.sched.timeslice_for(prio);
        {
            let mut inner = task.lock();
            inner.timeslice = slice;
            inner.ticks = slice;
        }
        rig.run_next();
        let mut yields = 0;
        for _ in 0..slice {
            if rig.sched.tick(&rig.tasks, &rig.cpu, false) {
                yields += 1;
            }
        }
        prop_assert_eq!(yields, 1);
    }
}
