// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Global task registry indexed by PID, and the PID allocator.
//!
//! The registry lock is held only for the map operation itself; callers get
//! `Arc<Task>` clones and take the task's own lock afterwards, never the other
//! way round.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::{Task, TaskState};
use crate::config::PID_MAX;
use crate::sync::IrqSpinLock;
use crate::types::Pid;

/// Point-in-time view of one task for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub pid: Pid,
    pub name: String,
    pub state: TaskState,
    pub priority: u8,
    pub parent: Option<Pid>,
}

struct PidAllocator {
    next: u32,
}

pub struct TaskRegistry {
    tasks: IrqSpinLock<BTreeMap<Pid, Arc<Task>>>,
    pids: IrqSpinLock<PidAllocator>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: IrqSpinLock::new(BTreeMap::new()),
            pids: IrqSpinLock::new(PidAllocator { next: 1 }),
        }
    }

    /// Hands out the next free PID, scanning upwards from the last one issued
    /// and wrapping from `PID_MAX - 1` back to 1. PIDs held by registered
    /// tasks (zombies included) are skipped.
    pub fn take_pid(&self) -> Option<Pid> {
        let mut alloc = self.pids.lock();
        let tasks = self.tasks.lock();
        let mut candidate = alloc.next;
        for _ in 1..PID_MAX {
            if candidate >= PID_MAX {
                candidate = 1;
            }
            let pid = Pid::from_raw(candidate);
            if !tasks.contains_key(&pid) {
                alloc.next = candidate + 1;
                return Some(pid);
            }
            candidate += 1;
        }
        None
    }

    /// Returns `pid` to the allocator after a failed construction, if it was
    /// the most recently issued one.
    pub fn rollback_pid(&self, pid: Pid) {
        let mut alloc = self.pids.lock();
        if alloc.next == pid.as_raw() + 1 {
            alloc.next = pid.as_raw();
        }
    }

    pub(crate) fn insert(&self, task: Arc<Task>) {
        let previous = self.tasks.lock().insert(task.pid(), task);
        debug_assert!(previous.is_none(), "pid registered twice");
    }

    pub(crate) fn remove(&self, pid: Pid) -> Option<Arc<Task>> {
        self.tasks.lock().remove(&pid)
    }

    pub fn find_by_pid(&self, pid: Pid) -> Option<Arc<Task>> {
        self.tasks.lock().get(&pid).cloned()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.tasks.lock().contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All registered tasks in PID order.
    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.tasks.lock().values().cloned().collect()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.tasks.lock().keys().copied().collect()
    }

    pub fn for_each(&self, mut f: impl FnMut(&Arc<Task>)) {
        for task in self.tasks() {
            f(&task);
        }
    }

    pub fn children_of(&self, parent: Pid) -> Vec<Arc<Task>> {
        self.tasks().into_iter().filter(|task| task.parent() == Some(parent)).collect()
    }

    pub fn count_children(&self, parent: Pid) -> usize {
        self.children_of(parent).len()
    }

    pub fn is_child(&self, parent: Pid, child: Pid) -> bool {
        self.find_by_pid(child).is_some_and(|task| task.parent() == Some(parent))
    }

    pub fn members_of_group(&self, pgid: Pid) -> Vec<Arc<Task>> {
        self.tasks().into_iter().filter(|task| task.pgid() == pgid).collect()
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.tasks()
            .iter()
            .map(|task| {
                let inner = task.lock();
                TaskSnapshot {
                    pid: task.pid(),
                    name: String::from(task.name()),
                    state: inner.state,
                    priority: inner.priority,
                    parent: inner.parent,
                }
            })
            .collect()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
