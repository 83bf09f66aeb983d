// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Process groups and sessions (`setpgid`, `getpgid`, `setsid`, `getsid`).

use super::TaskRegistry;
use crate::types::Pid;

#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupError {
    NoSuchProcess,
    PermissionDenied,
    InvalidArgument,
}

/// `getpgid`; `None` means the caller.
pub fn get_pgid(tasks: &TaskRegistry, caller: Pid, pid: Option<Pid>) -> Result<Pid, GroupError> {
    let target = tasks.find_by_pid(pid.unwrap_or(caller)).ok_or(GroupError::NoSuchProcess)?;
    Ok(target.pgid())
}

/// `getsid`; `None` means the caller.
pub fn get_sid(tasks: &TaskRegistry, caller: Pid, pid: Option<Pid>) -> Result<Pid, GroupError> {
    let target = tasks.find_by_pid(pid.unwrap_or(caller)).ok_or(GroupError::NoSuchProcess)?;
    Ok(target.sid())
}

/// `setpgid`: moves the caller or one of its children into process group
/// `pgid` (`None` = the target's own PID) within the caller's session.
pub fn set_pgid(
    tasks: &TaskRegistry,
    caller: Pid,
    pid: Option<Pid>,
    pgid: Option<Pid>,
) -> Result<(), GroupError> {
    let target_pid = pid.unwrap_or(caller);
    let target = tasks.find_by_pid(target_pid).ok_or(GroupError::NoSuchProcess)?;
    let caller_task = tasks.find_by_pid(caller).ok_or(GroupError::NoSuchProcess)?;
    if target_pid != caller && target.parent() != Some(caller) {
        return Err(GroupError::NoSuchProcess);
    }
    let session = caller_task.sid();
    if target.sid() != session {
        return Err(GroupError::PermissionDenied);
    }
    if target.sid() == target_pid {
        // session leaders cannot change group
        return Err(GroupError::PermissionDenied);
    }
    let new_pgid = pgid.unwrap_or(target_pid);
    if new_pgid != target_pid {
        let joins_existing = tasks
            .members_of_group(new_pgid)
            .iter()
            .any(|member| member.sid() == session && !member.state().has_exited());
        if !joins_existing {
            return Err(GroupError::PermissionDenied);
        }
    }
    target.lock().pgid = new_pgid;
    Ok(())
}

/// `setsid`: makes the caller leader of a new session and process group.
pub fn set_sid(tasks: &TaskRegistry, caller: Pid) -> Result<Pid, GroupError> {
    let task = tasks.find_by_pid(caller).ok_or(GroupError::NoSuchProcess)?;
    let in_use = tasks.members_of_group(caller).iter().any(|member| member.pid() != caller);
    let mut inner = task.lock();
    if inner.pgid == caller || in_use {
        return Err(GroupError::PermissionDenied);
    }
    inner.sid = caller;
    inner.pgid = caller;
    Ok(caller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;

    use crate::sched::TaskContext;
    use crate::signal::SignalState;
    use crate::task::{KernelStack, Task, TaskInner};

    fn add(reg: &TaskRegistry, pid: u32, parent: Option<u32>, pgid: u32, sid: u32) {
        let mut inner = TaskInner::new(KernelStack::allocate().expect("stack"), 8, 9);
        inner.parent = parent.map(Pid::from_raw);
        inner.pgid = Pid::from_raw(pgid);
        inner.sid = Pid::from_raw(sid);
        let pid = Pid::from_raw(pid);
        reg.insert(Arc::new(Task::new(pid, "t", TaskContext::default(), inner, SignalState::new())));
    }

    fn p(n: u32) -> Pid {
        Pid::from_raw(n)
    }

    #[test]
    fn child_can_be_moved_into_new_group() {
        let reg = TaskRegistry::new();
        add(&reg, 1, None, 1, 1);
        add(&reg, 2, Some(1), 1, 1);
        add(&reg, 3, Some(1), 1, 1);
        set_pgid(&reg, p(1), Some(p(2)), None).unwrap();
        assert_eq!(get_pgid(&reg, p(1), Some(p(2))), Ok(p(2)));
        set_pgid(&reg, p(1), Some(p(3)), Some(p(2))).unwrap();
        assert_eq!(get_pgid(&reg, p(3), None), Ok(p(2)));
    }

    #[test]
    fn unrelated_or_missing_targets_are_rejected() {
        let reg = TaskRegistry::new();
        add(&reg, 1, None, 1, 1);
        add(&reg, 2, Some(1), 1, 1);
        add(&reg, 3, None, 3, 3);
        assert_eq!(set_pgid(&reg, p(2), Some(p(3)), None), Err(GroupError::NoSuchProcess));
        assert_eq!(set_pgid(&reg, p(1), None, None), Err(GroupError::PermissionDenied));
        assert_eq!(set_pgid(&reg, p(1), Some(p(2)), Some(p(3))), Err(GroupError::PermissionDenied));
        assert_eq!(get_sid(&reg, p(1), Some(p(9))), Err(GroupError::NoSuchProcess));
    }

    #[test]
    fn setsid_refuses_group_leaders() {
        let reg = TaskRegistry::new();
        add(&reg, 1, None, 1, 1);
        add(&reg, 2, Some(1), 1, 1);
        assert_eq!(set_sid(&reg, p(1)), Err(GroupError::PermissionDenied));
        assert_eq!(set_sid(&reg, p(2)), Ok(p(2)));
        assert_eq!(get_sid(&reg, p(2), None), Ok(p(2)));
        assert_eq!(get_pgid(&reg, p(2), None), Ok(p(2)));
    }
}
