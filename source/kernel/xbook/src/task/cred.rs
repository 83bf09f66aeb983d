// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Process credentials and the POSIX rules for changing them
//! OWNERS: @kernel-sched-team
//! PUBLIC API: Credentials (set/get uid, gid, reuid, regid, resuid, resgid, groups), CredError
//! INVARIANTS: Unprivileged callers may only move ids among their current real/effective/saved
//!             values; every setter either applies fully or leaves the credentials untouched
//!
//! "Privileged" means effective uid 0. `None` arguments mean "leave unchanged"
//! (the `-1` of the C interface).

use alloc::vec::Vec;

use crate::config::NGROUPS_MAX;
use crate::types::{Gid, Uid};

#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredError {
    InvalidArgument,
    PermissionDenied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ruid: Uid,
    pub euid: Uid,
    pub suid: Uid,
    pub rgid: Gid,
    pub egid: Gid,
    pub sgid: Gid,
    groups: Vec<Gid>,
}

impl Credentials {
    pub fn root() -> Self {
        Self::new(Uid::ROOT, Gid::ROOT)
    }

    pub fn new(uid: Uid, gid: Gid) -> Self {
        Self { ruid: uid, euid: uid, suid: uid, rgid: gid, egid: gid, sgid: gid, groups: Vec::new() }
    }

    pub fn is_privileged(&self) -> bool {
        self.euid == Uid::ROOT
    }

    fn uid_allowed(&self, uid: Uid) -> bool {
        uid == self.ruid || uid == self.euid || uid == self.suid
    }

    fn gid_allowed(&self, gid: Gid) -> bool {
        gid == self.rgid || gid == self.egid || gid == self.sgid
    }

    /// `setuid`: privileged callers set all three ids, others only the effective one.
    pub fn set_uid(&mut self, uid: Uid) -> Result<(), CredError> {
        if self.is_privileged() {
            self.ruid = uid;
            self.euid = uid;
            self.suid = uid;
            return Ok(());
        }
        if uid != self.ruid && uid != self.suid {
            return Err(CredError::PermissionDenied);
        }
        self.euid = uid;
        Ok(())
    }

    pub fn set_gid(&mut self, gid: Gid) -> Result<(), CredError> {
        if self.is_privileged() {
            self.rgid = gid;
            self.egid = gid;
            self.sgid = gid;
            return Ok(());
        }
        if gid != self.rgid && gid != self.sgid {
            return Err(CredError::PermissionDenied);
        }
        self.egid = gid;
        Ok(())
    }

    /// `setreuid`: the saved id follows the new effective id whenever the real
    /// id is set or the effective id moves away from the old real id.
    pub fn set_reuid(&mut self, ruid: Option<Uid>, euid: Option<Uid>) -> Result<(), CredError> {
        if !self.is_privileged() {
            if ruid.is_some_and(|r| r != self.ruid && r != self.euid) {
                return Err(CredError::PermissionDenied);
            }
            if euid.is_some_and(|e| !self.uid_allowed(e)) {
                return Err(CredError::PermissionDenied);
            }
        }
        let old_ruid = self.ruid;
        if let Some(r) = ruid {
            self.ruid = r;
        }
        if let Some(e) = euid {
            self.euid = e;
        }
        if ruid.is_some() || euid.is_some_and(|e| e != old_ruid) {
            self.suid = self.euid;
        }
        Ok(())
    }

    pub fn set_regid(&mut self, rgid: Option<Gid>, egid: Option<Gid>) -> Result<(), CredError> {
        if !self.is_privileged() {
            if rgid.is_some_and(|r| r != self.rgid && r != self.egid) {
                return Err(CredError::PermissionDenied);
            }
            if egid.is_some_and(|e| !self.gid_allowed(e)) {
                return Err(CredError::PermissionDenied);
            }
        }
        let old_rgid = self.rgid;
        if let Some(r) = rgid {
            self.rgid = r;
        }
        if let Some(e) = egid {
            self.egid = e;
        }
        if rgid.is_some() || egid.is_some_and(|e| e != old_rgid) {
            self.sgid = self.egid;
        }
        Ok(())
    }

    /// `setresuid`: one atomic update of real, effective and saved uid.
    pub fn set_resuid(&mut self, r: Option<Uid>, e: Option<Uid>, s: Option<Uid>) -> Result<(), CredError> {
        if !self.is_privileged() && [r, e, s].into_iter().flatten().any(|id| !self.uid_allowed(id)) {
            return Err(CredError::PermissionDenied);
        }
        if let Some(r) = r {
            self.ruid = r;
        }
        if let Some(e) = e {
            self.euid = e;
        }
        if let Some(s) = s {
            self.suid = s;
        }
        Ok(())
    }

    pub fn set_resgid(&mut self, r: Option<Gid>, e: Option<Gid>, s: Option<Gid>) -> Result<(), CredError> {
        if !self.is_privileged() && [r, e, s].into_iter().flatten().any(|id| !self.gid_allowed(id)) {
            return Err(CredError::PermissionDenied);
        }
        if let Some(r) = r {
            self.rgid = r;
        }
        if let Some(e) = e {
            self.egid = e;
        }
        if let Some(s) = s {
            self.sgid = s;
        }
        Ok(())
    }

    pub fn resuid(&self) -> (Uid, Uid, Uid) {
        (self.ruid, self.euid, self.suid)
    }

    pub fn resgid(&self) -> (Gid, Gid, Gid) {
        (self.rgid, self.egid, self.sgid)
    }

    pub fn groups(&self) -> &[Gid] {
        &self.groups
    }

    /// Replaces the supplementary groups; privileged only, at most `NGROUPS_MAX` entries.
    pub fn set_groups(&mut self, groups: &[Gid]) -> Result<(), CredError> {
        if !self.is_privileged() {
            return Err(CredError::PermissionDenied);
        }
        if groups.len() > NGROUPS_MAX {
            return Err(CredError::InvalidArgument);
        }
        self.groups.clear();
        self.groups.extend_from_slice(groups);
        Ok(())
    }

    pub fn in_group(&self, gid: Gid) -> bool {
        self.egid == gid || self.groups.contains(&gid)
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::root()
    }
}
